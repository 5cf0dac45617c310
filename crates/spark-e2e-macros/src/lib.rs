//! # spark-e2e-macros
//!
//! 提供 `spark_e2e` 属性宏：把内联模块标注为一组端到端用例的宿主，并为声明的每个标准套件
//! 注入一个 `#[test]` 入口。生成的测试调用 `spark_e2e::suite::run_default_suite`，在默认注册表上
//! 逐个配置执行模块内 `CASES` 常量列出的用例。

use heck::ToSnakeCase;
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Ident, Item, ItemMod, Meta, Result as SynResult, Token, parse_macro_input};

#[proc_macro_attribute]
/// 教案级说明：
/// - **意图（Why）**：套件名称是配置矩阵的稳定契约，用宏生成入口可以避免手写
///   `#[test]` 样板时拼错名称或遗漏套件。
/// - **逻辑（How）**：解析 `suites(...)` 参数，检查模块内联且声明了 `CASES`，
///   再为每个套件追加一个以蛇形命名的测试函数。
/// - **契约（What）**：`#[spark_e2e(suites(CoreEnd2endTests, Http2Tests))]` 只能用于内联模块；
///   模块必须包含名为 `CASES`、类型为 `&[E2eCase]` 的常量。
pub fn spark_e2e(attr: TokenStream, item: TokenStream) -> TokenStream {
    let module = parse_macro_input!(item as ItemMod);

    match parse_suites(attr).and_then(|suites| inject_tests(suites, module)) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// 解析 `suites(A, B, ...)`；套件列表不能为空。
fn parse_suites(attr: TokenStream) -> SynResult<Vec<Ident>> {
    let meta = syn::parse::<Meta>(attr)?;
    let list = match meta {
        Meta::List(list) if list.path.is_ident("suites") => list,
        other => {
            return Err(syn::Error::new(
                other.span(),
                "spark_e2e 属性仅支持 suites(...)",
            ));
        }
    };

    let nested: Punctuated<Meta, Token![,]> = list.parse_args_with(Punctuated::parse_terminated)?;
    let mut suites = Vec::new();
    for meta in nested {
        match meta {
            Meta::Path(path) => match path.get_ident() {
                Some(ident) => suites.push(ident.clone()),
                None => return Err(syn::Error::new(path.span(), "suite 需为标识符")),
            },
            other => {
                return Err(syn::Error::new(other.span(), "suites(...) 仅接受标识符"));
            }
        }
    }
    if suites.is_empty() {
        return Err(syn::Error::new(list.span(), "suites(...) 至少需要一个套件"));
    }
    Ok(suites)
}

/// 为每个套件生成 `#[test] fn <snake_case>()`。
fn inject_tests(suites: Vec<Ident>, mut module: ItemMod) -> SynResult<proc_macro2::TokenStream> {
    let module_span = module.span();
    let Some((_, ref mut items)) = module.content else {
        return Err(syn::Error::new(
            module_span,
            "spark_e2e 只能用于内联模块，用例需在模块内通过 `CASES` 声明",
        ));
    };

    let declares_cases = items.iter().any(|item| match item {
        Item::Const(item) => item.ident == "CASES",
        Item::Static(item) => item.ident == "CASES",
        _ => false,
    });
    if !declares_cases {
        return Err(syn::Error::new(module_span, "模块缺少 `CASES` 用例列表"));
    }

    for suite in suites {
        let test_ident = format_ident!("{}", suite.to_string().to_snake_case(), span = suite.span());
        let suite_name = suite.to_string();
        let item: Item = syn::parse_quote! {
            #[test]
            fn #test_ident() {
                ::spark_e2e::suite::run_default_suite(#suite_name, CASES);
            }
        };
        items.push(item);
    }

    Ok(quote! { #module })
}
