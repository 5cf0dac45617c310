//! 套件绑定：把具名测试套件与一条配置查询关联，并在选中的每个配置上执行用例。
//!
//! # 教案式说明
//! - **意图 (Why)**：测试作者只声明“套件名 + 查询”，由绑定器决定该套件展开到哪些夹具上；
//!   `#[spark_e2e(suites(...))]` 宏把每个套件变成一个 libtest 入口。
//! - **契约 (What)**：
//!   - [`SuiteCatalog::declare`] 重复声明同名套件时，后者覆盖前者并记录告警；
//!   - [`run_suite`] 为每个 (配置, 用例) 组合构造一个新夹具，`Unsupported` 记为跳过，
//!     其余错误与 panic 一律带上 `[套件::配置::用例]` 上下文重新 panic；
//!   - [`default_catalog`] 给出全部标准套件及其查询。
//! - **实现 (How)**：用例是普通函数指针，宏展开结果可以放进 `const` 切片；
//!   panic 通过 `catch_unwind` 捕获后补充上下文再抛出。

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use crate::{
    args::ChannelArgs,
    config::{E2eConfig, ExecutionMode},
    error::{FixtureError, QueryError},
    feature::FeatureMask,
    fixture::{Fixture, no_pre_start},
    handle::{CompletionSink, probe},
    observability::init_tracing,
    query::ConfigQuery,
    registry::{Configuration, Registry},
};

/// 套件目录，保持声明顺序。
#[derive(Clone, Debug, Default)]
pub struct SuiteCatalog {
    suites: Vec<(String, ConfigQuery)>,
}

impl SuiteCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: impl Into<String>, query: ConfigQuery) -> &mut Self {
        let name = name.into();
        match self.suites.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => {
                tracing::warn!(suite = %name, "suite declared twice; the later declaration wins");
                slot.1 = query;
            }
            None => self.suites.push((name, query)),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&ConfigQuery> {
        self.suites
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, query)| query)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.suites.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.suites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suites.is_empty()
    }

    /// 对每个套件执行查询。
    pub fn bind<'r>(&self, registry: &'r Registry) -> Vec<BoundSuite<'r>> {
        self.suites
            .iter()
            .map(|(name, query)| BoundSuite {
                name: name.clone(),
                configurations: query.run(registry),
            })
            .collect()
    }

    /// 只绑定一个套件。
    pub fn bind_one<'r>(&self, name: &str, registry: &'r Registry) -> Option<BoundSuite<'r>> {
        self.get(name).map(|query| BoundSuite {
            name: name.to_string(),
            configurations: query.run(registry),
        })
    }
}

/// 已展开到具体配置的套件。
#[derive(Clone, Debug)]
pub struct BoundSuite<'r> {
    pub name: String,
    pub configurations: Vec<&'r Configuration>,
}

impl BoundSuite<'_> {
    pub fn configuration_names(&self) -> Vec<&str> {
        self.configurations.iter().map(|config| config.name()).collect()
    }
}

/// 标准套件目录，查询以进程环境构造。
pub fn default_catalog(mode: ExecutionMode) -> Result<SuiteCatalog, QueryError> {
    default_catalog_with(mode, &E2eConfig::from_env())
}

pub fn default_catalog_with(
    mode: ExecutionMode,
    config: &E2eConfig,
) -> Result<SuiteCatalog, QueryError> {
    use FeatureMask as F;

    let base = || ConfigQuery::with_config(mode, config);
    let mut catalog = SuiteCatalog::new();
    catalog
        .declare("CoreEnd2endTests", base())
        .declare("SecureEnd2endTests", base().enforce_features(F::IS_SECURE))
        .declare(
            "CoreLargeSendTests",
            base().exclude_features(F::ONE_BYTE_AT_A_TIME | F::ENABLES_TRACES),
        )
        .declare("CoreDeadlineTests", base().exclude_features(F::IS_MINSTACK))
        .declare(
            "CoreDeadlineSingleHopTests",
            base().exclude_features(F::SUPPORTS_REQUEST_PROXYING | F::IS_MINSTACK),
        )
        .declare(
            "CoreClientChannelTests",
            base().enforce_features(F::SUPPORTS_CLIENT_CHANNEL),
        )
        .declare(
            "Http2SingleHopTests",
            base()
                .enforce_features(F::IS_HTTP2)
                .exclude_features(F::SUPPORTS_REQUEST_PROXYING | F::ENABLES_TRACES),
        )
        .declare(
            "Http2FullstackSingleHopTests",
            base()
                .enforce_features(F::IS_HTTP2 | F::SUPPORTS_CLIENT_CHANNEL)
                .exclude_features(F::SUPPORTS_REQUEST_PROXYING),
        )
        .declare(
            "RetryTests",
            base()
                .enforce_features(F::SUPPORTS_CLIENT_CHANNEL)
                .exclude_features(F::DOES_NOT_SUPPORT_RETRY),
        )
        .declare(
            "WriteBufferingTests",
            base().exclude_features(F::DOES_NOT_SUPPORT_WRITE_BUFFERING),
        )
        .declare("Http2Tests", base().enforce_features(F::IS_HTTP2))
        .declare(
            "RetryHttp2Tests",
            base()
                .enforce_features(F::IS_HTTP2 | F::SUPPORTS_CLIENT_CHANNEL)
                .exclude_features(F::DOES_NOT_SUPPORT_RETRY | F::SUPPORTS_REQUEST_PROXYING),
        )
        .declare(
            "ResourceQuotaTests",
            base()
                .exclude_features(F::SUPPORTS_REQUEST_PROXYING | F::ONE_BYTE_AT_A_TIME)
                .exclude_name("Chttp2.*Uds.*")?
                .exclude_name("Chttp2HttpProxy")?,
        )
        .declare(
            "PerCallCredsTests",
            base().enforce_features(F::SUPPORTS_PER_CALL_CREDENTIALS),
        )
        .declare(
            "PerCallCredsOnInsecureTests",
            base().enforce_features(F::SUPPORTS_PER_CALL_CREDENTIALS_LEVEL_INSECURE),
        )
        .declare("NoLoggingTests", base().exclude_features(F::ENABLES_TRACES))
        .declare("ProxyAuthTests", base().allow_name("Chttp2HttpProxy")?);
    Ok(catalog)
}

/// 一个端到端用例：接收配置与为它新建的夹具。
#[derive(Clone, Copy)]
pub struct E2eCase {
    pub name: &'static str,
    pub run: fn(&Configuration, Box<dyn Fixture>) -> Result<(), FixtureError>,
}

impl E2eCase {
    pub const fn new(
        name: &'static str,
        run: fn(&Configuration, Box<dyn Fixture>) -> Result<(), FixtureError>,
    ) -> Self {
        Self { name, run }
    }
}

impl std::fmt::Debug for E2eCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("E2eCase").field("name", &self.name).finish()
    }
}

/// 套件执行统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SuiteReport {
    pub executed: usize,
    pub skipped: usize,
}

/// 在套件选中的每个配置上执行全部用例。
///
/// # Panics
/// 夹具构造失败（`Unsupported` 除外）、用例返回错误或用例 panic 时，以 `[套件::配置::用例]` 为前缀 panic。
pub fn run_suite(suite: &BoundSuite<'_>, cases: &[E2eCase]) -> SuiteReport {
    let mut report = SuiteReport::default();
    let args = ChannelArgs::new();
    for config in &suite.configurations {
        for case in cases {
            let context = format!("[{}::{}::{}]", suite.name, config.name(), case.name);
            let fixture = match config.create_fixture(&args, &args) {
                Ok(fixture) => fixture,
                Err(err) if err.is_unsupported() => {
                    tracing::warn!(%context, error = %err, "configuration skipped");
                    report.skipped += 1;
                    continue;
                }
                Err(err) => panic!("{context} fixture construction failed: {err}"),
            };
            tracing::debug!(%context, "running case");
            match panic::catch_unwind(AssertUnwindSafe(|| (case.run)(config, fixture))) {
                Ok(Ok(())) => report.executed += 1,
                Ok(Err(err)) if err.is_unsupported() => {
                    tracing::warn!(%context, error = %err, "case skipped");
                    report.skipped += 1;
                }
                Ok(Err(err)) => panic!("{context} {err}"),
                Err(payload) => panic!("{context} {}", panic_message(payload.as_ref())),
            }
        }
    }
    report
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "case panicked"
    }
}

/// 宏展开入口：在默认注册表上执行一个标准套件。
///
/// # Panics
/// 套件名称未知，或 [`run_suite`] 报告失败时 panic。
pub fn run_default_suite(name: &str, cases: &[E2eCase]) -> SuiteReport {
    let config = match E2eConfig::load() {
        Ok(config) => {
            init_tracing(&config);
            config
        }
        Err(err) => {
            let config = E2eConfig::from_env();
            init_tracing(&config);
            tracing::warn!(error = %err, "ignoring e2e configuration file");
            config
        }
    };
    let catalog = default_catalog_with(ExecutionMode::Interactive, &config)
        .unwrap_or_else(|err| panic!("standard suite catalog is invalid: {err}"));
    let Some(suite) = catalog.bind_one(name, Registry::global()) else {
        panic!("unknown e2e suite `{name}`");
    };
    let report = run_suite(&suite, cases);
    tracing::info!(
        suite = name,
        executed = report.executed,
        skipped = report.skipped,
        "suite finished"
    );
    report
}

/// 最小连通性用例：服务端回显客户端发出的一段载荷。
pub const CONNECTIVITY: E2eCase = E2eCase::new("connectivity", connectivity);

fn connectivity(config: &Configuration, mut fixture: Box<dyn Fixture>) -> Result<(), FixtureError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(FixtureError::io("case runtime"))?;
    let sink = CompletionSink::new();
    let args = ChannelArgs::new();
    let mut server = fixture.make_server(&args, &sink, &mut no_pre_start)?;
    let mut client = fixture.make_client(&args, &sink)?;
    let payload = format!("hello {}", config.name());
    let echoed = runtime.block_on(probe::round_trip(&mut server, &mut client, payload.as_bytes()))?;
    assert_eq!(echoed, payload.as_bytes(), "echo mismatch");
    Ok(())
}
