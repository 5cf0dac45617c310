//! 特性掩码：描述每个夹具传输“支持什么、缺少什么”的固定位集合。
//!
//! # 教案式说明
//! - **意图 (Why)**：测试套件通过能力位而非夹具名称挑选配置，新增夹具时只需正确标注能力位，
//!   所有套件即可自动覆盖或排除它。
//! - **契约 (What)**：位名称属于对外契约，套件定义依赖这些名称，重命名即破坏性变更；
//!   成员判断、并、交、差与相等比较均为 O(1)。
//! - **实现 (How)**：借助 `bitflags` 生成 `u32` 位集合，解析与格式化沿用其文本语法 `A | B`。

use std::fmt;

use bitflags::bitflags;

use crate::error::UnknownFeature;

bitflags! {
    /// 单个配置的能力位集合。
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct FeatureMask: u32 {
        /// 传输层使用 HTTP/2 帧。
        const IS_HTTP2 = 1 << 0;
        /// 链路经过传输层安全保护。
        const IS_SECURE = 1 << 1;
        /// 客户端侧经过完整的 client channel（名称解析、负载均衡）。
        const SUPPORTS_CLIENT_CHANNEL = 1 << 2;
        /// 支持逐调用凭证。
        const SUPPORTS_PER_CALL_CREDENTIALS = 1 << 3;
        /// 在不安全链路上也允许逐调用凭证。
        const SUPPORTS_PER_CALL_CREDENTIALS_LEVEL_INSECURE = 1 << 4;
        const DOES_NOT_SUPPORT_RETRY = 1 << 5;
        const DOES_NOT_SUPPORT_WRITE_BUFFERING = 1 << 6;
        /// 客户端与服务端之间插入了转发代理。
        const SUPPORTS_REQUEST_PROXYING = 1 << 7;
        /// 两端都使用最小过滤栈。
        const IS_MINSTACK = 1 << 8;
        const IS_CALL_V3 = 1 << 9;
        /// 每次读写只搬运一个字节。
        const ONE_BYTE_AT_A_TIME = 1 << 10;
        const ENABLES_TRACES = 1 << 11;
        /// 设置实验标记环境变量时跳过。
        const EXCLUDE_FROM_EXPERIMENT_RUNS = 1 << 12;
        /// 模糊测试模式下跳过。
        const DO_NOT_FUZZ = 1 << 13;
        /// 交互式测试模式下跳过。
        const DO_NOT_GTEST = 1 << 14;
        const IS_LOCAL_TCP_CREDS = 1 << 15;
        const DOES_NOT_SUPPORT_CLIENT_HANDSHAKE_COMPLETE_FIRST = 1 << 16;
    }
}

impl FeatureMask {
    /// 标准 HTTP/2 + TLS 夹具共享的能力组合。
    pub const H2_TLS: Self = Self::IS_SECURE
        .union(Self::IS_HTTP2)
        .union(Self::SUPPORTS_CLIENT_CHANNEL)
        .union(Self::SUPPORTS_PER_CALL_CREDENTIALS);

    /// 同时带有两个“跳过”位的组合，任何执行模式都无法选中。
    pub const UNREACHABLE: Self = Self::DO_NOT_FUZZ.union(Self::DO_NOT_GTEST);

    /// 判断该掩码是否会让配置在所有执行模式下都不可达。
    #[inline]
    pub fn is_unreachable(self) -> bool {
        self.contains(Self::UNREACHABLE)
    }

    /// 解析 `IS_HTTP2 | IS_SECURE` 形式的文本，空白与空串均被接受。
    pub fn from_names(text: &str) -> Result<Self, UnknownFeature> {
        let mut mask = Self::empty();
        for name in text.split('|').map(str::trim).filter(|name| !name.is_empty()) {
            let flag = Self::from_name(name).ok_or_else(|| UnknownFeature {
                name: name.to_string(),
            })?;
            mask |= flag;
        }
        Ok(mask)
    }
}

impl fmt::Display for FeatureMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str(" | ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::FeatureMask;

    #[test]
    fn unreachable_requires_both_bits() {
        assert!(!FeatureMask::DO_NOT_FUZZ.is_unreachable());
        assert!(!FeatureMask::DO_NOT_GTEST.is_unreachable());
        assert!((FeatureMask::DO_NOT_FUZZ | FeatureMask::DO_NOT_GTEST | FeatureMask::IS_HTTP2)
            .is_unreachable());
    }

    #[test]
    fn names_parse_and_display() {
        let mask = FeatureMask::from_names(" IS_HTTP2 |IS_SECURE ").expect("known names");
        assert_eq!(mask, FeatureMask::IS_HTTP2 | FeatureMask::IS_SECURE);
        assert_eq!(mask.to_string(), "IS_HTTP2 | IS_SECURE");
        assert_eq!(FeatureMask::from_names("").expect("empty"), FeatureMask::empty());
        assert_eq!(FeatureMask::empty().to_string(), "(none)");

        let err = FeatureMask::from_names("IS_HTTP3").expect_err("unknown name");
        assert_eq!(err.name, "IS_HTTP3");
    }

    #[test]
    fn h2_tls_mask_is_secure_http2() {
        assert!(FeatureMask::H2_TLS.contains(FeatureMask::IS_SECURE | FeatureMask::IS_HTTP2));
        assert!(!FeatureMask::H2_TLS.intersects(FeatureMask::UNREACHABLE));
    }
}
