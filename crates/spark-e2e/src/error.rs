//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义夹具引擎的四类错误：注册表编写错误、资源获取错误、查询构造错误与配置加载错误；
//! - 每个关注点一个枚举，调用方可以精确匹配而不必解析字符串。
//!
//! ## 设计要求（What）
//! - 全部派生 [`thiserror::Error`]，与 `std::error::Error` 生态兼容；
//! - 注册表错误在 [`Registry::global`](crate::registry::Registry::global) 中被视为致命错误；
//! - 资源获取错误由夹具工厂返回，套件执行器据此决定跳过（`Unsupported`）或带上下文 panic。

use std::{io, net::SocketAddr, path::PathBuf};

use thiserror::Error;

/// 注册表构建阶段发现的编写错误。
///
/// # 教案式说明
/// - **意图 (Why)**：配置清单由人工维护，重复名称或“既不可 fuzz 又不可交互运行”的条目属于编写失误，
///   应在进程启动时暴露，而不是等到某个查询意外返回空集。
/// - **契约 (What)**：每个变体都携带出错配置的名称，便于诊断信息直接指向源头。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// 配置名称为空字符串。
    #[error("configuration name must not be empty")]
    EmptyName,

    /// 两个配置共享同一名称。
    #[error("configuration `{name}` is registered more than once")]
    DuplicateName { name: String },

    /// 同时设置 `DO_NOT_FUZZ` 与 `DO_NOT_GTEST`，任何执行模式都无法选中。
    #[error("configuration `{name}` sets both DO_NOT_FUZZ and DO_NOT_GTEST and is unreachable")]
    Unreachable { name: String },
}

/// 查询构造错误。
#[derive(Debug, Error)]
pub enum QueryError {
    /// 名称过滤表达式不是合法的正则。
    #[error("invalid configuration name pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// 特性名称解析错误。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown feature flag `{name}`")]
pub struct UnknownFeature {
    pub name: String,
}

/// 配置加载错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败。
    #[error("failed to read e2e configuration `{path}`: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// TOML 内容无法解析。
    #[error("failed to parse e2e configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 夹具资源获取与端点收发阶段的错误。
///
/// # 教案式说明
/// - **意图 (Why)**：端口、套接字对、证书、代理线程等稀缺资源的获取失败都需要带着底层 OS 错误上报；
///   夹具本身从不重试，冲突通过 [`UniqueNames`](crate::unique::UniqueNames) 在结构上避免。
/// - **契约 (What)**：
///   - `Unsupported` 表示当前主机无法提供该传输（例如缺少 IPv6 回环），执行器会跳过而非失败；
///   - 其余变体对测试用例而言都是致命的；
///   - 所有变体满足 `Send + Sync + 'static`，可跨线程传播。
/// - **设计权衡 (Trade-offs)**：`context` 字段使用 `&'static str`，避免在错误路径上额外分配，
///   代价是上下文只能来自固定的操作名。
#[derive(Debug, Error)]
pub enum FixtureError {
    /// 绑定监听地址失败。
    #[error("failed to bind `{address}`: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    /// 创建套接字对失败。
    #[error("failed to create socket pair `{name}`: {source}")]
    SocketPair {
        name: String,
        #[source]
        source: io::Error,
    },

    /// 其它 IO 操作失败。
    #[error("{context} failed: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// 证书材料生成或加载失败。
    #[error("certificate material unavailable: {detail}")]
    Certificate { detail: String },

    /// rustls 配置构建失败。
    #[error("TLS configuration rejected: {0}")]
    Tls(#[from] rustls::Error),

    /// 安全握手失败。
    #[error("{side} handshake failed: {detail}")]
    Handshake { side: &'static str, detail: String },

    /// 服务端凭证要求拒绝本次连接。
    #[error("peer `{peer}` rejected by server authentication")]
    Unauthenticated { peer: String },

    /// 代理拒绝了隧道请求。
    #[error("proxy at {proxy} rejected tunnel: {status}")]
    ProxyRejected { proxy: SocketAddr, status: String },

    /// 当前主机不支持该配置。
    #[error("configuration unsupported on this host: {reason}")]
    Unsupported { reason: String },

    /// 一次性资源（预连接描述符、进程内通道）已经被取走或关闭。
    #[error("{resource} is exhausted")]
    Exhausted { resource: &'static str },

    /// 服务尚未启动即尝试接受连接。
    #[error("server `{name}` has not been started")]
    NotStarted { name: String },

    /// 服务已启动后仍尝试注册侧通道。
    #[error("cannot register `{service}` after the server has started")]
    AlreadyStarted { service: String },
}

impl FixtureError {
    /// 将 `io::Error` 包装为带操作名的错误。
    pub(crate) fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Io { context, source }
    }

    pub(crate) fn certificate(detail: impl ToString) -> Self {
        Self::Certificate {
            detail: detail.to_string(),
        }
    }

    /// 是否属于“跳过而非失败”的类别。
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported { .. })
    }
}
