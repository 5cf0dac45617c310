//! TLS 夹具的安全材料：证书来源 × 校验方式 × 协议版本。
//!
//! # 教案式说明
//! - **意图 (Why)**：TLS 组合的传输部分与普通 fullstack 完全一致，差别只在两端凭证；
//!   把证书与校验器的装配收敛到 [`SecureMaterial`]，fullstack 与代理夹具都可以复用。
//! - **契约 (What)**：
//!   - 服务端证书覆盖 [`TLS_HOST_OVERRIDE`]，客户端默认以该名称校验；
//!     参数 `SSL_TARGET_NAME_OVERRIDE` 可改写校验名；
//!   - 文件监视来源的临时目录随 [`SecureMaterial`] 一同释放。

use std::{fmt, sync::Arc};

use rustls::ClientConfig;

use crate::{
    args::{ChannelArgs, keys},
    credentials::{ChannelCredentials, ServerCredentials},
    error::FixtureError,
    tls::{
        CertificateProvider, CertificateWatcher, OnDemandResolver, ServerTls, TLS_HOST_OVERRIDE,
        TlsVersion, VerifierType, client_config, server_name,
    },
};

/// 一种 TLS 组合。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TlsSettings {
    pub version: TlsVersion,
    pub certificates: CertificateProvider,
    pub verifier: VerifierType,
}

impl TlsSettings {
    /// 静态证书 + 主机名校验。
    pub const fn simple(version: TlsVersion) -> Self {
        Self {
            version,
            certificates: CertificateProvider::Static,
            verifier: VerifierType::Hostname,
        }
    }

    /// 服务端每次握手回调取证，用于验证凭证重载。
    pub const fn credential_reload(version: TlsVersion) -> Self {
        Self {
            version,
            certificates: CertificateProvider::OnDemand,
            verifier: VerifierType::Hostname,
        }
    }
}

/// 已装配的两端 TLS 材料。
pub struct SecureMaterial {
    settings: TlsSettings,
    server: ServerTls,
    client: Arc<ClientConfig>,
}

impl fmt::Debug for SecureMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureMaterial")
            .field("settings", &self.settings)
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

impl SecureMaterial {
    pub fn build(settings: TlsSettings) -> Result<Self, FixtureError> {
        let server = ServerTls::build(settings.version, settings.certificates)?;
        let client = client_config(settings.version, settings.verifier)?;
        tracing::debug!(?settings, "TLS material assembled");
        Ok(Self {
            settings,
            server,
            client,
        })
    }

    pub fn settings(&self) -> TlsSettings {
        self.settings
    }

    pub fn server_credentials(&self) -> ServerCredentials {
        ServerCredentials::Tls(self.server.config())
    }

    /// 客户端凭证；校验名取自参数，缺省为测试证书覆盖的主机名。
    pub fn channel_credentials(&self, args: &ChannelArgs) -> Result<ChannelCredentials, FixtureError> {
        let host = args
            .get_str(keys::SSL_TARGET_NAME_OVERRIDE)
            .unwrap_or(TLS_HOST_OVERRIDE);
        Ok(ChannelCredentials::Tls {
            config: Arc::clone(&self.client),
            server_name: server_name(host)?,
        })
    }

    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.client)
    }

    pub fn server_tls(&self) -> &ServerTls {
        &self.server
    }

    pub fn watcher(&self) -> Option<&CertificateWatcher> {
        self.server.watcher()
    }

    pub fn on_demand(&self) -> Option<&OnDemandResolver> {
        self.server.on_demand()
    }
}
