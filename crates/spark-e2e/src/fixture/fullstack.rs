//! fullstack 夹具：服务端真实监听（TCP 回环、UNIX 路径或 Linux 抽象命名空间），客户端真实拨号。
//!
//! # 教案式说明
//! - **意图 (Why)**：大部分配置只是“监听地址 × 安全层 × 一次参数改写”的组合，
//!   用一个可配置的夹具覆盖全部组合，避免为每种组合各写一个类型。
//! - **契约 (What)**：
//!   - TCP 端口在夹具构造时预留（监听器保持打开），第一个服务端直接接管，之后按同一地址重新绑定；
//!   - UNIX 路径与抽象名称来自 [`unique`](crate::unique)，同一主机上并发构造的夹具互不冲突；
//!   - IPv6 回环不可用时构造返回 [`FixtureError::Unsupported`]，执行器据此跳过；
//!   - 参数改写只依赖 [`ArgsFlavor`]，每次调用结果相同。
//! - **实现 (How)**：监听目标在构造时解析为 [`ListenAddress`]，`make_server`/`make_client` 只做句柄装配。

use std::{
    net::{Ipv6Addr, SocketAddr, TcpListener as StdTcpListener},
    path::PathBuf,
    sync::OnceLock,
};

use crate::{
    address::{TargetAddress, join_host_port},
    args::{ChannelArgs, keys},
    config::E2eConfig,
    credentials::{CallCredentials, ChannelCredentials, LocalConnectType, ServerCredentials},
    error::FixtureError,
    fixture::{
        Fixture, PreServerStart,
        secure::{SecureMaterial, TlsSettings},
        start_server,
    },
    handle::{ClientHandle, ClientTarget, CompletionSink, ServerHandle},
    proxy::reserve_loopback_listener,
    unique,
};

/// OAuth2 夹具随调用发送的访问令牌。
pub const OAUTH2_TOKEN: &str = "spark-e2e-oauth2-token";

/// 链路安全层。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    /// 不安装任何安全层。
    Insecure,
    /// 不安全凭证，但服务端安装鉴权检查。
    InsecureCredentials,
    FakeSecurity,
    Local(LocalConnectType),
    Tls(TlsSettings),
}

/// 构造句柄前对参数的改写。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArgsFlavor {
    #[default]
    Plain,
    /// 两端打开 census。
    Census,
    /// 两端默认压缩算法为 gzip（已设置时保留）。
    Compression,
    /// 客户端关闭重试。
    NoRetry,
}

impl ArgsFlavor {
    fn mutate_client(self, args: ChannelArgs) -> ChannelArgs {
        match self {
            ArgsFlavor::Plain => args,
            ArgsFlavor::Census => args.set(keys::ENABLE_CENSUS, true),
            ArgsFlavor::Compression => args.set_if_unset(keys::DEFAULT_COMPRESSION, "gzip"),
            ArgsFlavor::NoRetry => args.set(keys::ENABLE_RETRIES, false),
        }
    }

    fn mutate_server(self, args: ChannelArgs) -> ChannelArgs {
        match self {
            ArgsFlavor::Plain | ArgsFlavor::NoRetry => args,
            ArgsFlavor::Census => args.set(keys::ENABLE_CENSUS, true),
            ArgsFlavor::Compression => args.set_if_unset(keys::DEFAULT_COMPRESSION, "gzip"),
        }
    }
}

/// 服务端监听目标。
#[derive(Debug)]
pub enum ListenAddress {
    Tcp {
        address: SocketAddr,
        client_target: String,
        reserved: Option<StdTcpListener>,
    },
    #[cfg(unix)]
    Unix(PathBuf),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    AbstractUnix(Vec<u8>),
}

impl ListenAddress {
    /// 预留一个 IPv4 回环端口，客户端以 `host` 拨号。
    pub fn loopback_v4(host: &str) -> Result<Self, FixtureError> {
        let listener = reserve_loopback_listener()?;
        Self::reserved(listener, |address| join_host_port(host, address.port()))
    }

    /// 预留一个 IPv6 回环端口；主机不支持 IPv6 时返回 `Unsupported`。
    pub fn loopback_v6() -> Result<Self, FixtureError> {
        if !ipv6_loopback_available() {
            return Err(FixtureError::Unsupported {
                reason: "IPv6 loopback is not available".to_string(),
            });
        }
        let bind_at = SocketAddr::from((Ipv6Addr::LOCALHOST, 0));
        let listener = StdTcpListener::bind(bind_at).map_err(|source| FixtureError::Bind {
            address: bind_at.to_string(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(FixtureError::io("set listener non-blocking"))?;
        Self::reserved(listener, |address| {
            join_host_port(&address.ip().to_string(), address.port())
        })
    }

    fn reserved(
        listener: StdTcpListener,
        client_target: impl FnOnce(SocketAddr) -> String,
    ) -> Result<Self, FixtureError> {
        let address = listener
            .local_addr()
            .map_err(FixtureError::io("query listener address"))?;
        Ok(Self::Tcp {
            address,
            client_target: client_target(address),
            reserved: Some(listener),
        })
    }

    /// 从 `unix:`、`unix-abstract:` 或 `host:port` 目标解析。
    pub fn from_target(target: &str) -> Result<Self, FixtureError> {
        match TargetAddress::parse(target)? {
            TargetAddress::Tcp(address) => Ok(Self::Tcp {
                address,
                client_target: address.to_string(),
                reserved: None,
            }),
            #[cfg(unix)]
            TargetAddress::Unix(path) => Ok(Self::Unix(path)),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            TargetAddress::AbstractUnix(name) => Ok(Self::AbstractUnix(name)),
            #[allow(unreachable_patterns)]
            other => Err(FixtureError::Unsupported {
                reason: format!("target `{other}` is not supported on this platform"),
            }),
        }
    }

    pub(crate) fn bind(
        &mut self,
        name: &str,
        args: &ChannelArgs,
        sink: &CompletionSink,
    ) -> Result<ServerHandle, FixtureError> {
        match self {
            ListenAddress::Tcp {
                address, reserved, ..
            } => match reserved.take() {
                Some(listener) => Ok(ServerHandle::tcp(name, args, listener, sink)),
                None => ServerHandle::bind_tcp(name, args, *address, sink),
            },
            #[cfg(unix)]
            ListenAddress::Unix(path) => ServerHandle::bind_unix(name, args, path.clone(), sink),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            ListenAddress::AbstractUnix(abstract_name) => {
                ServerHandle::bind_abstract(name, args, abstract_name, sink)
            }
        }
    }

    pub(crate) fn client_target(&self) -> ClientTarget {
        match self {
            ListenAddress::Tcp { client_target, .. } => ClientTarget::Tcp(client_target.clone()),
            #[cfg(unix)]
            ListenAddress::Unix(path) => ClientTarget::Unix(path.clone()),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            ListenAddress::AbstractUnix(name) => ClientTarget::AbstractUnix(name.clone()),
        }
    }
}

/// 进程内只探测一次 IPv6 回环。
fn ipv6_loopback_available() -> bool {
    static AVAILABLE: OnceLock<bool> = OnceLock::new();
    *AVAILABLE.get_or_init(|| {
        let available = StdTcpListener::bind((Ipv6Addr::LOCALHOST, 0)).is_ok();
        if !available {
            tracing::warn!("IPv6 loopback unavailable; IPv6 fixtures will be skipped");
        }
        available
    })
}

/// 可配置的 fullstack 夹具。
#[derive(Debug)]
pub struct FullstackFixture {
    name: &'static str,
    listen: ListenAddress,
    security: Security,
    flavor: ArgsFlavor,
    call_credentials: Option<CallCredentials>,
    tls: Option<SecureMaterial>,
}

impl FullstackFixture {
    pub fn new(name: &'static str, listen: ListenAddress) -> Self {
        Self {
            name,
            listen,
            security: Security::Insecure,
            flavor: ArgsFlavor::Plain,
            call_credentials: None,
            tls: None,
        }
    }

    /// TCP 回环 + 不安全链路，客户端按配置的主机名拨号。
    pub fn insecure() -> Result<Self, FixtureError> {
        let host = E2eConfig::from_env().tcp_host;
        Ok(Self::new("fixture:fullstack", ListenAddress::loopback_v4(&host)?))
    }

    /// 文件系统 UNIX 套接字；`percent_encoded` 为真时路径中含有 `%25` 转义段。
    #[cfg(unix)]
    pub fn uds(percent_encoded: bool) -> Result<Self, FixtureError> {
        let dir = E2eConfig::from_env().uds_temp_dir;
        let names = unique::global();
        let target = if percent_encoded {
            names.uds_uri_percent_encoded(&dir)
        } else {
            names.uds_uri(&dir)
        };
        Ok(Self::new("fixture:fullstack_uds", ListenAddress::from_target(&target)?))
    }

    /// Linux 抽象命名空间；`percent_encoded` 为真时名称中含有 `%00` 转义段。
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn abstract_uds(percent_encoded: bool) -> Result<Self, FixtureError> {
        let names = unique::global();
        let target = if percent_encoded {
            names.abstract_uri_percent_encoded()
        } else {
            names.abstract_uri()
        };
        Ok(Self::new(
            "fixture:fullstack_abstract",
            ListenAddress::from_target(&target)?,
        ))
    }

    /// TLS fullstack。
    pub fn tls(settings: TlsSettings) -> Result<Self, FixtureError> {
        let host = E2eConfig::from_env().tcp_host;
        Self::new("fixture:fullstack_tls", ListenAddress::loopback_v4(&host)?)
            .with_security(Security::Tls(settings))
    }

    /// 设置安全层；TLS 材料在此时生成。
    pub fn with_security(mut self, security: Security) -> Result<Self, FixtureError> {
        self.tls = match security {
            Security::Tls(settings) => Some(SecureMaterial::build(settings)?),
            _ => None,
        };
        self.security = security;
        Ok(self)
    }

    #[must_use]
    pub fn with_flavor(mut self, flavor: ArgsFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    #[must_use]
    pub fn with_call_credentials(mut self, call_credentials: CallCredentials) -> Self {
        self.call_credentials = Some(call_credentials);
        self
    }

    pub fn security(&self) -> Security {
        self.security
    }

    pub fn listen_address(&self) -> &ListenAddress {
        &self.listen
    }

    pub fn tls_material(&self) -> Option<&SecureMaterial> {
        self.tls.as_ref()
    }

    fn server_credentials(&self) -> ServerCredentials {
        match (&self.security, &self.tls) {
            (Security::Insecure | Security::InsecureCredentials, _) => ServerCredentials::Insecure,
            (Security::FakeSecurity, _) => ServerCredentials::FakeSecurity,
            (Security::Local(kind), _) => ServerCredentials::Local(*kind),
            (Security::Tls(_), Some(material)) => material.server_credentials(),
            (Security::Tls(_), None) => ServerCredentials::Insecure,
        }
    }

    fn channel_credentials(&self, args: &ChannelArgs) -> Result<ChannelCredentials, FixtureError> {
        Ok(match (&self.security, &self.tls) {
            (Security::Insecure | Security::InsecureCredentials, _) => ChannelCredentials::Insecure,
            (Security::FakeSecurity, _) => ChannelCredentials::FakeSecurity,
            (Security::Local(kind), _) => ChannelCredentials::Local(*kind),
            (Security::Tls(_), Some(material)) => material.channel_credentials(args)?,
            (Security::Tls(_), None) => ChannelCredentials::Insecure,
        })
    }

    fn installs_auth_check(&self) -> bool {
        matches!(
            self.security,
            Security::InsecureCredentials | Security::FakeSecurity
        )
    }
}

impl Drop for FullstackFixture {
    fn drop(&mut self) {
        tracing::debug!(fixture = self.name, listen = ?self.listen, "fullstack fixture released");
    }
}

impl Fixture for FullstackFixture {
    fn make_server(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
        pre_server_start: &mut PreServerStart<'_>,
    ) -> Result<ServerHandle, FixtureError> {
        let args = self.mutate_server_args(args.clone());
        let mut server = self
            .listen
            .bind(self.name, &args, sink)?
            .with_credentials(self.server_credentials());
        if self.installs_auth_check() {
            server = server.with_auth_check();
        }
        tracing::debug!(fixture = self.name, security = ?self.security, "fullstack server bound");
        start_server(server, pre_server_start)
    }

    fn make_client(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
    ) -> Result<ClientHandle, FixtureError> {
        let args = self.mutate_client_args(args.clone());
        let mut client = ClientHandle::new(self.name, &args, self.listen.client_target(), sink)
            .with_credentials(self.channel_credentials(&args)?);
        if let Some(call_credentials) = &self.call_credentials {
            client = client.with_call_credentials(call_credentials.clone());
        }
        Ok(client)
    }

    fn mutate_client_args(&self, args: ChannelArgs) -> ChannelArgs {
        self.flavor.mutate_client(args)
    }

    fn mutate_server_args(&self, args: ChannelArgs) -> ChannelArgs {
        self.flavor.mutate_server(args)
    }
}

/// 预设组合。
pub mod presets {
    use super::{ArgsFlavor, FullstackFixture, ListenAddress, OAUTH2_TOKEN, Security};
    use crate::{
        credentials::{CallCredentials, LocalConnectType},
        error::FixtureError,
        fixture::secure::TlsSettings,
        tls::TlsVersion,
    };

    pub fn census() -> Result<FullstackFixture, FixtureError> {
        Ok(FullstackFixture::insecure()?.with_flavor(ArgsFlavor::Census))
    }

    pub fn compression() -> Result<FullstackFixture, FixtureError> {
        Ok(FullstackFixture::insecure()?.with_flavor(ArgsFlavor::Compression))
    }

    pub fn no_retry() -> Result<FullstackFixture, FixtureError> {
        Ok(FullstackFixture::insecure()?.with_flavor(ArgsFlavor::NoRetry))
    }

    pub fn fake_security() -> Result<FullstackFixture, FixtureError> {
        FullstackFixture::insecure()?.with_security(Security::FakeSecurity)
    }

    pub fn insecure_credentials() -> Result<FullstackFixture, FixtureError> {
        FullstackFixture::insecure()?.with_security(Security::InsecureCredentials)
    }

    pub fn local_ipv4() -> Result<FullstackFixture, FixtureError> {
        FullstackFixture::new("fixture:local_ipv4", ListenAddress::loopback_v4("127.0.0.1")?)
            .with_security(Security::Local(LocalConnectType::Tcp))
    }

    pub fn local_ipv6() -> Result<FullstackFixture, FixtureError> {
        FullstackFixture::new("fixture:local_ipv6", ListenAddress::loopback_v6()?)
            .with_security(Security::Local(LocalConnectType::Tcp))
    }

    #[cfg(unix)]
    pub fn local_uds(percent_encoded: bool) -> Result<FullstackFixture, FixtureError> {
        FullstackFixture::uds(percent_encoded)?.with_security(Security::Local(LocalConnectType::Uds))
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn local_abstract_uds() -> Result<FullstackFixture, FixtureError> {
        FullstackFixture::abstract_uds(true)?.with_security(Security::Local(LocalConnectType::Uds))
    }

    pub fn simple_ssl(version: TlsVersion) -> Result<FullstackFixture, FixtureError> {
        FullstackFixture::tls(TlsSettings::simple(version))
    }

    pub fn oauth2(version: TlsVersion) -> Result<FullstackFixture, FixtureError> {
        Ok(simple_ssl(version)?.with_call_credentials(CallCredentials::OAuth2 {
            token: OAUTH2_TOKEN.to_string(),
        }))
    }
}
