//! 代理夹具：客户端连接代理，服务端独立监听，代理负责把两端接起来。
//!
//! # 教案式说明
//! - **契约 (What)**：
//!   - 代理线程由夹具独占，夹具析构时先停代理再释放其余资源；
//!   - 转发代理的客户端腿指向代理地址，服务端腿绑定代理预留的上游地址；
//!   - HTTP 代理从构造时的客户端参数读取 `HTTP_PROXY_AUTH_CREDS`，
//!     代理要求同样的凭证，客户端参数中的代理 URI 携带它。

use std::net::{SocketAddr, TcpListener as StdTcpListener};

use crate::{
    args::{ChannelArgs, keys},
    error::FixtureError,
    fixture::{
        Fixture, PreServerStart,
        secure::{SecureMaterial, TlsSettings},
        start_server,
    },
    handle::{ClientHandle, ClientTarget, CompletionSink, ServerHandle},
    proxy::{HttpConnectProxy, ProxyUri, RelayProxy, RelayTls, reserve_loopback_listener},
    tls::{TLS_HOST_OVERRIDE, TlsVersion, server_name},
};

/// 转发代理夹具，明文或 TLS 终结再发起。
#[derive(Debug)]
pub struct RelayFixture {
    proxy: RelayProxy,
    tls: Option<SecureMaterial>,
}

impl RelayFixture {
    pub fn plain() -> Result<Self, FixtureError> {
        Ok(Self {
            proxy: RelayProxy::plain("relay")?,
            tls: None,
        })
    }

    /// 代理在入站侧终结 TLS，再以同一套测试 PKI 向服务端发起 TLS。
    pub fn ssl() -> Result<Self, FixtureError> {
        let material = SecureMaterial::build(TlsSettings::simple(TlsVersion::V13))?;
        let relay = RelayTls {
            inbound: material.server_tls().config(),
            outbound: material.client_config(),
            upstream_name: server_name(TLS_HOST_OVERRIDE)?,
        };
        Ok(Self {
            proxy: RelayProxy::tls("ssl-relay", relay)?,
            tls: Some(material),
        })
    }

    pub fn proxy(&self) -> &RelayProxy {
        &self.proxy
    }
}

impl Fixture for RelayFixture {
    fn make_server(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
        pre_server_start: &mut PreServerStart<'_>,
    ) -> Result<ServerHandle, FixtureError> {
        let args = self.mutate_server_args(args.clone());
        let mut server = match self.proxy.take_server_listener() {
            Some(listener) => ServerHandle::tcp("fixture:relay", &args, listener, sink),
            None => ServerHandle::bind_tcp("fixture:relay", &args, self.proxy.server_address(), sink)?,
        };
        if let Some(material) = &self.tls {
            server = server
                .with_credentials(material.server_credentials())
                .with_auth_check();
        }
        start_server(server, pre_server_start)
    }

    fn make_client(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
    ) -> Result<ClientHandle, FixtureError> {
        let args = self.mutate_client_args(args.clone());
        let target = ClientTarget::Tcp(self.proxy.client_target().to_string());
        let client = ClientHandle::new("fixture:relay", &args, target, sink);
        match &self.tls {
            Some(material) => Ok(client.with_credentials(material.channel_credentials(&args)?)),
            None => Ok(client),
        }
    }
}

/// HTTP `CONNECT` 代理夹具。
#[derive(Debug)]
pub struct HttpProxyFixture {
    proxy: HttpConnectProxy,
    server_address: SocketAddr,
    reserved: Option<StdTcpListener>,
}

impl HttpProxyFixture {
    pub fn new(client_args: &ChannelArgs) -> Result<Self, FixtureError> {
        let required = client_args
            .get_str(keys::HTTP_PROXY_AUTH_CREDS)
            .map(str::to_string);
        let authenticated = required.is_some();
        let proxy = HttpConnectProxy::start("http-connect", required)?;
        let listener = reserve_loopback_listener()?;
        let server_address = listener
            .local_addr()
            .map_err(FixtureError::io("query listener address"))?;
        tracing::debug!(
            proxy = %proxy.address(),
            server = %server_address,
            authenticated,
            "http proxy fixture ready"
        );
        Ok(Self {
            proxy,
            server_address,
            reserved: Some(listener),
        })
    }

    pub fn proxy(&self) -> &HttpConnectProxy {
        &self.proxy
    }
}

impl Fixture for HttpProxyFixture {
    fn make_server(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
        pre_server_start: &mut PreServerStart<'_>,
    ) -> Result<ServerHandle, FixtureError> {
        let args = self.mutate_server_args(args.clone());
        let server = match self.reserved.take() {
            Some(listener) => ServerHandle::tcp("fixture:http_proxy", &args, listener, sink),
            None => ServerHandle::bind_tcp("fixture:http_proxy", &args, self.server_address, sink)?,
        };
        start_server(server, pre_server_start)
    }

    fn make_client(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
    ) -> Result<ClientHandle, FixtureError> {
        let args = self.mutate_client_args(args.clone());
        Ok(ClientHandle::new(
            "fixture:http_proxy",
            &args,
            ClientTarget::Tcp(self.server_address.to_string()),
            sink,
        ))
    }

    /// 客户端参数带上代理 URI。代理要求的凭证在构造时固定，
    /// URI 中出示的凭证取自本次调用的参数，缺省时不带凭证。
    fn mutate_client_args(&self, args: ChannelArgs) -> ChannelArgs {
        let uri = ProxyUri::render(
            &self.proxy.proxy_name(),
            args.get_str(keys::HTTP_PROXY_AUTH_CREDS),
        );
        args.set(keys::HTTP_PROXY, uri)
    }
}
