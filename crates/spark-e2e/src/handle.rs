//! 夹具产出的服务端与客户端句柄，以及调用方持有的完成事件汇。
//!
//! # 教案式说明
//! - **意图 (Why)**：夹具在同步上下文中构造（获取端口、套接字、证书），真正的收发发生在测试的异步上下文中；
//!   句柄把“已获取的资源 + 安全配置”打包，延迟到 `accept`/`connect` 时才注册进 tokio 运行时。
//! - **契约 (What)**：
//!   - [`ServerHandle::register_service`] 只能在 [`ServerHandle::start`] 之前调用，之后返回
//!     [`FixtureError::AlreadyStarted`]；
//!   - 预连接描述符只能被取用一次，再次取用返回 [`FixtureError::Exhausted`]；
//!   - 每次 `accept`/`connect` 的结果（成功或失败）都会投递到 [`CompletionSink`]；
//!   - UNIX 路径监听器析构时删除套接字文件。
//! - **实现 (How)**：监听器以枚举保存，首次 `accept` 时把标准库监听器转换为 tokio 监听器；
//!   读写分块上限在安全握手之前施加，TLS 记录同样会被切成小块传输。

use std::{
    collections::VecDeque,
    fmt, mem,
    net::{SocketAddr, TcpListener as StdTcpListener},
    path::PathBuf,
    sync::Arc,
};

#[cfg(unix)]
use std::os::unix::net::UnixListener as StdUnixListener;

use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    net::{TcpListener, TcpStream},
    sync::mpsc,
};

#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

#[cfg(unix)]
use crate::endpoint_pair::Endpoint;
use crate::{
    args::{ChannelArgs, keys},
    credentials::{CallCredentials, ChannelCredentials, PeerInfo, ServerCredentials},
    error::FixtureError,
    proxy,
    stream::{BoxedStream, boxed_with_limit},
};

/// 完成事件。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completion {
    ServerStarted { server: String },
    Accepted { server: String, peer: String },
    AcceptFailed { server: String, reason: String },
    Connected { client: String },
    ConnectFailed { client: String, reason: String },
}

/// 调用方持有、句柄投递的完成事件队列。
#[derive(Clone, Debug, Default)]
pub struct CompletionSink {
    events: Arc<Mutex<VecDeque<Completion>>>,
}

impl CompletionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, completion: Completion) {
        self.events.lock().push_back(completion);
    }

    /// 取出并清空当前全部事件。
    pub fn drain(&self) -> Vec<Completion> {
        self.events.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

/// 进程内传输的会合点：服务端每次构造时换上新的接收端，客户端按当前发送端投递连接。
#[derive(Clone, Debug, Default)]
pub struct InprocRendezvous {
    sender: Arc<Mutex<Option<mpsc::UnboundedSender<DuplexStream>>>>,
}

/// 进程内管道的缓冲大小。
const INPROC_BUFFER: usize = 64 * 1024;

impl InprocRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind(&self) -> mpsc::UnboundedReceiver<DuplexStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock() = Some(tx);
        rx
    }

    fn connect(&self) -> Result<DuplexStream, FixtureError> {
        let sender = self.sender.lock().clone().ok_or(FixtureError::Exhausted {
            resource: "in-process server",
        })?;
        let (client, server) = tokio::io::duplex(INPROC_BUFFER);
        sender.send(server).map_err(|_| FixtureError::Exhausted {
            resource: "in-process server",
        })?;
        Ok(client)
    }
}

enum Listener {
    Tcp(StdTcpListener),
    TokioTcp(TcpListener),
    #[cfg(unix)]
    Unix(StdUnixListener),
    #[cfg(unix)]
    TokioUnix(UnixListener),
    #[cfg(unix)]
    Preconnected(Option<Endpoint>),
    Inproc(mpsc::UnboundedReceiver<DuplexStream>),
    /// 尚未附着任何连接来源。
    Detached,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Listener::Tcp(_) | Listener::TokioTcp(_) => "tcp",
            #[cfg(unix)]
            Listener::Unix(_) | Listener::TokioUnix(_) => "unix",
            #[cfg(unix)]
            Listener::Preconnected(_) => "preconnected",
            Listener::Inproc(_) => "inproc",
            Listener::Detached => "detached",
        };
        f.write_str(kind)
    }
}

/// 服务端句柄。
#[derive(Debug)]
pub struct ServerHandle {
    name: String,
    args: ChannelArgs,
    listener: Listener,
    credentials: ServerCredentials,
    fail_auth_check: bool,
    services: Vec<String>,
    started: bool,
    sink: CompletionSink,
    unlink_on_drop: Option<PathBuf>,
}

impl ServerHandle {
    fn new(name: &str, args: &ChannelArgs, listener: Listener, sink: &CompletionSink) -> Self {
        Self {
            name: name.to_string(),
            args: args.clone(),
            listener,
            credentials: ServerCredentials::Insecure,
            fail_auth_check: false,
            services: Vec::new(),
            started: false,
            sink: sink.clone(),
            unlink_on_drop: None,
        }
    }

    /// 使用已绑定的 TCP 监听器。
    pub fn tcp(
        name: &str,
        args: &ChannelArgs,
        listener: StdTcpListener,
        sink: &CompletionSink,
    ) -> Self {
        Self::new(name, args, Listener::Tcp(listener), sink)
    }

    /// 绑定 TCP 地址。
    pub fn bind_tcp(
        name: &str,
        args: &ChannelArgs,
        address: SocketAddr,
        sink: &CompletionSink,
    ) -> Result<Self, FixtureError> {
        let listener = StdTcpListener::bind(address).map_err(|source| FixtureError::Bind {
            address: address.to_string(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(FixtureError::io("set listener non-blocking"))?;
        Ok(Self::tcp(name, args, listener, sink))
    }

    /// 绑定文件系统上的 UNIX 套接字；句柄析构时删除该文件。
    #[cfg(unix)]
    pub fn bind_unix(
        name: &str,
        args: &ChannelArgs,
        path: PathBuf,
        sink: &CompletionSink,
    ) -> Result<Self, FixtureError> {
        let listener = StdUnixListener::bind(&path).map_err(|source| FixtureError::Bind {
            address: path.display().to_string(),
            source,
        })?;
        listener
            .set_nonblocking(true)
            .map_err(FixtureError::io("set listener non-blocking"))?;
        let mut handle = Self::new(name, args, Listener::Unix(listener), sink);
        handle.unlink_on_drop = Some(path);
        Ok(handle)
    }

    /// 绑定 Linux 抽象命名空间套接字。
    #[cfg(any(target_os = "linux", target_os = "android"))]
    pub fn bind_abstract(
        name: &str,
        args: &ChannelArgs,
        abstract_name: &[u8],
        sink: &CompletionSink,
    ) -> Result<Self, FixtureError> {
        #[cfg(target_os = "android")]
        use std::os::android::net::SocketAddrExt;
        #[cfg(target_os = "linux")]
        use std::os::linux::net::SocketAddrExt;

        let bind_error = |source| FixtureError::Bind {
            address: format!("unix-abstract:{}", String::from_utf8_lossy(abstract_name)),
            source,
        };
        let address =
            std::os::unix::net::SocketAddr::from_abstract_name(abstract_name).map_err(bind_error)?;
        let listener = StdUnixListener::bind_addr(&address).map_err(bind_error)?;
        listener
            .set_nonblocking(true)
            .map_err(FixtureError::io("set listener non-blocking"))?;
        Ok(Self::new(name, args, Listener::Unix(listener), sink))
    }

    /// 不监听任何地址，连接在启动后通过 [`ServerHandle::attach_preconnected`] 附着。
    pub fn detached(name: &str, args: &ChannelArgs, sink: &CompletionSink) -> Self {
        Self::new(name, args, Listener::Detached, sink)
    }

    /// 进程内服务端。
    pub fn inproc(
        name: &str,
        args: &ChannelArgs,
        rendezvous: &InprocRendezvous,
        sink: &CompletionSink,
    ) -> Self {
        Self::new(name, args, Listener::Inproc(rendezvous.bind()), sink)
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: ServerCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    /// 安装鉴权检查：参数中带有 `FAIL_AUTH_CHECK` 时，握手完成后拒绝所有连接。
    #[must_use]
    pub fn with_auth_check(mut self) -> Self {
        self.fail_auth_check = self.args.contains(keys::FAIL_AUTH_CHECK);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &ChannelArgs {
        &self.args
    }

    pub fn credentials(&self) -> &ServerCredentials {
        &self.credentials
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// 本地监听地址；非 TCP 监听器返回 `None`。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            Listener::Tcp(listener) => listener.local_addr().ok(),
            Listener::TokioTcp(listener) => listener.local_addr().ok(),
            _ => None,
        }
    }

    /// 注册侧通道服务，仅限启动之前。
    pub fn register_service(&mut self, service: &str) -> Result<(), FixtureError> {
        if self.started {
            return Err(FixtureError::AlreadyStarted {
                service: service.to_string(),
            });
        }
        self.services.push(service.to_string());
        Ok(())
    }

    pub fn start(&mut self) {
        if !self.started {
            self.started = true;
            tracing::debug!(server = %self.name, listener = ?self.listener, "server started");
            self.sink.post(Completion::ServerStarted {
                server: self.name.clone(),
            });
        }
    }

    /// 启动之后附着一条预先创建的连接。
    #[cfg(unix)]
    pub fn attach_preconnected(&mut self, endpoint: Endpoint) -> Result<(), FixtureError> {
        if !self.started {
            return Err(FixtureError::NotStarted {
                name: self.name.clone(),
            });
        }
        self.listener = Listener::Preconnected(Some(endpoint));
        Ok(())
    }

    fn ensure_async(&mut self) -> Result<(), FixtureError> {
        self.listener = match mem::replace(&mut self.listener, Listener::Detached) {
            Listener::Tcp(listener) => Listener::TokioTcp(
                TcpListener::from_std(listener)
                    .map_err(FixtureError::io("register TCP listener"))?,
            ),
            #[cfg(unix)]
            Listener::Unix(listener) => Listener::TokioUnix(
                UnixListener::from_std(listener)
                    .map_err(FixtureError::io("register UNIX listener"))?,
            ),
            other => other,
        };
        Ok(())
    }

    async fn accept_raw(&mut self) -> Result<(BoxedStream, PeerInfo), FixtureError> {
        if !self.started {
            return Err(FixtureError::NotStarted {
                name: self.name.clone(),
            });
        }
        self.ensure_async()?;
        let limit = self.args.read_chunk_limit();
        match &mut self.listener {
            Listener::TokioTcp(listener) => {
                let (stream, peer) = listener
                    .accept()
                    .await
                    .map_err(FixtureError::io("accept TCP connection"))?;
                proxy::enable_nodelay(&stream, "server");
                Ok((boxed_with_limit(stream, limit), PeerInfo::Tcp(peer)))
            }
            #[cfg(unix)]
            Listener::TokioUnix(listener) => {
                let (stream, _) = listener
                    .accept()
                    .await
                    .map_err(FixtureError::io("accept UNIX connection"))?;
                Ok((boxed_with_limit(stream, limit), PeerInfo::Unix))
            }
            #[cfg(unix)]
            Listener::Preconnected(slot) => {
                let endpoint = slot.take().ok_or(FixtureError::Exhausted {
                    resource: "preconnected server endpoint",
                })?;
                let endpoint = endpoint.with_read_chunk(limit);
                Ok((endpoint.into_stream()?, PeerInfo::Descriptor))
            }
            Listener::Inproc(receiver) => {
                let stream = receiver.recv().await.ok_or(FixtureError::Exhausted {
                    resource: "in-process listener",
                })?;
                Ok((boxed_with_limit(stream, limit), PeerInfo::InProcess))
            }
            Listener::Detached => Err(FixtureError::Exhausted {
                resource: "detached server listener",
            }),
            Listener::Tcp(_) => Err(FixtureError::NotStarted {
                name: self.name.clone(),
            }),
            #[cfg(unix)]
            Listener::Unix(_) => Err(FixtureError::NotStarted {
                name: self.name.clone(),
            }),
        }
    }

    /// 接受一条连接并完成服务端安全握手。
    pub async fn accept(&mut self) -> Result<BoxedStream, FixtureError> {
        let outcome = match self.accept_raw().await {
            Ok((raw, peer)) => self
                .credentials
                .handshake(raw, &peer, self.fail_auth_check)
                .await
                .map(|stream| (stream, peer)),
            Err(err) => Err(err),
        };
        match outcome {
            Ok((stream, peer)) => {
                tracing::debug!(server = %self.name, %peer, "connection accepted");
                self.sink.post(Completion::Accepted {
                    server: self.name.clone(),
                    peer: peer.to_string(),
                });
                Ok(stream)
            }
            Err(err) => {
                tracing::debug!(server = %self.name, error = %err, "accept failed");
                self.sink.post(Completion::AcceptFailed {
                    server: self.name.clone(),
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        if let Some(path) = self.unlink_on_drop.take() {
            if let Err(err) = std::fs::remove_file(&path) {
                if err.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %err, "failed to unlink socket file");
                }
            }
        }
        tracing::debug!(server = %self.name, "server handle dropped");
    }
}

/// 客户端连接目标。
pub enum ClientTarget {
    /// `host:port`，按解析顺序逐个尝试。
    Tcp(String),
    #[cfg(unix)]
    Unix(PathBuf),
    #[cfg(any(target_os = "linux", target_os = "android"))]
    AbstractUnix(Vec<u8>),
    #[cfg(unix)]
    Preconnected(Option<Endpoint>),
    Inproc(InprocRendezvous),
}

impl fmt::Debug for ClientTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientTarget::Tcp(target) => write!(f, "tcp:{target}"),
            #[cfg(unix)]
            ClientTarget::Unix(path) => write!(f, "unix:{}", path.display()),
            #[cfg(any(target_os = "linux", target_os = "android"))]
            ClientTarget::AbstractUnix(name) => {
                write!(f, "unix-abstract:{}", String::from_utf8_lossy(name).escape_debug())
            }
            #[cfg(unix)]
            ClientTarget::Preconnected(slot) => {
                write!(f, "preconnected(available={})", slot.is_some())
            }
            ClientTarget::Inproc(_) => f.write_str("inproc"),
        }
    }
}

/// 客户端句柄。
#[derive(Debug)]
pub struct ClientHandle {
    name: String,
    args: ChannelArgs,
    target: ClientTarget,
    credentials: ChannelCredentials,
    call_credentials: Option<CallCredentials>,
    sink: CompletionSink,
}

impl ClientHandle {
    pub fn new(name: &str, args: &ChannelArgs, target: ClientTarget, sink: &CompletionSink) -> Self {
        Self {
            name: name.to_string(),
            args: args.clone(),
            target,
            credentials: ChannelCredentials::Insecure,
            call_credentials: None,
            sink: sink.clone(),
        }
    }

    #[must_use]
    pub fn with_credentials(mut self, credentials: ChannelCredentials) -> Self {
        self.credentials = credentials;
        self
    }

    #[must_use]
    pub fn with_call_credentials(mut self, call_credentials: CallCredentials) -> Self {
        self.call_credentials = Some(call_credentials);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &ChannelArgs {
        &self.args
    }

    pub fn target(&self) -> &ClientTarget {
        &self.target
    }

    pub fn credentials(&self) -> &ChannelCredentials {
        &self.credentials
    }

    pub fn call_credentials(&self) -> Option<&CallCredentials> {
        self.call_credentials.as_ref()
    }

    async fn connect_raw(&mut self) -> Result<(BoxedStream, PeerInfo), FixtureError> {
        let limit = self.args.read_chunk_limit();
        match &mut self.target {
            ClientTarget::Tcp(target) => {
                let stream = match self.args.get_str(keys::HTTP_PROXY) {
                    Some(proxy_uri) => proxy::http_connect(proxy_uri, target).await?,
                    None => TcpStream::connect(target.as_str()).await.map_err(|source| {
                        FixtureError::Bind {
                            address: target.clone(),
                            source,
                        }
                    })?,
                };
                proxy::enable_nodelay(&stream, "client");
                let peer = stream
                    .peer_addr()
                    .map_err(FixtureError::io("query peer address"))?;
                Ok((boxed_with_limit(stream, limit), PeerInfo::Tcp(peer)))
            }
            #[cfg(unix)]
            ClientTarget::Unix(path) => {
                let stream = UnixStream::connect(&*path).await.map_err(|source| {
                    FixtureError::Bind {
                        address: path.display().to_string(),
                        source,
                    }
                })?;
                Ok((boxed_with_limit(stream, limit), PeerInfo::Unix))
            }
            #[cfg(any(target_os = "linux", target_os = "android"))]
            ClientTarget::AbstractUnix(name) => {
                #[cfg(target_os = "android")]
                use std::os::android::net::SocketAddrExt;
                #[cfg(target_os = "linux")]
                use std::os::linux::net::SocketAddrExt;

                let address = std::os::unix::net::SocketAddr::from_abstract_name(&*name)
                    .map_err(FixtureError::io("build abstract address"))?;
                let stream = std::os::unix::net::UnixStream::connect_addr(&address).map_err(
                    |source| FixtureError::Bind {
                        address: format!("unix-abstract:{}", String::from_utf8_lossy(name)),
                        source,
                    },
                )?;
                stream
                    .set_nonblocking(true)
                    .map_err(FixtureError::io("set stream non-blocking"))?;
                let stream = UnixStream::from_std(stream)
                    .map_err(FixtureError::io("register UNIX stream"))?;
                Ok((boxed_with_limit(stream, limit), PeerInfo::Unix))
            }
            #[cfg(unix)]
            ClientTarget::Preconnected(slot) => {
                let endpoint = slot.take().ok_or(FixtureError::Exhausted {
                    resource: "preconnected client endpoint",
                })?;
                let endpoint = endpoint.with_read_chunk(limit);
                Ok((endpoint.into_stream()?, PeerInfo::Descriptor))
            }
            ClientTarget::Inproc(rendezvous) => {
                let stream = rendezvous.connect()?;
                Ok((boxed_with_limit(stream, limit), PeerInfo::InProcess))
            }
        }
    }

    /// 建立连接并完成客户端安全握手。
    pub async fn connect(&mut self) -> Result<BoxedStream, FixtureError> {
        let outcome = match self.connect_raw().await {
            Ok((raw, peer)) => self.credentials.handshake(raw, &peer).await,
            Err(err) => Err(err),
        };
        match &outcome {
            Ok(_) => {
                tracing::debug!(client = %self.name, target = ?self.target, "client connected");
                self.sink.post(Completion::Connected {
                    client: self.name.clone(),
                });
            }
            Err(err) => {
                tracing::debug!(client = %self.name, error = %err, "connect failed");
                self.sink.post(Completion::ConnectFailed {
                    client: self.name.clone(),
                    reason: err.to_string(),
                });
            }
        }
        outcome
    }
}

/// 连通性探针：客户端发送载荷，服务端原样回显，返回客户端收到的字节。
pub mod probe {
    use super::{AsyncReadExt, AsyncWriteExt, ClientHandle, FixtureError, ServerHandle};

    pub async fn round_trip(
        server: &mut ServerHandle,
        client: &mut ClientHandle,
        payload: &[u8],
    ) -> Result<Vec<u8>, FixtureError> {
        let len = payload.len();
        let server_side = async {
            let mut stream = server.accept().await?;
            let mut buf = vec![0u8; len];
            stream
                .read_exact(&mut buf)
                .await
                .map_err(FixtureError::io("server read"))?;
            stream
                .write_all(&buf)
                .await
                .map_err(FixtureError::io("server echo"))?;
            stream
                .flush()
                .await
                .map_err(FixtureError::io("server flush"))?;
            Ok::<_, FixtureError>(stream)
        };
        let client_side = async {
            let mut stream = client.connect().await?;
            stream
                .write_all(payload)
                .await
                .map_err(FixtureError::io("client write"))?;
            stream
                .flush()
                .await
                .map_err(FixtureError::io("client flush"))?;
            let mut echoed = vec![0u8; len];
            stream
                .read_exact(&mut echoed)
                .await
                .map_err(FixtureError::io("client read"))?;
            Ok::<_, FixtureError>(echoed)
        };
        let (served, echoed) = tokio::join!(server_side, client_side);
        let _server_stream = served?;
        echoed
    }
}

#[cfg(test)]
mod tests {
    use super::{ClientHandle, ClientTarget, Completion, CompletionSink, InprocRendezvous, ServerHandle, probe};
    use crate::{
        args::{ChannelArgs, keys},
        error::FixtureError,
    };

    #[test]
    fn services_cannot_be_registered_after_start() {
        let sink = CompletionSink::new();
        let mut server = ServerHandle::detached("svc", &ChannelArgs::new(), &sink);
        server.register_service("health").expect("before start");
        server.start();
        let err = server.register_service("reflection").expect_err("after start");
        assert!(matches!(err, FixtureError::AlreadyStarted { service } if service == "reflection"));
        assert_eq!(server.services(), ["health".to_string()]);
        assert_eq!(
            sink.drain(),
            vec![Completion::ServerStarted {
                server: "svc".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn accept_before_start_is_rejected() {
        let sink = CompletionSink::new();
        let rendezvous = InprocRendezvous::new();
        let mut server = ServerHandle::inproc("early", &ChannelArgs::new(), &rendezvous, &sink);
        let err = server.accept().await.err().expect("not started");
        assert!(matches!(err, FixtureError::NotStarted { .. }));
    }

    #[tokio::test]
    async fn inproc_round_trip_posts_completions() {
        let sink = CompletionSink::new();
        let rendezvous = InprocRendezvous::new();
        let args = ChannelArgs::new();
        let mut server = ServerHandle::inproc("inproc", &args, &rendezvous, &sink);
        server.start();
        let mut client =
            ClientHandle::new("inproc", &args, ClientTarget::Inproc(rendezvous.clone()), &sink);
        let echoed = probe::round_trip(&mut server, &mut client, b"spark")
            .await
            .expect("round trip");
        assert_eq!(echoed, b"spark");
        let events = sink.drain();
        assert!(events.contains(&Completion::Connected {
            client: "inproc".to_string()
        }));
        assert!(events.iter().any(|event| matches!(event, Completion::Accepted { .. })));
    }

    #[tokio::test]
    async fn inproc_without_server_is_exhausted() {
        let sink = CompletionSink::new();
        let mut client = ClientHandle::new(
            "lonely",
            &ChannelArgs::new(),
            ClientTarget::Inproc(InprocRendezvous::new()),
            &sink,
        );
        let err = client.connect().await.err().expect("no server");
        assert!(matches!(err, FixtureError::Exhausted { .. }));
    }

    #[tokio::test]
    async fn auth_check_rejects_when_requested() {
        let sink = CompletionSink::new();
        let rendezvous = InprocRendezvous::new();
        let args = ChannelArgs::new().set(keys::FAIL_AUTH_CHECK, true);
        let mut server = ServerHandle::inproc("guarded", &args, &rendezvous, &sink).with_auth_check();
        server.start();
        let mut client =
            ClientHandle::new("guarded", &args, ClientTarget::Inproc(rendezvous.clone()), &sink);
        let (accepted, connected) = tokio::join!(server.accept(), client.connect());
        assert!(connected.is_ok());
        assert!(matches!(accepted, Err(FixtureError::Unauthenticated { .. })));
        assert!(sink
            .drain()
            .iter()
            .any(|event| matches!(event, Completion::AcceptFailed { .. })));
    }
}
