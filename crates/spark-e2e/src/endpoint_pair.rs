//! 端点对工厂：创建一对已互联的本地流套接字，分别交给客户端与服务端。
//!
//! # 教案式说明
//! - **意图 (Why)**：套接字对、fd 与最小栈等夹具都不需要监听端口，只需要一条现成的双向链路；
//!   把“创建 + 非阻塞 + 屏蔽 SIGPIPE + 读块配置”集中在一个工厂里，避免每个夹具各写一遍。
//! - **契约 (What)**：
//!   - 两端均为非阻塞模式，标签分别为 `"{name}:client"` 与 `"{name}:server"`；
//!   - 读块上限取自 `READ_CHUNK_SIZE` / `MAX_READ_CHUNK_SIZE`；
//!   - 任一步失败时已创建的描述符随 `Socket` 析构关闭，不会泄漏。
//! - **实现 (How)**：`socket2::Socket::pair` 创建 `AF_UNIX` 流套接字对；Apple 平台设置 `SO_NOSIGPIPE`，
//!   其余平台的写入由 tokio 完成，运行时启动时已忽略 `SIGPIPE`。

use std::{
    fmt,
    os::{
        fd::{AsRawFd, RawFd},
        unix::net::UnixStream as StdUnixStream,
    },
};

use socket2::{Domain, Socket, Type};
use tokio::net::UnixStream;

use crate::{
    args::ChannelArgs,
    error::FixtureError,
    stream::{BoxedStream, boxed_with_limit},
};

/// 一对互联端点。
#[derive(Debug)]
pub struct EndpointPair {
    pub client: Endpoint,
    pub server: Endpoint,
}

/// 尚未进入异步运行时的端点。
pub struct Endpoint {
    label: String,
    socket: StdUnixStream,
    read_chunk: Option<usize>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("label", &self.label)
            .field("fd", &self.socket.as_raw_fd())
            .field("read_chunk", &self.read_chunk)
            .finish()
    }
}

impl Endpoint {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn read_chunk(&self) -> Option<usize> {
        self.read_chunk
    }

    /// 覆盖读块上限，用于在端点创建之后才得知参数的场景。
    pub(crate) fn with_read_chunk(mut self, read_chunk: Option<usize>) -> Self {
        if read_chunk.is_some() {
            self.read_chunk = read_chunk;
        }
        self
    }

    /// 注册到当前 tokio 运行时并按读块上限包装。
    ///
    /// 必须在运行时上下文内调用。
    pub fn into_stream(self) -> Result<BoxedStream, FixtureError> {
        let stream = UnixStream::from_std(self.socket)
            .map_err(FixtureError::io("register endpoint with runtime"))?;
        Ok(boxed_with_limit(stream, self.read_chunk))
    }
}

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

/// 创建一对互联端点。
pub fn create_endpoint_pair(name: &str, args: &ChannelArgs) -> Result<EndpointPair, FixtureError> {
    let pair_error = |source| FixtureError::SocketPair {
        name: name.to_string(),
        source,
    };
    let (client, server) = Socket::pair(Domain::UNIX, Type::STREAM, None).map_err(pair_error)?;
    for socket in [&client, &server] {
        prepare(socket).map_err(pair_error)?;
    }

    let read_chunk = args.read_chunk_limit();
    tracing::debug!(
        name,
        client_fd = client.as_raw_fd(),
        server_fd = server.as_raw_fd(),
        ?read_chunk,
        "endpoint pair created"
    );
    Ok(EndpointPair {
        client: Endpoint {
            label: format!("{name}:client"),
            socket: StdUnixStream::from(client),
            read_chunk,
        },
        server: Endpoint {
            label: format!("{name}:server"),
            socket: StdUnixStream::from(server),
            read_chunk,
        },
    })
}

fn prepare(socket: &Socket) -> std::io::Result<()> {
    socket.set_nonblocking(true)?;
    #[cfg(any(target_os = "macos", target_os = "ios", target_os = "tvos", target_os = "watchos"))]
    socket.set_nosigpipe(true)?;
    Ok(())
}
