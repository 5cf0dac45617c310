//! 端点字节流抽象与按块限流包装。
//!
//! # 教案式说明
//! - **意图 (Why)**：夹具产出的连接可能是 TCP、UNIX 套接字、TLS 会话或进程内管道，
//!   测试只关心“能收能发”，因此统一擦除为 [`BoxedStream`]。
//! - **契约 (What)**：[`ChunkLimited`] 保证单次 `poll_read`/`poll_write` 搬运的字节数不超过上限；
//!   上限为 1 时即“逐字节”传输，用于暴露分帧代码对短读短写的假设。

use std::{
    fmt,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// 可双向读写的异步字节流。
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Duplex for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// 类型擦除后的端点连接。
pub type BoxedStream = Box<dyn Duplex>;

/// 每次读写最多搬运 `limit` 字节的包装。
pub struct ChunkLimited<S> {
    inner: S,
    limit: usize,
}

impl<S> ChunkLimited<S> {
    /// `limit` 为 0 时按 1 处理。
    pub fn new(inner: S, limit: usize) -> Self {
        Self {
            inner,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S> fmt::Debug for ChunkLimited<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkLimited")
            .field("limit", &self.limit)
            .finish_non_exhaustive()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ChunkLimited<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let limit = self.limit.min(buf.remaining());
        if limit == buf.remaining() {
            return Pin::new(&mut self.inner).poll_read(cx, buf);
        }
        let mut limited = ReadBuf::new(buf.initialize_unfilled_to(limit));
        match Pin::new(&mut self.inner).poll_read(cx, &mut limited) {
            Poll::Ready(Ok(())) => {
                let filled = limited.filled().len();
                buf.advance(filled);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ChunkLimited<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let limit = self.limit.min(buf.len());
        Pin::new(&mut self.inner).poll_write(cx, &buf[..limit])
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

/// 按可选上限装箱。
pub(crate) fn boxed_with_limit<S>(stream: S, limit: Option<usize>) -> BoxedStream
where
    S: Duplex + 'static,
{
    match limit {
        Some(limit) => Box::new(ChunkLimited::new(stream, limit)),
        None => Box::new(stream),
    }
}
