//! 连接级与调用级凭证，以及连接建立后的安全握手。
//!
//! # 教案式说明
//! - **意图 (Why)**：fullstack 夹具的差异主要在“链路上跑什么安全层”，
//!   把各类凭证收敛成枚举后，服务端 `accept` 与客户端 `connect` 只需一次分派。
//! - **契约 (What)**：
//!   - `Insecure`：不做握手；
//!   - `FakeSecurity`：双方交换固定魔数行，用于验证“存在安全层”的代码路径而不引入真实加密；
//!   - `Local`：TCP 形态要求对端为回环地址，UDS 形态始终接受；
//!   - `Tls`：rustls 握手，客户端以 [`ChannelCredentials::Tls::server_name`] 校验证书；
//!   - 服务端开启鉴权失败开关时，握手完成后以 [`FixtureError::Unauthenticated`] 拒绝连接。
//! - **风险提示 (Trade-offs)**：调用级凭证只作为元数据挂在客户端句柄上，具体如何随调用发送由上层协议决定。

use std::{fmt, net::SocketAddr, sync::Arc};

use rustls::{ClientConfig, ServerConfig};
use rustls_pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::{error::FixtureError, stream::BoxedStream};

/// 假安全层双方交换的魔数行。
pub const FAKE_SECURITY_MAGIC: &[u8] = b"SPARK-FAKE-SECURITY/1\n";

/// 本地凭证的连接形态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LocalConnectType {
    Tcp,
    Uds,
}

/// 对端描述，用于本地凭证校验与日志。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerInfo {
    Tcp(SocketAddr),
    Unix,
    InProcess,
    /// 预先创建的描述符，地址未知。
    Descriptor,
}

impl fmt::Display for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerInfo::Tcp(addr) => write!(f, "tcp:{addr}"),
            PeerInfo::Unix => f.write_str("unix"),
            PeerInfo::InProcess => f.write_str("inproc"),
            PeerInfo::Descriptor => f.write_str("fd"),
        }
    }
}

/// 服务端连接凭证。
#[derive(Clone)]
pub enum ServerCredentials {
    Insecure,
    FakeSecurity,
    Local(LocalConnectType),
    Tls(Arc<ServerConfig>),
}

impl fmt::Debug for ServerCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerCredentials::Insecure => f.write_str("Insecure"),
            ServerCredentials::FakeSecurity => f.write_str("FakeSecurity"),
            ServerCredentials::Local(kind) => f.debug_tuple("Local").field(kind).finish(),
            ServerCredentials::Tls(_) => f.write_str("Tls"),
        }
    }
}

impl ServerCredentials {
    pub fn is_secure(&self) -> bool {
        matches!(self, ServerCredentials::Tls(_))
    }

    /// 在已建立的连接上完成服务端握手。
    pub(crate) async fn handshake(
        &self,
        mut stream: BoxedStream,
        peer: &PeerInfo,
        fail_auth_check: bool,
    ) -> Result<BoxedStream, FixtureError> {
        let secured: BoxedStream = match self {
            ServerCredentials::Insecure => stream,
            ServerCredentials::FakeSecurity => {
                expect_magic(&mut stream, "server").await?;
                send_magic(&mut stream, "server").await?;
                stream
            }
            ServerCredentials::Local(kind) => {
                check_local_peer(*kind, peer)?;
                stream
            }
            ServerCredentials::Tls(config) => {
                let tls = TlsAcceptor::from(Arc::clone(config))
                    .accept(stream)
                    .await
                    .map_err(|err| FixtureError::Handshake {
                        side: "server",
                        detail: err.to_string(),
                    })?;
                Box::new(tls)
            }
        };
        if fail_auth_check {
            tracing::debug!(%peer, "rejecting connection: auth check configured to fail");
            return Err(FixtureError::Unauthenticated {
                peer: peer.to_string(),
            });
        }
        Ok(secured)
    }
}

fn check_local_peer(kind: LocalConnectType, peer: &PeerInfo) -> Result<(), FixtureError> {
    let accepted = match (kind, peer) {
        (LocalConnectType::Tcp, PeerInfo::Tcp(addr)) => addr.ip().is_loopback(),
        (LocalConnectType::Uds, PeerInfo::Unix) => true,
        _ => false,
    };
    if accepted {
        Ok(())
    } else {
        Err(FixtureError::Unauthenticated {
            peer: peer.to_string(),
        })
    }
}

/// 客户端连接凭证。
#[derive(Clone)]
pub enum ChannelCredentials {
    Insecure,
    FakeSecurity,
    Local(LocalConnectType),
    Tls {
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    },
}

impl fmt::Debug for ChannelCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelCredentials::Insecure => f.write_str("Insecure"),
            ChannelCredentials::FakeSecurity => f.write_str("FakeSecurity"),
            ChannelCredentials::Local(kind) => f.debug_tuple("Local").field(kind).finish(),
            ChannelCredentials::Tls { server_name, .. } => f
                .debug_struct("Tls")
                .field("server_name", &server_name.to_str())
                .finish_non_exhaustive(),
        }
    }
}

impl ChannelCredentials {
    pub fn is_secure(&self) -> bool {
        matches!(self, ChannelCredentials::Tls { .. })
    }

    /// 在已建立的连接上完成客户端握手。
    pub(crate) async fn handshake(
        &self,
        mut stream: BoxedStream,
        peer: &PeerInfo,
    ) -> Result<BoxedStream, FixtureError> {
        match self {
            ChannelCredentials::Insecure => Ok(stream),
            ChannelCredentials::FakeSecurity => {
                send_magic(&mut stream, "client").await?;
                expect_magic(&mut stream, "client").await?;
                Ok(stream)
            }
            ChannelCredentials::Local(kind) => {
                check_local_peer(*kind, peer)?;
                Ok(stream)
            }
            ChannelCredentials::Tls {
                config,
                server_name,
            } => {
                let tls = TlsConnector::from(Arc::clone(config))
                    .connect(server_name.clone(), stream)
                    .await
                    .map_err(|err| FixtureError::Handshake {
                        side: "client",
                        detail: err.to_string(),
                    })?;
                Ok(Box::new(tls))
            }
        }
    }
}

async fn send_magic(stream: &mut BoxedStream, side: &'static str) -> Result<(), FixtureError> {
    stream
        .write_all(FAKE_SECURITY_MAGIC)
        .await
        .map_err(|err| FixtureError::Handshake {
            side,
            detail: err.to_string(),
        })?;
    stream.flush().await.map_err(|err| FixtureError::Handshake {
        side,
        detail: err.to_string(),
    })
}

async fn expect_magic(stream: &mut BoxedStream, side: &'static str) -> Result<(), FixtureError> {
    let mut received = vec![0u8; FAKE_SECURITY_MAGIC.len()];
    stream
        .read_exact(&mut received)
        .await
        .map_err(|err| FixtureError::Handshake {
            side,
            detail: err.to_string(),
        })?;
    if received != FAKE_SECURITY_MAGIC {
        return Err(FixtureError::Handshake {
            side,
            detail: "fake security preamble mismatch".to_string(),
        });
    }
    Ok(())
}

/// 调用级凭证。
#[derive(Clone, PartialEq, Eq)]
pub enum CallCredentials {
    /// OAuth2 访问令牌。
    OAuth2 { token: String },
}

impl fmt::Debug for CallCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallCredentials::OAuth2 { .. } => f.write_str("OAuth2 { token: <redacted> }"),
        }
    }
}

impl CallCredentials {
    /// 随调用发送的 `authorization` 元数据值。
    pub fn authorization(&self) -> String {
        match self {
            CallCredentials::OAuth2 { token } => format!("Bearer {token}"),
        }
    }
}
