//! 夹具目标地址：`ipv4:`、`ipv6:`、`unix:`、`unix-abstract:` 与裸 `host:port` 形式的解析。
//!
//! UNIX 路径与抽象名称中的 `%XX` 转义会被解码，因此 `%25` 落地为字面量 `%`，`%00` 落地为 NUL 字节。

use std::{
    fmt,
    net::{SocketAddr, ToSocketAddrs},
    path::PathBuf,
};

use crate::error::FixtureError;

/// 解析后的目标地址。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetAddress {
    Tcp(SocketAddr),
    /// 文件系统上的 UNIX 套接字。
    Unix(PathBuf),
    /// Linux 抽象命名空间，名称不含前导 NUL。
    AbstractUnix(Vec<u8>),
}

impl TargetAddress {
    /// 解析目标字符串。
    pub fn parse(target: &str) -> Result<Self, FixtureError> {
        let invalid = |reason: &str| FixtureError::Bind {
            address: target.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, reason.to_string()),
        };

        if let Some(path) = target.strip_prefix("unix-abstract:") {
            return Ok(Self::AbstractUnix(percent_decode(path).ok_or_else(|| {
                invalid("malformed percent escape")
            })?));
        }
        if let Some(path) = target.strip_prefix("unix:") {
            let bytes = percent_decode(path).ok_or_else(|| invalid("malformed percent escape"))?;
            let path = String::from_utf8(bytes).map_err(|_| invalid("path is not UTF-8"))?;
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        let host_port = target
            .strip_prefix("ipv4:")
            .or_else(|| target.strip_prefix("ipv6:"))
            .unwrap_or(target);
        let resolved = host_port
            .to_socket_addrs()
            .map_err(|source| FixtureError::Bind {
                address: target.to_string(),
                source,
            })?
            .next()
            .ok_or_else(|| invalid("host resolved to no address"))?;
        Ok(Self::Tcp(resolved))
    }

    pub fn is_unix(&self) -> bool {
        matches!(self, Self::Unix(_) | Self::AbstractUnix(_))
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddress::Tcp(addr) => write!(f, "{addr}"),
            TargetAddress::Unix(path) => write!(f, "unix:{}", path.display()),
            TargetAddress::AbstractUnix(name) => {
                write!(f, "unix-abstract:{}", String::from_utf8_lossy(name).escape_debug())
            }
        }
    }
}

/// 按 `host:port` 拼接，IPv6 字面量自动加方括号。
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

fn percent_decode(input: &str) -> Option<Vec<u8>> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut index = 0;
    while index < bytes.len() {
        if bytes[index] == b'%' {
            let hex = bytes.get(index + 1..index + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            index += 3;
        } else {
            out.push(bytes[index]);
            index += 1;
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{TargetAddress, join_host_port};

    #[test]
    fn unix_paths_are_percent_decoded() {
        let parsed = TargetAddress::parse("unix:/tmp/spark.%25.1").expect("valid");
        assert_eq!(parsed, TargetAddress::Unix(PathBuf::from("/tmp/spark.%.1")));

        let parsed = TargetAddress::parse("unix-abstract:spark.%00.1").expect("valid");
        assert_eq!(parsed, TargetAddress::AbstractUnix(b"spark.\0.1".to_vec()));

        assert!(TargetAddress::parse("unix:/tmp/bad%2").is_err());
    }

    #[test]
    fn tcp_targets_resolve() {
        let parsed = TargetAddress::parse("ipv4:127.0.0.1:4000").expect("valid");
        assert_eq!(parsed, TargetAddress::Tcp("127.0.0.1:4000".parse().expect("addr")));
        let parsed = TargetAddress::parse(&join_host_port("::1", 4001)).expect("valid");
        assert_eq!(parsed, TargetAddress::Tcp("[::1]:4001".parse().expect("addr")));
    }
}
