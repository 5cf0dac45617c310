//! 通道参数袋：夹具在构造客户端与服务端时读取、夹具变体在构造前改写的键值配置。
//!
//! # 教案式说明
//! - **意图 (Why)**：许多夹具变体只是“基础夹具 + 一次参数改写”（启用 census、默认压缩、禁用重试……），
//!   用值语义的参数袋表达这些改写，变体之间不会互相污染。
//! - **契约 (What)**：
//!   - `set`/`set_if_unset`/`remove` 均返回新的参数袋，原值保持不变；
//!   - 迭代顺序按键名排序，便于日志与断言稳定；
//!   - 读取类型与写入类型不一致时返回 `None`，不做隐式转换。
//! - **实现 (How)**：内部为 `BTreeMap<Cow<'static, str>, ArgValue>`，常用键以 `&'static str` 常量提供，
//!   避免每次写入都分配字符串。

use std::{borrow::Cow, collections::BTreeMap, fmt};

/// 知名参数键。
pub mod keys {
    /// 两端均使用最小过滤栈。
    pub const MINIMAL_STACK: &str = "spark.minimal_stack";
    pub const ENABLE_RETRIES: &str = "spark.enable_retries";
    /// 端点每次读取的首选字节数。
    pub const READ_CHUNK_SIZE: &str = "spark.experimental.tcp_read_chunk_size";
    pub const MIN_READ_CHUNK_SIZE: &str = "spark.experimental.tcp_min_read_chunk_size";
    pub const MAX_READ_CHUNK_SIZE: &str = "spark.experimental.tcp_max_read_chunk_size";
    pub const ENABLE_CENSUS: &str = "spark.census";
    /// 默认压缩算法名称。
    pub const DEFAULT_COMPRESSION: &str = "spark.default_compression_algorithm";
    /// HTTP CONNECT 代理地址，形如 `http://127.0.0.1:port`。
    pub const HTTP_PROXY: &str = "spark.http_proxy";
    /// 代理鉴权凭证，形如 `user:password`。
    pub const HTTP_PROXY_AUTH_CREDS: &str = "spark.http_proxy_auth_creds";
    /// TLS 校验时使用的目标主机名。
    pub const SSL_TARGET_NAME_OVERRIDE: &str = "spark.ssl_target_name_override";
    /// 服务端以鉴权失败拒绝所有连接。
    pub const FAIL_AUTH_CHECK: &str = "spark.test.fail_auth_check";
    pub const CHAOTIC_GOOD_DATA_CONNECTIONS: &str = "spark.chaotic_good.data_connections";
    pub const CHAOTIC_GOOD_MAX_RECV_CHUNK_SIZE: &str = "spark.chaotic_good.max_recv_chunk_size";
    pub const CHAOTIC_GOOD_MAX_SEND_CHUNK_SIZE: &str = "spark.chaotic_good.max_send_chunk_size";
    pub const INPROC_CALL_V3: &str = "spark.inproc.call_v3";
}

/// 参数值。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArgValue {
    Int(i64),
    Bool(bool),
    Str(String),
}

impl fmt::Display for ArgValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgValue::Int(value) => write!(f, "{value}"),
            ArgValue::Bool(value) => write!(f, "{value}"),
            ArgValue::Str(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for ArgValue {
    fn from(value: i64) -> Self {
        ArgValue::Int(value)
    }
}

impl From<i32> for ArgValue {
    fn from(value: i32) -> Self {
        ArgValue::Int(i64::from(value))
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Bool(value)
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Str(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Str(value)
    }
}

/// 不可变参数袋。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChannelArgs {
    entries: BTreeMap<Cow<'static, str>, ArgValue>,
}

impl ChannelArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 返回写入 `key = value` 后的新参数袋，已有值被覆盖。
    #[must_use]
    pub fn set(&self, key: impl Into<Cow<'static, str>>, value: impl Into<ArgValue>) -> Self {
        let mut next = self.clone();
        next.entries.insert(key.into(), value.into());
        next
    }

    /// 仅当键不存在时写入。
    #[must_use]
    pub fn set_if_unset(
        &self,
        key: impl Into<Cow<'static, str>>,
        value: impl Into<ArgValue>,
    ) -> Self {
        let key = key.into();
        if self.entries.contains_key(&key) {
            return self.clone();
        }
        self.set(key, value)
    }

    #[must_use]
    pub fn remove(&self, key: &str) -> Self {
        let mut next = self.clone();
        next.entries.remove(key);
        next
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&ArgValue> {
        self.entries.get(key)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        match self.entries.get(key)? {
            ArgValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.entries.get(key)? {
            ArgValue::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.entries.get(key)? {
            ArgValue::Str(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.entries.iter().map(|(key, value)| (key.as_ref(), value))
    }

    /// 从参数袋读取端点每次读写的字节上限。
    ///
    /// 在读块与 chaotic-good 分块相关的键中取最小的正值；均未设置时返回 `None`。
    pub fn read_chunk_limit(&self) -> Option<usize> {
        [
            keys::READ_CHUNK_SIZE,
            keys::MAX_READ_CHUNK_SIZE,
            keys::CHAOTIC_GOOD_MAX_RECV_CHUNK_SIZE,
            keys::CHAOTIC_GOOD_MAX_SEND_CHUNK_SIZE,
        ]
        .into_iter()
        .filter_map(|key| self.get_int(key))
        .filter(|size| *size > 0)
        .filter_map(|size| usize::try_from(size).ok())
        .min()
    }
}

impl fmt::Display for ChannelArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (index, (key, value)) in self.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}={value}")?;
        }
        f.write_str("}")
    }
}

#[cfg(test)]
mod tests {
    use super::{ArgValue, ChannelArgs, keys};

    #[test]
    fn set_returns_new_bag() {
        let base = ChannelArgs::new();
        let next = base.set(keys::ENABLE_CENSUS, true);
        assert!(base.is_empty());
        assert_eq!(next.get_bool(keys::ENABLE_CENSUS), Some(true));
        assert_eq!(next.get_int(keys::ENABLE_CENSUS), None);
    }

    #[test]
    fn set_if_unset_keeps_existing_value() {
        let args = ChannelArgs::new().set(keys::DEFAULT_COMPRESSION, "identity");
        let mutated = args.set_if_unset(keys::DEFAULT_COMPRESSION, "gzip");
        assert_eq!(mutated.get_str(keys::DEFAULT_COMPRESSION), Some("identity"));

        let fresh = ChannelArgs::new().set_if_unset(keys::DEFAULT_COMPRESSION, "gzip");
        assert_eq!(fresh.get_str(keys::DEFAULT_COMPRESSION), Some("gzip"));
    }

    #[test]
    fn remove_and_display() {
        let args = ChannelArgs::new()
            .set(keys::READ_CHUNK_SIZE, 1)
            .set(keys::HTTP_PROXY, "http://127.0.0.1:1");
        assert_eq!(
            args.to_string(),
            "{spark.experimental.tcp_read_chunk_size=1, spark.http_proxy=\"http://127.0.0.1:1\"}"
        );
        let removed = args.remove(keys::HTTP_PROXY);
        assert!(!removed.contains(keys::HTTP_PROXY));
        assert_eq!(removed.get(keys::READ_CHUNK_SIZE), Some(&ArgValue::Int(1)));
    }

    #[test]
    fn read_chunk_limit_takes_smallest_positive() {
        assert_eq!(ChannelArgs::new().read_chunk_limit(), None);
        let args = ChannelArgs::new()
            .set(keys::READ_CHUNK_SIZE, 8)
            .set(keys::MAX_READ_CHUNK_SIZE, 1);
        assert_eq!(args.read_chunk_limit(), Some(1));
        let ignored = ChannelArgs::new().set(keys::READ_CHUNK_SIZE, 0);
        assert_eq!(ignored.read_chunk_limit(), None);
    }
}
