//! chaotic-good 夹具：TCP 链路，数据连接数与分块大小通过参数传给两端。
//!
//! 分块大小大于 0 时，每次读写都被限制在该字节数以内；0 表示不限制。

use crate::{
    args::{ChannelArgs, keys},
    config::E2eConfig,
    error::FixtureError,
    fixture::{Fixture, PreServerStart, fullstack::ListenAddress, start_server},
    handle::{ClientHandle, CompletionSink, ServerHandle},
};

#[derive(Debug)]
pub struct ChaoticGoodFixture {
    data_connections: u32,
    chunk_size: u32,
    listen: ListenAddress,
}

impl ChaoticGoodFixture {
    pub fn new(data_connections: u32, chunk_size: u32) -> Result<Self, FixtureError> {
        let host = E2eConfig::from_env().tcp_host;
        Ok(Self {
            data_connections,
            chunk_size,
            listen: ListenAddress::loopback_v4(&host)?,
        })
    }

    pub fn full_stack() -> Result<Self, FixtureError> {
        Self::new(1, 0)
    }

    pub fn single_connection() -> Result<Self, FixtureError> {
        Self::new(1, 0)
    }

    pub fn many_connections() -> Result<Self, FixtureError> {
        Self::new(16, 0)
    }

    pub fn one_byte_chunk() -> Result<Self, FixtureError> {
        Self::new(1, 1)
    }

    pub fn data_connections(&self) -> u32 {
        self.data_connections
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    fn with_chunks(&self, args: ChannelArgs) -> ChannelArgs {
        args.set(keys::CHAOTIC_GOOD_MAX_RECV_CHUNK_SIZE, i64::from(self.chunk_size))
            .set(keys::CHAOTIC_GOOD_MAX_SEND_CHUNK_SIZE, i64::from(self.chunk_size))
    }
}

impl Fixture for ChaoticGoodFixture {
    fn make_server(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
        pre_server_start: &mut PreServerStart<'_>,
    ) -> Result<ServerHandle, FixtureError> {
        let args = self.mutate_server_args(args.clone());
        let server = self.listen.bind("fixture:chaotic_good", &args, sink)?;
        tracing::debug!(
            data_connections = self.data_connections,
            chunk_size = self.chunk_size,
            "chaotic-good server bound"
        );
        start_server(server, pre_server_start)
    }

    fn make_client(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
    ) -> Result<ClientHandle, FixtureError> {
        let args = self.mutate_client_args(args.clone());
        Ok(ClientHandle::new(
            "fixture:chaotic_good",
            &args,
            self.listen.client_target(),
            sink,
        ))
    }

    /// 客户端同样带上分块大小；未显式设置时关闭重试。
    fn mutate_client_args(&self, args: ChannelArgs) -> ChannelArgs {
        self.with_chunks(args)
            .set_if_unset(keys::ENABLE_RETRIES, false)
    }

    fn mutate_server_args(&self, args: ChannelArgs) -> ChannelArgs {
        self.with_chunks(args).set(
            keys::CHAOTIC_GOOD_DATA_CONNECTIONS,
            i64::from(self.data_connections),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::ChaoticGoodFixture;
    use crate::{
        args::{ChannelArgs, keys},
        fixture::Fixture,
    };

    #[test]
    fn args_carry_connections_and_chunks() {
        let fixture = ChaoticGoodFixture::many_connections().expect("fixture");
        let server = fixture.mutate_server_args(ChannelArgs::new());
        assert_eq!(server.get_int(keys::CHAOTIC_GOOD_DATA_CONNECTIONS), Some(16));
        assert_eq!(server.read_chunk_limit(), None);

        let one_byte = ChaoticGoodFixture::one_byte_chunk().expect("fixture");
        let client = one_byte.mutate_client_args(ChannelArgs::new());
        assert_eq!(client.read_chunk_limit(), Some(1));
        assert_eq!(client.get_bool(keys::ENABLE_RETRIES), Some(false));

        let retries = one_byte.mutate_client_args(ChannelArgs::new().set(keys::ENABLE_RETRIES, true));
        assert_eq!(retries.get_bool(keys::ENABLE_RETRIES), Some(true));
    }
}
