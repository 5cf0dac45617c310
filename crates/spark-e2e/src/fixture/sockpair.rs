//! 套接字对夹具：绕过网络栈，客户端与服务端直接挂在一对互联套接字的两端。
//!
//! # 教案式说明
//! - **意图 (Why)**：排除端口分配与回环网络带来的噪声，得到可重复的链路；
//!   逐字节变体把每次读写限制为 1 字节，专门暴露分帧代码对短读短写的假设。
//! - **契约 (What)**：
//!   - 套接字对在夹具构造时创建，两端各只能被取用一次；
//!   - 服务端启动之后才附着服务端一端；
//!   - 逐字节变体存活期间 [`slowdown_factor`](crate::observability::slowdown_factor) 为 2；
//!   - 只有最小栈变体两端参数带 `MINIMAL_STACK`；逐字节变体只改分块大小。

use crate::{
    args::{ChannelArgs, keys},
    endpoint_pair::{Endpoint, create_endpoint_pair},
    error::FixtureError,
    fixture::{Fixture, PreServerStart, start_server},
    handle::{ClientHandle, ClientTarget, CompletionSink, ServerHandle},
    observability::SlowdownGuard,
};

/// 套接字对变体。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SockpairKind {
    Plain,
    Minstack,
    OneByteAtATime,
}

impl SockpairKind {
    fn endpoint_args(self) -> ChannelArgs {
        match self {
            SockpairKind::Plain | SockpairKind::Minstack => ChannelArgs::new(),
            SockpairKind::OneByteAtATime => ChannelArgs::new()
                .set(keys::READ_CHUNK_SIZE, 1)
                .set(keys::MIN_READ_CHUNK_SIZE, 1)
                .set(keys::MAX_READ_CHUNK_SIZE, 1),
        }
    }

    fn minimal_stack(self) -> bool {
        matches!(self, SockpairKind::Minstack)
    }
}

#[derive(Debug)]
pub struct SockpairFixture {
    kind: SockpairKind,
    client: Option<Endpoint>,
    server: Option<Endpoint>,
    _slowdown: Option<SlowdownGuard>,
}

impl SockpairFixture {
    pub fn new(kind: SockpairKind) -> Result<Self, FixtureError> {
        let pair = create_endpoint_pair("fixture:sockpair", &kind.endpoint_args())?;
        let slowdown = (kind == SockpairKind::OneByteAtATime).then(SlowdownGuard::acquire);
        Ok(Self {
            kind,
            client: Some(pair.client),
            server: Some(pair.server),
            _slowdown: slowdown,
        })
    }

    pub fn kind(&self) -> SockpairKind {
        self.kind
    }

    fn mutate(&self, args: ChannelArgs) -> ChannelArgs {
        if self.kind.minimal_stack() {
            args.set(keys::MINIMAL_STACK, true)
        } else {
            args
        }
    }
}

impl Fixture for SockpairFixture {
    fn make_server(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
        pre_server_start: &mut PreServerStart<'_>,
    ) -> Result<ServerHandle, FixtureError> {
        let endpoint = self.server.take().ok_or(FixtureError::Exhausted {
            resource: "socket pair server end",
        })?;
        let args = self.mutate_server_args(args.clone());
        let mut server = start_server(
            ServerHandle::detached("fixture:sockpair", &args, sink),
            pre_server_start,
        )?;
        server.attach_preconnected(endpoint)?;
        Ok(server)
    }

    fn make_client(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
    ) -> Result<ClientHandle, FixtureError> {
        let endpoint = self.client.take().ok_or(FixtureError::Exhausted {
            resource: "socket pair client end",
        })?;
        let args = self.mutate_client_args(args.clone());
        Ok(ClientHandle::new(
            "fixture:sockpair",
            &args,
            ClientTarget::Preconnected(Some(endpoint)),
            sink,
        ))
    }

    fn mutate_client_args(&self, args: ChannelArgs) -> ChannelArgs {
        self.mutate(args)
    }

    fn mutate_server_args(&self, args: ChannelArgs) -> ChannelArgs {
        self.mutate(args)
    }
}

#[cfg(test)]
mod tests {
    use super::{SockpairFixture, SockpairKind};
    use crate::{
        args::{ChannelArgs, keys},
        error::FixtureError,
        fixture::{Fixture, no_pre_start},
        handle::CompletionSink,
    };

    #[test]
    fn minimal_stack_flag_follows_kind() {
        let plain = SockpairFixture::new(SockpairKind::Plain).expect("fixture");
        assert!(
            !plain
                .mutate_client_args(ChannelArgs::new())
                .contains(keys::MINIMAL_STACK)
        );
        let minstack = SockpairFixture::new(SockpairKind::Minstack).expect("fixture");
        assert_eq!(
            minstack
                .mutate_server_args(ChannelArgs::new())
                .get_bool(keys::MINIMAL_STACK),
            Some(true)
        );
    }

    #[test]
    fn one_byte_variant_keeps_the_full_stack() {
        let fixture = SockpairFixture::new(SockpairKind::OneByteAtATime).expect("fixture");
        for args in [
            fixture.mutate_client_args(ChannelArgs::new()),
            fixture.mutate_server_args(ChannelArgs::new()),
        ] {
            assert!(!args.contains(keys::MINIMAL_STACK));
        }
    }

    #[test]
    fn ends_are_handed_out_once() {
        let mut fixture = SockpairFixture::new(SockpairKind::Plain).expect("fixture");
        let sink = CompletionSink::new();
        let _server = fixture
            .make_server(&ChannelArgs::new(), &sink, &mut no_pre_start)
            .expect("server");
        let again = fixture.make_server(&ChannelArgs::new(), &sink, &mut no_pre_start);
        assert!(matches!(again, Err(FixtureError::Exhausted { .. })));
        let _client = fixture
            .make_client(&ChannelArgs::new(), &sink)
            .expect("client");
        assert!(fixture.make_client(&ChannelArgs::new(), &sink).is_err());
    }
}
