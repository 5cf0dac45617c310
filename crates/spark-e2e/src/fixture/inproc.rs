//! 进程内夹具：客户端与服务端共享地址空间，连接是一对内存管道。

use crate::{
    args::{ChannelArgs, keys},
    error::FixtureError,
    fixture::{Fixture, PreServerStart, start_server},
    handle::{ClientHandle, ClientTarget, CompletionSink, InprocRendezvous, ServerHandle},
};

const NAME: &str = "inproc";

/// 进程内夹具；`call_v3` 为真时两端参数都带上协作式调用实现的开关。
#[derive(Debug)]
pub struct InprocFixture {
    call_v3: bool,
    rendezvous: InprocRendezvous,
}

impl InprocFixture {
    pub fn new(call_v3: bool) -> Self {
        Self {
            call_v3,
            rendezvous: InprocRendezvous::new(),
        }
    }

    pub fn is_call_v3(&self) -> bool {
        self.call_v3
    }

    fn mutate(&self, args: ChannelArgs) -> ChannelArgs {
        if self.call_v3 {
            args.set(keys::INPROC_CALL_V3, true)
        } else {
            args
        }
    }
}

impl Fixture for InprocFixture {
    fn make_server(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
        pre_server_start: &mut PreServerStart<'_>,
    ) -> Result<ServerHandle, FixtureError> {
        let args = self.mutate_server_args(args.clone());
        let server = ServerHandle::inproc(NAME, &args, &self.rendezvous, sink);
        tracing::debug!(call_v3 = self.call_v3, "in-process server created");
        start_server(server, pre_server_start)
    }

    fn make_client(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
    ) -> Result<ClientHandle, FixtureError> {
        let args = self.mutate_client_args(args.clone());
        Ok(ClientHandle::new(
            NAME,
            &args,
            ClientTarget::Inproc(self.rendezvous.clone()),
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
    use super::InprocFixture;
    use crate::{
        args::{ChannelArgs, keys},
        fixture::Fixture,
    };

    #[test]
    fn call_v3_marks_both_sides() {
        let fixture = InprocFixture::new(true);
        let client = fixture.mutate_client_args(ChannelArgs::new());
        let server = fixture.mutate_server_args(ChannelArgs::new());
        assert_eq!(client.get_bool(keys::INPROC_CALL_V3), Some(true));
        assert_eq!(server.get_bool(keys::INPROC_CALL_V3), Some(true));
        assert!(
            !InprocFixture::new(false)
                .mutate_client_args(ChannelArgs::new())
                .contains(keys::INPROC_CALL_V3)
        );
    }
}
