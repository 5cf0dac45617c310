//! fd 夹具：夹具构造时创建一对描述符，服务端启动后再把其中一端作为现成连接附着上去。

use std::os::fd::AsRawFd;

use crate::{
    args::ChannelArgs,
    endpoint_pair::{Endpoint, create_endpoint_pair},
    error::FixtureError,
    fixture::{Fixture, PreServerStart, start_server},
    handle::{ClientHandle, ClientTarget, CompletionSink, ServerHandle},
};

#[derive(Debug)]
pub struct FdFixture {
    client: Option<Endpoint>,
    server: Option<Endpoint>,
}

impl FdFixture {
    pub fn new() -> Result<Self, FixtureError> {
        let pair = create_endpoint_pair("fixture:fd", &ChannelArgs::new())?;
        Ok(Self {
            client: Some(pair.client),
            server: Some(pair.server),
        })
    }
}

impl Fixture for FdFixture {
    fn make_server(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
        pre_server_start: &mut PreServerStart<'_>,
    ) -> Result<ServerHandle, FixtureError> {
        let endpoint = self.server.take().ok_or(FixtureError::Exhausted {
            resource: "fd server descriptor",
        })?;
        let mut server = start_server(ServerHandle::detached("fixture:fd", args, sink), pre_server_start)?;
        tracing::debug!(fd = endpoint.as_raw_fd(), "attaching descriptor to started server");
        server.attach_preconnected(endpoint)?;
        Ok(server)
    }

    fn make_client(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
    ) -> Result<ClientHandle, FixtureError> {
        let endpoint = self.client.take().ok_or(FixtureError::Exhausted {
            resource: "fd client descriptor",
        })?;
        Ok(ClientHandle::new(
            "fixture_client",
            args,
            ClientTarget::Preconnected(Some(endpoint)),
            sink,
        ))
    }
}
