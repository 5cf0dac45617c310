//! 带追踪的夹具：包装另一个夹具，构造时打开追踪器，析构时撤销。
//!
//! 组合而非继承：两个工厂方法与参数改写全部委托给内层夹具。

use crate::{
    args::ChannelArgs,
    error::FixtureError,
    fixture::{Fixture, PreServerStart},
    handle::{ClientHandle, CompletionSink, ServerHandle},
    observability::tracers::{self, TracerGuard},
};

/// 构造时打开的追踪器；最后一个名称不存在，用来确认未知名称被容忍。
pub const ENABLED_TRACERS: &[&str] = &["http", "all", "doesnt-exist"];

pub struct TracingFixture {
    inner: Box<dyn Fixture>,
    // 字段按声明顺序析构：内层夹具先释放，追踪器最后撤销。
    _guards: Vec<TracerGuard>,
}

impl std::fmt::Debug for TracingFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TracingFixture")
            .field("tracers", &self._guards)
            .finish_non_exhaustive()
    }
}

impl TracingFixture {
    pub fn new(inner: Box<dyn Fixture>) -> Self {
        let guards = ENABLED_TRACERS
            .iter()
            .filter_map(|name| {
                let guard = tracers::set_enabled(name);
                if guard.is_none() {
                    tracing::debug!(tracer = name, "ignoring unknown tracer");
                }
                guard
            })
            .collect();
        Self {
            inner,
            _guards: guards,
        }
    }

    /// 包装任意具体夹具。
    pub fn wrap<F: Fixture + 'static>(inner: F) -> Self {
        Self::new(Box::new(inner))
    }
}

impl Fixture for TracingFixture {
    fn make_server(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
        pre_server_start: &mut PreServerStart<'_>,
    ) -> Result<ServerHandle, FixtureError> {
        self.inner.make_server(args, sink, pre_server_start)
    }

    fn make_client(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
    ) -> Result<ClientHandle, FixtureError> {
        self.inner.make_client(args, sink)
    }

    fn mutate_client_args(&self, args: ChannelArgs) -> ChannelArgs {
        self.inner.mutate_client_args(args)
    }

    fn mutate_server_args(&self, args: ChannelArgs) -> ChannelArgs {
        self.inner.mutate_server_args(args)
    }
}
