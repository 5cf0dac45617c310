//! 夹具族：每个变体描述一种“传输 + 安全层”组合，并负责产出一对服务端/客户端句柄。
//!
//! # 教案式说明
//! - **意图 (Why)**：测试用例只依赖 [`Fixture`] 的两个工厂方法，不关心链路是 TCP、UNIX 套接字、
//!   代理还是进程内管道；新增组合通过“包装另一个夹具”完成（见 [`tracing::TracingFixture`]），
//!   而不是继承链。
//! - **契约 (What)**：
//!   - `make_server` 在句柄创建之后、开始接受连接之前调用 `pre_server_start`；
//!   - `make_server` 与 `make_client` 可以按任意顺序调用；
//!   - 参数改写（`mutate_*_args`）是纯函数，夹具在每次构造句柄时都应用一次；
//!   - 夹具独占其稀缺资源，析构时全部释放；句柄必须先于夹具析构。
//! - **实现 (How)**：工厂闭包以 [`FixtureFactory`] 形式登记在注册表中，测试执行器按用例逐个构造夹具。

use std::sync::Arc;

use crate::{
    args::ChannelArgs,
    error::FixtureError,
    handle::{ClientHandle, CompletionSink, ServerHandle},
};

pub mod chaotic_good;
#[cfg(unix)]
pub mod fd;
pub mod fullstack;
pub mod inproc;
pub mod proxy;
pub mod secure;
#[cfg(unix)]
pub mod sockpair;
pub mod tracing;

/// 服务端启动前回调，可在其中注册侧通道服务。
pub type PreServerStart<'a> = dyn FnMut(&mut ServerHandle) -> Result<(), FixtureError> + 'a;

/// 夹具工厂：`(client_args, server_args)` 到一个新夹具。
pub type FixtureFactory = Arc<
    dyn Fn(&ChannelArgs, &ChannelArgs) -> Result<Box<dyn Fixture>, FixtureError> + Send + Sync,
>;

/// 一个测试用例独占的夹具实例。
pub trait Fixture: Send {
    /// 构造服务端句柄，回调执行完毕后启动。
    fn make_server(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
        pre_server_start: &mut PreServerStart<'_>,
    ) -> Result<ServerHandle, FixtureError>;

    /// 构造客户端句柄。
    fn make_client(
        &mut self,
        args: &ChannelArgs,
        sink: &CompletionSink,
    ) -> Result<ClientHandle, FixtureError>;

    fn mutate_client_args(&self, args: ChannelArgs) -> ChannelArgs {
        args
    }

    fn mutate_server_args(&self, args: ChannelArgs) -> ChannelArgs {
        args
    }
}

/// 不做任何事的启动前回调。
pub fn no_pre_start(_: &mut ServerHandle) -> Result<(), FixtureError> {
    Ok(())
}

/// 执行启动前回调并启动服务端。
pub(crate) fn start_server(
    mut server: ServerHandle,
    pre_server_start: &mut PreServerStart<'_>,
) -> Result<ServerHandle, FixtureError> {
    pre_server_start(&mut server)?;
    server.start();
    Ok(server)
}

/// 把具体夹具构造函数包装为注册表使用的工厂。
pub fn factory<F, T>(build: F) -> FixtureFactory
where
    F: Fn(&ChannelArgs, &ChannelArgs) -> Result<T, FixtureError> + Send + Sync + 'static,
    T: Fixture + 'static,
{
    Arc::new(move |client_args: &ChannelArgs, server_args: &ChannelArgs| {
        build(client_args, server_args).map(|fixture| Box::new(fixture) as Box<dyn Fixture>)
    })
}
