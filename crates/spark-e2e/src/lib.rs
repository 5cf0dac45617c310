#![doc = r#"
# spark-e2e

## 章节定位（Why）
- **目标**：为端到端测试提供一份可查询的“链路矩阵”。每个具名配置描述一种传输与安全层组合
  （进程内、套接字对、TCP fullstack、TLS 变体、代理、预连接描述符），并携带一组特性位；
  测试套件通过声明式查询挑选自己能运行的配置。
- **边界**：本 crate 负责夹具的构造与释放、特性位与查询、套件展开；不涉及 RPC 调用语义、
  重试与流控，也不实现证书校验逻辑本身。

## 结构概览（How）
- `feature` / `args`：特性掩码与不可变参数包；
- `fixture`：夹具 trait 与全部变体，`handle` 提供服务端/客户端句柄与完成事件；
- `registry` / `query` / `suite`：配置清单、查询引擎与套件绑定；
- `unique` / `endpoint_pair` / `proxy` / `tls` / `credentials`：夹具依赖的稀缺资源；
- `config` / `observability` / `error`：配置加载、日志与错误类型。

## 使用方式（What）
```ignore
use spark_e2e::{spark_e2e, suite::E2eCase};

#[spark_e2e(suites(CoreEnd2endTests, Http2Tests))]
mod e2e {
    pub const CASES: &[spark_e2e::suite::E2eCase] = &[spark_e2e::suite::CONNECTIVITY];
}
```
宏为每个套件生成一个 `#[test]`，在默认注册表上执行 `CASES` 中的全部用例。
"#]

pub mod address;
pub mod args;
pub mod config;
pub mod credentials;
#[cfg(unix)]
pub mod endpoint_pair;
pub mod error;
pub mod feature;
pub mod fixture;
pub mod handle;
pub mod observability;
pub mod proxy;
pub mod query;
pub mod registry;
mod stream;
pub mod suite;
pub mod tls;
pub mod unique;

pub use args::{ArgValue, ChannelArgs};
pub use config::{E2eConfig, ExecutionMode};
pub use error::{ConfigError, FixtureError, QueryError, RegistryError};
pub use feature::FeatureMask;
pub use fixture::{Fixture, FixtureFactory};
pub use handle::{ClientHandle, Completion, CompletionSink, ServerHandle};
pub use query::ConfigQuery;
pub use registry::{Configuration, Registry};
pub use stream::{BoxedStream, ChunkLimited, Duplex};
pub use suite::{BoundSuite, E2eCase, SuiteCatalog, SuiteReport, run_suite};

pub use spark_e2e_macros::spark_e2e;
