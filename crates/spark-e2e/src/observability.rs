//! 可观测性：日志订阅器安装、具名追踪开关与全局减速因子。
//!
//! # 教案式说明
//! - **意图 (Why)**：
//!   - 端到端测试失败时，首先需要的是夹具构造与拆除的日志，因此提供一次性的订阅器安装入口；
//!   - 带追踪的夹具变体需要在构造时打开若干具名追踪器、在析构时恢复，开关必须可嵌套；
//!   - 逐字节传输的夹具会显著拖慢用例，超时需要按全局减速因子放大。
//! - **契约 (What)**：
//!   - [`init_tracing`] 在进程内只生效一次；外部已安装订阅器时静默让位；
//!   - 追踪开关使用计数语义，`TracerGuard` 析构即撤销本次打开；
//!   - `slowdown_factor()` 在存在活跃 [`SlowdownGuard`] 时返回 2，否则为 1。

use std::sync::{
    OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::E2eConfig;

static SUBSCRIBER_INSTALLED: OnceLock<bool> = OnceLock::new();

/// 安装 `fmt + EnvFilter` 订阅器，输出走 libtest 的捕获通道。
///
/// 返回值表示订阅器是否由本函数安装；若其它组件已先设置全局订阅器则返回 `false`。
pub fn init_tracing(config: &E2eConfig) -> bool {
    *SUBSCRIBER_INSTALLED.get_or_init(|| {
        let filter = EnvFilter::try_new(&config.log_filter)
            .unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init()
            .is_ok()
    })
}

/// 具名追踪开关。
pub mod tracers {
    use std::collections::BTreeMap;

    use parking_lot::Mutex;

    /// 可被打开的追踪器名称；`all` 覆盖其余全部。
    pub const KNOWN: &[&str] = &["http", "tcp", "handshake", "proxy", "all"];

    static ENABLED: Mutex<BTreeMap<&'static str, usize>> = Mutex::new(BTreeMap::new());

    /// 打开一次追踪器；名称未知时返回 `None`。
    pub fn set_enabled(name: &str) -> Option<TracerGuard> {
        let name = KNOWN.iter().copied().find(|known| *known == name)?;
        *ENABLED.lock().entry(name).or_insert(0) += 1;
        tracing::debug!(tracer = name, "tracer enabled");
        Some(TracerGuard { name })
    }

    pub fn is_enabled(name: &str) -> bool {
        let enabled = ENABLED.lock();
        let count = |key: &str| enabled.get(key).copied().unwrap_or(0);
        count(name) > 0 || (KNOWN.contains(&name) && count("all") > 0)
    }

    /// 一次打开的凭据，析构时撤销。
    #[derive(Debug)]
    #[must_use = "dropping the guard disables the tracer again"]
    pub struct TracerGuard {
        name: &'static str,
    }

    impl TracerGuard {
        pub fn name(&self) -> &'static str {
            self.name
        }
    }

    impl Drop for TracerGuard {
        fn drop(&mut self) {
            let mut enabled = ENABLED.lock();
            if let Some(count) = enabled.get_mut(self.name) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    enabled.remove(self.name);
                }
            }
            tracing::debug!(tracer = self.name, "tracer guard released");
        }
    }
}

static SLOW_FIXTURES: AtomicUsize = AtomicUsize::new(0);

/// 当前超时放大倍数。
pub fn slowdown_factor() -> u32 {
    if SLOW_FIXTURES.load(Ordering::Acquire) > 0 {
        2
    } else {
        1
    }
}

/// 慢速夹具存活期间持有的凭据。
#[derive(Debug)]
pub struct SlowdownGuard {
    _private: (),
}

impl SlowdownGuard {
    pub fn acquire() -> Self {
        SLOW_FIXTURES.fetch_add(1, Ordering::AcqRel);
        Self { _private: () }
    }
}

impl Drop for SlowdownGuard {
    fn drop(&mut self) {
        SLOW_FIXTURES.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use parking_lot::Mutex;

    use super::{SlowdownGuard, slowdown_factor, tracers};

    /// 追踪开关是进程级状态，断言“已关闭”的用例需要串行。
    pub(crate) static TRACER_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn tracer_guards_nest() {
        let _serial = TRACER_LOCK.lock();
        assert!(tracers::set_enabled("no-such-tracer").is_none());
        let outer = tracers::set_enabled("handshake").expect("known tracer");
        let inner = tracers::set_enabled("handshake").expect("known tracer");
        assert!(tracers::is_enabled("handshake"));
        drop(inner);
        assert!(tracers::is_enabled("handshake"));
        drop(outer);
        assert!(!tracers::is_enabled("handshake"));
    }

    #[test]
    fn all_covers_known_tracers_only() {
        let _serial = TRACER_LOCK.lock();
        let guard = tracers::set_enabled("all").expect("known tracer");
        assert!(tracers::is_enabled("proxy"));
        assert!(!tracers::is_enabled("bogus"));
        drop(guard);
        assert!(!tracers::is_enabled("proxy"));
    }

    #[test]
    fn slowdown_is_raised_while_guard_alive() {
        let guard = SlowdownGuard::acquire();
        assert_eq!(slowdown_factor(), 2);
        drop(guard);
    }
}
