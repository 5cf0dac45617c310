//! 进程级唯一名称：为 UNIX 套接字路径与抽象命名空间地址生成不冲突的名字。
//!
//! # 教案式说明
//! - **意图 (Why)**：同一台机器上可能并行运行多个测试进程，每个进程内又有多个线程同时构造夹具；
//!   名称冲突会表现为偶发的 `EADDRINUSE`，极难排查，因此在结构上消除冲突而不是依赖重试。
//! - **契约 (What)**：名称由 进程号 + 时间戳（秒、纳秒）+ 进程级原子计数器 + 一次新的随机数 组成；
//!   同一进程内计数器保证两两不同，随机数与进程号负责跨进程区分。
//! - **实现 (How)**：随机源为 `parking_lot::Mutex<StdRng>`，计数器为 `AtomicU64` 并以随机值作为起点，
//!   避免不同进程从 0 开始撞在同一序列上。
//! - **风险提示 (Trade-offs)**：UNIX 套接字路径受 `sun_path` 长度限制（约 108 字节），
//!   临时目录过长时绑定会失败并返回 [`FixtureError::Bind`](crate::error::FixtureError::Bind)。

use std::{
    path::Path,
    process,
    sync::{
        OnceLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use parking_lot::Mutex;
use rand::{Rng, SeedableRng, rngs::StdRng};

const PREFIX: &str = "spark_fullstack_test";

/// 时间戳来源。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Clock {
    /// 墙上时钟，自 UNIX 纪元起。
    Realtime,
    /// 单调时钟，自本进程首次取名起。
    Monotonic,
}

/// 唯一名称生成器。
#[derive(Debug)]
pub struct UniqueNames {
    rng: Mutex<StdRng>,
    counter: AtomicU64,
    epoch: Instant,
}

impl Default for UniqueNames {
    fn default() -> Self {
        Self::new()
    }
}

impl UniqueNames {
    pub fn new() -> Self {
        let mut rng = StdRng::from_entropy();
        let start = rng.r#gen::<u64>();
        Self {
            rng: Mutex::new(rng),
            counter: AtomicU64::new(start),
            epoch: Instant::now(),
        }
    }

    /// 抽取一个新的 64 位随机数。
    pub fn rand(&self) -> u64 {
        self.rng.lock().r#gen()
    }

    /// 取下一个计数值；计数器回绕后继续递增。
    pub fn next_counter(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    fn now(&self, clock: Clock) -> Duration {
        match clock {
            Clock::Realtime => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default(),
            Clock::Monotonic => self.epoch.elapsed(),
        }
    }

    fn stem(&self, clock: Clock, with_rand: bool) -> String {
        let now = self.now(clock);
        let mut stem = format!(
            "{}.{}.{}.{}",
            process::id(),
            now.as_secs(),
            now.subsec_nanos(),
            self.next_counter()
        );
        if with_rand {
            stem.push('.');
            stem.push_str(&self.rand().to_string());
        }
        stem
    }

    /// `unix:<dir>/spark_fullstack_test.<pid>.<secs>.<nanos>.<counter>.<rand>`
    pub fn uds_uri(&self, dir: &Path) -> String {
        format!(
            "unix:{}",
            dir.join(format!("{PREFIX}.{}", self.stem(Clock::Realtime, true)))
                .display()
        )
    }

    /// 带 `%25` 转义段的 UNIX 路径；解码后文件名中含有字面量 `%`。
    pub fn uds_uri_percent_encoded(&self, dir: &Path) -> String {
        format!(
            "unix:{}",
            dir.join(format!("{PREFIX}.%25.{}", self.stem(Clock::Monotonic, true)))
                .display()
        )
    }

    /// `unix-abstract:spark_fullstack_test.<pid>.<secs>.<nanos>.<counter>`
    pub fn abstract_uri(&self) -> String {
        format!("unix-abstract:{PREFIX}.{}", self.stem(Clock::Realtime, false))
    }

    /// 带 `%00` 转义段的抽象地址；解码后名称中含有 NUL 字节。
    pub fn abstract_uri_percent_encoded(&self) -> String {
        format!(
            "unix-abstract:{PREFIX}.%00.{}",
            self.stem(Clock::Monotonic, true)
        )
    }
}

/// 进程级共享实例。
pub fn global() -> &'static UniqueNames {
    static NAMES: OnceLock<UniqueNames> = OnceLock::new();
    NAMES.get_or_init(UniqueNames::new)
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, path::Path};

    use super::UniqueNames;

    #[test]
    fn counter_advances() {
        let names = UniqueNames::new();
        let first = names.next_counter();
        assert_eq!(names.next_counter(), first.wrapping_add(1));
    }

    #[test]
    fn uris_carry_expected_shape() {
        let names = UniqueNames::new();
        let uds = names.uds_uri(Path::new("/tmp"));
        assert!(uds.starts_with("unix:/tmp/spark_fullstack_test."), "{uds}");
        assert_eq!(uds.matches('.').count(), 5);

        let encoded = names.uds_uri_percent_encoded(Path::new("/tmp"));
        assert!(encoded.contains(".%25."), "{encoded}");

        let abstract_name = names.abstract_uri();
        assert!(abstract_name.starts_with("unix-abstract:spark_fullstack_test."));
        assert_eq!(abstract_name.matches('.').count(), 4);
        assert!(names.abstract_uri_percent_encoded().contains(".%00."));
    }

    #[test]
    fn names_do_not_repeat() {
        let names = UniqueNames::new();
        let generated: HashSet<_> = (0..256).map(|_| names.uds_uri(Path::new("/tmp"))).collect();
        assert_eq!(generated.len(), 256);
    }
}
