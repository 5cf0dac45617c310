//! 引擎级配置：执行模式、实验标记、临时目录与日志过滤器。
//!
//! # 教案式说明
//! - **意图 (Why)**：查询引擎需要知道“当前是否处于实验运行”，夹具需要知道 UNIX 套接字文件放在哪里；
//!   这些环境输入集中在 [`E2eConfig`]，测试可以注入，而不必修改进程环境变量。
//! - **契约 (What)**：加载顺序为 默认值 ← `SPARK_E2E_CONFIG` 指向的 TOML 文件 ← 环境变量；
//!   `SPARK_CI_EXPERIMENTS` 只看是否存在，不看取值。
//! - **实现 (How)**：`serde` 反序列化 + `#[serde(default)]`，环境覆盖在 [`E2eConfig::apply_env`] 中完成。

use std::{
    env,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{error::ConfigError, feature::FeatureMask};

/// 指向 TOML 配置文件的环境变量。
pub const CONFIG_PATH_ENV: &str = "SPARK_E2E_CONFIG";
/// 实验运行标记，存在即生效。
pub const CI_EXPERIMENTS_ENV: &str = "SPARK_CI_EXPERIMENTS";
pub const TEMP_DIR_ENV: &str = "SPARK_E2E_TEMP_DIR";
pub const LOG_ENV: &str = "SPARK_E2E_LOG";

const DEFAULT_LOG_FILTER: &str = "warn";
const DEFAULT_TCP_HOST: &str = "localhost";

/// 夹具引擎配置。
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct E2eConfig {
    /// 是否处于实验运行，会额外排除 `EXCLUDE_FROM_EXPERIMENT_RUNS`。
    pub ci_experiments: bool,
    /// UNIX 套接字文件所在目录。
    pub uds_temp_dir: PathBuf,
    /// `tracing-subscriber` 的 `EnvFilter` 指令。
    pub log_filter: String,
    /// TCP fullstack 夹具的客户端目标主机名。
    pub tcp_host: String,
}

impl Default for E2eConfig {
    fn default() -> Self {
        Self {
            ci_experiments: false,
            uds_temp_dir: default_temp_dir(),
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            tcp_host: DEFAULT_TCP_HOST.to_string(),
        }
    }
}

fn default_temp_dir() -> PathBuf {
    if cfg!(unix) {
        PathBuf::from("/tmp")
    } else {
        env::temp_dir()
    }
}

impl E2eConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 默认值叠加环境变量，不读取文件；查询引擎在热路径上使用该形式。
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// 完整加载：默认值 ← 配置文件 ← 环境变量。
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::from_path(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if env::var_os(CI_EXPERIMENTS_ENV).is_some() {
            self.ci_experiments = true;
        }
        if let Some(dir) = env::var_os(TEMP_DIR_ENV) {
            self.uds_temp_dir = PathBuf::from(dir);
        }
        if let Ok(filter) = env::var(LOG_ENV) {
            self.log_filter = filter;
        }
    }
}

/// 测试执行模式。
///
/// # 教案式说明
/// - **意图 (Why)**：同一份配置矩阵同时服务于模糊测试与交互式单元测试，两者各自需要排除一部分夹具。
/// - **契约 (What)**：枚举封闭，[`ExecutionMode::seed_exclusions`] 为穷尽匹配；
///   新增模式必须显式选择它的排除位，否则无法通过编译。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    Fuzzing,
    Interactive,
}

impl ExecutionMode {
    /// 查询在该模式下默认排除的特性位。
    pub fn seed_exclusions(self) -> FeatureMask {
        match self {
            ExecutionMode::Fuzzing => FeatureMask::DO_NOT_FUZZ,
            ExecutionMode::Interactive => FeatureMask::DO_NOT_GTEST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{E2eConfig, ExecutionMode};
    use crate::{error::ConfigError, feature::FeatureMask};

    #[test]
    fn toml_overrides_defaults() {
        let config = E2eConfig::from_toml_str(
            r#"
            ci_experiments = true
            uds_temp_dir = "/var/tmp/spark"
            "#,
        )
        .expect("valid toml");
        assert!(config.ci_experiments);
        assert_eq!(config.uds_temp_dir.to_str(), Some("/var/tmp/spark"));
        assert_eq!(config.log_filter, "warn");
        assert_eq!(config.tcp_host, "localhost");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = E2eConfig::from_toml_str("no_such_field = 1").expect_err("unknown field");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_reports_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("absent.toml");
        let err = E2eConfig::from_path(&path).expect_err("missing file");
        match err {
            ConfigError::Read { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn modes_seed_distinct_exclusions() {
        assert_eq!(
            ExecutionMode::Fuzzing.seed_exclusions(),
            FeatureMask::DO_NOT_FUZZ
        );
        assert_eq!(
            ExecutionMode::Interactive.seed_exclusions(),
            FeatureMask::DO_NOT_GTEST
        );
    }
}
