//! 配置查询：按特性位与名称模式从注册表中筛选配置。
//!
//! # 教案式说明
//! - **意图 (Why)**：每个测试套件用一条声明式查询描述“我能在哪些链路上运行”，
//!   而不是手工维护配置名单。
//! - **契约 (What)**：配置被选中当且仅当
//!   1. 掩码包含全部强制位；
//!   2. 掩码不含任何排除位；
//!   3. 未给出允许模式，或至少一个允许模式完整匹配名称；
//!   4. 没有任何拒绝模式完整匹配名称（拒绝优先）。
//!
//!   结果保持注册表顺序，即按名称升序；强制位与排除位重叠是合法的，结果为空。
//! - **实现 (How)**：模式在构造阶段编译为 `^(?:p)$`，`run` 只做位运算和正则匹配，不分配除结果向量以外的内存。

use regex::Regex;

use crate::{
    config::{E2eConfig, ExecutionMode},
    error::QueryError,
    feature::FeatureMask,
    registry::{Configuration, Registry},
};

#[derive(Clone, Debug)]
pub struct ConfigQuery {
    enforce: FeatureMask,
    exclude: FeatureMask,
    allowed_names: Vec<Regex>,
    excluded_names: Vec<Regex>,
}

impl ConfigQuery {
    /// 以进程环境构造查询。
    pub fn new(mode: ExecutionMode) -> Self {
        Self::with_config(mode, &E2eConfig::from_env())
    }

    /// 以显式配置构造查询；执行模式和实验标记决定初始排除位。
    pub fn with_config(mode: ExecutionMode, config: &E2eConfig) -> Self {
        let mut exclude = mode.seed_exclusions();
        if config.ci_experiments {
            exclude |= FeatureMask::EXCLUDE_FROM_EXPERIMENT_RUNS;
        }
        Self {
            enforce: FeatureMask::empty(),
            exclude,
            allowed_names: Vec::new(),
            excluded_names: Vec::new(),
        }
    }

    #[must_use]
    pub fn enforce_features(mut self, features: FeatureMask) -> Self {
        self.enforce |= features;
        self
    }

    #[must_use]
    pub fn exclude_features(mut self, features: FeatureMask) -> Self {
        self.exclude |= features;
        self
    }

    pub fn allow_name(mut self, pattern: &str) -> Result<Self, QueryError> {
        self.allowed_names.push(full_match(pattern)?);
        Ok(self)
    }

    pub fn exclude_name(mut self, pattern: &str) -> Result<Self, QueryError> {
        self.excluded_names.push(full_match(pattern)?);
        Ok(self)
    }

    pub fn enforced(&self) -> FeatureMask {
        self.enforce
    }

    pub fn excluded(&self) -> FeatureMask {
        self.exclude
    }

    pub fn matches(&self, config: &Configuration) -> bool {
        let mask = config.feature_mask();
        if !mask.contains(self.enforce) || mask.intersects(self.exclude) {
            return false;
        }
        let name = config.name();
        if !self.allowed_names.is_empty() && !self.allowed_names.iter().any(|re| re.is_match(name)) {
            return false;
        }
        !self.excluded_names.iter().any(|re| re.is_match(name))
    }

    /// 执行查询，返回借用自注册表的配置，顺序与注册表一致。
    pub fn run<'r>(&self, registry: &'r Registry) -> Vec<&'r Configuration> {
        registry.iter().filter(|config| self.matches(config)).collect()
    }
}

fn full_match(pattern: &str) -> Result<Regex, QueryError> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|source| QueryError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::ConfigQuery;
    use crate::{
        config::{E2eConfig, ExecutionMode},
        error::QueryError,
        feature::FeatureMask,
    };

    fn query(mode: ExecutionMode) -> ConfigQuery {
        ConfigQuery::with_config(mode, &E2eConfig::default())
    }

    #[test]
    fn mode_and_experiments_seed_exclusions() {
        assert_eq!(query(ExecutionMode::Fuzzing).excluded(), FeatureMask::DO_NOT_FUZZ);
        assert_eq!(query(ExecutionMode::Interactive).excluded(), FeatureMask::DO_NOT_GTEST);

        let ci = E2eConfig {
            ci_experiments: true,
            ..E2eConfig::default()
        };
        assert_eq!(
            ConfigQuery::with_config(ExecutionMode::Interactive, &ci).excluded(),
            FeatureMask::DO_NOT_GTEST | FeatureMask::EXCLUDE_FROM_EXPERIMENT_RUNS
        );
    }

    #[test]
    fn feature_setters_accumulate() {
        let q = query(ExecutionMode::Interactive)
            .enforce_features(FeatureMask::IS_HTTP2)
            .enforce_features(FeatureMask::IS_SECURE)
            .exclude_features(FeatureMask::IS_MINSTACK);
        assert_eq!(q.enforced(), FeatureMask::IS_HTTP2 | FeatureMask::IS_SECURE);
        assert!(q.excluded().contains(FeatureMask::IS_MINSTACK | FeatureMask::DO_NOT_GTEST));
    }

    #[test]
    fn invalid_pattern_is_reported() {
        let err = query(ExecutionMode::Interactive)
            .allow_name("Chttp2(")
            .expect_err("unbalanced group");
        let QueryError::InvalidPattern { pattern, .. } = err;
        assert_eq!(pattern, "Chttp2(");
    }
}
