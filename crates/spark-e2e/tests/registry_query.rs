//! 注册表与查询引擎的性质用例。

use proptest::prelude::*;
use spark_e2e::{
    ConfigQuery, Configuration, E2eConfig, ExecutionMode, FeatureMask, Registry,
    fixture::{factory, inproc::InprocFixture},
};

fn config(name: &str, mask: FeatureMask) -> Configuration {
    Configuration::new(name, mask, factory(|_, _| Ok(InprocFixture::new(false))))
}

fn query() -> ConfigQuery {
    ConfigQuery::with_config(ExecutionMode::Interactive, &E2eConfig::default())
}

fn names<'r>(selected: &[&'r Configuration]) -> Vec<&'r str> {
    selected.iter().map(|&config| config.name()).collect()
}

fn abc() -> Registry {
    Registry::new(vec![
        config("C", FeatureMask::empty()),
        config("B", FeatureMask::IS_HTTP2 | FeatureMask::IS_SECURE),
        config("A", FeatureMask::IS_HTTP2),
    ])
    .expect("valid registry")
}

#[test]
fn default_registry_is_reachable_sorted_and_unique() {
    let registry = Registry::global();
    assert!(!registry.is_empty());
    for config in registry {
        assert!(
            !config.feature_mask().is_unreachable(),
            "{} can never be selected",
            config.name()
        );
    }
    let names: Vec<&str> = registry.names().collect();
    assert!(
        names.windows(2).all(|pair| pair[0] < pair[1]),
        "registry must be strictly ascending: {names:?}"
    );
}

#[test]
fn named_lookup_finds_registered_configurations() {
    let registry = Registry::global();
    let proxy = registry.named("Chttp2SslProxy").expect("ssl proxy is registered");
    assert!(proxy.feature_mask().contains(FeatureMask::IS_SECURE));
    assert_eq!(proxy.overridden_call_host(), Some(spark_e2e::tls::TLS_HOST_OVERRIDE));
    assert!(registry.named("Chttp2PipeWakeup").is_none());
}

#[test]
fn abc_scenario() {
    let registry = abc();
    assert_eq!(
        names(&query().enforce_features(FeatureMask::IS_HTTP2).run(&registry)),
        ["A", "B"]
    );
    assert_eq!(
        names(
            &query()
                .enforce_features(FeatureMask::IS_HTTP2)
                .exclude_features(FeatureMask::IS_SECURE)
                .run(&registry)
        ),
        ["A"]
    );
    assert_eq!(
        names(&query().allow_name("B").expect("pattern").run(&registry)),
        ["B"]
    );
    assert_eq!(
        names(
            &query()
                .allow_name("A|B")
                .and_then(|q| q.exclude_name("B"))
                .expect("patterns")
                .run(&registry)
        ),
        ["A"]
    );
}

#[test]
fn patterns_match_whole_names() {
    let registry = Registry::new(vec![
        config("Chttp2HttpProxy", FeatureMask::IS_HTTP2),
        config("Chttp2HttpProxyExtra", FeatureMask::IS_HTTP2),
    ])
    .expect("valid registry");
    let selected = query().allow_name("Chttp2HttpProxy").expect("pattern").run(&registry);
    assert_eq!(names(&selected), ["Chttp2HttpProxy"]);
}

#[test]
fn overlapping_enforce_and_exclude_selects_nothing() {
    let registry = abc();
    let selected = query()
        .enforce_features(FeatureMask::IS_HTTP2)
        .exclude_features(FeatureMask::IS_HTTP2)
        .run(&registry);
    assert!(selected.is_empty());
}

#[test]
fn experiment_runs_exclude_marked_configurations() {
    let registry = Registry::new(vec![
        config("Kept", FeatureMask::IS_HTTP2),
        config("Marked", FeatureMask::EXCLUDE_FROM_EXPERIMENT_RUNS),
    ])
    .expect("valid registry");
    let ci = E2eConfig {
        ci_experiments: true,
        ..E2eConfig::default()
    };
    let selected = ConfigQuery::with_config(ExecutionMode::Fuzzing, &ci).run(&registry);
    assert_eq!(names(&selected), ["Kept"]);
    assert_eq!(query().run(&registry).len(), 2);
}

#[test]
fn mode_exclusions_hide_configurations() {
    let registry = Registry::new(vec![
        config("FuzzOnly", FeatureMask::DO_NOT_GTEST),
        config("GtestOnly", FeatureMask::DO_NOT_FUZZ),
    ])
    .expect("valid registry");
    let fuzzing = ConfigQuery::with_config(ExecutionMode::Fuzzing, &E2eConfig::default());
    assert_eq!(names(&fuzzing.run(&registry)), ["FuzzOnly"]);
    assert_eq!(names(&query().run(&registry)), ["GtestOnly"]);
}

fn mask_strategy() -> impl Strategy<Value = FeatureMask> {
    any::<u32>().prop_map(|bits| {
        let mask = FeatureMask::from_bits_truncate(bits);
        if mask.is_unreachable() {
            mask - FeatureMask::DO_NOT_GTEST
        } else {
            mask
        }
    })
}

fn registry_strategy() -> impl Strategy<Value = Registry> {
    prop::collection::vec(mask_strategy(), 0..24).prop_map(|masks| {
        let configs = masks
            .into_iter()
            .enumerate()
            .map(|(index, mask)| config(&format!("Config{index:02}"), mask))
            .collect();
        Registry::new(configs).expect("generated registry is valid")
    })
}

proptest! {
    #[test]
    fn enforce_union_is_intersection_of_results(
        registry in registry_strategy(),
        f1 in mask_strategy(),
        f2 in mask_strategy(),
    ) {
        let both = names(&query().enforce_features(f1 | f2).run(&registry));
        let first = names(&query().enforce_features(f1).run(&registry));
        let second = names(&query().enforce_features(f2).run(&registry));
        let intersection: Vec<&str> = first
            .iter()
            .copied()
            .filter(|name| second.contains(name))
            .collect();
        prop_assert_eq!(both, intersection);
    }

    #[test]
    fn deny_wins_and_runs_are_idempotent(
        registry in registry_strategy(),
        allow in prop::sample::select(vec!["Config.*", "Config0[0-9]|Config1[0-9]", "Config1.", "Config0[3-7]"]),
        deny in prop::sample::select(vec!["Config0[0-4]", "Config2.", "Config1[05]", "Config0[5-9]|Config13"]),
    ) {
        let q = query()
            .allow_name(&allow)
            .and_then(|q| q.exclude_name(&deny))
            .expect("generated patterns compile");
        let allow_re = regex::Regex::new(&format!("^(?:{allow})$")).expect("allow");
        let deny_re = regex::Regex::new(&format!("^(?:{deny})$")).expect("deny");

        let first = names(&q.run(&registry));
        for name in &first {
            prop_assert!(allow_re.is_match(name));
            prop_assert!(!deny_re.is_match(name));
        }
        prop_assert_eq!(first, names(&q.run(&registry)));
    }
}
