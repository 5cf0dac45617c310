//! `#[spark_e2e]` 宏展开：每个声明的套件成为一个独立的 `#[test]`。

use spark_e2e::{
    Configuration, Fixture, FixtureError, spark_e2e,
    suite::{CONNECTIVITY, E2eCase},
};

fn mutations_are_pure(_: &Configuration, fixture: Box<dyn Fixture>) -> Result<(), FixtureError> {
    let args = spark_e2e::ChannelArgs::new();
    assert_eq!(
        fixture.mutate_client_args(args.clone()),
        fixture.mutate_client_args(args.clone())
    );
    assert_eq!(
        fixture.mutate_server_args(args.clone()),
        fixture.mutate_server_args(args)
    );
    Ok(())
}

#[spark_e2e(suites(ProxyAuthTests, SecureEnd2endTests, CoreDeadlineSingleHopTests))]
mod e2e {
    use super::{CONNECTIVITY, E2eCase, mutations_are_pure};

    pub const CASES: &[E2eCase] = &[
        CONNECTIVITY,
        E2eCase::new("mutations_are_pure", mutations_are_pure),
    ];
}

