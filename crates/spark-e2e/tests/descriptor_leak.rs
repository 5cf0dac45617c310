//! 反复构造、使用并销毁夹具之后，进程持有的文件描述符数量回到基线。
//!
//! 独立成一个测试二进制，避免其它并行用例干扰 `/proc/self/fd` 计数。

#![cfg(any(target_os = "linux", target_os = "android"))]

use std::fs;

use anyhow::{Context, Result};
use spark_e2e::{
    ChannelArgs, CompletionSink, Registry, fixture::no_pre_start, handle::probe,
};

const CYCLES: usize = 1000;

const ROTATION: &[&str] = &[
    "Chttp2Fullstack",
    "Chttp2FullstackUds",
    "Chttp2FullstackUdsAbstractNamespace",
    "Chttp2SocketPair",
    "Chttp2Fd",
    "Inproc",
    "Chttp2FullstackWithProxy",
    "ChaoticGoodFullStack",
];

fn open_descriptors() -> Result<usize> {
    Ok(fs::read_dir("/proc/self/fd")
        .context("list /proc/self/fd")?
        .count())
}

fn cycle(runtime: &tokio::runtime::Runtime, name: &str) -> Result<()> {
    let config = Registry::global()
        .named(name)
        .with_context(|| format!("{name} registered"))?;
    let args = ChannelArgs::new();
    let mut fixture = config.create_fixture(&args, &args)?;
    let sink = CompletionSink::new();
    let mut server = fixture.make_server(&args, &sink, &mut no_pre_start)?;
    let mut client = fixture.make_client(&args, &sink)?;
    let echoed = runtime.block_on(probe::round_trip(&mut server, &mut client, b"leak check"))?;
    assert_eq!(echoed, b"leak check");
    drop(client);
    drop(server);
    drop(fixture);
    Ok(())
}

#[test]
fn fixtures_release_every_descriptor() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build runtime")?;

    // 预热：进程级惰性资源（测试 PKI、IPv6 探测、唯一名称生成器）不计入泄漏。
    for name in ROTATION {
        cycle(&runtime, name)?;
    }
    let baseline = open_descriptors()?;

    for (index, name) in ROTATION.iter().cycle().take(CYCLES).enumerate() {
        cycle(&runtime, name).with_context(|| format!("cycle {index} over {name}"))?;
    }

    let after = open_descriptors()?;
    assert_eq!(
        after, baseline,
        "descriptor count drifted from {baseline} to {after} over {CYCLES} cycles"
    );
    Ok(())
}
