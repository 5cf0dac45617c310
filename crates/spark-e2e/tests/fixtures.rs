//! 夹具往返用例：每种变体都要能在服务端与客户端之间回显一段载荷。

use anyhow::{Context, Result};
use spark_e2e::{
    ChannelArgs, Completion, CompletionSink, Fixture, FixtureError, Registry,
    args::keys,
    fixture::{
        fullstack::{FullstackFixture, presets},
        no_pre_start,
        secure::TlsSettings,
    },
    handle::probe,
    tls::{CertificateProvider, TlsVersion, VerifierType},
};

async fn echo_with(
    fixture: &mut dyn Fixture,
    client_args: &ChannelArgs,
    server_args: &ChannelArgs,
    payload: &[u8],
) -> Result<Vec<u8>, FixtureError> {
    let sink = CompletionSink::new();
    let mut server = fixture.make_server(server_args, &sink, &mut no_pre_start)?;
    let mut client = fixture.make_client(client_args, &sink)?;
    probe::round_trip(&mut server, &mut client, payload).await
}

async fn echo_named(name: &str) -> Result<()> {
    let config = Registry::global()
        .named(name)
        .with_context(|| format!("{name} is not registered on this platform"))?;
    let args = ChannelArgs::new();
    let mut fixture = match config.create_fixture(&args, &args) {
        Err(err) if err.is_unsupported() => return Ok(()),
        other => other.with_context(|| format!("create {name}"))?,
    };
    let payload = format!("ping {name}");
    let echoed = echo_with(fixture.as_mut(), &args, &args, payload.as_bytes())
        .await
        .with_context(|| format!("round trip over {name}"))?;
    assert_eq!(echoed, payload.as_bytes());
    Ok(())
}

#[tokio::test]
async fn inproc_variants_echo() -> Result<()> {
    echo_named("Inproc").await?;
    echo_named("InprocWithPromises").await
}

#[tokio::test]
async fn tcp_fullstack_variants_echo() -> Result<()> {
    for name in [
        "Chttp2Fullstack",
        "Chttp2FullstackCompression",
        "Chttp2FullstackNoRetry",
        "Chttp2FullstackWithCensus",
        "Chttp2FullstackWithTrace",
        "Chttp2FakeSecurityFullstack",
        "Chttp2InsecureCredentials",
        "Chttp2FullstackLocalIpv4",
        "Chttp2FullstackLocalIpv6",
    ] {
        echo_named(name).await?;
    }
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn unix_socket_variants_echo() -> Result<()> {
    for name in [
        "Chttp2FullstackUds",
        "Chttp2FullstackLocalUds",
        "Chttp2FullstackLocalUdsPercentEncoded",
        "Chttp2Fd",
        "Chttp2SocketPair",
        "Chttp2SocketPairMinstack",
        "Chttp2SocketPairWithTrace",
    ] {
        echo_named(name).await?;
    }
    Ok(())
}

#[cfg(any(target_os = "linux", target_os = "android"))]
#[tokio::test]
async fn abstract_socket_variants_echo() -> Result<()> {
    echo_named("Chttp2FullstackUdsAbstractNamespace").await?;
    echo_named("Chttp2FullstackLocalAbstractUdsPercentEncoded").await
}

#[cfg(unix)]
#[tokio::test]
async fn one_byte_socket_pair_slows_the_process_down() -> Result<()> {
    use spark_e2e::observability::slowdown_factor;

    let config = Registry::global()
        .named("Chttp2SocketPair1ByteAtATime")
        .context("registered on unix")?;
    let args = ChannelArgs::new();
    let mut fixture = config.create_fixture(&args, &args)?;
    assert_eq!(slowdown_factor(), 2);
    let echoed = echo_with(fixture.as_mut(), &args, &args, b"one byte at a time").await?;
    assert_eq!(echoed, b"one byte at a time");
    drop(fixture);
    assert_eq!(slowdown_factor(), 1);
    Ok(())
}

#[tokio::test]
async fn chaotic_good_variants_echo() -> Result<()> {
    for name in [
        "ChaoticGoodFullStack",
        "ChaoticGoodManyConnections",
        "ChaoticGoodSingleConnection",
        "ChaoticGoodOneByteChunk",
    ] {
        echo_named(name).await?;
    }
    Ok(())
}

#[tokio::test]
async fn tls_variants_echo() -> Result<()> {
    for name in [
        "Chttp2SimpleSslFullstack",
        "Chttp2StaticProviderAsyncVerifierTls13",
        "Chttp2CertWatcherProviderAsyncVerifierTls13",
        "Chttp2CertWatcherProviderSyncVerifierTls12",
        "Chttp2SimplSslFullstackTls12",
        "Chttp2SimplSslFullstackTls13",
        "Chttp2SimpleSslWithOauth2FullstackTls12",
        "Chttp2SimpleSslWithOauth2FullstackTls13",
        "Chttp2SslCredReloadTls12",
        "Chttp2SslCredReloadTls13",
    ] {
        echo_named(name).await?;
    }
    Ok(())
}

#[tokio::test]
async fn relay_proxies_echo() -> Result<()> {
    echo_named("Chttp2FullstackWithProxy").await?;
    echo_named("Chttp2SslProxy").await
}

#[tokio::test]
async fn http_proxy_forwards_authenticated_tunnel() -> Result<()> {
    let config = Registry::global()
        .named("Chttp2HttpProxy")
        .context("http proxy registered")?;
    let client_args = ChannelArgs::new().set(keys::HTTP_PROXY_AUTH_CREDS, "aladdin:opensesame");
    let server_args = ChannelArgs::new();
    let mut fixture = config.create_fixture(&client_args, &server_args)?;
    let echoed = echo_with(fixture.as_mut(), &client_args, &server_args, b"tunnel").await?;
    assert_eq!(echoed, b"tunnel");
    Ok(())
}

#[tokio::test]
async fn file_watcher_reloads_after_rotation() -> Result<()> {
    let mut fixture = FullstackFixture::tls(TlsSettings {
        version: TlsVersion::V13,
        certificates: CertificateProvider::FileWatcher,
        verifier: VerifierType::Hostname,
    })?;
    let watcher = fixture
        .tls_material()
        .and_then(|material| material.watcher())
        .context("file watcher material")?;
    assert_eq!(watcher.reloads(), 0);
    watcher.touch()?;

    let args = ChannelArgs::new();
    let echoed = echo_with(&mut fixture, &args, &args, b"rotated").await?;
    assert_eq!(echoed, b"rotated");

    let reloads = fixture
        .tls_material()
        .and_then(|material| material.watcher())
        .map(|watcher| watcher.reloads());
    assert_eq!(reloads, Some(1));
    Ok(())
}

#[tokio::test]
async fn insecure_credentials_fail_auth_on_request() -> Result<()> {
    let mut fixture = presets::insecure_credentials()?;
    let sink = CompletionSink::new();
    let server_args = ChannelArgs::new().set(keys::FAIL_AUTH_CHECK, true);
    let mut server = fixture.make_server(&server_args, &sink, &mut no_pre_start)?;
    let mut client = fixture.make_client(&ChannelArgs::new(), &sink)?;
    let err = probe::round_trip(&mut server, &mut client, b"denied")
        .await
        .expect_err("server rejects every peer");
    assert!(matches!(err, FixtureError::Unauthenticated { .. }), "{err}");
    assert!(
        sink.drain()
            .iter()
            .any(|event| matches!(event, Completion::AcceptFailed { .. }))
    );
    Ok(())
}

#[tokio::test]
async fn fullstack_without_auth_check_ignores_fail_flag() -> Result<()> {
    let mut fixture = FullstackFixture::insecure()?;
    let server_args = ChannelArgs::new().set(keys::FAIL_AUTH_CHECK, true);
    let echoed = echo_with(&mut fixture, &ChannelArgs::new(), &server_args, b"open").await?;
    assert_eq!(echoed, b"open");
    Ok(())
}
