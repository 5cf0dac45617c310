//! TLS 夹具材料：测试 PKI、服务端证书提供者、客户端校验器与协议版本。
//!
//! # 教案式说明
//! - **意图 (Why)**：安全夹具需要覆盖“证书从哪里来 × 谁来校验 × 哪个协议版本”的组合矩阵，
//!   同时不能依赖仓库外分发的证书文件；因此在进程内用 `rcgen` 生成一次测试 CA 与服务端证书。
//! - **契约 (What)**：
//!   - 服务端证书的 SAN 为 [`TLS_HOST_OVERRIDE`] 与 `localhost`，客户端必须以前者作为 SNI/校验名；
//!   - [`CertificateProvider::FileWatcher`] 在文件修改时间变化后的下一次握手生效，
//!     重载失败时保留旧证书并记录告警；
//!   - [`CertificateProvider::OnDemand`] 在每次握手时回调取证，回调可以回答“未变化”；
//!   - 外部校验器对证书链执行 WebPKI 校验，但以自身策略中的主机名为准，异步变体在独立线程上完成校验；
//!   - 所有配置显式使用 AWS-LC 提供者，不依赖进程级默认提供者的安装顺序。
//! - **实现 (How)**：解析器以 `ArcSwap<CertifiedKey>` 承载当前证书，读路径无锁，重载时整体替换。

use std::{
    fmt, fs,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
        mpsc,
    },
    thread,
    time::{Duration, SystemTime},
};

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, ServerConfig, SignatureScheme,
    SupportedProtocolVersion,
    client::{
        WebPkiServerVerifier,
        danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
    },
    crypto::{CryptoProvider, aws_lc_rs},
    server::{ClientHello, ResolvesServerCert},
    sign::CertifiedKey,
};
use rustls_pki_types::{
    CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName, UnixTime, pem::PemObject,
};
use tempfile::TempDir;

use crate::error::FixtureError;

/// 测试服务端证书覆盖的主机名，客户端以它作为校验名。
pub const TLS_HOST_OVERRIDE: &str = "foo.test.spark.local";

/// 协议版本。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TlsVersion {
    V12,
    V13,
}

impl TlsVersion {
    fn protocol_versions(self) -> &'static [&'static SupportedProtocolVersion] {
        static TLS12: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
        static TLS13: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
        match self {
            TlsVersion::V12 => TLS12,
            TlsVersion::V13 => TLS13,
        }
    }

    /// 与 rustls 协商结果比对时使用。
    pub fn as_rustls(self) -> rustls::ProtocolVersion {
        match self {
            TlsVersion::V12 => rustls::ProtocolVersion::TLSv1_2,
            TlsVersion::V13 => rustls::ProtocolVersion::TLSv1_3,
        }
    }
}

/// 服务端证书来源。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CertificateProvider {
    /// 内存中的固定证书。
    Static,
    /// 监视磁盘上的 PEM 文件，修改后重载。
    FileWatcher,
    /// 每次握手回调取证。
    OnDemand,
}

/// 客户端对服务端证书的校验方式。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VerifierType {
    /// 标准 WebPKI 链校验 + 主机名校验。
    Hostname,
    /// 在握手线程上同步执行的外部校验器。
    ExternalSync,
    /// 在独立线程上执行、握手线程等待结果的外部校验器。
    ExternalAsync,
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

/// 进程内生成的测试 PKI。
pub struct TestPki {
    ca: CertificateDer<'static>,
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
    chain_pem: String,
    key_pem: String,
}

impl fmt::Debug for TestPki {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestPki")
            .field("chain_len", &self.chain.len())
            .finish_non_exhaustive()
    }
}

impl TestPki {
    pub fn ca_der(&self) -> &CertificateDer<'static> {
        &self.ca
    }

    /// 仅信任测试 CA 的根证书库。
    pub fn roots(&self) -> Result<RootCertStore, FixtureError> {
        let mut roots = RootCertStore::empty();
        roots.add(self.ca.clone())?;
        Ok(roots)
    }

    /// 服务端证书链与签名密钥。
    pub fn certified_key(&self) -> Result<CertifiedKey, FixtureError> {
        let signing_key = aws_lc_rs::sign::any_supported_type(&self.key)?;
        Ok(CertifiedKey::new(self.chain.clone(), signing_key))
    }
}

/// 获取进程级测试 PKI，首次调用时生成。
pub fn test_pki() -> Result<&'static TestPki, FixtureError> {
    static PKI: OnceLock<Result<TestPki, String>> = OnceLock::new();
    PKI.get_or_init(|| generate_pki().map_err(|err| err.to_string()))
        .as_ref()
        .map_err(FixtureError::certificate)
}

fn generate_pki() -> Result<TestPki, rcgen::Error> {
    let ca_key = KeyPair::generate()?;
    let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params
        .distinguished_name
        .push(DnType::CommonName, "spark e2e test root");
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    let ca_cert = ca_params.self_signed(&ca_key)?;

    let server_key = KeyPair::generate()?;
    let mut server_params =
        CertificateParams::new(vec![TLS_HOST_OVERRIDE.to_string(), "localhost".to_string()])?;
    server_params
        .distinguished_name
        .push(DnType::CommonName, TLS_HOST_OVERRIDE);
    server_params.is_ca = IsCa::NoCa;
    server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key)?;

    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(server_key.serialize_der()));
    tracing::debug!(host = TLS_HOST_OVERRIDE, "generated e2e test PKI");
    Ok(TestPki {
        ca: ca_cert.der().clone(),
        chain: vec![server_cert.der().clone()],
        key,
        chain_pem: server_cert.pem(),
        key_pem: server_key.serialize_pem(),
    })
}

fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, FixtureError> {
    let chain_pem = fs::read(cert_path).map_err(FixtureError::io("read certificate chain"))?;
    let key_pem = fs::read(key_path).map_err(FixtureError::io("read private key"))?;
    let chain = CertificateDer::pem_slice_iter(&chain_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(FixtureError::certificate)?;
    if chain.is_empty() {
        return Err(FixtureError::certificate(format!(
            "{} contains no certificate",
            cert_path.display()
        )));
    }
    let key = PrivateKeyDer::from_pem_slice(&key_pem).map_err(FixtureError::certificate)?;
    let signing_key = aws_lc_rs::sign::any_supported_type(&key)?;
    Ok(CertifiedKey::new(chain, signing_key))
}

/// 固定证书解析器。
#[derive(Debug)]
struct StaticResolver(Arc<CertifiedKey>);

impl ResolvesServerCert for StaticResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// 磁盘上的证书文件与其所在临时目录。
///
/// 目录随本值析构删除。
#[derive(Debug)]
pub struct CertificateWatcher {
    dir: TempDir,
    cert_path: PathBuf,
    key_path: PathBuf,
    generation: AtomicUsize,
    resolver: Arc<WatchingResolver>,
}

impl CertificateWatcher {
    fn create(pki: &TestPki) -> Result<Self, FixtureError> {
        let dir = tempfile::Builder::new()
            .prefix("spark-e2e-certs")
            .tempdir()
            .map_err(FixtureError::io("create certificate directory"))?;
        let cert_path = dir.path().join("server.pem");
        let key_path = dir.path().join("server.key");
        write_atomically(dir.path(), &cert_path, pki.chain_pem.as_bytes(), None)?;
        write_atomically(dir.path(), &key_path, pki.key_pem.as_bytes(), None)?;
        let resolver = Arc::new(WatchingResolver::load(cert_path.clone(), key_path.clone())?);
        Ok(Self {
            dir,
            cert_path,
            key_path,
            generation: AtomicUsize::new(0),
            resolver,
        })
    }

    pub fn directory(&self) -> &Path {
        self.dir.path()
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    /// 重写证书文件并推进修改时间，下一次握手将重新加载。
    pub fn rotate(&self, chain_pem: &str, key_pem: &str) -> Result<(), FixtureError> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) as u64 + 1;
        let modified = SystemTime::now() + Duration::from_secs(generation);
        write_atomically(self.dir.path(), &self.key_path, key_pem.as_bytes(), Some(modified))?;
        write_atomically(self.dir.path(), &self.cert_path, chain_pem.as_bytes(), Some(modified))?;
        tracing::debug!(generation, dir = %self.dir.path().display(), "certificate files rotated");
        Ok(())
    }

    /// 以相同材料重写文件，仅推进修改时间。
    pub fn touch(&self) -> Result<(), FixtureError> {
        let pki = test_pki()?;
        self.rotate(&pki.chain_pem, &pki.key_pem)
    }

    /// 自创建以来成功重载的次数。
    pub fn reloads(&self) -> usize {
        self.resolver.reloads.load(Ordering::Acquire)
    }
}

fn write_atomically(
    dir: &Path,
    target: &Path,
    contents: &[u8],
    modified: Option<SystemTime>,
) -> Result<(), FixtureError> {
    let mut staged =
        tempfile::NamedTempFile::new_in(dir).map_err(FixtureError::io("stage certificate file"))?;
    staged
        .write_all(contents)
        .map_err(FixtureError::io("write certificate file"))?;
    if let Some(modified) = modified {
        staged
            .as_file()
            .set_modified(modified)
            .map_err(FixtureError::io("set certificate mtime"))?;
    }
    staged
        .persist(target)
        .map_err(|err| FixtureError::Io {
            context: "persist certificate file",
            source: err.error,
        })?;
    Ok(())
}

fn modified_at(path: &Path) -> std::io::Result<SystemTime> {
    fs::metadata(path)?.modified()
}

/// 修改时间驱动的重载解析器。
struct WatchingResolver {
    cert_path: PathBuf,
    key_path: PathBuf,
    current: ArcSwap<CertifiedKey>,
    seen: Mutex<Option<(SystemTime, SystemTime)>>,
    reloads: AtomicUsize,
}

impl fmt::Debug for WatchingResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchingResolver")
            .field("cert_path", &self.cert_path)
            .field("reloads", &self.reloads.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl WatchingResolver {
    fn load(cert_path: PathBuf, key_path: PathBuf) -> Result<Self, FixtureError> {
        let stamp = Self::stamp(&cert_path, &key_path)?;
        let key = load_certified_key(&cert_path, &key_path)?;
        Ok(Self {
            cert_path,
            key_path,
            current: ArcSwap::from_pointee(key),
            seen: Mutex::new(Some(stamp)),
            reloads: AtomicUsize::new(0),
        })
    }

    fn stamp(cert_path: &Path, key_path: &Path) -> Result<(SystemTime, SystemTime), FixtureError> {
        let cert = modified_at(cert_path).map_err(FixtureError::io("stat certificate chain"))?;
        let key = modified_at(key_path).map_err(FixtureError::io("stat private key"))?;
        Ok((cert, key))
    }

    fn refresh(&self) -> Result<(), FixtureError> {
        let stamp = Self::stamp(&self.cert_path, &self.key_path)?;
        let mut seen = self.seen.lock();
        if *seen == Some(stamp) {
            return Ok(());
        }
        let key = load_certified_key(&self.cert_path, &self.key_path)?;
        self.current.store(Arc::new(key));
        *seen = Some(stamp);
        let reloads = self.reloads.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(reloads, path = %self.cert_path.display(), "certificate reloaded");
        Ok(())
    }
}

impl ResolvesServerCert for WatchingResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        if let Err(err) = self.refresh() {
            tracing::warn!(error = %err, "certificate reload failed; serving previous material");
        }
        Some(self.current.load_full())
    }
}

/// 按需取证回调的回答。
pub enum CertificateFetch {
    /// 继续使用当前证书。
    Unchanged,
    /// 替换为新证书。
    New(CertifiedKey),
}

type FetchFn = dyn Fn(bool) -> Result<CertificateFetch, FixtureError> + Send + Sync;

/// 每次握手回调取证的解析器。
pub struct OnDemandResolver {
    fetch: Box<FetchFn>,
    current: ArcSwapOption<CertifiedKey>,
    fetches: AtomicUsize,
}

impl fmt::Debug for OnDemandResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnDemandResolver")
            .field("fetches", &self.fetches.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl OnDemandResolver {
    /// `fetch` 的参数表示当前是否已有证书。
    pub fn new(
        fetch: impl Fn(bool) -> Result<CertificateFetch, FixtureError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            fetch: Box::new(fetch),
            current: ArcSwapOption::empty(),
            fetches: AtomicUsize::new(0),
        }
    }

    /// 首次取证返回测试证书，之后一律回答未变化。
    pub fn with_test_pki() -> Self {
        Self::new(|has_current| {
            if has_current {
                return Ok(CertificateFetch::Unchanged);
            }
            Ok(CertificateFetch::New(test_pki()?.certified_key()?))
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::Acquire)
    }
}

impl ResolvesServerCert for OnDemandResolver {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.fetches.fetch_add(1, Ordering::AcqRel);
        let current = self.current.load_full();
        match (self.fetch)(current.is_some()) {
            Ok(CertificateFetch::Unchanged) => {}
            Ok(CertificateFetch::New(key)) => self.current.store(Some(Arc::new(key))),
            Err(err) => tracing::warn!(error = %err, "on-demand certificate fetch failed"),
        }
        self.current.load_full()
    }
}

/// 服务端 TLS 材料；持有文件监视目录时随本值一同释放。
#[derive(Debug)]
pub struct ServerTls {
    config: Arc<ServerConfig>,
    watcher: Option<CertificateWatcher>,
    on_demand: Option<Arc<OnDemandResolver>>,
}

impl ServerTls {
    pub fn build(
        version: TlsVersion,
        certificates: CertificateProvider,
    ) -> Result<Self, FixtureError> {
        let pki = test_pki()?;
        let mut watcher = None;
        let mut on_demand = None;
        let resolver: Arc<dyn ResolvesServerCert> = match certificates {
            CertificateProvider::Static => Arc::new(StaticResolver(Arc::new(pki.certified_key()?))),
            CertificateProvider::FileWatcher => {
                let created = CertificateWatcher::create(pki)?;
                let resolver = Arc::clone(&created.resolver);
                watcher = Some(created);
                resolver
            }
            CertificateProvider::OnDemand => {
                let resolver = Arc::new(OnDemandResolver::with_test_pki());
                on_demand = Some(Arc::clone(&resolver));
                resolver
            }
        };
        let config = ServerConfig::builder_with_provider(provider())
            .with_protocol_versions(version.protocol_versions())?
            .with_no_client_auth()
            .with_cert_resolver(resolver);
        Ok(Self {
            config: Arc::new(config),
            watcher,
            on_demand,
        })
    }

    pub fn config(&self) -> Arc<ServerConfig> {
        Arc::clone(&self.config)
    }

    pub fn watcher(&self) -> Option<&CertificateWatcher> {
        self.watcher.as_ref()
    }

    pub fn on_demand(&self) -> Option<&OnDemandResolver> {
        self.on_demand.as_deref()
    }
}

/// 构造客户端 TLS 配置。
pub fn client_config(
    version: TlsVersion,
    verifier: VerifierType,
) -> Result<Arc<ClientConfig>, FixtureError> {
    let pki = test_pki()?;
    let webpki = WebPkiServerVerifier::builder_with_provider(Arc::new(pki.roots()?), provider())
        .build()
        .map_err(FixtureError::certificate)?;
    let builder = ClientConfig::builder_with_provider(provider())
        .with_protocol_versions(version.protocol_versions())?;
    let config = match verifier {
        VerifierType::Hostname => builder.with_webpki_verifier(webpki).with_no_client_auth(),
        VerifierType::ExternalSync | VerifierType::ExternalAsync => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(ExternalVerifier {
                inner: webpki,
                asynchronous: verifier == VerifierType::ExternalAsync,
            }))
            .with_no_client_auth(),
    };
    Ok(Arc::new(config))
}

/// 外部校验器：以自身策略中的主机名完成链校验，签名校验委托 WebPKI。
#[derive(Debug)]
struct ExternalVerifier {
    inner: Arc<WebPkiServerVerifier>,
    asynchronous: bool,
}

impl ServerCertVerifier for ExternalVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let policy_name = ServerName::try_from(TLS_HOST_OVERRIDE)
            .map_err(|err| rustls::Error::General(format!("policy host name: {err}")))?;
        if !self.asynchronous {
            return self.inner.verify_server_cert(
                end_entity,
                intermediates,
                &policy_name,
                ocsp_response,
                now,
            );
        }

        let inner = Arc::clone(&self.inner);
        let end_entity = end_entity.clone().into_owned();
        let intermediates: Vec<CertificateDer<'static>> = intermediates
            .iter()
            .map(|cert| cert.clone().into_owned())
            .collect();
        let ocsp_response = ocsp_response.to_vec();
        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name("spark-e2e-verifier".to_string())
            .spawn(move || {
                let verdict = inner.verify_server_cert(
                    &end_entity,
                    &intermediates,
                    &policy_name,
                    &ocsp_response,
                    now,
                );
                let _ = tx.send(verdict);
            })
            .map_err(|err| rustls::Error::General(format!("spawn verifier thread: {err}")))?;
        rx.recv().map_err(|_| {
            rustls::Error::General("asynchronous verifier exited without a verdict".to_string())
        })?
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// 把主机名转换为 rustls 所需的 `ServerName`。
pub fn server_name(host: &str) -> Result<ServerName<'static>, FixtureError> {
    ServerName::try_from(host.to_string()).map_err(|err| FixtureError::Handshake {
        side: "client",
        detail: format!("invalid server name `{host}`: {err}"),
    })
}

#[cfg(test)]
mod tests {
    use super::{
        CertificateFetch, CertificateProvider, OnDemandResolver, ServerTls, TLS_HOST_OVERRIDE,
        TlsVersion, VerifierType, client_config, test_pki,
    };

    #[test]
    fn pki_is_generated_once() {
        let first = test_pki().expect("pki");
        let second = test_pki().expect("pki");
        assert!(std::ptr::eq(first, second));
        assert!(first.roots().expect("roots").len() == 1);
        first.certified_key().expect("signing key");
    }

    #[test]
    fn file_watcher_writes_pem_files() {
        let tls = ServerTls::build(TlsVersion::V12, CertificateProvider::FileWatcher)
            .expect("server tls");
        let watcher = tls.watcher().expect("watcher present");
        let pem = std::fs::read_to_string(watcher.cert_path()).expect("pem on disk");
        assert!(pem.contains("BEGIN CERTIFICATE"));
        assert_eq!(watcher.reloads(), 0);
    }

    #[test]
    fn on_demand_resolver_answers_unchanged() {
        let resolver = OnDemandResolver::new(|has_current| {
            Ok(if has_current {
                CertificateFetch::Unchanged
            } else {
                CertificateFetch::New(test_pki()?.certified_key()?)
            })
        });
        assert_eq!(resolver.fetches(), 0);
        assert!(format!("{resolver:?}").contains("fetches"));
    }

    #[test]
    fn client_configs_build_for_every_verifier() {
        for version in [TlsVersion::V12, TlsVersion::V13] {
            for verifier in [
                VerifierType::Hostname,
                VerifierType::ExternalSync,
                VerifierType::ExternalAsync,
            ] {
                client_config(version, verifier).expect("client config");
            }
        }
        assert!(TLS_HOST_OVERRIDE.ends_with(".local"));
    }
}
