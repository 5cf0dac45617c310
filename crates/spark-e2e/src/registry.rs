//! 配置注册表：全部具名配置的规范清单，按名称排序、名称唯一、构建后只读。
//!
//! # 教案式说明
//! - **意图 (Why)**：套件通过查询从注册表中挑选配置；注册表一旦在进程内构建完成就不再变化，
//!   并发读取无需任何同步。
//! - **契约 (What)**：
//!   - [`Registry::new`] 校验名称非空、名称唯一以及“不可同时排除 fuzz 与交互模式”，然后按名称升序排列；
//!   - [`Registry::global`] 在首次访问时构建默认清单，默认清单存在编写错误时直接 panic 并指明出错配置；
//!   - 平台相关的配置只在支持对应传输的平台上登记（UNIX 套接字需要 `unix`，抽象命名空间需要 Linux）。
//! - **实现 (How)**：`OnceLock<Registry>` 保证构建只发生一次，其余线程阻塞等待同一结果。

use std::{fmt, sync::OnceLock};

use crate::{
    args::ChannelArgs,
    error::{FixtureError, RegistryError},
    feature::FeatureMask,
    fixture::{
        Fixture, FixtureFactory, factory,
        chaotic_good::ChaoticGoodFixture,
        fullstack::{FullstackFixture, presets},
        inproc::InprocFixture,
        proxy::{HttpProxyFixture, RelayFixture},
        secure::TlsSettings,
        tracing::TracingFixture,
    },
    tls::{CertificateProvider, TLS_HOST_OVERRIDE, TlsVersion, VerifierType},
};

/// 一个具名配置。
#[derive(Clone)]
pub struct Configuration {
    name: String,
    feature_mask: FeatureMask,
    overridden_call_host: Option<&'static str>,
    factory: FixtureFactory,
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("name", &self.name)
            .field("feature_mask", &format_args!("{}", self.feature_mask))
            .field("overridden_call_host", &self.overridden_call_host)
            .finish_non_exhaustive()
    }
}

impl Configuration {
    pub fn new(name: impl Into<String>, feature_mask: FeatureMask, factory: FixtureFactory) -> Self {
        Self {
            name: name.into(),
            feature_mask,
            overridden_call_host: None,
            factory,
        }
    }

    /// 调用时改写的目标主机名，TLS 配置以它匹配测试证书。
    #[must_use]
    pub fn with_call_host(mut self, host: &'static str) -> Self {
        self.overridden_call_host = Some(host);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn feature_mask(&self) -> FeatureMask {
        self.feature_mask
    }

    pub fn overridden_call_host(&self) -> Option<&'static str> {
        self.overridden_call_host
    }

    /// 为一个测试用例构造新的夹具。
    pub fn create_fixture(
        &self,
        client_args: &ChannelArgs,
        server_args: &ChannelArgs,
    ) -> Result<Box<dyn Fixture>, FixtureError> {
        tracing::debug!(configuration = %self.name, "creating fixture");
        (self.factory)(client_args, server_args)
    }
}

/// 已校验、已排序的配置清单。
#[derive(Clone, Debug)]
pub struct Registry {
    configurations: Vec<Configuration>,
}

impl Registry {
    pub fn new(mut configurations: Vec<Configuration>) -> Result<Self, RegistryError> {
        for config in &configurations {
            if config.name.is_empty() {
                return Err(RegistryError::EmptyName);
            }
            if config.feature_mask.is_unreachable() {
                return Err(RegistryError::Unreachable {
                    name: config.name.clone(),
                });
            }
        }
        configurations.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = configurations.windows(2).find(|pair| pair[0].name == pair[1].name) {
            return Err(RegistryError::DuplicateName {
                name: pair[0].name.clone(),
            });
        }
        Ok(Self { configurations })
    }

    /// 进程级默认注册表。
    ///
    /// # Panics
    /// 默认清单存在编写错误时 panic，信息中包含出错配置的名称。
    pub fn global() -> &'static Registry {
        static REGISTRY: OnceLock<Registry> = OnceLock::new();
        REGISTRY.get_or_init(|| match Registry::new(default_configurations()) {
            Ok(registry) => {
                tracing::debug!(configurations = registry.len(), "default registry built");
                registry
            }
            Err(err) => panic!("default e2e registry is invalid: {err}"),
        })
    }

    /// 按名称精确查找。
    pub fn named(&self, name: &str) -> Option<&Configuration> {
        self.configurations
            .binary_search_by(|config| config.name.as_str().cmp(name))
            .ok()
            .map(|index| &self.configurations[index])
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Configuration> {
        self.configurations.iter()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.configurations.iter().map(Configuration::name)
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

impl<'r> IntoIterator for &'r Registry {
    type Item = &'r Configuration;
    type IntoIter = std::slice::Iter<'r, Configuration>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn tls_fixture(
    version: TlsVersion,
    certificates: CertificateProvider,
    verifier: VerifierType,
) -> FixtureFactory {
    factory(move |_, _| {
        FullstackFixture::tls(TlsSettings {
            version,
            certificates,
            verifier,
        })
    })
}

/// 默认配置清单（未排序）。
pub fn default_configurations() -> Vec<Configuration> {
    use FeatureMask as F;

    let mut configs = Vec::new();

    #[cfg(unix)]
    {
        use crate::fixture::{
            fd::FdFixture,
            sockpair::{SockpairFixture, SockpairKind},
        };

        configs.push(Configuration::new(
            "Chttp2Fd",
            F::IS_HTTP2 | F::DO_NOT_FUZZ | F::EXCLUDE_FROM_EXPERIMENT_RUNS,
            factory(|_, _| FdFixture::new()),
        ));
        configs.push(Configuration::new(
            "Chttp2FullstackLocalUdsPercentEncoded",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::IS_HTTP2
                | F::DO_NOT_FUZZ
                | F::EXCLUDE_FROM_EXPERIMENT_RUNS,
            factory(|_, _| presets::local_uds(true)),
        ));
        configs.push(Configuration::new(
            "Chttp2FullstackLocalUds",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::IS_HTTP2
                | F::DO_NOT_FUZZ
                | F::EXCLUDE_FROM_EXPERIMENT_RUNS,
            factory(|_, _| presets::local_uds(false)),
        ));
        configs.push(Configuration::new(
            "Chttp2FullstackUds",
            F::SUPPORTS_CLIENT_CHANNEL | F::IS_HTTP2 | F::DO_NOT_FUZZ,
            factory(|_, _| FullstackFixture::uds(false)),
        ));
        configs.push(Configuration::new(
            "Chttp2SocketPair",
            F::IS_HTTP2 | F::DO_NOT_FUZZ | F::EXCLUDE_FROM_EXPERIMENT_RUNS,
            factory(|_, _| SockpairFixture::new(SockpairKind::Plain)),
        ));
        configs.push(Configuration::new(
            "Chttp2SocketPair1ByteAtATime",
            F::IS_HTTP2 | F::ONE_BYTE_AT_A_TIME | F::DO_NOT_FUZZ | F::EXCLUDE_FROM_EXPERIMENT_RUNS,
            factory(|_, _| SockpairFixture::new(SockpairKind::OneByteAtATime)),
        ));
        configs.push(Configuration::new(
            "Chttp2SocketPairMinstack",
            F::IS_HTTP2 | F::IS_MINSTACK | F::DO_NOT_FUZZ,
            factory(|_, _| SockpairFixture::new(SockpairKind::Minstack)),
        ));
        configs.push(Configuration::new(
            "Chttp2SocketPairWithTrace",
            F::IS_HTTP2 | F::ENABLES_TRACES,
            factory(|_, _| Ok(TracingFixture::wrap(SockpairFixture::new(SockpairKind::Plain)?))),
        ));
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    {
        configs.push(Configuration::new(
            "Chttp2FullstackLocalAbstractUdsPercentEncoded",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::IS_HTTP2
                | F::DO_NOT_FUZZ
                | F::EXCLUDE_FROM_EXPERIMENT_RUNS,
            factory(|_, _| presets::local_abstract_uds()),
        ));
        configs.push(Configuration::new(
            "Chttp2FullstackUdsAbstractNamespace",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::IS_HTTP2
                | F::DO_NOT_FUZZ
                | F::EXCLUDE_FROM_EXPERIMENT_RUNS,
            factory(|_, _| FullstackFixture::abstract_uds(false)),
        ));
    }

    configs.extend([
        Configuration::new(
            "Chttp2FakeSecurityFullstack",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::SUPPORTS_PER_CALL_CREDENTIALS_LEVEL_INSECURE
                | F::IS_HTTP2
                | F::DO_NOT_GTEST,
            factory(|_, _| presets::fake_security()),
        ),
        Configuration::new(
            "Chttp2Fullstack",
            F::SUPPORTS_CLIENT_CHANNEL | F::IS_HTTP2,
            factory(|_, _| FullstackFixture::insecure()),
        ),
        Configuration::new(
            "Chttp2FullstackCompression",
            F::SUPPORTS_CLIENT_CHANNEL | F::IS_HTTP2 | F::DO_NOT_GTEST,
            factory(|_, _| presets::compression()),
        ),
        Configuration::new(
            "Chttp2FullstackLocalIpv4",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::IS_HTTP2
                | F::DO_NOT_FUZZ
                | F::EXCLUDE_FROM_EXPERIMENT_RUNS
                | F::IS_LOCAL_TCP_CREDS,
            factory(|_, _| presets::local_ipv4()),
        ),
        Configuration::new(
            "Chttp2FullstackLocalIpv6",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::IS_HTTP2
                | F::DO_NOT_FUZZ
                | F::EXCLUDE_FROM_EXPERIMENT_RUNS
                | F::IS_LOCAL_TCP_CREDS,
            factory(|_, _| presets::local_ipv6()),
        ),
        Configuration::new(
            "Chttp2FullstackNoRetry",
            F::SUPPORTS_CLIENT_CHANNEL | F::IS_HTTP2 | F::DOES_NOT_SUPPORT_RETRY | F::DO_NOT_GTEST,
            factory(|_, _| presets::no_retry()),
        ),
        Configuration::new(
            "Chttp2FullstackWithCensus",
            F::SUPPORTS_CLIENT_CHANNEL | F::IS_HTTP2 | F::DO_NOT_GTEST,
            factory(|_, _| presets::census()),
        ),
        Configuration::new(
            "Chttp2FullstackWithProxy",
            F::SUPPORTS_REQUEST_PROXYING | F::SUPPORTS_CLIENT_CHANNEL | F::IS_HTTP2 | F::DO_NOT_FUZZ,
            factory(|_, _| RelayFixture::plain()),
        ),
        Configuration::new(
            "Chttp2FullstackWithTrace",
            F::SUPPORTS_CLIENT_CHANNEL | F::IS_HTTP2 | F::ENABLES_TRACES,
            factory(|_, _| Ok(TracingFixture::wrap(FullstackFixture::insecure()?))),
        ),
        Configuration::new(
            "Chttp2HttpProxy",
            F::SUPPORTS_CLIENT_CHANNEL | F::IS_HTTP2 | F::DO_NOT_FUZZ,
            factory(|client_args, _| HttpProxyFixture::new(client_args)),
        ),
        Configuration::new(
            "Chttp2SslProxy",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::IS_SECURE
                | F::SUPPORTS_REQUEST_PROXYING
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::IS_HTTP2
                | F::DO_NOT_FUZZ,
            factory(|_, _| RelayFixture::ssl()),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Chttp2InsecureCredentials",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::SUPPORTS_PER_CALL_CREDENTIALS_LEVEL_INSECURE
                | F::IS_HTTP2
                | F::EXCLUDE_FROM_EXPERIMENT_RUNS
                | F::DO_NOT_GTEST,
            factory(|_, _| presets::insecure_credentials()),
        ),
        Configuration::new(
            "Chttp2SimpleSslWithOauth2FullstackTls12",
            F::IS_SECURE
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::SUPPORTS_CLIENT_CHANNEL
                | F::IS_HTTP2
                | F::EXCLUDE_FROM_EXPERIMENT_RUNS
                | F::DO_NOT_GTEST,
            factory(|_, _| presets::oauth2(TlsVersion::V12)),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Chttp2SimpleSslWithOauth2FullstackTls13",
            F::IS_SECURE
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::SUPPORTS_CLIENT_CHANNEL
                | F::IS_HTTP2
                | F::DO_NOT_GTEST,
            factory(|_, _| presets::oauth2(TlsVersion::V13)),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Chttp2SimplSslFullstackTls12",
            F::IS_SECURE
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::SUPPORTS_CLIENT_CHANNEL
                | F::IS_HTTP2
                | F::EXCLUDE_FROM_EXPERIMENT_RUNS
                | F::DO_NOT_GTEST,
            factory(|_, _| presets::simple_ssl(TlsVersion::V12)),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Chttp2SimplSslFullstackTls13",
            F::IS_SECURE
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::SUPPORTS_CLIENT_CHANNEL
                | F::DOES_NOT_SUPPORT_CLIENT_HANDSHAKE_COMPLETE_FIRST
                | F::IS_HTTP2
                | F::DO_NOT_GTEST,
            factory(|_, _| presets::simple_ssl(TlsVersion::V13)),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Chttp2SslCredReloadTls12",
            F::IS_SECURE
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::SUPPORTS_CLIENT_CHANNEL
                | F::IS_HTTP2
                | F::EXCLUDE_FROM_EXPERIMENT_RUNS
                | F::DO_NOT_GTEST,
            factory(|_, _| FullstackFixture::tls(TlsSettings::credential_reload(TlsVersion::V12))),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Chttp2SslCredReloadTls13",
            F::IS_SECURE
                | F::IS_HTTP2
                | F::SUPPORTS_PER_CALL_CREDENTIALS
                | F::SUPPORTS_CLIENT_CHANNEL
                | F::DOES_NOT_SUPPORT_CLIENT_HANDSHAKE_COMPLETE_FIRST
                | F::DO_NOT_GTEST,
            factory(|_, _| FullstackFixture::tls(TlsSettings::credential_reload(TlsVersion::V13))),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Chttp2CertWatcherProviderAsyncVerifierTls13",
            F::H2_TLS | F::DO_NOT_FUZZ | F::EXCLUDE_FROM_EXPERIMENT_RUNS,
            tls_fixture(
                TlsVersion::V13,
                CertificateProvider::FileWatcher,
                VerifierType::ExternalAsync,
            ),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Chttp2CertWatcherProviderSyncVerifierTls12",
            F::H2_TLS | F::DO_NOT_FUZZ | F::EXCLUDE_FROM_EXPERIMENT_RUNS,
            tls_fixture(
                TlsVersion::V12,
                CertificateProvider::FileWatcher,
                VerifierType::Hostname,
            ),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Chttp2SimpleSslFullstack",
            F::H2_TLS,
            tls_fixture(
                TlsVersion::V12,
                CertificateProvider::Static,
                VerifierType::ExternalSync,
            ),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Chttp2StaticProviderAsyncVerifierTls13",
            F::H2_TLS | F::DO_NOT_FUZZ | F::EXCLUDE_FROM_EXPERIMENT_RUNS,
            tls_fixture(
                TlsVersion::V13,
                CertificateProvider::Static,
                VerifierType::ExternalAsync,
            ),
        )
        .with_call_host(TLS_HOST_OVERRIDE),
        Configuration::new(
            "Inproc",
            F::DOES_NOT_SUPPORT_WRITE_BUFFERING | F::DO_NOT_GTEST,
            factory(|_, _| Ok(InprocFixture::new(false))),
        ),
        Configuration::new(
            "InprocWithPromises",
            F::DOES_NOT_SUPPORT_WRITE_BUFFERING | F::IS_CALL_V3 | F::DO_NOT_GTEST,
            factory(|_, _| Ok(InprocFixture::new(true))),
        ),
        Configuration::new(
            "ChaoticGoodFullStack",
            F::SUPPORTS_CLIENT_CHANNEL | F::DOES_NOT_SUPPORT_WRITE_BUFFERING | F::IS_CALL_V3,
            factory(|_, _| ChaoticGoodFixture::full_stack()),
        ),
        Configuration::new(
            "ChaoticGoodManyConnections",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::DOES_NOT_SUPPORT_RETRY
                | F::DOES_NOT_SUPPORT_WRITE_BUFFERING
                | F::IS_CALL_V3,
            factory(|_, _| ChaoticGoodFixture::many_connections()),
        ),
        Configuration::new(
            "ChaoticGoodSingleConnection",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::DOES_NOT_SUPPORT_RETRY
                | F::DOES_NOT_SUPPORT_WRITE_BUFFERING
                | F::IS_CALL_V3
                | F::DO_NOT_GTEST,
            factory(|_, _| ChaoticGoodFixture::single_connection()),
        ),
        Configuration::new(
            "ChaoticGoodOneByteChunk",
            F::SUPPORTS_CLIENT_CHANNEL
                | F::ONE_BYTE_AT_A_TIME
                | F::DOES_NOT_SUPPORT_RETRY
                | F::DOES_NOT_SUPPORT_WRITE_BUFFERING
                | F::IS_CALL_V3
                | F::DO_NOT_GTEST,
            factory(|_, _| ChaoticGoodFixture::one_byte_chunk()),
        ),
    ]);

    configs
}

#[cfg(test)]
mod tests {
    use super::{Configuration, Registry};
    use crate::{
        error::RegistryError,
        feature::FeatureMask,
        fixture::{factory, inproc::InprocFixture},
    };

    fn config(name: &str, mask: FeatureMask) -> Configuration {
        Configuration::new(name, mask, factory(|_, _| Ok(InprocFixture::new(false))))
    }

    #[test]
    fn sorts_by_name() {
        let registry = Registry::new(vec![
            config("b", FeatureMask::empty()),
            config("a", FeatureMask::IS_HTTP2),
        ])
        .expect("valid");
        assert_eq!(registry.names().collect::<Vec<_>>(), ["a", "b"]);
        assert_eq!(
            registry.named("a").map(Configuration::feature_mask),
            Some(FeatureMask::IS_HTTP2)
        );
        assert!(registry.named("c").is_none());
    }

    #[test]
    fn authoring_errors_are_rejected() {
        let duplicate = Registry::new(vec![
            config("dup", FeatureMask::empty()),
            config("dup", FeatureMask::IS_SECURE),
        ])
        .expect_err("duplicate");
        assert_eq!(
            duplicate,
            RegistryError::DuplicateName {
                name: "dup".to_string()
            }
        );

        let unreachable = Registry::new(vec![config("ghost", FeatureMask::UNREACHABLE)])
            .expect_err("unreachable");
        assert_eq!(
            unreachable,
            RegistryError::Unreachable {
                name: "ghost".to_string()
            }
        );

        assert_eq!(
            Registry::new(vec![config("", FeatureMask::empty())]).expect_err("empty"),
            RegistryError::EmptyName
        );
    }
}
