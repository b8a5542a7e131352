//! One-time SSL initialization: backend preference and CA bundle
//! resolution.

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use tracing::debug;

use crate::downloader::is_truthy;

/// Which TLS backend the client should prefer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SslBackend {
    /// The platform's native trust store.
    System,
    /// An OpenSSL-style CA bundle file.
    OpenSsl,
}

/// The resolved SSL configuration, initialized once per process.
#[derive(Debug, Clone)]
pub struct SslConfig {
    /// The preferred backend.
    pub backend: SslBackend,

    /// The CA bundle to load, when one was found.
    pub ca_bundle: Option<PathBuf>,

    /// Disable certificate revocation checks
    /// (`MAMBA_SSL_NO_REVOKE`).
    pub no_revoke: bool,
}

/// Well-known CA bundle locations, probed in order when neither the
/// environment nor the caller provides one.
const CA_BUNDLE_CANDIDATES: &[&str] = &[
    "/etc/ssl/certs/ca-certificates.crt",
    "/etc/pki/tls/certs/ca-bundle.crt",
    "/usr/share/ssl/certs/ca-bundle.crt",
    "/usr/local/share/certs/ca-root-nss.crt",
    "/etc/ssl/cert.pem",
];

static SSL_CONFIG: OnceLock<SslConfig> = OnceLock::new();

impl SslConfig {
    /// Initializes (or returns the already-initialized) configuration.
    ///
    /// The CA bundle is resolved from `REQUESTS_CA_BUNDLE`, then the
    /// explicit path, then the first existing candidate of the platform
    /// list.
    pub fn init(explicit_ca_bundle: Option<&Path>) -> &'static SslConfig {
        SSL_CONFIG.get_or_init(|| {
            let ca_bundle = std::env::var_os("REQUESTS_CA_BUNDLE")
                .map(PathBuf::from)
                .filter(|path| path.exists())
                .or_else(|| {
                    explicit_ca_bundle
                        .filter(|path| path.exists())
                        .map(Path::to_path_buf)
                })
                .or_else(|| {
                    CA_BUNDLE_CANDIDATES
                        .iter()
                        .map(PathBuf::from)
                        .find(|path| path.exists())
                });

            let backend = if ca_bundle.is_some() {
                SslBackend::OpenSsl
            } else {
                SslBackend::System
            };

            let no_revoke = std::env::var("MAMBA_SSL_NO_REVOKE")
                .map(|value| is_truthy(&value))
                .unwrap_or(false);

            let config = SslConfig {
                backend,
                ca_bundle,
                no_revoke,
            };
            debug!("ssl initialized: {config:?}");
            config
        })
    }

    /// Applies the configuration to a client builder.
    pub fn apply(&self, mut builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        if let Some(ca_bundle) = &self.ca_bundle {
            match std::fs::read(ca_bundle) {
                Ok(pem) => match reqwest::Certificate::from_pem_bundle(&pem) {
                    Ok(certificates) => {
                        for certificate in certificates {
                            builder = builder.add_root_certificate(certificate);
                        }
                    }
                    Err(e) => debug!("ignoring unreadable ca bundle: {e}"),
                },
                Err(e) => debug!("ignoring unreadable ca bundle: {e}"),
            }
        }
        builder
    }
}
