//! TLS configuration and certificate lookup.
//!
//! The proxy never obtains certificates itself. It keeps a per-host registry
//! of certificate contexts (loaded PEM material, the listener's default
//! certificate, or a certificate delegated to an external issuer) and answers
//! two questions for the request path: is there a certificate for this host,
//! and should this request be redirected to HTTPS.
//!
//! The HTTPS listener picks its certificate per handshake through
//! [`SniResolver`]: the host's own PEM material when registered, the
//! listener's default certificate otherwise.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use axum_server::tls_rustls::RustlsConfig;
use dashmap::DashMap;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};
use crate::routing::Target;

/// Per-route TLS options supplied at registration time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct SslOptions {
    /// Private key file (PEM).
    pub key: Option<PathBuf>,

    /// Certificate chain file (PEM).
    pub cert: Option<PathBuf>,

    /// Optional CA bundle (PEM, may contain several certificates).
    pub ca: Option<PathBuf>,

    /// Redirect plain HTTP requests for this host to HTTPS.
    #[serde(default = "default_redirect")]
    pub redirect: bool,

    /// Obtain the certificate from the external issuer.
    pub acme: Option<AcmeOptions>,
}

fn default_redirect() -> bool {
    true
}

/// Parameters handed to a [`CertificateIssuer`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct AcmeOptions {
    pub email: String,
    #[serde(default)]
    pub production: bool,
}

/// Certificate material registered for one hostname.
#[derive(Debug, Clone)]
pub enum CertificateContext {
    /// Served with the HTTPS listener's default certificate.
    Default,
    /// Loaded from PEM files at registration. CA certificates follow the
    /// leaf chain.
    Pem(Arc<CertifiedKey>),
    /// Managed by an external issuer (issuance may still be in flight).
    Issued,
}

/// External collaborator that obtains and renews certificates.
pub trait CertificateIssuer: Send + Sync {
    /// Start issuance (and renewal) for `hostname`.
    fn request(&self, hostname: &str, options: &AcmeOptions);

    /// Stop renewing `hostname` and release its resources.
    fn cancel(&self, hostname: &str);
}

/// What the request path needs from certificate management.
pub trait CertificateStore: Send + Sync {
    fn lookup_certificate(&self, hostname: &str) -> Option<Arc<CertificateContext>>;

    /// Whether a request for `hostname` resolved to `target` must be
    /// redirected to HTTPS instead of proxied.
    fn should_force_https_redirect(&self, hostname: &str, target: &Target) -> bool;
}

/// In-memory hostname → certificate registry.
pub struct CertificateRegistry {
    certs: DashMap<String, Arc<CertificateContext>>,
    default_cert: ArcSwapOption<CertifiedKey>,
    issuer: Option<Arc<dyn CertificateIssuer>>,
    /// Host of the local certificate-challenge responder, never redirected.
    challenge_host: Option<String>,
}

impl CertificateRegistry {
    pub fn new() -> Self {
        Self {
            certs: DashMap::new(),
            default_cert: ArcSwapOption::empty(),
            issuer: None,
            challenge_host: None,
        }
    }

    pub fn with_issuer(mut self, issuer: Arc<dyn CertificateIssuer>) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn with_challenge_host(mut self, host: impl Into<String>) -> Self {
        self.challenge_host = Some(host.into());
        self
    }

    pub fn challenge_host(&self) -> Option<&str> {
        self.challenge_host.as_deref()
    }

    /// Register certificate material for `hostname` unless one exists.
    pub fn ensure(&self, hostname: &str, ssl: &SslOptions) -> Result<()> {
        if self.certs.contains_key(hostname) {
            return Ok(());
        }

        let context = if ssl.key.is_some() || ssl.cert.is_some() || ssl.ca.is_some() {
            load_pem_context(ssl)?
        } else if let Some(acme) = &ssl.acme {
            let issuer = self.issuer.as_ref().ok_or_else(|| {
                ProxyError::config(format!(
                    "certificate issuance requested for {} but no issuer is configured",
                    hostname
                ))
            })?;
            tracing::info!(host = %hostname, "Requesting certificates from issuer");
            issuer.request(hostname, acme);
            CertificateContext::Issued
        } else {
            CertificateContext::Default
        };

        self.certs.insert(hostname.to_string(), Arc::new(context));
        Ok(())
    }

    /// Certificate served to hosts without PEM material of their own.
    pub fn set_default_certificate(&self, cert: Arc<CertifiedKey>) {
        self.default_cert.store(Some(cert));
    }

    /// Certificate to present for an SNI `server_name`.
    pub fn certificate_for(&self, server_name: Option<&str>) -> Option<Arc<CertifiedKey>> {
        let own = server_name.and_then(|name| {
            let context = self.certs.get(&name.to_ascii_lowercase())?.value().clone();
            match context.as_ref() {
                CertificateContext::Pem(cert) => Some(cert.clone()),
                CertificateContext::Default | CertificateContext::Issued => None,
            }
        });
        own.or_else(|| self.default_cert.load_full())
    }

    /// Drop the certificate of `hostname`, cancelling issuer renewal.
    pub fn evict(&self, hostname: &str) {
        if let Some((_, context)) = self.certs.remove(hostname) {
            if matches!(*context, CertificateContext::Issued) {
                if let Some(issuer) = &self.issuer {
                    issuer.cancel(hostname);
                }
            }
            tracing::info!(host = %hostname, "Evicted certificate");
        }
    }
}

impl Default for CertificateRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CertificateStore for CertificateRegistry {
    fn lookup_certificate(&self, hostname: &str) -> Option<Arc<CertificateContext>> {
        self.certs.get(hostname).map(|entry| entry.value().clone())
    }

    fn should_force_https_redirect(&self, hostname: &str, target: &Target) -> bool {
        self.certs.contains_key(hostname)
            && target.ssl_redirect
            && self.challenge_host.as_deref() != Some(target.host().as_str())
    }
}

/// Picks the certificate for each TLS handshake from a [`CertificateRegistry`].
pub struct SniResolver {
    registry: Arc<CertificateRegistry>,
}

impl SniResolver {
    pub fn new(registry: Arc<CertificateRegistry>) -> Self {
        Self { registry }
    }
}

impl fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniResolver")
            .field("hosts", &self.registry.certs.len())
            .finish()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let cert = self.registry.certificate_for(client_hello.server_name());
        if cert.is_none() {
            tracing::warn!(sni = ?client_hello.server_name(), "No certificate for TLS handshake");
        }
        cert
    }
}

fn load_pem_context(ssl: &SslOptions) -> Result<CertificateContext> {
    let (Some(cert_path), Some(key_path)) = (&ssl.cert, &ssl.key) else {
        return Err(ProxyError::config("ssl options need both `key` and `cert`"));
    };

    let mut chain = read_certificates(cert_path)?;
    if let Some(ca) = &ssl.ca {
        chain.extend(read_certificates(ca)?);
    }
    Ok(CertificateContext::Pem(certified_key(chain, key_path)?))
}

fn certified_key(chain: Vec<CertificateDer<'static>>, key_path: &Path) -> Result<Arc<CertifiedKey>> {
    let key = read_private_key(key_path)?;
    let signing_key = rustls::crypto::aws_lc_rs::sign::any_supported_type(&key)
        .map_err(|e| ProxyError::config(format!("unusable private key {:?}: {}", key_path, e)))?;
    Ok(Arc::new(CertifiedKey::new(chain, signing_key)))
}

fn read_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = BufReader::new(File::open(path)?);
    let certs = rustls_pemfile::certs(&mut reader).collect::<std::result::Result<Vec<_>, _>>()?;

    if certs.is_empty() {
        return Err(ProxyError::config(format!("no certificates found in {:?}", path)));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = BufReader::new(File::open(path)?);
    match rustls_pemfile::private_key(&mut reader)? {
        Some(key) => Ok(key),
        None => Err(ProxyError::config(format!("no private key found in {:?}", path))),
    }
}

/// Load the HTTPS listener's default certificate into `registry` and build
/// a listener config that selects certificates by SNI.
pub fn load_tls_config(
    cert_path: &Path,
    key_path: &Path,
    registry: Arc<CertificateRegistry>,
) -> Result<RustlsConfig> {
    if !cert_path.exists() {
        return Err(ProxyError::config(format!("Certificate file not found: {:?}", cert_path)));
    }
    if !key_path.exists() {
        return Err(ProxyError::config(format!("Private key file not found: {:?}", key_path)));
    }

    let default_cert = certified_key(read_certificates(cert_path)?, key_path)?;
    registry.set_default_certificate(default_cert);

    let mut config = ServerConfig::builder()
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver::new(registry)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(RustlsConfig::from_config(Arc::new(config)))
}
