//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Route registration with `ssl` options
//!     → tls.rs (CertificateRegistry::ensure: PEM / default / issuer)
//!
//! Plain HTTP request
//!     → tls.rs (should_force_https_redirect) → 302 to HTTPS, or proxy
//!
//! HTTPS listener startup
//!     → tls.rs (load_tls_config: default certificate, SniResolver)
//!
//! TLS handshake
//!     → tls.rs (SniResolver: host PEM certificate, else default)
//! ```
//!
//! # Design Decisions
//! - Certificate issuance and renewal live outside the proxy
//! - Unregistering the last route of a host evicts its certificate

pub mod tls;

pub use tls::{
    AcmeOptions, CertificateContext, CertificateIssuer, CertificateRegistry, CertificateStore,
    SniResolver, SslOptions,
};
