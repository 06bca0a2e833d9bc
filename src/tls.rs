use std::path::{Path, PathBuf};

use reqwest::{Certificate, ClientBuilder as ReqwestBuilder};

use crate::error::{Error, Result};

/// Trust policy for HTTPS exchanges made by the built-in transport
///
/// By default the platform's webpki roots are trusted and certificates are
/// verified. Extra roots can be added in memory or loaded from PEM files, and
/// verification can be switched off entirely for development endpoints.
#[derive(Debug, Clone)]
pub struct TlsConfig {
    verify: bool,
    root_certs: Vec<Certificate>,
    ca_cert_paths: Vec<PathBuf>,
}

impl TlsConfig {
    /// Create a verifying configuration with no extra roots
    pub fn new() -> Self {
        Self {
            verify: true,
            root_certs: Vec::new(),
            ca_cert_paths: Vec::new(),
        }
    }

    /// Accept any certificate, including self-signed and expired ones
    pub fn insecure() -> Self {
        Self::new().verify(false)
    }

    /// Enable or disable certificate verification
    pub fn verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Trust an additional root certificate
    pub fn add_root_cert(mut self, cert: Certificate) -> Self {
        self.root_certs.push(cert);
        self
    }

    /// Trust the PEM certificate at `path`, read when the engine is built
    pub fn add_ca_cert_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_paths.push(path.into());
        self
    }

    /// Check if certificate verification is enabled
    pub fn is_verify_enabled(&self) -> bool {
        self.verify
    }

    /// Extra roots added in memory
    pub fn root_certs(&self) -> &[Certificate] {
        &self.root_certs
    }

    /// PEM files to load as extra roots
    pub fn ca_cert_paths(&self) -> &[PathBuf] {
        &self.ca_cert_paths
    }

    /// Apply this policy to a reqwest client builder
    pub fn apply_to_builder(&self, mut builder: ReqwestBuilder) -> Result<ReqwestBuilder> {
        for cert in &self.root_certs {
            builder = builder.add_root_certificate(cert.clone());
        }

        for path in &self.ca_cert_paths {
            builder = builder.add_root_certificate(load_pem(path)?);
        }

        if !self.verify {
            tracing::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(builder)
    }
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn load_pem(path: &Path) -> Result<Certificate> {
    let data = std::fs::read(path).map_err(|e| {
        Error::config(format!("Failed to read CA certificate {}: {}", path.display(), e))
    })?;
    Certificate::from_pem(&data).map_err(|e| {
        Error::config(format!("Invalid CA certificate {}: {}", path.display(), e))
    })
}
