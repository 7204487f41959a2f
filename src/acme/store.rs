//! Certificate storage.

use std::path::{Path, PathBuf};

use crate::acme::{Certificate, CertificateError};

/// Persists issued certificates by domain.
pub trait CertificateStore: Send + Sync {
    fn save_certificate(&self, domain: &str, cert: &Certificate) -> Result<(), CertificateError>;

    /// `Ok(None)` when nothing is stored for `domain`.
    fn load_certificate(&self, domain: &str) -> Result<Option<Certificate>, CertificateError>;

    fn is_certificate_valid(&self, cert: &Certificate) -> bool {
        crate::acme::is_certificate_valid(cert)
    }
}

/// Stores `<dir>/<domain>-key.pem` and `<dir>/<domain>-cert.pem`.
#[derive(Debug, Clone)]
pub struct FileCertificateStore {
    dir: PathBuf,
}

impl FileCertificateStore {
    /// Creates `dir` if it does not exist.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, CertificateError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn paths(&self, domain: &str) -> Result<(PathBuf, PathBuf), CertificateError> {
        if domain.is_empty()
            || domain.contains(['/', '\\'])
            || domain.split('.').any(|label| label == "..")
            || domain.starts_with('.')
        {
            return Err(CertificateError::InvalidDomain(domain.to_owned()));
        }
        Ok((
            self.dir.join(format!("{domain}-key.pem")),
            self.dir.join(format!("{domain}-cert.pem")),
        ))
    }
}

impl CertificateStore for FileCertificateStore {
    fn save_certificate(&self, domain: &str, cert: &Certificate) -> Result<(), CertificateError> {
        let (key_path, cert_path) = self.paths(domain)?;
        std::fs::write(&key_path, &cert.key)?;
        std::fs::write(&cert_path, &cert.cert)?;
        tracing::debug!(
            domain = %domain,
            key_path = %key_path.display(),
            cert_path = %cert_path.display(),
            "Saved certificate"
        );
        Ok(())
    }

    fn load_certificate(&self, domain: &str) -> Result<Option<Certificate>, CertificateError> {
        let (key_path, cert_path) = self.paths(domain)?;
        if !key_path.exists() || !cert_path.exists() {
            return Ok(None);
        }
        Ok(Some(Certificate {
            key: std::fs::read_to_string(&key_path)?,
            cert: std::fs::read_to_string(&cert_path)?,
        }))
    }
}
