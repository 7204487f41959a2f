//! DNS-01 challenge providers.

use dashmap::DashMap;
use futures_util::future::{self, BoxFuture, FutureExt};

use crate::acme::CertificateError;

/// Manages the TXT records an ACME DNS-01 challenge asks for.
pub trait DnsProvider: Send + Sync {
    fn name(&self) -> &str;

    fn create_txt_record<'a>(
        &'a self,
        domain: &'a str,
        name: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<(), CertificateError>>;

    fn delete_txt_record<'a>(
        &'a self,
        domain: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), CertificateError>>;

    fn has_txt_record<'a>(
        &'a self,
        domain: &'a str,
        name: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<bool, CertificateError>>;
}

/// Keeps records in memory. Used in tests and when the records are
/// published by something that reads them from this process.
#[derive(Debug, Default)]
pub struct InMemoryDnsProvider {
    records: DashMap<(String, String), Vec<String>>,
}

impl InMemoryDnsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Values currently stored for `name` in `domain`.
    pub fn values(&self, domain: &str, name: &str) -> Vec<String> {
        self.records
            .get(&(domain.to_owned(), name.to_owned()))
            .map(|values| values.value().clone())
            .unwrap_or_default()
    }
}

impl DnsProvider for InMemoryDnsProvider {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn create_txt_record<'a>(
        &'a self,
        domain: &'a str,
        name: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<(), CertificateError>> {
        let mut values = self
            .records
            .entry((domain.to_owned(), name.to_owned()))
            .or_default();
        if !values.iter().any(|v| v == value) {
            values.push(value.to_owned());
        }
        tracing::debug!(domain = %domain, name = %name, "Created TXT record");
        future::ready(Ok(())).boxed()
    }

    fn delete_txt_record<'a>(
        &'a self,
        domain: &'a str,
        name: &'a str,
    ) -> BoxFuture<'a, Result<(), CertificateError>> {
        self.records.remove(&(domain.to_owned(), name.to_owned()));
        tracing::debug!(domain = %domain, name = %name, "Deleted TXT record");
        future::ready(Ok(())).boxed()
    }

    fn has_txt_record<'a>(
        &'a self,
        domain: &'a str,
        name: &'a str,
        value: &'a str,
    ) -> BoxFuture<'a, Result<bool, CertificateError>> {
        let found = self.values(domain, name).iter().any(|v| v == value);
        future::ready(Ok(found)).boxed()
    }
}
