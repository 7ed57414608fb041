//! TXT record lookups for domain-ownership checks.
//!
//! The verifier depends on the [`TxtLookup`] trait so tests can script
//! resolver answers; the production implementation sits on top of
//! hickory's tokio resolver using the host's resolv.conf.

use async_trait::async_trait;
use hickory_resolver::TokioAsyncResolver;
use std::io::Error;

#[async_trait]
pub trait TxtLookup: Send + Sync {
    /// Returns every TXT string published under `name`, or an empty list
    /// when the name does not resolve.
    async fn lookup_txt(&self, name: &str) -> Vec<String>;
}

pub struct SystemTxtLookup {
    resolver: TokioAsyncResolver,
}

impl SystemTxtLookup {
    /// Builds a resolver from the host's system configuration.
    pub fn from_system_conf() -> Result<Self, Error> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::other(format!("failed to build dns resolver: {e}")))?;
        Ok(Self { resolver })
    }
}

#[async_trait]
impl TxtLookup for SystemTxtLookup {
    async fn lookup_txt(&self, name: &str) -> Vec<String> {
        match self.resolver.txt_lookup(name).await {
            Ok(lookup) => lookup.iter().map(|txt| txt.to_string()).collect(),
            // NXDOMAIN and transport failures read the same to the
            // verifier: the record is not there yet.
            Err(_) => Vec::new(),
        }
    }
}
