//! Per-invocation cache of initialized registry clients.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::client::OciRegistryClient;
use crate::config::ClientOptions;
use crate::credentials::CredentialStore;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    host: String,
    cert_file: String,
    insecure: bool,
}

/// Memoizes one [`OciRegistryClient`] per `(host, cert_file, insecure)`.
///
/// Lookups and inserts happen under one lock, so concurrent callers asking
/// for the same key never build two clients. A failed construction is not
/// cached.
#[derive(Debug)]
pub struct RegistryCache {
    credentials: Arc<CredentialStore>,
    template: ClientOptions,
    clients: Mutex<HashMap<CacheKey, Arc<OciRegistryClient>>>,
}

impl RegistryCache {
    /// Creates an empty cache whose clients share `credentials`.
    #[must_use]
    pub fn new(credentials: Arc<CredentialStore>) -> Self {
        Self {
            credentials,
            template: ClientOptions::new(""),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Sets option defaults (timeout, user agent, plain HTTP, dry run) for new clients.
    #[must_use]
    pub fn with_options(mut self, template: ClientOptions) -> Self {
        self.template = template;
        self
    }

    /// Returns the client for the key, creating it on first use.
    ///
    /// # Errors
    ///
    /// Returns the construction error; nothing is cached in that case.
    pub fn get(&self, host: &str, cert_file: &str, insecure: bool) -> Result<Arc<OciRegistryClient>> {
        let key = CacheKey {
            host: host.to_string(),
            cert_file: cert_file.to_string(),
            insecure,
        };

        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&key) {
            return Ok(Arc::clone(client));
        }

        let mut options = self.template.clone();
        options.host = host.to_string();
        options.insecure = insecure;
        options.cert_file = (!cert_file.is_empty()).then(|| PathBuf::from(cert_file));

        let client = Arc::new(OciRegistryClient::new(options, Arc::clone(&self.credentials))?);
        debug!(host, cert_file, insecure, "initialized registry client");
        clients.insert(key, Arc::clone(&client));
        Ok(client)
    }

    /// Number of cached clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    /// Returns true if no client has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> RegistryCache {
        RegistryCache::new(Arc::new(CredentialStore::empty()))
    }

    #[test]
    fn test_same_key_returns_same_client() {
        let cache = cache();
        let first = cache.get("harbor.local", "", false).unwrap();
        let second = cache.get("harbor.local", "", false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_different_keys_do_not_share() {
        let cache = cache();
        let first = cache.get("harbor.local", "", false).unwrap();
        let other_host = cache.get("public.ecr.aws", "", false).unwrap();
        let insecure = cache.get("harbor.local", "", true).unwrap();
        assert!(!Arc::ptr_eq(&first, &other_host));
        assert!(!Arc::ptr_eq(&first, &insecure));
        assert!(insecure.options().insecure);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_failure_is_not_cached() {
        let cache = cache();
        assert!(cache.get("harbor.local", "/nonexistent/ca.pem", false).is_err());
        assert!(cache.is_empty());
        assert!(cache.get("harbor.local", "", false).is_ok());
    }

    #[test]
    fn test_concurrent_get_builds_one_client() {
        let cache = Arc::new(cache());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.get("harbor.local", "", false).unwrap())
            })
            .collect();
        let clients: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(clients.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_template_options_apply() {
        let cache = cache().with_options(ClientOptions::new("").with_plain_http(true).with_dry_run(true));
        let client = cache.get("127.0.0.1:5000", "", false).unwrap();
        assert!(client.options().plain_http);
        assert!(client.options().dry_run);
        assert_eq!(client.host(), "127.0.0.1:5000");
    }
}
