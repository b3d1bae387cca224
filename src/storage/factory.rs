//! Scheme-keyed backend registry
//!
//! Callers hold locator strings of mixed origin (local volumes, HTTP
//! volumes, cloud tile storage). The registry maps a locator's scheme to
//! the backend that can serve it; locators without a scheme resolve to the
//! local filesystem backend.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use super::{HttpBackend, LocalBackend, StorageBackend};
use crate::error::Error;

pub struct StorageRegistry {
    local: Arc<dyn StorageBackend>,
    schemes: HashMap<String, Arc<dyn StorageBackend>>,
}

impl StorageRegistry {
    /// Build a registry with the local and HTTP(S) backends wired up.
    /// `timeout` bounds every remote fetch.
    pub fn new(timeout: Duration) -> Result<Self, Error> {
        let http: Arc<dyn StorageBackend> = Arc::new(HttpBackend::new(timeout)?);
        let mut schemes: HashMap<String, Arc<dyn StorageBackend>> = HashMap::new();
        schemes.insert("http".to_string(), http.clone());
        schemes.insert("https".to_string(), http);
        Ok(Self {
            local: Arc::new(LocalBackend::new()),
            schemes,
        })
    }

    /// Register a backend for an additional scheme, e.g. `s3`
    pub fn register(&mut self, scheme: &str, backend: Arc<dyn StorageBackend>) {
        self.schemes.insert(scheme.to_string(), backend);
    }

    /// Resolve the backend responsible for a locator
    pub fn resolve(&self, locator: &str) -> Result<Arc<dyn StorageBackend>, Error> {
        match locator.split_once("://") {
            Some((scheme, _)) => self.schemes.get(scheme).cloned().ok_or_else(|| {
                Error::Config(format!("No storage backend for scheme: {}", scheme))
            }),
            None => Ok(self.local.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    #[test]
    fn test_plain_path_resolves_to_local_backend() {
        let registry = StorageRegistry::new(Duration::from_secs(5)).unwrap();
        assert!(registry.resolve("/data/volumes/1.jpg").is_ok());
    }

    #[test]
    fn test_http_schemes_resolve() {
        let registry = StorageRegistry::new(Duration::from_secs(5)).unwrap();
        assert!(registry.resolve("http://example.com/1.jpg").is_ok());
        assert!(registry.resolve("https://example.com/1.jpg").is_ok());
    }

    #[test]
    fn test_unregistered_scheme_fails() {
        let registry = StorageRegistry::new(Duration::from_secs(5)).unwrap();
        let result = registry.resolve("s3://tiles/key");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_registered_scheme_resolves() {
        let mut registry = StorageRegistry::new(Duration::from_secs(5)).unwrap();
        registry.register("mem", Arc::new(MemoryBackend::new()));
        assert!(registry.resolve("mem://bucket/key").is_ok());
    }
}
