use crate::engine::DataSource;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// In-memory mapping from absolute URL to opaque tracking token, backed by
/// `DataSource::create_link`. Write-once per process per URL: the first resolution calls
/// through to the data source, every subsequent one is served from cache.
///
/// A plain `std::sync::RwLock` rather than an async one: resolution is
/// invoked from inside synchronous `tera::Function` callbacks (see
/// `template_funcs`), so the lock itself must never require an executor.
/// The lock is only ever held for a map lookup/insert, never across the
/// (rare, cache-miss-only) call into the async `DataSource`.
pub struct LinkRegistry {
    links: RwLock<HashMap<String, String>>,
}

impl LinkRegistry {
    pub fn new() -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves `url` to its tracking token, registering it with `src` on
    /// first use. On a `DataSource` failure, falls back to returning the raw
    /// URL as its own token so template rendering never hard-fails on a
    /// tracking-registry hiccup.
    ///
    /// Read-then-upgrade: callers take the read lock first and only pay for
    /// the write lock (and the backend round-trip) on a cache miss,
    /// re-checking after acquiring it in case another call raced them to it.
    pub fn resolve(&self, src: &Arc<dyn DataSource>, url: &str) -> String {
        if let Some(token) = self.links.read().unwrap().get(url).cloned() {
            return token;
        }

        let mut links = self.links.write().unwrap();
        if let Some(token) = links.get(url).cloned() {
            return token;
        }

        let url_owned = url.to_string();
        let result = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(src.create_link(&url_owned))
        });

        match result {
            Ok(token) => {
                links.insert(url.to_string(), token.clone());
                token
            }
            Err(e) => {
                tracing::error!(error.cause_chain = ?e, error.message = %e, url, "failed to register tracking link, falling back to the raw URL");
                url.to_string()
            }
        }
    }
}

impl Default for LinkRegistry {
    fn default() -> Self {
        Self::new()
    }
}
