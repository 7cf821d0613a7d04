//! Cross-thread key-value store contract.
//!
//! The store is an external collaborator: the engine neither reads nor
//! writes it, it only forwards the handle to node bodies through
//! [`NodeContext::store`](crate::node::NodeContext::store). Namespaces
//! are hierarchical path segments, so `["users", "42"]` scopes keys
//! under that subtree and search can match by prefix.

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::RwLock;
use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    /// Backend storage error (database, filesystem, network).
    #[error("store backend error: {message}")]
    #[diagnostic(code(stepweave::store::backend))]
    Backend { message: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Options for [`Store::search`].
#[derive(Clone, Debug, Default)]
pub struct SearchQuery {
    /// Keep only items whose value contains these key/value pairs
    /// (top-level object fields).
    pub filter: FxHashMap<String, Value>,
    /// Maximum number of items to return.
    pub limit: Option<usize>,
}

/// An item returned by [`Store::search`].
#[derive(Clone, Debug, PartialEq)]
pub struct StoreItem {
    pub namespace: Vec<String>,
    pub key: String,
    pub value: Value,
}

/// Abstract hierarchical key-value store for long-lived state.
///
/// Implementations define their own concurrency contract; the engine
/// merely injects the handle into nodes that declare it.
#[async_trait]
pub trait Store: Send + Sync {
    /// Insert or replace a value under (namespace, key).
    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()>;

    /// Fetch the value under (namespace, key), if present.
    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<Value>>;

    /// List items whose namespace starts with `namespace`, filtered and
    /// truncated per `query`.
    async fn search(&self, namespace: &[String], query: SearchQuery) -> Result<Vec<StoreItem>>;
}

/// Volatile in-process store, suitable for tests and single-process
/// deployments.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<FxHashMap<Vec<String>, FxHashMap<String, Value>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put(&self, namespace: &[String], key: &str, value: Value) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        inner
            .entry(namespace.to_vec())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, namespace: &[String], key: &str) -> Result<Option<Value>> {
        let inner = self.inner.read().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        Ok(inner.get(namespace).and_then(|m| m.get(key)).cloned())
    }

    async fn search(&self, namespace: &[String], query: SearchQuery) -> Result<Vec<StoreItem>> {
        let inner = self.inner.read().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })?;
        let mut items: Vec<StoreItem> = inner
            .iter()
            .filter(|(ns, _)| ns.starts_with(namespace))
            .flat_map(|(ns, entries)| {
                entries.iter().map(|(key, value)| StoreItem {
                    namespace: ns.clone(),
                    key: key.clone(),
                    value: value.clone(),
                })
            })
            .filter(|item| {
                query.filter.iter().all(|(k, expected)| {
                    item.value.get(k).is_some_and(|actual| actual == expected)
                })
            })
            .collect();
        items.sort_by(|a, b| (&a.namespace, &a.key).cmp(&(&b.namespace, &b.key)));
        if let Some(limit) = query.limit {
            items.truncate(limit);
        }
        Ok(items)
    }
}
