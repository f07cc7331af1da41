//! Connection-scoped LRU cache of server-side prepared statements.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::message::PrepareResult;

/// Prepared statements keyed by SQL text.
///
/// Statements leaving the cache must be closed on the server; `put` hands
/// them back to the caller for that.
#[derive(Debug)]
pub struct PrepareCache {
    cache: LruCache<String, Arc<PrepareResult>>,
}

impl PrepareCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    /// Cached statement for `sql`, marked as most recently used.
    pub fn get(&mut self, sql: &str) -> Option<Arc<PrepareResult>> {
        self.cache.get(sql).cloned()
    }

    /// Cache `prepare` under `sql`.
    ///
    /// Returns the statement to use, and a statement that is no longer cached:
    /// the evicted least recently used entry, or `prepare` itself when `sql`
    /// was already cached.
    pub fn put(
        &mut self,
        sql: String,
        prepare: Arc<PrepareResult>,
    ) -> (Arc<PrepareResult>, Option<Arc<PrepareResult>>) {
        if let Some(existing) = self.cache.get(&sql) {
            let existing = Arc::clone(existing);
            if existing.statement_id() == prepare.statement_id() {
                return (existing, None);
            }
            return (existing, Some(prepare));
        }
        let evicted = self.cache.push(sql, Arc::clone(&prepare));
        (prepare, evicted.map(|(_, statement)| statement))
    }

    /// Forget every statement, after the server dropped them.
    pub fn reset(&mut self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
