//! Per-connection cache of named prepared statements.

use std::num::NonZeroUsize;

use lru::LruCache;

use super::protocol::Column;

/// A statement the server has parsed and described.
#[derive(Debug, Clone)]
pub struct PreparedStatement {
    /// Server-side name (`txkit_s1`, ...)
    pub name: String,
    /// Result columns; empty for statements that return no rows
    pub columns: Vec<Column>,
}

/// LRU map from query text to prepared statement.
pub struct StatementCache {
    cache: LruCache<String, PreparedStatement>,
    next_id: u64,
}

impl StatementCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: LruCache::new(NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN)),
            next_id: 0,
        }
    }

    /// Look up a statement and mark it recently used.
    pub fn get(&mut self, query: &str) -> Option<&PreparedStatement> {
        self.cache.get(query)
    }

    pub fn contains(&self, query: &str) -> bool {
        self.cache.contains(query)
    }

    pub fn next_name(&mut self) -> String {
        self.next_id += 1;
        format!("txkit_s{}", self.next_id)
    }

    /// Make room for one more statement, returning the name of the statement
    /// that has to be closed on the server, if any.
    pub fn evict_for_insert(&mut self) -> Option<String> {
        if self.cache.len() < self.cache.cap().get() {
            return None;
        }
        self.cache.pop_lru().map(|(_, stmt)| stmt.name)
    }

    pub fn insert(&mut self, query: String, statement: PreparedStatement) {
        self.cache.put(query, statement);
    }

    pub fn remove(&mut self, query: &str) -> Option<PreparedStatement> {
        self.cache.pop(query)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
