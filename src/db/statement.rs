//! Prepared statement bookkeeping.
//!
//! The executor records, per connection, which templates it has prepared.
//! Entries live under the connection's [`ConnectionId`], so a statement
//! prepared on one backend session is never assumed to exist on another.

use crate::db::connection::ConnectionId;
use std::collections::HashMap;

/// Per-connection registry of command name → "currently prepared".
#[derive(Debug, Default)]
pub struct StatementCache {
    connections: HashMap<ConnectionId, HashMap<String, bool>>,
}

impl StatementCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `command` is believed to be prepared on `conn`.
    pub fn is_prepared(&self, conn: ConnectionId, command: &str) -> bool {
        self.connections
            .get(&conn)
            .and_then(|statements| statements.get(command))
            .copied()
            .unwrap_or(false)
    }

    /// Record a successful prepare. The connection's map is created lazily.
    pub fn mark_prepared(&mut self, conn: ConnectionId, command: &str) {
        self.connections
            .entry(conn)
            .or_default()
            .insert(command.to_string(), true);
    }

    /// Mark an entry as no longer prepared, keeping the key.
    pub fn mark_uncached(&mut self, conn: ConnectionId, command: &str) {
        if let Some(flag) = self
            .connections
            .get_mut(&conn)
            .and_then(|statements| statements.get_mut(command))
        {
            *flag = false;
        }
    }

    /// Remove an entry entirely.
    pub fn invalidate(&mut self, conn: ConnectionId, command: &str) -> bool {
        self.connections
            .get_mut(&conn)
            .and_then(|statements| statements.remove(command))
            .is_some()
    }

    /// Drop everything known about a connection that went away.
    pub fn forget(&mut self, conn: ConnectionId) -> usize {
        self.connections
            .remove(&conn)
            .map(|statements| statements.len())
            .unwrap_or(0)
    }

    /// Names currently marked prepared on `conn`, sorted.
    pub fn prepared(&self, conn: ConnectionId) -> Vec<String> {
        let mut names: Vec<String> = self
            .connections
            .get(&conn)
            .map(|statements| {
                statements
                    .iter()
                    .filter(|(_, prepared)| **prepared)
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Number of connections with at least one entry.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_basic_operations() {
        let mut cache = StatementCache::new();
        let conn = ConnectionId(1);
        assert!(!cache.is_prepared(conn, "insert_job"));

        cache.mark_prepared(conn, "insert_job");
        assert!(cache.is_prepared(conn, "insert_job"));
        assert_eq!(cache.prepared(conn), vec!["insert_job".to_string()]);
    }

    #[test]
    fn test_entries_do_not_leak_across_connections() {
        let mut cache = StatementCache::new();
        cache.mark_prepared(ConnectionId(1), "lock_job");

        assert!(cache.is_prepared(ConnectionId(1), "lock_job"));
        assert!(!cache.is_prepared(ConnectionId(2), "lock_job"));
        assert_eq!(cache.connection_count(), 1);
    }

    #[test]
    fn test_mark_uncached_keeps_other_entries() {
        let mut cache = StatementCache::new();
        let conn = ConnectionId(7);
        cache.mark_prepared(conn, "a");
        cache.mark_prepared(conn, "b");

        cache.mark_uncached(conn, "a");
        assert!(!cache.is_prepared(conn, "a"));
        assert!(cache.is_prepared(conn, "b"));
        assert_eq!(cache.prepared(conn), vec!["b".to_string()]);
    }

    #[test]
    fn test_invalidate_and_forget() {
        let mut cache = StatementCache::new();
        let conn = ConnectionId(3);
        cache.mark_prepared(conn, "a");
        cache.mark_prepared(conn, "b");

        assert!(cache.invalidate(conn, "a"));
        assert!(!cache.invalidate(conn, "a"));
        assert_eq!(cache.forget(conn), 1);
        assert_eq!(cache.connection_count(), 0);
        assert!(!cache.is_prepared(conn, "b"));
    }
}
