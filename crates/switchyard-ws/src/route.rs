//! Upgrade path routing.
//!
//! Paths are either exact (`/ws`) or trailing-wildcard (`/chat/*`, which
//! matches any path starting with `/chat/`). An exact match always wins; among
//! wildcards the longest prefix wins.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::connection::Connection;
use crate::error::WsResult;
use crate::request::UpgradeRequest;

/// A boxed future that can be sent across threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler for established connections.
///
/// The handler runs on the connection's driver task. Listeners registered
/// before its first `.await` are in place before any frame is read. An `Err`
/// return, or a panic, closes the connection with 1011.
pub trait WsHandler: Send + Sync + 'static {
    /// Handle a newly established connection.
    fn call(&self, conn: Connection, request: UpgradeRequest) -> BoxFuture<'static, WsResult<()>>;
}

impl<F, Fut> WsHandler for F
where
    F: Fn(Connection, UpgradeRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = WsResult<()>> + Send + 'static,
{
    fn call(&self, conn: Connection, request: UpgradeRequest) -> BoxFuture<'static, WsResult<()>> {
        Box::pin(self(conn, request))
    }
}

/// A matched route.
#[derive(Clone)]
pub struct RouteMatch {
    /// The pattern that matched, as registered.
    pub pattern: String,
    /// The handler for the pattern.
    pub handler: Arc<dyn WsHandler>,
}

impl std::fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMatch")
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

/// Path to handler table.
#[derive(Default)]
pub struct RouteTable {
    exact: HashMap<String, Arc<dyn WsHandler>>,
    /// `(prefix, pattern, handler)`, longest prefix first.
    wildcards: Vec<(String, String, Arc<dyn WsHandler>)>,
}

impl RouteTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `pattern`, replacing any previous handler.
    pub fn insert(&mut self, pattern: &str, handler: Arc<dyn WsHandler>) {
        if let Some(prefix) = pattern.strip_suffix('*') {
            self.wildcards.retain(|(p, _, _)| p != prefix);
            self.wildcards
                .push((prefix.to_string(), pattern.to_string(), handler));
            self.wildcards
                .sort_by(|(a, _, _), (b, _, _)| b.len().cmp(&a.len()));
        } else {
            self.exact.insert(pattern.to_string(), handler);
        }
    }

    /// Find the handler for `path`.
    pub fn lookup(&self, path: &str) -> Option<RouteMatch> {
        if let Some(handler) = self.exact.get(path) {
            return Some(RouteMatch {
                pattern: path.to_string(),
                handler: Arc::clone(handler),
            });
        }
        self.wildcards
            .iter()
            .find(|(prefix, _, _)| path.starts_with(prefix.as_str()))
            .map(|(_, pattern, handler)| RouteMatch {
                pattern: pattern.clone(),
                handler: Arc::clone(handler),
            })
    }

    /// Number of registered patterns.
    pub fn len(&self) -> usize {
        self.exact.len() + self.wildcards.len()
    }

    /// Check if no patterns are registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All registered patterns, sorted.
    pub fn patterns(&self) -> Vec<String> {
        let mut patterns: Vec<String> = self
            .exact
            .keys()
            .cloned()
            .chain(self.wildcards.iter().map(|(_, p, _)| p.clone()))
            .collect();
        patterns.sort();
        patterns
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("patterns", &self.patterns())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> Arc<dyn WsHandler> {
        Arc::new(|_conn: Connection, _req: UpgradeRequest| async {
            Ok::<(), crate::error::WsError>(())
        })
    }

    fn matched(table: &RouteTable, path: &str) -> Option<String> {
        table.lookup(path).map(|m| m.pattern)
    }

    #[test]
    fn test_exact_match() {
        let mut table = RouteTable::new();
        table.insert("/ws", handler());
        assert_eq!(matched(&table, "/ws").as_deref(), Some("/ws"));
        assert_eq!(matched(&table, "/ws/extra"), None);
        assert_eq!(matched(&table, "/other"), None);
    }

    #[test]
    fn test_wildcard_match() {
        let mut table = RouteTable::new();
        table.insert("/chat/*", handler());
        assert_eq!(matched(&table, "/chat/room1").as_deref(), Some("/chat/*"));
        assert_eq!(matched(&table, "/chat/"), Some("/chat/*".to_string()));
        assert_eq!(matched(&table, "/chat"), None);
    }

    #[test]
    fn test_exact_beats_wildcard() {
        let mut table = RouteTable::new();
        table.insert("/chat/*", handler());
        table.insert("/chat/admin", handler());
        assert_eq!(matched(&table, "/chat/admin").as_deref(), Some("/chat/admin"));
        assert_eq!(matched(&table, "/chat/lobby").as_deref(), Some("/chat/*"));
    }

    #[test]
    fn test_longest_wildcard_wins() {
        let mut table = RouteTable::new();
        table.insert("/*", handler());
        table.insert("/api/*", handler());
        table.insert("/api/v2/*", handler());
        assert_eq!(matched(&table, "/api/v2/feed").as_deref(), Some("/api/v2/*"));
        assert_eq!(matched(&table, "/api/v1/feed").as_deref(), Some("/api/*"));
        assert_eq!(matched(&table, "/anything").as_deref(), Some("/*"));
    }

    #[test]
    fn test_reinsert_replaces() {
        let mut table = RouteTable::new();
        table.insert("/a/*", handler());
        table.insert("/a/*", handler());
        table.insert("/b", handler());
        table.insert("/b", handler());
        assert_eq!(table.len(), 2);
        assert_eq!(table.patterns(), vec!["/a/*".to_string(), "/b".to_string()]);
    }
}
