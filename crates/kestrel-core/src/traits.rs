use std::path::PathBuf;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::Result;

/// One row returned by a data store query, keyed by column name.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A live interactive session driven by session nodes.
///
/// The launcher behind it is external; nodes only see this surface.
pub trait SessionHandle: Send + Sync + 'static {
    /// Navigate the session to a URL. Callers run the egress check first.
    fn navigate(&self, url: String) -> BoxFuture<'_, Result<()>>;

    /// Whether an element matching the selector currently exists.
    fn find_element(&self, selector: String) -> BoxFuture<'_, Result<bool>>;

    fn click(&self, selector: String) -> BoxFuture<'_, Result<()>>;

    fn type_text(&self, selector: String, text: String) -> BoxFuture<'_, Result<()>>;

    fn wait_for_selector(&self, selector: String, timeout: Duration) -> BoxFuture<'_, Result<()>>;

    fn wait_for_navigation(&self, timeout: Duration) -> BoxFuture<'_, Result<()>>;

    fn current_url(&self) -> BoxFuture<'_, Result<String>>;

    fn read_text(&self, selector: String) -> BoxFuture<'_, Result<String>>;

    /// Attach a local file to a file input. The path has already been sandbox-resolved.
    fn upload_file(&self, selector: String, path: PathBuf) -> BoxFuture<'_, Result<()>>;

    /// Send a single key press to the focused element.
    fn press_key(&self, key: String) -> BoxFuture<'_, Result<()>>;
}

/// Data store handle. Parameterized queries only.
pub trait DataStore: Send + Sync + 'static {
    /// Run a read query and return its rows.
    fn query(&self, sql: String, params: Vec<serde_json::Value>) -> BoxFuture<'_, Result<Vec<Row>>>;

    /// Run a write statement and return the affected-row count.
    fn execute(&self, sql: String, params: Vec<serde_json::Value>) -> BoxFuture<'_, Result<u64>>;
}
