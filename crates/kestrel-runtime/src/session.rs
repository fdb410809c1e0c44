use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use tracing::info;

use kestrel_core::error::Result;
use kestrel_core::traits::SessionHandle;

/// Session that performs nothing and logs every action.
///
/// Lets the CLI walk a graph without a live session attached. Lookups answer
/// with empty values; `find_element` reports nothing found.
pub struct DryRunSession {
    url: Mutex<String>,
}

impl DryRunSession {
    pub fn new() -> Self {
        Self {
            url: Mutex::new("about:blank".to_string()),
        }
    }
}

impl Default for DryRunSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle for DryRunSession {
    fn navigate(&self, url: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(url = %url, "dry-run: navigate");
            *self.url.lock().unwrap_or_else(|e| e.into_inner()) = url;
            Ok(())
        })
    }

    fn find_element(&self, selector: String) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            info!(selector = %selector, "dry-run: find element");
            Ok(false)
        })
    }

    fn click(&self, selector: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(selector = %selector, "dry-run: click");
            Ok(())
        })
    }

    fn type_text(&self, selector: String, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(selector = %selector, chars = text.chars().count(), "dry-run: type text");
            Ok(())
        })
    }

    fn wait_for_selector(&self, selector: String, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(selector = %selector, timeout_ms = timeout.as_millis() as u64, "dry-run: wait for selector");
            Ok(())
        })
    }

    fn wait_for_navigation(&self, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(timeout_ms = timeout.as_millis() as u64, "dry-run: wait for navigation");
            Ok(())
        })
    }

    fn current_url(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { Ok(self.url.lock().unwrap_or_else(|e| e.into_inner()).clone()) })
    }

    fn read_text(&self, selector: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            info!(selector = %selector, "dry-run: read text");
            Ok(String::new())
        })
    }

    fn upload_file(&self, selector: String, path: PathBuf) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(selector = %selector, path = %path.display(), "dry-run: upload file");
            Ok(())
        })
    }

    fn press_key(&self, key: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            info!(key = %key, "dry-run: press key");
            Ok(())
        })
    }
}
