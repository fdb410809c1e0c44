//! Mocks and fixtures shared by Kestrel's test suites.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use kestrel_core::config::PolicyConfig;
use kestrel_core::error::{KestrelError, Result};
use kestrel_core::security::RoleMap;
use kestrel_core::traits::{DataStore, Row, SessionHandle};
use kestrel_policy::{PolicyEngine, StaticResolver};

// ── Policy fixtures ─────────────────────────────────────────────

/// Host table used by every test engine.
pub fn test_resolver() -> StaticResolver {
    let ip = |s: &str| s.parse::<IpAddr>().expect("fixture address");
    StaticResolver::new()
        .with("public.example", vec![ip("93.184.216.34")])
        .with("intranet.example", vec![ip("10.0.0.8")])
        .with("localhost", vec![ip("127.0.0.1"), ip("::1")])
        .with("v6-loopback.example", vec![ip("::1")])
        .with("link-local.example", vec![ip("fe80::1")])
}

/// Policy engine with the default roles, one sandbox root and the fixture resolver.
pub fn test_policy(root: &Path) -> PolicyEngine {
    test_policy_with_roles(root, RoleMap::defaults())
}

pub fn test_policy_with_roles(root: &Path, roles: RoleMap) -> PolicyEngine {
    let config = PolicyConfig {
        sandbox_roots: vec![root.to_path_buf()],
        default_root: None,
        allowed_schemes: vec!["http".into(), "https".into()],
    };
    PolicyEngine::new(roles, &config).with_resolver(Arc::new(test_resolver()))
}

// ── MockSession ─────────────────────────────────────────────────

/// One call recorded by [`MockSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAction {
    Navigate(String),
    FindElement(String),
    Click(String),
    TypeText(String, String),
    WaitForSelector(String, Duration),
    WaitForNavigation(Duration),
    CurrentUrl,
    ReadText(String),
    UploadFile(String, PathBuf),
    PressKey(String),
}

/// In-memory session that records every call.
pub struct MockSession {
    elements: HashSet<String>,
    texts: HashMap<String, String>,
    url: Mutex<String>,
    actions: Mutex<Vec<SessionAction>>,
    delay: Option<Duration>,
    failing: Option<String>,
}

impl MockSession {
    pub fn new() -> Self {
        Self {
            elements: HashSet::new(),
            texts: HashMap::new(),
            url: Mutex::new("about:blank".to_string()),
            actions: Mutex::new(Vec::new()),
            delay: None,
            failing: None,
        }
    }

    /// Mark a selector as present.
    pub fn with_element(mut self, selector: &str) -> Self {
        self.elements.insert(selector.to_string());
        self
    }

    /// Present selector with text content.
    pub fn with_text(mut self, selector: &str, text: &str) -> Self {
        self.elements.insert(selector.to_string());
        self.texts.insert(selector.to_string(), text.to_string());
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Calls targeting this selector fail with a session error.
    pub fn failing_on(mut self, selector: &str) -> Self {
        self.failing = Some(selector.to_string());
        self
    }

    pub fn actions(&self) -> Vec<SessionAction> {
        self.actions.lock().unwrap().clone()
    }

    async fn record(&self, action: SessionAction) -> Result<()> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let target = match &action {
            SessionAction::FindElement(s)
            | SessionAction::Click(s)
            | SessionAction::TypeText(s, _)
            | SessionAction::WaitForSelector(s, _)
            | SessionAction::ReadText(s)
            | SessionAction::UploadFile(s, _) => Some(s.clone()),
            _ => None,
        };
        self.actions.lock().unwrap().push(action);
        if target.is_some() && target == self.failing {
            return Err(KestrelError::Session(format!(
                "element {} is detached",
                target.unwrap_or_default()
            )));
        }
        Ok(())
    }
}

impl Default for MockSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle for MockSession {
    fn navigate(&self, url: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.record(SessionAction::Navigate(url.clone())).await?;
            *self.url.lock().unwrap() = url;
            Ok(())
        })
    }

    fn find_element(&self, selector: String) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let found = self.elements.contains(&selector);
            self.record(SessionAction::FindElement(selector)).await?;
            Ok(found)
        })
    }

    fn click(&self, selector: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.record(SessionAction::Click(selector)).await })
    }

    fn type_text(&self, selector: String, text: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.record(SessionAction::TypeText(selector, text)).await })
    }

    fn wait_for_selector(&self, selector: String, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.record(SessionAction::WaitForSelector(selector, timeout))
                .await
        })
    }

    fn wait_for_navigation(&self, timeout: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.record(SessionAction::WaitForNavigation(timeout)).await })
    }

    fn current_url(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.record(SessionAction::CurrentUrl).await?;
            Ok(self.url.lock().unwrap().clone())
        })
    }

    fn read_text(&self, selector: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let text = self.texts.get(&selector).cloned().unwrap_or_default();
            self.record(SessionAction::ReadText(selector)).await?;
            Ok(text)
        })
    }

    fn upload_file(&self, selector: String, path: PathBuf) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.record(SessionAction::UploadFile(selector, path)).await })
    }

    fn press_key(&self, key: String) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move { self.record(SessionAction::PressKey(key)).await })
    }
}

// ── MockDataStore ───────────────────────────────────────────────

/// Data store that returns canned rows and records every statement.
pub struct MockDataStore {
    rows: Vec<Row>,
    affected: u64,
    statements: Mutex<Vec<(String, Vec<Value>)>>,
}

impl MockDataStore {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            affected: 1,
            statements: Mutex::new(Vec::new()),
        }
    }

    /// Rows returned by every query. Non-object values are ignored.
    pub fn with_rows(mut self, rows: Vec<Value>) -> Self {
        self.rows = rows
            .into_iter()
            .filter_map(|r| match r {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        self
    }

    pub fn with_affected(mut self, affected: u64) -> Self {
        self.affected = affected;
        self
    }

    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.statements.lock().unwrap().clone()
    }
}

impl Default for MockDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for MockDataStore {
    fn query(&self, sql: String, params: Vec<Value>) -> BoxFuture<'_, Result<Vec<Row>>> {
        Box::pin(async move {
            self.statements.lock().unwrap().push((sql, params));
            Ok(self.rows.clone())
        })
    }

    fn execute(&self, sql: String, params: Vec<Value>) -> BoxFuture<'_, Result<u64>> {
        Box::pin(async move {
            self.statements.lock().unwrap().push((sql, params));
            Ok(self.affected)
        })
    }
}
