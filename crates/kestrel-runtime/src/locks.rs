use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Named resource locks shared by every run of an orchestrator.
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Guards for one node call. Dropping it releases every lock.
pub struct LockSet {
    tokens: Vec<String>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, token: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(token.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Acquire every token, deduplicated and in sorted order so two callers
    /// never wait on each other in opposite orders.
    pub async fn acquire(&self, tokens: &[String]) -> LockSet {
        let mut tokens: Vec<String> = tokens.to_vec();
        tokens.sort_unstable();
        tokens.dedup();

        let mut guards = Vec::with_capacity(tokens.len());
        for token in &tokens {
            guards.push(self.lock_for(token).lock_owned().await);
        }
        if !tokens.is_empty() {
            debug!(tokens = ?tokens, "Resource locks acquired");
        }
        LockSet {
            tokens,
            _guards: guards,
        }
    }

    /// Number of distinct tokens ever requested.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
