use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{KestrelError, Result};
use crate::security::RoleMap;
use crate::types::NodeCategory;

/// Top-level Kestrel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default = "RoleMap::defaults")]
    pub roles: RoleMap,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub nodes: NodesConfig,
    #[serde(default)]
    pub store: Option<StoreConfig>,
    #[serde(default)]
    pub log: Option<LogConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            roles: RoleMap::defaults(),
            runtime: RuntimeConfig::default(),
            nodes: NodesConfig::default(),
            store: None,
            log: None,
        }
    }
}

/// Fixed configuration of the policy engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Absolute directories every resolved file path must fall inside.
    #[serde(default = "default_sandbox_roots")]
    pub sandbox_roots: Vec<PathBuf>,
    /// Anchor for relative paths (defaults to the first sandbox root).
    #[serde(default)]
    pub default_root: Option<PathBuf>,
    /// Transport schemes allowed for outbound targets.
    #[serde(default = "default_allowed_schemes")]
    pub allowed_schemes: Vec<String>,
}

fn default_sandbox_roots() -> Vec<PathBuf> {
    vec![std::env::temp_dir().join("kestrel")]
}

fn default_allowed_schemes() -> Vec<String> {
    vec!["http".to_string(), "https".to_string()]
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            sandbox_roots: default_sandbox_roots(),
            default_root: None,
            allowed_schemes: default_allowed_schemes(),
        }
    }
}

impl PolicyConfig {
    /// Root used to anchor relative paths.
    pub fn effective_default_root(&self) -> Option<PathBuf> {
        self.default_root
            .clone()
            .or_else(|| self.sandbox_roots.first().cloned())
    }
}

/// Orchestrator limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Maximum node steps in one run (cycle guard).
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Timeout for nodes whose schema declares none.
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,
    /// Acquire declared resource locks around each node call.
    #[serde(default = "default_enforce_locks")]
    pub enforce_locks: bool,
}

fn default_max_steps() -> usize {
    1000
}

fn default_enforce_locks() -> bool {
    true
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            default_timeout_ms: None,
            enforce_locks: default_enforce_locks(),
        }
    }
}

/// Which built-in node categories the loader registers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodesConfig {
    #[serde(default = "default_categories")]
    pub categories: Vec<NodeCategory>,
}

fn default_categories() -> Vec<NodeCategory> {
    NodeCategory::ALL.to_vec()
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database used by data nodes.
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// tracing EnvFilter directive, e.g. `kestrel=debug`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "kestrel=info,warn".to_string()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| KestrelError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| KestrelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "Config file absent, using defaults");
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.policy.sandbox_roots.is_empty() {
            return Err(KestrelError::Config(
                "policy.sandbox_roots must not be empty".to_string(),
            ));
        }
        for root in &self.policy.sandbox_roots {
            if !root.is_absolute() {
                return Err(KestrelError::Config(format!(
                    "sandbox root must be absolute: {}",
                    root.display()
                )));
            }
        }
        if let Some(ref default_root) = self.policy.default_root {
            if !default_root.is_absolute() {
                return Err(KestrelError::Config(format!(
                    "default root must be absolute: {}",
                    default_root.display()
                )));
            }
        }
        if self.runtime.max_steps == 0 {
            return Err(KestrelError::Config(
                "runtime.max_steps must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// tracing filter directive from config, if any.
    pub fn log_filter(&self) -> Option<&str> {
        self.log.as_ref().map(|l| l.filter.as_str())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::Capability;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_KESTREL_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_KESTREL_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_KESTREL_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_KESTREL_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_KESTREL_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: AppConfig = toml::from_str("").unwrap();
        assert_eq!(config.runtime.max_steps, 1000);
        assert!(config.runtime.enforce_locks);
        assert!(config.runtime.default_timeout_ms.is_none());
        assert_eq!(config.policy.allowed_schemes, vec!["http", "https"]);
        assert_eq!(config.nodes.categories.len(), 5);
        let cap: Capability = "logic:condition".parse().unwrap();
        assert!(config.roles.covers("staff", &cap));
        assert!(config.store.is_none());
    }

    #[test]
    fn test_roles_override_defaults() {
        let toml_str = r#"
[roles]
operator = ["browser:*"]
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(!config.roles.contains_role("admin"));
        let cap: Capability = "browser:navigate".parse().unwrap();
        assert!(config.roles.covers("operator", &cap));
    }

    #[test]
    fn test_default_root_falls_back_to_first_root() {
        let policy = PolicyConfig {
            sandbox_roots: vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")],
            default_root: None,
            allowed_schemes: default_allowed_schemes(),
        };
        assert_eq!(policy.effective_default_root(), Some(PathBuf::from("/srv/a")));
    }

    #[test]
    fn test_relative_root_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kestrel.toml");
        std::fs::write(
            &path,
            r#"
[policy]
sandbox_roots = ["relative/dir"]
"#,
        )
        .unwrap();
        let err = AppConfig::load(&path).unwrap_err();
        assert!(matches!(err, KestrelError::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert_eq!(err.kind(), "ConfigNotFound");
        let config = AppConfig::load_or_default(Path::new("/definitely/not/here.toml")).unwrap();
        assert!(config.roles.contains_role("staff"));
    }
}
