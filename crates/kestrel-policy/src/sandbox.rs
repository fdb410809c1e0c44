use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use kestrel_core::config::PolicyConfig;
use kestrel_core::error::{KestrelError, Result};

/// Filesystem sandbox: every resolved path must fall inside one of the roots.
#[derive(Debug, Clone)]
pub struct Sandbox {
    roots: Vec<PathBuf>,
    default_root: Option<PathBuf>,
}

impl Sandbox {
    /// Roots are normalized lexically; relative roots are dropped.
    pub fn new(roots: Vec<PathBuf>, default_root: Option<PathBuf>) -> Self {
        let roots: Vec<PathBuf> = roots
            .into_iter()
            .filter(|r| r.is_absolute())
            .filter_map(|r| normalize(&r).ok())
            .collect();
        let default_root = default_root
            .filter(|r| r.is_absolute())
            .and_then(|r| normalize(&r).ok());
        Self {
            roots,
            default_root,
        }
    }

    /// Relative paths anchor at `default_root`, else the first sandbox root.
    pub fn from_config(config: &PolicyConfig) -> Self {
        Self::new(config.sandbox_roots.clone(), config.effective_default_root())
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn default_root(&self) -> Option<&Path> {
        self.default_root.as_deref()
    }

    /// Resolve a candidate path. Callers must use the returned path, never the input.
    pub fn resolve(&self, candidate: &str) -> Result<PathBuf> {
        if candidate.trim().is_empty() {
            return Err(KestrelError::SandboxOutsideRoot("empty path".to_string()));
        }
        let normalized = normalize(Path::new(candidate))?;

        let absolute = if normalized.is_absolute() {
            normalized
        } else {
            match self.default_root {
                Some(ref root) => root.join(normalized),
                None => return Err(KestrelError::SandboxOutsideRoot(candidate.to_string())),
            }
        };

        if !self.roots.iter().any(|r| absolute.starts_with(r)) {
            return Err(KestrelError::SandboxOutsideRoot(
                absolute.display().to_string(),
            ));
        }

        self.check_links(&absolute)
    }

    /// Re-check through the deepest existing ancestor so a symlink inside a
    /// root cannot point outside it.
    fn check_links(&self, absolute: &Path) -> Result<PathBuf> {
        let mut existing = absolute;
        let mut suffix: Vec<OsString> = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    suffix.push(name.to_os_string());
                    existing = parent;
                }
                _ => return Ok(absolute.to_path_buf()),
            }
        }

        let mut canonical = std::fs::canonicalize(existing)?;
        for name in suffix.iter().rev() {
            canonical.push(name);
        }

        let inside = self.roots.iter().any(|root| {
            let root = std::fs::canonicalize(root).unwrap_or_else(|_| root.clone());
            canonical.starts_with(root)
        });
        if inside {
            Ok(canonical)
        } else {
            Err(KestrelError::SandboxOutsideRoot(
                canonical.display().to_string(),
            ))
        }
    }
}

/// Lexical normalization. A `..` that cannot be folded away is a traversal.
fn normalize(path: &Path) -> Result<PathBuf> {
    let mut parts: Vec<Component<'_>> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                _ => {
                    return Err(KestrelError::SandboxTraversal(
                        path.display().to_string(),
                    ))
                }
            },
            other => parts.push(other),
        }
    }
    Ok(parts.iter().collect())
}
