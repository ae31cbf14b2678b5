//! Path policy for file tools.
//!
//! File tools may only touch paths inside the allowed roots (when any are
//! configured) and never inside a forbidden prefix. Parent-directory
//! components are rejected outright.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("Path '{path}' is outside allowed roots")]
    OutsideAllowedRoots { path: String },

    #[error("Path '{path}' is inside forbidden path '{pattern}'")]
    Forbidden { path: String, pattern: String },

    #[error("Path traversal detected in '{path}'")]
    Traversal { path: String },

    #[error("Cannot resolve path '{path}': {reason}")]
    Unresolvable { path: String, reason: String },
}

/// Allowed roots and forbidden prefixes, pre-expanded.
#[derive(Debug, Clone, Default)]
pub struct PathPolicy {
    allowed_roots: Vec<(String, PathBuf)>,
    forbidden: Vec<(String, PathBuf)>,
}

impl PathPolicy {
    pub fn new(allowed_roots: &[String], forbidden_paths: &[String]) -> Self {
        let expand = |patterns: &[String]| {
            patterns
                .iter()
                .map(|p| (p.clone(), normalize(&expand_tilde(p))))
                .collect()
        };
        Self {
            allowed_roots: expand(allowed_roots),
            forbidden: expand(forbidden_paths),
        }
    }

    /// No roots, no forbidden prefixes.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Validate `raw` and return the resolved absolute path.
    pub fn check(&self, raw: &str) -> Result<PathBuf, PathError> {
        let input = Path::new(raw);

        if input.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(PathError::Traversal { path: raw.into() });
        }

        let absolute = if input.is_absolute() {
            input.to_path_buf()
        } else {
            std::env::current_dir()
                .map_err(|e| PathError::Unresolvable {
                    path: raw.into(),
                    reason: e.to_string(),
                })?
                .join(input)
        };
        let resolved = normalize(&absolute);

        if let Some((pattern, _)) = self.forbidden.iter().find(|(_, prefix)| resolved.starts_with(prefix)) {
            return Err(PathError::Forbidden {
                path: raw.into(),
                pattern: pattern.clone(),
            });
        }

        if !self.allowed_roots.is_empty() && !self.allowed_roots.iter().any(|(_, root)| resolved.starts_with(root)) {
            return Err(PathError::OutsideAllowedRoots { path: raw.into() });
        }

        Ok(resolved)
    }
}

/// Resolve symlinks for the longest existing ancestor and re-attach the rest,
/// so paths that do not exist yet (new files) still compare correctly.
fn normalize(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();

    while !existing.exists() {
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }

    let mut resolved = existing.canonicalize().unwrap_or(existing);
    for name in tail.into_iter().rev() {
        resolved.push(name);
    }
    resolved
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~")
        && (rest.is_empty() || rest.starts_with('/'))
        && let Ok(home) = std::env::var("HOME")
    {
        return PathBuf::from(format!("{home}{rest}"));
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_rejected() {
        let policy = PathPolicy::unrestricted();
        assert!(matches!(policy.check("../../../etc/passwd"), Err(PathError::Traversal { .. })));
        assert!(matches!(policy.check("/home/user/../../etc/passwd"), Err(PathError::Traversal { .. })));
    }

    #[test]
    fn forbidden_prefix_blocked() {
        let policy = PathPolicy::new(&[], &["/etc".into()]);
        match policy.check("/etc/passwd") {
            Err(PathError::Forbidden { pattern, .. }) => assert_eq!(pattern, "/etc"),
            other => panic!("Expected Forbidden, got {other:?}"),
        }
        // Component-wise, not string prefix
        assert!(policy.check("/etcetera/file").is_ok());
    }

    #[test]
    fn allowed_roots_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let policy = PathPolicy::new(&[root], &[]);

        let inside = dir.path().join("src").join("main.rs");
        assert!(policy.check(inside.to_str().unwrap()).is_ok());
        assert!(matches!(
            policy.check("/definitely/elsewhere.txt"),
            Err(PathError::OutsideAllowedRoots { .. })
        ));
    }

    #[test]
    fn forbidden_takes_precedence_over_allowed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_string_lossy().to_string();
        let secret = dir.path().join(".ssh").to_string_lossy().to_string();
        let policy = PathPolicy::new(&[root], &[secret]);

        let key = dir.path().join(".ssh").join("id_rsa");
        assert!(matches!(policy.check(key.to_str().unwrap()), Err(PathError::Forbidden { .. })));
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let policy = PathPolicy::unrestricted();
        let resolved = policy.check("some/new/file.txt").unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("some/new/file.txt"));
    }
}
