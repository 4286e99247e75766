//! Absolute path resolution for external binaries this crate shells out
//! to, resolved once at boot so later `Command::new(...)` calls never
//! trust `PATH` again — closes the PATH-poisoning gap a co-resident
//! attacker could otherwise exploit by placing a malicious `git` earlier
//! on `PATH`.

use std::collections::HashMap;
use std::path::PathBuf;

/// Binaries this crate cannot function without. Missing any of these is
/// a hard boot failure.
const REQUIRED_BINARIES: &[(&str, &[&str])] = &[("git", &["git"])];

/// Binaries used only by [`crate::trust::server_trust`]'s post-connect
/// process-identity check. Their availability varies by platform —
/// missing any of these degrades that check to a warning, never a boot
/// failure.
#[cfg(target_os = "linux")]
const OPTIONAL_BINARIES: &[(&str, &[&str])] = &[("ss", &["ss"]), ("lsof", &["lsof"]), ("ps", &["ps"])];
#[cfg(target_os = "macos")]
const OPTIONAL_BINARIES: &[(&str, &[&str])] = &[("lsof", &["lsof"]), ("ps", &["ps"])];
#[cfg(target_os = "windows")]
const OPTIONAL_BINARIES: &[(&str, &[&str])] =
    &[("netstat", &["netstat.exe", "netstat"]), ("tasklist", &["tasklist.exe", "tasklist"])];
#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
const OPTIONAL_BINARIES: &[(&str, &[&str])] = &[];

#[derive(Debug, thiserror::Error)]
#[error("required binaries not found: {0:?}. Ensure they are installed and on PATH.")]
pub struct MissingRequiredBinaries(pub Vec<String>);

/// Resolved absolute paths for binaries this crate shells out to.
#[derive(Debug, Default, Clone)]
pub struct PathRegistry {
    paths: HashMap<String, PathBuf>,
    warnings: Vec<String>,
}

impl PathRegistry {
    /// Resolve the required and optional binary sets. Returns an error
    /// only if a required binary is missing; optional misses become
    /// entries in [`PathRegistry::warnings`].
    pub fn resolve_all() -> Result<Self, MissingRequiredBinaries> {
        let mut registry = PathRegistry::default();
        let mut missing = Vec::new();

        for (name, candidates) in REQUIRED_BINARIES {
            match resolve_one(candidates) {
                Some(path) => {
                    registry.paths.insert(name.to_string(), path);
                }
                None => missing.push(name.to_string()),
            }
        }

        if !missing.is_empty() {
            return Err(MissingRequiredBinaries(missing));
        }

        for (name, candidates) in OPTIONAL_BINARIES {
            match resolve_one(candidates) {
                Some(path) => {
                    registry.paths.insert(name.to_string(), path);
                }
                None => registry
                    .warnings
                    .push(format!("Optional binary '{}' not found — some security checks will be skipped.", name)),
            }
        }

        Ok(registry)
    }

    /// Absolute path for a required binary. Panics if `name` was never
    /// registered — a programming error, not a runtime condition, since
    /// the required set is fixed at compile time and `resolve_all`
    /// returns an error before this could be reached otherwise.
    pub fn get(&self, name: &str) -> &std::path::Path {
        self.paths.get(name).unwrap_or_else(|| panic!("'{}' not in path registry", name))
    }

    /// Absolute path for an optional binary, or `None` if it wasn't
    /// found on this host.
    pub fn get_optional(&self, name: &str) -> Option<&std::path::Path> {
        self.paths.get(name).map(|p| p.as_path())
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

fn resolve_one(candidates: &[&str]) -> Option<PathBuf> {
    candidates.iter().find_map(|candidate| {
        let found = which::which(candidate).ok()?;
        std::fs::canonicalize(&found).ok().or(Some(found))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_all_finds_git_on_this_host() {
        let registry = PathRegistry::resolve_all().expect("git must be on PATH for tests to run");
        assert!(registry.get("git").is_absolute());
    }

    #[test]
    fn get_optional_returns_none_for_unknown_binary() {
        let registry = PathRegistry::default();
        assert!(registry.get_optional("nonexistent-binary-xyz").is_none());
    }

    #[test]
    #[should_panic(expected = "not in path registry")]
    fn get_panics_for_unresolved_required_binary() {
        let registry = PathRegistry::default();
        registry.get("git");
    }

    #[test]
    fn missing_required_binary_error_lists_names() {
        let err = MissingRequiredBinaries(vec!["git".to_string()]);
        assert!(err.to_string().contains("git"));
    }
}
