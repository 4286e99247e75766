//! Startup sequencing: resolve the path registry, verify this crate's
//! own trust-root manifest, then (server mode only) check the inference
//! server's port/process/model identity — all before a single tool is
//! registered or a system prompt is built.
//!
//! Mirrors the source's `config.py` precedence rule (defaults < config
//! file < CLI flags, explicit wins) for *which checks run*, not the
//! checks themselves: `--generate-manifest`/`--verify-only` are handled
//! by the CLI layer before this sequence is reached at all, since both
//! are one-shot operations that exit rather than continue to a normal
//! session.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::trust::integrity::{self, MANIFEST_FILENAME, default_trust_roots};
use crate::trust::path_registry::PathRegistry;
use crate::trust::server_trust::ServerTrust;

/// Result of the full boot sequence. Holds the resolved path registry so
/// later components (server trust, sandboxed `bash`) can reuse it rather
/// than re-resolving binaries.
pub struct BootOutcome {
    pub registry: PathRegistry,
    pub warnings: Vec<String>,
}

/// The crate's own source directory, rooted at build time. Only
/// meaningful when the binary is run from (or next to) the checkout it
/// was built from — true for the common "clone, build, run" workflow
/// this is designed around. A copied-elsewhere binary simply skips
/// integrity verification, same as a first-time boot with no manifest.
fn default_src_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("src")
}

fn default_manifest_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(MANIFEST_FILENAME)
}

/// Env var carrying the manifest passphrase for non-interactive session
/// startup (`chat`/`ask`). `--verify-only`/`--generate-manifest` prompt
/// interactively instead, since those are one-shot operator commands.
pub const PASSPHRASE_ENV_VAR: &str = "COREWARD_MANIFEST_PASSPHRASE";

/// Run path registry resolution and (if a manifest exists and a
/// passphrase is available) integrity verification. Returns `Err` only
/// for conditions the spec treats as boot-fatal: a required binary
/// missing, or a tier ≤2 integrity mismatch.
pub fn run(_app_config: &Config, passphrase: Option<&str>) -> Result<BootOutcome> {
    let mut warnings = Vec::new();

    let registry = PathRegistry::resolve_all().map_err(anyhow::Error::from)?;
    warnings.extend(registry.warnings().iter().cloned());

    let src_dir = default_src_dir();
    let manifest_path = default_manifest_path();
    if src_dir.is_dir() && manifest_path.exists() {
        match passphrase {
            Some(pass) => {
                let result = integrity::verify(&src_dir, &manifest_path, pass);
                if result.abort {
                    anyhow::bail!("Integrity verification failed: {}", result.errors.join("; "));
                }
                warnings.extend(result.warnings);
            }
            None => warnings.push(format!(
                "Integrity manifest present but {} is unset; skipping verification for this session.",
                PASSPHRASE_ENV_VAR
            )),
        }
    }

    Ok(BootOutcome { registry, warnings })
}

/// `--generate-manifest`: (re)generate the integrity manifest over the
/// default trust-root set, prompting for a new passphrase.
pub fn generate_manifest() -> Result<PathBuf> {
    let passphrase = integrity::prompt_new_passphrase().context("reading passphrase")?;
    let src_dir = default_src_dir();
    let manifest_path = default_manifest_path();
    integrity::generate(&src_dir, &manifest_path, &passphrase, &default_trust_roots())
}

/// `--verify-only`: verify the existing manifest and exit without
/// starting a session. Returns `Ok(true)` if verification passed
/// (possibly with warnings), `Ok(false)` if it failed non-fatally.
pub fn verify_only() -> Result<bool> {
    let passphrase = integrity::prompt_existing_passphrase().context("reading passphrase")?;
    let src_dir = default_src_dir();
    let manifest_path = default_manifest_path();
    let result = integrity::verify(&src_dir, &manifest_path, &passphrase);
    for warning in &result.warnings {
        tracing::warn!("{}", warning);
    }
    for error in &result.errors {
        tracing::error!("{}", error);
    }
    if result.abort {
        anyhow::bail!("Integrity verification failed: {}", result.errors.join("; "));
    }
    Ok(result.ok)
}

/// Server-mode trust checks: port pre-check before binding, process and
/// model identity checks after connecting. Only meaningful when
/// `app_config.server.enabled` — callers should skip this entirely for
/// direct (non-server) model invocation.
pub async fn check_server_trust(app_config: &Config, registry: &PathRegistry) -> Result<Vec<String>> {
    let mut warnings = Vec::new();
    let trust = ServerTrust::new(
        app_config.server.bind.clone(),
        app_config.server.port,
        Some(registry),
        app_config.trust.expected_model.clone(),
    );

    let port_check = trust.check_port_available();
    if !port_check.ok {
        anyhow::bail!(port_check.error.unwrap_or_else(|| "port pre-check failed".to_string()));
    }

    let process_check = trust.verify_process();
    if !process_check.ok
        && let Some(err) = process_check.error
    {
        warnings.push(err);
    }

    if app_config.trust.expected_model.is_some() {
        let identity = trust.verify_model_identity(None).await;
        if !identity.ok
            && let Some(err) = identity.error
        {
            warnings.push(err);
        }
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_src_dir_points_at_crate_source_tree() {
        let dir = default_src_dir();
        assert!(dir.ends_with("src"));
    }

    #[test]
    fn default_manifest_path_sits_alongside_cargo_toml() {
        let path = default_manifest_path();
        assert_eq!(path.file_name().unwrap(), MANIFEST_FILENAME);
        assert_eq!(path.parent().unwrap(), Path::new(env!("CARGO_MANIFEST_DIR")));
    }
}
