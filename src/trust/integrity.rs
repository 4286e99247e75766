//! Boot integrity verification via an HMAC-signed manifest over the
//! crate's own trust-root source files.
//!
//! Complements [`crate::security::signing`] (which signs the *user's*
//! `POLICY.md`) by signing the trust core's *own* source tree, so a
//! co-resident attacker who edits `sandbox.rs` or `tool_protocol.rs`
//! before the next boot gets caught rather than silently trusted.
//!
//! Same RustCrypto building blocks as `security::signing` (`sha2`,
//! `hmac`), plus PBKDF2 key derivation from an operator passphrase —
//! the manifest key isn't random like the device key, it must be
//! re-derivable across machines/boots from something the operator
//! remembers.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

pub const MANIFEST_FILENAME: &str = ".coreward.manifest";

pub const PBKDF2_ITERATIONS: u32 = 600_000;
const PBKDF2_SALT_LEN: usize = 32;
const PBKDF2_KEY_LEN: usize = 32;

/// Trust tier. 1-2 mismatches abort boot; 3-4 only warn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Tier {
    SecurityCore = 1,
    BootPath = 2,
    Runtime = 3,
    Tools = 4,
}

impl Tier {
    pub fn label(self) -> &'static str {
        match self {
            Tier::SecurityCore => "Security Core",
            Tier::BootPath => "Boot Path",
            Tier::Runtime => "Runtime",
            Tier::Tools => "Tools",
        }
    }

    pub fn is_abort_tier(self) -> bool {
        matches!(self, Tier::SecurityCore | Tier::BootPath)
    }
}

/// Default trust-root file set, relative to the crate's `src/` directory.
/// Callers that want a different layout (e.g. vendored plugins) can pass
/// their own map to [`generate`]/[`verify`] instead.
pub fn default_trust_roots() -> Vec<(Tier, &'static str)> {
    vec![
        (Tier::SecurityCore, "trust/sandbox.rs"),
        (Tier::SecurityCore, "trust/tool_protocol.rs"),
        (Tier::SecurityCore, "trust/permissions.rs"),
        (Tier::BootPath, "main.rs"),
        (Tier::BootPath, "config/mod.rs"),
        (Tier::BootPath, "trust/plugin_loader.rs"),
        (Tier::BootPath, "trust/integrity.rs"),
        (Tier::BootPath, "trust/path_registry.rs"),
        (Tier::BootPath, "trust/server_trust.rs"),
        (Tier::Runtime, "trust/context.rs"),
        (Tier::Runtime, "trust/agent_loop.rs"),
        (Tier::Runtime, "agent/providers.rs"),
        (Tier::Runtime, "security/audit.rs"),
        (Tier::Tools, "agent/tools.rs"),
        (Tier::Tools, "agent/sanitize.rs"),
        (Tier::Tools, "trust/confab.rs"),
    ]
}

/// Directories scanned for unexpected, un-manifested source files.
pub fn security_dirs() -> Vec<&'static str> {
    vec!["trust", "security"]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileEntry {
    sha256: Option<String>,
    tier: Tier,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
    #[serde(skip_serializing_if = "is_false", default)]
    missing: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    manifest_version: String,
    created: String,
    algorithm: String,
    pbkdf2_iterations: u32,
    salt: String,
    files: BTreeMap<String, FileEntry>,
    hmac: String,
}

/// Outcome of [`verify`]. `abort` is the authoritative signal for the
/// bootstrap sequence — callers must not proceed past an abort, even if
/// the caller would otherwise be tempted to "just warn and continue."
#[derive(Debug, Clone, Default)]
pub struct VerifyResult {
    pub ok: bool,
    pub abort: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Prompt for a passphrase twice and require they match, zeroizing both
/// buffers once compared.
pub fn prompt_new_passphrase() -> Result<Zeroizing<String>> {
    let first = Zeroizing::new(rpassword::prompt_password("Manifest signing passphrase: ")?);
    let second = Zeroizing::new(rpassword::prompt_password("Confirm passphrase: ")?);
    if *first != *second {
        anyhow::bail!("Passphrases do not match.");
    }
    if first.is_empty() {
        anyhow::bail!("Passphrase cannot be empty.");
    }
    Ok(first)
}

pub fn prompt_existing_passphrase() -> Result<Zeroizing<String>> {
    Ok(Zeroizing::new(rpassword::prompt_password("Manifest passphrase: ")?))
}

fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; PBKDF2_KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; PBKDF2_KEY_LEN]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, key.as_mut());
    key
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Canonical JSON: sorted keys (guaranteed by `BTreeMap`/struct field
/// order plus `serde_json`'s deterministic object serialization), no
/// whitespace. The HMAC is computed over this byte string.
fn canonical_json_without_hmac(manifest: &Manifest) -> Result<Vec<u8>> {
    #[derive(Serialize)]
    struct Unsigned<'a> {
        algorithm: &'a str,
        created: &'a str,
        files: &'a BTreeMap<String, FileEntry>,
        manifest_version: &'a str,
        pbkdf2_iterations: u32,
        salt: &'a str,
    }
    let unsigned = Unsigned {
        algorithm: &manifest.algorithm,
        created: &manifest.created,
        files: &manifest.files,
        manifest_version: &manifest.manifest_version,
        pbkdf2_iterations: manifest.pbkdf2_iterations,
        salt: &manifest.salt,
    };
    Ok(serde_json::to_vec(&unsigned)?)
}

/// Generate a signed manifest over `trust_roots` (resolved relative to
/// `src_dir`) and write it to `src_dir/../MANIFEST_FILENAME` (i.e. the
/// crate root, alongside `Cargo.toml`).
pub fn generate(
    src_dir: &Path,
    manifest_path: &Path,
    passphrase: &str,
    trust_roots: &[(Tier, &str)],
) -> Result<PathBuf> {
    let mut salt = [0u8; PBKDF2_SALT_LEN];
    rand::rng().fill(&mut salt);

    let key = derive_key(passphrase, &salt, PBKDF2_ITERATIONS);

    let mut files = BTreeMap::new();
    for (tier, relpath) in trust_roots {
        let abspath = src_dir.join(relpath);
        let entry = if abspath.exists() {
            FileEntry {
                sha256: Some(hash_file(&abspath)?),
                tier: *tier,
                size: Some(fs::metadata(&abspath)?.len()),
                missing: false,
            }
        } else {
            FileEntry { sha256: None, tier: *tier, size: None, missing: true }
        };
        files.insert(relpath.to_string(), entry);
    }

    let mut manifest = Manifest {
        manifest_version: "1.0".to_string(),
        created: chrono::Utc::now().to_rfc3339(),
        algorithm: "sha256".to_string(),
        pbkdf2_iterations: PBKDF2_ITERATIONS,
        salt: hex_encode(&salt),
        files,
        hmac: String::new(),
    };

    let payload = canonical_json_without_hmac(&manifest)?;
    let mut mac = HmacSha256::new_from_slice(key.as_ref())?;
    mac.update(&payload);
    manifest.hmac = hex_encode(&mac.finalize().into_bytes());

    let json = serde_json::to_string_pretty(&manifest)?;
    fs::write(manifest_path, json).with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path.to_path_buf())
}

/// Verify the manifest at `manifest_path` against `src_dir`. A missing
/// manifest is a warning, not an abort — first boot has nothing to
/// verify against yet.
pub fn verify(src_dir: &Path, manifest_path: &Path, passphrase: &str) -> VerifyResult {
    let mut result = VerifyResult { ok: true, abort: false, errors: Vec::new(), warnings: Vec::new() };

    if !manifest_path.exists() {
        result.warnings.push(
            "No integrity manifest found. Use --generate-manifest to create one.".to_string(),
        );
        return result;
    }

    let manifest_text = match fs::read_to_string(manifest_path) {
        Ok(t) => t,
        Err(e) => {
            result.ok = false;
            result.abort = true;
            result.errors.push(format!("Cannot read manifest: {}", e));
            return result;
        }
    };
    let manifest: Manifest = match serde_json::from_str(&manifest_text) {
        Ok(m) => m,
        Err(e) => {
            result.ok = false;
            result.abort = true;
            result.errors.push(format!("Cannot parse manifest: {}", e));
            return result;
        }
    };

    let salt = match hex_decode(&manifest.salt) {
        Ok(s) => s,
        Err(e) => {
            result.ok = false;
            result.abort = true;
            result.errors.push(format!("Invalid manifest format (salt): {}", e));
            return result;
        }
    };

    let key = derive_key(passphrase, &salt, manifest.pbkdf2_iterations);

    if manifest.hmac.is_empty() {
        result.ok = false;
        result.abort = true;
        result.errors.push("Manifest has no HMAC signature.".to_string());
        return result;
    }

    let payload = match canonical_json_without_hmac(&manifest) {
        Ok(p) => p,
        Err(e) => {
            result.ok = false;
            result.abort = true;
            result.errors.push(format!("Cannot re-serialize manifest: {}", e));
            return result;
        }
    };
    let mut mac = match HmacSha256::new_from_slice(key.as_ref()) {
        Ok(m) => m,
        Err(e) => {
            result.ok = false;
            result.abort = true;
            result.errors.push(format!("HMAC key initialization failed: {}", e));
            return result;
        }
    };
    mac.update(&payload);
    let expected_bytes = match hex_decode(&manifest.hmac) {
        Ok(b) => b,
        Err(_) => {
            result.ok = false;
            result.abort = true;
            result.errors.push(
                "HMAC verification FAILED — manifest has been tampered with or passphrase is incorrect."
                    .to_string(),
            );
            return result;
        }
    };
    if mac.verify_slice(&expected_bytes).is_err() {
        result.ok = false;
        result.abort = true;
        result.errors.push(
            "HMAC verification FAILED — manifest has been tampered with or passphrase is incorrect."
                .to_string(),
        );
        return result;
    }

    for (relpath, info) in &manifest.files {
        let abspath = src_dir.join(relpath);

        if info.missing {
            if abspath.exists() {
                let msg = format!("File appeared since manifest was created: {} (Tier {})", relpath, info.tier.label());
                push_tiered(&mut result, info.tier, msg);
            }
            continue;
        }

        if !abspath.exists() {
            let msg = format!("Missing trust root file: {} (Tier {})", relpath, info.tier.label());
            push_tiered(&mut result, info.tier, msg);
            continue;
        }

        let actual_hash = match hash_file(&abspath) {
            Ok(h) => h,
            Err(e) => {
                push_tiered(&mut result, info.tier, format!("Cannot hash {}: {}", relpath, e));
                continue;
            }
        };
        if Some(actual_hash) != info.sha256 {
            let msg = format!("TAMPERED: {} (Tier {} — {})", relpath, info.tier as u8, info.tier.label());
            push_tiered(&mut result, info.tier, msg);
        }
    }

    for sec_dir in security_dirs() {
        let dirpath = src_dir.join(sec_dir);
        let Ok(entries) = fs::read_dir(&dirpath) else { continue };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if !name.ends_with(".rs") || name.starts_with('_') || name.starts_with('.') {
                continue;
            }
            let relpath = format!("{}/{}", sec_dir, name);
            if !manifest.files.contains_key(&relpath) {
                result.warnings.push(format!("Unknown file in security directory: {}", relpath));
            }
        }
    }

    result
}

fn push_tiered(result: &mut VerifyResult, tier: Tier, msg: String) {
    if tier.is_abort_tier() {
        result.ok = false;
        result.abort = true;
        result.errors.push(msg);
    } else {
        result.warnings.push(msg);
    }
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        anyhow::bail!("odd-length hex string");
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| anyhow::anyhow!(e)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_src(dir: &Path, relpath: &str, content: &str) {
        let path = dir.join(relpath);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn toy_roots() -> Vec<(Tier, &'static str)> {
        vec![
            (Tier::SecurityCore, "trust/sandbox.rs"),
            (Tier::Runtime, "trust/context.rs"),
        ]
    }

    #[test]
    fn generate_then_verify_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tmp.path().join("src");
        write_src(&src_dir, "trust/sandbox.rs", "fn validate() {}");
        write_src(&src_dir, "trust/context.rs", "fn estimate() {}");

        let manifest_path = tmp.path().join(MANIFEST_FILENAME);
        generate(&src_dir, &manifest_path, "correct horse battery staple", &toy_roots()).unwrap();

        let result = verify(&src_dir, &manifest_path, "correct horse battery staple");
        assert!(result.ok);
        assert!(!result.abort);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn wrong_passphrase_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tmp.path().join("src");
        write_src(&src_dir, "trust/sandbox.rs", "fn validate() {}");
        write_src(&src_dir, "trust/context.rs", "fn estimate() {}");

        let manifest_path = tmp.path().join(MANIFEST_FILENAME);
        generate(&src_dir, &manifest_path, "right passphrase", &toy_roots()).unwrap();

        let result = verify(&src_dir, &manifest_path, "wrong passphrase");
        assert!(!result.ok);
        assert!(result.abort);
    }

    #[test]
    fn tier1_tamper_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tmp.path().join("src");
        write_src(&src_dir, "trust/sandbox.rs", "fn validate() {}");
        write_src(&src_dir, "trust/context.rs", "fn estimate() {}");

        let manifest_path = tmp.path().join(MANIFEST_FILENAME);
        generate(&src_dir, &manifest_path, "pass", &toy_roots()).unwrap();

        write_src(&src_dir, "trust/sandbox.rs", "fn validate() { /* backdoored */ }");

        let result = verify(&src_dir, &manifest_path, "pass");
        assert!(!result.ok);
        assert!(result.abort);
        assert!(result.errors.iter().any(|e| e.contains("TAMPERED")));
    }

    #[test]
    fn tier3_tamper_only_warns() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tmp.path().join("src");
        write_src(&src_dir, "trust/sandbox.rs", "fn validate() {}");
        write_src(&src_dir, "trust/context.rs", "fn estimate() {}");

        let manifest_path = tmp.path().join(MANIFEST_FILENAME);
        generate(&src_dir, &manifest_path, "pass", &toy_roots()).unwrap();

        write_src(&src_dir, "trust/context.rs", "fn estimate() { /* modified */ }");

        let result = verify(&src_dir, &manifest_path, "pass");
        assert!(result.ok);
        assert!(!result.abort);
        assert!(result.warnings.iter().any(|w| w.contains("TAMPERED")));
    }

    #[test]
    fn missing_manifest_warns_without_aborting() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tmp.path().join("src");
        fs::create_dir_all(&src_dir).unwrap();
        let manifest_path = tmp.path().join(MANIFEST_FILENAME);

        let result = verify(&src_dir, &manifest_path, "whatever");
        assert!(result.ok);
        assert!(!result.abort);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn missing_tier1_file_at_verify_time_aborts() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tmp.path().join("src");
        write_src(&src_dir, "trust/sandbox.rs", "fn validate() {}");
        write_src(&src_dir, "trust/context.rs", "fn estimate() {}");

        let manifest_path = tmp.path().join(MANIFEST_FILENAME);
        generate(&src_dir, &manifest_path, "pass", &toy_roots()).unwrap();

        fs::remove_file(src_dir.join("trust/sandbox.rs")).unwrap();

        let result = verify(&src_dir, &manifest_path, "pass");
        assert!(result.abort);
    }

    #[test]
    fn unknown_file_in_security_dir_warns() {
        let tmp = tempfile::tempdir().unwrap();
        let src_dir = tmp.path().join("src");
        write_src(&src_dir, "trust/sandbox.rs", "fn validate() {}");
        write_src(&src_dir, "trust/context.rs", "fn estimate() {}");

        let manifest_path = tmp.path().join(MANIFEST_FILENAME);
        generate(&src_dir, &manifest_path, "pass", &toy_roots()).unwrap();

        write_src(&src_dir, "trust/unexpected_new_module.rs", "fn sneaky() {}");

        let result = verify(&src_dir, &manifest_path, "pass");
        assert!(result.ok);
        assert!(result.warnings.iter().any(|w| w.contains("Unknown file")));
    }
}
