//! Path and command validation — the authority every file and shell
//! operation must clear before execution.
//!
//! This is a *string/path* validation layer, distinct from
//! [`crate::sandbox::policy::SandboxPolicy`], which configures the OS-level
//! Landlock/seccomp jail the re-exec'd child process runs under. The two
//! are complementary: this module decides what a tool call is *allowed to
//! name*; the OS layer decides what the kernel will physically permit even
//! if this layer is somehow bypassed.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use super::error::ErrorKind;
use crate::security::{PROTECTED_EXTERNAL_PATHS, PROTECTED_FILES};

/// The kind of file operation being validated. Drives which phases of
/// `validate_path` apply (read-only checks vs. write/edit-only checks).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read,
    Write,
    Edit,
}

impl Operation {
    fn is_write_like(self) -> bool {
        matches!(self, Operation::Write | Operation::Edit)
    }
}

/// How path-bearing arguments of an allowlisted command are confined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathArgPolicy {
    /// Every non-flag argument is treated as a path and confined.
    All,
    /// Only the first non-flag argument is confined.
    First,
    /// Only the last non-flag argument is confined (the common case for
    /// `cp`/`mv`, where the destination is what matters).
    Last,
}

/// A strategy for extending the allow-set at runtime when a path falls
/// outside it in strict mode. Absent ⇒ strict refusal (spec.md §9,
/// "Runtime approval callback → explicit handle").
pub trait RuntimeApproval: Send + Sync {
    /// Ask whatever consent mechanism is wired up (interactive prompt, a
    /// pre-approved allowlist, etc.) whether `path`'s parent directory
    /// should be added to the allow-set for the rest of the session.
    fn approve(&self, path: &Path) -> bool;
}

/// Immutable-after-configure path/command validation policy.
///
/// Mirrors the `SandboxPolicy` entry of spec.md's Data Model — named
/// `ValidationPolicy` in this crate to avoid colliding with
/// [`crate::sandbox::policy::SandboxPolicy`] (the OS-level jail config).
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub allowed_dirs: Vec<PathBuf>,
    pub strict: bool,
    pub max_file_size: u64,
    pub max_output_size: usize,
    pub protected_filenames: HashSet<String>,
    pub protected_path_patterns: Vec<String>,
    pub blocked_write_paths: Vec<String>,
    pub blocked_write_extensions: HashSet<String>,
    pub sensitive_file_patterns: Vec<Regex>,
    pub command_allowlist_prefixes: Vec<String>,
    pub path_argument_policy: Vec<(String, PathArgPolicy)>,
}

impl Default for ValidationPolicy {
    fn default() -> Self {
        let protected_filenames: HashSet<String> = PROTECTED_FILES
            .iter()
            .map(|s| s.to_lowercase())
            .chain(["memory.md".to_string(), "policy.md".to_string()])
            .collect();

        let protected_path_patterns: Vec<String> = PROTECTED_EXTERNAL_PATHS
            .iter()
            .map(|s| s.to_string())
            .chain([
                "/src/security/".to_string(),
                "/src/trust/".to_string(),
                "/.knowledge/".to_string(),
            ])
            .collect();

        Self {
            allowed_dirs: Vec::new(),
            strict: true,
            max_file_size: 10 * 1024 * 1024,
            max_output_size: 1_048_576,
            protected_filenames,
            protected_path_patterns,
            blocked_write_paths: vec![
                "/.config/autostart/".to_string(),
                "/Library/LaunchAgents/".to_string(),
                "/Start Menu/Programs/Startup/".to_string(),
                "/.git/hooks/".to_string(),
            ],
            blocked_write_extensions: [
                "exe", "dll", "so", "dylib", "sh", "bat", "cmd", "ps1", "scr", "msi",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            sensitive_file_patterns: vec![
                Regex::new(r"(?i)^\.env(\..+)?$").unwrap(),
                Regex::new(r"(?i)id_rsa|id_ed25519|id_ecdsa$").unwrap(),
                Regex::new(r"(?i)\.pem$|\.key$|\.pfx$|\.p12$").unwrap(),
                Regex::new(r"(?i)credentials(\.json)?$").unwrap(),
            ],
            command_allowlist_prefixes: vec![
                "cat ", "head ", "tail ", "ls", "ls ", "grep ", "rg ", "find ", "wc ", "git log",
                "git diff", "git status", "git show", "git branch", "git add ", "git commit",
                "python3 ", "python ", "node ", "cargo build", "cargo test", "cargo check",
                "cargo run", "make", "npm run", "npm test", "npm install",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            path_argument_policy: vec![
                ("cat".into(), PathArgPolicy::All),
                ("head".into(), PathArgPolicy::All),
                ("tail".into(), PathArgPolicy::All),
                ("grep".into(), PathArgPolicy::Last),
                ("mv".into(), PathArgPolicy::Last),
                ("cp".into(), PathArgPolicy::Last),
            ],
        }
    }
}

static RESERVED_DEVICE_NAMES: &[&str] = &[
    "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7", "com8",
    "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
];

static SHORT_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]{1,6}~\d").unwrap());

static SHELL_OPERATOR_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&&|\|\||;(\s|$)|`|\$\(|\$\{|\s\|\s|\s>{1,2}\s|\s<\s|\s2>\s").unwrap()
});

static ZERO_WIDTH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\u{200B}\u{200C}\u{200D}\u{FEFF}]").unwrap());

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]+").unwrap());

static BLOCKLIST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)python3?\s+-c\b",
        r"(?i)\bnode\s+-e\b",
        r"\bnpx\b",
        r"(?i)\b(eval|exec|compile|__import__)\s*\(",
        r"\brm\s+-rf\b",
        r"(?i)\brd\s+/s\b",
        r"\bmkfs\b",
        r"\bdd\s+of=/",
        r"(?i)git\s+config\s+--global",
        r"(?i)reg\s+add\b",
        r"(?i)schtasks\b",
        r"\bcrontab\b",
        r"(?i)icacls\b|chmod\s+-R\s+777",
        r"(?i)git\s+(push|pull|fetch|clone|remote\s+add)\b",
        r"(?i)(curl|wget)\b.*\|\s*(sh|bash|powershell)\b",
        r"\bsudo\b|\brunas\b",
        r"\b(curl|wget|nc|ncat|socat|ssh|scp|telnet)\b",
        r"(?i)\b(powershell|cmd\.exe|wscript|mshta|rundll32|regsvr32)\b",
        r"(?i)import\s+(socket|subprocess|requests|urllib)\b",
        r"(?i)require\([`'\x22](http|net|child_process|fs)[`'\x22]\)",
        r"^\s*(env|set|printenv)\s*$",
        r"(?i)\b(shutdown|reboot)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

/// Strip zero-width/format-control characters, apply NFKD decomposition
/// and drop non-ASCII remnants, collapse whitespace runs, strip
/// backslash-newline continuations. Phase 0 of `validate_command`.
pub fn normalize_command(raw: &str) -> String {
    let no_continuations = raw.replace("\\\n", "");
    let no_zero_width = ZERO_WIDTH_PATTERN.replace_all(&no_continuations, "");
    let decomposed: String = no_zero_width.nfkd().filter(|c| c.is_ascii()).collect();
    WHITESPACE_RUN.replace_all(decomposed.trim(), " ").into_owned()
}

/// Extract the non-flag, non-subcommand-looking arguments of a command
/// line, for Phase 2.5 argument-path confinement.
fn extract_args(normalized: &str) -> Vec<&str> {
    normalized
        .split(' ')
        .skip(1)
        .filter(|a| !a.is_empty() && !a.starts_with('-'))
        .collect()
}

fn command_base(normalized: &str) -> &str {
    normalized.split(' ').next().unwrap_or("")
}

/// The string/path validation sandbox. Records every decision through the
/// `audit` callback and optionally invokes `runtime_approval` for denied
/// paths in strict mode.
pub struct Sandbox {
    policy: ValidationPolicy,
    runtime_approval: Option<Box<dyn RuntimeApproval>>,
    extra_allowed_dirs: Mutex<Vec<PathBuf>>,
    audit: Box<dyn Fn(&str, &str, &str) + Send + Sync>,
}

impl Sandbox {
    pub fn new(
        policy: ValidationPolicy,
        runtime_approval: Option<Box<dyn RuntimeApproval>>,
        audit: impl Fn(&str, &str, &str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            policy,
            runtime_approval,
            extra_allowed_dirs: Mutex::new(Vec::new()),
            audit: Box::new(audit),
        }
    }

    fn record(&self, kind: &str, target: &str, reason: &str) {
        let truncated: String = target.chars().take(512).collect();
        (self.audit)(kind, &truncated, reason);
    }

    fn is_within_allow_set(&self, canonical: &Path) -> bool {
        if self
            .policy
            .allowed_dirs
            .iter()
            .any(|d| canonical == d || canonical.starts_with(d))
        {
            return true;
        }
        let extra = self.extra_allowed_dirs.lock().unwrap();
        extra.iter().any(|d| canonical == d || canonical.starts_with(d))
    }

    /// Validate and canonicalize a path for the given operation. Returns
    /// the canonical path on success.
    pub fn validate_path(&self, path: &Path, op: Operation) -> Result<PathBuf, ErrorKind> {
        let was_symlink = path.symlink_metadata().map(|m| m.file_type().is_symlink()).unwrap_or(false);

        // Step 1: canonicalize.
        let canonical = match dunce_canonicalize(path) {
            Ok(p) => p,
            Err(_) => {
                self.record("path_rejected", &path.display().to_string(), "canonicalize failed");
                return Err(ErrorKind::PathRejected("could not resolve path".into()));
            }
        };

        let raw_str = path.to_string_lossy();
        let canon_str = canonical.to_string_lossy();

        // Step 2: platform hardening — UNC/device-path prefixes, ADS markers.
        if raw_str.starts_with(r"\\") || raw_str.starts_with(r"\\?\") || raw_str.starts_with(r"\\.\") {
            self.record("path_rejected", &raw_str, "UNC or device path prefix");
            return Err(ErrorKind::PathRejected("UNC/device paths are not allowed".into()));
        }
        if let Some(after_drive) = raw_str.get(2..) {
            if after_drive.contains(':') {
                self.record("path_rejected", &raw_str, "alternate data stream separator");
                return Err(ErrorKind::PathRejected(
                    "alternate data streams are not allowed".into(),
                ));
            }
        }

        // Step 3: reserved device names.
        if let Some(stem) = canonical.file_stem().and_then(|s| s.to_str()) {
            if RESERVED_DEVICE_NAMES.contains(&stem.to_lowercase().as_str()) {
                self.record("path_rejected", &canon_str, "reserved device name");
                return Err(ErrorKind::PathRejected(format!("reserved device name: {}", stem)));
            }
            if SHORT_NAME_PATTERN.is_match(stem) {
                self.record("path_rejected", &canon_str, "legacy 8.3 short-name form");
                return Err(ErrorKind::PathRejected(
                    "legacy short-name paths are not allowed; use the canonical path".into(),
                ));
            }
        }

        if op.is_write_like() {
            // Step 4: protected files/paths.
            if let Some(name) = canonical.file_name().and_then(|s| s.to_str()) {
                if self.policy.protected_filenames.contains(&name.to_lowercase()) {
                    self.record("protected_file_blocked", &canon_str, "protected filename");
                    return Err(ErrorKind::PathRejected(format!("Protected file: {}", name)));
                }
            }
            let canon_lower = canon_str.to_lowercase();
            for pat in &self.policy.protected_path_patterns {
                if canon_lower.contains(&pat.to_lowercase()) {
                    self.record("protected_file_blocked", &canon_str, "protected path pattern");
                    return Err(ErrorKind::PathRejected("Protected path".into()));
                }
            }

            // Step 5: auto-execution locations.
            for pat in &self.policy.blocked_write_paths {
                if canon_str.contains(pat.as_str()) {
                    self.record("path_rejected", &canon_str, "auto-execution location");
                    return Err(ErrorKind::PathRejected(
                        "writes to auto-execution locations are not allowed".into(),
                    ));
                }
            }

            // Step 6: blocked extensions.
            if let Some(ext) = canonical.extension().and_then(|e| e.to_str()) {
                if self.policy.blocked_write_extensions.contains(&ext.to_lowercase()) {
                    self.record("path_rejected", &canon_str, "blocked write extension");
                    return Err(ErrorKind::PathRejected(format!("blocked extension: .{}", ext)));
                }
            }
        } else {
            // Step 7: sensitive read warning — record only, never block.
            if let Some(name) = canonical.file_name().and_then(|s| s.to_str()) {
                if self.policy.sensitive_file_patterns.iter().any(|re| re.is_match(name)) {
                    self.record("sensitive_read", &canon_str, "sensitive filename pattern");
                }
            }
        }

        // Step 8: confinement (strict mode).
        if self.policy.strict && !self.is_within_allow_set(&canonical) {
            let approved = self
                .runtime_approval
                .as_ref()
                .map(|a| a.approve(&canonical))
                .unwrap_or(false);
            if approved {
                if let Some(parent) = canonical.parent() {
                    self.extra_allowed_dirs.lock().unwrap().push(parent.to_path_buf());
                    self.record("runtime_approved", &canon_str, "operator extended allow-set");
                }
            } else {
                self.record("path_rejected", &canon_str, "outside allow-set");
                return Err(ErrorKind::PathRejected("path is outside the allowed directories".into()));
            }
        }

        // Step 9: symlink escape check.
        if was_symlink && self.policy.strict && !self.is_within_allow_set(&canonical) {
            self.record("path_rejected", &canon_str, "symlink escapes allow-set");
            return Err(ErrorKind::PathRejected("symlink target escapes the allowed directories".into()));
        }

        // Step 10: size cap (read only).
        if matches!(op, Operation::Read) {
            if let Ok(meta) = std::fs::metadata(&canonical) {
                if meta.len() > self.policy.max_file_size {
                    self.record("path_rejected", &canon_str, "exceeds max file size");
                    return Err(ErrorKind::PathRejected("file exceeds the maximum allowed size".into()));
                }
            }
        }

        Ok(canonical)
    }

    /// Four-phase command validation.
    pub fn validate_command(&self, command: &str) -> Result<String, ErrorKind> {
        let normalized = normalize_command(command);

        // Phase 1: shell operators.
        if SHELL_OPERATOR_PATTERN.is_match(&normalized) {
            self.record("shell_operator_blocked", command, "shell operator present");
            return Err(ErrorKind::CommandRejected("shell operators are not allowed".into()));
        }

        // Phase 2: allowlist.
        let matches_prefix = self
            .policy
            .command_allowlist_prefixes
            .iter()
            .any(|p| normalized.starts_with(p.as_str()) || normalized == p.trim());
        if !matches_prefix {
            self.record("command_blocked", command, "not in allowlist");
            return Err(ErrorKind::CommandRejected("command not in allowlist".into()));
        }

        // Phase 2.5: argument path confinement.
        let base = command_base(&normalized);
        if let Some((_, arg_policy)) = self.policy.path_argument_policy.iter().find(|(c, _)| c == base) {
            let args = extract_args(&normalized);
            let to_check: Vec<&&str> = match arg_policy {
                PathArgPolicy::All => args.iter().collect(),
                PathArgPolicy::First => args.first().into_iter().collect(),
                PathArgPolicy::Last => args.last().into_iter().collect(),
            };
            for arg in to_check {
                let candidate = PathBuf::from(arg);
                if self.validate_path(&candidate, Operation::Read).is_err()
                    && self.validate_path(&candidate, Operation::Write).is_err()
                {
                    self.record("command_blocked", command, "argument path outside allow-set");
                    return Err(ErrorKind::CommandRejected(
                        "command argument path is outside the allowed directories".into(),
                    ));
                }
            }
        }

        // Phase 2.6: rename/copy destination extension check.
        if base == "mv" || base == "cp" {
            let args = extract_args(&normalized);
            if let Some(dest) = args.last() {
                if let Some(ext) = Path::new(dest).extension().and_then(|e| e.to_str()) {
                    if self.policy.blocked_write_extensions.contains(&ext.to_lowercase()) {
                        self.record("command_blocked", command, "destination has blocked extension");
                        return Err(ErrorKind::CommandRejected(format!(
                            "destination extension .{} is blocked",
                            ext
                        )));
                    }
                }
            }
        }

        // Phase 3: blocklist, checked against both normalized and original.
        for re in BLOCKLIST_PATTERNS.iter() {
            if re.is_match(&normalized) || re.is_match(command) {
                self.record("command_blocked", command, "matches blocklist");
                return Err(ErrorKind::CommandRejected("command matches a blocked pattern".into()));
            }
        }

        Ok(normalized)
    }

    /// Truncate output to the policy's max-output-size, appending a
    /// truncation marker.
    pub fn truncate_output(&self, text: &str) -> String {
        if text.len() <= self.policy.max_output_size {
            return text.to_string();
        }
        let mut truncated = String::with_capacity(self.policy.max_output_size + 32);
        let boundary = floor_char_boundary(text, self.policy.max_output_size);
        truncated.push_str(&text[..boundary]);
        truncated.push_str(&format!("\n[...truncated at {} chars]", self.policy.max_output_size));
        truncated
    }
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// `Path::canonicalize` resolves symlinks and requires the path to exist.
/// Named distinctly so call sites read as "canonicalize for validation
/// purposes" rather than a generic filesystem helper.
fn dunce_canonicalize(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    match absolute.canonicalize() {
        Ok(p) => Ok(p),
        Err(e) => {
            // LaTeX-path-normalization quirk: retry with `\_`/`\~` unescaped
            // if the path doesn't resolve as given (original_source/tools/file_read.py).
            let raw = absolute.to_string_lossy();
            if raw.contains("\\_") || raw.contains("\\~") {
                let unescaped = raw.replace("\\_", "_").replace("\\~", "~");
                if let Ok(p) = PathBuf::from(&unescaped).canonicalize() {
                    return Ok(p);
                }
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn test_sandbox(workspace: &Path) -> Sandbox {
        let mut policy = ValidationPolicy::default();
        policy.allowed_dirs = vec![workspace.canonicalize().unwrap()];
        Sandbox::new(policy, None, |_, _, _| {})
    }

    #[test]
    fn shell_operators_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = test_sandbox(tmp.path());
        let result = sandbox.validate_command("git status && curl http://x/");
        assert!(result.is_err());
        assert!(matches!(result.unwrap_err(), ErrorKind::CommandRejected(_)));
    }

    #[test]
    fn unicode_evasion_normalized_then_blocked() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = test_sandbox(tmp.path());
        let evasive = "cur\u{200B}l http://x/";
        assert_eq!(normalize_command(evasive), "curl http://x/");
        let result = sandbox.validate_command(evasive);
        assert!(result.is_err());
    }

    #[test]
    fn allowlisted_command_without_operators_passes() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("notes.txt");
        fs::write(&file, "hi").unwrap();
        let sandbox = test_sandbox(tmp.path());
        let cmd = format!("cat {}", file.display());
        assert!(sandbox.validate_command(&cmd).is_ok());
    }

    #[test]
    fn not_in_allowlist_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = test_sandbox(tmp.path());
        assert!(sandbox.validate_command("whoami").is_err());
    }

    #[test]
    fn path_outside_allow_set_rejected_strict() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = test_sandbox(tmp.path());
        let result = sandbox.validate_path(Path::new("/etc/passwd"), Operation::Read);
        assert!(result.is_err());
    }

    #[test]
    fn protected_filename_write_blocked() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("MEMORY.md"), "x").unwrap();
        let sandbox = test_sandbox(tmp.path());
        let result = sandbox.validate_path(&tmp.path().join("MEMORY.md"), Operation::Write);
        assert!(result.is_err());
        if let Err(ErrorKind::PathRejected(msg)) = result {
            assert!(msg.contains("Protected file"));
        } else {
            panic!("expected PathRejected");
        }
    }

    #[test]
    fn file_within_max_size_reads_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("small.txt");
        fs::write(&file, vec![b'a'; 100]).unwrap();
        let mut policy = ValidationPolicy::default();
        policy.allowed_dirs = vec![tmp.path().canonicalize().unwrap()];
        policy.max_file_size = 100;
        let sandbox = Sandbox::new(policy, None, |_, _, _| {});
        assert!(sandbox.validate_path(&file, Operation::Read).is_ok());
    }

    #[test]
    fn file_over_max_size_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("big.txt");
        fs::write(&file, vec![b'a'; 101]).unwrap();
        let mut policy = ValidationPolicy::default();
        policy.allowed_dirs = vec![tmp.path().canonicalize().unwrap()];
        policy.max_file_size = 100;
        let sandbox = Sandbox::new(policy, None, |_, _, _| {});
        assert!(sandbox.validate_path(&file, Operation::Read).is_err());
    }

    #[test]
    fn truncate_output_appends_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let mut policy = ValidationPolicy::default();
        policy.allowed_dirs = vec![tmp.path().canonicalize().unwrap()];
        policy.max_output_size = 10;
        let sandbox = Sandbox::new(policy, None, |_, _, _| {});
        let out = sandbox.truncate_output("0123456789abcdef");
        assert!(out.starts_with("0123456789"));
        assert!(out.contains("[...truncated at 10 chars]"));
    }

    #[test]
    fn runtime_approval_extends_allow_set() {
        struct AlwaysApprove;
        impl RuntimeApproval for AlwaysApprove {
            fn approve(&self, _path: &Path) -> bool {
                true
            }
        }
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let file = outside.path().join("x.txt");
        fs::write(&file, "hi").unwrap();
        let mut policy = ValidationPolicy::default();
        policy.allowed_dirs = vec![tmp.path().canonicalize().unwrap()];
        let sandbox = Sandbox::new(policy, Some(Box::new(AlwaysApprove)), |_, _, _| {});
        assert!(sandbox.validate_path(&file, Operation::Read).is_ok());
        // Second call should now be within the (extended) allow-set without re-approval.
        assert!(sandbox.validate_path(&file, Operation::Read).is_ok());
    }

    #[test]
    fn git_add_dot_rejected_via_argument_policy() {
        // git_add is allowlisted by prefix "git add " but "." as a bare
        // path-confinement target has no path-argument-policy entry here;
        // the actual `.`/-A rejection lives in the git_add tool contract
        // (original_source/tools/git_tools.py) — covered by the tool, not
        // the generic sandbox. This test just documents the boundary.
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = test_sandbox(tmp.path());
        assert!(sandbox.validate_command("git add notes.txt").is_ok());
    }

    #[test]
    fn reserved_device_name_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = test_sandbox(tmp.path());
        let p = tmp.path().join("CON");
        fs::write(&p, "x").ok();
        let result = sandbox.validate_path(&p, Operation::Read);
        assert!(result.is_err());
    }
}
