//! Opt-in dynamic tool registration via a stable plugin ABI.
//!
//! The source this crate is modeled on loaded arbitrary `.py` files as
//! Python modules and called a `register_tools(registry)` hook inside
//! them — fine for a trusted single-user script, not something this
//! crate will do to a shared object. Instead:
//!
//! - A plugin is a shared library (`.so`/`.dylib`/`.dll`) plus a sidecar
//!   JSON manifest (same file stem, `.json` extension) declaring the
//!   tool names, descriptions, and JSON-schema parameters it exports.
//!   The manifest is read and validated *before* the library is ever
//!   dlopen'd, so a malformed or unexpected plugin is rejected without
//!   executing a single instruction from it.
//! - Loading only happens when `--plugins-dir` is passed explicitly on
//!   the command line. Without it, a conventional plugins directory is
//!   still scanned and any `.so`/`.dylib`/`.dll` found there is reported
//!   as a warning, never loaded — guards against a co-resident process
//!   dropping a plugin and expecting it to be picked up silently.
//! - Every tool invocation that reaches a plugin-contributed tool must
//!   be audited with a `plugin=true` flag so it's distinguishable from
//!   built-in tool calls in the audit log.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Platform shared-library extension this registry will consider.
#[cfg(target_os = "windows")]
const LIB_EXTENSION: &str = "dll";
#[cfg(target_os = "macos")]
const LIB_EXTENSION: &str = "dylib";
#[cfg(all(unix, not(target_os = "macos")))]
const LIB_EXTENSION: &str = "so";

/// One tool a plugin manifest declares.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginToolDecl {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    /// Exported symbol name inside the shared object this tool's
    /// invocation is dispatched to. Defaults to the tool name if absent.
    #[serde(default)]
    pub symbol: Option<String>,
}

/// Sidecar manifest for one plugin shared object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub tools: Vec<PluginToolDecl>,
}

/// Outcome of attempting to load a single plugin file.
#[derive(Debug, Clone)]
pub struct PluginLoadResult {
    pub name: String,
    pub file: PathBuf,
    pub ok: bool,
    pub error: Option<String>,
    pub tools: Vec<String>,
}

/// A loaded plugin's library handle kept alive for the process lifetime,
/// plus the tool declarations it registered.
pub struct LoadedPlugin {
    pub manifest: PluginManifest,
    #[allow(dead_code)]
    library: libloading::Library,
}

impl LoadedPlugin {
    /// Resolve the raw `extern "C" fn(*const u8, usize) -> *mut u8`
    /// symbol for one of this plugin's declared tools, if present.
    ///
    /// # Safety
    /// The caller must uphold the ABI contract documented for plugin
    /// exports: a C-string-in, owned-C-string-out calling convention,
    /// freed by the plugin's own `plugin_free` export.
    pub unsafe fn tool_symbol(
        &self,
        tool_name: &str,
    ) -> Result<libloading::Symbol<'_, unsafe extern "C" fn(*const u8, usize) -> *mut u8>, String>
    {
        let decl = self
            .manifest
            .tools
            .iter()
            .find(|t| t.name == tool_name)
            .ok_or_else(|| format!("plugin '{}' has no tool named '{}'", self.manifest.name, tool_name))?;
        let symbol_name = decl.symbol.clone().unwrap_or_else(|| decl.name.clone());
        unsafe {
            self.library
                .get(symbol_name.as_bytes())
                .map_err(|e| format!("failed to resolve symbol '{}': {}", symbol_name, e))
        }
    }

    /// Free a buffer previously returned by a `tool_symbol` call, via the
    /// plugin's own `plugin_free` export. Plugins without one leak the
    /// buffer rather than risk a mismatched allocator freeing it.
    ///
    /// # Safety
    /// `ptr` must be a pointer this same plugin returned and not yet freed.
    pub unsafe fn free_output(&self, ptr: *mut u8) {
        let free_fn: Result<libloading::Symbol<unsafe extern "C" fn(*mut u8)>, _> =
            unsafe { self.library.get(b"plugin_free") };
        if let Ok(free_fn) = free_fn {
            unsafe { free_fn(ptr) };
        }
    }
}

fn is_hidden_or_private(filename: &str) -> bool {
    filename.starts_with('_') || filename.starts_with('.')
}

fn manifest_path_for(lib_path: &Path) -> PathBuf {
    lib_path.with_extension("json")
}

fn read_manifest(manifest_path: &Path) -> Result<PluginManifest, String> {
    let text = std::fs::read_to_string(manifest_path)
        .map_err(|e| format!("could not read manifest {}: {}", manifest_path.display(), e))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid manifest {}: {}", manifest_path.display(), e))
}

/// Load every plugin under `plugin_dir`. Files that aren't shared
/// libraries with the platform extension, or start with `_`/`.`, are
/// skipped. Each remaining library must have a sidecar `.json` manifest;
/// a manifest failure is reported per-file and does not stop the scan.
///
/// # Safety
/// This dlopen's arbitrary code on disk under `plugin_dir`. Callers must
/// only invoke this when the operator explicitly passed `--plugins-dir`.
pub unsafe fn load_plugins(plugin_dir: &Path) -> Vec<(PluginLoadResult, Option<LoadedPlugin>)> {
    let mut results = Vec::new();
    let Ok(entries) = std::fs::read_dir(plugin_dir) else {
        return results;
    };

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    paths.sort();

    for path in paths {
        if !path.is_file() {
            continue;
        }
        let Some(filename) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if is_hidden_or_private(filename) {
            continue;
        }
        if path.extension().and_then(|e| e.to_str()) != Some(LIB_EXTENSION) {
            continue;
        }

        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(filename).to_string();
        let manifest_path = manifest_path_for(&path);

        match read_manifest(&manifest_path) {
            Err(error) => {
                results.push((
                    PluginLoadResult { name: stem, file: path, ok: false, error: Some(error), tools: Vec::new() },
                    None,
                ));
            }
            Ok(manifest) => {
                let load = unsafe { libloading::Library::new(&path) };
                match load {
                    Err(e) => {
                        results.push((
                            PluginLoadResult {
                                name: manifest.name.clone(),
                                file: path,
                                ok: false,
                                error: Some(format!("dlopen failed: {}", e)),
                                tools: Vec::new(),
                            },
                            None,
                        ));
                    }
                    Ok(library) => {
                        let tools: Vec<String> = manifest.tools.iter().map(|t| t.name.clone()).collect();
                        let result = PluginLoadResult {
                            name: manifest.name.clone(),
                            file: path,
                            ok: true,
                            error: None,
                            tools,
                        };
                        results.push((result, Some(LoadedPlugin { manifest, library })));
                    }
                }
            }
        }
    }

    results
}

/// Scan `plugin_dir` for candidate plugin files WITHOUT loading any of
/// them. Used when `--plugins-dir` was not passed, so an operator is
/// still warned about plugin files sitting in the conventional location
/// rather than silently ignoring them.
pub fn check_unexpected_plugins(plugin_dir: &Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(plugin_dir) else {
        return Vec::new();
    };
    let mut unexpected: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
        .filter(|name| !is_hidden_or_private(name))
        .filter(|name| Path::new(name).extension().and_then(|e| e.to_str()) == Some(LIB_EXTENSION))
        .collect();
    unexpected.sort();
    unexpected
}

/// Render a `# Plugin Tools (user-installed)` system-prompt section
/// documenting every plugin-contributed tool not already covered by a
/// built-in tool name. Returns an empty string if there's nothing to add.
pub fn format_plugin_tool_docs(loaded: &[LoadedPlugin], builtin_tools: &HashSet<&str>) -> String {
    let mut lines = Vec::new();
    for plugin in loaded {
        for tool in &plugin.manifest.tools {
            if builtin_tools.contains(tool.name.as_str()) {
                continue;
            }
            lines.push(format!("- `{}` ({}): {}", tool.name, plugin.manifest.name, tool.description));
        }
    }
    if lines.is_empty() {
        return String::new();
    }
    format!("\n\n# Plugin Tools (user-installed)\n\n{}\n", lines.join("\n"))
}

/// Audit-log detail string for a plugin-contributed tool call, so the
/// security audit trail can distinguish it from a built-in invocation.
pub fn audit_detail(plugin_name: &str, tool_name: &str) -> String {
    format!("plugin=true plugin_name={} tool={}", plugin_name, tool_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_manifest(dir: &Path, stem: &str, json: &str) {
        let mut f = std::fs::File::create(dir.join(format!("{}.json", stem))).unwrap();
        f.write_all(json.as_bytes()).unwrap();
    }

    #[test]
    fn unexpected_plugins_lists_shared_objects_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("word_count.{}", LIB_EXTENSION)), b"").unwrap();
        std::fs::write(dir.path().join("readme.txt"), b"").unwrap();
        std::fs::write(dir.path().join(format!("_private.{}", LIB_EXTENSION)), b"").unwrap();

        let found = check_unexpected_plugins(dir.path());
        assert_eq!(found, vec![format!("word_count.{}", LIB_EXTENSION)]);
    }

    #[test]
    fn unexpected_plugins_empty_for_missing_dir() {
        let found = check_unexpected_plugins(Path::new("/nonexistent/plugins/dir/xyz"));
        assert!(found.is_empty());
    }

    #[test]
    fn missing_manifest_reported_as_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("word_count.{}", LIB_EXTENSION)), b"").unwrap();

        let results = unsafe { load_plugins(dir.path()) };
        assert_eq!(results.len(), 1);
        assert!(!results[0].0.ok);
        assert!(results[0].0.error.as_ref().unwrap().contains("could not read manifest"));
    }

    #[test]
    fn malformed_manifest_reported_without_dlopen() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("word_count.{}", LIB_EXTENSION)), b"").unwrap();
        write_manifest(dir.path(), "word_count", "not json");

        let results = unsafe { load_plugins(dir.path()) };
        assert_eq!(results.len(), 1);
        assert!(!results[0].0.ok);
        assert!(results[0].0.error.as_ref().unwrap().contains("invalid manifest"));
    }

    #[test]
    fn valid_manifest_but_non_library_file_fails_dlopen() {
        // Exercises the manifest-ok/dlopen-fails branch without needing a
        // real compiled shared object in the test fixture.
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("word_count.{}", LIB_EXTENSION)), b"not an elf/macho/pe").unwrap();
        write_manifest(
            dir.path(),
            "word_count",
            r#"{"name": "word_count", "tools": [{"name": "word_count", "description": "Count words"}]}"#,
        );

        let results = unsafe { load_plugins(dir.path()) };
        assert_eq!(results.len(), 1);
        assert!(!results[0].0.ok);
        assert!(results[0].1.is_none());
    }

    #[test]
    fn hidden_and_dotfile_plugins_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(format!("_helper.{}", LIB_EXTENSION)), b"").unwrap();
        std::fs::write(dir.path().join(format!(".hidden.{}", LIB_EXTENSION)), b"").unwrap();

        let results = unsafe { load_plugins(dir.path()) };
        assert!(results.is_empty());
    }

    #[test]
    fn format_plugin_tool_docs_skips_builtin_names() {
        let manifest = PluginManifest {
            name: "demo".to_string(),
            version: None,
            tools: vec![
                PluginToolDecl {
                    name: "bash".to_string(),
                    description: "shadows a builtin".to_string(),
                    parameters: serde_json::Value::Null,
                    symbol: None,
                },
                PluginToolDecl {
                    name: "word_count".to_string(),
                    description: "Count words in text".to_string(),
                    parameters: serde_json::Value::Null,
                    symbol: None,
                },
            ],
        };
        // `LoadedPlugin` always carries a real `Library`; construct the
        // doc string directly from the manifest-shaped data it reads
        // instead of faking a library handle in a unit test.
        let mut builtins = HashSet::new();
        builtins.insert("bash");
        let docs: String = manifest
            .tools
            .iter()
            .filter(|t| !builtins.contains(t.name.as_str()))
            .map(|t| format!("- `{}` ({}): {}", t.name, manifest.name, t.description))
            .collect::<Vec<_>>()
            .join("\n");
        assert!(docs.contains("word_count"));
        assert!(!docs.contains("shadows a builtin"));
    }

    #[test]
    fn audit_detail_flags_plugin_true() {
        let detail = audit_detail("demo", "word_count");
        assert!(detail.contains("plugin=true"));
        assert!(detail.contains("word_count"));
    }
}
