//! The trust and execution core: everything that sits between an
//! untrusted model and the user's workstation.
//!
//! ```text
//!   PathRegistry ── resolved once at boot, closes PATH-poisoning
//!        │
//!   IntegrityVerifier ── HMAC-verifies this crate's own trust-root files
//!        │
//!   ServerTrust ── port + process identity + model identity, for the
//!        │          inference server this crate talks to
//!        ▼
//!   AgentLoop ─┬─ PermissionSystem (allow/ask/deny per tool)
//!              ├─ ProvenanceGate   (block action tools after a read)
//!              ├─ Sandbox          (path/command validation)
//!              ├─ ToolProtocol     (text-embedded tool-call wire format)
//!              ├─ ContextManager   (bounded context window)
//!              ├─ ConfabDetector   (hallucination heuristics on output)
//!              └─ PluginLoader     (opt-in, manifest-gated dynamic tools)
//! ```
//!
//! `agent::Agent` is the surrounding type that actually drives the
//! model round-trip; the modules here provide the decisions and state
//! it delegates to, not a parallel loop of their own.

pub mod agent_loop;
pub mod bootstrap;
pub mod confab;
pub mod context;
pub mod error;
pub mod integrity;
pub mod path_registry;
pub mod permissions;
pub mod plugin_loader;
pub mod sandbox;
pub mod server_trust;
pub mod tool_protocol;

pub use agent_loop::{Decision, ProvenanceGate, GATED_TOOLS, MAX_ROUNDS, READ_TOOLS, decide, looks_like_hallucinated_tool_use};
pub use bootstrap::{
    BootOutcome, PASSPHRASE_ENV_VAR, check_server_trust, generate_manifest, run as run_boot_sequence,
    verify_only,
};
pub use confab::{ConfabFlag, ConfabReport, Heuristic, LessonContent, Severity, scan_lesson, scan_text};
pub use context::{ContextHealth, ContextManager, ContextMessage, ContextRole, TokenUsage, estimate_tokens};
pub use error::ErrorKind;
pub use integrity::{
    MANIFEST_FILENAME, Manifest, PBKDF2_ITERATIONS, Tier, VerifyResult, default_trust_roots, generate,
    prompt_existing_passphrase, prompt_new_passphrase, security_dirs, verify,
};
pub use path_registry::{MissingRequiredBinaries, PathRegistry};
pub use permissions::{Permission, PermissionSystem};
pub use plugin_loader::{
    LoadedPlugin, PluginLoadResult, PluginManifest, PluginToolDecl, audit_detail,
    check_unexpected_plugins, format_plugin_tool_docs, load_plugins,
};
pub use sandbox::{Operation, PathArgPolicy, RuntimeApproval, Sandbox, ValidationPolicy, normalize_command};
pub use server_trust::{ModelIdentityResult, PortCheckResult, ProcessCheckResult, ServerTrust};
pub use tool_protocol::{DecodedArgs, DispatchResult, ParsedCall, args_to_json, decode_args, dispatch, format_result, parse_tool_calls};
