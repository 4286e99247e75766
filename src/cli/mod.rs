pub mod ask;
pub mod chat;
pub mod config;
pub mod daemon;
#[cfg(feature = "desktop")]
pub mod desktop;
pub mod md;
pub mod memory;
pub mod paths;
pub mod sandbox;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "coreward")]
#[command(author, version, about = "A lightweight, local-only AI assistant")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file
    #[arg(short, long, global = true, env = "COREWARD_CONFIG")]
    pub config: Option<String>,

    /// Agent ID to use (default: "main", OpenClaw-compatible)
    #[arg(
        short,
        long,
        global = true,
        default_value = "main",
        env = "COREWARD_AGENT"
    )]
    pub agent: String,

    /// Regenerate the integrity manifest over this crate's trust-root
    /// files, then exit. Prompts for a new passphrase.
    #[arg(long, global = true)]
    pub generate_manifest: bool,

    /// Verify the integrity manifest against the current trust-root
    /// files, then exit without starting a session. Prompts for the
    /// existing passphrase.
    #[arg(long, global = true)]
    pub verify_only: bool,

    /// Directory to load opt-in plugin tools from. Without this, any
    /// plugin files sitting in the conventional location are only
    /// warned about, never loaded.
    #[arg(long, global = true)]
    pub plugins_dir: Option<String>,

    /// Skip the per-tool allow/ask/deny prompt for this session. Use
    /// with care — this removes the interactive permission gate
    /// entirely.
    #[arg(long, global = true)]
    pub dangerously_skip_permissions: bool,

    /// Confine file tools to the workspace directory, refusing any path
    /// outside it even with an otherwise-valid extension/pattern match.
    #[arg(long, global = true, overrides_with = "no_strict_sandbox")]
    pub strict_sandbox: bool,

    /// Disable strict sandbox confinement (default).
    #[arg(long, global = true, overrides_with = "strict_sandbox")]
    pub no_strict_sandbox: bool,

    /// Model identity substring the running inference server's `/props`
    /// response must contain; mismatches are reported as warnings.
    #[arg(long, global = true)]
    pub expected_model: Option<String>,
}

/// Global trust-core flags, applied over whatever `Config::load()`
/// produced. Mirrors the source's `merge_cli_args` precedence: an unset
/// CLI flag (`None`, or `false` for a boolean) never overrides a config
/// file value; an explicitly-passed one always wins.
#[derive(Debug, Clone, Default)]
pub struct TrustOverrides {
    pub plugins_dir: Option<String>,
    pub dangerously_skip_permissions: bool,
    pub strict_sandbox: Option<bool>,
    pub expected_model: Option<String>,
}

impl Cli {
    pub fn trust_overrides(&self) -> TrustOverrides {
        TrustOverrides {
            plugins_dir: self.plugins_dir.clone(),
            dangerously_skip_permissions: self.dangerously_skip_permissions,
            strict_sandbox: if self.strict_sandbox {
                Some(true)
            } else if self.no_strict_sandbox {
                Some(false)
            } else {
                None
            },
            expected_model: self.expected_model.clone(),
        }
    }
}

impl TrustOverrides {
    pub fn apply(&self, config: &mut crate::config::Config) {
        if let Some(dir) = &self.plugins_dir {
            config.trust.plugins_dir = Some(dir.clone());
        }
        if self.dangerously_skip_permissions {
            config.trust.dangerously_skip_permissions = true;
        }
        if let Some(strict) = self.strict_sandbox {
            config.trust.strict_sandbox = strict;
        }
        if let Some(model) = &self.expected_model {
            config.trust.expected_model = Some(model.clone());
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start an interactive chat session
    Chat(chat::ChatArgs),

    /// Ask a single question
    Ask(ask::AskArgs),

    /// Launch the desktop GUI
    #[cfg(feature = "desktop")]
    Desktop(desktop::DesktopArgs),

    /// Manage the daemon
    Daemon(daemon::DaemonArgs),

    /// Memory operations
    Memory(memory::MemoryArgs),

    /// Configuration management
    Config(config::ConfigArgs),

    /// POLICY.md policy management
    Md(md::MdArgs),

    /// Show resolved XDG directory paths
    Paths,

    /// Shell sandbox management
    Sandbox(sandbox::SandboxArgs),
}
