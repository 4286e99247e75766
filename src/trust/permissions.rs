//! Per-tool execution permission: every tool call clears `allow`, `ask`,
//! or `deny` before it reaches [`crate::trust::tool_protocol::dispatch`].
//!
//! Write/edit/exec tools default to `ask`; read-only and read-only git
//! tools default to `allow`. `--dangerously-skip-permissions` forces
//! every tool to `allow` for the whole process — a deliberately loud
//! flag name, matched by [`PermissionSystem::skip_all`].

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Allow,
    Ask,
    Deny,
}

fn default_permissions() -> HashMap<&'static str, Permission> {
    use Permission::*;
    HashMap::from([
        ("read_file", Allow),
        ("glob_search", Allow),
        ("grep_search", Allow),
        ("write_file", Ask),
        ("edit_file", Ask),
        ("bash", Ask),
        ("git_status", Allow),
        ("git_diff", Allow),
        ("git_log", Allow),
        ("git_show", Allow),
        ("git_branch", Allow),
        ("git_add", Ask),
        ("git_commit", Ask),
        ("memory_search", Allow),
        ("memory_get", Allow),
        ("web_fetch", Ask),
    ])
}

/// Manages tool execution permissions for one agent session.
pub struct PermissionSystem {
    skip_all: bool,
    overrides: HashMap<String, Permission>,
    session_allowed: HashSet<String>,
}

impl PermissionSystem {
    pub fn new(skip_permissions: bool) -> Self {
        Self { skip_all: skip_permissions, overrides: HashMap::new(), session_allowed: HashSet::new() }
    }

    /// Effective permission for `tool_name`, before any interactive
    /// session-sticky "always" grant is considered.
    pub fn get_permission(&self, tool_name: &str) -> Permission {
        if self.skip_all {
            return Permission::Allow;
        }
        if let Some(p) = self.overrides.get(tool_name) {
            return *p;
        }
        default_permissions().get(tool_name).copied().unwrap_or(Permission::Ask)
    }

    pub fn set_permission(&mut self, tool_name: &str, mode: Permission) {
        self.overrides.insert(tool_name.to_string(), mode);
    }

    /// Check permission for `tool_name`, prompting interactively via
    /// stdin/stdout when in `ask` mode and not already session-approved.
    /// `args_preview` is shown truncated to 80 chars, matching the
    /// teacher's truncated tool-call previews elsewhere in the agent
    /// loop. EOF or interrupt on the prompt denies, never hangs or
    /// panics.
    pub fn check_and_prompt(&mut self, tool_name: &str, args_preview: &str) -> bool {
        match self.get_permission(tool_name) {
            Permission::Allow => return true,
            Permission::Deny => return false,
            Permission::Ask => {}
        }

        if self.session_allowed.contains(tool_name) {
            return true;
        }

        let preview: String = args_preview.chars().take(80).collect();
        print!("\n  Tool: {}({})\n  Allow? [y/n/a(lways)] ", tool_name, preview);
        if io::stdout().flush().is_err() {
            return false;
        }

        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => false, // EOF
            Ok(_) => {
                let response = line.trim().to_lowercase();
                match response.as_str() {
                    "y" | "yes" => true,
                    "a" | "always" => {
                        self.session_allowed.insert(tool_name.to_string());
                        true
                    }
                    _ => false,
                }
            }
            Err(_) => false,
        }
    }

    /// Clears session-sticky "always" grants; explicit overrides and
    /// `skip_all` are untouched.
    pub fn reset_session(&mut self) {
        self.session_allowed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_tools_allow_by_default() {
        let perms = PermissionSystem::new(false);
        assert_eq!(perms.get_permission("read_file"), Permission::Allow);
        assert_eq!(perms.get_permission("grep_search"), Permission::Allow);
    }

    #[test]
    fn write_and_exec_tools_ask_by_default() {
        let perms = PermissionSystem::new(false);
        assert_eq!(perms.get_permission("write_file"), Permission::Ask);
        assert_eq!(perms.get_permission("edit_file"), Permission::Ask);
        assert_eq!(perms.get_permission("bash"), Permission::Ask);
    }

    #[test]
    fn unknown_tool_defaults_to_ask() {
        let perms = PermissionSystem::new(false);
        assert_eq!(perms.get_permission("some_plugin_tool"), Permission::Ask);
    }

    #[test]
    fn skip_all_forces_allow_even_for_overrides() {
        let mut perms = PermissionSystem::new(true);
        perms.set_permission("bash", Permission::Deny);
        assert_eq!(perms.get_permission("bash"), Permission::Allow);
    }

    #[test]
    fn override_takes_precedence_over_default() {
        let mut perms = PermissionSystem::new(false);
        perms.set_permission("read_file", Permission::Deny);
        assert_eq!(perms.get_permission("read_file"), Permission::Deny);
    }

    #[test]
    fn deny_permission_blocks_without_prompting() {
        let mut perms = PermissionSystem::new(false);
        perms.set_permission("bash", Permission::Deny);
        assert!(!perms.check_and_prompt("bash", "rm -rf /"));
    }

    #[test]
    fn allow_permission_never_prompts() {
        let mut perms = PermissionSystem::new(false);
        assert!(perms.check_and_prompt("read_file", "src/main.rs"));
    }

    #[test]
    fn reset_session_clears_always_grants_but_not_overrides() {
        let mut perms = PermissionSystem::new(false);
        perms.set_permission("bash", Permission::Deny);
        perms.reset_session();
        assert_eq!(perms.get_permission("bash"), Permission::Deny);
    }
}
