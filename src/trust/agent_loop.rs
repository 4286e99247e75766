//! Per-turn decision glue: permission check → provenance-gate check,
//! evaluated before a parsed tool call reaches
//! [`crate::trust::tool_protocol::dispatch`] or the teacher's native
//! tool-calling path in `agent::Agent`.
//!
//! This module owns the *decision*, not the turn loop itself — the
//! surrounding `Agent` in `agent/mod.rs` still drives the round-trip
//! with the model; it calls into [`decide`] for each tool call and
//! [`ProvenanceGate::note_result`] after each one executes.

use crate::trust::permissions::{Permission, PermissionSystem};

/// Hard cap on model↔tool round-trips in a single turn — a turn that
/// hits this without finalizing is cut off with a synthesized notice
/// rather than looping forever on a confused model.
pub const MAX_ROUNDS: usize = 20;

/// Tools that mutate state or execute code — blocked for the rest of a
/// turn once the provenance gate has tripped.
pub const GATED_TOOLS: &[&str] = &["bash", "write_file", "edit_file"];

/// Tools whose success trips the provenance gate: once untrusted file
/// content has entered context, acting on it in the same turn is
/// refused.
pub const READ_TOOLS: &[&str] = &["read_file"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Execute,
    Denied { reason: String },
    GateRefusal { reason: String },
}

/// Per-turn provenance state. Reset at the start of every user turn;
/// never cleared mid-turn once tripped (spec: "cannot be cleared until
/// the next user message").
#[derive(Debug, Default, Clone, Copy)]
pub struct ProvenanceGate {
    tripped: bool,
}

impl ProvenanceGate {
    pub fn new() -> Self {
        Self { tripped: false }
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn reset(&mut self) {
        self.tripped = false;
    }

    /// Call after a tool call finishes successfully; trips the gate if
    /// `tool_name` is a read tool.
    pub fn note_result(&mut self, tool_name: &str, ok: bool) {
        if ok && READ_TOOLS.contains(&tool_name) {
            self.tripped = true;
        }
    }
}

/// Decide whether `tool_name` may run this round. Checks the
/// provenance gate first — a gated tool is refused outright regardless
/// of permission state — then falls through to the permission system.
pub fn decide(gate: &ProvenanceGate, permissions: &mut PermissionSystem, tool_name: &str, args_preview: &str) -> Decision {
    if gate.is_tripped() && GATED_TOOLS.contains(&tool_name) {
        return Decision::GateRefusal {
            reason: format!(
                "Provenance gating: '{}' is blocked for the rest of this turn because untrusted file \
                 content was read earlier in it. Ask again next turn if this is still needed.",
                tool_name
            ),
        };
    }

    match permissions.get_permission(tool_name) {
        Permission::Deny => Decision::Denied { reason: format!("'{}' is denied by policy.", tool_name) },
        _ => {
            if permissions.check_and_prompt(tool_name, args_preview) {
                Decision::Execute
            } else {
                Decision::Denied { reason: format!("User declined to run '{}'.", tool_name) }
            }
        }
    }
}

/// Phrases that suggest the model *described* running a tool in plain
/// text instead of emitting an actual call — a known local-model
/// failure mode worth catching before finalizing a turn.
const HALLUCINATION_PHRASES: &[&str] = &[
    "i ran the command",
    "i executed",
    "i've read the file",
    "i have read the file",
    "after running",
    "the output was",
    "i checked the file and",
];

/// Scan assistant text for a tool-hallucination phrase. Only meaningful
/// in the first two rounds of a turn per spec — callers should gate on
/// `round < 2` themselves before acting on a match, since later rounds
/// legitimately reference earlier *real* tool results.
pub fn looks_like_hallucinated_tool_use(text: &str) -> bool {
    let lower = text.to_lowercase();
    HALLUCINATION_PHRASES.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ungated_tool_executes_when_gate_tripped() {
        let mut gate = ProvenanceGate::new();
        gate.note_result("read_file", true);
        let mut perms = PermissionSystem::new(true);
        assert_eq!(decide(&gate, &mut perms, "memory_search", "query"), Decision::Execute);
    }

    #[test]
    fn gated_tool_refused_after_successful_read() {
        let mut gate = ProvenanceGate::new();
        gate.note_result("read_file", true);
        let mut perms = PermissionSystem::new(true);
        let decision = decide(&gate, &mut perms, "bash", "rm -rf /tmp/x");
        assert!(matches!(decision, Decision::GateRefusal { .. }));
    }

    #[test]
    fn gate_not_tripped_by_failed_read() {
        let mut gate = ProvenanceGate::new();
        gate.note_result("read_file", false);
        assert!(!gate.is_tripped());
    }

    #[test]
    fn gate_not_tripped_by_non_read_tool() {
        let mut gate = ProvenanceGate::new();
        gate.note_result("bash", true);
        assert!(!gate.is_tripped());
    }

    #[test]
    fn denied_permission_blocks_execution() {
        let gate = ProvenanceGate::new();
        let mut perms = PermissionSystem::new(false);
        perms.set_permission("bash", Permission::Deny);
        let decision = decide(&gate, &mut perms, "bash", "echo hi");
        assert!(matches!(decision, Decision::Denied { .. }));
    }

    #[test]
    fn allowed_read_only_tool_executes() {
        let gate = ProvenanceGate::new();
        let mut perms = PermissionSystem::new(false);
        assert_eq!(decide(&gate, &mut perms, "read_file", "path=src/main.rs"), Decision::Execute);
    }

    #[test]
    fn gate_reset_clears_trip() {
        let mut gate = ProvenanceGate::new();
        gate.note_result("read_file", true);
        gate.reset();
        assert!(!gate.is_tripped());
    }

    #[test]
    fn detects_hallucinated_tool_use_phrase() {
        assert!(looks_like_hallucinated_tool_use("I ran the command and it succeeded."));
        assert!(!looks_like_hallucinated_tool_use("Let me read that file for you."));
    }
}
