//! Error kinds shared across the trust core.
//!
//! Every component surfaces failures through this closed set rather than
//! ad-hoc strings, so the agent loop can branch on *kind* (recoverable vs.
//! abort) without string-matching messages. `anyhow` is still used at the
//! CLI/bootstrap boundary for free-form context; this enum is for the
//! boundaries spec'd in the Failure model (spec.md §4.10 / §7).

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ErrorKind {
    #[error("path rejected: {0}")]
    PathRejected(String),

    #[error("command rejected: {0}")]
    CommandRejected(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("tool failure: {0}")]
    ToolFailure(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("integrity check aborted: {0}")]
    IntegrityAbort(String),

    #[error("integrity warning: {0}")]
    IntegrityWarning(String),

    #[error("server trust aborted: {0}")]
    ServerTrustAbort(String),

    #[error("context budget overflow: {0}")]
    BudgetOverflow(String),

    #[error("parse failure: {0}")]
    ParseFailure(String),

    #[error("cancelled")]
    Cancelled,
}

impl ErrorKind {
    /// Short tag used in user-visible messages and audit events — never a
    /// language stack trace, per spec.md §7.
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorKind::PathRejected(_) => "path_rejected",
            ErrorKind::CommandRejected(_) => "command_rejected",
            ErrorKind::Timeout(_) => "timeout",
            ErrorKind::ToolFailure(_) => "tool_failure",
            ErrorKind::ConnectionLost(_) => "connection_lost",
            ErrorKind::IntegrityAbort(_) => "integrity_abort",
            ErrorKind::IntegrityWarning(_) => "integrity_warning",
            ErrorKind::ServerTrustAbort(_) => "server_trust_abort",
            ErrorKind::BudgetOverflow(_) => "budget_overflow",
            ErrorKind::ParseFailure(_) => "parse_failure",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// Whether this error is captured and returned as a tool_result
    /// (recoverable, the model can react) or must terminate the process
    /// before any registration/network side effects.
    pub fn terminates_boot(&self) -> bool {
        matches!(
            self,
            ErrorKind::IntegrityAbort(_) | ErrorKind::ServerTrustAbort(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable_identifiers() {
        assert_eq!(ErrorKind::Timeout(30).tag(), "timeout");
        assert_eq!(ErrorKind::Cancelled.tag(), "cancelled");
    }

    #[test]
    fn only_boot_critical_kinds_terminate() {
        assert!(ErrorKind::IntegrityAbort("x".into()).terminates_boot());
        assert!(ErrorKind::ServerTrustAbort("x".into()).terminates_boot());
        assert!(!ErrorKind::Timeout(1).terminates_boot());
        assert!(!ErrorKind::ToolFailure("x".into()).terminates_boot());
    }

    #[test]
    fn messages_never_multiline() {
        let kinds = [
            ErrorKind::PathRejected("/etc/passwd".into()),
            ErrorKind::CommandRejected("shell operators".into()),
            ErrorKind::Timeout(30),
        ];
        for k in kinds {
            assert!(!k.to_string().contains('\n'));
        }
    }
}
