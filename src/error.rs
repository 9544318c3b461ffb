//! Error types for subgen.
//!
//! The taxonomy matters more than usual here: "not ready yet" and "waiting
//! on a human" are normal pipeline states, not failures, while an
//! `InvariantViolation` means a modeling contract was broken upstream and
//! must stop the current file loudly.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SubgenError {
    /// A stage's upstream dependencies are not finished yet. Expected;
    /// the stage is skipped with the reason and retried on the next run.
    #[error("prerequisites not met: {reason}")]
    PrerequisiteNotMet { reason: String },

    /// Automated progress is blocked on a human action. The instruction is
    /// queued on the to-do list and the stage stays unfinished.
    #[error("manual input required: {instruction}")]
    ExternalInputRequired { instruction: String },

    /// Malformed AI output that survived speculative repair. The partially
    /// repaired text is preserved so it can be fixed by hand instead of lost.
    #[error("failed to parse AI response: {message}")]
    ResponseParse { message: String, repaired: String },

    /// Network/HTTP failure talking to an AI engine. The kind drives the
    /// engine-collection retry policy.
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportKind,
        message: String,
    },

    /// A modeling contract was broken (e.g. a provider item claimed by no
    /// reference interval). Aborts the current file's processing.
    #[error("BUG: {0}")]
    InvariantViolation(String),

    #[error("configuration error: {message}")]
    Config { message: String },

    /// A string handle (engine, prompt, transcription id) that resolves to
    /// nothing. Always a configuration bug, reported fail-fast.
    #[error("unresolved {kind} handle '{handle}'")]
    UnresolvedHandle {
        kind: &'static str,
        handle: String,
    },

    #[error("project file error: {message}")]
    Project { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SubgenError {
    /// Recoverable errors accumulate into the end-of-run report and do not
    /// stop processing of independent stages or files.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            SubgenError::InvariantViolation(_) | SubgenError::UnresolvedHandle { .. }
        )
    }
}

/// Classification of transport failures for the engine-collection fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    /// HTTP 429: the engine's quota is exhausted, long cool-down.
    QuotaExhausted,
    /// HTTP 5xx: the service is down, short cool-down.
    ServiceUnavailable,
    Other,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::QuotaExhausted => write!(f, "quota exhausted"),
            TransportKind::ServiceUnavailable => write!(f, "service unavailable"),
            TransportKind::Other => write!(f, "other"),
        }
    }
}

pub type Result<T> = std::result::Result<T, SubgenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_violations_are_not_recoverable() {
        assert!(!SubgenError::InvariantViolation("leftover item".into()).is_recoverable());
        assert!(
            SubgenError::PrerequisiteNotMet {
                reason: "x".into()
            }
            .is_recoverable()
        );
        assert!(
            SubgenError::Transport {
                kind: TransportKind::QuotaExhausted,
                message: "429".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn display_carries_the_reason() {
        let err = SubgenError::PrerequisiteNotMet {
            reason: "transcription 'full' is not done yet".into(),
        };
        assert!(err.to_string().contains("not done yet"));
    }
}
