//! Error taxonomy for the agent runtime.
//!
//! A single [`AgentError`] enum carries every failure a caller of this crate
//! can observe. Adapter-level network/provider failures are classified
//! further into [`AdapterErrorKind`] so the turn loop can match on kind
//! without string comparison when deciding whether to retry.

use thiserror::Error;

/// Classification of an LLM adapter failure, used to decide retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterErrorKind {
    Network,
    Timeout,
    InvalidApiKey,
    RateLimit,
    Quota,
    ModelNotFound,
    ContextLengthExceeded,
    InvalidRequest,
    Aborted,
    Unknown,
}

impl AdapterErrorKind {
    /// Whether the turn loop should retry with exponential backoff.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::Timeout | Self::RateLimit)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::InvalidApiKey => "invalid-api-key",
            Self::RateLimit => "rate-limit",
            Self::Quota => "quota",
            Self::ModelNotFound => "model-not-found",
            Self::ContextLengthExceeded => "context-length-exceeded",
            Self::InvalidRequest => "invalid-request",
            Self::Aborted => "aborted",
            Self::Unknown => "unknown",
        }
    }
}

/// Top-level error type for the runtime.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("llm error ({kind:?}): {message}")]
    Llm {
        kind: AdapterErrorKind,
        message: String,
    },

    #[error("tool validation failed: {0}")]
    ToolValidation(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("tool call rejected: {0}")]
    ToolRejected(String),

    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("compaction error: {0}")]
    Compaction(String),

    #[error("aborted")]
    Aborted,

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl AgentError {
    /// Stable user-visible prefix: every fatal error becomes a textual
    /// assistant message carrying one of these.
    pub fn user_prefix(&self) -> &'static str {
        match self {
            AgentError::Llm { .. } => "[agent]",
            AgentError::ToolValidation(_) | AgentError::ToolExecution(_) => "[tool]",
            AgentError::ToolRejected(_) => "[approval]",
            AgentError::Checkpoint(_) => "[checkpoint]",
            AgentError::Store(_) => "[store]",
            AgentError::Compaction(_) => "[compaction]",
            AgentError::Aborted => "[agent]",
            AgentError::Unknown(_) => "[agent]",
        }
    }

    /// Whether this error is fatal to the turn: auth/model/invalid-request
    /// errors are fatal, while tool-execution/tool-validation errors are not
    /// and the turn continues.
    pub fn is_fatal_to_turn(&self) -> bool {
        match self {
            AgentError::Llm { kind, .. } => matches!(
                kind,
                AdapterErrorKind::InvalidApiKey
                    | AdapterErrorKind::ModelNotFound
                    | AdapterErrorKind::InvalidRequest
            ),
            AgentError::ToolValidation(_)
            | AgentError::ToolExecution(_)
            | AgentError::ToolRejected(_) => false,
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_are_transient_failures_only() {
        assert!(AdapterErrorKind::Network.is_retryable());
        assert!(AdapterErrorKind::Timeout.is_retryable());
        assert!(AdapterErrorKind::RateLimit.is_retryable());
        assert!(!AdapterErrorKind::InvalidApiKey.is_retryable());
        assert!(!AdapterErrorKind::ContextLengthExceeded.is_retryable());
    }

    #[test]
    fn tool_errors_are_not_fatal_to_turn() {
        assert!(!AgentError::ToolExecution("boom".into()).is_fatal_to_turn());
        assert!(!AgentError::ToolValidation("missing arg".into()).is_fatal_to_turn());
        assert!(!AgentError::ToolRejected("no".into()).is_fatal_to_turn());
    }

    #[test]
    fn auth_error_is_fatal_to_turn() {
        let e = AgentError::Llm {
            kind: AdapterErrorKind::InvalidApiKey,
            message: "bad key".into(),
        };
        assert!(e.is_fatal_to_turn());
        assert_eq!(e.user_prefix(), "[agent]");
    }
}
