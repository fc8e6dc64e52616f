//! Error types for the debate engine.

use thiserror::Error;
use uuid::Uuid;

use crate::session::SessionStatus;

/// Errors surfaced by caller-facing debate operations.
///
/// Business-rule errors (`SessionNotFound`, `TurnNotFound`, `UnknownPersona`,
/// `InvalidSessionState`, `InjectionNotSupported`) are returned as-is with no
/// internal retry. `GenerationUnavailable` is returned only after the
/// pipeline's bounded retry policy is exhausted. Synthesis failure is never an
/// error at this level; it surfaces as the `degraded` flag on a spoken turn.
#[derive(Error, Debug)]
pub enum DebateError {
    #[error("session {0} not found")]
    SessionNotFound(Uuid),

    #[error("turn {seq} not found in session {session}")]
    TurnNotFound { session: Uuid, seq: u64 },

    #[error("unknown persona: '{0}'")]
    UnknownPersona(String),

    #[error("invalid participant count: expected {expected}, got {actual}")]
    InvalidParticipantCount { expected: usize, actual: usize },

    #[error("{operation} is not valid while the session is {status}")]
    InvalidSessionState {
        operation: &'static str,
        status: SessionStatus,
    },

    #[error("user injection is only supported in versus debates")]
    InjectionNotSupported,

    #[error("model service unavailable after {attempts} attempts: {reason}")]
    GenerationUnavailable { attempts: u32, reason: String },

    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A serialization invariant was violated despite the per-session gate.
    /// Indicates a locking bug, not a recoverable condition.
    #[error("concurrency invariant violated: {0}")]
    ConcurrencyConflict(String),
}

/// Errors from the language-model service boundary.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("request timed out")]
    Timeout,

    #[error("rate limited by the model service")]
    RateLimited,

    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("model service error: {0}")]
    Service(String),
}

impl ModelError {
    /// Whether the pipeline should retry this failure with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ModelError::Timeout | ModelError::RateLimited | ModelError::EmptyResponse
        )
    }
}

/// Errors from the voice-synthesis service boundary.
///
/// Never propagated past the pipeline: a failed synthesis degrades the turn
/// (text only, no audio reference) instead of failing it.
#[derive(Error, Debug)]
pub enum SynthesisError {
    #[error("unknown voice '{0}'")]
    UnknownVoice(String),

    #[error("synthesis engine error: {0}")]
    Engine(String),

    #[error("failed to write audio artifact: {0}")]
    Io(#[from] std::io::Error),
}
