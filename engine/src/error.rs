//! Error taxonomy (§7). `HangupSentinel`/`UrlUpdated` are deliberately
//! *not* variants here — the spec calls them out as control-flow, not
//! errors — they live in `runner::Outcome` instead.

use thiserror::Error;

use crate::ids::Sid;

/// The stable "resource-not-found" envelope the spec calls for, carrying
/// a fixed numeric code so callers can distinguish it from other
/// failures without string matching.
pub const NOT_FOUND_CODE: u32 = 20404;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("resource not found: {kind} {sid} [{code}]", code = NOT_FOUND_CODE)]
    NotFound { kind: &'static str, sid: Sid },

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("verb execution failed: {0}")]
    VerbExecution(String),

    #[error("webhook transport error fetching {url}: {source}")]
    WebhookTransport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("callml parse error at {url}: {source}")]
    CallMlParse {
        url: String,
        #[source]
        source: callml::CallMlError,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn not_found(kind: &'static str, sid: Sid) -> Self {
        EngineError::NotFound { kind, sid }
    }

    /// The diagnostic event name this error would be recorded under on a
    /// call's timeline (§7).
    pub fn timeline_event(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation.error",
            EngineError::NotFound { .. } => "resource.not_found",
            EngineError::LockPoisoned(_) => "engine.lock_poisoned",
            EngineError::VerbExecution(_) => "twiml.invalid_node",
            EngineError::WebhookTransport { .. } => "webhook.error",
            EngineError::CallMlParse { .. } => "twiml.parse_error",
        }
    }
}
