use std::fmt;

use mediaflow_codec::CodecError;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum SessionState {
    #[default]
    Unconfigured,
    Configured,
    Closed,
}

impl SessionState {
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionState::Unconfigured => "unconfigured",
            SessionState::Configured => "configured",
            SessionState::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by sessions, either synchronously or through the error callback.
///
/// # Example
/// ```rust
/// use mediaflow::prelude::*;
///
/// let err = SessionError::NotConfigured(SessionState::Closed);
/// assert_eq!(err.to_string(), "session is not configured (state: closed)");
/// assert!(!err.is_fatal());
/// assert!(SessionError::CodecOpen("h264_nvenc".into()).is_fatal());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Bad or missing configuration field, or no usable codec.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The selected implementation failed to open (after any software retry).
    #[error("codec open failed: {0}")]
    CodecOpen(String),
    /// A single job failed inside the codec; the session stays usable.
    #[error("processing error: {0}")]
    Processing(String),
    /// Buffer or conversion-context allocation failed for one job.
    #[error("allocation failed: {0}")]
    Allocation(String),
    #[error("session is not configured (state: {0})")]
    NotConfigured(SessionState),
    /// Malformed submit payload.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A pending flush was discarded by `reset` or `close`.
    #[error("operation aborted")]
    Aborted,
}

impl SessionError {
    /// True for errors that fail `configure`; everything else is scoped to one call or job.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Configuration(_) | SessionError::CodecOpen(_)
        )
    }
}

impl From<CodecError> for SessionError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Allocation(msg) => SessionError::Allocation(msg),
            other => SessionError::Processing(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_errors_map_to_job_errors() {
        let err: SessionError = CodecError::Allocation("frame".into()).into();
        assert_eq!(err, SessionError::Allocation("frame".into()));
        let err: SessionError = CodecError::Codec("boom".into()).into();
        assert_eq!(err, SessionError::Processing("codec error: boom".into()));
        assert!(!err.is_fatal());
    }
}
