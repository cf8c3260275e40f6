//! Error types for parse passes, API misuse and user callbacks.

use crate::callback::EventKind;
use crate::frame::Location;

/// Fatal condition reported by a parse pass.
///
/// Invariant: when a pass returns one of these, every frame still holds its
/// unconsumed input and no output of the failing construct is queued.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// Input that cannot start any recognised token (strict XML syntax only).
    #[error("malformed input at line {} column {}: {reason}", .location.line, .location.column())]
    Malformed {
        location: Location,
        reason: &'static str,
    },
    /// A callback produced a reply outside the accepted set.
    #[error("invalid {kind} callback result: {reason}")]
    InvalidResult {
        kind: EventKind,
        reason: &'static str,
    },
    /// Pushing another frame would exceed `max_stack_depth`.
    #[error("parse stack depth {depth} exceeds limit {limit}")]
    RecursionLimit { depth: usize, limit: usize },
    /// The same construct asked for a retry more than `max_retries` times.
    #[error("{kind} `{name}` requested retry more than {limit} times")]
    RetryLoop {
        kind: EventKind,
        name: String,
        limit: usize,
    },
    /// A parse pass was requested from inside a running pass.
    #[error("parse pass requested while a parse pass is already running")]
    Reentrant,
    #[error(transparent)]
    Usage(#[from] UsageError),
    /// A user callback failed; the construct is left unconsumed.
    #[error("{kind} callback `{name}` failed: {source}")]
    Callback {
        kind: EventKind,
        name: String,
        #[source]
        source: CallbackError,
    },
}

/// Misuse of the parser API. Never corrupts parser state.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("`{query}` is only available while a callback is running")]
    OutsideCallback { query: &'static str },
    #[error("text reads are not available in mixed mode")]
    MixedMode,
    #[error("operation requires mixed mode")]
    NotMixedMode,
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

/// Error returned by user callbacks.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CallbackError {
    message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self { message }
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<UsageError> for CallbackError {
    fn from(err: UsageError) -> Self {
        Self::new(err.to_string())
    }
}

impl From<ParseError> for CallbackError {
    fn from(err: ParseError) -> Self {
        Self::new(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_errors_render_query_name() {
        let err = UsageError::OutsideCallback { query: "tag_name" };
        assert_eq!(
            err.to_string(),
            "`tag_name` is only available while a callback is running"
        );
    }

    #[test]
    fn callback_error_wraps_parse_errors() {
        let err: CallbackError = ParseError::RecursionLimit { depth: 11, limit: 10 }.into();
        assert_eq!(err.message(), "parse stack depth 11 exceeds limit 10");
    }

    #[test]
    fn malformed_reports_line_and_column() {
        let err = ParseError::Malformed {
            location: Location {
                byte: 7,
                line: 2,
                line_start: 4,
            },
            reason: "empty tag name",
        };
        assert_eq!(
            err.to_string(),
            "malformed input at line 2 column 3: empty tag name"
        );
    }
}
