//! Error taxonomy shared by every stage of a resolution.

use serde::{Deserialize, Serialize};

/// Result alias used across the resolver libraries.
pub type Result<T> = std::result::Result<T, ResolveError>;

/// Coarse classification of a [`ResolveError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Upstream,
    Configuration,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Upstream => write!(f, "upstream"),
            ErrorKind::Configuration => write!(f, "configuration"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The title, search result, episode or playable server could not be located.
    #[error("not found: {0}")]
    NotFound(String),

    /// A dependency answered with garbage, a non-success status, or not at all.
    #[error("upstream failure: {message}")]
    Upstream {
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// An unknown or disabled source was requested, or the registry is inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ResolveError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ResolveError::NotFound(message.into())
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        ResolveError::Upstream {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a transport error, keeping it as the error source.
    pub fn http(context: impl std::fmt::Display, err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            format!("{}: timed out", context)
        } else {
            format!("{}: {}", context, err)
        };
        ResolveError::Upstream {
            message,
            source: Some(err),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ResolveError::Configuration(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolveError::NotFound(_) => ErrorKind::NotFound,
            ResolveError::Upstream { .. } => ErrorKind::Upstream,
            ResolveError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Prefix the message with a label (usually a source id), keeping the kind.
    pub fn labelled(self, label: &str) -> Self {
        match self {
            ResolveError::NotFound(msg) => ResolveError::NotFound(format!("{}: {}", label, msg)),
            ResolveError::Upstream { message, source } => ResolveError::Upstream {
                message: format!("{}: {}", label, message),
                source,
            },
            ResolveError::Configuration(msg) => {
                ResolveError::Configuration(format!("{}: {}", label, msg))
            }
        }
    }

    /// Message without the kind prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            ResolveError::NotFound(msg) | ResolveError::Configuration(msg) => msg,
            ResolveError::Upstream { message, .. } => message,
        }
    }
}
