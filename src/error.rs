/// Unified error type for all tunnel operations.
///
/// Variants carry a human-readable message and, where one exists, an
/// actionable hint. Errors from the PostgreSQL client are passed through
/// unchanged.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    /// Required configuration field missing or malformed
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        hint: Option<String>,
    },

    /// SSH agent endpoint unreachable or unusable. Never fatal: agent
    /// authentication is simply skipped when this occurs.
    #[error("SSH agent unavailable: {message}")]
    Agent { message: String },

    /// Private key file missing, malformed, or wrong passphrase
    #[error("SSH key error: {message}")]
    Key {
        message: String,
        hint: Option<String>,
    },

    /// Jump host unreachable, host key rejected by policy, or all offered
    /// authentication methods refused
    #[error("SSH handshake failed: {message}")]
    Handshake {
        message: String,
        hint: Option<String>,
    },

    /// Channel open failed, or a stream was requested before the session
    /// was established
    #[error("Stream dial failed: {message}")]
    Stream {
        message: String,
        hint: Option<String>,
    },

    /// Error produced by the PostgreSQL client, surfaced as-is
    #[error(transparent)]
    Database(#[from] tokio_postgres::Error),
}

impl TunnelError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            hint: None,
        }
    }

    /// Create a validation error with hint
    pub fn validation_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Create an agent error
    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent {
            message: message.into(),
        }
    }

    /// Create a key error
    pub fn key(message: impl Into<String>) -> Self {
        Self::Key {
            message: message.into(),
            hint: None,
        }
    }

    /// Create a key error with hint
    pub fn key_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Key {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Create a handshake error
    pub fn handshake(message: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
            hint: None,
        }
    }

    /// Create a handshake error with hint
    pub fn handshake_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Handshake {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Create a stream error
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
            hint: None,
        }
    }

    /// Create a stream error with hint
    pub fn stream_with_hint(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
            hint: Some(hint.into()),
        }
    }

    /// Actionable hint for resolving the error, when one is attached.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Validation { hint, .. }
            | Self::Key { hint, .. }
            | Self::Handshake { hint, .. }
            | Self::Stream { hint, .. } => hint.as_deref(),
            Self::Agent { .. } | Self::Database(_) => None,
        }
    }
}

/// Type alias for Result with TunnelError
pub type TunnelResult<T> = Result<T, TunnelError>;
