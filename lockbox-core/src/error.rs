//! Error types for the login core.
//!
//! Every public operation returns exactly one [`LoginError`] on failure.
//! The taxonomy distinguishes authentication failures (`BadPassword`),
//! protocol-level auth details (`InvalidOtp`, `InvalidPinWait`), local data
//! problems (`Parse`, `DecryptFailure`, `Io`), and transport problems
//! (`Server`, `Url`).

use thiserror::Error;

/// Result type alias for login operations.
pub type LoginResult<T> = Result<T, LoginError>;

/// Errors that can occur during login and key-management operations.
#[derive(Debug, Error)]
pub enum LoginError {
    /// The username already has an account, locally or on the server.
    #[error("account already exists")]
    AccountAlreadyExists,

    /// No account with that username exists, locally or on the server.
    #[error("account does not exist")]
    AccountDoesNotExist,

    /// Wrong password or wrong recovery answers.
    #[error("bad password")]
    BadPassword,

    /// No recovery questions have been configured for this account.
    #[error("no recovery questions")]
    NoRecoveryQuestions,

    /// The server requires a valid 2-factor token for this request.
    #[error("invalid OTP token")]
    InvalidOtp {
        /// When the pending OTP reset completes, if one was requested.
        otp_date: Option<String>,
        /// Token that can be used to request an OTP reset.
        otp_token: Option<String>,
    },

    /// The server is rate-limiting PIN or password attempts.
    #[error("retry wait of {seconds}s imposed by server")]
    InvalidPinWait {
        /// Seconds the caller must wait before retrying.
        seconds: u64,
    },

    /// A structured document was missing a field or had the wrong shape.
    #[error("parse error: {context}")]
    Parse {
        /// What was being parsed.
        context: String,
    },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Authenticated decryption failed (wrong key or corrupted envelope).
    ///
    /// Never surfaced raw from the orchestrator: password-keyed envelopes
    /// map this to [`LoginError::BadPassword`], username-keyed envelopes
    /// map it to [`LoginError::Internal`] (local corruption).
    #[error("decryption failed: {context}")]
    DecryptFailure {
        /// What was being decrypted.
        context: String,
    },

    /// Key derivation failed (invalid cost parameters or resource limits).
    #[error("key derivation failed: {context}")]
    KeyDerivation {
        /// What was being derived.
        context: String,
    },

    /// Transport failure or 5xx from the auth server. Retryable.
    #[error("server error: {context}")]
    Server {
        /// Description of the failure.
        context: String,
    },

    /// A request URL could not be built.
    #[error("bad URL: {url}")]
    Url {
        /// The offending URL.
        url: String,
    },

    /// An I/O operation on the account directory failed.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// The operation that failed.
        context: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Internal invariant violation. Indicates a bug or corrupt local state.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violation.
        message: String,
    },
}

impl LoginError {
    /// Creates a parse error with context.
    pub fn parse<S: Into<String>>(context: S) -> Self {
        Self::Parse {
            context: context.into(),
        }
    }

    /// Creates a decryption failure with context.
    pub fn decrypt<S: Into<String>>(context: S) -> Self {
        Self::DecryptFailure {
            context: context.into(),
        }
    }

    /// Creates a key derivation error with context.
    pub fn key_derivation<S: Into<String>>(context: S) -> Self {
        Self::KeyDerivation {
            context: context.into(),
        }
    }

    /// Creates a retryable server error with context.
    pub fn server<S: Into<String>>(context: S) -> Self {
        Self::Server {
            context: context.into(),
        }
    }

    /// Creates an I/O error with context.
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Creates an internal error.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if retrying the operation could succeed.
    ///
    /// Only transport-level failures are retryable; authentication and
    /// local-state failures are terminal.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Server { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LoginError::parse("care package: missing SNRP2");
        assert!(format!("{err}").contains("missing SNRP2"));

        let err = LoginError::InvalidPinWait { seconds: 30 };
        assert!(format!("{err}").contains("30"));

        let err = LoginError::BadPassword;
        assert_eq!(format!("{err}"), "bad password");
    }

    #[test]
    fn test_retryable() {
        assert!(LoginError::server("connect timeout").is_retryable());
        assert!(!LoginError::BadPassword.is_retryable());
        assert!(!LoginError::internal("corrupt sync key").is_retryable());
    }
}
