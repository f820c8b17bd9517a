//! Authentication error types

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by the credential manager and token exchange
#[derive(Error, Debug)]
pub enum AuthError {
    /// Credentials missing from configuration; retrying cannot help
    #[error("Configuration error: {0}")]
    Config(String),

    /// The upstream answered "too many requests"; a cooldown has started
    #[error("Too many requests, retry after {retry_after}")]
    RateLimited { retry_after: DateTime<Utc> },

    /// A cooldown is active, so no request was made
    #[error("Skipping API request because too many requests, retry after {retry_after}")]
    Skipping { retry_after: DateTime<Utc> },

    /// The upstream returned an error list
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Network or decoding failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// A failure annotated with the operation that produced it
    #[error("Failed to {operation}: {source}")]
    Context {
        operation: &'static str,
        #[source]
        source: Box<AuthError>,
    },
}

impl AuthError {
    /// Wrap with the name of the failed operation
    pub fn context(self, operation: &'static str) -> Self {
        AuthError::Context {
            operation,
            source: Box::new(self),
        }
    }

    /// The innermost error, with context layers removed
    pub fn root(&self) -> &AuthError {
        match self {
            AuthError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether the caller should try again on a later tick
    pub fn is_retryable(&self) -> bool {
        !matches!(self.root(), AuthError::Config(_))
    }

    /// Whether this is a rate-limit or cooldown condition
    pub fn is_backoff(&self) -> bool {
        matches!(
            self.root(),
            AuthError::RateLimited { .. } | AuthError::Skipping { .. }
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(err: serde_json::Error) -> Self {
        AuthError::Transport(format!("invalid response: {}", err))
    }
}

/// Result type alias for authentication
pub type AuthResult<T> = Result<T, AuthError>;
