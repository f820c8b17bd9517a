//! Octopus client error types

use thiserror::Error;

use crate::auth::AuthError;

/// Errors from the Octopus API client
#[derive(Error, Debug)]
pub enum OctopusError {
    /// Credential manager refused or failed
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// HTTP request failed
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Response body could not be decoded
    #[error("Failed to decode {0}")]
    Decode(String),

    /// Required setting missing
    #[error("Configuration error: {0}")]
    Config(String),

    /// The account has nothing to report
    #[error("{0}")]
    NoData(String),

    /// A failure annotated with the operation that produced it
    #[error("{operation}: {source}")]
    Context {
        operation: &'static str,
        #[source]
        source: Box<OctopusError>,
    },
}

impl OctopusError {
    /// Wrap with the name of the failed operation
    pub fn context(self, operation: &'static str) -> Self {
        OctopusError::Context {
            operation,
            source: Box::new(self),
        }
    }

    /// The innermost error, with context layers removed
    pub fn root(&self) -> &OctopusError {
        match self {
            OctopusError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Whether a later poll may succeed without operator action
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            OctopusError::Auth(e) => e.is_retryable(),
            OctopusError::Config(_) => false,
            _ => true,
        }
    }

    /// Whether this is a rate-limit or cooldown condition
    pub fn is_backoff(&self) -> bool {
        matches!(self.root(), OctopusError::Auth(e) if e.is_backoff())
    }
}
