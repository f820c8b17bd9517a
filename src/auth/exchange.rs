//! Token exchange seam
//!
//! The manager talks to the token endpoint through [`TokenExchange`] so the
//! GraphQL transport stays outside the auth state machine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::credential::TokenGrant;
use super::error::AuthError;

/// Upstream error code for "too many requests"
pub const TOO_MANY_REQUESTS_CODE: &str = "KT-CT-1199";

/// What a credential is exchanged for
#[derive(Clone, PartialEq, Eq)]
pub enum ExchangeInput {
    /// Fresh exchange with the long-lived API key
    ApiKey(String),
    /// Renewal with the current refresh token
    RefreshToken(String),
}

impl ExchangeInput {
    /// Short label for logs; never includes the secret
    pub fn kind(&self) -> &'static str {
        match self {
            ExchangeInput::ApiKey(_) => "api_key",
            ExchangeInput::RefreshToken(_) => "refresh_token",
        }
    }
}

impl std::fmt::Debug for ExchangeInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ExchangeInput::{}(..)", self.kind())
    }
}

/// Result of a token exchange that reached the upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeResponse {
    /// A populated token pair
    Granted(TokenGrant),
    /// The upstream refused and reported these errors
    Rejected(Vec<UpstreamError>),
}

/// One entry of a GraphQL `errors` array
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub extensions: UpstreamErrorExtensions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamErrorExtensions {
    #[serde(default)]
    pub error_code: String,
    #[serde(default)]
    pub error_type: String,
    #[serde(default)]
    pub error_description: String,
}

impl UpstreamError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            extensions: UpstreamErrorExtensions {
                error_code: code.into(),
                ..Default::default()
            },
        }
    }

    pub fn code(&self) -> &str {
        &self.extensions.error_code
    }

    pub fn is_too_many_requests(&self) -> bool {
        self.code() == TOO_MANY_REQUESTS_CODE
    }
}

/// Trades an API key or refresh token for a new token pair
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Perform one exchange
    ///
    /// Transport and decoding failures are returned as `Err`; upstream
    /// refusals come back as [`ExchangeResponse::Rejected`].
    async fn exchange(&self, input: ExchangeInput) -> Result<ExchangeResponse, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_error_deserialize() {
        let json = r#"{
            "message": "Too many requests.",
            "extensions": {"errorCode": "KT-CT-1199", "errorType": "APPLICATION"}
        }"#;

        let err: UpstreamError = serde_json::from_str(json).unwrap();
        assert!(err.is_too_many_requests());
        assert_eq!(err.extensions.error_type, "APPLICATION");
        assert!(err.extensions.error_description.is_empty());
    }

    #[test]
    fn test_exchange_input_debug_hides_secret() {
        let input = ExchangeInput::ApiKey("sk_live_secret".into());
        assert!(!format!("{:?}", input).contains("secret"));
        assert_eq!(input.kind(), "api_key");
    }
}
