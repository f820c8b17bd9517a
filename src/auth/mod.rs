//! Credential Lifecycle
//!
//! Tracks the short-lived Kraken access token and the longer-lived refresh
//! token, renews them exactly when needed, and backs off after the upstream
//! reports rate limiting.
//!
//! - **credential**: token pair, expiry predicates, rate-limit cooldown
//! - **exchange**: the [`TokenExchange`] seam and upstream error entries
//! - **manager**: the [`CredentialManager`] state machine
//! - **error**: error taxonomy

mod credential;
mod error;
mod exchange;
mod manager;

pub use credential::{
    Credential, RateLimitState, TokenGrant, ACCESS_TOKEN_LIFETIME, RATE_LIMIT_COOLDOWN,
};
pub use error::{AuthError, AuthResult};
pub use exchange::{
    ExchangeInput, ExchangeResponse, TokenExchange, UpstreamError, UpstreamErrorExtensions,
    TOO_MANY_REQUESTS_CODE,
};
pub use manager::{CredentialManager, CredentialPolicy};
