//! Credential Manager
//!
//! Decides when to exchange credentials and classifies upstream failures.
//!
//! ```text
//! ensure_authenticated
//!   cooldown active?          → Skipping
//!   access token live?        → that token (no network)
//!   refresh token live?       → refresh exchange
//!   otherwise                 → API key exchange
//! ```
//!
//! The manager is mutated through `&mut self`, so a single owner (the poller)
//! drives every exchange and no lock guards the credential.

use chrono::{DateTime, Duration, Utc};

use super::credential::{
    Credential, RateLimitState, TokenGrant, ACCESS_TOKEN_LIFETIME, RATE_LIMIT_COOLDOWN,
};
use super::error::{AuthError, AuthResult};
use super::exchange::{ExchangeInput, ExchangeResponse, TokenExchange, UpstreamError};

/// Durations governing token lifetime and rate-limit backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialPolicy {
    /// Access token lifetime stamped at exchange time
    pub access_token_lifetime: Duration,
    /// Cooldown after a "too many requests" error
    pub rate_limit_cooldown: Duration,
}

impl Default for CredentialPolicy {
    fn default() -> Self {
        Self {
            access_token_lifetime: ACCESS_TOKEN_LIFETIME,
            rate_limit_cooldown: RATE_LIMIT_COOLDOWN,
        }
    }
}

/// Tracks the live credential and renews it through a [`TokenExchange`]
pub struct CredentialManager<E> {
    exchange: E,
    api_key: Option<String>,
    credential: Credential,
    rate_limit: RateLimitState,
    policy: CredentialPolicy,
}

impl<E: TokenExchange> CredentialManager<E> {
    /// Create a manager with an empty credential
    ///
    /// A missing API key only surfaces once a fresh exchange is needed.
    pub fn new(exchange: E, api_key: Option<String>) -> Self {
        Self {
            exchange,
            api_key: api_key.filter(|key| !key.is_empty()),
            credential: Credential::empty(),
            rate_limit: RateLimitState::default(),
            policy: CredentialPolicy::default(),
        }
    }

    /// Override token lifetime and cooldown
    pub fn with_policy(mut self, policy: CredentialPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start from a previously obtained credential
    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    /// The current credential
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// The current rate-limit cooldown
    pub fn rate_limit(&self) -> RateLimitState {
        self.rate_limit
    }

    /// The access token, if it is still live
    pub fn access_token(&self) -> Option<&str> {
        self.credential
            .has_valid_access_token(Utc::now())
            .then_some(self.credential.access_token.as_str())
    }

    /// Fail with [`AuthError::Skipping`] while a cooldown is active
    pub fn check_rate_limit(&self) -> AuthResult<()> {
        match self.rate_limit.active_until(Utc::now()) {
            Some(retry_after) => Err(AuthError::Skipping { retry_after }),
            None => Ok(()),
        }
    }

    /// Make sure a usable access token exists, exchanging if necessary
    ///
    /// Call before every credentialed request and send the returned token.
    /// It was live at the instant it was checked or issued.
    pub async fn ensure_authenticated(&mut self) -> AuthResult<String> {
        self.check_rate_limit()?;

        let now = Utc::now();

        if self.credential.has_valid_access_token(now) {
            return Ok(self.credential.access_token.clone());
        }

        if self.credential.has_valid_refresh_token(now) {
            tracing::debug!("Access token expired, refreshing");
            return self
                .auth_with_refresh_token()
                .await
                .map_err(|e| e.context("get kraken token"));
        }

        tracing::debug!("No valid token or refresh token, authenticating with API key");
        self.auth_with_api_key()
            .await
            .map_err(|e| e.context("get kraken token"))
    }

    async fn auth_with_api_key(&mut self) -> AuthResult<String> {
        let api_key = self.api_key.clone().ok_or_else(|| {
            AuthError::Config(
                "No API key available; OCTOPUS_API_KEY environment variable is not set".into(),
            )
        })?;

        self.obtain_token(ExchangeInput::ApiKey(api_key)).await
    }

    async fn auth_with_refresh_token(&mut self) -> AuthResult<String> {
        if self.credential.refresh_token.is_empty() {
            return Err(AuthError::Config("No refresh token available".into()));
        }

        let input = ExchangeInput::RefreshToken(self.credential.refresh_token.clone());
        self.obtain_token(input).await
    }

    async fn obtain_token(&mut self, input: ExchangeInput) -> AuthResult<String> {
        self.check_rate_limit()?;

        let kind = input.kind();
        match self.exchange.exchange(input).await? {
            ExchangeResponse::Granted(grant) => {
                self.install(grant, Utc::now());
                tracing::info!(
                    via = kind,
                    refresh_expires_at = %self.credential.refresh_expires_at,
                    "Obtained kraken token"
                );
                Ok(self.credential.access_token.clone())
            }
            ExchangeResponse::Rejected(errors) => {
                Err(self.note_upstream_errors(&errors).context("obtain kraken token"))
            }
        }
    }

    fn install(&mut self, grant: TokenGrant, now: DateTime<Utc>) {
        self.credential = Credential::issued(grant, now, self.policy.access_token_lifetime);
    }

    /// Classify an upstream error list
    ///
    /// A "too many requests" entry starts the cooldown and yields
    /// [`AuthError::RateLimited`]; anything else is joined into one
    /// [`AuthError::Upstream`] message.
    pub fn note_upstream_errors(&mut self, errors: &[UpstreamError]) -> AuthError {
        if errors.iter().any(UpstreamError::is_too_many_requests) {
            let retry_after = Utc::now() + self.policy.rate_limit_cooldown;
            self.rate_limit.latch(retry_after);
            tracing::warn!(%retry_after, "Upstream rate limit hit, pausing API requests");
            return AuthError::RateLimited { retry_after };
        }

        AuthError::Upstream(join_errors(errors))
    }
}

/// `"<code> <message>; <code> <message>"`
fn join_errors(errors: &[UpstreamError]) -> String {
    if errors.is_empty() {
        return "Unknown error".to_string();
    }

    errors
        .iter()
        .map(|e| format!("{} {}", e.code(), e.message))
        .collect::<Vec<_>>()
        .join("; ")
}
