//! Credential Store
//!
//! The access/refresh token pair, its expiry instants, and the rate-limit
//! cooldown. Pure data: callers pass the current time into every predicate.

use chrono::{DateTime, Duration, Utc};

/// Lifetime of an access token, counted from the moment it was issued
///
/// The token endpoint does not report an access expiry, so it is stamped
/// locally at exchange time.
pub const ACCESS_TOKEN_LIFETIME: Duration = Duration::hours(1);

/// How long credentialed calls are suppressed after a "too many requests" error
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::minutes(5);

/// The current access and refresh tokens
///
/// Replaced as a whole on every successful exchange. An empty token counts
/// as expired whatever its timestamp says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_expires_at: DateTime<Utc>,
}

impl Default for Credential {
    fn default() -> Self {
        Self::empty()
    }
}

impl Credential {
    /// A credential with no tokens, as held at process start
    pub fn empty() -> Self {
        Self {
            access_token: String::new(),
            access_expires_at: DateTime::<Utc>::UNIX_EPOCH,
            refresh_token: String::new(),
            refresh_expires_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Build the credential for a freshly granted token pair
    pub fn issued(grant: TokenGrant, now: DateTime<Utc>, access_lifetime: Duration) -> Self {
        Self {
            access_token: grant.token,
            access_expires_at: now + access_lifetime,
            refresh_token: grant.refresh_token,
            refresh_expires_at: grant.refresh_expires_at,
        }
    }

    /// Whether the access token can be used at `now`
    pub fn has_valid_access_token(&self, now: DateTime<Utc>) -> bool {
        is_live(&self.access_token, self.access_expires_at, now)
    }

    /// Whether the refresh token can be exchanged at `now`
    pub fn has_valid_refresh_token(&self, now: DateTime<Utc>) -> bool {
        is_live(&self.refresh_token, self.refresh_expires_at, now)
    }
}

/// A token is expired once `now >= expires_at`
fn is_live(token: &str, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    !token.is_empty() && now < expires_at
}

/// Token pair returned by a successful exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub token: String,
    pub refresh_token: String,
    /// Taken verbatim from the upstream response
    pub refresh_expires_at: DateTime<Utc>,
}

/// Cooldown after the upstream reported rate limiting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateLimitState {
    retry_after: Option<DateTime<Utc>>,
}

impl RateLimitState {
    /// Start a cooldown ending at `until`
    pub fn latch(&mut self, until: DateTime<Utc>) {
        self.retry_after = Some(until);
    }

    /// The instant the cooldown ends, if it is still active at `now`
    pub fn active_until(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.retry_after.filter(|until| now < *until)
    }

    /// Whether calls must be suppressed at `now`
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.active_until(now).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(access: &str, access_in: Duration, refresh: &str, refresh_in: Duration) -> Credential {
        let now = Utc::now();
        Credential {
            access_token: access.to_string(),
            access_expires_at: now + access_in,
            refresh_token: refresh.to_string(),
            refresh_expires_at: now + refresh_in,
        }
    }

    #[test]
    fn test_access_token_validity() {
        let now = Utc::now();
        let cases = [
            (credential("authtoken", Duration::minutes(1), "", Duration::zero()), true),
            (credential("authtoken", Duration::minutes(-2), "", Duration::zero()), false),
            (credential("", Duration::hours(1), "", Duration::zero()), false),
            (Credential::empty(), false),
        ];

        for (cred, expected) in cases {
            assert_eq!(cred.has_valid_access_token(now), expected, "{:?}", cred);
        }
    }

    #[test]
    fn test_refresh_token_validity() {
        let now = Utc::now();
        let cases = [
            (credential("", Duration::zero(), "refreshtoken", Duration::hours(1)), true),
            (credential("", Duration::zero(), "refreshtoken", Duration::minutes(-2)), false),
            (credential("", Duration::zero(), "", Duration::hours(1)), false),
            (Credential::empty(), false),
        ];

        for (cred, expected) in cases {
            assert_eq!(cred.has_valid_refresh_token(now), expected, "{:?}", cred);
        }
    }

    #[test]
    fn test_token_expired_at_exact_instant() {
        let now = Utc::now();
        let cred = Credential {
            access_token: "A".into(),
            access_expires_at: now,
            refresh_token: "R".into(),
            refresh_expires_at: now,
        };

        assert!(!cred.has_valid_access_token(now));
        assert!(!cred.has_valid_refresh_token(now));
        assert!(cred.has_valid_access_token(now - Duration::seconds(1)));
    }

    #[test]
    fn test_issued_stamps_access_expiry_locally() {
        let now = Utc::now();
        let refresh_expires_at = now + Duration::days(7);
        let cred = Credential::issued(
            TokenGrant {
                token: "A".into(),
                refresh_token: "R".into(),
                refresh_expires_at,
            },
            now,
            ACCESS_TOKEN_LIFETIME,
        );

        assert_eq!(cred.access_expires_at, now + Duration::hours(1));
        assert_eq!(cred.refresh_expires_at, refresh_expires_at);
    }

    #[test]
    fn test_rate_limit_expires_implicitly() {
        let now = Utc::now();
        let mut state = RateLimitState::default();
        assert!(!state.is_active(now));

        state.latch(now + RATE_LIMIT_COOLDOWN);
        assert!(state.is_active(now));
        assert_eq!(state.active_until(now), Some(now + RATE_LIMIT_COOLDOWN));
        assert!(!state.is_active(now + RATE_LIMIT_COOLDOWN));
    }
}
