//! Kraken token exchange
//!
//! `obtainKrakenToken` accepts either an API key or a refresh token and
//! returns a new token pair. The refresh expiry is reported as an absolute
//! Unix timestamp; there is no access-token expiry in the response.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::graphql::{GraphQlClient, QueryBody};
use crate::auth::{AuthError, AuthResult, ExchangeInput, ExchangeResponse, TokenExchange, TokenGrant};

const OBTAIN_KRAKEN_TOKEN: &str = r#"mutation ObtainKrakenToken($input: ObtainJSONWebTokenInput!) {
    obtainKrakenToken(input: $input) {
        token
        refreshToken
        refreshExpiresIn
    }
}"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObtainKrakenTokenData {
    obtain_kraken_token: Option<KrakenTokenPayload>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KrakenTokenPayload {
    token: String,
    refresh_token: String,
    refresh_expires_in: i64,
}

impl KrakenTokenPayload {
    fn into_grant(self) -> AuthResult<TokenGrant> {
        let refresh_expires_at = DateTime::<Utc>::from_timestamp(self.refresh_expires_in, 0)
            .ok_or_else(|| {
                AuthError::Transport(format!(
                    "refreshExpiresIn out of range: {}",
                    self.refresh_expires_in
                ))
            })?;

        Ok(TokenGrant {
            token: self.token,
            refresh_token: self.refresh_token,
            refresh_expires_at,
        })
    }
}

/// [`TokenExchange`] backed by the Kraken GraphQL API
#[derive(Debug, Clone)]
pub struct KrakenTokenExchange {
    graphql: GraphQlClient,
}

impl KrakenTokenExchange {
    pub fn new(graphql: GraphQlClient) -> Self {
        Self { graphql }
    }
}

/// GraphQL variables for the exchange input
fn exchange_variables(input: &ExchangeInput) -> serde_json::Value {
    match input {
        ExchangeInput::ApiKey(key) => json!({ "input": { "APIKey": key } }),
        ExchangeInput::RefreshToken(token) => json!({ "input": { "refreshToken": token } }),
    }
}

#[async_trait]
impl TokenExchange for KrakenTokenExchange {
    async fn exchange(&self, input: ExchangeInput) -> AuthResult<ExchangeResponse> {
        let body = QueryBody {
            name: "ObtainKrakenToken",
            query: OBTAIN_KRAKEN_TOKEN,
            variables: exchange_variables(&input),
        };

        let mut response = self
            .graphql
            .query::<ObtainKrakenTokenData>(&body, None)
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        match response.data.take().and_then(|d| d.obtain_kraken_token) {
            Some(payload) => Ok(ExchangeResponse::Granted(payload.into_grant()?)),
            None => Ok(ExchangeResponse::Rejected(
                response.take_errors().unwrap_or_default(),
            )),
        }
    }
}
