//! GraphQL transport
//!
//! Thin HTTP client for the Kraken GraphQL endpoint. Knows nothing about
//! credentials beyond attaching a token when one is given.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::OctopusError;
use crate::auth::UpstreamError;

/// Default Kraken GraphQL endpoint
pub const DEFAULT_BASE_URL: &str = "https://api.octopus.energy/v1/graphql/";

/// A GraphQL operation ready to send
#[derive(Debug, Clone, Serialize)]
pub struct QueryBody {
    /// Operation name, used in logs only
    #[serde(skip)]
    pub name: &'static str,
    pub query: &'static str,
    pub variables: serde_json::Value,
}

/// Envelope of every GraphQL response
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "D: DeserializeOwned"))]
pub struct GraphQlResponse<D> {
    pub data: Option<D>,
    #[serde(default)]
    pub errors: Option<Vec<UpstreamError>>,
}

impl<D> GraphQlResponse<D> {
    /// The error list, treating an empty array like an absent one
    pub fn take_errors(&mut self) -> Option<Vec<UpstreamError>> {
        self.errors.take().filter(|errors| !errors.is_empty())
    }
}

/// HTTP client for the Kraken GraphQL API
#[derive(Debug, Clone)]
pub struct GraphQlClient {
    client: Client,
    base_url: String,
}

impl GraphQlClient {
    /// Create a client with the given endpoint and request timeout
    pub fn new(base_url: impl Into<String>, request_timeout_ms: u64) -> Result<Self, OctopusError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_millis(request_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    /// Send an operation and decode the response envelope
    ///
    /// `token` is sent verbatim in the `Authorization` header.
    pub async fn query<D: DeserializeOwned>(
        &self,
        body: &QueryBody,
        token: Option<&str>,
    ) -> Result<GraphQlResponse<D>, OctopusError> {
        let mut request = self.client.post(&self.base_url).json(body);
        if let Some(token) = token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }

        let response = request.send().await?;
        let status = response.status();

        tracing::debug!(
            operation = body.name,
            status = status.as_u16(),
            "Octopus query returned"
        );

        let bytes = response.bytes().await?;

        serde_json::from_slice(&bytes).map_err(|e| {
            OctopusError::Decode(format!(
                "{} response (status {}): {}",
                body.name, status, e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_body_serialization_skips_name() {
        let body = QueryBody {
            name: "Account",
            query: "query Account { account { number } }",
            variables: serde_json::json!({"accountNumber": "A-1234ABCD"}),
        };

        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("name").is_none());
        assert_eq!(json["variables"]["accountNumber"], "A-1234ABCD");
    }

    #[test]
    fn test_response_envelope_with_errors() {
        let json = r#"{
            "data": {"obtainKrakenToken": null},
            "errors": [{"message": "Too many requests.", "extensions": {"errorCode": "KT-CT-1199"}}]
        }"#;

        let mut response: GraphQlResponse<serde_json::Value> = serde_json::from_str(json).unwrap();
        let errors = response.take_errors().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].is_too_many_requests());
    }

    #[test]
    fn test_empty_error_array_is_absent() {
        let mut response: GraphQlResponse<serde_json::Value> =
            serde_json::from_str(r#"{"data": {}, "errors": []}"#).unwrap();
        assert!(response.take_errors().is_none());
    }
}
