//! Octopus API client
//!
//! Credentialed data fetches: account lookup for the smart meter device and
//! live consumption telemetry. Every query passes through the credential
//! manager first.

use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::graphql::{GraphQlClient, QueryBody};
use super::telemetry::{latest_reading, ConsumptionReading, TelemetryPoint};
use super::token::KrakenTokenExchange;
use super::OctopusError;
use crate::auth::CredentialManager;
use crate::poller::ReadingSource;

const ACCOUNT_QUERY: &str = r#"query Account($accountNumber: String!) {
    account(accountNumber: $accountNumber) {
        electricityAgreements(active: true) {
            meterPoint {
                meters(includeInactive: false) {
                    smartImportElectricityMeter {
                        deviceId
                    }
                }
            }
        }
    }
}"#;

const TELEMETRY_QUERY: &str = r#"query SmartMeterTelemetry(
    $deviceId: String!
    $start: DateTime!
    $end: DateTime!
) {
    smartMeterTelemetry(
        deviceId: $deviceId
        grouping: TEN_SECONDS
        start: $start
        end: $end
    ) {
        readAt
        consumption
        demand
    }
}"#;

/// How far back each live telemetry query looks
const TELEMETRY_WINDOW_SECS: i64 = 20;

#[derive(Debug, Deserialize)]
struct AccountData {
    account: Option<Account>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    #[serde(default)]
    electricity_agreements: Vec<ElectricityAgreement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ElectricityAgreement {
    meter_point: MeterPoint,
}

#[derive(Debug, Deserialize)]
struct MeterPoint {
    #[serde(default)]
    meters: Vec<Meter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Meter {
    smart_import_electricity_meter: Option<SmartMeter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SmartMeter {
    device_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TelemetryData {
    smart_meter_telemetry: Option<Vec<TelemetryPoint>>,
}

/// Pick the first active agreement's first smart meter
fn first_device_id(account: Account) -> Result<String, OctopusError> {
    let agreement = account
        .electricity_agreements
        .into_iter()
        .next()
        .ok_or_else(|| OctopusError::NoData("No electricity agreements found".into()))?;

    let meter = agreement
        .meter_point
        .meters
        .into_iter()
        .next()
        .ok_or_else(|| OctopusError::NoData("No electricity meters found".into()))?;

    meter
        .smart_import_electricity_meter
        .map(|m| m.device_id)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| OctopusError::NoData("No smart import meter found".into()))
}

/// Authenticated client for the account and telemetry queries
pub struct OctopusClient {
    graphql: GraphQlClient,
    auth: CredentialManager<KrakenTokenExchange>,
    account_number: Option<String>,
    device_id: Option<String>,
}

impl OctopusClient {
    /// Create a client; the API key and account number come from configuration
    pub fn new(
        graphql: GraphQlClient,
        api_key: Option<String>,
        account_number: Option<String>,
    ) -> Self {
        let exchange = KrakenTokenExchange::new(graphql.clone());

        Self {
            graphql,
            auth: CredentialManager::new(exchange, api_key),
            account_number: account_number.filter(|n| !n.is_empty()),
            device_id: None,
        }
    }

    fn account_number(&self) -> Result<&str, OctopusError> {
        self.account_number.as_deref().ok_or_else(|| {
            OctopusError::Config(
                "No account number available; OCTOPUS_ACCOUNT_NUMBER environment variable is not set"
                    .into(),
            )
        })
    }

    /// Run a query after making sure the credential is usable
    async fn authed_query<D: DeserializeOwned>(
        &mut self,
        body: &QueryBody,
    ) -> Result<D, OctopusError> {
        let token = self.auth.ensure_authenticated().await?;
        let mut response = self.graphql.query::<D>(body, Some(&token)).await?;

        if let Some(errors) = response.take_errors() {
            return Err(self.auth.note_upstream_errors(&errors).into());
        }

        response
            .data
            .ok_or_else(|| OctopusError::Decode(format!("{} response: missing data", body.name)))
    }

    /// Look up and cache the smart meter device id
    async fn ensure_device_id(&mut self) -> Result<String, OctopusError> {
        if let Some(id) = &self.device_id {
            return Ok(id.clone());
        }

        let body = QueryBody {
            name: "Account",
            query: ACCOUNT_QUERY,
            variables: json!({ "accountNumber": self.account_number()? }),
        };

        let data: AccountData = self.authed_query(&body).await?;
        let account = data
            .account
            .ok_or_else(|| OctopusError::NoData("Account not found".into()))?;

        let device_id = first_device_id(account)?;
        tracing::info!(device_id = %device_id, "Found smart meter");

        self.device_id = Some(device_id.clone());
        Ok(device_id)
    }

    /// Fetch the newest live consumption reading
    pub async fn live_consumption(&mut self) -> Result<ConsumptionReading, OctopusError> {
        let device_id = self
            .ensure_device_id()
            .await
            .map_err(|e| e.context("Get smart meter ID"))?;

        let end = Utc::now();
        let start = end - Duration::seconds(TELEMETRY_WINDOW_SECS);

        let body = QueryBody {
            name: "SmartMeterTelemetry",
            query: TELEMETRY_QUERY,
            variables: json!({
                "deviceId": device_id,
                "start": start.to_rfc3339_opts(SecondsFormat::Secs, true),
                "end": end.to_rfc3339_opts(SecondsFormat::Secs, true),
            }),
        };

        let data: TelemetryData = self
            .authed_query(&body)
            .await
            .map_err(|e| e.context("Get live consumption"))?;

        latest_reading(&data.smart_meter_telemetry.unwrap_or_default())
            .map_err(|e| e.context("Get live consumption"))
    }
}

#[async_trait]
impl ReadingSource for OctopusClient {
    fn name(&self) -> &str {
        "octopus"
    }

    async fn fetch(&mut self) -> Result<ConsumptionReading, OctopusError> {
        self.live_consumption().await
    }
}
