//! Octopus Energy API
//!
//! Client for the Kraken GraphQL API:
//! - **graphql**: HTTP transport and response envelope
//! - **token**: `obtainKrakenToken` exchange for the credential manager
//! - **client**: account lookup and live smart meter telemetry
//! - **telemetry**: the reading type and point decoding

mod client;
mod error;
mod graphql;
mod telemetry;
mod token;

pub use client::OctopusClient;
pub use error::OctopusError;
pub use graphql::{GraphQlClient, GraphQlResponse, QueryBody, DEFAULT_BASE_URL};
pub use telemetry::{latest_reading, ConsumptionReading, TelemetryPoint};
pub use token::KrakenTokenExchange;
