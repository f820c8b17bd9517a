//! # Octowatch
//!
//! Live energy telemetry for Octopus Energy smart meters. A poller fetches
//! the newest meter reading every few seconds, publishes it through a
//! broadcast hub, and any number of websocket viewers receive it in near
//! real time. The short-lived Kraken bearer token behind every request is
//! renewed transparently.
//!
//! ## Modules
//!
//! - [`broadcast`]: Generic one-to-many hub with newest-wins delivery
//! - [`auth`]: Credential manager (fast path, refresh, API key, rate-limit latch)
//! - [`octopus`]: Kraken GraphQL client, token exchange and telemetry
//! - [`poller`]: Interval loop from the API to the hub
//! - [`store`]: SQLite reading history
//! - [`api`]: HTTP server with the live websocket feed
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use octowatch::broadcast::Broadcaster;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Broadcaster::<i64>::new();
//!     let handle = hub.start()?;
//!
//!     let mut viewer = hub.subscribe().await;
//!     hub.publish(420).await;
//!     println!("demand: {:?} W", viewer.recv().await);
//!
//!     hub.unsubscribe(&viewer).await;
//!     hub.stop();
//!     handle.await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod octopus;
pub mod poller;
pub mod store;

pub use auth::{AuthError, CredentialManager};
pub use broadcast::{Broadcaster, Subscription};
pub use config::Config;
pub use octopus::{ConsumptionReading, OctopusClient, OctopusError};
pub use poller::{Poller, ReadingSource};
pub use store::ReadingStore;
