//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::broadcast::Broadcaster;
use crate::octopus::ConsumptionReading;
use crate::poller::{PollStatus, SharedPollStatus};
use crate::store::ReadingStore;

/// Shared application state for all handlers
#[derive(Clone)]
pub struct AppState {
    /// Live reading hub the websocket feed subscribes to
    pub hub: Arc<Broadcaster<ConsumptionReading>>,
    /// Reading store (optional, persistence can be disabled)
    pub store: Option<Arc<ReadingStore>>,
    /// Poller summary for the health endpoint (optional)
    pub poll_status: Option<SharedPollStatus>,
    /// API configuration
    pub config: Arc<ApiConfig>,
    /// Server start time for uptime tracking
    pub start_time: Instant,
}

impl AppState {
    pub fn new(hub: Arc<Broadcaster<ConsumptionReading>>, config: ApiConfig) -> Self {
        Self {
            hub,
            store: None,
            poll_status: None,
            config: Arc::new(config),
            start_time: Instant::now(),
        }
    }

    pub fn with_store(mut self, store: Arc<ReadingStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_poll_status(mut self, status: SharedPollStatus) -> Self {
        self.poll_status = Some(status);
        self
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Snapshot of the poller summary
    pub async fn poll_status(&self) -> Option<PollStatus> {
        match &self.poll_status {
            Some(status) => Some(status.read().await.clone()),
            None => None,
        }
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long a live feed connection stays open
    #[serde(default = "default_socket_lifetime")]
    pub socket_lifetime_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_socket_lifetime() -> u64 {
    60
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            socket_lifetime_secs: default_socket_lifetime(),
        }
    }
}

impl ApiConfig {
    /// Create config with custom host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Get the socket address string
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn socket_lifetime(&self) -> Duration {
        Duration::from_secs(self.socket_lifetime_secs)
    }
}
