//! Poller
//!
//! Periodically fetches a live reading, publishes it to the broadcast hub,
//! and appends it to the reading store.
//!
//! Rate-limit and cooldown conditions are logged and the next tick tries
//! again; configuration errors stop the poller.

mod task;

pub use task::{PollError, PollOutcome, PollStatus, Poller, PollerConfig, SharedPollStatus};

use async_trait::async_trait;

use crate::octopus::{ConsumptionReading, OctopusError};

/// Where the poller gets its readings from
#[async_trait]
pub trait ReadingSource: Send {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Fetch the newest reading, authenticating first if needed
    async fn fetch(&mut self) -> Result<ConsumptionReading, OctopusError>;
}
