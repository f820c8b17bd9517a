//! Poll loop
//!
//! Drives a [`ReadingSource`] on a fixed interval.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::ReadingSource;
use crate::broadcast::Broadcaster;
use crate::octopus::{ConsumptionReading, OctopusError};
use crate::store::ReadingStore;

/// Poll loop configuration
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Time between polls
    pub interval: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
        }
    }
}

/// Result of a single poll
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    /// A reading was published
    Published { reading: ConsumptionReading },
    /// Rate limited or cooling down; nothing to publish
    Backoff { reason: String },
    /// The fetch failed but a later poll may succeed
    Failed { error: String },
}

/// Running summary of the poller, shared with the health endpoint
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollStatus {
    pub polls: u64,
    pub published: u64,
    pub consecutive_failures: u32,
    pub last_poll: Option<DateTime<Utc>>,
    pub last_outcome: Option<PollOutcome>,
    pub last_reading: Option<ConsumptionReading>,
}

pub type SharedPollStatus = Arc<RwLock<PollStatus>>;

/// Polls a source and fans its readings out
pub struct Poller<S> {
    source: S,
    hub: Arc<Broadcaster<ConsumptionReading>>,
    store: Option<Arc<ReadingStore>>,
    config: PollerConfig,
    status: SharedPollStatus,
}

impl<S: ReadingSource + 'static> Poller<S> {
    pub fn new(
        source: S,
        hub: Arc<Broadcaster<ConsumptionReading>>,
        config: PollerConfig,
    ) -> Self {
        Self {
            source,
            hub,
            store: None,
            config,
            status: Arc::new(RwLock::new(PollStatus::default())),
        }
    }

    /// Persist every published reading
    pub fn with_store(mut self, store: Arc<ReadingStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Handle to the running summary
    pub fn status(&self) -> SharedPollStatus {
        Arc::clone(&self.status)
    }

    /// Fetch once and publish
    ///
    /// Returns `Err` only for failures that retrying cannot fix.
    pub async fn poll_once(&mut self) -> Result<PollOutcome, PollError> {
        let result = self.source.fetch().await;

        let outcome = match result {
            Ok(reading) => {
                self.hub.publish(reading).await;
                tracing::info!(
                    demand_w = reading.demand,
                    total_wh = reading.total_consumption,
                    read_at = %reading.timestamp,
                    "Published live reading"
                );

                if let Some(store) = &self.store {
                    if let Err(e) = store.insert(&reading) {
                        tracing::warn!(error = %e, "Failed to store reading");
                    }
                }

                PollOutcome::Published { reading }
            }
            Err(e) if e.is_backoff() => {
                tracing::warn!(source = self.source.name(), error = %e, "Poll skipped");
                PollOutcome::Backoff {
                    reason: e.to_string(),
                }
            }
            Err(e) if e.is_retryable() => {
                tracing::error!(source = self.source.name(), error = %e, "Poll failed");
                PollOutcome::Failed {
                    error: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(source = self.source.name(), error = %e, "Poll failed, not retrying");
                record(
                    &self.status,
                    PollOutcome::Failed {
                        error: e.to_string(),
                    },
                )
                .await;
                return Err(PollError::Fatal(e));
            }
        };

        record(&self.status, outcome.clone()).await;
        Ok(outcome)
    }

    /// Poll on every tick until `shutdown` flips or a fatal error occurs
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), PollError> {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            source = self.source.name(),
            interval_secs = self.config.interval.as_secs_f64(),
            "Poller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = interval.tick() => {
                    self.poll_once().await?;
                }
            }
        }

        tracing::info!("Poller stopped");
        Ok(())
    }

    /// Spawn [`Poller::run`] as a background task
    pub fn start(self, shutdown: watch::Receiver<bool>) -> JoinHandle<Result<(), PollError>> {
        tokio::spawn(self.run(shutdown))
    }
}

async fn record(status: &RwLock<PollStatus>, outcome: PollOutcome) {
    let mut status = status.write().await;
    status.polls += 1;
    status.last_poll = Some(Utc::now());

    match &outcome {
        PollOutcome::Published { reading } => {
            status.published += 1;
            status.consecutive_failures = 0;
            status.last_reading = Some(*reading);
        }
        PollOutcome::Backoff { .. } => {}
        PollOutcome::Failed { .. } => status.consecutive_failures += 1,
    }

    status.last_outcome = Some(outcome);
}

/// Errors that stop the poller
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Fatal poll error: {0}")]
    Fatal(#[source] OctopusError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthError;
    use async_trait::async_trait;
    use std::collections::VecDeque;

    struct ScriptedSource {
        results: VecDeque<Result<ConsumptionReading, OctopusError>>,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<ConsumptionReading, OctopusError>>) -> Self {
            Self {
                results: results.into(),
            }
        }
    }

    #[async_trait]
    impl ReadingSource for ScriptedSource {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn fetch(&mut self) -> Result<ConsumptionReading, OctopusError> {
            self.results
                .pop_front()
                .unwrap_or_else(|| Err(OctopusError::NoData("script exhausted".into())))
        }
    }

    fn reading(demand: i64) -> ConsumptionReading {
        ConsumptionReading {
            timestamp: DateTime::<Utc>::from_timestamp(1_790_000_000 + demand, 0).unwrap(),
            total_consumption: 1000,
            demand,
        }
    }

    fn started_hub() -> (Arc<Broadcaster<ConsumptionReading>>, JoinHandle<()>) {
        let hub = Arc::new(Broadcaster::new());
        let handle = hub.start().unwrap();
        (hub, handle)
    }

    #[tokio::test]
    async fn test_poll_publishes_and_stores() {
        let (hub, handle) = started_hub();
        let store = Arc::new(ReadingStore::open_in_memory().unwrap());
        let mut sub = hub.subscribe().await;

        let source = ScriptedSource::new(vec![Ok(reading(300))]);
        let mut poller = Poller::new(source, Arc::clone(&hub), PollerConfig::default())
            .with_store(Arc::clone(&store));

        let outcome = poller.poll_once().await.unwrap();
        assert_eq!(outcome, PollOutcome::Published { reading: reading(300) });
        assert_eq!(sub.recv().await, Some(reading(300)));
        assert_eq!(store.count().unwrap(), 1);

        let status = poller.status();
        let status = status.read().await;
        assert_eq!(status.published, 1);
        assert_eq!(status.last_reading, Some(reading(300)));

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_backoff_and_failures_continue() {
        let (hub, handle) = started_hub();
        let source = ScriptedSource::new(vec![
            Err(OctopusError::Auth(AuthError::RateLimited {
                retry_after: Utc::now(),
            })),
            Err(OctopusError::NoData("No electricity meter readings found".into())),
        ]);
        let mut poller = Poller::new(source, Arc::clone(&hub), PollerConfig::default());

        assert!(matches!(
            poller.poll_once().await.unwrap(),
            PollOutcome::Backoff { .. }
        ));
        assert!(matches!(
            poller.poll_once().await.unwrap(),
            PollOutcome::Failed { .. }
        ));

        let status = poller.status();
        assert_eq!(status.read().await.consecutive_failures, 1);
        assert_eq!(status.read().await.polls, 2);

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_config_error_is_fatal() {
        let (hub, handle) = started_hub();
        let source = ScriptedSource::new(vec![Err(OctopusError::Auth(AuthError::Config(
            "No API key available".into(),
        )))]);
        let poller = Poller::new(
            source,
            Arc::clone(&hub),
            PollerConfig {
                interval: Duration::from_millis(10),
            },
        );

        let (_tx, rx) = watch::channel(false);
        let result = tokio::time::timeout(Duration::from_secs(1), poller.run(rx))
            .await
            .unwrap();
        assert!(matches!(result, Err(PollError::Fatal(_))));

        hub.stop();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (hub, handle) = started_hub();
        let source = ScriptedSource::new(
            (0..1000).map(|i| Ok(reading(i))).collect(),
        );
        let poller = Poller::new(
            source,
            Arc::clone(&hub),
            PollerConfig {
                interval: Duration::from_millis(5),
            },
        );
        let status = poller.status();

        let (tx, rx) = watch::channel(false);
        let task = poller.start(rx);

        tokio::time::sleep(Duration::from_millis(40)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(status.read().await.published >= 1);

        hub.stop();
        handle.await.unwrap();
    }
}
