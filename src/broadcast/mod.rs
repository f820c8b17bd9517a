//! Broadcast Hub
//!
//! Generic one-to-many distribution of live values.
//!
//! ## Architecture
//!
//! ```text
//! publish ─────┐
//! subscribe ───┼─► command queue ─► control loop ─► latest-value slot ─► Subscription
//! unsubscribe ─┘    (in order)      (owns set)      (newest replaces unread)
//! stop ──────────────────────────────► control loop
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use octowatch::broadcast::Broadcaster;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let hub = Broadcaster::<u32>::new();
//!     let handle = hub.start()?;
//!
//!     let mut sub = hub.subscribe().await;
//!     hub.publish(42).await;
//!     assert_eq!(sub.recv().await, Some(42));
//!
//!     hub.unsubscribe(&sub).await;
//!     hub.stop();
//!     handle.await?;
//!     Ok(())
//! }
//! ```

mod hub;

pub use hub::{Broadcaster, Delivery, HubError, Subscription, SubscriptionId, TryRecvError};
