//! # Timer Broadcast
//!
//! Shared remote countdown timers for Tokio services.
//!
//! Callers subscribe to a named timer and receive "seconds remaining"
//! notifications until it expires. However many callers watch the same
//! timer, the external timer source is polled by a single loop whose
//! results are fanned out to every subscriber.
//!
//! ## Features
//!
//! - **One poll per timer**: joiners attach to the running loop instead of polling again
//! - **Independent subscribers**: each one can leave, or be cancelled, without disturbing the rest
//! - **Per-subscriber cadence**: slower subscribers pace themselves off the shared poll
//! - **Clean teardown**: expiry, gateway failure, or shutdown closes every stream
//! - **Pluggable gateway**: anything implementing [`TimerGateway`]
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use timer_broadcast::{BroadcastConfig, CancellationToken, LocalGateway, TimerBroadcast};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let shutdown = CancellationToken::new();
//!     let broadcast = TimerBroadcast::new(
//!         BroadcastConfig::new("quick_start"),
//!         Arc::new(LocalGateway::new()),
//!         shutdown.clone(),
//!     );
//!
//!     // 2 second timer, notified every second
//!     let mut countdown = broadcast.subscribe("tea", 2, 1).await?;
//!     while let Some(ping) = countdown.recv().await {
//!         println!("'{}': {}s left", ping.timer_name, ping.seconds_left);
//!     }
//!
//!     shutdown.cancel();
//!     Ok(())
//! }
//! ```

mod broadcast;
mod config;
mod error;
mod gateway;
mod registry;
mod subscription;

pub use broadcast::{Ping, TimerBroadcast};
pub use config::BroadcastConfig;
pub use error::{GatewayError, SubscribeError};
pub use gateway::{LocalGateway, TimerGateway, TimerStatus};
pub use registry::SubscriberId;
pub use subscription::Subscription;

// Re-export commonly used types for convenience
pub use std::time::Duration;
pub use tokio_util::sync::CancellationToken;
