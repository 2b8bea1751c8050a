use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::GatewayError;

/// Remaining and elapsed whole seconds of a running timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerStatus {
    pub remaining: u64,
    pub elapsed: u64,
}

/// Source of truth for named countdown timers.
///
/// The broadcast core treats implementations as stateless: it never caches
/// a reply beyond the tick that asked for it.
#[async_trait]
pub trait TimerGateway: Send + Sync {
    /// Start (or restart) the named timer with the given length.
    async fn create(&self, name: &str, seconds: u64) -> Result<(), GatewayError>;

    /// Current state of the named timer.
    ///
    /// Returns [`GatewayError::NotExists`] for a name that was never created
    /// and [`GatewayError::Expired`] once the timer has run out.
    async fn check(&self, name: &str) -> Result<TimerStatus, GatewayError>;
}

#[derive(Debug, Clone, Copy)]
struct LocalTimer {
    started: Instant,
    deadline: Instant,
}

/// In-process gateway keeping timers on the Tokio clock.
///
/// Timer storage: timer_name -> (start, expiration)
#[derive(Debug, Default)]
pub struct LocalGateway {
    timers: Mutex<HashMap<String, LocalTimer>>,
}

impl LocalGateway {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TimerGateway for LocalGateway {
    async fn create(&self, name: &str, seconds: u64) -> Result<(), GatewayError> {
        let started = Instant::now();
        let timer = LocalTimer {
            started,
            deadline: started + Duration::from_secs(seconds),
        };
        let was_replaced = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), timer)
            .is_some();

        if was_replaced {
            log::debug!("Local timer '{}' restarted with {}s", name, seconds);
        } else {
            log::debug!("Local timer '{}' created with {}s", name, seconds);
        }
        Ok(())
    }

    async fn check(&self, name: &str) -> Result<TimerStatus, GatewayError> {
        let timer = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .copied()
            .ok_or_else(|| GatewayError::NotExists(name.to_string()))?;

        let now = Instant::now();
        if now >= timer.deadline {
            return Err(GatewayError::Expired(name.to_string()));
        }

        Ok(TimerStatus {
            remaining: (timer.deadline - now).as_secs(),
            elapsed: (now - timer.started).as_secs(),
        })
    }
}
