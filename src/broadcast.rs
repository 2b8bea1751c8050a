use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::BroadcastConfig;
use crate::error::{GatewayError, SubscribeError};
use crate::gateway::TimerGateway;
use crate::registry::{Handle, Registry, SubscriberId};
use crate::subscription::Subscription;

/// One broadcast notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ping {
    pub timer_name: String,
    pub seconds_left: u64,
}

/// Why a polling loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Expired,
    GatewayFailure,
    Shutdown,
}

/// Shares remote countdown timers between many subscribers.
///
/// Each active timer name has exactly one polling loop that asks the
/// gateway for the remaining time every poll cadence and fans the result
/// out to every attached [`Subscription`]. The loop closes all of its
/// subscribers and exits when the gateway reports expiry or fails.
#[derive(Clone)]
pub struct TimerBroadcast {
    shared: Arc<Shared>,
}

struct Shared {
    config: BroadcastConfig,
    gateway: Arc<dyn TimerGateway>,
    registry: Arc<Registry>,

    /// Serializes gateway check-then-create so a timer is created once.
    startup: tokio::sync::Mutex<()>,

    /// Poll cadence of each running loop: timer_name -> cadence.
    /// Joining, starting and retiring a loop all happen under this lock.
    loops: Mutex<HashMap<String, Duration>>,

    /// Cancellation token for graceful shutdown
    shutdown: CancellationToken,
}

impl TimerBroadcast {
    /// Create a broadcast core over `gateway`.
    ///
    /// # Arguments
    /// * `config` - Instance name and per-subscriber buffer size
    /// * `gateway` - Where timers are created and checked
    /// * `shutdown` - Cancelling it ends every running loop
    pub fn new(
        config: BroadcastConfig,
        gateway: Arc<dyn TimerGateway>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                gateway,
                registry: Arc::new(Registry::new()),
                startup: tokio::sync::Mutex::new(()),
                loops: Mutex::new(HashMap::new()),
                shutdown,
            }),
        }
    }

    /// Watch `timer_name`, receiving its remaining seconds every `cadence_secs`.
    ///
    /// Joins the running loop if there is one, ignoring `duration_secs`.
    /// Otherwise checks the gateway, creates the timer when it is missing or
    /// expired, and starts a loop polling at `cadence_secs`.
    pub async fn subscribe(
        &self,
        timer_name: &str,
        duration_secs: u64,
        cadence_secs: u64,
    ) -> Result<Subscription, SubscribeError> {
        self.open(timer_name, duration_secs, cadence_secs).await
    }

    /// Like [`subscribe`](Self::subscribe), but the subscription ends and
    /// detaches itself once `session` is cancelled. Other subscribers of the
    /// same timer are unaffected.
    pub async fn subscribe_until(
        &self,
        timer_name: &str,
        duration_secs: u64,
        cadence_secs: u64,
        session: CancellationToken,
    ) -> Result<Subscription, SubscribeError> {
        let subscription = self.open(timer_name, duration_secs, cadence_secs).await?;
        Ok(subscription.cancel_on(session))
    }

    /// Detach one subscriber. Safe to call for unknown or already closed ones.
    pub fn unsubscribe(&self, timer_name: &str, id: SubscriberId) {
        self.shared.registry.detach_one(timer_name, id);
    }

    /// True while a polling loop owns `timer_name`.
    pub fn is_active(&self, timer_name: &str) -> bool {
        self.shared.registry.contains(timer_name)
    }

    /// Names of all timers with a running loop, sorted.
    pub fn active_timers(&self) -> Vec<String> {
        self.shared.registry.timer_names()
    }

    /// Number of subscribers attached to `timer_name`.
    pub fn subscriber_count(&self, timer_name: &str) -> usize {
        self.shared.registry.subscriber_count(timer_name)
    }

    async fn open(
        &self,
        timer_name: &str,
        duration_secs: u64,
        cadence_secs: u64,
    ) -> Result<Subscription, SubscribeError> {
        if cadence_secs == 0 {
            return Err(SubscribeError::InvalidCadence);
        }
        let cadence = Duration::from_secs(cadence_secs);
        let shared = &self.shared;
        let _startup = shared.startup.lock().await;

        if shared.shutdown.is_cancelled() {
            return Err(SubscribeError::ShutDown);
        }

        if let Some(subscription) = shared.join_running(timer_name, cadence) {
            log::debug!(
                "Timer '{}' already running in '{}', joining (requested {}s ignored)",
                timer_name,
                shared.config.name,
                duration_secs
            );
            return Ok(subscription);
        }

        match shared.gateway.check(timer_name).await {
            Ok(status) => {
                log::info!(
                    "Timer '{}' already exists with {}s left, not recreating",
                    timer_name,
                    status.remaining
                );
            }
            Err(err) if err.is_absent() => {
                log::info!(
                    "Timer '{}' not running ({}), creating it with {}s",
                    timer_name,
                    err,
                    duration_secs
                );
                shared
                    .gateway
                    .create(timer_name, duration_secs)
                    .await
                    .map_err(|source| SubscribeError::Create {
                        name: timer_name.to_string(),
                        source,
                    })?;
            }
            Err(source) => {
                return Err(SubscribeError::Check {
                    name: timer_name.to_string(),
                    source,
                });
            }
        }

        let subscription = shared.start(timer_name, cadence);
        tokio::spawn(Arc::clone(shared).run_loop(timer_name.to_string(), cadence));

        Ok(subscription)
    }
}

impl Shared {
    fn loops(&self) -> MutexGuard<'_, HashMap<String, Duration>> {
        self.loops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach to the loop running for `timer_name`, if any.
    ///
    /// Holds the `loops` lock across the attach, so it cannot interleave
    /// with [`retire`](Self::retire) of the same loop.
    fn join_running(&self, timer_name: &str, cadence: Duration) -> Option<Subscription> {
        let loops = self.loops();
        let poll_cadence = loops.get(timer_name).copied()?;
        Some(self.attach(timer_name, cadence, poll_cadence))
    }

    /// Register a new loop for `timer_name` with its first subscriber.
    fn start(&self, timer_name: &str, cadence: Duration) -> Subscription {
        let mut loops = self.loops();
        loops.insert(timer_name.to_string(), cadence);
        self.attach(timer_name, cadence, cadence)
    }

    /// Forget the loop for `timer_name` and close all of its subscribers.
    fn retire(&self, timer_name: &str) -> usize {
        let mut loops = self.loops();
        loops.remove(timer_name);
        self.registry.detach_all(timer_name)
    }

    fn attach(&self, timer_name: &str, cadence: Duration, poll_cadence: Duration) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer);
        let id = self.registry.next_id();
        self.registry.attach(timer_name, Handle { id, tx });
        Subscription::new(
            timer_name.to_string(),
            id,
            cadence,
            poll_cadence,
            rx,
            Arc::clone(&self.registry),
        )
    }

    /// Poll the gateway every `cadence` until the timer expires, the gateway
    /// fails, or the broadcast shuts down. Always closes every subscriber.
    async fn run_loop(self: Arc<Self>, timer_name: String, cadence: Duration) {
        let mut ticker = interval_at(Instant::now() + cadence, cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        log::info!(
            "Timer loop '{}' started in '{}' (every {:?})",
            timer_name,
            self.config.name,
            cadence
        );

        let exit = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.gateway.check(&timer_name).await {
                        Ok(status) => self.fan_out(&timer_name, status.remaining),
                        Err(GatewayError::Expired(_)) => break LoopExit::Expired,
                        Err(err) => {
                            log::warn!(
                                "Error checking timer '{}' in '{}': {}",
                                timer_name,
                                self.config.name,
                                err
                            );
                            break LoopExit::GatewayFailure;
                        }
                    }
                },

                _ = self.shutdown.cancelled() => break LoopExit::Shutdown,
            }
        };

        // Retire right away: a subscribe queued on `startup` must find the
        // name absent and start a fresh timer.
        let closed = self.retire(&timer_name);

        log::info!(
            "Timer loop '{}' stopped in '{}' ({:?}), closed {} subscriber(s)",
            timer_name,
            self.config.name,
            exit,
            closed
        );
    }

    fn fan_out(&self, timer_name: &str, seconds_left: u64) {
        let handles = self.registry.snapshot(timer_name);
        log::debug!(
            "Streaming {}s left of '{}' to {} subscriber(s)",
            seconds_left,
            timer_name,
            handles.len()
        );

        for handle in handles {
            let ping = Ping {
                timer_name: timer_name.to_string(),
                seconds_left,
            };

            // Use try_send so one slow subscriber cannot stall the others
            if let Err(e) = handle.tx.try_send(ping) {
                match e {
                    TrySendError::Full(_) => {
                        log::warn!(
                            "Subscriber {} of '{}' is full, dropping ping",
                            handle.id,
                            timer_name
                        );
                    }
                    TrySendError::Closed(_) => {
                        log::debug!("Subscriber {} of '{}' already gone", handle.id, timer_name);
                    }
                }
            }
        }
    }
}
