use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::broadcast::Ping;
use crate::registry::{Registry, SubscriberId};

/// Caller side of one timer subscription.
///
/// Yields [`Ping`]s until the timer's loop ends, the subscription is
/// unsubscribed, or its cancellation token fires. Dropping it unsubscribes.
///
/// When the subscriber asked for a slower cadence than the shared poll, it
/// paces itself: every `cadence` it yields the freshest ping received since
/// its previous yield, and skips a tick that brought nothing new. A ping still
/// held when the stream closes is yielded before the end.
pub struct Subscription {
    timer_name: String,
    id: SubscriberId,
    cadence: Duration,
    rx: mpsc::Receiver<Ping>,
    pacer: Option<Interval>,
    latest: Option<Ping>,
    cancel: Option<BoxFuture<'static, ()>>,
    registry: Arc<Registry>,
    finished: bool,
}

impl Subscription {
    pub(crate) fn new(
        timer_name: String,
        id: SubscriberId,
        cadence: Duration,
        poll_cadence: Duration,
        rx: mpsc::Receiver<Ping>,
        registry: Arc<Registry>,
    ) -> Self {
        let pacer = (cadence > poll_cadence).then(|| {
            // First delivery one full cadence after joining, no catch-up value.
            let mut pacer = interval_at(Instant::now() + cadence, cadence);
            pacer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            pacer
        });

        Self {
            timer_name,
            id,
            cadence,
            rx,
            pacer,
            latest: None,
            cancel: None,
            registry,
            finished: false,
        }
    }

    /// End this subscription once `token` is cancelled.
    pub(crate) fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(async move { token.cancelled().await }.boxed());
        self
    }

    /// Identity to pass to [`TimerBroadcast::unsubscribe`](crate::TimerBroadcast::unsubscribe).
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Name of the watched timer.
    pub fn timer_name(&self) -> &str {
        &self.timer_name
    }

    /// Delivery cadence requested by this subscriber.
    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Receive the next ping, or `None` once the stream has ended.
    pub async fn recv(&mut self) -> Option<Ping> {
        self.next().await
    }

    fn finish(&mut self) {
        self.finished = true;
        self.latest = None;
        self.rx.close();
        self.registry.detach_one(&self.timer_name, self.id);
    }
}

impl Stream for Subscription {
    type Item = Ping;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Ping>> {
        let this = &mut *self;
        if this.finished {
            return Poll::Ready(None);
        }

        if let Some(cancel) = this.cancel.as_mut() {
            if cancel.as_mut().poll(cx).is_ready() {
                log::debug!(
                    "Subscriber {} of '{}' cancelled by its session",
                    this.id,
                    this.timer_name
                );
                this.cancel = None;
                this.finish();
                return Poll::Ready(None);
            }
        }

        loop {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(ping)) => {
                    if this.pacer.is_none() {
                        return Poll::Ready(Some(ping));
                    }
                    this.latest = Some(ping);
                }
                Poll::Ready(None) => {
                    this.finished = true;
                    return Poll::Ready(this.latest.take());
                }
                Poll::Pending => break,
            }
        }

        if let Some(pacer) = this.pacer.as_mut() {
            while pacer.poll_tick(cx).is_ready() {
                if let Some(ping) = this.latest.take() {
                    return Poll::Ready(Some(ping));
                }
            }
        }

        Poll::Pending
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.detach_one(&self.timer_name, self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("timer_name", &self.timer_name)
            .field("id", &self.id)
            .field("cadence", &self.cadence)
            .field("paced", &self.pacer.is_some())
            .field("finished", &self.finished)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Handle;
    use tokio_test::{assert_pending, assert_ready_eq};

    fn ping(seconds_left: u64) -> Ping {
        Ping {
            timer_name: "t1".to_string(),
            seconds_left,
        }
    }

    fn attached(
        registry: &Arc<Registry>,
        cadence: u64,
        poll_cadence: u64,
    ) -> (mpsc::Sender<Ping>, Subscription) {
        let (tx, rx) = mpsc::channel(8);
        let id = registry.next_id();
        registry.attach(
            "t1",
            Handle {
                id,
                tx: tx.clone(),
            },
        );
        let sub = Subscription::new(
            "t1".to_string(),
            id,
            Duration::from_secs(cadence),
            Duration::from_secs(poll_cadence),
            rx,
            Arc::clone(registry),
        );
        (tx, sub)
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpaced_passes_every_ping_through() {
        let registry = Arc::new(Registry::new());
        let (tx, mut sub) = attached(&registry, 1, 1);

        tx.send(ping(9)).await.unwrap();
        tx.send(ping(8)).await.unwrap();
        assert_eq!(sub.recv().await, Some(ping(9)));
        assert_eq!(sub.recv().await, Some(ping(8)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_yields_freshest_on_own_tick() {
        let registry = Arc::new(Registry::new());
        let (tx, sub) = attached(&registry, 3, 1);
        let mut sub = tokio_test::task::spawn(sub);

        tx.send(ping(9)).await.unwrap();
        tx.send(ping(8)).await.unwrap();
        assert_pending!(sub.poll_next());

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_ready_eq!(sub.poll_next(), Some(ping(8)));

        // Nothing new arrived, so the next tick is skipped.
        tokio::time::advance(Duration::from_secs(3)).await;
        assert_pending!(sub.poll_next());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_ends_when_core_closes_handle() {
        let registry = Arc::new(Registry::new());
        let (tx, mut sub) = attached(&registry, 1, 1);
        drop(tx);

        registry.detach_all("t1");
        assert_eq!(sub.recv().await, None);
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_paced_flushes_held_ping_on_close() {
        let registry = Arc::new(Registry::new());
        let (tx, mut sub) = attached(&registry, 5, 1);

        tx.send(ping(2)).await.unwrap();
        tx.send(ping(1)).await.unwrap();
        drop(tx);
        {
            let mut next = tokio_test::task::spawn(sub.recv());
            assert_pending!(next.poll());
        }

        registry.detach_all("t1");
        assert_eq!(sub.recv().await, Some(ping(1)));
        assert_eq!(sub.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_detaches_only_this_subscriber() {
        let registry = Arc::new(Registry::new());
        let token = CancellationToken::new();
        let (_tx_a, sub_a) = attached(&registry, 1, 1);
        let (_tx_b, mut sub_b) = attached(&registry, 1, 1);
        let mut sub_a = sub_a.cancel_on(token.clone());

        token.cancel();
        assert_eq!(sub_a.recv().await, None);
        assert_eq!(registry.subscriber_count("t1"), 1);

        drop(sub_a);
        let mut next = tokio_test::task::spawn(sub_b.recv());
        assert_pending!(next.poll());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_unsubscribes() {
        let registry = Arc::new(Registry::new());
        let (_tx_a, sub_a) = attached(&registry, 1, 1);
        let (_tx_b, _sub_b) = attached(&registry, 1, 1);

        drop(sub_a);
        assert_eq!(registry.subscriber_count("t1"), 1);
        assert!(registry.contains("t1"));
    }
}
