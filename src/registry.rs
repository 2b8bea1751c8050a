use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::broadcast::Ping;

/// Identity of one subscription, unique within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Subscribers = HashMap<SubscriberId, mpsc::Sender<Ping>>;

/// Core-side delivery end of a subscription. Dropping the last copy closes
/// the subscriber's stream.
#[derive(Debug, Clone)]
pub struct Handle {
    pub id: SubscriberId,
    pub tx: mpsc::Sender<Ping>,
}

/// Lock-guarded map of timer name -> attached subscriber handles.
///
/// A name is present exactly while a polling loop owns it. Closing a handle
/// means dropping its sender, so the caller sees end-of-stream after it has
/// drained whatever was already buffered.
#[derive(Debug, Default)]
pub struct Registry {
    timers: Mutex<HashMap<String, Subscribers>>,
    next_id: AtomicU64,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh subscriber identity.
    pub fn next_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn timers(&self) -> MutexGuard<'_, HashMap<String, Subscribers>> {
        // Every operation leaves the map consistent, so a poisoned lock is still usable.
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `handle` under `timer_name`, creating the set if absent.
    pub fn attach(&self, timer_name: &str, handle: Handle) {
        let mut timers = self.timers();
        let set = timers.entry(timer_name.to_string()).or_default();
        set.insert(handle.id, handle.tx);
        log::debug!(
            "Subscriber {} attached to '{}' ({} total)",
            handle.id,
            timer_name,
            set.len()
        );
    }

    /// Remove and close one handle. Unknown names or ids are ignored.
    pub fn detach_one(&self, timer_name: &str, id: SubscriberId) {
        let removed = self
            .timers()
            .get_mut(timer_name)
            .and_then(|set| set.remove(&id));

        // Sender is dropped after the lock is released.
        if removed.is_some() {
            log::debug!("Subscriber {} detached from '{}'", id, timer_name);
        }
    }

    /// Close every handle for `timer_name` and forget the name.
    ///
    /// Returns how many subscribers were closed.
    pub fn detach_all(&self, timer_name: &str) -> usize {
        let removed = self.timers().remove(timer_name);
        let count = removed.as_ref().map_or(0, HashMap::len);
        drop(removed);
        if count > 0 {
            log::debug!("Closed {} subscriber(s) of '{}'", count, timer_name);
        }
        count
    }

    /// Stable copy of the handles currently attached to `timer_name`.
    pub fn snapshot(&self, timer_name: &str) -> Vec<Handle> {
        self.timers()
            .get(timer_name)
            .map(|set| {
                set.iter()
                    .map(|(id, tx)| Handle {
                        id: *id,
                        tx: tx.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// True while `timer_name` has a set, empty or not.
    pub fn contains(&self, timer_name: &str) -> bool {
        self.timers().contains_key(timer_name)
    }

    /// Number of handles attached to `timer_name`.
    pub fn subscriber_count(&self, timer_name: &str) -> usize {
        self.timers().get(timer_name).map_or(0, HashMap::len)
    }

    /// All registered timer names, sorted.
    pub fn timer_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.timers().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::error::TryRecvError;

    fn handle(registry: &Registry) -> (Handle, mpsc::Receiver<Ping>) {
        let (tx, rx) = mpsc::channel(4);
        (
            Handle {
                id: registry.next_id(),
                tx,
            },
            rx,
        )
    }

    #[test]
    fn test_ids_are_distinct() {
        let registry = Registry::new();
        let a = registry.next_id();
        let b = registry.next_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_attach_creates_set() {
        let registry = Registry::new();
        let (h, _rx) = handle(&registry);

        assert!(!registry.contains("t1"));
        registry.attach("t1", h);
        assert!(registry.contains("t1"));
        assert_eq!(registry.subscriber_count("t1"), 1);
        assert_eq!(registry.timer_names(), vec!["t1".to_string()]);
    }

    #[test]
    fn test_detach_one_closes_only_that_handle() {
        let registry = Registry::new();
        let (a, mut rx_a) = handle(&registry);
        let (b, mut rx_b) = handle(&registry);
        let a_id = a.id;
        registry.attach("t1", a);
        registry.attach("t1", b);

        registry.detach_one("t1", a_id);

        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(rx_b.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(registry.subscriber_count("t1"), 1);
    }

    #[test]
    fn test_detach_unknown_is_noop() {
        let registry = Registry::new();
        let (a, mut rx_a) = handle(&registry);
        let a_id = a.id;
        registry.attach("t1", a);

        let stranger = registry.next_id();
        registry.detach_one("t1", stranger);
        registry.detach_one("nope", a_id);
        registry.detach_one("t1", a_id);
        registry.detach_one("t1", a_id);

        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Disconnected));
        // An emptied set still marks the timer as owned by its loop.
        assert!(registry.contains("t1"));
    }

    #[test]
    fn test_detach_all_closes_everything_and_forgets_name() {
        let registry = Registry::new();
        let (a, mut rx_a) = handle(&registry);
        let (b, mut rx_b) = handle(&registry);
        registry.attach("t1", a);
        registry.attach("t1", b);

        assert_eq!(registry.detach_all("t1"), 2);

        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Disconnected));
        assert_eq!(rx_b.try_recv(), Err(TryRecvError::Disconnected));
        assert!(!registry.contains("t1"));
        assert_eq!(registry.detach_all("t1"), 0);
    }

    #[test]
    fn test_attach_after_detach_all_starts_fresh_set() {
        let registry = Registry::new();
        let (old, _old_rx) = handle(&registry);
        registry.attach("t1", old);
        registry.detach_all("t1");

        let (new, _new_rx) = handle(&registry);
        let new_id = new.id;
        registry.attach("t1", new);

        let ids: Vec<SubscriberId> = registry.snapshot("t1").iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![new_id]);
    }

    #[test]
    fn test_snapshot_of_unknown_timer_is_empty() {
        let registry = Registry::new();
        assert!(registry.snapshot("t1").is_empty());
        assert_eq!(registry.subscriber_count("t1"), 0);
    }

    #[test]
    fn test_snapshot_delivers_after_concurrent_detach() {
        let registry = Registry::new();
        let (a, mut rx_a) = handle(&registry);
        let a_id = a.id;
        registry.attach("t1", a);

        let snapshot = registry.snapshot("t1");
        registry.detach_one("t1", a_id);

        // The snapshot still holds a live sender; sending must not fail loudly.
        for h in &snapshot {
            let _ = h.tx.try_send(Ping {
                timer_name: "t1".to_string(),
                seconds_left: 3,
            });
        }
        drop(snapshot);

        assert_eq!(rx_a.try_recv().map(|p| p.seconds_left), Ok(3));
        assert_eq!(rx_a.try_recv(), Err(TryRecvError::Disconnected));
    }
}
