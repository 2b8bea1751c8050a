/// Runtime settings for a [`TimerBroadcast`](crate::TimerBroadcast).
#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    /// Instance name for logging
    pub name: String,

    /// Capacity of each subscriber's ping buffer. When a subscriber falls
    /// this far behind, further pings for it are dropped until it catches up.
    pub subscriber_buffer: usize,
}

impl BroadcastConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_subscriber_buffer(mut self, size: usize) -> Self {
        // mpsc::channel panics on zero capacity
        self.subscriber_buffer = size.max(1);
        self
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            name: "timer_broadcast".to_string(),
            subscriber_buffer: 16,
        }
    }
}
