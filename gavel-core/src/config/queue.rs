use std::time::Duration;

/// Delivery settings for the command queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// A message delivered this many times without an ack is dead-lettered.
    pub max_deliveries: u32,
    /// How long a received, unacknowledged message stays invisible to other
    /// consumers before it is redelivered.
    pub visibility_timeout: Duration,
    /// How long a single receive call waits for a message.
    pub receive_wait: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_deliveries: 5,
            visibility_timeout: Duration::from_secs(30),
            receive_wait: Duration::from_secs(1),
        }
    }
}
