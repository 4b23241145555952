//! Versioned, watchable configuration cell.
//!
//! Consumers clone the current value at the start of each work item; the
//! scheduler subscribes to re-arm its timers when the value is replaced.

use std::sync::Arc;
use tokio::sync::{RwLock, watch};

/// Yields once per replacement of a [`ConfigStore`] value. The carried
/// number is the store's version.
pub type ConfigChanges = watch::Receiver<u64>;

/// Shared configuration value. Clones share the same cell.
pub struct ConfigStore<T> {
    value: Arc<RwLock<T>>,
    changes: Arc<watch::Sender<u64>>,
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(initial)),
            changes: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Swap in `value`, bump the version and wake every subscriber.
    pub async fn update(&self, value: T) {
        *self.value.write().await = value;
        self.changes.send_modify(|version| *version += 1);
    }

    /// Number of updates applied so far.
    pub fn version(&self) -> u64 {
        *self.changes.borrow()
    }

    pub fn subscribe(&self) -> ConfigChanges {
        self.changes.subscribe()
    }
}

impl<T: Clone> ConfigStore<T> {
    pub async fn snapshot(&self) -> T {
        self.value.read().await.clone()
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            changes: Arc::clone(&self.changes),
        }
    }
}
