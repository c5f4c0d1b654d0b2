//! Background lease eviction
//!
//! The monitor scans the store on a fixed interval and evicts every record
//! whose lease lapsed. The interval must be strictly shorter than the
//! smallest ttl in use; the defaults in [`CoreConfig`](crate::CoreConfig)
//! keep that ratio. Evictions are logged and published as
//! [`RegistryEvent::Expired`]; no component depends on being told.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::store::RegistryStore;
use super::RegistryEvent;

/// Periodic sweep task over a [`RegistryStore`]
pub struct HeartbeatMonitor {
    task: JoinHandle<()>,
}

impl HeartbeatMonitor {
    /// Start sweeping `store` every `interval`.
    pub fn spawn(
        store: Arc<RegistryStore>,
        interval: Duration,
        events: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for record in store.sweep(Utc::now()) {
                    tracing::info!(
                        service_id = %record.service_id,
                        service_type = %record.service_type,
                        endpoint = %record.endpoint(),
                        "lease expired, registration evicted"
                    );
                    let _ = events.send(RegistryEvent::Expired(record));
                }
            }
        });
        Self { task }
    }

    /// Stop sweeping.
    pub fn shutdown(self) {
        self.task.abort();
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}
