use md3_core::protocol::{Event, Outbound};
use md3_core::store::{AttributeChange, ChangeListener};
use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
};
use tokio::sync::mpsc;
use tracing::debug;

/// Broadcasts every attribute change to the outbound queue of each live connection.
#[derive(Default)]
pub struct EventFanout {
    subscribers: Mutex<BTreeMap<u64, mpsc::UnboundedSender<Outbound>>>,
}

impl EventFanout {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, BTreeMap<u64, mpsc::UnboundedSender<Outbound>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, conn_id: u64, sender: mpsc::UnboundedSender<Outbound>) {
        self.subscribers().insert(conn_id, sender);
        debug!(event = "md3_subscriber_added", conn_id);
    }

    pub fn unregister(&self, conn_id: u64) -> bool {
        let removed = self.subscribers().remove(&conn_id).is_some();
        if removed {
            debug!(event = "md3_subscriber_removed", conn_id);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.subscribers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers().is_empty()
    }

    /// Queues the event for every connection. Only a connection whose writer has gone away is
    /// removed; a live one is never skipped.
    pub fn broadcast(&self, event: Event) {
        let mut subscribers = self.subscribers();
        subscribers.retain(|conn_id, sender| {
            let delivered = sender.send(Outbound::Event(event.clone())).is_ok();
            if !delivered {
                debug!(event = "md3_subscriber_gone", conn_id = *conn_id, attribute = %event.name);
            }
            delivered
        });
    }
}

impl ChangeListener for EventFanout {
    fn attribute_changed(&self, change: &AttributeChange<'_>) {
        self.broadcast(Event {
            name: change.name.to_string(),
            value: change.value.clone(),
            timestamp: change.timestamp,
            type_tag: change.tag,
        });
    }
}
