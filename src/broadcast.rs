use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{
    mpsc::{self, UnboundedReceiver, UnboundedSender},
    RwLock,
};

use crate::device::{Color, DeviceView};

/// A completed state change, as pushed to every live client.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DomainEvent {
    DeviceDiscovered(DeviceView),

    #[serde(rename_all = "camelCase")]
    DeviceLost { device_id: String },

    ScanStarted,
    ScanStopped,

    #[serde(rename_all = "camelCase")]
    LightEnabled { device_id: String },

    #[serde(rename_all = "camelCase")]
    LightDisabled { device_id: String },

    #[serde(rename_all = "camelCase")]
    ColorSet { device_id: String, color: Color },

    #[serde(rename_all = "camelCase")]
    DeviceRenamed { device_id: String, name: String },
}

impl DomainEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            DomainEvent::DeviceDiscovered(_) => "deviceDiscovered",
            DomainEvent::DeviceLost { .. } => "deviceLost",
            DomainEvent::ScanStarted => "scanStarted",
            DomainEvent::ScanStopped => "scanStopped",
            DomainEvent::LightEnabled { .. } => "lightEnabled",
            DomainEvent::LightDisabled { .. } => "lightDisabled",
            DomainEvent::ColorSet { .. } => "colorSet",
            DomainEvent::DeviceRenamed { .. } => "deviceRenamed",
        }
    }

    /// The event's fields without the `type` tag.
    pub fn payload(&self) -> serde_json::Result<Value> {
        let mut value = serde_json::to_value(self)?;

        if let Some(object) = value.as_object_mut() {
            object.remove("type");
        }

        Ok(value)
    }
}

pub type SubscriptionId = u64;

/// Receiving end of a broadcaster registration.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    rx: UnboundedReceiver<DomainEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event. Returns None once the subscription has
    /// been removed from the broadcaster.
    pub async fn recv(&mut self) -> Option<DomainEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<DomainEvent> {
        self.rx.try_recv().ok()
    }
}

/// Fans out domain events to every registered subscriber.
///
/// Each subscriber gets its own unbounded channel, so a slow consumer never
/// holds up publishing. Subscribers whose receiving end is gone are dropped
/// on the next publish.
#[derive(Default)]
pub struct Broadcaster {
    subscribers: RwLock<HashMap<SubscriptionId, UnboundedSender<DomainEvent>>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribers.write().await.insert(id, tx);
        log::debug!("Subscriber {} joined", id);

        Subscription { id, rx }
    }

    /// Returns false if no subscriber with the given id was registered.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.write().await.remove(&id).is_some();

        if removed {
            log::debug!("Subscriber {} left", id);
        }

        removed
    }

    pub async fn publish(&self, event: DomainEvent) {
        // The write lock is held for the whole fan-out so concurrent
        // publishes reach every subscriber in the same order.
        let mut subscribers = self.subscribers.write().await;

        subscribers.retain(|id, tx| match tx.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                log::debug!("Dropping disconnected subscriber {}", id);
                false
            }
        });
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}
