use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use color_eyre::Result;
use eyre::eyre;
use palette::Srgba;
use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

use crate::{
    broadcast::{Broadcaster, DomainEvent},
    registry::Registry,
    settings::{Settings, SourceKind},
};

use self::{
    mqtt::mk_mqtt_source,
    simulated::{SimulatedOptionsBuilder, SimulatedSource},
};

pub mod mqtt;
pub mod simulated;

/// A physical light as reported by the radio layer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDevice {
    pub unique_id: String,
    pub friendly_name: String,
}

impl SourceDevice {
    pub fn new(unique_id: impl Into<String>, friendly_name: impl Into<String>) -> Self {
        SourceDevice {
            unique_id: unique_id.into(),
            friendly_name: friendly_name.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SourceEvent {
    Discover(SourceDevice),
    Disconnect { unique_id: String },
    ScanStop,
    Error(String),
}

pub type SourceEvents = UnboundedReceiver<SourceEvent>;

/// Discovery and control of lights. Implementations deliver their events on
/// the channel handed out by their constructor.
///
/// Command calls may take a while to complete and must only return Ok once
/// the device has accepted the command.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    /// Starts a discovery window. Returns as soon as the scan is requested,
    /// a [`SourceEvent::ScanStop`] follows when the window elapses.
    async fn scan_for(&self, duration: Duration) -> Result<()>;

    async fn enable_light(&self, unique_id: &str) -> Result<()>;

    async fn disable_light(&self, unique_id: &str) -> Result<()>;

    async fn set_color(&self, unique_id: &str, color: Srgba) -> Result<()>;

    /// Devices currently discovered or connected.
    async fn detected_devices(&self) -> Vec<SourceDevice>;
}

pub async fn mk_device_source(
    settings: &Settings,
) -> Result<(Arc<dyn DeviceSource>, SourceEvents)> {
    match settings.source.kind {
        SourceKind::Simulated => {
            let devices = settings
                .source
                .devices
                .iter()
                .map(|device| SourceDevice::new(&device.id, &device.name))
                .collect::<Vec<_>>();

            let options = SimulatedOptionsBuilder::default()
                .devices(devices)
                .max_latency(Duration::from_millis(settings.source.max_latency_ms))
                .build()?;

            let (source, events) = SimulatedSource::new(options);
            Ok((source as Arc<dyn DeviceSource>, events))
        }
        SourceKind::Mqtt => {
            let mqtt_settings = settings.mqtt.as_ref().ok_or_else(|| {
                eyre!("source.kind is \"mqtt\" but the [mqtt] settings section is missing")
            })?;

            let (source, events) = mk_mqtt_source(mqtt_settings)?;
            Ok((source as Arc<dyn DeviceSource>, events))
        }
    }
}

/// Marks devices that the source detected before we started listening to
/// its events as present.
pub async fn seed_registry(source: &dyn DeviceSource, registry: &Registry) {
    for device in source.detected_devices().await {
        registry
            .upsert_discovered(&device.unique_id, &device.friendly_name)
            .await;
    }
}

pub async fn handle_source_event(event: SourceEvent, registry: &Registry, broadcaster: &Broadcaster) {
    match event {
        SourceEvent::Discover(device) => {
            log::info!("Discovered {} ({})", device.friendly_name, device.unique_id);

            let _lane = registry.lane(&device.unique_id).await;
            let view = registry
                .upsert_discovered(&device.unique_id, &device.friendly_name)
                .await;
            broadcaster.publish(DomainEvent::DeviceDiscovered(view)).await;
        }
        SourceEvent::Disconnect { unique_id } => {
            if !registry.is_present(&unique_id).await {
                return;
            }

            let _lane = registry.lane(&unique_id).await;
            if registry.mark_absent(&unique_id).await {
                log::info!("Lost {}", unique_id);
                broadcaster
                    .publish(DomainEvent::DeviceLost {
                        device_id: unique_id,
                    })
                    .await;
            }
        }
        SourceEvent::ScanStop => {
            broadcaster.publish(DomainEvent::ScanStopped).await;
        }
        SourceEvent::Error(e) => {
            log::error!("Device source error: {}", e);
        }
    }
}

pub fn start_source_events_loop(
    mut events: SourceEvents,
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            handle_source_event(event, &registry, &broadcaster).await;
        }

        log::warn!("Device source event channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::Color, registry::Override};

    #[tokio::test]
    async fn discovery_publishes_merged_view() {
        let registry = Registry::new();
        let broadcaster = Broadcaster::new();
        let mut subscription = broadcaster.subscribe().await;

        handle_source_event(
            SourceEvent::Discover(SourceDevice::new("d1", "Lamp")),
            &registry,
            &broadcaster,
        )
        .await;

        let Some(DomainEvent::DeviceDiscovered(view)) = subscription.try_recv() else {
            panic!("expected a deviceDiscovered event");
        };
        assert_eq!(view.device_name, "Lamp");
        assert!(view.enabled);
        assert_eq!(view.color, Color::WHITE);
        assert!(registry.is_present("d1").await);
    }

    #[tokio::test]
    async fn disconnect_of_unknown_device_is_silent() {
        let registry = Registry::new();
        let broadcaster = Broadcaster::new();
        let mut subscription = broadcaster.subscribe().await;

        let disconnect = || SourceEvent::Disconnect {
            unique_id: "d1".to_string(),
        };

        handle_source_event(disconnect(), &registry, &broadcaster).await;
        assert_eq!(subscription.try_recv(), None);

        registry.upsert_discovered("d1", "Lamp").await;
        handle_source_event(disconnect(), &registry, &broadcaster).await;
        handle_source_event(disconnect(), &registry, &broadcaster).await;

        assert_eq!(
            subscription.try_recv(),
            Some(DomainEvent::DeviceLost {
                device_id: "d1".to_string()
            })
        );
        assert_eq!(subscription.try_recv(), None);
    }

    #[tokio::test]
    async fn scan_stop_and_errors() {
        let registry = Registry::new();
        let broadcaster = Broadcaster::new();
        let mut subscription = broadcaster.subscribe().await;

        handle_source_event(SourceEvent::Error("radio off".to_string()), &registry, &broadcaster).await;
        handle_source_event(SourceEvent::ScanStop, &registry, &broadcaster).await;

        assert_eq!(subscription.try_recv(), Some(DomainEvent::ScanStopped));
        assert_eq!(subscription.try_recv(), None);
    }

    #[tokio::test]
    async fn seeds_registry_from_detected_devices() {
        let (source, _events) = SimulatedSource::new(Default::default());
        source.discover(SourceDevice::new("d1", "Lamp")).await;
        let registry = Registry::new();

        seed_registry(source.as_ref(), &registry).await;

        assert!(registry.is_present("d1").await);
    }

    #[tokio::test]
    async fn discovery_waits_for_the_device_lane() {
        let registry = Arc::new(Registry::new());
        let broadcaster = Arc::new(Broadcaster::new());
        registry.upsert_discovered("d1", "Lamp").await;
        let mut subscription = broadcaster.subscribe().await;

        let lane = registry.lane("d1").await;
        let bridge = tokio::spawn({
            let registry = registry.clone();
            let broadcaster = broadcaster.clone();
            async move {
                let event = SourceEvent::Discover(SourceDevice::new("d1", "Lamp"));
                handle_source_event(event, &registry, &broadcaster).await;
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(subscription.try_recv(), None);

        // A command that got the lane first finishes its transition
        let red = Color::new(1.0, 0.0, 0.0, 1.0);
        registry
            .set_override("d1", Override::Color(red))
            .await
            .unwrap();
        broadcaster
            .publish(DomainEvent::ColorSet {
                device_id: "d1".to_string(),
                color: red,
            })
            .await;
        drop(lane);
        bridge.await.unwrap();

        assert!(matches!(
            subscription.try_recv(),
            Some(DomainEvent::ColorSet { .. })
        ));
        let Some(DomainEvent::DeviceDiscovered(view)) = subscription.try_recv() else {
            panic!("expected a deviceDiscovered event");
        };
        assert_eq!(view.color, red);
    }

    #[tokio::test]
    async fn events_loop_keeps_running_after_source_errors() {
        let (source, events) = SimulatedSource::new(Default::default());
        let registry = Arc::new(Registry::new());
        let broadcaster = Arc::new(Broadcaster::new());
        let mut subscription = broadcaster.subscribe().await;
        let bridge = start_source_events_loop(events, registry.clone(), broadcaster.clone());

        source.fail("radio off");
        source.discover(SourceDevice::new("d1", "Lamp")).await;

        let event = tokio::time::timeout(Duration::from_secs(1), subscription.recv())
            .await
            .unwrap();
        assert!(matches!(event, Some(DomainEvent::DeviceDiscovered(_))));
        assert!(registry.is_present("d1").await);
        assert!(!bridge.is_finished());

        bridge.abort();
    }
}
