use std::{sync::Arc, time::Duration};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

use crate::{
    broadcast::{Broadcaster, DomainEvent},
    device::{Color, ColorError, DeviceView},
    registry::{Override, Registry},
    source::DeviceSource,
};

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Invalid color sent: {0}")]
    InvalidColor(#[from] ColorError),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device source error: {0:?}")]
    Source(eyre::Report),
}

impl CommandError {
    /// Message safe to show to clients. Source failures are only described
    /// in the process log.
    pub fn client_message(&self) -> String {
        match self {
            CommandError::Source(_) => "The device did not accept the command".to_string(),
            e => e.to_string(),
        }
    }
}

/// Executes user commands against the device source and keeps the registry
/// and subscribers up to date.
///
/// Commands for the same device run one at a time in the device's registry
/// lane, in arrival order, so the events published for a device follow the
/// order its commands were applied in. The registry is only locked for the
/// state update itself, never while waiting on the device source.
pub struct CommandProcessor {
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    source: Arc<dyn DeviceSource>,
    scan_duration: Duration,
}

impl CommandProcessor {
    pub fn new(
        registry: Arc<Registry>,
        broadcaster: Arc<Broadcaster>,
        source: Arc<dyn DeviceSource>,
        scan_duration: Duration,
    ) -> Self {
        CommandProcessor {
            registry,
            broadcaster,
            source,
            scan_duration,
        }
    }

    async fn present_lane(&self, device_id: &str) -> Result<OwnedMutexGuard<()>, CommandError> {
        let not_found = || CommandError::DeviceNotFound(device_id.to_string());

        if !self.registry.is_present(device_id).await {
            return Err(not_found());
        }

        let lane = self.registry.lane(device_id).await;

        // The device may have gone away while we were queued
        if !self.registry.is_present(device_id).await {
            return Err(not_found());
        }

        Ok(lane)
    }

    /// Announced before the source is asked to scan, so subscribers never
    /// see a discovery from this scan ahead of `scanStarted`.
    pub async fn start_scanning(&self) {
        log::info!("Scanning for {:?}", self.scan_duration);

        self.broadcaster.publish(DomainEvent::ScanStarted).await;

        if let Err(e) = self.source.scan_for(self.scan_duration).await {
            log::error!("Failed to start scanning: {:?}", e);
        }
    }

    pub async fn enable_light(&self, device_id: &str) -> Result<(), CommandError> {
        self.set_power(device_id, true).await
    }

    pub async fn disable_light(&self, device_id: &str) -> Result<(), CommandError> {
        self.set_power(device_id, false).await
    }

    async fn set_power(&self, device_id: &str, on: bool) -> Result<(), CommandError> {
        let _lane = self.present_lane(device_id).await?;

        let result = if on {
            self.source.enable_light(device_id).await
        } else {
            self.source.disable_light(device_id).await
        };
        result.map_err(CommandError::Source)?;

        self.apply(device_id, Override::Enabled(on)).await?;

        let device_id = device_id.to_string();
        let event = if on {
            DomainEvent::LightEnabled { device_id }
        } else {
            DomainEvent::LightDisabled { device_id }
        };
        self.broadcaster.publish(event).await;

        Ok(())
    }

    /// Validates `color` fully before looking at the device.
    pub async fn set_color(&self, device_id: &str, color: &Value) -> Result<(), CommandError> {
        let color = Color::from_json(color)?;

        let _lane = self.present_lane(device_id).await?;

        self.source
            .set_color(device_id, color.into())
            .await
            .map_err(CommandError::Source)?;

        self.apply(device_id, Override::Color(color)).await?;

        self.broadcaster
            .publish(DomainEvent::ColorSet {
                device_id: device_id.to_string(),
                color,
            })
            .await;

        Ok(())
    }

    /// Renaming only touches the registry, so it also works for devices that
    /// are currently out of range. Devices never seen are rejected.
    pub async fn rename_device(&self, device_id: &str, new_name: &str) -> Result<(), CommandError> {
        if self.registry.get(device_id).await.is_none() {
            return Err(CommandError::DeviceNotFound(device_id.to_string()));
        }

        let _lane = self.registry.lane(device_id).await;

        let view = self
            .apply(device_id, Override::DisplayName(new_name.to_string()))
            .await?;

        self.broadcaster
            .publish(DomainEvent::DeviceRenamed {
                device_id: view.device_id,
                name: view.device_name,
            })
            .await;

        Ok(())
    }

    async fn apply(&self, device_id: &str, value: Override) -> Result<DeviceView, CommandError> {
        self.registry
            .set_override(device_id, value)
            .await
            .map_err(|_| CommandError::DeviceNotFound(device_id.to_string()))
    }

    pub async fn list_devices(&self) -> Vec<DeviceView> {
        self.registry.list().await
    }

    /// Merged view of a device that is currently present.
    pub async fn get_device(&self, device_id: &str) -> Option<DeviceView> {
        if !self.registry.is_present(device_id).await {
            return None;
        }

        self.registry.get(device_id).await
    }
}
