use std::{collections::HashMap, sync::Arc};

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::device::{Color, DeviceView};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown device: {0}")]
    UnknownDevice(String),
}

/// A user-assignable property of a device.
#[derive(Clone, Debug, PartialEq)]
pub enum Override {
    DisplayName(String),
    Enabled(bool),
    Color(Color),
}

#[derive(Clone, Debug)]
struct DeviceRecord {
    discovered_name: String,
    display_name: Option<String>,
    enabled: bool,
    color: Color,
    present: bool,
}

impl DeviceRecord {
    fn new(discovered_name: &str) -> Self {
        DeviceRecord {
            discovered_name: discovered_name.to_string(),
            display_name: None,
            enabled: true,
            color: Color::default(),
            present: true,
        }
    }

    fn view(&self, id: &str) -> DeviceView {
        DeviceView {
            device_id: id.to_string(),
            device_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| self.discovered_name.clone()),
            enabled: self.enabled,
            color: self.color,
        }
    }
}

#[derive(Default)]
struct RegistryState {
    records: HashMap<String, DeviceRecord>,

    /// Device ids in the order they were first discovered
    discovery_order: Vec<String>,
}

/// Owns the merged state of every device seen during the lifetime of the
/// process. Records are never removed: a device that disconnects keeps its
/// overrides so they apply again when it is rediscovered.
#[derive(Default)]
pub struct Registry {
    state: RwLock<RegistryState>,

    /// One lane per device id, see [`Registry::lane`]
    lanes: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for this device's turn. Whoever changes a device's state and
    /// publishes the matching event holds its lane for both steps, so the
    /// events of one device go out in the order its state changed.
    pub async fn lane(&self, id: &str) -> OwnedMutexGuard<()> {
        let lane = {
            let mut lanes = self.lanes.lock().await;
            lanes.entry(id.to_string()).or_default().clone()
        };

        lane.lock_owned().await
    }

    /// Marks a device as present, creating its record with default state on
    /// first discovery.
    pub async fn upsert_discovered(&self, id: &str, discovered_name: &str) -> DeviceView {
        let mut state = self.state.write().await;
        let RegistryState {
            records,
            discovery_order,
        } = &mut *state;

        let record = records.entry(id.to_string()).or_insert_with(|| {
            discovery_order.push(id.to_string());
            DeviceRecord::new(discovered_name)
        });

        // A new discovery session may report a different name, an already
        // present device keeps the one it was discovered with.
        if !record.present {
            record.present = true;
            record.discovered_name = discovered_name.to_string();
        }

        record.view(id)
    }

    /// Clears the presence flag. Returns false if the device was unknown or
    /// already absent.
    pub async fn mark_absent(&self, id: &str) -> bool {
        let mut state = self.state.write().await;

        match state.records.get_mut(id) {
            Some(record) if record.present => {
                record.present = false;
                true
            }
            _ => false,
        }
    }

    pub async fn set_override(&self, id: &str, value: Override) -> Result<DeviceView, RegistryError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(id)
            .ok_or_else(|| RegistryError::UnknownDevice(id.to_string()))?;

        match value {
            // An empty name falls back to the discovered one
            Override::DisplayName(name) => {
                record.display_name = Some(name).filter(|name| !name.is_empty())
            }
            Override::Enabled(enabled) => record.enabled = enabled,
            Override::Color(color) => record.color = color,
        }

        Ok(record.view(id))
    }

    /// Merged view of any known device, present or not.
    pub async fn get(&self, id: &str) -> Option<DeviceView> {
        let state = self.state.read().await;
        state.records.get(id).map(|record| record.view(id))
    }

    pub async fn is_present(&self, id: &str) -> bool {
        let state = self.state.read().await;
        state.records.get(id).is_some_and(|record| record.present)
    }

    /// Present devices, first discovered first.
    pub async fn list(&self) -> Vec<DeviceView> {
        let state = self.state.read().await;

        state
            .discovery_order
            .iter()
            .filter_map(|id| {
                let record = state.records.get(id)?;
                record.present.then(|| record.view(id))
            })
            .collect()
    }
}
