use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use color_eyre::Result;
use derive_builder::Builder;
use eyre::eyre;
use palette::Srgba;
use rand::Rng;
use tokio::sync::{mpsc::UnboundedSender, RwLock};

use super::{DeviceSource, SourceDevice, SourceEvent, SourceEvents};

#[derive(Builder, Clone, Debug, Default)]
#[builder(setter(into), default)]
pub struct SimulatedOptions {
    /// Devices that a scan will find
    pub devices: Vec<SourceDevice>,

    /// Commands take a random time between zero and this to complete
    pub max_latency: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightState {
    pub on: bool,
    pub color: Srgba,
}

impl Default for LightState {
    fn default() -> Self {
        LightState {
            on: true,
            color: Srgba::new(1.0, 1.0, 1.0, 1.0),
        }
    }
}

/// In-process stand-in for a Bluetooth radio.
pub struct SimulatedSource {
    options: SimulatedOptions,
    tx: UnboundedSender<SourceEvent>,
    detected: Arc<RwLock<Vec<SourceDevice>>>,
    lights: RwLock<HashMap<String, LightState>>,
    unreachable: RwLock<HashSet<String>>,
}

impl SimulatedSource {
    pub fn new(options: SimulatedOptions) -> (Arc<Self>, SourceEvents) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        let source = SimulatedSource {
            options,
            tx,
            detected: Default::default(),
            lights: Default::default(),
            unreachable: Default::default(),
        };

        (Arc::new(source), rx)
    }

    /// Makes a device show up as if a scan had found it.
    pub async fn discover(&self, device: SourceDevice) {
        discover(&self.detected, &self.tx, device).await;
    }

    /// Simulates a device going out of range. Returns false if it was not
    /// detected.
    pub async fn disconnect(&self, unique_id: &str) -> bool {
        let removed = {
            let mut detected = self.detected.write().await;
            let len = detected.len();
            detected.retain(|device| device.unique_id != unique_id);
            detected.len() != len
        };

        if removed {
            self.emit(SourceEvent::Disconnect {
                unique_id: unique_id.to_string(),
            });
        }

        removed
    }

    /// Unreachable devices stay detected but fail every command.
    pub async fn set_unreachable(&self, unique_id: &str, unreachable: bool) {
        let mut devices = self.unreachable.write().await;

        if unreachable {
            devices.insert(unique_id.to_string());
        } else {
            devices.remove(unique_id);
        }
    }

    /// State last applied to a device, if it ever received a command.
    pub async fn light_state(&self, unique_id: &str) -> Option<LightState> {
        self.lights.read().await.get(unique_id).copied()
    }

    /// Injects a radio error.
    pub fn fail(&self, message: &str) {
        self.emit(SourceEvent::Error(message.to_string()));
    }

    fn emit(&self, event: SourceEvent) {
        if self.tx.send(event).is_err() {
            log::debug!("Simulated source event dropped, nobody is listening");
        }
    }

    async fn simulate_latency(&self) {
        let max_ms = self.options.max_latency.as_millis() as u64;

        if max_ms > 0 {
            let delay_ms = {
                let mut rng = rand::thread_rng();
                rng.gen_range(0..=max_ms)
            };
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
    }

    async fn apply(&self, unique_id: &str, f: impl FnOnce(&mut LightState)) -> Result<()> {
        self.simulate_latency().await;

        let detected = self
            .detected
            .read()
            .await
            .iter()
            .any(|device| device.unique_id == unique_id);

        if !detected {
            return Err(eyre!("Device {} is not connected", unique_id));
        }

        if self.unreachable.read().await.contains(unique_id) {
            return Err(eyre!("Device {} did not respond", unique_id));
        }

        let mut lights = self.lights.write().await;
        f(lights.entry(unique_id.to_string()).or_default());

        Ok(())
    }
}

async fn discover(
    detected: &RwLock<Vec<SourceDevice>>,
    tx: &UnboundedSender<SourceEvent>,
    device: SourceDevice,
) {
    {
        let mut detected = detected.write().await;

        if detected.iter().any(|d| d.unique_id == device.unique_id) {
            return;
        }

        detected.push(device.clone());
    }

    if tx.send(SourceEvent::Discover(device)).is_err() {
        log::debug!("Simulated source event dropped, nobody is listening");
    }
}

#[async_trait]
impl DeviceSource for SimulatedSource {
    async fn scan_for(&self, duration: Duration) -> Result<()> {
        let catalog = self.options.devices.clone();
        let detected = self.detected.clone();
        let tx = self.tx.clone();

        tokio::spawn(async move {
            for device in catalog {
                discover(&detected, &tx, device).await;
            }

            tokio::time::sleep(duration).await;

            if tx.send(SourceEvent::ScanStop).is_err() {
                log::debug!("Simulated source event dropped, nobody is listening");
            }
        });

        Ok(())
    }

    async fn enable_light(&self, unique_id: &str) -> Result<()> {
        self.apply(unique_id, |light| light.on = true).await
    }

    async fn disable_light(&self, unique_id: &str) -> Result<()> {
        self.apply(unique_id, |light| light.on = false).await
    }

    async fn set_color(&self, unique_id: &str, color: Srgba) -> Result<()> {
        self.apply(unique_id, |light| light.color = color).await
    }

    async fn detected_devices(&self) -> Vec<SourceDevice> {
        self.detected.read().await.clone()
    }
}
