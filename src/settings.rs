use std::net::SocketAddr;

use config::{builder::DefaultState, ConfigBuilder, ConfigError};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug)]
pub struct HttpSettings {
    pub addr: SocketAddr,
}

#[derive(Clone, Deserialize, Debug)]
pub struct ScanSettings {
    pub duration_ms: u64,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Simulated,
    Mqtt,
}

#[derive(Clone, Deserialize, Debug)]
pub struct SimulatedDeviceSettings {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Deserialize, Debug)]
pub struct SourceSettings {
    pub kind: SourceKind,

    #[serde(default)]
    pub devices: Vec<SimulatedDeviceSettings>,

    #[serde(default)]
    pub max_latency_ms: u64,
}

#[derive(Clone, Deserialize, Debug)]
pub struct MqttSettings {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub event_topic: String,
    pub command_topic: String,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Settings {
    pub http: HttpSettings,
    pub scan: ScanSettings,
    pub source: SourceSettings,
    pub mqtt: Option<MqttSettings>,
}

fn with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    config::Config::builder()
        .set_default("http.addr", "0.0.0.0:8000")?
        .set_default("scan.duration_ms", 5000)?
        .set_default("source.kind", "simulated")
}

/// Reads settings from an optional `Settings` file (`Settings.toml`,
/// `Settings.json`, ...), overridden by `BLUELIGHT__SECTION__KEY`
/// environment variables.
pub fn read_settings() -> Result<Settings, ConfigError> {
    with_defaults()?
        .add_source(config::File::with_name("Settings").required(false))
        .add_source(
            config::Environment::with_prefix("BLUELIGHT")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize::<Settings>()
}
