use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use color_eyre::Result;
use palette::Srgba;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{mpsc::UnboundedSender, RwLock},
    task,
};

use super::{DeviceSource, SourceDevice, SourceEvent, SourceEvents};
use crate::settings::MqttSettings;

/// Messages published by the Bluetooth gateway on the event topic.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
enum GatewayEvent {
    #[serde(rename_all = "camelCase")]
    Discover {
        unique_id: String,
        friendly_name: String,
    },

    #[serde(rename_all = "camelCase")]
    Disconnect { unique_id: String },

    ScanStop,

    Error { message: String },
}

/// Messages we publish on the command topic.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
enum GatewayCommand<'a> {
    #[serde(rename_all = "camelCase")]
    Scan { duration_ms: u64 },

    #[serde(rename_all = "camelCase")]
    EnableLight { unique_id: &'a str },

    #[serde(rename_all = "camelCase")]
    DisableLight { unique_id: &'a str },

    #[serde(rename_all = "camelCase")]
    SetColor {
        unique_id: &'a str,
        red: f32,
        green: f32,
        blue: f32,
        opacity: f32,
    },
}

type Detected = Arc<RwLock<Vec<SourceDevice>>>;

/// Device source backed by a Bluetooth-to-MQTT gateway.
pub struct MqttSource {
    client: AsyncClient,
    command_topic: String,
    detected: Detected,
}

pub fn mk_mqtt_source(settings: &MqttSettings) -> Result<(Arc<MqttSource>, SourceEvents)> {
    let mut options = MqttOptions::new(settings.id.clone(), settings.host.clone(), settings.port);
    options.set_keep_alive(Duration::from_secs(5));
    let (client, mut eventloop) = AsyncClient::new(options, 10);

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let detected: Detected = Default::default();

    {
        let client = client.clone();
        let event_topic = settings.event_topic.clone();
        let detected = detected.clone();

        task::spawn(async move {
            loop {
                while let Ok(notification) = eventloop.poll().await {
                    match notification {
                        rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                            // Subscriptions don't survive reconnects
                            if let Err(e) = client.try_subscribe(&event_topic, QoS::AtLeastOnce) {
                                log::error!("Failed to subscribe to {}: {:?}", event_topic, e);
                            }
                        }
                        rumqttc::Event::Incoming(rumqttc::Packet::Publish(msg)) => {
                            handle_gateway_payload(&msg.payload, &detected, &tx).await;
                        }
                        _ => {}
                    }
                }

                log::warn!("MQTT connection lost, reconnecting");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        });
    }

    let source = MqttSource {
        client,
        command_topic: settings.command_topic.clone(),
        detected,
    };

    Ok((Arc::new(source), rx))
}

async fn handle_gateway_payload(
    payload: &[u8],
    detected: &RwLock<Vec<SourceDevice>>,
    tx: &UnboundedSender<SourceEvent>,
) {
    let de = &mut serde_json::Deserializer::from_slice(payload);
    let event: GatewayEvent = match serde_path_to_error::deserialize(de) {
        Ok(event) => event,
        Err(e) => {
            log::warn!("Ignoring unparsable gateway message: {}", e);
            return;
        }
    };

    let event = {
        let mut detected = detected.write().await;
        track_presence(&mut detected, event)
    };

    if tx.send(event).is_err() {
        log::debug!("Gateway event dropped, nobody is listening");
    }
}

fn track_presence(detected: &mut Vec<SourceDevice>, event: GatewayEvent) -> SourceEvent {
    match event {
        GatewayEvent::Discover {
            unique_id,
            friendly_name,
        } => {
            let device = SourceDevice::new(unique_id, friendly_name);
            detected.retain(|d| d.unique_id != device.unique_id);
            detected.push(device.clone());
            SourceEvent::Discover(device)
        }
        GatewayEvent::Disconnect { unique_id } => {
            detected.retain(|d| d.unique_id != unique_id);
            SourceEvent::Disconnect { unique_id }
        }
        GatewayEvent::ScanStop => SourceEvent::ScanStop,
        GatewayEvent::Error { message } => SourceEvent::Error(message),
    }
}

impl MqttSource {
    async fn publish_command(&self, command: &GatewayCommand<'_>) -> Result<()> {
        let json = serde_json::to_string(command)?;

        self.client
            .publish(&self.command_topic, QoS::AtLeastOnce, false, json)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl DeviceSource for MqttSource {
    async fn scan_for(&self, duration: Duration) -> Result<()> {
        self.publish_command(&GatewayCommand::Scan {
            duration_ms: duration.as_millis() as u64,
        })
        .await
    }

    async fn enable_light(&self, unique_id: &str) -> Result<()> {
        self.publish_command(&GatewayCommand::EnableLight { unique_id })
            .await
    }

    async fn disable_light(&self, unique_id: &str) -> Result<()> {
        self.publish_command(&GatewayCommand::DisableLight { unique_id })
            .await
    }

    async fn set_color(&self, unique_id: &str, color: Srgba) -> Result<()> {
        let (red, green, blue, opacity) = color.into_components();

        self.publish_command(&GatewayCommand::SetColor {
            unique_id,
            red,
            green,
            blue,
            opacity,
        })
        .await
    }

    async fn detected_devices(&self) -> Vec<SourceDevice> {
        self.detected.read().await.clone()
    }
}
