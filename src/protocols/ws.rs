use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{commands::CommandProcessor, device::DeviceView};

use super::http::AppState;

const MESSAGE_TYPES: [&str; 6] = [
    "startScanning",
    "enableLight",
    "disableLight",
    "setColor",
    "getDevices",
    "renameDevice",
];

/// Requests accepted on the command channel.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    StartScanning,

    #[serde(rename_all = "camelCase")]
    EnableLight { device_id: String },

    #[serde(rename_all = "camelCase")]
    DisableLight { device_id: String },

    /// The color stays untyped here, its validation has its own error
    /// reporting.
    #[serde(rename_all = "camelCase")]
    SetColor {
        device_id: String,
        #[serde(default)]
        color: Value,
    },

    GetDevices,

    #[serde(rename_all = "camelCase")]
    RenameDevice { device_id: String, new_name: String },
}

/// Replies sent only to the connection that made the request.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    Error { message: String },
    ListOfDevices { devices: Vec<DeviceView> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedMessage {
    #[error("Received message is not valid JSON")]
    InvalidJson,

    #[error("Received message is not an object")]
    NotAnObject,

    #[error("Received message contains an unknown type")]
    UnknownType,

    #[error("Invalid {kind} message: {reason}")]
    InvalidFields { kind: String, reason: String },
}

pub fn parse_client_message(text: &str) -> Result<ClientMessage, MalformedMessage> {
    let value: Value = serde_json::from_str(text).map_err(|_| MalformedMessage::InvalidJson)?;

    let kind = match value.as_object() {
        None => return Err(MalformedMessage::NotAnObject),
        Some(object) => match object.get("type").and_then(Value::as_str) {
            Some(kind) if MESSAGE_TYPES.contains(&kind) => kind.to_string(),
            _ => return Err(MalformedMessage::UnknownType),
        },
    };

    serde_path_to_error::deserialize(value).map_err(|e| MalformedMessage::InvalidFields {
        kind,
        reason: e.to_string(),
    })
}

/// Runs one request. Results of state changes reach the client through its
/// broadcaster subscription, so only errors and device lists are returned.
pub async fn execute(commands: &CommandProcessor, message: ClientMessage) -> Option<ServerMessage> {
    let result = match message {
        ClientMessage::StartScanning => {
            commands.start_scanning().await;
            Ok(())
        }
        ClientMessage::EnableLight { device_id } => commands.enable_light(&device_id).await,
        ClientMessage::DisableLight { device_id } => commands.disable_light(&device_id).await,
        ClientMessage::SetColor { device_id, color } => {
            commands.set_color(&device_id, &color).await
        }
        ClientMessage::GetDevices => {
            let devices = commands.list_devices().await;
            return Some(ServerMessage::ListOfDevices { devices });
        }
        ClientMessage::RenameDevice {
            device_id,
            new_name,
        } => commands.rename_device(&device_id, &new_name).await,
    };

    result.err().map(|e| {
        log::debug!("Command failed: {}", e);
        ServerMessage::Error {
            message: e.client_message(),
        }
    })
}

pub async fn handle_text(commands: &CommandProcessor, text: &str) -> Option<ServerMessage> {
    match parse_client_message(text) {
        Ok(message) => execute(commands, message).await,
        Err(e) => {
            log::debug!("Rejected client message: {}", e);
            Some(ServerMessage::Error {
                message: e.to_string(),
            })
        }
    }
}

pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ServerMessage>();

    let mut subscription = state.broadcaster.subscribe().await;
    let subscription_id = subscription.id();

    // Direct replies and broadcast events share the socket
    let mut send_task = tokio::spawn(async move {
        loop {
            // Events queued before a reply was produced go out first
            let json = tokio::select! {
                biased;
                Some(event) = subscription.recv() => serde_json::to_string(&event),
                Some(reply) = rx.recv() => serde_json::to_string(&reply),
                else => break,
            };

            let text = match json {
                Ok(text) => text,
                Err(e) => {
                    log::error!("Failed to serialize websocket message: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let commands = state.commands.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    if let Some(reply) = handle_text(&commands, &text).await {
                        if tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    };

    state.broadcaster.unsubscribe(subscription_id).await;
}
