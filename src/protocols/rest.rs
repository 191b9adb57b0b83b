use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::commands::CommandError;

use super::http::AppState;

pub enum ApiError {
    Command(CommandError),
    BadRequest(String),
}

impl From<CommandError> for ApiError {
    fn from(e: CommandError) -> Self {
        ApiError::Command(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Command(e) => {
                let status = match &e {
                    CommandError::InvalidColor(_) => StatusCode::BAD_REQUEST,
                    CommandError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
                    CommandError::Source(report) => {
                        log::error!("{:?}", report);
                        StatusCode::BAD_GATEWAY
                    }
                };

                (status, e.client_message())
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn parse_body(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Request body is not valid JSON: {}", e)))
}

pub async fn start_scanning(State(state): State<AppState>) -> StatusCode {
    state.commands.start_scanning().await;
    StatusCode::OK
}

pub async fn list_devices(State(state): State<AppState>) -> Json<Value> {
    let devices = state.commands.list_devices().await;
    Json(json!({ "devices": devices }))
}

pub async fn get_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let device = state
        .commands
        .get_device(&id)
        .await
        .ok_or_else(|| CommandError::DeviceNotFound(id.clone()))?;

    Ok(Json(json!({ "device": device })))
}

pub async fn enable_light(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.commands.enable_light(&id).await?;
    Ok(StatusCode::OK)
}

pub async fn disable_light(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.commands.disable_light(&id).await?;
    Ok(StatusCode::OK)
}

/// Expects `{"color": {...}}`. A missing color is reported by color
/// validation like any other malformed color.
pub async fn set_color(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let body = parse_body(&body)?;
    let color = body.get("color").unwrap_or(&Value::Null);

    state.commands.set_color(&id, color).await?;
    Ok(StatusCode::OK)
}

pub async fn rename_device(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let body = parse_body(&body)?;
    let name = body
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("Request body needs a string \"name\"".to_string()))?;

    state.commands.rename_device(&id, name).await?;
    Ok(StatusCode::OK)
}
