use std::{net::TcpListener, sync::Arc};

use axum::{
    routing::{get, post},
    Router,
};
use color_eyre::Result;

use crate::{broadcast::Broadcaster, commands::CommandProcessor};

use super::{rest, sse, ws};

/// Shared state of every HTTP handler.
#[derive(Clone)]
pub struct AppState {
    pub commands: Arc<CommandProcessor>,
    pub broadcaster: Arc<Broadcaster>,
}

pub fn mk_router(state: AppState) -> Router {
    Router::new()
        .route("/api/ws", get(ws::handle_websocket))
        .route("/api/events", get(sse::handle_events))
        .route("/api/scan", post(rest::start_scanning))
        .route("/api/devices", get(rest::list_devices))
        .route("/api/devices/:id", get(rest::get_device))
        .route("/api/devices/:id/enable", post(rest::enable_light))
        .route("/api/devices/:id/disable", post(rest::disable_light))
        .route("/api/devices/:id/color", post(rest::set_color))
        .route("/api/devices/:id/rename", post(rest::rename_device))
        .with_state(state)
}

/// Serves the API on `listener`. Only returns on server errors.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let router = mk_router(state);

    log::info!("Listening on http://{}", listener.local_addr()?);

    hyper::Server::from_tcp(listener)?
        .serve(router.into_make_service())
        .await?;

    Ok(())
}
