use std::{net::TcpListener, sync::Arc, time::Duration};

use bluelight_hub::{
    broadcast::Broadcaster,
    commands::CommandProcessor,
    protocols::http::{serve, AppState},
    registry::Registry,
    settings::read_settings,
    source::{mk_device_source, seed_registry, start_source_events_loop},
};
use color_eyre::Result;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let settings = read_settings()?;
    let (source, source_events) = mk_device_source(&settings).await?;

    let registry = Arc::new(Registry::new());
    let broadcaster = Arc::new(Broadcaster::new());

    seed_registry(source.as_ref(), &registry).await;
    start_source_events_loop(source_events, registry.clone(), broadcaster.clone());

    let commands = Arc::new(CommandProcessor::new(
        registry,
        broadcaster.clone(),
        source,
        Duration::from_millis(settings.scan.duration_ms),
    ));

    let listener = TcpListener::bind(settings.http.addr)?;
    let state = AppState {
        commands,
        broadcaster,
    };

    tokio::select! {
        result = serve(listener, state) => result?,
        result = tokio::signal::ctrl_c() => result?,
    }

    Ok(())
}
