use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::{stream, Stream};

use crate::broadcast::DomainEvent;

use super::http::AppState;

/// Streams every broadcast event as an `event: <type>` / `data: <json>`
/// frame. The subscription lives as long as the response body; once the
/// client goes away the broadcaster drops it on the next publish.
pub async fn handle_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe().await;
    log::debug!("Event stream opened for subscriber {}", subscription.id());

    let events = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.recv().await?;
        Some((Ok::<_, Infallible>(to_sse_event(&event)), subscription))
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &DomainEvent) -> Event {
    let data = match event.payload() {
        Ok(payload) => payload.to_string(),
        Err(e) => {
            log::error!("Failed to serialize {} event: {}", event.event_type(), e);
            "{}".to_string()
        }
    };

    Event::default().event(event.event_type()).data(data)
}
