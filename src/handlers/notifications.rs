use std::convert::Infallible;

use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{services::notifier::Notification, state::AppState};

/// Streams user notifications as server-sent events.
pub async fn stream_notifications(State(state): State<AppState>) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));

    let events = notifications_to_sse(state.notifier.subscribe());
    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn notifications_to_sse(
    rx: broadcast::Receiver<Notification>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(notification) => {
                let data = sonic_rs::to_string(&notification).ok()?;
                Some(Ok(Event::default().event("notification").data(data)))
            }
            // Lagged subscribers skip what they missed.
            Err(_) => None,
        }
    })
}
