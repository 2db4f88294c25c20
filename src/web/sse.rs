use crate::state::AppState;
use crate::types::events::StreamEvent;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const TERMINAL_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistent SSE connection of one browser session
pub async fn stream_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::info!("📡 SSE connection established for session: {}", session_id);

    let receiver = state.sessions.write().await.take_receiver(&session_id);

    let stream = ReceiverStream::new(receiver).map(|event| {
        Ok(Event::default()
            .event(event.event_type())
            .data(event.to_sse_data()))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keep-alive"),
    )
}

/// Queue an event for the session's SSE connection.
///
/// Intermediate snapshots are cumulative, so one that does not fit is dropped;
/// terminal events wait for room. Returns false once nobody is listening.
pub async fn publish(sender: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> bool {
    if event.is_terminal() {
        match tokio::time::timeout(TERMINAL_SEND_TIMEOUT, sender.send(event)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::warn!("SSE client is not draining events, dropping final event");
                true
            }
        }
    } else {
        match sender.try_send(event) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_intermediate_events_are_dropped_when_full() {
        let (sender, mut receiver) = mpsc::channel(1);
        assert!(publish(&sender, StreamEvent::chat("a".into(), false)).await);
        assert!(publish(&sender, StreamEvent::chat("b".into(), false)).await);

        let first = receiver.recv().await.unwrap();
        assert!(matches!(first, StreamEvent::Chat { ref html, .. } if html == "a"));

        assert!(publish(&sender, StreamEvent::chat("c".into(), true)).await);
        let last = receiver.recv().await.unwrap();
        assert!(last.is_terminal());
    }

    #[tokio::test]
    async fn test_closed_channel_reports_gone() {
        let (sender, receiver) = mpsc::channel(1);
        drop(receiver);
        assert!(!publish(&sender, StreamEvent::error("x")).await);
        assert!(!publish(&sender, StreamEvent::chat("x".into(), false)).await);
    }
}
