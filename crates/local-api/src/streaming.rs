use axum::response::sse::{Event, KeepAlive, Sse};
use chatrelay_common::Message;
use chatrelay_store::MessageStore;
use futures::stream::Stream;
use futures::StreamExt;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tracing::{debug, error};

const BUFFER_SIZE: usize = 8; // Snapshots buffered per subscriber

/// SSE feed of the message list: the current snapshot, then one `messages`
/// event per committed change.
pub fn subscription_response(store: &MessageStore) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Bounded channel so a slow client cannot pile up snapshots
    let (tx, mut rx) = mpsc::channel::<Result<Event, Infallible>>(BUFFER_SIZE);
    let snapshots = store.subscribe().into_stream();

    tokio::spawn(async move {
        produce_snapshot_events(snapshots, tx).await;
    });

    let response_stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            yield event;
        }
    };

    Sse::new(response_stream).keep_alive(KeepAlive::default())
}

fn snapshot_event(messages: &[Message]) -> Option<Event> {
    match Event::default().event("messages").json_data(messages) {
        Ok(event) => Some(event),
        Err(e) => {
            error!("Failed to serialize message snapshot: {}", e);
            None
        }
    }
}

async fn produce_snapshot_events(
    snapshots: impl Stream<Item = chatrelay_common::Result<Vec<Message>>> + Send,
    tx: mpsc::Sender<Result<Event, Infallible>>,
) {
    let mut snapshots = Box::pin(snapshots);

    loop {
        let next = tokio::select! {
            next = snapshots.next() => next,
            _ = tx.closed() => {
                debug!("Subscriber disconnected");
                return;
            }
        };

        let event = match next {
            Some(Ok(messages)) => snapshot_event(&messages),
            Some(Err(e)) => {
                let error_data = json!({
                    "error": {
                        "message": e.to_string(),
                        "type": e.error_type(),
                    }
                });
                let _ = tx.send(Ok(Event::default().event("error").data(error_data.to_string()))).await;
                return;
            }
            None => return,
        };

        if let Some(event) = event {
            if tx.send(Ok(event)).await.is_err() {
                return;
            }
        }
    }
}
