use chatrelay_common::{Error, Message, Result};
use futures::Stream;
use tokio::sync::watch;

use crate::operations::list_messages;
use crate::store::MessageStore;

/// Reactive handle on the list query.
///
/// Every committed write bumps the store version. `changed()` waits for the
/// next bump past the last one this handle has seen and re-runs the query, so
/// a burst of commits collapses into a single fresh snapshot.
pub struct Subscription {
    store: MessageStore,
    rx: watch::Receiver<u64>,
}

impl Subscription {
    pub(crate) fn new(store: MessageStore, rx: watch::Receiver<u64>) -> Self {
        Self { store, rx }
    }

    /// Latest committed snapshot. Marks the current version as seen.
    pub async fn current(&mut self) -> Result<Vec<Message>> {
        self.rx.borrow_and_update();
        list_messages(&self.store).await
    }

    /// Wait for the next committed change and return the fresh snapshot
    pub async fn changed(&mut self) -> Result<Vec<Message>> {
        self.rx
            .changed()
            .await
            .map_err(|_| Error::Internal("Message store closed".into()))?;
        self.current().await
    }

    /// Whether a commit landed since the last snapshot taken through this handle
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Stream of snapshots: the current one first, then one per change
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Vec<Message>>> + Send {
        async_stream::stream! {
            yield self.current().await;
            loop {
                match self.changed().await {
                    Ok(messages) => yield Ok(messages),
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        }
    }
}
