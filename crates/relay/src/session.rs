use crate::relay::{PendingReply, Relay};
use chatrelay_common::{Message, Result};
use chatrelay_store::Subscription;

/// In-process chat client: watches the message list and submits prompts
pub struct ChatSession {
    relay: Relay,
    subscription: Subscription,
}

impl ChatSession {
    pub fn new(relay: Relay) -> Self {
        let subscription = relay.store().subscribe();
        Self { relay, subscription }
    }

    /// Latest committed message list
    pub async fn snapshot(&mut self) -> Result<Vec<Message>> {
        self.subscription.current().await
    }

    /// Wait for the next committed change and return the new list
    pub async fn next_snapshot(&mut self) -> Result<Vec<Message>> {
        self.subscription.changed().await
    }

    /// Start a relay for `body`. The prompt and placeholder are committed by
    /// the time this returns; the reply lands later through `next_snapshot`.
    pub async fn submit(&self, body: &str) -> Result<PendingReply> {
        self.relay.dispatch(body).await
    }
}
