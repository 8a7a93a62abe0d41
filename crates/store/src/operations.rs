//! The three operations that touch the message collection. They are the only
//! writers: callers never insert or patch through the store directly.

use chatrelay_common::{
    validate_body, Author, Error, Message, MessageId, MessagePatch, NewMessage, Result,
};
use tracing::debug;

use crate::store::{Filter, MessageStore, Order, Query};

/// Messages forwarded to the provider: ten prior exchanges plus the new prompt
pub const CONTEXT_WINDOW: usize = 21;

/// Result of [`send_message`]
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// Body-present messages in creation order, ending with the new prompt
    pub context: Vec<Message>,
    /// Assistant placeholder waiting for the reply
    pub placeholder: MessageId,
}

/// All messages in creation order
pub async fn list_messages(store: &MessageStore) -> Result<Vec<Message>> {
    store.query(&Query::all()).await
}

/// Insert the user message and an empty assistant placeholder, then read the
/// context window, all in one transaction.
pub async fn send_message(store: &MessageStore, body: &str) -> Result<SendOutcome> {
    validate_body(body)?;

    store
        .transact(|tx| {
            let prompt = tx.insert(NewMessage::user(body))?;
            let placeholder = tx.insert(NewMessage::placeholder())?;

            let mut context = tx.query(
                &Query::all()
                    .filter(Filter::BodyPresent)
                    .order(Order::Desc)
                    .limit(CONTEXT_WINDOW),
            );
            context.reverse();

            debug!(
                prompt = %prompt,
                placeholder = %placeholder,
                context_len = context.len(),
                "Inserted prompt and placeholder"
            );
            Ok(SendOutcome { context, placeholder })
        })
        .await
}

/// Patch one existing message. User messages are immutable once written.
pub async fn update_message(store: &MessageStore, id: &MessageId, patch: MessagePatch) -> Result<()> {
    store
        .transact(|tx| {
            let target = tx
                .get(id)
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            if target.author == Author::User {
                return Err(Error::ValidationFailed(format!(
                    "User message {} cannot be modified",
                    id
                )));
            }
            if patch.is_empty() {
                return Ok(());
            }
            tx.patch(id, &patch)
        })
        .await
}
