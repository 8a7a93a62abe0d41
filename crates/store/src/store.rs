use chatrelay_common::{
    now_millis, Author, Error, Message, MessageId, MessagePatch, NewMessage, Result,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

use crate::subscription::Subscription;

/// Sort direction over insertion order
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Order {
    #[default]
    Asc,
    Desc,
}

/// Row filter for a [`Query`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    BodyPresent,
    BodyAbsent,
    Author(Author),
}

impl Filter {
    fn matches(&self, message: &Message) -> bool {
        match self {
            Filter::BodyPresent => message.body.is_some(),
            Filter::BodyAbsent => message.body.is_none(),
            Filter::Author(author) => message.author == *author,
        }
    }
}

/// Read query over the message collection
#[derive(Debug, Clone, Default)]
pub struct Query {
    order: Order,
    filter: Option<Filter>,
    limit: Option<usize>,
}

impl Query {
    /// Every message, oldest first
    pub fn all() -> Self {
        Self::default()
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn run(&self, messages: &[Message]) -> Vec<Message> {
        let limit = self.limit.unwrap_or(usize::MAX);
        let matching = |m: &&Message| self.filter.map_or(true, |f| f.matches(m));

        match self.order {
            Order::Asc => messages.iter().filter(matching).take(limit).cloned().collect(),
            Order::Desc => messages.iter().rev().filter(matching).take(limit).cloned().collect(),
        }
    }
}

/// Committed state. `messages` is kept in `seq` order.
#[derive(Debug, Default)]
struct Documents {
    messages: Vec<Message>,
    index: HashMap<MessageId, usize>,
    next_seq: u64,
}

enum Undo {
    Insert,
    Patch(usize, Message),
}

/// Exclusive view of the store for the duration of one [`MessageStore::transact`] call.
///
/// Reads see the transaction's own writes. Nothing is visible to other
/// readers until the closure returns `Ok`.
pub struct Transaction<'a> {
    docs: &'a mut Documents,
    undo: Vec<Undo>,
}

impl<'a> Transaction<'a> {
    /// Insert a new record and return its freshly assigned id
    pub fn insert(&mut self, record: NewMessage) -> Result<MessageId> {
        record.validate()?;

        let id = MessageId::new();
        let seq = self.docs.next_seq;
        self.docs.next_seq += 1;

        let message = Message {
            id: id.clone(),
            author: record.author,
            body: record.body,
            usage: None,
            updated_at: None,
            processing_ms: None,
            created_at: now_millis(),
            seq,
        };

        self.docs.index.insert(id.clone(), self.docs.messages.len());
        self.docs.messages.push(message);
        self.undo.push(Undo::Insert);
        Ok(id)
    }

    /// Apply `patch` onto an existing record. Never creates one.
    pub fn patch(&mut self, id: &MessageId, patch: &MessagePatch) -> Result<()> {
        let position = *self
            .docs
            .index
            .get(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let message = &mut self.docs.messages[position];
        self.undo.push(Undo::Patch(position, message.clone()));
        patch.apply(message);
        Ok(())
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.docs.index.get(id).map(|&i| &self.docs.messages[i])
    }

    pub fn query(&self, query: &Query) -> Vec<Message> {
        query.run(&self.docs.messages)
    }

    /// Keep the writes made so far. Returns whether there were any.
    fn commit(&mut self) -> bool {
        let wrote = !self.undo.is_empty();
        self.undo.clear();
        wrote
    }

    fn rollback(&mut self) {
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Insert => {
                    if let Some(message) = self.docs.messages.pop() {
                        self.docs.index.remove(&message.id);
                    }
                }
                Undo::Patch(position, previous) => {
                    self.docs.messages[position] = previous;
                }
            }
        }
    }
}

// Uncommitted writes are undone however the transaction ends, including a panic in the closure
impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.rollback();
    }
}

/// In-memory transactional message collection with change notification
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<RwLock<Documents>>,
    changes: Arc<watch::Sender<u64>>,
}

impl MessageStore {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(RwLock::new(Documents::default())),
            changes: Arc::new(changes),
        }
    }

    /// Run `f` atomically. On `Err` or a panic every write made by `f` is
    /// undone and subscribers hear nothing; on `Ok` they are notified once.
    pub async fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let mut docs = self.inner.write().await;
        let mut tx = Transaction {
            docs: &mut *docs,
            undo: Vec::new(),
        };

        match f(&mut tx) {
            Ok(value) => {
                let wrote = tx.commit();
                drop(tx);
                drop(docs);
                if wrote {
                    self.changes.send_modify(|version| *version += 1);
                    debug!(version = *self.changes.borrow(), "Committed transaction");
                }
                Ok(value)
            }
            Err(e) => {
                drop(tx);
                debug!("Rolled back transaction: {}", e);
                Err(e)
            }
        }
    }

    /// Run a read query against the latest committed state
    pub async fn query(&self, query: &Query) -> Result<Vec<Message>> {
        Ok(query.run(&self.inner.read().await.messages))
    }

    pub async fn get(&self, id: &MessageId) -> Option<Message> {
        let docs = self.inner.read().await;
        docs.index.get(id).map(|&i| docs.messages[i].clone())
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.messages.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of committed write transactions so far
    pub fn version(&self) -> u64 {
        *self.changes.borrow()
    }

    /// Register for change notifications on the message collection
    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.clone(), self.changes.subscribe())
    }
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}
