mod operations;
mod store;
mod subscription;


pub use operations::{list_messages, send_message, update_message, SendOutcome, CONTEXT_WINDOW};
pub use store::{Filter, MessageStore, Order, Query, Transaction};
pub use subscription::Subscription;
