mod openai;
mod relay;
mod session;


pub use openai::OpenAiProvider;
pub use relay::{PendingReply, Relay, RelaySettings};
pub use session::ChatSession;

use async_trait::async_trait;
use chatrelay_common::{Completion, CompletionRequest, Result};

/// External chat-completion API
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Send one request and wait for the full reply
    async fn complete(&self, api_key: &str, request: &CompletionRequest) -> Result<Completion>;
}
