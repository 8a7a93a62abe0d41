use crate::CompletionProvider;
use chatrelay_common::{
    now_millis, ChatMessage, CompletionRequest, Error, Message, MessageId, MessagePatch,
    ObservableMetrics, RequestId, Result, Role,
};
use chatrelay_config::ProviderConfig;
use chatrelay_store::{send_message, update_message, MessageStore};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// What the relay needs to talk to the provider
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
}

impl RelaySettings {
    /// Build settings from config, reading the API key from the environment
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            api_key: config.resolve_api_key(),
            model: config.model.clone(),
            system_prompt: config.system_prompt.clone(),
        }
    }
}

/// Ticket for a committed placeholder whose reply is still in flight.
///
/// The provider call and the patch run on their own task, so dropping this
/// does not cancel them.
pub struct PendingReply {
    pub placeholder: MessageId,
    pub request_id: RequestId,
    task: JoinHandle<Result<()>>,
}

impl PendingReply {
    /// Wait until the placeholder is filled or the relay fails
    pub async fn wait(self) -> Result<()> {
        self.task
            .await
            .map_err(|e| Error::Internal(format!("Relay task failed: {}", e)))?
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Bridges the message store and the completion provider
#[derive(Clone)]
pub struct Relay {
    store: MessageStore,
    provider: Arc<dyn CompletionProvider>,
    settings: Arc<RelaySettings>,
    metrics: Arc<ObservableMetrics>,
}

impl Relay {
    pub fn new(store: MessageStore, provider: Arc<dyn CompletionProvider>, settings: RelaySettings) -> Self {
        Self {
            store,
            provider,
            settings: Arc::new(settings),
            metrics: Arc::new(ObservableMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ObservableMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<ObservableMetrics> {
        &self.metrics
    }

    pub fn is_configured(&self) -> bool {
        self.settings.api_key.is_some()
    }

    /// Send `body` and wait for the placeholder to be filled
    pub async fn send_and_complete(&self, body: &str) -> Result<()> {
        self.dispatch(body).await?.wait().await
    }

    /// Commit the prompt and placeholder, then start the provider call.
    ///
    /// Returns once the two inserts are visible to readers. A missing API key
    /// fails here, after the commit, and leaves the placeholder empty.
    pub async fn dispatch(&self, body: &str) -> Result<PendingReply> {
        let outcome = match send_message(&self.store, body).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_error(None, &e).await;
                return Err(e);
            }
        };
        let request_id = RequestId::new();
        self.metrics
            .start_relay(request_id.clone(), outcome.placeholder.clone())
            .await;

        let api_key = match self.settings.api_key.clone() {
            Some(key) => key,
            None => {
                let err = Error::ConfigError("Completion provider API key is not configured".into());
                warn!(placeholder = %outcome.placeholder, "Relay aborted: {}", err);
                self.metrics.record_error(Some(&request_id), &err).await;
                return Err(err);
            }
        };

        let request = self.build_request(&outcome.context);
        let relay = self.clone();
        let placeholder = outcome.placeholder.clone();
        let task_request_id = request_id.clone();
        let task = tokio::spawn(async move {
            relay
                .complete(task_request_id, api_key, request, placeholder)
                .await
        });

        Ok(PendingReply {
            placeholder: outcome.placeholder,
            request_id,
            task,
        })
    }

    /// System instruction followed by the context as `{role, content}` pairs
    pub fn build_request(&self, context: &[Message]) -> CompletionRequest {
        let mut messages = Vec::with_capacity(context.len() + 1);
        messages.push(ChatMessage {
            role: Role::System,
            content: self.settings.system_prompt.clone(),
        });
        messages.extend(context.iter().filter_map(|m| {
            m.body.as_ref().map(|body| ChatMessage {
                role: m.author.into(),
                content: body.clone(),
            })
        }));

        CompletionRequest {
            model: self.settings.model.clone(),
            messages,
        }
    }

    async fn complete(
        &self,
        request_id: RequestId,
        api_key: String,
        request: CompletionRequest,
        placeholder: MessageId,
    ) -> Result<()> {
        let started = Instant::now();
        let result = self.provider.complete(&api_key, &request).await;
        self.metrics
            .record_provider_latency(started.elapsed().as_millis() as u64)
            .await;

        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                error!(placeholder = %placeholder, request_id = %request_id, "Completion failed: {}", e);
                self.metrics.record_error(Some(&request_id), &e).await;
                return Err(e);
            }
        };

        let patch = MessagePatch {
            body: Some(completion.content),
            usage: Some(completion.usage),
            updated_at: Some(now_millis()),
            processing_ms: completion.processing_ms,
        };
        if let Err(e) = update_message(&self.store, &placeholder, patch).await {
            error!(placeholder = %placeholder, "Failed to fill placeholder: {}", e);
            self.metrics.record_error(Some(&request_id), &e).await;
            return Err(e);
        }

        self.metrics
            .complete_relay(&request_id, &completion.usage, completion.processing_ms)
            .await;
        info!(
            placeholder = %placeholder,
            total_tokens = completion.usage.total_tokens,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Filled placeholder"
        );
        Ok(())
    }
}
