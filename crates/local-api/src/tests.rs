#[cfg(test)]
mod tests {
    use crate::{build_router, build_state};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use chatrelay_common::{Completion, CompletionRequest, Error, Result, Usage};
    use chatrelay_config::AppConfig;
    use chatrelay_relay::{CompletionProvider, Relay, RelaySettings};
    use chatrelay_store::MessageStore;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tower::ServiceExt;

    struct FixedProvider {
        reply: std::result::Result<&'static str, u16>,
    }

    #[async_trait]
    impl CompletionProvider for FixedProvider {
        async fn complete(&self, _api_key: &str, _request: &CompletionRequest) -> Result<Completion> {
            match self.reply {
                Ok(content) => Ok(Completion {
                    content: content.to_string(),
                    usage: Usage { prompt_tokens: 4, completion_tokens: 1, total_tokens: 5 },
                    processing_ms: Some(30),
                }),
                Err(status) => Err(Error::Provider {
                    status,
                    message: "Service Unavailable".to_string(),
                }),
            }
        }
    }

    fn app_with(
        config: AppConfig,
        reply: std::result::Result<&'static str, u16>,
        api_key: Option<&str>,
    ) -> Router {
        let settings = RelaySettings {
            api_key: api_key.map(str::to_string),
            model: config.provider.model.clone(),
            system_prompt: config.provider.system_prompt.clone(),
        };
        let relay = Relay::new(MessageStore::new(), Arc::new(FixedProvider { reply }), settings);
        build_router(build_state(&config, relay))
            .layer(MockConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))))
    }

    fn app(api_key: Option<&str>) -> Router {
        app_with(AppConfig::default(), Ok("hi there"), api_key)
    }

    fn post_message(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/messages")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("build request")
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn test_list_starts_empty() {
        let response = app(Some("sk")).oneshot(get("/messages")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!([]));
    }

    #[tokio::test]
    async fn test_send_and_complete_fills_placeholder() {
        let app = app(Some("sk"));

        let response = app.clone().oneshot(post_message(json!({"body": "hello"}))).await.expect("response");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let messages = json_body(app.oneshot(get("/messages")).await.expect("response")).await;
        let messages = messages.as_array().expect("array");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["author"], "user");
        assert_eq!(messages[0]["body"], "hello");
        assert_eq!(messages[1]["author"], "assistant");
        assert_eq!(messages[1]["body"], "hi there");
        assert_eq!(messages[1]["usage"]["total_tokens"], 5);
        assert_eq!(messages[1]["processing_ms"], 30);
    }

    #[tokio::test]
    async fn test_empty_body_is_bad_request() {
        let app = app(Some("sk"));

        let response = app.clone().oneshot(post_message(json!({"body": "   "}))).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["type"], "bad_request");

        let messages = json_body(app.oneshot(get("/messages")).await.expect("response")).await;
        assert_eq!(messages, json!([]));
    }

    #[tokio::test]
    async fn test_missing_key_leaves_pending_placeholder() {
        let app = app(None);

        let response = app.clone().oneshot(post_message(json!({"body": "hello"}))).await.expect("response");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json_body(response).await["error"]["type"], "config_error");

        let messages = json_body(app.oneshot(get("/messages")).await.expect("response")).await;
        assert_eq!(messages.as_array().map(Vec::len), Some(2));
        assert!(messages[1].get("body").is_none());
    }

    #[tokio::test]
    async fn test_provider_failure_is_bad_gateway() {
        let app = app_with(AppConfig::default(), Err(503), Some("sk"));

        let response = app.oneshot(post_message(json!({"body": "hello"}))).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let body = json_body(response).await;
        assert_eq!(body["error"]["type"], "provider_error");
        assert_eq!(body["error"]["message"], "Completion provider returned 503: Service Unavailable");
        assert!(body["request_id"].is_string());
    }

    #[tokio::test]
    async fn test_rate_limit_applies_to_relays() {
        let mut config = AppConfig::default();
        config.limits.per_ip_per_minute = 1;
        let app = app_with(config, Ok("hi"), Some("sk"));

        let first = app.clone().oneshot(post_message(json!({"body": "one"}))).await.expect("response");
        assert_eq!(first.status(), StatusCode::NO_CONTENT);

        let second = app.clone().oneshot(post_message(json!({"body": "two"}))).await.expect("response");
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        // Reads are never limited
        let list = app.oneshot(get("/messages")).await.expect("response");
        assert_eq!(list.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_reports_missing_key() {
        let body = json_body(app(None).oneshot(get("/healthz")).await.expect("response")).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["provider_configured"], false);

        let body = json_body(app(Some("sk")).oneshot(get("/health")).await.expect("response")).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_metrics_count_relays() {
        let app = app(Some("sk"));
        app.clone().oneshot(post_message(json!({"body": "hello"}))).await.expect("response");

        let body = json_body(app.oneshot(get("/metrics")).await.expect("response")).await;
        assert_eq!(body["total_relays"], 1);
        assert_eq!(body["completed_relays"], 1);
        assert_eq!(body["total_prompt_tokens"], 4);
    }

    #[tokio::test]
    async fn test_version_endpoint() {
        let body = json_body(app(None).oneshot(get("/version")).await.expect("response")).await;
        assert_eq!(body["api"], "ChatRelay Local API");
    }

    #[tokio::test]
    async fn test_subscription_streams_snapshots() {
        let app = app(Some("sk"));

        let response = app.clone().oneshot(get("/messages/subscribe")).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));

        let mut frames = response.into_body().into_data_stream();
        let first = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .expect("initial snapshot")
            .expect("stream open")
            .expect("frame");
        let first = String::from_utf8_lossy(&first).to_string();
        assert!(first.contains("event: messages"));
        assert!(first.contains("data: []"));

        app.oneshot(post_message(json!({"body": "hello"}))).await.expect("response");

        let next = tokio::time::timeout(Duration::from_secs(1), frames.next())
            .await
            .expect("snapshot after send")
            .expect("stream open")
            .expect("frame");
        let next = String::from_utf8_lossy(&next).to_string();
        assert!(next.contains("event: messages"));
        assert!(next.contains("\"hello\""));
    }
}
