//! Chat endpoints.
//!
//! - `POST /chat`     `{tenant_id, session_id, message}`
//! - `POST /chat/cta` `{tenant_id, session_id, cta_id}`
//!
//! Both return `{response_text, ctas}`. Failures return
//! `{error, correlation_id}` with a generic message; detail goes to the log only.

use std::future::Future;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use uuid::Uuid;

use frontdesk_agent::runtime::{ChatResponse, Orchestrator};
use frontdesk_core::errors::{ApplicationError, InterfaceError};

#[derive(Clone)]
pub struct ChatState {
    orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChatRequest {
    pub tenant_id: String,
    pub session_id: String,
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CtaClickRequest {
    pub tenant_id: String,
    pub session_id: String,
    pub cta_id: String,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub correlation_id: String,
}

type ChatResult = Result<Json<ChatResponse>, (StatusCode, Json<ErrorBody>)>;

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/cta", post(click_cta))
        .with_state(ChatState { orchestrator })
}

async fn chat(State(state): State<ChatState>, Json(request): Json<ChatRequest>) -> ChatResult {
    let correlation_id = Uuid::new_v4().to_string();
    let task_correlation_id = correlation_id.clone();
    let orchestrator = state.orchestrator;

    run_detached(&correlation_id, async move {
        orchestrator
            .handle_message(
                &request.tenant_id,
                &request.session_id,
                &request.message,
                &task_correlation_id,
            )
            .await
    })
    .await
}

async fn click_cta(
    State(state): State<ChatState>,
    Json(request): Json<CtaClickRequest>,
) -> ChatResult {
    let correlation_id = Uuid::new_v4().to_string();
    let task_correlation_id = correlation_id.clone();
    let orchestrator = state.orchestrator;

    run_detached(&correlation_id, async move {
        orchestrator
            .handle_click(
                &request.tenant_id,
                &request.session_id,
                &request.cta_id,
                &task_correlation_id,
            )
            .await
    })
    .await
}

/// Runs the turn on its own task so a dropped client connection does not
/// cancel tool calls already in flight.
async fn run_detached<F>(correlation_id: &str, turn: F) -> ChatResult
where
    F: Future<Output = Result<ChatResponse, ApplicationError>> + Send + 'static,
{
    let outcome = match tokio::spawn(turn).await {
        Ok(outcome) => outcome,
        Err(join_error) => {
            error!(
                event_name = "server.chat.task_panicked",
                correlation_id,
                error = %join_error,
                "turn task did not complete"
            );
            return Err(error_response(InterfaceError::Internal {
                message: join_error.to_string(),
                correlation_id: correlation_id.to_string(),
            }));
        }
    };

    outcome.map(Json).map_err(|error| {
        let interface = error.into_interface(correlation_id);
        warn!(
            event_name = "server.chat.request_failed",
            correlation_id,
            error = %interface,
            "chat request failed"
        );
        error_response(interface)
    })
}

fn error_response(error: InterfaceError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &error {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::NotFound { .. } => StatusCode::NOT_FOUND,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorBody {
        error: error.user_message().to_string(),
        correlation_id: error.correlation_id().to_string(),
    };
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use frontdesk_agent::crm::HttpConnectorResolver;
    use frontdesk_agent::llm::{ChatModel, ModelError, ModelReply, ModelRequest};
    use frontdesk_agent::runtime::{Orchestrator, OrchestratorParts, OrchestratorSettings};
    use frontdesk_core::audit::InMemoryAuditSink;
    use frontdesk_db::repositories::{InMemorySessionStore, InMemoryTenantDirectory};
    use frontdesk_db::DemoSeedDataset;

    use super::router;

    struct EchoModel;

    #[async_trait]
    impl ChatModel for EchoModel {
        async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
            let last = request.messages.last().map(|message| message.content.clone());
            Ok(ModelReply::text(format!("You said: {}", last.unwrap_or_default())))
        }
    }

    struct DownModel;

    #[async_trait]
    impl ChatModel for DownModel {
        async fn complete(&self, _request: &ModelRequest) -> Result<ModelReply, ModelError> {
            Err(ModelError::Status { status: 503, body: "overloaded".to_string() })
        }
    }

    fn app(model: Arc<dyn ChatModel>, store: Arc<InMemorySessionStore>) -> axum::Router {
        let tenants = DemoSeedDataset::tenants().expect("demo tenants");
        let settings = OrchestratorSettings {
            model_retry: frontdesk_agent::runtime::RetryPolicy {
                max_retries: 0,
                base_delay_ms: 1,
                max_delay_ms: 1,
            },
            ..OrchestratorSettings::default()
        };
        let orchestrator = Orchestrator::new(
            OrchestratorParts {
                store,
                tenants: Arc::new(InMemoryTenantDirectory::with_tenants(tenants)),
                model,
                retriever: None,
                connectors: Arc::new(HttpConnectorResolver::default()),
                audit: Arc::new(InMemoryAuditSink::default()),
            },
            settings,
        );
        router(Arc::new(orchestrator))
    }

    async fn post(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[tokio::test]
    async fn chat_returns_answer_and_ctas() {
        let app = app(Arc::new(EchoModel), Arc::new(InMemorySessionStore::default()));

        let (status, body) = post(
            app,
            "/chat",
            json!({"tenant_id": "coffee-shop", "session_id": "u1", "message": "Any beans?"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response_text"], "You said: Any beans?");
        assert_eq!(body["ctas"][0]["id"], "menu");
        assert_eq!(body["ctas"].as_array().map(Vec::len), Some(4));
    }

    #[tokio::test]
    async fn cta_click_returns_children() {
        let app = app(Arc::new(EchoModel), Arc::new(InMemorySessionStore::default()));

        let (status, body) = post(
            app,
            "/chat/cta",
            json!({"tenant_id": "coffee-shop", "session_id": "u1", "cta_id": "book"}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response_text"], "Here are your options for Book a tasting:");
        assert_eq!(body["ctas"][0]["url"], "https://cal.example.com/northside/tasting");
    }

    #[tokio::test]
    async fn failures_map_to_status_codes_with_generic_messages() {
        let store = Arc::new(InMemorySessionStore::default());

        let (status, body) = post(
            app(Arc::new(EchoModel), store.clone()),
            "/chat",
            json!({"tenant_id": "coffee-shop", "session_id": "u1", "message": "  "}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["correlation_id"].as_str().is_some_and(|id| !id.is_empty()));

        let (status, _) = post(
            app(Arc::new(EchoModel), store.clone()),
            "/chat",
            json!({"tenant_id": "nobody", "session_id": "u1", "message": "hours?"}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = post(
            app(Arc::new(DownModel), store.clone()),
            "/chat",
            json!({"tenant_id": "coffee-shop", "session_id": "u1", "message": "hours?"}),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body["error"],
            "Sorry, I'm having trouble right now. Please try again in a moment."
        );
        assert!(!body.to_string().contains("overloaded"));

        store.set_unavailable(true);
        let (status, _) = post(
            app(Arc::new(EchoModel), store),
            "/chat/cta",
            json!({"tenant_id": "coffee-shop", "session_id": "u1", "cta_id": "menu"}),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn missing_ids_are_a_bad_request() {
        let app = app(Arc::new(EchoModel), Arc::new(InMemorySessionStore::default()));

        let (status, _) = post(app, "/chat", json!({"message": "hi there"})).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
