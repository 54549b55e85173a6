use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use frontdesk_agent::crm::{
    ConnectorResolver, ContactCreator, ContactDraft, ContactRecord, ContactSearcher, CrmConnector,
    CrmError, DealCreator, DealDraft, DealRecord,
};
use frontdesk_agent::llm::{ChatModel, ModelError, ModelReply, ModelRequest};
use frontdesk_agent::retrieval::{Retriever, RetrieverError, Snippet};
use frontdesk_agent::runtime::{
    ChatResponse, Orchestrator, OrchestratorParts, OrchestratorSettings, RetryPolicy,
    TOOL_LOOP_FALLBACK_TEXT,
};
use frontdesk_core::audit::InMemoryAuditSink;
use frontdesk_core::domain::session::{
    SessionKey, META_CTA_CLICKS, META_SENTIMENT, META_USER_MESSAGES,
};
use frontdesk_core::domain::tenant::TenantConfig;
use frontdesk_core::domain::tool::ToolCall;
use frontdesk_core::errors::ApplicationError;
use frontdesk_db::repositories::{InMemorySessionStore, InMemoryTenantDirectory, SessionStore};
use frontdesk_db::DemoSeedDataset;

/// Replays scripted replies, then repeats `fallback` forever.
struct ScriptedModel {
    script: Mutex<VecDeque<Result<ModelReply, ModelError>>>,
    fallback: ModelReply,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    fn new(script: Vec<Result<ModelReply, ModelError>>, fallback: ModelReply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn answering(text: &str) -> Arc<Self> {
        Self::new(Vec::new(), ModelReply::text(text))
    }

    fn calls(&self) -> usize {
        self.requests.lock().map(|requests| requests.len()).unwrap_or(0)
    }

    fn last_request(&self) -> ModelRequest {
        self.requests.lock().expect("lock").last().cloned().expect("model was called")
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        self.requests.lock().expect("lock").push(request.clone());
        let next = self.script.lock().expect("lock").pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

struct SlowCrm {
    created: AtomicUsize,
}

#[async_trait]
impl ContactSearcher for SlowCrm {
    async fn search_contact(
        &self,
        _email: Option<&str>,
        _phone: Option<&str>,
    ) -> Result<Option<ContactRecord>, CrmError> {
        Ok(None)
    }
}

#[async_trait]
impl ContactCreator for SlowCrm {
    async fn create_contact(&self, _draft: &ContactDraft) -> Result<ContactRecord, CrmError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        self.created.fetch_add(1, Ordering::SeqCst);
        Err(CrmError::Timeout)
    }
}

#[async_trait]
impl DealCreator for SlowCrm {
    async fn create_deal(&self, _draft: &DealDraft) -> Result<DealRecord, CrmError> {
        Err(CrmError::Status(500))
    }
}

struct Resolver(Arc<SlowCrm>);

impl ConnectorResolver for Resolver {
    fn resolve(&self, tenant: &TenantConfig) -> Option<Arc<dyn CrmConnector>> {
        tenant.crm.as_ref().map(|_| self.0.clone() as Arc<dyn CrmConnector>)
    }
}

/// Creates contacts, then takes the session store offline as if it blipped
/// right after the CRM write.
struct OutageCrm {
    store: Arc<InMemorySessionStore>,
}

#[async_trait]
impl ContactSearcher for OutageCrm {
    async fn search_contact(
        &self,
        _email: Option<&str>,
        _phone: Option<&str>,
    ) -> Result<Option<ContactRecord>, CrmError> {
        Ok(None)
    }
}

#[async_trait]
impl ContactCreator for OutageCrm {
    async fn create_contact(&self, _draft: &ContactDraft) -> Result<ContactRecord, CrmError> {
        self.store.set_unavailable(true);
        Ok(ContactRecord {
            id: "C-77".to_string(),
            first_name: Some("Ana".to_string()),
            email: Some("ana@example.com".to_string()),
            phone: None,
        })
    }
}

#[async_trait]
impl DealCreator for OutageCrm {
    async fn create_deal(&self, _draft: &DealDraft) -> Result<DealRecord, CrmError> {
        Err(CrmError::Status(500))
    }
}

struct OutageResolver(Arc<OutageCrm>);

impl ConnectorResolver for OutageResolver {
    fn resolve(&self, tenant: &TenantConfig) -> Option<Arc<dyn CrmConnector>> {
        tenant.crm.as_ref().map(|_| self.0.clone() as Arc<dyn CrmConnector>)
    }
}

/// Brings the store back before delegating to the scripted model.
struct RecoveringModel {
    inner: Arc<ScriptedModel>,
    store: Arc<InMemorySessionStore>,
}

#[async_trait]
impl ChatModel for RecoveringModel {
    async fn complete(&self, request: &ModelRequest) -> Result<ModelReply, ModelError> {
        self.store.set_unavailable(false);
        self.inner.complete(request).await
    }
}

struct KnowledgeBase;

#[async_trait]
impl Retriever for KnowledgeBase {
    async fn query(&self, kb: &str, _text: &str, _k: usize) -> Result<Vec<Snippet>, RetrieverError> {
        assert_eq!(kb, "kb-northside");
        Ok(vec![Snippet::new("address", "We are at 12 Harbour Street.", 0.91)])
    }
}

struct Harness {
    orchestrator: Orchestrator,
    store: Arc<InMemorySessionStore>,
    audit: InMemoryAuditSink,
    crm: Arc<SlowCrm>,
}

fn harness(model: Arc<ScriptedModel>) -> Harness {
    let tenants = DemoSeedDataset::tenants().expect("demo tenants");
    let store = Arc::new(InMemorySessionStore::default());
    let audit = InMemoryAuditSink::default();
    let crm = Arc::new(SlowCrm { created: AtomicUsize::new(0) });
    let settings = OrchestratorSettings {
        tool_timeout: Duration::from_millis(50),
        model_retry: RetryPolicy { max_retries: 1, base_delay_ms: 1, max_delay_ms: 5 },
        ..OrchestratorSettings::default()
    };

    let orchestrator = Orchestrator::new(
        OrchestratorParts {
            store: store.clone(),
            tenants: Arc::new(InMemoryTenantDirectory::with_tenants(tenants)),
            model,
            retriever: Some(Arc::new(KnowledgeBase)),
            connectors: Arc::new(Resolver(crm.clone())),
            audit: Arc::new(audit.clone()),
        },
        settings,
    );
    Harness { orchestrator, store, audit, crm }
}

fn cta_ids(response: &ChatResponse) -> Vec<&str> {
    response.ctas.iter().map(|cta| cta.id.as_str()).collect()
}

#[tokio::test]
async fn confirmed_email_is_surfaced_and_general_root_ctas_attached() {
    let model = ScriptedModel::answering("We're at 12 Harbour Street.<br><br>Want to see the menu?");
    let h = harness(model.clone());
    let key = SessionKey::new("coffee-shop", "u1");
    let now = Utc::now();
    h.store.lock_field(&key, "email", "ana@example.com", now).await.expect("lock");
    h.store.confirm_fields(&key, &["email".to_string()], now).await.expect("confirm");

    let response = h
        .orchestrator
        .handle_message("coffee-shop", "u1", "What's your address?", "corr-1")
        .await
        .expect("turn succeeds");

    let instruction = model.last_request().messages[0].content.clone();
    assert!(instruction.contains("Already known: email = ana@example.com. Do not ask for it again."));
    assert!(instruction.contains("Context:\n- We are at 12 Harbour Street."));
    assert_eq!(cta_ids(&response), vec!["menu", "hours", "catering", "book"]);
    assert_eq!(response.response_text, "We're at 12 Harbour Street.<br><br>Want to see the menu?");

    let session = h.store.load(&key, Utc::now()).await.expect("load").expect("present");
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.counter(META_USER_MESSAGES), 1);
    assert_eq!(session.last_intent().map(|intent| intent.as_str()), Some("general_inquiry"));
}

#[tokio::test]
async fn endless_tool_requests_are_cut_off_with_a_partial_answer() {
    let looping = ModelReply::tool_calls(vec![ToolCall::new(
        "call",
        "search_contact",
        json!({"email": "ana@example.com"}),
    )]);
    let model = ScriptedModel::new(Vec::new(), looping);
    let h = harness(model.clone());

    let response = h
        .orchestrator
        .handle_message("coffee-shop", "u2", "Do you know me? ana@example.com", "corr-2")
        .await
        .expect("loop is bounded");

    assert_eq!(model.calls(), 5);
    assert_eq!(response.response_text, TOOL_LOOP_FALLBACK_TEXT);
    assert_eq!(h.audit.events_of_type("tool.loop_exceeded").len(), 1);
    assert_eq!(h.audit.events_of_type("tool.invoked").len(), 4);
}

#[tokio::test]
async fn tenant_without_kb_or_crm_still_answers() {
    let model = ScriptedModel::answering("We're open weekdays 8 to 5.");
    let h = harness(model.clone());

    let response = h
        .orchestrator
        .handle_message("plain-dental", "u1", "When are you open?", "corr-3")
        .await
        .expect("turn succeeds");

    assert_eq!(response.response_text, "We're open weekdays 8 to 5.");
    assert!(response.ctas.is_empty());
    let request = model.last_request();
    assert!(request.tools.is_empty());
    assert!(!request.messages[0].content.contains("Context:\n-"));
}

#[tokio::test]
async fn crm_timeout_yields_graceful_reply_without_linkage() {
    let model = ScriptedModel::new(
        vec![Ok(ModelReply::tool_calls(vec![ToolCall::new(
            "call_1",
            "create_contact",
            json!({"name": "Ana", "email": "ana@example.com"}),
        )]))],
        ModelReply::text("Sorry, I couldn't save that right now. I'll have someone follow up."),
    );
    let h = harness(model.clone());

    let response = h
        .orchestrator
        .handle_message("coffee-shop", "u3", "Please add me, I'm Ana, ana@example.com", "corr-4")
        .await
        .expect("tool failure is recoverable");

    assert!(response.response_text.contains("I'll have someone follow up"));
    let tool_message = &model.last_request().messages.last().cloned().expect("tool result");
    assert!(tool_message.content.contains("tool_execution_error"));

    let session = h
        .store
        .load(&SessionKey::new("coffee-shop", "u3"), Utc::now())
        .await
        .expect("load")
        .expect("present");
    assert!(session.crm.contact_id.is_none());
    assert_eq!(h.crm.created.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn model_outage_is_retried_once_then_surfaced() {
    let model = ScriptedModel::new(
        vec![Err(ModelError::Timeout(30)), Err(ModelError::Status { status: 503, body: String::new() })],
        ModelReply::text("unreachable"),
    );
    let h = harness(model.clone());

    let error = h
        .orchestrator
        .handle_message("coffee-shop", "u4", "Do you do oat milk?", "corr-5")
        .await
        .expect_err("retry budget exhausted");

    assert!(matches!(error, ApplicationError::ModelProvider(_)));
    assert_eq!(model.calls(), 2);
    assert_eq!(h.audit.events_of_type("turn.failed").len(), 1);
}

#[tokio::test]
async fn single_model_failure_recovers_on_retry() {
    let model = ScriptedModel::new(vec![Err(ModelError::Timeout(30))], ModelReply::text("Yes, we do!"));
    let h = harness(model.clone());

    let response = h
        .orchestrator
        .handle_message("coffee-shop", "u5", "Do you do oat milk?", "corr-6")
        .await
        .expect("second attempt succeeds");
    assert_eq!(response.response_text, "Yes, we do!");
}

#[tokio::test]
async fn store_outage_fails_the_request() {
    let h = harness(ScriptedModel::answering("unused"));
    h.store.set_unavailable(true);

    let error = h
        .orchestrator
        .handle_message("coffee-shop", "u6", "Hello there friend", "corr-7")
        .await
        .expect_err("store is down");
    assert!(matches!(error, ApplicationError::StoreUnavailable(_)));
}

#[tokio::test]
async fn unknown_tenant_and_blank_input_are_rejected() {
    let h = harness(ScriptedModel::answering("unused"));

    let missing = h.orchestrator.handle_message("nobody", "u1", "hi", "c").await;
    assert!(matches!(missing, Err(ApplicationError::TenantNotFound(_))));

    let blank = h.orchestrator.handle_message("coffee-shop", "u1", "   ", "c").await;
    assert!(matches!(blank, Err(ApplicationError::Validation(_))));
}

#[tokio::test]
async fn greeting_twice_skips_boilerplate_without_calling_the_model() {
    let model = ScriptedModel::answering("unused");
    let h = harness(model.clone());

    let first = h.orchestrator.handle_message("coffee-shop", "u7", "Hi", "c1").await.expect("first");
    let second = h.orchestrator.handle_message("coffee-shop", "u7", "hello", "c2").await.expect("second");

    assert_eq!(first.response_text, "Welcome to Northside Coffee! How can I help you today?");
    assert_eq!(second.response_text, "Please choose one of the options below.");
    assert_eq!(cta_ids(&first), vec!["menu", "hours", "catering", "book"]);
    assert_eq!(first.ctas, second.ctas);
    assert_eq!(model.calls(), 0);
}

#[tokio::test]
async fn reset_restarts_the_conversation_but_keeps_locked_fields() {
    let h = harness(ScriptedModel::answering("Noted!"));
    let key = SessionKey::new("coffee-shop", "u8");

    h.orchestrator.handle_message("coffee-shop", "u8", "hi", "c1").await.expect("intro");
    h.orchestrator
        .handle_message("coffee-shop", "u8", "my email is ana@example.com", "c2")
        .await
        .expect("message");
    let response = h.orchestrator.handle_message("coffee-shop", "u8", "reset", "c3").await.expect("reset");

    assert_eq!(response.response_text, "Welcome to Northside Coffee! How can I help you today?");
    let session = h.store.load(&key, Utc::now()).await.expect("load").expect("present");
    assert_eq!(session.turns.len(), 2);
    assert_eq!(session.locked_value("email"), Some("ana@example.com"));
    assert!(session.introduced);
}

#[tokio::test]
async fn appointment_requests_short_circuit_to_the_booking_link() {
    let model = ScriptedModel::answering("unused");
    let h = harness(model.clone());

    let response = h
        .orchestrator
        .handle_message("coffee-shop", "u9", "Can I book an appointment tomorrow?", "c")
        .await
        .expect("guarded");

    assert_eq!(
        response.response_text,
        "You can check our availability and schedule directly through our calendar here: \
         https://cal.example.com/northside/tasting."
    );
    assert_eq!(cta_ids(&response), vec!["book_online", "book_call"]);
    assert_eq!(model.calls(), 0);
    assert_eq!(h.audit.events_of_type("guard.hard_guard").len(), 1);
}

#[tokio::test]
async fn clicks_move_the_cursor_and_count_analytics() {
    let h = harness(ScriptedModel::answering("unused"));
    let key = SessionKey::new("coffee-shop", "u10");

    let response =
        h.orchestrator.handle_click("coffee-shop", "u10", "catering", "c").await.expect("click");
    assert_eq!(response.response_text, "Here are your options for Office catering:");
    assert_eq!(cta_ids(&response), vec!["catering_quote", "catering_menu"]);

    let leaf = h
        .orchestrator
        .handle_click("coffee-shop", "u10", "catering_quote", "c")
        .await
        .expect("leaf click");
    assert_eq!(leaf.response_text, "I'd like a catering quote for an office event.");
    assert!(leaf.ctas.is_empty());

    let session = h.store.load(&key, Utc::now()).await.expect("load").expect("present");
    assert_eq!(session.cta_cursor.as_ref().map(|id| id.as_str()), Some("catering"));
    assert_eq!(session.counter(META_CTA_CLICKS), 2);
    assert_eq!(session.turns.len(), 4);

    let unknown =
        h.orchestrator.handle_click("coffee-shop", "u10", "gone", "c").await.expect("unknown click");
    assert!(unknown.ctas.is_empty());
}

#[tokio::test]
async fn captured_email_is_echoed_in_bold_once_and_confirmed() {
    let model = ScriptedModel::answering("Thanks! I'll send details to ana@example.com.");
    let h = harness(model);
    let key = SessionKey::new("coffee-shop", "u11");

    let response = h
        .orchestrator
        .handle_message("coffee-shop", "u11", "You can reach me at ana@example.com", "c")
        .await
        .expect("turn");

    assert_eq!(response.response_text, "Thanks! I'll send details to <b>ana@example.com</b>.");
    let session = h.store.load(&key, Utc::now()).await.expect("load").expect("present");
    assert!(session.is_confirmed("email"));
}

#[tokio::test]
async fn contact_linkage_survives_a_store_blip_during_the_tool_call() {
    let tenants = DemoSeedDataset::tenants().expect("demo tenants");
    let store = Arc::new(InMemorySessionStore::default());
    let scripted = ScriptedModel::new(
        vec![Ok(ModelReply::tool_calls(vec![ToolCall::new(
            "call_1",
            "create_contact",
            json!({"name": "Ana", "email": "ana@example.com"}),
        )]))],
        ModelReply::text("You're all set, Ana!<br><br>Anything else I can help with?"),
    );
    let orchestrator = Orchestrator::new(
        OrchestratorParts {
            store: store.clone(),
            tenants: Arc::new(InMemoryTenantDirectory::with_tenants(tenants)),
            model: Arc::new(RecoveringModel { inner: scripted.clone(), store: store.clone() }),
            retriever: None,
            connectors: Arc::new(OutageResolver(Arc::new(OutageCrm { store: store.clone() }))),
            audit: Arc::new(InMemoryAuditSink::default()),
        },
        OrchestratorSettings::default(),
    );

    orchestrator
        .handle_message("coffee-shop", "u11", "Please add me, ana@example.com", "corr-11")
        .await
        .expect("turn completes once the store is back");

    assert_eq!(scripted.calls(), 2);
    let session = store
        .load(&SessionKey::new("coffee-shop", "u11"), Utc::now())
        .await
        .expect("load")
        .expect("present");
    assert_eq!(session.crm.contact_id.as_deref(), Some("C-77"));
}

#[tokio::test]
async fn each_answered_message_records_its_sentiment() {
    let model = ScriptedModel::answering("So sorry about that!<br><br>Can I have someone call you?");
    let h = harness(model);
    let key = SessionKey::new("coffee-shop", "u12");

    h.orchestrator
        .handle_message("coffee-shop", "u12", "I'm fed up waiting for my order", "corr-12")
        .await
        .expect("turn succeeds");
    let session = h.store.load(&key, Utc::now()).await.expect("load").expect("present");
    assert_eq!(session.metadata.get(META_SENTIMENT), Some(&json!("frustrated")));

    h.orchestrator
        .handle_message("coffee-shop", "u12", "Great, thanks so much", "corr-13")
        .await
        .expect("turn succeeds");
    let session = h.store.load(&key, Utc::now()).await.expect("load").expect("present");
    assert_eq!(session.metadata.get(META_SENTIMENT), Some(&json!("positive")));
}
