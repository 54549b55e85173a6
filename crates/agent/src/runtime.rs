//! Control loop for one inbound message or CTA click.
//!
//! `RECEIVED -> CONTEXT_BUILT -> MODEL_CALLED -> (TOOL_REQUESTED <-> TOOL_EXECUTED)*
//! -> GUARDED -> PERSISTED -> RESPONDED`, with `FAILED` reachable from any
//! state. The tool loop is an explicit counter, never recursion.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use frontdesk_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use frontdesk_core::config::AppConfig;
use frontdesk_core::domain::cta::{CtaAction, CtaNodeId, CtaSummary};
use frontdesk_core::domain::intent::Intent;
use frontdesk_core::domain::sentiment::Sentiment;
use frontdesk_core::domain::session::{
    Session, SessionKey, Turn, META_ASSISTANT_MESSAGES, META_CTA_CLICKS, META_LAST_INTENT,
    META_SENTIMENT, META_USER_MESSAGES,
};
use frontdesk_core::domain::tenant::{TenantConfig, TenantId};
use frontdesk_core::domain::tool::ToolExchange;
use frontdesk_core::errors::ApplicationError;
use frontdesk_core::navigator::{CtaNavigator, CursorMove};
use frontdesk_db::repositories::{SessionStore, TenantDirectory};

use crate::context::{ContextAssembler, ContextBundle, ToolRound};
use crate::conversation::FieldExtractor;
use crate::crm::ConnectorResolver;
use crate::guardrails::{FinalResponse, HardGuard, ResponseGuard};
use crate::llm::{ChatModel, ModelError, ModelReply};
use crate::retrieval::Retriever;
use crate::tools::ToolBridge;

pub const TOOL_LOOP_FALLBACK_TEXT: &str =
    "Thanks for your patience! I'll have someone from our team follow up with you shortly.";

/// Wire shape returned for both chat messages and CTA clicks.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response_text: String,
    pub ctas: Vec<CtaSummary>,
}

impl From<FinalResponse> for ChatResponse {
    fn from(response: FinalResponse) -> Self {
        Self { response_text: response.text, ctas: response.ctas }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnState {
    Received,
    ContextBuilt,
    ModelCalled,
    ToolRequested,
    ToolExecuted,
    Guarded,
    Persisted,
    Responded,
    Failed,
}

impl TurnState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::ContextBuilt => "context_built",
            Self::ModelCalled => "model_called",
            Self::ToolRequested => "tool_requested",
            Self::ToolExecuted => "tool_executed",
            Self::Guarded => "guarded",
            Self::Persisted => "persisted",
            Self::Responded => "responded",
            Self::Failed => "failed",
        }
    }
}

/// Bounded exponential backoff between model attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1, base_delay_ms: 500, max_delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub max_tool_iterations: u32,
    pub tool_timeout: Duration,
    pub retrieval_timeout: Duration,
    pub retrieval_top_k: usize,
    pub context_history_turns: usize,
    pub default_appointment_link: Option<String>,
    pub model_retry: RetryPolicy,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_tool_iterations: 4,
            tool_timeout: Duration::from_secs(10),
            retrieval_timeout: Duration::from_secs(5),
            retrieval_top_k: 8,
            context_history_turns: 10,
            default_appointment_link: None,
            model_retry: RetryPolicy::default(),
        }
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_tool_iterations: config.orchestrator.max_tool_iterations,
            tool_timeout: Duration::from_secs(config.orchestrator.tool_timeout_secs),
            retrieval_timeout: Duration::from_secs(config.retriever.timeout_secs),
            retrieval_top_k: config.retriever.top_k,
            context_history_turns: config.orchestrator.context_history_turns,
            default_appointment_link: config.orchestrator.default_appointment_link.clone(),
            model_retry: RetryPolicy {
                max_retries: config.llm.max_retries,
                base_delay_ms: config.llm.retry_backoff_ms,
                ..RetryPolicy::default()
            },
        }
    }
}

/// Collaborators the orchestrator is wired with.
pub struct OrchestratorParts {
    pub store: Arc<dyn SessionStore>,
    pub tenants: Arc<dyn TenantDirectory>,
    pub model: Arc<dyn ChatModel>,
    pub retriever: Option<Arc<dyn Retriever>>,
    pub connectors: Arc<dyn ConnectorResolver>,
    pub audit: Arc<dyn AuditSink>,
}

pub struct Orchestrator {
    store: Arc<dyn SessionStore>,
    tenants: Arc<dyn TenantDirectory>,
    model: Arc<dyn ChatModel>,
    audit: Arc<dyn AuditSink>,
    assembler: ContextAssembler,
    tools: ToolBridge,
    guard: ResponseGuard,
    navigator: CtaNavigator,
    extractor: FieldExtractor,
    settings: OrchestratorSettings,
}

/// Tracks one turn's position in the state machine for logging and audit.
struct TurnTrace {
    key: SessionKey,
    correlation_id: String,
    state: TurnState,
}

impl TurnTrace {
    fn new(key: SessionKey, correlation_id: &str) -> Self {
        let trace =
            Self { key, correlation_id: correlation_id.to_string(), state: TurnState::Received };
        info!(
            event_name = "orchestrator.turn.received",
            correlation_id = %trace.correlation_id,
            tenant_id = %trace.key.tenant_id,
            session_id = %trace.key.session_id.0,
            "turn received"
        );
        trace
    }

    fn advance(&mut self, state: TurnState) {
        debug!(
            event_name = "orchestrator.turn.state",
            correlation_id = %self.correlation_id,
            from = self.state.as_str(),
            to = state.as_str()
        );
        self.state = state;
    }

    fn event(
        &self,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent::new(&self.key, &self.correlation_id, event_type, category, outcome)
    }
}

impl Orchestrator {
    pub fn new(parts: OrchestratorParts, settings: OrchestratorSettings) -> Self {
        Self {
            assembler: ContextAssembler::new(
                parts.retriever,
                settings.retrieval_top_k,
                settings.retrieval_timeout,
                settings.context_history_turns,
            ),
            tools: ToolBridge::new(parts.connectors, parts.store.clone(), settings.tool_timeout),
            guard: ResponseGuard::new(settings.default_appointment_link.clone()),
            navigator: CtaNavigator,
            extractor: FieldExtractor::new(),
            store: parts.store,
            tenants: parts.tenants,
            model: parts.model,
            audit: parts.audit,
            settings,
        }
    }

    pub async fn handle_message(
        &self,
        tenant_id: &str,
        session_id: &str,
        message: &str,
        correlation_id: &str,
    ) -> Result<ChatResponse, ApplicationError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ApplicationError::Validation("message must not be empty".to_string()));
        }
        let key = session_key(tenant_id, session_id)?;
        let mut trace = TurnTrace::new(key, correlation_id);

        let result = self.run_message(&mut trace, message).await;
        self.finish(&mut trace, result)
    }

    pub async fn handle_click(
        &self,
        tenant_id: &str,
        session_id: &str,
        cta_id: &str,
        correlation_id: &str,
    ) -> Result<ChatResponse, ApplicationError> {
        let cta_id = cta_id.trim();
        if cta_id.is_empty() {
            return Err(ApplicationError::Validation("cta_id must not be empty".to_string()));
        }
        let key = session_key(tenant_id, session_id)?;
        let mut trace = TurnTrace::new(key, correlation_id);

        let result = self.run_click(&mut trace, &CtaNodeId(cta_id.to_string())).await;
        self.finish(&mut trace, result)
    }

    fn finish(
        &self,
        trace: &mut TurnTrace,
        result: Result<ChatResponse, ApplicationError>,
    ) -> Result<ChatResponse, ApplicationError> {
        match &result {
            Ok(_) => trace.advance(TurnState::Responded),
            Err(error) => {
                let failed_in = trace.state;
                trace.advance(TurnState::Failed);
                warn!(
                    event_name = "orchestrator.turn.failed",
                    correlation_id = %trace.correlation_id,
                    tenant_id = %trace.key.tenant_id,
                    failed_in = failed_in.as_str(),
                    error = %error,
                    "turn failed"
                );
                self.audit.emit(
                    trace
                        .event("turn.failed", AuditCategory::System, AuditOutcome::Failed)
                        .with_metadata("failed_in", failed_in.as_str())
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }

    async fn run_message(
        &self,
        trace: &mut TurnTrace,
        message: &str,
    ) -> Result<ChatResponse, ApplicationError> {
        let tenant = self.load_tenant(&trace.key.tenant_id).await?;
        let now = Utc::now();
        let mut session = self.store.get_or_create(&trace.key, now).await?;
        self.audit.emit(trace.event("turn.received", AuditCategory::Ingress, AuditOutcome::Success));

        if let Some(guard) = self.guard.detect(message, &tenant) {
            return self.answer_hard_guard(trace, guard, &tenant, &mut session, message, now).await;
        }

        let intent = Intent::classify(message);
        self.lock_extracted_fields(&mut session, message, now).await?;

        let mut bundle = self.assembler.build(&session, &tenant, message).await;
        trace.advance(TurnState::ContextBuilt);

        let loaded_crm = session.crm.clone();
        let raw_answer = self.run_model_loop(trace, &mut bundle, &tenant, &mut session, now).await?;
        // Tool calls persist linkage as they go; this write covers any of
        // those that failed, so the next turn never creates a second contact.
        if session.crm != loaded_crm {
            self.store.update_crm_linkage(&trace.key, &session.crm, now).await?;
        }

        let response = self.guard.enforce(&raw_answer, &session, &tenant, intent);
        trace.advance(TurnState::Guarded);

        if !response.confirmed_fields.is_empty() {
            self.store.confirm_fields(&trace.key, &response.confirmed_fields, now).await?;
        }
        self.record_exchange(&trace.key, message, &response.text, now).await?;
        let mut metadata = BTreeMap::new();
        metadata.insert(META_LAST_INTENT.to_string(), Value::from(intent.as_str()));
        metadata
            .insert(META_SENTIMENT.to_string(), Value::from(Sentiment::classify(message).as_str()));
        self.store.set_metadata(&trace.key, &metadata, now).await?;
        trace.advance(TurnState::Persisted);

        Ok(response.into())
    }

    async fn answer_hard_guard(
        &self,
        trace: &mut TurnTrace,
        guard: HardGuard,
        tenant: &TenantConfig,
        session: &mut Session,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<ChatResponse, ApplicationError> {
        let (response, cursor) = match &guard {
            HardGuard::Intro { reset } => {
                if *reset {
                    self.store.reset_conversation(&trace.key, now).await?;
                    session.reset_conversation();
                }
                let response = self.guard.intro_response(tenant, session.introduced);
                self.store.mark_introduced(&trace.key, true, now).await?;
                (response, None)
            }
            HardGuard::Appointment { link } => {
                let cursor = self
                    .navigator
                    .entry_point(tenant, Intent::AppointmentInquiry)
                    .filter(|entry| entry.action == CtaAction::ShowChildren)
                    .map(|entry| entry.id);
                (self.guard.appointment_response(tenant, link), cursor)
            }
        };
        trace.advance(TurnState::Guarded);

        info!(
            event_name = "orchestrator.hard_guard",
            correlation_id = %trace.correlation_id,
            tenant_id = %trace.key.tenant_id,
            guard = guard.name(),
            "answered without the model"
        );
        self.audit.emit(
            trace
                .event("guard.hard_guard", AuditCategory::Guard, AuditOutcome::Success)
                .with_metadata("guard", guard.name()),
        );

        self.store.set_cta_cursor(&trace.key, cursor.as_ref(), now).await?;
        self.record_exchange(&trace.key, message, &response.text, now).await?;
        trace.advance(TurnState::Persisted);
        Ok(response.into())
    }

    async fn run_click(
        &self,
        trace: &mut TurnTrace,
        cta_id: &CtaNodeId,
    ) -> Result<ChatResponse, ApplicationError> {
        let tenant = self.load_tenant(&trace.key.tenant_id).await?;
        let now = Utc::now();
        self.store.get_or_create(&trace.key, now).await?;
        self.audit.emit(
            trace
                .event("cta.clicked", AuditCategory::Ingress, AuditOutcome::Success)
                .with_metadata("cta_id", cta_id.as_str()),
        );

        let outcome = self.navigator.click(&tenant, cta_id);
        if outcome.node.is_none() {
            warn!(
                event_name = "orchestrator.cta.unknown",
                correlation_id = %trace.correlation_id,
                tenant_id = %trace.key.tenant_id,
                cta_id = %cta_id,
                "click on a cta that is not in the tenant tree"
            );
        }
        trace.advance(TurnState::Guarded);

        if let CursorMove::MoveTo(node_id) = &outcome.cursor {
            self.store.set_cta_cursor(&trace.key, Some(node_id), now).await?;
        }
        let clicked =
            outcome.node.as_ref().map(|node| node.label.as_str()).unwrap_or(cta_id.as_str());
        let turns = [Turn::user(clicked, now), Turn::assistant(&outcome.text, now)];
        self.store.append_turns(&trace.key, &turns, now).await?;
        self.store.increment_counter(&trace.key, META_CTA_CLICKS, now).await?;
        self.store.increment_counter(&trace.key, META_ASSISTANT_MESSAGES, now).await?;
        trace.advance(TurnState::Persisted);

        Ok(ChatResponse { response_text: outcome.text, ctas: outcome.ctas })
    }

    /// Calls the model until it answers without tools or the iteration bound
    /// is reached. Returns the raw answer text.
    async fn run_model_loop(
        &self,
        trace: &mut TurnTrace,
        bundle: &mut ContextBundle,
        tenant: &TenantConfig,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> Result<String, ApplicationError> {
        let mut rounds = 0_u32;
        let mut last_text = None;

        loop {
            let reply = self.complete_with_retry(trace, bundle).await?;
            trace.advance(TurnState::ModelCalled);
            if let Some(text) = reply.text.as_ref().filter(|text| !text.trim().is_empty()) {
                last_text = Some(text.clone());
            }

            if !reply.requests_tools() {
                return Ok(reply.text.unwrap_or_default());
            }
            trace.advance(TurnState::ToolRequested);

            if rounds >= self.settings.max_tool_iterations {
                warn!(
                    event_name = "tools.loop_exceeded",
                    correlation_id = %trace.correlation_id,
                    tenant_id = %trace.key.tenant_id,
                    rounds,
                    "tool loop cut off; answering with the best partial reply"
                );
                self.audit.emit(
                    trace
                        .event("tool.loop_exceeded", AuditCategory::Tool, AuditOutcome::Rejected)
                        .with_metadata("rounds", rounds.to_string()),
                );
                return Ok(last_text.unwrap_or_else(|| TOOL_LOOP_FALLBACK_TEXT.to_string()));
            }

            let mut exchanges = Vec::with_capacity(reply.tool_calls.len());
            for call in &reply.tool_calls {
                let result = self.tools.invoke(call, tenant, session, now).await;
                let outcome =
                    if result.is_success() { AuditOutcome::Success } else { AuditOutcome::Failed };
                self.audit.emit(
                    trace
                        .event("tool.invoked", AuditCategory::Tool, outcome)
                        .with_metadata("tool", call.name.clone())
                        .with_metadata("result", result.kind()),
                );
                exchanges.push(ToolExchange { call: call.clone(), result });
            }
            bundle.record_tool_round(ToolRound { assistant_text: reply.text, exchanges });
            rounds += 1;
            trace.advance(TurnState::ToolExecuted);
        }
    }

    async fn complete_with_retry(
        &self,
        trace: &TurnTrace,
        bundle: &ContextBundle,
    ) -> Result<ModelReply, ApplicationError> {
        let request = bundle.to_model_request();
        let policy = self.settings.model_retry;
        let mut attempt = 0;

        loop {
            match self.model.complete(&request).await {
                Ok(reply) => return Ok(reply),
                Err(error) if attempt < policy.max_retries => {
                    let delay = policy.backoff(attempt);
                    warn!(
                        event_name = "model.retry",
                        correlation_id = %trace.correlation_id,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "model call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(model_failure(trace, &*self.audit, error)),
            }
        }
    }

    async fn lock_extracted_fields(
        &self,
        session: &mut Session,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        for (field, value) in self.extractor.extract(message).entries() {
            let outcome = self.store.lock_field(&session.key, field.as_str(), &value, now).await?;
            session.lock_field(field.as_str(), &value, now);
            if outcome.changed() {
                debug!(event_name = "orchestrator.field_locked", field = field.as_str());
            }
        }
        Ok(())
    }

    async fn record_exchange(
        &self,
        key: &SessionKey,
        user_text: &str,
        assistant_text: &str,
        now: DateTime<Utc>,
    ) -> Result<(), ApplicationError> {
        let turns = [Turn::user(user_text, now), Turn::assistant(assistant_text, now)];
        self.store.append_turns(key, &turns, now).await?;
        self.store.increment_counter(key, META_USER_MESSAGES, now).await?;
        self.store.increment_counter(key, META_ASSISTANT_MESSAGES, now).await?;
        Ok(())
    }

    async fn load_tenant(&self, tenant_id: &TenantId) -> Result<TenantConfig, ApplicationError> {
        self.tenants
            .find(tenant_id)
            .await?
            .ok_or_else(|| ApplicationError::TenantNotFound(tenant_id.to_string()))
    }
}

fn session_key(tenant_id: &str, session_id: &str) -> Result<SessionKey, ApplicationError> {
    let (tenant_id, session_id) = (tenant_id.trim(), session_id.trim());
    if tenant_id.is_empty() || session_id.is_empty() {
        return Err(ApplicationError::Validation(
            "tenant_id and session_id are required".to_string(),
        ));
    }
    Ok(SessionKey::new(tenant_id, session_id))
}

fn model_failure(trace: &TurnTrace, audit: &dyn AuditSink, error: ModelError) -> ApplicationError {
    audit.emit(
        trace
            .event("model.exhausted", AuditCategory::Model, AuditOutcome::Failed)
            .with_metadata("error", error.to_string()),
    );
    ApplicationError::ModelProvider(error.to_string())
}
