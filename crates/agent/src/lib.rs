//! Orchestration runtime for the front-desk assistant.
//!
//! For every inbound message the runtime:
//! 1. answers hard-guarded inputs (greetings, resets, booking requests)
//!    without the model,
//! 2. builds a bounded context (`context`) from guardrails, the tenant
//!    prompt, locked fields, retrieved snippets and trimmed history,
//! 3. calls the model (`llm`) and runs any CRM tool calls (`tools`, `crm`)
//!    in a bounded loop,
//! 4. repairs the reply to the output contract (`guardrails`) and persists
//!    the turn.
//!
//! The model only phrases answers. Captured personal details, CRM linkage and
//! CTA navigation are decided by deterministic code.

pub mod context;
pub mod conversation;
pub mod crm;
pub mod guardrails;
pub mod llm;
pub mod retrieval;
pub mod runtime;
pub mod tools;

pub use context::{ContextAssembler, ContextBundle, ToolRound};
pub use conversation::{ExtractedFields, FieldExtractor};
pub use crm::{
    ConnectorResolver, ContactCreator, ContactDraft, ContactRecord, ContactSearcher,
    CrmConnector, CrmError, DealCreator, DealDraft, DealRecord, HttpConnectorResolver,
    HttpCrmConnector,
};
pub use guardrails::{FinalResponse, HardGuard, ResponseGuard};
pub use llm::{ChatMessage, ChatModel, ChatRole, ModelError, ModelReply, ModelRequest, OpenAiCompatibleModel};
pub use retrieval::{HttpRetriever, Retriever, RetrieverError, Snippet};
pub use runtime::{
    ChatResponse, Orchestrator, OrchestratorParts, OrchestratorSettings, RetryPolicy, TurnState,
};
pub use tools::ToolBridge;
