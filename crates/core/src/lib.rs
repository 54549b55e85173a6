pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod navigator;

pub use domain::cta::{CtaAction, CtaNode, CtaNodeId, CtaSummary, CtaTree, CtaTreeIssue};
pub use domain::intent::Intent;
pub use domain::sentiment::Sentiment;
pub use domain::session::{LockOutcome, PiiField, Session, SessionKey, Turn, TurnRole};
pub use domain::tenant::{CrmConnectorDescriptor, TenantConfig, TenantId};
pub use domain::tool::{ToolCall, ToolName, ToolResult, ToolSpec};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use navigator::{ClickOutcome, CtaNavigator, CursorMove};
