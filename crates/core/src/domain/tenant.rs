use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::cta::{CtaNodeId, CtaTree};
use crate::domain::intent::Intent;
use crate::domain::tool::ToolName;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TenantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read-only tenant configuration as supplied by the admin collaborator.
///
/// Every optional capability (knowledge base, CRM connector, CTA tree) may be
/// absent; the orchestration core degrades to base guardrails plus the tenant
/// prompt when nothing else is configured.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub tenant_id: TenantId,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub system_prompt: String,
    #[serde(default)]
    pub personality: Option<String>,
    #[serde(default)]
    pub greeting_message: Option<String>,
    #[serde(default)]
    pub appointment_link: Option<String>,
    #[serde(default)]
    pub kb_handle: Option<String>,
    #[serde(default)]
    pub crm: Option<CrmConnectorDescriptor>,
    #[serde(default)]
    pub cta_tree: Option<CtaTree>,
    #[serde(default)]
    pub cta_entry_points: BTreeMap<Intent, CtaNodeId>,
}

impl TenantConfig {
    pub fn new(tenant_id: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        let tenant_id = tenant_id.into();
        Self {
            display_name: tenant_id.clone(),
            tenant_id: TenantId(tenant_id),
            system_prompt: system_prompt.into(),
            personality: None,
            greeting_message: None,
            appointment_link: None,
            kb_handle: None,
            crm: None,
            cta_tree: None,
            cta_entry_points: BTreeMap::new(),
        }
    }

    pub fn with_cta_tree(mut self, tree: CtaTree) -> Self {
        self.cta_tree = Some(tree);
        self
    }

    pub fn with_entry_point(mut self, intent: Intent, node_id: impl Into<String>) -> Self {
        self.cta_entry_points.insert(intent, CtaNodeId(node_id.into()));
        self
    }

    pub fn with_kb_handle(mut self, kb_handle: impl Into<String>) -> Self {
        self.kb_handle = Some(kb_handle.into());
        self
    }

    pub fn with_crm(mut self, crm: CrmConnectorDescriptor) -> Self {
        self.crm = Some(crm);
        self
    }

    /// Knowledge-base handle, ignoring blank values left behind by the admin UI.
    pub fn knowledge_base(&self) -> Option<&str> {
        self.kb_handle.as_deref().map(str::trim).filter(|handle| !handle.is_empty())
    }

    pub fn exposes_tool(&self, tool: ToolName) -> bool {
        self.crm.as_ref().map(|crm| crm.exposes(tool)).unwrap_or(false)
    }

    /// Admin-side check run before a configuration is accepted. The runtime
    /// itself tolerates everything reported here and fails closed instead.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.tenant_id.as_str().trim().is_empty() {
            return Err(DomainError::InvariantViolation("tenant_id must not be empty".to_string()));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(DomainError::InvariantViolation(format!(
                "tenant `{}` has an empty system_prompt",
                self.tenant_id
            )));
        }

        if let Some(tree) = &self.cta_tree {
            if !tree.issues().is_empty() {
                return Err(DomainError::CtaTreeInvalid {
                    tenant_id: self.tenant_id.to_string(),
                    issues: tree.issues().to_vec(),
                });
            }
        }

        for (intent, node_id) in &self.cta_entry_points {
            let known = self.cta_tree.as_ref().map(|tree| tree.contains(node_id)).unwrap_or(false);
            if !known {
                return Err(DomainError::InvariantViolation(format!(
                    "tenant `{}` maps `{}` to unknown cta node `{}`",
                    self.tenant_id,
                    intent.as_str(),
                    node_id
                )));
            }
        }

        if let Some(crm) = &self.crm {
            if crm.base_url.trim().is_empty() {
                return Err(DomainError::InvariantViolation(format!(
                    "tenant `{}` has a crm connector without base_url",
                    self.tenant_id
                )));
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrmConnectorKind {
    Http,
}

/// Describes which CRM vendor adapter a tenant uses and which operations it
/// allows the model to call. An empty `exposed_tools` list exposes the full
/// vocabulary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmConnectorDescriptor {
    pub kind: CrmConnectorKind,
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub exposed_tools: Vec<ToolName>,
}

impl CrmConnectorDescriptor {
    pub fn http(base_url: impl Into<String>) -> Self {
        Self {
            kind: CrmConnectorKind::Http,
            base_url: base_url.into(),
            api_key: None,
            exposed_tools: Vec::new(),
        }
    }

    pub fn exposing(mut self, tools: &[ToolName]) -> Self {
        self.exposed_tools = tools.to_vec();
        self
    }

    pub fn exposes(&self, tool: ToolName) -> bool {
        self.exposed_tools.is_empty() || self.exposed_tools.contains(&tool)
    }

    pub fn exposed(&self) -> Vec<ToolName> {
        ToolName::ALL.iter().copied().filter(|tool| self.exposes(*tool)).collect()
    }
}
