use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use frontdesk_core::domain::session::{CrmLinkage, PiiField, Session};
use frontdesk_core::domain::tenant::TenantConfig;
use frontdesk_core::domain::tool::{ToolCall, ToolName, ToolResult, ToolSpec};
use frontdesk_db::repositories::SessionStore;

use crate::conversation::{normalize_email, normalize_phone};
use crate::crm::{ConnectorResolver, ContactDraft, CrmConnector, CrmError, DealDraft};

const CONNECTOR_FAILURE: &str =
    "The CRM could not complete this request. Offer the user a follow-up instead of retrying.";

/// Runs model-issued CRM tool calls against the tenant's connector and keeps
/// the session's CRM linkage in step with successful results.
pub struct ToolBridge {
    resolver: Arc<dyn ConnectorResolver>,
    store: Arc<dyn SessionStore>,
    call_timeout: Duration,
}

impl ToolBridge {
    pub fn new(
        resolver: Arc<dyn ConnectorResolver>,
        store: Arc<dyn SessionStore>,
        call_timeout: Duration,
    ) -> Self {
        Self { resolver, store, call_timeout }
    }

    /// Tools the model may call for `tenant`. Empty without a CRM connector.
    pub fn available_tools(tenant: &TenantConfig) -> Vec<ToolSpec> {
        tenant
            .crm
            .as_ref()
            .map(|crm| crm.exposed().into_iter().map(ToolSpec::for_tool).collect())
            .unwrap_or_default()
    }

    /// Never fails: every problem becomes a [`ToolResult`] the model can read.
    pub async fn invoke(
        &self,
        call: &ToolCall,
        tenant: &TenantConfig,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> ToolResult {
        let Some(tool) = ToolName::parse(&call.name).filter(|tool| tenant.exposes_tool(*tool))
        else {
            warn!(
                event_name = "tools.not_available",
                tenant_id = %tenant.tenant_id,
                tool = %call.name,
                "model requested a tool the tenant does not expose"
            );
            return ToolResult::ToolNotAvailable { tool: call.name.clone() };
        };
        let Some(connector) = self.resolver.resolve(tenant) else {
            return ToolResult::ToolNotAvailable { tool: call.name.clone() };
        };

        let result = match tool {
            ToolName::SearchContact => self.search_contact(call, connector.as_ref(), session, now).await,
            ToolName::CreateContact => self.create_contact(call, connector.as_ref(), session, now).await,
            ToolName::CreateDeal => self.create_deal(call, connector.as_ref(), session, now).await,
        };

        info!(
            event_name = "tools.invoked",
            tenant_id = %tenant.tenant_id,
            session_id = %session.key.session_id.0,
            tool = tool.as_str(),
            outcome = result.kind(),
            "tool call finished"
        );
        result
    }

    async fn search_contact(
        &self,
        call: &ToolCall,
        connector: &dyn CrmConnector,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> ToolResult {
        let email = call.argument("email").as_deref().and_then(normalize_email);
        let phone = call
            .argument("phone")
            .or_else(|| call.argument("phone_number"))
            .as_deref()
            .and_then(normalize_phone);
        if email.is_none() && phone.is_none() {
            return ToolResult::ValidationError {
                message: "search_contact needs a valid email or phone number. Ask the user for one."
                    .to_string(),
            };
        }

        let outcome = self
            .with_timeout(connector.search_contact(email.as_deref(), phone.as_deref()))
            .await;
        match outcome {
            Ok(Some(contact)) => {
                self.link(session, CrmLinkage { contact_id: Some(contact.id.clone()), deal_id: None }, now)
                    .await;
                ToolResult::Success { payload: json!({"found": true, "contact_id": contact.id}) }
            }
            Ok(None) => ToolResult::Success { payload: json!({"found": false}) },
            Err(error) => self.connector_failure("search_contact", &error),
        }
    }

    async fn create_contact(
        &self,
        call: &ToolCall,
        connector: &dyn CrmConnector,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> ToolResult {
        if let Some(contact_id) = session.crm.contact_id.clone() {
            return ToolResult::Success {
                payload: json!({"created": false, "contact_id": contact_id, "already_linked": true}),
            };
        }

        let raw_email = call.argument("email");
        let raw_phone = call.argument("phone").or_else(|| call.argument("phone_number"));
        let email = raw_email.as_deref().and_then(normalize_email);
        let phone = raw_phone.as_deref().and_then(normalize_phone);

        // A bad channel is reported even when the other one is fine, so the
        // model re-asks instead of saving a contact without it.
        for (label, raw, parsed) in
            [("email address", &raw_email, &email), ("phone number", &raw_phone, &phone)]
        {
            if let (Some(raw), None) = (raw, parsed) {
                return ToolResult::ValidationError {
                    message: format!(
                        "The {label} `{raw}` does not look valid. Ask the user to re-check it."
                    ),
                };
            }
        }
        if email.is_none() && phone.is_none() {
            return ToolResult::ValidationError {
                message: "create_contact needs an email or phone number. Ask the user for one."
                    .to_string(),
            };
        }
        let Some(first_name) = call.argument("name").or_else(|| call.argument("first_name")) else {
            return ToolResult::ValidationError {
                message: "create_contact needs the user's first name. Ask for it.".to_string(),
            };
        };

        let draft = ContactDraft { first_name, email, phone };
        match self.with_timeout(connector.create_contact(&draft)).await {
            Ok(contact) => {
                self.link(session, CrmLinkage { contact_id: Some(contact.id.clone()), deal_id: None }, now)
                    .await;
                self.lock_contact_fields(session, &draft, now).await;
                ToolResult::Success { payload: json!({"created": true, "contact_id": contact.id}) }
            }
            Err(error) => self.connector_failure("create_contact", &error),
        }
    }

    async fn create_deal(
        &self,
        call: &ToolCall,
        connector: &dyn CrmConnector,
        session: &mut Session,
        now: DateTime<Utc>,
    ) -> ToolResult {
        if let Some(deal_id) = session.crm.deal_id.clone() {
            return ToolResult::Success {
                payload: json!({"created": false, "deal_id": deal_id, "already_linked": true}),
            };
        }

        let Some(title) = call.argument("title") else {
            return ToolResult::ValidationError {
                message: "create_deal needs a title describing the request.".to_string(),
            };
        };
        let Some(contact_id) = call.argument("contact_id").or_else(|| session.crm.contact_id.clone())
        else {
            return ToolResult::ValidationError {
                message: "create_deal needs a contact. Search for or create the contact first."
                    .to_string(),
            };
        };

        let draft = DealDraft {
            contact_id,
            title,
            description: call.argument("description"),
        };
        match self.with_timeout(connector.create_deal(&draft)).await {
            Ok(deal) => {
                let linkage =
                    CrmLinkage { contact_id: Some(draft.contact_id.clone()), deal_id: Some(deal.id.clone()) };
                self.link(session, linkage, now).await;
                ToolResult::Success { payload: json!({"created": true, "deal_id": deal.id}) }
            }
            Err(error) => self.connector_failure("create_deal", &error),
        }
    }

    async fn with_timeout<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, CrmError>>,
    ) -> Result<T, CrmError> {
        tokio::time::timeout(self.call_timeout, call).await.unwrap_or(Err(CrmError::Timeout))
    }

    fn connector_failure(&self, tool: &str, error: &CrmError) -> ToolResult {
        warn!(event_name = "tools.connector_failed", tool, error = %error, "crm connector failed");
        ToolResult::ToolExecutionError { message: CONNECTOR_FAILURE.to_string() }
    }

    // The CRM write already happened, so a failed linkage write is logged
    // rather than turned into a tool failure. The orchestrator writes the
    // session's linkage again once the tool loop ends.
    async fn link(&self, session: &mut Session, linkage: CrmLinkage, now: DateTime<Utc>) {
        if let Some(contact_id) = &linkage.contact_id {
            session.crm.contact_id = Some(contact_id.clone());
        }
        if let Some(deal_id) = &linkage.deal_id {
            session.crm.deal_id = Some(deal_id.clone());
        }
        if let Err(error) = self.store.update_crm_linkage(&session.key, &linkage, now).await {
            warn!(
                event_name = "tools.linkage_write_failed",
                tenant_id = %session.key.tenant_id,
                error = %error,
                "could not persist crm linkage"
            );
        }
    }

    async fn lock_contact_fields(&self, session: &mut Session, draft: &ContactDraft, now: DateTime<Utc>) {
        let fields = [
            (PiiField::FirstName, Some(draft.first_name.as_str())),
            (PiiField::Email, draft.email.as_deref()),
            (PiiField::Phone, draft.phone.as_deref()),
        ];
        for (field, value) in fields {
            let Some(value) = value else { continue };
            session.lock_field(field.as_str(), value, now);
            if let Err(error) = self.store.lock_field(&session.key, field.as_str(), value, now).await {
                warn!(
                    event_name = "tools.field_lock_failed",
                    field = field.as_str(),
                    error = %error,
                    "could not persist locked field"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use serde_json::json;

    use frontdesk_core::domain::session::{Session, SessionKey};
    use frontdesk_core::domain::tenant::{CrmConnectorDescriptor, TenantConfig};
    use frontdesk_core::domain::tool::{ToolCall, ToolName, ToolResult};
    use frontdesk_db::repositories::{InMemorySessionStore, SessionPolicy, SessionStore};

    use super::ToolBridge;
    use crate::crm::{
        ConnectorResolver, ContactCreator, ContactDraft, ContactRecord, ContactSearcher,
        CrmConnector, CrmError, DealCreator, DealDraft, DealRecord,
    };

    #[derive(Default)]
    struct FakeCrm {
        hang: bool,
        contacts_created: AtomicUsize,
    }

    #[async_trait]
    impl ContactSearcher for FakeCrm {
        async fn search_contact(
            &self,
            email: Option<&str>,
            _phone: Option<&str>,
        ) -> Result<Option<ContactRecord>, CrmError> {
            Ok(email.filter(|email| *email == "known@example.com").map(|email| ContactRecord {
                id: "C-known".to_string(),
                first_name: None,
                email: Some(email.to_string()),
                phone: None,
            }))
        }
    }

    #[async_trait]
    impl ContactCreator for FakeCrm {
        async fn create_contact(&self, draft: &ContactDraft) -> Result<ContactRecord, CrmError> {
            if self.hang {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            let n = self.contacts_created.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(ContactRecord {
                id: format!("C-{n}"),
                first_name: Some(draft.first_name.clone()),
                email: draft.email.clone(),
                phone: draft.phone.clone(),
            })
        }
    }

    #[async_trait]
    impl DealCreator for FakeCrm {
        async fn create_deal(&self, draft: &DealDraft) -> Result<DealRecord, CrmError> {
            Ok(DealRecord { id: format!("D-{}", draft.contact_id), title: Some(draft.title.clone()) })
        }
    }

    struct FixedResolver(Arc<FakeCrm>);

    impl ConnectorResolver for FixedResolver {
        fn resolve(&self, tenant: &TenantConfig) -> Option<Arc<dyn CrmConnector>> {
            tenant.crm.as_ref().map(|_| self.0.clone() as Arc<dyn CrmConnector>)
        }
    }

    fn tenant() -> TenantConfig {
        TenantConfig::new("coffee-shop", "p")
            .with_crm(CrmConnectorDescriptor::http("https://crm.example.com"))
    }

    fn bridge(crm: Arc<FakeCrm>, store: Arc<InMemorySessionStore>) -> ToolBridge {
        ToolBridge::new(Arc::new(FixedResolver(crm)), store, Duration::from_millis(50))
    }

    fn session() -> Session {
        Session::new(SessionKey::new("coffee-shop", "u1"), Utc::now(), chrono::Duration::days(7))
    }

    #[test]
    fn tools_are_listed_only_with_a_connector() {
        assert!(ToolBridge::available_tools(&TenantConfig::new("plain", "p")).is_empty());
        assert_eq!(ToolBridge::available_tools(&tenant()).len(), 3);

        let limited = TenantConfig::new("t", "p").with_crm(
            CrmConnectorDescriptor::http("https://crm.example.com").exposing(&[ToolName::SearchContact]),
        );
        let tools = ToolBridge::available_tools(&limited);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, ToolName::SearchContact);
    }

    #[tokio::test]
    async fn unknown_or_unexposed_tools_are_rejected() {
        let bridge = bridge(Arc::new(FakeCrm::default()), Arc::new(InMemorySessionStore::default()));
        let mut session = session();

        let result = bridge
            .invoke(&ToolCall::new("1", "delete_contact", json!({})), &tenant(), &mut session, Utc::now())
            .await;
        assert_eq!(result, ToolResult::ToolNotAvailable { tool: "delete_contact".to_string() });

        let no_crm = TenantConfig::new("plain", "p");
        let result = bridge
            .invoke(&ToolCall::new("2", "search_contact", json!({"email": "a@b.co"})), &no_crm, &mut session, Utc::now())
            .await;
        assert!(matches!(result, ToolResult::ToolNotAvailable { .. }));
    }

    #[tokio::test]
    async fn create_contact_without_valid_channel_is_a_validation_error() {
        let crm = Arc::new(FakeCrm::default());
        let bridge = bridge(crm.clone(), Arc::new(InMemorySessionStore::default()));
        let mut session = session();

        let result = bridge
            .invoke(
                &ToolCall::new("1", "create_contact", json!({"name": "Ana", "email": "ana@nowhere"})),
                &tenant(),
                &mut session,
                Utc::now(),
            )
            .await;

        assert!(matches!(result, ToolResult::ValidationError { .. }));
        assert_eq!(crm.contacts_created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bad_email_is_reported_even_with_a_valid_phone() {
        let crm = Arc::new(FakeCrm::default());
        let bridge = bridge(crm.clone(), Arc::new(InMemorySessionStore::default()));
        let mut session = session();
        let call = ToolCall::new(
            "1",
            "create_contact",
            json!({"name": "Ana", "email": "ana@nowhere", "phone": 5551234567_u64}),
        );

        let result = bridge.invoke(&call, &tenant(), &mut session, Utc::now()).await;

        let ToolResult::ValidationError { message } = &result else {
            panic!("expected a validation error, got {result:?}");
        };
        assert!(message.contains("`ana@nowhere`"));
        assert_eq!(crm.contacts_created.load(Ordering::SeqCst), 0);

        let numeric_phone =
            ToolCall::new("2", "create_contact", json!({"name": "Ana", "phone": 5551234567_u64}));
        let created = bridge.invoke(&numeric_phone, &tenant(), &mut session, Utc::now()).await;
        assert!(created.is_success());
        assert_eq!(session.locked_value("phone"), Some("+15551234567"));
    }

    #[tokio::test]
    async fn created_contact_is_linked_and_not_created_twice() {
        let crm = Arc::new(FakeCrm::default());
        let store = Arc::new(InMemorySessionStore::new(SessionPolicy::default()));
        let bridge = bridge(crm.clone(), store.clone());
        let mut session = session();
        let call = ToolCall::new(
            "1",
            "create_contact",
            json!({"name": "Ana", "email": "Ana@Example.com", "phone": "555 123 4567"}),
        );

        let first = bridge.invoke(&call, &tenant(), &mut session, Utc::now()).await;
        let second = bridge.invoke(&call, &tenant(), &mut session, Utc::now()).await;

        assert!(first.is_success());
        assert!(second.is_success());
        assert_eq!(crm.contacts_created.load(Ordering::SeqCst), 1);
        assert_eq!(session.crm.contact_id.as_deref(), Some("C-1"));
        assert_eq!(session.locked_value("email"), Some("ana@example.com"));

        let stored = store.load(&session.key, Utc::now()).await.expect("load").expect("present");
        assert_eq!(stored.crm.contact_id.as_deref(), Some("C-1"));
        assert_eq!(stored.locked_value("phone"), Some("+15551234567"));
    }

    #[tokio::test]
    async fn deal_uses_the_linked_contact() {
        let crm = Arc::new(FakeCrm::default());
        let bridge = bridge(crm, Arc::new(InMemorySessionStore::default()));
        let mut session = session();

        let missing = bridge
            .invoke(&ToolCall::new("1", "create_deal", json!({"title": "Catering"})), &tenant(), &mut session, Utc::now())
            .await;
        assert!(matches!(missing, ToolResult::ValidationError { .. }));

        bridge
            .invoke(
                &ToolCall::new("2", "search_contact", json!({"email": "known@example.com"})),
                &tenant(),
                &mut session,
                Utc::now(),
            )
            .await;
        let deal = bridge
            .invoke(&ToolCall::new("3", "create_deal", json!({"title": "Catering"})), &tenant(), &mut session, Utc::now())
            .await;

        assert!(deal.is_success());
        assert_eq!(session.crm.deal_id.as_deref(), Some("D-C-known"));
    }

    #[tokio::test]
    async fn connector_timeout_becomes_execution_error_without_linkage() {
        let crm = Arc::new(FakeCrm { hang: true, ..FakeCrm::default() });
        let store = Arc::new(InMemorySessionStore::default());
        let bridge = bridge(crm, store.clone());
        let mut session = session();

        let result = bridge
            .invoke(
                &ToolCall::new("1", "create_contact", json!({"name": "Ana", "email": "ana@example.com"})),
                &tenant(),
                &mut session,
                Utc::now(),
            )
            .await;

        assert!(matches!(result, ToolResult::ToolExecutionError { .. }));
        assert!(session.crm.contact_id.is_none());
        assert!(store.load(&session.key, Utc::now()).await.expect("load").is_none());
    }
}
