use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::RwLock;

use frontdesk_core::domain::cta::CtaNodeId;
use frontdesk_core::domain::session::{
    trim_turns, CrmLinkage, LockOutcome, Session, SessionKey, Turn,
};
use frontdesk_core::domain::tenant::{TenantConfig, TenantId};

use super::{RepositoryError, SessionPolicy, SessionStore, TenantDirectory};

/// Process-local session store for tests and single-node demos.
///
/// `set_unavailable(true)` makes every call fail like an unreachable backend.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionKey, Session>>,
    policy: SessionPolicy,
    unavailable: AtomicBool,
}

impl InMemorySessionStore {
    pub fn new(policy: SessionPolicy) -> Self {
        Self { sessions: RwLock::default(), policy, unavailable: AtomicBool::new(false) }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(RepositoryError::Unavailable("in-memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }

    /// Applies `mutate` to the live session for `key`, creating it if needed,
    /// and refreshes the expiry.
    async fn mutate<T>(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
        mutate: impl FnOnce(&mut Session, SessionPolicy) -> T + Send,
    ) -> Result<T, RepositoryError> {
        self.check_available()?;
        let mut sessions = self.sessions.write().await;
        let policy = self.policy;
        let session = sessions
            .entry(key.clone())
            .or_insert_with(|| Session::new(key.clone(), now, policy.ttl));
        if session.is_expired(now) {
            *session = Session::new(key.clone(), now, policy.ttl);
        }
        let result = mutate(session, policy);
        session.refresh_expiry(now, policy.ttl);
        Ok(result)
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get_or_create(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Session, RepositoryError> {
        self.check_available()?;
        let mut sessions = self.sessions.write().await;
        let ttl = self.policy.ttl;
        let session =
            sessions.entry(key.clone()).or_insert_with(|| Session::new(key.clone(), now, ttl));
        if session.is_expired(now) {
            *session = Session::new(key.clone(), now, ttl);
        }
        Ok(session.clone())
    }

    async fn load(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        self.check_available()?;
        let sessions = self.sessions.read().await;
        Ok(sessions.get(key).filter(|session| !session.is_expired(now)).cloned())
    }

    async fn save(&self, session: &Session, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        self.check_available()?;
        let mut stored = session.clone();
        trim_turns(&mut stored.turns, self.policy.max_history_turns);
        stored.refresh_expiry(now, self.policy.ttl);
        self.sessions.write().await.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn touch_ttl(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.mutate(key, now, |_, _| ()).await
    }

    async fn lock_field(
        &self,
        key: &SessionKey,
        field: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome, RepositoryError> {
        self.mutate(key, now, |session, _| session.lock_field(field, value, now)).await
    }

    async fn is_locked(&self, key: &SessionKey, field: &str) -> Result<bool, RepositoryError> {
        self.check_available()?;
        let sessions = self.sessions.read().await;
        Ok(sessions.get(key).map(|session| session.is_locked(field)).unwrap_or(false))
    }

    async fn confirm_fields(
        &self,
        key: &SessionKey,
        fields: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.mutate(key, now, |session, _| {
            for field in fields {
                session.confirm_field(field);
            }
        })
        .await
    }

    async fn append_turns(
        &self,
        key: &SessionKey,
        turns: &[Turn],
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.mutate(key, now, |session, policy| {
            for turn in turns {
                session.push_turn(turn.clone(), policy.max_history_turns);
            }
        })
        .await
    }

    async fn update_crm_linkage(
        &self,
        key: &SessionKey,
        linkage: &CrmLinkage,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.mutate(key, now, |session, _| {
            if let Some(contact_id) = &linkage.contact_id {
                session.crm.contact_id = Some(contact_id.clone());
            }
            if let Some(deal_id) = &linkage.deal_id {
                session.crm.deal_id = Some(deal_id.clone());
            }
        })
        .await
    }

    async fn set_cta_cursor(
        &self,
        key: &SessionKey,
        cursor: Option<&CtaNodeId>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let cursor = cursor.cloned();
        self.mutate(key, now, |session, _| session.cta_cursor = cursor).await
    }

    async fn mark_introduced(
        &self,
        key: &SessionKey,
        introduced: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.mutate(key, now, |session, _| session.introduced = introduced).await
    }

    async fn set_metadata(
        &self,
        key: &SessionKey,
        entries: &BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.mutate(key, now, |session, _| {
            for (name, value) in entries {
                session.metadata.insert(name.clone(), value.clone());
            }
        })
        .await
    }

    async fn increment_counter(
        &self,
        key: &SessionKey,
        counter: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.mutate(key, now, |session, _| {
            session.increment_counter(counter);
        })
        .await
    }

    async fn reset_conversation(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.mutate(key, now, |session, _| session.reset_conversation()).await
    }

    async fn purge(&self, key: &SessionKey) -> Result<bool, RepositoryError> {
        self.check_available()?;
        Ok(self.sessions.write().await.remove(key).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        self.check_available()?;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}

#[derive(Default)]
pub struct InMemoryTenantDirectory {
    tenants: RwLock<HashMap<String, TenantConfig>>,
}

impl InMemoryTenantDirectory {
    pub fn with_tenants(tenants: impl IntoIterator<Item = TenantConfig>) -> Self {
        let tenants = tenants
            .into_iter()
            .map(|tenant| (tenant.tenant_id.0.clone(), tenant))
            .collect::<HashMap<_, _>>();
        Self { tenants: RwLock::new(tenants) }
    }
}

#[async_trait::async_trait]
impl TenantDirectory for InMemoryTenantDirectory {
    async fn find(&self, tenant_id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError> {
        let tenants = self.tenants.read().await;
        Ok(tenants.get(&tenant_id.0).cloned())
    }

    async fn upsert(&self, config: &TenantConfig) -> Result<(), RepositoryError> {
        let mut tenants = self.tenants.write().await;
        tenants.insert(config.tenant_id.0.clone(), config.clone());
        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<TenantId>, RepositoryError> {
        let tenants = self.tenants.read().await;
        let mut ids = tenants.keys().cloned().map(TenantId).collect::<Vec<_>>();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use frontdesk_core::domain::session::{LockOutcome, SessionKey, Turn};

    use crate::repositories::{
        InMemorySessionStore, RepositoryError, SessionPolicy, SessionStore,
    };

    #[tokio::test]
    async fn in_memory_store_isolates_tenants() {
        let store = InMemorySessionStore::default();
        let now = Utc::now();
        let a = SessionKey::new("tenant-a", "s1");
        let b = SessionKey::new("tenant-b", "s1");

        store.lock_field(&a, "email", "a@a.co", now).await.expect("lock");
        store.append_turns(&a, &[Turn::user("hi", now)], now).await.expect("turn");

        let session_b = store.get_or_create(&b, now).await.expect("b");
        assert!(session_b.locked_fields.is_empty());
        assert!(session_b.turns.is_empty());
    }

    #[tokio::test]
    async fn in_memory_store_relock_is_idempotent() {
        let store = InMemorySessionStore::default();
        let now = Utc::now();
        let key = SessionKey::new("t", "s");

        store.lock_field(&key, "email", "a@a.co", now).await.expect("lock");
        store.confirm_fields(&key, &["email".to_string()], now).await.expect("confirm");
        let outcome = store.lock_field(&key, "email", "a@a.co", now).await.expect("relock");

        assert_eq!(outcome, LockOutcome::Unchanged);
        let session = store.load(&key, now).await.expect("load").expect("present");
        assert!(session.is_confirmed("email"));
    }

    #[tokio::test]
    async fn unavailable_store_fails_instead_of_fabricating_sessions() {
        let store = InMemorySessionStore::new(SessionPolicy {
            ttl: Duration::days(7),
            max_history_turns: 20,
        });
        store.set_unavailable(true);

        let error = store
            .get_or_create(&SessionKey::new("t", "s"), Utc::now())
            .await
            .expect_err("store is down");
        assert!(matches!(error, RepositoryError::Unavailable(_)));
        assert!(error.is_unavailable());
    }
}
