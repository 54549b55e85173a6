use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;

use frontdesk_core::config::SessionConfig;
use frontdesk_core::domain::cta::CtaNodeId;
use frontdesk_core::domain::session::{CrmLinkage, LockOutcome, Session, SessionKey, Turn};
use frontdesk_core::domain::tenant::{TenantConfig, TenantId};
use frontdesk_core::errors::ApplicationError;

pub mod memory;
pub mod session;
pub mod tenant;

pub use memory::{InMemorySessionStore, InMemoryTenantDirectory};
pub use session::SqlSessionStore;
pub use tenant::SqlTenantDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// Whether the backend could not be reached at all, as opposed to a
    /// query or data problem.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Unavailable(_) => true,
            Self::Database(error) => matches!(
                error,
                sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::Io(_)
                    | sqlx::Error::WorkerCrashed
            ),
            Self::Decode(_) => false,
        }
    }
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        if error.is_unavailable() {
            ApplicationError::StoreUnavailable(error.to_string())
        } else {
            ApplicationError::Persistence(error.to_string())
        }
    }
}

/// Expiry and history limits applied by every session store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionPolicy {
    pub ttl: Duration,
    pub max_history_turns: usize,
}

impl SessionPolicy {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            ttl: Duration::seconds(i64::try_from(config.ttl_secs).unwrap_or(i64::MAX / 1000)),
            max_history_turns: config.max_history_turns.max(1),
        }
    }

    pub fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now + self.ttl
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self::from_config(&SessionConfig {
            ttl_secs: frontdesk_core::domain::session::DEFAULT_SESSION_TTL_SECS,
            max_history_turns: frontdesk_core::domain::session::DEFAULT_MAX_HISTORY_TURNS,
        })
    }
}

/// Per-tenant conversation state with expiry.
///
/// Every mutation is a single atomic operation and refreshes the expiry;
/// reads never extend it. Implementations must fail with an error when the
/// backend is unreachable instead of handing out an empty session.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the live session for `key`, replacing an expired one with a
    /// fresh session.
    async fn get_or_create(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Session, RepositoryError>;

    /// Read-only lookup. Expired sessions are reported as absent.
    async fn load(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError>;

    /// Replaces the whole persisted session.
    async fn save(&self, session: &Session, now: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn touch_ttl(&self, key: &SessionKey, now: DateTime<Utc>)
        -> Result<(), RepositoryError>;

    async fn lock_field(
        &self,
        key: &SessionKey,
        field: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome, RepositoryError>;

    async fn is_locked(&self, key: &SessionKey, field: &str) -> Result<bool, RepositoryError>;

    async fn confirm_fields(
        &self,
        key: &SessionKey,
        fields: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Appends turns in order and drops the oldest beyond the history cap.
    async fn append_turns(
        &self,
        key: &SessionKey,
        turns: &[Turn],
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Sets the ids present in `linkage`; absent ids keep their stored value.
    async fn update_crm_linkage(
        &self,
        key: &SessionKey,
        linkage: &CrmLinkage,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn set_cta_cursor(
        &self,
        key: &SessionKey,
        cursor: Option<&CtaNodeId>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn mark_introduced(
        &self,
        key: &SessionKey,
        introduced: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Merges `entries` into the metadata map.
    async fn set_metadata(
        &self,
        key: &SessionKey,
        entries: &BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn increment_counter(
        &self,
        key: &SessionKey,
        counter: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Clears turns, cursor and the introduced flag. Locked fields and CRM
    /// linkage survive.
    async fn reset_conversation(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    async fn purge(&self, key: &SessionKey) -> Result<bool, RepositoryError>;

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find(&self, tenant_id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError>;
    async fn upsert(&self, config: &TenantConfig) -> Result<(), RepositoryError>;
    async fn list_ids(&self) -> Result<Vec<TenantId>, RepositoryError>;
}
