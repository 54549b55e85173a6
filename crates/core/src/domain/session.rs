use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::cta::CtaNodeId;
use crate::domain::intent::Intent;
use crate::domain::tenant::TenantId;

pub const DEFAULT_SESSION_TTL_SECS: u64 = 7 * 24 * 3600;
pub const DEFAULT_MAX_HISTORY_TURNS: usize = 20;

pub const META_LAST_INTENT: &str = "last_intent";
pub const META_SENTIMENT: &str = "sentiment";
pub const META_USER_MESSAGES: &str = "analytics.user_messages";
pub const META_ASSISTANT_MESSAGES: &str = "analytics.assistant_messages";
pub const META_CTA_CLICKS: &str = "analytics.cta_clicks";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Storage key for a session. Lookups never use the session id on its own.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub tenant_id: TenantId,
    pub session_id: SessionId,
}

impl SessionKey {
    pub fn new(tenant_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self { tenant_id: TenantId(tenant_id.into()), session_id: SessionId(session_id.into()) }
    }
}

impl std::fmt::Display for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.tenant_id.0, self.session_id.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self { role: TurnRole::User, text: text.into(), at }
    }

    pub fn assistant(text: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self { role: TurnRole::Assistant, text: text.into(), at }
    }
}

/// Personal details the assistant captures and must not ask for twice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiField {
    FirstName,
    Email,
    Phone,
}

impl PiiField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstName => "first_name",
            Self::Email => "email",
            Self::Phone => "phone",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "first_name" => Some(Self::FirstName),
            "email" => Some(Self::Email),
            "phone" => Some(Self::Phone),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::FirstName => "first name",
            Self::Email => "email",
            Self::Phone => "phone number",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedField {
    pub value: String,
    pub confirmed: bool,
    pub locked_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockOutcome {
    Inserted,
    Unchanged,
    Overwritten,
}

impl LockOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrmLinkage {
    pub contact_id: Option<String>,
    pub deal_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub key: SessionKey,
    pub turns: Vec<Turn>,
    pub locked_fields: BTreeMap<String, LockedField>,
    pub crm: CrmLinkage,
    pub cta_cursor: Option<CtaNodeId>,
    pub introduced: bool,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn new(key: SessionKey, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key,
            turns: Vec::new(),
            locked_fields: BTreeMap::new(),
            crm: CrmLinkage::default(),
            cta_cursor: None,
            introduced: false,
            metadata: BTreeMap::new(),
            created_at: now,
            last_active_at: now,
            expires_at: now + ttl,
        }
    }

    pub fn tenant_id(&self) -> &TenantId {
        &self.key.tenant_id
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn refresh_expiry(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.last_active_at = now;
        self.expires_at = now + ttl;
    }

    /// Appends a turn and drops the oldest turns beyond `max_turns`.
    pub fn push_turn(&mut self, turn: Turn, max_turns: usize) {
        self.turns.push(turn);
        trim_turns(&mut self.turns, max_turns);
    }

    pub fn lock_field(
        &mut self,
        field: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> LockOutcome {
        let value = value.trim();
        match self.locked_fields.get_mut(field) {
            Some(existing) if existing.value == value => LockOutcome::Unchanged,
            Some(existing) => {
                existing.value = value.to_string();
                existing.confirmed = false;
                existing.locked_at = now;
                LockOutcome::Overwritten
            }
            None => {
                self.locked_fields.insert(
                    field.to_string(),
                    LockedField { value: value.to_string(), confirmed: false, locked_at: now },
                );
                LockOutcome::Inserted
            }
        }
    }

    pub fn is_locked(&self, field: &str) -> bool {
        self.locked_fields.contains_key(field)
    }

    pub fn locked_value(&self, field: &str) -> Option<&str> {
        self.locked_fields.get(field).map(|locked| locked.value.as_str())
    }

    pub fn is_confirmed(&self, field: &str) -> bool {
        self.locked_fields.get(field).map(|locked| locked.confirmed).unwrap_or(false)
    }

    /// Returns `true` when the flag flipped.
    pub fn confirm_field(&mut self, field: &str) -> bool {
        match self.locked_fields.get_mut(field) {
            Some(locked) if !locked.confirmed => {
                locked.confirmed = true;
                true
            }
            _ => false,
        }
    }

    /// Clears conversational state for a restart. Captured details and CRM
    /// linkage are kept so the visitor is not asked for them again.
    pub fn reset_conversation(&mut self) {
        self.turns.clear();
        self.cta_cursor = None;
        self.introduced = false;
    }

    pub fn last_intent(&self) -> Option<Intent> {
        self.metadata.get(META_LAST_INTENT).and_then(Value::as_str).and_then(Intent::parse)
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.metadata.get(key).and_then(Value::as_u64).unwrap_or(0)
    }

    pub fn increment_counter(&mut self, key: &str) -> u64 {
        let next = self.counter(key).saturating_add(1);
        self.metadata.insert(key.to_string(), Value::from(next));
        next
    }
}

pub fn trim_turns(turns: &mut Vec<Turn>, max_turns: usize) {
    if turns.len() > max_turns {
        let overflow = turns.len() - max_turns;
        turns.drain(..overflow);
    }
}
