use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::{Row, SqliteConnection};

use frontdesk_core::domain::cta::CtaNodeId;
use frontdesk_core::domain::session::{
    trim_turns, CrmLinkage, LockOutcome, LockedField, Session, SessionKey, Turn, TurnRole,
};

use super::{RepositoryError, SessionPolicy, SessionStore};
use crate::DbPool;

pub struct SqlSessionStore {
    pool: DbPool,
    policy: SessionPolicy,
}

impl SqlSessionStore {
    pub fn new(pool: DbPool, policy: SessionPolicy) -> Self {
        Self { pool, policy }
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    async fn fetch(&self, key: &SessionKey) -> Result<Option<Session>, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT tenant_id, session_id, contact_id, deal_id, cta_cursor, introduced,
                    metadata_json, created_at, last_active_at, expires_at
             FROM chat_session WHERE tenant_id = ? AND session_id = ?",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let mut session = row_to_session(&row)?;

        let turn_rows = sqlx::query(
            "SELECT role, text, created_at FROM session_turn
             WHERE tenant_id = ? AND session_id = ? ORDER BY id ASC",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .fetch_all(&mut *tx)
        .await?;
        session.turns = turn_rows.iter().map(row_to_turn).collect::<Result<Vec<_>, _>>()?;

        let field_rows = sqlx::query(
            "SELECT field, value, confirmed, locked_at FROM session_locked_field
             WHERE tenant_id = ? AND session_id = ?",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .fetch_all(&mut *tx)
        .await?;
        for field_row in &field_rows {
            let (field, locked) = row_to_locked_field(field_row)?;
            session.locked_fields.insert(field, locked);
        }

        tx.commit().await?;
        Ok(Some(session))
    }

    async fn ensure_row(
        &self,
        conn: &mut SqliteConnection,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let now_str = timestamp(now);
        sqlx::query(
            "INSERT INTO chat_session (tenant_id, session_id, metadata_json, created_at,
                                       last_active_at, expires_at)
             VALUES (?, ?, '{}', ?, ?, ?)
             ON CONFLICT(tenant_id, session_id) DO NOTHING",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .bind(&now_str)
        .bind(&now_str)
        .bind(timestamp(self.policy.expires_at(now)))
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn refresh(
        &self,
        conn: &mut SqliteConnection,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE chat_session SET last_active_at = ?, expires_at = ?
             WHERE tenant_id = ? AND session_id = ?",
        )
        .bind(timestamp(now))
        .bind(timestamp(self.policy.expires_at(now)))
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Runs one column update plus the expiry refresh as a single transaction.
    async fn update_column(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
        sql: &'static str,
        value: Option<String>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        self.ensure_row(&mut tx, key, now).await?;
        sqlx::query(sql)
            .bind(value)
            .bind(key.tenant_id.as_str())
            .bind(key.session_id.as_str())
            .execute(&mut *tx)
            .await?;
        self.refresh(&mut tx, key, now).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for SqlSessionStore {
    async fn get_or_create(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Session, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM chat_session WHERE tenant_id = ? AND session_id = ? AND expires_at <= ?",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await?;
        self.ensure_row(&mut tx, key, now).await?;
        tx.commit().await?;

        self.fetch(key).await?.ok_or_else(|| {
            RepositoryError::Decode(format!("session {key} missing right after creation"))
        })
    }

    async fn load(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, RepositoryError> {
        Ok(self.fetch(key).await?.filter(|session| !session.is_expired(now)))
    }

    async fn save(&self, session: &Session, now: DateTime<Utc>) -> Result<(), RepositoryError> {
        let key = &session.key;
        let metadata = serde_json::to_string(&session.metadata)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let mut turns = session.turns.clone();
        trim_turns(&mut turns, self.policy.max_history_turns);

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO chat_session (tenant_id, session_id, contact_id, deal_id, cta_cursor,
                                       introduced, metadata_json, created_at, last_active_at,
                                       expires_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id, session_id) DO UPDATE SET
                 contact_id = excluded.contact_id,
                 deal_id = excluded.deal_id,
                 cta_cursor = excluded.cta_cursor,
                 introduced = excluded.introduced,
                 metadata_json = excluded.metadata_json,
                 last_active_at = excluded.last_active_at,
                 expires_at = excluded.expires_at",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .bind(&session.crm.contact_id)
        .bind(&session.crm.deal_id)
        .bind(session.cta_cursor.as_ref().map(|cursor| cursor.0.clone()))
        .bind(i64::from(session.introduced))
        .bind(metadata)
        .bind(timestamp(session.created_at))
        .bind(timestamp(now))
        .bind(timestamp(self.policy.expires_at(now)))
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM session_turn WHERE tenant_id = ? AND session_id = ?")
            .bind(key.tenant_id.as_str())
            .bind(key.session_id.as_str())
            .execute(&mut *tx)
            .await?;
        for turn in &turns {
            insert_turn(&mut tx, key, turn).await?;
        }

        sqlx::query("DELETE FROM session_locked_field WHERE tenant_id = ? AND session_id = ?")
            .bind(key.tenant_id.as_str())
            .bind(key.session_id.as_str())
            .execute(&mut *tx)
            .await?;
        for (field, locked) in &session.locked_fields {
            sqlx::query(
                "INSERT INTO session_locked_field (tenant_id, session_id, field, value,
                                                   confirmed, locked_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(key.tenant_id.as_str())
            .bind(key.session_id.as_str())
            .bind(field)
            .bind(&locked.value)
            .bind(i64::from(locked.confirmed))
            .bind(timestamp(locked.locked_at))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn touch_ttl(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        self.refresh(&mut conn, key, now).await
    }

    async fn lock_field(
        &self,
        key: &SessionKey,
        field: &str,
        value: &str,
        now: DateTime<Utc>,
    ) -> Result<LockOutcome, RepositoryError> {
        let value = value.trim();
        let mut tx = self.pool.begin().await?;
        self.ensure_row(&mut tx, key, now).await?;

        let existing: Option<String> = sqlx::query_scalar(
            "SELECT value FROM session_locked_field
             WHERE tenant_id = ? AND session_id = ? AND field = ?",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .bind(field)
        .fetch_optional(&mut *tx)
        .await?;
        let outcome = match existing {
            None => LockOutcome::Inserted,
            Some(previous) if previous == value => LockOutcome::Unchanged,
            Some(_) => LockOutcome::Overwritten,
        };

        // Same value keeps the confirmation; a new value must be confirmed again.
        sqlx::query(
            "INSERT INTO session_locked_field (tenant_id, session_id, field, value, confirmed,
                                               locked_at)
             VALUES (?, ?, ?, ?, 0, ?)
             ON CONFLICT(tenant_id, session_id, field) DO UPDATE SET
                 confirmed = CASE WHEN session_locked_field.value = excluded.value
                                  THEN session_locked_field.confirmed ELSE 0 END,
                 locked_at = CASE WHEN session_locked_field.value = excluded.value
                                  THEN session_locked_field.locked_at
                                  ELSE excluded.locked_at END,
                 value = excluded.value",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .bind(field)
        .bind(value)
        .bind(timestamp(now))
        .execute(&mut *tx)
        .await?;

        self.refresh(&mut tx, key, now).await?;
        tx.commit().await?;
        Ok(outcome)
    }

    async fn is_locked(&self, key: &SessionKey, field: &str) -> Result<bool, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM session_locked_field
             WHERE tenant_id = ? AND session_id = ? AND field = ?",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .bind(field)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    async fn confirm_fields(
        &self,
        key: &SessionKey,
        fields: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for field in fields {
            sqlx::query(
                "UPDATE session_locked_field SET confirmed = 1
                 WHERE tenant_id = ? AND session_id = ? AND field = ?",
            )
            .bind(key.tenant_id.as_str())
            .bind(key.session_id.as_str())
            .bind(field)
            .execute(&mut *tx)
            .await?;
        }
        self.refresh(&mut tx, key, now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn append_turns(
        &self,
        key: &SessionKey,
        turns: &[Turn],
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        self.ensure_row(&mut tx, key, now).await?;
        for turn in turns {
            insert_turn(&mut tx, key, turn).await?;
        }

        let cap = i64::try_from(self.policy.max_history_turns).unwrap_or(i64::MAX);
        sqlx::query(
            "DELETE FROM session_turn
             WHERE tenant_id = ? AND session_id = ?
               AND id NOT IN (
                   SELECT id FROM session_turn
                   WHERE tenant_id = ? AND session_id = ?
                   ORDER BY id DESC LIMIT ?
               )",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .bind(cap)
        .execute(&mut *tx)
        .await?;

        self.refresh(&mut tx, key, now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update_crm_linkage(
        &self,
        key: &SessionKey,
        linkage: &CrmLinkage,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        self.ensure_row(&mut tx, key, now).await?;
        sqlx::query(
            "UPDATE chat_session
             SET contact_id = COALESCE(?, contact_id), deal_id = COALESCE(?, deal_id)
             WHERE tenant_id = ? AND session_id = ?",
        )
        .bind(&linkage.contact_id)
        .bind(&linkage.deal_id)
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .execute(&mut *tx)
        .await?;
        self.refresh(&mut tx, key, now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn set_cta_cursor(
        &self,
        key: &SessionKey,
        cursor: Option<&CtaNodeId>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.update_column(
            key,
            now,
            "UPDATE chat_session SET cta_cursor = ? WHERE tenant_id = ? AND session_id = ?",
            cursor.map(|cursor| cursor.0.clone()),
        )
        .await
    }

    async fn mark_introduced(
        &self,
        key: &SessionKey,
        introduced: bool,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.update_column(
            key,
            now,
            "UPDATE chat_session SET introduced = CAST(? AS INTEGER)
             WHERE tenant_id = ? AND session_id = ?",
            Some(i64::from(introduced).to_string()),
        )
        .await
    }

    async fn set_metadata(
        &self,
        key: &SessionKey,
        entries: &BTreeMap<String, Value>,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        if entries.is_empty() {
            return Ok(());
        }
        let patch = serde_json::to_string(entries)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        self.update_column(
            key,
            now,
            "UPDATE chat_session SET metadata_json = json_patch(metadata_json, ?)
             WHERE tenant_id = ? AND session_id = ?",
            Some(patch),
        )
        .await
    }

    async fn increment_counter(
        &self,
        key: &SessionKey,
        counter: &str,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let path = format!("$.\"{}\"", counter.replace('"', ""));
        let mut tx = self.pool.begin().await?;
        self.ensure_row(&mut tx, key, now).await?;
        sqlx::query(
            "UPDATE chat_session
             SET metadata_json = json_set(
                 metadata_json, ?1, COALESCE(json_extract(metadata_json, ?1), 0) + 1)
             WHERE tenant_id = ?2 AND session_id = ?3",
        )
        .bind(path)
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .execute(&mut *tx)
        .await?;
        self.refresh(&mut tx, key, now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn reset_conversation(
        &self,
        key: &SessionKey,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        self.ensure_row(&mut tx, key, now).await?;
        sqlx::query("DELETE FROM session_turn WHERE tenant_id = ? AND session_id = ?")
            .bind(key.tenant_id.as_str())
            .bind(key.session_id.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE chat_session SET cta_cursor = NULL, introduced = 0
             WHERE tenant_id = ? AND session_id = ?",
        )
        .bind(key.tenant_id.as_str())
        .bind(key.session_id.as_str())
        .execute(&mut *tx)
        .await?;
        self.refresh(&mut tx, key, now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn purge(&self, key: &SessionKey) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM chat_session WHERE tenant_id = ? AND session_id = ?")
            .bind(key.tenant_id.as_str())
            .bind(key.session_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM chat_session WHERE expires_at <= ?")
            .bind(timestamp(now))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn insert_turn(
    conn: &mut SqliteConnection,
    key: &SessionKey,
    turn: &Turn,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO session_turn (tenant_id, session_id, role, text, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(key.tenant_id.as_str())
    .bind(key.session_id.as_str())
    .bind(turn.role.as_str())
    .bind(&turn.text)
    .bind(timestamp(turn.at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Fixed-width UTC timestamps so that string comparison in SQL matches
/// chronological order.
fn timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(column: &str, raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|value| value.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("{column}: {error}")))
}

fn decode<T>(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<T, RepositoryError>
where
    T: for<'r> sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column).map_err(|e| RepositoryError::Decode(e.to_string()))
}

fn row_to_session(row: &sqlx::sqlite::SqliteRow) -> Result<Session, RepositoryError> {
    let tenant_id: String = decode(row, "tenant_id")?;
    let session_id: String = decode(row, "session_id")?;
    let contact_id: Option<String> = decode(row, "contact_id")?;
    let deal_id: Option<String> = decode(row, "deal_id")?;
    let cta_cursor: Option<String> = decode(row, "cta_cursor")?;
    let introduced: i64 = decode(row, "introduced")?;
    let metadata_json: String = decode(row, "metadata_json")?;
    let created_at: String = decode(row, "created_at")?;
    let last_active_at: String = decode(row, "last_active_at")?;
    let expires_at: String = decode(row, "expires_at")?;

    let metadata: BTreeMap<String, Value> = serde_json::from_str(&metadata_json)
        .map_err(|error| RepositoryError::Decode(format!("metadata_json: {error}")))?;

    Ok(Session {
        key: SessionKey::new(tenant_id, session_id),
        turns: Vec::new(),
        locked_fields: BTreeMap::new(),
        crm: CrmLinkage { contact_id, deal_id },
        cta_cursor: cta_cursor.map(CtaNodeId),
        introduced: introduced != 0,
        metadata,
        created_at: parse_timestamp("created_at", &created_at)?,
        last_active_at: parse_timestamp("last_active_at", &last_active_at)?,
        expires_at: parse_timestamp("expires_at", &expires_at)?,
    })
}

fn row_to_turn(row: &sqlx::sqlite::SqliteRow) -> Result<Turn, RepositoryError> {
    let role: String = decode(row, "role")?;
    let text: String = decode(row, "text")?;
    let created_at: String = decode(row, "created_at")?;

    let role = TurnRole::parse(&role)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown turn role `{role}`")))?;
    Ok(Turn { role, text, at: parse_timestamp("created_at", &created_at)? })
}

fn row_to_locked_field(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<(String, LockedField), RepositoryError> {
    let field: String = decode(row, "field")?;
    let value: String = decode(row, "value")?;
    let confirmed: i64 = decode(row, "confirmed")?;
    let locked_at: String = decode(row, "locked_at")?;

    Ok((
        field,
        LockedField {
            value,
            confirmed: confirmed != 0,
            locked_at: parse_timestamp("locked_at", &locked_at)?,
        },
    ))
}
