use chrono::Utc;
use frontdesk_core::domain::session::SessionKey;
use frontdesk_db::repositories::{SessionPolicy, SessionStore, SqlSessionStore};

use crate::commands::{with_database, CommandResult};

pub fn purge_expired() -> CommandResult {
    let result = with_database("sessions purge-expired", |pool| async move {
        SqlSessionStore::new(pool, SessionPolicy::default())
            .purge_expired(Utc::now())
            .await
            .map_err(|error| ("purge", error.to_string(), 8u8))
    });

    match result {
        Ok(purged) => CommandResult::success(
            "sessions purge-expired",
            format!("purged {purged} expired session(s)"),
        ),
        Err(failure) => failure,
    }
}

pub fn purge(tenant_id: &str, session_id: &str) -> CommandResult {
    let (tenant_id, session_id) = (tenant_id.trim(), session_id.trim());
    if tenant_id.is_empty() || session_id.is_empty() {
        return CommandResult::failure(
            "sessions purge",
            "invalid_arguments",
            "--tenant and --session must not be empty",
            2,
        );
    }

    let key = SessionKey::new(tenant_id, session_id);
    let result = with_database("sessions purge", |pool| {
        let key = key.clone();
        async move {
            SqlSessionStore::new(pool, SessionPolicy::default())
                .purge(&key)
                .await
                .map_err(|error| ("purge", error.to_string(), 8u8))
        }
    });

    match result {
        Ok(true) => CommandResult::success("sessions purge", format!("purged session {key}")),
        Ok(false) => {
            CommandResult::success("sessions purge", format!("no stored session for {key}"))
        }
        Err(failure) => failure,
    }
}
