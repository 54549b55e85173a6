use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::{SecondsFormat, Utc};
use frontdesk_db::DbPool;
use serde::Serialize;

/// Tables the session store and tenant directory read on every turn.
const REQUIRED_TABLES: [&str; 4] = ["tenant", "chat_session", "session_turn", "session_locked_field"];

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

impl HealthCheck {
    fn ready(detail: impl Into<String>) -> Self {
        Self { status: "ready", detail: detail.into() }
    }

    fn degraded(detail: impl Into<String>) -> Self {
        Self { status: "degraded", detail: detail.into() }
    }

    fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: HealthCheck,
    pub session_store: HealthCheck,
    pub checked_at: String,
}

pub fn router(db_pool: DbPool) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { db_pool })
}

/// Ready only when the database answers and the session schema is migrated;
/// otherwise 503 so load balancers stop routing chat turns here.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let session_store = if database.is_ready() {
        session_store_check(&state.db_pool).await
    } else {
        HealthCheck::degraded("skipped: database unreachable")
    };
    let ready = database.is_ready() && session_store.is_ready();

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        database,
        session_store,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(pool).await {
        Ok(_) => HealthCheck::ready("sqlite reachable"),
        Err(error) => HealthCheck::degraded(format!("sqlite query failed: {error}")),
    }
}

async fn session_store_check(pool: &DbPool) -> HealthCheck {
    let present = match sqlx::query_scalar::<_, String>(
        "SELECT name FROM sqlite_master WHERE type = 'table'",
    )
    .fetch_all(pool)
    .await
    {
        Ok(names) => names,
        Err(error) => return HealthCheck::degraded(format!("schema lookup failed: {error}")),
    };

    let missing = REQUIRED_TABLES
        .iter()
        .filter(|table| !present.iter().any(|name| name == *table))
        .copied()
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        return HealthCheck::degraded(format!(
            "migrations not applied; missing tables: {}",
            missing.join(", ")
        ));
    }

    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chat_session WHERE expires_at > ?")
        .bind(now)
        .fetch_one(pool)
        .await
    {
        Ok(live) => HealthCheck::ready(format!("schema migrated; {live} live session(s)")),
        Err(error) => HealthCheck::degraded(format!("session count failed: {error}")),
    }
}
