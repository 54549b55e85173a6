use chrono::{SecondsFormat, Utc};
use sqlx::Row;

use frontdesk_core::domain::tenant::{TenantConfig, TenantId};

use super::{RepositoryError, TenantDirectory};
use crate::DbPool;

/// Tenant configurations stored as JSON documents, as written by the admin
/// collaborator.
pub struct SqlTenantDirectory {
    pool: DbPool,
}

impl SqlTenantDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_tenant(row: &sqlx::sqlite::SqliteRow) -> Result<TenantConfig, RepositoryError> {
    let config_json: String =
        row.try_get("config_json").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    serde_json::from_str(&config_json).map_err(|e| RepositoryError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl TenantDirectory for SqlTenantDirectory {
    async fn find(&self, tenant_id: &TenantId) -> Result<Option<TenantConfig>, RepositoryError> {
        let row = sqlx::query("SELECT config_json FROM tenant WHERE tenant_id = ?")
            .bind(tenant_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_tenant(r)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, config: &TenantConfig) -> Result<(), RepositoryError> {
        let config_json =
            serde_json::to_string(config).map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        sqlx::query(
            "INSERT INTO tenant (tenant_id, display_name, config_json, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(tenant_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 config_json = excluded.config_json,
                 updated_at = excluded.updated_at",
        )
        .bind(config.tenant_id.as_str())
        .bind(&config.display_name)
        .bind(config_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_ids(&self) -> Result<Vec<TenantId>, RepositoryError> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT tenant_id FROM tenant ORDER BY tenant_id")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(TenantId).collect())
    }
}
