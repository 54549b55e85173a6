use std::sync::Arc;

use frontdesk_agent::crm::HttpConnectorResolver;
use frontdesk_agent::llm::OpenAiCompatibleModel;
use frontdesk_agent::retrieval::{HttpRetriever, Retriever};
use frontdesk_agent::runtime::{Orchestrator, OrchestratorParts, OrchestratorSettings};
use frontdesk_core::audit::TracingAuditSink;
use frontdesk_core::config::{AppConfig, ConfigError, LoadOptions};
use frontdesk_db::repositories::{SessionPolicy, SqlSessionStore, SqlTenantDirectory};
use frontdesk_db::{connect_with_config, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub orchestrator: Arc<Orchestrator>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let retriever = HttpRetriever::from_config(&config.retriever)
        .map(|retriever| Arc::new(retriever) as Arc<dyn Retriever>);
    info!(
        event_name = "system.bootstrap.collaborators",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        llm_model = %config.llm.model,
        retrieval_enabled = retriever.is_some(),
        "orchestrator collaborators configured"
    );

    let orchestrator = Orchestrator::new(
        OrchestratorParts {
            store: Arc::new(SqlSessionStore::new(
                db_pool.clone(),
                SessionPolicy::from_config(&config.session),
            )),
            tenants: Arc::new(SqlTenantDirectory::new(db_pool.clone())),
            model: Arc::new(OpenAiCompatibleModel::from_config(&config)),
            retriever,
            connectors: Arc::new(HttpConnectorResolver::default()),
            audit: Arc::new(TracingAuditSink),
        },
        OrchestratorSettings::from_config(&config),
    );

    Ok(Application { config, db_pool, orchestrator: Arc::new(orchestrator) })
}

#[cfg(test)]
mod tests {
    use frontdesk_core::config::{ConfigOverrides, LlmProvider, LoadOptions};

    use crate::bootstrap::bootstrap;

    fn overrides(database_url: &str) -> ConfigOverrides {
        ConfigOverrides {
            database_url: Some(database_url.to_string()),
            llm_provider: Some(LlmProvider::OpenAi),
            llm_api_key: Some("sk-test".to_string()),
            ..ConfigOverrides::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_llm_api_key() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                llm_api_key: Some("   ".to_string()),
                ..overrides("sqlite::memory:")
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("missing key must fail").to_string();
        assert!(message.contains("llm.api_key"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn bootstrap_migrates_session_and_tenant_tables() {
        let app = bootstrap(LoadOptions {
            overrides: overrides("sqlite::memory:?cache=shared"),
            ..LoadOptions::default()
        })
        .await
        .expect("bootstrap should succeed with valid overrides");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' \
             AND name IN ('tenant', 'chat_session', 'session_turn', 'session_locked_field')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables should exist after bootstrap");
        assert_eq!(table_count, 4);

        app.db_pool.close().await;
    }
}
