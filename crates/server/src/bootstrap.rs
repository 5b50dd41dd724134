use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use reflex_agent::executor::ExecutorRegistry;
use reflex_agent::memory::ProceduralMemoryService;
use reflex_agent::orchestrator::Orchestrator;
use reflex_agent::planner::HeuristicPlanner;
use reflex_core::audit::TracingAuditSink;
use reflex_core::config::{AppConfig, ConfigError, LoadOptions};
use reflex_core::telemetry::TracingTelemetrySink;
use reflex_core::validation::relevance::RelevancePolicy;
use reflex_core::validation::ValidationPipeline;
use reflex_db::repositories::{SqlProcedureRepository, SqlTraceRepository};
use reflex_db::{connect, migrations, DbPool};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub memory: Arc<ProceduralMemoryService>,
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

    let db_pool = connect(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    let applied = migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        applied,
        "database migrations applied"
    );

    let memory = Arc::new(ProceduralMemoryService::new(
        Arc::new(SqlProcedureRepository::new(db_pool.clone())),
        Arc::new(SqlTraceRepository::new(db_pool.clone())),
        Arc::new(TracingAuditSink),
    ));
    // TODO: remote planner gateways (openai, anthropic) land with the HTTP
    // client integration; until then every provider runs the deterministic
    // planner behind the same trait.
    let orchestrator = Arc::new(Orchestrator::new(
        memory.clone(),
        Arc::new(HeuristicPlanner::new()),
        Arc::new(ExecutorRegistry::with_logging_defaults()),
        ValidationPipeline::new(RelevancePolicy::default(), config.validation.guardrail_config()),
        Arc::new(TracingAuditSink),
        Arc::new(TracingTelemetrySink),
        Duration::from_secs(config.planner.timeout_secs),
    ));

    Ok(Application { config, db_pool, memory, orchestrator })
}
