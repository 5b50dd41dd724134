use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::commands::CommandResult;
use reflex_agent::executor::ExecutorRegistry;
use reflex_agent::memory::ProceduralMemoryService;
use reflex_agent::orchestrator::{DecisionResponse, Orchestrator};
use reflex_agent::planner::HeuristicPlanner;
use reflex_core::audit::TracingAuditSink;
use reflex_core::config::{AppConfig, LoadOptions};
use reflex_core::domain::context::RequestContext;
use reflex_core::telemetry::TracingTelemetrySink;
use reflex_core::validation::relevance::RelevancePolicy;
use reflex_core::validation::ValidationPipeline;
use reflex_db::repositories::{SqlProcedureRepository, SqlTraceRepository};
use reflex_db::{connect, migrations};

pub fn run(context_path: &Path) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "decide",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let raw = match fs::read_to_string(context_path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "decide",
                "context_file",
                format!("could not read `{}`: {error}", context_path.display()),
                6,
            );
        }
    };
    let context: RequestContext = match serde_json::from_str(&raw) {
        Ok(context) => context,
        Err(error) => {
            return CommandResult::failure(
                "decide",
                "context_parse",
                format!("invalid request context JSON: {error}"),
                6,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "decide",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let memory = Arc::new(ProceduralMemoryService::new(
            Arc::new(SqlProcedureRepository::new(pool.clone())),
            Arc::new(SqlTraceRepository::new(pool.clone())),
            Arc::new(TracingAuditSink),
        ));
        let orchestrator = Orchestrator::new(
            memory,
            Arc::new(HeuristicPlanner::new()),
            Arc::new(ExecutorRegistry::with_logging_defaults()),
            ValidationPipeline::new(
                RelevancePolicy::default(),
                config.validation.guardrail_config(),
            ),
            Arc::new(TracingAuditSink),
            Arc::new(TracingTelemetrySink),
            Duration::from_secs(config.planner.timeout_secs),
        );

        let response = orchestrator.decide(context).await;
        pool.close().await;
        Ok::<DecisionResponse, (&'static str, String, u8)>(response)
    });

    match result {
        Ok(response) => CommandResult::success("decide", render_response(&response)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("decide", error_class, message, exit_code)
        }
    }
}

fn render_response(response: &DecisionResponse) -> String {
    if response.result.success {
        format!(
            "decision {} executed (replayed={}, fallback={})",
            response.trace_id.0, response.replayed, response.fallback
        )
    } else {
        format!(
            "decision {} was not executed: {} ({})",
            response.trace_id.0,
            response.result.failure_reason.as_deref().unwrap_or("no reason recorded"),
            response.result.reason_code.as_deref().unwrap_or("unknown"),
        )
    }
}
