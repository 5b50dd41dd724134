//! JSON API surface: one endpoint to run a decision, one to read back
//! the durable trace it produced.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use reflex_agent::memory::ProceduralMemoryService;
use reflex_agent::orchestrator::{DecisionResponse, Orchestrator};
use reflex_core::domain::context::{RequestContext, TenantId};
use reflex_core::domain::trace::{DecisionTrace, TraceId};
use reflex_core::errors::InterfaceError;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub memory: Arc<ProceduralMemoryService>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub correlation_id: String,
}

impl ErrorBody {
    fn from_interface(error: InterfaceError) -> (StatusCode, Json<Self>) {
        let status = match &error {
            InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = error.user_message();
        let correlation_id = match error {
            InterfaceError::BadRequest { correlation_id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id, .. }
            | InterfaceError::Internal { correlation_id, .. } => correlation_id,
        };
        (status, Json(Self { error: message, correlation_id }))
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/decisions", post(create_decision))
        .route("/v1/traces/{trace_id}", get(get_trace))
        .with_state(state)
}

/// A denial is a completed decision, not an error: the endpoint answers
/// 200 either way and the body carries the outcome.
async fn create_decision(
    State(state): State<AppState>,
    Json(context): Json<RequestContext>,
) -> Json<DecisionResponse> {
    Json(state.orchestrator.decide(context).await)
}

#[derive(Debug, Deserialize)]
struct TraceQuery {
    tenant_id: String,
}

/// Trace reads are tenant-scoped: a trace id belonging to another tenant
/// answers 404, indistinguishable from a trace that never existed.
async fn get_trace(
    State(state): State<AppState>,
    Path(trace_id): Path<String>,
    Query(query): Query<TraceQuery>,
) -> Result<Json<DecisionTrace>, (StatusCode, Json<ErrorBody>)> {
    let tenant_id = TenantId(query.tenant_id);
    match state.memory.find_trace(&TraceId(trace_id.clone()), &tenant_id).await {
        Ok(Some(trace)) => Ok(Json(trace)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorBody { error: "trace not found", correlation_id: trace_id }),
        )),
        Err(error) => Err(ErrorBody::from_interface(error.into_interface(trace_id))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use reflex_agent::executor::ExecutorRegistry;
    use reflex_agent::memory::ProceduralMemoryService;
    use reflex_agent::orchestrator::Orchestrator;
    use reflex_agent::planner::HeuristicPlanner;
    use reflex_core::audit::InMemoryAuditSink;
    use reflex_core::telemetry::InMemoryTelemetrySink;
    use reflex_core::validation::ValidationPipeline;
    use reflex_db::repositories::{InMemoryProcedureRepository, InMemoryTraceRepository};

    use super::{router, AppState};

    fn state() -> AppState {
        let memory = Arc::new(ProceduralMemoryService::new(
            Arc::new(InMemoryProcedureRepository::default()),
            Arc::new(InMemoryTraceRepository::default()),
            Arc::new(InMemoryAuditSink::default()),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            memory.clone(),
            Arc::new(HeuristicPlanner::new()),
            Arc::new(ExecutorRegistry::with_logging_defaults()),
            ValidationPipeline::default(),
            Arc::new(InMemoryAuditSink::default()),
            Arc::new(InMemoryTelemetrySink::default()),
            Duration::from_secs(5),
        ));
        AppState { orchestrator, memory }
    }

    fn decision_body() -> String {
        json!({
            "tenant_id": "t-api",
            "organization_id": "org-api",
            "user_id": "u-1",
            "contact_id": "c-1",
            "action_type": "send-followup-sms",
            "channel": "sms",
            "industry": "insurance",
            "risk_band": "standard",
            "parameters": {
                "phone": {"kind": "text", "value": "+15550100"},
                "body": {"kind": "text", "value": "Your renewal is due"}
            },
            "overrides": {},
            "occurred_at": "2026-08-28T10:00:00Z",
            "correlation_id": "corr-api-1"
        })
        .to_string()
    }

    async fn json_response(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        serde_json::from_slice(&bytes).expect("response should be JSON")
    }

    #[tokio::test]
    async fn decision_endpoint_runs_a_fresh_plan_and_persists_the_trace() {
        let state = state();
        let app = router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/decisions")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(decision_body()))
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::OK);
        let payload = json_response(response).await;
        assert_eq!(payload["replayed"], false);
        assert_eq!(payload["fallback"], false);
        assert_eq!(payload["result"]["success"], true);

        let trace_id = payload["trace_id"].as_str().expect("trace id").to_owned();
        let trace_response = router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/traces/{trace_id}?tenant_id=t-api"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(trace_response.status(), StatusCode::OK);
        let trace = json_response(trace_response).await;
        assert_eq!(trace["plan_source"], "planned");
        assert_eq!(trace["allowed"], true);
    }

    #[tokio::test]
    async fn another_tenant_cannot_read_the_trace() {
        let state = state();
        let app = router(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/decisions")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(decision_body()))
                    .expect("request"),
            )
            .await
            .expect("router response");
        let payload = json_response(response).await;
        let trace_id = payload["trace_id"].as_str().expect("trace id").to_owned();

        let foreign = router(state)
            .oneshot(
                Request::builder()
                    .uri(format!("/v1/traces/{trace_id}?tenant_id=t-other"))
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(foreign.status(), StatusCode::NOT_FOUND);
        let body = json_response(foreign).await;
        assert_eq!(body["error"], "trace not found");
    }

    #[tokio::test]
    async fn unknown_trace_returns_not_found() {
        let app = router(state());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/v1/traces/tr-missing?tenant_id=t-api")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("router response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let payload = json_response(response).await;
        assert_eq!(payload["error"], "trace not found");
        assert_eq!(payload["correlation_id"], "tr-missing");
    }
}
