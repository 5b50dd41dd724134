pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod fingerprint;
pub mod pii;
pub mod telemetry;
pub mod validation;

pub use audit::{
    AuditCategory, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use config::{
    AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, PlannerProvider,
};
pub use domain::context::{
    Channel, ContactId, OrgId, ParamValue, RequestContext, RiskBand, TenantId, UserId,
};
pub use domain::plan::{BoundStep, PlanCandidate, PlannedExecution, ReplayPlan};
pub use domain::procedure::{
    Procedure, ProcedureId, ProcedureStep, ProcedureVersion, PromotionOptions, ReplayCandidate,
    StepKind,
};
pub use domain::trace::{DecisionTrace, ExecutionResult, PlanSource, TraceId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use fingerprint::{fingerprint, ContextFingerprint};
pub use telemetry::{
    DecisionDimensions, InMemoryTelemetrySink, TelemetrySink, TracingTelemetrySink,
};
pub use validation::guardrails::{
    GuardrailCheck, GuardrailConfig, GuardrailFinding, GuardrailSeverity, RecommendedAction,
};
pub use validation::relevance::{RelevanceDecision, RelevancePolicy};
pub use validation::{ValidationOutcome, ValidationPipeline, ValidationStage};
