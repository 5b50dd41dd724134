use std::collections::HashMap;

use async_trait::async_trait;
use tracing::info;

use reflex_core::domain::context::RequestContext;
use reflex_core::domain::plan::BoundStep;
use reflex_core::domain::procedure::StepKind;
use reflex_core::errors::ApplicationError;

/// Result of one executed step.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub detail: Option<String>,
}

/// One side-effect adapter (SMS provider, CRM writer, task queue).
/// Executors are registered once at startup; idempotency of the underlying
/// action is the adapter's concern.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    fn kind(&self) -> &'static str;

    async fn execute(
        &self,
        step: &BoundStep,
        context: &RequestContext,
    ) -> Result<StepOutcome, ApplicationError>;
}

/// Executor lookup table, built at startup and handed to the orchestrator
/// by reference. There is no process-global registry.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<&'static str, Box<dyn ActionExecutor>>,
}

impl ExecutorRegistry {
    pub fn register<E>(&mut self, executor: E)
    where
        E: ActionExecutor + 'static,
    {
        self.executors.insert(executor.kind(), Box::new(executor));
    }

    /// A registry with a logging stand-in for every step kind.
    pub fn with_logging_defaults() -> Self {
        let mut registry = Self::default();
        for kind in [
            StepKind::SendSms,
            StepKind::SendEmail,
            StepKind::CreateTask,
            StepKind::LogInteraction,
            StepKind::UpdateField,
        ] {
            registry.register(LoggingExecutor::new(kind));
        }
        registry
    }

    pub fn get(&self, kind: StepKind) -> Option<&dyn ActionExecutor> {
        self.executors.get(kind.as_str()).map(|executor| executor.as_ref())
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Runs the steps in order, stopping at the first failure. An
    /// unregistered step kind is an execution failure, not a panic.
    pub async fn execute_plan(
        &self,
        steps: &[BoundStep],
        context: &RequestContext,
    ) -> Result<Vec<StepOutcome>, ApplicationError> {
        let mut outcomes = Vec::with_capacity(steps.len());
        for step in steps {
            let executor = self.get(step.kind).ok_or_else(|| {
                ApplicationError::Execution(format!(
                    "no executor registered for step kind `{}`",
                    step.kind.as_str()
                ))
            })?;
            outcomes.push(executor.execute(step, context).await?);
        }
        Ok(outcomes)
    }
}

/// Default collaborator stand-in: records the step instead of performing
/// it. Real deployments register provider-backed executors over it.
pub struct LoggingExecutor {
    kind: StepKind,
}

impl LoggingExecutor {
    pub fn new(kind: StepKind) -> Self {
        Self { kind }
    }
}

#[async_trait]
impl ActionExecutor for LoggingExecutor {
    fn kind(&self) -> &'static str {
        self.kind.as_str()
    }

    async fn execute(
        &self,
        step: &BoundStep,
        context: &RequestContext,
    ) -> Result<StepOutcome, ApplicationError> {
        info!(
            event_name = "executor.step_executed",
            step_kind = step.kind.as_str(),
            step_name = %step.name,
            tenant_id = %context.tenant_id.0,
            correlation_id = %context.correlation_id,
            "executed step"
        );
        Ok(StepOutcome { detail: Some(format!("logged {}", step.kind.as_str())) })
    }
}
