use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::domain::context::TenantId;
use crate::domain::procedure::ProcedureId;
use crate::domain::trace::TraceId;

/// Dimensions attached to every decision, success or failure. Operational
/// dashboards and the learning loop both key off these fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionDimensions {
    /// Empty string when no procedure was involved.
    pub procedure_id: String,
    pub procedure_version: Option<u32>,
    pub trace_id: TraceId,
    pub tenant_id: TenantId,
    pub replayed: bool,
    pub fallback: bool,
    pub override_required: bool,
}

impl DecisionDimensions {
    pub fn new(
        procedure: Option<(&ProcedureId, u32)>,
        trace_id: TraceId,
        tenant_id: TenantId,
        replayed: bool,
        fallback: bool,
        override_required: bool,
    ) -> Self {
        Self {
            procedure_id: procedure.map(|(id, _)| id.0.clone()).unwrap_or_default(),
            procedure_version: procedure.map(|(_, version)| version),
            trace_id,
            tenant_id,
            replayed,
            fallback,
            override_required,
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, dimensions: DecisionDimensions);
}

/// Production sink: one structured log line per decision, queryable by
/// the same fields a metrics backend would index.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, dimensions: DecisionDimensions) {
        tracing::info!(
            event_name = "telemetry.decision",
            procedure_id = %dimensions.procedure_id,
            procedure_version = dimensions.procedure_version.unwrap_or(0),
            trace_id = %dimensions.trace_id.0,
            tenant_id = %dimensions.tenant_id.0,
            replayed = dimensions.replayed,
            fallback = dimensions.fallback,
            override_required = dimensions.override_required,
            "decision telemetry"
        );
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTelemetrySink {
    records: Arc<Mutex<Vec<DecisionDimensions>>>,
}

impl InMemoryTelemetrySink {
    pub fn records(&self) -> Vec<DecisionDimensions> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl TelemetrySink for InMemoryTelemetrySink {
    fn record(&self, dimensions: DecisionDimensions) {
        match self.records.lock() {
            Ok(mut records) => records.push(dimensions),
            Err(poisoned) => poisoned.into_inner().push(dimensions),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::context::TenantId;
    use crate::domain::procedure::ProcedureId;
    use crate::domain::trace::TraceId;

    use super::{DecisionDimensions, InMemoryTelemetrySink, TelemetrySink};

    #[test]
    fn dimensions_without_procedure_use_empty_id() {
        let dimensions = DecisionDimensions::new(
            None,
            TraceId("tr-1".to_owned()),
            TenantId("t-1".to_owned()),
            false,
            false,
            false,
        );
        assert_eq!(dimensions.procedure_id, "");
        assert_eq!(dimensions.procedure_version, None);
    }

    #[test]
    fn sink_records_every_decision() {
        let sink = InMemoryTelemetrySink::default();
        sink.record(DecisionDimensions::new(
            Some((&ProcedureId("proc-1".to_owned()), 2)),
            TraceId("tr-1".to_owned()),
            TenantId("t-1".to_owned()),
            true,
            false,
            true,
        ));

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].procedure_id, "proc-1");
        assert_eq!(records[0].procedure_version, Some(2));
        assert!(records[0].replayed);
        assert!(records[0].override_required);
    }
}
