use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use reflex_core::domain::context::{OrgId, ParamValue, TenantId};
use reflex_core::domain::plan::BoundStep;
use reflex_core::domain::procedure::ProcedureId;
use reflex_core::domain::trace::{DecisionTrace, ExecutionResult, PlanSource, TraceId};

use super::{RepositoryError, TraceRepository, VersionStats};
use crate::DbPool;

pub struct SqlTraceRepository {
    pool: DbPool,
}

impl SqlTraceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TraceRepository for SqlTraceRepository {
    async fn append(&self, trace: DecisionTrace) -> Result<(), RepositoryError> {
        let parameters_json = serde_json::to_string(&trace.parameters)
            .map_err(|err| RepositoryError::Decode(format!("encode trace parameters: {err}")))?;
        let reasons_json = serde_json::to_string(&trace.validation_reasons)
            .map_err(|err| RepositoryError::Decode(format!("encode trace reasons: {err}")))?;
        let steps_json = serde_json::to_string(&trace.steps)
            .map_err(|err| RepositoryError::Decode(format!("encode trace steps: {err}")))?;

        sqlx::query(
            r#"
            INSERT INTO decision_traces (
                trace_id, tenant_id, organization_id, fingerprint, action_type,
                channel, parameters_json, plan_source, procedure_id,
                procedure_version, steps_json, allowed, override_required,
                validation_reasons_json, execution_success, failure_reason,
                reason_code, content_hash, correlation_id, occurred_at,
                completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&trace.trace_id.0)
        .bind(&trace.tenant_id.0)
        .bind(&trace.organization_id.0)
        .bind(&trace.fingerprint)
        .bind(&trace.action_type)
        .bind(&trace.channel)
        .bind(parameters_json)
        .bind(trace.plan_source.as_str())
        .bind(trace.procedure_id.as_ref().map(|id| id.0.as_str()))
        .bind(trace.procedure_version.map(|version| version as i64))
        .bind(steps_json)
        .bind(trace.allowed)
        .bind(trace.override_required)
        .bind(reasons_json)
        .bind(trace.execution.as_ref().map(|result| result.success))
        .bind(trace.execution.as_ref().and_then(|result| result.failure_reason.as_deref()))
        .bind(trace.execution.as_ref().and_then(|result| result.reason_code.as_deref()))
        .bind(&trace.content_hash)
        .bind(&trace.correlation_id)
        .bind(trace.occurred_at.to_rfc3339())
        .bind(trace.completed_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(
        &self,
        trace_id: &TraceId,
    ) -> Result<Option<DecisionTrace>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT
                trace_id, tenant_id, organization_id, fingerprint, action_type,
                channel, parameters_json, plan_source, procedure_id,
                procedure_version, steps_json, allowed, override_required,
                validation_reasons_json, execution_success, failure_reason,
                reason_code, content_hash, correlation_id, occurred_at,
                completed_at
            FROM decision_traces
            WHERE trace_id = ?
            "#,
        )
        .bind(&trace_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|value| trace_from_row(&value)).transpose()
    }

    async fn find_for_tenant(
        &self,
        trace_id: &TraceId,
        tenant_id: &TenantId,
    ) -> Result<Option<DecisionTrace>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT
                trace_id, tenant_id, organization_id, fingerprint, action_type,
                channel, parameters_json, plan_source, procedure_id,
                procedure_version, steps_json, allowed, override_required,
                validation_reasons_json, execution_success, failure_reason,
                reason_code, content_hash, correlation_id, occurred_at,
                completed_at
            FROM decision_traces
            WHERE trace_id = ? AND tenant_id = ?
            "#,
        )
        .bind(&trace_id.0)
        .bind(&tenant_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|value| trace_from_row(&value)).transpose()
    }

    async fn version_stats(
        &self,
        procedure_id: &ProcedureId,
        version: u32,
    ) -> Result<VersionStats, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS attempts,
                IFNULL(SUM(CASE WHEN execution_success = 1 THEN 1 ELSE 0 END), 0) AS successes
            FROM decision_traces
            WHERE procedure_id = ? AND procedure_version = ?
            "#,
        )
        .bind(&procedure_id.0)
        .bind(version as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(VersionStats {
            successes: row.try_get::<i64, _>("successes")? as u64,
            attempts: row.try_get::<i64, _>("attempts")? as u64,
        })
    }
}

fn trace_from_row(row: &SqliteRow) -> Result<DecisionTrace, RepositoryError> {
    let parameters_json: String = row.try_get("parameters_json")?;
    let parameters: BTreeMap<String, ParamValue> = serde_json::from_str(&parameters_json)
        .map_err(|err| RepositoryError::Decode(format!("invalid trace parameters_json: {err}")))?;

    let reasons_json: String = row.try_get("validation_reasons_json")?;
    let validation_reasons: Vec<String> = serde_json::from_str(&reasons_json).map_err(|err| {
        RepositoryError::Decode(format!("invalid trace validation_reasons_json: {err}"))
    })?;

    let steps_json: String = row.try_get("steps_json")?;
    let steps: Vec<BoundStep> = serde_json::from_str(&steps_json)
        .map_err(|err| RepositoryError::Decode(format!("invalid trace steps_json: {err}")))?;

    let plan_source_raw: String = row.try_get("plan_source")?;
    let plan_source = PlanSource::parse(&plan_source_raw).ok_or_else(|| {
        RepositoryError::Decode(format!("invalid trace plan_source: {plan_source_raw}"))
    })?;

    let execution = row.try_get::<Option<bool>, _>("execution_success")?.map(|success| {
        ExecutionResult {
            success,
            failure_reason: row.try_get("failure_reason").unwrap_or(None),
            reason_code: row.try_get("reason_code").unwrap_or(None),
        }
    });

    Ok(DecisionTrace {
        trace_id: TraceId(row.try_get("trace_id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        organization_id: OrgId(row.try_get("organization_id")?),
        fingerprint: row.try_get("fingerprint")?,
        action_type: row.try_get("action_type")?,
        channel: row.try_get("channel")?,
        parameters,
        plan_source,
        procedure_id: row.try_get::<Option<String>, _>("procedure_id")?.map(ProcedureId),
        procedure_version: row
            .try_get::<Option<i64>, _>("procedure_version")?
            .map(|value| value as u32),
        steps,
        allowed: row.try_get("allowed")?,
        override_required: row.try_get("override_required")?,
        validation_reasons,
        execution,
        content_hash: row.try_get("content_hash")?,
        correlation_id: row.try_get("correlation_id")?,
        occurred_at: parse_rfc3339("trace occurred_at", &row.try_get::<String, _>("occurred_at")?)?,
        completed_at: parse_rfc3339(
            "trace completed_at",
            &row.try_get::<String, _>("completed_at")?,
        )?,
    })
}

fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc)).map_err(|err| {
        RepositoryError::Decode(format!("invalid {} timestamp '{}': {}", field, value, err))
    })
}
