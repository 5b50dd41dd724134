use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use reflex_core::domain::context::TenantId;
use reflex_core::domain::procedure::{Procedure, ProcedureId, ProcedureStep, ProcedureVersion};
use reflex_core::domain::trace::TraceId;

use super::{ProcedureRepository, RepositoryError};
use crate::DbPool;

pub struct SqlProcedureRepository {
    pool: DbPool,
}

impl SqlProcedureRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcedureRepository for SqlProcedureRepository {
    async fn find_by_fingerprint(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
    ) -> Result<Option<Procedure>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, fingerprint, name, created_at
            FROM procedures
            WHERE tenant_id = ? AND fingerprint = ?
            "#,
        )
        .bind(&tenant_id.0)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|value| procedure_from_row(&value)).transpose()
    }

    async fn find_active_versions(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
    ) -> Result<Vec<(Procedure, ProcedureVersion)>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT
                p.id, p.tenant_id, p.fingerprint, p.name, p.created_at,
                v.procedure_id, v.version, v.steps_json, v.requires_validation,
                v.deprecated, v.promoted_from_trace_id, v.promoted_at
            FROM procedures p
            JOIN procedure_versions v ON v.procedure_id = p.id
            WHERE p.tenant_id = ? AND p.fingerprint = ? AND v.deprecated = 0
            ORDER BY v.version DESC
            "#,
        )
        .bind(&tenant_id.0)
        .bind(fingerprint)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok((procedure_from_row(row)?, version_from_row(row)?)))
            .collect()
    }

    async fn latest_version(
        &self,
        procedure_id: &ProcedureId,
    ) -> Result<Option<u32>, RepositoryError> {
        let row = sqlx::query(
            "SELECT MAX(version) AS version FROM procedure_versions WHERE procedure_id = ?",
        )
        .bind(&procedure_id.0)
        .fetch_one(&self.pool)
        .await?;

        let version: Option<i64> = row.try_get("version")?;
        Ok(version.map(|value| value as u32))
    }

    async fn find_version_by_trace_id(
        &self,
        trace_id: &TraceId,
    ) -> Result<Option<ProcedureVersion>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT
                procedure_id, version, steps_json, requires_validation,
                deprecated, promoted_from_trace_id, promoted_at
            FROM procedure_versions
            WHERE promoted_from_trace_id = ?
            "#,
        )
        .bind(&trace_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|value| version_from_row(&value)).transpose()
    }

    async fn insert_procedure(&self, procedure: Procedure) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO procedures (id, tenant_id, fingerprint, name, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&procedure.id.0)
        .bind(&procedure.tenant_id.0)
        .bind(&procedure.fingerprint)
        .bind(&procedure.name)
        .bind(procedure.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn insert_version(&self, version: ProcedureVersion) -> Result<(), RepositoryError> {
        let steps_json = serde_json::to_string(&version.steps)
            .map_err(|err| RepositoryError::Decode(format!("encode procedure steps: {err}")))?;

        sqlx::query(
            r#"
            INSERT INTO procedure_versions (
                procedure_id, version, steps_json, requires_validation,
                deprecated, promoted_from_trace_id, promoted_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&version.procedure_id.0)
        .bind(version.version as i64)
        .bind(steps_json)
        .bind(version.requires_validation)
        .bind(version.deprecated)
        .bind(&version.promoted_from_trace_id.0)
        .bind(version.promoted_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn deprecate_version(
        &self,
        procedure_id: &ProcedureId,
        version: u32,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE procedure_versions SET deprecated = 1 WHERE procedure_id = ? AND version = ?",
        )
        .bind(&procedure_id.0)
        .bind(version as i64)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

fn procedure_from_row(row: &SqliteRow) -> Result<Procedure, RepositoryError> {
    Ok(Procedure {
        id: ProcedureId(row.try_get("id")?),
        tenant_id: TenantId(row.try_get("tenant_id")?),
        fingerprint: row.try_get("fingerprint")?,
        name: row.try_get("name")?,
        created_at: parse_rfc3339("procedure created_at", &row.try_get::<String, _>("created_at")?)?,
    })
}

fn version_from_row(row: &SqliteRow) -> Result<ProcedureVersion, RepositoryError> {
    let steps_json: String = row.try_get("steps_json")?;
    let steps: Vec<ProcedureStep> = serde_json::from_str(&steps_json)
        .map_err(|err| RepositoryError::Decode(format!("invalid procedure steps_json: {err}")))?;

    Ok(ProcedureVersion {
        procedure_id: ProcedureId(row.try_get("procedure_id")?),
        version: row.try_get::<i64, _>("version")? as u32,
        steps,
        requires_validation: row.try_get("requires_validation")?,
        deprecated: row.try_get("deprecated")?,
        promoted_from_trace_id: TraceId(row.try_get("promoted_from_trace_id")?),
        promoted_at: parse_rfc3339(
            "procedure version promoted_at",
            &row.try_get::<String, _>("promoted_at")?,
        )?,
    })
}

fn parse_rfc3339(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc)).map_err(|err| {
        RepositoryError::Decode(format!("invalid {} timestamp '{}': {}", field, value, err))
    })
}
