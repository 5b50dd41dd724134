use async_trait::async_trait;
use thiserror::Error;

use reflex_core::domain::context::TenantId;
use reflex_core::domain::procedure::{Procedure, ProcedureId, ProcedureVersion};
use reflex_core::domain::trace::{DecisionTrace, TraceId};

pub mod memory;
pub mod procedure;
pub mod trace;

pub use memory::{InMemoryProcedureRepository, InMemoryTraceRepository};
pub use procedure::SqlProcedureRepository;
pub use trace::SqlTraceRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

/// Execution statistics for one procedure version, derived from the
/// traces that replayed it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VersionStats {
    pub successes: u64,
    pub attempts: u64,
}

#[async_trait]
pub trait ProcedureRepository: Send + Sync {
    async fn find_by_fingerprint(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
    ) -> Result<Option<Procedure>, RepositoryError>;

    /// Non-deprecated versions for a tenant/fingerprint pair, newest
    /// version first.
    async fn find_active_versions(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
    ) -> Result<Vec<(Procedure, ProcedureVersion)>, RepositoryError>;

    async fn latest_version(
        &self,
        procedure_id: &ProcedureId,
    ) -> Result<Option<u32>, RepositoryError>;

    async fn find_version_by_trace_id(
        &self,
        trace_id: &TraceId,
    ) -> Result<Option<ProcedureVersion>, RepositoryError>;

    async fn insert_procedure(&self, procedure: Procedure) -> Result<(), RepositoryError>;

    async fn insert_version(&self, version: ProcedureVersion) -> Result<(), RepositoryError>;

    /// Marks a version deprecated. Returns false when the version does
    /// not exist.
    async fn deprecate_version(
        &self,
        procedure_id: &ProcedureId,
        version: u32,
    ) -> Result<bool, RepositoryError>;
}

#[async_trait]
pub trait TraceRepository: Send + Sync {
    async fn append(&self, trace: DecisionTrace) -> Result<(), RepositoryError>;

    /// Unscoped lookup for the internal promotion path, which already
    /// holds a trace id minted by this process. Caller-facing reads go
    /// through `find_for_tenant`.
    async fn find_by_id(&self, trace_id: &TraceId)
        -> Result<Option<DecisionTrace>, RepositoryError>;

    /// Tenant-scoped lookup: a trace id from another tenant is a miss,
    /// not a hit.
    async fn find_for_tenant(
        &self,
        trace_id: &TraceId,
        tenant_id: &TenantId,
    ) -> Result<Option<DecisionTrace>, RepositoryError>;

    async fn version_stats(
        &self,
        procedure_id: &ProcedureId,
        version: u32,
    ) -> Result<VersionStats, RepositoryError>;
}
