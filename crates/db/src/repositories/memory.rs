use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use reflex_core::domain::context::TenantId;
use reflex_core::domain::procedure::{Procedure, ProcedureId, ProcedureVersion};
use reflex_core::domain::trace::{DecisionTrace, TraceId};

use super::{ProcedureRepository, RepositoryError, TraceRepository, VersionStats};

#[derive(Default)]
pub struct InMemoryProcedureRepository {
    procedures: RwLock<HashMap<String, Procedure>>,
    versions: RwLock<Vec<ProcedureVersion>>,
}

#[async_trait]
impl ProcedureRepository for InMemoryProcedureRepository {
    async fn find_by_fingerprint(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
    ) -> Result<Option<Procedure>, RepositoryError> {
        let procedures = self.procedures.read().await;
        Ok(procedures
            .values()
            .find(|procedure| {
                procedure.tenant_id == *tenant_id && procedure.fingerprint == fingerprint
            })
            .cloned())
    }

    async fn find_active_versions(
        &self,
        tenant_id: &TenantId,
        fingerprint: &str,
    ) -> Result<Vec<(Procedure, ProcedureVersion)>, RepositoryError> {
        let Some(procedure) = self.find_by_fingerprint(tenant_id, fingerprint).await? else {
            return Ok(Vec::new());
        };

        let versions = self.versions.read().await;
        let mut matches: Vec<(Procedure, ProcedureVersion)> = versions
            .iter()
            .filter(|version| version.procedure_id == procedure.id && !version.deprecated)
            .map(|version| (procedure.clone(), version.clone()))
            .collect();
        matches.sort_by(|a, b| b.1.version.cmp(&a.1.version));
        Ok(matches)
    }

    async fn latest_version(
        &self,
        procedure_id: &ProcedureId,
    ) -> Result<Option<u32>, RepositoryError> {
        let versions = self.versions.read().await;
        Ok(versions
            .iter()
            .filter(|version| version.procedure_id == *procedure_id)
            .map(|version| version.version)
            .max())
    }

    async fn find_version_by_trace_id(
        &self,
        trace_id: &TraceId,
    ) -> Result<Option<ProcedureVersion>, RepositoryError> {
        let versions = self.versions.read().await;
        Ok(versions
            .iter()
            .find(|version| version.promoted_from_trace_id == *trace_id)
            .cloned())
    }

    async fn insert_procedure(&self, procedure: Procedure) -> Result<(), RepositoryError> {
        let mut procedures = self.procedures.write().await;
        procedures.insert(procedure.id.0.clone(), procedure);
        Ok(())
    }

    async fn insert_version(&self, version: ProcedureVersion) -> Result<(), RepositoryError> {
        let mut versions = self.versions.write().await;
        // Mirrors the schema's unique promoted_from_trace_id index, which
        // promotion relies on to detect a lost insert race.
        if versions
            .iter()
            .any(|existing| existing.promoted_from_trace_id == version.promoted_from_trace_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "a version was already promoted from trace `{}`",
                version.promoted_from_trace_id.0
            )));
        }
        versions.push(version);
        Ok(())
    }

    async fn deprecate_version(
        &self,
        procedure_id: &ProcedureId,
        version: u32,
    ) -> Result<bool, RepositoryError> {
        let mut versions = self.versions.write().await;
        let Some(target) = versions
            .iter_mut()
            .find(|candidate| candidate.procedure_id == *procedure_id && candidate.version == version)
        else {
            return Ok(false);
        };
        target.deprecated = true;
        Ok(true)
    }
}

#[derive(Default)]
pub struct InMemoryTraceRepository {
    traces: RwLock<HashMap<String, DecisionTrace>>,
}

#[async_trait]
impl TraceRepository for InMemoryTraceRepository {
    async fn append(&self, trace: DecisionTrace) -> Result<(), RepositoryError> {
        let mut traces = self.traces.write().await;
        traces.insert(trace.trace_id.0.clone(), trace);
        Ok(())
    }

    async fn find_by_id(
        &self,
        trace_id: &TraceId,
    ) -> Result<Option<DecisionTrace>, RepositoryError> {
        let traces = self.traces.read().await;
        Ok(traces.get(&trace_id.0).cloned())
    }

    async fn find_for_tenant(
        &self,
        trace_id: &TraceId,
        tenant_id: &TenantId,
    ) -> Result<Option<DecisionTrace>, RepositoryError> {
        let traces = self.traces.read().await;
        Ok(traces.get(&trace_id.0).filter(|trace| trace.tenant_id == *tenant_id).cloned())
    }

    async fn version_stats(
        &self,
        procedure_id: &ProcedureId,
        version: u32,
    ) -> Result<VersionStats, RepositoryError> {
        let traces = self.traces.read().await;
        let mut stats = VersionStats::default();
        for trace in traces.values() {
            let matches = trace.procedure_id.as_ref() == Some(procedure_id)
                && trace.procedure_version == Some(version);
            if !matches {
                continue;
            }
            stats.attempts += 1;
            if trace.execution_succeeded() {
                stats.successes += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;

    use reflex_core::domain::context::{
        Channel, OrgId, ParamValue, RequestContext, RiskBand, TenantId,
    };
    use reflex_core::domain::procedure::{
        Procedure, ProcedureId, ProcedureStep, ProcedureVersion, StepKind,
    };
    use reflex_core::domain::trace::{DecisionTrace, ExecutionResult, PlanSource, TraceId};
    use reflex_core::validation::ValidationOutcome;

    use crate::repositories::{
        InMemoryProcedureRepository, InMemoryTraceRepository, ProcedureRepository,
        RepositoryError, TraceRepository,
    };

    fn procedure(id: &str, fingerprint: &str) -> Procedure {
        Procedure {
            id: ProcedureId(id.to_owned()),
            tenant_id: TenantId("t-1".to_owned()),
            fingerprint: fingerprint.to_owned(),
            name: "renewal follow-up".to_owned(),
            created_at: Utc::now(),
        }
    }

    fn version(procedure_id: &str, version: u32, trace_id: &str) -> ProcedureVersion {
        ProcedureVersion {
            procedure_id: ProcedureId(procedure_id.to_owned()),
            version,
            steps: vec![ProcedureStep {
                kind: StepKind::SendSms,
                name: "send reminder".to_owned(),
                arg_template: BTreeMap::from([("to".to_owned(), "{{phone}}".to_owned())]),
            }],
            requires_validation: false,
            deprecated: false,
            promoted_from_trace_id: TraceId(trace_id.to_owned()),
            promoted_at: Utc::now(),
        }
    }

    fn trace(id: &str, procedure_id: &str, version: u32, success: bool) -> DecisionTrace {
        let context = RequestContext {
            tenant_id: TenantId("t-1".to_owned()),
            organization_id: OrgId("org-1".to_owned()),
            user_id: None,
            contact_id: None,
            action_type: "send-followup-sms".to_owned(),
            channel: Channel::Sms,
            industry: "insurance".to_owned(),
            risk_band: RiskBand::Standard,
            parameters: BTreeMap::from([(
                "phone".to_owned(),
                ParamValue::Text("+15550100".to_owned()),
            )]),
            overrides: BTreeMap::new(),
            occurred_at: None,
            correlation_id: "corr-1".to_owned(),
        };
        let execution = if success {
            ExecutionResult::success()
        } else {
            ExecutionResult::failure("execution_failed", "provider timeout")
        };
        DecisionTrace::record(
            TraceId(id.to_owned()),
            &context,
            "fp-1",
            PlanSource::Replay,
            Some(ProcedureId(procedure_id.to_owned())),
            Some(version),
            Vec::new(),
            &ValidationOutcome::allowed(),
            Some(execution),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn active_versions_exclude_deprecated_and_sort_newest_first() {
        let repo = InMemoryProcedureRepository::default();
        repo.insert_procedure(procedure("proc-1", "fp-1")).await.expect("insert procedure");
        repo.insert_version(version("proc-1", 1, "tr-a")).await.expect("insert v1");
        repo.insert_version(version("proc-1", 2, "tr-b")).await.expect("insert v2");
        repo.insert_version(version("proc-1", 3, "tr-c")).await.expect("insert v3");

        let deprecated = repo
            .deprecate_version(&ProcedureId("proc-1".to_owned()), 3)
            .await
            .expect("deprecate");
        assert!(deprecated);

        let active = repo
            .find_active_versions(&TenantId("t-1".to_owned()), "fp-1")
            .await
            .expect("find active");

        let versions: Vec<u32> = active.iter().map(|(_, v)| v.version).collect();
        assert_eq!(versions, vec![2, 1]);
    }

    #[tokio::test]
    async fn version_lookup_by_trace_id_supports_idempotent_promotion() {
        let repo = InMemoryProcedureRepository::default();
        repo.insert_procedure(procedure("proc-1", "fp-1")).await.expect("insert procedure");
        repo.insert_version(version("proc-1", 1, "tr-a")).await.expect("insert v1");

        let found = repo
            .find_version_by_trace_id(&TraceId("tr-a".to_owned()))
            .await
            .expect("lookup");
        assert_eq!(found.map(|v| v.version), Some(1));

        let missing = repo
            .find_version_by_trace_id(&TraceId("tr-z".to_owned()))
            .await
            .expect("lookup missing");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn duplicate_trace_promotion_is_rejected_on_insert() {
        let repo = InMemoryProcedureRepository::default();
        repo.insert_procedure(procedure("proc-1", "fp-1")).await.expect("insert procedure");
        repo.insert_version(version("proc-1", 1, "tr-a")).await.expect("insert v1");

        let duplicate = repo.insert_version(version("proc-1", 2, "tr-a")).await;
        assert!(matches!(duplicate, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn tenant_scoped_trace_lookup_misses_other_tenants() {
        let repo = InMemoryTraceRepository::default();
        repo.append(trace("tr-1", "proc-1", 1, true)).await.expect("append");

        let own = repo
            .find_for_tenant(&TraceId("tr-1".to_owned()), &TenantId("t-1".to_owned()))
            .await
            .expect("lookup");
        assert!(own.is_some());

        let foreign = repo
            .find_for_tenant(&TraceId("tr-1".to_owned()), &TenantId("t-2".to_owned()))
            .await
            .expect("lookup");
        assert!(foreign.is_none());
    }

    #[tokio::test]
    async fn version_stats_count_successes_and_attempts() {
        let repo = InMemoryTraceRepository::default();
        repo.append(trace("tr-1", "proc-1", 1, true)).await.expect("append");
        repo.append(trace("tr-2", "proc-1", 1, true)).await.expect("append");
        repo.append(trace("tr-3", "proc-1", 1, false)).await.expect("append");
        repo.append(trace("tr-4", "proc-1", 2, true)).await.expect("append");

        let stats = repo
            .version_stats(&ProcedureId("proc-1".to_owned()), 1)
            .await
            .expect("stats");

        assert_eq!(stats.attempts, 3);
        assert_eq!(stats.successes, 2);
    }
}
