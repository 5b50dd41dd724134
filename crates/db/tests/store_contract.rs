use std::collections::BTreeMap;

use chrono::Utc;

use reflex_core::domain::context::{Channel, OrgId, ParamValue, RequestContext, RiskBand, TenantId};
use reflex_core::domain::plan::BoundStep;
use reflex_core::domain::procedure::{
    Procedure, ProcedureId, ProcedureStep, ProcedureVersion, StepKind,
};
use reflex_core::domain::trace::{DecisionTrace, ExecutionResult, PlanSource, TraceId};
use reflex_core::validation::ValidationOutcome;

use reflex_db::migrations::run_pending;
use reflex_db::repositories::{
    ProcedureRepository, SqlProcedureRepository, SqlTraceRepository, TraceRepository,
};
use reflex_db::{connect_with_settings, DbPool};

async fn pool() -> DbPool {
    let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
    run_pending(&pool).await.expect("run migrations");
    pool
}

fn procedure(id: &str, fingerprint: &str) -> Procedure {
    Procedure {
        id: ProcedureId(id.to_owned()),
        tenant_id: TenantId("t-1".to_owned()),
        fingerprint: fingerprint.to_owned(),
        name: "renewal follow-up".to_owned(),
        created_at: Utc::now(),
    }
}

fn version(procedure_id: &str, number: u32, trace_id: &str) -> ProcedureVersion {
    ProcedureVersion {
        procedure_id: ProcedureId(procedure_id.to_owned()),
        version: number,
        steps: vec![ProcedureStep {
            kind: StepKind::SendSms,
            name: "send reminder".to_owned(),
            arg_template: BTreeMap::from([
                ("to".to_owned(), "{{phone}}".to_owned()),
                ("body".to_owned(), "Hi {{first_name}}".to_owned()),
            ]),
        }],
        requires_validation: false,
        deprecated: false,
        promoted_from_trace_id: TraceId(trace_id.to_owned()),
        promoted_at: Utc::now(),
    }
}

fn request_context() -> RequestContext {
    RequestContext {
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
            ParamValue::Text("+1 555 010 0000".to_owned()),
        )]),
        overrides: BTreeMap::new(),
        occurred_at: None,
        correlation_id: "corr-1".to_owned(),
    }
}

fn trace(id: &str, procedure_id: Option<&str>, version: Option<u32>, success: bool) -> DecisionTrace {
    let execution = if success {
        ExecutionResult::success()
    } else {
        ExecutionResult::failure("execution_failed", "provider timeout")
    };
    let plan_source = if procedure_id.is_some() { PlanSource::Replay } else { PlanSource::Planned };
    DecisionTrace::record(
        TraceId(id.to_owned()),
        &request_context(),
        "fp-1",
        plan_source,
        procedure_id.map(|value| ProcedureId(value.to_owned())),
        version,
        vec![BoundStep {
            kind: StepKind::SendSms,
            name: "send reminder".to_owned(),
            args: BTreeMap::from([("to".to_owned(), "+1 555 010 0000".to_owned())]),
        }],
        &ValidationOutcome::allowed(),
        Some(execution),
        Utc::now(),
    )
}

#[tokio::test]
async fn procedure_versions_round_trip_through_sqlite() {
    let pool = pool().await;
    let repo = SqlProcedureRepository::new(pool);

    repo.insert_procedure(procedure("proc-1", "fp-1")).await.expect("insert procedure");
    repo.insert_version(version("proc-1", 1, "tr-a")).await.expect("insert v1");
    repo.insert_version(version("proc-1", 2, "tr-b")).await.expect("insert v2");

    let found = repo
        .find_by_fingerprint(&TenantId("t-1".to_owned()), "fp-1")
        .await
        .expect("find by fingerprint")
        .expect("procedure should exist");
    assert_eq!(found.name, "renewal follow-up");

    let latest = repo
        .latest_version(&ProcedureId("proc-1".to_owned()))
        .await
        .expect("latest version");
    assert_eq!(latest, Some(2));

    let active = repo
        .find_active_versions(&TenantId("t-1".to_owned()), "fp-1")
        .await
        .expect("active versions");
    assert_eq!(active.len(), 2);
    assert_eq!(active[0].1.version, 2, "newest version should sort first");
    assert_eq!(active[0].1.steps[0].kind, StepKind::SendSms);
    assert_eq!(active[0].1.steps[0].arg_template["to"], "{{phone}}");
}

#[tokio::test]
async fn tenants_do_not_see_each_others_procedures() {
    let pool = pool().await;
    let repo = SqlProcedureRepository::new(pool);

    repo.insert_procedure(procedure("proc-1", "fp-1")).await.expect("insert procedure");
    repo.insert_version(version("proc-1", 1, "tr-a")).await.expect("insert v1");

    let other_tenant = repo
        .find_active_versions(&TenantId("t-2".to_owned()), "fp-1")
        .await
        .expect("find for other tenant");
    assert!(other_tenant.is_empty());
}

#[tokio::test]
async fn deprecated_versions_are_excluded_from_replay_lookup() {
    let pool = pool().await;
    let repo = SqlProcedureRepository::new(pool);

    repo.insert_procedure(procedure("proc-1", "fp-1")).await.expect("insert procedure");
    repo.insert_version(version("proc-1", 1, "tr-a")).await.expect("insert v1");
    repo.insert_version(version("proc-1", 2, "tr-b")).await.expect("insert v2");

    let deprecated =
        repo.deprecate_version(&ProcedureId("proc-1".to_owned()), 2).await.expect("deprecate");
    assert!(deprecated);

    let active = repo
        .find_active_versions(&TenantId("t-1".to_owned()), "fp-1")
        .await
        .expect("active versions");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].1.version, 1);

    let missing =
        repo.deprecate_version(&ProcedureId("proc-1".to_owned()), 9).await.expect("deprecate");
    assert!(!missing, "deprecating an unknown version should report false");
}

#[tokio::test]
async fn promoted_trace_id_is_unique_across_versions() {
    let pool = pool().await;
    let repo = SqlProcedureRepository::new(pool);

    repo.insert_procedure(procedure("proc-1", "fp-1")).await.expect("insert procedure");
    repo.insert_version(version("proc-1", 1, "tr-a")).await.expect("insert v1");

    let duplicate = repo.insert_version(version("proc-1", 2, "tr-a")).await;
    assert!(duplicate.is_err(), "schema should reject re-promoting the same trace");

    let by_trace = repo
        .find_version_by_trace_id(&TraceId("tr-a".to_owned()))
        .await
        .expect("lookup by trace id")
        .expect("version should exist");
    assert_eq!(by_trace.version, 1);
}

#[tokio::test]
async fn traces_round_trip_with_redacted_parameters() {
    let pool = pool().await;
    let repo = SqlTraceRepository::new(pool);

    repo.append(trace("tr-1", None, None, true)).await.expect("append");

    let found = repo
        .find_by_id(&TraceId("tr-1".to_owned()))
        .await
        .expect("find trace")
        .expect("trace should exist");

    assert_eq!(found.plan_source, PlanSource::Planned);
    assert!(found.execution_succeeded());
    assert_eq!(
        found.parameters["phone"],
        ParamValue::Text("[redacted:phone]".to_owned()),
        "persisted parameters must be the redacted snapshot",
    );
    assert!(!found.content_hash.is_empty());
    assert_eq!(found.steps.len(), 1);
    assert_eq!(found.steps[0].args["to"], "[redacted:phone]");
}

#[tokio::test]
async fn trace_reads_are_tenant_scoped() {
    let pool = pool().await;
    let repo = SqlTraceRepository::new(pool);

    repo.append(trace("tr-1", None, None, true)).await.expect("append");

    let own = repo
        .find_for_tenant(&TraceId("tr-1".to_owned()), &TenantId("t-1".to_owned()))
        .await
        .expect("find for owning tenant");
    assert!(own.is_some());

    let foreign = repo
        .find_for_tenant(&TraceId("tr-1".to_owned()), &TenantId("t-2".to_owned()))
        .await
        .expect("find for other tenant");
    assert!(foreign.is_none(), "another tenant's trace id must read as a miss");
}

#[tokio::test]
async fn version_stats_aggregate_replay_outcomes() {
    let pool = pool().await;
    let repo = SqlTraceRepository::new(pool);

    repo.append(trace("tr-1", Some("proc-1"), Some(1), true)).await.expect("append");
    repo.append(trace("tr-2", Some("proc-1"), Some(1), false)).await.expect("append");
    repo.append(trace("tr-3", Some("proc-1"), Some(2), true)).await.expect("append");
    repo.append(trace("tr-4", None, None, true)).await.expect("append");

    let stats = repo
        .version_stats(&ProcedureId("proc-1".to_owned()), 1)
        .await
        .expect("stats");

    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.successes, 1);
}
