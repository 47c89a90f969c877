//! Plan submission orchestration
//!
//! Drives one form submission end to end:
//! 1. Create or update the root plan resource
//! 2. Resolve sensitive areas of the flagged departments
//! 3. Reconcile and apply every association kind independently
//! 4. Aggregate per-kind outcomes into a [`SubmissionReport`]
//!
//! Only the root step can fail the submission. Association failures are
//! isolated per item and per kind, and re-submitting the same form converges
//! because reconciliation only issues what is still missing.

use crate::client::{AssociationEndpoint, SharedClient};
use crate::config::SyncConfig;
use crate::decode::plan_id as record_plan_id;
use crate::diff_sync::{reconcile_sets, DiffSyncEngine, ItemOutcome, SyncOp};
use crate::error::{RemoteError, SubmissionError};
use crate::loader::PlanAggregateLoader;
use crate::normalize::unwrap;
use crate::sensitive_area::{FlatResolution, SensitiveAreaResolver};
use crate::state_machine::{PhaseTrail, SubmissionPhase};
use crate::types::{
    AssociationKind, AssociationSet, ChecklistTemplateAssociation, CriterionAssociation, DepartmentAssociation,
    PlanForm, PlanId, ScheduleMilestone, SubmissionId, TeamMembership,
};
use futures::future::{BoxFuture, FutureExt};
use std::collections::{BTreeMap, BTreeSet};
use tracing::Instrument;

/// Result of reconciling one association kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindReport {
    /// Association kind
    pub kind: AssociationKind,
    /// Current-state load failure; no writes were issued when set
    pub load_error: Option<RemoteError>,
    /// Association task ended abnormally; outcomes are unknown when set
    pub interrupted: Option<String>,
    /// Outcome of every issued or skipped operation
    pub outcomes: Vec<ItemOutcome>,
    /// Keys replaced because their attributes changed
    pub replaced: usize,
}

impl KindReport {
    fn load_failed(kind: AssociationKind, error: RemoteError) -> Self {
        Self {
            kind,
            load_error: Some(error),
            interrupted: None,
            outcomes: Vec::new(),
            replaced: 0,
        }
    }

    fn interrupted(kind: AssociationKind, reason: String) -> Self {
        Self {
            kind,
            load_error: None,
            interrupted: Some(reason),
            outcomes: Vec::new(),
            replaced: 0,
        }
    }

    /// Check if the kind now matches the form
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.load_error.is_none() && self.interrupted.is_none() && self.outcomes.iter().all(ItemOutcome::is_success)
    }

    /// Number of operations of one direction
    #[must_use]
    pub fn count(&self, op: SyncOp) -> usize {
        self.outcomes.iter().filter(|o| o.op == op).count()
    }

    /// Operations that did not reach the desired state
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}

/// Overall result class of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionOutcome {
    /// Root and every association reached the desired state
    Succeeded,
    /// Root persisted; some associations failed
    PartiallySucceeded,
    /// Root step failed; nothing else was attempted
    Failed,
}

impl SubmissionOutcome {
    /// Classify a submission result
    #[must_use]
    pub fn of(result: &Result<SubmissionReport, SubmissionError>) -> Self {
        match result {
            Ok(report) => report.outcome(),
            Err(_) => Self::Failed,
        }
    }
}

/// Aggregated report of one submission
#[derive(Debug, Clone)]
pub struct SubmissionReport {
    /// Submission identifier (also on the tracing span)
    pub submission_id: SubmissionId,
    /// Plan the associations were written to
    pub plan_id: PlanId,
    /// Root resource was created by this submission
    pub created: bool,
    /// Per-kind results
    pub kinds: BTreeMap<AssociationKind, KindReport>,
    /// Sensitive-area labels that resolved to no unique catalog entry
    pub unmatched_sensitive_areas: BTreeSet<String>,
    /// Phases visited
    pub phases: Vec<SubmissionPhase>,
}

impl SubmissionReport {
    /// Overall result class
    ///
    /// Unmatched sensitive-area labels are reported but do not downgrade it.
    #[must_use]
    pub fn outcome(&self) -> SubmissionOutcome {
        if self.kinds.values().all(KindReport::is_success) {
            SubmissionOutcome::Succeeded
        } else {
            SubmissionOutcome::PartiallySucceeded
        }
    }

    /// Every failed or skipped operation
    pub fn failures(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.kinds.values().flat_map(KindReport::failures)
    }

    /// Kinds whose current state could not be loaded
    pub fn load_failures(&self) -> impl Iterator<Item = (AssociationKind, &RemoteError)> {
        self.kinds
            .values()
            .filter_map(|k| k.load_error.as_ref().map(|e| (k.kind, e)))
    }

    /// Number of operations of one direction across kinds
    #[must_use]
    pub fn count(&self, op: SyncOp) -> usize {
        self.kinds.values().map(|k| k.count(op)).sum()
    }
}

/// Submits plan forms to the remote service
#[derive(Clone)]
pub struct PlanSubmissionOrchestrator {
    client: SharedClient,
    loader: PlanAggregateLoader,
    engine: DiffSyncEngine,
    config: SyncConfig,
}

impl std::fmt::Debug for PlanSubmissionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanSubmissionOrchestrator")
            .field("loader", &self.loader)
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PlanSubmissionOrchestrator {
    /// Create orchestrator
    #[must_use]
    pub fn new(client: SharedClient, config: SyncConfig) -> Self {
        Self {
            loader: PlanAggregateLoader::new(client.clone(), config.clone()),
            engine: DiffSyncEngine::from_config(&config),
            client,
            config,
        }
    }

    /// With a loader sharing an existing summary cache
    #[inline]
    #[must_use]
    pub fn with_loader(mut self, loader: PlanAggregateLoader) -> Self {
        self.loader = loader;
        self
    }

    /// Loader used for current-state reads
    #[inline]
    #[must_use]
    pub fn loader(&self) -> &PlanAggregateLoader {
        &self.loader
    }

    /// Submit a plan form
    ///
    /// Without `existing_plan_id` the root plan is created and every
    /// association is added; with it the root is updated and each kind is
    /// reconciled against its current remote state.
    ///
    /// # Errors
    /// Only when the root step fails. Association failures are reported in
    /// the returned [`SubmissionReport`].
    pub async fn submit(
        &self,
        form: PlanForm,
        existing_plan_id: Option<PlanId>,
    ) -> Result<SubmissionReport, SubmissionError> {
        let submission_id = SubmissionId::new();
        let span = tracing::info_span!("submission", id = %submission_id);
        self.run(submission_id, form, existing_plan_id).instrument(span).await
    }

    async fn run(
        &self,
        submission_id: SubmissionId,
        form: PlanForm,
        existing_plan_id: Option<PlanId>,
    ) -> Result<SubmissionReport, SubmissionError> {
        let mut trail = PhaseTrail::new();
        trail.advance(SubmissionPhase::RootPersisting)?;

        let (plan_id, created) = match existing_plan_id {
            None => {
                tracing::info!("Creating plan '{}'", form.header.title);
                let response = match self.client.create_root_plan(&form.header).await {
                    Ok(response) => response,
                    Err(source) => return Err(root_failed(trail, source)),
                };
                // Some endpoints answer with the bare id
                let assigned = unwrap(&response)
                    .first()
                    .and_then(record_plan_id)
                    .or_else(|| PlanId::from_value(&response));
                match assigned {
                    Some(plan_id) => (plan_id, true),
                    None => {
                        trail.advance(SubmissionPhase::RootFailed)?;
                        tracing::error!("Plan created but response carried no id: {}", response);
                        return Err(SubmissionError::MissingPlanId(response.to_string()));
                    }
                }
            }
            Some(plan_id) => {
                tracing::info!("Updating plan {}", plan_id);
                if let Err(source) = self.client.update_root_plan(&plan_id, &form.header).await {
                    return Err(root_failed(trail, source));
                }
                (plan_id, false)
            }
        };

        trail.advance(SubmissionPhase::AssociationsSyncing)?;

        // Detached so the association phase finishes even if the caller
        // stops awaiting after the root exists
        let handle = tokio::spawn(
            self.clone()
                .sync_associations(plan_id.clone(), form, created)
                .instrument(tracing::Span::current()),
        );
        // The root exists, so a lost task is reported per kind, not as an error
        let (kinds, unmatched_sensitive_areas) = match handle.await {
            Ok(synced) => synced,
            Err(e) => {
                tracing::error!("Association phase of plan {} ended abnormally: {}", plan_id, e);
                let kinds = AssociationKind::ALL
                    .into_iter()
                    .map(|kind| (kind, KindReport::interrupted(kind, e.to_string())))
                    .collect();
                (kinds, BTreeSet::new())
            }
        };

        trail.advance(SubmissionPhase::Completed)?;
        let report = SubmissionReport {
            submission_id,
            plan_id,
            created,
            kinds,
            unmatched_sensitive_areas,
            phases: trail.into_visited(),
        };
        tracing::info!(
            "Submission {} for plan {} finished {:?}: {} adds, {} removes, {} failures",
            report.submission_id,
            report.plan_id,
            report.outcome(),
            report.count(SyncOp::Add),
            report.count(SyncOp::Remove),
            report.failures().count()
        );
        Ok(report)
    }

    /// Owned and boxed so it can run as a `'static` task
    fn sync_associations(
        self,
        plan_id: PlanId,
        form: PlanForm,
        created: bool,
    ) -> BoxFuture<'static, (BTreeMap<AssociationKind, KindReport>, BTreeSet<String>)> {
        async move {
            let (departments, unmatched) = self.desired_departments(&form).await;
            let criteria: AssociationSet<CriterionAssociation> =
                form.criteria.into_iter().map(CriterionAssociation::new).collect();
            let team: AssociationSet<TeamMembership> = form.team.into_iter().collect();
            let schedules: AssociationSet<ScheduleMilestone> = form.schedules.into_iter().collect();
            let templates: AssociationSet<ChecklistTemplateAssociation> = form
                .checklist_templates
                .into_iter()
                .map(ChecklistTemplateAssociation::new)
                .collect();

            let reports = futures::join!(
                self.sync_kind(&plan_id, departments, created),
                self.sync_kind(&plan_id, criteria, created),
                self.sync_kind(&plan_id, team, created),
                self.sync_kind(&plan_id, schedules, created),
                self.sync_kind(&plan_id, templates, created),
            );
            let kinds = [reports.0, reports.1, reports.2, reports.3, reports.4]
                .into_iter()
                .map(|report| (report.kind, report))
                .collect();
            (kinds, unmatched)
        }
        .boxed()
    }

    /// Build the desired department set, resolving sensitive areas
    ///
    /// Flat selections are resolved even without a flagged department to
    /// claim them; unclaimed ones are reported as unmatched.
    fn desired_departments<'a>(
        &'a self,
        form: &'a PlanForm,
    ) -> BoxFuture<'a, (AssociationSet<DepartmentAssociation>, BTreeSet<String>)> {
        async move {
            let needs_catalog = !form.sensitive_area_selections.is_empty()
                || form.departments.iter().any(|d| d.sensitive && !d.area_labels.is_empty());

            let resolution = if needs_catalog {
                match self.loader.master_data().await {
                    Ok((catalog, directory)) => SensitiveAreaResolver::new(&catalog, &directory)
                        .resolve_flat(&form.sensitive_area_selections, &form.departments),
                    Err(e) => {
                        tracing::warn!("Sensitive-area catalog unavailable, areas left unresolved: {}", e);
                        unresolved(form)
                    }
                }
            } else {
                FlatResolution::default()
            };

            let mut unmatched: BTreeSet<String> = resolution.unassigned;
            let mut per_department = resolution.per_department;
            let departments = form
                .departments
                .iter()
                .map(|selection| {
                    let base = DepartmentAssociation::new(selection.dept_id.clone());
                    if !selection.sensitive {
                        return base;
                    }
                    let resolved = per_department.remove(&selection.dept_id).unwrap_or_default();
                    unmatched.extend(resolved.unmatched_labels);
                    base.with_sensitive_areas(resolved.area_ids)
                        .with_labels(selection.area_labels.iter().cloned())
                })
                .collect();
            (departments, unmatched)
        }
        .boxed()
    }

    fn sync_kind<'a, T: AssociationEndpoint>(
        &'a self,
        plan_id: &'a PlanId,
        desired: AssociationSet<T>,
        created: bool,
    ) -> BoxFuture<'a, KindReport> {
        async move {
            let current = if created {
                AssociationSet::new()
            } else {
                match self.loader.load_kind::<T>(plan_id).await {
                    Ok(current) => current,
                    Err(e) => {
                        tracing::warn!("Skipping {} writes: current state unavailable: {}", T::KIND, e);
                        return KindReport::load_failed(T::KIND, e);
                    }
                }
            };

            let plan = reconcile_sets(&desired, &current, self.config.replace_on_attribute_change);
            tracing::debug!(
                "{} plan for {}: {} desired, {} current, +{} -{}",
                T::KIND,
                plan_id,
                desired.len(),
                current.len(),
                plan.to_add.len(),
                plan.to_remove.len()
            );
            let outcomes = self.engine.apply_to_remote(self.client.as_ref(), plan_id, &plan).await;
            KindReport {
                kind: T::KIND,
                load_error: None,
                interrupted: None,
                outcomes,
                replaced: plan.replaced.len(),
            }
        }
        .boxed()
    }
}

fn root_failed(mut trail: PhaseTrail, source: RemoteError) -> SubmissionError {
    tracing::error!("Root plan step failed: {}", source);
    if let Err(e) = trail.advance(SubmissionPhase::RootFailed) {
        return e;
    }
    SubmissionError::RootFailed {
        source,
        phases: trail.into_visited(),
    }
}

/// Every label unmatched, used when the catalog could not be fetched
fn unresolved(form: &PlanForm) -> FlatResolution {
    let mut resolution = FlatResolution::default();
    for dept in form.departments.iter().filter(|d| d.sensitive) {
        resolution
            .per_department
            .entry(dept.dept_id.clone())
            .or_default()
            .unmatched_labels
            .extend(dept.area_labels.iter().cloned());
    }
    resolution.unassigned.extend(form.sensitive_area_selections.iter().cloned());
    resolution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockRemotePlanClient;
    use crate::types::{DepartmentSelection, PlanHeader};
    use serde_json::json;
    use std::sync::Arc;

    fn form() -> PlanForm {
        PlanForm::new(PlanHeader::new("FY24 IT audit"))
            .with_department(DepartmentSelection::new("1"))
            .with_criterion("c1")
            .with_member(TeamMembership::new("u1", "Lead").as_lead())
    }

    fn orchestrator(client: MockRemotePlanClient) -> PlanSubmissionOrchestrator {
        PlanSubmissionOrchestrator::new(Arc::new(client), SyncConfig::default())
    }

    #[tokio::test]
    async fn root_failure_issues_no_association_calls() {
        let mut client = MockRemotePlanClient::new();
        client
            .expect_create_root_plan()
            .times(1)
            .returning(|_| Err(RemoteError::rejected(500, "boom")));
        client.expect_add_department().never();
        client.expect_add_criterion().never();
        client.expect_add_team_member().never();
        client.expect_list_departments().never();

        let result = orchestrator(client).submit(form(), None).await;

        assert_eq!(SubmissionOutcome::of(&result), SubmissionOutcome::Failed);
        match result {
            Err(SubmissionError::RootFailed { phases, .. }) => assert_eq!(
                phases,
                vec![
                    SubmissionPhase::Idle,
                    SubmissionPhase::RootPersisting,
                    SubmissionPhase::RootFailed
                ]
            ),
            other => panic!("expected root failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_response_without_id_is_root_failure() {
        let mut client = MockRemotePlanClient::new();
        client
            .expect_create_root_plan()
            .returning(|_| Ok(json!({"message": "created"})));
        client.expect_add_department().never();

        let err = orchestrator(client).submit(form(), None).await.unwrap_err();
        assert!(matches!(err, SubmissionError::MissingPlanId(_)));
        assert!(err.root_may_exist());
    }

    #[tokio::test]
    async fn create_adds_everything_without_loading() {
        let mut client = MockRemotePlanClient::new();
        client
            .expect_create_root_plan()
            .returning(|_| Ok(json!({"$values": [{"auditPlanId": 77}]})));
        client
            .expect_add_department()
            .withf(|plan_id, dept| plan_id.as_str() == "77" && dept.dept_id.as_str() == "1")
            .times(1)
            .returning(|_, _| Ok(()));
        client.expect_add_criterion().times(1).returning(|_, _| Ok(()));
        client.expect_add_team_member().times(1).returning(|_, _| Ok(()));
        client.expect_list_departments().never();
        client.expect_list_criteria().never();

        let report = orchestrator(client).submit(form(), None).await.unwrap();

        assert!(report.created);
        assert_eq!(report.plan_id, PlanId::from("77"));
        assert_eq!(report.outcome(), SubmissionOutcome::Succeeded);
        assert_eq!(report.count(SyncOp::Add), 3);
        assert_eq!(report.count(SyncOp::Remove), 0);
        assert_eq!(report.phases.last(), Some(&SubmissionPhase::Completed));
    }

    #[tokio::test]
    async fn failed_current_load_skips_that_kind_only() {
        let mut client = MockRemotePlanClient::new();
        client.expect_update_root_plan().returning(|_, _| Ok(()));
        client.expect_list_departments().returning(|_| Ok(json!([{"deptId": 1}, {"deptId": 2}])));
        client
            .expect_remove_department()
            .withf(|_, dept_id| dept_id.as_str() == "2")
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_list_criteria()
            .returning(|_| Err(RemoteError::Transport("timeout".into())));
        client.expect_add_criterion().never();
        client.expect_list_team().returning(|_| Ok(json!([{"userId": "u1", "role": "Lead", "isLead": true}])));
        client.expect_list_schedules().returning(|_| Ok(json!([])));
        client.expect_list_checklist_templates().returning(|_| Ok(json!({"values": []})));

        let report = orchestrator(client)
            .submit(form(), Some(PlanId::from("9")))
            .await
            .unwrap();

        assert!(!report.created);
        assert_eq!(report.outcome(), SubmissionOutcome::PartiallySucceeded);
        assert_eq!(report.load_failures().count(), 1);
        assert_eq!(report.count(SyncOp::Remove), 1);
        assert_eq!(report.count(SyncOp::Add), 0);
    }

    #[tokio::test]
    async fn lost_association_task_is_reported_per_kind() {
        let mut client = MockRemotePlanClient::new();
        client
            .expect_create_root_plan()
            .returning(|_| Ok(json!({"auditPlanId": 5})));
        client.expect_add_department().returning(|_, _| Ok(()));
        client
            .expect_add_criterion()
            .returning(|_, _| panic!("connection handler lost"));
        client.expect_add_team_member().returning(|_, _| Ok(()));

        let result = orchestrator(client).submit(form(), None).await;

        assert_eq!(SubmissionOutcome::of(&result), SubmissionOutcome::PartiallySucceeded);
        let report = result.unwrap();
        assert_eq!(report.plan_id, PlanId::from("5"));
        assert_eq!(report.kinds.len(), AssociationKind::ALL.len());
        assert!(report.kinds.values().all(|kind| kind.interrupted.is_some() && !kind.is_success()));
        assert_eq!(report.phases.last(), Some(&SubmissionPhase::Completed));
    }
}
