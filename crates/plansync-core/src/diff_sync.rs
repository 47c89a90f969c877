//! Diff/sync reconciliation
//!
//! [`reconcile`] computes the set difference between a desired and a current
//! collection under an identity function; [`DiffSyncEngine::apply`] issues
//! the resulting removes and adds with per-item failure isolation.
//!
//! Removals run before additions so a replacement (remove old + add new for
//! the same key) never collides with the row it replaces. Within each phase
//! every operation is dispatched concurrently; one failure never cancels its
//! siblings.

use crate::client::{AssociationEndpoint, RemotePlanClient};
use crate::config::SyncConfig;
use crate::error::{RemoteError, RemoteResult};
use crate::types::{Association, AssociationKind, AssociationSet, PlanId};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;

/// Operations needed to move a current collection to a desired one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan<T, K> {
    /// Present in desired only (desired order)
    pub to_add: Vec<T>,
    /// Present in current only (current order)
    pub to_remove: Vec<T>,
    /// Keys on both sides whose attributes differ; each appears in both lists
    pub replaced: BTreeSet<K>,
}

impl<T, K> ReconcilePlan<T, K> {
    /// Check if nothing needs to change
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Number of remote operations the plan issues
    #[inline]
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }
}

impl<T, K> Default for ReconcilePlan<T, K> {
    fn default() -> Self {
        Self {
            to_add: Vec::new(),
            to_remove: Vec::new(),
            replaced: BTreeSet::new(),
        }
    }
}

/// Drop later items whose key was already seen
fn dedupe<'a, T, K, F>(items: &'a [T], identity: &F) -> Vec<(K, &'a T)>
where
    K: Ord + Clone,
    F: Fn(&T) -> K,
{
    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter_map(|item| {
            let key = identity(item);
            seen.insert(key.clone()).then_some((key, item))
        })
        .collect()
}

/// Compute adds and removes under identity equality
///
/// `to_add = desired - current`, `to_remove = current - desired`. Duplicate
/// keys within an input collapse to their first occurrence.
pub fn reconcile<T, K, F>(desired: &[T], current: &[T], identity: F) -> ReconcilePlan<T, K>
where
    T: Clone,
    K: Ord + Clone,
    F: Fn(&T) -> K,
{
    reconcile_with(desired, current, identity, |_, _| true)
}

/// Compute adds and removes, replacing kept items whose attributes differ
///
/// A key present on both sides for which `same_attributes(desired, current)`
/// is false is emitted as remove-current + add-desired and recorded in
/// [`ReconcilePlan::replaced`].
pub fn reconcile_with<T, K, F, S>(desired: &[T], current: &[T], identity: F, same_attributes: S) -> ReconcilePlan<T, K>
where
    T: Clone,
    K: Ord + Clone,
    F: Fn(&T) -> K,
    S: Fn(&T, &T) -> bool,
{
    let desired = dedupe(desired, &identity);
    let current = dedupe(current, &identity);
    let current_keys: BTreeSet<&K> = current.iter().map(|(k, _)| k).collect();
    let desired_index: BTreeMap<&K, &T> = desired.iter().map(|(k, v)| (k, *v)).collect();

    let mut plan = ReconcilePlan::default();
    for (key, item) in &current {
        match desired_index.get(key) {
            None => plan.to_remove.push((*item).clone()),
            Some(wanted) if !same_attributes(wanted, item) => {
                plan.to_remove.push((*item).clone());
                plan.replaced.insert(key.clone());
            }
            Some(_) => {}
        }
    }
    for (key, item) in &desired {
        if !current_keys.contains(key) || plan.replaced.contains(key) {
            plan.to_add.push((*item).clone());
        }
    }
    plan
}

/// Reconcile two association sets of one kind
#[must_use]
pub fn reconcile_sets<T: Association>(
    desired: &AssociationSet<T>,
    current: &AssociationSet<T>,
    replace_on_attribute_change: bool,
) -> ReconcilePlan<T, T::Key> {
    let desired = desired.to_vec();
    let current = current.to_vec();
    if replace_on_attribute_change {
        reconcile_with(&desired, &current, Association::key, |a: &T, b: &T| a.same_attributes(b))
    } else {
        reconcile(&desired, &current, Association::key)
    }
}

/// Direction of one remote write
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOp {
    /// Create an association
    Add,
    /// Delete an association
    Remove,
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Add => f.write_str("add"),
            Self::Remove => f.write_str("remove"),
        }
    }
}

/// Result of one remote write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemStatus {
    /// The call succeeded
    Applied,
    /// The remote already was in the desired state (duplicate add, missing remove)
    AlreadySatisfied,
    /// The call failed
    Failed(RemoteError),
    /// The call was not issued
    Skipped(String),
}

impl ItemStatus {
    /// Check if the remote now matches the desired state for this item
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Applied | Self::AlreadySatisfied)
    }
}

/// Reported outcome of one planned operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemOutcome {
    /// Association kind
    pub kind: AssociationKind,
    /// Identity key, rendered
    pub key: String,
    /// Operation
    pub op: SyncOp,
    /// Status
    pub status: ItemStatus,
}

impl ItemOutcome {
    /// Check if the operation reached the desired state
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Applies reconcile plans with failure isolation
#[derive(Debug, Clone, Copy)]
pub struct DiffSyncEngine {
    max_in_flight: usize,
    duplicate_is_satisfied: bool,
}

impl DiffSyncEngine {
    /// Create engine
    #[inline]
    #[must_use]
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            duplicate_is_satisfied: true,
        }
    }

    /// Create engine from configuration
    #[inline]
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.max_in_flight_per_kind).with_duplicate_is_satisfied(config.duplicate_is_satisfied)
    }

    /// With duplicate handling
    #[inline]
    #[must_use]
    pub fn with_duplicate_is_satisfied(mut self, enabled: bool) -> Self {
        self.duplicate_is_satisfied = enabled;
        self
    }

    /// Issue a plan through caller-supplied add and remove operations
    ///
    /// Removals are issued first, then additions. Every planned operation gets
    /// exactly one outcome; outcomes follow plan order within each phase.
    pub async fn apply<T, K, I, A, FA, R, FR>(
        &self,
        kind: AssociationKind,
        plan: &ReconcilePlan<T, K>,
        identity: I,
        add: A,
        remove: R,
    ) -> Vec<ItemOutcome>
    where
        T: Clone,
        K: Ord + Clone + fmt::Display,
        I: Fn(&T) -> K,
        A: Fn(T) -> FA,
        FA: Future<Output = RemoteResult<()>>,
        R: Fn(K) -> FR,
        FR: Future<Output = RemoteResult<()>>,
    {
        if plan.is_empty() {
            return Vec::new();
        }
        tracing::debug!(
            "Applying {} plan: {} removes, {} adds, {} replacements",
            kind,
            plan.to_remove.len(),
            plan.to_add.len(),
            plan.replaced.len()
        );

        let removals = plan.to_remove.iter().map(&identity).map(|key: K| {
            let call = remove(key.clone());
            async move { (key, call.await) }
        });
        let removed: Vec<(K, RemoteResult<()>)> = stream::iter(removals).buffered(self.max_in_flight).collect().await;

        let mut outcomes = Vec::with_capacity(plan.op_count());
        let mut blocked = BTreeSet::new();
        for (key, result) in removed {
            let status = self.classify(SyncOp::Remove, result);
            if !status.is_success() && plan.replaced.contains(&key) {
                blocked.insert(key.clone());
            }
            outcomes.push(outcome(kind, &key, SyncOp::Remove, status));
        }

        let mut pending = Vec::new();
        for item in &plan.to_add {
            let key = identity(item);
            if blocked.contains(&key) {
                let reason = format!("replacement of {key} skipped: removal of the old row failed");
                outcomes.push(outcome(kind, &key, SyncOp::Add, ItemStatus::Skipped(reason)));
            } else {
                pending.push((key, item.clone()));
            }
        }
        let additions = pending.into_iter().map(|(key, item)| {
            let call = add(item);
            async move { (key, call.await) }
        });
        let added: Vec<(K, RemoteResult<()>)> = stream::iter(additions).buffered(self.max_in_flight).collect().await;
        for (key, result) in added {
            let status = self.classify(SyncOp::Add, result);
            outcomes.push(outcome(kind, &key, SyncOp::Add, status));
        }
        outcomes
    }

    /// Issue a plan of one association kind against the remote client
    ///
    /// Boxed so callers can move it onto a spawned task.
    pub fn apply_to_remote<'a, T: AssociationEndpoint>(
        &'a self,
        client: &'a dyn RemotePlanClient,
        plan_id: &'a PlanId,
        plan: &'a ReconcilePlan<T, T::Key>,
    ) -> BoxFuture<'a, Vec<ItemOutcome>> {
        async move {
            self.apply(
                T::KIND,
                plan,
                Association::key,
                |item: T| async move { T::add(client, plan_id, &item).await },
                |key: T::Key| async move { T::remove(client, plan_id, &key).await },
            )
            .await
        }
        .boxed()
    }

    fn classify(&self, op: SyncOp, result: RemoteResult<()>) -> ItemStatus {
        match result {
            Ok(()) => ItemStatus::Applied,
            Err(e) if self.duplicate_is_satisfied && op == SyncOp::Add && e.is_duplicate() => {
                ItemStatus::AlreadySatisfied
            }
            Err(e) if self.duplicate_is_satisfied && op == SyncOp::Remove && e.is_not_found() => {
                ItemStatus::AlreadySatisfied
            }
            Err(e) => ItemStatus::Failed(e),
        }
    }
}

fn outcome<K: fmt::Display>(kind: AssociationKind, key: &K, op: SyncOp, status: ItemStatus) -> ItemOutcome {
    match &status {
        ItemStatus::Failed(e) => tracing::warn!("{} {} {} failed: {}", kind, op, key, e),
        ItemStatus::Skipped(reason) => tracing::warn!("{} {} {} skipped: {}", kind, op, key, reason),
        ItemStatus::AlreadySatisfied => tracing::debug!("{} {} {} already satisfied", kind, op, key),
        ItemStatus::Applied => {}
    }
    ItemOutcome {
        kind,
        key: key.to_string(),
        op,
        status,
    }
}

impl Default for DiffSyncEngine {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepartmentAssociation, TeamMembership};
    use proptest::prelude::*;
    use std::collections::BTreeSet as Set;
    use std::sync::Mutex;

    /// Records calls in issue order
    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl Recorder {
        fn push(&self, call: String) {
            self.0.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    #[test]
    fn update_removing_one_department() {
        let current: Vec<DepartmentAssociation> = ["1", "2", "3"].into_iter().map(DepartmentAssociation::new).collect();
        let desired: Vec<DepartmentAssociation> = ["1", "3"].into_iter().map(DepartmentAssociation::new).collect();

        let plan = reconcile(&desired, &current, Association::key);

        assert!(plan.to_add.is_empty());
        assert_eq!(plan.to_remove, vec![DepartmentAssociation::new("2")]);
    }

    #[test]
    fn duplicates_collapse_first_wins() {
        let desired = vec![(1, "a"), (1, "b"), (2, "c")];
        let plan = reconcile(&desired, &[], |(k, _)| *k);
        assert_eq!(plan.to_add, vec![(1, "a"), (2, "c")]);
    }

    #[test]
    fn attribute_change_becomes_replacement() {
        let current = vec![TeamMembership::new("u1", "Auditor"), TeamMembership::new("u2", "Observer")];
        let desired = vec![TeamMembership::new("u1", "auditor").as_lead(), TeamMembership::new("u2", "observer ")];

        let plan = reconcile_with(&desired, &current, Association::key, |a, b| a.same_attributes(b));

        assert_eq!(plan.to_remove, vec![TeamMembership::new("u1", "Auditor")]);
        assert_eq!(plan.to_add, vec![TeamMembership::new("u1", "auditor").as_lead()]);
        assert_eq!(plan.replaced.len(), 1);

        let identity_only = reconcile(&desired, &current, Association::key);
        assert!(identity_only.is_empty());
    }

    #[test]
    fn reconcile_sets_honors_flag() {
        let current: AssociationSet<DepartmentAssociation> = [DepartmentAssociation::new("7")].into_iter().collect();
        let desired: AssociationSet<DepartmentAssociation> =
            [DepartmentAssociation::new("7").with_sensitive_areas([crate::types::AreaId::from("a1")])]
                .into_iter()
                .collect();

        assert_eq!(reconcile_sets(&desired, &current, true).op_count(), 2);
        assert!(reconcile_sets(&desired, &current, false).is_empty());
    }

    proptest! {
        #[test]
        fn diff_is_set_difference(desired in prop::collection::vec(0u8..20, 0..15), current in prop::collection::vec(0u8..20, 0..15)) {
            let plan = reconcile(&desired, &current, |k| *k);
            let d: Set<u8> = desired.iter().copied().collect();
            let c: Set<u8> = current.iter().copied().collect();

            let adds: Set<u8> = plan.to_add.iter().copied().collect();
            let removes: Set<u8> = plan.to_remove.iter().copied().collect();
            prop_assert_eq!(adds.len(), plan.to_add.len());
            prop_assert_eq!(removes.len(), plan.to_remove.len());
            prop_assert_eq!(adds, d.difference(&c).copied().collect::<Set<u8>>());
            prop_assert_eq!(removes, c.difference(&d).copied().collect::<Set<u8>>());
        }

        #[test]
        fn reconcile_with_self_is_empty(items in prop::collection::vec(0u8..50, 0..20)) {
            prop_assert!(reconcile(&items, &items, |k| *k).is_empty());
        }

        #[test]
        fn applying_plan_converges(desired in prop::collection::vec(0u8..20, 0..15), current in prop::collection::vec(0u8..20, 0..15)) {
            let plan = reconcile(&desired, &current, |k| *k);
            let mut state: Set<u8> = current.iter().copied().collect();
            for item in &plan.to_remove {
                state.remove(item);
            }
            state.extend(plan.to_add.iter().copied());

            let after: Vec<u8> = state.into_iter().collect();
            prop_assert!(reconcile(&desired, &after, |k| *k).is_empty());
        }
    }

    #[tokio::test]
    async fn one_failure_does_not_cancel_siblings() {
        let plan = reconcile(&[1u8, 2, 3, 4, 5], &[], |k| *k);
        let engine = DiffSyncEngine::new(2);

        let outcomes = engine
            .apply(
                AssociationKind::Criteria,
                &plan,
                |k| *k,
                |item| async move {
                    if item == 3 {
                        Err(RemoteError::Transport("reset".into()))
                    } else {
                        Ok(())
                    }
                },
                |_| async { Ok(()) },
            )
            .await;

        assert_eq!(outcomes.len(), 5);
        assert_eq!(outcomes.iter().filter(|o| o.is_success()).count(), 4);
        let failed: Vec<&ItemOutcome> = outcomes.iter().filter(|o| !o.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key, "3");
        assert!(matches!(failed[0].status, ItemStatus::Failed(RemoteError::Transport(_))));
    }

    #[tokio::test]
    async fn removals_issue_before_additions() {
        let recorder = Recorder::default();
        let plan = reconcile(&[3u8, 4], &[1u8, 2], |k| *k);

        let outcomes = DiffSyncEngine::new(8)
            .apply(
                AssociationKind::Criteria,
                &plan,
                |k| *k,
                |item| {
                    recorder.push(format!("add {item}"));
                    async { Ok(()) }
                },
                |key| {
                    recorder.push(format!("remove {key}"));
                    async { Ok(()) }
                },
            )
            .await;

        assert_eq!(outcomes.len(), 4);
        assert_eq!(recorder.calls(), vec!["remove 1", "remove 2", "add 3", "add 4"]);
    }

    #[tokio::test]
    async fn benign_failures_are_already_satisfied() {
        let plan = reconcile(&[1u8], &[2u8], |k| *k);
        let add = |_: u8| async { Err::<(), _>(RemoteError::Conflict("exists".into())) };
        let remove = |_: u8| async { Err::<(), _>(RemoteError::rejected(404, "gone")) };

        let lenient = DiffSyncEngine::new(1).apply(AssociationKind::Criteria, &plan, |k| *k, add, remove).await;
        assert!(lenient.iter().all(|o| o.status == ItemStatus::AlreadySatisfied));

        let strict = DiffSyncEngine::new(1)
            .with_duplicate_is_satisfied(false)
            .apply(AssociationKind::Criteria, &plan, |k| *k, add, remove)
            .await;
        assert!(strict.iter().all(|o| matches!(o.status, ItemStatus::Failed(_))));
    }

    #[tokio::test]
    async fn failed_removal_skips_replacement_add() {
        let current = vec![TeamMembership::new("u1", "Auditor"), TeamMembership::new("u2", "Auditor")];
        let desired = vec![TeamMembership::new("u1", "Lead"), TeamMembership::new("u2", "Lead")];
        let plan = reconcile_with(&desired, &current, Association::key, |a, b| a.same_attributes(b));

        let outcomes = DiffSyncEngine::new(4)
            .apply(
                AssociationKind::Team,
                &plan,
                Association::key,
                |_| async { Ok(()) },
                |key: crate::types::UserId| async move {
                    if key.as_str() == "u1" {
                        Err(RemoteError::Transport("timeout".into()))
                    } else {
                        Ok(())
                    }
                },
            )
            .await;

        let u1_add = outcomes.iter().find(|o| o.key == "u1" && o.op == SyncOp::Add).unwrap();
        assert!(matches!(u1_add.status, ItemStatus::Skipped(_)));
        let u2_add = outcomes.iter().find(|o| o.key == "u2" && o.op == SyncOp::Add).unwrap();
        assert_eq!(u2_add.status, ItemStatus::Applied);
        assert_eq!(outcomes.len(), 4);
    }
}
