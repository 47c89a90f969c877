//! Plan aggregate loading
//!
//! Assembles a [`PlanAggregate`] from the plan detail and the per-kind list
//! endpoints:
//! - fast path: collections embedded in the detail are used as-is, the rest
//!   are fetched concurrently
//! - fallback path: when the detail call fails, root fields come from the
//!   [`SummaryCache`] and every collection is fetched from its list endpoint
//!
//! A failed collection becomes an empty set plus an error entry; only a plan
//! whose root fields are unavailable fails to load.

use crate::client::{AssociationEndpoint, SharedClient};
use crate::config::SyncConfig;
use crate::decode::{decode_all, embedded, plan_header, plan_id as record_plan_id};
use crate::error::{LoadError, RemoteError, RemoteResult};
use crate::normalize::unwrap;
use crate::sensitive_area::{AreaResolution, DepartmentDirectory, SensitiveAreaCatalog, SensitiveAreaResolver};
use crate::types::{
    AssociationKind, AssociationSet, ChecklistTemplateAssociation, CriterionAssociation, DepartmentAssociation, DeptId,
    PlanAggregate, PlanId, ScheduleMilestone, TeamMembership,
};
use futures::stream::{self, StreamExt};
use moka::future::Cache;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

/// List-view summary rows keyed by plan id
///
/// Read-path fallback only; never consulted when the detail call succeeds.
#[derive(Debug, Clone)]
pub struct SummaryCache {
    inner: Cache<PlanId, Arc<Value>>,
}

impl SummaryCache {
    /// Create cache with capacity and time-to-live
    #[inline]
    #[must_use]
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder().max_capacity(max_capacity).time_to_live(ttl).build(),
        }
    }

    /// Create cache from configuration
    #[inline]
    #[must_use]
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.summary_cache_capacity, config.summary_cache_ttl())
    }

    /// Store a summary row
    #[inline]
    pub async fn insert(&self, plan_id: PlanId, row: Value) {
        self.inner.insert(plan_id, Arc::new(row)).await;
    }

    /// Get a summary row
    #[inline]
    pub async fn get(&self, plan_id: &PlanId) -> Option<Arc<Value>> {
        self.inner.get(plan_id).await
    }

    /// Store every row of a list payload that carries a plan id
    ///
    /// Returns the number of rows stored.
    pub async fn remember(&self, rows: &Value) -> usize {
        let mut stored = 0;
        for row in unwrap(rows) {
            match record_plan_id(&row) {
                Some(plan_id) => {
                    self.insert(plan_id, row).await;
                    stored += 1;
                }
                None => tracing::debug!("Skipping summary row without plan id: {}", row),
            }
        }
        stored
    }

    /// Drop one row
    #[inline]
    pub async fn invalidate(&self, plan_id: &PlanId) {
        self.inner.invalidate(plan_id).await;
    }

    /// Drop every row
    #[inline]
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
    }

    /// Approximate number of rows
    #[inline]
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

/// Where the root fields of a loaded aggregate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadSource {
    /// The plan detail endpoint
    Detail,
    /// A cached list-view summary row
    CachedSummary,
}

/// Aggregate plus what went wrong while assembling it
#[derive(Debug, Clone)]
pub struct LoadedAggregate {
    /// The assembled aggregate; failed collections are empty
    pub aggregate: PlanAggregate,
    /// Origin of the root fields
    pub source: LoadSource,
    /// Collections that could not be fetched
    pub errors: BTreeMap<AssociationKind, RemoteError>,
    /// Department labels with no unique catalog match
    pub unmatched_areas: BTreeMap<DeptId, BTreeSet<String>>,
}

impl LoadedAggregate {
    /// Check if every collection loaded and every label resolved
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.unmatched_areas.is_empty()
    }
}

/// Collection result: the set plus the fetch error, if any
type Collected<T> = (AssociationSet<T>, Option<RemoteError>);

/// Loads plan aggregates from the remote service
#[derive(Clone)]
pub struct PlanAggregateLoader {
    client: SharedClient,
    cache: SummaryCache,
    config: SyncConfig,
}

impl std::fmt::Debug for PlanAggregateLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanAggregateLoader")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PlanAggregateLoader {
    /// Create loader
    #[must_use]
    pub fn new(client: SharedClient, config: SyncConfig) -> Self {
        Self {
            client,
            cache: SummaryCache::from_config(&config),
            config,
        }
    }

    /// With an existing summary cache
    #[inline]
    #[must_use]
    pub fn with_cache(mut self, cache: SummaryCache) -> Self {
        self.cache = cache;
        self
    }

    /// Summary cache
    #[inline]
    #[must_use]
    pub fn cache(&self) -> &SummaryCache {
        &self.cache
    }

    /// Store list-view rows for the fallback path
    pub async fn remember_summaries(&self, rows: &Value) -> usize {
        self.cache.remember(rows).await
    }

    /// Fetch list-view rows and store them for the fallback path
    pub async fn refresh_summaries(&self) -> RemoteResult<usize> {
        let rows = self.client.list_plans().await?;
        let stored = self.cache.remember(&rows).await;
        tracing::debug!("Cached {} plan summaries", stored);
        Ok(stored)
    }

    /// Load one plan aggregate
    pub async fn load(&self, plan_id: &PlanId) -> Result<LoadedAggregate, LoadError> {
        let (detail, source) = match self.client.get_plan(plan_id).await.and_then(|payload| {
            unwrap(&payload)
                .into_iter()
                .next()
                .ok_or_else(|| RemoteError::NotFound(format!("plan {plan_id} detail is empty")))
        }) {
            Ok(detail) => (detail, LoadSource::Detail),
            Err(source) => match self.cache.get(plan_id).await {
                Some(row) => {
                    tracing::warn!("Plan {} detail unavailable ({}), using cached summary", plan_id, source);
                    (row.as_ref().clone(), LoadSource::CachedSummary)
                }
                None => {
                    tracing::warn!("Plan {} unavailable and no cached summary: {}", plan_id, source);
                    return Err(LoadError::RootUnavailable {
                        plan_id: plan_id.clone(),
                        source,
                    });
                }
            },
        };

        // Summary rows never embed collections
        let embedding = (source == LoadSource::Detail).then_some(&detail);
        let (departments, criteria, team, schedules, templates) = futures::join!(
            self.collect::<DepartmentAssociation>(plan_id, embedding),
            self.collect::<CriterionAssociation>(plan_id, embedding),
            self.collect::<TeamMembership>(plan_id, embedding),
            self.collect::<ScheduleMilestone>(plan_id, embedding),
            self.collect::<ChecklistTemplateAssociation>(plan_id, embedding),
        );

        let mut errors = BTreeMap::new();
        let mut aggregate = PlanAggregate::new(plan_header(&detail)).with_plan_id(plan_id.clone());
        aggregate.scope_departments = take(departments, &mut errors);
        aggregate.criteria = take(criteria, &mut errors);
        aggregate.team = take(team, &mut errors);
        aggregate.schedules = take(schedules, &mut errors);
        aggregate.checklist_templates = take(templates, &mut errors);

        let unmatched_areas = self.resolve_department_labels(&mut aggregate.scope_departments).await;

        tracing::info!(
            "Loaded plan {} from {:?}: {} associations, {} failed collections",
            plan_id,
            source,
            aggregate.association_count(),
            errors.len()
        );
        Ok(LoadedAggregate {
            aggregate,
            source,
            errors,
            unmatched_areas,
        })
    }

    /// Load the current set of one association kind
    pub async fn load_kind<T: AssociationEndpoint>(&self, plan_id: &PlanId) -> RemoteResult<AssociationSet<T>> {
        let payload = T::list(self.client.as_ref(), plan_id).await?;
        Ok(decode_all::<T>(&unwrap(&payload)).into_iter().collect())
    }

    /// Load several plans concurrently, at most `limit` at a time
    ///
    /// Results are returned in input order; one plan failing never affects
    /// the others.
    pub async fn load_many(&self, plan_ids: &[PlanId], limit: usize) -> Vec<Result<LoadedAggregate, LoadError>> {
        stream::iter(plan_ids.iter().map(|plan_id| self.load(plan_id)))
            .buffered(limit.max(1))
            .collect()
            .await
    }

    /// Load several plans with the configured concurrency
    pub async fn load_all(&self, plan_ids: &[PlanId]) -> Vec<Result<LoadedAggregate, LoadError>> {
        self.load_many(plan_ids, self.config.max_concurrent_plans).await
    }

    /// Fetch the sensitive-area catalog and department directory
    pub async fn master_data(&self) -> RemoteResult<(SensitiveAreaCatalog, DepartmentDirectory)> {
        let (catalog, directory) = futures::join!(
            self.client.get_sensitive_area_catalog(),
            self.client.list_department_directory()
        );
        Ok((
            SensitiveAreaCatalog::from_payload(&catalog?),
            DepartmentDirectory::from_payload(&directory?),
        ))
    }

    async fn collect<T: AssociationEndpoint>(&self, plan_id: &PlanId, detail: Option<&Value>) -> Collected<T> {
        if let Some(collection) = detail.and_then(|d| embedded(d, T::EMBEDDED)) {
            let records = unwrap(collection);
            // Details may embed an empty schedule list while milestones exist
            if !(records.is_empty() && T::KIND == AssociationKind::Schedules) {
                return (decode_all::<T>(&records).into_iter().collect(), None);
            }
        }
        match self.load_kind::<T>(plan_id).await {
            Ok(set) => (set, None),
            Err(e) => {
                tracing::warn!("Failed to load {} of plan {}: {}", T::KIND, plan_id, e);
                (AssociationSet::new(), Some(e))
            }
        }
    }

    /// Fill area ids of departments that carry labels only
    async fn resolve_department_labels(
        &self,
        departments: &mut AssociationSet<DepartmentAssociation>,
    ) -> BTreeMap<DeptId, BTreeSet<String>> {
        let pending: Vec<DepartmentAssociation> =
            departments.iter().filter(|d| d.needs_resolution()).cloned().collect();
        if pending.is_empty() {
            return BTreeMap::new();
        }

        let mut unmatched = BTreeMap::new();
        let master = match self.master_data().await {
            Ok(master) => Some(master),
            Err(e) => {
                tracing::warn!("Sensitive-area catalog unavailable: {}", e);
                None
            }
        };

        let mut resolved = departments.to_vec();
        for dept in resolved.iter_mut().filter(|d| d.needs_resolution()) {
            let labels: Vec<&String> = dept.sensitive_area_labels.iter().collect();
            let resolution = match &master {
                Some((catalog, directory)) => SensitiveAreaResolver::new(catalog, directory).resolve(&dept.dept_id, &labels),
                None => AreaResolution {
                    unmatched_labels: dept.sensitive_area_labels.clone(),
                    ..Default::default()
                },
            };
            dept.sensitive_area_ids = resolution.area_ids;
            if !resolution.unmatched_labels.is_empty() {
                unmatched.insert(dept.dept_id.clone(), resolution.unmatched_labels);
            }
        }
        *departments = resolved.into_iter().collect();
        unmatched
    }
}

fn take<T: AssociationEndpoint>(
    (set, error): Collected<T>,
    errors: &mut BTreeMap<AssociationKind, RemoteError>,
) -> AssociationSet<T> {
    if let Some(e) = error {
        errors.insert(T::KIND, e);
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockRemotePlanClient;
    use serde_json::json;

    fn loader(client: MockRemotePlanClient) -> PlanAggregateLoader {
        PlanAggregateLoader::new(Arc::new(client), SyncConfig::default())
    }

    #[tokio::test]
    async fn embedded_collections_skip_list_calls() {
        let mut client = MockRemotePlanClient::new();
        client.expect_get_plan().returning(|_| {
            Ok(json!({
                "auditPlanId": 5,
                "title": "FY24",
                "departments": {"$values": [{"deptId": 1}, {"deptId": 2}]},
                "criteria": [1, 2, 3],
                "teamMembers": [],
                "schedules": [{"milestoneName": "Kickoff"}],
                "templates": {"values": [{"templateId": 9}]}
            }))
        });
        client.expect_list_departments().never();
        client.expect_list_criteria().never();
        client.expect_list_team().never();
        client.expect_list_schedules().never();
        client.expect_list_checklist_templates().never();

        let loaded = loader(client).load(&PlanId::from("5")).await.unwrap();

        assert_eq!(loaded.source, LoadSource::Detail);
        assert!(loaded.is_complete());
        assert_eq!(loaded.aggregate.header.title, "FY24");
        assert_eq!(loaded.aggregate.association_count(), 7);
    }

    #[tokio::test]
    async fn empty_embedded_schedules_are_refetched() {
        let mut client = MockRemotePlanClient::new();
        client
            .expect_get_plan()
            .returning(|_| Ok(json!({"id": 5, "title": "FY24", "departments": [], "criteria": [], "teamMembers": [], "schedules": [], "templates": []})));
        client
            .expect_list_schedules()
            .times(1)
            .returning(|_| Ok(json!([{"milestoneName": "Fieldwork"}, {"milestoneName": "Report"}])));

        let loaded = loader(client).load(&PlanId::from("5")).await.unwrap();
        assert_eq!(loaded.aggregate.schedules.len(), 2);
    }

    #[tokio::test]
    async fn failed_collection_is_reported_not_absent() {
        let mut client = MockRemotePlanClient::new();
        client.expect_get_plan().returning(|_| Ok(json!({"id": 5, "title": "FY24"})));
        client.expect_list_departments().returning(|_| Ok(json!([{"deptId": 1}])));
        client
            .expect_list_criteria()
            .returning(|_| Err(RemoteError::Transport("reset".into())));
        client.expect_list_team().returning(|_| Ok(json!(null)));
        client.expect_list_schedules().returning(|_| Ok(json!({"$values": null})));
        client.expect_list_checklist_templates().returning(|_| Ok(json!({})));

        let loaded = loader(client).load(&PlanId::from("5")).await.unwrap();

        assert_eq!(loaded.aggregate.scope_departments.len(), 1);
        assert!(loaded.aggregate.criteria.is_empty());
        assert_eq!(loaded.errors.len(), 1);
        assert!(loaded.errors.contains_key(&AssociationKind::Criteria));
    }

    #[tokio::test]
    async fn missing_detail_without_summary_fails() {
        let mut client = MockRemotePlanClient::new();
        client
            .expect_get_plan()
            .returning(|_| Err(RemoteError::NotFound("plan 5".into())));
        client.expect_list_departments().never();

        let err = loader(client).load(&PlanId::from("5")).await.unwrap_err();
        assert_eq!(err.plan_id(), &PlanId::from("5"));
    }

    #[tokio::test]
    async fn labels_resolved_during_load() {
        let mut client = MockRemotePlanClient::new();
        client.expect_get_plan().returning(|_| {
            Ok(json!({
                "id": 5,
                "departments": [{"deptId": 7, "isSensitive": true, "sensitiveArea": "Server Room, Vault"}],
                "criteria": [], "teamMembers": [], "schedules": [{"name": "Kickoff"}], "templates": []
            }))
        });
        client
            .expect_get_sensitive_area_catalog()
            .returning(|| Ok(json!([{"sensitiveAreaId": 11, "departmentId": 7, "sensitiveArea": "Server Room"}])));
        client
            .expect_list_department_directory()
            .returning(|| Ok(json!([{"departmentId": 7, "departmentName": "IT"}])));

        let loaded = loader(client).load(&PlanId::from("5")).await.unwrap();
        let dept = loaded.aggregate.scope_departments.get(&DeptId::from("7")).unwrap();

        assert_eq!(dept.sensitive_area_ids.len(), 1);
        assert_eq!(
            loaded.unmatched_areas.get(&DeptId::from("7")),
            Some(&BTreeSet::from(["Vault".to_string()]))
        );
    }

    #[tokio::test]
    async fn summary_cache_remembers_rows_with_ids() {
        let cache = SummaryCache::new(16, Duration::from_secs(60));
        let stored = cache
            .remember(&json!({"values": [{"auditPlanId": 1, "title": "A"}, {"title": "no id"}]}))
            .await;

        assert_eq!(stored, 1);
        assert!(cache.get(&PlanId::from("1")).await.is_some());
        cache.invalidate(&PlanId::from("1")).await;
        assert!(cache.get(&PlanId::from("1")).await.is_none());
    }
}
