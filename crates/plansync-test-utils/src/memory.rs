//! In-memory remote plan service

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use plansync_core::{
    Association, AssociationKind, ChecklistTemplateAssociation, CriterionAssociation, CriterionId,
    DepartmentAssociation, DeptId, MilestoneName, PlanHeader, PlanId, RemoteError, RemotePlanClient, RemoteResult,
    ScheduleMilestone, SensitiveAreaCatalogEntry, TeamMembership, TemplateId, UserId,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Collection wrapper used for every list payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Envelope {
    /// `[...]`
    #[default]
    Bare,
    /// `{"values": [...]}`
    Values,
    /// `{"$values": [...]}`
    DollarValues,
}

impl Envelope {
    /// Wrap records in this envelope
    #[must_use]
    pub fn wrap(self, records: Vec<Value>) -> Value {
        match self {
            Self::Bare => Value::Array(records),
            Self::Values => json!({ "values": records }),
            Self::DollarValues => json!({ "$values": records }),
        }
    }
}

/// Recorded client call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    /// `get_plan`
    GetPlan(PlanId),
    /// `list_plans`
    ListPlans,
    /// `create_root_plan`
    CreateRoot(String),
    /// `update_root_plan`
    UpdateRoot(PlanId),
    /// `list_*`
    List(AssociationKind, PlanId),
    /// `add_*` with the rendered key
    Add(AssociationKind, PlanId, String),
    /// `remove_*` with the rendered key
    Remove(AssociationKind, PlanId, String),
    /// `get_sensitive_area_catalog`
    Catalog,
    /// `list_department_directory`
    Directory,
}

impl Call {
    /// Check if the call wrote an association
    #[must_use]
    pub fn is_association_write(&self) -> bool {
        matches!(self, Self::Add(..) | Self::Remove(..))
    }
}

/// Injectable failure point
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// Plan detail of one plan
    Detail(PlanId),
    /// Root creation
    CreateRoot,
    /// Root update of one plan
    UpdateRoot(PlanId),
    /// List endpoint of one kind
    List(AssociationKind),
    /// Adding one key of one kind
    Add(AssociationKind, String),
    /// Removing one key of one kind
    Remove(AssociationKind, String),
    /// Sensitive-area catalog
    Catalog,
}

#[derive(Debug, Clone, Default)]
struct StoredPlan {
    header: PlanHeader,
    collections: BTreeMap<AssociationKind, BTreeMap<String, Value>>,
}

/// In-memory [`RemotePlanClient`]
///
/// Stores associations as the JSON the typed payloads serialize to and
/// serves them back in the configured envelope. Duplicate adds answer
/// `Conflict`, removes of missing rows answer `NotFound`. Association
/// writes can be held open with [`InMemoryPlanClient::hold_writes`].
#[derive(Debug)]
pub struct InMemoryPlanClient {
    plans: DashMap<PlanId, StoredPlan>,
    failures: DashMap<FailurePoint, RemoteError>,
    calls: Mutex<Vec<Call>>,
    catalog: Mutex<Vec<SensitiveAreaCatalogEntry>>,
    directory: Mutex<Vec<(DeptId, String)>>,
    next_id: AtomicU64,
    envelope: Envelope,
    embed_collections: bool,
    writes_open: watch::Sender<bool>,
}

impl InMemoryPlanClient {
    /// Create empty service
    #[must_use]
    pub fn new() -> Self {
        Self {
            plans: DashMap::new(),
            failures: DashMap::new(),
            calls: Mutex::new(Vec::new()),
            catalog: Mutex::new(Vec::new()),
            directory: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(100),
            envelope: Envelope::default(),
            embed_collections: false,
            writes_open: watch::Sender::new(true),
        }
    }

    /// With list envelope style
    #[must_use]
    pub fn with_envelope(mut self, envelope: Envelope) -> Self {
        self.envelope = envelope;
        self
    }

    /// With collections embedded in plan details
    ///
    /// Embedded schedules are always an empty list, as stale details carry.
    #[must_use]
    pub fn with_embedded_collections(mut self, embed: bool) -> Self {
        self.embed_collections = embed;
        self
    }

    /// With sensitive-area catalog
    #[must_use]
    pub fn with_catalog(self, entries: impl IntoIterator<Item = SensitiveAreaCatalogEntry>) -> Self {
        self.catalog.lock().extend(entries);
        self
    }

    /// With department directory rows
    #[must_use]
    pub fn with_departments<N: Into<String>>(self, rows: impl IntoIterator<Item = (DeptId, N)>) -> Self {
        self.directory
            .lock()
            .extend(rows.into_iter().map(|(id, name)| (id, name.into())));
        self
    }

    /// Seed a plan root
    pub fn seed_plan(&self, plan_id: &PlanId, header: PlanHeader) {
        self.plans.entry(plan_id.clone()).or_default().header = header;
    }

    /// Seed one association without recording a call
    pub fn seed<T: Association + Serialize>(&self, plan_id: &PlanId, item: &T) {
        let key = storage_key(T::KIND, &item.key().to_string());
        let mut plan = self.plans.entry(plan_id.clone()).or_default();
        plan.collections
            .entry(T::KIND)
            .or_default()
            .insert(key, to_record(item));
    }

    /// Make a call fail until cleared
    pub fn fail(&self, point: FailurePoint, error: RemoteError) {
        self.failures.insert(point, error);
    }

    /// Clear every injected failure
    pub fn clear_failures(&self) {
        self.failures.clear();
    }

    /// Park association writes after they are recorded
    ///
    /// Parked writes have not touched storage and resume on
    /// [`InMemoryPlanClient::release_writes`].
    pub fn hold_writes(&self) {
        self.writes_open.send_replace(false);
    }

    /// Let parked and future association writes proceed
    pub fn release_writes(&self) {
        self.writes_open.send_replace(true);
    }

    /// Every recorded call, in issue order
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    /// Recorded association writes
    #[must_use]
    pub fn writes(&self) -> Vec<Call> {
        self.calls.lock().iter().filter(|c| c.is_association_write()).cloned().collect()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Stored rows of one kind
    #[must_use]
    pub fn rows(&self, plan_id: &PlanId, kind: AssociationKind) -> Vec<Value> {
        self.plans
            .get(plan_id)
            .and_then(|plan| plan.collections.get(&kind).map(|rows| rows.values().cloned().collect()))
            .unwrap_or_default()
    }

    /// Stored keys of one kind
    #[must_use]
    pub fn keys(&self, plan_id: &PlanId, kind: AssociationKind) -> Vec<String> {
        self.plans
            .get(plan_id)
            .and_then(|plan| plan.collections.get(&kind).map(|rows| rows.keys().cloned().collect()))
            .unwrap_or_default()
    }

    /// Stored root fields
    #[must_use]
    pub fn header(&self, plan_id: &PlanId) -> Option<PlanHeader> {
        self.plans.get(plan_id).map(|plan| plan.header.clone())
    }

    /// Number of stored plans
    #[must_use]
    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn check(&self, point: &FailurePoint) -> RemoteResult<()> {
        match self.failures.get(point) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn list_kind(&self, kind: AssociationKind, plan_id: &PlanId) -> RemoteResult<Value> {
        self.record(Call::List(kind, plan_id.clone()));
        self.check(&FailurePoint::List(kind))?;
        let plan = self
            .plans
            .get(plan_id)
            .ok_or_else(|| RemoteError::NotFound(format!("plan {plan_id}")))?;
        let rows = plan
            .collections
            .get(&kind)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default();
        Ok(self.envelope.wrap(rows))
    }

    async fn writes_released(&self) {
        let mut open = self.writes_open.subscribe();
        let _ = open.wait_for(|open| *open).await;
    }

    async fn add_kind<T: Association + Serialize>(&self, plan_id: &PlanId, item: &T) -> RemoteResult<()> {
        let rendered = item.key().to_string();
        self.record(Call::Add(T::KIND, plan_id.clone(), rendered.clone()));
        self.check(&FailurePoint::Add(T::KIND, rendered.clone()))?;
        self.writes_released().await;
        let mut plan = self
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| RemoteError::NotFound(format!("plan {plan_id}")))?;
        let rows = plan.collections.entry(T::KIND).or_default();
        let key = storage_key(T::KIND, &rendered);
        if rows.contains_key(&key) {
            return Err(RemoteError::Conflict(format!("{} {rendered} already exists", T::KIND)));
        }
        rows.insert(key, to_record(item));
        Ok(())
    }

    async fn remove_kind(&self, kind: AssociationKind, plan_id: &PlanId, rendered: String) -> RemoteResult<()> {
        self.record(Call::Remove(kind, plan_id.clone(), rendered.clone()));
        self.check(&FailurePoint::Remove(kind, rendered.clone()))?;
        self.writes_released().await;
        let mut plan = self
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| RemoteError::NotFound(format!("plan {plan_id}")))?;
        plan.collections
            .entry(kind)
            .or_default()
            .remove(&storage_key(kind, &rendered))
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(format!("{kind} {rendered}")))
    }

    fn detail(&self, plan_id: &PlanId, plan: &StoredPlan) -> Value {
        let mut detail = summary(plan_id, &plan.header);
        if self.embed_collections {
            let rows = |kind: AssociationKind| -> Vec<Value> {
                plan.collections
                    .get(&kind)
                    .map(|rows| rows.values().cloned().collect())
                    .unwrap_or_default()
            };
            detail["scopeDepartments"] = self.envelope.wrap(rows(AssociationKind::Departments));
            detail["auditCriteria"] = self.envelope.wrap(rows(AssociationKind::Criteria));
            detail["teamMembers"] = self.envelope.wrap(rows(AssociationKind::Team));
            detail["schedules"] = self.envelope.wrap(Vec::new());
            detail["checklistTemplates"] = self.envelope.wrap(rows(AssociationKind::ChecklistTemplates));
        }
        detail
    }
}

impl Default for InMemoryPlanClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Schedules are keyed by their case-folded name
fn storage_key(kind: AssociationKind, rendered: &str) -> String {
    if kind == AssociationKind::Schedules {
        rendered.trim().to_lowercase()
    } else {
        rendered.to_string()
    }
}

fn to_record<T: Serialize>(item: &T) -> Value {
    serde_json::to_value(item).unwrap_or(Value::Null)
}

fn summary(plan_id: &PlanId, header: &PlanHeader) -> Value {
    let mut row = json!({
        "auditPlanId": plan_id.as_str(),
        "title": header.title,
        "status": header.status,
        "description": header.description,
    });
    if let Some(period) = header.period {
        row["periodStart"] = json!(period.start.format("%Y-%m-%d").to_string());
        row["periodEnd"] = json!(period.end.format("%Y-%m-%d").to_string());
    }
    row
}

#[async_trait]
impl RemotePlanClient for InMemoryPlanClient {
    async fn get_plan(&self, plan_id: &PlanId) -> RemoteResult<Value> {
        self.record(Call::GetPlan(plan_id.clone()));
        self.check(&FailurePoint::Detail(plan_id.clone()))?;
        let plan = self
            .plans
            .get(plan_id)
            .ok_or_else(|| RemoteError::NotFound(format!("plan {plan_id}")))?;
        Ok(self.detail(plan_id, &plan))
    }

    async fn list_plans(&self) -> RemoteResult<Value> {
        self.record(Call::ListPlans);
        let rows = self
            .plans
            .iter()
            .map(|entry| summary(entry.key(), &entry.value().header))
            .collect();
        Ok(self.envelope.wrap(rows))
    }

    async fn create_root_plan(&self, header: &PlanHeader) -> RemoteResult<Value> {
        self.record(Call::CreateRoot(header.title.clone()));
        self.check(&FailurePoint::CreateRoot)?;
        let plan_id = PlanId::from(self.next_id.fetch_add(1, Ordering::SeqCst).to_string());
        self.plans.insert(
            plan_id.clone(),
            StoredPlan {
                header: header.clone(),
                collections: BTreeMap::new(),
            },
        );
        Ok(summary(&plan_id, header))
    }

    async fn update_root_plan(&self, plan_id: &PlanId, header: &PlanHeader) -> RemoteResult<()> {
        self.record(Call::UpdateRoot(plan_id.clone()));
        self.check(&FailurePoint::UpdateRoot(plan_id.clone()))?;
        let mut plan = self
            .plans
            .get_mut(plan_id)
            .ok_or_else(|| RemoteError::NotFound(format!("plan {plan_id}")))?;
        plan.header = header.clone();
        Ok(())
    }

    async fn list_departments(&self, plan_id: &PlanId) -> RemoteResult<Value> {
        self.list_kind(AssociationKind::Departments, plan_id)
    }

    async fn add_department(&self, plan_id: &PlanId, department: &DepartmentAssociation) -> RemoteResult<()> {
        self.add_kind(plan_id, department).await
    }

    async fn remove_department(&self, plan_id: &PlanId, dept_id: &DeptId) -> RemoteResult<()> {
        self.remove_kind(AssociationKind::Departments, plan_id, dept_id.to_string()).await
    }

    async fn list_criteria(&self, plan_id: &PlanId) -> RemoteResult<Value> {
        self.list_kind(AssociationKind::Criteria, plan_id)
    }

    async fn add_criterion(&self, plan_id: &PlanId, criterion: &CriterionAssociation) -> RemoteResult<()> {
        self.add_kind(plan_id, criterion).await
    }

    async fn remove_criterion(&self, plan_id: &PlanId, criterion_id: &CriterionId) -> RemoteResult<()> {
        self.remove_kind(AssociationKind::Criteria, plan_id, criterion_id.to_string()).await
    }

    async fn list_team(&self, plan_id: &PlanId) -> RemoteResult<Value> {
        self.list_kind(AssociationKind::Team, plan_id)
    }

    async fn add_team_member(&self, plan_id: &PlanId, member: &TeamMembership) -> RemoteResult<()> {
        self.add_kind(plan_id, member).await
    }

    async fn remove_team_member(&self, plan_id: &PlanId, user_id: &UserId) -> RemoteResult<()> {
        self.remove_kind(AssociationKind::Team, plan_id, user_id.to_string()).await
    }

    async fn list_schedules(&self, plan_id: &PlanId) -> RemoteResult<Value> {
        self.list_kind(AssociationKind::Schedules, plan_id)
    }

    async fn add_schedule(&self, plan_id: &PlanId, milestone: &ScheduleMilestone) -> RemoteResult<()> {
        self.add_kind(plan_id, milestone).await
    }

    async fn remove_schedule(&self, plan_id: &PlanId, name: &MilestoneName) -> RemoteResult<()> {
        self.remove_kind(AssociationKind::Schedules, plan_id, name.to_string()).await
    }

    async fn list_checklist_templates(&self, plan_id: &PlanId) -> RemoteResult<Value> {
        self.list_kind(AssociationKind::ChecklistTemplates, plan_id)
    }

    async fn add_checklist_template(
        &self,
        plan_id: &PlanId,
        template: &ChecklistTemplateAssociation,
    ) -> RemoteResult<()> {
        self.add_kind(plan_id, template).await
    }

    async fn remove_checklist_template(&self, plan_id: &PlanId, template_id: &TemplateId) -> RemoteResult<()> {
        self.remove_kind(AssociationKind::ChecklistTemplates, plan_id, template_id.to_string()).await
    }

    async fn get_sensitive_area_catalog(&self) -> RemoteResult<Value> {
        self.record(Call::Catalog);
        self.check(&FailurePoint::Catalog)?;
        let rows = self
            .catalog
            .lock()
            .iter()
            .map(|entry| {
                json!({
                    "sensitiveAreaId": entry.area_id.as_str(),
                    "departmentId": entry.dept_id.as_str(),
                    "sensitiveArea": entry.label,
                })
            })
            .collect();
        Ok(self.envelope.wrap(rows))
    }

    async fn list_department_directory(&self) -> RemoteResult<Value> {
        self.record(Call::Directory);
        let rows = self
            .directory
            .lock()
            .iter()
            .map(|(dept_id, name)| json!({"departmentId": dept_id.as_str(), "departmentName": name}))
            .collect();
        Ok(self.envelope.wrap(rows))
    }
}
