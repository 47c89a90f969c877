//! Core types for plansync
//!
//! Defines the fundamental types of the reconciliation engine:
//! - Opaque external identifiers
//! - Root plan fields and the plan period
//! - The five association kinds and their identity keys
//! - The composite [`PlanAggregate`] and the form state it is built from

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::btree_map::{self, BTreeMap};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use ulid::Ulid;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(try_from = "serde_json::Value")]
        pub struct $name(String);

        impl $name {
            /// Create identifier from its external form
            #[inline]
            #[must_use]
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into().trim().to_string())
            }

            /// Get the external form
            #[inline]
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Decode from a JSON string or integer
            ///
            /// Remote payloads carry the same identifier as `7` or `"7"`.
            #[must_use]
            pub fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::String(s) if !s.trim().is_empty() => Some(Self::new(s.as_str())),
                    Value::Number(n) => Some(Self(n.to_string())),
                    _ => None,
                }
            }
        }

        impl TryFrom<Value> for $name {
            type Error = String;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                Self::from_value(&value).ok_or_else(|| {
                    format!("expected {} as string or integer, got {}", stringify!($name), value)
                })
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self::new(raw)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self::new(raw)
            }
        }

        impl From<i64> for $name {
            fn from(raw: i64) -> Self {
                Self(raw.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

opaque_id!(
    /// External audit plan identifier
    PlanId
);
opaque_id!(
    /// External department identifier
    DeptId
);
opaque_id!(
    /// External audit criterion identifier
    CriterionId
);
opaque_id!(
    /// External user identifier
    UserId
);
opaque_id!(
    /// External checklist template identifier
    TemplateId
);
opaque_id!(
    /// Sensitive-area catalog entry identifier
    AreaId
);

/// Unique submission identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubmissionId(pub Ulid);

impl SubmissionId {
    /// Generate new submission ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SubmissionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trim and case-fold text used for matching
#[inline]
#[must_use]
pub fn normalize_text(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Overall period of an audit plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPeriod {
    /// First day of the plan
    pub start: NaiveDate,
    /// Last day of the plan
    pub end: NaiveDate,
}

impl PlanPeriod {
    /// Create new period
    #[inline]
    #[must_use]
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Check if a date falls within the period (inclusive)
    #[inline]
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

/// Scalar fields of the root plan resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanHeader {
    /// Plan title
    pub title: String,
    /// Free-text description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Workflow status as reported by the remote system
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Plan period bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<PlanPeriod>,
}

impl PlanHeader {
    /// Create header with title
    #[inline]
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// With description
    #[inline]
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// With period
    #[inline]
    #[must_use]
    pub fn with_period(mut self, period: PlanPeriod) -> Self {
        self.period = Some(period);
        self
    }
}

/// Association kinds of a plan aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationKind {
    /// Departments in audit scope
    Departments,
    /// Audit criteria
    Criteria,
    /// Audit team members
    Team,
    /// Schedule milestones
    Schedules,
    /// Checklist templates
    ChecklistTemplates,
}

impl AssociationKind {
    /// Every kind, in submission order
    pub const ALL: [AssociationKind; 5] = [
        AssociationKind::Departments,
        AssociationKind::Criteria,
        AssociationKind::Team,
        AssociationKind::Schedules,
        AssociationKind::ChecklistTemplates,
    ];

    /// Stable name for logs and reports
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationKind::Departments => "departments",
            AssociationKind::Criteria => "criteria",
            AssociationKind::Team => "team",
            AssociationKind::Schedules => "schedules",
            AssociationKind::ChecklistTemplates => "checklist_templates",
        }
    }
}

impl fmt::Display for AssociationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed link between a plan and another entity
///
/// Identity is the key alone. Kinds whose rows can change without changing
/// identity override [`Association::same_attributes`]; reconciliation then
/// treats a mismatch as remove-old + add-new, since the remote exposes no
/// partial-update verb for associations.
pub trait Association: Clone + fmt::Debug + Send + Sync + 'static {
    /// Identity key
    type Key: Ord + Clone + fmt::Debug + fmt::Display + Send + Sync + 'static;

    /// Kind tag
    const KIND: AssociationKind;

    /// Identity key of this association
    fn key(&self) -> Self::Key;

    /// Compare non-identity attributes
    fn same_attributes(&self, _other: &Self) -> bool {
        true
    }
}

/// Department in audit scope with its sensitive areas
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentAssociation {
    /// Department
    pub dept_id: DeptId,
    /// Department holds sensitive areas
    #[serde(default)]
    pub sensitive: bool,
    /// Canonical catalog ids of the sensitive areas (may be empty)
    #[serde(default)]
    pub sensitive_area_ids: BTreeSet<AreaId>,
    /// Display labels; resolution input only
    #[serde(default)]
    pub sensitive_area_labels: BTreeSet<String>,
}

impl DepartmentAssociation {
    /// Create non-sensitive department association
    #[inline]
    #[must_use]
    pub fn new(dept_id: impl Into<DeptId>) -> Self {
        Self {
            dept_id: dept_id.into(),
            sensitive: false,
            sensitive_area_ids: BTreeSet::new(),
            sensitive_area_labels: BTreeSet::new(),
        }
    }

    /// Mark sensitive with resolved area ids
    #[inline]
    #[must_use]
    pub fn with_sensitive_areas(mut self, area_ids: impl IntoIterator<Item = AreaId>) -> Self {
        self.sensitive = true;
        self.sensitive_area_ids = area_ids.into_iter().collect();
        self
    }

    /// With display labels
    #[inline]
    #[must_use]
    pub fn with_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.sensitive_area_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Check if area ids are missing for a sensitive department
    #[inline]
    #[must_use]
    pub fn needs_resolution(&self) -> bool {
        self.sensitive && self.sensitive_area_ids.is_empty() && !self.sensitive_area_labels.is_empty()
    }
}

impl Association for DepartmentAssociation {
    type Key = DeptId;
    const KIND: AssociationKind = AssociationKind::Departments;

    fn key(&self) -> DeptId {
        self.dept_id.clone()
    }

    fn same_attributes(&self, other: &Self) -> bool {
        self.sensitive == other.sensitive && self.sensitive_area_ids == other.sensitive_area_ids
    }
}

/// Audit criterion attached to a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriterionAssociation {
    /// Criterion
    pub criterion_id: CriterionId,
}

impl CriterionAssociation {
    /// Create criterion association
    #[inline]
    #[must_use]
    pub fn new(criterion_id: impl Into<CriterionId>) -> Self {
        Self {
            criterion_id: criterion_id.into(),
        }
    }
}

impl Association for CriterionAssociation {
    type Key = CriterionId;
    const KIND: AssociationKind = AssociationKind::Criteria;

    fn key(&self) -> CriterionId {
        self.criterion_id.clone()
    }
}

/// Audit team membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMembership {
    /// Member
    pub user_id: UserId,
    /// Role within the plan
    #[serde(default)]
    pub role: String,
    /// Member leads the audit
    #[serde(default)]
    pub is_lead: bool,
}

impl TeamMembership {
    /// Create membership
    #[inline]
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, role: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: role.into(),
            is_lead: false,
        }
    }

    /// Mark as lead
    #[inline]
    #[must_use]
    pub fn as_lead(mut self) -> Self {
        self.is_lead = true;
        self
    }
}

impl Association for TeamMembership {
    type Key = UserId;
    const KIND: AssociationKind = AssociationKind::Team;

    fn key(&self) -> UserId {
        self.user_id.clone()
    }

    fn same_attributes(&self, other: &Self) -> bool {
        self.is_lead == other.is_lead && normalize_text(&self.role) == normalize_text(&other.role)
    }
}

/// Schedule milestone name
///
/// Compared, ordered and hashed by its trimmed, case-folded form; displays
/// the spelling it was created with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MilestoneName(String);

impl MilestoneName {
    /// Create milestone name
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    /// Get the name as given
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the comparison form
    #[inline]
    #[must_use]
    pub fn normalized(&self) -> String {
        normalize_text(&self.0)
    }
}

impl PartialEq for MilestoneName {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for MilestoneName {}

impl PartialOrd for MilestoneName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MilestoneName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.normalized().cmp(&other.normalized())
    }
}

impl Hash for MilestoneName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl From<&str> for MilestoneName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for MilestoneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Schedule milestone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleMilestone {
    /// Milestone name (identity)
    pub name: MilestoneName,
    /// Start date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<NaiveDate>,
    /// End or due date
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<NaiveDate>,
}

impl ScheduleMilestone {
    /// Create undated milestone
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<MilestoneName>) -> Self {
        Self {
            name: name.into(),
            start: None,
            end: None,
        }
    }

    /// With dates
    #[inline]
    #[must_use]
    pub fn with_dates(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start = start;
        self.end = end;
        self
    }

    /// Check if the present dates fall within a period
    ///
    /// Validation helper for callers; reconciliation never rejects a
    /// milestone on these grounds.
    #[must_use]
    pub fn fits_within(&self, period: &PlanPeriod) -> bool {
        let ordered = match (self.start, self.end) {
            (Some(start), Some(end)) => start <= end,
            _ => true,
        };
        ordered
            && self.start.map_or(true, |d| period.contains(d))
            && self.end.map_or(true, |d| period.contains(d))
    }
}

impl Association for ScheduleMilestone {
    type Key = MilestoneName;
    const KIND: AssociationKind = AssociationKind::Schedules;

    fn key(&self) -> MilestoneName {
        self.name.clone()
    }

    fn same_attributes(&self, other: &Self) -> bool {
        self.start == other.start && self.end == other.end
    }
}

/// Checklist template attached to a plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistTemplateAssociation {
    /// Template
    pub template_id: TemplateId,
}

impl ChecklistTemplateAssociation {
    /// Create template association
    #[inline]
    #[must_use]
    pub fn new(template_id: impl Into<TemplateId>) -> Self {
        Self {
            template_id: template_id.into(),
        }
    }
}

impl Association for ChecklistTemplateAssociation {
    type Key = TemplateId;
    const KIND: AssociationKind = AssociationKind::ChecklistTemplates;

    fn key(&self) -> TemplateId {
        self.template_id.clone()
    }
}

/// Key-unique set of associations
///
/// Inserting an item whose key is already present keeps the existing item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssociationSet<T: Association> {
    items: BTreeMap<T::Key, T>,
}

impl<T: Association> AssociationSet<T> {
    /// Create empty set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: BTreeMap::new(),
        }
    }

    /// Insert item; returns false when its key was already present
    pub fn insert(&mut self, item: T) -> bool {
        match self.items.entry(item.key()) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(item);
                true
            }
            btree_map::Entry::Occupied(_) => false,
        }
    }

    /// Get item by key
    #[inline]
    #[must_use]
    pub fn get(&self, key: &T::Key) -> Option<&T> {
        self.items.get(key)
    }

    /// Check if key is present
    #[inline]
    #[must_use]
    pub fn contains_key(&self, key: &T::Key) -> bool {
        self.items.contains_key(key)
    }

    /// Number of associations
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if set is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate in key order
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values()
    }

    /// Iterate keys in order
    pub fn keys(&self) -> impl Iterator<Item = &T::Key> {
        self.items.keys()
    }

    /// Copy items out in key order
    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.items.values().cloned().collect()
    }
}

impl<T: Association> Default for AssociationSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Association> FromIterator<T> for AssociationSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

impl<T: Association> IntoIterator for AssociationSet<T> {
    type Item = T;
    type IntoIter = btree_map::IntoValues<T::Key, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_values()
    }
}

impl<T: Association + Serialize> Serialize for AssociationSet<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.items.values())
    }
}

impl<'de, T: Association + Deserialize<'de>> Deserialize<'de> for AssociationSet<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(|items| items.into_iter().collect())
    }
}

/// Composite in-memory representation of one audit plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanAggregate {
    /// Remote id; absent until the root resource exists
    #[serde(default)]
    pub plan_id: Option<PlanId>,
    /// Root scalar fields
    #[serde(default)]
    pub header: PlanHeader,
    /// Departments in scope
    #[serde(default)]
    pub scope_departments: AssociationSet<DepartmentAssociation>,
    /// Criteria
    #[serde(default)]
    pub criteria: AssociationSet<CriterionAssociation>,
    /// Team
    #[serde(default)]
    pub team: AssociationSet<TeamMembership>,
    /// Schedule milestones
    #[serde(default)]
    pub schedules: AssociationSet<ScheduleMilestone>,
    /// Checklist templates
    #[serde(default)]
    pub checklist_templates: AssociationSet<ChecklistTemplateAssociation>,
}

impl PlanAggregate {
    /// Create unpersisted aggregate
    #[inline]
    #[must_use]
    pub fn new(header: PlanHeader) -> Self {
        Self {
            header,
            ..Self::default()
        }
    }

    /// With plan id
    #[inline]
    #[must_use]
    pub fn with_plan_id(mut self, plan_id: PlanId) -> Self {
        self.plan_id = Some(plan_id);
        self
    }

    /// Check if the root resource exists remotely
    #[inline]
    #[must_use]
    pub fn is_persisted(&self) -> bool {
        self.plan_id.is_some()
    }

    /// Number of associations of one kind
    #[must_use]
    pub fn count(&self, kind: AssociationKind) -> usize {
        match kind {
            AssociationKind::Departments => self.scope_departments.len(),
            AssociationKind::Criteria => self.criteria.len(),
            AssociationKind::Team => self.team.len(),
            AssociationKind::Schedules => self.schedules.len(),
            AssociationKind::ChecklistTemplates => self.checklist_templates.len(),
        }
    }

    /// Total number of associations
    #[must_use]
    pub fn association_count(&self) -> usize {
        AssociationKind::ALL.iter().map(|k| self.count(*k)).sum()
    }

    /// Milestones whose dates fall outside the plan period
    #[must_use]
    pub fn milestones_outside_period(&self) -> Vec<&ScheduleMilestone> {
        match &self.header.period {
            Some(period) => self
                .schedules
                .iter()
                .filter(|m| !m.fits_within(period))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// Department selection as entered on the plan form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepartmentSelection {
    /// Department
    pub dept_id: DeptId,
    /// Sensitive flag as ticked
    #[serde(default)]
    pub sensitive: bool,
    /// Area labels chosen for this department
    #[serde(default)]
    pub area_labels: Vec<String>,
}

impl DepartmentSelection {
    /// Create selection
    #[inline]
    #[must_use]
    pub fn new(dept_id: impl Into<DeptId>) -> Self {
        Self {
            dept_id: dept_id.into(),
            sensitive: false,
            area_labels: Vec::new(),
        }
    }

    /// Mark sensitive with labels
    #[inline]
    #[must_use]
    pub fn sensitive<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.sensitive = true;
        self.area_labels = labels.into_iter().map(Into::into).collect();
        self
    }
}

/// Plan form state submitted by the UI
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanForm {
    /// Root fields
    #[serde(default)]
    pub header: PlanHeader,
    /// Departments in scope
    #[serde(default)]
    pub departments: Vec<DepartmentSelection>,
    /// Flat `"label - department"` or bare `"label"` selections
    #[serde(default)]
    pub sensitive_area_selections: Vec<String>,
    /// Criteria
    #[serde(default)]
    pub criteria: Vec<CriterionId>,
    /// Team
    #[serde(default)]
    pub team: Vec<TeamMembership>,
    /// Schedule milestones
    #[serde(default)]
    pub schedules: Vec<ScheduleMilestone>,
    /// Checklist templates
    #[serde(default)]
    pub checklist_templates: Vec<TemplateId>,
}

impl PlanForm {
    /// Create form with root fields
    #[inline]
    #[must_use]
    pub fn new(header: PlanHeader) -> Self {
        Self {
            header,
            ..Self::default()
        }
    }

    /// With department
    #[inline]
    #[must_use]
    pub fn with_department(mut self, selection: DepartmentSelection) -> Self {
        self.departments.push(selection);
        self
    }

    /// With flat sensitive-area selection
    #[inline]
    #[must_use]
    pub fn with_area_selection(mut self, selection: impl Into<String>) -> Self {
        self.sensitive_area_selections.push(selection.into());
        self
    }

    /// With criterion
    #[inline]
    #[must_use]
    pub fn with_criterion(mut self, criterion_id: impl Into<CriterionId>) -> Self {
        self.criteria.push(criterion_id.into());
        self
    }

    /// With team member
    #[inline]
    #[must_use]
    pub fn with_member(mut self, member: TeamMembership) -> Self {
        self.team.push(member);
        self
    }

    /// With schedule milestone
    #[inline]
    #[must_use]
    pub fn with_schedule(mut self, milestone: ScheduleMilestone) -> Self {
        self.schedules.push(milestone);
        self
    }

    /// With checklist template
    #[inline]
    #[must_use]
    pub fn with_template(mut self, template_id: impl Into<TemplateId>) -> Self {
        self.checklist_templates.push(template_id.into());
        self
    }
}
