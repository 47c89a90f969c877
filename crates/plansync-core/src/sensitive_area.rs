//! Sensitive-area resolution
//!
//! Maps human-entered sensitive-area labels onto catalog ids. Each label is
//! tried against the catalog in priority order:
//! 1. exact normalized match within the department (first in catalog order)
//! 2. substring containment either direction within the department; one
//!    candidate is a match, several are an ambiguity
//! 3. compound `"<area> - <departmentName>"`: the department name is looked
//!    up in the directory and tiers 1-2 are retried with the area part
//!
//! Labels that still fail are reported, never dropped and never fatal.
//! Containment can produce false positives when one label is a fragment of an
//! unrelated one; ambiguity is reported instead of guessed.

use crate::normalize::{aliases, field_id, field_list, field_str, unwrap};
use crate::types::{normalize_text, AreaId, DepartmentSelection, DeptId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Separator of compound `"area - department"` labels
pub const COMPOUND_SEPARATOR: &str = " - ";

/// One entry of the sensitive-area master catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensitiveAreaCatalogEntry {
    /// Catalog id
    pub area_id: AreaId,
    /// Owning department
    pub dept_id: DeptId,
    /// Display label
    pub label: String,
}

impl SensitiveAreaCatalogEntry {
    /// Create catalog entry
    #[inline]
    #[must_use]
    pub fn new(area_id: impl Into<AreaId>, dept_id: impl Into<DeptId>, label: impl Into<String>) -> Self {
        Self {
            area_id: area_id.into(),
            dept_id: dept_id.into(),
            label: label.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct IndexedEntry {
    area_id: AreaId,
    normalized: String,
}

/// Sensitive-area master catalog, indexed by department
///
/// Catalog order is preserved within each department; it decides which entry
/// wins when several share a normalized label.
#[derive(Debug, Clone, Default)]
pub struct SensitiveAreaCatalog {
    entries: Vec<SensitiveAreaCatalogEntry>,
    by_department: HashMap<DeptId, Vec<IndexedEntry>>,
}

impl SensitiveAreaCatalog {
    /// Create empty catalog
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from catalog entries
    #[must_use]
    pub fn from_entries(entries: impl IntoIterator<Item = SensitiveAreaCatalogEntry>) -> Self {
        let mut catalog = Self::new();
        for entry in entries {
            catalog.push(entry);
        }
        catalog
    }

    /// Build from a raw catalog payload
    ///
    /// Accepts flat rows (`{areaId, departmentId, label}`) as well as rows
    /// per department that nest their area records.
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let mut catalog = Self::new();
        for record in unwrap(payload) {
            let Some(dept_id) = field_id::<DeptId>(&record, aliases::CATALOG_DEPT_ID) else {
                tracing::debug!("Skipping catalog row without department: {}", record);
                continue;
            };

            let nested: Vec<Value> = field_list(&record, aliases::SENSITIVE_AREA_LABELS)
                .into_iter()
                .filter(Value::is_object)
                .collect();
            let rows = if nested.is_empty() { vec![record] } else { nested };

            for row in rows {
                match (
                    field_id::<AreaId>(&row, aliases::AREA_ID),
                    field_str(&row, aliases::AREA_LABEL),
                ) {
                    (Some(area_id), Some(label)) => catalog.push(SensitiveAreaCatalogEntry {
                        area_id,
                        dept_id: dept_id.clone(),
                        label,
                    }),
                    _ => tracing::debug!("Skipping incomplete catalog row: {}", row),
                }
            }
        }
        catalog
    }

    fn push(&mut self, entry: SensitiveAreaCatalogEntry) {
        let normalized = normalize_text(&entry.label);
        if !normalized.is_empty() {
            self.by_department
                .entry(entry.dept_id.clone())
                .or_default()
                .push(IndexedEntry {
                    area_id: entry.area_id.clone(),
                    normalized,
                });
        }
        self.entries.push(entry);
    }

    /// All entries in catalog order
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[SensitiveAreaCatalogEntry] {
        &self.entries
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if catalog is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn department(&self, dept_id: &DeptId) -> &[IndexedEntry] {
        self.by_department.get(dept_id).map(Vec::as_slice).unwrap_or_default()
    }
}

/// Department name to id lookup
#[derive(Debug, Clone, Default)]
pub struct DepartmentDirectory {
    by_name: HashMap<String, DeptId>,
}

impl DepartmentDirectory {
    /// Create empty directory
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a raw department list payload
    #[must_use]
    pub fn from_payload(payload: &Value) -> Self {
        let mut directory = Self::new();
        for record in unwrap(payload) {
            match (
                field_id::<DeptId>(&record, aliases::DEPT_ID),
                field_str(&record, aliases::DEPT_NAME),
            ) {
                (Some(dept_id), Some(name)) => directory.insert(name, dept_id),
                _ => tracing::debug!("Skipping department row without id or name: {}", record),
            }
        }
        directory
    }

    /// Register a department name; the first registration of a name wins
    pub fn insert(&mut self, name: impl AsRef<str>, dept_id: impl Into<DeptId>) {
        let key = normalize_text(name.as_ref());
        if !key.is_empty() {
            self.by_name.entry(key).or_insert_with(|| dept_id.into());
        }
    }

    /// Look up a department by name (trimmed, case-folded)
    #[inline]
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&DeptId> {
        self.by_name.get(&normalize_text(name))
    }

    /// Number of named departments
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Check if directory is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl<S: AsRef<str>, D: Into<DeptId>> FromIterator<(S, D)> for DepartmentDirectory {
    fn from_iter<I: IntoIterator<Item = (S, D)>>(iter: I) -> Self {
        let mut directory = Self::new();
        for (name, dept_id) in iter {
            directory.insert(name, dept_id);
        }
        directory
    }
}

/// Result of resolving the labels of one department
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaResolution {
    /// Resolved catalog ids
    pub area_ids: BTreeSet<AreaId>,
    /// Labels without a unique catalog match (includes ambiguous ones)
    pub unmatched_labels: BTreeSet<String>,
    /// Ambiguous labels with their candidate ids
    pub ambiguous: BTreeMap<String, Vec<AreaId>>,
}

impl AreaResolution {
    /// Check if every label resolved
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.unmatched_labels.is_empty()
    }

    /// Fold another resolution into this one
    pub fn merge(&mut self, other: AreaResolution) {
        self.area_ids.extend(other.area_ids);
        self.unmatched_labels.extend(other.unmatched_labels);
        self.ambiguous.extend(other.ambiguous);
    }
}

/// Flat selections distributed over the sensitive departments of a form
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlatResolution {
    /// Resolution per sensitive department
    pub per_department: BTreeMap<DeptId, AreaResolution>,
    /// Selections no sensitive department could claim
    pub unassigned: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelMatch {
    Found(AreaId),
    Ambiguous(Vec<AreaId>),
    NotFound,
}

/// Resolver over an explicit catalog and department directory
#[derive(Debug, Clone, Copy)]
pub struct SensitiveAreaResolver<'a> {
    catalog: &'a SensitiveAreaCatalog,
    directory: &'a DepartmentDirectory,
}

impl<'a> SensitiveAreaResolver<'a> {
    /// Create resolver
    #[inline]
    #[must_use]
    pub fn new(catalog: &'a SensitiveAreaCatalog, directory: &'a DepartmentDirectory) -> Self {
        Self { catalog, directory }
    }

    /// Resolve the labels of one department
    ///
    /// Duplicate labels collapse; an empty label set resolves to nothing.
    #[must_use]
    pub fn resolve<S: AsRef<str>>(&self, dept_id: &DeptId, labels: &[S]) -> AreaResolution {
        let mut resolution = AreaResolution::default();
        let unique: BTreeSet<&str> = labels
            .iter()
            .map(|l| l.as_ref().trim())
            .filter(|l| !l.is_empty())
            .collect();

        for label in unique {
            match self.resolve_label(dept_id, label) {
                LabelMatch::Found(area_id) => {
                    resolution.area_ids.insert(area_id);
                }
                LabelMatch::Ambiguous(candidates) => {
                    tracing::warn!(
                        "Ambiguous sensitive area '{}' for department {}: {} candidates",
                        label,
                        dept_id,
                        candidates.len()
                    );
                    resolution.unmatched_labels.insert(label.to_string());
                    resolution.ambiguous.insert(label.to_string(), candidates);
                }
                LabelMatch::NotFound => {
                    tracing::warn!("Unmatched sensitive area '{}' for department {}", label, dept_id);
                    resolution.unmatched_labels.insert(label.to_string());
                }
            }
        }
        resolution
    }

    /// Resolve a form's department labels together with its flat selections
    ///
    /// Compound selections go to the department they name when that
    /// department is sensitive on the form; bare selections go to the first
    /// sensitive department (in form order) whose catalog resolves them.
    #[must_use]
    pub fn resolve_flat<S: AsRef<str>>(
        &self,
        selections: &[S],
        departments: &[DepartmentSelection],
    ) -> FlatResolution {
        let sensitive: Vec<&DepartmentSelection> = departments.iter().filter(|d| d.sensitive).collect();
        let mut result = FlatResolution::default();
        for dept in &sensitive {
            let resolution = self.resolve(&dept.dept_id, &dept.area_labels);
            result
                .per_department
                .entry(dept.dept_id.clone())
                .or_default()
                .merge(resolution);
        }

        for selection in selections.iter().map(|s| s.as_ref().trim()).filter(|s| !s.is_empty()) {
            let named = selection
                .split_once(COMPOUND_SEPARATOR)
                .and_then(|(_, name)| self.directory.lookup(name))
                .filter(|dept_id| sensitive.iter().any(|d| &d.dept_id == *dept_id));

            if let Some(dept_id) = named {
                let resolution = self.resolve(dept_id, &[selection]);
                result.per_department.entry(dept_id.clone()).or_default().merge(resolution);
                continue;
            }

            let claimed = sensitive.iter().find_map(|dept| match self.resolve_label(&dept.dept_id, selection) {
                LabelMatch::Found(area_id) => Some((dept.dept_id.clone(), area_id)),
                _ => None,
            });
            match claimed {
                Some((dept_id, area_id)) => {
                    result.per_department.entry(dept_id).or_default().area_ids.insert(area_id);
                }
                None => {
                    tracing::warn!("Sensitive area selection '{}' matched no department", selection);
                    result.unassigned.insert(selection.to_string());
                }
            }
        }
        result
    }

    fn resolve_label(&self, dept_id: &DeptId, label: &str) -> LabelMatch {
        let direct = self.match_in_department(dept_id, &normalize_text(label));
        if let LabelMatch::Found(_) = direct {
            return direct;
        }

        let compound = label.split_once(COMPOUND_SEPARATOR).and_then(|(area, name)| {
            let resolved = self.directory.lookup(name)?;
            Some(self.match_in_department(resolved, &normalize_text(area)))
        });
        match (direct, compound) {
            (_, Some(found @ LabelMatch::Found(_))) => found,
            (LabelMatch::Ambiguous(candidates), _) | (_, Some(LabelMatch::Ambiguous(candidates))) => {
                LabelMatch::Ambiguous(candidates)
            }
            _ => LabelMatch::NotFound,
        }
    }

    fn match_in_department(&self, dept_id: &DeptId, label: &str) -> LabelMatch {
        if label.is_empty() {
            return LabelMatch::NotFound;
        }
        let entries = self.catalog.department(dept_id);

        if let Some(exact) = entries.iter().find(|e| e.normalized == label) {
            return LabelMatch::Found(exact.area_id.clone());
        }

        let candidates: Vec<AreaId> = entries
            .iter()
            .filter(|e| label.contains(e.normalized.as_str()) || e.normalized.contains(label))
            .map(|e| e.area_id.clone())
            .collect();
        match candidates.len() {
            0 => LabelMatch::NotFound,
            1 => candidates.into_iter().next().map_or(LabelMatch::NotFound, LabelMatch::Found),
            _ => LabelMatch::Ambiguous(candidates),
        }
    }
}

/// Resolve one department's labels against an explicit catalog and directory
#[must_use]
pub fn resolve<S: AsRef<str>>(
    dept_id: &DeptId,
    labels: &[S],
    catalog: &SensitiveAreaCatalog,
    directory: &DepartmentDirectory,
) -> AreaResolution {
    SensitiveAreaResolver::new(catalog, directory).resolve(dept_id, labels)
}
