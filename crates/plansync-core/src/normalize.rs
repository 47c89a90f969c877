//! Response normalization
//!
//! One boundary for the envelope shapes and field spellings the remote
//! endpoints produce:
//! - [`unwrap`] turns any collection payload into an ordered record sequence
//! - [`resolve_field`] reads the first present alias of a logical field
//! - typed helpers read ids, text, flags, dates and lists on top of it
//!
//! Nothing here fails: absence is returned as `None` or an empty sequence and
//! callers decide what absence means.

use chrono::NaiveDate;
use serde_json::Value;

/// Envelope keys that wrap a collection
const ENVELOPE_KEYS: [&str; 2] = ["values", "$values"];

/// Canonical alias lists, in priority order
pub mod aliases {
    /// Plan id
    pub const PLAN_ID: &[&str] = &["auditPlanId", "AuditPlanId", "planId", "PlanId", "id", "Id"];
    /// Plan title
    pub const PLAN_TITLE: &[&str] = &["title", "Title", "planTitle", "PlanTitle", "name", "Name"];
    /// Plan description
    pub const PLAN_DESCRIPTION: &[&str] = &["description", "Description", "scope", "Scope"];
    /// Plan status
    pub const PLAN_STATUS: &[&str] = &["status", "Status", "planStatus", "PlanStatus"];
    /// Plan period start
    pub const PERIOD_START: &[&str] = &["periodStart", "PeriodStart", "startDate", "StartDate", "fromDate"];
    /// Plan period end
    pub const PERIOD_END: &[&str] = &["periodEnd", "PeriodEnd", "endDate", "EndDate", "toDate"];

    /// Embedded department collection of a plan detail
    pub const EMBEDDED_DEPARTMENTS: &[&str] =
        &["scopeDepartments", "ScopeDepartments", "departments", "Departments"];
    /// Embedded criteria collection of a plan detail
    pub const EMBEDDED_CRITERIA: &[&str] = &["criteria", "Criteria", "auditCriteria", "AuditCriteria"];
    /// Embedded team collection of a plan detail
    pub const EMBEDDED_TEAM: &[&str] = &["teamMembers", "TeamMembers", "auditTeams", "AuditTeams", "team"];
    /// Embedded schedule collection of a plan detail
    pub const EMBEDDED_SCHEDULES: &[&str] = &["schedules", "Schedules", "auditSchedules", "AuditSchedules"];
    /// Embedded checklist template collection of a plan detail
    pub const EMBEDDED_TEMPLATES: &[&str] =
        &["checklistTemplates", "ChecklistTemplates", "templates", "Templates"];

    /// Department id
    pub const DEPT_ID: &[&str] = &["departmentId", "DepartmentId", "deptId", "DeptId", "department_id", "id"];
    /// Department display name
    pub const DEPT_NAME: &[&str] = &["departmentName", "DepartmentName", "deptName", "name", "Name"];
    /// Department sensitive flag
    pub const SENSITIVE_FLAG: &[&str] = &["sensitiveFlag", "SensitiveFlag", "isSensitive", "IsSensitive", "sensitive"];
    /// Department sensitive area ids
    pub const SENSITIVE_AREA_IDS: &[&str] =
        &["sensitiveAreaIds", "SensitiveAreaIds", "areaIds", "AreaIds"];
    /// Department sensitive area labels
    pub const SENSITIVE_AREA_LABELS: &[&str] =
        &["sensitiveAreas", "SensitiveAreas", "sensitiveArea", "SensitiveArea", "sensitiveAreaLabels", "areas"];

    /// Department id of a catalog entry (`id` there is the area's own id)
    pub const CATALOG_DEPT_ID: &[&str] =
        &["departmentId", "DepartmentId", "deptId", "DeptId", "department_id"];
    /// Catalog entry id
    pub const AREA_ID: &[&str] = &["sensitiveAreaId", "SensitiveAreaId", "areaId", "AreaId", "id", "Id"];
    /// Catalog entry label
    pub const AREA_LABEL: &[&str] = &["sensitiveArea", "SensitiveArea", "sensitiveAreas", "area", "name"];

    /// Criterion id
    pub const CRITERION_ID: &[&str] =
        &["criterionId", "CriterionId", "criteriaId", "CriteriaId", "auditCriteriaId", "id"];

    /// Team member user id
    pub const USER_ID: &[&str] = &["userId", "UserId", "auditorId", "AuditorId", "memberId", "id"];
    /// Team member role
    pub const ROLE: &[&str] = &["role", "Role", "roleName", "RoleName", "teamRole"];
    /// Team lead flag
    pub const IS_LEAD: &[&str] = &["isLead", "IsLead", "isLeader", "IsLeader", "lead"];

    /// Milestone name
    pub const MILESTONE_NAME: &[&str] =
        &["milestoneName", "MilestoneName", "milestone", "scheduleName", "name", "Name"];
    /// Milestone start date
    pub const MILESTONE_START: &[&str] = &["startDate", "StartDate", "fromDate", "start"];
    /// Milestone end date
    pub const MILESTONE_END: &[&str] = &["endDate", "EndDate", "dueDate", "DueDate", "toDate", "end"];

    /// Checklist template id
    pub const TEMPLATE_ID: &[&str] =
        &["checklistTemplateId", "ChecklistTemplateId", "templateId", "TemplateId", "id"];
}

/// Convert a collection payload into an ordered record sequence
///
/// Accepted shapes: a bare array, `{"values": [...]}`, `{"$values": [...]}`,
/// or a single non-empty object. Anything else (including `null`, `{}` and
/// envelopes holding `null`) is an empty sequence.
#[must_use]
pub fn unwrap(payload: &Value) -> Vec<Value> {
    match payload {
        Value::Array(items) => items.clone(),
        Value::Object(map) => {
            for key in ENVELOPE_KEYS {
                match map.get(key) {
                    Some(Value::Array(items)) => return items.clone(),
                    Some(Value::Null) => return Vec::new(),
                    _ => {}
                }
            }
            if map.is_empty() {
                Vec::new()
            } else {
                vec![payload.clone()]
            }
        }
        _ => Vec::new(),
    }
}

/// First present, non-null value among candidate field names
///
/// Candidates are tried in the given order, so the result never depends on
/// the key order of the record.
#[must_use]
pub fn resolve_field<'a>(record: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    let map = record.as_object()?;
    candidates
        .iter()
        .find_map(|name| map.get(*name).filter(|v| !v.is_null()))
}

/// Text field, trimmed; empty text is absent
#[must_use]
pub fn field_str(record: &Value, candidates: &[&str]) -> Option<String> {
    let text = match resolve_field(record, candidates)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Boolean field
///
/// Accepts JSON booleans, `"true"`/`"false"`, `"yes"`/`"no"` and `1`/`0`.
#[must_use]
pub fn field_bool(record: &Value, candidates: &[&str]) -> Option<bool> {
    match resolve_field(record, candidates)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Identifier field (string or integer)
#[must_use]
pub fn field_id<T>(record: &Value, candidates: &[&str]) -> Option<T>
where
    T: TryFrom<Value>,
{
    resolve_field(record, candidates).and_then(|v| T::try_from(v.clone()).ok())
}

/// Calendar date field
///
/// Reads the `YYYY-MM-DD` prefix, so date-time strings are accepted too.
#[must_use]
pub fn field_date(record: &Value, candidates: &[&str]) -> Option<NaiveDate> {
    let text = resolve_field(record, candidates)?.as_str()?.trim();
    let day = text.get(..10)?;
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

/// List field
///
/// Accepts an array, an enveloped array, or a comma-separated string.
#[must_use]
pub fn field_list(record: &Value, candidates: &[&str]) -> Vec<Value> {
    match resolve_field(record, candidates) {
        Some(Value::String(joined)) => joined
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect(),
        Some(value) => unwrap(value),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeptId;
    use serde_json::json;

    #[test]
    fn unwrap_accepts_every_envelope() {
        let records = json!([{"id": 1}, {"id": 2}]);
        assert_eq!(unwrap(&records).len(), 2);
        assert_eq!(unwrap(&json!({"values": [{"id": 1}]})).len(), 1);
        assert_eq!(unwrap(&json!({"$values": [{"id": 1}, {"id": 2}, {"id": 3}]})).len(), 3);
        assert_eq!(unwrap(&json!({"id": 1, "name": "IT"})), vec![json!({"id": 1, "name": "IT"})]);
    }

    #[test]
    fn unwrap_defaults_to_empty() {
        assert!(unwrap(&json!(null)).is_empty());
        assert!(unwrap(&json!({})).is_empty());
        assert!(unwrap(&json!("text")).is_empty());
        assert!(unwrap(&json!(42)).is_empty());
        assert!(unwrap(&json!({"values": null})).is_empty());
        assert!(unwrap(&json!({"$values": null})).is_empty());
    }

    #[test]
    fn unwrap_is_idempotent_on_bare_sequences() {
        let payload = json!({"$values": [{"values": [1]}, {"id": 2}]});
        let once = unwrap(&payload);
        let twice = unwrap(&Value::Array(once.clone()));
        assert_eq!(once, twice);
        assert_eq!(twice[0], json!({"values": [1]}));
    }

    #[test]
    fn resolve_field_follows_priority_not_key_order() {
        let forward = json!({"sensitiveArea": "Vault", "name": "Dept"});
        let backward: Value =
            serde_json::from_str(r#"{"name": "Dept", "sensitiveArea": "Vault"}"#).unwrap();
        let candidates = ["sensitiveArea", "SensitiveArea", "sensitiveAreas", "area", "name"];

        assert_eq!(resolve_field(&forward, &candidates), Some(&json!("Vault")));
        assert_eq!(resolve_field(&backward, &candidates), Some(&json!("Vault")));
    }

    #[test]
    fn resolve_field_skips_null_and_missing() {
        let record = json!({"sensitiveArea": null, "area": "Lab"});
        assert_eq!(resolve_field(&record, aliases::AREA_LABEL), Some(&json!("Lab")));
        assert_eq!(resolve_field(&record, &["missing"]), None);
        assert_eq!(resolve_field(&json!([1, 2]), &["0"]), None);
    }

    #[test]
    fn typed_helpers() {
        let record = json!({
            "DepartmentId": 7,
            "title": "  ",
            "isLead": "yes",
            "startDate": "2024-03-01T00:00:00Z",
            "areas": "Lab, Vault ,",
        });

        assert_eq!(field_id::<DeptId>(&record, aliases::DEPT_ID), Some(DeptId::from(7)));
        assert_eq!(field_str(&record, &["title"]), None);
        assert_eq!(field_bool(&record, aliases::IS_LEAD), Some(true));
        assert_eq!(
            field_date(&record, aliases::MILESTONE_START),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(field_list(&record, &["areas"]), vec![json!("Lab"), json!("Vault")]);
        assert!(field_list(&record, &["missing"]).is_empty());
    }

    #[test]
    fn field_date_rejects_garbage() {
        assert_eq!(field_date(&json!({"d": "03/01/2024"}), &["d"]), None);
        assert_eq!(field_date(&json!({"d": "2024"}), &["d"]), None);
        assert_eq!(field_date(&json!({"d": 20240301}), &["d"]), None);
    }
}
