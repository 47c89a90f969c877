//! Decoding of normalized remote records into typed values
//!
//! Records without an identity field are skipped with a debug event; they
//! are never given a made-up key.

use crate::normalize::{aliases, field_bool, field_date, field_id, field_list, field_str, resolve_field};
use crate::types::{
    AreaId, ChecklistTemplateAssociation, CriterionAssociation, CriterionId, DepartmentAssociation,
    DeptId, MilestoneName, PlanHeader, PlanId, PlanPeriod, ScheduleMilestone, TeamMembership,
    TemplateId, UserId,
};
use serde_json::Value;
use std::collections::BTreeSet;

/// Decoding of one association kind from a remote record
pub trait DecodeRecord: Sized {
    /// Decode a record; `None` when the identity field is missing
    fn decode(record: &Value) -> Option<Self>;
}

/// Decode every record of a normalized sequence, skipping undecodable rows
pub fn decode_all<T: DecodeRecord>(records: &[Value]) -> Vec<T> {
    records
        .iter()
        .filter_map(|record| {
            let decoded = T::decode(record);
            if decoded.is_none() {
                tracing::debug!(
                    "Skipping record without identity ({}): {}",
                    std::any::type_name::<T>(),
                    record
                );
            }
            decoded
        })
        .collect()
}

/// Read the plan id from a detail, summary or creation response
#[must_use]
pub fn plan_id(record: &Value) -> Option<PlanId> {
    field_id(record, aliases::PLAN_ID)
}

/// Read root plan fields from a detail or summary row
#[must_use]
pub fn plan_header(record: &Value) -> PlanHeader {
    let period = match (
        field_date(record, aliases::PERIOD_START),
        field_date(record, aliases::PERIOD_END),
    ) {
        (Some(start), Some(end)) => Some(PlanPeriod::new(start, end)),
        _ => None,
    };
    PlanHeader {
        title: field_str(record, aliases::PLAN_TITLE).unwrap_or_default(),
        description: field_str(record, aliases::PLAN_DESCRIPTION),
        status: field_str(record, aliases::PLAN_STATUS),
        period,
    }
}

/// Read a label from a string or from a record carrying one
fn label_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()).filter(|s| !s.is_empty()),
        Value::Object(_) => field_str(value, aliases::AREA_LABEL),
        _ => None,
    }
}

/// Read an area id from a scalar or from a record carrying one
fn area_id_of(value: &Value) -> Option<AreaId> {
    match value {
        Value::Object(_) => field_id(value, aliases::AREA_ID),
        other => AreaId::from_value(other),
    }
}

impl DecodeRecord for DepartmentAssociation {
    fn decode(record: &Value) -> Option<Self> {
        let dept_id: DeptId = field_id(record, aliases::DEPT_ID)?;

        let sensitive_area_ids: BTreeSet<AreaId> = field_list(record, aliases::SENSITIVE_AREA_IDS)
            .iter()
            .filter_map(area_id_of)
            .collect();

        // Label collections sometimes hold objects that carry the id as well
        let label_values = field_list(record, aliases::SENSITIVE_AREA_LABELS);
        let sensitive_area_labels: BTreeSet<String> = label_values.iter().filter_map(label_of).collect();
        let embedded_ids = label_values
            .iter()
            .filter(|v| v.is_object())
            .filter_map(area_id_of);
        let sensitive_area_ids: BTreeSet<AreaId> = sensitive_area_ids.into_iter().chain(embedded_ids).collect();

        let sensitive = field_bool(record, aliases::SENSITIVE_FLAG)
            .unwrap_or(!sensitive_area_ids.is_empty() || !sensitive_area_labels.is_empty());

        Some(Self {
            dept_id,
            sensitive,
            sensitive_area_ids,
            sensitive_area_labels,
        })
    }
}

impl DecodeRecord for CriterionAssociation {
    fn decode(record: &Value) -> Option<Self> {
        // Some list endpoints return bare id arrays
        let criterion_id: CriterionId = match record {
            Value::Object(_) => field_id(record, aliases::CRITERION_ID)?,
            other => CriterionId::from_value(other)?,
        };
        Some(Self { criterion_id })
    }
}

impl DecodeRecord for TeamMembership {
    fn decode(record: &Value) -> Option<Self> {
        let user_id: UserId = field_id(record, aliases::USER_ID)?;
        Some(Self {
            user_id,
            role: field_str(record, aliases::ROLE).unwrap_or_default(),
            is_lead: field_bool(record, aliases::IS_LEAD).unwrap_or(false),
        })
    }
}

impl DecodeRecord for ScheduleMilestone {
    fn decode(record: &Value) -> Option<Self> {
        let name = field_str(record, aliases::MILESTONE_NAME)?;
        Some(Self {
            name: MilestoneName::new(name),
            start: field_date(record, aliases::MILESTONE_START),
            end: field_date(record, aliases::MILESTONE_END),
        })
    }
}

impl DecodeRecord for ChecklistTemplateAssociation {
    fn decode(record: &Value) -> Option<Self> {
        let template_id: TemplateId = match record {
            Value::Object(_) => field_id(record, aliases::TEMPLATE_ID)?,
            other => TemplateId::from_value(other)?,
        };
        Some(Self { template_id })
    }
}

/// Embedded collection of a plan detail, if the detail carries one
#[must_use]
pub fn embedded<'a>(detail: &'a Value, candidates: &[&str]) -> Option<&'a Value> {
    resolve_field(detail, candidates)
}
