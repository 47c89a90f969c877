//! Shared fixtures

use chrono::NaiveDate;
use plansync_core::{
    DepartmentSelection, DeptId, PlanForm, PlanHeader, PlanPeriod, ScheduleMilestone, SensitiveAreaCatalogEntry,
    TeamMembership,
};

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap_or_default()
}

pub fn fy24_header() -> PlanHeader {
    PlanHeader::new("FY24 IT general controls")
        .with_description("Annual audit of IT general controls")
        .with_period(PlanPeriod::new(date(2024, 1, 1), date(2024, 12, 31)))
}

/// Catalog with one "Server Room" in IT and two labs in Research
pub fn catalog() -> Vec<SensitiveAreaCatalogEntry> {
    vec![
        SensitiveAreaCatalogEntry::new("11", "7", "Server Room"),
        SensitiveAreaCatalogEntry::new("12", "7", "Data Center"),
        SensitiveAreaCatalogEntry::new("21", "8", "Chemistry Lab"),
        SensitiveAreaCatalogEntry::new("22", "8", "Biology Lab"),
    ]
}

pub fn directory() -> Vec<(DeptId, &'static str)> {
    vec![
        (DeptId::from("7"), "IT"),
        (DeptId::from("8"), "Research"),
        (DeptId::from("9"), "Finance"),
    ]
}

/// 2 departments, 3 criteria, 2 members, no schedules, 1 template
pub fn create_form() -> PlanForm {
    PlanForm::new(fy24_header())
        .with_department(DepartmentSelection::new("1"))
        .with_department(DepartmentSelection::new("2"))
        .with_criterion("c1")
        .with_criterion("c2")
        .with_criterion("c3")
        .with_member(TeamMembership::new("u1", "Lead auditor").as_lead())
        .with_member(TeamMembership::new("u2", "Auditor"))
        .with_template("t1")
}

/// Form touching every kind, with a sensitive IT department
pub fn full_form() -> PlanForm {
    PlanForm::new(fy24_header())
        .with_department(DepartmentSelection::new("7").sensitive(["Server Room - IT"]))
        .with_department(DepartmentSelection::new("9"))
        .with_criterion("c1")
        .with_member(TeamMembership::new("u1", "Lead auditor").as_lead())
        .with_schedule(
            ScheduleMilestone::new("Fieldwork").with_dates(Some(date(2024, 3, 1)), Some(date(2024, 3, 29))),
        )
        .with_schedule(ScheduleMilestone::new("Report").with_dates(Some(date(2024, 4, 15)), None))
        .with_template("t1")
        .with_template("t2")
}
