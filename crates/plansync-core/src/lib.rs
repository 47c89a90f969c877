//! plansync core - Plan Aggregate Reconciliation & Normalization Engine
//!
//! Keeps a composite audit plan (root fields plus five association
//! collections) in step with a remote service whose JSON shapes vary across
//! endpoints:
//! - Normalizes envelope shapes and field spellings at one boundary
//! - Resolves human-entered sensitive-area labels to catalog ids
//! - Loads plan aggregates with per-collection failure isolation
//! - Reconciles desired against current state into minimal remove/add plans
//! - Orchestrates create-or-update submissions with per-item outcome reports
//!
//! # Example
//!
//! ```rust,ignore
//! use plansync_core::prelude::*;
//!
//! # async fn example(client: SharedClient) -> Result<(), Box<dyn std::error::Error>> {
//! let orchestrator = PlanSubmissionOrchestrator::new(client, SyncConfig::new());
//!
//! let form = PlanForm::new(PlanHeader::new("FY24 IT audit"))
//!     .with_department(DepartmentSelection::new("7").sensitive(["Server Room - IT"]))
//!     .with_criterion("c-12");
//! let report = orchestrator.submit(form, None).await?;
//!
//! println!("Plan {} submitted: {:?}", report.plan_id, report.outcome());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod client;
pub mod config;
pub mod decode;
pub mod diff_sync;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod orchestrator;
pub mod sensitive_area;
pub mod state_machine;
pub mod types;

// Re-exports for convenience
pub use client::{AssociationEndpoint, RemotePlanClient, SharedClient};
pub use config::SyncConfig;
pub use decode::DecodeRecord;
pub use diff_sync::{reconcile, reconcile_sets, reconcile_with, DiffSyncEngine, ItemOutcome, ItemStatus, ReconcilePlan, SyncOp};
pub use error::{ConfigError, LoadError, RemoteError, RemoteResult, SubmissionError};
pub use loader::{LoadSource, LoadedAggregate, PlanAggregateLoader, SummaryCache};
pub use orchestrator::{KindReport, PlanSubmissionOrchestrator, SubmissionOutcome, SubmissionReport};
pub use sensitive_area::{
    AreaResolution, DepartmentDirectory, FlatResolution, SensitiveAreaCatalog, SensitiveAreaCatalogEntry,
    SensitiveAreaResolver,
};
pub use state_machine::{allowed_transitions, validate_transition, PhaseTrail, SubmissionPhase};
pub use types::{
    AreaId, Association, AssociationKind, AssociationSet, ChecklistTemplateAssociation, CriterionAssociation,
    CriterionId, DepartmentAssociation, DepartmentSelection, DeptId, MilestoneName, PlanAggregate, PlanForm,
    PlanHeader, PlanId, PlanPeriod, ScheduleMilestone, SubmissionId, TeamMembership, TemplateId, UserId,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with plansync core
    pub use crate::{
        AssociationKind, DepartmentSelection, PlanAggregateLoader, PlanForm, PlanHeader, PlanId,
        PlanSubmissionOrchestrator, RemotePlanClient, SharedClient, SubmissionOutcome, SubmissionReport,
        SyncConfig, TeamMembership,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
