//! Testing utilities for the plansync workspace
//!
//! In-memory remote service with envelope-style and failure injection, plus
//! shared fixtures.

#![allow(missing_docs)]

pub mod fixtures;
pub mod memory;

pub use memory::{Call, Envelope, FailurePoint, InMemoryPlanClient};

use plansync_core::{PlanSubmissionOrchestrator, SyncConfig};
use std::sync::Arc;

/// In-memory client seeded with the fixture catalog and directory
pub fn seeded_client() -> InMemoryPlanClient {
    InMemoryPlanClient::new()
        .with_catalog(fixtures::catalog())
        .with_departments(fixtures::directory())
}

/// Orchestrator over a shared in-memory client
pub fn setup_orchestrator(client: &Arc<InMemoryPlanClient>) -> PlanSubmissionOrchestrator {
    PlanSubmissionOrchestrator::new(client.clone(), SyncConfig::default())
}
