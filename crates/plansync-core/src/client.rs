//! Remote seam
//!
//! [`RemotePlanClient`] is the narrow async interface the engine consumes;
//! transport, authentication and retry live behind it. Read calls return raw
//! JSON, which the engine normalizes itself.
//!
//! [`AssociationEndpoint`] binds each association kind to its three client
//! calls so reconciliation can stay generic over the kind.

use crate::decode::DecodeRecord;
use crate::error::RemoteResult;
use crate::normalize::aliases;
use crate::types::{
    Association, ChecklistTemplateAssociation, CriterionAssociation, CriterionId, DepartmentAssociation, DeptId,
    MilestoneName, PlanHeader, PlanId, ScheduleMilestone, TeamMembership, TemplateId, UserId,
};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;

/// Remote plan service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemotePlanClient: Send + Sync {
    /// Plan detail, possibly embedding association collections
    async fn get_plan(&self, plan_id: &PlanId) -> RemoteResult<Value>;

    /// List-view summary rows of every plan
    async fn list_plans(&self) -> RemoteResult<Value>;

    /// Create the root plan resource; the response carries the assigned id
    async fn create_root_plan(&self, header: &PlanHeader) -> RemoteResult<Value>;

    /// Update root plan fields
    async fn update_root_plan(&self, plan_id: &PlanId, header: &PlanHeader) -> RemoteResult<()>;

    /// Scope departments of a plan
    async fn list_departments(&self, plan_id: &PlanId) -> RemoteResult<Value>;

    /// Add a scope department
    async fn add_department(&self, plan_id: &PlanId, department: &DepartmentAssociation) -> RemoteResult<()>;

    /// Remove a scope department
    async fn remove_department(&self, plan_id: &PlanId, dept_id: &DeptId) -> RemoteResult<()>;

    /// Criteria of a plan
    async fn list_criteria(&self, plan_id: &PlanId) -> RemoteResult<Value>;

    /// Add a criterion
    async fn add_criterion(&self, plan_id: &PlanId, criterion: &CriterionAssociation) -> RemoteResult<()>;

    /// Remove a criterion
    async fn remove_criterion(&self, plan_id: &PlanId, criterion_id: &CriterionId) -> RemoteResult<()>;

    /// Team of a plan
    async fn list_team(&self, plan_id: &PlanId) -> RemoteResult<Value>;

    /// Add a team member
    async fn add_team_member(&self, plan_id: &PlanId, member: &TeamMembership) -> RemoteResult<()>;

    /// Remove a team member
    async fn remove_team_member(&self, plan_id: &PlanId, user_id: &UserId) -> RemoteResult<()>;

    /// Schedule milestones of a plan
    async fn list_schedules(&self, plan_id: &PlanId) -> RemoteResult<Value>;

    /// Add a schedule milestone
    async fn add_schedule(&self, plan_id: &PlanId, milestone: &ScheduleMilestone) -> RemoteResult<()>;

    /// Remove a schedule milestone
    async fn remove_schedule(&self, plan_id: &PlanId, name: &MilestoneName) -> RemoteResult<()>;

    /// Checklist templates of a plan
    async fn list_checklist_templates(&self, plan_id: &PlanId) -> RemoteResult<Value>;

    /// Attach a checklist template
    async fn add_checklist_template(
        &self,
        plan_id: &PlanId,
        template: &ChecklistTemplateAssociation,
    ) -> RemoteResult<()>;

    /// Detach a checklist template
    async fn remove_checklist_template(&self, plan_id: &PlanId, template_id: &TemplateId) -> RemoteResult<()>;

    /// Sensitive-area master catalog
    async fn get_sensitive_area_catalog(&self) -> RemoteResult<Value>;

    /// Department master list (ids and display names)
    async fn list_department_directory(&self) -> RemoteResult<Value>;
}

/// Shared client handle
pub type SharedClient = Arc<dyn RemotePlanClient>;

/// Client calls of one association kind
pub trait AssociationEndpoint: Association + DecodeRecord {
    /// Field names under which a plan detail embeds this collection
    const EMBEDDED: &'static [&'static str];

    /// Fetch the raw collection
    fn list<'a>(client: &'a dyn RemotePlanClient, plan_id: &'a PlanId) -> BoxFuture<'a, RemoteResult<Value>>;

    /// Add one association
    fn add<'a>(
        client: &'a dyn RemotePlanClient,
        plan_id: &'a PlanId,
        item: &'a Self,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Remove one association by key
    fn remove<'a>(
        client: &'a dyn RemotePlanClient,
        plan_id: &'a PlanId,
        key: &'a Self::Key,
    ) -> BoxFuture<'a, RemoteResult<()>>;
}

macro_rules! endpoint {
    ($ty:ty, $embedded:expr, $list:ident, $add:ident, $remove:ident) => {
        impl AssociationEndpoint for $ty {
            const EMBEDDED: &'static [&'static str] = $embedded;

            fn list<'a>(
                client: &'a dyn RemotePlanClient,
                plan_id: &'a PlanId,
            ) -> BoxFuture<'a, RemoteResult<Value>> {
                Box::pin(async move { client.$list(plan_id).await })
            }

            fn add<'a>(
                client: &'a dyn RemotePlanClient,
                plan_id: &'a PlanId,
                item: &'a Self,
            ) -> BoxFuture<'a, RemoteResult<()>> {
                Box::pin(async move { client.$add(plan_id, item).await })
            }

            fn remove<'a>(
                client: &'a dyn RemotePlanClient,
                plan_id: &'a PlanId,
                key: &'a Self::Key,
            ) -> BoxFuture<'a, RemoteResult<()>> {
                Box::pin(async move { client.$remove(plan_id, key).await })
            }
        }
    };
}

endpoint!(
    DepartmentAssociation,
    aliases::EMBEDDED_DEPARTMENTS,
    list_departments,
    add_department,
    remove_department
);
endpoint!(
    CriterionAssociation,
    aliases::EMBEDDED_CRITERIA,
    list_criteria,
    add_criterion,
    remove_criterion
);
endpoint!(
    TeamMembership,
    aliases::EMBEDDED_TEAM,
    list_team,
    add_team_member,
    remove_team_member
);
endpoint!(
    ScheduleMilestone,
    aliases::EMBEDDED_SCHEDULES,
    list_schedules,
    add_schedule,
    remove_schedule
);
endpoint!(
    ChecklistTemplateAssociation,
    aliases::EMBEDDED_TEMPLATES,
    list_checklist_templates,
    add_checklist_template,
    remove_checklist_template
);
