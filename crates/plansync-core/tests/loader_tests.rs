use plansync_core::{
    AssociationKind, CriterionAssociation, DepartmentAssociation, LoadError, LoadSource, MilestoneName,
    PlanAggregateLoader, PlanHeader, PlanId, RemoteError, ScheduleMilestone, SyncConfig, TeamMembership,
};
use plansync_test_utils::{fixtures, seeded_client, Call, Envelope, FailurePoint, InMemoryPlanClient};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn seed_fy24(client: &InMemoryPlanClient, plan_id: &PlanId) {
    client.seed_plan(plan_id, fixtures::fy24_header());
    // Stored with labels only, as older plans were
    let mut it = DepartmentAssociation::new("7").with_labels(["Server Room - IT"]);
    it.sensitive = true;
    client.seed(plan_id, &it);
    client.seed(plan_id, &CriterionAssociation::new("c1"));
    client.seed(plan_id, &TeamMembership::new("u1", "Lead auditor").as_lead());
    client.seed(plan_id, &ScheduleMilestone::new("Fieldwork"));
}

fn loader(client: &Arc<InMemoryPlanClient>) -> PlanAggregateLoader {
    PlanAggregateLoader::new(client.clone(), SyncConfig::default())
}

#[tokio::test]
async fn every_envelope_style_loads_the_same_aggregate() {
    for envelope in [Envelope::Bare, Envelope::Values, Envelope::DollarValues] {
        let client = Arc::new(seeded_client().with_envelope(envelope));
        let plan_id = PlanId::from("42");
        seed_fy24(&client, &plan_id);

        let loaded = loader(&client).load(&plan_id).await.unwrap();

        assert_eq!(loaded.source, LoadSource::Detail, "{envelope:?}");
        assert!(loaded.is_complete(), "{envelope:?}");
        let aggregate = &loaded.aggregate;
        assert_eq!(aggregate.header.title, "FY24 IT general controls");
        assert_eq!(aggregate.header.period, fixtures::fy24_header().period);
        assert_eq!(aggregate.association_count(), 4, "{envelope:?}");
        assert!(aggregate.schedules.contains_key(&MilestoneName::new("fieldwork")));
    }
}

#[tokio::test]
async fn embedded_collections_skip_list_calls_except_schedules() {
    let client = Arc::new(seeded_client().with_embedded_collections(true));
    let plan_id = PlanId::from("42");
    seed_fy24(&client, &plan_id);

    let loaded = loader(&client).load(&plan_id).await.unwrap();

    assert_eq!(loaded.aggregate.association_count(), 4);
    let lists: Vec<AssociationKind> = client
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::List(kind, _) => Some(kind),
            _ => None,
        })
        .collect();
    // Embedded schedules are always empty and get refetched
    assert_eq!(lists, vec![AssociationKind::Schedules]);
}

#[tokio::test]
async fn department_labels_are_resolved_on_load() {
    let client = Arc::new(seeded_client());
    let plan_id = PlanId::from("42");
    seed_fy24(&client, &plan_id);

    let loaded = loader(&client).load(&plan_id).await.unwrap();

    let dept = loaded.aggregate.scope_departments.iter().next().unwrap();
    assert!(dept.sensitive);
    assert_eq!(dept.sensitive_area_ids.len(), 1);
    assert_eq!(dept.sensitive_area_ids.iter().next().unwrap().as_str(), "11");
}

#[tokio::test]
async fn failed_collection_is_reported_separately() {
    let client = Arc::new(seeded_client());
    let plan_id = PlanId::from("42");
    seed_fy24(&client, &plan_id);
    client.fail(FailurePoint::List(AssociationKind::Criteria), RemoteError::Transport("reset".into()));

    let loaded = loader(&client).load(&plan_id).await.unwrap();

    assert!(!loaded.is_complete());
    assert_eq!(loaded.errors.keys().copied().collect::<Vec<_>>(), vec![AssociationKind::Criteria]);
    assert!(loaded.aggregate.criteria.is_empty());
    assert_eq!(loaded.aggregate.team.len(), 1);
}

#[tokio::test]
async fn unavailable_detail_falls_back_to_cached_summary() {
    let client = Arc::new(seeded_client());
    let plan_id = PlanId::from("42");
    seed_fy24(&client, &plan_id);
    let loader = loader(&client);

    assert_eq!(loader.refresh_summaries().await.unwrap(), 1);
    client.fail(FailurePoint::Detail(plan_id.clone()), RemoteError::Transport("timeout".into()));

    let loaded = loader.load(&plan_id).await.unwrap();

    assert_eq!(loaded.source, LoadSource::CachedSummary);
    assert_eq!(loaded.aggregate.header.title, "FY24 IT general controls");
    assert_eq!(loaded.aggregate.criteria.len(), 1);
}

#[tokio::test]
async fn unavailable_detail_without_summary_is_an_error() {
    let client = Arc::new(seeded_client());
    let plan_id = PlanId::from("42");
    seed_fy24(&client, &plan_id);
    client.fail(FailurePoint::Detail(plan_id.clone()), RemoteError::Transport("timeout".into()));

    let err = loader(&client).load(&plan_id).await.unwrap_err();

    assert!(matches!(err, LoadError::RootUnavailable { plan_id: ref id, .. } if *id == plan_id));
}

#[tokio::test]
async fn load_many_isolates_failures_and_keeps_order() {
    let client = Arc::new(seeded_client());
    let ids: Vec<PlanId> = ["1", "2", "3"].into_iter().map(PlanId::from).collect();
    for id in &ids {
        client.seed_plan(id, PlanHeader::new(format!("Plan {id}")));
    }
    client.fail(FailurePoint::Detail(ids[1].clone()), RemoteError::Transport("timeout".into()));

    let results = loader(&client).load_many(&ids, 2).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].as_ref().unwrap().aggregate.header.title, "Plan 1");
    assert!(results[1].is_err());
    assert_eq!(results[2].as_ref().unwrap().aggregate.header.title, "Plan 3");
}
