//! A provisioning attempt that hits an unavailable provider fails over to
//! the next candidate and leaves exactly one `provision_failed` audit
//! record behind, attributed to the Router rather than the provider.

mod support;

use aion_domain::audit::{Actor, AuditOutcome};
use aion_providers::adapter::{InstanceRequest, ProviderAdapter};
use aion_providers::router::CandidateFilter;
use aion_providers::ProviderRouter;
use std::sync::Arc;
use std::time::Duration;
use support::{sample_demand, FlakyAdapter, RecordingSink};
use uuid::Uuid;

#[tokio::test]
async fn failover_skips_the_unavailable_provider_and_audits_the_failure() {
    let audit = Arc::new(RecordingSink::new());
    let mut router = ProviderRouter::new(0.5, 3, audit.clone());
    let flaky = Arc::new(FlakyAdapter::new("flaky", 1.0, 1));
    router.register(flaky.clone() as Arc<dyn ProviderAdapter>);
    router.register(Arc::new(support::CheckpointableAdapter::new("steady", 1.2)));

    let demand = sample_demand();
    let filter = CandidateFilter {
        demand: &demand,
        region_allow_list: &[],
    };
    let request = InstanceRequest {
        gpu_class: demand.gpu_class.clone(),
        region: "us-east-1".to_string(),
        demand: demand.clone(),
        provisioning_token: Uuid::new_v4(),
    };

    let instance = router
        .provision_with_failover(&filter, "us-east-1", request, Duration::from_secs(1))
        .await
        .expect("failover should land on the surviving provider");

    assert_eq!(flaky.attempt_count(), 1);
    assert_eq!(instance.provider, "steady");

    let records = audit.records();
    let failures: Vec<_> = records
        .iter()
        .filter(|r| r.action == "provision_failed")
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].actor, Actor::ProviderRouter);
    assert!(matches!(failures[0].outcome, AuditOutcome::Failed { .. }));
}
