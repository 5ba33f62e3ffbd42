mod common;

use chrono::Duration;
use common::builders::now;
use common::strategies::*;
use proptest::prelude::*;

use fleet_reaper::reaper::VolumePolicy;
use fleet_reaper::{volume_decision, worker_decision, MembershipSnapshot, Worker, WorkerState};

fn snapshot() -> MembershipSnapshot {
    MembershipSnapshot::from_nodes(["ci-live", "ci-abc", "xy-1"])
}

fn policy() -> VolumePolicy {
    VolumePolicy {
        prefix: "ci-".to_string(),
        ..VolumePolicy::default()
    }
}

proptest! {
    /// Property: a worker is pruned iff it is stalled or landed, carries the
    /// prefix and is not a live node
    #[test]
    fn worker_pruned_iff_all_clauses_hold(
        name in resource_name_strategy(),
        state in worker_state_strategy(),
    ) {
        let snapshot = snapshot();
        let worker = Worker::new(name.clone(), state.clone());

        let expected = matches!(state, WorkerState::Stalled | WorkerState::Landed)
            && name.starts_with("ci-")
            && !snapshot.is_live(&name);

        prop_assert_eq!(worker_decision(&worker, "ci-", &snapshot).is_delete(), expected);
    }

    /// Property: an empty prefix reduces the worker predicate to state and liveness
    #[test]
    fn empty_worker_prefix_matches_every_name(
        name in resource_name_strategy(),
        state in worker_state_strategy(),
    ) {
        let snapshot = snapshot();
        let worker = Worker::new(name.clone(), state);
        let expected = worker.state.is_reapable() && !snapshot.is_live(&name);
        prop_assert_eq!(worker_decision(&worker, "", &snapshot).is_delete(), expected);
    }

    /// Property: a volume is deleted iff prefix, status, team tag, age, worker
    /// tag presence and owner liveness all permit it
    #[test]
    fn volume_deleted_iff_all_clauses_hold(case in volume_case_strategy()) {
        let snapshot = snapshot();
        let volume = case.build();

        let expected = case.name.starts_with("ci-")
            && case.status.as_str() == "available"
            && case.team.as_deref().is_some_and(|t| !t.is_empty())
            && Duration::seconds(case.age_secs) > Duration::hours(1)
            && case.owner.as_deref().is_some_and(|owner| !snapshot.is_live(owner));

        prop_assert_eq!(
            volume_decision(&volume, &policy(), &snapshot, now()).is_delete(),
            expected,
            "case: {:?}", case
        );
    }

    /// Property: predicates are pure; evaluating twice gives the same verdict
    #[test]
    fn volume_decision_is_deterministic(case in volume_case_strategy()) {
        let snapshot = snapshot();
        let volume = case.build();
        prop_assert_eq!(
            volume_decision(&volume, &policy(), &snapshot, now()),
            volume_decision(&volume, &policy(), &snapshot, now())
        );
    }
}
