//! End-to-end release scenarios against the in-memory cluster

mod common;

use common::World;
use futures::future::join_all;
use std::time::Duration;
use switchyard_cluster::ClusterError;
use switchyard_control::{Action, ControlError, RollbackOutcome, SupersedePolicy};
use switchyard_types::{
    ArtifactRef, ReleaseNoteKind, ReleaseOutcome, ReleasePhase, SwitchyardEvent, TrafficSplit,
};

const STEPS: &[u8] = &[10, 50, 100];

#[tokio::test]
async fn test_canary_promotes_through_every_step() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;

    let release = world.settle(None).await.unwrap();

    assert_eq!(release.outcome, Some(ReleaseOutcome::Stable));
    assert_eq!(release.traffic_history, vec![10, 50, 100]);
    assert!(release.verdicts.iter().all(|v| v.verdict.is_healthy()));

    let observed = world.observe().await;
    assert_eq!(observed.stable_version(), Some(&ArtifactRef::new("api:v2")));
    assert!(observed.canary.is_none());
    assert_eq!(observed.traffic, TrafficSplit::ALL_STABLE);
}

#[tokio::test]
async fn test_degraded_step_rolls_back_to_stable() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    let mut events = world.plane.subscribe();
    world.deploy("api:v2", STEPS).await;

    let release = world.settle(Some(50)).await.unwrap();

    assert_eq!(release.outcome, Some(ReleaseOutcome::RolledBack));
    assert_eq!(release.traffic_history, vec![10, 50, 0]);
    assert!(release.has_note(ReleaseNoteKind::HealthDegraded));

    let observed = world.observe().await;
    assert_eq!(observed.traffic.canary_percent(), 0);
    assert_eq!(observed.traffic.stable_percent(), 100);
    assert_eq!(observed.stable_version(), Some(&ArtifactRef::new("api:v1")));
    assert!(observed.canary.is_none());

    let mut finished = None;
    while let Ok(envelope) = events.try_recv() {
        if let SwitchyardEvent::ReleaseFinished { outcome, .. } = envelope.event {
            finished = Some(outcome);
        }
    }
    assert_eq!(finished, Some(ReleaseOutcome::RolledBack));
}

#[tokio::test]
async fn test_rolled_back_generation_is_not_retried() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;
    world.settle(Some(10)).await;

    assert_eq!(world.pass().await, Action::AwaitChange);
    assert_eq!(world.history().await.len(), 1);

    // Submitting the same version again is a new desired state
    world.deploy("api:v2", STEPS).await;
    let release = world.settle(None).await.unwrap();
    assert_eq!(release.outcome, Some(ReleaseOutcome::Stable));
    assert_eq!(world.history().await.len(), 2);
}

#[tokio::test]
async fn test_reconcile_is_idempotent_in_a_quiet_world() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;
    world.settle(None).await;

    let before = world.cluster.mutation_count();
    for _ in 0..5 {
        assert_eq!(world.pass().await, Action::AwaitChange);
    }
    assert_eq!(world.cluster.mutation_count(), before);
}

#[tokio::test]
async fn test_repeated_passes_while_waiting_do_not_mutate() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.cluster.set_auto_ready(false);
    world.deploy("api:v2", STEPS).await;

    world
        .tick_until(|r| r.phase == ReleasePhase::Deploying)
        .await;
    world.pass().await;
    assert!(world.observe().await.canary.is_some());

    let before = world.cluster.mutation_count();
    for _ in 0..5 {
        world.pass().await;
    }
    assert_eq!(world.cluster.mutation_count(), before);
}

#[tokio::test]
async fn test_latest_wins_supersedes_in_flight_release() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;
    world
        .tick_until(|r| r.phase == ReleasePhase::Evaluating)
        .await;

    world.deploy("api:v3", STEPS).await;
    assert_eq!(world.active_count().await, 1);

    let last = world.settle(None).await.unwrap();
    let history = world.history().await;

    assert_eq!(history.len(), 2);
    assert_eq!(history[0].target_version().as_str(), "api:v2");
    assert_eq!(history[0].outcome, Some(ReleaseOutcome::RolledBack));
    assert!(history[0].has_note(ReleaseNoteKind::Superseded));

    assert_eq!(last.target_version().as_str(), "api:v3");
    assert_eq!(last.outcome, Some(ReleaseOutcome::Stable));
    assert_eq!(last.previous_version, Some(ArtifactRef::new("api:v1")));
}

#[tokio::test]
async fn test_latest_wins_keeps_release_when_version_is_unchanged() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;
    world
        .tick_until(|r| r.traffic.canary_percent() == 50)
        .await;

    // Same version, only the replica count changed
    let mut resized = world.spec("api:v2", STEPS);
    resized.replicas = 3;
    let accepted = world.plane.admission.submit(resized).await.unwrap();
    assert_eq!(accepted.generation, 2);

    let last = world.settle(None).await.unwrap();
    let history = world.history().await;

    assert_eq!(history.len(), 1);
    assert_eq!(last.id, history[0].id);
    assert_eq!(last.outcome, Some(ReleaseOutcome::Stable));
    assert!(!last.has_note(ReleaseNoteKind::Superseded));
    assert!(!last.traffic_history.contains(&0));
    assert_eq!(world.observe().await.stable_version(), Some(&ArtifactRef::new("api:v2")));
}

#[tokio::test]
async fn test_queue_after_completion_finishes_in_flight_release_first() {
    let world = World::running_v1(SupersedePolicy::QueueAfterCompletion);
    world.deploy("api:v2", STEPS).await;
    world
        .tick_until(|r| r.phase == ReleasePhase::Evaluating)
        .await;

    world.deploy("api:v3", STEPS).await;
    world.deploy("api:v4", STEPS).await;

    let last = world.settle(None).await.unwrap();
    let history = world.history().await;

    // v3 was never started: only the newest queued desired state runs
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].target_version().as_str(), "api:v2");
    assert_eq!(history[0].outcome, Some(ReleaseOutcome::Stable));
    assert_eq!(last.target_version().as_str(), "api:v4");
    assert_eq!(last.previous_version, Some(ArtifactRef::new("api:v2")));
    assert_eq!(last.outcome, Some(ReleaseOutcome::Stable));
}

#[tokio::test]
async fn test_single_active_release_across_rapid_updates() {
    for policy in [SupersedePolicy::LatestWins, SupersedePolicy::QueueAfterCompletion] {
        let world = World::running_v1(policy);

        for (i, version) in ["api:v2", "api:v3", "api:v4", "api:v5"].iter().enumerate() {
            world.deploy(version, STEPS).await;
            for _ in 0..(3 + i * 2) {
                world.tick(None).await;
                assert!(world.active_count().await <= 1, "{policy:?}");
            }
        }

        let last = world.settle(None).await.unwrap();
        assert_eq!(last.target_version().as_str(), "api:v5", "{policy:?}");
        assert_eq!(last.outcome, Some(ReleaseOutcome::Stable));
    }
}

#[tokio::test]
async fn test_concurrent_passes_for_one_key_are_serialized() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;

    let passes = (0..16).map(|_| world.plane.reconciler.reconcile(&world.key));
    join_all(passes).await;

    assert_eq!(world.history().await.len(), 1);
    assert_eq!(world.active_count().await, 1);
}

#[tokio::test]
async fn test_operator_abort_returns_traffic_to_stable() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;
    let release = world
        .tick_until(|r| r.traffic.canary_percent() == 50)
        .await;

    let aborted = world
        .plane
        .operator
        .abort(&world.key, "bad dashboard")
        .await
        .unwrap();
    assert_eq!(aborted, release.id);

    let release = world.settle(None).await.unwrap();
    assert_eq!(release.outcome, Some(ReleaseOutcome::RolledBack));
    assert!(release.has_note(ReleaseNoteKind::Aborted));
    assert_eq!(release.traffic_history.last(), Some(&0));
    assert_eq!(world.observe().await.traffic, TrafficSplit::ALL_STABLE);

    // Nothing left to abort
    assert!(matches!(
        world.plane.operator.abort(&world.key, "again").await,
        Err(ControlError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_operator_rollback_restores_previous_release() {
    let world = World::empty(SupersedePolicy::LatestWins);

    world.deploy("api:v1", STEPS).await;
    let first = world.settle(None).await.unwrap();
    assert_eq!(first.outcome, Some(ReleaseOutcome::Stable));
    assert!(first.traffic_history.is_empty());

    world.deploy("api:v2", STEPS).await;
    world.settle(None).await;
    assert_eq!(
        world.observe().await.stable_version(),
        Some(&ArtifactRef::new("api:v2"))
    );

    let outcome = world.plane.operator.rollback(&world.key, None).await.unwrap();
    assert!(matches!(
        outcome,
        RollbackOutcome::Resubmitted { from_release, .. } if from_release == first.id
    ));

    let restored = world.settle(None).await.unwrap();
    assert_eq!(restored.target_version().as_str(), "api:v1");
    assert_eq!(restored.outcome, Some(ReleaseOutcome::Stable));
    assert_eq!(
        world.observe().await.stable_version(),
        Some(&ArtifactRef::new("api:v1"))
    );
}

#[tokio::test]
async fn test_operator_rollback_needs_an_earlier_release() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;
    world.settle(None).await;

    assert!(matches!(
        world.plane.operator.rollback(&world.key, None).await,
        Err(ControlError::NoRollbackTarget(_))
    ));
}

#[tokio::test]
async fn test_operator_rollback_aborts_in_flight_release() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;
    world
        .tick_until(|r| r.phase == ReleasePhase::Evaluating)
        .await;

    let outcome = world.plane.operator.rollback(&world.key, None).await.unwrap();
    assert!(matches!(outcome, RollbackOutcome::Aborted { .. }));

    let release = world.settle(None).await.unwrap();
    assert_eq!(release.outcome, Some(ReleaseOutcome::RolledBack));
}

#[tokio::test]
async fn test_readiness_timeout_fails_release() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.cluster.set_auto_ready(false);
    world.deploy("api:v2", STEPS).await;

    let release = world.settle(None).await.unwrap();

    assert_eq!(release.outcome, Some(ReleaseOutcome::Failed));
    assert!(release.has_note(ReleaseNoteKind::ConvergenceTimeout));
    let observed = world.observe().await;
    assert!(observed.canary.is_none());
    assert_eq!(observed.stable_version(), Some(&ArtifactRef::new("api:v1")));
}

#[tokio::test]
async fn test_stuck_build_hits_progress_timeout() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world
        .artifacts
        .register(&world.key, &ArtifactRef::new("api:v2"));
    world
        .plane
        .admission
        .submit(world.spec("api:v2", STEPS))
        .await
        .unwrap();

    let release = world.settle(None).await.unwrap();

    assert_eq!(release.outcome, Some(ReleaseOutcome::Failed));
    assert!(release.has_note(ReleaseNoteKind::ConvergenceTimeout));
    assert_eq!(release.phase_path(), vec![ReleasePhase::Pending, ReleasePhase::Failed]);
}

#[tokio::test]
async fn test_transient_outage_is_retried_not_failed() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;
    world
        .tick_until(|r| r.phase == ReleasePhase::Deploying)
        .await;

    world
        .cluster
        .fail_mutations(Some(ClusterError::Unavailable("apiserver timeout".into())));
    for _ in 0..3 {
        let action = world.pass().await;
        assert!(matches!(action, Action::Requeue(d) if d <= Duration::from_secs(300)));
    }
    let release = world.active().await.unwrap();
    assert_eq!(release.phase, ReleasePhase::Deploying);
    assert!(release.has_note(ReleaseNoteKind::TransientInfra));

    world.cluster.fail_mutations(None);
    let release = world.settle(None).await.unwrap();
    assert_eq!(release.outcome, Some(ReleaseOutcome::Stable));
}

#[tokio::test]
async fn test_rollback_completes_during_observation_outage() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;
    world
        .tick_until(|r| r.phase == ReleasePhase::Evaluating)
        .await;

    world.plane.operator.abort(&world.key, "incident").await.unwrap();
    world
        .cluster
        .fail_observations(Some(ClusterError::Unavailable("watch down".into())));

    let mut outcome = None;
    for _ in 0..10 {
        world.pass().await;
        if let Some(latest) = world.latest().await {
            if latest.outcome.is_some() {
                outcome = latest.outcome;
                break;
            }
        }
    }

    assert_eq!(outcome, Some(ReleaseOutcome::RolledBack));
    let release = world.latest().await.unwrap();
    assert!(release.has_note(ReleaseNoteKind::RollbackFailure));
}

#[tokio::test]
async fn test_quota_rejection_is_surfaced_as_failure() {
    let world = World::running_v1(SupersedePolicy::LatestWins);
    world.deploy("api:v2", STEPS).await;
    world
        .tick_until(|r| r.phase == ReleasePhase::Deploying)
        .await;

    world
        .cluster
        .fail_mutations(Some(ClusterError::QuotaExceeded("cpu".into())));
    let release = world.settle(None).await.unwrap();

    assert_eq!(release.outcome, Some(ReleaseOutcome::Failed));
    assert!(release.has_note(ReleaseNoteKind::ClusterRejected));
}
