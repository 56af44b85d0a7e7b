use hubshard::{
    ActivityCall, ActivityName, ActivityOutcome, ActivityOutput, ActivityRunner, BackendError,
    BackendOperation, BetaUsers, Checkpoint, Dispatcher, ExecutionHistory, FeatureFlag,
    HistoryStore, HostObserver, InstallationId, InstanceId, MemoryBackendProvider,
    MemoryHistoryStore, MemoryResultStore, NoopTelemetry, NotificationBackendConfig,
    OrchestratorConfig, PartitionSpec, PartitionTable, Platform, RecordingTelemetry, Registration,
    RetryPolicy, StaticBetaUsers, WorkflowHost, WorkflowResult,
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Lands in `nh2` (`^[4-7]`).
const PARTITION_2_ID: &str = "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8";
const LEGACY_ONLY_ID: &str = "abc0123456789def";

struct Harness {
    dispatcher: Dispatcher,
    backends: Arc<MemoryBackendProvider>,
    history: Arc<MemoryHistoryStore>,
    telemetry: Arc<RecordingTelemetry>,
    observer: Arc<CountingObserver>,
}

#[derive(Default)]
struct CountingObserver {
    attempts: Mutex<Vec<ActivityName>>,
    retries: Mutex<Vec<Duration>>,
    compensations: Mutex<u32>,
}

impl HostObserver for CountingObserver {
    fn activity_attempted(&self, call: &ActivityCall, _outcome: &ActivityOutcome) {
        self.attempts.lock().push(call.name());
    }

    fn activity_retry_scheduled(&self, _call: &ActivityCall, _attempt: u32, delay: Duration) {
        self.retries.lock().push(delay);
    }

    fn compensation_started(&self, _instance_id: &InstanceId) {
        *self.compensations.lock() += 1;
    }
}

fn partition_specs() -> Vec<PartitionSpec> {
    [("^[0-3]", "nh1"), ("^[4-7]", "nh2"), ("^[8-b]", "nh3"), ("^[c-f]", "nh4")]
        .into_iter()
        .map(|(regex, name)| PartitionSpec {
            partition_regex: regex.to_string(),
            name: name.to_string(),
            endpoint: format!("sb://{name}.servicebus.windows.net"),
        })
        .collect()
}

fn harness_with(flag: FeatureFlag, retry: RetryPolicy, beta: BetaUsers) -> Harness {
    let config = OrchestratorConfig::new(
        NotificationBackendConfig::new("legacy", "sb://legacy.servicebus.windows.net").unwrap(),
        PartitionTable::new(&partition_specs()).unwrap(),
        flag,
        None,
        retry,
    )
    .unwrap();
    let backends = Arc::new(MemoryBackendProvider::new());
    let history = Arc::new(MemoryHistoryStore::new());
    let telemetry = Arc::new(RecordingTelemetry::default());
    let observer = Arc::new(CountingObserver::default());
    let runner = ActivityRunner::new(
        Arc::new(config),
        backends.clone(),
        Arc::new(StaticBetaUsers(beta)),
        telemetry.clone(),
    );
    let host = WorkflowHost::new(runner, history.clone()).with_observer(observer.clone());
    Harness {
        dispatcher: Dispatcher::new(host, Arc::new(MemoryResultStore::new())),
        backends,
        history,
        telemetry,
        observer,
    }
}

fn harness(flag: FeatureFlag) -> Harness {
    harness_with(flag, RetryPolicy::no_retry(), BetaUsers::default())
}

fn id(raw: &str) -> InstallationId {
    InstallationId::parse(raw).unwrap()
}

fn registration() -> Registration {
    Registration {
        platform: Platform::Apns,
        push_channel: "device-token".to_string(),
        tags: vec!["io".to_string()],
    }
}

fn create_input(installation_id: &str) -> Value {
    json!({
        "kind": "CreateOrUpdateInstallation",
        "installationId": installation_id,
        "platform": "apns",
        "pushChannel": "device-token",
        "tags": ["io"]
    })
}

fn total_calls(h: &Harness) -> usize {
    ["legacy", "nh1", "nh2", "nh3", "nh4"]
        .iter()
        .map(|name| h.backends.get(name).calls().len())
        .sum()
}

fn unavailable(message: &str) -> BackendError {
    BackendError::Unavailable {
        message: message.to_string(),
    }
}

#[tokio::test]
async fn delete_of_missing_installation_succeeds() {
    let h = harness(FeatureFlag::None);
    let result = h
        .dispatcher
        .dispatch(
            &InstanceId::random(),
            &json!({ "kind": "DeleteInstallation", "installationId": LEGACY_ONLY_ID }),
        )
        .await;

    assert_eq!(result, WorkflowResult::Success);
    let legacy = h.backends.get("legacy");
    assert_eq!(legacy.calls().len(), 1);
    assert_eq!(legacy.call_count(BackendOperation::Delete), 1);
    assert_eq!(total_calls(&h), 1);
}

#[tokio::test]
async fn active_create_moves_installation_to_partition() {
    let h = harness(FeatureFlag::All);
    h.backends.get("legacy").insert(id(PARTITION_2_ID), registration());

    let result = h
        .dispatcher
        .dispatch(&InstanceId::random(), &create_input(PARTITION_2_ID))
        .await;

    assert_eq!(result, WorkflowResult::Success);
    let nh2 = h.backends.get("nh2");
    assert_eq!(nh2.len(), 1);
    assert_eq!(nh2.installation(&id(PARTITION_2_ID)), Some(registration()));
    assert!(h.backends.get("legacy").is_empty());
    assert_eq!(h.telemetry.events().len(), 2);
}

#[tokio::test]
async fn failed_legacy_cleanup_is_compensated() {
    let h = harness(FeatureFlag::All);
    let legacy = h.backends.get("legacy");
    legacy.insert(id(PARTITION_2_ID), registration());
    legacy.fail_next(BackendOperation::Delete, 1, unavailable("legacy locked"));

    let result = h
        .dispatcher
        .dispatch(&InstanceId::random(), &create_input(PARTITION_2_ID))
        .await;

    assert_eq!(
        result,
        WorkflowResult::activity_failure(
            ActivityName::DeleteInstallation,
            "backend unavailable: legacy locked"
        )
    );
    assert!(legacy.contains(&id(PARTITION_2_ID)));
    assert!(!h.backends.get("nh2").contains(&id(PARTITION_2_ID)));
    assert_eq!(legacy.call_count(BackendOperation::CreateOrUpdate), 1);
    assert_eq!(h.backends.get("nh2").call_count(BackendOperation::Delete), 1);
    assert_eq!(*h.observer.compensations.lock(), 1);
}

#[tokio::test]
async fn malformed_input_makes_no_backend_calls() {
    let h = harness(FeatureFlag::All);
    let input = json!({ "kind": "CreateOrUpdateInstallation", "platform": "apns", "pushChannel": "t" });
    let result = h.dispatcher.dispatch(&InstanceId::random(), &input).await;

    let WorkflowResult::InvalidInput { input: echoed, .. } = result else {
        panic!("expected invalid input, got {result:?}");
    };
    assert_eq!(echoed, input);
    assert_eq!(total_calls(&h), 0);
}

#[tokio::test]
async fn repeated_create_is_idempotent() {
    let h = harness(FeatureFlag::All);
    for _ in 0..2 {
        let result = h
            .dispatcher
            .dispatch(&InstanceId::random(), &create_input(PARTITION_2_ID))
            .await;
        assert_eq!(result, WorkflowResult::Success);
    }
    assert_eq!(h.backends.get("nh2").len(), 1);
    assert!(h.backends.get("legacy").is_empty());
}

#[tokio::test]
async fn inactive_notify_goes_to_legacy() {
    let h = harness(FeatureFlag::None);
    h.backends.get("legacy").insert(id(PARTITION_2_ID), registration());
    let result = h
        .dispatcher
        .dispatch(
            &InstanceId::random(),
            &json!({
                "kind": "Notify",
                "installationId": PARTITION_2_ID,
                "payload": { "title": "hi", "message": "body", "message_id": "m1" }
            }),
        )
        .await;
    assert_eq!(result, WorkflowResult::Success);
    assert_eq!(h.backends.get("legacy").sent().len(), 1);
    assert!(h.backends.get("nh2").calls().is_empty());
}

#[tokio::test]
async fn beta_flag_only_migrates_listed_users() {
    let h = harness_with(
        FeatureFlag::Beta,
        RetryPolicy::no_retry(),
        BetaUsers::new([id(PARTITION_2_ID)]),
    );
    let listed = h
        .dispatcher
        .dispatch(&InstanceId::random(), &create_input(PARTITION_2_ID))
        .await;
    let unlisted = h
        .dispatcher
        .dispatch(&InstanceId::random(), &create_input(LEGACY_ONLY_ID))
        .await;

    assert!(listed.is_success() && unlisted.is_success());
    assert!(h.backends.get("nh2").contains(&id(PARTITION_2_ID)));
    assert!(h.backends.get("legacy").contains(&id(LEGACY_ONLY_ID)));
}

#[tokio::test]
async fn completed_instance_is_not_run_again() {
    let h = harness(FeatureFlag::All);
    let instance = InstanceId::new("dedup");
    let first = h
        .dispatcher
        .dispatch(&instance, &create_input(PARTITION_2_ID))
        .await;
    let calls = total_calls(&h);
    let second = h
        .dispatcher
        .dispatch(&instance, &json!({ "kind": "garbage" }))
        .await;

    assert_eq!(first, second);
    assert_eq!(total_calls(&h), calls);
    assert_eq!(h.dispatcher.result(&instance), Some(WorkflowResult::Success));
    assert!(h.history.load(&instance).is_empty());
}

#[tokio::test]
async fn restarted_instance_replays_checkpoints() {
    let h = harness(FeatureFlag::All);
    let instance = InstanceId::new("restarted");
    let partition = NotificationBackendConfig::new("nh2", "sb://nh2.servicebus.windows.net").unwrap();
    // The partition write already happened before the restart.
    h.history.insert(
        instance.clone(),
        ExecutionHistory::new(vec![
            Checkpoint {
                call: ActivityCall::is_user_in_active_subset(FeatureFlag::All, &id(PARTITION_2_ID)),
                outcome: ActivityOutcome::success(ActivityOutput::SubsetMembership { active: true }),
                attempts: 1,
            },
            Checkpoint {
                call: ActivityCall::create_or_update(&partition, &id(PARTITION_2_ID), &registration()),
                outcome: ActivityOutcome::success(ActivityOutput::Completed),
                attempts: 1,
            },
        ]),
    );
    h.backends.get("nh2").insert(id(PARTITION_2_ID), registration());
    h.backends.get("legacy").insert(id(PARTITION_2_ID), registration());

    let result = h
        .dispatcher
        .dispatch(&instance, &create_input(PARTITION_2_ID))
        .await;

    assert_eq!(result, WorkflowResult::Success);
    assert!(h.backends.get("nh2").calls().is_empty());
    assert_eq!(h.backends.get("legacy").calls().len(), 1);
    assert_eq!(*h.observer.attempts.lock(), vec![ActivityName::DeleteInstallation]);
}

#[tokio::test]
async fn diverging_history_is_unhandled() {
    let h = harness(FeatureFlag::All);
    let instance = InstanceId::new("diverged");
    let legacy = NotificationBackendConfig::new("legacy", "sb://legacy.servicebus.windows.net").unwrap();
    h.history.insert(
        instance.clone(),
        ExecutionHistory::new(vec![Checkpoint {
            call: ActivityCall::delete(&legacy, &id(PARTITION_2_ID)),
            outcome: ActivityOutcome::success(ActivityOutput::Completed),
            attempts: 1,
        }]),
    );

    let result = h
        .dispatcher
        .dispatch(&instance, &create_input(PARTITION_2_ID))
        .await;

    assert!(
        matches!(&result, WorkflowResult::Unhandled { reason } if reason.contains("non-deterministic")),
        "{result:?}"
    );
    assert_eq!(total_calls(&h), 0);
}

#[tokio::test(start_paused = true)]
async fn retries_back_off_until_exhausted() {
    let retry = RetryPolicy::new(Duration::from_secs(5), 3, 1.5).unwrap();
    let h = harness_with(FeatureFlag::None, retry, BetaUsers::default());
    h.backends
        .get("legacy")
        .fail_always(BackendOperation::CreateOrUpdate, unavailable("hub down"));

    let started = tokio::time::Instant::now();
    let result = h
        .dispatcher
        .dispatch(&InstanceId::random(), &create_input(LEGACY_ONLY_ID))
        .await;

    assert_eq!(
        result,
        WorkflowResult::activity_failure(
            ActivityName::CreateOrUpdateInstallation,
            "backend unavailable: hub down"
        )
    );
    assert_eq!(
        h.backends.get("legacy").call_count(BackendOperation::CreateOrUpdate),
        3
    );
    assert_eq!(
        *h.observer.retries.lock(),
        vec![Duration::from_secs(5), Duration::from_millis(7500)]
    );
    assert!(started.elapsed() >= Duration::from_millis(12_500));
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_within_budget() {
    let retry = RetryPolicy::new(Duration::from_secs(1), 5, 2.0).unwrap();
    let h = harness_with(FeatureFlag::None, retry, BetaUsers::default());
    h.backends
        .get("legacy")
        .fail_next(BackendOperation::CreateOrUpdate, 2, unavailable("blip"));

    let result = h
        .dispatcher
        .dispatch(&InstanceId::random(), &create_input(LEGACY_ONLY_ID))
        .await;

    assert_eq!(result, WorkflowResult::Success);
    assert!(h.backends.get("legacy").contains(&id(LEGACY_ONLY_ID)));
    assert_eq!(h.observer.retries.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn delete_failures_are_never_retried() {
    let retry = RetryPolicy::new(Duration::from_secs(1), 5, 2.0).unwrap();
    let h = harness_with(FeatureFlag::None, retry, BetaUsers::default());
    h.backends
        .get("legacy")
        .fail_always(BackendOperation::Delete, unavailable("down"));

    let result = h
        .dispatcher
        .dispatch(
            &InstanceId::random(),
            &json!({ "kind": "DeleteInstallation", "installationId": LEGACY_ONLY_ID }),
        )
        .await;

    assert_eq!(result, WorkflowResult::Success);
    assert_eq!(h.backends.get("legacy").call_count(BackendOperation::Delete), 1);
    assert!(h.observer.retries.lock().is_empty());
}

/// Every failure point of a migrating create must leave the installation on
/// exactly one backend, unless the rollback itself failed.
#[tokio::test]
async fn migrating_create_keeps_single_ownership() {
    let failure_points: [&[(&str, BackendOperation)]; 5] = [
        &[],
        &[("nh2", BackendOperation::CreateOrUpdate)],
        &[("legacy", BackendOperation::Delete)],
        &[
            ("legacy", BackendOperation::Delete),
            ("nh2", BackendOperation::Delete),
        ],
        &[
            ("legacy", BackendOperation::Delete),
            ("legacy", BackendOperation::CreateOrUpdate),
        ],
    ];

    for failures in failure_points {
        let h = harness(FeatureFlag::All);
        h.backends.get("legacy").insert(id(PARTITION_2_ID), registration());
        for (backend, operation) in failures {
            h.backends
                .get(backend)
                .fail_always(*operation, unavailable("injected"));
        }

        let result = h
            .dispatcher
            .dispatch(&InstanceId::random(), &create_input(PARTITION_2_ID))
            .await;

        let on_legacy = h.backends.get("legacy").contains(&id(PARTITION_2_ID));
        let on_partition = h.backends.get("nh2").contains(&id(PARTITION_2_ID));
        let compensation_failed = matches!(
            &result,
            WorkflowResult::ActivityFailure {
                compensation: Some(_),
                ..
            }
        );
        if compensation_failed {
            assert!(on_legacy || on_partition, "{failures:?}: lost everywhere");
        } else {
            assert!(on_legacy ^ on_partition, "{failures:?}: {result:?}");
        }
        if result.is_success() {
            assert!(on_partition && !on_legacy);
        }
    }
}

#[tokio::test]
async fn noop_telemetry_is_accepted() {
    let config = OrchestratorConfig::new(
        NotificationBackendConfig::new("legacy", "sb://legacy").unwrap(),
        PartitionTable::new(&partition_specs()).unwrap(),
        FeatureFlag::None,
        None,
        RetryPolicy::no_retry(),
    )
    .unwrap();
    let backends = Arc::new(MemoryBackendProvider::new());
    let runner = ActivityRunner::new(
        Arc::new(config),
        backends.clone(),
        Arc::new(StaticBetaUsers::default()),
        Arc::new(NoopTelemetry),
    );
    let host = WorkflowHost::new(runner, Arc::new(MemoryHistoryStore::new()));
    let result = host
        .run(&InstanceId::random(), &create_input(LEGACY_ONLY_ID))
        .await;
    assert!(result.is_success());
}
