use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bosun_core::controller::{
    CommonParams, ControllerOptions, DeviceRequest, PartitionController, RunRequest,
    SetPropertiesRequest, ShutdownRequest, StatusRequest, UpdateRequest,
};
use bosun_core::coordinator::TopologyCoordinator;
use bosun_core::deadline::Deadline;
use bosun_core::device::{AggregatedState, DeviceState, Transition};
use bosun_core::error::ErrorCode;
use bosun_core::id::SessionId;
use bosun_core::local::{DeviceBehavior, LocalBackend, LocalClusterOptions};
use bosun_core::scheduler::{
    ActivationMode, SchedulerBackend, SessionLink, SubmitEvent, SubmitParams,
};
use bosun_core::session::{Session, SessionView};
use bosun_core::topology::{materialize, TopologySource};

const CRASHING_TOPOLOGY: &str = r#"
name: ex-topo-groupname-crashing
collections:
  - name: SamplersSinks
    agent_group: calib
    tasks:
      - name: sampler
      - name: sink
  - name: Processors
    agent_group: online
    tasks:
      - name: processor
      - name: receiver
groups:
  - name: online
    n: 4
    n_min: 2
    collections: [Processors]
"#;

fn controller_with(behaviors: Vec<DeviceBehavior>) -> Arc<PartitionController> {
    let backend = Arc::new(LocalBackend::new(LocalClusterOptions {
        behaviors,
        ..Default::default()
    }));
    Arc::new(PartitionController::new(
        backend,
        ControllerOptions::default(),
    ))
}

fn run_request(partition: &str) -> RunRequest {
    RunRequest {
        common: CommonParams::new(partition),
        session_id: None,
        plugin: String::new(),
        resources: String::new(),
        topology: TopologySource::from_content(CRASHING_TOPOLOGY),
        extract_topo_resources: true,
    }
}

fn device_request(partition: &str, path: &str, detailed: bool) -> DeviceRequest {
    DeviceRequest {
        common: CommonParams::new(partition),
        path: path.to_string(),
        detailed,
    }
}

fn assert_all_in(result: &bosun_core::controller::RequestResult, state: DeviceState) {
    let detailed = result.topology_state.detailed.as_ref().unwrap();
    assert!(!detailed.is_empty());
    for task in detailed {
        assert_eq!(task.state, state, "task {} at {}", task.task_id, task.path);
    }
}

#[tokio::test]
async fn test_full_lifecycle() {
    let controller = controller_with(vec![]);

    let result = controller.run(run_request("lifecycle")).await;
    assert!(result.is_ok(), "run failed: {:?}", result.error);
    assert!(result.session_id.is_some());
    assert_eq!(
        result.topology_state.aggregated,
        AggregatedState::Device(DeviceState::Idle)
    );
    assert_eq!(result.hosts, vec!["localhost".to_string()]);

    let result = controller.configure(device_request("lifecycle", "", true)).await;
    assert!(result.is_ok(), "configure failed: {:?}", result.error);
    assert_eq!(
        result.topology_state.aggregated,
        AggregatedState::Device(DeviceState::Ready)
    );
    // 4 Processors instances with 2 tasks each, plus the standalone pair.
    assert_eq!(result.topology_state.detailed.as_ref().unwrap().len(), 10);
    assert_all_in(&result, DeviceState::Ready);

    let result = controller.start(device_request("lifecycle", "", true)).await;
    assert!(result.is_ok(), "start failed: {:?}", result.error);
    assert_all_in(&result, DeviceState::Running);

    // A path selecting a single collection aggregates over it alone.
    let result = controller
        .get_state(device_request("lifecycle", "main/online/Processors_0", false))
        .await;
    assert!(result.is_ok());
    assert_eq!(
        result.topology_state.aggregated,
        AggregatedState::Device(DeviceState::Running)
    );

    let result = controller.stop(device_request("lifecycle", "", true)).await;
    assert!(result.is_ok());
    assert_all_in(&result, DeviceState::Ready);

    let result = controller.reset(device_request("lifecycle", "", true)).await;
    assert!(result.is_ok());
    assert_all_in(&result, DeviceState::Idle);

    let result = controller.terminate(device_request("lifecycle", "", true)).await;
    assert!(result.is_ok());
    assert_all_in(&result, DeviceState::Exiting);

    let result = controller
        .shutdown(ShutdownRequest {
            common: CommonParams::new("lifecycle"),
        })
        .await;
    assert!(result.is_ok(), "shutdown failed: {:?}", result.error);
    assert!(result.session_id.is_none());

    // A successful shutdown removes the partition from the status listing.
    let status = controller.status(StatusRequest { running_only: false }).await;
    assert!(status.partitions.is_empty());
}

#[tokio::test]
async fn test_configure_reset_round_trip_keeps_membership() {
    let controller = controller_with(vec![]);
    assert!(controller.run(run_request("round-trip")).await.is_ok());

    let membership = |result: &bosun_core::controller::RequestResult| -> HashSet<u64> {
        result
            .topology_state
            .detailed
            .as_ref()
            .unwrap()
            .iter()
            .map(|t| t.task_id.into())
            .collect()
    };

    let first = controller.configure(device_request("round-trip", "", true)).await;
    assert!(first.is_ok());
    let reset = controller.reset(device_request("round-trip", "", true)).await;
    assert!(reset.is_ok());
    let second = controller.configure(device_request("round-trip", "", true)).await;
    assert!(second.is_ok());

    assert_eq!(membership(&first), membership(&second));
    assert_all_in(&second, DeviceState::Ready);
}

#[tokio::test]
async fn test_configure_timeout_reports_partial_progress() {
    // The online zone never leaves Idle; the calib tasks proceed.
    let controller = controller_with(vec![DeviceBehavior {
        path_prefix: "main/online".to_string(),
        stall_on: Some(Transition::InitDevice),
        ..Default::default()
    }]);
    assert!(controller.run(run_request("stuck")).await.is_ok());

    let mut request = device_request("stuck", "", false);
    request.common.timeout_secs = 1;
    let result = controller.configure(request).await;

    assert!(!result.is_ok());
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.code, ErrorCode::RequestTimeout);
    assert!(
        matches!(
            result.topology_state.aggregated,
            AggregatedState::Mixed | AggregatedState::Undefined
        ),
        "unexpected aggregated state {}",
        result.topology_state.aggregated
    );
    assert!(result.exec_time_ms >= 900, "returned too early: {} ms", result.exec_time_ms);
    assert!(result.exec_time_ms <= 2500, "returned too late: {} ms", result.exec_time_ms);
}

#[tokio::test]
async fn test_n_min_recovery_via_update() {
    // Two of the four Processors collections crash during configuration.
    let controller = controller_with(vec![
        DeviceBehavior {
            path_prefix: "main/online/Processors_2".to_string(),
            fail_on: Some(Transition::InitDevice),
            ..Default::default()
        },
        DeviceBehavior {
            path_prefix: "main/online/Processors_3".to_string(),
            fail_on: Some(Transition::InitDevice),
            ..Default::default()
        },
    ]);
    assert!(controller.run(run_request("recovery")).await.is_ok());

    let result = controller.configure(device_request("recovery", "", false)).await;
    assert!(!result.is_ok());
    assert_eq!(
        result.error.as_ref().unwrap().code,
        ErrorCode::ChangeStateFailed
    );

    // Update recovers by reducing the online group to the two survivors
    // and drives the remaining tasks back to Ready.
    let result = controller
        .update(UpdateRequest {
            common: CommonParams::new("recovery"),
            topology: TopologySource::from_content(CRASHING_TOPOLOGY),
        })
        .await;
    assert!(result.is_ok(), "update failed: {:?}", result.error);
    assert_eq!(
        result.topology_state.aggregated,
        AggregatedState::Device(DeviceState::Ready)
    );

    let result = controller.get_state(device_request("recovery", "", true)).await;
    assert!(result.is_ok());
    let detailed = result.topology_state.detailed.as_ref().unwrap();
    // 2 surviving Processors instances with 2 tasks each, plus the pair.
    assert_eq!(detailed.len(), 6);
    assert!(detailed
        .iter()
        .all(|t| !t.path.starts_with("main/online/Processors_2")
            && !t.path.starts_with("main/online/Processors_3")));
}

#[tokio::test]
async fn test_recovery_refused_without_n_min() {
    // The standalone collection has no nMin; its failure is not recoverable.
    let controller = controller_with(vec![DeviceBehavior {
        path_prefix: "main/SamplersSinks".to_string(),
        fail_on: Some(Transition::InitDevice),
        ..Default::default()
    }]);
    assert!(controller.run(run_request("lost")).await.is_ok());

    let result = controller.configure(device_request("lost", "", false)).await;
    assert!(!result.is_ok());

    let result = controller
        .update(UpdateRequest {
            common: CommonParams::new("lost"),
            topology: TopologySource::from_content(CRASHING_TOPOLOGY),
        })
        .await;
    assert!(!result.is_ok());
    assert_eq!(
        result.error.as_ref().unwrap().code,
        ErrorCode::ChangeStateFailed
    );
}

#[tokio::test]
async fn test_update_without_failures_reconfigures() {
    let controller = controller_with(vec![]);
    assert!(controller.run(run_request("rolling")).await.is_ok());
    assert!(controller
        .configure(device_request("rolling", "", false))
        .await
        .is_ok());

    let result = controller
        .update(UpdateRequest {
            common: CommonParams::new("rolling"),
            topology: TopologySource::from_content(CRASHING_TOPOLOGY),
        })
        .await;
    assert!(result.is_ok(), "update failed: {:?}", result.error);
    assert_eq!(
        result.topology_state.aggregated,
        AggregatedState::Device(DeviceState::Ready)
    );

    let result = controller.get_state(device_request("rolling", "", true)).await;
    assert_eq!(result.topology_state.detailed.as_ref().unwrap().len(), 10);
}

#[tokio::test]
async fn test_expendable_task_failures_are_tolerated() {
    let controller = controller_with(vec![DeviceBehavior {
        path_prefix: "main/Monitoring".to_string(),
        fail_on: Some(Transition::InitDevice),
        ..Default::default()
    }]);
    let mut request = run_request("monitored");
    request.topology = TopologySource::from_content(
        r#"
name: with-monitor
collections:
  - name: Workers
    tasks:
      - name: worker
        n: 2
  - name: Monitoring
    tasks:
      - name: monitor
        expendable: true
"#,
    );
    assert!(controller.run(request).await.is_ok());

    // The expendable monitor crashes during configuration; the request
    // still succeeds and the monitor drops out of the aggregation.
    let result = controller.configure(device_request("monitored", "", true)).await;
    assert!(result.is_ok(), "configure failed: {:?}", result.error);
    assert_eq!(
        result.topology_state.aggregated,
        AggregatedState::Device(DeviceState::Ready)
    );
    let detailed = result.topology_state.detailed.as_ref().unwrap();
    assert_eq!(detailed.len(), 2);
    assert!(detailed.iter().all(|t| t.path.starts_with("main/Workers")));
}

#[tokio::test]
async fn test_request_triggers_fire_after_requests() {
    let marker = std::env::temp_dir().join(format!("bosun-trigger-{}", SessionId::random()));
    let backend: Arc<LocalBackend> = Arc::new(LocalBackend::default());
    let mut controller = PartitionController::new(backend, ControllerOptions::default());
    // The trailing `#` comments out the arguments the registry appends.
    controller
        .register_request_trigger("Status", &format!("touch {} #", marker.display()))
        .unwrap();
    assert!(controller
        .register_request_trigger("NotARequest", "true")
        .is_err());

    let controller = Arc::new(controller);
    let _ = controller.status(StatusRequest { running_only: false }).await;
    assert!(marker.exists(), "trigger did not run");
}

#[tokio::test]
async fn test_run_rejects_session_attachment() {
    let controller = controller_with(vec![]);
    let mut request = run_request("rejected");
    request.session_id = Some(SessionId::random());
    let result = controller.run(request).await;
    assert!(!result.is_ok());
    assert_eq!(
        result.error.as_ref().unwrap().code,
        ErrorCode::RequestNotSupported
    );
}

#[tokio::test]
async fn test_requests_require_a_running_session() {
    let controller = controller_with(vec![]);
    let result = controller.configure(device_request("no-session", "", false)).await;
    assert!(!result.is_ok());
    assert_eq!(
        result.error.as_ref().unwrap().code,
        ErrorCode::SessionNotRunning
    );
}

#[tokio::test]
async fn test_concurrent_partitions_are_independent() {
    let controller = controller_with(vec![]);
    let (a, b) = tokio::join!(
        controller.run(run_request("alpha")),
        controller.run(run_request("beta")),
    );
    assert!(a.is_ok(), "alpha failed: {:?}", a.error);
    assert!(b.is_ok(), "beta failed: {:?}", b.error);
    assert_ne!(a.session_id, b.session_id);

    let status = controller.status(StatusRequest { running_only: true }).await;
    assert_eq!(status.partitions.len(), 2);

    // Status is read-only: asking again changes nothing.
    let again = controller.status(StatusRequest { running_only: true }).await;
    assert_eq!(again.partitions.len(), 2);
    let ids: HashSet<&str> = again
        .partitions
        .iter()
        .map(|p| p.partition_id.as_str())
        .collect();
    assert_eq!(ids, HashSet::from(["alpha", "beta"]));
}

#[tokio::test]
async fn test_set_properties_reports_failed_devices() {
    let controller = controller_with(vec![DeviceBehavior {
        path_prefix: "main/SamplersSinks".to_string(),
        fail_properties: true,
        ..Default::default()
    }]);
    assert!(controller.run(run_request("props")).await.is_ok());

    // The processors accept the update.
    let result = controller
        .set_properties(SetPropertiesRequest {
            common: CommonParams::new("props"),
            path: "main/online".to_string(),
            properties: vec![("severity".to_string(), "info".to_string())],
        })
        .await;
    assert!(result.is_ok(), "set properties failed: {:?}", result.error);

    // The standalone pair rejects it and is listed in the error details.
    let result = controller
        .set_properties(SetPropertiesRequest {
            common: CommonParams::new("props"),
            path: String::new(),
            properties: vec![("severity".to_string(), "debug".to_string())],
        })
        .await;
    assert!(!result.is_ok());
    let error = result.error.as_ref().unwrap();
    assert_eq!(error.code, ErrorCode::SetPropertiesFailed);
    assert!(error.details.contains("2 devices"));
}

#[tokio::test]
async fn test_attach_rebuilds_topology_state() {
    let backend: Arc<LocalBackend> = Arc::new(LocalBackend::default());
    let controller = Arc::new(PartitionController::new(
        backend.clone(),
        ControllerOptions::default(),
    ));
    let result = controller.run(run_request("attach")).await;
    assert!(result.is_ok());
    let session_id = result.session_id.unwrap();
    assert!(controller
        .configure(device_request("attach", "", false))
        .await
        .is_ok());

    // A second controller attaches to the same session and sees the
    // configured topology.
    let other = Arc::new(PartitionController::new(
        backend,
        ControllerOptions::default(),
    ));
    let result = other
        .initialize(bosun_core::controller::InitializeRequest {
            common: CommonParams::new("attach"),
            session_id: Some(session_id),
        })
        .await;
    assert!(result.is_ok(), "attach failed: {:?}", result.error);
    assert_eq!(result.session_id, Some(session_id));

    let result = other.get_state(device_request("attach", "", true)).await;
    assert!(result.is_ok());
    assert_eq!(
        result.topology_state.aggregated,
        AggregatedState::Device(DeviceState::Ready)
    );
    assert_eq!(result.topology_state.detailed.as_ref().unwrap().len(), 10);
}

#[tokio::test]
async fn test_restore_reattaches_sessions() {
    let restore_dir = std::env::temp_dir().join(format!("bosun-restore-{}", SessionId::random()));
    let options = ControllerOptions {
        restore_dir: Some(restore_dir),
        restore_id: Some("controller".to_string()),
        ..Default::default()
    };
    let backend: Arc<LocalBackend> = Arc::new(LocalBackend::default());

    let controller = Arc::new(PartitionController::new(backend.clone(), options.clone()));
    let result = controller.run(run_request("persist")).await;
    assert!(result.is_ok(), "run failed: {:?}", result.error);
    let session_id = result.session_id.unwrap();

    // A freshly started controller picks the session up from the restore
    // file and reattaches.
    let restored = Arc::new(PartitionController::new(backend, options));
    restored.restore().await;
    let status = restored.status(StatusRequest { running_only: true }).await;
    assert_eq!(status.partitions.len(), 1);
    assert_eq!(status.partitions[0].partition_id, "persist");
    assert_eq!(status.partitions[0].session_id, Some(session_id));
}

#[tokio::test]
async fn test_property_gathers_at_the_session_level() {
    let backend = LocalBackend::default();
    let SessionLink {
        mut scheduler,
        transport,
    } = backend.connect("gather").await.unwrap();
    scheduler.create().await.unwrap();

    let mut events = scheduler
        .submit(&SubmitParams {
            rms: "local".to_string(),
            agent_group: String::new(),
            zone: String::new(),
            n_agents: 1,
            slots_per_agent: 2,
            n_cores: 0,
            required_slots: 0,
            config: None,
        })
        .await
        .unwrap();
    while let Some(event) = events.recv().await {
        if matches!(event, SubmitEvent::Done) {
            break;
        }
    }

    let coordinator = TopologyCoordinator::new(transport).await.unwrap();
    let mut session = Session::new("gather", scheduler, coordinator);
    let file = materialize(
        &TopologySource::from_content(
            r#"
name: gather
collections:
  - name: Pair
    tasks:
      - name: left
      - name: right
"#,
        ),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    let deadline = Deadline::new(Duration::from_secs(5));
    session
        .activate_topology(&file, ActivationMode::Activate, &deadline)
        .await
        .unwrap();

    let targets = session.select_tasks("");
    assert_eq!(targets.len(), 2);

    let properties = vec![("color".to_string(), "green".to_string())];
    {
        let Session {
            coordinator,
            tasks,
            collections,
            ..
        } = &mut session;
        let view = SessionView {
            tasks: &*tasks,
            collections: &*collections,
        };
        coordinator
            .set_properties("", &properties, &targets, &view, &deadline)
            .await
            .unwrap();
    }

    let result = session
        .coordinator
        .get_properties("", "", &targets, &deadline)
        .await
        .unwrap();
    assert!(result.failed.is_empty());
    assert_eq!(result.devices.len(), 2);
    for props in result.devices.values() {
        assert_eq!(props.get("color"), Some(&"green".to_string()));
    }

    // A query filters the returned keys.
    let result = session
        .coordinator
        .get_properties("", "missing", &targets, &deadline)
        .await
        .unwrap();
    assert!(result.devices.values().all(|props| props.is_empty()));
}
