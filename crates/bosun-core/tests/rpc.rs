use std::sync::Arc;

use bosun_core::controller::{ControllerOptions, PartitionController};
use bosun_core::local::LocalBackend;
use bosun_core::rpc::{gen, serve};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const TOPOLOGY: &str = r#"
name: rpc-example
collections:
  - name: Workers
    tasks:
      - name: worker
        n: 3
"#;

fn common(partition_id: &str) -> Option<gen::Common> {
    Some(gen::Common {
        partition_id: partition_id.to_string(),
        run_number: 1,
        timeout: 10,
    })
}

#[tokio::test]
async fn test_grpc_round_trip() {
    let controller = Arc::new(PartitionController::new(
        Arc::new(LocalBackend::default()),
        ControllerOptions::default(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        let shutdown = async {
            let _ = stop_rx.await;
        };
        if let Err(e) = serve(controller, listener, shutdown).await {
            panic!("server failed: {e}");
        }
    });

    let mut client = gen::controller_service_client::ControllerServiceClient::connect(format!(
        "http://{addr}"
    ))
    .await
    .unwrap();

    let reply = client
        .run(gen::RunRequest {
            common: common("rpc"),
            plugin: String::new(),
            resources: String::new(),
            topology: Some(gen::TopologySource {
                file: String::new(),
                content: TOPOLOGY.to_string(),
                script: String::new(),
            }),
            extract_topo_resources: true,
            session_id: String::new(),
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.status, gen::ReplyStatus::Ok as i32);
    assert_eq!(reply.partition_id, "rpc");
    assert!(!reply.session_id.is_empty());
    assert_eq!(reply.topology_state.unwrap().aggregated, "Idle");

    let reply = client
        .configure(gen::DeviceRequest {
            common: common("rpc"),
            path: String::new(),
            detailed: true,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.status, gen::ReplyStatus::Ok as i32);
    let state = reply.topology_state.unwrap();
    assert_eq!(state.aggregated, "Ready");
    assert_eq!(state.detailed.len(), 3);

    let status = client
        .status(gen::StatusRequest { running_only: true })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(status.partitions.len(), 1);
    assert_eq!(status.partitions[0].session_status, "running");

    // An error is reported in the reply, not as a transport failure.
    let reply = client
        .activate(gen::ActivateRequest {
            common: common("unknown"),
            topology: None,
        })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.status, gen::ReplyStatus::Error as i32);
    assert!(reply.error.is_some());

    let _ = stop_tx.send(());
    let _ = server.await;
}
