//! End-to-end scan pipeline tests against an in-process mock agent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tonic::{transport::Server, Request, Response, Status};

use sentryscan::agent::pb;
use sentryscan::agent::pb::watch_service_server::{WatchService, WatchServiceServer};
use sentryscan::agent::AgentError;
use sentryscan::scan::{ScanConfig, ScanError, ScanRunner};

/// Mock agent: echoes (or corrupts) the health nonce and replays canned
/// alert/log streams.
#[derive(Default)]
struct MockAgent {
    healthy_echo: bool,
    alerts: Vec<pb::Alert>,
    logs: Vec<pb::Log>,
    /// Keep the log stream open after replaying, to exercise cancellation.
    hold_log_stream_open: bool,
    /// Park the health probe instead of answering it.
    stall_health_check: bool,
    subscribed: Arc<AtomicBool>,
}

#[tonic::async_trait]
impl WatchService for MockAgent {
    async fn health_check(
        &self,
        request: Request<pb::NonceMessage>,
    ) -> Result<Response<pb::ReplyMessage>, Status> {
        if self.stall_health_check {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        let nonce = request.into_inner().nonce;
        let retval = if self.healthy_echo { nonce } else { nonce.wrapping_sub(1) };
        Ok(Response::new(pb::ReplyMessage { retval }))
    }

    type WatchAlertsStream = ReceiverStream<Result<pb::Alert, Status>>;

    async fn watch_alerts(
        &self,
        _request: Request<pb::WatchRequest>,
    ) -> Result<Response<Self::WatchAlertsStream>, Status> {
        self.subscribed.store(true, Ordering::SeqCst);
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let alerts = self.alerts.clone();
        tokio::spawn(async move {
            for alert in alerts {
                if tx.send(Ok(alert)).await.is_err() {
                    return;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    type WatchLogsStream = ReceiverStream<Result<pb::Log, Status>>;

    async fn watch_logs(
        &self,
        _request: Request<pb::WatchRequest>,
    ) -> Result<Response<Self::WatchLogsStream>, Status> {
        self.subscribed.store(true, Ordering::SeqCst);
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let logs = self.logs.clone();
        let hold_open = self.hold_log_stream_open;
        tokio::spawn(async move {
            for log in logs {
                if tx.send(Ok(log)).await.is_err() {
                    return;
                }
            }
            if hold_open {
                // Park with the sender alive so the stream never reaches EOF.
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Serve the mock on an ephemeral port; returns its address.
async fn serve(mock: MockAgent) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(
        Server::builder()
            .add_service(WatchServiceServer::new(mock))
            .serve_with_incoming(TcpListenerStream::new(listener)),
    );
    format!("http://{}", addr)
}

fn process_log(pid: i32, ppid: i32, name: &str) -> pb::Log {
    pb::Log {
        host_pid: pid,
        host_ppid: ppid,
        process_name: name.to_string(),
        operation: "Process".to_string(),
        resource: format!("/usr/bin/{}", name),
        data: String::new(),
    }
}

fn network_log(pid: i32, data: &str, resource: &str) -> pb::Log {
    pb::Log {
        host_pid: pid,
        host_ppid: 1,
        process_name: "curl".to_string(),
        operation: "Network".to_string(),
        resource: resource.to_string(),
        data: data.to_string(),
    }
}

fn alert(operation: &str, policy: &str) -> pb::Alert {
    pb::Alert {
        policy_name: policy.to_string(),
        operation: operation.to_string(),
        host_pid: 7,
        host_ppid: 1,
        process_name: "bash".to_string(),
        resource: "/bin/bash".to_string(),
        message: "policy matched".to_string(),
        tags: "CIS".to_string(),
        ..pb::Alert::default()
    }
}

fn config(addr: &str, out: &std::path::Path) -> ScanConfig {
    ScanConfig {
        agent_addr: addr.to_string(),
        output_dir: out.to_path_buf(),
        ..ScanConfig::default()
    }
}

#[tokio::test]
async fn test_full_session_writes_all_artifacts() {
    let mock = MockAgent {
        healthy_echo: true,
        alerts: vec![
            alert("File", "block-etc-write"),
            alert("Process", "audit-shells"),
            // Unrecognized operation: must land in no bucket.
            alert("Unknown", "dropped"),
        ],
        logs: vec![
            process_log(1, 0, "init"),
            process_log(2, 1, "sh"),
            process_log(3, 99, "orphan"),
            // Port only: cached, but never submitted for reverse DNS.
            network_log(2, "kprobe=tcp_connect", "port=443 protocol=TCP"),
            network_log(2, "syscall=SYS_SOCKET", "domain=AF_INET type=SOCK_DGRAM"),
        ],
        ..MockAgent::default()
    };
    let addr = serve(mock).await;
    let out = tempfile::tempdir().unwrap();

    let runner = ScanRunner::connect(config(&addr, out.path())).await.unwrap();
    let (_cancel_tx, cancel_rx) = watch::channel(false);
    let summary = runner.run(cancel_rx).await.unwrap();

    assert_eq!(summary.counts.file_alerts, 1);
    assert_eq!(summary.counts.process_alerts, 1);
    assert_eq!(summary.counts.network_alerts, 0);
    assert_eq!(summary.counts.process_logs, 3);
    assert_eq!(summary.counts.network_logs, 2);
    assert_eq!(summary.network_events, 2);
    assert_eq!(summary.forest_roots, 2);
    assert_eq!(summary.collector_errors, 0);

    // Forest artifact: init with child sh, orphan alone, sorted by pid.
    let forest: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.path().join("process_tree.json")).unwrap())
            .unwrap();
    let roots = forest["roots"].as_array().unwrap();
    assert_eq!(roots.len(), 2);
    assert_eq!(roots[0]["pid"], 1);
    assert_eq!(roots[0]["children"][0]["processName"], "sh");
    assert_eq!(roots[1]["pid"], 3);

    // Network artifact shape and invariant.
    let network: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(out.path().join("network_events.json")).unwrap(),
    )
    .unwrap();
    let events = network["networkEvents"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    for event in events {
        assert!(!event["flow"].as_str().unwrap().is_empty());
        assert!(!event["protocol"].as_str().unwrap().is_empty());
    }

    // Segregated store artifact: the unknown alert is nowhere.
    let segregated: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(out.path().join("segregated_data.json")).unwrap(),
    )
    .unwrap();
    assert!(segregated["fileAlerts"].as_array().unwrap().len() == 1);
    assert!(!segregated.to_string().contains("dropped"));

    // Alert report artifacts.
    let rows: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(out.path().join("alerts.json")).unwrap())
            .unwrap();
    assert_eq!(rows.as_array().unwrap().len(), 2);
    assert_eq!(rows[0]["actualName"], "bash");
    let markdown = std::fs::read_to_string(out.path().join("alerts.md")).unwrap();
    assert!(markdown.contains("| Policy | Operation |"));
}

#[tokio::test]
async fn test_unhealthy_agent_aborts_before_any_subscription() {
    let subscribed = Arc::new(AtomicBool::new(false));
    let mock = MockAgent {
        healthy_echo: false,
        subscribed: subscribed.clone(),
        ..MockAgent::default()
    };
    let addr = serve(mock).await;
    let out = tempfile::tempdir().unwrap();

    let result = ScanRunner::connect(config(&addr, out.path())).await;
    match result {
        Err(ScanError::Agent(AgentError::UnhealthyAgent { sent, got })) => {
            assert_ne!(sent, got);
        }
        other => panic!("expected UnhealthyAgent, got {:?}", other.map(|_| ())),
    }
    assert!(!subscribed.load(Ordering::SeqCst), "no subscription may be opened");
}

#[tokio::test]
async fn test_stalled_health_probe_times_out_without_subscribing() {
    let subscribed = Arc::new(AtomicBool::new(false));
    let mock = MockAgent {
        healthy_echo: true,
        stall_health_check: true,
        subscribed: subscribed.clone(),
        ..MockAgent::default()
    };
    let addr = serve(mock).await;
    let out = tempfile::tempdir().unwrap();

    let result = ScanRunner::connect(ScanConfig {
        health_check_timeout: Duration::from_millis(100),
        ..config(&addr, out.path())
    })
    .await;

    assert!(matches!(
        result,
        Err(ScanError::Agent(AgentError::HealthCheckTimeout))
    ));
    assert!(!subscribed.load(Ordering::SeqCst), "no subscription may be opened");
}

#[tokio::test]
async fn test_unreachable_agent_is_a_connect_error() {
    // Nothing listens here.
    let result = ScanRunner::connect(ScanConfig {
        agent_addr: "http://127.0.0.1:1".to_string(),
        ..ScanConfig::default()
    })
    .await;
    assert!(matches!(result, Err(ScanError::Agent(AgentError::Connect(_)))));
}

#[tokio::test]
async fn test_cancellation_drains_in_flight_records() {
    let mock = MockAgent {
        healthy_echo: true,
        logs: vec![
            process_log(1, 0, "init"),
            process_log(2, 1, "worker"),
        ],
        hold_log_stream_open: true,
        ..MockAgent::default()
    };
    let addr = serve(mock).await;
    let out = tempfile::tempdir().unwrap();

    let runner = ScanRunner::connect(config(&addr, out.path())).await.unwrap();
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let session = tokio::spawn(runner.run(cancel_rx));
    // Give the replayed records time to flow, then interrupt the held-open
    // session.
    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel_tx.send(true).unwrap();

    let summary = tokio::time::timeout(Duration::from_secs(5), session)
        .await
        .expect("session must observe cancellation")
        .unwrap()
        .unwrap();

    // Everything accepted before the interrupt was still consumed.
    assert_eq!(summary.counts.process_logs, 2);
}
