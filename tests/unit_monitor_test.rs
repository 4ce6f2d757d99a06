use async_trait::async_trait;
use parking_lot::Mutex;
use pg_warden::consul::ConsulClient;
use pg_warden::core::checks::{HealthCheck, ThresholdCheck};
use pg_warden::workers::health_monitor::HealthMonitor;
use pg_warden::workers::periodic::{Flow, PeriodicTask};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A check whose probe outcomes are scripted and whose status handling
/// is recorded.
struct RecordingCheck {
    results: Mutex<VecDeque<anyhow::Result<bool>>>,
    statuses: Arc<Mutex<Vec<bool>>>,
    keep_going: Arc<AtomicBool>,
}

impl RecordingCheck {
    fn new(results: Vec<anyhow::Result<bool>>) -> (Self, Arc<Mutex<Vec<bool>>>, Arc<AtomicBool>) {
        let statuses = Arc::new(Mutex::new(Vec::new()));
        let keep_going = Arc::new(AtomicBool::new(true));
        (
            Self {
                results: Mutex::new(results.into()),
                statuses: statuses.clone(),
                keep_going: keep_going.clone(),
            },
            statuses,
            keep_going,
        )
    }
}

#[async_trait]
impl HealthCheck for RecordingCheck {
    fn name(&self) -> &'static str {
        "postgresAlive"
    }

    async fn probe(&self) -> anyhow::Result<bool> {
        self.results.lock().pop_front().unwrap_or(Ok(true))
    }

    async fn handle_status(&self, passing: bool) {
        self.statuses.lock().push(passing);
    }

    fn continue_checking(&self) -> bool {
        self.keep_going.load(Ordering::SeqCst)
    }
}

fn consul(server: &MockServer) -> Arc<ConsulClient> {
    Arc::new(ConsulClient::new(&format!("{}/v1", server.uri())).unwrap())
}

#[tokio::test]
async fn test_registration_precedes_any_update() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/register"))
        .and(body_json(json!({ "Name": "postgresAlive", "TTL": "10s" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/update/postgresAlive"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (check, _, _) = RecordingCheck::new(vec![Ok(true)]);
    let mut monitor = HealthMonitor::register(
        ThresholdCheck::new(check, 1),
        consul(&server),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    monitor.run_once().await;

    let requests = server.received_requests().await.unwrap();
    let paths: Vec<&str> = requests.iter().map(|r| r.url.path()).collect();
    assert_eq!(
        paths,
        vec![
            "/v1/agent/check/register",
            "/v1/agent/check/update/postgresAlive",
        ]
    );
}

#[tokio::test]
async fn test_registration_failure_is_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/register"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (check, _, _) = RecordingCheck::new(vec![]);
    let result = HealthMonitor::register(
        ThresholdCheck::new(check, 1),
        consul(&server),
        Duration::from_secs(5),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_iteration_updates_consul_and_feeds_the_check() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/register"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/update/postgresAlive"))
        .and(body_json(json!({ "Status": "passing" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/update/postgresAlive"))
        .and(body_json(json!({ "Status": "critical" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (check, statuses, _) = RecordingCheck::new(vec![Ok(true), Ok(false)]);
    let mut monitor = HealthMonitor::register(
        ThresholdCheck::new(check, 1),
        consul(&server),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(monitor.run_once().await, Flow::Continue);
    assert_eq!(monitor.run_once().await, Flow::Continue);
    assert_eq!(*statuses.lock(), vec![true, false]);
}

#[tokio::test]
async fn test_update_failure_does_not_skip_status_handling() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/register"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/update/postgresAlive"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (check, statuses, _) = RecordingCheck::new(vec![Ok(true)]);
    let mut monitor = HealthMonitor::register(
        ThresholdCheck::new(check, 1),
        consul(&server),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(monitor.run_once().await, Flow::Continue);
    assert_eq!(*statuses.lock(), vec![true]);
}

#[tokio::test]
async fn test_monitor_stops_when_the_check_is_done() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/register"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/v1/agent/check/update/postgresAlive"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (check, _, keep_going) = RecordingCheck::new(vec![Ok(true)]);
    keep_going.store(false, Ordering::SeqCst);
    let mut monitor = HealthMonitor::register(
        ThresholdCheck::new(check, 1),
        consul(&server),
        Duration::from_secs(5),
    )
    .await
    .unwrap();

    assert_eq!(monitor.run_once().await, Flow::Stop);
}
