use pg_warden::consul::ConsulClient;
use pg_warden::core::state::{
    ALIVE_CHECK_NAME, ControlState, Role, STANDBY_REPLICATION_CHECK_NAME,
};
use pg_warden::workers::management;
use pg_warden::workers::periodic::Worker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

fn offline_state(role: Role) -> Arc<ControlState> {
    let consul = Arc::new(ConsulClient::new("http://127.0.0.1:1/v1").unwrap());
    Arc::new(ControlState::new(
        consul,
        "service/postgres/pg-test/role".to_string(),
        role,
    ))
}

async fn spawn_server(state: Arc<ControlState>) -> (SocketAddr, Worker) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let worker = Worker::spawn("management", move |stop| {
        management::serve(listener, state, stop)
    });
    (addr, worker)
}

#[tokio::test]
async fn test_role_endpoint_reports_the_current_role() {
    let state = offline_state(Role::Standby);
    let (addr, worker) = spawn_server(state.clone()).await;

    let response = reqwest::get(format!("http://{addr}/controller/role"))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let content_type = response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(response.text().await.unwrap(), "Standby");

    state.set_role(Role::Master).await;
    let response = reqwest::get(format!("http://{addr}/controller/role"))
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "Master");

    worker.stop();
    worker.join().await;
}

#[tokio::test]
async fn test_readiness_follows_the_control_state() {
    let state = offline_state(Role::Master);
    let (addr, worker) = spawn_server(state.clone()).await;
    let url = format!("http://{addr}/controller/ready");

    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 503, "not ready before initialization");

    state.set_check_passing(ALIVE_CHECK_NAME, true);
    state.set_check_passing(STANDBY_REPLICATION_CHECK_NAME, true);
    state.done_initializing();
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "");

    state.set_check_passing(ALIVE_CHECK_NAME, false);
    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 503);

    worker.stop();
    worker.join().await;
}

#[tokio::test]
async fn test_dead_master_is_permanently_unready() {
    let state = offline_state(Role::Master);
    state.set_check_passing(ALIVE_CHECK_NAME, true);
    state.set_check_passing(STANDBY_REPLICATION_CHECK_NAME, true);
    state.done_initializing();
    let (addr, worker) = spawn_server(state.clone()).await;

    state.set_role(Role::DeadMaster).await;
    // Even with every check passing again, a dead master stays out of
    // rotation.
    state.set_check_passing(ALIVE_CHECK_NAME, true);
    let response = reqwest::get(format!("http://{addr}/controller/ready"))
        .await
        .unwrap();
    assert_eq!(response.status(), 503);

    let response = reqwest::get(format!("http://{addr}/controller/role"))
        .await
        .unwrap();
    assert_eq!(response.text().await.unwrap(), "DeadMaster");

    worker.stop();
    worker.join().await;
}

#[tokio::test]
async fn test_unknown_paths_return_404() {
    let state = offline_state(Role::Standby);
    let (addr, worker) = spawn_server(state).await;

    let response = reqwest::get(format!("http://{addr}/controller/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    assert_eq!(response.text().await.unwrap(), "Endpoint not found!");

    worker.stop();
    worker.join().await;
}

#[tokio::test]
async fn test_server_shuts_down_on_stop() {
    let state = offline_state(Role::Standby);
    let (addr, worker) = spawn_server(state).await;

    // Make sure the server is up before stopping it.
    reqwest::get(format!("http://{addr}/controller/role"))
        .await
        .unwrap();

    worker.stop();
    timeout(Duration::from_secs(2), worker.join())
        .await
        .expect("server must drain promptly");
    assert!(!worker.is_alive());

    let result = reqwest::Client::builder()
        .timeout(Duration::from_millis(500))
        .build()
        .unwrap()
        .get(format!("http://{addr}/controller/role"))
        .send()
        .await;
    assert!(result.is_err(), "stopped server must not accept connections");
}
