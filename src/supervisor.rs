// src/supervisor.rs

//! Startup orchestration: resolves the initial role, brings the workers
//! up in dependency order, and tears everything down again on failure or
//! termination.

use crate::config::Config;
use crate::consul::{ConsulClient, LockHolder};
use crate::core::checks::{PostgresAliveCheck, StandbyReplicationCheck, ThresholdCheck};
use crate::core::probes::ProbeConfig;
use crate::core::promotion::MasterPromotionHandler;
use crate::core::state::{self, ALIVE_CHECK_NAME, ControlState, STANDBY_REPLICATION_CHECK_NAME};
use crate::workers::election::Election;
use crate::workers::health_monitor::HealthMonitor;
use crate::workers::management;
use crate::workers::periodic::Worker;
use anyhow::{Context, Result};
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::{Arc, OnceLock};
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};

/// Service name registered with the local Consul agent.
const SERVICE_NAME: &str = "postgres";

pub struct Supervisor {
    config: Config,
    consul: Arc<ConsulClient>,
    state: OnceLock<Arc<ControlState>>,
    workers: Mutex<Vec<Arc<Worker>>>,
}

impl Supervisor {
    pub fn new(config: Config) -> Result<Self> {
        let consul = Arc::new(ConsulClient::new(&config.consul_url)?);
        Ok(Self {
            config,
            consul,
            state: OnceLock::new(),
            workers: Mutex::new(Vec::new()),
        })
    }

    /// The control state, once startup has constructed it.
    pub fn state(&self) -> Option<Arc<ControlState>> {
        self.state.get().cloned()
    }

    fn track(&self, worker: Worker) -> Arc<Worker> {
        let worker = Arc::new(worker);
        self.workers.lock().push(worker.clone());
        worker
    }

    /// Brings the controller up in dependency order. Any error leaves the
    /// already-started workers running; the caller is expected to `stop`.
    pub async fn start(&self) -> Result<()> {
        let election_key = self.config.election_key();
        let role_key = self.config.role_key();
        let interval = self.config.check_interval;
        let probe_config = ProbeConfig {
            connect_timeout: self.config.connect_timeout,
        };

        let role = state::resolve_initial_role(&self.consul, &election_key, &role_key).await;
        let state = Arc::new(ControlState::new(self.consul.clone(), role_key, role));
        state.persist_role().await;
        let _ = self.state.set(state.clone());

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, self.config.management_port))
            .await
            .with_context(|| {
                format!(
                    "failed to bind management port {}",
                    self.config.management_port
                )
            })?;
        {
            let state = state.clone();
            self.track(Worker::spawn("management", move |stop| {
                management::serve(listener, state, stop)
            }));
        }

        let alive = ThresholdCheck::new(
            PostgresAliveCheck::new(state.clone(), probe_config.clone()),
            self.config.alive_check_failure_threshold,
        );
        let alive_monitor = HealthMonitor::register(alive, self.consul.clone(), interval)
            .await
            .context("failed to register the alive TTL check")?;
        self.track(Worker::spawn_periodic(alive_monitor, interval));

        let replication = ThresholdCheck::new(
            StandbyReplicationCheck::new(state.clone(), probe_config.clone()),
            self.config.standby_replication_check_failure_threshold,
        );
        let replication_monitor =
            HealthMonitor::register(replication, self.consul.clone(), interval)
                .await
                .context("failed to register the replication TTL check")?;
        self.track(Worker::spawn_periodic(replication_monitor, interval));

        self.consul
            .register_service(SERVICE_NAME)
            .await
            .context("failed to register the postgres service")?;

        info!("waiting for all health checks to pass");
        state.wait_till_healthy().await;

        let handler = MasterPromotionHandler::new(state.clone(), probe_config);
        let holder = LockHolder {
            host: self.config.host_ip.clone(),
            node: self.config.host_name.clone(),
        };
        let election = Election::create(
            election_key,
            vec![
                ALIVE_CHECK_NAME.to_string(),
                STANDBY_REPLICATION_CHECK_NAME.to_string(),
            ],
            handler,
            holder,
            self.consul.clone(),
        )
        .await
        .context("failed to create the election session")?;
        self.track(Worker::spawn_periodic(election, interval));

        state.done_initializing();
        info!("startup complete; node role is {}", state.role());
        Ok(())
    }

    /// Stops every started worker in start order, waiting for each to
    /// exit.
    pub async fn stop(&self) {
        let workers: Vec<Arc<Worker>> = self.workers.lock().clone();
        for worker in workers {
            worker.stop();
            if worker.is_alive() {
                worker.join().await;
            }
        }
    }
}

/// Runs the controller until it is terminated.
pub async fn run(config: Config) -> Result<()> {
    let supervisor = Supervisor::new(config)?;

    let startup = {
        let start = supervisor.start();
        tokio::pin!(start);
        tokio::select! {
            result = &mut start => Some(result),
            _ = termination_signal() => None,
        }
    };

    match startup {
        Some(Ok(())) => {
            termination_signal().await;
            info!("termination signal received; shutting down");
            supervisor.stop().await;
            Ok(())
        }
        Some(Err(e)) => {
            error!("startup failed: {e:#}");
            supervisor.stop().await;
            Err(e)
        }
        None => {
            info!("termination signal received during startup; shutting down");
            supervisor.stop().await;
            Ok(())
        }
    }
}

/// Resolves on SIGTERM or SIGINT.
async fn termination_signal() {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to install the SIGTERM handler");
    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to install the SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
