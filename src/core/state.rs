// src/core/state.rs

//! Process-wide control state: the database role, the health-check pass
//! latches, and the readiness derivation consumed by the management API.

use crate::consul::{ConsulClient, ConsulError};
use parking_lot::RwLock;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{info, warn};

pub const ALIVE_CHECK_NAME: &str = "postgresAlive";
pub const STANDBY_REPLICATION_CHECK_NAME: &str = "postgresStandbyReplication";

/// Delay between attempts while resolving the initial role against Consul.
const RESOLVE_RETRY_DELAY: Duration = Duration::from_secs(3);

/// Role of the monitored database instance.
///
/// `DeadMaster` is terminal for the lifetime of the process: a master
/// whose alive check failed (or whose promotion failed) stays dead until
/// the node is recreated externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Standby,
    DeadMaster,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "Master",
            Role::Standby => "Standby",
            Role::DeadMaster => "DeadMaster",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unrecognized role '{0}'")]
pub struct ParseRoleError(String);

impl FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Master" => Ok(Role::Master),
            "Standby" => Ok(Role::Standby),
            "DeadMaster" => Ok(Role::DeadMaster),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// Pass-state for one named health check. Setting and clearing are
/// idempotent; waiters block until the latch is passing.
#[derive(Debug)]
pub struct HealthLatch {
    passing: watch::Sender<bool>,
}

impl HealthLatch {
    fn new() -> Self {
        Self {
            passing: watch::channel(false).0,
        }
    }

    pub fn set(&self, passing: bool) {
        self.passing.send_replace(passing);
    }

    pub fn is_passing(&self) -> bool {
        *self.passing.borrow()
    }

    pub async fn wait_passing(&self) {
        let mut rx = self.passing.subscribe();
        // Cannot fail: the sender lives as long as `self`.
        let _ = rx.wait_for(|passing| *passing).await;
    }
}

/// The controller's shared state, injected into every worker and the
/// management API.
pub struct ControlState {
    role: RwLock<Role>,
    initialized: AtomicBool,
    alive: HealthLatch,
    standby_replication: HealthLatch,
    role_key: String,
    consul: Arc<ConsulClient>,
}

impl ControlState {
    pub fn new(consul: Arc<ConsulClient>, role_key: String, initial_role: Role) -> Self {
        Self {
            role: RwLock::new(initial_role),
            initialized: AtomicBool::new(false),
            alive: HealthLatch::new(),
            standby_replication: HealthLatch::new(),
            role_key,
            consul,
        }
    }

    pub fn role(&self) -> Role {
        *self.role.read()
    }

    /// Assigns the role and persists it. `DeadMaster` is terminal: a
    /// request to leave it is ignored.
    pub async fn set_role(&self, role: Role) {
        {
            let mut current = self.role.write();
            if *current == Role::DeadMaster && role != Role::DeadMaster {
                warn!("ignoring transition out of the terminal DeadMaster role (wanted {role})");
                return;
            }
            *current = role;
        }
        info!("database role is now {role}");
        self.persist_role().await;
    }

    /// Writes the current role under the node's role key. Failures are
    /// logged; the in-process role stays authoritative either way.
    pub async fn persist_role(&self) {
        let role = self.role();
        if let Err(e) = self.consul.put_kv(&self.role_key, role.as_str()).await {
            warn!("failed to persist role {role} under '{}': {e}", self.role_key);
        }
    }

    pub fn set_check_passing(&self, name: &str, passing: bool) {
        match name {
            ALIVE_CHECK_NAME => self.alive.set(passing),
            STANDBY_REPLICATION_CHECK_NAME => self.standby_replication.set(passing),
            other => warn!("status update for unknown health check '{other}'"),
        }
    }

    pub fn check_passing(&self, name: &str) -> bool {
        match name {
            ALIVE_CHECK_NAME => self.alive.is_passing(),
            STANDBY_REPLICATION_CHECK_NAME => self.standby_replication.is_passing(),
            _ => false,
        }
    }

    /// Blocks until every health check has latched passing.
    pub async fn wait_till_healthy(&self) {
        self.alive.wait_passing().await;
        self.standby_replication.wait_passing().await;
    }

    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Marks startup as complete. Write-once; never unset.
    pub fn done_initializing(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    /// Whether the database should receive traffic: the controller is
    /// initialized, every check is passing, and the node is not a dead
    /// master.
    pub fn is_ready(&self) -> bool {
        if self.role() == Role::DeadMaster {
            return false;
        }
        self.initialized() && self.alive.is_passing() && self.standby_replication.is_passing()
    }
}

/// Resolves the role this node should assume at startup.
///
/// An absent election key means no master exists and this node claims the
/// Master role. Otherwise a previously persisted role is adopted when
/// present and parseable, and a fresh node joins as Standby. Transient
/// Consul errors are retried indefinitely.
pub async fn resolve_initial_role(
    consul: &ConsulClient,
    election_key: &str,
    role_key: &str,
) -> Role {
    loop {
        match try_resolve(consul, election_key, role_key).await {
            Ok(role) => {
                info!("resolved initial role: {role}");
                return role;
            }
            Err(e) => {
                warn!(
                    "initial role resolution failed: {e}; retrying in {}s",
                    RESOLVE_RETRY_DELAY.as_secs()
                );
                tokio::time::sleep(RESOLVE_RETRY_DELAY).await;
            }
        }
    }
}

async fn try_resolve(
    consul: &ConsulClient,
    election_key: &str,
    role_key: &str,
) -> Result<Role, ConsulError> {
    if consul.get_kv(election_key).await?.is_none() {
        return Ok(Role::Master);
    }
    match consul.get_kv(role_key).await? {
        Some(value) => match value.trim().parse() {
            Ok(role) => Ok(role),
            Err(e) => {
                warn!("{e}; treating the persisted role as absent");
                Ok(Role::Standby)
            }
        },
        None => Ok(Role::Standby),
    }
}
