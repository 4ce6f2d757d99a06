// src/core/checks.rs

//! Health-check capability surface and the two database checks.

use super::probes::{self, ProbeConfig};
use super::state::{ALIVE_CHECK_NAME, ControlState, Role, STANDBY_REPLICATION_CHECK_NAME};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// One named health check: a probe plus the status handling that feeds
/// the control state.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the underlying probe once. Errors count as failures.
    async fn probe(&self) -> anyhow::Result<bool>;

    /// Reacts to the thresholded pass/fail observation.
    async fn handle_status(&self, passing: bool);

    /// False once the monitoring loop should end.
    fn continue_checking(&self) -> bool;
}

/// Folds consecutive probe failures against a threshold: the check keeps
/// reporting passing until `failure_threshold` probes in a row have
/// failed, and one success resets the count.
pub struct ThresholdCheck<C> {
    check: C,
    failure_threshold: u32,
    failure_count: u32,
}

impl<C: HealthCheck> ThresholdCheck<C> {
    pub fn new(check: C, failure_threshold: u32) -> Self {
        debug_assert!(failure_threshold >= 1);
        Self {
            check,
            failure_threshold,
            failure_count: 0,
        }
    }

    pub fn name(&self) -> &'static str {
        self.check.name()
    }

    pub fn check(&self) -> &C {
        &self.check
    }

    /// Runs one probe and returns the thresholded pass state.
    pub async fn observe(&mut self) -> bool {
        let passed = match self.check.probe().await {
            Ok(passed) => passed,
            Err(e) => {
                warn!("{} probe error: {e:#}", self.check.name());
                false
            }
        };

        self.failure_count = if passed {
            0
        } else {
            self.failure_count.saturating_add(1)
        };
        if self.failure_count > 0 {
            info!(
                "{} failure count: {}/{}",
                self.check.name(),
                self.failure_count,
                self.failure_threshold
            );
        }
        self.failure_count < self.failure_threshold
    }
}

/// Liveness check. A failure on an initialized Master is the one health
/// event that moves the role, to DeadMaster.
pub struct PostgresAliveCheck {
    state: Arc<ControlState>,
    probe_config: ProbeConfig,
}

impl PostgresAliveCheck {
    pub fn new(state: Arc<ControlState>, probe_config: ProbeConfig) -> Self {
        Self {
            state,
            probe_config,
        }
    }
}

#[async_trait]
impl HealthCheck for PostgresAliveCheck {
    fn name(&self) -> &'static str {
        ALIVE_CHECK_NAME
    }

    async fn probe(&self) -> anyhow::Result<bool> {
        probes::alive(&self.probe_config).await
    }

    async fn handle_status(&self, passing: bool) {
        self.state.set_check_passing(ALIVE_CHECK_NAME, passing);
        if !passing && self.state.role() == Role::Master && self.state.initialized() {
            warn!("alive check failed while acting as Master");
            self.state.set_role(Role::DeadMaster).await;
        }
    }

    fn continue_checking(&self) -> bool {
        self.state.role() != Role::DeadMaster
    }
}

/// Streaming-replication check; passes unchecked unless this node is a
/// Standby.
pub struct StandbyReplicationCheck {
    state: Arc<ControlState>,
    probe_config: ProbeConfig,
}

impl StandbyReplicationCheck {
    pub fn new(state: Arc<ControlState>, probe_config: ProbeConfig) -> Self {
        Self {
            state,
            probe_config,
        }
    }
}

#[async_trait]
impl HealthCheck for StandbyReplicationCheck {
    fn name(&self) -> &'static str {
        STANDBY_REPLICATION_CHECK_NAME
    }

    async fn probe(&self) -> anyhow::Result<bool> {
        probes::standby_replication(&self.probe_config, self.state.role()).await
    }

    async fn handle_status(&self, passing: bool) {
        self.state
            .set_check_passing(STANDBY_REPLICATION_CHECK_NAME, passing);
    }

    fn continue_checking(&self) -> bool {
        self.state.role() != Role::DeadMaster
    }
}
