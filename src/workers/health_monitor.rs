// src/workers/health_monitor.rs

//! Binds one health check to one Consul TTL check: every iteration runs
//! the probe, refreshes the TTL check, and feeds the result into the
//! control state.

use super::periodic::{Flow, PeriodicTask};
use crate::consul::{ConsulClient, ConsulError};
use crate::core::checks::{HealthCheck, ThresholdCheck};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Headroom added to the loop interval so a slow probe or a network
/// hiccup does not expire the TTL check.
const TTL_BUFFER: Duration = Duration::from_secs(5);

pub struct HealthMonitor<C> {
    check: ThresholdCheck<C>,
    consul: Arc<ConsulClient>,
}

impl<C: HealthCheck> HealthMonitor<C> {
    /// Registers the TTL check and returns the monitor task, so that
    /// registration always precedes the first status update.
    pub async fn register(
        check: ThresholdCheck<C>,
        consul: Arc<ConsulClient>,
        interval: Duration,
    ) -> Result<Self, ConsulError> {
        let ttl = interval + TTL_BUFFER;
        info!(
            "registering consul TTL check '{}' with TTL {}s",
            check.name(),
            ttl.as_secs()
        );
        consul.register_ttl_check(check.name(), ttl).await?;
        Ok(Self { check, consul })
    }
}

#[async_trait]
impl<C: HealthCheck + 'static> PeriodicTask for HealthMonitor<C> {
    fn name(&self) -> &'static str {
        self.check.name()
    }

    async fn run_once(&mut self) -> Flow {
        let passing = self.check.observe().await;

        // Best effort on both sides: a failed TTL refresh must not hide
        // the status from the control state, and vice versa.
        if let Err(e) = self.consul.update_check(self.check.name(), passing).await {
            warn!("failed to refresh consul check '{}': {e}", self.check.name());
        }
        self.check.check().handle_status(passing).await;

        if !self.check.check().continue_checking() {
            info!("'{}' ended its monitoring loop", self.check.name());
            return Flow::Stop;
        }
        Flow::Continue
    }
}
