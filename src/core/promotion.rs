// src/core/promotion.rs

//! Election outcome handling: promote the local standby when this node
//! wins the race for the election key.

use super::probes::{self, ProbeConfig};
use super::state::{ControlState, Role};
use crate::workers::election::ElectionStatusHandler;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

pub struct MasterPromotionHandler {
    state: Arc<ControlState>,
    probe_config: ProbeConfig,
}

impl MasterPromotionHandler {
    pub fn new(state: Arc<ControlState>, probe_config: ProbeConfig) -> Self {
        Self {
            state,
            probe_config,
        }
    }
}

#[async_trait]
impl ElectionStatusHandler for MasterPromotionHandler {
    async fn handle_status(&self, is_leader: bool) -> anyhow::Result<()> {
        // Nothing to do unless a standby just won the lock: an existing
        // Master keeps its role, a DeadMaster never comes back.
        if !is_leader || self.state.role() != Role::Standby {
            return Ok(());
        }

        info!("won the leader election; promoting the local instance");
        match probes::promote(&self.probe_config).await {
            Ok(true) => self.state.set_role(Role::Master).await,
            Ok(false) => {
                error!("pg_promote did not complete; marking this node DeadMaster");
                self.state.set_role(Role::DeadMaster).await;
            }
            Err(e) => {
                error!("promotion failed: {e:#}; marking this node DeadMaster");
                self.state.set_role(Role::DeadMaster).await;
            }
        }
        Ok(())
    }

    /// Standbys keep racing; a Master or DeadMaster leaves the election.
    /// The session keeps holding the lock until Consul invalidates it.
    fn continue_participating(&self) -> bool {
        self.state.role() == Role::Standby
    }
}
