// src/workers/election.rs

//! Leader election over a session-scoped Consul lock. The session is
//! bound to the controller's health checks, so Consul releases the lock
//! by itself when this node goes unhealthy.

use super::periodic::{Flow, PeriodicTask};
use crate::consul::{ConsulClient, ConsulError, LockHolder};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Reacts to each round of the election.
#[async_trait]
pub trait ElectionStatusHandler: Send + Sync {
    async fn handle_status(&self, is_leader: bool) -> anyhow::Result<()>;

    /// False once this node no longer needs to race for the lock.
    fn continue_participating(&self) -> bool;
}

pub struct Election<H> {
    election_key: String,
    session_checks: Vec<String>,
    handler: H,
    holder: LockHolder,
    consul: Arc<ConsulClient>,
    session_id: String,
}

impl<H: ElectionStatusHandler> Election<H> {
    /// Creates the Consul session and the election task bound to it.
    pub async fn create(
        election_key: String,
        session_checks: Vec<String>,
        handler: H,
        holder: LockHolder,
        consul: Arc<ConsulClient>,
    ) -> Result<Self, ConsulError> {
        info!("creating consul session for leader election");
        let session_id = consul.create_session(&session_checks).await?;
        Ok(Self {
            election_key,
            session_checks,
            handler,
            holder,
            consul,
            session_id,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// One attempt at the lock. An invalidated session is replaced on the
    /// spot and counts as not holding the lock this round.
    async fn try_acquire(&mut self) -> bool {
        match self
            .consul
            .acquire(&self.election_key, &self.session_id, &self.holder)
            .await
        {
            Ok(acquired) => acquired,
            Err(ConsulError::InvalidSession) => {
                warn!("election session was invalidated; creating a replacement");
                match self.consul.create_session(&self.session_checks).await {
                    Ok(session_id) => self.session_id = session_id,
                    Err(e) => warn!("failed to replace the election session: {e}"),
                }
                false
            }
            Err(e) => {
                warn!("lock acquisition failed: {e}");
                false
            }
        }
    }
}

#[async_trait]
impl<H: ElectionStatusHandler + 'static> PeriodicTask for Election<H> {
    fn name(&self) -> &'static str {
        "election"
    }

    async fn run_once(&mut self) -> Flow {
        let is_leader = self.try_acquire().await;
        if let Err(e) = self.handler.handle_status(is_leader).await {
            warn!("election status handling failed: {e:#}");
        }
        if !self.handler.continue_participating() {
            info!("status handler ended election participation");
            return Flow::Stop;
        }
        Flow::Continue
    }
}
