// src/core/probes.rs

//! The local database probes. Every statement runs against the colocated
//! instance as the trust-authenticated `controller` user.

use super::state::Role;
use anyhow::Result;
use std::time::Duration;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, error, info};

/// Connection parameters shared by every probe.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub connect_timeout: Duration,
}

async fn connect(config: &ProbeConfig) -> Result<Client, tokio_postgres::Error> {
    let mut pg = tokio_postgres::Config::new();
    pg.user("controller")
        .host("localhost")
        .connect_timeout(config.connect_timeout);

    let (client, connection) = pg.connect(NoTls).await?;
    // The connection future drives the protocol until the client drops.
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            debug!("local postgres connection ended: {e}");
        }
    });
    Ok(client)
}

/// Liveness probe: `SELECT 1` against the local instance.
pub async fn alive(config: &ProbeConfig) -> Result<bool> {
    let client = connect(config).await?;
    client.query_one("SELECT 1", &[]).await?;
    info!("postgres is alive");
    Ok(true)
}

/// Replication probe for standbys: healthy iff the wal receiver reports
/// `streaming`. Reported as passing for any other role.
pub async fn standby_replication(config: &ProbeConfig, role: Role) -> Result<bool> {
    if role != Role::Standby {
        debug!("skipping replication probe: role is {role}, not Standby");
        return Ok(true);
    }

    let client = connect(config).await?;
    let row = client.query_one("SELECT wal_receiver_status()", &[]).await?;
    let status: String = row.try_get(0)?;
    if status != "streaming" {
        error!("postgres is not replicating (wal receiver status: {status})");
        return Ok(false);
    }
    info!("postgres is replicating");
    Ok(true)
}

/// Promotes the local standby on an autocommit connection. Returns the
/// scalar reported by `pg_promote`; anything but `true` means the
/// promotion did not complete.
pub async fn promote(config: &ProbeConfig) -> Result<bool> {
    let client = connect(config).await?;
    let row = client.query_one("SELECT pg_promote(true)", &[]).await?;
    let promoted: bool = row.try_get(0)?;
    Ok(promoted)
}
