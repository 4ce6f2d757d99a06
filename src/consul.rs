// src/consul.rs

//! Thin client for the slice of the Consul HTTP API the controller uses:
//! KV reads and writes, session creation, agent service and TTL-check
//! registration, and session-scoped lock acquisition.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Timeout for requests to the local Consul agent.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ConsulError {
    #[error("consul request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("consul returned {status} during {operation}: {body}")]
    UnexpectedStatus {
        operation: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("consul returned an unexpected body during {operation}: {source}")]
    MalformedResponse {
        operation: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The session used for a lock acquisition is no longer valid on the
    /// server; callers are expected to create a replacement.
    #[error("consul session is no longer valid")]
    InvalidSession,
}

/// Identity written as the election key's value by the lock holder.
#[derive(Debug, Clone, Serialize)]
pub struct LockHolder {
    pub host: String,
    pub node: String,
}

#[derive(Debug, Deserialize)]
struct CreatedSession {
    #[serde(rename = "ID")]
    id: String,
}

pub struct ConsulClient {
    http: reqwest::Client,
    base_url: String,
}

impl ConsulClient {
    pub fn new(base_url: &str) -> Result<Self, ConsulError> {
        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Registers a service with the local agent.
    pub async fn register_service(&self, name: &str) -> Result<(), ConsulError> {
        let response = self
            .http
            .put(format!("{}/agent/service/register", self.base_url))
            .json(&json!({ "Name": name }))
            .send()
            .await?;
        Self::expect_success("service registration", response).await?;
        Ok(())
    }

    /// Registers a TTL check that turns critical unless it is refreshed
    /// within `ttl`.
    pub async fn register_ttl_check(&self, name: &str, ttl: Duration) -> Result<(), ConsulError> {
        let response = self
            .http
            .put(format!("{}/agent/check/register", self.base_url))
            .json(&json!({ "Name": name, "TTL": format!("{}s", ttl.as_secs()) }))
            .send()
            .await?;
        Self::expect_success("check registration", response).await?;
        Ok(())
    }

    /// Refreshes a TTL check with its latest status.
    pub async fn update_check(&self, name: &str, passing: bool) -> Result<(), ConsulError> {
        let status = if passing { "passing" } else { "critical" };
        debug!("updating consul check '{name}' to {status}");
        let response = self
            .http
            .put(format!("{}/agent/check/update/{name}", self.base_url))
            .json(&json!({ "Status": status }))
            .send()
            .await?;
        Self::expect_success("check update", response).await?;
        Ok(())
    }

    /// Creates a session tied to the given check names and returns its ID.
    /// Consul invalidates the session, releasing any lock it holds, when
    /// any associated check goes critical or misses its TTL.
    pub async fn create_session(&self, checks: &[String]) -> Result<String, ConsulError> {
        let response = self
            .http
            .put(format!("{}/session/create", self.base_url))
            .json(&json!({ "Checks": checks }))
            .send()
            .await?;
        let body = Self::expect_success("session creation", response).await?;
        let session: CreatedSession =
            serde_json::from_str(&body).map_err(|source| ConsulError::MalformedResponse {
                operation: "session creation",
                source,
            })?;
        debug!("created consul session {}", session.id);
        Ok(session.id)
    }

    /// Attempts to acquire the session-scoped lock on `key`, writing the
    /// holder identity as the key's value. Returns whether the lock was
    /// taken; an invalidated session surfaces as
    /// [`ConsulError::InvalidSession`].
    pub async fn acquire(
        &self,
        key: &str,
        session: &str,
        holder: &LockHolder,
    ) -> Result<bool, ConsulError> {
        let response = self
            .http
            .put(format!("{}/kv/{key}", self.base_url))
            .query(&[("acquire", session)])
            .json(holder)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        debug!("lock acquisition on '{key}' returned {status}: {body}");

        if status == StatusCode::INTERNAL_SERVER_ERROR && body.contains("invalid session") {
            return Err(ConsulError::InvalidSession);
        }
        if !status.is_success() {
            return Err(ConsulError::UnexpectedStatus {
                operation: "lock acquisition",
                status,
                body,
            });
        }
        Ok(body.trim() == "true")
    }

    /// Reads a key's raw value; `None` when the key does not exist.
    pub async fn get_kv(&self, key: &str) -> Result<Option<String>, ConsulError> {
        let response = self
            .http
            .get(format!("{}/kv/{key}?raw", self.base_url))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::expect_success("kv read", response).await?;
        Ok(Some(body))
    }

    /// Writes a key's raw value.
    pub async fn put_kv(&self, key: &str, value: &str) -> Result<(), ConsulError> {
        let response = self
            .http
            .put(format!("{}/kv/{key}", self.base_url))
            .body(value.to_string())
            .send()
            .await?;
        Self::expect_success("kv write", response).await?;
        Ok(())
    }

    async fn expect_success(
        operation: &'static str,
        response: reqwest::Response,
    ) -> Result<String, ConsulError> {
        let status = response.status();
        let body = response.text().await?;
        if status.is_success() {
            Ok(body)
        } else {
            Err(ConsulError::UnexpectedStatus {
                operation,
                status,
                body,
            })
        }
    }
}
