// src/config.rs

//! Controller configuration: TOML file loading plus command-line overrides.

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::env;
use std::fs;
use std::str::FromStr;
use std::time::Duration;

/// Runtime configuration for the controller daemon.
///
/// Every field has a default and a matching kebab-case command-line flag;
/// flags win over file values.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the local Consul agent's HTTP API.
    #[serde(default = "default_consul_url")]
    pub consul_url: String,

    /// Prefix under which the election key and the per-node role keys live.
    #[serde(default = "default_consul_key_prefix")]
    pub consul_key_prefix: String,

    /// Time between two iterations of every worker loop.
    #[serde(with = "humantime_serde", default = "default_check_interval")]
    pub check_interval: Duration,

    /// Connect timeout for the local database probes.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Consecutive failures before the alive check turns critical.
    #[serde(default = "default_alive_check_failure_threshold")]
    pub alive_check_failure_threshold: u32,

    /// Consecutive failures before the replication check turns critical.
    #[serde(default = "default_standby_replication_check_failure_threshold")]
    pub standby_replication_check_failure_threshold: u32,

    /// Port for the management HTTP API consumed by the load balancer.
    #[serde(default = "default_management_port")]
    pub management_port: u16,

    /// Node identity used in the role key path and the election key value.
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// IP written into the election key value when this node wins.
    #[serde(default)]
    pub host_ip: String,
}

fn default_consul_url() -> String {
    "http://localhost:8500/v1".to_string()
}

fn default_consul_key_prefix() -> String {
    "service/postgres".to_string()
}

fn default_check_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(1)
}

fn default_alive_check_failure_threshold() -> u32 {
    1
}

fn default_standby_replication_check_failure_threshold() -> u32 {
    4
}

fn default_management_port() -> u16 {
    80
}

fn default_host_name() -> String {
    env::var("HOSTNAME").unwrap_or_default()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            consul_url: default_consul_url(),
            consul_key_prefix: default_consul_key_prefix(),
            check_interval: default_check_interval(),
            connect_timeout: default_connect_timeout(),
            alive_check_failure_threshold: default_alive_check_failure_threshold(),
            standby_replication_check_failure_threshold:
                default_standby_replication_check_failure_threshold(),
            management_port: default_management_port(),
            host_name: default_host_name(),
            host_ip: String::new(),
        }
    }
}

impl Config {
    /// Builds the configuration from process arguments: an optional
    /// `--config <path>` TOML file overlaid with individual flag overrides.
    pub fn from_args(args: &[String]) -> Result<Self> {
        let config_path = args
            .iter()
            .position(|arg| arg == "--config")
            .and_then(|i| args.get(i + 1))
            .map(|s| s.as_str());

        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_cli_overrides(&args[1..])?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file \"{path}\""))?;
        toml::from_str(&content).with_context(|| format!("failed to parse config file \"{path}\""))
    }

    fn apply_cli_overrides(&mut self, args: &[String]) -> Result<()> {
        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            match flag.as_str() {
                // Already consumed before the overlay; skip its value.
                "--config" => {
                    require_value(&mut iter, flag)?;
                }
                "--consul-url" => self.consul_url = require_value(&mut iter, flag)?.clone(),
                "--consul-key-prefix" => {
                    self.consul_key_prefix = require_value(&mut iter, flag)?.clone();
                }
                "--check-interval" => {
                    self.check_interval = Duration::from_secs(parse_value(&mut iter, flag)?);
                }
                "--connect-timeout" => {
                    self.connect_timeout = Duration::from_secs(parse_value(&mut iter, flag)?);
                }
                "--alive-check-failure-threshold" => {
                    self.alive_check_failure_threshold = parse_value(&mut iter, flag)?;
                }
                "--standby-replication-check-failure-threshold" => {
                    self.standby_replication_check_failure_threshold =
                        parse_value(&mut iter, flag)?;
                }
                "--management-port" => self.management_port = parse_value(&mut iter, flag)?,
                "--host-name" => self.host_name = require_value(&mut iter, flag)?.clone(),
                "--host-ip" => self.host_ip = require_value(&mut iter, flag)?.clone(),
                other => bail!("unrecognized argument '{other}'"),
            }
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.host_ip.is_empty() {
            bail!("host-ip must be provided");
        }
        if self.host_name.is_empty() {
            bail!("host-name must be provided (or HOSTNAME set in the environment)");
        }
        if self.check_interval.is_zero() {
            bail!("check-interval must be at least one second");
        }
        if self.alive_check_failure_threshold == 0 {
            bail!("alive-check-failure-threshold must be at least 1");
        }
        if self.standby_replication_check_failure_threshold == 0 {
            bail!("standby-replication-check-failure-threshold must be at least 1");
        }
        Ok(())
    }

    /// The well-known key cluster members race to lock.
    pub fn election_key(&self) -> String {
        format!("{}/master", self.consul_key_prefix)
    }

    /// The key this node persists its current role under.
    pub fn role_key(&self) -> String {
        format!("{}/{}/role", self.consul_key_prefix, self.host_name)
    }
}

fn require_value<'a>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<&'a String> {
    iter.next()
        .with_context(|| format!("{flag} requires a value"))
}

fn parse_value<'a, T>(iter: &mut impl Iterator<Item = &'a String>, flag: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = require_value(iter, flag)?;
    raw.parse()
        .with_context(|| format!("invalid value '{raw}' for {flag}"))
}
