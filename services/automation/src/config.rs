use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};

use cdp_events::DEFAULT_MAX_PAYLOAD_BYTES;

use crate::db::DbConfig;

pub const DEFAULT_QUEUES: &[&str] = &[
    "deployment-events",
    "test-run-events",
    "migration-events",
    "image-events",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,
    pub dev_mode: bool,
    pub database: DbConfig,
    pub ops_url: String,
    pub ops_timeout: Duration,
    pub queues: Vec<String>,
    pub queue_wait: Duration,
    pub queue_visibility: Duration,
    pub max_payload_bytes: usize,
    pub correlation_window: Duration,
    pub schedule_tolerance: Duration,
    pub scheduler_interval: Duration,
    pub schedule_lease: Duration,
}

fn secs_var(name: &str, default: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(value) => {
            let secs = value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{name} must be a whole number of seconds"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn bytes_var(name: &str, default: usize) -> Result<usize> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .with_context(|| format!("{name} must be a whole number of bytes")),
        Err(_) => Ok(default),
    }
}

fn parse_queues(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let listen_addr = std::env::var("CDP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .context("CDP_LISTEN_ADDR is not a socket address")?;

        let log_level = std::env::var("CDP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let dev_mode = std::env::var("CDP_DEV")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false);

        let database = DbConfig::from_env();

        let ops_url = std::env::var("CDP_SELF_SERVICE_OPS_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());

        let queues = std::env::var("CDP_QUEUES")
            .map(|v| parse_queues(&v))
            .unwrap_or_else(|_| DEFAULT_QUEUES.iter().map(|q| q.to_string()).collect());

        Ok(Self {
            listen_addr,
            log_level,
            dev_mode,
            database,
            ops_url,
            ops_timeout: secs_var("CDP_SELF_SERVICE_OPS_TIMEOUT_SECS", 10)?,
            queues,
            queue_wait: secs_var("CDP_QUEUE_WAIT_SECS", 20)?,
            queue_visibility: secs_var("CDP_QUEUE_VISIBILITY_SECS", 300)?,
            max_payload_bytes: bytes_var("CDP_MAX_PAYLOAD_BYTES", DEFAULT_MAX_PAYLOAD_BYTES)?,
            correlation_window: secs_var("CDP_CORRELATION_WINDOW_SECS", 120)?,
            schedule_tolerance: secs_var("CDP_SCHEDULE_TOLERANCE_SECS", 300)?,
            scheduler_interval: secs_var("CDP_SCHEDULER_INTERVAL_SECS", 30)?,
            schedule_lease: secs_var("CDP_SCHEDULE_LEASE_SECS", 60)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_queues_skips_blanks() {
        assert_eq!(
            parse_queues(" image-events, ,deployment-events,"),
            vec!["image-events".to_string(), "deployment-events".to_string()]
        );
    }
}
