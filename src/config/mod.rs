use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Pool tunables.
///
/// A [`HostPool`](crate::pool::HostPool) takes its own copy of the config at
/// construction time, so mutating the caller's copy afterwards never affects
/// a running pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Deadline for opening one link, in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Deadline for one unit of work on a session, in milliseconds
    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    /// Attempts per logical call (borrow + execute), consumed by the dispatcher
    #[serde(default = "default_retry_num")]
    pub retry_num: u32,

    /// Sessions to open eagerly at pool construction (best effort)
    #[serde(default = "default_init_connection_per_host")]
    pub init_connection_per_host: usize,

    /// Hard cap on live sessions per host
    #[serde(default = "default_max_connection_per_host")]
    pub max_connection_per_host: usize,

    /// Callers allowed to block waiting on the idle queue at once
    #[serde(default = "default_max_block_threads_per_host")]
    pub max_block_threads_per_host: usize,

    /// In-flight background opens allowed at once
    #[serde(default = "default_max_pending_per_host")]
    pub max_pending_per_host: usize,

    /// Borrow deadline used by the dispatcher, in milliseconds
    #[serde(default = "default_max_time_wait_for_connection_ms")]
    pub max_time_wait_for_connection_ms: u64,

    /// Socket timeouts beyond this count inside the window quarantine the host
    #[serde(default = "default_bad_host_timeout_count")]
    pub bad_host_timeout_count: usize,

    /// Width of the timeout sliding window, in milliseconds
    #[serde(default = "default_bad_host_timeout_window_ms")]
    pub bad_host_timeout_window_ms: u64,

    /// Cap on the backoff multiplier (in delay slices)
    #[serde(default = "default_retry_max_delay_slice")]
    pub retry_max_delay_slice: u64,

    /// One backoff delay slice, in milliseconds
    #[serde(default = "default_retry_delay_slice_ms")]
    pub retry_delay_slice_ms: u64,

    /// Flat quarantine window for suspended hosts, in milliseconds
    #[serde(default = "default_retry_suspend_window_ms")]
    pub retry_suspend_window_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    1000
}

fn default_socket_timeout_ms() -> u64 {
    3000
}

fn default_retry_num() -> u32 {
    3
}

fn default_init_connection_per_host() -> usize {
    5
}

fn default_max_connection_per_host() -> usize {
    100
}

fn default_max_block_threads_per_host() -> usize {
    10
}

fn default_max_pending_per_host() -> usize {
    100
}

fn default_max_time_wait_for_connection_ms() -> u64 {
    2000
}

fn default_bad_host_timeout_count() -> usize {
    3
}

fn default_bad_host_timeout_window_ms() -> u64 {
    10000
}

fn default_retry_max_delay_slice() -> u64 {
    10
}

fn default_retry_delay_slice_ms() -> u64 {
    1000
}

fn default_retry_suspend_window_ms() -> u64 {
    20000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            retry_num: default_retry_num(),
            init_connection_per_host: default_init_connection_per_host(),
            max_connection_per_host: default_max_connection_per_host(),
            max_block_threads_per_host: default_max_block_threads_per_host(),
            max_pending_per_host: default_max_pending_per_host(),
            max_time_wait_for_connection_ms: default_max_time_wait_for_connection_ms(),
            bad_host_timeout_count: default_bad_host_timeout_count(),
            bad_host_timeout_window_ms: default_bad_host_timeout_window_ms(),
            retry_max_delay_slice: default_retry_max_delay_slice(),
            retry_delay_slice_ms: default_retry_delay_slice_ms(),
            retry_suspend_window_ms: default_retry_suspend_window_ms(),
        }
    }
}

impl PoolConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }

    pub fn max_time_wait_for_connection(&self) -> Duration {
        Duration::from_millis(self.max_time_wait_for_connection_ms)
    }

    pub fn bad_host_timeout_window(&self) -> Duration {
        Duration::from_millis(self.bad_host_timeout_window_ms)
    }

    pub fn retry_delay_slice(&self) -> Duration {
        Duration::from_millis(self.retry_delay_slice_ms)
    }

    pub fn retry_suspend_window(&self) -> Duration {
        Duration::from_millis(self.retry_suspend_window_ms)
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<PoolConfig> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: PoolConfig =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration overrides from `RPCPOOL_*` environment variables
///
/// Unset or unparsable variables leave the default in place.
pub fn load_from_env() -> PoolConfig {
    // Pick up a .env file if one exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    fn env_u64(key: &str, slot: &mut u64) {
        if let Ok(raw) = std::env::var(key) {
            if let Ok(val) = raw.parse() {
                *slot = val;
            }
        }
    }

    fn env_usize(key: &str, slot: &mut usize) {
        if let Ok(raw) = std::env::var(key) {
            if let Ok(val) = raw.parse() {
                *slot = val;
            }
        }
    }

    let mut config = PoolConfig::default();

    env_u64("RPCPOOL_CONNECT_TIMEOUT_MS", &mut config.connect_timeout_ms);
    env_u64("RPCPOOL_SOCKET_TIMEOUT_MS", &mut config.socket_timeout_ms);
    if let Ok(raw) = std::env::var("RPCPOOL_RETRY_NUM") {
        if let Ok(val) = raw.parse() {
            config.retry_num = val;
        }
    }
    env_usize(
        "RPCPOOL_INIT_CONNECTION_PER_HOST",
        &mut config.init_connection_per_host,
    );
    env_usize(
        "RPCPOOL_MAX_CONNECTION_PER_HOST",
        &mut config.max_connection_per_host,
    );
    env_usize(
        "RPCPOOL_MAX_BLOCK_THREADS_PER_HOST",
        &mut config.max_block_threads_per_host,
    );
    env_usize(
        "RPCPOOL_MAX_PENDING_PER_HOST",
        &mut config.max_pending_per_host,
    );
    env_u64(
        "RPCPOOL_MAX_TIME_WAIT_FOR_CONNECTION_MS",
        &mut config.max_time_wait_for_connection_ms,
    );
    env_usize(
        "RPCPOOL_BAD_HOST_TIMEOUT_COUNT",
        &mut config.bad_host_timeout_count,
    );
    env_u64(
        "RPCPOOL_BAD_HOST_TIMEOUT_WINDOW_MS",
        &mut config.bad_host_timeout_window_ms,
    );
    env_u64(
        "RPCPOOL_RETRY_MAX_DELAY_SLICE",
        &mut config.retry_max_delay_slice,
    );
    env_u64(
        "RPCPOOL_RETRY_DELAY_SLICE_MS",
        &mut config.retry_delay_slice_ms,
    );
    env_u64(
        "RPCPOOL_RETRY_SUSPEND_WINDOW_MS",
        &mut config.retry_suspend_window_ms,
    );

    config
}

/// Load configuration from file or environment
///
/// Loads the YAML file when a path is given, otherwise falls back to the
/// environment-variable loader.
pub fn load_config(config_path: Option<&str>) -> Result<PoolConfig> {
    if let Some(path) = config_path {
        load_from_yaml(path)
    } else {
        Ok(load_from_env())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.connect_timeout_ms, 1000);
        assert_eq!(config.socket_timeout_ms, 3000);
        assert_eq!(config.retry_num, 3);
        assert_eq!(config.init_connection_per_host, 5);
        assert_eq!(config.max_connection_per_host, 100);
        assert_eq!(config.max_block_threads_per_host, 10);
        assert_eq!(config.max_pending_per_host, 100);
        assert_eq!(config.max_time_wait_for_connection_ms, 2000);
        assert_eq!(config.bad_host_timeout_count, 3);
        assert_eq!(config.bad_host_timeout_window_ms, 10000);
        assert_eq!(config.retry_max_delay_slice, 10);
        assert_eq!(config.retry_delay_slice_ms, 1000);
        assert_eq!(config.retry_suspend_window_ms, 20000);
    }

    #[test]
    fn test_duration_accessors() {
        let config = PoolConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(1));
        assert_eq!(config.retry_suspend_window(), Duration::from_secs(20));
        assert_eq!(config.bad_host_timeout_window(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
max_connection_per_host: 8
retry_num: 5
"#;
        let config: PoolConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.max_connection_per_host, 8);
        assert_eq!(config.retry_num, 5);
        // Untouched knobs keep their defaults
        assert_eq!(config.connect_timeout_ms, 1000);
        assert_eq!(config.bad_host_timeout_count, 3);
    }
}
