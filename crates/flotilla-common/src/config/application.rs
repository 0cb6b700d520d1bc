use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{CommonError, CommonResult};

const DEFAULT_CONFIG: &str = include_str!("default.toml");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Total consumable resources, in the `name:value;name:value` text form.
    pub resources: String,
    /// Opaque machine attributes advertised to the master.
    pub attributes: String,
    /// Where to place framework work directories.
    /// An empty value falls back to `$HOME/work`, then `./work`.
    pub work_dir: String,
    /// Directory prepended to relative executor paths.
    pub frameworks_home: String,
    /// Where to find a Hadoop installation for fetching remote executors.
    pub hadoop_home: String,
    /// Whether to run executors as the user who submitted the framework
    /// rather than the user running the agent.
    pub switch_user: bool,
    /// Public hostname override advertised to the master.
    pub public_dns: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub external_host: String,
    pub external_port: u16,
    pub introspection_port: u16,
    /// Standalone master address (`host:port`); empty when the agent waits
    /// for a leader-detection collaborator instead.
    pub master: String,
    pub status_update_retry_interval_secs: u64,
    pub executor_shutdown_grace_secs: u64,
    pub rpc_retry_strategy: RetryStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryStrategy {
    Fixed {
        max_count: usize,
        delay_secs: u64,
    },
    ExponentialBackoff {
        max_count: usize,
        initial_delay_secs: u64,
        max_delay_secs: u64,
        factor: u32,
    },
}

impl AppConfig {
    pub fn load() -> CommonResult<Self> {
        Figment::from(Toml::string(DEFAULT_CONFIG))
            .merge(Env::prefixed("FLOTILLA_").map(|p| p.as_str().replace("__", ".").into()))
            .extract()
            .map_err(|e| CommonError::InvalidArgument(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::load().unwrap();
        assert_eq!(config.agent.resources, "cpus:1;mem:1024");
        assert!(config.agent.switch_user);
        assert_eq!(config.agent.status_update_retry_interval_secs, 10);
        assert!(matches!(
            config.agent.rpc_retry_strategy,
            RetryStrategy::Fixed { max_count: 3, delay_secs: 1 }
        ));
    }
}
