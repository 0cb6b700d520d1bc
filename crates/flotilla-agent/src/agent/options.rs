use std::path::PathBuf;
use std::time::Duration;

use flotilla_common::config::AppConfig;
use flotilla_server::retry::RetryStrategy;

use crate::error::{AgentError, AgentResult};
use crate::id::Pid;
use crate::resources::Resources;
use crate::workdir;

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub resources: Resources,
    pub attributes: String,
    pub hostname: String,
    pub public_hostname: String,
    pub listen_host: String,
    pub listen_port: u16,
    pub external_host: Option<String>,
    pub external_port: Option<u16>,
    pub introspection_port: u16,
    pub work_directory_root: PathBuf,
    pub frameworks_home: Option<PathBuf>,
    pub switch_user: bool,
    pub master: Option<Pid>,
    pub status_update_retry_interval: Duration,
    pub executor_shutdown_grace: Duration,
    pub rpc_retry_strategy: RetryStrategy,
    /// Flattened configuration pairs surfaced by the `/vars` endpoint.
    pub config_vars: Vec<(String, String)>,
}

impl AgentOptions {
    pub fn try_new(config: &AppConfig) -> AgentResult<Self> {
        let agent = &config.agent;
        // Failing to determine the hostname leaves the agent unable to
        // identify itself and is fatal.
        let hostname = nix::unistd::gethostname()
            .map_err(|e| AgentError::InternalError(format!("failed to get hostname: {e}")))?
            .into_string()
            .map_err(|_| AgentError::InternalError("hostname is not valid UTF-8".to_string()))?;
        let public_hostname = if agent.public_dns.is_empty() {
            hostname.clone()
        } else {
            agent.public_dns.clone()
        };
        let resources = Resources::parse(&agent.resources)?;
        let master = if agent.master.is_empty() {
            None
        } else {
            Some(agent.master.parse()?)
        };
        let external_host = if agent.external_host.is_empty() {
            None
        } else {
            Some(agent.external_host.clone())
        };
        let external_port = if agent.external_port == 0 {
            None
        } else {
            Some(agent.external_port)
        };
        let frameworks_home = if agent.frameworks_home.is_empty() {
            None
        } else {
            Some(PathBuf::from(&agent.frameworks_home))
        };
        let config_vars = vec![
            ("resources".to_string(), agent.resources.clone()),
            ("attributes".to_string(), agent.attributes.clone()),
            ("work_dir".to_string(), agent.work_dir.clone()),
            ("frameworks_home".to_string(), agent.frameworks_home.clone()),
            ("hadoop_home".to_string(), agent.hadoop_home.clone()),
            ("switch_user".to_string(), agent.switch_user.to_string()),
            ("master".to_string(), agent.master.clone()),
        ];
        Ok(Self {
            resources,
            attributes: agent.attributes.clone(),
            hostname,
            public_hostname,
            listen_host: agent.listen_host.clone(),
            listen_port: agent.listen_port,
            external_host,
            external_port,
            introspection_port: agent.introspection_port,
            work_directory_root: workdir::work_directory_root(&agent.work_dir),
            frameworks_home,
            switch_user: agent.switch_user,
            master,
            status_update_retry_interval: Duration::from_secs(
                agent.status_update_retry_interval_secs,
            ),
            executor_shutdown_grace: Duration::from_secs(agent.executor_shutdown_grace_secs),
            rpc_retry_strategy: RetryStrategy::from(&agent.rpc_retry_strategy),
            config_vars,
        })
    }
}
