//! Agent configuration

use failover_lib::{
    heartbeat::heartbeat_url, ContainerSpec, ControllerConfig, FailoverError, HeartbeatConfig,
    MonitorConfig, NodeName, Result,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix, e.g. `FAILOVER__HEARTBEAT_TIMEOUT=20`
const ENV_PREFIX: &str = "FAILOVER";
const ENV_SEPARATOR: &str = "__";

/// Agent configuration as read from file and environment. All durations
/// are whole seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Containers this node manages, identical on both peers
    #[serde(default = "default_containers")]
    pub containers: Vec<String>,

    /// Base URL of the peer agent
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Port the heartbeat receiver and operator API listen on
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,

    #[serde(default = "default_check_heartbeat_interval")]
    pub check_heartbeat_interval: u64,

    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout: u64,

    #[serde(default = "default_startup_grace_period")]
    pub startup_grace_period: u64,

    #[serde(default = "default_restart_grace_period")]
    pub restart_grace_period: u64,

    #[serde(default = "default_health_poll_interval")]
    pub health_poll_interval: u64,

    #[serde(default = "default_runtime_call_timeout")]
    pub runtime_call_timeout: u64,

    #[serde(default = "default_heartbeat_send_timeout")]
    pub heartbeat_send_timeout: u64,

    /// 0 disables reconciliation
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval: u64,

    /// Defaults to twice the heartbeat timeout
    #[serde(default)]
    pub demotion_holddown: Option<u64>,
}

fn default_containers() -> Vec<String> {
    vec!["container-1".to_string(), "container-2".to_string()]
}

fn default_endpoint() -> String {
    "http://localhost:8000".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_check_heartbeat_interval() -> u64 {
    5
}

fn default_heartbeat_timeout() -> u64 {
    20
}

fn default_startup_grace_period() -> u64 {
    20
}

fn default_restart_grace_period() -> u64 {
    30
}

fn default_health_poll_interval() -> u64 {
    5
}

fn default_runtime_call_timeout() -> u64 {
    10
}

fn default_heartbeat_send_timeout() -> u64 {
    3
}

fn default_reconcile_interval() -> u64 {
    30
}

/// Configuration checked and split into per-component settings
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub node: NodeName,
    pub port: u16,
    pub containers: Vec<ContainerSpec>,
    pub monitor: MonitorConfig,
    pub heartbeat: HeartbeatConfig,
    pub controller: ControllerConfig,
}

impl AgentConfig {
    /// Load configuration from an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, config::Environment::default())
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::new(
                &path.to_string_lossy(),
                config::FileFormat::Toml,
            ));
        }

        let env = env
            .prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .list_separator(",")
            .with_list_parse_key("containers")
            .try_parsing(true);

        builder
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| FailoverError::ConfigInvalid(e.to_string()))
    }

    /// Check the configuration for `node` and derive component settings
    pub fn validate(&self, node: NodeName) -> Result<ValidatedConfig> {
        if self.containers.is_empty() {
            return Err(invalid("containers must not be empty"));
        }

        let mut seen = HashSet::new();
        for name in &self.containers {
            if name.trim().is_empty() {
                return Err(invalid("container names must not be blank"));
            }
            if !seen.insert(name.as_str()) {
                return Err(invalid(format!("duplicate container name: {}", name)));
            }
        }

        for (key, value) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("check_heartbeat_interval", self.check_heartbeat_interval),
            ("heartbeat_timeout", self.heartbeat_timeout),
            ("health_poll_interval", self.health_poll_interval),
            ("runtime_call_timeout", self.runtime_call_timeout),
            ("heartbeat_send_timeout", self.heartbeat_send_timeout),
        ] {
            if value == 0 {
                return Err(invalid(format!("{} must be greater than zero", key)));
            }
        }

        heartbeat_url(&self.endpoint)?;

        if self.check_heartbeat_interval >= self.heartbeat_timeout {
            return Err(invalid(format!(
                "check_heartbeat_interval ({}s) must be shorter than heartbeat_timeout ({}s)",
                self.check_heartbeat_interval, self.heartbeat_timeout
            )));
        }
        if self.heartbeat_interval >= self.heartbeat_timeout {
            return Err(invalid(format!(
                "heartbeat_interval ({}s) must be shorter than heartbeat_timeout ({}s)",
                self.heartbeat_interval, self.heartbeat_timeout
            )));
        }

        let demotion_holddown = self
            .demotion_holddown
            .unwrap_or(self.heartbeat_timeout.saturating_mul(2));
        if demotion_holddown < self.heartbeat_timeout {
            return Err(invalid(format!(
                "demotion_holddown ({}s) must be at least heartbeat_timeout ({}s)",
                demotion_holddown, self.heartbeat_timeout
            )));
        }

        let call_timeout = secs(self.runtime_call_timeout);
        let startup_grace_period = secs(self.startup_grace_period);

        Ok(ValidatedConfig {
            node,
            port: self.port,
            containers: self.containers.iter().map(ContainerSpec::new).collect(),
            monitor: MonitorConfig {
                poll_interval: secs(self.health_poll_interval),
                restart_grace_period: secs(self.restart_grace_period),
                startup_grace_period,
                call_timeout,
            },
            heartbeat: HeartbeatConfig {
                endpoint: self.endpoint.clone(),
                interval: secs(self.heartbeat_interval),
                timeout: secs(self.heartbeat_timeout),
                send_timeout: secs(self.heartbeat_send_timeout),
            },
            controller: ControllerConfig {
                node,
                check_interval: secs(self.check_heartbeat_interval),
                startup_grace_period,
                reconcile_interval: (self.reconcile_interval > 0)
                    .then(|| secs(self.reconcile_interval)),
                demotion_holddown: secs(demotion_holddown),
                call_timeout,
            },
        })
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value)
}

fn invalid(message: impl Into<String>) -> FailoverError {
    FailoverError::ConfigInvalid(message.into())
}
