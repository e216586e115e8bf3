//! The on-disk YAML configuration shape. Field groupings mirror
//! `original_source/src/config.h`'s `config_module_network_*`/
//! `config_database_*`/`config_log_*` structs; the module system itself
//! (`config_module_t`'s `type`/`module_id`) collapses away since this
//! build only ever speaks the one wire protocol `cachegrand-protocol`
//! implements.

use std::net::SocketAddr;
use std::path::PathBuf;

use serde::Deserialize;

use crate::duration::parse_duration_ms;
use crate::size::parse_size;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkConfig {
    pub bindings: Vec<SocketAddr>,
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,
    #[serde(default = "default_listen_backlog")]
    pub listen_backlog: u32,
    #[serde(default)]
    pub timeout: Option<NetworkTimeoutConfig>,
    #[serde(default)]
    pub keepalive: Option<NetworkKeepaliveConfig>,
}

fn default_max_clients() -> u32 {
    10_000
}

fn default_listen_backlog() -> u32 {
    1024
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkTimeoutConfig {
    pub read_ms: i32,
    pub write_ms: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetworkKeepaliveConfig {
    pub time: u32,
    pub interval: u32,
    pub probes: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: Option<String>,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtocolConfig {
    #[serde(default = "default_max_key_length")]
    pub max_key_length: usize,
    #[serde(default = "default_max_command_length_str")]
    pub max_command_length: String,
    #[serde(default = "default_max_command_arguments")]
    pub max_command_arguments: usize,
    #[serde(default)]
    pub require_authentication: bool,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    #[serde(default)]
    pub disabled_commands: Vec<String>,
}

fn default_max_key_length() -> usize {
    512
}

fn default_max_command_length_str() -> String {
    "64kb".to_owned()
}

fn default_max_command_arguments() -> usize {
    128
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_key_length: default_max_key_length(),
            max_command_length: default_max_command_length_str(),
            max_command_arguments: default_max_command_arguments(),
            require_authentication: false,
            auth: None,
            disabled_commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicyConfig {
    Lru,
    Lfu,
    Random,
    Ttl,
}

impl From<EvictionPolicyConfig> for cachegrand_storage::EvictionPolicy {
    fn from(value: EvictionPolicyConfig) -> Self {
        match value {
            EvictionPolicyConfig::Lru => cachegrand_storage::EvictionPolicy::Lru,
            EvictionPolicyConfig::Lfu => cachegrand_storage::EvictionPolicy::Lfu,
            EvictionPolicyConfig::Random => cachegrand_storage::EvictionPolicy::Random,
            EvictionPolicyConfig::Ttl => cachegrand_storage::EvictionPolicy::Ttl,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EvictionConfig {
    #[serde(default)]
    pub only_ttl: bool,
    #[serde(default = "default_eviction_policy")]
    pub policy: EvictionPolicyConfig,
    #[serde(default = "default_eviction_sample_size")]
    pub sample_size: usize,
    #[serde(default = "default_lfu_half_life_str")]
    pub lfu_half_life: String,
}

fn default_eviction_policy() -> EvictionPolicyConfig {
    EvictionPolicyConfig::Lru
}

fn default_eviction_sample_size() -> usize {
    5
}

fn default_lfu_half_life_str() -> String {
    "1h".to_owned()
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            only_ttl: false,
            policy: default_eviction_policy(),
            sample_size: default_eviction_sample_size(),
            lfu_half_life: default_lfu_half_life_str(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnforcedTtlConfig {
    #[serde(default)]
    pub default: Option<String>,
    #[serde(default)]
    pub max: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SnapshotConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default = "default_true")]
    pub snapshot_at_shutdown: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_user_databases")]
    pub max_user_databases: u32,
    #[serde(default = "default_max_keys_str")]
    pub max_keys: String,
    #[serde(default)]
    pub eviction: EvictionConfig,
    #[serde(default)]
    pub enforced_ttl: EnforcedTtlConfig,
    #[serde(default)]
    pub snapshot: Option<SnapshotConfig>,
}

fn default_max_user_databases() -> u32 {
    16
}

fn default_max_keys_str() -> String {
    "0".to_owned()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_user_databases: default_max_user_databases(),
            max_keys: default_max_keys_str(),
            eviction: EvictionConfig::default(),
            enforced_ttl: EnforcedTtlConfig { default: None, max: None },
            snapshot: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogType {
    Console,
    File,
    Syslog,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(rename = "type")]
    pub kind: LogType,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WorkersCount {
    Auto(AutoWorkers),
    Fixed(u32),
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AutoWorkers {
    Auto,
}

impl Default for WorkersCount {
    fn default() -> Self {
        WorkersCount::Auto(AutoWorkers::Auto)
    }
}

/// The full configuration tree, deserialized straight from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub cpus: Vec<String>,
    #[serde(default)]
    pub workers: WorkersCount,
    #[serde(default)]
    pub run_in_foreground: bool,
    #[serde(default)]
    pub pidfile_path: Option<PathBuf>,
    pub network: NetworkConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub logs: Vec<LogConfig>,
}

impl Config {
    pub fn from_yaml_str(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    pub fn from_file(path: &std::path::Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    /// Number of worker threads to start: explicit count, or one per CPU
    /// the process is allowed to run on (`cpus` list if given, otherwise
    /// every online CPU).
    pub fn worker_count(&self) -> usize {
        match &self.workers {
            WorkersCount::Fixed(n) => *n as usize,
            WorkersCount::Auto(_) => {
                if self.cpus.is_empty() {
                    num_cpus()
                } else {
                    self.cpus.len()
                }
            }
        }
    }

    pub fn dispatcher_config(&self) -> cachegrand_dispatcher::DispatcherConfig {
        cachegrand_dispatcher::DispatcherConfig {
            max_key_length: self.protocol.max_key_length,
            max_command_length: parse_size(&self.protocol.max_command_length).unwrap_or(64 * 1024) as usize,
            max_command_arguments: self.protocol.max_command_arguments,
            require_authentication: self.protocol.require_authentication,
            password: self.protocol.auth.as_ref().map(|auth| auth.password.clone()),
            disabled_commands: self.protocol.disabled_commands.clone(),
        }
    }

    pub fn storage_db_config(&self) -> cachegrand_storage::StorageDbConfig {
        let mut config = cachegrand_storage::StorageDbConfig::default();
        config.max_user_databases = self.database.max_user_databases;
        // "0" (the default) means "unlimited/unset": leave the storage
        // crate's own default key cap in place rather than zeroing it.
        if let Ok(max_keys) = parse_size(&self.database.max_keys) {
            if max_keys > 0 {
                config.max_keys = max_keys as usize;
            }
        }
        config.eviction_policy = self.database.eviction.policy.into();
        config.eviction_sample_size = self.database.eviction.sample_size;
        config.lfu_half_life_ms = parse_duration_ms(&self.database.eviction.lfu_half_life).unwrap_or(3_600_000);
        config.enforced_ttl = cachegrand_storage::EnforcedTtl {
            default_ms: self.database.enforced_ttl.default.as_deref().and_then(|s| parse_duration_ms(s).ok()),
            max_ms: self.database.enforced_ttl.max.as_deref().and_then(|s| parse_duration_ms(s).ok()),
        };
        config
    }

    pub fn snapshot_schedule(&self) -> cachegrand_worker::SnapshotSchedule {
        let mut schedule = cachegrand_worker::SnapshotSchedule::default();
        if let Some(snapshot) = &self.database.snapshot {
            schedule.path = Some(snapshot.path.clone());
            schedule.interval_ms = snapshot.interval.as_deref().and_then(|s| parse_duration_ms(s).ok());
            schedule.snapshot_at_shutdown = snapshot.snapshot_at_shutdown;
        }
        schedule
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let yaml = r#"
network:
  bindings:
    - "127.0.0.1:6379"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.network.bindings.len(), 1);
        assert_eq!(config.network.max_clients, 10_000);
        assert_eq!(config.database.max_user_databases, 16);
        assert!(matches!(config.workers, WorkersCount::Auto(_)));
    }

    #[test]
    fn parses_a_full_config_with_auth_and_eviction() {
        let yaml = r#"
cpus: ["0", "1"]
workers: 2
pidfile_path: /var/run/cachegrand.pid
network:
  bindings:
    - "0.0.0.0:6379"
  max_clients: 500
protocol:
  require_authentication: true
  auth:
    password: "hunter2"
  disabled_commands: ["FLUSHALL"]
database:
  max_user_databases: 4
  max_keys: "1000000"
  eviction:
    policy: lfu
    sample_size: 8
  enforced_ttl:
    default: "30s"
  snapshot:
    path: /var/lib/cachegrand/snapshot.bin
    interval: "5m"
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.worker_count(), 2);
        let dispatcher_config = config.dispatcher_config();
        assert!(dispatcher_config.require_authentication);
        assert_eq!(dispatcher_config.password.as_deref(), Some("hunter2"));
        let storage_config = config.storage_db_config();
        assert_eq!(storage_config.max_user_databases, 4);
        assert_eq!(storage_config.max_keys, 1_000_000);
        let schedule = config.snapshot_schedule();
        assert_eq!(schedule.interval_ms, Some(300_000));
    }

    #[test]
    fn rejects_unknown_fields() {
        let yaml = r#"
network:
  bindings: ["127.0.0.1:6379"]
bogus_field: true
"#;
        assert!(Config::from_yaml_str(yaml).is_err());
    }
}
