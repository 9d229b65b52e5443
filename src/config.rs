use std::path::PathBuf;

use clap::Parser;
use serde::Deserialize;

#[derive(Parser)]
#[command(name = "arena", version = "1.0", about, long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file
    #[arg(long = "config", short = 'c')]
    pub config_path: String,

    /// Whether to flush the persisted instance state
    #[arg(long = "flush-data", short = 'f', default_value_t = false)]
    pub flush_data: bool,
}

impl CliArgs {
    /// Load the configuration from the specified file
    pub fn to_config(&self) -> std::io::Result<Config> {
        let file = std::fs::File::open(&self.config_path)?;
        let reader = std::io::BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| e.into())
    }
}

#[derive(Deserialize, Debug)]
pub struct Config {
    pub server: ServerConfig,
    /// Path to the challenge catalog (challenges.json)
    pub catalog_path: PathBuf,
    /// Directory for the persisted state documents; defaults to the
    /// per-user data dir when absent
    pub data_dir: Option<PathBuf>,
    #[serde(default)]
    pub limits: LimitsConfig,
}

#[derive(Deserialize, Debug)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub bind_port: Option<u16>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct LimitsConfig {
    /// Per-user concurrent-instance limit used until an admin changes it
    #[serde(default = "default_user_instance_limit")]
    pub default_user_instance_limit: u64,
    /// Hard ceiling an admin cannot raise the limit above
    #[serde(default = "default_max_user_instance_limit")]
    pub max_user_instance_limit: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_user_instance_limit: default_user_instance_limit(),
            max_user_instance_limit: default_max_user_instance_limit(),
        }
    }
}

fn default_user_instance_limit() -> u64 {
    2
}

fn default_max_user_instance_limit() -> u64 {
    50
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_deserialization() {
        let config: Config = serde_json::from_str(
            r#"{
                "server": {"bind_address": "127.0.0.1", "bind_port": 8080},
                "catalog_path": "challenges.json",
                "limits": {"default_user_instance_limit": 3}
            }"#,
        )
        .unwrap();
        assert_eq!(config.server.bind_address, Some("127.0.0.1".to_string()));
        assert_eq!(config.limits.default_user_instance_limit, 3);
        assert_eq!(config.limits.max_user_instance_limit, 50);
        assert!(config.data_dir.is_none());
    }

    #[test]
    fn limits_default_when_absent() {
        let config: Config = serde_json::from_str(
            r#"{"server": {}, "catalog_path": "challenges.json"}"#,
        )
        .unwrap();
        assert_eq!(config.limits.default_user_instance_limit, 2);
        assert_eq!(config.limits.max_user_instance_limit, 50);
    }
}
