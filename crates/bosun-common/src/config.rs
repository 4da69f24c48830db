use std::collections::HashMap;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

/// Application configuration, merged from defaults, an optional YAML file,
/// and `BOSUN_*` environment variables (e.g. `BOSUN_SERVER__LISTEN_PORT`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The address that the gRPC server binds to.
    pub listen_host: String,
    /// The port that the gRPC server listens on.
    pub listen_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: "127.0.0.1".to_string(),
            listen_port: 50051,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// The default request timeout in seconds, applied when a request
    /// does not carry its own timeout.
    pub request_timeout_secs: u64,
    /// The directory where restore files are stored.
    pub restore_dir: Option<PathBuf>,
    /// The restore id. Session restore is disabled when unset.
    pub restore_id: Option<String>,
    /// The directory where per-partition history files are stored.
    /// History is disabled when unset.
    pub history_dir: Option<PathBuf>,
    /// Resource plugin commands by plugin name.
    pub resource_plugins: HashMap<String, String>,
    /// Request trigger commands by request name.
    pub request_triggers: HashMap<String, String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            restore_dir: None,
            restore_id: None,
            history_dir: None,
            resource_plugins: HashMap::new(),
            request_triggers: HashMap::new(),
        }
    }
}

impl AppConfig {
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment.merge(Env::prefixed("BOSUN_").split("__")).extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::load(None).unwrap();
        assert_eq!(config.server.listen_port, 50051);
        assert_eq!(config.controller.request_timeout_secs, 30);
        assert!(config.controller.restore_id.is_none());
        assert!(config.controller.resource_plugins.is_empty());
    }

    #[test]
    fn test_file_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "bosun.yaml",
                r#"
                server:
                  listen_port: 7070
                controller:
                  request_timeout_secs: 10
                  resource_plugins:
                    slurm: /opt/bosun/plugins/slurm
                "#,
            )?;
            jail.set_env("BOSUN_SERVER__LISTEN_HOST", "0.0.0.0");
            let config = AppConfig::load(Some(Path::new("bosun.yaml"))).unwrap();
            assert_eq!(config.server.listen_host, "0.0.0.0");
            assert_eq!(config.server.listen_port, 7070);
            assert_eq!(config.controller.request_timeout_secs, 10);
            assert_eq!(
                config.controller.resource_plugins.get("slurm").unwrap(),
                "/opt/bosun/plugins/slurm"
            );
            Ok(())
        });
    }
}
