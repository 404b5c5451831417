use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Identity of this control-plane server; the last segment of every
    /// host update topic.
    pub server_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topology_file: Option<PathBuf>,
    /// Capacity of the outbound publish queue.
    pub publish_buffer: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_id: "wgmesh".into(),
            topology_file: None,
            publish_buffer: 128,
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("wgmesh.toml"))
                .merge(Json::file("wgmesh.json"))
                .merge(Env::prefixed("WGMESH_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(id_file) = std::env::var("WGMESH_SERVER_ID_FILE") {
            config.server_id = std::fs::read_to_string(id_file)?.trim().to_string();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.server_id.is_empty() || self.server_id.contains('/') {
            anyhow::bail!("Invalid server_id {:?}: must be a single topic segment", self.server_id);
        }
        if self.publish_buffer == 0 {
            anyhow::bail!("publish_buffer must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_apply_without_sources() {
        Jail::expect_with(|_jail| {
            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config, Config::default());
            Ok(())
        });
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "wgmesh.toml",
                r#"
                server_id = "from-file"
                topology_file = "/etc/wgmesh/topology.json"
                "#,
            )?;
            jail.set_env("WGMESH_SERVER_ID", "from-env");
            jail.set_env("WGMESH_PUBLISH_BUFFER", "16");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.server_id, "from-env");
            assert_eq!(config.publish_buffer, 16);
            assert_eq!(
                config.topology_file,
                Some(PathBuf::from("/etc/wgmesh/topology.json"))
            );
            Ok(())
        });
    }

    #[test]
    fn server_id_file_wins() {
        Jail::expect_with(|jail| {
            jail.create_file("server-id", "mesh-eu-1\n")?;
            jail.set_env("WGMESH_SERVER_ID_FILE", "server-id");

            let config = Config::load().map_err(|e| e.to_string())?;
            assert_eq!(config.server_id, "mesh-eu-1");
            Ok(())
        });
    }

    #[test]
    fn rejects_topic_breaking_server_id() {
        Jail::expect_with(|jail| {
            jail.set_env("WGMESH_SERVER_ID", "a/b");
            assert!(Config::load().is_err());
            Ok(())
        });
    }
}
