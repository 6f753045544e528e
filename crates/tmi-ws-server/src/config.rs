use std::path::PathBuf;

use env_flags::env_flags;

env_flags! {
    /// Address the HTTP/WebSocket listener binds to.
    pub TMI_BIND_ADDR: &str = "0.0.0.0";
    /// Port the HTTP/WebSocket listener binds to.
    pub TMI_PORT: u16 = 8080;
    /// Optional path to a `tmi-collab` `config.toml`; defaults are used if unset.
    pub TMI_CONFIG_PATH: Option<&str> = None;
}

/// Binary-level configuration: where to listen, and where to find the
/// `tmi_collab::Config` that governs everything else. Mirrors the
/// reference stack's split between a `Config`/`config.toml` for durable
/// settings and `env_flags`-declared knobs for what an operator tweaks per
/// deployment without rebuilding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub collab_config_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: TMI_BIND_ADDR.to_string(),
            port: *TMI_PORT,
            collab_config_path: TMI_CONFIG_PATH.map(PathBuf::from),
        }
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn load_collab_config(&self) -> anyhow::Result<tmi_collab::Config> {
        match &self.collab_config_path {
            Some(path) => tmi_collab::Config::load_from_file(path)
                .map_err(|e| anyhow::anyhow!("loading collab config from {}: {e}", path.display())),
            None => Ok(tmi_collab::Config::from_defaults()),
        }
    }
}
