use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use terraplan_engine::EditorConfig;
use terraplan_protocol::GridConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub db_path: PathBuf,
    /// Undo depth per editing session; 0 keeps everything.
    pub history_limit: usize,
    /// Grid settings for newly created maps.
    pub grid: GridConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 39333),
            db_path: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".terraplan")
                .join("terraplan.db"),
            history_limit: EditorConfig::default().history_limit,
            grid: GridConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config: {}", path.display()))?;
        serde_yaml::from_str(&raw).with_context(|| format!("parse config: {}", path.display()))
    }

    pub fn editor(&self) -> EditorConfig {
        EditorConfig {
            history_limit: self.history_limit,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "terraplan-server", about = "Local API for the Terraplan map designer")]
pub struct Cli {
    /// Address to listen on.
    #[arg(long)]
    pub addr: Option<SocketAddr>,
    /// SQLite database path.
    #[arg(long)]
    pub db: Option<PathBuf>,
    /// YAML config file; flags override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub fn resolve(self) -> anyhow::Result<ServerConfig> {
        let mut cfg = match &self.config {
            Some(path) => ServerConfig::from_yaml_file(path)?,
            None => ServerConfig::default(),
        };
        if let Some(addr) = self.addr {
            cfg.addr = addr;
        }
        if let Some(db) = self.db {
            cfg.db_path = db;
        }
        Ok(cfg)
    }
}
