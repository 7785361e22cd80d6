use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use common::peer::{BootstrapPolicy, PeerAddr};
use common::store::StoreOptions;
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "crabfs";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STORE_DIR_NAME: &str = "store";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Store root (defaults to ~/.crabfs/store)
    pub root: Option<PathBuf>,
    /// Peers to join through, as `<node id>[@ip:port,...]`
    pub bootstrap_peers: Vec<String>,
    pub bootstrap_policy: BootstrapPolicy,
    /// Listen port for the peer node (ephemeral if unset)
    pub peer_port: Option<u16>,
    pub chunk_size: usize,
    pub request_timeout_secs: u64,
    pub dht_discovery: bool,
    /// Default log level; `RUST_LOG` overrides it
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            root: None,
            bootstrap_peers: Vec::new(),
            bootstrap_policy: BootstrapPolicy::default(),
            peer_port: None,
            chunk_size: common::content::DEFAULT_CHUNK_SIZE,
            request_timeout_secs: 10,
            dht_discovery: false,
            log_level: "warn".to_string(),
        }
    }
}

impl AppConfig {
    pub fn peers(&self) -> Result<Vec<PeerAddr>, StateError> {
        self.bootstrap_peers
            .iter()
            .map(|s| {
                s.parse::<PeerAddr>()
                    .map_err(|e| StateError::InvalidPeer(s.clone(), e.to_string()))
            })
            .collect()
    }

    pub fn log_level(&self) -> tracing::Level {
        self.log_level.parse().unwrap_or(tracing::Level::WARN)
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the crabfs directory (~/.crabfs)
    pub crabfs_dir: PathBuf,
    pub config_path: PathBuf,
    pub config: AppConfig,
}

impl AppState {
    /// Get the crabfs directory path (custom or default ~/.crabfs)
    pub fn crabfs_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }
        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Load the config; a missing file means defaults
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let crabfs_dir = Self::crabfs_dir(custom_path)?;
        let config_path = crabfs_dir.join(CONFIG_FILE_NAME);

        let config = match fs::read_to_string(&config_path) {
            Ok(toml) => toml::from_str(&toml)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppConfig::default(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            crabfs_dir,
            config_path,
            config,
        })
    }

    pub fn store_root(&self, custom_root: Option<PathBuf>) -> PathBuf {
        custom_root
            .or_else(|| self.config.root.clone())
            .unwrap_or_else(|| self.crabfs_dir.join(STORE_DIR_NAME))
    }

    /// Store options from the config, rooted at `custom_root` if given
    pub fn store_options(&self, custom_root: Option<PathBuf>) -> Result<StoreOptions, StateError> {
        let config = &self.config;
        let mut options = StoreOptions::new(self.store_root(custom_root))
            .bootstrap_peers(config.peers()?)
            .bootstrap_policy(config.bootstrap_policy)
            .chunk_size(config.chunk_size)
            .request_timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .dht_discovery(config.dht_discovery);
        if let Some(port) = config.peer_port {
            options = options.listen_addr(([0, 0, 0, 0], port).into());
        }
        options.validate().map_err(StateError::InvalidConfig)?;
        Ok(options)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("invalid bootstrap peer {0}: {1}")]
    InvalidPeer(String, String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::crypto::SecretKey;

    #[test]
    fn test_missing_config_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::load(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(state.config, AppConfig::default());
        assert_eq!(state.store_root(None), dir.path().join(STORE_DIR_NAME));
    }

    #[test]
    fn test_load_config() {
        let dir = tempfile::tempdir().unwrap();
        let peer = SecretKey::generate().unwrap().public();
        fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            format!(
                "root = \"/data/crabfs\"\n\
                 bootstrap_peers = [\"{}@127.0.0.1:1717\"]\n\
                 bootstrap_policy = \"all\"\n\
                 chunk_size = 65536\n",
                peer.to_hex()
            ),
        )
        .unwrap();

        let state = AppState::load(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(state.config.bootstrap_policy, BootstrapPolicy::All);
        assert_eq!(state.config.log_level, "warn");

        let options = state.store_options(None).unwrap();
        assert_eq!(options.root, PathBuf::from("/data/crabfs"));
        assert_eq!(options.chunk_size, 65536);
        assert_eq!(options.bootstrap_peers.len(), 1);
        assert_eq!(options.bootstrap_peers[0].id, peer);

        let options = state.store_options(Some("/elsewhere".into())).unwrap();
        assert_eq!(options.root, PathBuf::from("/elsewhere"));
    }

    #[test]
    fn test_quorum_policy_table() {
        let config: AppConfig = toml::from_str("bootstrap_policy = { quorum = 2 }").unwrap();
        assert_eq!(config.bootstrap_policy, BootstrapPolicy::Quorum(2));
    }

    #[test]
    fn test_invalid_peer_rejected() {
        let config = AppConfig {
            bootstrap_peers: vec!["not-a-peer".to_string()],
            ..Default::default()
        };
        assert!(matches!(config.peers(), Err(StateError::InvalidPeer(..))));
    }
}
