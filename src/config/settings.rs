use crate::error::{BlockchainError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

static DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:2001";
static DEFAULT_DB_PATH: &str = "./data";

const NODE_ADDRESS_KEY: &str = "NODE_ADDRESS";
const NODE_DB_PATH_KEY: &str = "NODE_DB_PATH";
const NODE_DIFFICULTY_KEY: &str = "NODE_DIFFICULTY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Address the server binds to
    pub listen_address: String,
    /// Address announced to peers; empty means the bound address
    pub advertised_address: String,
    pub db_path: PathBuf,
    pub difficulty: u32,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Discovery stops dialing once this many peers are connected
    pub target_peers: usize,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            listen_address: DEFAULT_LISTEN_ADDR.to_string(),
            advertised_address: String::new(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            difficulty: 2,
            request_timeout_secs: 30,
            connect_timeout_secs: 5,
            target_peers: 10,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then the TOML file if given, then environment overrides
    pub fn load(path: Option<&Path>) -> Result<Settings> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Settings::default(),
        };
        settings.apply_env();
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Settings> {
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| {
            BlockchainError::Config(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    pub fn apply_env(&mut self) {
        if let Ok(addr) = env::var(NODE_ADDRESS_KEY) {
            self.listen_address = addr;
        }
        if let Ok(path) = env::var(NODE_DB_PATH_KEY) {
            self.db_path = PathBuf::from(path);
        }
        if let Ok(value) = env::var(NODE_DIFFICULTY_KEY) {
            match value.parse() {
                Ok(difficulty) => self.difficulty = difficulty,
                Err(_) => log::warn!("Ignoring {NODE_DIFFICULTY_KEY}={value}: not a number"),
            }
        }
    }

    /// The address to announce once the listener is bound at `bound`
    pub fn advertised(&self, bound: SocketAddr) -> String {
        if self.advertised_address.is_empty() {
            bound.to_string()
        } else {
            self.advertised_address.clone()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.listen_address, "127.0.0.1:2001");
        let bound: SocketAddr = "127.0.0.1:45000".parse().unwrap();
        assert_eq!(settings.advertised(bound), "127.0.0.1:45000");
        assert_eq!(settings.request_timeout(), Duration::from_secs(30));
        assert_eq!(settings.target_peers, 10);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "difficulty = 4\nadvertised_address = \"10.0.0.5:2001\"").unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.difficulty, 4);
        let bound: SocketAddr = "0.0.0.0:2001".parse().unwrap();
        assert_eq!(settings.advertised(bound), "10.0.0.5:2001");
        assert_eq!(settings.db_path, PathBuf::from("./data"));
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "difficulty = \"hard\"").unwrap();

        let err = Settings::from_file(file.path()).unwrap_err();
        assert!(matches!(err, BlockchainError::Config(_)));
    }
}
