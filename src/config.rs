use crate::error::{ServerError, ServerResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Image served in place of a missing `/favicon.ico`
pub const DEFAULT_FAVICON_FALLBACK: &str = "https://higgy.s3.amazonaws.com/images/v_italic.jpg";

/// Which strategy the launcher binary runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServeMode {
    Static,
    Proxy,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    // Network configuration
    pub listen_address: String,
    pub port: u16,

    // Thread configuration; 0 handles connections one at a time on the accept thread
    pub worker_threads: usize,
    pub queue_depth: usize,

    // Connection settings
    pub read_timeout: Option<Duration>,
    pub max_header_size: usize,

    // Logging of per-request lines
    pub logging: bool,

    // Error pages
    pub default_error_template: PathBuf,
    pub favicon_fallback: String,

    // Static file resolution
    pub static_root: PathBuf,
    pub parent_directories: usize,
    pub anchor: String,

    pub mode: ServeMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1".to_string(),
            port: 8080,

            worker_threads: 0,
            queue_depth: 64,

            read_timeout: None,
            max_header_size: 16 * 1024, // 16 KB

            logging: true,

            default_error_template: PathBuf::from("templates/default_error.html"),
            favicon_fallback: DEFAULT_FAVICON_FALLBACK.to_string(),

            static_root: PathBuf::from("."),
            parent_directories: 0,
            anchor: "index.html".to_string(),

            mode: ServeMode::Static,
        }
    }
}

impl ServerConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the address and port to listen on
    pub fn with_address(mut self, address: &str, port: u16) -> Self {
        self.listen_address = address.to_string();
        self.port = port;
        self
    }

    /// Set the number of worker threads (0 keeps the sequential loop)
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Use one worker thread per CPU core
    pub fn with_cpu_workers(self) -> Self {
        self.with_worker_threads(num_cpus::get())
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_logging(mut self, logging: bool) -> Self {
        self.logging = logging;
        self
    }

    /// Set the on-disk page used when error-page synthesis fails
    pub fn with_default_error_template<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.default_error_template = path.into();
        self
    }

    /// Set the directory the static resolver reads from
    pub fn with_static_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.static_root = root.into();
        self
    }

    pub fn with_mode(mut self, mode: ServeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Get the full address string (address:port)
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.listen_address, self.port)
    }

    /// Check values that would otherwise fail later at bind or dispatch time
    pub fn validate(&self) -> ServerResult<()> {
        if self.listen_address.is_empty() {
            return Err(ServerError::Config("listen_address must not be empty".to_string()));
        }
        if self.anchor.is_empty() || self.anchor.starts_with('/') {
            return Err(ServerError::Config(format!(
                "anchor must be a relative file name, got {:?}",
                self.anchor
            )));
        }
        if self.worker_threads > 0 && self.queue_depth == 0 {
            return Err(ServerError::Config("queue_depth must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> ServerResult<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_json_file<P: AsRef<Path>>(&self, path: P) -> ServerResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"port": 9000, "mode": "proxy"}"#).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.mode, ServeMode::Proxy);
        assert_eq!(config.listen_address, "127.0.0.1");
        assert_eq!(config.anchor, "index.html");
        assert_eq!(config.worker_threads, 0);
        assert!(config.read_timeout.is_none());
    }

    #[test]
    fn test_json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.json");

        let config = ServerConfig::new()
            .with_address("0.0.0.0", 3000)
            .with_worker_threads(4)
            .with_static_root("public");
        config.save_to_json_file(&path).unwrap();

        let loaded = ServerConfig::from_json_file(&path).unwrap();
        assert_eq!(loaded.socket_address(), "0.0.0.0:3000");
        assert_eq!(loaded.worker_threads, 4);
        assert_eq!(loaded.static_root, PathBuf::from("public"));
    }

    #[test]
    fn test_validate_rejects_absolute_anchor() {
        let mut config = ServerConfig::new();
        config.anchor = "/index.html".to_string();
        assert!(matches!(config.validate(), Err(ServerError::Config(_))));
    }
}
