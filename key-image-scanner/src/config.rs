//! Configuration for the key image scanner.

use crate::rpc::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Scanner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Base URL of the daemon RPC interface
    #[serde(default = "default_daemon_url")]
    pub daemon_url: String,

    /// Directory holding the key image index
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Number of transactions fetched per request
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Number of block headers fetched per request
    #[serde(default = "default_header_batch_size")]
    pub header_batch_size: u64,

    /// Number of blocks below the chain tip that are left unscanned
    #[serde(default = "default_reorg_margin")]
    pub reorg_margin: u64,

    /// Timeout of a single RPC request in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Retries of a request failing with a transient error
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// First backoff delay between retries in milliseconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Polling interval in seconds when following the chain
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

fn default_daemon_url() -> String {
    "http://localhost:17402".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./key_images.db")
}

fn default_chunk_size() -> usize {
    500
}

fn default_header_batch_size() -> u64 {
    1000
}

fn default_reorg_margin() -> u64 {
    1
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_retries() -> usize {
    5
}

fn default_retry_base_delay() -> u64 {
    100
}

fn default_poll_interval() -> u64 {
    10
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            daemon_url: default_daemon_url(),
            db_path: default_db_path(),
            chunk_size: default_chunk_size(),
            header_batch_size: default_header_batch_size(),
            reorg_margin: default_reorg_margin(),
            request_timeout_secs: default_request_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            poll_interval_secs: default_poll_interval(),
        }
    }
}

impl ScannerConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ScannerConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.daemon_url.trim().is_empty() {
            anyhow::bail!("daemon_url must not be empty");
        }
        let url = url::Url::parse(&self.daemon_url)
            .map_err(|e| anyhow::anyhow!("daemon_url is not a valid URL: {}", e))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("daemon_url must use http or https, got {}", url.scheme());
        }

        if self.chunk_size == 0 {
            anyhow::bail!("chunk_size must be greater than 0");
        }
        if self.header_batch_size == 0 {
            anyhow::bail!("header_batch_size must be greater than 0");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }

        if self.reorg_margin == 0 {
            tracing::warn!("reorg_margin = 0 scans up to the chain tip, which may still change");
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.retry_base_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = ScannerConfig::default();
        assert_eq!(config.daemon_url, "http://localhost:17402");
        assert_eq!(config.db_path, PathBuf::from("./key_images.db"));
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.header_batch_size, 1000);
        assert_eq!(config.reorg_margin, 1);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_secs(10));
        assert_eq!(
            config.retry_policy(),
            RetryPolicy::new(5, Duration::from_millis(100))
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_sizes() {
        let config = ScannerConfig {
            chunk_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ScannerConfig {
            header_batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = ScannerConfig {
            request_timeout_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_daemon_url() {
        for daemon_url in ["", "   ", "localhost:17402", "ftp://localhost:17402"] {
            let config = ScannerConfig {
                daemon_url: daemon_url.to_string(),
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{daemon_url:?}");
        }

        let config = ScannerConfig {
            daemon_url: "https://node.example.com:443/rpc".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
daemon_url = "http://10.0.0.2:17402"
chunk_size = 50
reorg_margin = 3
"#
        )
        .unwrap();

        let config = ScannerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.daemon_url, "http://10.0.0.2:17402");
        assert_eq!(config.chunk_size, 50);
        assert_eq!(config.reorg_margin, 3);
        assert_eq!(config.header_batch_size, 1000);
        assert_eq!(config.max_retries, 5);
    }

    #[test]
    fn test_from_file_rejects_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "chunk_size = 0").unwrap();
        assert!(ScannerConfig::from_file(file.path()).is_err());

        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "chunk_size = \"many\"").unwrap();
        assert!(ScannerConfig::from_file(file.path()).is_err());
    }
}
