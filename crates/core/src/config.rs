//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Ingestion server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Largest accepted request body (compressed) in bytes.
    #[serde(default = "default_max_compressed_size")]
    pub max_compressed_size: u64,
    /// Hard cap on decompressed payload size in bytes.
    #[serde(default = "default_max_decompressed_size")]
    pub max_decompressed_size: u64,
    /// Age in seconds after which a pending upload no longer blocks a
    /// resubmission of the same encounter.
    #[serde(default = "default_staleness_threshold_secs")]
    pub staleness_threshold_secs: u64,
    /// Number of background summarization workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Capacity of the queue between admission and the workers.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Interval in seconds between sweeps of stale pending entries.
    #[serde(default = "default_pending_sweep_interval_secs")]
    pub pending_sweep_interval_secs: u64,
    /// Request header carrying the authenticated uploader id.
    /// Must be set by a trusted front proxy.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_compressed_size() -> u64 {
    crate::DEFAULT_MAX_COMPRESSED_SIZE
}

fn default_max_decompressed_size() -> u64 {
    crate::DEFAULT_MAX_DECOMPRESSED_SIZE
}

fn default_staleness_threshold_secs() -> u64 {
    crate::DEFAULT_STALENESS_SECS
}

fn default_worker_count() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    256
}

fn default_pending_sweep_interval_secs() -> u64 {
    60
}

fn default_identity_header() -> String {
    "x-owner-id".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_compressed_size: default_max_compressed_size(),
            max_decompressed_size: default_max_decompressed_size(),
            staleness_threshold_secs: default_staleness_threshold_secs(),
            worker_count: default_worker_count(),
            queue_capacity: default_queue_capacity(),
            pending_sweep_interval_secs: default_pending_sweep_interval_secs(),
            identity_header: default_identity_header(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Get the staleness threshold as a Duration.
    pub fn staleness_threshold(&self) -> Duration {
        // Saturate at i64::MAX to prevent overflow wrapping to negative
        let secs = i64::try_from(self.staleness_threshold_secs).unwrap_or(i64::MAX);
        Duration::seconds(secs)
    }

    /// Get the pending sweep interval as a std::time::Duration.
    pub fn pending_sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.pending_sweep_interval_secs)
    }

    /// Validate server configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_compressed_size == 0 {
            return Err("server.max_compressed_size must be greater than 0".to_string());
        }
        if usize::try_from(self.max_compressed_size).is_err() {
            return Err(format!(
                "server.max_compressed_size {} does not fit in memory on this platform",
                self.max_compressed_size
            ));
        }
        if self.max_decompressed_size == 0 {
            return Err("server.max_decompressed_size must be greater than 0".to_string());
        }
        if self.staleness_threshold_secs == 0 {
            return Err("server.staleness_threshold_secs must be greater than 0".to_string());
        }
        if self.worker_count == 0 {
            return Err("server.worker_count must be at least 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("server.queue_capacity must be at least 1".to_string());
        }
        // tokio::time::interval panics on a zero period
        if self.pending_sweep_interval_secs == 0 {
            return Err("server.pending_sweep_interval_secs cannot be 0".to_string());
        }
        if header_name_invalid(&self.identity_header) {
            return Err(format!(
                "server.identity_header {:?} is not a valid header name",
                self.identity_header
            ));
        }
        Ok(())
    }
}

fn header_name_invalid(name: &str) -> bool {
    name.is_empty()
        || !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database.
    Sqlite {
        /// Database file path.
        path: PathBuf,
    },
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/summaries.db"),
        }
    }
}

/// Per-uploader admission quota.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Enable the quota. When disabled every authenticated uploader is admitted.
    #[serde(default)]
    pub enabled: bool,
    /// Sustained uploads per minute per uploader.
    #[serde(default = "default_uploads_per_minute")]
    pub uploads_per_minute: u32,
    /// Burst size (allows temporary burst above the sustained rate).
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
    /// Interval in seconds between cleanup sweeps of idle uploaders (default: 60).
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_uploads_per_minute() -> u32 {
    30
}

fn default_burst_size() -> u32 {
    10
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            uploads_per_minute: default_uploads_per_minute(),
            burst_size: default_burst_size(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl AdmissionConfig {
    /// Validate quota settings.
    /// Returns warnings for settings that are allowed but questionable,
    /// and an error for settings that cannot work.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        let mut warnings = Vec::new();

        if !self.enabled {
            return Ok(warnings);
        }

        if self.uploads_per_minute == 0 {
            return Err("admission.uploads_per_minute must be greater than 0".to_string());
        }

        if self.cleanup_interval_secs == 0 {
            return Err("admission.cleanup_interval_secs cannot be 0. \
                 Use a value >= 1 second."
                .to_string());
        }

        if self.burst_size == 0 {
            warnings.push(
                "admission.burst_size=0 is treated as 1; uploaders cannot burst at all"
                    .to_string(),
            );
        }

        Ok(warnings)
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Metadata store configuration.
    #[serde(default)]
    pub metadata: MetadataConfig,
    /// Admission quota configuration.
    #[serde(default)]
    pub admission: AdmissionConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Callers normally point `metadata` at a
    /// temporary SQLite file.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig {
                worker_count: 2,
                queue_capacity: 16,
                ..ServerConfig::default()
            },
            metadata: MetadataConfig::default(),
            admission: AdmissionConfig::default(),
        }
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<Vec<String>, String> {
        self.server.validate()?;
        self.admission.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert!(config.metrics_enabled);
        assert_eq!(config.staleness_threshold(), Duration::minutes(10));
        assert_eq!(config.identity_header, "x-owner-id");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_config_deserialize_partial() {
        let json = r#"{"bind": "0.0.0.0:9000", "staleness_threshold_secs": 30}"#;
        let config: ServerConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.bind, "0.0.0.0:9000");
        assert_eq!(config.staleness_threshold(), Duration::seconds(30));
        assert_eq!(config.max_decompressed_size, crate::DEFAULT_MAX_DECOMPRESSED_SIZE);
    }

    #[test]
    fn test_staleness_threshold_saturates() {
        let config = ServerConfig {
            staleness_threshold_secs: u64::MAX,
            ..ServerConfig::default()
        };
        assert_eq!(config.staleness_threshold(), Duration::seconds(i64::MAX));
    }

    #[test]
    fn test_server_config_rejects_zero_values() {
        for config in [
            ServerConfig {
                worker_count: 0,
                ..ServerConfig::default()
            },
            ServerConfig {
                queue_capacity: 0,
                ..ServerConfig::default()
            },
            ServerConfig {
                pending_sweep_interval_secs: 0,
                ..ServerConfig::default()
            },
            ServerConfig {
                staleness_threshold_secs: 0,
                ..ServerConfig::default()
            },
            ServerConfig {
                identity_header: "bad header".to_string(),
                ..ServerConfig::default()
            },
        ] {
            assert!(config.validate().is_err(), "{config:?}");
        }
    }

    #[test]
    fn test_metadata_config_tagged() {
        let json = r#"{"type":"sqlite","path":"/tmp/x.db"}"#;
        let config: MetadataConfig = serde_json::from_str(json).unwrap();
        let MetadataConfig::Sqlite { path } = config;
        assert_eq!(path, PathBuf::from("/tmp/x.db"));
    }

    #[test]
    fn test_admission_config_validate() {
        assert!(AdmissionConfig::default().validate().unwrap().is_empty());

        let zero_rate = AdmissionConfig {
            enabled: true,
            uploads_per_minute: 0,
            ..AdmissionConfig::default()
        };
        assert!(zero_rate.validate().is_err());

        let no_burst = AdmissionConfig {
            enabled: true,
            burst_size: 0,
            ..AdmissionConfig::default()
        };
        assert_eq!(no_burst.validate().unwrap().len(), 1);
    }
}
