// Configuration management with layered configuration (file, env)

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main settings structure containing all configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub blob: BlobConfig,
    pub sftp: SftpSettings,
    pub crypto: CryptoConfig,
    pub download: DownloadConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
    #[serde(default)]
    pub use_ssl: bool,
}

/// Named SFTP server definitions. Transfers address a server by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpSettings {
    pub servers: HashMap<String, SftpServerConfig>,
    #[serde(default = "default_sftp_timeout")]
    pub timeout_seconds: u64,
}

fn default_sftp_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SftpServerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
}

/// External crypto service and callback correlation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    pub base_url: String,
    #[serde(default = "default_app_code")]
    pub app_code: String,
    #[serde(default = "default_encryption_enabled")]
    pub encryption_enabled: bool,
    #[serde(default = "default_callback_expiry_minutes")]
    pub callback_expiry_minutes: u64,
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
    #[serde(default = "default_decrypt_wait_seconds")]
    pub decrypt_wait_seconds: u64,
}

fn default_app_code() -> String {
    "OCMSLTA001".to_string()
}

fn default_encryption_enabled() -> bool {
    true
}

fn default_callback_expiry_minutes() -> u64 {
    120
}

fn default_sweep_interval_minutes() -> u64 {
    60
}

fn default_decrypt_wait_seconds() -> u64 {
    300
}

/// Agency response download and reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    pub server_name: String,
    pub remote_dir: String,
    pub blob_folder: String,
    #[serde(default = "default_response_prefix")]
    pub response_prefix: String,
    #[serde(default = "default_report_prefix")]
    pub report_prefix: String,
    pub run_interval_seconds: u64,
}

fn default_response_prefix() -> String {
    "NRO2URA".to_string()
}

fn default_report_prefix() -> String {
    "REPORT".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Settings {
    /// Load configuration with layered precedence: defaults → file → env
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("config")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default configuration
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Add local configuration (not committed to git)
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Add environment-specific configuration
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Validate configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port must be greater than 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL cannot be empty".to_string());
        }
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }

        if self.blob.endpoint.is_empty() {
            return Err("Blob endpoint cannot be empty".to_string());
        }
        if self.blob.bucket.is_empty() {
            return Err("Blob bucket cannot be empty".to_string());
        }

        for (name, server) in &self.sftp.servers {
            if server.host.is_empty() {
                return Err(format!("SFTP server '{}' host cannot be empty", name));
            }
            if server.password.is_none() && server.private_key_path.is_none() {
                return Err(format!(
                    "SFTP server '{}' needs a password or a private key",
                    name
                ));
            }
        }

        if self.crypto.base_url.is_empty() {
            return Err("Crypto base_url cannot be empty".to_string());
        }
        if self.crypto.callback_expiry_minutes == 0 {
            return Err("Crypto callback_expiry_minutes must be greater than 0".to_string());
        }
        if self.crypto.sweep_interval_minutes == 0 {
            return Err("Crypto sweep_interval_minutes must be greater than 0".to_string());
        }

        if self.download.server_name.is_empty() {
            return Err("Download server_name cannot be empty".to_string());
        }
        if !self.sftp.servers.contains_key(&self.download.server_name) {
            return Err(format!(
                "Download server_name '{}' is not a configured SFTP server",
                self.download.server_name
            ));
        }
        if self.download.run_interval_seconds == 0 {
            return Err("Download run_interval_seconds must be greater than 0".to_string());
        }

        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        let mut servers = HashMap::new();
        servers.insert(
            "agency".to_string(),
            SftpServerConfig {
                host: "localhost".to_string(),
                port: 22,
                username: "ocms".to_string(),
                password: Some("change-me".to_string()),
                private_key_path: None,
            },
        );

        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgresql://localhost/ocms_admin".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_seconds: 30,
            },
            blob: BlobConfig {
                endpoint: "http://localhost:9000".to_string(),
                access_key: "minioadmin".to_string(),
                secret_key: "minioadmin".to_string(),
                bucket: "ocms-admin".to_string(),
                region: "us-east-1".to_string(),
                use_ssl: false,
            },
            sftp: SftpSettings {
                servers,
                timeout_seconds: 30,
            },
            crypto: CryptoConfig {
                base_url: "http://localhost:9100".to_string(),
                app_code: default_app_code(),
                encryption_enabled: true,
                callback_expiry_minutes: default_callback_expiry_minutes(),
                sweep_interval_minutes: default_sweep_interval_minutes(),
                decrypt_wait_seconds: default_decrypt_wait_seconds(),
            },
            download: DownloadConfig {
                server_name: "agency".to_string(),
                remote_dir: "/outbound".to_string(),
                blob_folder: "agency-responses".to_string(),
                response_prefix: default_response_prefix(),
                report_prefix: default_report_prefix(),
                run_interval_seconds: 3600,
            },
            observability: ObservabilityConfig {
                log_level: "info".to_string(),
            },
        }
    }
}
