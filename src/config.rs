//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER__HOST, APP_MEDIA__DEFAULT_FACING, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// Broken into logical groups so each subsystem reads only its own section:
/// the HTTP server, the media capture layer, the upload gateway client, and
/// the dictation feature switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub media: MediaConfig,
    pub upload: UploadConfig,
    pub dictation: DictationConfig,
}

/// Server-specific configuration settings.
///
/// ## Fields:
/// - `host`: IP address or hostname to bind the server to
/// - `port`: TCP port number to listen on
/// - `cors_permissive`: allow any origin (development); lock down in production
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_permissive: bool,
}

/// Media capture configuration.
///
/// ## Fields:
/// - `default_facing`: camera facing used when a client opens without one
///   ("front"/"user" or "rear"/"environment"/"back")
/// - `ideal_width` / `ideal_height`: the ideal-resolution constraint sent to
///   the camera platform; the stream may arrive at a different native size
/// - `max_recording_secs`: hard cap on a single video recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    pub default_facing: String,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub max_recording_secs: u64,
}

/// Upload gateway client configuration.
///
/// ## Fields:
/// - `endpoint`: base URL of the external upload gateway
/// - `timeout_secs`: per-upload timeout
/// - `max_artifact_bytes`: artifacts larger than this are rejected before
///   the gateway is called
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_artifact_bytes: usize,
}

/// Dictation feature switch.
///
/// Disabling this reports the capability as unsupported to every client,
/// independent of what the speech platform would say.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictationConfig {
    pub enabled: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
                cors_permissive: true,
            },
            media: MediaConfig {
                default_facing: "rear".to_string(),
                ideal_width: 1280,
                ideal_height: 720,
                max_recording_secs: 300,
            },
            upload: UploadConfig {
                endpoint: "http://127.0.0.1:9000/upload".to_string(),
                timeout_secs: 30,
                max_artifact_bytes: 50 * 1024 * 1024,
            },
            dictation: DictationConfig { enabled: true },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_MEDIA__DEFAULT_FACING=front`: Override default camera facing
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates section from field so field names
            // containing underscores survive (APP_MEDIA__IDEAL_WIDTH).
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        // Deployment platforms commonly inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server host is non-empty and port is not 0
    /// - Camera ideal dimensions are nonzero
    /// - Recording cap, upload endpoint, timeout and size limit are usable
    pub fn validate(&self) -> Result<()> {
        if self.server.host.is_empty() {
            return Err(anyhow::anyhow!("Server host cannot be empty"));
        }

        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.media.ideal_width == 0 || self.media.ideal_height == 0 {
            return Err(anyhow::anyhow!("Camera ideal dimensions must be greater than 0"));
        }

        if self.media.max_recording_secs == 0 {
            return Err(anyhow::anyhow!("Max recording duration must be greater than 0"));
        }

        self.media
            .default_facing
            .parse::<crate::capture::session::CameraFacing>()
            .map_err(|e| anyhow::anyhow!("Invalid default facing: {}", e))?;

        if self.upload.endpoint.is_empty() {
            return Err(anyhow::anyhow!("Upload endpoint cannot be empty"));
        }

        if self.upload.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Upload timeout must be greater than 0"));
        }

        if self.upload.max_artifact_bytes == 0 {
            return Err(anyhow::anyhow!("Max artifact size must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Partial updates are allowed: `{"media": {"default_facing": "front"}}`
    /// changes only that field. The server binding is fixed at startup, so a
    /// `server` section in the update is rejected rather than ignored.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if partial_config.get("server").is_some() {
            return Err(anyhow::anyhow!(
                "Server binding cannot be changed at runtime"
            ));
        }

        if let Some(media) = partial_config.get("media") {
            if let Some(facing) = media.get("default_facing").and_then(|v| v.as_str()) {
                self.media.default_facing = facing.to_string();
            }
            if let Some(width) = media.get("ideal_width").and_then(|v| v.as_u64()) {
                self.media.ideal_width = width as u32;
            }
            if let Some(height) = media.get("ideal_height").and_then(|v| v.as_u64()) {
                self.media.ideal_height = height as u32;
            }
            if let Some(secs) = media.get("max_recording_secs").and_then(|v| v.as_u64()) {
                self.media.max_recording_secs = secs;
            }
        }

        if let Some(upload) = partial_config.get("upload") {
            if let Some(endpoint) = upload.get("endpoint").and_then(|v| v.as_str()) {
                self.upload.endpoint = endpoint.to_string();
            }
            if let Some(timeout) = upload.get("timeout_secs").and_then(|v| v.as_u64()) {
                self.upload.timeout_secs = timeout;
            }
            if let Some(max) = upload.get("max_artifact_bytes").and_then(|v| v.as_u64()) {
                self.upload.max_artifact_bytes = max as usize;
            }
        }

        if let Some(dictation) = partial_config.get("dictation") {
            if let Some(enabled) = dictation.get("enabled").and_then(|v| v.as_bool()) {
                self.dictation.enabled = enabled;
            }
        }

        self.validate()?;
        Ok(())
    }
}
