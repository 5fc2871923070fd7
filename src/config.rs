//! Configuration
//!
//! `AppConfig` mirrors the on-disk TOML file. Front-ends turn it into the
//! runtime `ClientConfig` / `ServerConfig` that the engine constructors take.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::audio::vox::VoxSettings;
use crate::constants::*;
use crate::error::ConfigError;
use crate::profile::{ProfileChoice, ProfileKind};

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub vox: VoxConfig,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Platform config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "lan-voice").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if given, else the platform file if present, else defaults
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::info!(path = %path.display(), "loading configuration");
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(target) = self.audio.latency_target_ms {
            check_range("audio.latency_target_ms", target, 0.0..=1000.0, "0..=1000")?;
        }
        if let Some(level) = self.audio.compression_level {
            check_range("audio.compression_level", level, 1..=9, "1..=9")?;
        }
        check_range(
            "vox.threshold_db",
            self.vox.threshold_db,
            MIN_VOX_THRESHOLD_DB..=MAX_VOX_THRESHOLD_DB,
            "-60..=0",
        )?;
        check_port(self.network.server_port)?;
        check_range(
            "network.connection_timeout_secs",
            self.network.connection_timeout_secs,
            1..=600,
            "1..=600",
        )?;
        check_range("network.max_peers", self.network.max_peers, 1..=1024, "1..=1024")?;
        self.audio.profile()?.resolve(self.audio.latency_target_ms).validate()?;
        Ok(())
    }

    /// Runtime client settings for `host`
    pub fn client_config(&self, host: &str) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            host: host.to_string(),
            port: self.network.server_port,
            connect_timeout: Duration::from_secs(self.network.connection_timeout_secs),
            profile: self.audio.profile()?,
            latency_target_ms: self.audio.latency_target_ms,
            compression: self.audio.compression(),
            vox: self.vox.settings(),
            tcp_nodelay: self.network.tcp_nodelay,
        })
    }

    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let profile = self.audio.profile()?.resolve(self.audio.latency_target_ms);
        Ok(ServerConfig {
            port: self.network.server_port,
            tcp_nodelay: self.network.tcp_nodelay,
            max_peers: self.network.max_peers,
            profile: profile.kind,
            ..ServerConfig::default()
        })
    }
}

fn check_port(port: u16) -> Result<(), ConfigError> {
    check_range("network.server_port", port, 1024..=65535, "1024..=65535")
}

fn check_timeout(field: &'static str, timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::OutOfRange {
            field,
            value: format!("{timeout:?}"),
            expected: "a non-zero duration",
        });
    }
    Ok(())
}

fn check_range<T>(
    field: &'static str,
    value: T,
    range: std::ops::RangeInclusive<T>,
    expected: &'static str,
) -> Result<(), ConfigError>
where
    T: PartialOrd + ToString,
{
    if range.contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        })
    }
}

/// `[audio]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// `auto` or a profile name such as `low_latency`
    pub audio_profile: String,
    /// Latency budget used by `auto` selection
    pub latency_target_ms: Option<f32>,
    pub compression_enabled: bool,
    /// Deflate level 1..=9 (None = the profile's level)
    pub compression_level: Option<u32>,
    /// Input device name (None = default device)
    pub input_device: Option<String>,
    /// Output device name (None = default device)
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            audio_profile: "auto".to_string(),
            latency_target_ms: None,
            compression_enabled: true,
            compression_level: None,
            input_device: None,
            output_device: None,
        }
    }
}

impl AudioConfig {
    pub fn profile(&self) -> Result<ProfileChoice, ConfigError> {
        self.audio_profile.parse()
    }

    pub fn compression(&self) -> CompressionSetting {
        match (self.compression_enabled, self.compression_level) {
            (false, _) => CompressionSetting::Disabled,
            (true, Some(level)) => CompressionSetting::Level(level),
            (true, None) => CompressionSetting::Profile,
        }
    }
}

/// `[vox]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxConfig {
    pub enabled: bool,
    pub threshold_db: f32,
    pub attack_ms: u64,
    pub hold_ms: u64,
}

impl Default for VoxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_db: -30.0,
            attack_ms: 100,
            hold_ms: 1000,
        }
    }
}

impl VoxConfig {
    pub fn settings(&self) -> VoxSettings {
        VoxSettings {
            enabled: self.enabled,
            threshold_db: self.threshold_db,
            attack: Duration::from_millis(self.attack_ms),
            hold: Duration::from_millis(self.hold_ms),
        }
    }
}

/// `[network]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub server_port: u16,
    pub connection_timeout_secs: u64,
    pub tcp_nodelay: bool,
    pub max_peers: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_PORT,
            connection_timeout_secs: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            tcp_nodelay: true,
            max_peers: DEFAULT_MAX_PEERS,
        }
    }
}

/// `[logging]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Compression applied to outgoing audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionSetting {
    /// Use the profile's level
    #[default]
    Profile,
    Disabled,
    Level(u32),
}

impl CompressionSetting {
    pub fn resolve(self, profile_level: Option<u32>) -> Option<u32> {
        match self {
            CompressionSetting::Profile => profile_level,
            CompressionSetting::Disabled => None,
            CompressionSetting::Level(level) => Some(level.clamp(1, 9)),
        }
    }
}

/// Runtime settings for `VoiceClient::connect`
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub profile: ProfileChoice,
    pub latency_target_ms: Option<f32>,
    pub compression: CompressionSetting,
    pub vox: VoxSettings,
    pub tcp_nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST.to_string(),
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            profile: ProfileChoice::Auto,
            latency_target_ms: None,
            compression: CompressionSetting::Profile,
            vox: VoxSettings::default(),
            tcp_nodelay: true,
        }
    }
}

impl ClientConfig {
    /// Checked again here because front-ends override file values
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_port(self.port)?;
        check_timeout("network.connection_timeout_secs", self.connect_timeout)?;
        self.vox.validate()
    }
}

/// Runtime settings for `VoiceServer::start`
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: IpAddr,
    /// 0 picks an ephemeral port
    pub port: u16,
    pub tcp_nodelay: bool,
    pub max_peers: usize,
    pub write_timeout: Duration,
    /// Announced to peers in the welcome message
    pub profile: ProfileKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            tcp_nodelay: true,
            max_peers: DEFAULT_MAX_PEERS,
            write_timeout: PEER_WRITE_TIMEOUT,
            profile: ProfileKind::LowLatency,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port != 0 {
            check_port(self.port)?;
        }
        check_range("network.max_peers", self.max_peers, 1..=1024, "1..=1024")?;
        check_timeout("network.write_timeout", self.write_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.network.server_port, 12345);
        assert_eq!(config.network.connection_timeout_secs, 5);
        assert_eq!(config.vox.threshold_db, -30.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let config = AppConfig::from_toml(
            r#"
            [audio]
            audio_profile = "quality"
            compression_enabled = false

            [vox]
            enabled = true
            threshold_db = -45.0

            [network]
            server_port = 20000
            "#,
        )
        .unwrap();

        assert_eq!(config.audio.profile().unwrap(), ProfileChoice::Fixed(ProfileKind::Quality));
        assert_eq!(config.audio.compression(), CompressionSetting::Disabled);
        let client = config.client_config("10.0.0.2").unwrap();
        assert_eq!(client.port, 20000);
        assert!(client.vox.enabled);
        assert_eq!(client.vox.threshold_db, -45.0);

        let server = config.server_config().unwrap();
        assert_eq!(server.port, 20000);
        assert_eq!(server.profile, ProfileKind::Quality);
    }

    #[test]
    fn test_rejects_out_of_range() {
        let err = AppConfig::from_toml("[vox]\nthreshold_db = 3.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "vox.threshold_db", .. }));

        let err = AppConfig::from_toml("[network]\nserver_port = 80\n").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { field: "network.server_port", .. }));

        let err = AppConfig::from_toml("[audio]\nlatency_target_ms = -4.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));

        let err = AppConfig::from_toml("[audio]\naudio_profile = \"studio\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProfile(_)));
    }

    #[test]
    fn test_rejects_zero_connect_timeout() {
        let err = AppConfig::from_toml("[network]\nconnection_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::OutOfRange { field: "network.connection_timeout_secs", .. }
        ));
    }

    #[test]
    fn test_runtime_overrides_are_checked() {
        let client = ClientConfig {
            port: 80,
            ..ClientConfig::default()
        };
        assert!(matches!(
            client.validate(),
            Err(ConfigError::OutOfRange { field: "network.server_port", .. })
        ));
        let client = ClientConfig {
            connect_timeout: Duration::ZERO,
            ..ClientConfig::default()
        };
        assert!(client.validate().is_err());
        assert!(ClientConfig::default().validate().is_ok());

        let ephemeral = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        assert!(ephemeral.validate().is_ok());
        let privileged = ServerConfig {
            port: 443,
            ..ServerConfig::default()
        };
        assert!(privileged.validate().is_err());
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_compression_resolution() {
        assert_eq!(CompressionSetting::Profile.resolve(Some(6)), Some(6));
        assert_eq!(CompressionSetting::Disabled.resolve(Some(6)), None);
        assert_eq!(CompressionSetting::Level(4).resolve(None), Some(4));
    }
}
