use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

/// File-backed settings. Every key is optional in the YAML file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub media: String,
    pub db: String,
    pub timeout_secs: u64,
    pub no_root: bool,
    pub art_cache_bytes: usize,
    pub orphan_interval_secs: u64,
    pub status_interval_secs: u64,
    pub scan_on_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: ":8080".to_string(),
            media: "".to_string(),
            db: "spindle.redb".to_string(),
            timeout_secs: 5,
            no_root: false,
            art_cache_bytes: 32 * 1024 * 1024,
            orphan_interval_secs: 30 * 60,
            status_interval_secs: 5 * 60,
            scan_on_start: true,
            ffmpeg_path: None,
        }
    }
}

impl ServerConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Command-line flags. Anything given here wins over the config file.
#[derive(Debug, Default, Parser)]
#[command(name = "spindle", version, about = "Music library server")]
pub struct Cli {
    /// Path to the YAML config file.
    #[arg(long, env = "SPINDLE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Bind address; a bare `:port` listens on all interfaces.
    #[arg(long)]
    pub host: Option<String>,

    /// Media root to scan.
    #[arg(long)]
    pub media: Option<String>,

    /// Catalog database file.
    #[arg(long)]
    pub db: Option<String>,

    /// Shutdown grace period in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Do not create an initial admin user.
    #[arg(long)]
    pub no_root: bool,
}

impl Cli {
    pub fn apply(&self, config: &mut ServerConfig) {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(media) = &self.media {
            config.media = media.clone();
        }
        if let Some(db) = &self.db {
            config.db = db.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if self.no_root {
            config.no_root = true;
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    MediaMissing,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
            ConfigError::MediaMissing => write!(f, "no media folder configured (use --media)"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path(cli: &Cli) -> PathBuf {
    match &cli.config {
        Some(path) if !path.as_os_str().is_empty() => path.clone(),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

/// Reads the config file, writing the defaults first when it does not exist.
/// The flag reports whether the file was created.
pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = serde_yaml::from_str(&contents)?;
        if config.host.trim().is_empty() {
            config.host = ServerConfig::default().host;
        }
        if config.db.trim().is_empty() {
            config.db = ServerConfig::default().db;
        }
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value);
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}

pub fn resolve_media_root(config_path: &Path, value: &str) -> Result<PathBuf, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MediaMissing);
    }
    Ok(resolve_path(config_path, trimmed))
}

/// `:8080` becomes `0.0.0.0:8080`; anything else is passed to the resolver as is.
pub fn bind_address(host: &str) -> String {
    let host = host.trim();
    if host.starts_with(':') {
        format!("0.0.0.0{}", host)
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("config.yaml");

        let (config, created) = load_or_create_config(&path).unwrap();
        assert!(created);
        assert!(path.exists());
        assert_eq!(config.host, ":8080");
        assert_eq!(config.timeout_secs, 5);

        let (_, created) = load_or_create_config(&path).unwrap();
        assert!(!created);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "media: /srv/music\nart_cache_bytes: 1024\n").unwrap();

        let (config, _) = load_or_create_config(&path).unwrap();
        assert_eq!(config.media, "/srv/music");
        assert_eq!(config.art_cache_bytes, 1024);
        assert_eq!(config.orphan_interval_secs, 1800);
        assert!(config.scan_on_start);
    }

    #[test]
    fn flags_override_file_values() {
        let mut config = ServerConfig::default();
        let cli = Cli::parse_from([
            "spindle", "--host", "127.0.0.1:9000", "--media", "/music", "--timeout", "9", "--no-root",
        ]);
        cli.apply(&mut config);

        assert_eq!(config.host, "127.0.0.1:9000");
        assert_eq!(config.media, "/music");
        assert_eq!(config.timeout_secs, 9);
        assert!(config.no_root);
        assert_eq!(config.db, "spindle.redb");
    }

    #[test]
    fn relative_paths_follow_the_config_file() {
        let config_path = Path::new("/etc/spindle/config.yaml");
        assert_eq!(
            resolve_path(config_path, "data/library.redb"),
            PathBuf::from("/etc/spindle/data/library.redb")
        );
        assert_eq!(resolve_path(config_path, "/abs"), PathBuf::from("/abs"));
        assert!(matches!(
            resolve_media_root(config_path, "  "),
            Err(ConfigError::MediaMissing)
        ));
    }

    #[test]
    fn bare_port_binds_everywhere() {
        assert_eq!(bind_address(":8080"), "0.0.0.0:8080");
        assert_eq!(bind_address("localhost:1234"), "localhost:1234");
    }
}
