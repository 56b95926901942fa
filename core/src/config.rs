//! Configuration loaded from `~/.accentd/config.toml` and merged with
//! command-line overrides (highest precedence). A missing file yields the
//! defaults; a malformed file is a hard error so the controller never starts
//! on top of a half-read configuration.

use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use serde::Deserialize;
use thiserror::Error;

use crate::theme::IconRoot;

/// Upstream archive containing every accent icon theme.
pub const DEFAULT_ARCHIVE_URL: &str =
    "https://github.com/dpejoh/Adwaita-colors/archive/refs/heads/main.zip";

/// Release endpoint consulted by the version checker; the consumed field is
/// `tag_name`.
pub const DEFAULT_RELEASE_URL: &str =
    "https://api.github.com/repos/dpejoh/Adwaita-colors/releases/latest";

const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60 * 60);
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);
const SYSTEM_ICON_ROOTS: &[&str] = &["/usr/share/icons", "/usr/local/share/icons"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate home directory")]
    NoHome,
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config.toml: {0}")]
    Malformed(#[from] toml::de::Error),
}

/// On-disk representation; every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigToml {
    archive_url: Option<String>,
    release_url: Option<String>,
    check_interval_secs: Option<u64>,
    download_timeout_secs: Option<u64>,
    user_icon_root: Option<PathBuf>,
    system_icon_roots: Option<Vec<PathBuf>>,
    notify_command: Option<Vec<String>>,
    notify_about_releases: Option<bool>,
}

/// Overrides from CLI flags, applied on top of file values.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub archive_url: Option<String>,
    pub release_url: Option<String>,
    pub check_interval: Option<Duration>,
    pub user_icon_root: Option<PathBuf>,
    pub accentd_home: Option<PathBuf>,
}

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// State directory (`~/.accentd` by default): settings.toml, version.json.
    pub accentd_home: PathBuf,
    pub archive_url: String,
    pub release_url: String,
    pub check_interval: Duration,
    pub download_timeout: Duration,
    /// The only root installation ever writes to.
    pub user_icon_root: PathBuf,
    pub system_icon_roots: Vec<PathBuf>,
    /// Optional argv spawned per notification with a JSON payload argument.
    pub notify_command: Option<Vec<String>>,
    /// Default for the `notify-about-releases` settings key when unset.
    pub notify_about_releases: bool,
}

impl Config {
    /// Loads `config.toml` from the accentd home, falling back to defaults
    /// when the file does not exist, then applies `overrides`.
    pub fn load_with_overrides(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        let home = match overrides.accentd_home.clone() {
            Some(home) => home,
            None => accentd_home()?,
        };
        let path = home.join("config.toml");
        let file: ConfigToml = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => ConfigToml::default(),
            Err(err) => return Err(err.into()),
        };

        let user_icon_root = overrides
            .user_icon_root
            .or(file.user_icon_root)
            .map_or_else(default_user_icon_root, Ok)?;

        Ok(Self {
            accentd_home: home,
            archive_url: overrides
                .archive_url
                .or(file.archive_url)
                .unwrap_or_else(|| DEFAULT_ARCHIVE_URL.to_string()),
            release_url: overrides
                .release_url
                .or(file.release_url)
                .unwrap_or_else(|| DEFAULT_RELEASE_URL.to_string()),
            check_interval: overrides
                .check_interval
                .or(file.check_interval_secs.map(Duration::from_secs))
                .unwrap_or(DEFAULT_CHECK_INTERVAL),
            download_timeout: file
                .download_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT),
            user_icon_root,
            system_icon_roots: file
                .system_icon_roots
                .unwrap_or_else(|| SYSTEM_ICON_ROOTS.iter().map(PathBuf::from).collect()),
            notify_command: file.notify_command,
            notify_about_releases: file.notify_about_releases.unwrap_or(true),
        })
    }

    /// Search order for resolution: system roots first, user root last.
    pub fn icon_roots(&self) -> Vec<IconRoot> {
        let mut roots: Vec<IconRoot> = self
            .system_icon_roots
            .iter()
            .map(IconRoot::system)
            .collect();
        roots.push(IconRoot::user(&self.user_icon_root));
        roots
    }

    pub fn settings_file(&self) -> PathBuf {
        self.accentd_home.join("settings.toml")
    }

    pub fn version_cache_file(&self) -> PathBuf {
        self.accentd_home.join("version.json")
    }
}

/// Returns `~/.accentd`. Does not verify that the directory exists.
pub fn accentd_home() -> Result<PathBuf, ConfigError> {
    let mut home = home_dir().ok_or(ConfigError::NoHome)?;
    home.push(".accentd");
    Ok(home)
}

fn default_user_icon_root() -> Result<PathBuf, ConfigError> {
    let mut root = home_dir().ok_or(ConfigError::NoHome)?;
    root.push(".local/share/icons");
    Ok(root)
}
