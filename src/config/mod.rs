//! Tool configuration: path resolution and the user/device config files.
//!
//! Every path the tool needs is resolved through [`Paths`], which carries the
//! [`BuildMode`] explicitly. In development mode paths point into a checkout
//! of the toolchain repository; in release mode they point into
//! `~/.cache/jaguar`, populated by `jag setup`.

mod files;

pub use files::{DeviceConfig, UserConfig, WifiConfig, DEFAULT_BAUD};

use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Load the user config from this path instead of the default.
pub const USER_CONFIG_PATH_ENV: &str = "JAG_USER_CONFIG_PATH";
/// Load the device config from this path instead of the default.
pub const DEVICE_CONFIG_PATH_ENV: &str = "JAG_DEVICE_CONFIG_PATH";
/// Store snapshots here instead of `~/.cache/jaguar/snapshots`.
pub const SNAPSHOT_CACHE_PATH_ENV: &str = "JAG_SNAPSHOT_CACHE_PATH";
/// Root of a toolchain checkout; enables development mode in debug builds.
pub const TOIT_REPO_PATH_ENV: &str = "JAG_TOIT_REPO_PATH";
pub const WIFI_SSID_ENV: &str = "JAG_WIFI_SSID";
pub const WIFI_PASSWORD_ENV: &str = "JAG_WIFI_PASSWORD";

/// Where tool binaries and images come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMode {
    /// Everything lives in the user cache, installed by `jag setup`.
    Release,
    /// Everything comes from a toolchain repository checkout.
    Development { repo_root: PathBuf },
}

impl BuildMode {
    /// Release builds always use the cache. Debug builds switch to
    /// development mode when `JAG_TOIT_REPO_PATH` is set.
    pub fn detect() -> Self {
        if cfg!(debug_assertions) {
            if let Some(repo_root) = env::var_os(TOIT_REPO_PATH_ENV) {
                return Self::Development {
                    repo_root: PathBuf::from(repo_root),
                };
            }
        }
        Self::Release
    }

    fn repo_root(&self) -> Option<&Path> {
        match self {
            Self::Release => None,
            Self::Development { repo_root } => Some(repo_root),
        }
    }
}

/// Resolves every on-disk location the tool uses.
#[derive(Debug, Clone)]
pub struct Paths {
    mode: BuildMode,
    home: PathBuf,
    user_config_override: Option<PathBuf>,
    device_config_override: Option<PathBuf>,
    snapshot_cache_override: Option<PathBuf>,
}

impl Paths {
    /// Paths rooted at `home` with no environment overrides.
    pub fn new(mode: BuildMode, home: PathBuf) -> Self {
        Self {
            mode,
            home,
            user_config_override: None,
            device_config_override: None,
            snapshot_cache_override: None,
        }
    }

    /// Paths for the current user, honoring the `JAG_*_PATH` overrides.
    pub fn from_env(mode: BuildMode) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let mut paths = Self::new(mode, home);
        paths.user_config_override = env::var_os(USER_CONFIG_PATH_ENV).map(PathBuf::from);
        paths.device_config_override = env::var_os(DEVICE_CONFIG_PATH_ENV).map(PathBuf::from);
        paths.snapshot_cache_override = env::var_os(SNAPSHOT_CACHE_PATH_ENV).map(PathBuf::from);
        Ok(paths)
    }

    pub fn with_snapshot_cache(mut self, dir: PathBuf) -> Self {
        self.snapshot_cache_override = Some(dir);
        self
    }

    pub fn user_config_path(&self) -> PathBuf {
        self.user_config_override
            .clone()
            .unwrap_or_else(|| self.config_dir().join("config.toml"))
    }

    pub fn device_config_path(&self) -> PathBuf {
        self.device_config_override
            .clone()
            .unwrap_or_else(|| self.config_dir().join("device.toml"))
    }

    /// Snapshot cache directory, created if missing.
    pub fn snapshot_cache_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.snapshot_cache_override {
            return Ok(dir.clone());
        }
        ensure_directory(self.cache_dir().join("snapshots"))
    }

    pub fn sdk_path(&self) -> Result<PathBuf> {
        if let Some(repo) = self.mode.repo_root() {
            return Ok(repo.join("build").join("host").join("sdk"));
        }
        let sdk = self.cache_dir().join("sdk");
        if !sdk.is_dir() {
            bail!(
                "no SDK found in '{}'.\nYou must setup the SDK using 'jag setup'",
                sdk.display()
            );
        }
        Ok(sdk)
    }

    pub fn esp32_image_path(&self) -> Result<PathBuf> {
        if let Some(repo) = self.mode.repo_root() {
            return Ok(repo.join("build").join("esp32"));
        }
        self.esp32_cache_path()
    }

    /// Directory holding `partitions.csv`.
    pub fn toolchain_path(&self) -> Result<PathBuf> {
        if let Some(repo) = self.mode.repo_root() {
            return Ok(repo.join("toolchains").join("esp32"));
        }
        self.esp32_cache_path()
    }

    pub fn esptool_path(&self) -> Result<PathBuf> {
        if let Some(repo) = self.mode.repo_root() {
            return Ok(repo
                .join("third_party")
                .join("esp-idf")
                .join("components")
                .join("esptool_py")
                .join("esptool")
                .join("esptool.py"));
        }
        let esptool = self.cache_dir().join(executable("esptool"));
        if !esptool.is_file() {
            bail!(
                "the path '{}' did not hold the esptool.\nYou must setup the esptool using 'jag setup'",
                esptool.display()
            );
        }
        Ok(esptool)
    }

    fn esp32_cache_path(&self) -> Result<PathBuf> {
        let image = self.cache_dir().join("image");
        if !image.is_dir() {
            bail!(
                "the path '{}' did not hold the esp32 image.\nYou must setup the esp32 image using 'jag setup'",
                image.display()
            );
        }
        Ok(image)
    }

    fn config_dir(&self) -> PathBuf {
        self.home.join(".config").join("jaguar")
    }

    fn cache_dir(&self) -> PathBuf {
        self.home.join(".cache").join("jaguar")
    }
}

/// Platform executable name (`.exe` on Windows).
pub fn executable(name: &str) -> String {
    if cfg!(windows) {
        format!("{name}.exe")
    } else {
        name.to_string()
    }
}

fn ensure_directory(dir: PathBuf) -> Result<PathBuf> {
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    Ok(dir)
}
