use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{pklog_debug, Error, Result};

pub const DEFAULT_SOURCE_FILE: &str = "main.c";
pub const DEFAULT_BUILD_SCRIPT: &str = "build_code.sh";
pub const DEFAULT_FLASH_SCRIPT: &str = "load_code.sh";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 2;

pub const MAX_POLL_TIMEOUT_MS: u64 = 60_000;
pub const MAX_IDLE_TIMEOUT_SECS: u64 = 24 * 60 * 60;
pub const MAX_SETTLE_DELAY_SECS: u64 = 60 * 60;

/// Kernel settings read from `~/.picokernel/picokernel.toml`.
///
/// Every field is optional in the file; unset fields fall back to the
/// `DEFAULT_*` constants through the `effective_*` accessors.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    pub build_script: Option<String>,
    pub flash_script: Option<String>,
    pub source_file: Option<String>,
    pub baud_rate: Option<u32>,
    pub poll_timeout_ms: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub settle_delay_secs: Option<u64>,
}

impl Config {
    pub fn kernel_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .ok_or(Error::NoHomeDir)?
            .join(".picokernel"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::kernel_dir()?.join("picokernel.toml"))
    }

    /// Build script path; relative paths resolve against `workdir`.
    pub fn effective_build_script(&self, workdir: &Path) -> PathBuf {
        resolve_path(
            self.build_script.as_deref().unwrap_or(DEFAULT_BUILD_SCRIPT),
            workdir,
        )
    }

    /// Flash script path; relative paths resolve against `workdir`.
    pub fn effective_flash_script(&self, workdir: &Path) -> PathBuf {
        resolve_path(
            self.flash_script.as_deref().unwrap_or(DEFAULT_FLASH_SCRIPT),
            workdir,
        )
    }

    pub fn effective_source_path(&self, workdir: &Path) -> PathBuf {
        resolve_path(
            self.source_file.as_deref().unwrap_or(DEFAULT_SOURCE_FILE),
            workdir,
        )
    }

    pub fn effective_baud_rate(&self) -> u32 {
        self.baud_rate.unwrap_or(DEFAULT_BAUD_RATE)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms.unwrap_or(DEFAULT_POLL_TIMEOUT_MS))
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs.unwrap_or(DEFAULT_SETTLE_DELAY_SECS))
    }

    pub fn validate(&self) -> Result<()> {
        if self.baud_rate == Some(0) {
            return Err(Error::Validation("baud_rate must be > 0".to_string()));
        }
        if self.poll_timeout_ms == Some(0) {
            return Err(Error::Validation("poll_timeout_ms must be > 0".to_string()));
        }
        if self.idle_timeout_secs == Some(0) {
            return Err(Error::Validation(
                "idle_timeout_secs must be > 0".to_string(),
            ));
        }
        check_max("poll_timeout_ms", self.poll_timeout_ms, MAX_POLL_TIMEOUT_MS)?;
        check_max(
            "idle_timeout_secs",
            self.idle_timeout_secs,
            MAX_IDLE_TIMEOUT_SECS,
        )?;
        check_max(
            "settle_delay_secs",
            self.settle_delay_secs,
            MAX_SETTLE_DELAY_SECS,
        )?;
        Ok(())
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        pklog_debug!("Config::load path={}", path.display());
        if !path.exists() {
            pklog_debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        config.validate()?;
        pklog_debug!(
            "Config loaded: build={:?}, flash={:?}, baud={:?}, idle={:?}",
            config.build_script,
            config.flash_script,
            config.baud_rate,
            config.idle_timeout_secs
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<PathBuf> {
        let path = Self::config_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                pklog_debug!("Creating config directory: {}", dir.display());
                fs::create_dir_all(dir)?;
            }
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        pklog_debug!("Config saved to {}", path.display());
        Ok(())
    }

    /// Every field filled in with its effective value, for display and `--init`.
    pub fn resolved(&self) -> Self {
        Self {
            build_script: Some(
                self.build_script
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BUILD_SCRIPT.to_string()),
            ),
            flash_script: Some(
                self.flash_script
                    .clone()
                    .unwrap_or_else(|| DEFAULT_FLASH_SCRIPT.to_string()),
            ),
            source_file: Some(
                self.source_file
                    .clone()
                    .unwrap_or_else(|| DEFAULT_SOURCE_FILE.to_string()),
            ),
            baud_rate: Some(self.effective_baud_rate()),
            poll_timeout_ms: Some(self.poll_timeout_ms.unwrap_or(DEFAULT_POLL_TIMEOUT_MS)),
            idle_timeout_secs: Some(self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)),
            settle_delay_secs: Some(self.settle_delay_secs.unwrap_or(DEFAULT_SETTLE_DELAY_SECS)),
        }
    }
}

fn check_max(field: &str, value: Option<u64>, max: u64) -> Result<()> {
    match value {
        Some(v) if v > max => Err(Error::Validation(format!(
            "{} must be <= {} (got {})",
            field, max, v
        ))),
        _ => Ok(()),
    }
}

fn resolve_path(raw: &str, workdir: &Path) -> PathBuf {
    let expanded = expand_tilde(raw);
    if expanded.is_absolute() {
        expanded
    } else {
        workdir.join(expanded)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
