//! # Configuration
//!
//! Tuning lives in one TOML file with a section per component:
//!
//! ```toml
//! [scoring.weights]
//! key = 40.0
//! tempo = 30.0
//! energy = 30.0
//!
//! [hotcue]
//! exit_bars = 8
//!
//! [advisor]
//! phrase_tolerance_beats = 0.5
//!
//! [sequencer]
//! energy_arc = "classic"
//! max_bpm_step = 12.0
//!
//! [split]
//! per_set = 40
//! ```
//!
//! Every key is optional. The file is looked up in this order:
//! `--config <path>`, `$SETWRIGHT_CONFIG`, the platform config directory
//! (`~/.config/setwright/config.toml` on Linux), then built-in defaults.
//!
//! The analysis cache lives in the platform data directory:
//! - Linux: `~/.local/share/setwright/analysis.db`
//! - macOS: `~/Library/Application Support/setwright/analysis.db`
//! - Windows: `%APPDATA%\setwright\analysis.db`

use crate::advisor::AdvisorConfig;
use crate::error::{Error, Result};
use crate::hotcue::HotcueConfig;
use crate::scoring::ScoringContext;
use crate::sequencer::{SequenceMode, SetSplit};
use anyhow::Context;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "SETWRIGHT_CONFIG";

/// Everything a run can be tuned with
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scoring: ScoringContext,
    pub hotcue: HotcueConfig,
    pub advisor: AdvisorConfig,
    pub sequencer: SequenceMode,
    /// Used when a pool is cut into several sets
    pub split: SetSplit,
}

impl AppConfig {
    /// Parse and validate TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Toml`] on malformed TOML and [`Error::Config`] on
    /// out-of-range values.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        self.scoring.validate()?;
        if self.hotcue.exit_bars == 0 {
            return Err(Error::Config("hotcue.exit_bars must be at least 1".into()));
        }
        let ratios = [
            ("hotcue.intro_exit_ratio", self.hotcue.intro_exit_ratio),
            ("hotcue.outro_start_ratio", self.hotcue.outro_start_ratio),
        ];
        for (name, value) in ratios {
            if !(0.0..1.0).contains(&value) {
                return Err(Error::Config(format!("{name} must be in [0, 1), got {value}")));
            }
        }
        if self.hotcue.intro_exit_ratio >= self.hotcue.outro_start_ratio {
            return Err(Error::Config("hotcue.intro_exit_ratio must be below outro_start_ratio".into()));
        }
        if !(self.advisor.phrase_tolerance_beats.is_finite() && self.advisor.phrase_tolerance_beats >= 0.0) {
            return Err(Error::Config("advisor.phrase_tolerance_beats must be non-negative".into()));
        }
        if self.sequencer.seed_candidates == 0 {
            return Err(Error::Config("sequencer.seed_candidates must be at least 1".into()));
        }
        let steps = [
            ("sequencer.max_bpm_step", self.sequencer.max_bpm_step),
            ("sequencer.bpm_step_fallback", self.sequencer.bpm_step_fallback),
        ];
        for (name, value) in steps {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("{name} must be a positive number, got {value}")));
            }
        }
        self.split.validate()
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("cannot render config: {e}")))
    }

    /// Resolve and load the configuration; returns the file it came from,
    /// if any.
    ///
    /// # Errors
    ///
    /// An explicitly named file (flag or environment) must exist and parse.
    /// A malformed file in the default location is also an error.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        if let Some(path) = named {
            let config = Self::from_file(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            info!("Loaded config from {}", path.display());
            return Ok((config, Some(path)));
        }

        match default_config_path() {
            Some(path) if path.is_file() => {
                let config = Self::from_file(&path)
                    .with_context(|| format!("Failed to load config from {}", path.display()))?;
                info!("Loaded config from {}", path.display());
                Ok((config, Some(path)))
            }
            _ => {
                debug!("No config file, using defaults");
                Ok((Self::default(), None))
            }
        }
    }
}

/// `<config dir>/setwright/config.toml`, if the platform has a config dir.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("setwright").join("config.toml"))
}

/// Returns the platform-appropriate analysis cache path, creating the
/// `setwright` data directory if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The setwright subdirectory cannot be created
///
/// # Examples
///
/// ```no_run
/// use setwright::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Analysis cache: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> anyhow::Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!("Could not determine system data directory. Use --db to name the cache explicitly.")
    })?;

    let app_dir = data_dir.join("setwright");
    fs::create_dir_all(&app_dir).with_context(|| {
        format!("Failed to create data directory at {}. Please check file permissions.", app_dir.display())
    })?;

    Ok(app_dir.join("analysis.db"))
}
