use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::scoring::{ScoringParams, TimeWindow};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    #[serde(default)]
    pub surveillance: SurveillanceConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub wigle: WigleConfig,
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load config from default locations or create default
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/tailwatch/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("tailwatch/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        Ok(Self::default())
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.surveillance;
        for (name, value) in [
            ("persistence_threshold", s.persistence_threshold),
            ("stalking_threshold", s.stalking_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("surveillance.{} must be within [0, 1], got {}", name, value);
            }
        }
        if self.timing.windows.is_empty() {
            bail!("timing.windows must contain at least one window");
        }
        if let Some(w) = self.timing.windows.iter().find(|w| w.minutes == 0) {
            bail!("timing window '{}' has zero length", w.name);
        }
        if !(self.clustering.distance_meters > 0.0) {
            bail!("clustering.distance_meters must be positive");
        }
        Ok(())
    }

    /// Scoring thresholds from the surveillance section
    pub fn scoring_params(&self) -> ScoringParams {
        ScoringParams {
            threshold: self.surveillance.persistence_threshold,
            min_appearances: self.surveillance.min_appearances,
        }
    }

    /// Newest Kismet log matching the configured glob
    pub fn latest_kismet_db(&self) -> Option<PathBuf> {
        let pattern = self.paths.kismet_logs.to_string_lossy().into_owned();
        let entries = glob::glob(&pattern).ok()?;

        entries
            .filter_map(|e| e.ok())
            .filter_map(|p| {
                let modified = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
                Some((modified, p))
            })
            .max_by_key(|(modified, _)| *modified)
            .map(|(_, p)| p)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Working directory for reports
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Glob matching Kismet log databases
    #[serde(default = "default_kismet_logs")]
    pub kismet_logs: PathBuf,

    /// JSON file with `ignore_macs`
    #[serde(default)]
    pub ignore_macs: Option<PathBuf>,

    /// JSON file with `ignore_ssids`
    #[serde(default)]
    pub ignore_ssids: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            log_dir: default_log_dir(),
            kismet_logs: default_kismet_logs(),
            ignore_macs: None,
            ignore_ssids: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Look-back windows, narrowest first
    #[serde(default = "default_windows")]
    pub windows: Vec<TimeWindow>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            windows: default_windows(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurveillanceConfig {
    #[serde(default = "default_persistence_threshold")]
    pub persistence_threshold: f64,

    #[serde(default = "default_min_appearances")]
    pub min_appearances: u64,

    /// Score for `--stalking-only`
    #[serde(default = "default_stalking_threshold")]
    pub stalking_threshold: f64,
}

impl Default for SurveillanceConfig {
    fn default() -> Self {
        Self {
            persistence_threshold: default_persistence_threshold(),
            min_appearances: default_min_appearances(),
            stalking_threshold: default_stalking_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Radius around a cluster anchor
    #[serde(default = "default_distance_meters")]
    pub distance_meters: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            distance_meters: default_distance_meters(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WigleConfig {
    #[serde(default)]
    pub api_name: Option<String>,

    #[serde(default)]
    pub api_token: Option<String>,

    /// Search bounding box
    #[serde(default = "default_lat_min")]
    pub lat_min: f64,
    #[serde(default = "default_lat_max")]
    pub lat_max: f64,
    #[serde(default = "default_lon_min")]
    pub lon_min: f64,
    #[serde(default = "default_lon_max")]
    pub lon_max: f64,

    /// Results per SSID query
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// SSIDs looked up per run
    #[serde(default = "default_max_queries")]
    pub max_queries: usize,

    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl WigleConfig {
    /// Credentials, if both halves are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.api_name.as_deref(), self.api_token.as_deref()) {
            (Some(name), Some(token)) if !name.is_empty() && !token.is_empty() => Some((name, token)),
            _ => None,
        }
    }
}

impl Default for WigleConfig {
    fn default() -> Self {
        Self {
            api_name: None,
            api_token: None,
            lat_min: default_lat_min(),
            lat_max: default_lat_max(),
            lon_min: default_lon_min(),
            lon_max: default_lon_max(),
            max_results: default_max_results(),
            max_queries: default_max_queries(),
            timeout_secs: default_timeout(),
        }
    }
}

// Default value functions
fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}
fn default_kismet_logs() -> PathBuf {
    PathBuf::from("/home/kali/kismet_logs/*.kismet")
}
fn default_windows() -> Vec<TimeWindow> {
    vec![
        TimeWindow::new("recent", 5),
        TimeWindow::new("medium", 10),
        TimeWindow::new("old", 15),
        TimeWindow::new("oldest", 20),
    ]
}
fn default_persistence_threshold() -> f64 {
    0.6
}
fn default_min_appearances() -> u64 {
    3
}
fn default_stalking_threshold() -> f64 {
    0.8
}
fn default_distance_meters() -> f64 {
    100.0
}
fn default_lat_min() -> f64 {
    -90.0
}
fn default_lat_max() -> f64 {
    90.0
}
fn default_lon_min() -> f64 {
    -180.0
}
fn default_lon_max() -> f64 {
    180.0
}
fn default_max_results() -> u32 {
    5
}
fn default_max_queries() -> usize {
    10
}
fn default_timeout() -> u64 {
    10
}
