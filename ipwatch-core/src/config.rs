use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IpwatchConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub discovery: DiscoverySection,
    pub vision: VisionSection,
}

impl IpwatchConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    /// Apply the recognized environment overrides on top of file values.
    ///
    /// Unset or unparsable variables leave the file value untouched.
    pub fn apply_env_overrides(&mut self) {
        override_u32(&mut self.discovery.daily_quota_units, "DAILY_QUOTA_UNITS");
        override_usize(&mut self.discovery.max_videos_to_scan, "MAX_VIDEOS_TO_SCAN");
        override_f64(&mut self.vision.daily_budget_eur, "DAILY_BUDGET_EUR");
        override_u8(&mut self.vision.minimum_scan_priority, "MINIMUM_SCAN_PRIORITY");
        override_u32(&mut self.vision.max_frames, "MAX_FRAMES");
        override_f64(&mut self.vision.input_price_per_1m, "INPUT_PRICE_PER_1M");
        override_f64(&mut self.vision.output_price_per_1m, "OUTPUT_PRICE_PER_1M");
        override_f64(&mut self.vision.audio_price_per_1m, "AUDIO_PRICE_PER_1M");
        override_string(&mut self.vision.model_name, "MODEL_NAME");
        override_string(&mut self.vision.model_region, "MODEL_REGION");
    }

    pub fn validate(&self) -> Result<()> {
        if self.vision.daily_budget_eur <= 0.0 {
            return Err(ConfigError::Invalid {
                field: "vision.daily_budget_eur".into(),
                reason: "must be positive".into(),
            });
        }
        if self.discovery.daily_quota_units == 0 {
            return Err(ConfigError::Invalid {
                field: "discovery.daily_quota_units".into(),
                reason: "must be positive".into(),
            });
        }
        if self.vision.max_frames == 0 {
            return Err(ConfigError::Invalid {
                field: "vision.max_frames".into(),
                reason: "must be positive".into(),
            });
        }
        if self.vision.worker_slots == 0 {
            return Err(ConfigError::Invalid {
                field: "vision.worker_slots".into(),
                reason: "dispatcher needs at least one worker".into(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub data_dir: String,
}

impl PathsSection {
    pub fn store_path(&self, file: &str) -> PathBuf {
        Path::new(&self.data_dir).join(file)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoverySection {
    #[serde(default = "default_daily_quota_units")]
    pub daily_quota_units: u32,
    #[serde(default = "default_max_videos_to_scan")]
    pub max_videos_to_scan: usize,
    #[serde(default = "default_channel_scan_slots")]
    pub channel_scan_slots: usize,
    #[serde(default = "default_channel_rescan_days")]
    pub channel_rescan_days: i64,
    pub search_endpoint: String,
    #[serde(default)]
    pub search_api_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionSection {
    #[serde(default = "default_daily_budget_eur")]
    pub daily_budget_eur: f64,
    #[serde(default)]
    pub minimum_scan_priority: u8,
    #[serde(default = "default_max_frames")]
    pub max_frames: u32,
    #[serde(default = "default_input_price")]
    pub input_price_per_1m: f64,
    #[serde(default = "default_output_price")]
    pub output_price_per_1m: f64,
    #[serde(default = "default_audio_price")]
    pub audio_price_per_1m: f64,
    pub model_name: String,
    pub model_region: String,
    pub endpoint: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_worker_slots")]
    pub worker_slots: usize,
}

fn default_daily_quota_units() -> u32 {
    10_000
}

fn default_max_videos_to_scan() -> usize {
    500
}

fn default_channel_scan_slots() -> usize {
    5
}

fn default_channel_rescan_days() -> i64 {
    7
}

fn default_daily_budget_eur() -> f64 {
    260.0
}

fn default_max_frames() -> u32 {
    300
}

fn default_input_price() -> f64 {
    0.30
}

fn default_output_price() -> f64 {
    2.50
}

fn default_audio_price() -> f64 {
    0.30
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_output_tokens() -> u32 {
    20_000
}

fn default_worker_slots() -> usize {
    4
}

fn override_string(slot: &mut String, var: &str) {
    if let Ok(value) = std::env::var(var) {
        if !value.trim().is_empty() {
            *slot = value.trim().to_string();
        }
    }
}

fn override_u32(slot: &mut u32, var: &str) {
    if let Some(value) = parse_env(var) {
        *slot = value;
    }
}

fn override_u8(slot: &mut u8, var: &str) {
    if let Some(value) = parse_env(var) {
        *slot = value;
    }
}

fn override_usize(slot: &mut usize, var: &str) {
    if let Some(value) = parse_env(var) {
        *slot = value;
    }
}

fn override_f64(slot: &mut f64, var: &str) {
    if let Some(value) = parse_env(var) {
        *slot = value;
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok()?.trim().parse().ok()
}

pub fn load_ipwatch_config<P: AsRef<Path>>(path: P) -> Result<IpwatchConfig> {
    let mut config: IpwatchConfig = load_toml(path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
