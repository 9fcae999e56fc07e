use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame_queue::DEFAULT_QUEUE_CAPACITY;
use crate::weights::{parse_fps, BlurWeighting};

const CONFIG_FILE_NAME: &str = "config.toml";
const ENV_DATA_DIR: &str = "BLURLINE_DATA_DIR";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuVendor {
    #[default]
    Nvidia,
    Amd,
    Intel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    #[serde(alias = "hevc")]
    H265,
    Av1,
    Vp9,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
    Mkv,
    Avi,
    Mov,
}

/// Motion interpolation mode handed to ffmpeg's `minterpolate`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMethod {
    /// Motion-compensated; `rife` and `svp` settings map here.
    #[default]
    #[serde(alias = "rife", alias = "svp")]
    Mci,
    Blend,
}

macro_rules! lowercase_enum_parsing {
    ($ty:ty, $what:literal) => {
        impl FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self> {
                let quoted = serde_json::Value::String(s.trim().to_ascii_lowercase());
                serde_json::from_value(quoted)
                    .with_context(|| format!("unknown {} '{}'", $what, s))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match serde_json::to_value(self) {
                    Ok(serde_json::Value::String(name)) => f.write_str(&name),
                    _ => write!(f, "{:?}", self),
                }
            }
        }
    };
}

lowercase_enum_parsing!(GpuVendor, "gpu type");
lowercase_enum_parsing!(VideoCodec, "codec");
lowercase_enum_parsing!(Container, "container");
lowercase_enum_parsing!(InterpolationMethod, "interpolation method");

/// Every knob of a processing run. Missing keys in a config file keep their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BlurConfig {
    pub blur: bool,
    pub blur_amount: f64,
    pub blur_output_fps: String,
    pub blur_weighting: BlurWeighting,
    pub custom_weights: Vec<f32>,

    pub interpolate: bool,
    pub interpolated_fps: String,
    pub interpolation_method: InterpolationMethod,
    pub interpolation_block_size: u32,
    pub pre_interpolation: bool,
    pub pre_interpolated_fps: String,

    pub deduplicate: bool,
    pub deduplicate_range: usize,
    pub deduplicate_threshold: f32,

    pub gpu_decoding: bool,
    pub gpu_encoding: bool,
    pub gpu_type: GpuVendor,

    pub brightness: f32,
    pub saturation: f32,
    pub contrast: f32,
    pub gamma: f32,
    pub ffmpeg_filters: String,

    pub quality: u32,
    pub container: Container,
    pub codec: VideoCodec,
    /// Target bitrate in kbit/s; 0 selects quality-based rate control.
    pub bitrate: u32,
    pub pixel_format: String,
    pub threads: u32,
    pub timescale: f64,
    pub pitch_correction: bool,

    pub queue_capacity: usize,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            blur: true,
            blur_amount: 1.0,
            blur_output_fps: "60".to_string(),
            blur_weighting: BlurWeighting::GaussianSym,
            custom_weights: Vec::new(),
            interpolate: true,
            interpolated_fps: "5x".to_string(),
            interpolation_method: InterpolationMethod::Mci,
            interpolation_block_size: 16,
            pre_interpolation: false,
            pre_interpolated_fps: "2x".to_string(),
            deduplicate: false,
            deduplicate_range: 5,
            deduplicate_threshold: 0.2,
            gpu_decoding: false,
            gpu_encoding: false,
            gpu_type: GpuVendor::Nvidia,
            brightness: 0.0,
            saturation: 0.0,
            contrast: 0.0,
            gamma: 1.0,
            ffmpeg_filters: String::new(),
            quality: 20,
            container: Container::Mp4,
            codec: VideoCodec::H264,
            bitrate: 0,
            pixel_format: "yuv420p".to_string(),
            threads: 0,
            timescale: 1.0,
            pitch_correction: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        expected: &'static str,
        value: String,
    },
    #[error("blur_weighting 'custom' requires custom_weights")]
    MissingCustomWeights,
    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn check_range<T>(field: &'static str, value: T, min: T, max: T, expected: &'static str) -> Result<(), ConfigError>
where
    T: PartialOrd + fmt::Display + Copy,
{
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field,
            expected,
            value: value.to_string(),
        });
    }
    Ok(())
}

fn check_fps_expr(field: &'static str, expr: &str) -> Result<(), ConfigError> {
    parse_fps(expr, 1.0).map(|_| ()).map_err(|error| ConfigError::Invalid {
        field,
        reason: format!("{error:#}"),
    })
}

impl BlurConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("blur_amount", self.blur_amount, 0.0, 10.0, "between 0 and 10")?;
        check_fps_expr("blur_output_fps", &self.blur_output_fps)?;
        if self.blur_weighting == BlurWeighting::Custom && self.custom_weights.is_empty() {
            return Err(ConfigError::MissingCustomWeights);
        }
        if self
            .custom_weights
            .iter()
            .any(|weight| !weight.is_finite() || *weight < 0.0)
        {
            return Err(ConfigError::Invalid {
                field: "custom_weights",
                reason: "weights must be finite and non-negative".to_string(),
            });
        }

        check_fps_expr("interpolated_fps", &self.interpolated_fps)?;
        check_fps_expr("pre_interpolated_fps", &self.pre_interpolated_fps)?;
        if ![4, 8, 16, 32].contains(&self.interpolation_block_size) {
            return Err(ConfigError::OutOfRange {
                field: "interpolation_block_size",
                expected: "one of 4, 8, 16, 32",
                value: self.interpolation_block_size.to_string(),
            });
        }

        check_range("deduplicate_range", self.deduplicate_range, 1, 16, "between 1 and 16")?;
        check_range(
            "deduplicate_threshold",
            self.deduplicate_threshold,
            0.0,
            1.0,
            "between 0 and 1",
        )?;

        check_range("brightness", self.brightness, -1.0, 1.0, "between -1 and 1")?;
        check_range("saturation", self.saturation, -1.0, 1.0, "between -1 and 1")?;
        check_range("contrast", self.contrast, -1.0, 1.0, "between -1 and 1")?;
        check_range("gamma", self.gamma, 0.1, 10.0, "between 0.1 and 10")?;

        check_range("quality", self.quality, 0, 51, "between 0 and 51")?;
        check_range("threads", self.threads, 0, 256, "between 0 and 256")?;
        if !(self.timescale > 0.0 && self.timescale <= 100.0) {
            return Err(ConfigError::OutOfRange {
                field: "timescale",
                expected: "greater than 0 and at most 100",
                value: self.timescale.to_string(),
            });
        }
        if self.pixel_format.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "pixel_format",
                reason: "must not be empty".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                field: "queue_capacity",
                expected: "at least 1",
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    pub fn has_color_adjustment(&self) -> bool {
        self.brightness != 0.0 || self.saturation != 0.0 || self.contrast != 0.0 || self.gamma != 1.0
    }

    /// Missing or empty file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::default().merge_file(path)
    }

    /// Overlays the keys present in `path` (JSON or TOML, chosen by extension)
    /// on top of `self`.
    pub fn merge_file(self, path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(self);
        }

        let overlay = match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => {
                let table: toml::Value = toml::from_str(&raw)
                    .with_context(|| format!("failed to parse config TOML: {}", path.display()))?;
                serde_json::to_value(table).context("failed to convert TOML config")?
            }
            _ => serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config JSON: {}", path.display()))?,
        };

        let serde_json::Value::Object(overlay) = overlay else {
            bail!("config file must contain a table of settings: {}", path.display());
        };
        let mut merged = serde_json::to_value(&self).context("failed to serialize config")?;
        if let serde_json::Value::Object(base) = &mut merged {
            base.extend(overlay);
        }

        serde_json::from_value(merged)
            .with_context(|| format!("invalid settings in config file: {}", path.display()))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .context("config path does not have a parent directory")?;
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory: {}", parent.display()))?;

        let encoded = toml::to_string_pretty(self).context("failed to serialize config TOML")?;
        fs::write(path, encoded)
            .with_context(|| format!("failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

/// Named bundles of blur settings for common footage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Gaming,
    Cinematic,
    Smooth,
    Fast,
    Quality,
}

lowercase_enum_parsing!(Preset, "preset");

impl Preset {
    pub fn apply(self, config: &mut BlurConfig) {
        match self {
            Preset::Gaming => {
                config.blur_amount = 0.3;
                config.blur_weighting = BlurWeighting::GaussianSym;
                config.interpolated_fps = "5x".to_string();
                config.interpolation_block_size = 16;
                config.deduplicate = true;
                config.deduplicate_threshold = 0.1;
            }
            Preset::Cinematic => {
                config.blur_amount = 1.0;
                config.blur_weighting = BlurWeighting::Gaussian;
                config.interpolated_fps = "3x".to_string();
                config.interpolation_block_size = 32;
                config.deduplicate = false;
            }
            Preset::Smooth => {
                config.blur_amount = 1.5;
                config.blur_weighting = BlurWeighting::GaussianSym;
                config.interpolated_fps = "10x".to_string();
                config.interpolation_block_size = 8;
                config.deduplicate = true;
                config.deduplicate_threshold = 0.05;
            }
            Preset::Fast => {
                config.blur_amount = 0.5;
                config.blur_weighting = BlurWeighting::Equal;
                config.interpolate = false;
                config.deduplicate = true;
            }
            Preset::Quality => {
                config.blur_amount = 1.2;
                config.blur_weighting = BlurWeighting::GaussianSym;
                config.interpolated_fps = "8x".to_string();
                config.pre_interpolation = true;
                config.quality = 18;
            }
        }
    }
}

/// Resolve the data directory with 3-tier priority:
/// 1. CLI override if provided
/// 2. BLURLINE_DATA_DIR environment variable
/// 3. Default: ./data
pub fn data_dir(cli_override: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_override {
        return path.to_path_buf();
    }

    if let Some(env_dir) = env::var_os(ENV_DATA_DIR) {
        return PathBuf::from(env_dir);
    }

    PathBuf::from("data")
}

/// Returns the path to config.toml within the given data directory.
pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = BlurConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.blur_output_fps, "60");
        assert_eq!(cfg.blur_weighting, BlurWeighting::GaussianSym);
        assert_eq!(cfg.queue_capacity, 200);
        assert!(!cfg.has_color_adjustment());
    }

    #[test]
    fn every_preset_stays_valid() {
        for preset in [
            Preset::Gaming,
            Preset::Cinematic,
            Preset::Smooth,
            Preset::Fast,
            Preset::Quality,
        ] {
            let mut cfg = BlurConfig::default();
            preset.apply(&mut cfg);
            assert!(cfg.validate().is_ok(), "{preset}");
        }
    }

    #[test]
    fn fast_preset_disables_interpolation() {
        let mut cfg = BlurConfig::default();
        "FAST".parse::<Preset>().unwrap().apply(&mut cfg);
        assert!(!cfg.interpolate);
        assert_eq!(cfg.blur_weighting, BlurWeighting::Equal);
    }

    #[test]
    fn validation_reports_the_offending_field() {
        let cfg = BlurConfig {
            quality: 52,
            ..Default::default()
        };
        assert_eq!(
            cfg.validate().unwrap_err(),
            ConfigError::OutOfRange {
                field: "quality",
                expected: "between 0 and 51",
                value: "52".to_string(),
            }
        );

        let cfg = BlurConfig {
            interpolation_block_size: 12,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::OutOfRange {
                field: "interpolation_block_size",
                ..
            })
        ));

        let cfg = BlurConfig {
            timescale: 0.0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());

        let cfg = BlurConfig {
            blur_output_fps: "sixty".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::Invalid {
                field: "blur_output_fps",
                ..
            })
        ));
    }

    #[test]
    fn custom_weighting_requires_weights() {
        let cfg = BlurConfig {
            blur_weighting: BlurWeighting::Custom,
            ..Default::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::MissingCustomWeights));
    }

    #[test]
    fn enums_parse_from_config_names() {
        assert_eq!("hevc".parse::<VideoCodec>().unwrap(), VideoCodec::H265);
        assert_eq!("AMD".parse::<GpuVendor>().unwrap(), GpuVendor::Amd);
        assert_eq!("rife".parse::<InterpolationMethod>().unwrap(), InterpolationMethod::Mci);
        assert!("webm".parse::<Container>().is_err());
        assert_eq!(Container::Mkv.to_string(), "mkv");
    }

    #[test]
    fn json_overlay_keeps_unspecified_values() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{"blur_amount": 0.7, "blur_weighting": "vegas", "codec": "hevc"}"#,
        )
        .unwrap();

        let base = BlurConfig {
            quality: 30,
            ..Default::default()
        };
        let merged = base.merge_file(&path).expect("merge JSON config");
        assert_eq!(merged.blur_amount, 0.7);
        assert_eq!(merged.blur_weighting, BlurWeighting::Vegas);
        assert_eq!(merged.codec, VideoCodec::H265);
        assert_eq!(merged.quality, 30);
    }

    #[test]
    fn toml_roundtrip_through_data_dir_config() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = config_path(dir.path());
        let original = BlurConfig {
            deduplicate: true,
            custom_weights: vec![1.0, 2.0],
            ..Default::default()
        };
        original.save_to_path(&path).expect("save config");

        let loaded = BlurConfig::load_from_path(&path).expect("load config");
        assert_eq!(loaded, original);
    }

    #[test]
    fn missing_or_empty_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let missing = dir.path().join("absent.toml");
        assert_eq!(BlurConfig::load_from_path(&missing).unwrap(), BlurConfig::default());

        let empty = dir.path().join("empty.json");
        fs::write(&empty, "  \n").unwrap();
        assert_eq!(BlurConfig::load_from_path(&empty).unwrap(), BlurConfig::default());
    }

    #[test]
    fn unknown_enum_value_is_rejected() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"container": "webm"}"#).unwrap();
        let error = BlurConfig::default().merge_file(&path).unwrap_err();
        assert!(format!("{error:#}").contains("invalid settings"));
    }

    #[test]
    fn data_dir_uses_cli_override() {
        let result = data_dir(Some(Path::new("/custom")));
        assert_eq!(result, PathBuf::from("/custom"));
    }

    #[test]
    fn config_path_is_inside_data_dir() {
        assert_eq!(config_path(Path::new("/d")), PathBuf::from("/d/config.toml"));
    }
}
