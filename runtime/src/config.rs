//! Run configuration loaded from TOML.
//!
//! Every section is optional; missing keys fall back to the defaults below.
//! CLI flags override individual values after loading.

use crate::geo::MAX_ZOOM;
use crate::region::{Region, RegionSpec};
use crate::tiles::{REFERENCE_OVERLAY_URL, WORLD_IMAGERY_URL};
use crate::trace::{FollowLimits, FollowSettings, DEFAULT_EPSILON};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_url_template() -> String {
    WORLD_IMAGERY_URL.to_string()
}
fn default_zoom() -> u8 { 18 }
fn default_tile_count() -> u32 { 11 }
fn default_max_concurrent() -> usize { 8 }
fn default_min_delay_ms() -> u64 { 0 }
fn default_timeout_secs() -> u64 { 30 }
fn default_tile_ttl_hours() -> u64 { 7 * 24 }

fn default_max_depth() -> u32 { 50 }
fn default_max_visited() -> usize { 50 }
fn default_epsilon() -> f64 { DEFAULT_EPSILON }
fn default_workers() -> usize { 1 }
fn default_true() -> bool { true }

fn default_confidence() -> f32 { 0.25 }
fn default_iou() -> f32 { 0.45 }
fn default_input_size() -> u32 { 640 }
fn default_class_names() -> Vec<String> {
    vec!["tower".to_string()]
}
fn default_font_size() -> f32 { 32.0 }
fn default_label_color() -> [u8; 3] { [255, 255, 255] }

fn default_level() -> String {
    "info".to_string()
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("out")
}

/// Where imagery comes from and how it is fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImagerySettings {
    /// `{z}`, `{y}`, `{x}` template, or a base URL that gets `/{z}/{y}/{x}`.
    #[serde(default = "default_url_template")]
    pub url_template: String,
    /// Label overlay composited by the proxy server.
    #[serde(default)]
    pub overlay_template: Option<String>,
    #[serde(default = "default_zoom")]
    pub zoom: u8,
    /// Odd tiles per chip side.
    #[serde(default = "default_tile_count")]
    pub tile_count: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_tile_ttl_hours")]
    pub tile_ttl_hours: u64,
    /// Defaults to the platform cache directory.
    #[serde(default)]
    pub cache_path: Option<PathBuf>,
    #[serde(default)]
    pub no_cache: bool,
}

impl Default for ImagerySettings {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
            overlay_template: None,
            zoom: default_zoom(),
            tile_count: default_tile_count(),
            max_concurrent: default_max_concurrent(),
            min_delay_ms: default_min_delay_ms(),
            timeout_secs: default_timeout_secs(),
            tile_ttl_hours: default_tile_ttl_hours(),
            cache_path: None,
            no_cache: false,
        }
    }
}

impl ImagerySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn tile_ttl(&self) -> Duration {
        Duration::from_secs(self.tile_ttl_hours * 60 * 60)
    }

    /// The configured overlay, or the public reference overlay.
    pub fn overlay_or_default(&self) -> String {
        self.overlay_template
            .clone()
            .unwrap_or_else(|| REFERENCE_OVERLAY_URL.to_string())
    }
}

/// Traversal caps and fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FollowConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "default_max_visited")]
    pub max_visited: usize,
    /// Degrees on each axis under which two coordinates are the same.
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    /// Facilities traced concurrently.
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_true")]
    pub write_chips: bool,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_visited: default_max_visited(),
            epsilon: default_epsilon(),
            workers: default_workers(),
            write_chips: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DetectorSettings {
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default = "default_iou")]
    pub iou: f32,
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_class_names")]
    pub class_names: Vec<String>,
    #[serde(default = "default_font_size")]
    pub font_size: f32,
    /// TTF used for labels; system fonts are searched when unset.
    #[serde(default)]
    pub font_path: Option<PathBuf>,
    /// Label text color as RGB; the border color follows from its luminance.
    #[serde(default = "default_label_color")]
    pub label_color: [u8; 3],
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            iou: default_iou(),
            input_size: default_input_size(),
            class_names: default_class_names(),
            font_size: default_font_size(),
            font_path: None,
            label_color: default_label_color(),
        }
    }
}

impl DetectorSettings {
    pub fn yolo_config(&self) -> towerline_vision::YoloConfig {
        towerline_vision::YoloConfig {
            input_size: self.input_size,
            confidence_threshold: self.confidence,
            iou_threshold: self.iou,
            class_names: self.class_names.clone(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingSettings {
    /// `trace`, `debug`, `info`, `warn` or `error`; `RUST_LOG` wins when set.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
        }
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// YOLO ONNX export.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default)]
    pub facilities_csv: Option<PathBuf>,
    #[serde(default)]
    pub region: Option<RegionSpec>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub imagery: ImagerySettings,
    #[serde(default)]
    pub follow: FollowConfig,
    #[serde(default)]
    pub detector: DetectorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_path: None,
            facilities_csv: None,
            region: None,
            output_dir: default_output_dir(),
            imagery: ImagerySettings::default(),
            follow: FollowConfig::default(),
            detector: DetectorSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate. Relative paths are resolved against the file's
    /// directory.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let mut config =
            Self::from_toml(&text).with_context(|| format!("in {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        if let Some(p) = self.model_path.as_mut() {
            fix(p);
        }
        if let Some(p) = self.facilities_csv.as_mut() {
            fix(p);
        }
        if let Some(p) = self.detector.font_path.as_mut() {
            fix(p);
        }
        if let Some(p) = self.imagery.cache_path.as_mut() {
            fix(p);
        }
        fix(&mut self.output_dir);
        if let Some(RegionSpec::Text(text)) = self.region.as_mut() {
            let lower = text.trim().to_ascii_lowercase();
            if (lower.ends_with(".geojson") || lower.ends_with(".json")) && Path::new(text.trim()).is_relative() {
                *text = base.join(text.trim()).display().to_string();
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        let imagery = &self.imagery;
        if imagery.zoom > MAX_ZOOM {
            bail!("imagery.zoom must be at most {MAX_ZOOM}, got {}", imagery.zoom);
        }
        if imagery.tile_count == 0 || imagery.tile_count % 2 == 0 {
            bail!("imagery.tile_count must be odd and positive, got {}", imagery.tile_count);
        }
        if imagery.max_concurrent == 0 {
            bail!("imagery.max_concurrent must be positive");
        }
        if imagery.url_template.trim().is_empty() {
            bail!("imagery.url_template is empty");
        }
        if self.follow.max_depth == 0 || self.follow.max_visited == 0 {
            bail!("follow.max_depth and follow.max_visited must be positive");
        }
        if !(self.follow.epsilon > 0.0) {
            bail!("follow.epsilon must be positive");
        }
        if self.follow.workers == 0 {
            bail!("follow.workers must be positive");
        }
        if !(0.0..=1.0).contains(&self.detector.confidence) || !(0.0..=1.0).contains(&self.detector.iou) {
            bail!("detector.confidence and detector.iou must lie in [0, 1]");
        }
        if self.detector.input_size == 0 || self.detector.input_size % 32 != 0 {
            bail!("detector.input_size must be a positive multiple of 32");
        }
        if self.detector.class_names.is_empty() {
            bail!("detector.class_names is empty");
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!("logging.level must be one of {}", valid_levels.join(", "));
        }
        Ok(())
    }

    /// Parse the region, if one is configured.
    pub fn region(&self) -> Result<Option<Region>> {
        self.region
            .as_ref()
            .map(|spec| Region::from_spec(spec).context("invalid region"))
            .transpose()
    }

    pub fn follow_settings(&self) -> FollowSettings {
        FollowSettings {
            zoom: self.imagery.zoom,
            tile_count: self.imagery.tile_count,
            limits: FollowLimits {
                max_depth: self.follow.max_depth,
                max_visited: self.follow.max_visited,
            },
            epsilon: self.follow.epsilon,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.imagery.zoom, 18);
        assert_eq!(config.imagery.tile_count, 11);
        assert_eq!(config.follow_settings().limits, FollowLimits::default());
        assert_eq!(config.imagery.url_template, WORLD_IMAGERY_URL);
    }

    #[test]
    fn test_full_config() {
        let text = r#"
            model_path = "models/tower.onnx"
            facilities_csv = "plants.csv"
            region = [-82.9657830472, 7.2205414901, -77.2425664944, 9.61161001224]
            output_dir = "chips"

            [imagery]
            zoom = 17
            tile_count = 7
            min_delay_ms = 100

            [follow]
            max_depth = 10
            workers = 4

            [detector]
            confidence = 0.5
            class_names = ["tower", "substation"]
            label_color = [255, 255, 0]

            [logging]
            level = "debug"
            json = true
        "#;
        let config = Config::from_toml(text).unwrap();
        assert_eq!(config.imagery.zoom, 17);
        assert_eq!(config.imagery.max_concurrent, 8);
        assert_eq!(config.follow.max_visited, 50);
        assert_eq!(config.follow.workers, 4);
        assert_eq!(config.detector.yolo_config().class_names.len(), 2);
        assert_eq!(config.detector.label_color, [255, 255, 0]);
        assert!(config.logging.json);
        assert!(config.region().unwrap().is_some());
    }

    #[test]
    fn test_validation_failures() {
        for text in [
            "[imagery]\ntile_count = 4",
            "[imagery]\ntile_count = 0",
            "[imagery]\nzoom = 23",
            "[follow]\nmax_depth = 0",
            "[follow]\nworkers = 0",
            "[detector]\nconfidence = 1.5",
            "[detector]\ninput_size = 100",
            "[logging]\nlevel = \"loud\"",
            "[imagery]\nzom = 18",
        ] {
            assert!(Config::from_toml(text).is_err(), "accepted: {text}");
        }
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.toml");
        std::fs::write(
            &path,
            "facilities_csv = \"plants.csv\"\nregion = \"area.geojson\"\n",
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.facilities_csv.unwrap(), dir.path().join("plants.csv"));
        assert_eq!(config.output_dir, dir.path().join("out"));
        assert_eq!(
            config.region,
            Some(RegionSpec::Text(dir.path().join("area.geojson").display().to_string()))
        );
    }

    #[test]
    fn test_round_trips_through_toml() {
        let text = toml::to_string_pretty(&Config::default()).unwrap();
        assert_eq!(Config::from_toml(&text).unwrap(), Config::default());
    }
}
