//! Engine configuration management via TOML files.
//!
//! Every section is optional; missing keys fall back to the defaults used by
//! the interactive viewer (approximate tier capped at rank 50 with the `fast`
//! preset, exact tier at full rank with the `balanced` preset).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decompose::{DecomposeOptions, Preset};
use crate::worker::MAX_APPROX_RANK;

/// Engine configuration loaded from a TOML file.
///
/// # Examples
///
/// ```
/// use lowrank_core::EngineConfig;
///
/// let config = EngineConfig::from_str("[exact]\npreset = \"precise\"").unwrap();
/// assert_eq!(config.approximate.rank_cap, Some(50));
/// assert_eq!(config.exact.options.max_iterations, 100);
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct EngineConfig {
    pub engine: EngineSettings,
    pub approximate: TierSettings,
    pub exact: TierSettings,
    pub cache: CacheSettings,
    pub grayscale: GrayscaleSettings,
    pub telemetry: TelemetrySettings,
}

impl EngineConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::from_str(&contents)
    }

    pub fn from_str(toml_str: &str) -> Result<Self, ConfigError> {
        let raw: RawEngineConfig =
            toml::from_str(toml_str).map_err(|err| ConfigError::Parse(err.to_string()))?;

        Ok(Self {
            engine: EngineSettings::try_from(&raw.engine)?,
            approximate: TierSettings::try_from("approximate", &raw.approximate)?,
            exact: TierSettings::try_from("exact", &raw.exact)?,
            cache: CacheSettings::try_from(&raw.cache)?,
            grayscale: GrayscaleSettings::try_from(&raw.grayscale)?,
            telemetry: TelemetrySettings {
                dir: raw.telemetry.dir.map(PathBuf::from),
            },
        })
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            approximate: TierSettings::approximate_default(),
            exact: TierSettings::exact_default(),
            cache: CacheSettings::default(),
            grayscale: GrayscaleSettings::default(),
            telemetry: TelemetrySettings::default(),
        }
    }
}

/// Process-level knobs shared by every channel.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSettings {
    /// Seed for the power-iteration start vectors. Each worker derives its own
    /// stream from this value so the six channels never share a sequence.
    pub seed: u64,
    /// Tile edge for the blocked reconstruction kernel
    pub block_size: usize,
    /// Capacity of the session update queue
    pub update_queue: usize,
    /// Initial colour mix in [0, 1]
    pub color_mix: f64,
}

impl EngineSettings {
    fn try_from(raw: &RawEngine) -> Result<Self, ConfigError> {
        if raw.block_size == 0 {
            return Err(ConfigError::Parse("engine.block_size must be ≥ 1".into()));
        }
        if raw.update_queue == 0 {
            return Err(ConfigError::Parse(
                "engine.update_queue must be ≥ 1".into(),
            ));
        }
        if !raw.color_mix.is_finite() || !(0.0..=1.0).contains(&raw.color_mix) {
            return Err(ConfigError::Parse(
                "engine.color_mix must lie in [0, 1]".into(),
            ));
        }

        Ok(Self {
            seed: raw.seed,
            block_size: raw.block_size,
            update_queue: raw.update_queue,
            color_mix: raw.color_mix,
        })
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            block_size: default_block_size(),
            update_queue: default_update_queue(),
            color_mix: default_color_mix(),
        }
    }
}

/// Decomposition settings for one accuracy tier.
#[derive(Debug, Clone, Serialize)]
pub struct TierSettings {
    pub preset: Preset,
    /// Upper bound on extracted components; `None` means `min(rows, cols)`
    pub rank_cap: Option<usize>,
    pub options: DecomposeOptions,
}

impl TierSettings {
    pub fn approximate_default() -> Self {
        Self {
            preset: Preset::Fast,
            rank_cap: Some(default_approx_rank_cap()),
            options: Preset::Fast.options(),
        }
    }

    pub fn exact_default() -> Self {
        Self {
            preset: Preset::Balanced,
            rank_cap: None,
            options: Preset::Balanced.options(),
        }
    }

    fn try_from(section: &str, raw: &RawTier) -> Result<Self, ConfigError> {
        let defaults = if section == "approximate" {
            Self::approximate_default()
        } else {
            Self::exact_default()
        };

        let preset = match &raw.preset {
            Some(name) => name
                .parse::<Preset>()
                .map_err(|err| ConfigError::Parse(format!("{section}.preset: {err}")))?,
            None => defaults.preset,
        };
        let base = preset.options();

        let rank_cap = match raw.rank_cap {
            Some(0) => {
                return Err(ConfigError::Parse(format!(
                    "{section}.rank_cap must be ≥ 1"
                )))
            }
            Some(cap) if section == "approximate" && cap > MAX_APPROX_RANK => {
                return Err(ConfigError::Parse(format!(
                    "{section}.rank_cap must be ≤ {MAX_APPROX_RANK}"
                )))
            }
            Some(cap) => Some(cap),
            None => defaults.rank_cap,
        };

        let max_iterations = raw.max_iterations.unwrap_or(base.max_iterations);
        if max_iterations == 0 {
            return Err(ConfigError::Parse(format!(
                "{section}.max_iterations must be ≥ 1"
            )));
        }
        let tolerance = raw.tolerance.unwrap_or(base.tolerance);
        if !tolerance.is_finite() || tolerance < 0.0 {
            return Err(ConfigError::Parse(format!(
                "{section}.tolerance must be finite and ≥ 0"
            )));
        }

        Ok(Self {
            preset,
            rank_cap,
            options: DecomposeOptions {
                max_iterations,
                tolerance,
            },
        })
    }

    /// Rank the tier extracts for an `rows × cols` matrix.
    pub fn effective_rank(&self, rows: usize, cols: usize) -> usize {
        let full = rows.min(cols);
        self.rank_cap.map_or(full, |cap| cap.min(full))
    }
}

/// Bounds for the injected factor cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSettings {
    pub capacity: usize,
    pub ttl: Duration,
}

impl CacheSettings {
    fn try_from(raw: &RawCache) -> Result<Self, ConfigError> {
        if raw.capacity == 0 {
            return Err(ConfigError::Parse("cache.capacity must be ≥ 1".into()));
        }
        Ok(Self {
            capacity: raw.capacity,
            ttl: Duration::from_secs(raw.ttl_secs),
        })
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl: Duration::from_secs(default_cache_ttl_secs()),
        }
    }
}

/// Sampling parameters for the grayscale heuristic.
#[derive(Debug, Clone, Serialize)]
pub struct GrayscaleSettings {
    /// Samples per axis
    pub grid: usize,
    /// Summed pairwise channel difference above which a sample counts as coloured
    pub channel_threshold: f64,
    /// Largest coloured fraction still classified as grayscale
    pub max_fraction: f64,
}

impl GrayscaleSettings {
    fn try_from(raw: &RawGrayscale) -> Result<Self, ConfigError> {
        if raw.grid == 0 {
            return Err(ConfigError::Parse("grayscale.grid must be ≥ 1".into()));
        }
        if !raw.channel_threshold.is_finite() || raw.channel_threshold < 0.0 {
            return Err(ConfigError::Parse(
                "grayscale.channel_threshold must be ≥ 0".into(),
            ));
        }
        if !raw.max_fraction.is_finite() || !(0.0..=1.0).contains(&raw.max_fraction) {
            return Err(ConfigError::Parse(
                "grayscale.max_fraction must lie in [0, 1]".into(),
            ));
        }
        Ok(Self {
            grid: raw.grid,
            channel_threshold: raw.channel_threshold,
            max_fraction: raw.max_fraction,
        })
    }
}

impl Default for GrayscaleSettings {
    fn default() -> Self {
        Self {
            grid: default_grayscale_grid(),
            channel_threshold: default_channel_threshold(),
            max_fraction: default_max_fraction(),
        }
    }
}

/// JSON-lines telemetry output; disabled when `dir` is `None`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TelemetrySettings {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct RawEngineConfig {
    #[serde(default)]
    engine: RawEngine,
    #[serde(default)]
    approximate: RawTier,
    #[serde(default)]
    exact: RawTier,
    #[serde(default)]
    cache: RawCache,
    #[serde(default)]
    grayscale: RawGrayscale,
    #[serde(default)]
    telemetry: RawTelemetry,
}

#[derive(Debug, Deserialize)]
struct RawEngine {
    #[serde(default = "default_seed")]
    seed: u64,
    #[serde(default = "default_block_size")]
    block_size: usize,
    #[serde(default = "default_update_queue")]
    update_queue: usize,
    #[serde(default = "default_color_mix")]
    color_mix: f64,
}

impl Default for RawEngine {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            block_size: default_block_size(),
            update_queue: default_update_queue(),
            color_mix: default_color_mix(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawTier {
    preset: Option<String>,
    rank_cap: Option<usize>,
    max_iterations: Option<usize>,
    tolerance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawCache {
    #[serde(default = "default_cache_capacity")]
    capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    ttl_secs: u64,
}

impl Default for RawCache {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawGrayscale {
    #[serde(default = "default_grayscale_grid")]
    grid: usize,
    #[serde(default = "default_channel_threshold")]
    channel_threshold: f64,
    #[serde(default = "default_max_fraction")]
    max_fraction: f64,
}

impl Default for RawGrayscale {
    fn default() -> Self {
        Self {
            grid: default_grayscale_grid(),
            channel_threshold: default_channel_threshold(),
            max_fraction: default_max_fraction(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct RawTelemetry {
    dir: Option<String>,
}

fn default_seed() -> u64 {
    42
}

fn default_block_size() -> usize {
    32
}

fn default_update_queue() -> usize {
    8
}

fn default_color_mix() -> f64 {
    1.0
}

fn default_approx_rank_cap() -> usize {
    MAX_APPROX_RANK
}

fn default_cache_capacity() -> usize {
    5
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_grayscale_grid() -> usize {
    16
}

fn default_channel_threshold() -> f64 {
    1.0
}

fn default_max_fraction() -> f64 {
    0.02
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "IO error: {}", err),
            ConfigError::Parse(err) => write!(f, "Parse error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        ConfigError::Io(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_sections_missing() {
        let config = EngineConfig::from_str("").unwrap();
        assert_eq!(config.engine.seed, 42);
        assert_eq!(config.engine.block_size, 32);
        assert_eq!(config.approximate.preset, Preset::Fast);
        assert_eq!(config.approximate.rank_cap, Some(50));
        assert_eq!(config.approximate.options.max_iterations, 20);
        assert_eq!(config.exact.preset, Preset::Balanced);
        assert_eq!(config.exact.rank_cap, None);
        assert_eq!(config.cache.capacity, 5);
        assert_eq!(config.cache.ttl, Duration::from_secs(600));
        assert_eq!(config.grayscale.grid, 16);
        assert!(config.telemetry.dir.is_none());
    }

    #[test]
    fn parses_full_document() {
        let toml = r#"
[engine]
seed = 7
block_size = 16
update_queue = 2
color_mix = 0.25

[approximate]
preset = "balanced"
rank_cap = 12
tolerance = 0.001

[exact]
preset = "precise"
rank_cap = 64
max_iterations = 150

[cache]
capacity = 3
ttl_secs = 30

[grayscale]
grid = 8
channel_threshold = 2.5
max_fraction = 0.1

[telemetry]
dir = "logs"
"#;
        let config = EngineConfig::from_str(toml).unwrap();
        assert_eq!(config.engine.seed, 7);
        assert_eq!(config.engine.block_size, 16);
        assert_eq!(config.engine.update_queue, 2);
        assert!((config.engine.color_mix - 0.25).abs() < f64::EPSILON);
        assert_eq!(config.approximate.preset, Preset::Balanced);
        assert_eq!(config.approximate.rank_cap, Some(12));
        assert_eq!(config.approximate.options.max_iterations, 50);
        assert!((config.approximate.options.tolerance - 0.001).abs() < f64::EPSILON);
        assert_eq!(config.exact.options.max_iterations, 150);
        assert_eq!(config.exact.rank_cap, Some(64));
        assert_eq!(config.cache.capacity, 3);
        assert_eq!(config.grayscale.grid, 8);
        assert_eq!(config.telemetry.dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn rejects_unknown_preset() {
        let result = EngineConfig::from_str("[exact]\npreset = \"jacobi\"");
        assert!(result.is_err());
    }

    #[test]
    fn rejects_out_of_range_color_mix() {
        assert!(EngineConfig::from_str("[engine]\ncolor_mix = 1.5").is_err());
    }

    #[test]
    fn rejects_zero_rank_cap() {
        assert!(EngineConfig::from_str("[approximate]\nrank_cap = 0").is_err());
    }

    #[test]
    fn approximate_rank_cap_is_bounded() {
        assert!(EngineConfig::from_str("[approximate]\nrank_cap = 51").is_err());
        let config = EngineConfig::from_str("[approximate]\nrank_cap = 50").unwrap();
        assert_eq!(config.approximate.rank_cap, Some(50));
        let config = EngineConfig::from_str("[exact]\nrank_cap = 400").unwrap();
        assert_eq!(config.exact.rank_cap, Some(400));
    }

    #[test]
    fn rejects_negative_tolerance() {
        assert!(EngineConfig::from_str("[exact]\ntolerance = -1.0").is_err());
    }

    #[test]
    fn effective_rank_respects_cap_and_shape() {
        let approx = TierSettings::approximate_default();
        assert_eq!(approx.effective_rank(200, 300), 50);
        assert_eq!(approx.effective_rank(20, 30), 20);
        let exact = TierSettings::exact_default();
        assert_eq!(exact.effective_rank(200, 300), 200);
    }
}
