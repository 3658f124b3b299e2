use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result as AnyResult, bail};
use clap::Parser;
use serde::Deserialize;
use tracing::warn;

use crate::series::{RenderArea, SeriesConfig};

pub const SCROLL_SPEED_RANGE: (f64, f64) = (0.001, 0.2);
pub const AMPLITUDE_RANGE: (f64, f64) = (0.1, 10.0);

#[derive(Parser, Clone, Debug)]
#[clap(name = "market-sim", about = "Scrolling simulated market charts with a paper trading panel")]
pub struct CliParams {
    /// Markets to simulate as NAME or NAME:MIN:MAX; comma separated or pass multiple times
    #[clap(
        short = 'm',
        long = "market",
        value_delimiter = ',',
        num_args = 1..,
        default_values = ["ALPHA", "BETA"]
    )]
    pub markets: Vec<MarketSpec>,

    /// JSON file with market presets; replaces --market when given
    #[clap(long = "markets-file", value_name = "PATH")]
    pub markets_file: Option<PathBuf>,

    /// Number of samples kept on each chart
    #[clap(long = "points", default_value_t = 100)]
    pub points: usize,

    /// Lower bound of the simulated price for markets without their own range
    #[clap(long = "min-y", default_value_t = 0.0, allow_negative_numbers = true)]
    pub min_y: f64,

    /// Upper bound of the simulated price for markets without their own range
    #[clap(long = "max-y", default_value_t = 10.0, allow_negative_numbers = true)]
    pub max_y: f64,

    /// Scroll speed factor (0.001 - 0.2); higher adds points more often
    #[clap(long = "scroll-speed", default_value_t = 0.02)]
    pub scroll_speed: f64,

    /// Random walk amplitude multiplier (0.1 - 10)
    #[clap(long = "amplitude", default_value_t = 1.0)]
    pub amplitude: f64,

    /// Background quad scale as SX:SY; one scale unit spans 10 chart units
    #[clap(long = "chart-scale", value_name = "SX:SY", default_value = "1.6:0.8")]
    pub chart_scale: ScaleSpec,

    /// Starting cash of the paper account
    #[clap(long = "balance", default_value_t = 1000.0)]
    pub balance: f64,

    /// Seed for reproducible price paths
    #[clap(long = "seed", env = "MARKET_SIM_SEED")]
    pub seed: Option<u64>,

    /// UI frame interval (e.g., 50ms, 1s)
    #[clap(long = "frame", value_name = "DURATION", default_value = "50ms")]
    pub frame: DurationSpec,

    /// Where tracing output is written
    #[clap(long = "log-file", value_name = "PATH", env = "MARKET_SIM_LOG")]
    pub log_file: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MarketSpec {
    pub name: String,
    pub range: Option<(f64, f64)>,
}

impl FromStr for MarketSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let name = parts
            .next()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| "market spec must include a name".to_string())?;
        let range = match (parts.next(), parts.next()) {
            (None, _) => None,
            (Some(min), Some(max)) => Some((
                parse_bound(min, "lower")?,
                parse_bound(max, "upper")?,
            )),
            (Some(_), None) => {
                return Err("market spec range must be NAME:MIN:MAX".to_string());
            }
        };
        if parts.next().is_some() {
            return Err("market spec should only have NAME:MIN:MAX".to_string());
        }
        Ok(MarketSpec {
            name: name.to_string(),
            range,
        })
    }
}

impl fmt::Display for MarketSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range {
            Some((min, max)) => write!(f, "{}:{}:{}", self.name, min, max),
            None => write!(f, "{}", self.name),
        }
    }
}

fn parse_bound(value: &str, which: &str) -> Result<f64, String> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid {which} bound: {value}"))
}

/// Quad scale; not validated here so a bad value reaches the chart as a
/// configuration error instead of aborting startup.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScaleSpec {
    pub x: f64,
    pub y: f64,
}

impl FromStr for ScaleSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(':')
            .ok_or_else(|| "chart scale must be SX:SY".to_string())?;
        let x = x
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid horizontal scale: {x}"))?;
        let y = y
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid vertical scale: {y}"))?;
        Ok(ScaleSpec { x, y })
    }
}

#[derive(Copy, Clone, Debug)]
pub struct DurationSpec(Duration);

impl DurationSpec {
    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for DurationSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let duration = parse_duration_spec(s)?;
        Ok(DurationSpec(duration))
    }
}

fn parse_duration_spec(input: &str) -> Result<Duration, String> {
    let text = input.trim();
    let unit_start = text
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(text.len());
    let (amount, unit) = text.split_at(unit_start);
    if amount.trim().is_empty() {
        return Err(format!("frame interval `{text}` needs a number, e.g. 50ms"));
    }
    let amount: f64 = amount
        .trim()
        .parse()
        .map_err(|_| format!("frame interval `{text}` does not start with a number"))?;
    let scale = match unit.to_ascii_lowercase().as_str() {
        "ms" => 0.001,
        "s" => 1.0,
        "m" => 60.0,
        "" => return Err(format!("frame interval `{text}` needs a unit: ms, s or m")),
        other => return Err(format!("unknown frame interval unit `{other}`, use ms, s or m")),
    };
    let seconds = amount * scale;
    if !seconds.is_finite() || seconds <= 0.0 {
        return Err(format!("frame interval `{text}` must be positive"));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| format!("frame interval `{text}` is too long"))
}

/// Per-market setup, fixed for the lifetime of the run.
#[derive(Clone, Debug, PartialEq)]
pub struct MarketConfig {
    pub name: String,
    pub series: SeriesConfig,
    pub scroll_speed: f64,
    pub amplitude: f64,
}

#[derive(Debug, Deserialize)]
struct MarketsFile {
    markets: Vec<MarketPreset>,
}

#[derive(Debug, Deserialize)]
struct MarketPreset {
    name: String,
    #[serde(default)]
    min_y: Option<f64>,
    #[serde(default)]
    max_y: Option<f64>,
    #[serde(default)]
    scroll_speed: Option<f64>,
    #[serde(default)]
    amplitude: Option<f64>,
}

fn load_presets(path: &Path) -> AnyResult<Vec<MarketPreset>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    parse_presets(&contents).with_context(|| format!("cannot parse {}", path.display()))
}

fn parse_presets(contents: &str) -> AnyResult<Vec<MarketPreset>> {
    let file: MarketsFile = serde_json::from_str(contents)?;
    Ok(file.markets)
}

impl CliParams {
    pub fn frame_interval(&self) -> Duration {
        self.frame.as_duration()
    }

    pub fn render_area(&self) -> RenderArea {
        RenderArea::from_quad_scale(self.chart_scale.x, self.chart_scale.y)
    }

    pub fn market_configs(&self) -> AnyResult<Vec<MarketConfig>> {
        let presets = match &self.markets_file {
            Some(path) => load_presets(path)?,
            None => self
                .markets
                .iter()
                .map(|spec| MarketPreset {
                    name: spec.name.clone(),
                    min_y: spec.range.map(|(min, _)| min),
                    max_y: spec.range.map(|(_, max)| max),
                    scroll_speed: None,
                    amplitude: None,
                })
                .collect(),
        };
        self.build_configs(presets)
    }

    fn build_configs(&self, presets: Vec<MarketPreset>) -> AnyResult<Vec<MarketConfig>> {
        if presets.is_empty() {
            bail!("at least one market is required");
        }
        let mut seen = HashSet::new();
        let mut configs = Vec::with_capacity(presets.len());
        for preset in presets {
            let name = preset.name.trim().to_string();
            if name.is_empty() {
                bail!("market names cannot be empty");
            }
            if !seen.insert(name.clone()) {
                bail!("market `{name}` is configured twice");
            }
            let series = SeriesConfig {
                point_count: self.points,
                logical_min_y: preset.min_y.unwrap_or(self.min_y),
                logical_max_y: preset.max_y.unwrap_or(self.max_y),
            };
            series
                .validate()
                .with_context(|| format!("invalid chart settings for market `{name}`"))?;
            let scroll_speed = clamp_setting(
                &name,
                "scroll speed",
                preset.scroll_speed.unwrap_or(self.scroll_speed),
                SCROLL_SPEED_RANGE,
            );
            let amplitude = clamp_setting(
                &name,
                "amplitude",
                preset.amplitude.unwrap_or(self.amplitude),
                AMPLITUDE_RANGE,
            );
            configs.push(MarketConfig {
                name,
                series,
                scroll_speed,
                amplitude,
            });
        }
        Ok(configs)
    }
}

fn clamp_setting(market: &str, setting: &str, value: f64, (min, max): (f64, f64)) -> f64 {
    if !value.is_finite() {
        warn!(market, setting, "not a number, using the lower bound {min}");
        return min;
    }
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!(market, setting, value, clamped, "setting outside its range, clamped");
    }
    clamped
}
