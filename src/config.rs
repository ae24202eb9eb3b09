use crate::error::ConfigError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "waygate.yml";
pub const DEFAULT_LOG_FILTER: &str = "waygate=info";

#[derive(Debug)]
pub struct AppConfig {
    pub root: PathBuf,
    pub config_path: PathBuf,
    pub log_filter: String,
}

impl AppConfig {
    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        if args.len() < 2 {
            return Err(ConfigError::Usage(
                "usage: waygate <data-root> [config-file]".to_string(),
            ));
        }

        let root = Path::new(&args[1]).to_path_buf();
        let config_path = if args.len() > 2 {
            PathBuf::from(&args[2])
        } else {
            non_empty_env("WAYGATE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| root.join(DEFAULT_CONFIG_FILE))
        };
        let log_filter =
            non_empty_env("WAYGATE_LOG").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        Ok(Self {
            root,
            config_path,
            log_filter,
        })
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Timing for one command key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct CommandTiming {
    pub cooldown_seconds: u64,
    pub warmup_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BackConfig {
    pub max_history: usize,
    pub on_death: bool,
    /// Player documents kept in memory.
    pub cache_capacity: usize,
}

impl Default for BackConfig {
    fn default() -> Self {
        Self {
            max_history: 5,
            on_death: true,
            cache_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TpaConfig {
    pub timeout_seconds: u64,
    /// 0 disables the periodic sweep of expired requests.
    pub sweep_interval_seconds: u64,
}

impl Default for TpaConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            sweep_interval_seconds: 5,
        }
    }
}

impl TpaConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Distance band for random teleports, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct RtpRange {
    pub min_range: f64,
    pub max_range: f64,
}

impl RtpRange {
    /// Clamp to non-negative finite values with `min <= max`.
    pub fn new(min_range: f64, max_range: f64) -> Self {
        let clean = |value: f64| if value.is_finite() { value.max(0.0) } else { 0.0 };
        let min_range = clean(min_range);
        let max_range = clean(max_range).max(min_range);
        Self {
            min_range,
            max_range,
        }
    }

    pub fn contains(&self, distance: f64) -> bool {
        distance >= self.min_range && distance <= self.max_range
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RtpConfig {
    pub min_range: f64,
    pub max_range: f64,
    pub worlds: HashMap<String, RtpRange>,
    pub max_attempts: usize,
    pub min_surface_y: i32,
    pub chunk_load_timeout_ms: u64,
    pub center_x: f64,
    pub center_z: f64,
    pub center_on_player: bool,
}

impl Default for RtpConfig {
    fn default() -> Self {
        Self {
            min_range: 100.0,
            max_range: 5000.0,
            worlds: HashMap::new(),
            max_attempts: 10,
            min_surface_y: 50,
            chunk_load_timeout_ms: 2000,
            center_x: 0.0,
            center_z: 0.0,
            center_on_player: false,
        }
    }
}

impl RtpConfig {
    pub fn default_range(&self) -> RtpRange {
        RtpRange::new(self.min_range, self.max_range)
    }

    pub fn range_for_world(&self, world: &str) -> RtpRange {
        self.worlds
            .get(world)
            .map(|range| RtpRange::new(range.min_range, range.max_range))
            .unwrap_or_else(|| self.default_range())
    }

    pub fn chunk_load_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_load_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TeleportConfig {
    /// Blocks a player may drift during a warmup before it is cancelled.
    pub movement_tolerance: f64,
    /// Entries are merged over the built-in timings, field by field.
    #[serde(deserialize_with = "merge_command_timings")]
    pub commands: HashMap<String, CommandTiming>,
    pub back: BackConfig,
    pub tpa: TpaConfig,
    pub rtp: RtpConfig,
}

impl Default for TeleportConfig {
    fn default() -> Self {
        Self {
            movement_tolerance: 1.0,
            commands: default_command_timings(),
            back: BackConfig::default(),
            tpa: TpaConfig::default(),
            rtp: RtpConfig::default(),
        }
    }
}

fn default_command_timings() -> HashMap<String, CommandTiming> {
    let timing = |cooldown_seconds, warmup_seconds| CommandTiming {
        cooldown_seconds,
        warmup_seconds,
    };
    [
        ("home", timing(0, 3)),
        ("warp", timing(0, 3)),
        ("spawn", timing(0, 3)),
        ("back", timing(0, 0)),
        ("tpa", timing(0, 3)),
        ("tpahere", timing(0, 3)),
        ("rtp", timing(30, 3)),
    ]
    .into_iter()
    .map(|(key, timing)| (key.to_string(), timing))
    .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CommandTimingOverride {
    cooldown_seconds: Option<u64>,
    warmup_seconds: Option<u64>,
}

fn merge_command_timings<'de, D>(
    deserializer: D,
) -> Result<HashMap<String, CommandTiming>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let overrides: Option<HashMap<String, Option<CommandTimingOverride>>> =
        Option::deserialize(deserializer)?;
    let mut commands = default_command_timings();
    for (key, entry) in overrides.unwrap_or_default() {
        let entry = entry.unwrap_or_default();
        let timing = commands.entry(key.to_ascii_lowercase()).or_default();
        if let Some(cooldown) = entry.cooldown_seconds {
            timing.cooldown_seconds = cooldown;
        }
        if let Some(warmup) = entry.warmup_seconds {
            timing.warmup_seconds = warmup;
        }
    }
    Ok(commands)
}

impl TeleportConfig {
    /// Load from a YAML file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "config file missing, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(data: &str) -> Result<Self, serde_yaml::Error> {
        if data.trim().is_empty() {
            return Ok(Self::default());
        }
        let parsed: Self = serde_yaml::from_str(data)?;
        Ok(parsed.normalized())
    }

    pub fn normalized(mut self) -> Self {
        if !self.movement_tolerance.is_finite() || self.movement_tolerance < 0.0 {
            self.movement_tolerance = Self::default().movement_tolerance;
        }
        self.back.max_history = self.back.max_history.max(1);
        self.back.cache_capacity = self.back.cache_capacity.max(1);
        self.rtp.max_attempts = self.rtp.max_attempts.max(1);
        let range = self.rtp.default_range();
        self.rtp.min_range = range.min_range;
        self.rtp.max_range = range.max_range;
        for range in self.rtp.worlds.values_mut() {
            *range = RtpRange::new(range.min_range, range.max_range);
        }
        self
    }

    pub fn timing(&self, command: &str) -> CommandTiming {
        self.commands.get(command).copied().unwrap_or_default()
    }

    pub fn cooldown(&self, command: &str) -> Duration {
        Duration::from_secs(self.timing(command).cooldown_seconds)
    }

    pub fn warmup(&self, command: &str) -> Duration {
        Duration::from_secs(self.timing(command).warmup_seconds)
    }

    /// Per-command cooldowns, keyed by command name.
    pub fn cooldowns(&self) -> HashMap<String, Duration> {
        self.commands
            .iter()
            .map(|(key, timing)| (key.clone(), Duration::from_secs(timing.cooldown_seconds)))
            .collect()
    }
}
