use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;

use crate::error::{CortexError, CortexResult};
use crate::types::{OutreachChannel, TriggerKey};

/// Per-adapter enable flag and optional cadence override (minutes).
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub enabled: bool,
    pub cadence_minutes: Option<u64>,
    /// Upstream feed endpoint; empty means the adapter runs against an
    /// injected feed (tests) or stays idle.
    pub feed_url: Option<String>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cadence_minutes: None,
            feed_url: None,
        }
    }
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// External pub/sub mirror endpoint.
    pub redis_url: String,

    /// Global cadence for adapters that declare none (minutes).
    pub ingest_interval_minutes: u64,
    /// Adapter emission cap per poll.
    pub max_signals_per_batch: usize,

    /// Alert monitor sweep cadence (hours).
    pub alert_check_interval_hours: u64,
    /// Countdown thresholds in days, descending.
    pub alert_thresholds: Vec<u32>,

    pub default_outreach_channel: OutreachChannel,

    // LLM-assisted entity resolution (optional tier)
    pub llm_resolver_enabled: bool,
    pub llm_resolver_base_url: String,
    pub llm_resolver_model: String,

    /// Overrides for the six scoring weight keys.
    pub scoring_weights: BTreeMap<TriggerKey, f64>,

    // Bus tuning
    pub bus_queue_capacity: usize,
    pub publish_timeout_secs: u64,
    pub shutdown_grace_secs: u64,

    // Adapters
    pub court_docket: AdapterConfig,
    pub regulatory_calendar: AdapterConfig,
    pub talent_tracker: AdapterConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            ingest_interval_minutes: 180,
            max_signals_per_batch: 100,
            alert_check_interval_hours: 6,
            alert_thresholds: vec![30, 14, 7, 2],
            default_outreach_channel: OutreachChannel::Email,
            llm_resolver_enabled: false,
            llm_resolver_base_url: String::new(),
            llm_resolver_model: String::new(),
            scoring_weights: BTreeMap::new(),
            bus_queue_capacity: 256,
            publish_timeout_secs: 5,
            shutdown_grace_secs: 10,
            court_docket: AdapterConfig::default(),
            regulatory_calendar: AdapterConfig::default(),
            talent_tracker: AdapterConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables. Every field has a
    /// default; a set-but-unparsable variable is a configuration error
    /// (launcher exit code 1), never a silent fallback.
    pub fn from_env() -> CortexResult<Self> {
        let defaults = Config::default();

        let llm_resolver_enabled = parsed_env("LLM_RESOLVER_ENABLED", false)?;
        let llm_resolver_base_url = env::var("LLM_RESOLVER_BASE_URL").unwrap_or_default();
        if llm_resolver_enabled && llm_resolver_base_url.is_empty() {
            return Err(CortexError::Config(
                "LLM_RESOLVER_ENABLED is set but LLM_RESOLVER_BASE_URL is empty".into(),
            ));
        }

        Ok(Self {
            redis_url: env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            ingest_interval_minutes: parsed_env(
                "INGEST_INTERVAL_MINUTES",
                defaults.ingest_interval_minutes,
            )?,
            max_signals_per_batch: parsed_env(
                "MAX_SIGNALS_PER_BATCH",
                defaults.max_signals_per_batch,
            )?,
            alert_check_interval_hours: parsed_env(
                "ALERT_CHECK_INTERVAL_HOURS",
                defaults.alert_check_interval_hours,
            )?,
            alert_thresholds: parse_thresholds(env::var("ALERT_THRESHOLDS").ok())?,
            default_outreach_channel: parsed_env(
                "DEFAULT_OUTREACH_CHANNEL",
                defaults.default_outreach_channel,
            )?,
            llm_resolver_enabled,
            llm_resolver_base_url,
            llm_resolver_model: env::var("LLM_RESOLVER_MODEL").unwrap_or_default(),
            scoring_weights: parse_weights(env::var("SCORING_WEIGHTS").ok())?,
            bus_queue_capacity: parsed_env("BUS_QUEUE_CAPACITY", defaults.bus_queue_capacity)?,
            publish_timeout_secs: parsed_env(
                "BUS_PUBLISH_TIMEOUT_SECS",
                defaults.publish_timeout_secs,
            )?,
            shutdown_grace_secs: parsed_env("SHUTDOWN_GRACE_SECS", defaults.shutdown_grace_secs)?,
            court_docket: adapter_from_env("COURT_DOCKET")?,
            regulatory_calendar: adapter_from_env("REGULATORY_CALENDAR")?,
            talent_tracker: adapter_from_env("TALENT_TRACKER")?,
        })
    }
}

fn adapter_from_env(prefix: &str) -> CortexResult<AdapterConfig> {
    Ok(AdapterConfig {
        enabled: parsed_env(&format!("{prefix}_ENABLED"), true)?,
        cadence_minutes: optional_env(&format!("{prefix}_CADENCE_MINUTES"))?,
        feed_url: env::var(format!("{prefix}_FEED_URL")).ok(),
    })
}

fn parsed_env<T>(key: &str, default: T) -> CortexResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| CortexError::Config(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn optional_env<T>(key: &str) -> CortexResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| CortexError::Config(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Parse "30,14,7,2" into a descending, deduplicated threshold list.
fn parse_thresholds(raw: Option<String>) -> CortexResult<Vec<u32>> {
    let raw = match raw {
        Some(r) if !r.trim().is_empty() => r,
        _ => return Ok(vec![30, 14, 7, 2]),
    };
    let mut thresholds = Vec::new();
    for part in raw.split(',') {
        let days: u32 = part
            .trim()
            .parse()
            .map_err(|e| CortexError::Config(format!("ALERT_THRESHOLDS={raw}: {e}")))?;
        if days == 0 {
            return Err(CortexError::Config(
                "ALERT_THRESHOLDS must be positive day counts".into(),
            ));
        }
        thresholds.push(days);
    }
    thresholds.sort_unstable_by(|a, b| b.cmp(a));
    thresholds.dedup();
    Ok(thresholds)
}

/// Parse "urgency=5.0,strategic=2.0" into weight overrides.
fn parse_weights(raw: Option<String>) -> CortexResult<BTreeMap<TriggerKey, f64>> {
    let raw = match raw {
        Some(r) if !r.trim().is_empty() => r,
        _ => return Ok(BTreeMap::new()),
    };
    let mut weights = BTreeMap::new();
    for part in raw.split(',') {
        let (key, value) = part.split_once('=').ok_or_else(|| {
            CortexError::Config(format!("SCORING_WEIGHTS entry '{part}' is not key=value"))
        })?;
        let key: TriggerKey = key
            .trim()
            .parse()
            .map_err(|e| CortexError::Config(format!("SCORING_WEIGHTS: {e}")))?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|e| CortexError::Config(format!("SCORING_WEIGHTS {key}: {e}")))?;
        weights.insert(key, value);
    }
    Ok(weights)
}
