use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::query::{Filters, Query, QueryError};

const SETTINGS_FILE: &str = "otomoto";
const ENV_PREFIX: &str = "OTOMOTO";

/// Runtime settings: built-in defaults, then `otomoto.toml`, then `OTOMOTO_*` env vars.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub delay_min_secs: f64,
    pub delay_max_secs: f64,
    pub max_pages: u32,
    pub max_pages_manual: u32,
    pub concurrency: usize,
    pub save_snapshots: bool,
    pub no_progress: bool,
    pub log_file: PathBuf,
}

impl Settings {
    pub fn load() -> Result<Self> {
        let config = defaults()?
            .add_source(config::File::with_name(SETTINGS_FILE).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("failed to read settings")?;
        Ok(config.try_deserialize()?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn delay_range(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f64(self.delay_min_secs.max(0.0)),
            Duration::from_secs_f64(self.delay_max_secs.max(0.0)),
        )
    }

    pub fn query_set_path(&self) -> PathBuf {
        self.data_dir.join("json_parm").join("config.json")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("html_snapshots")
    }

    pub fn raw_csv_dir(&self) -> PathBuf {
        self.data_dir.join("raw_csv")
    }

    pub fn processed_csv_dir(&self) -> PathBuf {
        self.data_dir.join("processed_csv")
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>> {
    Ok(Config::builder()
        .set_default("data_dir", "data")?
        .set_default("request_timeout_secs", 15_i64)?
        .set_default("delay_min_secs", 1.0)?
        .set_default("delay_max_secs", 2.0)?
        .set_default("max_pages", 10_i64)?
        .set_default("max_pages_manual", 20_i64)?
        .set_default("concurrency", 1_i64)?
        .set_default("save_snapshots", false)?
        .set_default("no_progress", false)?
        .set_default("log_file", "logs/scraper.log")?)
}

/// The query-set file: a list of cars plus filter arguments shared by all of them.
/// Any key in a car entry overrides the same key in `base_args`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    pub cars: Vec<Map<String, Value>>,
    #[serde(default)]
    pub base_args: Map<String, Value>,
}

#[derive(Deserialize)]
struct QueryArgs {
    brand: String,
    model: String,
    #[serde(flatten)]
    filters: Filters,
}

impl ScrapeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("invalid query set in {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
    }

    /// One entry per car, labelled for logging, in file order.
    pub fn queries(&self) -> Vec<(String, Result<Query, QueryError>)> {
        self.cars
            .iter()
            .enumerate()
            .map(|(i, car)| {
                let mut args = self.base_args.clone();
                args.extend(car.iter().map(|(k, v)| (k.clone(), v.clone())));
                let label = car_label(i, &args);
                (label, build_query(args))
            })
            .collect()
    }
}

fn car_label(index: usize, args: &Map<String, Value>) -> String {
    match (
        args.get("brand").and_then(Value::as_str),
        args.get("model").and_then(Value::as_str),
    ) {
        (Some(brand), Some(model)) => format!("{} {}", brand, model),
        _ => format!("car #{}", index + 1),
    }
}

fn build_query(args: Map<String, Value>) -> Result<Query, QueryError> {
    let parsed: QueryArgs = serde_json::from_value(Value::Object(args))
        .map_err(|e| QueryError::InvalidArgs(e.to_string()))?;
    Query::new(&parsed.brand, &parsed.model, parsed.filters)
}

// ── Tests ──
