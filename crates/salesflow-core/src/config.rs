//! Pipeline configuration: an optional TOML file layered under environment
//! overrides. Every field has a default so an empty file (or none) is valid.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::schedule::Cadence;

pub const DEFAULT_CONFIG_FILE: &str = "salesflow.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub artifacts: ArtifactConfig,
    pub schedule: ScheduleConfig,
    pub charts: ChartConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Key into the connection registry, see [`DatabaseConfig::resolve_url`].
    pub connection_id: String,
    pub url: Option<String>,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection_id: "postgres_conn".to_string(),
            url: None,
            max_connections: 5,
            acquire_timeout_secs: 10,
        }
    }
}

impl DatabaseConfig {
    /// Environment variable consulted for this connection id, e.g.
    /// `postgres_conn` -> `SALESFLOW_CONN_POSTGRES_CONN`.
    pub fn registry_var(&self) -> String {
        let key: String = self
            .connection_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("SALESFLOW_CONN_{key}")
    }

    /// Resolve the connection URL: explicit `url`, then the registry
    /// variable for `connection_id`, then `DATABASE_URL`.
    pub fn resolve_url(&self) -> Result<String> {
        self.resolve_url_with(|name| env::var(name).ok())
    }

    pub(crate) fn resolve_url_with<F>(&self, lookup: F) -> Result<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = self.url.as_ref().filter(|u| !u.trim().is_empty()) {
            return Ok(url.clone());
        }

        let registry_var = self.registry_var();
        lookup(&registry_var)
            .or_else(|| lookup("DATABASE_URL"))
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::Config(format!(
                    "no database URL for connection '{}': set database.url, {} or DATABASE_URL",
                    self.connection_id, registry_var
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    pub output_dir: PathBuf,
    pub raw_extract: String,
    pub daily_revenue: String,
    pub top_products: String,
    pub daily_revenue_chart: String,
    pub top_products_chart: String,
    pub run_report: String,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            raw_extract: "fetch_sales_data.csv".to_string(),
            daily_revenue: "daily_revenue.csv".to_string(),
            top_products: "top5_products.csv".to_string(),
            daily_revenue_chart: "total_revenue.png".to_string(),
            top_products_chart: "top5_products.png".to_string(),
            run_report: "run_report.json".to_string(),
        }
    }
}

impl ArtifactConfig {
    pub fn paths(&self) -> ArtifactPaths {
        let dir = &self.output_dir;
        ArtifactPaths {
            raw_extract: dir.join(&self.raw_extract),
            daily_revenue: dir.join(&self.daily_revenue),
            top_products: dir.join(&self.top_products),
            daily_revenue_chart: dir.join(&self.daily_revenue_chart),
            top_products_chart: dir.join(&self.top_products_chart),
            run_report: dir.join(&self.run_report),
        }
    }
}

/// Resolved locations of every artifact a run reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub raw_extract: PathBuf,
    pub daily_revenue: PathBuf,
    pub top_products: PathBuf,
    pub daily_revenue_chart: PathBuf,
    pub top_products_chart: PathBuf,
    pub run_report: PathBuf,
}

impl ArtifactPaths {
    /// The tabular artifacts, in the order they are produced.
    pub fn tables(&self) -> [(&'static str, &Path); 3] {
        [
            ("raw_extract", self.raw_extract.as_path()),
            ("daily_revenue", self.daily_revenue.as_path()),
            ("top_products", self.top_products.as_path()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub dag_id: String,
    pub cadence: Cadence,
    pub catchup: bool,
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            dag_id: "daily_total_revenue_analysis".to_string(),
            cadence: Cadence::Weekly,
            catchup: false,
            retries: 1,
            retry_delay_secs: 120,
        }
    }
}

impl ScheduleConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub width: u32,
    pub height: u32,
    pub font_path: Option<PathBuf>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 600,
            font_path: None,
        }
    }
}

impl PipelineConfig {
    /// Load configuration for the CLI. An explicit path must exist; otherwise
    /// `SALESFLOW_CONFIG` or `./salesflow.toml` is used when present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let candidate = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => env::var("SALESFLOW_CONFIG")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                    default.exists().then_some(default)
                }),
        };

        let mut config = match candidate {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            PipelineError::Config(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup("SALESFLOW_OUTPUT_DIR") {
            self.artifacts.output_dir = PathBuf::from(dir);
        }
        if let Some(font) = lookup("SALESFLOW_FONT_PATH") {
            self.charts.font_path = Some(PathBuf::from(font));
        }
        if let Some(retries) = lookup("SALESFLOW_RETRIES") {
            self.schedule.retries = parse_override("SALESFLOW_RETRIES", &retries)?;
        }
        if let Some(delay) = lookup("SALESFLOW_RETRY_DELAY_SECS") {
            self.schedule.retry_delay_secs = parse_override("SALESFLOW_RETRY_DELAY_SECS", &delay)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.charts.width == 0 || self.charts.height == 0 {
            return Err(PipelineError::Config(format!(
                "chart size must be non-zero, got {}x{}",
                self.charts.width, self.charts.height
            )));
        }
        if self.database.max_connections == 0 {
            return Err(PipelineError::Config(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if self.schedule.dag_id.trim().is_empty() {
            return Err(PipelineError::Config("schedule.dag_id is empty".to_string()));
        }
        if self.schedule.catchup {
            return Err(PipelineError::Config(
                "schedule.catchup = true is not supported; missed intervals are never replayed"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn artifact_paths(&self) -> ArtifactPaths {
        self.artifacts.paths()
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{name} has invalid value '{raw}'")))
}
