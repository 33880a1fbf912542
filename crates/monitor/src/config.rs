//! Monitor configuration
//!
//! Loaded once at startup from a YAML file (`CONFIG_PATH`, default
//! `config/config.yaml`), then overlaid with `PODWATCH__<SECTION>__<KEY>`
//! environment variables and the `API_BASE_URL` / `K8S_NAMESPACE` shortcuts.

use anyhow::{anyhow, bail, Context, Result};
use monitor_lib::analyzer::{parse_cpu_nanocores, parse_memory_bytes};
use monitor_lib::coordinator::CoordinatorConfig;
use monitor_lib::{watcher, EndpointSpec, ProberConfig, ThresholdBand, Thresholds};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.yaml";

/// Complete monitor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    pub api: ApiSection,
    #[serde(default)]
    pub monitoring: MonitoringSection,
    pub kubernetes: KubernetesSection,
    #[serde(default)]
    pub thresholds: ThresholdsSection,
    #[serde(default)]
    pub logs: LogsSection,
    #[serde(default)]
    pub alerting: AlertingSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Monitored API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiSection {
    /// Service name used in logs and alerts (default: base URL host)
    #[serde(default)]
    pub name: Option<String>,
    pub base_url: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringSection {
    /// Tick interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,
    /// Default request and cluster query timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    /// Total attempts per endpoint per tick
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Pause between attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay: f64,
    /// Seconds an in-flight tick may run after shutdown is requested
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            timeout: default_timeout(),
            retries: default_retries(),
            retry_delay: default_retry_delay(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KubernetesSection {
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Pod labels, combined into an equality label selector
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Threshold quantities in Kubernetes notation ("20m", "25Mi")
#[derive(Debug, Clone, Deserialize)]
pub struct BandSection {
    pub low: String,
    pub high: String,
    pub request: String,
    pub limit: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThresholdsSection {
    #[serde(default)]
    pub cpu: Option<BandSection>,
    #[serde(default)]
    pub memory: Option<BandSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogsSection {
    #[serde(default = "default_logs_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_tail_lines")]
    pub tail_lines: i64,
}

impl Default for LogsSection {
    fn default() -> Self {
        Self {
            directory: default_logs_directory(),
            tail_lines: default_tail_lines(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertingSection {
    /// Alertmanager-compatible webhook; alerts go to the log only when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub generator_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_interval() -> u64 {
    60
}

fn default_timeout() -> f64 {
    10.0
}

fn default_retries() -> u32 {
    3
}

fn default_retry_delay() -> f64 {
    1.0
}

fn default_shutdown_grace() -> u64 {
    10
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_logs_directory() -> PathBuf {
    PathBuf::from("logs")
}

fn default_tail_lines() -> i64 {
    monitor_lib::collector::DEFAULT_TAIL_LINES
}

fn default_port() -> u16 {
    8080
}

fn default_level() -> String {
    "info".to_string()
}

impl MonitorConfig {
    /// Load configuration from `CONFIG_PATH` and the process environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path), std::env::vars().collect())
    }

    /// Load configuration from a file with an explicit environment
    pub fn load_from(path: &Path, env: HashMap<String, String>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Yaml))
            .add_source(
                config::Environment::with_prefix("PODWATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(env.clone())),
            );

        if let Some(url) = env.get("API_BASE_URL") {
            builder = builder.set_override("api.base_url", url.as_str())?;
        }
        if let Some(namespace) = env.get("K8S_NAMESPACE") {
            builder = builder.set_override("kubernetes.namespace", namespace.as_str())?;
        }

        let mut config: MonitorConfig = builder
            .build()
            .with_context(|| format!("failed to read configuration from {}", path.display()))?
            .try_deserialize()
            .context("invalid configuration")?;
        config.kubernetes.labels =
            restore_label_case(path, std::mem::take(&mut config.kubernetes.labels))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.monitoring.interval == 0 {
            bail!("monitoring.interval must be greater than zero");
        }
        if self.api.endpoints.is_empty() {
            bail!("api.endpoints must list at least one endpoint");
        }
        if !self.monitoring.timeout.is_finite() || self.monitoring.timeout <= 0.0 {
            bail!("monitoring.timeout must be greater than zero");
        }
        if !self.monitoring.retry_delay.is_finite() || self.monitoring.retry_delay < 0.0 {
            bail!("monitoring.retry_delay must not be negative");
        }
        self.timeout()?;
        self.retry_delay()?;
        self.base_url()?;
        self.thresholds()?;
        Ok(())
    }

    /// Threshold ordering problems, reported as warnings at startup
    pub fn threshold_warnings(&self) -> Result<Vec<String>> {
        let thresholds = self.thresholds()?;
        let mut warnings = Vec::new();
        for (kind, band) in [("cpu", thresholds.cpu), ("memory", thresholds.memory)] {
            warnings.extend(
                band.ordering_issues()
                    .into_iter()
                    .map(|issue| format!("thresholds.{}: {}", kind, issue)),
            );
        }
        Ok(warnings)
    }

    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.api.base_url)
            .with_context(|| format!("api.base_url is not a valid URL: {}", self.api.base_url))
    }

    pub fn service_name(&self) -> String {
        if let Some(name) = &self.api.name {
            return name.clone();
        }
        Url::parse(&self.api.base_url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "service".to_string())
    }

    pub fn label_selector(&self) -> String {
        watcher::label_selector(&self.kubernetes.labels)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.interval)
    }

    pub fn timeout(&self) -> Result<Duration> {
        seconds("monitoring.timeout", self.monitoring.timeout)
    }

    pub fn retry_delay(&self) -> Result<Duration> {
        seconds("monitoring.retry_delay", self.monitoring.retry_delay)
    }

    pub fn thresholds(&self) -> Result<Thresholds> {
        let defaults = Thresholds::default();
        let cpu = match &self.thresholds.cpu {
            Some(band) => parse_band(band, "cpu", parse_cpu_nanocores)?,
            None => defaults.cpu,
        };
        let memory = match &self.thresholds.memory {
            Some(band) => parse_band(band, "memory", parse_memory_bytes)?,
            None => defaults.memory,
        };
        Ok(Thresholds { cpu, memory })
    }

    pub fn prober_config(&self) -> Result<ProberConfig> {
        let mut config = ProberConfig::new(self.base_url()?);
        config.default_timeout = self.timeout()?;
        config.retries = self.monitoring.retries.max(1);
        config.retry_delay = self.retry_delay()?;
        Ok(config)
    }

    pub fn coordinator_config(&self) -> Result<CoordinatorConfig> {
        Ok(CoordinatorConfig {
            service_name: self.service_name(),
            namespace: self.kubernetes.namespace.clone(),
            label_selector: self.label_selector(),
            endpoints: self.api.endpoints.clone(),
            thresholds: self.thresholds()?,
            interval: self.interval(),
            timeout: self.timeout()?,
            shutdown_grace: Duration::from_secs(self.monitoring.shutdown_grace),
            log_tail_lines: self.logs.tail_lines,
        })
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| anyhow!("{} is out of range: {}", field, value))
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    kubernetes: Option<RawKubernetes>,
}

#[derive(Deserialize)]
struct RawKubernetes {
    #[serde(default)]
    labels: BTreeMap<String, serde_yaml::Value>,
}

/// Put label keys back into the case they were written in
///
/// The `config` crate lowercases map keys, but Kubernetes label keys are
/// case-sensitive.
fn restore_label_case(
    path: &Path,
    labels: BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration from {}", path.display()))?;
    let raw: RawConfig = serde_yaml::from_str(&contents).context("invalid configuration")?;

    let written: HashMap<String, String> = raw
        .kubernetes
        .map(|k| {
            k.labels
                .into_keys()
                .map(|key| (key.to_lowercase(), key))
                .collect()
        })
        .unwrap_or_default();

    Ok(labels
        .into_iter()
        .map(|(key, value)| match written.get(&key.to_lowercase()) {
            Some(original) => (original.clone(), value),
            None => (key, value),
        })
        .collect())
}

fn parse_band<E>(
    band: &BandSection,
    kind: &str,
    parse: impl Fn(&str) -> Result<u64, E>,
) -> Result<ThresholdBand>
where
    E: std::error::Error + Send + Sync + 'static,
{
    let field = |name: &str, value: &str| {
        parse(value).with_context(|| format!("thresholds.{}.{} is invalid", kind, name))
    };
    Ok(ThresholdBand {
        low: field("low", &band.low)?,
        high: field("high", &band.high)?,
        request: field("request", &band.request)?,
        limit: field("limit", &band.limit)?,
    })
}
