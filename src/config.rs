use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
///
/// Built once at startup and handed to the coordinator or worker; the
/// coordinator also ships it verbatim to workers via `GET_CONFIG`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Identity of the workload; workers must present the same string
    #[serde(default = "default_workload_id")]
    pub workload_id: String,
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_workload_id() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Address to listen on
    pub bind_addr: String,
    /// TCP port to listen on
    pub port: u16,
    /// Directory receiving one append-only file per output channel
    pub output_dir: PathBuf,
    /// Skip this many scan points before dispatching (resume a partial run)
    pub start_index: u64,
    /// Upper bound for a whole connection exchange
    pub io_timeout_ms: u64,
    /// Largest blob accepted from a worker
    pub max_blob_bytes: usize,
    /// How long to keep answering "no more work" after the scan finishes
    pub finish_grace_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 7140,
            output_dir: PathBuf::from("output"),
            start_index: 0,
            io_timeout_ms: 30_000,
            max_blob_bytes: crate::wire::DEFAULT_MAX_BLOB_BYTES,
            finish_grace_ms: 2_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    pub fn finish_grace(&self) -> Duration {
        Duration::from_millis(self.finish_grace_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Coordinator host name or address
    pub host: String,
    /// Coordinator port
    pub port: u16,
    /// Batch size for the first request, and for every request when
    /// `nominal_busy_secs` is zero
    pub default_batch_size: usize,
    /// Target compute time per batch in seconds (0 = fixed batch size)
    pub nominal_busy_secs: f64,
    /// Attempts per RPC before the worker gives up
    pub max_retries: u32,
    /// Pause between attempts
    pub retry_delay_ms: u64,
    /// Connect timeout per attempt
    pub connect_timeout_ms: u64,
    /// Timeout for one request/response exchange
    pub io_timeout_ms: u64,
    /// Take the evaluator section from the coordinator's configuration
    pub fetch_config: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7140,
            default_batch_size: 10,
            nominal_busy_secs: 0.0,
            max_retries: 5,
            retry_delay_ms: 1_000,
            connect_timeout_ms: 5_000,
            io_timeout_ms: 30_000,
            fetch_config: true,
        }
    }
}

impl WorkerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }

    /// `None` when batches have a fixed size
    pub fn nominal_busy_time(&self) -> Option<Duration> {
        if self.nominal_busy_secs > 0.0 {
            Some(Duration::from_secs_f64(self.nominal_busy_secs))
        } else {
            None
        }
    }

    pub fn coordinator_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which scan source implementation to build
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanSourceKind {
    /// Cartesian product of parameter axes
    Grid,
    /// One scan point per line of a text file
    List,
}

impl Default for ScanSourceKind {
    fn default() -> Self {
        Self::Grid
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub source: ScanSourceKind,
    /// Grid axes, first axis varies slowest
    pub parameters: Vec<ParameterAxis>,
    /// Input file for the `list` source
    pub list_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterAxis {
    pub name: String,
    /// Explicit values, used when `range` is absent
    #[serde(default)]
    pub values: Vec<f64>,
    #[serde(default)]
    pub range: Option<RangeSpec>,
}

impl ParameterAxis {
    /// Materialize the axis values
    pub fn points(&self) -> Vec<f64> {
        match &self.range {
            Some(range) => range.points(),
            None => self.values.clone(),
        }
    }
}

/// `steps` evenly spaced values from `start` to `stop`, both inclusive
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RangeSpec {
    pub start: f64,
    pub stop: f64,
    pub steps: u32,
}

impl RangeSpec {
    pub fn points(&self) -> Vec<f64> {
        match self.steps {
            0 => Vec::new(),
            1 => vec![self.start],
            n => {
                let step = (self.stop - self.start) / f64::from(n - 1);
                (0..n)
                    .map(|i| self.start + step * f64::from(i))
                    .collect()
            }
        }
    }
}

/// How evaluator stdout becomes a result
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Whole stdout goes to `output_channel`
    Raw,
    /// stdout is a JSON object of channel name to text payload
    Json,
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Raw
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Program and arguments; the scan point is written to its stdin
    pub command: Vec<String>,
    pub output_channel: String,
    pub output_format: OutputFormat,
    /// Per-point evaluation timeout (0 = unbounded)
    pub timeout_ms: u64,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            command: vec!["cat".to_string()],
            output_channel: "result.dat".to_string(),
            output_format: OutputFormat::Raw,
            timeout_ms: 0,
        }
    }
}

impl EvaluatorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workload_id: default_workload_id(),
            coordinator: CoordinatorConfig::default(),
            worker: WorkerConfig::default(),
            scan: ScanConfig::default(),
            evaluator: EvaluatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Self::defaults()?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/cluster.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("SCANFARM_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            .add_source(Self::env_overrides());

        builder.build()?.try_deserialize()
    }

    /// Load a single explicit file, still honouring environment overrides
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(Self::env_overrides())
            .build()?
            .try_deserialize()
    }

    /// Parse a configuration tree received over the wire
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Self::defaults()?
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// Serialize the configuration tree for `GET_CONFIG`
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    /// `SCANFARM_<SECTION>__<KEY>`, e.g. `SCANFARM_WORKER__HOST` sets `worker.host`
    fn env_overrides() -> Environment {
        Environment::with_prefix("SCANFARM")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        Config::builder()
            .set_default("workload_id", default_workload_id())?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.workload_id.trim().is_empty() {
            errors.push("workload_id must not be empty".to_string());
        }
        if self.workload_id.contains('\n') {
            errors.push("workload_id must be a single line".to_string());
        }

        if self.worker.default_batch_size == 0 {
            errors.push("worker.default_batch_size must be at least 1".to_string());
        }
        if self.worker.nominal_busy_secs < 0.0 || !self.worker.nominal_busy_secs.is_finite() {
            errors.push("worker.nominal_busy_secs must be a non-negative number".to_string());
        }
        if self.worker.max_retries == 0 {
            errors.push("worker.max_retries must be at least 1".to_string());
        }

        match self.scan.source {
            ScanSourceKind::Grid => {
                if self.scan.parameters.is_empty() {
                    errors.push("scan.parameters must list at least one axis".to_string());
                }
                for axis in &self.scan.parameters {
                    if axis.name.trim().is_empty() {
                        errors.push("scan parameter names must not be empty".to_string());
                    }
                    if axis.points().is_empty() {
                        errors.push(format!("scan parameter {} has no values", axis.name));
                    }
                }
            }
            ScanSourceKind::List => {
                if self.scan.list_path.is_none() {
                    errors.push("scan.list_path is required for the list source".to_string());
                }
            }
        }

        if self.evaluator.command.is_empty() {
            errors.push("evaluator.command must name a program".to_string());
        }
        if self.evaluator.output_format == OutputFormat::Raw
            && !crate::sink::validate_channel_name(&self.evaluator.output_channel)
        {
            errors.push(format!(
                "evaluator.output_channel {:?} is not a valid channel name",
                self.evaluator.output_channel
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
