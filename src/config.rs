// Configuration File Support
//
// Layering, lowest precedence first: built-in defaults, the TOML file
// (~/.config/chaos-agent/config.toml unless --config is given), environment
// overrides (CHAOS_AGENT_*, DOCKER_CMD), then command-line flags applied by
// the binary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::eligibility::InfraExclusions;
use crate::faults::FaultKind;
use crate::observe::{TargetRegistry, DEFAULT_PROBE_HOST};
use crate::runtime::{CallTimeout, DEFAULT_RUNTIME_BINARY};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,

    /// Container runtime CLI
    pub runtime: RuntimeConfig,

    /// Orchestration loop parameters
    pub run: RunConfig,

    /// Prometheus and health probing
    pub observe: ObserveConfig,

    /// Containers that are never eligible
    pub exclusions: InfraExclusions,

    /// Known services: metrics port, instance label, query profile
    pub services: TargetRegistry,

    /// Control-plane `inject` wrapper
    pub inject: InjectConfig,

    /// The agent's own metrics endpoint
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Runtime binary (`docker`, `podman`, ...)
    pub binary: String,

    /// Timeout for lifecycle and listing calls
    pub control_timeout_secs: u64,

    /// Timeout for `exec` calls
    pub exec_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_RUNTIME_BINARY.to_string(),
            control_timeout_secs: 30,
            exec_timeout_secs: 30,
        }
    }
}

impl RuntimeConfig {
    pub fn control_timeout(&self) -> CallTimeout {
        CallTimeout::from_secs(self.control_timeout_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_secs)
    }
}

/// Focused runs repeat one fault; mixed runs draw a fault per iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Focused,
    Mixed,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Focused => "focused",
            RunMode::Mixed => "mixed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunConfig {
    pub mode: RunMode,

    /// Fault bound in focused mode
    pub fault: FaultKind,

    /// Restrict injection to these containers; empty means every eligible one
    pub targets: Vec<String>,

    pub duration_secs: u64,

    /// Sleep after every iteration
    pub interval_secs: u64,

    /// Re-read the target pool every N iterations
    pub refresh_every: u64,

    /// Print action events as JSON on stdout
    pub json: bool,

    /// Append-only event log
    pub log_file: PathBuf,

    /// Probe target health endpoints around each action
    pub probe: bool,

    /// Buffers allocated by `memory_hog`; random when unset
    pub hog_mem_mb: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::Focused,
            fault: FaultKind::CpuHog,
            targets: Vec::new(),
            duration_secs: 300,
            interval_secs: 30,
            refresh_every: 10,
            json: false,
            log_file: PathBuf::from("fault_agent/chaos.log"),
            probe: false,
            hog_mem_mb: Some(1024),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObserveConfig {
    /// Prometheus base URL
    pub prom_url: String,

    /// Job label used for instance discovery
    pub prom_job: String,

    /// Host the health probes connect to
    pub probe_host: String,

    pub probe_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

impl Default for ObserveConfig {
    fn default() -> Self {
        Self {
            prom_url: "http://localhost:9090".to_string(),
            prom_job: "test_app".to_string(),
            probe_host: DEFAULT_PROBE_HOST.to_string(),
            probe_timeout_secs: 3,
            query_timeout_secs: 4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InjectConfig {
    /// Intensity reported with each injection (0-100)
    pub intensity: u8,

    /// Upper bound on containers picked by discovery
    pub max_targets: usize,

    /// Target used when discovery finds nothing
    pub fallback_target: String,

    /// Known service keywords matched in addition to the target hint
    pub service_keywords: Vec<String>,

    /// Substrings that exclude a container from discovery
    pub excluded_keywords: Vec<String>,
}

impl Default for InjectConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            intensity: 50,
            max_targets: 2,
            fallback_target: "cep-gateway".to_string(),
            service_keywords: strings(&["gateway", "catalog", "cart", "payment"]),
            excluded_keywords: strings(&["prometheus", "grafana", "postgres", "backend", "frontend"]),
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MetricsConfig {
    /// Serve the agent's own metrics
    pub enabled: bool,

    /// Port for metrics server
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9464,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            runtime: RuntimeConfig::default(),
            run: RunConfig::default(),
            observe: ObserveConfig::default(),
            exclusions: InfraExclusions::default(),
            services: TargetRegistry::default(),
            inject: InjectConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default config directory
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// A missing file yields the defaults. Environment overrides are applied
    /// in both cases and the result is validated.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or
    /// if the resulting configuration is invalid.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/chaos-agent/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "chaos-agent") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("chaos-agent")
                .join("config.toml")
        }
    }

    /// Apply overrides from the process environment
    ///
    /// - CHAOS_AGENT_LOG_LEVEL, CHAOS_AGENT_LOG_FORMAT
    /// - DOCKER_CMD, CHAOS_AGENT_RUNTIME
    /// - CHAOS_AGENT_LOG_FILE
    /// - CHAOS_AGENT_PROM_URL, CHAOS_AGENT_PROM_JOB, CHAOS_AGENT_PROBE_HOST
    /// - CHAOS_AGENT_METRICS_ENABLED, CHAOS_AGENT_METRICS_PORT
    pub fn apply_env_overrides(self) -> Self {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` as the environment
    pub fn apply_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("CHAOS_AGENT_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("CHAOS_AGENT_LOG_FORMAT") {
            self.logging.format = format;
        }

        // DOCKER_CMD is the historical name; the prefixed one wins
        if let Some(binary) = lookup("DOCKER_CMD") {
            self.runtime.binary = binary;
        }
        if let Some(binary) = lookup("CHAOS_AGENT_RUNTIME") {
            self.runtime.binary = binary;
        }

        if let Some(path) = lookup("CHAOS_AGENT_LOG_FILE") {
            self.run.log_file = PathBuf::from(path);
        }

        if let Some(url) = lookup("CHAOS_AGENT_PROM_URL") {
            self.observe.prom_url = url;
        }
        if let Some(job) = lookup("CHAOS_AGENT_PROM_JOB") {
            self.observe.prom_job = job;
        }
        if let Some(host) = lookup("CHAOS_AGENT_PROBE_HOST") {
            self.observe.probe_host = host;
        }

        if let Some(enabled) = lookup("CHAOS_AGENT_METRICS_ENABLED") {
            self.metrics.enabled = enabled.parse().unwrap_or(self.metrics.enabled);
        }
        if let Some(port) = lookup("CHAOS_AGENT_METRICS_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.metrics.port = port;
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.runtime.binary.trim().is_empty() {
            anyhow::bail!("Runtime binary must not be empty");
        }
        if self.runtime.control_timeout_secs == 0 || self.runtime.exec_timeout_secs == 0 {
            anyhow::bail!("Runtime timeouts must be > 0");
        }

        if self.run.interval_secs == 0 {
            anyhow::bail!("Interval must be > 0 seconds");
        }
        if self.run.refresh_every == 0 {
            anyhow::bail!("Target refresh period must be > 0 iterations");
        }
        if self.run.hog_mem_mb == Some(0) {
            anyhow::bail!("Memory hog size must be > 0 MB");
        }

        if self.observe.probe_timeout_secs == 0 || self.observe.query_timeout_secs == 0 {
            anyhow::bail!("Probe and query timeouts must be > 0");
        }

        if self.inject.intensity > 100 {
            anyhow::bail!("Intensity must be between 0 and 100");
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            anyhow::bail!("Metrics port must be > 0");
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }
}
