use crate::error::BrokerError;
use crate::metrics::DEFAULT_CAPACITY;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 9092;
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Which reactor strategy serves connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReactorKind {
    /// One thread multiplexes the listener and every connection.
    SingleThreaded,
    /// An acceptor plus `num_threads` event loops, each owning a disjoint
    /// set of connections.
    #[default]
    EventLoopGroup,
}

/// Broker configuration.
///
/// Immutable once built. Construct through [`BrokerConfiguration::builder`]
/// or load from TOML with [`BrokerConfiguration::from_file`].
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerConfiguration {
    host: String,
    port: u16,
    num_threads: usize,
    reactor: ReactorKind,
    idle_timeout: Option<Duration>,
    shutdown_grace: Duration,
    read_buffer_size: usize,
    log_dir: Option<PathBuf>,
    sync_on_append: bool,
    metrics_capacity: usize,
    metrics_interval: Duration,
}

impl BrokerConfiguration {
    pub fn builder() -> BrokerConfigurationBuilder {
        BrokerConfigurationBuilder::default()
    }

    /// Parse a TOML document. Missing keys keep their defaults.
    ///
    /// ```toml
    /// host = "0.0.0.0"
    /// port = 9092
    /// num_threads = 4
    /// reactor = "single-threaded"
    /// idle_timeout_secs = 60      # 0 disables
    /// shutdown_grace_ms = 2000
    /// log_dir = "/var/lib/minibroker"
    /// sync_on_append = false
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self, BrokerError> {
        let file: FileConfig =
            toml::from_str(s).map_err(|e| BrokerError::Config(e.to_string()))?;
        file.into_builder().build()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BrokerError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            BrokerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&contents)
    }

    /// Builder seeded with this configuration, for overriding fields.
    pub fn to_builder(&self) -> BrokerConfigurationBuilder {
        BrokerConfigurationBuilder {
            config: self.clone(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, as passed to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    pub fn reactor(&self) -> ReactorKind {
        self.reactor
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub fn read_buffer_size(&self) -> usize {
        self.read_buffer_size
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn sync_on_append(&self) -> bool {
        self.sync_on_append
    }

    pub fn metrics_capacity(&self) -> usize {
        self.metrics_capacity
    }

    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }
}

impl Default for BrokerConfiguration {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            num_threads: default_num_threads(),
            reactor: ReactorKind::default(),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            log_dir: None,
            sync_on_append: false,
            metrics_capacity: DEFAULT_CAPACITY,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
        }
    }
}

fn default_num_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Builder for [`BrokerConfiguration`].
#[derive(Debug, Clone, Default)]
pub struct BrokerConfigurationBuilder {
    config: BrokerConfiguration,
}

impl BrokerConfigurationBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn num_threads(mut self, num_threads: usize) -> Self {
        self.config.num_threads = num_threads;
        self
    }

    pub fn reactor(mut self, reactor: ReactorKind) -> Self {
        self.config.reactor = reactor;
        self
    }

    /// `None` disables idle connection reaping.
    pub fn idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = idle_timeout;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace = grace;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.config.read_buffer_size = size;
        self
    }

    /// `None` selects the in-memory log.
    pub fn log_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.config.log_dir = dir;
        self
    }

    pub fn sync_on_append(mut self, sync: bool) -> Self {
        self.config.sync_on_append = sync;
        self
    }

    pub fn metrics_capacity(mut self, capacity: usize) -> Self {
        self.config.metrics_capacity = capacity;
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.config.metrics_interval = interval;
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    /// - `Config` if `num_threads`, `read_buffer_size` or `metrics_capacity`
    ///   is zero, or the host is empty
    pub fn build(self) -> Result<BrokerConfiguration, BrokerError> {
        let c = self.config;
        if c.num_threads == 0 {
            return Err(BrokerError::Config("num_threads must be at least 1".into()));
        }
        if c.read_buffer_size == 0 {
            return Err(BrokerError::Config("read_buffer_size must be positive".into()));
        }
        if c.metrics_capacity == 0 {
            return Err(BrokerError::Config("metrics_capacity must be positive".into()));
        }
        if c.host.is_empty() {
            return Err(BrokerError::Config("host must not be empty".into()));
        }
        Ok(c)
    }
}

/// TOML shape. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    num_threads: Option<usize>,
    reactor: Option<ReactorKind>,
    idle_timeout_secs: Option<u64>,
    shutdown_grace_ms: Option<u64>,
    read_buffer_size: Option<usize>,
    log_dir: Option<PathBuf>,
    sync_on_append: Option<bool>,
    metrics_capacity: Option<usize>,
    metrics_interval_secs: Option<u64>,
}

impl FileConfig {
    fn into_builder(self) -> BrokerConfigurationBuilder {
        let mut b = BrokerConfiguration::builder();
        if let Some(v) = self.host {
            b = b.host(v);
        }
        if let Some(v) = self.port {
            b = b.port(v);
        }
        if let Some(v) = self.num_threads {
            b = b.num_threads(v);
        }
        if let Some(v) = self.reactor {
            b = b.reactor(v);
        }
        if let Some(v) = self.idle_timeout_secs {
            b = b.idle_timeout((v > 0).then(|| Duration::from_secs(v)));
        }
        if let Some(v) = self.shutdown_grace_ms {
            b = b.shutdown_grace(Duration::from_millis(v));
        }
        if let Some(v) = self.read_buffer_size {
            b = b.read_buffer_size(v);
        }
        if self.log_dir.is_some() {
            b = b.log_dir(self.log_dir);
        }
        if let Some(v) = self.sync_on_append {
            b = b.sync_on_append(v);
        }
        if let Some(v) = self.metrics_capacity {
            b = b.metrics_capacity(v);
        }
        if let Some(v) = self.metrics_interval_secs {
            b = b.metrics_interval(Duration::from_secs(v));
        }
        b
    }
}
