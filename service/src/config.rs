use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use realtime::ManagerConfig;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Origins allowed to open a WebSocket connection. `*` allows any origin.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "*"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap_or(LevelFilter::Info)),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap_or(RustEnv::Development)),
    )]
    pub runtime_env: RustEnv,

    /// Turn real-time event delivery on or off. When off, publishing is a no-op
    /// and upgrade requests are rejected.
    #[arg(long, env, default_value_t = true, action = clap::ArgAction::Set)]
    pub websocket_enabled: bool,

    /// Route path clients connect to for WebSocket upgrades
    #[arg(long, env, default_value = "/ws")]
    pub websocket_path: String,

    /// Maximum number of simultaneously connected clients
    #[arg(long, env, default_value_t = 1000)]
    pub max_clients: usize,

    /// Bounded size of each connection's outbound frame queue
    #[arg(long, env, default_value_t = 256)]
    pub outbound_queue_capacity: usize,

    /// Consecutive dropped frames tolerated before a slow client is evicted
    #[arg(long, env, default_value_t = 64)]
    pub max_consecutive_drops: usize,

    /// Bounded size of the queue between publishers and the dispatcher
    #[arg(long, env, default_value_t = 1024)]
    pub dispatch_queue_capacity: usize,

    /// Seconds without any inbound frame before a connection is closed
    #[arg(long, env, default_value_t = 60)]
    pub idle_timeout_secs: u64,

    /// Seconds between protocol-level pings sent to each client
    #[arg(long, env, default_value_t = 54)]
    pub ping_period_secs: u64,

    /// Seconds a single socket write may take
    #[arg(long, env, default_value_t = 10)]
    pub write_timeout_secs: u64,

    /// Largest inbound frame accepted from a client, in bytes
    #[arg(long, env, default_value_t = 512 * 1024)]
    pub max_message_size: usize,

    /// Milliseconds a closing connection may spend flushing its queue on shutdown
    #[arg(long, env, default_value_t = 500)]
    pub close_grace_period_ms: u64,

    /// Base URL of the authentication/permission service
    #[arg(long, env)]
    permission_service_url: Option<String>,

    /// Timeout in seconds for calls to the permission service
    #[arg(long, env, default_value_t = 30)]
    pub permission_service_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn set_permission_service_url(mut self, url: String) -> Self {
        self.permission_service_url = Some(url);
        self
    }

    pub fn permission_service_url(&self) -> Option<&str> {
        self.permission_service_url.as_deref()
    }

    pub fn permission_service_timeout(&self) -> Duration {
        Duration::from_secs(self.permission_service_timeout_secs)
    }

    /// Whether an upgrade request from `origin` may connect. Requests without
    /// an `Origin` header (non-browser clients) are always allowed.
    pub fn is_origin_allowed(&self, origin: Option<&str>) -> bool {
        match origin {
            None => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed == "*" || allowed.eq_ignore_ascii_case(origin)),
        }
    }

    /// Tuning for the notification core.
    pub fn websocket(&self) -> ManagerConfig {
        ManagerConfig {
            enabled: self.websocket_enabled,
            max_clients: self.max_clients,
            outbound_queue_capacity: self.outbound_queue_capacity,
            max_consecutive_drops: self.max_consecutive_drops,
            dispatch_queue_capacity: self.dispatch_queue_capacity,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            ping_period: Duration::from_secs(self.ping_period_secs),
            write_timeout: Duration::from_secs(self.write_timeout_secs),
            close_grace_period: Duration::from_millis(self.close_grace_period_ms),
            max_message_size: self.max_message_size,
        }
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}
