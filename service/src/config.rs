use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Transport carrying events between backend processes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventBusKind {
    /// In-process only. Fine for a single instance.
    Local,
    /// Redis pub/sub, for running several instances behind a load balancer.
    Redis,
}

impl FromStr for EventBusKind {
    type Err = String;
    fn from_str(kind: &str) -> Result<EventBusKind, Self::Err> {
        match kind.to_lowercase().as_str() {
            "local" => Ok(EventBusKind::Local),
            "redis" => Ok(EventBusKind::Redis),
            other => Err(format!("unknown event bus {other:?}, expected local or redis")),
        }
    }
}

impl fmt::Display for EventBusKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventBusKind::Local => write!(f, "local"),
            EventBusKind::Redis => write!(f, "redis"),
        }
    }
}

fn parse_level_filter(level: &str) -> Result<LevelFilter, String> {
    level
        .parse::<LevelFilter>()
        .map_err(|_| format!("invalid log level {level:?}"))
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
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
        value_parser = parse_level_filter,
    )]
    pub log_level_filter: LevelFilter,

    /// Seconds between heartbeat comments on every open stream
    #[arg(long, env, default_value_t = 30)]
    pub heartbeat_interval_secs: u64,

    /// Seconds between sweeps for inactive connections
    #[arg(long, env, default_value_t = 30)]
    pub cleanup_interval_secs: u64,

    /// Seconds without a successful write after which a connection is evicted
    #[arg(long, env, default_value_t = 300)]
    pub client_timeout_secs: u64,

    /// Reconnection delay in milliseconds advertised to clients
    #[arg(long, env, default_value_t = 3000)]
    pub retry_interval_ms: u64,

    /// Frames buffered per client before a non-reading client is disconnected (at least 4)
    #[arg(long, env, default_value_t = 32, value_parser = clap::value_parser!(u64).range(4..))]
    pub stream_buffer: u64,

    /// Event bus transport: `local` or `redis`
    #[arg(long, env, default_value_t = EventBusKind::Local)]
    pub event_bus: EventBusKind,

    /// Redis URL used when the event bus is `redis`
    #[arg(long, env, default_value = "redis://127.0.0.1:6379")]
    redis_url: Option<String>,
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

    pub fn redis_url(&self) -> &str {
        self.redis_url.as_deref().unwrap_or("redis://127.0.0.1:6379")
    }

    /// `interface:port` to bind the HTTP listener to.
    pub fn listen_address(&self) -> String {
        format!(
            "{}:{}",
            self.interface.as_deref().unwrap_or("127.0.0.1"),
            self.port
        )
    }

    pub fn sse_settings(&self) -> sse::Settings {
        sse::Settings {
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            client_timeout: Duration::from_secs(self.client_timeout_secs),
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            stream_buffer: usize::try_from(self.stream_buffer).unwrap_or(usize::MAX),
        }
    }
}
