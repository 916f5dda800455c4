use anyhow::{Context, bail};
use clap::{Parser, ValueEnum};
use core::time::Duration;
use fillguard::{FillConfig, FillPolicy, KeySpace};

/// Which cache store backs the service.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    /// In-process store. Locks only exclude invocations within this process.
    Memory,
    /// Shared Redis store. Locks exclude every process using the same Redis.
    Redis,
}

impl StoreKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Redis => "redis",
        }
    }
}

/// Runtime configuration for the `fillguard-tonic-server` binary.
///
/// The resource list, cache TTL bounds and fan-out count come from the YAML
/// file at `--config`. Everything else tunes the lock protocol and the
/// transport, and is parsed from CLI arguments or environment variables with
/// defaults suitable for production.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fillguard-tonic-server",
    version,
    about = "A gRPC service streaming stampede-safe cached origin content"
)]
pub struct CliArgs {
    /// Path to the YAML file listing `URLs`, `MinTimeout`, `MaxTimeout`
    /// (milliseconds) and `NumberOfRequests`.
    ///
    /// Environment variable: `CONFIG_PATH`
    #[arg(short, long = "config", env = "CONFIG_PATH", default_value_t = String::from("config.yml"))]
    pub config_path: String,

    /// Backing cache store.
    ///
    /// Environment variable: `STORE`
    #[arg(long, env = "STORE", value_enum, default_value_t = StoreKind::Redis)]
    pub store: StoreKind,

    /// Redis connection URL, used when `--store redis`.
    ///
    /// Environment variable: `REDIS_URL`
    #[arg(long, env = "REDIS_URL", default_value_t = String::from("redis://localhost:6379/0"))]
    pub redis_url: String,

    /// Prefix for every key written to the store. Deployments sharing a
    /// store but serving different origins must use distinct namespaces.
    ///
    /// Environment variable: `KEY_NAMESPACE`
    #[arg(long, env = "KEY_NAMESPACE", default_value_t = String::from(fillguard::DEFAULT_NAMESPACE))]
    pub key_namespace: String,

    /// Expiry of a fill lock, in milliseconds.
    ///
    /// The lock is never deleted; this expiry is what frees a resource whose
    /// populator died mid-fetch. Must be shorter than `ORIGIN_TIMEOUT_MS`.
    ///
    /// Environment variable: `LOCK_TTL_MS`
    #[arg(long, env = "LOCK_TTL_MS", default_value_t = 2_000)]
    pub lock_ttl_ms: u64,

    /// Pause between attempts while another invocation holds the lock, in
    /// milliseconds.
    ///
    /// Environment variable: `BACKOFF_MS`
    #[arg(long, env = "BACKOFF_MS", default_value_t = 50)]
    pub backoff_ms: u64,

    /// Attempts per resolution before replying with an empty value.
    ///
    /// Environment variable: `MAX_ATTEMPTS`
    #[arg(long, env = "MAX_ATTEMPTS", default_value_t = fillguard::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: usize,

    /// Upper bound on a single origin request, connect through body, in
    /// milliseconds.
    ///
    /// Environment variable: `ORIGIN_TIMEOUT_MS`
    #[arg(long, env = "ORIGIN_TIMEOUT_MS", default_value_t = 10_000)]
    pub origin_timeout_ms: u64,

    /// Capacity of the buffer between a batch and its gRPC response stream.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Seconds to wait for in-flight streams to finish on shutdown before
    /// cancelling them.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 5)]
    pub shutdown_timeout: u64,

    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "localhost:10000" or "/tmp/fillguard.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("localhost:10000"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// OTLP/gRPC collector receiving spans and metrics (with the `tracing`
    /// or `metrics` features). Nothing is exported when unset.
    ///
    /// Environment variable: `OTEL_EXPORTER_OTLP_ENDPOINT`
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub fill: FillConfig,
    pub policy: FillPolicy,
    pub key_space: KeySpace,
    pub key_namespace: String,
    pub store: StoreKind,
    pub redis_url: String,
    pub origin_timeout: Duration,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub server_addr: String,
    pub uds: bool,
    pub otlp_endpoint: Option<String>,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let fill = FillConfig::from_path(&args.config_path)
            .with_context(|| format!("loading `{}`", args.config_path))?;

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.key_namespace.is_empty() {
            bail!("KEY_NAMESPACE must not be empty");
        }

        let lock_ttl = Duration::from_millis(args.lock_ttl_ms);
        let origin_timeout = Duration::from_millis(args.origin_timeout_ms);
        if lock_ttl >= origin_timeout {
            bail!(
                "LOCK_TTL_MS ({}) must be shorter than ORIGIN_TIMEOUT_MS ({})",
                args.lock_ttl_ms,
                args.origin_timeout_ms
            );
        }

        let policy = FillPolicy::new(fill.ttl_range()?)
            .with_max_attempts(args.max_attempts)
            .with_backoff(Duration::from_millis(args.backoff_ms))
            .with_lock_ttl(lock_ttl);
        policy.validate()?;

        Ok(Self {
            fill,
            policy,
            key_space: KeySpace::new(&args.key_namespace),
            key_namespace: args.key_namespace,
            store: args.store,
            redis_url: args.redis_url,
            origin_timeout,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            server_addr: args.server_addr,
            uds: args.uds,
            otlp_endpoint: args.otlp_endpoint.filter(|endpoint| !endpoint.is_empty()),
        })
    }
}
