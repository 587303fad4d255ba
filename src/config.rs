//! Runtime configuration from flags, environment and an optional `.env`.

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::time::Duration;

use crate::freshness::FreshnessPolicy;
use crate::metrics::DEFAULT_PREFIX;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Instance base URL, e.g. https://mastodon.example
    #[arg(long, env = "MASTODON_BASE_URL")]
    base_url: String,

    /// Accepted for compatibility; measures are read with the access token.
    #[arg(long, env = "MASTODON_CLIENT_KEY", hide_env_values = true)]
    client_key: Option<String>,

    #[arg(long, env = "MASTODON_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// User access token with the admin:read scope.
    #[arg(long, env = "MASTODON_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Port for the /metrics endpoint.
    #[arg(long, env = "PORT", default_value_t = 9876)]
    port: u16,

    /// Time between polls: seconds, or a number with an s/m/h suffix.
    #[arg(long, env = "UPDATE_INTERVAL", default_value = "30s", value_parser = parse_interval)]
    update_interval: Duration,

    /// Per-request timeout for calls to the instance.
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "20s", value_parser = parse_interval)]
    request_timeout: Duration,

    #[arg(long, env = "METRIC_PREFIX", default_value = DEFAULT_PREFIX)]
    metric_prefix: String,

    /// Whether per-measure data errors also clear the freshness gauge.
    #[arg(long, env = "FRESHNESS_POLICY", value_enum, default_value_t = FreshnessPolicy::Strict)]
    freshness_policy: FreshnessPolicy,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub access_token: String,
    pub listen_addr: SocketAddr,
    pub update_interval: Duration,
    pub request_timeout: Duration,
    pub metric_prefix: String,
    pub freshness_policy: FreshnessPolicy,
    pub log_format: LogFormat,
}

impl Config {
    /// Load `.env` (if present), then parse flags and environment.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_args(Args::parse())
    }

    pub fn from_args(args: Args) -> Result<Self> {
        let url = reqwest::Url::parse(&args.base_url)
            .with_context(|| format!("invalid MASTODON_BASE_URL {:?}", args.base_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("MASTODON_BASE_URL must be http(s), got {:?}", url.scheme());
        }

        let access_token = match args.access_token.filter(|t| !t.trim().is_empty()) {
            Some(token) => token,
            None if args.client_key.is_some() || args.client_secret.is_some() => bail!(
                "MASTODON_ACCESS_TOKEN is required: admin measures need a user token with \
                 admin:read, client credentials alone cannot read them"
            ),
            None => bail!("MASTODON_ACCESS_TOKEN is required"),
        };

        Ok(Self {
            base_url: args.base_url,
            access_token,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], args.port)),
            update_interval: args.update_interval,
            request_timeout: args.request_timeout,
            metric_prefix: args.metric_prefix,
            freshness_policy: args.freshness_policy,
            log_format: args.log_format,
        })
    }
}

/// Parse `30`, `30s`, `5m` or `1h` into a non-zero duration.
pub fn parse_interval(raw: &str) -> Result<Duration, String> {
    let raw = raw.trim();
    let (digits, unit) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => raw.split_at(i),
        None => (raw, "s"),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("invalid interval {raw:?}"))?;
    let secs = match unit {
        "s" => n,
        "m" => n.saturating_mul(60),
        "h" => n.saturating_mul(3600),
        other => return Err(format!("unknown interval unit {other:?} in {raw:?}")),
    };
    if secs == 0 {
        return Err("interval must be greater than zero".to_string());
    }
    Ok(Duration::from_secs(secs))
}
