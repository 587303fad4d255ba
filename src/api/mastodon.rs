//! Mastodon admin API client.
//!
//! Talks to `POST /api/v1/admin/measures` with a user access token that
//! carries the `admin:read` scope. The server reports numbers as strings
//! and buckets as RFC 3339 timestamps; both are parsed here so nothing
//! past this module sees the raw shape.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{DailyDataPoint, MeasureResult, MeasureSource};
use crate::error::MeasureError;

const MEASURES_PATH: &str = "/api/v1/admin/measures";
const VERIFY_APP_PATH: &str = "/api/v1/apps/verify_credentials";
const INSTANCE_PATH: &str = "/api/v1/instance";

/// Response bodies are truncated to this many bytes in error messages.
const MAX_ERROR_BODY: usize = 512;

pub struct MastodonClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

/// Who we are logged in as, reported once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginInfo {
    pub app_name: String,
    pub version: String,
}

// ── Wire Types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MeasuresRequest<'a> {
    keys: &'a [String],
    start_at: NaiveDate,
    end_at: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct RawMeasure {
    key: String,
    total: Option<RawNumber>,
    #[serde(default)]
    data: Vec<RawPoint>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    date: String,
    value: RawNumber,
}

/// Mastodon serialises counts as strings; accept plain numbers too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawNumber {
    Int(u64),
    Text(String),
}

impl RawNumber {
    fn to_u64(&self) -> Result<u64, String> {
        match self {
            Self::Int(n) => Ok(*n),
            Self::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| format!("expected a non-negative integer, got {s:?}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawApplication {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawInstance {
    version: String,
}

// ── Client ──────────────────────────────────────────────────────────

impl MastodonClient {
    pub fn new(
        base_url: &str,
        access_token: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, MeasureError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("mastodon-exporter/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| MeasureError::Transport {
                endpoint: base_url.to_string(),
                source,
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check the token against the server and fetch the instance version.
    pub async fn verify_credentials(&self) -> Result<LoginInfo, MeasureError> {
        let app: RawApplication = self.get_json(VERIFY_APP_PATH).await?;
        let instance: RawInstance = self.get_json(INSTANCE_PATH).await?;
        Ok(LoginInfo {
            app_name: app.name,
            version: instance.version,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, MeasureError> {
        let resp = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(|source| MeasureError::Transport {
                endpoint: path.to_string(),
                source,
            })?;
        read_json(path, resp).await
    }
}

#[async_trait]
impl MeasureSource for MastodonClient {
    async fn query(
        &self,
        keys: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeasureResult>, MeasureError> {
        let (start_at, end_at) = inclusive_dates(start, end);
        debug!(keys = ?keys, %start_at, %end_at, "Querying admin measures");

        let resp = self
            .client
            .post(self.url(MEASURES_PATH))
            .bearer_auth(&self.access_token)
            .json(&MeasuresRequest {
                keys,
                start_at,
                end_at,
            })
            .send()
            .await
            .map_err(|source| MeasureError::Transport {
                endpoint: MEASURES_PATH.to_string(),
                source,
            })?;

        let raw: Vec<RawMeasure> = read_json(MEASURES_PATH, resp).await?;
        let mut results = Vec::with_capacity(raw.len());
        for measure in raw {
            // An unreadable entry only costs its own measure, which the
            // caller then reports as missing from the response.
            match convert_measure(measure) {
                Ok(result) => results.push(result),
                Err(reason) => warn!(%reason, "Dropping unreadable measure"),
            }
        }
        Ok(results)
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

async fn read_json<T: DeserializeOwned>(
    endpoint: &str,
    resp: reqwest::Response,
) -> Result<T, MeasureError> {
    let status = resp.status();
    if !status.is_success() {
        let body = truncate_body(resp.text().await.unwrap_or_default());
        return Err(if status.is_server_error() {
            MeasureError::Server {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            }
        } else {
            MeasureError::Rejected {
                endpoint: endpoint.to_string(),
                status: status.as_u16(),
                body,
            }
        });
    }

    let bytes = resp.bytes().await.map_err(|source| MeasureError::Transport {
        endpoint: endpoint.to_string(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| MeasureError::MalformedResponse {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

fn convert_measure(raw: RawMeasure) -> Result<MeasureResult, String> {
    let total = match &raw.total {
        Some(n) => n.to_u64().map_err(|e| format!("{}: total: {e}", raw.key))?,
        None => 0,
    };

    let data = raw
        .data
        .iter()
        .map(|p| {
            Ok(DailyDataPoint {
                date: parse_day(&p.date).map_err(|e| format!("{}: {e}", raw.key))?,
                value: p.value.to_u64().map_err(|e| format!("{}: value: {e}", raw.key))?,
            })
        })
        .collect::<Result<Vec<_>, String>>()?;

    Ok(MeasureResult {
        key: raw.key,
        total,
        data,
    })
}

/// Day bucket as labelled by the server, ignoring its offset.
fn parse_day(raw: &str) -> Result<NaiveDate, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.date_naive());
    }
    raw.get(..10)
        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
        .ok_or_else(|| format!("invalid date {raw:?}"))
}

/// Mastodon's `start_at`/`end_at` are inclusive calendar dates; the engine
/// speaks half-open instants.
fn inclusive_dates(start: DateTime<Utc>, end: DateTime<Utc>) -> (NaiveDate, NaiveDate) {
    let first = start.date_naive();
    let last = (end - Duration::nanoseconds(1)).date_naive().max(first);
    (first, last)
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        body.truncate(cut);
    }
    body
}
