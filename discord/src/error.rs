use std::time::Duration;
use thiserror::Error;

pub type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed bot token")]
    MalformedToken,
    #[error("malformed url")]
    MalformedUrl(#[from] url::ParseError),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("rate limited for {}s", .0.retry_after)]
    RateLimited(RateLimitBody),
    #[error("discord error {status}: {}", .body.message)]
    Api { status: u16, body: ApiErrorBody },
}

/// Body of a 429 reply. `retry_after` is the mandated wait in fractional
/// seconds before the request may be repeated.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct RateLimitBody {
    #[serde(default)]
    pub message: String,
    pub retry_after: f64,
    #[serde(default)]
    pub global: bool,
}

/// Body of a non-throttling error reply.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub message: String,
}

impl Error {
    pub fn rate_limited(body: RateLimitBody) -> Self {
        Self::RateLimited(body)
    }

    pub fn api(status: u16, body: ApiErrorBody) -> Self {
        Self::Api { status, body }
    }

    /// Returns the mandated wait if the platform throttled the request. Any
    /// other error is terminal for the attempt that produced it.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited(body) => Some(Duration::from_secs_f64(body.retry_after.max(0.0))),
            _ => None,
        }
    }
}
