use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use tgd_core::{config::Config, errors::Error, ports::UpdateSource, Result};

/// Extra time the HTTP client waits on top of the long-poll timeout.
const TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

#[derive(Clone, Debug)]
pub struct PollerConfig {
    pub api_url: String,
    pub token: String,
    pub timeout: Duration,
    pub limit: u32,
    pub allowed_updates: Vec<String>,
}

impl From<&Config> for PollerConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            api_url: cfg.telegram_api_url.clone(),
            token: cfg.telegram_bot_token.clone(),
            timeout: cfg.poll_timeout,
            limit: cfg.poll_limit,
            allowed_updates: cfg.allowed_updates.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GetUpdates<'a> {
    offset: u64,
    limit: u32,
    timeout: u64,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    allowed_updates: &'a [String],
}

/// `getUpdates` long poller. Returns the raw response body; decoding and
/// `ok:false` handling belong to the codec.
#[derive(Clone)]
pub struct HttpPoller {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
    limit: u32,
    allowed_updates: Vec<String>,
}

impl HttpPoller {
    pub fn new(cfg: PollerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout + TIMEOUT_MARGIN)
            .build()
            .map_err(map_err)?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/bot{}/getUpdates",
                cfg.api_url.trim_end_matches('/'),
                cfg.token
            ),
            timeout: cfg.timeout,
            limit: cfg.limit.clamp(1, 100),
            allowed_updates: cfg.allowed_updates,
        })
    }

    fn request(&self, offset: u64) -> GetUpdates<'_> {
        GetUpdates {
            offset,
            limit: self.limit,
            timeout: self.timeout.as_secs(),
            allowed_updates: &self.allowed_updates,
        }
    }
}

#[async_trait]
impl UpdateSource for HttpPoller {
    async fn fetch(&self, offset: u64) -> Result<Vec<u8>> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&self.request(offset))
            .send()
            .await
            .map_err(map_err)?;
        let body = resp.bytes().await.map_err(map_err)?;
        Ok(body.to_vec())
    }
}

// The request URL embeds the bot token; keep it out of error text.
fn map_err(e: reqwest::Error) -> Error {
    Error::External(format!("telegram transport error: {}", e.without_url()))
}
