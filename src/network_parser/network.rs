use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue, USER_AGENT};
use tracing::debug;

use crate::base_system::context::Config;
use crate::base_system::retry::{RetryPolicy, retry_with_backoff};

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub request_timeout: Duration,
    pub user_agent: String,
    pub insecure_tls: bool,
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            user_agent: "Mozilla/5.0".to_string(),
            insecure_tls: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl FetchConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            request_timeout: cfg.request_timeout(),
            user_agent: cfg.user_agent.clone(),
            insecure_tls: cfg.insecure_tls,
            retry: RetryPolicy::new(cfg.max_retries, cfg.retry_wait()),
        }
    }
}

/// Blocking HTTP client for chapter pages. Each instance owns its client;
/// callers pass it where it's needed.
pub struct HttpFetcher {
    client: Client,
    config: FetchConfig,
}

impl HttpFetcher {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        default_headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        default_headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent)
                .unwrap_or(HeaderValue::from_static("Mozilla/5.0")),
        );

        let client = Client::builder()
            .default_headers(default_headers)
            .danger_accept_invalid_certs(config.insecure_tls)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// GET `url`, retrying transport errors and non-2xx answers.
    pub fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>> {
        retry_with_backoff(self.config.retry, url, |attempt| -> Result<Vec<u8>> {
            debug!("GET {url} (第 {attempt} 次)");
            let resp = self.client.get(url).send()?;
            let status = resp.status();
            if !status.is_success() {
                return Err(anyhow!("HTTP {status}"));
            }
            let bytes = resp.bytes()?;
            Ok(bytes.to_vec())
        })
        .with_context(|| format!("fetch {url}"))
    }

    /// Like [`fetch_bytes`](Self::fetch_bytes); invalid UTF-8 becomes U+FFFD.
    pub fn fetch_text(&self, url: &str) -> Result<String> {
        let bytes = self.fetch_bytes(url)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}
