//! HTTP download and the prosecution record store.

use std::time::Duration;

use anyhow::Context;
use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

mod records;

pub use records::{RecordStore, SqliteRecordStore, StoreError, StoredRow, DATA_TABLE};

pub const CRATE_NAME: &str = "fsa-storage";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    /// Final URL after redirects, without its query string.
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Single-attempt HTTP GET client. Failures are surfaced to the caller, never retried.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(&self, url: &str) -> Result<FetchedResponse, FetchError> {
        self.fetch_with_query(url, &[]).await
    }

    /// GET `url` with `query` appended. Only the bare URL is recorded on the span, so
    /// credentials passed as query parameters stay out of the logs.
    pub async fn fetch_with_query(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let resp = self.client.get(url).query(query).send().await?;
            let status = resp.status();
            let final_url = without_query(resp.url());

            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }

            let body = resp.bytes().await?.to_vec();
            debug!(bytes = body.len(), %status, "fetched");
            Ok(FetchedResponse { final_url, body })
        }
        .instrument(span)
        .await
    }
}

fn without_query(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
