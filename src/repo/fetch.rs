//! Fetching published archives by name.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;

/// Errors while fetching an archive
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP {status} fetching {url}")]
    Status { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Source of published archive bytes, e.g. an upstream chart repository.
pub trait ArchiveFetcher: Send + Sync {
    /// Bytes of the archive called `name`, or `None` when it does not exist.
    fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, FetchError>;
}

/// Fetches `<base_url>/<name>` over HTTP.
#[derive(Debug, Clone)]
pub struct HttpArchiveFetcher {
    base_url: String,
    http: Client,
}

impl HttpArchiveFetcher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, FetchError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn url_for(&self, name: &str) -> String {
        format!("{}/{}", self.base_url, name.trim_start_matches('/'))
    }
}

impl ArchiveFetcher for HttpArchiveFetcher {
    fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, FetchError> {
        let url = self.url_for(name);
        let response = self.http.get(&url).send()?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.bytes()?.to_vec())),
            status => Err(FetchError::Status {
                status: status.as_u16(),
                url,
            }),
        }
    }
}
