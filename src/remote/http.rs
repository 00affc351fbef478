//! Blocking HTTP probe used by URL confirmation

use std::time::Duration;

use reqwest::blocking::Client;
use tracing::debug;

use super::{HttpProbe, RemoteError};

/// Per-request timeout; the confirmation loop has its own overall bound
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ReqwestProbe {
    client: Client,
}

impl ReqwestProbe {
    pub fn new() -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(format!("strata/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

impl HttpProbe for ReqwestProbe {
    /// The body is returned whatever the status code; only the content is
    /// matched against expectations
    fn get(&self, url: &str) -> Result<String, RemoteError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| RemoteError::Transport(format!("GET {} failed: {}", url, e)))?;

        debug!(url, status = %response.status(), "Fetched");
        response
            .text()
            .map_err(|e| RemoteError::Transport(format!("Failed to read body from {}: {}", url, e)))
    }
}
