//! HTTP access for data sources

use crate::asn::ResolveError;
use async_trait::async_trait;
use std::time::Duration;

/// Outbound HTTP used by data sources
///
/// Any non-success status is reported as a transport error, as is any
/// failure reaching the server.
#[async_trait]
pub trait HttpFetcher: Send + Sync {
    /// Fetch a page and return its body
    async fn get(&self, url: &str) -> Result<String, ResolveError>;

    /// POST a form body with extra headers and return the response body
    ///
    /// The request is sent as `application/x-www-form-urlencoded`.
    async fn post_form(
        &self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, String)],
    ) -> Result<String, ResolveError>;
}

/// [`HttpFetcher`] backed by `reqwest`
#[derive(Clone, Debug)]
pub struct ReqwestFetcher {
    client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Build a client with a per-request timeout
    pub fn new(timeout: Duration) -> Result<Self, ResolveError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ResolveError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    async fn read_body(url: &str, response: reqwest::Response) -> Result<String, ResolveError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Transport(format!("{url}: HTTP {status}")));
        }
        response
            .text()
            .await
            .map_err(|e| ResolveError::Transport(format!("{url}: {e}")))
    }
}

fn transport_error(url: &str, e: &reqwest::Error) -> ResolveError {
    if e.is_timeout() {
        ResolveError::Transport(format!("{url}: request timed out"))
    } else {
        ResolveError::Transport(format!("{url}: {e}"))
    }
}

#[async_trait]
impl HttpFetcher for ReqwestFetcher {
    async fn get(&self, url: &str) -> Result<String, ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(url, &e))?;
        Self::read_body(url, response).await
    }

    async fn post_form(
        &self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, String)],
    ) -> Result<String, ResolveError> {
        let mut request = self.client.post(url).form(form);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }
        let response = request.send().await.map_err(|e| transport_error(url, &e))?;
        Self::read_body(url, response).await
    }
}
