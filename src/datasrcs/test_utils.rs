//! Test utilities for data sources

use super::http::HttpFetcher;
use crate::asn::ResolveError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A request seen by [`ScriptedFetcher`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub key: String,
    pub headers: Vec<(String, String)>,
}

/// [`HttpFetcher`] that serves canned responses and counts requests
///
/// GET requests are keyed as `"GET <url>"` and form POSTs as
/// `"POST <url> k=v&k=v"` with the form fields in call order. Unknown keys
/// fail with a transport error.
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, Result<String, ResolveError>>>,
    requests: Mutex<Vec<RecordedRequest>>,
    count: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get(self, url: &str, body: impl Into<String>) -> Self {
        self.route(format!("GET {url}"), Ok(body.into()))
    }

    pub fn on_post(self, url: &str, form: &[(&str, &str)], body: impl Into<String>) -> Self {
        self.route(post_key(url, form.iter().map(|(k, v)| (*k, *v))), Ok(body.into()))
    }

    pub fn on_get_error(self, url: &str, error: ResolveError) -> Self {
        self.route(format!("GET {url}"), Err(error))
    }

    fn route(self, key: String, response: Result<String, ResolveError>) -> Self {
        self.routes
            .lock()
            .expect("mutex poisoned")
            .insert(key, response);
        self
    }

    /// Number of requests made so far
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Every request made so far, in order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("mutex poisoned").clone()
    }

    fn serve(&self, key: String, headers: &[(&str, String)]) -> Result<String, ResolveError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .expect("mutex poisoned")
            .push(RecordedRequest {
                key: key.clone(),
                headers: headers
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            });

        self.routes
            .lock()
            .expect("mutex poisoned")
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Err(ResolveError::Transport(format!("no route for {key}"))))
    }
}

fn post_key<'a>(url: &str, form: impl Iterator<Item = (&'a str, &'a str)>) -> String {
    let body: Vec<String> = form.map(|(k, v)| format!("{k}={v}")).collect();
    format!("POST {url} {}", body.join("&"))
}

#[async_trait]
impl HttpFetcher for ScriptedFetcher {
    async fn get(&self, url: &str) -> Result<String, ResolveError> {
        self.serve(format!("GET {url}"), &[])
    }

    async fn post_form(
        &self,
        url: &str,
        headers: &[(&str, String)],
        form: &[(&str, String)],
    ) -> Result<String, ResolveError> {
        let key = post_key(url, form.iter().map(|(k, v)| (*k, v.as_str())));
        self.serve(key, headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_fetcher() {
        let fetcher = ScriptedFetcher::new()
            .on_get("http://db/ip/192.0.2.1", "page")
            .on_post("http://db/api", &[("asn", "64500")], "{}");

        assert_eq!(fetcher.get("http://db/ip/192.0.2.1").await.unwrap(), "page");
        let body = fetcher
            .post_form(
                "http://db/api",
                &[("X-Api-Key", "k".to_string())],
                &[("asn", "64500".to_string())],
            )
            .await
            .unwrap();
        assert_eq!(body, "{}");
        assert!(matches!(
            fetcher.get("http://db/missing").await,
            Err(ResolveError::Transport(_))
        ));

        assert_eq!(fetcher.count(), 3);
        let requests = fetcher.requests();
        assert_eq!(requests[1].key, "POST http://db/api asn=64500");
        assert_eq!(
            requests[1].headers,
            vec![("X-Api-Key".to_string(), "k".to_string())]
        );
    }
}
