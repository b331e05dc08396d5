//! The webhook client (§6): "abstracted behind a POST/GET/HEAD
//! interface". The shape is lifted straight from
//! `ringrtc::lite::http::Client` (there: `send_request(Request,
//! ResponseCallback)`; here: three async methods instead of a
//! callback, since the engine already runs on `tokio`).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{EngineError, Result};

#[derive(Clone, Debug, Default)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

impl WebhookResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// An injected, stateless, thread-safe HTTP collaborator (§5: "the
/// webhook client (stateless, thread-safe) ... process-wide immutable
/// after engine init").
#[async_trait]
pub trait WebhookClient: Send + Sync {
    async fn post(&self, url: &str, form: &HashMap<String, String>) -> Result<WebhookResponse>;
    async fn get(&self, url: &str) -> Result<WebhookResponse>;
    async fn head(&self, url: &str) -> Result<WebhookResponse>;
}

/// The production client, backed by `reqwest`.
pub struct ReqwestWebhookClient {
    client: reqwest::Client,
}

impl ReqwestWebhookClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .expect("reqwest client construction"),
        }
    }

    async fn to_response(
        url: &str,
        result: std::result::Result<reqwest::Response, reqwest::Error>,
    ) -> Result<WebhookResponse> {
        let resp = result.map_err(|source| EngineError::WebhookTransport {
            url: url.to_string(),
            source,
        })?;
        let status = resp.status().as_u16();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|source| EngineError::WebhookTransport {
                url: url.to_string(),
                source,
            })?;
        Ok(WebhookResponse {
            status,
            body,
            headers,
        })
    }
}

#[async_trait]
impl WebhookClient for ReqwestWebhookClient {
    async fn post(&self, url: &str, form: &HashMap<String, String>) -> Result<WebhookResponse> {
        let result = self.client.post(url).form(form).send().await;
        Self::to_response(url, result).await
    }

    async fn get(&self, url: &str) -> Result<WebhookResponse> {
        let result = self.client.get(url).send().await;
        Self::to_response(url, result).await
    }

    async fn head(&self, url: &str) -> Result<WebhookResponse> {
        let result = self.client.head(url).send().await;
        Self::to_response(url, result).await
    }
}

/// A deterministic, in-memory `WebhookClient` for tests: each URL has a
/// FIFO queue of canned responses; once exhausted, every further request
/// to that URL gets `default_response` (an empty 200, i.e. an implicit
/// hangup, per §7).
pub struct ScriptedWebhookClient {
    responses: parking_lot::Mutex<HashMap<String, std::collections::VecDeque<WebhookResponse>>>,
    default_response: WebhookResponse,
    calls: parking_lot::Mutex<Vec<(&'static str, String)>>,
}

impl Default for ScriptedWebhookClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedWebhookClient {
    pub fn new() -> Self {
        Self {
            responses: parking_lot::Mutex::new(HashMap::new()),
            default_response: WebhookResponse {
                status: 200,
                body: String::new(),
                headers: HashMap::new(),
            },
            calls: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Queues a 200 response with `body` as the next response for `url`.
    pub fn script_body(&self, url: impl Into<String>, body: impl Into<String>) {
        self.script(
            url,
            WebhookResponse {
                status: 200,
                body: body.into(),
                headers: HashMap::new(),
            },
        );
    }

    pub fn script(&self, url: impl Into<String>, response: WebhookResponse) {
        self.responses
            .lock()
            .entry(url.into())
            .or_default()
            .push_back(response);
    }

    /// Every `(method, url)` this client has been asked to fetch, in
    /// call order.
    pub fn calls(&self) -> Vec<(&'static str, String)> {
        self.calls.lock().clone()
    }

    fn respond(&self, method: &'static str, url: &str) -> WebhookResponse {
        self.calls.lock().push((method, url.to_string()));
        self.responses
            .lock()
            .get_mut(url)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| self.default_response.clone())
    }
}

#[async_trait]
impl WebhookClient for ScriptedWebhookClient {
    async fn post(&self, url: &str, _form: &HashMap<String, String>) -> Result<WebhookResponse> {
        Ok(self.respond("POST", url))
    }

    async fn get(&self, url: &str) -> Result<WebhookResponse> {
        Ok(self.respond("GET", url))
    }

    async fn head(&self, url: &str) -> Result<WebhookResponse> {
        Ok(self.respond("HEAD", url))
    }
}
