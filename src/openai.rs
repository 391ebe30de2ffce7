//! Shared plumbing for OpenAI-compatible HTTP endpoints.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{ResponderError, ResponderResult, ServiceFailure};
use crate::pacing::Pacer;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub base_url: String,
    pub api_key: String,
    pub timeout_secs: u64,
    /// Minimum spacing between requests from one client.
    pub min_interval: Duration,
}

impl OpenAiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            timeout_secs: 30,
            min_interval: Duration::ZERO,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }
}

#[derive(Clone)]
pub(crate) struct ApiClient {
    client: Client,
    settings: OpenAiSettings,
    service: &'static str,
    pacer: Arc<Pacer>,
}

impl ApiClient {
    pub(crate) fn new(settings: OpenAiSettings, service: &'static str) -> ResponderResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| ResponderError::from_reqwest(service, e))?;
        let pacer = Arc::new(Pacer::new(settings.min_interval));
        Ok(Self {
            client,
            settings,
            service,
            pacer,
        })
    }

    /// POST `body` to `{base_url}/{path}` and decode the JSON reply.
    pub(crate) async fn post_json<B, T>(&self, path: &str, body: &B) -> ResponderResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path);
        self.pacer.wait().await;
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ResponderError::from_reqwest(self.service, e))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| ResponderError::from_reqwest(self.service, e))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ResponderError::external(
                self.service,
                ServiceFailure::RateLimited,
                truncate(&text),
            ));
        }
        if !status.is_success() {
            return Err(ResponderError::external(
                self.service,
                ServiceFailure::Http(status.as_u16()),
                truncate(&text),
            ));
        }

        serde_json::from_str(&text).map_err(|e| {
            ResponderError::external(
                self.service,
                ServiceFailure::Malformed,
                format!("{}: {}", e, truncate(&text)),
            )
        })
    }
}

fn truncate(body: &str) -> String {
    const LIMIT: usize = 300;
    match body.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}
