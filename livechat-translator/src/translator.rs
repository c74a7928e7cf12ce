use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use surf::Client;
use utils::surf_logging::SurfLogging;

/// Engine tag reported for results served from the cache.
pub const CACHED_ENGINE: &str = "cached";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translation {
    pub translated_text: String,
    /// Which engine produced the text, `"cached"` for cache hits.
    pub engine: String,
}

impl Translation {
    pub fn new(translated_text: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            translated_text: translated_text.into(),
            engine: engine.into(),
        }
    }

    pub fn is_cached(&self) -> bool {
        self.engine == CACHED_ENGINE
    }
}

/// The remote translate operation.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, source_lang: &str) -> Result<Translation>;

    /// Cheap liveness probe used while reconnecting.
    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

pub type SharedTranslator = Arc<dyn Translator>;

#[derive(Clone, Debug)]
pub struct HttpTranslatorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub target_language: String,
    /// Engine tag attached to fresh results
    pub engine: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UpstreamRequest<'a> {
    text: &'a str,
    source_lang: &'a str,
    target_lang: &'a str,
}

#[derive(Deserialize)]
struct UpstreamResponse {
    #[serde(alias = "translatedText")]
    translated_text: String,
}

/// Calls a JSON translation endpoint over HTTP.
pub struct HttpTranslator {
    http: Client,
    config: HttpTranslatorConfig,
}

impl HttpTranslator {
    pub fn new(config: HttpTranslatorConfig) -> Self {
        Self {
            http: Client::new().with(SurfLogging),
            config,
        }
    }
}

#[async_trait]
impl Translator for HttpTranslator {
    async fn translate(&self, text: &str, source_lang: &str) -> Result<Translation> {
        let body = UpstreamRequest {
            text,
            source_lang,
            target_lang: &self.config.target_language,
        };

        let mut request = self
            .http
            .post(&self.config.endpoint)
            .body_json(&body)
            .map_err(|err| Error::validation(err.to_string()))?;
        if let Some(key) = &self.config.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let mut response = request
            .await
            .map_err(|err| Error::network(err.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            return Err(Error::api(format!("upstream rejected request: {}", status)));
        }
        if status.is_server_error() {
            return Err(Error::network(format!("upstream unavailable: {}", status)));
        }

        let parsed: UpstreamResponse = response
            .body_json()
            .await
            .map_err(|err| Error::api(format!("malformed upstream response: {}", err)))?;
        if parsed.translated_text.trim().is_empty() {
            return Err(Error::api("upstream returned an empty translation"));
        }

        Ok(Translation::new(parsed.translated_text, self.config.engine.clone()))
    }
}
