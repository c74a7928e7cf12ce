//! The action-tagged message contract between the ingestion side and the
//! background process.
//!
//! Requests look like `{"action": "translate", "text": ..., "sourceLang": ...}`,
//! responses like `{"success": true, ...payload}` or
//! `{"success": false, "error": ..., "errorKind": ...}`.

use crate::error::{Error, ErrorKind, Result};
use crate::service::{ServiceStats, SharedTranslationService};
use crate::settings::Settings;
use crate::storage::SharedKeyValueStore;
use crate::transition::SharedTransitionTracker;
use crate::translator::{Translation, Translator};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use surf::Client;
use tokio::sync::watch;
use utils::surf_logging::SurfLogging;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    #[serde(rename_all = "camelCase")]
    Translate {
        text: String,
        /// Falls back to the configured source language
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_lang: Option<String>,
    },
    GetSettings,
    SettingsUpdated {
        settings: Value,
    },
    ClearCache,
    GetStats,
    Ping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingsPayload {
    pub settings: Settings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsPayload {
    pub stats: ServiceStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearedPayload {
    pub cleared: usize,
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            body: Map::new(),
        }
    }

    /// A successful response whose fields are those of `payload`.
    pub fn with<T: Serialize>(payload: &T) -> Result<Self> {
        match serde_json::to_value(payload)? {
            Value::Object(body) => Ok(Self {
                success: true,
                body,
            }),
            other => Err(Error::validation(format!(
                "response payload must be an object, got {}",
                other
            ))),
        }
    }

    pub fn failure(err: &Error) -> Self {
        let mut body = Map::new();
        body.insert("error".to_string(), Value::String(err.message().to_string()));
        body.insert("errorKind".to_string(), Value::String(err.kind().to_string()));
        Self {
            success: false,
            body,
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.body
            .get("errorKind")
            .and_then(Value::as_str)
            .and_then(|kind| kind.parse().ok())
    }

    /// Decode the payload of a successful response.
    pub fn payload<T: DeserializeOwned>(self) -> Result<T> {
        if !self.success {
            return Err(Error::api(self.error().unwrap_or("request failed").to_string()));
        }
        serde_json::from_value(Value::Object(self.body))
            .map_err(|err| Error::api(format!("unexpected response payload: {}", err)))
    }
}

/// Serves the message contract in the background process.
pub struct MessageHandler {
    service: SharedTranslationService,
    store: SharedKeyValueStore,
    settings: watch::Sender<Settings>,
    tracker: Option<SharedTransitionTracker>,
}

impl MessageHandler {
    pub fn new(
        service: SharedTranslationService,
        store: SharedKeyValueStore,
        settings: watch::Sender<Settings>,
    ) -> Self {
        Self {
            service,
            store,
            settings,
            tracker: None,
        }
    }

    /// Grace period updates are forwarded to `tracker` as well.
    pub fn with_tracker(mut self, tracker: SharedTransitionTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }

    pub fn subscribe_settings(&self) -> watch::Receiver<Settings> {
        self.settings.subscribe()
    }

    pub async fn handle(&self, request: Request) -> Response {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err(err) => {
                log::debug!("Request failed: {}", err);
                Response::failure(&err)
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Response> {
        match request {
            Request::Translate { text, source_lang } => {
                let source_lang = source_lang
                    .filter(|lang| !lang.trim().is_empty())
                    .unwrap_or_else(|| self.settings().source_language);
                let translation = self.service.translate(&text, &source_lang).await?;
                Response::with(&translation)
            }
            Request::GetSettings => Response::with(&SettingsPayload {
                settings: self.settings(),
            }),
            Request::SettingsUpdated { settings } => {
                let settings = self.update_settings(settings).await;
                Response::with(&SettingsPayload { settings })
            }
            Request::ClearCache => {
                let cache = self.service.cache();
                let cleared = cache.len();
                if let Err(err) = cache.clear_persisted(self.store.as_ref()).await {
                    log::warn!("Could not drop persisted cache: {}", err);
                }
                log::info!("Cleared {} cached translations", cleared);
                Response::with(&ClearedPayload { cleared })
            }
            Request::GetStats => Response::with(&StatsPayload {
                stats: self.service.stats(),
            }),
            Request::Ping => Ok(Response::ok()),
        }
    }

    async fn update_settings(&self, raw: Value) -> Settings {
        let settings = Settings::from_value(raw);
        if let Err(err) = settings.save(self.store.as_ref()).await {
            log::warn!("Could not persist settings, keeping them in memory: {}", err);
        }

        self.service.apply_settings(&settings);
        if let Some(tracker) = &self.tracker {
            tracker.set_grace_period(settings.grace_period());
        }
        self.settings.send_replace(settings.clone());
        log::info!("Settings updated");
        settings
    }
}

/// Reaches the translate operation through the background process.
///
/// An unreachable background means the host context is gone, which the
/// request queue treats as fatal until reconnection succeeds.
pub struct BackgroundTranslator {
    http: Client,
    endpoint: String,
}

impl BackgroundTranslator {
    /// `base_url` of the background process, e.g. `http://127.0.0.1:8000`.
    pub fn new(base_url: &str) -> Self {
        Self {
            http: Client::new().with(SurfLogging),
            endpoint: format!("{}/message", base_url.trim_end_matches('/')),
        }
    }

    async fn send(&self, request: &Request) -> Result<Response> {
        let mut response = self
            .http
            .post(&self.endpoint)
            .body_json(request)
            .map_err(|err| Error::validation(err.to_string()))?
            .await
            .map_err(|err| {
                Error::environment_invalidated(format!("background unreachable: {}", err))
            })?;

        if !response.status().is_success() {
            return Err(Error::api(format!(
                "background answered {}",
                response.status()
            )));
        }
        response
            .body_json()
            .await
            .map_err(|err| Error::api(format!("malformed background response: {}", err)))
    }
}

#[async_trait]
impl Translator for BackgroundTranslator {
    async fn translate(&self, text: &str, source_lang: &str) -> Result<Translation> {
        let request = Request::Translate {
            text: text.to_string(),
            source_lang: Some(source_lang.to_string()),
        };
        self.send(&request).await?.payload()
    }

    async fn ping(&self) -> Result<()> {
        let response = self.send(&Request::Ping).await.map_err(|err| {
            Error::environment_invalidated(err.message().to_string())
        })?;
        if response.success {
            Ok(())
        } else {
            Err(Error::environment_invalidated(
                response.error().unwrap_or("ping rejected").to_string(),
            ))
        }
    }
}
