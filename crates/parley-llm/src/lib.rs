// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow, bail};
use parley_app::Role;
use reqwest::StatusCode;
use reqwest::blocking::Client as HttpClient;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

// Static identifying headers OpenRouter uses for app attribution.
const REFERER_HEADER: (&str, &str) = ("HTTP-Referer", "https://parley.dev");
const TITLE_HEADER: (&str, &str) = ("X-Title", "parley");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    pub context_length: Option<i64>,
}

/// Zero-argument credential supplier. The client reads it on every request,
/// so a key rotated through Settings is picked up without rebuilding the
/// client.
pub type ApiKeyProvider = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// Shared mutable slot behind an [`ApiKeyProvider`]. The session owns one
/// handle and the client holds the provider side. Not `Debug`: the secret
/// must never reach error output.
#[derive(Clone, Default)]
pub struct ApiKeyHandle {
    key: Arc<RwLock<String>>,
}

impl ApiKeyHandle {
    pub fn new(initial: &str) -> Self {
        Self {
            key: Arc::new(RwLock::new(initial.to_owned())),
        }
    }

    pub fn set(&self, key: &str) {
        if let Ok(mut slot) = self.key.write() {
            *slot = key.to_owned();
        }
    }

    /// The current key, or `None` when blank.
    pub fn get(&self) -> Option<String> {
        let slot = self.key.read().ok()?;
        let trimmed = slot.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_owned())
        }
    }

    pub fn provider(&self) -> ApiKeyProvider {
        let handle = self.clone();
        Arc::new(move || handle.get())
    }
}

/// The two remote operations the session depends on. Implemented by
/// [`Client`] for real traffic and stubbed out by the testkit.
pub trait CompletionApi {
    fn list_models(&self) -> Result<Vec<ModelInfo>>;

    fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<String>;
}

#[derive(Clone)]
pub struct Client {
    base_url: String,
    http: HttpClient,
    key_provider: ApiKeyProvider,
}

impl Client {
    pub fn new(base_url: &str, timeout: Duration, key_provider: ApiKeyProvider) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            bail!("llm.base_url must not be empty");
        }
        let parsed = url::Url::parse(&base_url)
            .with_context(|| format!("invalid llm.base_url {base_url:?}"))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!(
                "llm.base_url {base_url:?} must use http or https, got {}",
                parsed.scheme()
            );
        }

        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            base_url,
            http,
            key_provider,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, builder: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        let mut builder = builder
            .header(REFERER_HEADER.0, REFERER_HEADER.1)
            .header(TITLE_HEADER.0, TITLE_HEADER.1);
        // A missing key is not an error here; the provider rejects the
        // unauthenticated call and that surfaces as an HTTP failure.
        if let Some(key) = (self.key_provider)() {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }
        builder
    }

    fn fetch_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self
            .request(self.http.get(format!("{}/models", self.base_url)))
            .send()
            .map_err(|error| connection_error(&self.base_url, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body));
        }

        let parsed: ModelsResponse = response.json().context("decode model list")?;
        Ok(parsed.data.into_iter().map(ModelRow::into_model_info).collect())
    }

    fn fetch_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<String> {
        let request = ChatRequest::new(model, messages, temperature);
        let response = self
            .request(self.http.post(format!("{}/chat/completions", self.base_url)))
            .json(&request)
            .send()
            .map_err(|error| connection_error(&self.base_url, error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(clean_error_response(status, &body));
        }

        let parsed: ChatCompletionResponse = response.json().context("decode chat response")?;
        // Zero choices is the provider saying "nothing"; treat it as an
        // empty reply rather than a failure.
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .unwrap_or_default())
    }
}

impl CompletionApi for Client {
    fn list_models(&self) -> Result<Vec<ModelInfo>> {
        self.fetch_models()
    }

    fn chat_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        temperature: Option<f32>,
    ) -> Result<String> {
        self.fetch_completion(model, messages, temperature)
    }
}

fn connection_error(base_url: &str, error: reqwest::Error) -> anyhow::Error {
    anyhow!("cannot reach {base_url} ({error})")
}

fn clean_error_response(status: StatusCode, body: &str) -> anyhow::Error {
    if let Ok(parsed) = serde_json::from_str::<ErrorEnvelope>(body)
        && let Some(error) = parsed.error
        && !error.message.is_empty()
    {
        return anyhow!("server error ({}): {}", status.as_u16(), error.message);
    }

    if body.len() < 100 && !body.contains('{') && !body.trim().is_empty() {
        return anyhow!("server error ({}): {}", status.as_u16(), body.trim());
    }

    anyhow!("server returned {}", status.as_u16())
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

impl<'a> ChatRequest<'a> {
    fn new(model: &'a str, messages: &'a [ChatMessage], temperature: Option<f32>) -> Self {
        Self {
            model,
            messages: messages
                .iter()
                .map(|message| WireMessage {
                    role: message.role.as_str(),
                    content: &message.content,
                })
                .collect(),
            temperature,
        }
    }
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelRow>,
}

// Optional fields stay `Value` so a malformed entry degrades to "absent"
// instead of failing the whole catalog.
#[derive(Debug, Deserialize)]
struct ModelRow {
    id: String,
    #[serde(default)]
    name: serde_json::Value,
    #[serde(default)]
    top_provider: serde_json::Value,
}

impl ModelRow {
    fn into_model_info(self) -> ModelInfo {
        let context_length = self
            .top_provider
            .get("context_length")
            .and_then(serde_json::Value::as_i64);
        let name = match self.name.as_str() {
            Some(name) if !name.is_empty() => name.to_owned(),
            _ => self.id.clone(),
        };
        ModelInfo {
            id: self.id,
            name,
            context_length,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}
