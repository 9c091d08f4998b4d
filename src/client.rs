/// OpenAI-style HTTP client: completions, edits, and the models listing used
/// for key validation. One request/response per call — no streaming, no
/// retries; transport failures surface as errors for the orchestrators to
/// handle.
use anyhow::{Result, anyhow};
use serde::Deserialize;

// ── Model ids ─────────────────────────────────────────────────────────────────

/// Config alias that selects the chat-tuned completion backend.
pub const CHAT_ALIAS: &str = "ChatGPT";
const CHAT_ALIAS_BACKEND: &str = "text-chat-davinci-002-20230126";

/// The rewrite flow always uses the edit-capable backend.
pub const EDIT_MODEL: &str = "code-davinci-edit-001";

/// Map the configured model selector to a backend model id. The `ChatGPT`
/// alias resolves to the chat-tuned id; anything else passes through verbatim.
pub fn resolve_model(configured: &str) -> &str {
    if configured == CHAT_ALIAS {
        CHAT_ALIAS_BACKEND
    } else {
        configured
    }
}

// ── Sampling parameters ───────────────────────────────────────────────────────

// Deterministic sampling. The penalties keep the model from parroting the
// replayed conversation, and the stop sequence ends generation before the
// model starts writing the human's next line.
const TEMPERATURE: f32 = 0.0;
const TOP_P: f32 = 1.0;
const FREQUENCY_PENALTY: f32 = 1.0;
const PRESENCE_PENALTY: f32 = 1.0;
const STOP: &[&str] = &["Human:"];

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TextChoice {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoicesResponse {
    #[serde(default)]
    choices: Vec<TextChoice>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Debug, Deserialize)]
struct ModelEntry {
    id: String,
}

/// First choice's text, or `None` when the backend returned nothing usable.
/// An empty string counts as unusable.
fn first_text(resp: ChoicesResponse) -> Option<String> {
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.text)
        .filter(|t| !t.is_empty())
}

// ── Api seam ──────────────────────────────────────────────────────────────────

/// The backend calls the orchestrators make, behind a trait so tests can
/// script responses. `complete`/`edit` return `Ok(None)` for "request went
/// through but no usable text came back" — an in-band condition, not an
/// error.
pub trait ModelApi {
    fn has_key(&self) -> bool;
    fn set_key(&mut self, key: String);
    async fn list_models(&self) -> Result<Vec<String>>;
    async fn complete(&self, prompt: &str) -> Result<Option<String>>;
    async fn edit(&self, input: &str, instruction: &str) -> Result<Option<String>>;
}

// ── Client ────────────────────────────────────────────────────────────────────

pub struct Client {
    http: reqwest::Client,
    pub endpoint: String,
    /// Configured selector — resolved through `resolve_model` per request.
    pub model: String,
    pub max_reply_tokens: u32,
    api_key: Option<String>,
}

impl Client {
    pub fn new(endpoint: String, model: String, max_reply_tokens: u32) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            model,
            max_reply_tokens,
            api_key: None,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoint.trim_end_matches('/'))
    }

    async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<ChoicesResponse> {
        let mut req = self
            .http
            .post(self.url(path))
            .header("Content-Type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(anyhow!("API error {}: {}", status, text));
        }
        Ok(resp.json().await?)
    }
}

impl ModelApi for Client {
    fn has_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    fn set_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    /// Lightweight read-only call — the credential validator.
    async fn list_models(&self) -> Result<Vec<String>> {
        let mut req = self.http.get(self.url("v1/models"));
        if let Some(key) = &self.api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }
        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(anyhow!("API error {}", resp.status()));
        }
        let models: ModelsResponse = resp.json().await?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }

    async fn complete(&self, prompt: &str) -> Result<Option<String>> {
        let body = serde_json::json!({
            "model": resolve_model(&self.model),
            "prompt": prompt,
            "temperature": TEMPERATURE,
            "max_tokens": self.max_reply_tokens,
            "top_p": TOP_P,
            "frequency_penalty": FREQUENCY_PENALTY,
            "presence_penalty": PRESENCE_PENALTY,
            "stop": STOP,
        });
        let resp = self.post_json("v1/completions", body).await?;
        Ok(first_text(resp))
    }

    async fn edit(&self, input: &str, instruction: &str) -> Result<Option<String>> {
        let body = serde_json::json!({
            "model": EDIT_MODEL,
            "input": input,
            "instruction": instruction,
            "temperature": TEMPERATURE,
            "top_p": TOP_P,
        });
        let resp = self.post_json("v1/edits", body).await?;
        Ok(first_text(resp))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
