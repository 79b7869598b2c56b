//! Translation collaborators. The pipeline only sees the `Translator`
//! trait; the concrete backend (cloud API or locally hosted model server)
//! is selected from configuration at startup.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;

pub trait Translator: Send {
    fn translate(&self, text: &str) -> Result<String>;
}

fn http_agent() -> ureq::Agent {
    // The per-request timeout doubles as the pipeline's cycle timeout: a
    // stuck backend fails the cycle instead of starving the in-flight gate.
    ureq::AgentBuilder::new()
        .timeout(Duration::from_secs(15))
        .build()
}

// --- DEEPL ---

const DEEPL_API_URL: &str = "https://api-free.deepl.com/v2/translate";

pub struct DeepL {
    agent: ureq::Agent,
    auth_key: String,
    target_lang: String,
}

#[derive(Deserialize)]
struct DeepLResponse {
    #[serde(default)]
    translations: Vec<DeepLTranslation>,
}

#[derive(Deserialize)]
struct DeepLTranslation {
    text: String,
}

impl DeepL {
    pub fn new(auth_key: String, target_lang: &str) -> Result<Self> {
        if auth_key.trim().is_empty() {
            return Err(anyhow!("deepl auth key is empty"));
        }
        Ok(Self {
            agent: http_agent(),
            auth_key,
            target_lang: target_lang.to_uppercase(),
        })
    }
}

impl Translator for DeepL {
    fn translate(&self, text: &str) -> Result<String> {
        let response: DeepLResponse = self
            .agent
            .post(DEEPL_API_URL)
            .send_form(&[
                ("auth_key", self.auth_key.as_str()),
                ("target_lang", self.target_lang.as_str()),
                ("text", text),
            ])
            .context("deepl request failed")?
            .into_json()
            .context("deepl response was not valid JSON")?;

        match response.translations.into_iter().next() {
            Some(t) => Ok(t.text),
            None => Ok(String::new()),
        }
    }
}

// --- LOCAL MODEL SERVER ---

/// Client for a locally hosted translation model server speaking the
/// simple `{"content": ..., "message": "translate sentences"}` protocol.
pub struct LocalServer {
    agent: ureq::Agent,
    url: String,
}

impl LocalServer {
    pub fn new(url: String) -> Result<Self> {
        if url.trim().is_empty() {
            return Err(anyhow!("local translation server URL is empty"));
        }
        Ok(Self {
            agent: http_agent(),
            url,
        })
    }
}

impl Translator for LocalServer {
    fn translate(&self, text: &str) -> Result<String> {
        let response: serde_json::Value = self
            .agent
            .post(&self.url)
            .send_json(serde_json::json!({
                "content": text,
                "message": "translate sentences"
            }))
            .context("local translation server request failed")?
            .into_json()
            .context("local translation server response was not valid JSON")?;

        // The server replies with either a bare string or {"text": ...}.
        if let Some(s) = response.as_str() {
            return Ok(s.to_string());
        }
        response["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("unexpected local server response: {}", response))
    }
}

// --- PASSTHROUGH ---

/// Echoes the source text. Backs the `--no-translate` flag (OCR-only runs).
pub struct Passthrough;

impl Translator for Passthrough {
    fn translate(&self, text: &str) -> Result<String> {
        Ok(text.to_string())
    }
}
