use std::collections::HashMap;

use reqwest::Client;
use serde_json::Value;

use super::{ExtractError, ExtractRequest, Extractor};
use crate::config::TasklightConfig;

const KEYRING_SERVICE: &str = "tasklight";
const KEYRING_SERVER: &str = "anthropic-api";
const API_VERSION: &str = "2023-06-01";

/// Environment variable that overrides the keyring-stored key.
pub const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Extraction service backed by the Anthropic Messages API.
#[derive(Clone)]
pub struct AnthropicExtractor {
    http: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    max_input_chars: usize,
}

impl AnthropicExtractor {
    pub fn new(api_key: &str, config: &TasklightConfig) -> Result<Self, ExtractError> {
        if api_key.trim().is_empty() {
            return Err(ExtractError::MissingKey);
        }
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_input_chars: config.max_input_chars,
        })
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.api_base)
    }

    async fn post(&self, body: &Value) -> Result<Value, ExtractError> {
        let resp = self
            .http
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ExtractError::Status { status, body });
        }

        Ok(resp.json().await?)
    }

    /// Verify the key with a minimal request.
    pub async fn check_key(&self) -> Result<(), ExtractError> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": 4,
            "messages": [
                { "role": "user", "content": "Reply with OK" }
            ]
        });
        self.post(&body).await.map(|_| ())
    }
}

impl Extractor for AnthropicExtractor {
    /// Prompts over `max_input_chars` are refused rather than truncated, so the
    /// caller can fall back on the whole text.
    async fn extract(&self, request: ExtractRequest<'_>) -> Result<String, ExtractError> {
        let chars = request.prompt.chars().count();
        if chars > self.max_input_chars {
            return Err(ExtractError::InputTooLong {
                chars,
                max: self.max_input_chars,
            });
        }

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system_prompt(&request),
            "messages": [
                { "role": "user", "content": request.prompt }
            ]
        });

        log::debug!("Sending {} chars to {}", chars, self.model);
        let api_resp = self.post(&body).await?;
        response_text(&api_resp).map(str::to_string)
    }
}

fn system_prompt(request: &ExtractRequest<'_>) -> String {
    match request.now {
        Some(now) => format!("{}\n\nCurrent time: {}", request.instruction, now),
        None => request.instruction.to_string(),
    }
}

/// Text of the first content block of a Messages API response.
pub fn response_text(api_resp: &Value) -> Result<&str, ExtractError> {
    api_resp["content"]
        .as_array()
        .and_then(|arr| arr.first())
        .and_then(|block| block["text"].as_str())
        .ok_or(ExtractError::EmptyResponse)
}

/// The API key from the environment, else from the system keyring.
pub async fn resolve_api_key() -> Result<String, ExtractError> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        if !key.trim().is_empty() {
            return Ok(key);
        }
    }
    load_api_key().await?.ok_or(ExtractError::MissingKey)
}

/// Store the API key in the system keyring, replacing any existing one.
pub async fn store_api_key(key: &str) -> Result<(), ExtractError> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| ExtractError::Keyring(format!("Failed to connect to keyring: {}", e)))?;

    keyring
        .create_item("Tasklight Anthropic API Key", &key_attributes(), key.as_bytes(), true)
        .await
        .map_err(|e| ExtractError::Keyring(format!("Failed to store API key: {}", e)))?;

    Ok(())
}

/// Load the API key from the system keyring.
pub async fn load_api_key() -> Result<Option<String>, ExtractError> {
    let keyring = oo7::Keyring::new()
        .await
        .map_err(|e| ExtractError::Keyring(format!("Failed to connect to keyring: {}", e)))?;

    let items = keyring
        .search_items(&key_attributes())
        .await
        .map_err(|e| ExtractError::Keyring(format!("Failed to search keyring: {}", e)))?;

    if let Some(item) = items.first() {
        let secret = item
            .secret()
            .await
            .map_err(|e| ExtractError::Keyring(format!("Failed to read secret: {}", e)))?;
        let key = String::from_utf8(secret.to_vec())
            .map_err(|e| ExtractError::Keyring(format!("Invalid UTF-8 in secret: {}", e)))?;
        if !key.is_empty() {
            return Ok(Some(key));
        }
    }

    Ok(None)
}

fn key_attributes() -> HashMap<&'static str, &'static str> {
    let mut attrs = HashMap::new();
    attrs.insert("service", KEYRING_SERVICE);
    attrs.insert("server", KEYRING_SERVER);
    attrs
}
