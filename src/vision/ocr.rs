//! OCR collaborators
//!
//! Text is read from a tag crop by a vision-language model behind an
//! OpenAI-style chat completions endpoint. Without credentials an offline
//! recognizer stands in and answers `UNKNOWN` for every crop.

use anyhow::{Context, Result};
use base64::Engine;
use image::{DynamicImage, ImageFormat};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use crate::config::OcrSettings;
use crate::error::OcrError;

/// Prefix of ledger text for crops whose OCR call failed
pub const OCR_ERROR_MARKER: &str = "[OCR_ERROR]";

/// Answer of the offline recognizer
pub const UNKNOWN_TEXT: &str = "UNKNOWN";

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "ARK_API_KEY";

/// Reads the text on a tag crop
pub trait TextRecognizer: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    fn recognize(&self, image: &DynamicImage, prompt: &str) -> Result<String, OcrError>;
}

/// Which recognizer a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OcrBackend {
    #[default]
    Ark,
    Offline,
}

/// Build the recognizer selected by `settings`.
///
/// The Ark backend needs an API key from the config or `ARK_API_KEY`; without
/// one the offline recognizer is used.
pub fn build_recognizer(settings: &OcrSettings) -> Result<Box<dyn TextRecognizer>> {
    match settings.backend {
        OcrBackend::Offline => Ok(Box::new(OfflineRecognizer)),
        OcrBackend::Ark => {
            let api_key = settings
                .api_key
                .clone()
                .filter(|k| !k.trim().is_empty())
                .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()));

            match api_key {
                Some(key) => Ok(Box::new(ArkOcrClient::new(
                    &settings.base_url,
                    &settings.model,
                    key,
                    Duration::from_secs(settings.timeout_secs),
                )?)),
                None => {
                    warn!("No OCR API key configured and {} unset, using offline OCR", API_KEY_ENV);
                    Ok(Box::new(OfflineRecognizer))
                }
            }
        }
    }
}

/// Recognizer used without network access
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineRecognizer;

impl TextRecognizer for OfflineRecognizer {
    fn name(&self) -> &str {
        "offline"
    }

    fn recognize(&self, _image: &DynamicImage, _prompt: &str) -> Result<String, OcrError> {
        Ok(UNKNOWN_TEXT.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for the Ark chat completions endpoint
pub struct ArkOcrClient {
    runtime: Runtime,
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl ArkOcrClient {
    pub fn new(base_url: &str, model: &str, api_key: String, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to create tokio runtime")?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let endpoint = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        info!("OCR endpoint {} (model {})", endpoint, model);

        Ok(Self {
            runtime,
            client,
            endpoint,
            model: model.to_string(),
            api_key,
        })
    }

    async fn request(&self, payload: serde_json::Value) -> Result<String, OcrError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ChatResponse = response.json().await?;
        let content = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| OcrError::Response("no choices in reply".to_string()))?
            .message
            .content
            .unwrap_or_default();

        Ok(last_line(&content))
    }
}

impl TextRecognizer for ArkOcrClient {
    fn name(&self) -> &str {
        "ark"
    }

    fn recognize(&self, image: &DynamicImage, prompt: &str) -> Result<String, OcrError> {
        let payload = chat_payload(&self.model, &png_data_url(image)?, prompt);
        let text = self.runtime.block_on(self.request(payload))?;
        debug!("OCR reply: {:?}", text);
        Ok(text)
    }
}

/// Encode `image` as a `data:image/png;base64,` URL
pub fn png_data_url(image: &DynamicImage) -> Result<String, OcrError> {
    let mut bytes = Vec::new();
    image.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
    Ok(format!("data:image/png;base64,{}", encoded))
}

fn chat_payload(model: &str, data_url: &str, prompt: &str) -> serde_json::Value {
    serde_json::json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "image_url", "image_url": data_url },
                { "type": "text", "text": prompt },
            ],
        }],
    })
}

/// Last non-empty line of a model reply, trimmed
pub fn last_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .unwrap_or_default()
        .to_string()
}
