//! Gemini REST client.
//!
//! Requests use JSON response mode. PDF windows small enough are sent inline
//! as base64; larger ones are uploaded through the File API first and only
//! used once the service reports them `ACTIVE`.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::prompts;
use super::{
    parse_json_response, AiError, BookRequest, BookSummary, ChapterRequest, ChapterSummary,
    GenerativeService, TocRequest, TocResponse,
};
use crate::config::AiConfig;
use crate::processor::WindowPayload;
use crate::sanitize::sanitize_for_prompt;

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct GeminiService {
    client: Client,
    base_url: String,
    api_key: SecretString,
    vision_model: String,
    text_model: String,
    temperature: f32,
    max_output_tokens: u32,
    inline_upload_limit: usize,
    activation_timeout: Duration,
    activation_poll_interval: Duration,
    cancel: CancellationToken,
}

impl GeminiService {
    pub fn from_config(config: &AiConfig) -> Result<Self, AiError> {
        let api_key = crate::secrets::resolve_api_key(config)
            .map_err(|e| AiError::Configuration(e.to_string()))?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &AiConfig, api_key: SecretString) -> Result<Self, AiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AiError::Configuration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            vision_model: config.vision_model.clone(),
            text_model: config.text_model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            inline_upload_limit: config.inline_upload_limit_bytes,
            activation_timeout: Duration::from_secs(config.activation_timeout_secs),
            activation_poll_interval: Duration::from_millis(config.activation_poll_interval_ms),
            cancel: CancellationToken::new(),
        })
    }

    /// Aborts in-flight upload activation waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    fn generate_url(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }

    async fn generate<T: DeserializeOwned>(&self, model: &str, parts: Vec<Part>) -> Result<T, AiError> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts,
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_output_tokens,
                response_mime_type: "application/json".to_string(),
            },
        };

        let response = self
            .client
            .post(self.generate_url(model))
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .json(&request)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response).await?;

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(format!("Failed to parse Gemini response: {}", e)))?;

        parse_json_response(&body.text()?)
    }

    /// Builds the content parts carrying a page window.
    async fn window_parts(&self, payload: &WindowPayload) -> Result<(Vec<Part>, Option<String>), AiError> {
        match payload {
            WindowPayload::Text(text) => Ok((vec![Part::text(sanitize_for_prompt(text))], None)),
            WindowPayload::Pdf(bytes) if bytes.len() <= self.inline_upload_limit => Ok((
                vec![Part::inline("application/pdf", general_purpose::STANDARD.encode(bytes))],
                None,
            )),
            WindowPayload::Pdf(bytes) => {
                let uploaded = self.upload_file(bytes.clone(), "application/pdf").await?;
                let active = self.wait_for_active(uploaded).await?;
                let uri = active.uri.clone().ok_or_else(|| {
                    AiError::InvalidResponse("Uploaded file has no URI".to_string())
                })?;
                Ok((vec![Part::file("application/pdf", uri)], Some(active.name)))
            }
        }
    }

    async fn upload_file(&self, bytes: Vec<u8>, mime_type: &str) -> Result<UploadedFile, AiError> {
        let size = bytes.len();
        let response = self
            .client
            .post(format!("{}/upload/v1beta/files?uploadType=media", self.base_url))
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response).await?;

        let envelope: UploadResponse = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(format!("Failed to parse upload response: {}", e)))?;

        log::info!("Uploaded {} bytes as {}", size, envelope.file.name);
        Ok(envelope.file)
    }

    async fn get_file(&self, name: &str) -> Result<UploadedFile, AiError> {
        let response = self
            .client
            .get(format!("{}/v1beta/{}", self.base_url, name))
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(format!("Failed to parse file status: {}", e)))
    }

    /// Polls the uploaded file until it is `ACTIVE`, bounded by the activation
    /// timeout and aborted by the cancellation token.
    async fn wait_for_active(&self, file: UploadedFile) -> Result<UploadedFile, AiError> {
        if file.is_active() {
            return Ok(file);
        }

        let name = file.name.clone();
        let poll = async {
            loop {
                tokio::time::sleep(self.activation_poll_interval).await;
                let current = self.get_file(&name).await?;
                match current.state.as_deref() {
                    Some("ACTIVE") => return Ok(current),
                    Some("FAILED") => {
                        return Err(AiError::Fatal(format!("Processing of {} failed", name)))
                    }
                    state => log::debug!("File {} is {:?}, waiting", name, state),
                }
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(AiError::Cancelled),
            result = tokio::time::timeout(self.activation_timeout, poll) => {
                result.map_err(|_| AiError::Transient(format!(
                    "File {} did not become active within {:?}",
                    name, self.activation_timeout
                )))?
            }
        }
    }

    async fn delete_file(&self, name: &str) {
        let result = self
            .client
            .delete(format!("{}/v1beta/{}", self.base_url, name))
            .header(API_KEY_HEADER, self.api_key.expose_secret())
            .send()
            .await;
        if let Err(e) = result {
            log::warn!("Failed to delete uploaded file {}: {}", name, e);
        }
    }
}

#[async_trait]
impl GenerativeService for GeminiService {
    async fn detect_toc(&self, request: &TocRequest) -> Result<TocResponse, AiError> {
        log::debug!(
            "Vision TOC request over pages {}-{} ({} bytes)",
            request.window_start,
            request.window_end,
            request.payload.len()
        );

        let (mut parts, uploaded) = self.window_parts(&request.payload).await?;
        parts.insert(0, Part::text(prompts::toc_prompt(request)));

        let result = self.generate(&self.vision_model, parts).await;
        if let Some(name) = uploaded {
            self.delete_file(&name).await;
        }
        result
    }

    async fn summarize_chapter(&self, request: &ChapterRequest) -> Result<ChapterSummary, AiError> {
        let parts = vec![Part::text(prompts::chapter_prompt(request))];
        self.generate(&self.text_model, parts).await
    }

    async fn summarize_book(&self, request: &BookRequest) -> Result<BookSummary, AiError> {
        let parts = vec![Part::text(prompts::book_prompt(request))];
        self.generate(&self.text_model, parts).await
    }
}

fn map_transport_error(e: reqwest::Error) -> AiError {
    AiError::Transient(format!("Gemini request failed: {}", e))
}

/// Maps non-success statuses onto the error taxonomy.
async fn check_status(response: Response) -> Result<Response, AiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();
    Err(classify_status(status, retry_after, &body))
}

fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn classify_status(status: StatusCode, retry_after: Option<Duration>, body: &str) -> AiError {
    let detail = format!("Gemini returned {}: {:.500}", status, body);
    if status == StatusCode::TOO_MANY_REQUESTS {
        AiError::RateLimited { retry_after }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        AiError::Transient(detail)
    } else {
        AiError::Fatal(detail)
    }
}

// ─── Wire types ───

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inline_data", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
    #[serde(rename = "file_data", skip_serializing_if = "Option::is_none")]
    file_data: Option<FileData>,
}

impl Part {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            inline_data: None,
            file_data: None,
        }
    }

    fn inline(mime_type: &str, data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.to_string(),
                data,
            }),
            file_data: None,
        }
    }

    fn file(mime_type: &str, file_uri: String) -> Self {
        Self {
            text: None,
            inline_data: None,
            file_data: Some(FileData {
                mime_type: mime_type.to_string(),
                file_uri,
            }),
        }
    }
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct FileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

impl GenerateResponse {
    fn text(&self) -> Result<String, AiError> {
        let candidate = self
            .candidates
            .first()
            .ok_or_else(|| AiError::InvalidResponse("No candidates in Gemini response".to_string()))?;
        let text: String = candidate
            .content
            .as_ref()
            .map(|c| c.parts.iter().filter_map(|p| p.text.as_deref()).collect())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(AiError::InvalidResponse(format!(
                "Empty Gemini answer (finish reason: {})",
                candidate.finish_reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(text)
    }
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<ResponseContent>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Clone, Deserialize)]
struct UploadedFile {
    name: String,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

impl UploadedFile {
    fn is_active(&self) -> bool {
        self.state.as_deref() == Some("ACTIVE")
    }
}
