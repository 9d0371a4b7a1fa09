//! Client for the generative-text service (Gemini REST API).

use crate::config::GenerationConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, instrument};

/// A file previously uploaded to the generation service
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub uri: String,
    pub mime_type: String,
}

/// One generation call: fixed instruction, user prompt, optional file
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub system_instruction: String,
    pub prompt: String,
    pub file: Option<RemoteFile>,
}

impl GenerationRequest {
    pub fn new(system_instruction: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system_instruction: system_instruction.into(),
            prompt: prompt.into(),
            file: None,
        }
    }

    pub fn with_file(mut self, file: RemoteFile) -> Self {
        self.file = Some(file);
        self
    }
}

/// Text generation seam used by the dispatcher
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate text for `request`
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Upload a local file so later requests can reference it
    async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<RemoteFile>;
}

/// Gemini API client.
///
/// Holds the API key for the lifetime of the process; build it once at
/// startup and share it.
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    sampling: SamplingConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct SamplingConfig {
    max_output_tokens: u32,
    top_k: u32,
    top_p: f32,
    temperature: f32,
    response_mime_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: &'a SamplingConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    Text(&'a str),
    FileData {
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
        #[serde(rename = "fileUri")]
        file_uri: &'a str,
    },
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadFileResponse {
    file: RemoteFile,
}

impl GeminiClient {
    /// Build the client, resolving the API key from config or
    /// `GEMINI_API_KEY`
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let api_key = resolve_api_key(config.api_key.as_deref(), std::env::var("GEMINI_API_KEY").ok())
            .context("No generation API key configured (generation.api_key or GEMINI_API_KEY)")?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to create HTTP client")?;

        info!(model = %config.model, "Generation client initialized");

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            sampling: SamplingConfig {
                max_output_tokens: config.max_output_tokens,
                top_k: config.top_k,
                top_p: config.top_p,
                temperature: config.temperature,
                response_mime_type: "text/plain",
            },
        })
    }

    fn generate_endpoint(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, self.model)
    }

    fn upload_endpoint(&self) -> String {
        format!("{}/upload/v1beta/files", self.base_url)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    #[instrument(skip(self, request), fields(prompt_len = request.prompt.len(), with_file = request.file.is_some()))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let body = build_generate_body(request, &self.sampling);

        let response = self
            .http
            .post(self.generate_endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("Generation request failed")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("Generation service returned {status}: {detail}");
        }

        let parsed: GenerateContentResponse = response
            .json()
            .await
            .context("Failed to parse generation response")?;

        let text = response_text(parsed)?;
        debug!(response_len = text.len(), "Generation finished");
        Ok(text)
    }

    #[instrument(skip(self))]
    async fn upload_file(&self, path: &Path, mime_type: &str) -> Result<RemoteFile> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read scratch file {}", path.display()))?;
        let display_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        // Resumable protocol: open a session, then send the bytes and finalize.
        let start = self
            .http
            .post(self.upload_endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&serde_json::json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .context("Failed to start file upload")?;

        let status = start.status();
        if !status.is_success() {
            let detail = start.text().await.unwrap_or_default();
            bail!("File upload start returned {status}: {detail}");
        }

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|value| value.to_str().ok())
            .context("No upload URL in file upload response")?
            .to_string();

        let finish = self
            .http
            .post(upload_url)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .context("Failed to upload file bytes")?;

        let status = finish.status();
        if !status.is_success() {
            let detail = finish.text().await.unwrap_or_default();
            bail!("File upload returned {status}: {detail}");
        }

        let uploaded: UploadFileResponse = finish
            .json()
            .await
            .context("Failed to parse file upload response")?;

        info!(uri = %uploaded.file.uri, "File uploaded to generation service");
        Ok(uploaded.file)
    }
}

/// Configured key, else the environment's; blank values count as unset
fn resolve_api_key(configured: Option<&str>, from_env: Option<String>) -> Option<String> {
    configured
        .map(str::to_string)
        .filter(|key| !key.trim().is_empty())
        .or_else(|| from_env.filter(|key| !key.trim().is_empty()))
}

fn build_generate_body<'a>(
    request: &'a GenerationRequest,
    sampling: &'a SamplingConfig,
) -> GenerateContentBody<'a> {
    let mut parts = vec![Part::Text(&request.prompt)];
    if let Some(ref file) = request.file {
        parts.push(Part::FileData {
            mime_type: &file.mime_type,
            file_uri: &file.uri,
        });
    }

    GenerateContentBody {
        system_instruction: Content {
            role: None,
            parts: vec![Part::Text(&request.system_instruction)],
        },
        contents: vec![Content {
            role: Some("user"),
            parts,
        }],
        generation_config: sampling,
    }
}

/// Concatenated text of the first candidate
fn response_text(response: GenerateContentResponse) -> Result<String> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .context("Generation response contained no candidates")?;

    Ok(candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default())
}
