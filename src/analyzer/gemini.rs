//! Gemini API連携
//!
//! `generateContent` に指示文と画像ごとのテキスト+インラインデータを送り、
//! 応答テキストのJSONをファイル名別の分類結果にする。

use super::classifier::{Classifier, ClassifierProvider, ClassifyResponse, PreparedBatch};
use crate::config::Config;
use crate::error::{LabelAuditError, Result};
use label_audit_common::{build_file_prompt, parse_batch_response, BATCH_INSTRUCTION};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const USER_AGENT: &str = concat!("label-audit/", env!("CARGO_PKG_VERSION"));

/// Gemini APIリクエスト
#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "responseMimeType")]
    response_mime_type: String,
}

/// Gemini APIレスポンス
#[derive(Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

pub struct GeminiClient {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f32,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, temperature: f32, timeout: Duration) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| LabelAuditError::ApiCall(e.to_string()))?;

        Ok(Self {
            http_client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            temperature,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.api_key()?,
            &config.model,
            config.temperature,
            Duration::from_secs(config.timeout_seconds),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/{}:generateContent", GEMINI_API_BASE, self.model)
    }

    async fn generate(&self, request: &GeminiRequest) -> Result<String> {
        let response = self
            .http_client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| LabelAuditError::ApiCall(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LabelAuditError::ApiCall(e.to_string()))?;

        if !status.is_success() {
            let snippet: String = body.chars().take(300).collect();
            return Err(LabelAuditError::ApiCall(format!("HTTP {}: {}", status, snippet)));
        }
        Ok(body)
    }
}

impl Classifier for GeminiClient {
    async fn classify(&self, batch: &PreparedBatch) -> Result<ClassifyResponse> {
        let request = build_request(batch, self.temperature);

        tracing::debug!(
            batch = batch.index + 1,
            images = batch.entries.len(),
            model = %self.model,
            "Gemini APIへ送信"
        );

        let body = self.generate(&request).await?;
        parse_generate_response(&body)
    }
}

/// 設定のAPIキー・モデルで `GeminiClient` を作る
#[derive(Debug, Clone, Copy, Default)]
pub struct GeminiProvider;

impl ClassifierProvider for GeminiProvider {
    type Client = GeminiClient;

    fn connect(&self, config: &Config) -> Result<GeminiClient> {
        GeminiClient::from_config(config)
    }
}

fn build_request(batch: &PreparedBatch, temperature: f32) -> GeminiRequest {
    let mut parts = Vec::with_capacity(1 + batch.entries.len() * 2);
    parts.push(Part::Text {
        text: BATCH_INSTRUCTION.to_string(),
    });

    for entry in &batch.entries {
        parts.push(Part::Text {
            text: build_file_prompt(&entry.file_name, entry.message.as_deref()),
        });
        parts.push(Part::InlineData {
            inline_data: InlineData {
                mime_type: entry.image.mime_type.clone(),
                data: entry.image.to_base64(),
            },
        });
    }

    GeminiRequest {
        contents: vec![Content { parts }],
        generation_config: GenerationConfig {
            temperature,
            response_mime_type: "application/json".into(),
        },
    }
}

/// `generateContent` の応答本文をパース
fn parse_generate_response(body: &str) -> Result<ClassifyResponse> {
    let response: GeminiResponse =
        serde_json::from_str(body).map_err(|e| LabelAuditError::ApiParse(e.to_string()))?;

    let tokens = response
        .usage_metadata
        .and_then(|u| u.total_token_count)
        .unwrap_or(0);

    let text = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
        .ok_or_else(|| LabelAuditError::ApiParse("応答にテキストがありません".into()))?;

    let payload =
        parse_batch_response(&text).map_err(|e| LabelAuditError::ApiParse(e.to_string()))?;

    Ok(ClassifyResponse { payload, tokens })
}
