use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Wall-clock budget for a single model invocation. A timeout is terminal
/// for the attempt; the video stays retryable later.
pub const CALL_DEADLINE: Duration = Duration::from_secs(15 * 60);

/// Backoff schedule for rate-limit retries, in seconds.
pub const RATE_LIMIT_BACKOFF: [u64; 5] = [1, 8, 16, 32, 64];
pub const MAX_ATTEMPTS: usize = 5;
const VALIDATION_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum VisionError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("response validation failed: {0}")]
    Validation(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("model api returned status {status}: {body}")]
    Api { status: u16, body: String },
}

impl VisionError {
    /// Terminal errors must not be retried; the scan fails immediately.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VisionError::PermissionDenied(_) | VisionError::Timeout(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            VisionError::RateLimited(_) => "rate_limited",
            VisionError::PermissionDenied(_) => "permission_denied",
            VisionError::Timeout(_) => "timeout",
            VisionError::Validation(_) => "validation",
            VisionError::Transport(_) => "transport",
            VisionError::Api { .. } => "api",
        }
    }
}

pub type VisionResult<T> = Result<T, VisionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    ImmediateTakedown,
    Tolerated,
    Monitor,
    SafeHarbor,
    Ignore,
}

impl RecommendedAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecommendedAction::ImmediateTakedown => "immediate_takedown",
            RecommendedAction::Tolerated => "tolerated",
            RecommendedAction::Monitor => "monitor",
            RecommendedAction::SafeHarbor => "safe_harbor",
            RecommendedAction::Ignore => "ignore",
        }
    }

    /// Only a takedown verdict counts as a confirmed infringement for
    /// channel reputation purposes.
    pub fn is_actionable(&self) -> bool {
        matches!(self, RecommendedAction::ImmediateTakedown)
    }
}

impl std::fmt::Display for RecommendedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterDetection {
    pub name: String,
    #[serde(default)]
    pub screen_time_seconds: f64,
    #[serde(default)]
    pub prominence: String,
    #[serde(default)]
    pub timestamps: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAnalysis {
    pub ip_id: String,
    pub ip_name: String,
    pub contains_infringement: bool,
    #[serde(default)]
    pub characters_detected: Vec<CharacterDetection>,
    pub is_ai_generated: bool,
    #[serde(default)]
    pub ai_tools_detected: Vec<String>,
    pub fair_use_applies: bool,
    #[serde(default)]
    pub fair_use_reasoning: String,
    #[serde(default)]
    pub content_type: String,
    pub infringement_likelihood: f64,
    #[serde(default)]
    pub reasoning: String,
    pub recommended_action: RecommendedAction,
}

/// The only wire format the pipeline mandates from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionAnalysis {
    pub ip_results: Vec<IpAnalysis>,
    pub overall_recommendation: RecommendedAction,
    #[serde(default)]
    pub overall_notes: String,
}

impl VisionAnalysis {
    /// Any IP's infringement flag; broader than actionable.
    pub fn contains_infringement(&self) -> bool {
        self.ip_results.iter().any(|ip| ip.contains_infringement)
    }

    pub fn max_likelihood(&self) -> u8 {
        self.ip_results
            .iter()
            .map(|ip| ip.infringement_likelihood.clamp(0.0, 100.0) as u8)
            .max()
            .unwrap_or(0)
    }

    pub fn characters_found(&self) -> Vec<String> {
        let mut names = Vec::new();
        for ip in &self.ip_results {
            for character in &ip.characters_detected {
                if !names.contains(&character.name) {
                    names.push(character.name.clone());
                }
            }
        }
        names
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageMetadata {
    pub prompt_tokens: u64,
    pub candidate_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct RawModelResponse {
    pub text: String,
    pub usage: UsageMetadata,
}

#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub video_url: String,
    pub prompt: String,
    pub fps: f64,
    pub start_offset_seconds: i64,
    pub end_offset_seconds: i64,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

/// Raw model invocation seam. The retry and validation policy lives in
/// [`analyze_with_retry`] so every implementation gets it identically.
#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn invoke(&self, request: &AnalysisRequest) -> VisionResult<RawModelResponse>;
}

/// Full invocation contract: deadline per call, backoff on rate limits,
/// bounded re-asks on unparsable output, immediate failure on inaccessible
/// videos.
pub async fn analyze_with_retry<C: VisionClient + ?Sized>(
    client: &C,
    request: &AnalysisRequest,
) -> VisionResult<(VisionAnalysis, UsageMetadata)> {
    let mut validation_failures = 0usize;
    let mut rate_limit_hits = 0usize;

    loop {
        let attempt = tokio::time::timeout(CALL_DEADLINE, client.invoke(request)).await;
        let response = match attempt {
            Err(_) => {
                error!(url = %request.video_url, "model call exceeded deadline");
                return Err(VisionError::Timeout(CALL_DEADLINE));
            }
            Ok(Err(err @ VisionError::RateLimited(_))) => {
                if rate_limit_hits + 1 >= MAX_ATTEMPTS {
                    error!(url = %request.video_url, "rate limit retries exhausted");
                    return Err(err);
                }
                let wait = RATE_LIMIT_BACKOFF[rate_limit_hits.min(RATE_LIMIT_BACKOFF.len() - 1)];
                warn!(
                    attempt = rate_limit_hits + 1,
                    wait_seconds = wait,
                    "rate limited, backing off"
                );
                rate_limit_hits += 1;
                tokio::time::sleep(Duration::from_secs(wait)).await;
                continue;
            }
            Ok(Err(err)) => return Err(err),
            Ok(Ok(response)) => response,
        };

        match parse_analysis(&response.text) {
            Ok(analysis) => return Ok((analysis, response.usage)),
            Err(err) => {
                validation_failures += 1;
                if validation_failures >= MAX_ATTEMPTS {
                    error!(url = %request.video_url, error = %err, "validation retries exhausted");
                    return Err(err);
                }
                warn!(
                    attempt = validation_failures,
                    error = %err,
                    "model output failed validation, re-asking"
                );
                tokio::time::sleep(VALIDATION_RETRY_DELAY).await;
            }
        }
    }
}

/// Parse the model's JSON into the strict result model. Nulls in declared
/// boolean fields are coerced to false before validation.
pub fn parse_analysis(text: &str) -> VisionResult<VisionAnalysis> {
    let mut value: Value = serde_json::from_str(text)
        .map_err(|err| VisionError::Validation(format!("invalid json: {err}")))?;
    coerce_null_booleans(&mut value);
    serde_json::from_value(value)
        .map_err(|err| VisionError::Validation(format!("schema mismatch: {err}")))
}

fn coerce_null_booleans(value: &mut Value) {
    const BOOLEAN_FIELDS: [&str; 3] =
        ["contains_infringement", "is_ai_generated", "fair_use_applies"];
    if let Some(ip_results) = value.get_mut("ip_results").and_then(Value::as_array_mut) {
        for ip_result in ip_results {
            for field in BOOLEAN_FIELDS {
                if let Some(slot) = ip_result.get_mut(field) {
                    if slot.is_null() {
                        debug!(field, "coercing null boolean to false");
                        *slot = Value::Bool(false);
                    }
                }
            }
        }
    }
}

/// HTTP client for the external vision model endpoint.
#[derive(Debug, Clone)]
pub struct HttpVisionClient {
    client: reqwest::Client,
    endpoint: String,
    model_name: String,
    model_region: String,
}

impl HttpVisionClient {
    pub fn new(
        endpoint: impl Into<String>,
        model_name: impl Into<String>,
        model_region: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model_name: model_name.into(),
            model_region: model_region.into(),
        }
    }
}

#[async_trait]
impl VisionClient for HttpVisionClient {
    async fn invoke(&self, request: &AnalysisRequest) -> VisionResult<RawModelResponse> {
        let body = serde_json::json!({
            "model": self.model_name,
            "region": self.model_region,
            "contents": [
                { "file_uri": request.video_url, "mime_type": "video/mp4" },
                { "text": request.prompt },
            ],
            "video_config": {
                "fps": request.fps,
                "start_offset_seconds": request.start_offset_seconds,
                "end_offset_seconds": request.end_offset_seconds,
            },
            "generation_config": {
                "temperature": request.temperature,
                "max_output_tokens": request.max_output_tokens,
                "response_mime_type": "application/json",
            },
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::RateLimited(body));
        }
        if status.as_u16() == 403 {
            let body = response.text().await.unwrap_or_default();
            return Err(VisionError::PermissionDenied(body));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // Some backends wrap access failures in generic errors.
            if text.contains("PERMISSION_DENIED") {
                return Err(VisionError::PermissionDenied(text));
            }
            return Err(VisionError::Api {
                status: status.as_u16(),
                body: text,
            });
        }

        let payload: Value = response.json().await?;
        let text = payload
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let usage = UsageMetadata {
            prompt_tokens: payload
                .pointer("/usage/prompt_token_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            candidate_tokens: payload
                .pointer("/usage/candidates_token_count")
                .and_then(Value::as_u64)
                .unwrap_or(0),
        };
        Ok(RawModelResponse { text, usage })
    }
}
