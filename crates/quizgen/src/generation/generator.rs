use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::GeneratorError;

/// What the controller asks the generator for: one candidate question.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationTarget {
    pub content_area: String,
    pub difficulty_min: Option<i64>,
    pub skip_dedup: bool,
    /// Recent question stems the candidate should not repeat.
    pub avoid: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedQuestion {
    pub question: String,
    pub options: serde_json::Value,
    pub correct_answer: String,
    pub explanation: String,
    #[serde(default = "default_question_type", rename = "type")]
    pub question_type: String,
    #[serde(default)]
    pub difficulty: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
}

fn default_question_type() -> String {
    "multiple_choice".to_string()
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub question: GeneratedQuestion,
    /// Highest similarity against the existing pool, in [0, 1].
    pub similarity: f64,
}

/// The external content generator. Implementations must be cancel-safe in
/// the sense that dropping the future leaves nothing half-written.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
    async fn generate(&self, target: &GenerationTarget) -> Result<Candidate, GeneratorError>;
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    question: GeneratedQuestion,
    #[serde(default)]
    similarity: f64,
}

/// Proxies generation to the LLM-backed generator service over HTTP.
#[derive(Clone)]
pub struct HttpQuestionGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpQuestionGenerator {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("quizgen/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/generate", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl QuestionGenerator for HttpQuestionGenerator {
    async fn generate(&self, target: &GenerationTarget) -> Result<Candidate, GeneratorError> {
        let res = self
            .client
            .post(&self.endpoint)
            .json(target)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: GenerateResponse = res
            .json()
            .await
            .map_err(|e| GeneratorError::Item(format!("malformed generator response: {e}")))?;

        Ok(Candidate {
            question: body.question,
            similarity: body.similarity.clamp(0.0, 1.0),
        })
    }
}

fn classify_transport_error(e: reqwest::Error) -> GeneratorError {
    if e.is_connect() {
        GeneratorError::Fatal(format!("cannot reach generator: {e}"))
    } else {
        GeneratorError::Item(e.to_string())
    }
}

fn classify_status(status: StatusCode, body: &str) -> GeneratorError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::UNAUTHORIZED => {
            GeneratorError::Fatal(format!("generator returned {status}: {snippet}"))
        }
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => {
            GeneratorError::Item(format!("generator timed out upstream ({status})"))
        }
        _ => GeneratorError::Item(format!("generator returned {status}: {snippet}")),
    }
}
