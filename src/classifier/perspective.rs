//! Perspective (Comment Analyzer) classifier over plain HTTP.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::classifier::{CategoryScores, ToxicityClassifier};
use crate::error::ClassifierError;

const PROVIDER: &str = "perspective";

const DEFAULT_BASE_URL: &str = "https://commentanalyzer.googleapis.com/v1alpha1";

const TOXICITY: &str = "TOXICITY";
const SEVERE_TOXICITY: &str = "SEVERE_TOXICITY";
const SEXUALLY_EXPLICIT: &str = "SEXUALLY_EXPLICIT";
const INSULT: &str = "INSULT";

const REQUESTED_ATTRIBUTES: [&str; 4] = [TOXICITY, SEVERE_TOXICITY, SEXUALLY_EXPLICIT, INSULT];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    #[serde(default)]
    attribute_scores: HashMap<String, AttributeScore>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AttributeScore {
    summary_score: SummaryScore,
}

#[derive(Debug, Deserialize)]
struct SummaryScore {
    value: f64,
}

/// Client for the `comments:analyze` endpoint.
pub struct PerspectiveClient {
    api_key: SecretString,
    base_url: String,
    languages: Vec<String>,
    timeout: Duration,
    client: reqwest::Client,
}

impl PerspectiveClient {
    pub fn new(api_key: SecretString, timeout: Duration) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            languages: Vec::new(),
            timeout,
            client,
        })
    }

    /// Language hints; empty lets the service auto-detect.
    pub fn with_languages(mut self, languages: Vec<String>) -> Self {
        self.languages = languages;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn analyze_url(&self) -> String {
        format!("{}/comments:analyze", self.base_url.trim_end_matches('/'))
    }

    fn request_body(&self, text: &str) -> serde_json::Value {
        let attributes: serde_json::Map<String, serde_json::Value> = REQUESTED_ATTRIBUTES
            .iter()
            .map(|a| (a.to_string(), serde_json::json!({})))
            .collect();

        let mut body = serde_json::json!({
            "comment": { "text": text },
            "requestedAttributes": attributes,
            "doNotStore": true,
        });
        if !self.languages.is_empty() {
            body["languages"] = serde_json::json!(self.languages);
        }
        body
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ClassifierError {
        if e.is_timeout() {
            ClassifierError::Timeout {
                provider: PROVIDER.into(),
                timeout: self.timeout,
            }
        } else {
            ClassifierError::RequestFailed {
                provider: PROVIDER.into(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ToxicityClassifier for PerspectiveClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn score(&self, text: &str) -> Result<CategoryScores, ClassifierError> {
        let resp = self
            .client
            .post(self.analyze_url())
            .query(&[("key", self.api_key.expose_secret())])
            .json(&self.request_body(text))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ClassifierError::QuotaExceeded {
                provider: PROVIDER.into(),
            });
        }
        if status == reqwest::StatusCode::BAD_REQUEST {
            let reason = resp.text().await.unwrap_or_default();
            return Err(ClassifierError::InvalidInput {
                provider: PROVIDER.into(),
                reason,
            });
        }
        if !status.is_success() {
            let reason = resp.text().await.unwrap_or_default();
            return Err(ClassifierError::RequestFailed {
                provider: PROVIDER.into(),
                reason: format!("HTTP {status}: {reason}"),
            });
        }

        let body = resp
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        scores_from_body(&body)
    }
}

/// Decode a 2xx reply. Undecodable bodies are the provider's fault, not
/// the transport's.
fn scores_from_body(body: &str) -> Result<CategoryScores, ClassifierError> {
    let parsed: AnalyzeResponse =
        serde_json::from_str(body).map_err(|e| ClassifierError::InvalidResponse {
            provider: PROVIDER.into(),
            reason: format!("undecodable body: {e}"),
        })?;
    scores_from_response(parsed)
}

fn scores_from_response(resp: AnalyzeResponse) -> Result<CategoryScores, ClassifierError> {
    let get = |attribute: &str| {
        resp.attribute_scores
            .get(attribute)
            .map(|a| a.summary_score.value.clamp(0.0, 1.0))
            .ok_or_else(|| ClassifierError::InvalidResponse {
                provider: PROVIDER.into(),
                reason: format!("missing attribute {attribute}"),
            })
    };

    Ok(CategoryScores {
        toxicity: get(TOXICITY)?,
        severe_toxicity: get(SEVERE_TOXICITY)?,
        sexually_explicit: get(SEXUALLY_EXPLICIT)?,
        insult: get(INSULT)?,
    })
}
