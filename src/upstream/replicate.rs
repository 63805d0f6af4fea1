//! Replicate prediction client for the face-swap model.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use super::UpstreamError;
use crate::config::ReplicateConfig;
use crate::error::{Result, StylecardError};

/// Tokens shorter than this cannot be real Replicate tokens.
const MIN_TOKEN_LEN: usize = 10;

/// Inputs of the face-swap model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FaceSwapInput {
    /// Target image whose face is replaced (the reference photo)
    pub input_image: String,
    /// Image providing the face (the user's photo)
    pub swap_image: String,
}

/// A provider able to run the face-swap model.
#[async_trait]
pub trait FaceSwapBackend: Send + Sync {
    /// Run the model to completion and return its raw output.
    async fn run(&self, input: &FaceSwapInput) -> std::result::Result<Value, UpstreamError>;
}

/// Check that a usable API token is configured, returning the reason when not.
pub fn check_token(token: Option<&str>) -> std::result::Result<&str, &'static str> {
    match token {
        None => Err("Replicate API token is not configured"),
        Some(t) if t.len() < MIN_TOKEN_LEN => Err("Replicate API token appears to be invalid"),
        Some(t) => Ok(t),
    }
}

#[derive(Debug, Deserialize)]
struct Prediction {
    id: String,
    status: String,
    #[serde(default)]
    output: Value,
    #[serde(default)]
    error: Value,
    #[serde(default)]
    urls: Option<PredictionUrls>,
}

#[derive(Debug, Deserialize)]
struct PredictionUrls {
    get: Option<String>,
}

/// HTTP client for Replicate's predictions API.
pub struct ReplicateClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    model: String,
    version: String,
    poll_interval: Duration,
    max_polls: u32,
}

impl ReplicateClient {
    /// Create a client from configuration and a checked token.
    pub fn new(config: &ReplicateConfig, token: &str) -> Result<Self> {
        let version = config
            .model
            .split_once(':')
            .map(|(_, version)| version.to_string())
            .ok_or_else(|| {
                StylecardError::Config(format!("model {} has no version", config.model))
            })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
            model: config.model.clone(),
            version,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_polls: config.max_polls,
        })
    }

    async fn read_prediction(
        response: reqwest::Response,
    ) -> std::result::Result<Prediction, UpstreamError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<Prediction>().await?)
    }
}

#[async_trait]
impl FaceSwapBackend for ReplicateClient {
    #[instrument(skip(self, input), fields(model = %self.model))]
    async fn run(&self, input: &FaceSwapInput) -> std::result::Result<Value, UpstreamError> {
        let body = json!({
            "version": self.version,
            "input": input,
        });

        info!("Creating Replicate prediction");
        let response = self
            .http
            .post(format!("{}/v1/predictions", self.base_url))
            .bearer_auth(&self.token)
            .header("Prefer", "wait")
            .json(&body)
            .send()
            .await?;
        let mut prediction = Self::read_prediction(response).await?;

        let mut polls = 0;
        loop {
            match prediction.status.as_str() {
                "succeeded" => {
                    info!(prediction_id = %prediction.id, polls, "Prediction succeeded");
                    return Ok(prediction.output);
                }
                "failed" | "canceled" => {
                    let message = match &prediction.error {
                        Value::Null => "no error detail".to_string(),
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    return Err(UpstreamError::PredictionFailed {
                        id: prediction.id,
                        status: prediction.status,
                        message,
                    });
                }
                _ => {}
            }

            if polls >= self.max_polls {
                return Err(UpstreamError::PollTimeout {
                    id: prediction.id,
                    status: prediction.status,
                    polls,
                });
            }

            let poll_url = prediction
                .urls
                .as_ref()
                .and_then(|urls| urls.get.clone())
                .unwrap_or_else(|| format!("{}/v1/predictions/{}", self.base_url, prediction.id));

            debug!(
                prediction_id = %prediction.id,
                status = %prediction.status,
                polls,
                "Prediction still running"
            );
            tokio::time::sleep(self.poll_interval).await;
            polls += 1;

            let response = self.http.get(&poll_url).bearer_auth(&self.token).send().await?;
            prediction = Self::read_prediction(response).await?;
        }
    }
}
