//! HTTP client for an OpenAI-compatible chat-completions endpoint used as a pixel classifier.

use crate::{Classifier, ClassifierError};
use serde::Deserialize;
use std::time::Duration;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SYSTEM_PROMPT: &str = "You classify vegetation-index pixel values into land cover classes \
(water, urban, agriculture, forest). Reply with a JSON object {\"labels\": [...]} holding \
exactly one class per input value, in input order.";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Labels {
    labels: Vec<String>,
}

/// Classifier that asks a hosted model for one label per pixel.
pub struct OpenAiClassifier {
    client: reqwest::Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiClassifier {
    pub fn new(
        url: String,
        api_key: Option<String>,
        model: Option<&str>,
    ) -> Result<Self, ClassifierError> {
        Self::with_timeout(url, api_key, model, REQUEST_TIMEOUT)
    }

    /// Every request, connect included, is abandoned after `timeout`.
    pub fn with_timeout(
        url: String,
        api_key: Option<String>,
        model: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, ClassifierError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClassifierError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            url,
            api_key,
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        })
    }

    pub fn from_env() -> Result<Self, ClassifierError> {
        let url = std::env::var("INFERENCE_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let api_key = std::env::var("INFERENCE_API_KEY").ok();
        let model = std::env::var("INFERENCE_MODEL").ok();
        Self::new(url, api_key, model.as_deref())
    }
}

fn status_error(status: reqwest::StatusCode, body: &str) -> ClassifierError {
    let msg = format!("inference API error {status}: {body}");
    if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ClassifierError::Unavailable(msg)
    } else {
        ClassifierError::Rejected(msg)
    }
}

fn parse_labels(body: &str, expected: usize) -> Result<Vec<String>, ClassifierError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| ClassifierError::Rejected(e.to_string()))?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| ClassifierError::Rejected("empty completion".to_string()))?;
    let labels: Labels = serde_json::from_str(content.trim())
        .map_err(|e| ClassifierError::Rejected(format!("malformed labels: {e}")))?;
    if labels.labels.len() != expected {
        return Err(ClassifierError::Rejected(format!(
            "expected {expected} labels, got {}",
            labels.labels.len()
        )));
    }
    Ok(labels
        .labels
        .into_iter()
        .map(|l| l.trim().to_lowercase())
        .collect())
}

#[async_trait::async_trait]
impl Classifier for OpenAiClassifier {
    fn name(&self) -> &str {
        &self.model
    }

    async fn classify(&self, pixels: &[f64]) -> Result<Vec<String>, ClassifierError> {
        if pixels.is_empty() {
            return Ok(Vec::new());
        }
        let values = serde_json::to_string(pixels)
            .map_err(|e| ClassifierError::Rejected(e.to_string()))?;
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": values },
            ],
        });
        let mut req = self.client.post(&self.url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        let res = req
            .send()
            .await
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| ClassifierError::Unavailable(e.to_string()))?;
        if !status.is_success() {
            return Err(status_error(status, &body));
        }
        tracing::debug!(model = %self.model, pixels = pixels.len(), "classification received");
        parse_labels(&body, pixels.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    fn completion(content: &str) -> String {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }]
        })
        .to_string()
    }

    #[test]
    fn labels_are_normalised() {
        let body = completion(r#"{"labels": ["Forest", " water "]}"#);
        assert_eq!(parse_labels(&body, 2).unwrap(), vec!["forest", "water"]);
    }

    #[test]
    fn label_count_must_match() {
        let body = completion(r#"{"labels": ["forest"]}"#);
        assert!(matches!(
            parse_labels(&body, 2),
            Err(ClassifierError::Rejected(_))
        ));
        assert!(matches!(
            parse_labels("not json", 1),
            Err(ClassifierError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn unresponsive_endpoint_times_out() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and hold the connection without ever answering.
        let holder = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
            drop(socket);
        });

        let classifier = OpenAiClassifier::with_timeout(
            format!("http://{addr}/v1/chat/completions"),
            None,
            None,
            Duration::from_millis(100),
        )
        .unwrap();
        assert_eq!(classifier.name(), DEFAULT_MODEL);

        let outcome =
            tokio::time::timeout(Duration::from_secs(5), classifier.classify(&[0.3])).await;
        assert!(matches!(outcome, Ok(Err(ClassifierError::Unavailable(_)))));
        holder.abort();
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(matches!(
            status_error(StatusCode::BAD_GATEWAY, ""),
            ClassifierError::Unavailable(_)
        ));
        assert!(matches!(
            status_error(StatusCode::TOO_MANY_REQUESTS, ""),
            ClassifierError::Unavailable(_)
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            ClassifierError::Rejected(_)
        ));
    }
}
