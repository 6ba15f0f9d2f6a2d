use std::time::Duration;

use ct_core::error::{codes, AppError};
use serde::{Deserialize, Serialize};

use super::Llm;
use crate::ollama::OllamaClient;

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    timeout: Duration,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl Llm for OllamaLlm {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, AppError> {
        let url = format!("{}/api/generate", self.client.base_url());
        let req = GenerateRequest {
            model,
            prompt,
            stream: false,
        };
        let body = serde_json::to_value(req).map_err(|e| {
            AppError::new(codes::AI_EVALUATOR_FAILED, "Failed to encode generate request")
                .with_details(e.to_string())
        })?;

        let resp = ureq::post(&url).timeout(self.timeout).send_json(body);

        match resp {
            Ok(r) if r.status() == 200 => {
                let v: GenerateResponse = r.into_json().map_err(|e| {
                    AppError::new(codes::AI_EVALUATOR_MALFORMED, "Failed to decode generate response")
                        .with_details(e.to_string())
                })?;
                if v.response.trim().is_empty() {
                    return Err(AppError::new(
                        codes::AI_EVALUATOR_MALFORMED,
                        "Evaluator response was empty",
                    ));
                }
                Ok(v.response)
            }
            Ok(r) => Err(
                AppError::new(codes::AI_EVALUATOR_FAILED, "Generate request failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(ureq::Error::Status(status, _)) => Err(AppError::new(
                codes::AI_EVALUATOR_FAILED,
                "Generate request failed",
            )
            .with_details(format!("model={model}; status={status}"))),
            Err(ureq::Error::Transport(t)) if t.kind() == ureq::ErrorKind::Io => {
                // ureq reports read timeouts as Io transport errors.
                let msg = t.to_string();
                let code = if msg.contains("timed out") {
                    codes::AI_EVALUATOR_TIMEOUT
                } else {
                    codes::AI_EVALUATOR_FAILED
                };
                Err(AppError::new(code, "Failed to call generate endpoint")
                    .with_details(msg)
                    .with_retryable(true))
            }
            Err(e) => Err(
                AppError::new(codes::AI_EVALUATOR_FAILED, "Failed to call generate endpoint")
                    .with_details(e.to_string())
                    .with_retryable(true),
            ),
        }
    }
}
