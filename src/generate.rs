use crate::config::{Backend, ModelConfig};
use crate::error::{ProbeError, Result};
use crate::retry::{RetryConfig, with_retry, with_timeout};
use async_openai::{Client, config::OpenAIConfig, types::CreateChatCompletionRequestArgs};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::warn;

/// Text-generation service boundary: prompt in, generated text out.
///
/// Backends (hosted chat APIs, HF inference, retrieval-augmented chains)
/// are interchangeable behind this one signature.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Minimum-interval rate limiter shared by the generation backends
#[derive(Debug)]
struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    fn new(rate_limit_rps: f64) -> Self {
        let min_interval = if rate_limit_rps > 0.0 {
            Duration::from_secs_f64(1.0 / rate_limit_rps)
        } else {
            Duration::ZERO
        };
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last_request = self.last_request.lock().await;
        if let Some(last_time) = *last_request {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                sleep(self.min_interval - elapsed).await;
            }
        }
        *last_request = Some(Instant::now());
    }
}

/// OpenAI-compatible chat completion backend
#[derive(Debug)]
pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    rate: RateLimiter,
    retry: RetryConfig,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(config: &ModelConfig, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var(&config.env_var_api_key).map_err(|_| {
            ProbeError::InvalidConfiguration(format!(
                "environment variable {} not set",
                config.env_var_api_key
            ))
        })?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&config.api_endpoint);

        Ok(Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            rate: RateLimiter::new(config.rate_limit_rps),
            retry: RetryConfig::default(),
            timeout,
        })
    }

    fn build_request(&self, prompt: &str) -> Result<async_openai::types::CreateChatCompletionRequest> {
        let system_message = async_openai::types::ChatCompletionRequestSystemMessageArgs::default()
            .content("You are a helpful assistant.".to_string())
            .build()
            .map_err(|err| ProbeError::ExternalService(err.to_string()))?
            .into();

        let user_message = async_openai::types::ChatCompletionRequestUserMessageArgs::default()
            .content(prompt.to_string())
            .build()
            .map_err(|err| ProbeError::ExternalService(err.to_string()))?
            .into();

        CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([system_message, user_message])
            .temperature(self.temperature as f32)
            .max_tokens(self.max_tokens as u16)
            .build()
            .map_err(|err| ProbeError::ExternalService(err.to_string()))
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.rate.acquire().await;

        let response = with_retry(&self.retry, "chat completion", || {
            let request = self.build_request(prompt);
            async move {
                with_timeout(self.timeout, "chat completion", async move {
                    self.client
                        .chat()
                        .create(request?)
                        .await
                        .map_err(|err| ProbeError::ExternalService(err.to_string()))
                })
                .await
            }
        })
        .await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(ProbeError::ExternalService(
                "empty response from model".to_string(),
            ));
        }
        Ok(content)
    }
}

/// Hugging Face Inference API text-generation backend
pub struct HfInferenceGenerator {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    max_new_tokens: u32,
    rate: RateLimiter,
    retry: RetryConfig,
}

impl HfInferenceGenerator {
    pub fn new(config: &ModelConfig, timeout: Duration) -> Result<Self> {
        let token = std::env::var(&config.env_var_api_key).ok();
        if token.is_none() {
            warn!(
                "environment variable {} not set, calling inference API unauthenticated",
                config.env_var_api_key
            );
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ProbeError::ExternalService(err.to_string()))?;
        Ok(Self {
            http,
            endpoint: config.api_endpoint.clone(),
            token,
            max_new_tokens: config.max_tokens,
            rate: RateLimiter::new(config.rate_limit_rps),
            retry: RetryConfig::default(),
        })
    }

    async fn post(&self, body: &Value) -> Result<Value> {
        let mut request = self.http.post(&self.endpoint).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| ProbeError::ExternalService(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ProbeError::ExternalService(format!(
                "inference API returned {status}: {detail}"
            )));
        }
        response
            .json()
            .await
            .map_err(|err| ProbeError::ExternalService(err.to_string()))
    }
}

#[async_trait]
impl Generator for HfInferenceGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.rate.acquire().await;

        let body = json!({
            "inputs": prompt,
            "parameters": { "max_new_tokens": self.max_new_tokens },
        });
        let body = &body;
        let output = with_retry(&self.retry, "text generation", || async move {
            self.post(body).await
        })
        .await?;

        let generated = output
            .get(0)
            .and_then(|entry| entry.get("generated_text"))
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProbeError::ExternalService(format!("unexpected inference payload: {output}"))
            })?;

        // The inference API echoes the prompt at the head of the generation.
        let response = generated
            .strip_prefix(prompt)
            .map(str::trim_start)
            .unwrap_or(generated);
        Ok(response.to_string())
    }
}

/// Construct the generator selected by the model's backend field
pub fn build_generator(config: &ModelConfig, timeout: Duration) -> Result<Box<dyn Generator>> {
    match config.backend {
        Backend::Openai => Ok(Box::new(OpenAiGenerator::new(config, timeout)?)),
        Backend::HfInference => Ok(Box::new(HfInferenceGenerator::new(config, timeout)?)),
    }
}
