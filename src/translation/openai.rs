use async_trait::async_trait;
use reqwest::{
    header::{HeaderMap, RETRY_AFTER},
    Client, StatusCode,
};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

use super::{
    build_user_instruction, CompletionProvider, TranslationError, TranslationRequest,
    SYSTEM_INSTRUCTION,
};

const DEFAULT_COMPLETION_ENDPOINT: &str = "https://api.poe.com/v1/chat/completions";
const DEFAULT_COMPLETION_MODEL: &str = "gpt-5.2-instant";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2_000;
const THINKING_LEVEL: &str = "minimal";

#[derive(Debug, Clone)]
pub struct OpenAiCompletionConfig {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub request_timeout_secs: u64,
    /// Total call budget per request, not extra retries after the first call.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
}

impl Default for OpenAiCompletionConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            endpoint: DEFAULT_COMPLETION_ENDPOINT.to_string(),
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
        }
    }
}

impl OpenAiCompletionConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(endpoint) = read_non_empty_env("TRANSLATOR_ENDPOINT") {
            config.endpoint = endpoint;
        }

        if let Some(model) = read_non_empty_env("TRANSLATOR_MODEL") {
            config.model = model;
        }

        if let Some(timeout_secs) = read_u64_env("TRANSLATOR_TIMEOUT_SECS") {
            config.request_timeout_secs = timeout_secs.max(1);
        }

        if let Some(max_attempts) = read_u32_env("TRANSLATOR_MAX_ATTEMPTS") {
            config.max_attempts = max_attempts.max(1);
        }

        if let Some(base_delay_ms) = read_u64_env("TRANSLATOR_RETRY_BASE_DELAY_MS") {
            config.retry_base_delay_ms = base_delay_ms.max(1);
        }

        debug!(
            endpoint = %config.endpoint,
            model = %config.model,
            request_timeout_secs = config.request_timeout_secs,
            max_attempts = config.max_attempts,
            retry_base_delay_ms = config.retry_base_delay_ms,
            "loaded completion client config"
        );
        config
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiCompletionProvider {
    client: Client,
    config: OpenAiCompletionConfig,
}

impl OpenAiCompletionProvider {
    pub fn new(config: OpenAiCompletionConfig) -> Self {
        info!(
            endpoint = %config.endpoint,
            model = %config.model,
            request_timeout_secs = config.request_timeout_secs,
            max_attempts = config.max_attempts,
            "completion provider initialized"
        );
        Self {
            client: build_client(&config),
            config,
        }
    }

    fn api_key(&self) -> Result<String, TranslationError> {
        if let Some(explicit_key) = self
            .config
            .api_key
            .clone()
            .and_then(|value| normalize_optional_string(Some(value)))
        {
            debug!("using completion API key from explicit provider configuration");
            return Ok(explicit_key);
        }

        read_non_empty_env("TRANSLATOR_API_KEY")
            .inspect(|_| debug!("using completion API key from environment"))
            .ok_or(TranslationError::MissingApiKey)
    }

    fn retry_delay(&self, attempt_index: u32, retry_after: Option<Duration>) -> Duration {
        if let Some(delay) = retry_after {
            return delay;
        }

        let multiplier = u64::from(attempt_index) + 1;
        Duration::from_millis(self.config.retry_base_delay_ms.saturating_mul(multiplier))
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletionProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(
        &self,
        request: &TranslationRequest,
    ) -> Result<String, TranslationError> {
        let api_key = self.api_key()?;
        let user_instruction = build_user_instruction(request.text());
        let payload = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_INSTRUCTION,
                },
                ChatMessage {
                    role: "user",
                    content: &user_instruction,
                },
            ],
            thinking_level: THINKING_LEVEL,
        };
        let mut attempt_index = 0;
        info!(
            endpoint = %self.config.endpoint,
            model = %self.config.model,
            input_chars = request.text().chars().count(),
            "starting translation request"
        );

        loop {
            debug!(attempt = attempt_index + 1, "sending chat completion request");
            let response = self
                .client
                .post(&self.config.endpoint)
                .bearer_auth(&api_key)
                .json(&payload)
                .send()
                .await;

            let response = match response {
                Ok(response) => response,
                Err(error) => {
                    let transport_error = map_transport_error(error);
                    if transport_error.retryable && attempt_index + 1 < self.config.max_attempts {
                        let delay = self.retry_delay(attempt_index, None);
                        warn!(
                            attempt = attempt_index + 1,
                            max_attempts = self.config.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %transport_error.error,
                            "retrying translation request after transport error"
                        );
                        tokio::time::sleep(delay).await;
                        attempt_index += 1;
                        continue;
                    }
                    error!(
                        attempt = attempt_index + 1,
                        error = %transport_error.error,
                        "translation request failed without retry"
                    );
                    return Err(annotate_exhausted(transport_error.error, attempt_index + 1));
                }
            };

            if response.status().is_success() {
                info!(attempt = attempt_index + 1, "translation request succeeded");
                let response_payload: ChatCompletionResponse = response
                    .json()
                    .await
                    .map_err(|error| TranslationError::InvalidResponse(error.to_string()))?;

                let choice = response_payload.choices.into_iter().next().ok_or_else(|| {
                    TranslationError::InvalidResponse(
                        "completion contained no choices".to_string(),
                    )
                })?;

                return choice.message.content.ok_or_else(|| {
                    TranslationError::InvalidResponse(
                        "completion message contained no content".to_string(),
                    )
                });
            }

            let http_error = map_http_error(response).await;
            if http_error.retryable && attempt_index + 1 < self.config.max_attempts {
                let delay = self.retry_delay(attempt_index, http_error.retry_after);
                warn!(
                    attempt = attempt_index + 1,
                    max_attempts = self.config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %http_error.error,
                    "retrying translation request after HTTP error"
                );
                tokio::time::sleep(delay).await;
                attempt_index += 1;
                continue;
            }

            error!(
                attempt = attempt_index + 1,
                error = %http_error.error,
                "translation request failed without retry"
            );
            return Err(annotate_exhausted(http_error.error, attempt_index + 1));
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    thinking_level: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorEnvelope {
    error: ServiceErrorBody,
}

#[derive(Debug, Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

#[derive(Debug)]
struct RetryableError {
    error: TranslationError,
    retryable: bool,
    retry_after: Option<Duration>,
}

fn map_transport_error(error: reqwest::Error) -> RetryableError {
    let mapped = if error.is_timeout() {
        TranslationError::Timeout(error.to_string())
    } else {
        TranslationError::Connectivity(error.to_string())
    };

    RetryableError {
        retryable: mapped.is_retryable(),
        error: mapped,
        retry_after: None,
    }
}

async fn map_http_error(response: reqwest::Response) -> RetryableError {
    let status = response.status();
    let retry_after = if status == StatusCode::TOO_MANY_REQUESTS {
        parse_retry_after(response.headers())
    } else {
        None
    };
    let response_body = response.text().await.unwrap_or_default();
    let fallback_message = format!("completion request failed with status {}", status.as_u16());
    let error_message = parse_service_error_message(&response_body).unwrap_or(fallback_message);
    debug!(
        status = status.as_u16(),
        retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
        "mapped completion HTTP error response"
    );

    let mapped = if status == StatusCode::TOO_MANY_REQUESTS {
        TranslationError::RateLimited(error_message)
    } else {
        TranslationError::Service(error_message)
    };

    RetryableError {
        retryable: mapped.is_retryable(),
        error: mapped,
        retry_after,
    }
}

fn annotate_exhausted(error: TranslationError, attempts: u32) -> TranslationError {
    if attempts <= 1 {
        return error;
    }

    match error {
        TranslationError::Connectivity(message) => {
            TranslationError::Connectivity(format!("{message} (retried {attempts} times)"))
        }
        TranslationError::Timeout(message) => {
            TranslationError::Timeout(format!("{message} (retried {attempts} times)"))
        }
        TranslationError::RateLimited(message) => {
            TranslationError::RateLimited(format!("{message} (retried {attempts} times)"))
        }
        other => other,
    }
}

fn parse_service_error_message(raw_body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ServiceErrorEnvelope>(raw_body).ok()?;

    if let Some(message) = normalize_optional_string(parsed.error.message) {
        return Some(message);
    }

    normalize_optional_string(parsed.error.kind)
}

fn normalize_optional_string(value: Option<String>) -> Option<String> {
    value.and_then(|content| {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub(crate) fn read_non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn read_u64_env(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<u64>().ok())
}

fn read_u32_env(name: &str) -> Option<u32> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .and_then(|value| value.parse::<u32>().ok())
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let header_value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if header_value.is_empty() {
        return None;
    }

    if let Ok(seconds) = header_value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let retry_at = httpdate::parse_http_date(header_value).ok()?;
    let now = SystemTime::now();
    Some(
        retry_at
            .duration_since(now)
            .unwrap_or(Duration::from_secs(0)),
    )
}

fn build_client(config: &OpenAiCompletionConfig) -> Client {
    let timeout = Duration::from_secs(config.request_timeout_secs.max(1));
    debug!(
        timeout_secs = timeout.as_secs(),
        "building completion HTTP client"
    );
    Client::builder()
        .timeout(timeout)
        .build()
        .expect("completion client construction should succeed")
}
