pub mod openai;

use std::{fmt, sync::Arc};

use async_trait::async_trait;

pub(crate) const SYSTEM_INSTRUCTION: &str = "You are a professional translation and dictionary assistant. Please automatically identify whether the user input is a word/phrase or a sentence, determine the language direction (Chinese or English), and then output the corresponding result:
- Word/phrase: Provide translation and concise explanation
- Sentence: Only output translation result, no additional content
- Return only text, no markdown format, no redundant formatted text, use simple spaces and line breaks to control format";

pub(crate) fn build_user_instruction(text: &str) -> String {
    format!(
        "Please automatically determine the task type based on the following text and output the corresponding result:

1. If it's a word or phrase query:
   - If it's an English word, provide Chinese translation, concise explanation, and phonetic transcription
   - If it's a Chinese phrase, provide English translation and concise explanation
   - Keep explanations concise

2. If it's sentence translation:
   - If it's Chinese, translate to English
   - If it's English, translate to Chinese
   - Only output the translation result, no explanations or additional content

Text content:
{text}"
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslationRequest {
    text: String,
}

impl TranslationRequest {
    /// Returns `None` when the input is empty after trimming, so blank
    /// submissions never reach a provider.
    pub fn new(raw_input: &str) -> Option<Self> {
        let text = raw_input.trim();
        if text.is_empty() {
            return None;
        }
        Some(Self {
            text: text.to_string(),
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationOutcome {
    Success(String),
    Failure(String),
}

impl TranslationOutcome {
    pub fn text(&self) -> &str {
        match self {
            Self::Success(text) | Self::Failure(text) => text,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    MissingApiKey,
    Connectivity(String),
    Timeout(String),
    RateLimited(String),
    Service(String),
    InvalidResponse(String),
}

impl TranslationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Connectivity(_) | Self::Timeout(_) | Self::RateLimited(_)
        )
    }
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingApiKey => write!(f, "Missing translation API key"),
            Self::Connectivity(message) => write!(f, "Network connection failed: {message}"),
            Self::Timeout(message) => write!(f, "Request timeout: {message}"),
            Self::RateLimited(message) => write!(f, "Rate limited: {message}"),
            Self::Service(message) => write!(f, "API error: {message}"),
            Self::InvalidResponse(message) => write!(f, "Invalid completion response: {message}"),
        }
    }
}

impl std::error::Error for TranslationError {}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, request: &TranslationRequest)
        -> Result<String, TranslationError>;
}

#[derive(Clone)]
pub struct TranslationEngine {
    active_provider: Arc<dyn CompletionProvider>,
}

impl fmt::Debug for TranslationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TranslationEngine")
            .field("active_provider", &self.active_provider.name())
            .finish()
    }
}

impl TranslationEngine {
    pub fn new(active_provider: Arc<dyn CompletionProvider>) -> Self {
        Self { active_provider }
    }

    pub async fn translate(
        &self,
        request: &TranslationRequest,
    ) -> Result<String, TranslationError> {
        let reply = self.active_provider.complete(request).await?;
        Ok(reply.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct StubProvider {
        captured_text: Mutex<Option<String>>,
        response_text: String,
    }

    #[async_trait]
    impl CompletionProvider for StubProvider {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn complete(
            &self,
            request: &TranslationRequest,
        ) -> Result<String, TranslationError> {
            let mut guard = self
                .captured_text
                .lock()
                .expect("stub provider lock should not be poisoned");
            *guard = Some(request.text().to_string());

            Ok(self.response_text.clone())
        }
    }

    #[test]
    fn request_trims_input_and_rejects_blank_text() {
        assert_eq!(TranslationRequest::new(""), None);
        assert_eq!(TranslationRequest::new("   \n\t "), None);

        let request = TranslationRequest::new("  bonjour  ").expect("input should be accepted");
        assert_eq!(request.text(), "bonjour");
    }

    #[tokio::test]
    async fn engine_trims_reply_and_forwards_request_text() {
        let provider = Arc::new(StubProvider {
            captured_text: Mutex::new(None),
            response_text: "\n  你好，世界  \n".to_string(),
        });
        let engine = TranslationEngine::new(provider.clone());
        let request = TranslationRequest::new("hello world").expect("input should be accepted");

        let reply = engine
            .translate(&request)
            .await
            .expect("translation should succeed");

        assert_eq!(reply, "你好，世界");
        assert_eq!(
            provider
                .captured_text
                .lock()
                .expect("stub provider lock should not be poisoned")
                .as_deref(),
            Some("hello world")
        );
    }

    #[tokio::test]
    async fn whitespace_only_reply_is_success() {
        let provider = Arc::new(StubProvider {
            captured_text: Mutex::new(None),
            response_text: "   \n  ".to_string(),
        });
        let engine = TranslationEngine::new(provider);
        let request = TranslationRequest::new("hm").expect("input should be accepted");

        let reply = engine
            .translate(&request)
            .await
            .expect("blank replies still count as success");

        assert_eq!(reply, "");
    }

    #[test]
    fn retry_policy_covers_connectivity_timeout_and_rate_limit_only() {
        assert!(TranslationError::Connectivity("refused".into()).is_retryable());
        assert!(TranslationError::Timeout("deadline".into()).is_retryable());
        assert!(TranslationError::RateLimited("slow down".into()).is_retryable());

        assert!(!TranslationError::MissingApiKey.is_retryable());
        assert!(!TranslationError::Service("bad model".into()).is_retryable());
        assert!(!TranslationError::InvalidResponse("no choices".into()).is_retryable());
    }

    #[test]
    fn error_messages_identify_the_failure_kind() {
        assert_eq!(
            TranslationError::Connectivity("connection refused".into()).to_string(),
            "Network connection failed: connection refused"
        );
        assert_eq!(
            TranslationError::Timeout("operation timed out".into()).to_string(),
            "Request timeout: operation timed out"
        );
        assert_eq!(
            TranslationError::Service("invalid model".into()).to_string(),
            "API error: invalid model"
        );
    }

    #[test]
    fn user_instruction_embeds_the_submitted_text() {
        let instruction = build_user_instruction("ephemeral");
        assert!(instruction.ends_with("Text content:\nephemeral"));
        assert!(instruction.contains("word or phrase query"));
    }

    #[test]
    fn outcome_exposes_text_and_success_flag() {
        let success = TranslationOutcome::Success("bonjour".into());
        assert!(success.is_success());
        assert_eq!(success.text(), "bonjour");

        let failure = TranslationOutcome::Failure("no network".into());
        assert!(!failure.is_success());
        assert_eq!(failure.text(), "no network");
    }
}
