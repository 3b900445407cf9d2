use std::time::Duration;

use async_trait::async_trait;

use crate::status_notifier::AppStatus;
use crate::translation::{TranslationOutcome, TranslationRequest};

const DEFAULT_ERROR_RESET_DELAY_MS: u64 = 1_500;
const FALLBACK_FAILURE_REASON: &str = "Translation failed for an unknown reason";

#[async_trait]
pub trait TranslationPipelineDelegate: Send + Sync {
    fn set_status(&self, status: AppStatus);
    fn emit_outcome(&self, outcome: &TranslationOutcome);
    async fn translate(&self, request: &TranslationRequest) -> Result<String, String>;
}

#[derive(Debug, Clone)]
pub struct TranslationPipeline {
    error_reset_delay: Duration,
}

impl Default for TranslationPipeline {
    fn default() -> Self {
        Self {
            error_reset_delay: Duration::from_millis(DEFAULT_ERROR_RESET_DELAY_MS),
        }
    }
}

impl TranslationPipeline {
    pub fn new(error_reset_delay: Duration) -> Self {
        Self { error_reset_delay }
    }

    /// Runs one request to completion and reports exactly one outcome,
    /// whichever way the translation ends.
    pub async fn handle_submission<D: TranslationPipelineDelegate>(
        &self,
        delegate: &D,
        request: TranslationRequest,
    ) {
        delegate.set_status(AppStatus::Translating);

        match delegate.translate(&request).await {
            Ok(reply) => {
                delegate.emit_outcome(&TranslationOutcome::Success(reply));
                delegate.set_status(AppStatus::Idle);
            }
            Err(reason) => {
                let reason = normalize_failure_reason(reason);
                delegate.emit_outcome(&TranslationOutcome::Failure(reason));
                delegate.set_status(AppStatus::Error);
                tokio::time::sleep(self.error_reset_delay).await;
                delegate.set_status(AppStatus::Idle);
            }
        }
    }
}

fn normalize_failure_reason(reason: String) -> String {
    if reason.trim().is_empty() {
        FALLBACK_FAILURE_REASON.to_string()
    } else {
        reason
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Debug)]
    struct MockDelegate {
        translate_result: Result<String, String>,
        statuses: Mutex<Vec<AppStatus>>,
        outcomes: Mutex<Vec<TranslationOutcome>>,
        call_order: Mutex<Vec<&'static str>>,
        captured_texts: Mutex<Vec<String>>,
    }

    impl Default for MockDelegate {
        fn default() -> Self {
            Self {
                translate_result: Ok("hola mundo".to_string()),
                statuses: Mutex::new(Vec::new()),
                outcomes: Mutex::new(Vec::new()),
                call_order: Mutex::new(Vec::new()),
                captured_texts: Mutex::new(Vec::new()),
            }
        }
    }

    impl MockDelegate {
        fn statuses(&self) -> Vec<AppStatus> {
            self.statuses
                .lock()
                .expect("status lock should not be poisoned")
                .clone()
        }

        fn outcomes(&self) -> Vec<TranslationOutcome> {
            self.outcomes
                .lock()
                .expect("outcome lock should not be poisoned")
                .clone()
        }

        fn call_order(&self) -> Vec<&'static str> {
            self.call_order
                .lock()
                .expect("call-order lock should not be poisoned")
                .clone()
        }

        fn captured_texts(&self) -> Vec<String> {
            self.captured_texts
                .lock()
                .expect("captured-text lock should not be poisoned")
                .clone()
        }
    }

    #[async_trait]
    impl TranslationPipelineDelegate for MockDelegate {
        fn set_status(&self, status: AppStatus) {
            self.statuses
                .lock()
                .expect("status lock should not be poisoned")
                .push(status);
        }

        fn emit_outcome(&self, outcome: &TranslationOutcome) {
            self.outcomes
                .lock()
                .expect("outcome lock should not be poisoned")
                .push(outcome.clone());
        }

        async fn translate(&self, request: &TranslationRequest) -> Result<String, String> {
            self.call_order
                .lock()
                .expect("call-order lock should not be poisoned")
                .push("translate");
            self.captured_texts
                .lock()
                .expect("captured-text lock should not be poisoned")
                .push(request.text().to_string());
            self.translate_result.clone()
        }
    }

    fn request_for_test() -> TranslationRequest {
        TranslationRequest::new("hello world").expect("test input should be accepted")
    }

    #[tokio::test]
    async fn successful_submission_emits_one_success_and_returns_to_idle() {
        let pipeline = TranslationPipeline::new(Duration::ZERO);
        let delegate = MockDelegate::default();

        pipeline
            .handle_submission(&delegate, request_for_test())
            .await;

        assert_eq!(delegate.call_order(), vec!["translate"]);
        assert_eq!(delegate.captured_texts(), vec!["hello world".to_string()]);
        assert_eq!(
            delegate.statuses(),
            vec![AppStatus::Translating, AppStatus::Idle]
        );
        assert_eq!(
            delegate.outcomes(),
            vec![TranslationOutcome::Success("hola mundo".to_string())]
        );
    }

    #[tokio::test]
    async fn failed_submission_emits_one_failure_then_error_then_idle() {
        let pipeline = TranslationPipeline::new(Duration::ZERO);
        let delegate = MockDelegate {
            translate_result: Err("Network connection failed: refused".to_string()),
            ..MockDelegate::default()
        };

        pipeline
            .handle_submission(&delegate, request_for_test())
            .await;

        assert_eq!(delegate.call_order(), vec!["translate"]);
        assert_eq!(
            delegate.statuses(),
            vec![AppStatus::Translating, AppStatus::Error, AppStatus::Idle]
        );
        assert_eq!(
            delegate.outcomes(),
            vec![TranslationOutcome::Failure(
                "Network connection failed: refused".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn blank_failure_reason_is_replaced_with_fallback_text() {
        let pipeline = TranslationPipeline::new(Duration::ZERO);
        let delegate = MockDelegate {
            translate_result: Err("   ".to_string()),
            ..MockDelegate::default()
        };

        pipeline
            .handle_submission(&delegate, request_for_test())
            .await;

        assert_eq!(
            delegate.outcomes(),
            vec![TranslationOutcome::Failure(
                FALLBACK_FAILURE_REASON.to_string()
            )]
        );
    }
}
