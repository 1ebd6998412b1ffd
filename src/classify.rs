//! Query classifier.
//!
//! Asks the reasoning backend for one [`Intent`] label. Any failure (call
//! error, timeout, an answer outside the label set) resolves to
//! [`Intent::General`]; classification never fails the pipeline.

use std::sync::Arc;
use std::time::Duration;

use crate::llm::ChatModel;
use crate::models::Intent;

const SYSTEM_PROMPT: &str = "You are an intent classifier for an engineering knowledge system.
Classify the user's query into exactly one of these categories:
- explain: explaining concepts, architecture, or code flow.
- refactor: improving or changing code structure.
- debug: fixing errors or issues.
- impact_analysis: assessing the effect of changes.
- general: anything else.

Return ONLY the category name.";

/// Labels a query with one [`Intent`] using the reasoning model.
pub struct IntentClassifier {
    model: Arc<dyn ChatModel>,
    timeout: Duration,
}

impl IntentClassifier {
    pub fn new(model: Arc<dyn ChatModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Asks the model for one intent label.
    ///
    /// # Returns
    ///
    /// The parsed intent, or [`Intent::General`] when the call errors, runs
    /// past the timeout, or replies with a label outside the set. Never fails.
    pub async fn classify(&self, query: &str) -> Intent {
        let call = self.model.complete(SYSTEM_PROMPT, query);
        let reply = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "intent classification failed, defaulting to general");
                return Intent::General;
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs(),
                    "intent classification timed out, defaulting to general"
                );
                return Intent::General;
            }
        };

        match Intent::parse(&reply) {
            Some(intent) => {
                tracing::info!(%intent, model = self.model.model_name(), "intent classified");
                intent
            }
            None => {
                tracing::warn!(reply = %reply.trim(), "unrecognised intent label, defaulting to general");
                Intent::General
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::DisabledChat;
    use anyhow::Result;
    use async_trait::async_trait;

    struct Canned(&'static str);

    #[async_trait]
    impl ChatModel for Canned {
        fn model_name(&self) -> &str {
            "canned"
        }
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Stuck;

    #[async_trait]
    impl ChatModel for Stuck {
        fn model_name(&self) -> &str {
            "stuck"
        }
        async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("debug".to_string())
        }
    }

    fn classifier(model: Arc<dyn ChatModel>) -> IntentClassifier {
        IntentClassifier::new(model, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_valid_label() {
        let c = classifier(Arc::new(Canned("Refactor\n")));
        assert_eq!(c.classify("clean up the job").await, Intent::Refactor);
    }

    #[tokio::test]
    async fn test_malformed_label_falls_back() {
        let c = classifier(Arc::new(Canned("I think this is about debugging")));
        assert_eq!(c.classify("x").await, Intent::General);
    }

    #[tokio::test]
    async fn test_backend_error_falls_back() {
        let c = classifier(Arc::new(DisabledChat::new("quota")));
        assert_eq!(c.classify("x").await, Intent::General);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let c = classifier(Arc::new(Stuck));
        assert_eq!(c.classify("x").await, Intent::General);
    }
}
