use crate::alerts::formatter::{join_alerts, truncate_message};
use crate::alerts::sinks::AlertSink;
use crate::triggers::AlertVerdict;
use log::{error, info};
use std::sync::Arc;

/// Longest message the chat sink accepts, in characters
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Delivers rendered alerts through an [`AlertSink`]
///
/// Delivery failures are logged and swallowed so a broken sink never stops
/// a monitoring pass.
pub struct AlertManager {
    sink: Arc<dyn AlertSink>,
    max_message_chars: usize,
}

impl AlertManager {
    pub fn new(sink: Arc<dyn AlertSink>) -> Self {
        Self {
            sink,
            max_message_chars: MAX_MESSAGE_CHARS,
        }
    }

    /// Override the message length limit
    pub fn with_max_message_chars(mut self, max_message_chars: usize) -> Self {
        self.max_message_chars = max_message_chars;
        self
    }

    pub fn sink_name(&self) -> &str {
        self.sink.name()
    }

    /// Send every triggered verdict of one pass as a single message
    ///
    /// Returns `true` when a message was delivered. Nothing is sent when
    /// `verdicts` is empty.
    pub async fn deliver(&self, verdicts: &[AlertVerdict]) -> bool {
        if verdicts.is_empty() {
            return false;
        }

        info!(
            "Sending {} alert(s) through {} sink",
            verdicts.len(),
            self.sink.name()
        );
        self.send_text(&join_alerts(verdicts)).await
    }

    /// Send an already rendered message, truncated to the length limit
    pub async fn send_text(&self, text: &str) -> bool {
        let message = truncate_message(text, self.max_message_chars);
        match self.sink.send(&message).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to deliver alert via {}: {}", self.sink.name(), e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::ResultAggregator;
    use crate::alerts::formatter::format_alert;
    use crate::alerts::sinks::MockSink;
    use crate::config::Site;
    use crate::triggers::{AlertDecisionEngine, Decision};
    use serde_json::json;

    fn failing_verdict(name: &str) -> AlertVerdict {
        let node = json!({"status": 0, "loss": 100, "isp_name": "电信", "province_name": "北京"})
            .as_object()
            .cloned()
            .unwrap();
        let report = ResultAggregator::new().aggregate(&[node]);
        match AlertDecisionEngine::default().evaluate(&Site::from_url(name), report) {
            Decision::Verdict(verdict) => verdict,
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deliver_joins_alerts_into_one_message() {
        let sink = MockSink::new();
        let manager = AlertManager::new(Arc::new(sink.clone()));
        let verdicts = vec![failing_verdict("a.com"), failing_verdict("b.com")];

        assert!(manager.deliver(&verdicts).await);

        let messages = sink.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0],
            format!("{}\n\n{}", format_alert(&verdicts[0]), format_alert(&verdicts[1]))
        );
    }

    #[tokio::test]
    async fn test_nothing_sent_without_alerts() {
        let sink = MockSink::new();
        let manager = AlertManager::new(Arc::new(sink.clone()));

        assert!(!manager.deliver(&[]).await);
        assert_eq!(sink.call_count(), 0);
    }

    #[tokio::test]
    async fn test_sink_failure_is_swallowed() {
        let manager = AlertManager::new(Arc::new(MockSink::failing("network down")));
        assert!(!manager.deliver(&[failing_verdict("a.com")]).await);
        assert_eq!(manager.sink_name(), "mock");
    }

    #[tokio::test]
    async fn test_long_messages_are_truncated() {
        let sink = MockSink::new();
        let manager = AlertManager::new(Arc::new(sink.clone())).with_max_message_chars(200);
        let verdicts: Vec<AlertVerdict> = (0..5)
            .map(|i| failing_verdict(&format!("site{}.com", i)))
            .collect();

        assert!(manager.deliver(&verdicts).await);
        let message = &sink.messages()[0];
        assert!(message.chars().count() <= 200);
        assert!(message.ends_with("\n..."));
    }
}
