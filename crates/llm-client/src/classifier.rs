use admission_gate::{ClassifierLabels, GateClassifier, GateError};
use async_trait::async_trait;
use committee::extract_json_object;
use trade_core::{FeatureContext, PositionProbe};

use crate::chat::ChatClient;
use crate::error::LlmError;
use crate::prompts;

/// Gate classifier backed by a chat model.
#[derive(Clone)]
pub struct ChatGateClassifier {
    client: ChatClient,
}

impl ChatGateClassifier {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }
}

/// Decode a classifier reply into labels.
pub fn labels_from_reply(reply: &str) -> Result<ClassifierLabels, GateError> {
    extract_json_object(reply)
        .map(|map| ClassifierLabels::from_json(&map))
        .map_err(GateError::Malformed)
}

#[async_trait]
impl GateClassifier for ChatGateClassifier {
    async fn classify(
        &self,
        symbol: &str,
        ctx: &FeatureContext,
        position: Option<&PositionProbe>,
    ) -> Result<ClassifierLabels, GateError> {
        let reply = self
            .client
            .complete(
                "gate",
                prompts::GATE_SYSTEM,
                &prompts::gate_prompt(symbol, ctx, position),
            )
            .await
            .map_err(|e| match e {
                LlmError::InvalidResponse(msg) => GateError::Malformed(msg),
                other => GateError::Unavailable(other.to_string()),
            })?;
        labels_from_reply(&reply)
    }
}

#[cfg(test)]
mod tests {
    use admission_gate::{PatternCandidate, StructureRelevance, TrendConsistency};

    use super::*;

    #[test]
    fn test_labels_from_fenced_reply() {
        let labels = labels_from_reply(
            "```json\n{\"trend_consistency\": \"strong\", \"volatility_status\": \"normal\", \
             \"structure_relevance\": \"near_support\", \"pattern_candidate\": \"reversal\", \
             \"danger_flags\": [\"Choppy\"], \"reason\": \"bounce\"}\n```",
        )
        .unwrap();
        assert_eq!(labels.trend, TrendConsistency::Strong);
        assert_eq!(labels.structure, StructureRelevance::NearSupport);
        assert_eq!(labels.pattern, PatternCandidate::Reversal);
        assert_eq!(labels.danger_flags, vec!["chop_range".to_string()]);
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            labels_from_reply("market looks fine"),
            Err(GateError::Malformed(_))
        ));
    }
}
