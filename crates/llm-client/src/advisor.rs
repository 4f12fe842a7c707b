use async_trait::async_trait;
use committee::{parse_opinion, parse_review, ParsedPayload};
use trade_core::{
    AdvisorError, AdvisoryOpinion, AdvisorySource, FeatureContext, PositionProbe, PositionReviewer,
    ReviewOpinion,
};

use crate::chat::ChatClient;
use crate::prompts;

/// A chat model acting as committee member and position reviewer.
#[derive(Clone)]
pub struct ChatAdvisor {
    client: ChatClient,
}

impl ChatAdvisor {
    pub fn new(client: ChatClient) -> Self {
        Self { client }
    }

    fn timeout_secs(&self) -> u64 {
        self.client.config().timeout.as_secs()
    }
}

#[async_trait]
impl AdvisorySource for ChatAdvisor {
    fn source_id(&self) -> &str {
        &self.client.config().name
    }

    async fn propose(
        &self,
        symbol: &str,
        ctx: &FeatureContext,
    ) -> Result<AdvisoryOpinion, AdvisorError> {
        let reply = self
            .client
            .complete("decision", prompts::ADVISOR_SYSTEM, &prompts::advisor_prompt(symbol, ctx))
            .await
            .map_err(|e| e.into_advisor_error(self.timeout_secs()))?;

        match parse_opinion(self.source_id(), &reply) {
            ParsedPayload::Parsed(opinion) => Ok(opinion),
            ParsedPayload::ParseError { raw_text, cause } => {
                tracing::warn!(
                    "{} reply unparseable ({}): {}",
                    self.source_id(),
                    cause,
                    raw_text.chars().take(120).collect::<String>()
                );
                Err(AdvisorError::Malformed(cause))
            }
        }
    }
}

#[async_trait]
impl PositionReviewer for ChatAdvisor {
    async fn review(
        &self,
        symbol: &str,
        position: &PositionProbe,
        ctx: &FeatureContext,
    ) -> Result<ReviewOpinion, AdvisorError> {
        let reply = self
            .client
            .complete(
                "review",
                prompts::REVIEW_SYSTEM,
                &prompts::review_prompt(symbol, position, ctx),
            )
            .await
            .map_err(|e| e.into_advisor_error(self.timeout_secs()))?;

        parse_review(&reply).map_err(AdvisorError::Malformed)
    }
}
