use std::sync::Arc;

use futures_util::future::join_all;
use trade_core::{AdvisoryOpinion, AdvisorySource, CommitteeVerdict, Direction, FeatureContext};

use crate::aggregator::{aggregate, CommitteeConfig};
use crate::retry::{retry_bounded, RetryPolicy};

#[derive(Debug, Clone)]
pub struct PanelOutcome {
    pub verdict: CommitteeVerdict,
    /// Present when the front gate ran.
    pub front_gate: Option<CommitteeVerdict>,
}

/// Advisors in priority order plus the rules for combining them.
pub struct AdvisorPanel {
    advisors: Vec<Arc<dyn AdvisorySource>>,
    committee: CommitteeConfig,
    front_gate: Option<CommitteeConfig>,
    retry: RetryPolicy,
    placeholder: Option<AdvisoryOpinion>,
}

impl AdvisorPanel {
    pub fn new(
        advisors: Vec<Arc<dyn AdvisorySource>>,
        committee: CommitteeConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            advisors,
            committee,
            front_gate: None,
            retry,
            placeholder: None,
        }
    }

    pub fn with_front_gate(mut self, config: CommitteeConfig) -> Self {
        self.front_gate = Some(config);
        self
    }

    pub fn with_placeholder(mut self, opinion: AdvisoryOpinion) -> Self {
        self.placeholder = Some(opinion);
        self
    }

    pub fn len(&self) -> usize {
        self.advisors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.advisors.is_empty()
    }

    /// Poll advisors concurrently. A failed or timed-out advisor yields an
    /// abstain opinion and never delays the others beyond its own budget.
    pub async fn poll(
        &self,
        symbol: &str,
        ctx: &FeatureContext,
        advisors: &[Arc<dyn AdvisorySource>],
    ) -> Vec<AdvisoryOpinion> {
        join_all(
            advisors
                .iter()
                .map(|advisor| self.poll_one(symbol, ctx, advisor.as_ref())),
        )
        .await
    }

    async fn poll_one(
        &self,
        symbol: &str,
        ctx: &FeatureContext,
        advisor: &dyn AdvisorySource,
    ) -> AdvisoryOpinion {
        let label = format!("{} propose {}", advisor.source_id(), symbol);
        match retry_bounded(&self.retry, &label, || advisor.propose(symbol, ctx)).await {
            Ok(opinion) => {
                tracing::debug!(
                    "{} -> {:?} ({:.2})",
                    advisor.source_id(),
                    opinion.bias,
                    opinion.confidence
                );
                opinion
            }
            Err(exhausted) => {
                tracing::warn!("Advisor {} abstains: {}", advisor.source_id(), exhausted);
                AdvisoryOpinion::abstain(advisor.source_id(), exhausted.to_string())
            }
        }
    }

    /// Consult the panel for one symbol.
    ///
    /// With the front gate enabled and at least three advisors, the two
    /// secondary advisors vote first. Only an actionable front verdict pays for
    /// the primary advisor, whose opinion is then combined with the secondary
    /// opinions already collected.
    pub async fn decide(&self, symbol: &str, ctx: &FeatureContext) -> PanelOutcome {
        if let Some(front_config) = self.front_gate.as_ref().filter(|_| self.advisors.len() >= 3) {
            let secondary = self.poll(symbol, ctx, &self.advisors[1..3]).await;
            let front = aggregate(front_config, &secondary, self.placeholder.as_ref());

            if front.final_decision == Direction::NoTrade {
                tracing::info!(
                    "Front gate holds {}: conflict={} confidence={:.2}",
                    symbol,
                    front.conflict_level,
                    front.final_confidence
                );
                return PanelOutcome {
                    verdict: front.clone(),
                    front_gate: Some(front),
                };
            }

            let mut opinions = self.poll(symbol, ctx, &self.advisors[..1]).await;
            opinions.extend(secondary);
            let verdict = aggregate(&self.committee, &opinions, None);
            return PanelOutcome {
                verdict,
                front_gate: Some(front),
            };
        }

        let opinions = self.poll(symbol, ctx, &self.advisors).await;
        let verdict = aggregate(&self.committee, &opinions, self.placeholder.as_ref());
        tracing::info!(
            "Committee {}: {:?} score={:.2} conflict={}",
            symbol,
            verdict.final_decision,
            verdict.weighted_score,
            verdict.conflict_level
        );
        PanelOutcome {
            verdict,
            front_gate: None,
        }
    }
}
