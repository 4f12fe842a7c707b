use async_trait::async_trait;

use crate::{
    AdvisorError, AdvisoryOpinion, Bar, DataError, FeatureContext, MarketSnapshot, PositionProbe,
    Quote, ReviewOpinion, Timeframe,
};

/// A feed of candles and quotes. One primary, optionally one backup.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    fn name(&self) -> &str;

    /// Bars ordered oldest first.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Bar>, DataError>;

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, DataError>;

    async fn health_check(&self) -> Result<(), DataError> {
        Ok(())
    }
}

/// One committee member.
#[async_trait]
pub trait AdvisorySource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn propose(
        &self,
        symbol: &str,
        ctx: &FeatureContext,
    ) -> Result<AdvisoryOpinion, AdvisorError>;
}

/// Re-evaluates an open position.
#[async_trait]
pub trait PositionReviewer: Send + Sync {
    async fn review(
        &self,
        symbol: &str,
        position: &PositionProbe,
        ctx: &FeatureContext,
    ) -> Result<ReviewOpinion, AdvisorError>;
}

/// Turns raw candles into the indicator context.
pub trait FeatureProvider: Send + Sync {
    fn compute(&self, snapshot: &MarketSnapshot) -> Result<FeatureContext, DataError>;
}
