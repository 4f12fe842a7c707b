//! Admission gate: decides whether a symbol is worth consulting the advisors.

pub mod default_classifier;
pub mod labels;
pub mod rules;
pub mod triggers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use committee::{retry_bounded, RetryPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use trade_core::{FeatureContext, PositionProbe, Timeframe};

pub use default_classifier::DefaultClassifier;
pub use labels::*;
pub use rules::{apply_rules, RuleOutcome};
pub use triggers::detect_triggers;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateError {
    #[error("Classifier unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed classifier response: {0}")]
    Malformed(String),
}

/// Produces market labels for the rule layer.
#[async_trait]
pub trait GateClassifier: Send + Sync {
    async fn classify(
        &self,
        symbol: &str,
        ctx: &FeatureContext,
        position: Option<&PositionProbe>,
    ) -> Result<ClassifierLabels, GateError>;
}

/// What to do when the classifier cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    Admit,
    Hold,
}

impl std::str::FromStr for FallbackPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admit" => Ok(FallbackPolicy::Admit),
            "hold" => Ok(FallbackPolicy::Hold),
            other => Err(format!("unknown gate fallback '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    pub enabled: bool,
    pub fast_timeframe: Timeframe,
    pub slow_timeframe: Timeframe,
    pub price_move_pct: f64,
    pub breakout_buffer_pct: f64,
    pub review_deviation_atr: f64,
    pub on_error: FallbackPolicy,
    pub allow_marginal: bool,
    pub classifier_retry: RetryPolicy,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fast_timeframe: Timeframe::M30,
            slow_timeframe: Timeframe::H1,
            price_move_pct: 0.003,
            breakout_buffer_pct: 0.001,
            review_deviation_atr: 0.5,
            on_error: FallbackPolicy::Admit,
            allow_marginal: true,
            classifier_retry: RetryPolicy::single_attempt(Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub admit: bool,
    pub reason: String,
    pub trend: TrendConsistency,
    pub volatility: VolatilityStatus,
    pub structure: StructureRelevance,
    pub pattern: PatternCandidate,
    pub danger_flags: Vec<String>,
    pub met_conditions: Vec<String>,
    pub failed_conditions: Vec<String>,
}

impl GateVerdict {
    fn from_labels(labels: ClassifierLabels, admit: bool, reason: String) -> Self {
        Self {
            admit,
            reason,
            trend: labels.trend,
            volatility: labels.volatility,
            structure: labels.structure,
            pattern: labels.pattern,
            danger_flags: labels.danger_flags,
            met_conditions: Vec::new(),
            failed_conditions: Vec::new(),
        }
    }
}

pub struct AdmissionGate {
    config: GateConfig,
    classifier: Arc<dyn GateClassifier>,
}

impl AdmissionGate {
    pub fn new(config: GateConfig, classifier: Arc<dyn GateClassifier>) -> Self {
        Self { config, classifier }
    }

    pub fn with_default_classifier(config: GateConfig) -> Self {
        let classifier = Arc::new(DefaultClassifier::new(config.clone()));
        Self { config, classifier }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Evaluate admission for a new entry (`position == None`) or a review.
    pub async fn evaluate(
        &self,
        symbol: &str,
        ctx: &FeatureContext,
        position: Option<&PositionProbe>,
    ) -> GateVerdict {
        if !self.config.enabled {
            return GateVerdict::from_labels(
                ClassifierLabels::default(),
                true,
                "ok: gate_disabled".to_string(),
            );
        }

        let fired = detect_triggers(&self.config, ctx, position);
        if !fired.is_empty() {
            tracing::info!("Gate {}: strong trigger {:?}", symbol, fired);
            let mut verdict = GateVerdict::from_labels(
                ClassifierLabels::default(),
                true,
                format!("ok: strong_trigger({})", fired.join(",")),
            );
            verdict.met_conditions = fired;
            return verdict;
        }

        let label = format!("gate classify {}", symbol);
        let classified = retry_bounded(&self.config.classifier_retry, &label, || {
            self.classifier.classify(symbol, ctx, position)
        })
        .await;

        match classified {
            Ok(labels) => {
                let outcome = apply_rules(&labels, position.is_some(), self.config.allow_marginal);
                tracing::info!(
                    "Gate {}: admit={} reason={} trend={:?} vol={:?} structure={:?} pattern={:?}",
                    symbol,
                    outcome.admit,
                    outcome.reason,
                    labels.trend,
                    labels.volatility,
                    labels.structure,
                    labels.pattern
                );
                let mut verdict = GateVerdict::from_labels(labels, outcome.admit, outcome.reason);
                verdict.met_conditions = outcome.met_conditions;
                verdict.failed_conditions = outcome.failed_conditions;
                verdict
            }
            Err(exhausted) => {
                let (admit, prefix) = match self.config.on_error {
                    FallbackPolicy::Admit => (true, "fallback_admit"),
                    FallbackPolicy::Hold => (false, "fallback_hold"),
                };
                tracing::warn!("Gate {} classifier failed, {}: {}", symbol, prefix, exhausted);
                let mut labels = ClassifierLabels::default();
                labels.danger_flags.push("classifier_error".to_string());
                let mut verdict = GateVerdict::from_labels(
                    labels,
                    admit,
                    format!("{}: {}", prefix, exhausted.last_error),
                );
                verdict.failed_conditions.push("classifier_error".to_string());
                verdict
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    use trade_core::{AtrTrend, Side, TimeframeFeatures};

    use super::*;

    struct FixedClassifier {
        labels: Option<ClassifierLabels>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl GateClassifier for FixedClassifier {
        async fn classify(
            &self,
            _symbol: &str,
            _ctx: &FeatureContext,
            _position: Option<&PositionProbe>,
        ) -> Result<ClassifierLabels, GateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.labels
                .clone()
                .ok_or_else(|| GateError::Unavailable("connection refused".to_string()))
        }
    }

    fn features(ema_diff: f64, atr_trend: AtrTrend) -> TimeframeFeatures {
        TimeframeFeatures {
            close: 100.0,
            ema_fast: 100.0 + ema_diff,
            ema_slow: 100.0,
            ema_diff,
            atr: 1.0,
            atr_trend,
            support: Some(98.0),
            resistance: Some(102.0),
        }
    }

    /// Quiet market: no local trigger fires.
    fn quiet_ctx() -> FeatureContext {
        let mut frames = BTreeMap::new();
        frames.insert(Timeframe::M30, features(0.5, AtrTrend::Falling));
        frames.insert(Timeframe::H1, features(0.8, AtrTrend::Flat));
        FeatureContext {
            symbol: "XAUUSDm".to_string(),
            price: 100.0,
            frames,
            recent_closes: vec![99.9, 100.0],
            regime: None,
        }
    }

    fn blocked_labels() -> ClassifierLabels {
        ClassifierLabels {
            trend: TrendConsistency::Conflicting,
            volatility: VolatilityStatus::Extreme,
            structure: StructureRelevance::MidRange,
            pattern: PatternCandidate::None,
            danger_flags: vec!["whipsaw".to_string()],
            reason: String::new(),
        }
    }

    fn build_gate(labels: Option<ClassifierLabels>, on_error: FallbackPolicy) -> (AdmissionGate, Arc<FixedClassifier>) {
        let classifier = Arc::new(FixedClassifier {
            labels,
            calls: AtomicU32::new(0),
        });
        let config = GateConfig {
            on_error,
            ..GateConfig::default()
        };
        (AdmissionGate::new(config, classifier.clone()), classifier)
    }

    #[tokio::test]
    async fn test_quiet_market_defers_to_rules() {
        let (gate, classifier) = build_gate(Some(blocked_labels()), FallbackPolicy::Admit);
        let verdict = gate.evaluate("XAUUSDm", &quiet_ctx(), None).await;
        assert!(!verdict.admit);
        assert_eq!(verdict.reason, "blocked: trend_conflict");
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_price_move_trigger_overrides_classifier() {
        let (gate, classifier) = build_gate(Some(blocked_labels()), FallbackPolicy::Hold);
        let mut ctx = quiet_ctx();
        ctx.recent_closes = vec![100.0, 100.4];
        let verdict = gate.evaluate("XAUUSDm", &ctx, None).await;
        assert!(verdict.admit);
        assert_eq!(verdict.reason, "ok: strong_trigger(price_move)");
        assert_eq!(classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_each_trigger_fires() {
        let config = GateConfig::default();

        let mut ctx = quiet_ctx();
        ctx.price = 102.2;
        assert_eq!(detect_triggers(&config, &ctx, None), vec!["breakout_up"]);

        let mut ctx = quiet_ctx();
        ctx.price = 97.8;
        assert_eq!(detect_triggers(&config, &ctx, None), vec!["breakout_down"]);

        let mut ctx = quiet_ctx();
        ctx.frames.insert(Timeframe::H1, features(0.8, AtrTrend::Rising));
        assert_eq!(detect_triggers(&config, &ctx, None), vec!["atr_rising_1h"]);

        let mut ctx = quiet_ctx();
        ctx.frames.insert(Timeframe::H1, features(-0.8, AtrTrend::Flat));
        assert_eq!(detect_triggers(&config, &ctx, None), vec!["ema_flip"]);

        let probe = PositionProbe {
            side: Side::Long,
            entry: 100.6,
            stop: 99.0,
            take: 104.0,
        };
        assert_eq!(
            detect_triggers(&config, &quiet_ctx(), Some(&probe)),
            vec!["review_deviation"]
        );
        assert!(detect_triggers(&config, &quiet_ctx(), None).is_empty());
    }

    #[tokio::test]
    async fn test_classifier_failure_uses_fallback() {
        let (gate, _) = build_gate(None, FallbackPolicy::Hold);
        let verdict = gate.evaluate("XAUUSDm", &quiet_ctx(), None).await;
        assert!(!verdict.admit);
        assert!(verdict.reason.starts_with("fallback_hold"));
        assert_eq!(verdict.danger_flags, vec!["classifier_error"]);

        let (gate, _) = build_gate(None, FallbackPolicy::Admit);
        let verdict = gate.evaluate("XAUUSDm", &quiet_ctx(), None).await;
        assert!(verdict.admit);
        assert!(verdict.reason.starts_with("fallback_admit"));
    }

    #[tokio::test]
    async fn test_disabled_gate_admits() {
        let config = GateConfig {
            enabled: false,
            ..GateConfig::default()
        };
        let gate = AdmissionGate::with_default_classifier(config);
        let verdict = gate.evaluate("XAUUSDm", &quiet_ctx(), None).await;
        assert!(verdict.admit);
        assert_eq!(verdict.reason, "ok: gate_disabled");
    }

    #[tokio::test]
    async fn test_default_classifier_on_quiet_trend() {
        let gate = AdmissionGate::with_default_classifier(GateConfig::default());
        let mut ctx = quiet_ctx();
        ctx.price = 101.7;
        ctx.recent_closes = vec![101.7, 101.7];
        let verdict = gate.evaluate("XAUUSDm", &ctx, None).await;
        // ema diffs 0.5 and 0.8 on price ~100 -> strong; 0.3 below resistance with ATR 1
        assert_eq!(verdict.trend, TrendConsistency::Strong);
        assert_eq!(verdict.structure, StructureRelevance::NearResistance);
        assert_eq!(verdict.pattern, PatternCandidate::TrendContinuation);
        assert!(verdict.admit);
        assert_eq!(verdict.reason, "ok: good_opportunity");
    }
}
