use std::sync::Arc;
use std::time::Duration;

use admission_gate::AdmissionGate;
use anyhow::Result;
use committee::AdvisorPanel;
use llm_client::{ChatAdvisor, ChatClient, ChatConfig, ChatGateClassifier, UsageTracker};
use market_data::{BinanceFuturesSource, Mt5BridgeSource};
use market_features::IndicatorFeatureProvider;
use notification_service::{AlertType, Notifier, Severity};
use tokio::signal::unix::SignalKind;
use tokio::time::{self, MissedTickBehavior};
use trade_core::{AdvisorySource, MarketDataSource, PositionReviewer};
use trading_agent::{
    AgentComponents, AgentConfig, ChatEndpoint, SqlRecorder, StateManager, TradingAgent,
};

fn chat_client(
    endpoint: &ChatEndpoint,
    timeout: Duration,
    usage: &Arc<UsageTracker>,
) -> Result<ChatClient> {
    let mut chat = ChatConfig::new(
        endpoint.name.clone(),
        endpoint.url.clone(),
        endpoint.api_key.clone(),
        endpoint.model.clone(),
    );
    chat.timeout = timeout;
    Ok(ChatClient::new(chat)?.with_usage(Arc::clone(usage)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load .env, init tracing
    dotenvy::dotenv().ok();

    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting paper trading agent");

    // 2. Configuration
    let config = AgentConfig::from_env()?;
    tracing::info!("Configuration loaded and validated");
    tracing::info!("  Symbols: {}", config.symbols.join(", "));
    tracing::info!(
        "  Timeframes: {}",
        config
            .timeframes
            .iter()
            .map(|tf| tf.label())
            .collect::<Vec<_>>()
            .join(", ")
    );
    tracing::info!("  Risk per trade: {:.2}%", config.risk_per_trade * 100.0);
    tracing::info!(
        "  Cycle every {}s, heartbeat every {}s",
        config.cycle_interval_secs,
        config.heartbeat_interval_secs
    );

    // 3. Database
    sqlx::any::install_default_drivers();
    let db_pool = sqlx::AnyPool::connect(&config.database_url).await?;
    let state_manager = StateManager::new(db_pool.clone());
    state_manager.init_tables().await?;
    let recorder = SqlRecorder::new(db_pool.clone());
    recorder.init_tables().await?;
    tracing::info!("Startup check: database OK");

    // 4. Market data
    let fetch_timeout = config.fetch_timeout();
    let primary: Arc<dyn MarketDataSource> =
        Arc::new(Mt5BridgeSource::new(&config.mt5_api_url, fetch_timeout));
    let backup: Option<Arc<dyn MarketDataSource>> = if config.binance_backup_enabled {
        tracing::info!("Backup market data: {}", config.binance_api_url);
        Some(Arc::new(BinanceFuturesSource::new(
            &config.binance_api_url,
            fetch_timeout,
            config.backup_symbol_map.clone(),
        )))
    } else {
        None
    };
    match primary.health_check().await {
        Ok(()) => tracing::info!("Startup check: {} OK", primary.name()),
        Err(e) => tracing::warn!("Startup check: {} unavailable ({})", primary.name(), e),
    }

    // 5. Advisors and gate
    let advisor_timeout = Duration::from_secs(config.advisor_timeout_secs);
    let usage = Arc::new(UsageTracker::new(config.usage_budget()));
    if config.llm_daily_token_budget > 0 {
        tracing::info!("LLM daily token budget: {}", config.llm_daily_token_budget);
    }
    let mut advisors: Vec<Arc<ChatAdvisor>> = Vec::with_capacity(config.advisors.len());
    for endpoint in &config.advisors {
        advisors.push(Arc::new(ChatAdvisor::new(chat_client(endpoint, advisor_timeout, &usage)?)));
        tracing::info!("Advisor {} ({})", endpoint.name, endpoint.model);
    }
    let reviewer = advisors
        .first()
        .map(|a| Arc::clone(a) as Arc<dyn PositionReviewer>);
    let advisors: Vec<Arc<dyn AdvisorySource>> = advisors
        .into_iter()
        .map(|a| a as Arc<dyn AdvisorySource>)
        .collect();

    let gate = match &config.gate_classifier {
        Some(endpoint) => {
            tracing::info!("Gate classifier {} ({})", endpoint.name, endpoint.model);
            let classifier = ChatGateClassifier::new(chat_client(endpoint, advisor_timeout, &usage)?);
            AdmissionGate::new(config.gate_config(), Arc::new(classifier))
        }
        None => {
            tracing::info!("Gate classifier: built-in indicator rules");
            AdmissionGate::with_default_classifier(config.gate_config())
        }
    };

    let mut panel = AdvisorPanel::new(advisors, config.committee_config(), config.advisor_retry());
    if let Some(front_gate) = config.front_gate_config() {
        panel = panel.with_front_gate(front_gate);
    }

    let notifier = Notifier::from_webhook(&config.discord_webhook_url)
        .with_send_timeout(config.notify_send_timeout());

    // 6. Agent
    let cycle_interval = Duration::from_secs(config.cycle_interval_secs);
    let heartbeat_interval = Duration::from_secs(config.heartbeat_interval_secs);
    let mut agent = TradingAgent::new(
        config,
        AgentComponents {
            primary,
            backup,
            features: Arc::new(IndicatorFeatureProvider::default()),
            gate,
            panel,
            reviewer,
            notifier: notifier.clone(),
            recorder: Arc::new(recorder),
            state: Some(state_manager),
            usage: Some(usage),
        },
    )?;
    agent.restore_state().await?;

    notifier
        .notify(AlertType::Anomaly {
            event: "agent_started".to_string(),
            severity: Severity::Info,
            detail: format!(
                "equity {:.2}, {} open positions",
                agent.broker().equity(),
                agent.positions().all_open().len()
            ),
        })
        .await;

    // Main loop with graceful shutdown (SIGINT + SIGTERM)
    let mut cycle = time::interval(cycle_interval);
    cycle.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut heartbeat = time::interval_at(time::Instant::now() + heartbeat_interval, heartbeat_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;
    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM");
            }
        }
    };
    tokio::pin!(shutdown);

    tracing::info!("Agent is now running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = cycle.tick() => {
                let report = agent.run_cycle(chrono::Utc::now()).await;
                tracing::info!(
                    "Cycle done: {} symbols, {} opened, {} exits, {} reviews{}",
                    report.symbols.len(),
                    report.opened(),
                    report.exits(),
                    report.reviews(),
                    if report.reconciled { " (reconciled)" } else { "" }
                );
            }
            _ = heartbeat.tick() => {
                let report = agent.run_heartbeat(chrono::Utc::now()).await;
                if report.exits() > 0 || report.reviews() > 0 {
                    tracing::info!(
                        "Heartbeat: {} exits, {} reviews",
                        report.exits(),
                        report.reviews()
                    );
                }
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received, exiting gracefully...");
                agent.persist().await;
                agent.metrics().log_metrics();
                notifier
                    .notify_and_wait(AlertType::Anomaly {
                        event: "agent_stopped".to_string(),
                        severity: Severity::Info,
                        detail: "graceful shutdown".to_string(),
                    })
                    .await;
                break;
            }
        }
    }

    tracing::info!("Trading agent shut down.");
    Ok(())
}
