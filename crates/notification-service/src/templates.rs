use crate::AlertType;

fn format_pf(profit_factor: Option<f64>) -> String {
    match profit_factor {
        Some(pf) => format!("{:.2}", pf),
        None => "n/a".to_string(),
    }
}

/// Title and plain-text body for an alert.
pub(crate) fn render(alert_type: &AlertType) -> (String, String) {
    match alert_type {
        AlertType::SignalOpened {
            symbol,
            side,
            entry,
            stop,
            take,
            quantity,
            confidence,
            reason,
        } => (
            format!("Opened {} {}", side.to_uppercase(), symbol),
            format!(
                "entry {:.5} | stop {:.5} | take {:.5} | qty {} | confidence {:.0}%\n{}",
                entry,
                stop,
                take,
                quantity,
                confidence * 100.0,
                reason
            ),
        ),
        AlertType::PositionExited {
            symbol,
            side,
            exit_price,
            reason,
            pnl,
        } => (
            format!("Closed {} {} ({})", side.to_uppercase(), symbol, reason),
            format!("exit {:.5} | pnl {:+.2}", exit_price, pnl),
        ),
        AlertType::PositionAdjusted {
            symbol,
            stop,
            take,
            risk_reward,
            reason,
        } => (
            format!("Adjusted {}", symbol),
            format!(
                "stop {:.5} | take {:.5} | rr {:.2}\n{}",
                stop, take, risk_reward, reason
            ),
        ),
        AlertType::RegimeChanged {
            symbol,
            previous,
            current,
            confidence,
        } => (
            format!("Regime change {}", symbol),
            format!(
                "{} -> {} (confidence {:.0}%)",
                previous.as_deref().unwrap_or("unknown"),
                current,
                confidence * 100.0
            ),
        ),
        AlertType::Anomaly {
            event,
            severity,
            detail,
        } => (
            format!("[{}] {}", severity.to_string().to_uppercase(), event),
            detail.clone(),
        ),
        AlertType::Watch { symbol, reason } => (format!("Watch {}", symbol), reason.clone()),
        AlertType::DailyReport {
            date,
            equity,
            pnl_total,
            trades,
            win_rate,
            profit_factor,
        } => (
            format!("Daily report {}", date),
            format!(
                "equity {:.2} | pnl {:+.2} | trades {} | win rate {:.1}% | profit factor {}",
                equity,
                pnl_total,
                trades,
                win_rate * 100.0,
                format_pf(*profit_factor)
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Severity;

    #[test]
    fn test_render_signal() {
        let (title, message) = render(&AlertType::SignalOpened {
            symbol: "XAUUSDm".to_string(),
            side: "short".to_string(),
            entry: 2350.5,
            stop: 2360.0,
            take: 2330.0,
            quantity: 0.02,
            confidence: 0.72,
            reason: "committee_short".to_string(),
        });
        assert_eq!(title, "Opened SHORT XAUUSDm");
        assert!(message.contains("confidence 72%"));
    }

    #[test]
    fn test_render_daily_report_without_losses() {
        let (_, message) = render(&AlertType::DailyReport {
            date: "2024-06-03".to_string(),
            equity: 10_120.0,
            pnl_total: 120.0,
            trades: 2,
            win_rate: 1.0,
            profit_factor: None,
        });
        assert!(message.ends_with("profit factor n/a"));
    }

    #[test]
    fn test_render_anomaly() {
        let (title, _) = render(&AlertType::Anomaly {
            event: "safe_mode".to_string(),
            severity: Severity::Warning,
            detail: "3 stop losses".to_string(),
        });
        assert_eq!(title, "[WARNING] safe_mode");
    }
}
