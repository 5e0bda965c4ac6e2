use teloxide::prelude::*;
use tokio::sync::mpsc;
use tracing::{info, warn};

use common::OperatorAlert;

/// Message text for an operator alert, prefixed by how urgent it is.
pub fn format_alert(alert: &OperatorAlert) -> String {
    let prefix = match alert {
        OperatorAlert::OrderFilled { .. } => "\u{2705}",
        OperatorAlert::PositionReconciled { .. } => "\u{2139}\u{fe0f}",
        OperatorAlert::OrderRejected { .. } | OperatorAlert::OrderFailed { .. } => "\u{26a0}\u{fe0f}",
        OperatorAlert::PendingTimedOut { .. } | OperatorAlert::PendingOrdersUnresolved { .. } => {
            "\u{1f6d1} HALTED:"
        }
    };
    format!("{prefix} {alert}")
}

/// Drain engine alerts until the channel closes. Every alert is logged;
/// with a bot configured it is also sent to every chat in `chat_ids`.
pub async fn forward_alerts(
    mut alert_rx: mpsc::Receiver<OperatorAlert>,
    bot: Option<Bot>,
    chat_ids: Vec<ChatId>,
) {
    while let Some(alert) = alert_rx.recv().await {
        match &alert {
            OperatorAlert::OrderFilled { .. } | OperatorAlert::PositionReconciled { .. } => {
                info!(alert = %alert, "Operator alert")
            }
            _ => warn!(alert = %alert, "Operator alert"),
        }
        if let Some(bot) = &bot {
            send_alert(bot, &chat_ids, &format_alert(&alert)).await;
        }
    }
    info!("Alert channel closed");
}

/// Send a proactive alert to all configured chat IDs.
async fn send_alert(bot: &Bot, chat_ids: &[ChatId], message: &str) {
    for &chat_id in chat_ids {
        if let Err(e) = bot.send_message(chat_id, message).await {
            warn!(chat_id = ?chat_id, error = %e, "Failed to send Telegram alert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderSide;

    #[test]
    fn timeout_alert_is_marked_as_halt() {
        let text = format_alert(&OperatorAlert::PendingTimedOut {
            pair: "ETHUSDT".into(),
            order_id: "abc".into(),
            side: OrderSide::Buy,
        });
        assert!(text.contains("HALTED"));
        assert!(text.contains("abc"));

        let text = format_alert(&OperatorAlert::PendingOrdersUnresolved {
            pair: "ETHUSDT".into(),
            order_ids: vec!["a1".into(), "b2".into()],
        });
        assert!(text.starts_with("\u{1f6d1} HALTED:"));
        assert!(text.contains("a1, b2"), "{text}");
    }

    #[tokio::test]
    async fn forwarder_drains_until_closed_without_bot() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(OperatorAlert::OrderFailed {
            pair: "ETHUSDT".into(),
            side: OrderSide::Sell,
            error: "timeout".into(),
        })
        .await
        .unwrap();
        drop(tx);
        forward_alerts(rx, None, Vec::new()).await;
    }
}
