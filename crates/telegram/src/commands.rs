use std::sync::Arc;

use teloxide::{
    dispatching::UpdateHandler,
    prelude::*,
    utils::command::BotCommands,
};
use tracing::{info, warn};

use common::{EngineCommand, EngineState, Position, PositionState, TradingMode};
use engine::EngineHandle;

type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Dependencies injected into every handler via `dptree`.
#[derive(Clone)]
pub struct BotDeps {
    pub engine: EngineHandle,
    pub trading_mode: TradingMode,
    pub allowed_user_ids: Arc<Vec<i64>>,
}

/// Telegram bot commands exposed to the operator.
#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "lowercase", description = "Candlebot commands:")]
pub enum Command {
    #[command(description = "Show engine state and position")]
    Status,
    #[command(description = "Keep evaluating candles but stop placing orders")]
    Pause,
    #[command(description = "Resume order placement (re-reads holdings after a halt)")]
    Resume,
    #[command(description = "List commands")]
    Help,
}

/// Start the Telegram bot in long-polling mode.
pub async fn start_bot(bot: Bot, deps: BotDeps) {
    let deps = Arc::new(deps);

    info!("Telegram bot starting (long-polling)");

    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![deps])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn schema() -> UpdateHandler<Box<dyn std::error::Error + Send + Sync>> {
    use dptree::case;

    let command_handler = teloxide::filter_command::<Command, _>()
        .branch(case![Command::Status].endpoint(handle_status))
        .branch(case![Command::Pause].endpoint(handle_pause))
        .branch(case![Command::Resume].endpoint(handle_resume))
        .branch(case![Command::Help].endpoint(handle_help));

    Update::filter_message()
        .filter_map(|msg: Message| msg.from().map(|u| u.id))
        .filter_async(auth_filter)
        .branch(command_handler)
}

/// Silently drop messages from users not in the allowed list.
async fn auth_filter(user_id: UserId, deps: Arc<BotDeps>) -> bool {
    let uid = user_id.0 as i64;
    let allowed = deps.allowed_user_ids.contains(&uid);
    if !allowed {
        warn!(user_id = uid, "Unauthorized Telegram access attempt");
    }
    allowed
}

async fn handle_status(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = deps.engine.state().await;
    let position = deps.engine.position().await;
    bot.send_message(msg.chat.id, status_text(state, deps.trading_mode, &position))
        .await?;
    Ok(())
}

async fn handle_pause(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = deps.engine.state().await;
    let reply = match state {
        EngineState::Running => {
            deps.engine.send(EngineCommand::Pause).await;
            "Engine paused. Candles are still evaluated; no orders will be placed."
        }
        EngineState::Paused => "Engine is already paused.",
        EngineState::Halted => "Engine is halted; /resume to reconcile first.",
        EngineState::Stopped => "Engine is not running.",
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_resume(bot: Bot, msg: Message, deps: Arc<BotDeps>) -> HandlerResult {
    let state = deps.engine.state().await;
    let reply = match state {
        EngineState::Paused => {
            deps.engine.send(EngineCommand::Resume).await;
            "Engine resumed."
        }
        EngineState::Halted => {
            deps.engine.send(EngineCommand::Resume).await;
            "Re-reading account holdings before resuming\u{2026}"
        }
        EngineState::Running => "Engine is already running.",
        EngineState::Stopped => "Engine is not running.",
    };
    bot.send_message(msg.chat.id, reply).await?;
    Ok(())
}

async fn handle_help(bot: Bot, msg: Message) -> HandlerResult {
    bot.send_message(msg.chat.id, Command::descriptions().to_string())
        .await?;
    Ok(())
}

fn status_text(state: EngineState, mode: TradingMode, position: &Position) -> String {
    let holding = match position.state {
        PositionState::Flat => "FLAT".to_string(),
        PositionState::Long if position.entry_price > 0.0 => format!(
            "LONG {} @ {}",
            position.quantity, position.entry_price
        ),
        PositionState::Long => format!("LONG {} (from account holdings)", position.quantity),
    };
    format!(
        "Candlebot Status\n\
         Engine: {state}\n\
         Mode: {mode}\n\
         {}: {holding}",
        position.pair
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_operator_commands() {
        assert_eq!(Command::parse("/status", "candlebot").ok(), Some(Command::Status));
        assert_eq!(Command::parse("/pause", "candlebot").ok(), Some(Command::Pause));
        assert_eq!(Command::parse("/resume", "candlebot").ok(), Some(Command::Resume));
        assert!(Command::parse("/stop", "candlebot").is_err());
    }

    #[test]
    fn status_shows_state_and_position() {
        let flat = Position::flat("ETHUSDT");
        let text = status_text(EngineState::Paused, TradingMode::Paper, &flat);
        assert!(text.contains("Engine: paused"));
        assert!(text.contains("Mode: paper"));
        assert!(text.contains("ETHUSDT: FLAT"));

        let adopted = Position::long("ETHUSDT", 0.0, None, 2.0);
        let text = status_text(EngineState::Running, TradingMode::Live, &adopted);
        assert!(text.contains("LONG 2 (from account holdings)"));
    }
}
