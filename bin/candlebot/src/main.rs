use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Candle, Config, ExchangeClient, SystemClock, TradingMode};
use engine::{BinanceClient, BinanceStream, Engine};
use history::HistoryStore;
use paper::PaperClient;
use strategy::EngineFileConfig;
use telegram_ctrl::{forward_alerts, start_bot, BotDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("reading environment configuration")?;
    let engine_cfg = EngineFileConfig::load(&cfg.engine_config_path)
        .with_context(|| format!("loading engine config from {}", cfg.engine_config_path))?;
    let pair = engine_cfg.market.pair();
    info!(mode = %cfg.trading_mode, pair = %pair, interval = %engine_cfg.market.interval, "Candlebot starting");

    // ── History store ─────────────────────────────────────────────────────────
    let history = HistoryStore::connect(&cfg.database_url)
        .await
        .context("opening history store")?;
    info!("History store ready");

    // ── Exchange client (injected based on TRADING_MODE) ──────────────────────
    // Klines are public; paper mode still reads them from Binance.
    let market_data = match cfg.trading_mode {
        TradingMode::Live => BinanceClient::new(&cfg.binance_api_key, &cfg.binance_secret)?,
        TradingMode::Paper => BinanceClient::public()?,
    };
    let paper = match cfg.trading_mode {
        TradingMode::Live => None,
        TradingMode::Paper => Some(Arc::new(PaperClient::new(
            cfg.paper_balance,
            cfg.paper_slippage_bps,
        ))),
    };
    let exchange_client: Arc<dyn ExchangeClient> = match &paper {
        None => {
            info!("Live trading mode, orders go to Binance");
            Arc::new(market_data.clone()) as Arc<dyn ExchangeClient>
        }
        Some(paper) => {
            info!(slippage_bps = cfg.paper_slippage_bps, balance = cfg.paper_balance, "Paper trading mode, fills are simulated");
            paper.clone() as Arc<dyn ExchangeClient>
        }
    };

    // ── Engine ────────────────────────────────────────────────────────────────
    let (alert_tx, alert_rx) = mpsc::channel(64);
    let (mut engine, engine_handle) = Engine::new(
        &engine_cfg,
        exchange_client,
        history.clone(),
        Arc::new(SystemClock),
        alert_tx,
    )?;
    engine
        .bootstrap()
        .await
        .context("reading starting position from account holdings")?;

    let warm = market_data
        .klines(&pair, &engine_cfg.market.interval, engine_cfg.market.window_size)
        .await
        .context("fetching warm-up klines")?;
    if let (Some(paper), Some(last)) = (&paper, warm.last()) {
        paper.update_price(&pair.symbol(), last.close).await;
    }
    engine.warm_up(&warm);

    // ── Candle feed ───────────────────────────────────────────────────────────
    let (stream_tx, mut stream_rx) = mpsc::channel::<Candle>(64);
    let (candle_tx, candle_rx) = mpsc::channel::<Candle>(64);
    let stream = BinanceStream::new(pair.clone(), engine_cfg.market.interval.clone(), stream_tx);
    tokio::spawn(stream.run());

    // Paper fills need the latest close before the engine sees the candle.
    let relay_paper = paper.clone();
    let symbol = pair.symbol();
    tokio::spawn(async move {
        while let Some(candle) = stream_rx.recv().await {
            if let Some(paper) = &relay_paper {
                paper.update_price(&symbol, candle.close).await;
            }
            if candle_tx.send(candle).await.is_err() {
                break;
            }
        }
    });

    // ── Telegram C2 and alerts ────────────────────────────────────────────────
    let bot = cfg.telegram_token.clone().map(teloxide::Bot::new);
    let chat_ids: Vec<teloxide::types::ChatId> = cfg
        .telegram_allowed_user_ids
        .iter()
        .map(|&id| teloxide::types::ChatId(id))
        .collect();
    tokio::spawn(forward_alerts(alert_rx, bot.clone(), chat_ids));

    match bot {
        Some(bot) => {
            let deps = BotDeps {
                engine: engine_handle.clone(),
                trading_mode: cfg.trading_mode,
                allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
            };
            tokio::spawn(start_bot(bot, deps));
        }
        None => warn!("TELEGRAM_TOKEN not set; operator commands disabled, alerts are logged only"),
    }

    // ── History API ───────────────────────────────────────────────────────────
    let api_state = api::AppState {
        history,
        engine_state: engine_handle.state_handle(),
        trading_mode: cfg.trading_mode,
        dashboard_token: cfg.dashboard_token.clone(),
    };
    let port = cfg.dashboard_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(port, error = %e, "History API failed");
        }
    });

    // ── Run until the engine stops or Ctrl-C ──────────────────────────────────
    let engine_task = tokio::spawn(engine.run(candle_rx));
    info!("All subsystems started. Waiting for shutdown signal.");

    tokio::select! {
        joined = engine_task => {
            joined
                .context("engine task panicked")?
                .context("engine stopped on a history store failure")?;
            warn!("Engine stopped: candle feed closed");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for shutdown signal")?;
            info!("Shutdown signal received. Exiting.");
        }
    }
    Ok(())
}
