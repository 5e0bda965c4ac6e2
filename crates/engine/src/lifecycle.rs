use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use common::{
    Action, Candle, Clock, EngineCommand, EngineState, Error, ExchangeClient, Holdings,
    OperatorAlert, OrderOutcome, OrderRecord, OrderSide, Position, Result, Signal, TradingPair,
};
use history::{HistoryStore, TimeRange};
use risk::{Balances, FillStats, GuardConfig, OrderGuards, OrderSizer, SizingConfig};
use strategy::{build_policy, CandleWindow, DecisionPolicy, EngineFileConfig, OrderType, RecognizerSet};

use crate::executor::OrderExecutor;
use crate::position::{PositionMachine, Transition};

/// A candle whose volume is below this share of the previous one is assumed
/// to be a partial bar.
const PARTIAL_VOLUME_RATIO: f64 = 0.2;

/// Cloneable handle passed to other crates (Telegram, API).
#[derive(Clone)]
pub struct EngineHandle {
    command_tx: mpsc::Sender<EngineCommand>,
    state: Arc<RwLock<EngineState>>,
    position: Arc<RwLock<Position>>,
    pair: TradingPair,
}

impl EngineHandle {
    pub async fn send(&self, cmd: EngineCommand) {
        let _ = self.command_tx.send(cmd).await;
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    pub fn state_handle(&self) -> Arc<RwLock<EngineState>> {
        self.state.clone()
    }

    /// Snapshot of the position as of the last completed cycle.
    pub async fn position(&self) -> Position {
        self.position.read().await.clone()
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }
}

/// What one evaluation cycle did.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The candle did not advance the window and was dropped.
    Skipped,
    Evaluated {
        signal: Signal,
        /// Order record of the intent emitted this cycle, if any.
        order: Option<OrderRecord>,
    },
}

/// The engine actor: owns the window, recognizers, decision policy, position
/// machine and executor, and processes one candle at a time.
pub struct Engine {
    pair: TradingPair,
    window: CandleWindow,
    recognizers: RecognizerSet,
    policy: Box<dyn DecisionPolicy>,
    machine: PositionMachine,
    sizer: OrderSizer,
    guards: OrderGuards,
    /// Only fills this recent feed the price check.
    price_check_window: Option<chrono::Duration>,
    /// Base asset kept out of the position.
    base_reserve: f64,
    order_type: OrderType,
    poll_interval: std::time::Duration,
    executor: OrderExecutor,
    client: Arc<dyn ExchangeClient>,
    history: HistoryStore,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<EngineState>>,
    shared_position: Arc<RwLock<Position>>,
    command_rx: mpsc::Receiver<EngineCommand>,
    alert_tx: mpsc::Sender<OperatorAlert>,
}

impl Engine {
    /// Build the engine from its config. The position starts FLAT until
    /// [`Engine::bootstrap`] reads the account.
    pub fn new(
        cfg: &EngineFileConfig,
        client: Arc<dyn ExchangeClient>,
        history: HistoryStore,
        clock: Arc<dyn Clock>,
        alert_tx: mpsc::Sender<OperatorAlert>,
    ) -> Result<(Self, EngineHandle)> {
        cfg.validate()?;
        let pair = cfg.market.pair();
        let recognizers = RecognizerSet::from_names(&cfg.recognizers.enabled)?;
        let policy = build_policy(&cfg.decision)?;
        let sizer = OrderSizer::new(SizingConfig {
            quantity: cfg.orders.quantity,
            lot_step: cfg.orders.lot_step,
            min_quantity: cfg.orders.min_quantity,
            max_notional: cfg.orders.max_notional,
        });
        let guards = OrderGuards::new(GuardConfig {
            buy_price_check: cfg.guards.buy_price_check,
            sell_price_check: cfg.guards.sell_price_check,
            min_orders: cfg.guards.price_check_min_orders,
            max_base_balance: cfg.guards.max_base_balance,
            min_quote_balance: cfg.guards.min_quote_balance,
            max_quote_balance: cfg.guards.max_quote_balance,
        });

        let position = Position::flat(pair.symbol());
        let (command_tx, command_rx) = mpsc::channel(32);
        let state = Arc::new(RwLock::new(EngineState::Stopped));
        let shared_position = Arc::new(RwLock::new(position.clone()));

        let handle = EngineHandle {
            command_tx,
            state: state.clone(),
            position: shared_position.clone(),
            pair: pair.clone(),
        };

        info!(
            pair = %pair,
            window = cfg.market.window_size,
            policy = %policy.name(),
            recognizers = ?recognizers.names(),
            "Engine configured"
        );

        let engine = Engine {
            window: CandleWindow::new(cfg.market.window_size),
            machine: PositionMachine::new(position, cfg.orders.pending_timeout()?),
            executor: OrderExecutor::new(client.clone()),
            order_type: cfg.orders.order_type,
            poll_interval: cfg.orders.poll_interval(),
            pair,
            recognizers,
            policy,
            sizer,
            guards,
            price_check_window: cfg.guards.price_check_window(),
            base_reserve: cfg.guards.min_base_balance.unwrap_or(0.0),
            client,
            history,
            clock,
            state,
            shared_position,
            command_rx,
            alert_tx,
        };
        Ok((engine, handle))
    }

    pub fn position(&self) -> &Position {
        self.machine.position()
    }

    pub fn machine(&self) -> &PositionMachine {
        &self.machine
    }

    pub fn window(&self) -> &CandleWindow {
        &self.window
    }

    pub async fn state(&self) -> EngineState {
        *self.state.read().await
    }

    /// Mark a stopped engine `Running` so signals turn into intents. An
    /// engine halted during [`Engine::bootstrap`] stays halted.
    /// [`Engine::run`] does this itself; call it directly only when driving
    /// [`Engine::run_cycle`] by hand.
    pub async fn start(&self) {
        let mut state = self.state.write().await;
        match *state {
            EngineState::Stopped => {
                *state = EngineState::Running;
                info!(pair = %self.pair, "Engine running");
            }
            other => warn!(pair = %self.pair, state = %other, "Engine not started"),
        }
    }

    /// Settle what the history store still has as PENDING, then read account
    /// holdings and adopt them as the starting position.
    pub async fn bootstrap(&mut self) -> Result<()> {
        let unresolved = self.settle_stored_orders().await?;
        let holdings = self.holdings().await?;
        let pair = self.pair.symbol();
        self.machine = PositionMachine::from_holdings(pair, holdings, self.machine_timeout());
        info!(
            pair = %self.pair,
            state = %holdings.state,
            quantity = holdings.quantity,
            "Starting position from account holdings"
        );
        self.track_unresolved(unresolved).await;
        self.publish_position().await;
        Ok(())
    }

    /// Poll every stored PENDING order of this pair once and write final
    /// answers back. Returns the orders that are still unresolved.
    async fn settle_stored_orders(&mut self) -> Result<Vec<OrderRecord>> {
        let symbol = self.pair.symbol();
        let mut unresolved = Vec::new();
        for record in self.history.pending_orders().await? {
            if record.pair != symbol {
                continue;
            }
            match self.executor.poll(&record).await {
                Ok(polled) if polled.outcome.is_final() => {
                    info!(
                        order_id = %polled.order_id,
                        outcome = %polled.outcome,
                        "Stored pending order resolved at startup"
                    );
                    self.history.resolve_order(&polled).await?;
                }
                Ok(_) => unresolved.push(record),
                Err(e) => {
                    debug!(order_id = %record.order_id, error = %e, "Stored pending order not resolved");
                    unresolved.push(record);
                }
            }
        }
        Ok(unresolved)
    }

    /// A single unresolved order is tracked again with its original deadline
    /// so it is never submitted twice. More than one cannot be tracked and
    /// halts the engine.
    async fn track_unresolved(&mut self, mut unresolved: Vec<OrderRecord>) {
        match unresolved.len() {
            0 => {}
            1 => {
                let record = unresolved.remove(0);
                self.machine.resume(record);
                if let Transition::TimedOut(r) = self.machine.check_deadline(self.clock.now()) {
                    self.halt_on_timeout(&r).await;
                }
            }
            _ => {
                let order_ids: Vec<String> = unresolved.into_iter().map(|r| r.order_id).collect();
                error!(pair = %self.pair, orders = ?order_ids, "Halting: several orders still pending");
                *self.state.write().await = EngineState::Halted;
                self.alert(OperatorAlert::PendingOrdersUnresolved {
                    pair: self.pair.symbol(),
                    order_ids,
                })
                .await;
            }
        }
    }

    /// Fill the window with historical closed candles without trading.
    /// A trailing bar with suspiciously low volume is treated as partial and
    /// dropped; out-of-order bars are skipped. Returns how many were kept.
    pub fn warm_up(&mut self, candles: &[Candle]) -> usize {
        let usable = match candles {
            [.., prev, last] if last.volume < PARTIAL_VOLUME_RATIO * prev.volume => {
                debug!(open_time = %last.open_time, "Dropping partial trailing candle");
                &candles[..candles.len() - 1]
            }
            _ => candles,
        };

        let kept = usable
            .iter()
            .filter(|c| match self.window.append(**c) {
                Ok(()) => true,
                Err(e) => {
                    debug!(error = %e, "Warm-up candle skipped");
                    false
                }
            })
            .count();
        info!(pair = %self.pair, kept, window = self.window.len(), "Window warmed up");
        kept
    }

    /// Process one closed candle: evaluate, decide, record, and act.
    ///
    /// History write failures are returned and are fatal to the caller.
    pub async fn run_cycle(&mut self, candle: Candle) -> Result<CycleOutcome> {
        if let Err(e) = self.window.append(candle) {
            warn!(pair = %self.pair, error = %e, "Candle skipped");
            return Ok(CycleOutcome::Skipped);
        }

        let matches = self.recognizers.evaluate(&self.window);
        let signal = self.policy.decide(candle.open_time, &matches);
        let symbol = self.pair.symbol();
        let now = self.clock.now();

        // Earlier matches first, so this cycle's own matches are not their
        // own follow-up.
        self.history
            .update_pattern_followups(&symbol, candle.close, now)
            .await?;
        self.history
            .append_patterns(&symbol, &matches, candle.close, now)
            .await?;
        self.history.append_signal(&symbol, &signal, now).await?;
        info!(
            pair = %self.pair,
            candle = %candle.open_time,
            close = candle.close,
            action = %signal.action,
            rationale = %signal.rationale,
            "Cycle evaluated"
        );

        self.check_pending().await?;

        let order = if signal.action != Action::Hold {
            self.act_on(&signal, candle.close).await?
        } else {
            None
        };

        self.publish_position().await;

        Ok(CycleOutcome::Evaluated { signal, order })
    }

    /// Emit, submit and record an intent for `signal` if the position and
    /// engine state allow it.
    async fn act_on(&mut self, signal: &Signal, last_close: f64) -> Result<Option<OrderRecord>> {
        let state = self.state().await;
        if state != EngineState::Running {
            info!(state = %state, action = %signal.action, "Intents suppressed");
            return Ok(None);
        }

        let Some(side) = self.machine.intent_for(signal.action) else {
            debug!(
                action = %signal.action,
                position = %self.machine.position().state,
                "Signal does not apply to current position"
            );
            return Ok(None);
        };

        let held = self.machine.position().quantity;
        let quantity = match self.sizer.size(side, held, last_close) {
            Ok(q) => q,
            Err(reason) => {
                warn!(side = %side, reason = %reason, "Intent skipped");
                return Ok(None);
            }
        };
        if !self.passes_guards(side, quantity, last_close).await? {
            return Ok(None);
        }
        let price_hint = match self.order_type {
            OrderType::Limit => Some(last_close),
            OrderType::Market => None,
        };

        let order = OrderExecutor::prepare(
            &self.pair.symbol(),
            side,
            quantity,
            price_hint,
            self.clock.now(),
        );
        self.machine
            .begin(OrderRecord::for_order(&order, OrderOutcome::Pending));
        let submission = self.executor.submit(&order).await;
        let record = submission.record;

        let transition = self.machine.on_submitted(record.clone(), self.clock.now());
        self.history.record_order(&record).await?;

        match (&transition, submission.error) {
            (Transition::Filled(r), _) => self.after_fill(r).await,
            (_, Some(Error::ExchangeRejected(reason))) => {
                self.alert(OperatorAlert::OrderRejected {
                    pair: record.pair.clone(),
                    side,
                    quantity,
                    price_hint,
                    reason,
                })
                .await
            }
            (_, Some(e)) => {
                self.alert(OperatorAlert::OrderFailed {
                    pair: record.pair.clone(),
                    side,
                    error: e.to_string(),
                })
                .await
            }
            (Transition::NotFilled(r), None) => {
                self.alert(OperatorAlert::OrderRejected {
                    pair: r.pair.clone(),
                    side,
                    quantity,
                    price_hint,
                    reason: format!("exchange reported {}", r.outcome),
                })
                .await
            }
            _ => {}
        }
        Ok(Some(record))
    }

    /// Poll the outstanding order, resolve it in the history store once final,
    /// and halt the engine if it outlived its deadline.
    pub async fn check_pending(&mut self) -> Result<()> {
        let Some(pending) = self.machine.pending() else {
            return Ok(());
        };
        if !self.machine.is_awaiting_fill() {
            return Ok(());
        }
        let record = pending.record().clone();

        let transition = match self.executor.poll(&record).await {
            Ok(polled) => self.machine.on_polled(polled, self.clock.now()),
            Err(e) => {
                debug!(order_id = %record.order_id, error = %e, "Poll failed; checking deadline");
                self.machine.check_deadline(self.clock.now())
            }
        };

        match transition {
            Transition::Filled(r) => {
                self.history.resolve_order(&r).await?;
                self.after_fill(&r).await;
            }
            Transition::NotFilled(r) => {
                self.history.resolve_order(&r).await?;
                self.alert(OperatorAlert::OrderRejected {
                    pair: r.pair.clone(),
                    side: r.side,
                    quantity: r.requested_quantity,
                    price_hint: r.price_hint,
                    reason: format!("exchange reported {}", r.outcome),
                })
                .await;
            }
            Transition::TimedOut(r) => self.halt_on_timeout(&r).await,
            Transition::Awaiting | Transition::Ignored => {}
        }
        self.publish_position().await;
        Ok(())
    }

    async fn halt_on_timeout(&self, record: &OrderRecord) {
        let e = Error::PendingTimeout {
            order_id: record.order_id.clone(),
        };
        error!(pair = %self.pair, error = %e, "Halting: order outcome unknown");
        *self.state.write().await = EngineState::Halted;
        self.alert(OperatorAlert::PendingTimedOut {
            pair: record.pair.clone(),
            order_id: record.order_id.clone(),
            side: record.side,
        })
        .await;
    }

    /// Buy-low/sell-high price check against recent fills of the other side,
    /// then the balance limits. Skips are logged here.
    async fn passes_guards(&self, side: OrderSide, quantity: f64, price: f64) -> Result<bool> {
        if self.guards.checks_price(side) {
            let range = TimeRange {
                from: self.price_check_window.map(|w| self.clock.now() - w),
                to: None,
            };
            let orders = self.history.orders(&range, None).await?;
            let opposite = FillStats::of(&orders, &self.pair.symbol(), side.opposite());
            if let Err(reason) = self.guards.check_price(side, price, &opposite) {
                warn!(side = %side, reason = %reason, "Intent skipped");
                return Ok(false);
            }
        }

        if self.guards.needs_balances() {
            let balances = match self.balances().await {
                Ok(b) => b,
                Err(e) => {
                    warn!(side = %side, error = %e, "Balances unavailable; intent skipped");
                    return Ok(false);
                }
            };
            if let Err(reason) = self.guards.check_balances(side, quantity, price, balances) {
                warn!(side = %side, reason = %reason, "Intent skipped");
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub async fn handle_command(&mut self, cmd: EngineCommand) {
        let current = self.state().await;
        match (cmd, current) {
            (EngineCommand::Pause, EngineState::Running) => {
                info!("Engine paused; cycles continue, intents suppressed");
                *self.state.write().await = EngineState::Paused;
            }
            (EngineCommand::Resume, EngineState::Paused) => {
                info!("Engine resumed");
                *self.state.write().await = EngineState::Running;
            }
            (EngineCommand::Resume, EngineState::Halted) => match self.reconcile().await {
                Ok(()) => {
                    info!("Engine resumed after reconcile");
                    *self.state.write().await = EngineState::Running;
                }
                Err(e) => warn!(error = %e, "Reconcile failed; engine stays halted"),
            },
            (cmd, state) => debug!(?cmd, state = %state, "Command has no effect"),
        }
    }

    /// Re-read holdings and replace the position with them. Orders of the
    /// pair still stored as PENDING are closed out as ERROR, their outcome
    /// now being reflected in the holdings.
    async fn reconcile(&mut self) -> Result<()> {
        let holdings = self.holdings().await?;
        let symbol = self.pair.symbol();
        for record in self.history.pending_orders().await? {
            if record.pair != symbol {
                continue;
            }
            info!(order_id = %record.order_id, "Closing out unresolved order");
            self.history
                .resolve_order(&OrderRecord {
                    outcome: OrderOutcome::Error,
                    ..record
                })
                .await?;
        }
        let position = self.machine.reconcile(holdings).clone();
        self.publish_position().await;
        self.alert(OperatorAlert::PositionReconciled {
            pair: position.pair,
            state: position.state,
            quantity: position.quantity,
        })
        .await;
        Ok(())
    }

    /// Run the engine loop until the candle feed closes.
    /// Call from `tokio::spawn`. Returns an error only for History Store failures.
    pub async fn run(mut self, mut candle_rx: mpsc::Receiver<Candle>) -> Result<()> {
        self.start().await;

        let mut poll_tick = tokio::time::interval(self.poll_interval);
        poll_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                maybe = candle_rx.recv() => match maybe {
                    Some(candle) => {
                        if let Err(e) = self.run_cycle(candle).await {
                            break Err(e);
                        }
                    }
                    None => {
                        warn!("Candle channel closed, engine stopping");
                        break Ok(());
                    }
                },
                Some(cmd) = self.command_rx.recv() => self.handle_command(cmd).await,
                _ = poll_tick.tick() => {
                    if let Err(e) = self.check_pending().await {
                        break Err(e);
                    }
                }
            }
        };

        if let Err(e) = &result {
            error!(error = %e, "History store failure, engine stopping");
        }
        *self.state.write().await = EngineState::Stopped;
        result
    }

    // ─── Helpers ──────────────────────────────────────────────────────────────

    /// Holdings net of the base reserve, classified against the minimum
    /// order quantity.
    async fn holdings(&self) -> Result<Holdings> {
        let raw = self.client.current_holdings(&self.pair).await?;
        Ok(Holdings::from_quantity(
            (raw.quantity - self.base_reserve).max(0.0),
            self.sizer.config().min_quantity,
        ))
    }

    async fn balances(&self) -> Result<Balances> {
        let base = self.client.current_holdings(&self.pair).await?.quantity;
        let quote = self.client.quote_balance(&self.pair).await?;
        Ok(Balances { base, quote })
    }

    /// Alert the fill. After a BUY the position is capped to what the account
    /// received, which fees may have made less than the executed quantity.
    async fn after_fill(&mut self, record: &OrderRecord) {
        if record.side == OrderSide::Buy {
            match self.holdings().await {
                Ok(h) => self.machine.cap_quantity(h.quantity),
                Err(e) => warn!(error = %e, "Holdings unavailable after fill; position not capped"),
            }
        }
        self.alert_filled(record).await;
    }

    fn machine_timeout(&self) -> chrono::Duration {
        self.machine.timeout()
    }

    async fn publish_position(&self) {
        *self.shared_position.write().await = self.machine.position().clone();
    }

    async fn alert_filled(&self, record: &OrderRecord) {
        self.alert(OperatorAlert::OrderFilled {
            pair: record.pair.clone(),
            side: record.side,
            quantity: record.executed_quantity(),
            fill_price: record.fill_price.unwrap_or_default(),
        })
        .await;
    }

    async fn alert(&self, alert: OperatorAlert) {
        info!(alert = %alert, "Operator alert");
        if self.alert_tx.send(alert).await.is_err() {
            debug!("Alert channel closed");
        }
    }
}
