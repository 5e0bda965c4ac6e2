use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use common::{Action, Holdings, OrderOutcome, OrderRecord, OrderSide, Position, PositionState};

/// Where an outstanding order stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingPhase {
    /// Handed to the exchange, no answer yet.
    Submitted,
    /// Exchange answered PENDING; waiting for a final outcome or the deadline.
    AwaitingFill,
    Resolved,
    /// Deadline passed and the final poll was still unresolved.
    TimedOut,
}

/// Tracker for the single outstanding order of a pair.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    record: OrderRecord,
    phase: PendingPhase,
    deadline: Option<DateTime<Utc>>,
}

impl PendingOrder {
    fn submitted(record: OrderRecord) -> Self {
        Self {
            record,
            phase: PendingPhase::Submitted,
            deadline: None,
        }
    }

    fn await_fill(&mut self, record: OrderRecord, now: DateTime<Utc>, timeout: Duration) {
        debug_assert_eq!(self.phase, PendingPhase::Submitted);
        self.record = record;
        self.phase = PendingPhase::AwaitingFill;
        self.deadline = Some(now + timeout);
    }

    /// An order recorded PENDING before a restart; its deadline runs from
    /// the original intent time.
    fn resumed(record: OrderRecord, timeout: Duration) -> Self {
        let deadline = record.intent_time + timeout;
        Self {
            record,
            phase: PendingPhase::AwaitingFill,
            deadline: Some(deadline),
        }
    }

    fn resolve(&mut self, record: OrderRecord) {
        self.record = record;
        self.phase = PendingPhase::Resolved;
    }

    fn time_out(&mut self) {
        self.phase = PendingPhase::TimedOut;
    }

    pub fn record(&self) -> &OrderRecord {
        &self.record
    }

    pub fn phase(&self) -> PendingPhase {
        self.phase
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    /// True once an AWAITING_FILL order has reached its deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.phase == PendingPhase::AwaitingFill && self.deadline.is_some_and(|d| now >= d)
    }
}

/// What an exchange answer did to the position.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// Fill applied; the position flipped.
    Filled(OrderRecord),
    /// REJECTED or ERROR; the pre-intent state is kept.
    NotFilled(OrderRecord),
    /// Still PENDING and within the deadline.
    Awaiting,
    /// Still PENDING after the deadline.
    TimedOut(OrderRecord),
    /// The answer was for an order we are not tracking.
    Ignored,
}

/// FLAT/LONG state of the traded pair plus its outstanding order, if any.
///
/// Only the engine actor owns and mutates this; the position is only changed
/// by a FILLED outcome or by reconciling against account holdings.
#[derive(Debug, Clone)]
pub struct PositionMachine {
    position: Position,
    pending: Option<PendingOrder>,
    timeout: Duration,
}

impl PositionMachine {
    pub fn new(position: Position, timeout: Duration) -> Self {
        Self {
            position,
            pending: None,
            timeout,
        }
    }

    /// Start from account holdings instead of assuming FLAT.
    pub fn from_holdings(pair: impl Into<String>, holdings: Holdings, timeout: Duration) -> Self {
        let pair = pair.into();
        let position = match holdings.state {
            PositionState::Long => Position::long(pair, 0.0, None, holdings.quantity),
            PositionState::Flat => Position::flat(pair),
        };
        Self::new(position, timeout)
    }

    pub fn position(&self) -> &Position {
        &self.position
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn pending(&self) -> Option<&PendingOrder> {
        self.pending.as_ref()
    }

    /// An order is outstanding (submitted, awaiting fill, or timed out and
    /// not yet reconciled). No new intent may be emitted meanwhile.
    pub fn is_blocked(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_awaiting_fill(&self) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.phase == PendingPhase::AwaitingFill)
    }

    /// Which order, if any, a signal calls for. FLAT + BUY and LONG + SELL
    /// produce an intent; everything else is ignored.
    pub fn intent_for(&self, action: Action) -> Option<OrderSide> {
        if let Some(pending) = &self.pending {
            debug!(
                order_id = %pending.record.order_id,
                phase = ?pending.phase,
                action = %action,
                "Order outstanding; signal ignored"
            );
            return None;
        }
        match (self.position.state, action) {
            (PositionState::Flat, Action::Buy) => Some(OrderSide::Buy),
            (PositionState::Long, Action::Sell) => Some(OrderSide::Sell),
            _ => None,
        }
    }

    /// Register an intent right before it is handed to the exchange.
    pub fn begin(&mut self, record: OrderRecord) {
        debug_assert!(self.pending.is_none(), "second intent while one is outstanding");
        self.pending = Some(PendingOrder::submitted(record));
    }

    /// Track an order that was still PENDING when the process last stopped,
    /// so it is polled instead of being submitted again.
    pub fn resume(&mut self, record: OrderRecord) {
        debug_assert!(self.pending.is_none(), "resumed while an order is outstanding");
        let pending = PendingOrder::resumed(record, self.timeout);
        info!(
            order_id = %pending.record.order_id,
            side = %pending.record.side,
            deadline = ?pending.deadline,
            "Resuming stored pending order"
        );
        self.pending = Some(pending);
    }

    /// Shrink a LONG position to what the account can actually sell.
    pub fn cap_quantity(&mut self, available: f64) {
        if self.position.is_long() && available > 0.0 && available < self.position.quantity {
            debug!(
                held = self.position.quantity,
                available,
                "Position capped to account balance"
            );
            self.position.quantity = available;
        }
    }

    /// Apply the exchange's answer to a submission.
    pub fn on_submitted(&mut self, record: OrderRecord, now: DateTime<Utc>) -> Transition {
        if !self.tracks(&record) {
            return Transition::Ignored;
        }
        if record.outcome == OrderOutcome::Pending {
            if let Some(pending) = self.pending.as_mut() {
                pending.await_fill(record, now, self.timeout);
                info!(
                    order_id = %pending.record.order_id,
                    deadline = ?pending.deadline,
                    "Order pending; awaiting fill"
                );
            }
            return Transition::Awaiting;
        }
        self.settle(record)
    }

    /// Apply the result of polling the outstanding order. A still-PENDING
    /// answer after the deadline times the order out.
    pub fn on_polled(&mut self, record: OrderRecord, now: DateTime<Utc>) -> Transition {
        if !self.tracks(&record) {
            return Transition::Ignored;
        }
        if record.outcome.is_final() {
            return self.settle(record);
        }
        self.check_deadline(now)
    }

    /// Deadline check for when the final poll itself failed.
    pub fn check_deadline(&mut self, now: DateTime<Utc>) -> Transition {
        match self.pending.as_mut() {
            Some(pending) if pending.is_expired(now) => {
                pending.time_out();
                warn!(order_id = %pending.record.order_id, "Pending order timed out");
                Transition::TimedOut(pending.record.clone())
            }
            _ => Transition::Awaiting,
        }
    }

    /// Replace the position with what the account actually holds and drop
    /// any outstanding order tracking.
    pub fn reconcile(&mut self, holdings: Holdings) -> &Position {
        if let Some(pending) = self.pending.take() {
            info!(
                order_id = %pending.record.order_id,
                phase = ?pending.phase,
                "Dropping outstanding order during reconcile"
            );
        }
        self.position = match (holdings.state, self.position.state) {
            (PositionState::Long, PositionState::Long) => Position {
                quantity: holdings.quantity,
                ..self.position.clone()
            },
            (PositionState::Long, PositionState::Flat) => {
                Position::long(self.position.pair.clone(), 0.0, None, holdings.quantity)
            }
            (PositionState::Flat, _) => Position::flat(self.position.pair.clone()),
        };
        &self.position
    }

    fn tracks(&self, record: &OrderRecord) -> bool {
        match &self.pending {
            Some(p) if p.record.order_id == record.order_id => true,
            _ => {
                warn!(order_id = %record.order_id, "Answer for an untracked order ignored");
                false
            }
        }
    }

    fn settle(&mut self, record: OrderRecord) -> Transition {
        let Some(mut pending) = self.pending.take() else {
            return Transition::Ignored;
        };
        pending.resolve(record);
        let record = pending.record;

        if record.outcome != OrderOutcome::Filled {
            info!(
                order_id = %record.order_id,
                outcome = %record.outcome,
                state = %self.position.state,
                "Order not filled; position unchanged"
            );
            return Transition::NotFilled(record);
        }

        let fill_price = record.fill_price.or(record.price_hint).unwrap_or(0.0);
        self.position = match record.side {
            OrderSide::Buy => Position::long(
                record.pair.clone(),
                fill_price,
                record.fill_time,
                record.executed_quantity(),
            ),
            OrderSide::Sell => Position::flat(record.pair.clone()),
        };
        info!(
            order_id = %record.order_id,
            side = %record.side,
            fill_price,
            quantity = record.executed_quantity(),
            state = %self.position.state,
            "Fill applied"
        );
        Transition::Filled(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::Order;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn machine(state: PositionState) -> PositionMachine {
        let holdings = Holdings::from_quantity(if state == PositionState::Long { 1.0 } else { 0.0 }, 0.0);
        PositionMachine::from_holdings("ETHUSDT", holdings, Duration::seconds(60))
    }

    fn record(side: OrderSide, outcome: OrderOutcome) -> OrderRecord {
        let order = Order::market("ETHUSDT", side, 1.0, t(0));
        OrderRecord::for_order(&order, outcome)
    }

    #[test]
    fn only_flat_buy_and_long_sell_produce_intents() {
        let flat = machine(PositionState::Flat);
        assert_eq!(flat.intent_for(Action::Buy), Some(OrderSide::Buy));
        assert_eq!(flat.intent_for(Action::Sell), None);
        assert_eq!(flat.intent_for(Action::Hold), None);

        let long = machine(PositionState::Long);
        assert_eq!(long.intent_for(Action::Sell), Some(OrderSide::Sell));
        assert_eq!(long.intent_for(Action::Buy), None);
        assert_eq!(long.intent_for(Action::Hold), None);
    }

    #[test]
    fn filled_buy_goes_long() {
        let mut m = machine(PositionState::Flat);
        let r = record(OrderSide::Buy, OrderOutcome::Pending);
        m.begin(r.clone());
        let filled = r.filled(2000.0, t(1));
        assert!(matches!(m.on_submitted(filled, t(1)), Transition::Filled(_)));
        assert!(m.position().is_long());
        assert_eq!(m.position().entry_price, 2000.0);
        assert!(!m.is_blocked());
    }

    #[test]
    fn partial_buy_goes_long_with_the_executed_quantity() {
        let mut m = machine(PositionState::Flat);
        let r = record(OrderSide::Buy, OrderOutcome::Pending);
        m.begin(r.clone());
        m.on_submitted(r.partially_filled(0.3, 2000.0, t(1)), t(1));
        assert_eq!(m.position().quantity, 0.3);

        m.cap_quantity(0.2997);
        assert_eq!(m.position().quantity, 0.2997);
        m.cap_quantity(0.0);
        m.cap_quantity(5.0);
        assert_eq!(m.position().quantity, 0.2997);
    }

    #[test]
    fn resumed_order_times_out_from_its_intent_time() {
        let mut m = machine(PositionState::Flat);
        m.resume(record(OrderSide::Buy, OrderOutcome::Pending));
        assert!(m.is_awaiting_fill());
        assert_eq!(m.pending().and_then(PendingOrder::deadline), Some(t(60)));
        assert_eq!(m.intent_for(Action::Buy), None);

        assert_eq!(m.check_deadline(t(59)), Transition::Awaiting);
        assert!(matches!(m.check_deadline(t(60)), Transition::TimedOut(_)));
    }

    #[test]
    fn resumed_order_settles_when_polled_final() {
        let mut m = machine(PositionState::Flat);
        let r = record(OrderSide::Buy, OrderOutcome::Pending);
        m.resume(r.clone());
        assert!(matches!(m.on_polled(r.filled(1800.0, t(5)), t(5)), Transition::Filled(_)));
        assert!(m.position().is_long());
        assert_eq!(m.position().entry_price, 1800.0);
    }

    #[test]
    fn rejected_buy_stays_flat() {
        let mut m = machine(PositionState::Flat);
        let r = record(OrderSide::Buy, OrderOutcome::Rejected);
        m.begin(r.clone());
        assert!(matches!(m.on_submitted(r, t(1)), Transition::NotFilled(_)));
        assert_eq!(m.position().state, PositionState::Flat);
        assert_eq!(m.intent_for(Action::Buy), Some(OrderSide::Buy));
    }

    #[test]
    fn error_on_sell_stays_long() {
        let mut m = machine(PositionState::Long);
        let r = record(OrderSide::Sell, OrderOutcome::Error);
        m.begin(r.clone());
        m.on_submitted(r, t(1));
        assert!(m.position().is_long());
    }

    #[test]
    fn pending_blocks_until_resolved() {
        let mut m = machine(PositionState::Flat);
        let r = record(OrderSide::Buy, OrderOutcome::Pending);
        m.begin(r.clone());
        assert_eq!(m.on_submitted(r.clone(), t(0)), Transition::Awaiting);
        assert!(m.is_awaiting_fill());
        assert_eq!(m.intent_for(Action::Buy), None);

        assert_eq!(m.on_polled(r.clone(), t(30)), Transition::Awaiting);
        assert!(matches!(m.on_polled(r.filled(10.0, t(40)), t(40)), Transition::Filled(_)));
        assert!(m.position().is_long());
        assert!(!m.is_blocked());
    }

    #[test]
    fn pending_past_deadline_times_out_and_stays_blocked() {
        let mut m = machine(PositionState::Flat);
        let r = record(OrderSide::Buy, OrderOutcome::Pending);
        m.begin(r.clone());
        m.on_submitted(r.clone(), t(0));

        assert!(matches!(m.on_polled(r, t(60)), Transition::TimedOut(_)));
        assert_eq!(m.pending().map(PendingOrder::phase), Some(PendingPhase::TimedOut));
        assert_eq!(m.intent_for(Action::Buy), None);
        assert_eq!(m.position().state, PositionState::Flat);

        let position = m.reconcile(Holdings::from_quantity(1.0, 0.0)).clone();
        assert!(position.is_long());
        assert!(!m.is_blocked());
    }

    #[test]
    fn answers_for_other_orders_are_ignored() {
        let mut m = machine(PositionState::Flat);
        m.begin(record(OrderSide::Buy, OrderOutcome::Pending));
        let stray = record(OrderSide::Buy, OrderOutcome::Filled);
        assert_eq!(m.on_polled(stray, t(1)), Transition::Ignored);
        assert_eq!(m.position().state, PositionState::Flat);
    }

    #[test]
    fn reconcile_keeps_entry_when_still_long() {
        let mut m = PositionMachine::new(
            Position::long("ETHUSDT", 1500.0, Some(t(0)), 1.0),
            Duration::seconds(60),
        );
        m.reconcile(Holdings::from_quantity(0.8, 0.0));
        assert_eq!(m.position().entry_price, 1500.0);
        assert_eq!(m.position().quantity, 0.8);

        m.reconcile(Holdings::from_quantity(0.0, 0.0));
        assert_eq!(m.position().state, PositionState::Flat);
    }
}
