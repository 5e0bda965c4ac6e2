use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use common::{Action, Error, OrderOutcome, OrderRecord, OrderSide, PatternMatch, Result, Signal};

use crate::query::{close_select, decode_time, encode_time, open_select, PatternQuery, TimeRange};

/// Follow-up columns and the age window (seconds since recognition) in which
/// each is filled, exclusive of the lower bound. Windows meet half-way
/// between neighbouring marks.
const FOLLOW_UP_WINDOWS: [(&str, i64, i64); 6] = [
    ("m5", 0, 450),
    ("m10", 450, 750),
    ("m15", 750, 1_350),
    ("m30", 1_350, 2_700),
    ("m60", 2_700, 5_400),
    ("m120", 5_400, 10_800),
];

/// Prices observed after a pattern was recognized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FollowUps {
    pub m5: Option<f64>,
    pub m10: Option<f64>,
    pub m15: Option<f64>,
    pub m30: Option<f64>,
    pub m60: Option<f64>,
    pub m120: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredPattern {
    pub seq: i64,
    pub pair: String,
    #[serde(flatten)]
    pub pattern: PatternMatch,
    /// Close price of the candle the pattern was recognized on.
    pub price: f64,
    pub recorded_at: DateTime<Utc>,
    pub follow_ups: FollowUps,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSignal {
    pub seq: i64,
    pub pair: String,
    #[serde(flatten)]
    pub signal: Signal,
    pub recorded_at: DateTime<Utc>,
}

/// SQLite-backed audit log of pattern matches, signals and order records.
///
/// Writes are appends; the only updates are `resolve_order` (PENDING to a
/// final outcome, once) and filling NULL follow-up price columns.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    pool: SqlitePool,
}

impl HistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `url` and apply migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // Every connection to `:memory:` is a separate database.
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        info!(url = %url, "History store ready");
        Ok(store)
    }

    /// Fresh migrated in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness check for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    // ─── Write path ───────────────────────────────────────────────────────────

    /// Append one pattern match. Returns its sequence number.
    pub async fn append_pattern(
        &self,
        pair: &str,
        pattern: &PatternMatch,
        price: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<i64> {
        let seq = sqlx::query(
            r#"
            INSERT INTO patterns (pair, candle_time, pattern_name, strength, price, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(pair)
        .bind(encode_time(pattern.candle_time))
        .bind(&pattern.pattern_name)
        .bind(pattern.strength)
        .bind(price)
        .bind(encode_time(recorded_at))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(seq)
    }

    /// Append the non-neutral matches of one cycle in a single transaction.
    /// Returns how many rows were written.
    pub async fn append_patterns(
        &self,
        pair: &str,
        patterns: &[PatternMatch],
        price: f64,
        recorded_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0;
        for pattern in patterns.iter().filter(|p| !p.is_neutral()) {
            sqlx::query(
                r#"
                INSERT INTO patterns (pair, candle_time, pattern_name, strength, price, recorded_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(pair)
            .bind(encode_time(pattern.candle_time))
            .bind(&pattern.pattern_name)
            .bind(pattern.strength)
            .bind(price)
            .bind(encode_time(recorded_at))
            .execute(&mut *tx)
            .await?;
            written += 1;
        }
        tx.commit().await?;
        if written > 0 {
            debug!(pair = %pair, written, "Patterns recorded");
        }
        Ok(written)
    }

    pub async fn append_signal(
        &self,
        pair: &str,
        signal: &Signal,
        recorded_at: DateTime<Utc>,
    ) -> Result<i64> {
        let contributing = serde_json::to_string(&signal.contributing_patterns)?;
        let seq = sqlx::query(
            r#"
            INSERT INTO signals (pair, candle_time, action, contributing_patterns, rationale, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(pair)
        .bind(encode_time(signal.candle_time))
        .bind(signal.action)
        .bind(contributing)
        .bind(&signal.rationale)
        .bind(encode_time(recorded_at))
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        debug!(pair = %pair, action = %signal.action, seq, "Signal recorded");
        Ok(seq)
    }

    pub async fn record_order(&self, record: &OrderRecord) -> Result<i64> {
        let seq = sqlx::query(
            r#"
            INSERT INTO orders (order_id, pair, intent_time, side, requested_quantity,
                                price_hint, outcome, fill_price, fill_time, filled_quantity)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&record.order_id)
        .bind(&record.pair)
        .bind(encode_time(record.intent_time))
        .bind(record.side)
        .bind(record.requested_quantity)
        .bind(record.price_hint)
        .bind(record.outcome)
        .bind(record.fill_price)
        .bind(record.fill_time.map(encode_time))
        .bind(record.filled_quantity)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        debug!(order_id = %record.order_id, outcome = %record.outcome, "Order recorded");
        Ok(seq)
    }

    /// Move a PENDING order to the final outcome carried by `resolved`,
    /// together with its fill details. Fails with `Error::NotPending` if the
    /// order is unknown or already resolved.
    pub async fn resolve_order(&self, resolved: &OrderRecord) -> Result<()> {
        let order_id = resolved.order_id.as_str();
        let outcome = resolved.outcome;
        if !outcome.is_final() {
            return Err(Error::Other(format!(
                "order {order_id} cannot be resolved to {outcome}"
            )));
        }

        let affected = sqlx::query(
            r#"
            UPDATE orders
            SET outcome = ?1, fill_price = ?2, fill_time = ?3, filled_quantity = ?4
            WHERE order_id = ?5 AND outcome = 'PENDING'
            "#,
        )
        .bind(outcome)
        .bind(resolved.fill_price)
        .bind(resolved.fill_time.map(encode_time))
        .bind(resolved.filled_quantity)
        .bind(order_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(Error::NotPending {
                order_id: order_id.to_string(),
            });
        }
        info!(order_id = %order_id, outcome = %outcome, "Pending order resolved");
        Ok(())
    }

    /// Fill follow-up price columns of earlier patterns whose age falls in
    /// each column's window `(min, max]`. A pattern recorded at `now` is too
    /// young for any column. Columns already set are never overwritten.
    /// Returns the number of cells filled.
    pub async fn update_pattern_followups(
        &self,
        pair: &str,
        price: f64,
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut filled = 0;
        for (column, min_age, max_age) in FOLLOW_UP_WINDOWS {
            let oldest = encode_time(now - Duration::seconds(max_age));
            let newest = encode_time(now - Duration::seconds(min_age));
            filled += sqlx::query(&format!(
                "UPDATE patterns SET {column} = ?1 \
                 WHERE {column} IS NULL AND pair = ?2 AND recorded_at >= ?3 AND recorded_at < ?4"
            ))
            .bind(price)
            .bind(pair)
            .bind(oldest)
            .bind(newest)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
        tx.commit().await?;
        if filled > 0 {
            debug!(pair = %pair, price, filled, "Pattern follow-ups updated");
        }
        Ok(filled)
    }

    // ─── Read path ────────────────────────────────────────────────────────────

    /// Patterns in replay order, filtered by name and candle time.
    pub async fn patterns(&self, query: &PatternQuery) -> Result<Vec<StoredPattern>> {
        let mut qb = open_select(
            "seq, pair, candle_time, pattern_name, strength, price, recorded_at, \
             m5, m10, m15, m30, m60, m120 FROM patterns",
        );
        if let Some(name) = &query.pattern {
            qb.push(" AND pattern_name = ").push_bind(name.clone());
        }
        query.range.push_filter(&mut qb, "candle_time");
        close_select(&mut qb, query.limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(pattern_from_row).collect()
    }

    /// Signals in replay order, filtered by candle time.
    pub async fn signals(&self, range: &TimeRange, limit: Option<u32>) -> Result<Vec<StoredSignal>> {
        let mut qb = open_select(
            "seq, pair, candle_time, action, contributing_patterns, rationale, recorded_at FROM signals",
        );
        range.push_filter(&mut qb, "candle_time");
        close_select(&mut qb, limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(signal_from_row).collect()
    }

    /// Order records in replay order, filtered by intent time.
    pub async fn orders(&self, range: &TimeRange, limit: Option<u32>) -> Result<Vec<OrderRecord>> {
        let mut qb = open_select(
            "seq, order_id, pair, intent_time, side, requested_quantity, price_hint, \
             outcome, fill_price, fill_time, filled_quantity FROM orders",
        );
        range.push_filter(&mut qb, "intent_time");
        close_select(&mut qb, limit);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(order_from_row).collect()
    }

    pub async fn order(&self, order_id: &str) -> Result<Option<OrderRecord>> {
        let row = sqlx::query(
            r#"
            SELECT seq, order_id, pair, intent_time, side, requested_quantity, price_hint,
                   outcome, fill_price, fill_time, filled_quantity
            FROM orders WHERE order_id = ?1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    /// Orders still waiting for resolution, oldest first.
    pub async fn pending_orders(&self) -> Result<Vec<OrderRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT seq, order_id, pair, intent_time, side, requested_quantity, price_hint,
                   outcome, fill_price, fill_time, filled_quantity
            FROM orders WHERE outcome = 'PENDING' ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(order_from_row).collect()
    }
}

// ─── Row decoding ─────────────────────────────────────────────────────────────

fn pattern_from_row(row: &SqliteRow) -> Result<StoredPattern> {
    let candle_time: String = row.try_get("candle_time")?;
    let recorded_at: String = row.try_get("recorded_at")?;
    Ok(StoredPattern {
        seq: row.try_get("seq")?,
        pair: row.try_get("pair")?,
        pattern: PatternMatch {
            candle_time: decode_time(&candle_time)?,
            pattern_name: row.try_get("pattern_name")?,
            strength: row.try_get("strength")?,
        },
        price: row.try_get("price")?,
        recorded_at: decode_time(&recorded_at)?,
        follow_ups: FollowUps {
            m5: row.try_get("m5")?,
            m10: row.try_get("m10")?,
            m15: row.try_get("m15")?,
            m30: row.try_get("m30")?,
            m60: row.try_get("m60")?,
            m120: row.try_get("m120")?,
        },
    })
}

fn signal_from_row(row: &SqliteRow) -> Result<StoredSignal> {
    let candle_time: String = row.try_get("candle_time")?;
    let recorded_at: String = row.try_get("recorded_at")?;
    let contributing: String = row.try_get("contributing_patterns")?;
    let action: Action = row.try_get("action")?;
    Ok(StoredSignal {
        seq: row.try_get("seq")?,
        pair: row.try_get("pair")?,
        signal: Signal {
            candle_time: decode_time(&candle_time)?,
            action,
            contributing_patterns: serde_json::from_str(&contributing)?,
            rationale: row.try_get("rationale")?,
        },
        recorded_at: decode_time(&recorded_at)?,
    })
}

fn order_from_row(row: &SqliteRow) -> Result<OrderRecord> {
    let intent_time: String = row.try_get("intent_time")?;
    let fill_time: Option<String> = row.try_get("fill_time")?;
    let side: OrderSide = row.try_get("side")?;
    let outcome: OrderOutcome = row.try_get("outcome")?;
    Ok(OrderRecord {
        order_id: row.try_get("order_id")?,
        pair: row.try_get("pair")?,
        intent_time: decode_time(&intent_time)?,
        side,
        requested_quantity: row.try_get("requested_quantity")?,
        price_hint: row.try_get("price_hint")?,
        outcome,
        fill_price: row.try_get("fill_price")?,
        fill_time: fill_time.as_deref().map(decode_time).transpose()?,
        filled_quantity: row.try_get("filled_quantity")?,
    })
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::Order;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn pending_buy(minute: i64) -> OrderRecord {
        let order = Order::market("ETHUSDT", OrderSide::Buy, 0.5, t(minute));
        OrderRecord::for_order(&order, OrderOutcome::Pending)
    }

    #[tokio::test]
    async fn neutral_matches_are_not_persisted() {
        let store = HistoryStore::in_memory().await.unwrap();
        let matches = vec![
            PatternMatch::new(t(0), "engulfing", 1.0),
            PatternMatch::new(t(0), "hammer", 0.0),
            PatternMatch::new(t(0), "trend", -0.5),
        ];
        let written = store.append_patterns("ETHUSDT", &matches, 2000.0, t(0)).await.unwrap();
        assert_eq!(written, 2);

        let rows = store.patterns(&PatternQuery::all()).await.unwrap();
        let names: Vec<&str> = rows.iter().map(|r| r.pattern.pattern_name.as_str()).collect();
        assert_eq!(names, ["engulfing", "trend"]);
        assert!(rows[0].seq < rows[1].seq);
    }

    #[tokio::test]
    async fn pattern_filters_by_name_range_and_limit() {
        let store = HistoryStore::in_memory().await.unwrap();
        for minute in 0..5 {
            store
                .append_pattern("ETHUSDT", &PatternMatch::new(t(minute), "engulfing", 1.0), 10.0, t(minute))
                .await
                .unwrap();
            store
                .append_pattern("ETHUSDT", &PatternMatch::new(t(minute), "hammer", 1.0), 10.0, t(minute))
                .await
                .unwrap();
        }

        let engulfing = store.patterns(&PatternQuery::named("engulfing")).await.unwrap();
        assert_eq!(engulfing.len(), 5);

        let ranged = store
            .patterns(&PatternQuery::named("hammer").within(TimeRange::between(t(1), t(3))))
            .await
            .unwrap();
        let times: Vec<_> = ranged.iter().map(|r| r.pattern.candle_time).collect();
        assert_eq!(times, [t(1), t(2), t(3)]);

        let latest = store.patterns(&PatternQuery::named("hammer").limit(2)).await.unwrap();
        let times: Vec<_> = latest.iter().map(|r| r.pattern.candle_time).collect();
        assert_eq!(times, [t(3), t(4)]);
    }

    #[tokio::test]
    async fn signal_round_trips_with_contributing_patterns() {
        let store = HistoryStore::in_memory().await.unwrap();
        let signal = Signal {
            candle_time: t(7),
            action: Action::Buy,
            contributing_patterns: vec![PatternMatch::new(t(7), "trend", 1.0)],
            rationale: "score +1.000".into(),
        };
        store.append_signal("ETHUSDT", &signal, t(8)).await.unwrap();

        let rows = store.signals(&TimeRange::between(t(7), t(7)), None).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].signal, signal);
        assert_eq!(rows[0].recorded_at, t(8));
        assert!(store.signals(&TimeRange::between(t(8), t(9)), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_order_resolves_exactly_once() {
        let store = HistoryStore::in_memory().await.unwrap();
        let record = pending_buy(0);
        store.record_order(&record).await.unwrap();
        assert_eq!(store.pending_orders().await.unwrap().len(), 1);

        let filled = record.clone().partially_filled(0.4, 2001.5, t(1));
        store.resolve_order(&filled).await.unwrap();
        let stored = store.order(&record.order_id).await.unwrap().unwrap();
        assert_eq!(stored.outcome, OrderOutcome::Filled);
        assert_eq!(stored.fill_price, Some(2001.5));
        assert_eq!(stored.fill_time, Some(t(1)));
        assert_eq!(stored.filled_quantity, Some(0.4));
        assert_eq!(stored, filled);

        let rejected = OrderRecord {
            outcome: OrderOutcome::Rejected,
            ..record.clone()
        };
        let again = store.resolve_order(&rejected).await;
        assert!(matches!(again, Err(Error::NotPending { .. })));
        assert!(store.pending_orders().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn final_orders_cannot_be_resolved() {
        let store = HistoryStore::in_memory().await.unwrap();
        let order = Order::market("ETHUSDT", OrderSide::Sell, 1.0, t(0));
        let rejected = OrderRecord::for_order(&order, OrderOutcome::Rejected);
        store.record_order(&rejected).await.unwrap();

        let err = store
            .resolve_order(&rejected.clone().filled(1.0, t(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotPending { .. }));

        let missing = OrderRecord {
            order_id: "missing".into(),
            ..rejected.filled(1.0, t(1))
        };
        assert!(store.resolve_order(&missing).await.is_err());
    }

    #[tokio::test]
    async fn orders_filter_by_intent_time() {
        let store = HistoryStore::in_memory().await.unwrap();
        for minute in [0, 10, 20] {
            store.record_order(&pending_buy(minute)).await.unwrap();
        }
        let rows = store
            .orders(&TimeRange { from: Some(t(5)), to: None }, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].intent_time, t(10));
    }

    #[tokio::test]
    async fn follow_ups_fill_once_in_their_window() {
        let store = HistoryStore::in_memory().await.unwrap();
        store
            .append_pattern("ETHUSDT", &PatternMatch::new(t(0), "hammer", 1.0), 100.0, t(0))
            .await
            .unwrap();
        store
            .append_pattern("BTCUSDT", &PatternMatch::new(t(0), "hammer", 1.0), 100.0, t(0))
            .await
            .unwrap();

        // 5 minutes later only m5 is due.
        assert_eq!(store.update_pattern_followups("ETHUSDT", 101.0, t(5)).await.unwrap(), 1);
        // Still inside the m5 window: nothing left to fill.
        assert_eq!(store.update_pattern_followups("ETHUSDT", 102.0, t(6)).await.unwrap(), 0);
        // 10 minutes: m10.
        assert_eq!(store.update_pattern_followups("ETHUSDT", 103.0, t(10)).await.unwrap(), 1);

        let rows = store.patterns(&PatternQuery::all()).await.unwrap();
        let eth = rows.iter().find(|r| r.pair == "ETHUSDT").unwrap();
        assert_eq!(eth.follow_ups.m5, Some(101.0));
        assert_eq!(eth.follow_ups.m10, Some(103.0));
        assert_eq!(eth.follow_ups.m15, None);

        let btc = rows.iter().find(|r| r.pair == "BTCUSDT").unwrap();
        assert_eq!(btc.follow_ups, FollowUps::default());
    }

    #[tokio::test]
    async fn pattern_is_not_its_own_follow_up() {
        let store = HistoryStore::in_memory().await.unwrap();
        store
            .append_pattern("ETHUSDT", &PatternMatch::new(t(0), "hammer", 1.0), 100.0, t(0))
            .await
            .unwrap();

        // Same cycle: the recognition close must not land in m5.
        assert_eq!(store.update_pattern_followups("ETHUSDT", 100.0, t(0)).await.unwrap(), 0);
        assert_eq!(store.update_pattern_followups("ETHUSDT", 104.0, t(4)).await.unwrap(), 1);

        let rows = store.patterns(&PatternQuery::all()).await.unwrap();
        assert_eq!(rows[0].follow_ups.m5, Some(104.0));
    }
}
