use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite};

/// Inclusive time bounds; a missing bound is open-ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    /// Append `AND column >= ? AND column <= ?` for the bounds that are set.
    pub(crate) fn push_filter(&self, qb: &mut QueryBuilder<'_, Sqlite>, column: &str) {
        if let Some(from) = self.from {
            qb.push(format!(" AND {column} >= ")).push_bind(encode_time(from));
        }
        if let Some(to) = self.to {
            qb.push(format!(" AND {column} <= ")).push_bind(encode_time(to));
        }
    }
}

/// Filter for the pattern read path.
#[derive(Debug, Clone, Default)]
pub struct PatternQuery {
    /// Exact pattern name, e.g. "engulfing".
    pub pattern: Option<String>,
    /// Bounds on the candle time the pattern was recognized on.
    pub range: TimeRange,
    /// Keep only the most recent `limit` rows.
    pub limit: Option<u32>,
}

impl PatternQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn named(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::default()
        }
    }

    pub fn within(mut self, range: TimeRange) -> Self {
        self.range = range;
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Fixed-width RFC 3339 so that text comparison in SQLite is time order.
pub(crate) fn encode_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn decode_time(s: &str) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(format!("bad timestamp '{s}': {e}").into()))
}

/// Start `SELECT * FROM (SELECT <inner> WHERE 1 = 1`; filters are pushed as
/// `AND ...` clauses and [`close_select`] finishes the statement.
pub(crate) fn open_select(inner: &str) -> QueryBuilder<'static, Sqlite> {
    QueryBuilder::new(format!("SELECT * FROM (SELECT {inner} WHERE 1 = 1"))
}

/// Keep the newest `limit` rows while returning them in ascending sequence
/// (replay) order.
pub(crate) fn close_select(qb: &mut QueryBuilder<'_, Sqlite>, limit: Option<u32>) {
    qb.push(" ORDER BY seq DESC");
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(i64::from(limit));
    }
    qb.push(") ORDER BY seq ASC");
}
