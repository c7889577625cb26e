use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidSelection;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Timestamp – the ordered numeric time axis
// ---------------------------------------------------------------------------

/// Nanoseconds since the Unix epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const fn from_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Option<Self> {
        dt.timestamp_nanos_opt().map(Timestamp)
    }

    pub fn to_datetime(self) -> DateTime<Utc> {
        DateTime::from_timestamp(
            self.0.div_euclid(NANOS_PER_SECOND),
            self.0.rem_euclid(NANOS_PER_SECOND) as u32,
        )
        .unwrap_or_default()
    }

    /// Signed distance to `earlier` in nanoseconds. Never overflows: the
    /// span between two `i64` instants can exceed `i64::MAX`.
    pub fn nanos_since(self, earlier: Timestamp) -> i128 {
        self.0 as i128 - earlier.0 as i128
    }

    /// Signed distance to `earlier`, in seconds.
    pub fn seconds_since(self, earlier: Timestamp) -> f64 {
        self.nanos_since(earlier) as f64 / NANOS_PER_SECOND as f64
    }

    /// Halfway between `self` and `later`.
    pub fn midpoint(self, later: Timestamp) -> Timestamp {
        Timestamp(((self.0 as i128 + later.0 as i128).div_euclid(2)) as i64)
    }

    pub fn offset_nanos(self, nanos: i64) -> Self {
        Timestamp(self.0.saturating_add(nanos))
    }

    pub fn date(self) -> NaiveDate {
        self.to_datetime().date_naive()
    }

    /// ISO-8601 string with 100 ns resolution, e.g. `2019-10-03T07:25:50.4404020`.
    pub fn iso(self) -> String {
        let dt = self.to_datetime();
        format!(
            "{}.{:07}",
            dt.format("%Y-%m-%dT%H:%M:%S"),
            dt.nanosecond() / 100
        )
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.iso())
    }
}

/// Convert a duration in seconds to whole nanoseconds.
pub fn seconds_to_nanos(seconds: f64) -> i64 {
    (seconds * NANOS_PER_SECOND as f64).round() as i64
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// Parse a user-supplied time.
///
/// Accepted forms:
/// * ISO date-time: `2019-10-03T07:25:50.4404020` (a space may replace `T`)
/// * time of day: `07:25:50.44`, resolved on `reference` (usually the lane's
///   start date)
/// * Unix seconds: `1570087550.4404020`
pub fn parse_time(input: &str, reference: Option<NaiveDate>) -> Result<Timestamp, InvalidSelection> {
    let s = input.trim().trim_end_matches('Z');

    for fmt in DATETIME_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(s, fmt) {
            return from_naive(ndt, input);
        }
    }

    if let Ok(tod) = NaiveTime::parse_from_str(s, "%H:%M:%S%.f") {
        let date = reference.ok_or_else(|| {
            InvalidSelection::Time(format!("'{input}' has no date and no reference date is known"))
        })?;
        return from_naive(date.and_time(tod), input);
    }

    parse_unix_seconds(s)
        .ok_or_else(|| InvalidSelection::Time(format!("cannot parse '{input}' as a time")))
}

fn from_naive(ndt: NaiveDateTime, input: &str) -> Result<Timestamp, InvalidSelection> {
    Timestamp::from_datetime(ndt.and_utc())
        .ok_or_else(|| InvalidSelection::Time(format!("'{input}' is outside the representable range")))
}

/// Exact decimal parse, so that sub-microsecond digits survive.
fn parse_unix_seconds(s: &str) -> Option<Timestamp> {
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let secs: i64 = if int_part.is_empty() { 0 } else { int_part.parse().ok()? };
    let mut frac = frac_part.chars().take(9).collect::<String>();
    while frac.len() < 9 {
        frac.push('0');
    }
    let nanos: i64 = frac.parse().ok()?;
    let total = secs.checked_mul(NANOS_PER_SECOND)?.checked_add(nanos)?;
    Some(Timestamp(if negative { -total } else { total }))
}
