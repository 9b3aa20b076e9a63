//! Small time and formatting helpers.

use chrono::{DateTime, SecondsFormat, Utc};

/// Milliseconds since the Unix epoch.
pub fn current_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

/// ISO-8601 UTC rendering of an epoch-millisecond timestamp, as `/stats/instances` expects.
pub fn to_iso(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|ts| ts.naive_utc().format("%Y-%m-%dT%H:%M:%S%.f").to_string())
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Show only the first few characters of a secret.
pub fn mask_token(token: &str) -> String {
    const VISIBLE: usize = 4;
    let visible: String = token.chars().take(VISIBLE).collect();
    if token.chars().count() <= VISIBLE {
        "*".repeat(token.chars().count())
    } else {
        format!("{visible}***")
    }
}
