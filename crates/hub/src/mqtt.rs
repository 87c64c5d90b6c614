use serde::Deserialize;
use time::OffsetDateTime;

// ---------------------------------------------------------------------------
// MQTT message types
// ---------------------------------------------------------------------------

/// Payload on `tele/<zone_id>/temp`.
#[derive(Debug, Deserialize)]
pub(crate) struct ReadingMsg {
    pub(crate) ts: i64,
    pub(crate) temp: f64,
    #[serde(default = "default_online")]
    pub(crate) online: bool,
}

fn default_online() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

pub(crate) const TELEMETRY_TOPIC: &str = "tele/+/temp";

/// Extract zone_id from "tele/<zone_id>/temp".
pub(crate) fn extract_zone_id(topic: &str) -> Option<&str> {
    let parts: Vec<&str> = topic.split('/').collect();
    if parts.len() == 3 && parts[0] == "tele" && parts[2] == "temp" && !parts[1].is_empty() {
        Some(parts[1])
    } else {
        None
    }
}

/// Reading time from a unix timestamp. Probes without a clock send 0; those
/// and out-of-range values fall back to `now`.
pub(crate) fn reading_time(ts: i64, now: OffsetDateTime) -> OffsetDateTime {
    if ts <= 0 {
        return now;
    }
    OffsetDateTime::from_unix_timestamp(ts).unwrap_or(now)
}

// ===========================================================================
// Tests
// ===========================================================================
