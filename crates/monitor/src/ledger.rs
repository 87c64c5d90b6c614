//! Alert ledger: append-only record of zone alerts with acknowledgement,
//! auto-resolution and CSV export.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::classify::Tone;
use crate::error::{MonitorError, Result};

const CSV_HEADER: &str = "ID,Zone,Type,Severity,Temperature,Threshold,Timestamp,Status";

// ---------------------------------------------------------------------------
// Alert types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    TemperatureHigh,
    TemperatureLow,
    SensorMalfunction,
    SensorOffline,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TemperatureHigh => "TemperatureHigh",
            Self::TemperatureLow => "TemperatureLow",
            Self::SensorMalfunction => "SensorMalfunction",
            Self::SensorOffline => "SensorOffline",
        }
    }

    /// Threshold breaches, as opposed to sensor health alerts.
    pub fn is_temperature(self) -> bool {
        matches!(self, Self::TemperatureHigh | Self::TemperatureLow)
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    pub fn tone(self) -> Tone {
        match self {
            Self::Info => Tone::Info,
            Self::Warning => Tone::Warning,
            Self::Critical => Tone::Destructive,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub zone_id: String,
    pub zone_name: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub temperature: f64,
    /// The breached bound. Connectivity and malfunction alerts have none.
    pub threshold: Option<f64>,
    pub message: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub acknowledged: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub acknowledged_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub acknowledged_by: Option<String>,
    pub auto_resolved: bool,
}

/// Selection for [`AlertLedger::list`]. Empty filter lists everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlertFilter {
    pub severity: Option<Severity>,
    pub acknowledged_only: bool,
    pub active_only: bool,
    pub zone_id: Option<String>,
}

impl AlertFilter {
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    fn matches(&self, a: &AlertEvent) -> bool {
        if self.severity.is_some_and(|s| s != a.severity) {
            return false;
        }
        if self.acknowledged_only && !a.acknowledged {
            return false;
        }
        if self.active_only && a.acknowledged {
            return false;
        }
        if let Some(zone) = &self.zone_id {
            if zone != &a.zone_id {
                return false;
            }
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct AlertLedger {
    // insertion order; list() reverses
    events: Vec<AlertEvent>,
    index: HashMap<String, usize>,
}

impl AlertLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an alert. Ids must be unique within the ledger.
    pub fn record(&mut self, event: AlertEvent) -> Result<String> {
        if self.index.contains_key(&event.id) {
            return Err(MonitorError::Validation(format!(
                "alert '{}' already recorded",
                event.id
            )));
        }
        let id = event.id.clone();
        self.index.insert(id.clone(), self.events.len());
        self.events.push(event);
        Ok(id)
    }

    /// Alerts matching `filter`, newest first.
    pub fn list(&self, filter: &AlertFilter) -> Vec<&AlertEvent> {
        self.events
            .iter()
            .rev()
            .filter(|a| filter.matches(a))
            .collect()
    }

    pub fn get(&self, alert_id: &str) -> Option<&AlertEvent> {
        self.index.get(alert_id).map(|&i| &self.events[i])
    }

    /// Mark an alert acknowledged, optionally naming who did it. Acknowledging
    /// twice changes nothing.
    pub fn acknowledge(
        &mut self,
        alert_id: &str,
        now: OffsetDateTime,
        by: Option<&str>,
    ) -> Result<()> {
        let idx = *self
            .index
            .get(alert_id)
            .ok_or_else(|| MonitorError::alert_not_found(alert_id))?;
        let alert = &mut self.events[idx];
        if !alert.acknowledged {
            alert.acknowledged = true;
            alert.acknowledged_at = Some(now);
            alert.acknowledged_by = by.map(str::to_string);
        }
        Ok(())
    }

    /// Flag the newest open temperature alert of a zone as auto-resolved and
    /// return its id. Sensor health alerts are never resolved by a reading.
    /// Acknowledgement is left to the user.
    pub fn auto_resolve_latest(&mut self, zone_id: &str) -> Option<String> {
        let alert = self
            .events
            .iter_mut()
            .rev()
            .find(|a| {
                a.zone_id == zone_id
                    && a.alert_type.is_temperature()
                    && !a.acknowledged
                    && !a.auto_resolved
            })?;
        alert.auto_resolved = true;
        Some(alert.id.clone())
    }

    pub fn active_count(&self) -> usize {
        self.events.iter().filter(|a| !a.acknowledged).count()
    }

    pub fn active_count_for(&self, zone_id: &str) -> usize {
        self.events
            .iter()
            .filter(|a| !a.acknowledged && a.zone_id == zone_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Render every alert as CSV, newest first.
    pub fn export_csv(&self) -> Vec<u8> {
        let mut out = String::with_capacity(64 * (self.events.len() + 1));
        out.push_str(CSV_HEADER);
        out.push('\n');

        for a in self.events.iter().rev() {
            let threshold = a.threshold.map(celsius).unwrap_or_default();
            let status = if a.acknowledged {
                "Acknowledged"
            } else {
                "Active"
            };
            let row = [
                csv_field(&a.id),
                csv_field(&a.zone_name),
                csv_field(a.alert_type.as_str()),
                csv_field(a.severity.as_str()),
                csv_field(&celsius(a.temperature)),
                csv_field(&threshold),
                csv_field(&rfc3339_secs(a.timestamp)),
                csv_field(status),
            ];
            out.push_str(&row.join(","));
            out.push('\n');
        }

        out.into_bytes()
    }
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

fn celsius(v: f64) -> String {
    format!("{v}°C")
}

/// Quote a CSV field when it contains a delimiter, quote or line break.
fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

/// RFC 3339 in UTC at whole-second precision, e.g. `2024-01-16T14:30:00Z`.
pub fn rfc3339_secs(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(UtcOffset::UTC);
    let utc = utc.replace_nanosecond(0).unwrap_or(utc);
    utc.format(&Rfc3339)
        .unwrap_or_else(|_| utc.unix_timestamp().to_string())
}

// ===========================================================================
// Tests
// ===========================================================================
