//! The monitor ties the zone registry to the alert ledger: every reading runs
//! through the classifier and status transitions become alerts.
//!
//! ## Alert rules per reading
//!
//! ```text
//! normal ──▶ warning/critical   TemperatureHigh|Low  (severity = new status)
//! warning ─▶ critical           TemperatureHigh|Low
//! breach ──▶ normal             newest open temperature alert auto-resolved
//! online ──▶ offline            SensorOffline (warning)
//! plausible ▶ implausible       SensorMalfunction (info)
//! ```
//!
//! At most one alert is recorded per reading. Temperature escalations and
//! sensor faults take precedence over an offline transition; the SensorOffline
//! alert is then held back and recorded on the zone's next reading.

use serde::Serialize;
use std::collections::HashSet;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::classify::{Bound, Breach, Policy, Status, StatusFilter, Trend};
use crate::error::{MonitorError, Result};
use crate::ledger::{AlertEvent, AlertFilter, AlertLedger, AlertType, Severity};
use crate::zone::{TemperatureZone, ZoneChange, ZoneRegistry, ZoneSpec};

/// Result of one `update_reading` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingOutcome {
    pub zone_id: String,
    pub previous_status: Status,
    pub status: Status,
    pub trend: Trend,
    pub went_offline: bool,
    pub rejected: bool,
    pub alert: Option<AlertEvent>,
    pub auto_resolved: Option<String>,
}

/// Dashboard overview counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_zones: usize,
    pub normal_zones: usize,
    pub warning_zones: usize,
    pub critical_zones: usize,
    pub online_zones: usize,
    pub active_alerts: usize,
    pub avg_temp: Option<f64>,
}

#[derive(Debug)]
pub struct Monitor {
    registry: ZoneRegistry,
    ledger: AlertLedger,
    next_alert_seq: u64,
    /// Zones whose offline transition lost out to another alert.
    pending_offline: HashSet<String>,
}

impl Monitor {
    pub fn new(policy: Policy) -> Self {
        Self {
            registry: ZoneRegistry::new(policy),
            ledger: AlertLedger::new(),
            next_alert_seq: 1,
            pending_offline: HashSet::new(),
        }
    }

    /// Continue alert numbering after `last_seq` (e.g. the highest persisted).
    pub fn with_alert_sequence(mut self, last_seq: u64) -> Self {
        self.next_alert_seq = last_seq + 1;
        self
    }

    pub fn policy(&self) -> &Policy {
        self.registry.policy()
    }

    // ----------------------------
    // Zones
    // ----------------------------

    pub fn register_zone(&mut self, spec: ZoneSpec) -> Result<&TemperatureZone> {
        self.registry.register(spec, OffsetDateTime::now_utc())
    }

    pub fn zones(&self) -> &[TemperatureZone] {
        self.registry.list()
    }

    pub fn zone(&self, zone_id: &str) -> Option<&TemperatureZone> {
        self.registry.get(zone_id)
    }

    pub fn filter_by_status(&self, filter: StatusFilter) -> Vec<&TemperatureZone> {
        self.registry.filter_by_status(filter)
    }

    pub fn update_reading(
        &mut self,
        zone_id: &str,
        temp: f64,
        online: bool,
    ) -> Result<ReadingOutcome> {
        self.update_reading_at(zone_id, temp, online, OffsetDateTime::now_utc())
    }

    /// Apply a reading taken at `ts` and record at most one alert.
    pub fn update_reading_at(
        &mut self,
        zone_id: &str,
        temp: f64,
        online: bool,
        ts: OffsetDateTime,
    ) -> Result<ReadingOutcome> {
        let change = self.registry.apply_reading(zone_id, temp, online, ts)?;

        // Resolve before recording so a fresh alert is never the one resolved.
        let auto_resolved = if !change.rejected
            && change.status == Status::Normal
            && change.previous_status.is_breach()
        {
            let resolved = self.ledger.auto_resolve_latest(zone_id);
            if let Some(id) = &resolved {
                info!(zone = %zone_id, alert = %id, "back in band; alert auto-resolved");
            }
            resolved
        } else {
            None
        };

        let zone = self
            .registry
            .get(zone_id)
            .ok_or_else(|| MonitorError::zone_not_found(zone_id))?;

        let offline_due = change.went_offline || self.pending_offline.contains(zone_id);
        let draft = alert_for(zone, &change, temp, offline_due);
        if offline_due {
            match &draft {
                Some(d) if d.0 == AlertType::SensorOffline => {
                    self.pending_offline.remove(zone_id);
                }
                _ => {
                    warn!(zone = %zone_id, "sensor went offline alongside another alert; offline alert deferred");
                    self.pending_offline.insert(zone_id.to_string());
                }
            }
        }

        let alert = match draft {
            Some((alert_type, severity, threshold, message)) => {
                let event = AlertEvent {
                    id: format!("ALT-{}", self.next_alert_seq),
                    zone_id: zone.id.clone(),
                    zone_name: zone.name.clone(),
                    alert_type,
                    severity,
                    temperature: if temp.is_finite() { temp } else { zone.current_temp },
                    threshold,
                    message,
                    timestamp: ts,
                    acknowledged: false,
                    acknowledged_at: None,
                    acknowledged_by: None,
                    auto_resolved: false,
                };
                self.ledger.record(event.clone())?;
                self.next_alert_seq += 1;
                info!(
                    zone = %zone_id,
                    alert = %event.id,
                    kind = %event.alert_type,
                    severity = %event.severity,
                    "alert recorded"
                );
                Some(event)
            }
            None => None,
        };

        self.refresh_alert_count(zone_id);

        debug!(
            zone = %zone_id,
            temp,
            online,
            status = %change.status,
            trend = %change.trend,
            "reading applied"
        );

        Ok(ReadingOutcome {
            zone_id: zone_id.to_string(),
            previous_status: change.previous_status,
            status: change.status,
            trend: change.trend,
            went_offline: change.went_offline,
            rejected: change.rejected,
            alert,
            auto_resolved,
        })
    }

    // ----------------------------
    // Alerts
    // ----------------------------

    pub fn alerts(&self, filter: &AlertFilter) -> Vec<&AlertEvent> {
        self.ledger.list(filter)
    }

    pub fn alert(&self, alert_id: &str) -> Option<&AlertEvent> {
        self.ledger.get(alert_id)
    }

    pub fn acknowledge(&mut self, alert_id: &str) -> Result<()> {
        self.acknowledge_at(alert_id, None, OffsetDateTime::now_utc())
    }

    /// Acknowledge on behalf of `by` (an operator name) at `now`.
    pub fn acknowledge_at(
        &mut self,
        alert_id: &str,
        by: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<()> {
        self.ledger.acknowledge(alert_id, now, by)?;
        if let Some(zone_id) = self.ledger.get(alert_id).map(|a| a.zone_id.clone()) {
            self.refresh_alert_count(&zone_id);
        }
        Ok(())
    }

    pub fn active_count(&self) -> usize {
        self.ledger.active_count()
    }

    pub fn export_csv(&self) -> Vec<u8> {
        self.ledger.export_csv()
    }

    pub fn summary(&self) -> Summary {
        let zones = self.registry.list();
        let count = |s: Status| zones.iter().filter(|z| z.status == s).count();
        let avg_temp = if zones.is_empty() {
            None
        } else {
            Some(zones.iter().map(|z| z.current_temp).sum::<f64>() / zones.len() as f64)
        };

        Summary {
            total_zones: zones.len(),
            normal_zones: count(Status::Normal),
            warning_zones: count(Status::Warning),
            critical_zones: count(Status::Critical),
            online_zones: zones.iter().filter(|z| z.is_online).count(),
            active_alerts: self.ledger.active_count(),
            avg_temp,
        }
    }

    fn refresh_alert_count(&mut self, zone_id: &str) {
        let n = self.ledger.active_count_for(zone_id);
        self.registry.set_alert_count(zone_id, n);
    }
}

/// Decide which alert, if any, a zone change warrants.
fn alert_for(
    zone: &TemperatureZone,
    change: &ZoneChange,
    temp: f64,
    offline_due: bool,
) -> Option<(AlertType, Severity, Option<f64>, String)> {
    if change.rejected && change.fault_raised {
        return Some((
            AlertType::SensorMalfunction,
            Severity::Info,
            None,
            format!("{}: implausible reading {temp} from sensor {}", zone.name, zone.sensor_id),
        ));
    }

    if !change.rejected && change.status > change.previous_status {
        if let Some(breach) = change.breach {
            return Some(temperature_alert(zone, change.status, breach, temp));
        }
    }

    if offline_due {
        return Some((
            AlertType::SensorOffline,
            Severity::Warning,
            None,
            format!("{}: sensor {} went offline", zone.name, zone.sensor_id),
        ));
    }

    None
}

fn temperature_alert(
    zone: &TemperatureZone,
    status: Status,
    breach: Breach,
    temp: f64,
) -> (AlertType, Severity, Option<f64>, String) {
    let severity = match status {
        Status::Critical => Severity::Critical,
        _ => Severity::Warning,
    };
    let (alert_type, message) = match breach.bound {
        Bound::Max => (
            AlertType::TemperatureHigh,
            format!(
                "{}: temperature {temp}°C risen above safe threshold {}°C",
                zone.name, breach.threshold
            ),
        ),
        Bound::Min => (
            AlertType::TemperatureLow,
            format!(
                "{}: temperature {temp}°C dropped below threshold {}°C",
                zone.name, breach.threshold
            ),
        ),
    };
    (alert_type, severity, Some(breach.threshold), message)
}

// ===========================================================================
// Tests
// ===========================================================================
