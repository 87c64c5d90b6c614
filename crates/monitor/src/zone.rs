//! Zone registry: the fixed, configuration-ordered set of monitored zones and
//! their live readings.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;

use crate::classify::{
    classify, is_plausible, trend_between, Breach, Policy, Status, StatusFilter, Tone, Trend,
};
use crate::error::{MonitorError, Result};

// ---------------------------------------------------------------------------
// Configuration input
// ---------------------------------------------------------------------------

/// Static zone configuration, as loaded from the config file or the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSpec {
    pub id: String,
    pub name: String,
    pub location: String,
    pub sensor_id: String,
    pub min_threshold: f64,
    pub target_temp: f64,
    pub max_threshold: f64,
    /// First reading before any telemetry arrives. Defaults to the target.
    #[serde(default)]
    pub initial_temp: Option<f64>,
}

impl ZoneSpec {
    /// Check the threshold band. A zone failing this is never registered.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(MonitorError::Validation("zone id is empty".into()));
        }

        let numbers = [
            ("min_threshold", self.min_threshold),
            ("target_temp", self.target_temp),
            ("max_threshold", self.max_threshold),
        ];
        for (field, v) in numbers {
            if !v.is_finite() {
                return Err(MonitorError::Validation(format!(
                    "zone '{}': {field} is not a finite number",
                    self.id
                )));
            }
        }

        if !(self.min_threshold < self.target_temp && self.target_temp < self.max_threshold) {
            return Err(MonitorError::Validation(format!(
                "zone '{}': thresholds must satisfy min ({}) < target ({}) < max ({})",
                self.id, self.min_threshold, self.target_temp, self.max_threshold
            )));
        }

        if let Some(t) = self.initial_temp {
            if !is_plausible(t) {
                return Err(MonitorError::Validation(format!(
                    "zone '{}': initial_temp {t} is not a plausible reading",
                    self.id
                )));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Live zone
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemperatureZone {
    pub id: String,
    pub name: String,
    pub location: String,
    pub sensor_id: String,
    pub current_temp: f64,
    pub target_temp: f64,
    pub min_threshold: f64,
    pub max_threshold: f64,
    pub status: Status,
    pub trend: Trend,
    pub is_online: bool,
    pub sensor_fault: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_update: OffsetDateTime,
    pub alert_count: usize,
}

impl TemperatureZone {
    fn from_spec(spec: ZoneSpec, policy: &Policy, now: OffsetDateTime) -> Self {
        let current = spec.initial_temp.unwrap_or(spec.target_temp);
        let status = classify(current, spec.min_threshold, spec.max_threshold, policy).status;
        Self {
            id: spec.id,
            name: spec.name,
            location: spec.location,
            sensor_id: spec.sensor_id,
            current_temp: current,
            target_temp: spec.target_temp,
            min_threshold: spec.min_threshold,
            max_threshold: spec.max_threshold,
            status,
            trend: Trend::Stable,
            is_online: true,
            sensor_fault: false,
            last_update: now,
            alert_count: 0,
        }
    }

    pub fn status_tone(&self) -> Tone {
        self.status.tone()
    }

    pub fn trend_indicator(&self) -> &'static str {
        self.trend.indicator()
    }
}

/// What a single reading did to a zone. Alert decisions are made from this.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneChange {
    pub previous_status: Status,
    pub status: Status,
    pub breach: Option<Breach>,
    pub trend: Trend,
    pub went_offline: bool,
    /// The reading was implausible and left temperature/status untouched.
    pub rejected: bool,
    /// `sensor_fault` flipped from false to true on this reading.
    pub fault_raised: bool,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ZoneRegistry {
    zones: Vec<TemperatureZone>,
    index: HashMap<String, usize>,
    policy: Policy,
}

impl ZoneRegistry {
    pub fn new(policy: Policy) -> Self {
        Self {
            zones: Vec::new(),
            index: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Validate and append a zone. Display order is registration order.
    pub fn register(&mut self, spec: ZoneSpec, now: OffsetDateTime) -> Result<&TemperatureZone> {
        spec.validate()?;
        if self.index.contains_key(&spec.id) {
            return Err(MonitorError::Validation(format!(
                "zone '{}' is already registered",
                spec.id
            )));
        }

        let idx = self.zones.len();
        self.index.insert(spec.id.clone(), idx);
        self.zones
            .push(TemperatureZone::from_spec(spec, &self.policy, now));
        Ok(&self.zones[idx])
    }

    pub fn list(&self) -> &[TemperatureZone] {
        &self.zones
    }

    pub fn get(&self, zone_id: &str) -> Option<&TemperatureZone> {
        self.index.get(zone_id).map(|&i| &self.zones[i])
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    pub fn filter_by_status(&self, filter: StatusFilter) -> Vec<&TemperatureZone> {
        self.zones
            .iter()
            .filter(|z| filter.matches(z.status))
            .collect()
    }

    /// Apply a reading to a zone and report how its state moved.
    pub fn apply_reading(
        &mut self,
        zone_id: &str,
        temp: f64,
        online: bool,
        ts: OffsetDateTime,
    ) -> Result<ZoneChange> {
        let idx = *self
            .index
            .get(zone_id)
            .ok_or_else(|| MonitorError::zone_not_found(zone_id))?;
        let policy = self.policy;
        let zone = &mut self.zones[idx];

        let previous_status = zone.status;
        let went_offline = zone.is_online && !online;
        zone.is_online = online;
        zone.last_update = ts;

        if !is_plausible(temp) {
            let fault_raised = !zone.sensor_fault;
            zone.sensor_fault = true;
            return Ok(ZoneChange {
                previous_status,
                status: previous_status,
                breach: None,
                trend: zone.trend,
                went_offline,
                rejected: true,
                fault_raised,
            });
        }

        zone.sensor_fault = false;
        zone.trend = trend_between(zone.current_temp, temp, policy.trend_deadband);
        zone.current_temp = temp;

        let c = classify(temp, zone.min_threshold, zone.max_threshold, &policy);
        zone.status = c.status;

        Ok(ZoneChange {
            previous_status,
            status: c.status,
            breach: c.breach,
            trend: zone.trend,
            went_offline,
            rejected: false,
            fault_raised: false,
        })
    }

    pub(crate) fn set_alert_count(&mut self, zone_id: &str, count: usize) {
        if let Some(&i) = self.index.get(zone_id) {
            self.zones[i].alert_count = count;
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const T0: OffsetDateTime = datetime!(2024-01-16 14:00 UTC);
    const T1: OffsetDateTime = datetime!(2024-01-16 14:01 UTC);

    fn spec(id: &str) -> ZoneSpec {
        ZoneSpec {
            id: id.into(),
            name: format!("Zone {id}"),
            location: "Warehouse Section 1".into(),
            sensor_id: format!("SEN-{id}"),
            min_threshold: -20.0,
            target_temp: -18.0,
            max_threshold: -16.0,
            initial_temp: None,
        }
    }

    fn registry(ids: &[&str]) -> ZoneRegistry {
        let mut r = ZoneRegistry::new(Policy::default());
        for id in ids {
            r.register(spec(id), T0).unwrap();
        }
        r
    }

    // -- Registration -------------------------------------------------------

    #[test]
    fn register_starts_at_target_and_normal() {
        let r = registry(&["A"]);
        let z = r.get("A").unwrap();
        assert_eq!(z.current_temp, -18.0);
        assert_eq!(z.status, Status::Normal);
        assert_eq!(z.trend, Trend::Stable);
        assert!(z.is_online);
        assert_eq!(z.alert_count, 0);
        assert_eq!(z.last_update, T0);
    }

    #[test]
    fn register_classifies_initial_temp() {
        let mut r = ZoneRegistry::new(Policy::default());
        let z = r
            .register(
                ZoneSpec {
                    initial_temp: Some(-15.0),
                    ..spec("A")
                },
                T0,
            )
            .unwrap();
        assert_eq!(z.status, Status::Warning);
    }

    #[test]
    fn list_preserves_registration_order() {
        let r = registry(&["C", "A", "B"]);
        let ids: Vec<&str> = r.list().iter().map(|z| z.id.as_str()).collect();
        assert_eq!(ids, ["C", "A", "B"]);
    }

    #[test]
    fn inverted_band_rejected() {
        let mut r = ZoneRegistry::new(Policy::default());
        let err = r
            .register(
                ZoneSpec {
                    min_threshold: -16.0,
                    max_threshold: -20.0,
                    ..spec("A")
                },
                T0,
            )
            .unwrap_err();
        assert!(matches!(err, MonitorError::Validation(_)));
        assert!(r.is_empty());
    }

    #[test]
    fn target_on_bound_rejected() {
        let mut r = ZoneRegistry::new(Policy::default());
        let err = r
            .register(
                ZoneSpec {
                    target_temp: -20.0,
                    ..spec("A")
                },
                T0,
            )
            .unwrap_err();
        assert!(err.to_string().contains("min (-20) < target (-20)"));
    }

    #[test]
    fn non_finite_threshold_rejected() {
        let mut r = ZoneRegistry::new(Policy::default());
        let bad = ZoneSpec {
            max_threshold: f64::NAN,
            ..spec("A")
        };
        assert!(r.register(bad, T0).is_err());
    }

    #[test]
    fn duplicate_id_rejected() {
        let mut r = registry(&["A"]);
        let err = r.register(spec("A"), T0).unwrap_err();
        assert!(err.to_string().contains("already registered"));
        assert_eq!(r.len(), 1);
    }

    // -- Readings -----------------------------------------------------------

    #[test]
    fn unknown_zone_is_not_found() {
        let mut r = registry(&["A"]);
        let err = r.apply_reading("nope", -18.0, true, T1).unwrap_err();
        assert_eq!(err, MonitorError::zone_not_found("nope"));
    }

    #[test]
    fn reading_updates_fields_and_trend() {
        let mut r = registry(&["A"]);
        let change = r.apply_reading("A", -17.5, true, T1).unwrap();
        assert_eq!(change.trend, Trend::Increasing);
        assert_eq!(change.status, Status::Normal);

        let z = r.get("A").unwrap();
        assert_eq!(z.current_temp, -17.5);
        assert_eq!(z.last_update, T1);

        r.apply_reading("A", -17.52, true, T1).unwrap();
        assert_eq!(r.get("A").unwrap().trend, Trend::Stable);

        r.apply_reading("A", -18.5, true, T1).unwrap();
        assert_eq!(r.get("A").unwrap().trend, Trend::Decreasing);
    }

    #[test]
    fn reading_reports_transition_and_breach() {
        let mut r = registry(&["A"]);
        let change = r.apply_reading("A", -15.8, true, T1).unwrap();
        assert_eq!(change.previous_status, Status::Normal);
        assert_eq!(change.status, Status::Warning);
        assert_eq!(change.breach.unwrap().threshold, -16.0);
    }

    #[test]
    fn offline_transition_reported_once() {
        let mut r = registry(&["A"]);
        assert!(r.apply_reading("A", -18.0, false, T1).unwrap().went_offline);
        assert!(!r.apply_reading("A", -18.0, false, T1).unwrap().went_offline);
        assert!(!r.get("A").unwrap().is_online);
    }

    #[test]
    fn implausible_reading_keeps_temperature() {
        let mut r = registry(&["A"]);
        let change = r.apply_reading("A", -127.0, true, T1).unwrap();
        assert!(change.rejected);
        assert!(change.fault_raised);

        let z = r.get("A").unwrap();
        assert_eq!(z.current_temp, -18.0);
        assert!(z.sensor_fault);
        assert_eq!(z.last_update, T1);

        let again = r.apply_reading("A", f64::NAN, true, T1).unwrap();
        assert!(again.rejected);
        assert!(!again.fault_raised);

        r.apply_reading("A", -18.2, true, T1).unwrap();
        assert!(!r.get("A").unwrap().sensor_fault);
    }

    #[test]
    fn filter_by_status() {
        let mut r = registry(&["A", "B", "C"]);
        r.apply_reading("B", -15.0, true, T1).unwrap();
        r.apply_reading("C", -10.0, true, T1).unwrap();

        assert_eq!(r.filter_by_status(StatusFilter::All).len(), 3);
        let warn = r.filter_by_status(StatusFilter::Only(Status::Warning));
        assert_eq!(warn.len(), 1);
        assert_eq!(warn[0].id, "B");
        let normal = r.filter_by_status(StatusFilter::Only(Status::Normal));
        assert_eq!(normal[0].id, "A");
    }
}
