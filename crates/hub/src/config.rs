//! TOML config file loading, validation, and database seeding for monitored
//! zones and monitor tunables.

use anyhow::{bail, Context, Result};
use chill_monitor::{Policy, Scenario, ZoneSpec};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tracing::warn;

use crate::db::Db;

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub zones: Vec<ZoneEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub critical_margin: f64,
    pub trend_deadband: f64,
    pub drift_enabled: bool,
    pub drift_interval_s: u64,
    pub drift_scenario: String,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        let policy = Policy::default();
        Self {
            critical_margin: policy.critical_margin,
            trend_deadband: policy.trend_deadband,
            drift_enabled: false,
            drift_interval_s: chill_monitor::drift::DEFAULT_INTERVAL.as_secs(),
            drift_scenario: Scenario::Drifting.to_string(),
        }
    }
}

impl MonitorSettings {
    pub fn policy(&self) -> Policy {
        Policy {
            critical_margin: self.critical_margin,
            trend_deadband: self.trend_deadband,
        }
    }

    pub fn drift_interval(&self) -> Duration {
        Duration::from_secs(self.drift_interval_s)
    }

    pub fn scenario(&self) -> Scenario {
        Scenario::from_str_lossy(&self.drift_scenario)
    }
}

#[derive(Debug, Deserialize)]
pub struct ZoneEntry {
    pub zone_id: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
    pub sensor_id: String,
    pub min_threshold: f64,
    pub target_temp: f64,
    pub max_threshold: f64,
}

impl ZoneEntry {
    pub fn to_spec(&self) -> ZoneSpec {
        ZoneSpec {
            id: self.zone_id.clone(),
            name: self.name.clone(),
            location: self.location.clone(),
            sensor_id: self.sensor_id.clone(),
            min_threshold: self.min_threshold,
            target_temp: self.target_temp,
            max_threshold: self.max_threshold,
            initial_temp: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    ///
    /// Threshold ordering is not checked here; a zone with a bad band is
    /// rejected on its own at registration and the rest still load.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_monitor(&mut errors);
        self.validate_zones(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_monitor(&self, errors: &mut Vec<String>) {
        let m = &self.monitor;
        if !m.critical_margin.is_finite() || m.critical_margin <= 0.0 {
            errors.push(format!(
                "monitor: critical_margin must be a positive number, got {}",
                m.critical_margin
            ));
        }
        if !m.trend_deadband.is_finite() || m.trend_deadband < 0.0 {
            errors.push(format!(
                "monitor: trend_deadband must be zero or positive, got {}",
                m.trend_deadband
            ));
        }
        if m.drift_interval_s == 0 {
            errors.push("monitor: drift_interval_s must be positive, got 0".to_string());
        }
    }

    fn validate_zones(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();
        let mut seen_names: HashSet<&str> = HashSet::new();
        let mut seen_sensors: HashSet<&str> = HashSet::new();

        for (i, z) in self.zones.iter().enumerate() {
            let ctx = || {
                if z.zone_id.is_empty() {
                    format!("zones[{i}]")
                } else {
                    format!("zone '{}'", z.zone_id)
                }
            };

            // ── Identity ────────────────────────────────────────
            if z.zone_id.trim().is_empty() {
                errors.push(format!("{}: zone_id is empty", ctx()));
            } else if !seen_ids.insert(&z.zone_id) {
                errors.push(format!("{}: duplicate zone_id", ctx()));
            }

            if z.name.trim().is_empty() {
                errors.push(format!("{}: name is empty", ctx()));
            } else if !seen_names.insert(&z.name) {
                errors.push(format!("{}: name '{}' is already used", ctx(), z.name));
            }

            if z.sensor_id.trim().is_empty() {
                errors.push(format!("{}: sensor_id is empty", ctx()));
            } else if !seen_sensors.insert(&z.sensor_id) {
                errors.push(format!(
                    "{}: sensor_id '{}' is already used by another zone",
                    ctx(),
                    z.sensor_id
                ));
            }

            // ── Numbers ─────────────────────────────────────────
            for (field, v) in [
                ("min_threshold", z.min_threshold),
                ("target_temp", z.target_temp),
                ("max_threshold", z.max_threshold),
            ] {
                if !v.is_finite() {
                    errors.push(format!("{}: {field} is not a finite number", ctx()));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

/// Make the zones with a valid threshold band the database's active set.
/// Zones that are missing from the file or skipped here are deactivated.
/// Returns the number of zones written.
pub async fn apply(config: &Config, db: &Db) -> Result<usize> {
    let mut active = Vec::with_capacity(config.zones.len());
    for (position, z) in config.zones.iter().enumerate() {
        let spec = z.to_spec();
        if let Err(e) = spec.validate() {
            warn!(zone = %z.zone_id, "skipping zone: {e}");
            continue;
        }
        active.push((position as i64, spec));
    }

    db.sync_zones(&active)
        .await
        .context("failed to write zones to the database")?;

    tracing::info!(
        zones = active.len(),
        skipped = config.zones.len() - active.len(),
        "config applied"
    );

    Ok(active.len())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Helper: build a valid baseline config that passes validation ------

    fn valid_zone() -> ZoneEntry {
        ZoneEntry {
            zone_id: "ZONE-001".into(),
            name: "Main Freezer A".into(),
            location: "Warehouse Section 1".into(),
            sensor_id: "SEN-001".into(),
            min_threshold: -20.0,
            target_temp: -18.0,
            max_threshold: -16.0,
        }
    }

    fn valid_config() -> Config {
        Config {
            monitor: MonitorSettings::default(),
            zones: vec![valid_zone()],
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[monitor]
critical_margin = 1.5
trend_deadband = 0.1
drift_enabled = true
drift_interval_s = 30
drift_scenario = "flaky"

[[zones]]
zone_id = "ZONE-002"
name = "Ice Cream Storage"
location = "Warehouse Section 2"
sensor_id = "SEN-002"
min_threshold = -24.0
target_temp = -20.0
max_threshold = -18.0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.monitor.critical_margin, 1.5);
        assert!(config.monitor.drift_enabled);
        assert_eq!(config.monitor.drift_interval(), Duration::from_secs(30));
        assert_eq!(config.monitor.scenario(), Scenario::Flaky);
        assert_eq!(config.zones.len(), 1);
        assert_eq!(config.zones[0].zone_id, "ZONE-002");
        config.validate().unwrap();
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.zones.is_empty());
        assert_eq!(config.monitor.policy(), Policy::default());
        assert!(!config.monitor.drift_enabled);
        assert_eq!(config.monitor.drift_interval_s, 60);
        assert_eq!(config.monitor.scenario(), Scenario::Drifting);
    }

    #[test]
    fn partial_monitor_section_keeps_other_defaults() {
        let config: Config = toml::from_str("[monitor]\ncritical_margin = 3.0\n").unwrap();
        assert_eq!(config.monitor.critical_margin, 3.0);
        assert_eq!(config.monitor.trend_deadband, 0.05);
    }

    #[test]
    fn location_is_optional() {
        let toml_str = r#"
[[zones]]
zone_id = "ZONE-004"
name = "Delivery Truck 1"
sensor_id = "SEN-004"
min_threshold = -20.0
target_temp = -18.0
max_threshold = -15.0
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.zones[0].location, "");
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn zone_empty_id_rejected() {
        let mut cfg = valid_config();
        cfg.zones[0].zone_id = "".into();
        assert_validation_err(&cfg, "zones[0]: zone_id is empty");
    }

    #[test]
    fn zone_duplicate_id_rejected() {
        let mut cfg = valid_config();
        cfg.zones.push(ZoneEntry {
            name: "Cold Room B".into(),
            sensor_id: "SEN-009".into(),
            ..valid_zone()
        });
        assert_validation_err(&cfg, "duplicate zone_id");
    }

    #[test]
    fn zone_empty_name_rejected() {
        let mut cfg = valid_config();
        cfg.zones[0].name = "  ".into();
        assert_validation_err(&cfg, "name is empty");
    }

    #[test]
    fn zone_duplicate_name_rejected() {
        let mut cfg = valid_config();
        cfg.zones.push(ZoneEntry {
            zone_id: "ZONE-002".into(),
            sensor_id: "SEN-002".into(),
            ..valid_zone()
        });
        assert_validation_err(&cfg, "name 'Main Freezer A' is already used");
    }

    #[test]
    fn duplicate_sensor_rejected() {
        let mut cfg = valid_config();
        cfg.zones.push(ZoneEntry {
            zone_id: "ZONE-002".into(),
            name: "Cold Room B".into(),
            ..valid_zone()
        });
        assert_validation_err(&cfg, "sensor_id 'SEN-001' is already used");
    }

    #[test]
    fn non_finite_threshold_rejected() {
        let mut cfg = valid_config();
        cfg.zones[0].max_threshold = f64::INFINITY;
        assert_validation_err(&cfg, "max_threshold is not a finite number");
    }

    #[test]
    fn inverted_band_passes_file_validation() {
        let mut cfg = valid_config();
        cfg.zones[0].min_threshold = -10.0;
        cfg.validate().unwrap();
        assert!(cfg.zones[0].to_spec().validate().is_err());
    }

    #[test]
    fn monitor_settings_rejected() {
        let mut cfg = valid_config();
        cfg.monitor.critical_margin = 0.0;
        cfg.monitor.trend_deadband = -0.1;
        cfg.monitor.drift_interval_s = 0;
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "got: {msg}");
        assert!(msg.contains("critical_margin"));
        assert!(msg.contains("trend_deadband"));
        assert!(msg.contains("drift_interval_s"));
    }

    #[test]
    fn multiple_errors_collected() {
        let cfg = Config {
            monitor: MonitorSettings::default(),
            zones: vec![ZoneEntry {
                zone_id: "".into(),
                name: "".into(),
                location: "".into(),
                sensor_id: "".into(),
                min_threshold: f64::NAN,
                target_temp: -18.0,
                max_threshold: -16.0,
            }],
        };
        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("zone_id is empty"), "missing zone_id error in: {msg}");
        assert!(msg.contains("sensor_id is empty"), "missing sensor error in: {msg}");
        assert!(msg.contains("min_threshold"), "missing threshold error in: {msg}");
    }

    // -- DB integration ---------------------------------------------------

    #[tokio::test]
    async fn apply_seeds_database_and_skips_bad_bands() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        let mut config = valid_config();
        config.zones.push(ZoneEntry {
            zone_id: "ZONE-BAD".into(),
            name: "Broken Band".into(),
            sensor_id: "SEN-BAD".into(),
            min_threshold: -16.0,
            max_threshold: -20.0,
            ..valid_zone()
        });
        config.validate().unwrap();

        assert_eq!(apply(&config, &db).await.unwrap(), 1);

        let zones = db.load_zones().await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].id, "ZONE-001");
        assert_eq!(zones[0].sensor_id, "SEN-001");
    }

    #[tokio::test]
    async fn band_broken_between_sessions_is_not_reloaded() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        apply(&valid_config(), &db).await.unwrap();
        assert_eq!(db.load_zones().await.unwrap().len(), 1);

        let mut config = valid_config();
        config.zones[0].min_threshold = -16.0;
        config.zones[0].max_threshold = -20.0;
        assert_eq!(apply(&config, &db).await.unwrap(), 0);

        assert!(db.load_zones().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn zone_removed_from_file_is_not_reloaded() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        let mut config = valid_config();
        config.zones.push(ZoneEntry {
            zone_id: "ZONE-002".into(),
            name: "Produce Cooler".into(),
            sensor_id: "SEN-002".into(),
            ..valid_zone()
        });
        assert_eq!(apply(&config, &db).await.unwrap(), 2);

        apply(&valid_config(), &db).await.unwrap();
        let zones = db.load_zones().await.unwrap();
        assert_eq!(zones.len(), 1);
        assert_eq!(zones[0].id, "ZONE-001");
    }
}
