use chill_monitor::drift::MonitorHost;
use chill_monitor::{AlertEvent, AlertFilter, Monitor, ReadingOutcome, Summary, TemperatureZone, Tone};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub mqtt_connected: bool,
    pub monitor: Monitor,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Alert,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub mqtt_connected: bool,
    pub host: HostInfo,
    pub summary: Summary,
    pub zones: Vec<ZoneView>,
    pub alerts: Vec<AlertEvent>,
    pub events: Vec<SystemEvent>,
}

/// A zone plus the display hints the dashboard renders it with.
#[derive(Serialize)]
pub struct ZoneView {
    #[serde(flatten)]
    pub zone: TemperatureZone,
    pub status_tone: Tone,
    pub trend_indicator: &'static str,
}

impl From<&TemperatureZone> for ZoneView {
    fn from(zone: &TemperatureZone) -> Self {
        Self {
            zone: zone.clone(),
            status_tone: zone.status_tone(),
            trend_indicator: zone.trend_indicator(),
        }
    }
}

#[derive(Serialize)]
pub struct HostInfo {
    pub host_name: Option<String>,
    pub load_one: f64,
    pub total_memory: u64,
    pub used_memory: u64,
}

impl HostInfo {
    fn probe() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();
        Self {
            host_name: System::host_name(),
            load_one: System::load_average().one,
            total_memory: sys.total_memory(),
            used_memory: sys.used_memory(),
        }
    }
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(monitor: Monitor) -> Self {
        Self {
            started_at: Instant::now(),
            mqtt_connected: false,
            monitor,
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    /// Record what a reading did: the reading itself, and any alert raised
    /// or resolved by it.
    pub fn record_reading(&mut self, outcome: &ReadingOutcome) {
        let temp = self
            .monitor
            .zone(&outcome.zone_id)
            .map(|z| format!("{:.1}°C", z.current_temp))
            .unwrap_or_else(|| "?".to_string());

        let mut detail = format!("{} {temp} {}", outcome.zone_id, outcome.status);
        if outcome.status != outcome.previous_status {
            detail = format!("{detail} (was {})", outcome.previous_status);
        }
        if outcome.rejected {
            detail.push_str(" [rejected]");
        }
        self.push_event(EventKind::Reading, detail);

        if let Some(alert) = &outcome.alert {
            self.push_event(
                EventKind::Alert,
                format!("{} {}: {}", alert.id, alert.severity.as_str(), alert.message),
            );
        }
        if let Some(id) = &outcome.auto_resolved {
            self.push_event(EventKind::Alert, format!("{id} auto-resolved"));
        }
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            mqtt_connected: self.mqtt_connected,
            host: HostInfo::probe(),
            summary: self.monitor.summary(),
            zones: self.monitor.zones().iter().map(ZoneView::from).collect(),
            alerts: self
                .monitor
                .alerts(&AlertFilter::active())
                .into_iter()
                .cloned()
                .collect(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

impl MonitorHost for SystemState {
    fn monitor_mut(&mut self) -> &mut Monitor {
        &mut self.monitor
    }

    fn on_reading(&mut self, outcome: &ReadingOutcome) {
        self.record_reading(outcome);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
