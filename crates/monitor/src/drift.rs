//! Temperature drift simulator for demos and local development.
//!
//! Stands in for a live sensor feed. Models a freezer probe with:
//! - Mean reversion toward the zone's target (the compressor doing its job)
//! - A slow heading (warming or cooling) that occasionally flips
//! - Per-reading gaussian noise and a per-sensor calibration offset
//! - Rare spikes (door left open, probe knocked)
//! - Scenario dependent sensor dropouts with recovery
//!
//! [`spawn`] runs the simulator on a repeating timer against a shared
//! [`Monitor`]. The returned [`DriftHandle`] cancels the timer when dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::classify::PLAUSIBLE_RANGE;
use crate::monitor::{Monitor, ReadingOutcome};

/// Default tick period of the drift feed.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal(rng: &mut fastrand::Rng) -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += rng.f64();
    }
    sum - 6.0
}

fn gaussian(rng: &mut fastrand::Rng, mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal(rng)
}

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Tight control around target. Breaches are rare.
    Stable,
    /// Moderate walk with a noticeable heading; zones wander out of band
    /// now and then and come back.
    Drifting,
    /// Noisy probes, frequent spikes and dropouts. Exercises offline and
    /// malfunction alerts.
    Flaky,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            _ => Self::Drifting,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::Drifting => write!(f, "drifting"),
            Self::Flaky => write!(f, "flaky"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Params {
    /// Fraction of the distance to target recovered per tick.
    mean_reversion: f64,
    walk_sigma: f64,
    /// °C per tick in the current heading.
    heading_rate: f64,
    flip_prob: f32,
    noise_sigma: f64,
    spike_prob: f32,
    spike_sigma: f64,
    dropout_prob: f32,
    recovery_prob: f32,
}

impl Params {
    fn for_scenario(scenario: Scenario) -> Self {
        match scenario {
            Scenario::Stable => Self {
                mean_reversion: 0.3,
                walk_sigma: 0.05,
                heading_rate: 0.01,
                flip_prob: 0.05,
                noise_sigma: 0.05,
                spike_prob: 0.0,
                spike_sigma: 0.0,
                dropout_prob: 0.0,
                recovery_prob: 1.0,
            },
            Scenario::Drifting => Self {
                mean_reversion: 0.08,
                walk_sigma: 0.25,
                heading_rate: 0.15,
                flip_prob: 0.1,
                noise_sigma: 0.1,
                spike_prob: 0.02,
                spike_sigma: 2.0,
                dropout_prob: 0.005,
                recovery_prob: 0.5,
            },
            Scenario::Flaky => Self {
                mean_reversion: 0.1,
                walk_sigma: 0.4,
                heading_rate: 0.1,
                flip_prob: 0.2,
                noise_sigma: 0.4,
                spike_prob: 0.1,
                spike_sigma: 4.0,
                dropout_prob: 0.08,
                recovery_prob: 0.3,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Per-zone state
// ---------------------------------------------------------------------------

struct ProbeState {
    /// Permanent calibration offset of this probe (°C).
    offset: f64,
    /// +1.0 warming, -1.0 cooling.
    heading: f64,
    online: bool,
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct DriftSimulator {
    scenario: Scenario,
    params: Params,
    rng: fastrand::Rng,
    probes: HashMap<String, ProbeState>,
}

impl DriftSimulator {
    pub fn new(scenario: Scenario) -> Self {
        Self::from_rng(scenario, fastrand::Rng::new())
    }

    /// Deterministic simulator for tests and reproducible demos.
    pub fn with_seed(scenario: Scenario, seed: u64) -> Self {
        Self::from_rng(scenario, fastrand::Rng::with_seed(seed))
    }

    fn from_rng(scenario: Scenario, rng: fastrand::Rng) -> Self {
        Self {
            scenario,
            params: Params::for_scenario(scenario),
            rng,
            probes: HashMap::new(),
        }
    }

    pub fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Next `(temperature, online)` reading for a zone currently at
    /// `current` with set-point `target`. Readings are rounded to 0.1 °C.
    pub fn sample(&mut self, zone_id: &str, current: f64, target: f64) -> (f64, bool) {
        let p = self.params;
        let rng = &mut self.rng;

        let probe = self
            .probes
            .entry(zone_id.to_string())
            .or_insert_with(|| ProbeState {
                offset: gaussian(rng, 0.0, 0.1),
                heading: if rng.bool() { 1.0 } else { -1.0 },
                online: true,
            });

        // -- Connectivity ---------------------------------------------------
        if probe.online {
            if rng.f32() < p.dropout_prob {
                probe.online = false;
            }
        } else if rng.f32() < p.recovery_prob {
            probe.online = true;
        }

        // -- Heading flip ---------------------------------------------------
        if rng.f32() < p.flip_prob {
            probe.heading = -probe.heading;
        }

        // -- Evolve ---------------------------------------------------------
        let pull = p.mean_reversion * (target - current);
        let walk = gaussian(rng, 0.0, p.walk_sigma);
        let heading = probe.heading * p.heading_rate;
        let noise = gaussian(rng, 0.0, p.noise_sigma);
        let spike = if rng.f32() < p.spike_prob {
            gaussian(rng, 0.0, p.spike_sigma)
        } else {
            0.0
        };

        let reading = current + pull + walk + heading + noise + spike + probe.offset * 0.1;
        let reading = ((reading * 10.0).round() / 10.0).clamp(PLAUSIBLE_RANGE.0, PLAUSIBLE_RANGE.1);

        (reading, probe.online)
    }

    /// Push one reading per zone, in registry order, into `host`.
    /// Returns the number of zones updated.
    pub fn tick<H: MonitorHost + ?Sized>(&mut self, host: &mut H) -> usize {
        let readings: Vec<(String, f64, bool)> = host
            .monitor_mut()
            .zones()
            .iter()
            .map(|z| {
                let (temp, online) = self.sample(&z.id, z.current_temp, z.target_temp);
                (z.id.clone(), temp, online)
            })
            .collect();

        let mut applied = 0;
        for (zone_id, temp, online) in readings {
            match host.monitor_mut().update_reading(&zone_id, temp, online) {
                Ok(outcome) => {
                    applied += 1;
                    host.on_reading(&outcome);
                }
                Err(e) => warn!(zone = %zone_id, "drift: reading rejected: {e}"),
            }
        }
        debug!(zones = applied, "drift tick");
        applied
    }
}

// ---------------------------------------------------------------------------
// Scoped timer
// ---------------------------------------------------------------------------

/// Anything that owns a [`Monitor`] the drift feed can write into.
pub trait MonitorHost: Send + Sync + 'static {
    fn monitor_mut(&mut self) -> &mut Monitor;

    /// Called after each applied reading.
    fn on_reading(&mut self, _outcome: &ReadingOutcome) {}
}

impl MonitorHost for Monitor {
    fn monitor_mut(&mut self) -> &mut Monitor {
        self
    }
}

/// Owns the drift timer task. Dropping it cancels the timer.
pub struct DriftHandle {
    task: Option<JoinHandle<()>>,
}

impl DriftHandle {
    pub fn stop(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("drift feed stopped");
        }
    }
}

impl Drop for DriftHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Start the drift feed on the current tokio runtime. The first tick fires
/// one `period` after the call.
pub fn spawn<H: MonitorHost>(
    shared: Arc<RwLock<H>>,
    period: Duration,
    mut sim: DriftSimulator,
) -> DriftHandle {
    let period = period.max(Duration::from_millis(1));
    info!(period_sec = period.as_secs_f64(), scenario = %sim.scenario(), "drift feed started");

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let mut host = shared.write().await;
            sim.tick(&mut *host);
        }
    });

    DriftHandle { task: Some(task) }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::Policy;
    use crate::zone::ZoneSpec;

    fn zone(id: &str) -> ZoneSpec {
        ZoneSpec {
            id: id.into(),
            name: format!("Zone {id}"),
            location: "Vehicle Fleet".into(),
            sensor_id: format!("SEN-{id}"),
            min_threshold: -20.0,
            target_temp: -18.0,
            max_threshold: -16.0,
            initial_temp: None,
        }
    }

    fn monitor(ids: &[&str]) -> Monitor {
        let mut m = Monitor::new(Policy::default());
        for id in ids {
            m.register_zone(zone(id)).unwrap();
        }
        m
    }

    // -- Simulator ----------------------------------------------------------

    #[test]
    fn same_seed_same_readings() {
        let mut a = DriftSimulator::with_seed(Scenario::Flaky, 42);
        let mut b = DriftSimulator::with_seed(Scenario::Flaky, 42);
        let (mut ta, mut tb) = (-18.0, -18.0);
        for _ in 0..200 {
            let ra = a.sample("z", ta, -18.0);
            let rb = b.sample("z", tb, -18.0);
            assert_eq!(ra, rb);
            ta = ra.0;
            tb = rb.0;
        }
    }

    #[test]
    fn readings_stay_plausible_and_rounded() {
        let mut sim = DriftSimulator::with_seed(Scenario::Flaky, 1);
        let mut t = -18.0;
        for _ in 0..1000 {
            let (next, _) = sim.sample("z", t, -18.0);
            assert!((PLAUSIBLE_RANGE.0..=PLAUSIBLE_RANGE.1).contains(&next));
            assert!(((next * 10.0).round() - next * 10.0).abs() < 1e-6, "not rounded: {next}");
            t = next;
        }
    }

    #[test]
    fn stable_scenario_hovers_near_target() {
        let mut sim = DriftSimulator::with_seed(Scenario::Stable, 3);
        let mut t = -18.0;
        for _ in 0..500 {
            t = sim.sample("z", t, -18.0).0;
            assert!((t + 18.0).abs() < 2.0, "stable drifted to {t}");
        }
    }

    #[test]
    fn mean_reversion_pulls_back_toward_target() {
        let mut sim = DriftSimulator::with_seed(Scenario::Stable, 9);
        let mut t = -10.0;
        for _ in 0..50 {
            t = sim.sample("z", t, -18.0).0;
        }
        assert!(t < -16.0, "expected recovery toward -18, got {t}");
    }

    #[test]
    fn stable_never_drops_out() {
        let mut sim = DriftSimulator::with_seed(Scenario::Stable, 5);
        assert!((0..500).all(|_| sim.sample("z", -18.0, -18.0).1));
    }

    #[test]
    fn flaky_drops_out_and_recovers() {
        let mut sim = DriftSimulator::with_seed(Scenario::Flaky, 11);
        let flags: Vec<bool> = (0..500).map(|_| sim.sample("z", -18.0, -18.0).1).collect();
        let first_offline = flags.iter().position(|on| !on).expect("no dropout in 500 ticks");
        assert!(
            flags[first_offline..].iter().any(|&on| on),
            "probe never came back online"
        );
    }

    #[test]
    fn approx_std_normal_has_zero_mean() {
        let mut rng = fastrand::Rng::with_seed(17);
        let n = 5000;
        let sum: f64 = (0..n).map(|_| approx_std_normal(&mut rng)).sum();
        let mean = sum / n as f64;
        assert!(mean.abs() < 0.15, "approx_std_normal mean should be near zero: {mean}");
    }

    #[test]
    fn scenario_from_str_lossy() {
        assert_eq!(Scenario::from_str_lossy("stable"), Scenario::Stable);
        assert_eq!(Scenario::from_str_lossy("FLAKY"), Scenario::Flaky);
        assert_eq!(Scenario::from_str_lossy("drifting"), Scenario::Drifting);
        assert_eq!(Scenario::from_str_lossy(""), Scenario::Drifting);
    }

    #[test]
    fn scenario_display() {
        assert_eq!(Scenario::Stable.to_string(), "stable");
        assert_eq!(Scenario::Drifting.to_string(), "drifting");
        assert_eq!(Scenario::Flaky.to_string(), "flaky");
    }

    // -- Tick ---------------------------------------------------------------

    #[test]
    fn tick_updates_every_zone() {
        let mut m = monitor(&["A", "B", "C"]);
        let before: Vec<_> = m.zones().iter().map(|z| z.last_update).collect();
        let mut sim = DriftSimulator::with_seed(Scenario::Drifting, 8);

        assert_eq!(sim.tick(&mut m), 3);
        for (z, prev) in m.zones().iter().zip(before) {
            assert!(z.last_update >= prev);
        }
    }

    // -- Scoped timer -------------------------------------------------------

    struct CountingHost {
        monitor: Monitor,
        readings: usize,
    }

    impl MonitorHost for CountingHost {
        fn monitor_mut(&mut self) -> &mut Monitor {
            &mut self.monitor
        }

        fn on_reading(&mut self, _outcome: &ReadingOutcome) {
            self.readings += 1;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_ticks_per_period_and_stops_on_drop() {
        let shared = Arc::new(RwLock::new(CountingHost {
            monitor: monitor(&["A", "B"]),
            readings: 0,
        }));
        let handle = spawn(
            Arc::clone(&shared),
            Duration::from_secs(60),
            DriftSimulator::with_seed(Scenario::Stable, 2),
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(shared.read().await.readings, 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(shared.read().await.readings, 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(shared.read().await.readings, 4);

        drop(handle);
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(shared.read().await.readings, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_timer() {
        let shared = Arc::new(RwLock::new(CountingHost {
            monitor: monitor(&["A"]),
            readings: 0,
        }));
        let handle = spawn(
            Arc::clone(&shared),
            Duration::from_secs(10),
            DriftSimulator::with_seed(Scenario::Stable, 4),
        );
        tokio::time::sleep(Duration::from_secs(15)).await;
        handle.stop();
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert_eq!(shared.read().await.readings, 1);
    }
}
