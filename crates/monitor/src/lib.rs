//! Cold-chain temperature monitoring core: zones with threshold bands, a
//! status classifier, an alert ledger and a drift simulator standing in for
//! live sensors.

pub mod classify;
pub mod drift;
pub mod error;
pub mod ledger;
pub mod monitor;
pub mod zone;

pub use classify::{classify, Policy, Status, StatusFilter, Tone, Trend};
pub use drift::{DriftHandle, DriftSimulator, MonitorHost, Scenario};
pub use error::{MonitorError, Result};
pub use ledger::{AlertEvent, AlertFilter, AlertLedger, AlertType, Severity};
pub use monitor::{Monitor, ReadingOutcome, Summary};
pub use zone::{TemperatureZone, ZoneRegistry, ZoneSpec};
