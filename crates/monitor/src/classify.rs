//! Zone health classification: status from a reading and its threshold band,
//! trend from consecutive readings, and the display tones derived from both.
//!
//! Everything here is pure. The registry calls into it on every reading and
//! the HTTP layer only serialises what comes out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default distance (°C) past a bound at which a breach becomes critical.
pub const DEFAULT_CRITICAL_MARGIN: f64 = 2.0;

/// Default dead-band (°C) below which a change counts as stable.
pub const DEFAULT_TREND_DEADBAND: f64 = 0.05;

/// Readings outside this range are treated as a sensor fault, not a
/// temperature.
pub const PLAUSIBLE_RANGE: (f64, f64) = (-80.0, 60.0);

/// Slack for margin comparisons. Readings are reported to 0.1 °C, so a
/// nominal 0.05 step can land a few ulps past the dead-band.
const EPSILON: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Status / trend
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Colour family a front end should use for a badge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    Success,
    Warning,
    Destructive,
    Info,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }

    pub fn tone(self) -> Tone {
        match self {
            Self::Normal => Tone::Success,
            Self::Warning => Tone::Warning,
            Self::Critical => Tone::Destructive,
        }
    }

    pub fn is_breach(self) -> bool {
        self != Self::Normal
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(Self::Normal),
            "warning" => Ok(Self::Warning),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unknown status '{other}'")),
        }
    }
}

impl Trend {
    /// Arrow direction for the trend icon.
    pub fn indicator(self) -> &'static str {
        match self {
            Self::Increasing => "up",
            Self::Decreasing => "down",
            Self::Stable => "steady",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increasing => write!(f, "increasing"),
            Self::Decreasing => write!(f, "decreasing"),
            Self::Stable => write!(f, "stable"),
        }
    }
}

/// Status selector used by zone listings. `All` matches every zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    All,
    Only(Status),
}

impl StatusFilter {
    pub fn matches(self, status: Status) -> bool {
        match self {
            Self::All => true,
            Self::Only(s) => s == status,
        }
    }
}

impl FromStr for StatusFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            Ok(Self::All)
        } else {
            s.parse().map(Self::Only)
        }
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Tunables shared by every zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Policy {
    pub critical_margin: f64,
    pub trend_deadband: f64,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            critical_margin: DEFAULT_CRITICAL_MARGIN,
            trend_deadband: DEFAULT_TREND_DEADBAND,
        }
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    Min,
    Max,
}

/// Which side of the band a reading left, and by how much.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Breach {
    pub bound: Bound,
    pub threshold: f64,
    pub excess: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Classification {
    pub status: Status,
    pub breach: Option<Breach>,
}

/// Classify `temp` against `[min, max]`.
///
/// Equality with a bound is in-band. Once out of band, a reading further than
/// `policy.critical_margin` from the breached bound is critical.
pub fn classify(temp: f64, min: f64, max: f64, policy: &Policy) -> Classification {
    let breach = if temp > max {
        Some(Breach {
            bound: Bound::Max,
            threshold: max,
            excess: temp - max,
        })
    } else if temp < min {
        Some(Breach {
            bound: Bound::Min,
            threshold: min,
            excess: min - temp,
        })
    } else {
        None
    };

    let status = match breach {
        None => Status::Normal,
        Some(b) if b.excess > policy.critical_margin + EPSILON => Status::Critical,
        Some(_) => Status::Warning,
    };

    Classification { status, breach }
}

/// Trend between two consecutive readings with a symmetric dead-band.
pub fn trend_between(previous: f64, current: f64, deadband: f64) -> Trend {
    let delta = current - previous;
    if delta > deadband + EPSILON {
        Trend::Increasing
    } else if delta < -(deadband + EPSILON) {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

/// Whether a raw reading can be a real freezer temperature.
pub fn is_plausible(temp: f64) -> bool {
    temp.is_finite() && (PLAUSIBLE_RANGE.0..=PLAUSIBLE_RANGE.1).contains(&temp)
}

// ===========================================================================
// Tests
// ===========================================================================
