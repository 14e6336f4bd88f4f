//! comply-stats: Per-day operation counters for the compliance middleware.
//!
//! Every component records one operation per call. Counters are kept in a
//! date-keyed history and persisted as a single JSON document that is
//! rewritten atomically, so a crash never leaves it half-written.

pub mod manager;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use manager::{MiddlewareStatsManager, StatsHandle};

/// Metrics document schema version.
pub const METRICS_VERSION: &str = "1.0";

/// Date format used for history keys.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ── Components ───────────────────────────────────────────────────

/// A component that reports operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Component {
    Policy,
    Pii,
    Worm,
    DecisionRecord,
    Provenance,
    /// Any other caller; counted under `<name>_ops`.
    Other(String),
}

impl Component {
    /// The counter key used in a daily bucket.
    pub fn counter_key(&self) -> String {
        match self {
            Self::Policy => "policy_checks".to_string(),
            Self::Pii => "pii_scans".to_string(),
            Self::Worm => "worm_events".to_string(),
            Self::DecisionRecord => "dr_created".to_string(),
            Self::Provenance => "provenance_traces".to_string(),
            Self::Other(name) => format!("{name}_ops"),
        }
    }
}

impl From<&str> for Component {
    fn from(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "policy" => Self::Policy,
            "pii" => Self::Pii,
            "worm" => Self::Worm,
            "decision_record" | "dr" => Self::DecisionRecord,
            "provenance" => Self::Provenance,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Policy => f.write_str("policy"),
            Self::Pii => f.write_str("pii"),
            Self::Worm => f.write_str("worm"),
            Self::DecisionRecord => f.write_str("decision_record"),
            Self::Provenance => f.write_str("provenance"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

// ── Document ─────────────────────────────────────────────────────

/// Counters for one calendar day.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyStats {
    pub total_operations: u64,
    pub total_errors: u64,
    /// Per-component counters keyed by [`Component::counter_key`].
    #[serde(flatten)]
    pub components: BTreeMap<String, u64>,
}

impl DailyStats {
    pub fn component(&self, component: &Component) -> u64 {
        self.components
            .get(&component.counter_key())
            .copied()
            .unwrap_or(0)
    }
}

/// The persisted metrics document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsDocument {
    pub last_updated: DateTime<Utc>,
    pub version: String,
    pub history: BTreeMap<String, DailyStats>,
}

impl MetricsDocument {
    pub fn empty() -> Self {
        Self {
            last_updated: Utc::now(),
            version: METRICS_VERSION.to_string(),
            history: BTreeMap::new(),
        }
    }
}

// ── Projections ──────────────────────────────────────────────────

/// Read-only overview of the current counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSummary {
    /// Date key of the current bucket.
    pub date: String,
    pub today: DailyStats,
    pub days_tracked: usize,
    pub total_operations: u64,
    pub total_errors: u64,
    /// Errors per operation across all days (0.0 when nothing was recorded).
    pub error_rate: f64,
    pub last_updated: DateTime<Utc>,
}

/// Counters for a single component.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ComponentStats {
    pub component: String,
    pub counter_key: String,
    pub today: u64,
    pub total: u64,
    pub by_day: BTreeMap<String, u64>,
}
