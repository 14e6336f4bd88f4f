//! Configuration for the compliance middleware.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`COMPLY_COMPLIANCE__` prefix)
//! 2. Config file (`comply.toml`, `[compliance]` section)
//! 3. Defaults

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{ComplianceError, Result};

/// Top-level middleware configuration.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MiddlewareConfig {
    /// Policy document (YAML, TOML or JSON, chosen by extension).
    #[serde(default = "default_policy_path")]
    pub policy_path: PathBuf,

    /// Directory holding one signed file per Decision Record.
    #[serde(default = "default_decisions_dir")]
    pub decisions_dir: PathBuf,

    /// Directory holding the append-only WORM event log.
    #[serde(default = "default_events_dir")]
    pub events_dir: PathBuf,

    /// Directory holding provenance traces.
    #[serde(default = "default_provenance_dir")]
    pub provenance_dir: PathBuf,

    /// Metrics document for daily operation counters.
    #[serde(default = "default_metrics_path")]
    pub metrics_path: PathBuf,

    /// Hex-encoded Ed25519 seed used to sign Decision Records.
    /// Generated on first start if missing.
    #[serde(default = "default_signing_key_path")]
    pub signing_key_path: PathBuf,

    /// Number of characters of masked input/output kept in provenance
    /// traces. Zero disables previews.
    #[serde(default)]
    pub provenance_preview_chars: usize,

    /// Persist the metrics document after every counted operation.
    #[serde(default = "default_true")]
    pub persist_stats: bool,
}

fn default_policy_path() -> PathBuf {
    PathBuf::from("./config/policy.yaml")
}

fn default_decisions_dir() -> PathBuf {
    PathBuf::from("./audit/decisions")
}

fn default_events_dir() -> PathBuf {
    PathBuf::from("./audit/events")
}

fn default_provenance_dir() -> PathBuf {
    PathBuf::from("./audit/provenance")
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("./metrics/middleware_stats.json")
}

fn default_signing_key_path() -> PathBuf {
    PathBuf::from("./keys/dr_signing.key")
}

fn default_true() -> bool {
    true
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            policy_path: default_policy_path(),
            decisions_dir: default_decisions_dir(),
            events_dir: default_events_dir(),
            provenance_dir: default_provenance_dir(),
            metrics_path: default_metrics_path(),
            signing_key_path: default_signing_key_path(),
            provenance_preview_chars: 0,
            persist_stats: default_true(),
        }
    }
}

impl MiddlewareConfig {
    /// Load configuration from `<file_prefix>.{toml,yaml,json}` and the
    /// environment. A missing `[compliance]` section yields the defaults;
    /// a malformed one is a configuration error.
    pub fn load(file_prefix: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("COMPLY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ComplianceError::configuration(e.to_string()))?;

        match cfg.get::<MiddlewareConfig>("compliance") {
            Ok(c) => Ok(c),
            Err(config::ConfigError::NotFound(_)) => Ok(Self::default()),
            Err(e) => Err(ComplianceError::configuration(e.to_string())),
        }
    }

    /// Re-root every relative path under `root`. Used by tests and by
    /// deployments that keep all state in one data directory.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            policy_path: root.join("config/policy.yaml"),
            decisions_dir: root.join("audit/decisions"),
            events_dir: root.join("audit/events"),
            provenance_dir: root.join("audit/provenance"),
            metrics_path: root.join("metrics/middleware_stats.json"),
            signing_key_path: root.join("keys/dr_signing.key"),
            ..Self::default()
        }
    }
}
