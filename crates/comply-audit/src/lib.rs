//! comply-audit: Tamper-evident audit trail for autonomous decisions.
//!
//! Decision Records capture a single autonomous decision: who decided, on
//! which task, what was chosen, which tools and alternatives were involved.
//! Each record is signed with Ed25519 over a pinned canonical encoding and
//! stored write-once under the decisions directory.
//!
//! Alongside records, the [`worm`] module keeps a hash-chained append-only
//! event log and [`provenance`] links generated outputs back to their inputs
//! by content fingerprint.

pub mod canonical;
pub mod draft;
pub mod middleware;
pub mod provenance;
pub mod signing;
pub mod store;
pub mod worm;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use draft::DecisionDraft;
pub use middleware::ComplianceMiddleware;
pub use provenance::{ProvenanceTrace, ProvenanceTracker, TraceLink};
pub use signing::{DrPublicKey, DrSigningKey};
pub use store::{DecisionRecordManager, DrQuery};
pub use worm::{ChainReport, EventLevel, EventQuery, WormEntry, WormLogger};

// ── Core Types ───────────────────────────────────────────────────

/// A signed, immutable record of one autonomous decision.
///
/// Records are never edited once persisted. A correction is a new record
/// whose `supersedes` names the record it replaces.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionRecord {
    /// `dr_<UTC timestamp>_<16 hex chars of randomness>`.
    pub dr_id: String,
    /// Agent or subsystem that made the decision.
    pub actor: String,
    pub task_id: String,
    /// What was decided.
    pub decision: String,
    /// Fingerprint of the prompt the decision was made on.
    pub prompt_hash: String,
    pub policy_version: Option<String>,
    pub model_fingerprint: Option<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
    #[serde(default)]
    pub alternatives_considered: Vec<String>,
    #[serde(default)]
    pub reasoning_markers: Vec<String>,
    /// The record this one corrects, if any.
    #[serde(default)]
    pub supersedes: Option<String>,
    /// Creation time, truncated to microseconds.
    pub timestamp: DateTime<Utc>,
    /// `ed25519:<hex>` over [`canonical::canonical_bytes`].
    pub signature: String,
}

impl DecisionRecord {
    /// The exact bytes covered by the signature.
    pub fn canonical_bytes(&self) -> comply_core::Result<Vec<u8>> {
        canonical::canonical_bytes(self)
    }

    /// Check the signature against `public_key`. Never fails: any mismatch,
    /// malformed signature or unknown algorithm yields `false`.
    pub fn verify(&self, public_key: &DrPublicKey) -> bool {
        match self.canonical_bytes() {
            Ok(bytes) => signing::verify_signature(&bytes, &self.signature, public_key),
            Err(_) => false,
        }
    }
}
