//! Decision Record storage.
//!
//! Records are stored as one JSON file per record:
//! ```text
//! {root}/
//!   dr_20261015T093000123456Z_5f0c2a9e41d7b3c8.json
//!   dr_20261015T093001004211Z_a1b2c3d4e5f60718.json
//! ```
//!
//! Files are written once (staged, then linked into place) and never
//! rewritten. A correction is a new record pointing at the old one.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};

use comply_core::persist;
use comply_core::{ComplianceError, ErrorKind, Result};
use comply_stats::{Component, StatsHandle};

use crate::draft::DecisionDraft;
use crate::signing::{DrPublicKey, DrSigningKey};
use crate::DecisionRecord;

/// Query parameters for listing records.
#[derive(Debug, Default)]
pub struct DrQuery {
    pub actor: Option<String>,
    pub task_id: Option<String>,
    /// Only records created at or after this time.
    pub from: Option<DateTime<Utc>>,
    /// Only records created at or before this time.
    pub to: Option<DateTime<Utc>>,
}

/// Creates, signs, persists and verifies Decision Records.
pub struct DecisionRecordManager {
    root: PathBuf,
    signing_key: DrSigningKey,
    stats: Option<StatsHandle>,
}

impl DecisionRecordManager {
    /// Create a manager rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>, signing_key: DrSigningKey) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| ComplianceError::persistence(&root, e))?;
        Ok(Self {
            root,
            signing_key,
            stats: None,
        })
    }

    pub fn with_stats(mut self, stats: StatsHandle) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn public_key(&self) -> DrPublicKey {
        self.signing_key.public_key()
    }

    /// Sign and durably persist a new record.
    ///
    /// Fails closed: if the record can't be written the error propagates
    /// and no record is returned.
    pub fn create_dr(&self, draft: DecisionDraft) -> Result<DecisionRecord> {
        let result = self.create(draft, None);
        self.record(result.is_err());
        result
    }

    /// Create a record that corrects `previous_id`, which must exist.
    pub fn supersede(&self, previous_id: &str, draft: DecisionDraft) -> Result<DecisionRecord> {
        let result = self
            .load_dr(previous_id)
            .and_then(|previous| self.create(draft, Some(previous.dr_id)));
        self.record(result.is_err());
        result
    }

    /// Load a record by id. Fails with `NotFound` if there is none.
    pub fn load_dr(&self, dr_id: &str) -> Result<DecisionRecord> {
        load_record(&self.root, dr_id)
    }

    /// Verify a record's signature. Never fails; see [`DecisionRecord::verify`].
    pub fn verify(dr: &DecisionRecord, public_key: &DrPublicKey) -> bool {
        dr.verify(public_key)
    }

    /// Load a stored record and verify it against this manager's key.
    pub fn verify_stored(&self, dr_id: &str) -> Result<bool> {
        let dr = self.load_dr(dr_id)?;
        let valid = dr.verify(&self.public_key());
        if !valid {
            tracing::error!(dr_id, "Decision Record failed signature verification");
        }
        Ok(valid)
    }

    /// List records matching `query`, newest first.
    pub fn list(&self, query: &DrQuery) -> Result<Vec<DecisionRecord>> {
        let entries = fs::read_dir(&self.root).map_err(|e| ComplianceError::persistence(&self.root, e))?;

        let mut results = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") || !stem.starts_with("dr_")
            {
                continue;
            }

            let dr = match self.load_dr(stem) {
                Ok(dr) => dr,
                Err(e) if e.kind() == ErrorKind::Corruption => {
                    tracing::error!(details = ?e.details(), "Skipping unreadable Decision Record");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if matches_query(&dr, query) {
                results.push(dr);
            }
        }

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(results)
    }

    fn create(&self, draft: DecisionDraft, supersedes: Option<String>) -> Result<DecisionRecord> {
        let timestamp = Utc::now().trunc_subsecs(6);

        let mut dr = DecisionRecord {
            dr_id: generate_dr_id(timestamp),
            actor: draft.actor,
            task_id: draft.task_id,
            decision: draft.decision,
            prompt_hash: draft.prompt_hash,
            policy_version: draft.policy_version,
            model_fingerprint: draft.model_fingerprint,
            tools_used: draft.tools_used,
            alternatives_considered: draft.alternatives_considered,
            reasoning_markers: draft.reasoning_markers,
            supersedes,
            timestamp,
            signature: String::new(),
        };
        dr.signature = self.signing_key.sign(&dr.canonical_bytes()?);

        let path = record_path(&self.root, &dr.dr_id)?;
        let json = serde_json::to_vec_pretty(&dr)?;
        persist::write_once(&path, &json)?;

        tracing::info!(
            dr_id = %dr.dr_id,
            actor = %dr.actor,
            task_id = %dr.task_id,
            supersedes = ?dr.supersedes,
            "Decision Record created"
        );

        Ok(dr)
    }

    fn record(&self, is_error: bool) {
        if let Some(stats) = &self.stats {
            stats.record(Component::DecisionRecord, is_error);
        }
    }
}

/// Read a record from a decisions directory without a signing key, for
/// verification tooling.
pub fn load_record(root: &Path, dr_id: &str) -> Result<DecisionRecord> {
    let path = record_path(root, dr_id)?;
    let json = match fs::read_to_string(&path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ComplianceError::not_found("decision record", dr_id));
        }
        Err(e) => return Err(ComplianceError::persistence(&path, e)),
    };

    serde_json::from_str(&json).map_err(|e| ComplianceError::Corruption {
        path,
        reason: e.to_string(),
        quarantined_to: None,
    })
}

fn record_path(root: &Path, dr_id: &str) -> Result<PathBuf> {
    let valid = !dr_id.is_empty()
        && dr_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !valid {
        return Err(ComplianceError::Validation(format!(
            "invalid decision record id: {dr_id:?}"
        )));
    }
    Ok(root.join(format!("{dr_id}.json")))
}

/// `dr_<%Y%m%dT%H%M%S%6fZ>_<16 hex chars>`. The random part keeps
/// concurrent creations apart without a shared counter.
fn generate_dr_id(timestamp: DateTime<Utc>) -> String {
    format!(
        "dr_{}_{:016x}",
        timestamp.format("%Y%m%dT%H%M%S%6fZ"),
        rand::random::<u64>()
    )
}

fn matches_query(dr: &DecisionRecord, query: &DrQuery) -> bool {
    if let Some(actor) = &query.actor {
        if &dr.actor != actor {
            return false;
        }
    }
    if let Some(task_id) = &query.task_id {
        if &dr.task_id != task_id {
            return false;
        }
    }
    if let Some(from) = &query.from {
        if &dr.timestamp < from {
            return false;
        }
    }
    if let Some(to) = &query.to {
        if &dr.timestamp > to {
            return false;
        }
    }
    true
}
