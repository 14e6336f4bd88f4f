//! Provenance traces: link generated output back to its input.
//!
//! Only BLAKE3 fingerprints are stored, never the raw content. Optional
//! previews are PII-masked before truncation so a redaction is never
//! split into an unmatched fragment.
//!
//! Traces are stored write-once in a date tree:
//! ```text
//! {root}/
//!   2026/
//!     10/
//!       15/
//!         {trace_id}.json
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use comply_core::persist;
use comply_core::{ComplianceError, Result};
use comply_policy::PiiMasker;
use comply_stats::{Component, StatsHandle};

use crate::canonical::fingerprint;

/// Weak reference from a trace to another audit artifact. The target is
/// not required to exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TraceLink {
    /// A Decision Record id.
    Decision(String),
    /// A WORM event sequence number.
    Event(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceTrace {
    pub trace_id: Uuid,
    pub conversation_id: String,
    pub input_fingerprint: String,
    pub output_fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_preview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_preview: Option<String>,
    #[serde(default)]
    pub links: Vec<TraceLink>,
    pub timestamp: DateTime<Utc>,
}

pub struct ProvenanceTracker {
    root: PathBuf,
    /// Preview length in characters and the masker applied first.
    previews: Option<(usize, PiiMasker)>,
    stats: Option<StatsHandle>,
}

impl ProvenanceTracker {
    /// Create a tracker rooted at `root`, creating the directory if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| ComplianceError::persistence(&root, e))?;
        Ok(Self {
            root,
            previews: None,
            stats: None,
        })
    }

    /// Store masked previews of at most `chars` characters. Zero disables
    /// previews.
    pub fn with_previews(mut self, chars: usize, masker: PiiMasker) -> Self {
        self.previews = (chars > 0).then_some((chars, masker));
        self
    }

    pub fn with_stats(mut self, stats: StatsHandle) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn track_generation(&self, conversation_id: &str, input: &str, output: &str) -> Result<Uuid> {
        self.track_generation_linked(conversation_id, input, output, Vec::new())
    }

    /// Record a trace carrying references to related records or events.
    pub fn track_generation_linked(
        &self,
        conversation_id: &str,
        input: &str,
        output: &str,
        links: Vec<TraceLink>,
    ) -> Result<Uuid> {
        let result = self.save(conversation_id, input, output, links);
        if let Some(stats) = &self.stats {
            stats.record(Component::Provenance, result.is_err());
        }
        result
    }

    /// Load a trace by id. Fails with `NotFound` if there is none.
    pub fn get_trace(&self, trace_id: Uuid) -> Result<ProvenanceTrace> {
        let filename = format!("{trace_id}.json");
        let path = find_file_recursive(&self.root, &filename)
            .ok_or_else(|| ComplianceError::not_found("provenance trace", trace_id.to_string()))?;
        read_trace(&path)
    }

    /// All traces of a conversation, oldest first.
    pub fn traces_for_conversation(&self, conversation_id: &str) -> Result<Vec<ProvenanceTrace>> {
        self.collect(|t| t.conversation_id == conversation_id)
    }

    /// Traces whose output fingerprint matches `output`, oldest first.
    pub fn find_by_output(&self, output: &str) -> Result<Vec<ProvenanceTrace>> {
        let wanted = fingerprint(output);
        self.collect(|t| t.output_fingerprint == wanted)
    }

    fn save(
        &self,
        conversation_id: &str,
        input: &str,
        output: &str,
        links: Vec<TraceLink>,
    ) -> Result<Uuid> {
        let trace = ProvenanceTrace {
            trace_id: Uuid::new_v4(),
            conversation_id: conversation_id.to_string(),
            input_fingerprint: fingerprint(input),
            output_fingerprint: fingerprint(output),
            input_preview: self.preview(input),
            output_preview: self.preview(output),
            links,
            timestamp: Utc::now(),
        };

        let path = self.trace_path(&trace);
        let json = serde_json::to_vec_pretty(&trace)?;
        persist::write_once(&path, &json)?;

        tracing::info!(
            trace_id = %trace.trace_id,
            conversation_id = %trace.conversation_id,
            links = trace.links.len(),
            "Provenance trace recorded"
        );

        Ok(trace.trace_id)
    }

    fn preview(&self, text: &str) -> Option<String> {
        let (chars, masker) = self.previews.as_ref()?;
        Some(masker.mask_text(text).chars().take(*chars).collect())
    }

    fn trace_path(&self, trace: &ProvenanceTrace) -> PathBuf {
        let date = trace.timestamp.format("%Y/%m/%d");
        self.root.join(format!("{}/{}.json", date, trace.trace_id))
    }

    fn collect(&self, keep: impl Fn(&ProvenanceTrace) -> bool) -> Result<Vec<ProvenanceTrace>> {
        let mut results = Vec::new();
        collect_traces_recursive(&self.root, &keep, &mut results)?;
        results.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(results)
    }
}

fn read_trace(path: &Path) -> Result<ProvenanceTrace> {
    let json = fs::read_to_string(path).map_err(|e| ComplianceError::persistence(path, e))?;
    serde_json::from_str(&json).map_err(|e| ComplianceError::Corruption {
        path: path.to_path_buf(),
        reason: e.to_string(),
        quarantined_to: None,
    })
}

fn find_file_recursive(dir: &Path, filename: &str) -> Option<PathBuf> {
    if !dir.is_dir() {
        return None;
    }

    let entries = fs::read_dir(dir).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_file_recursive(&path, filename) {
                return Some(found);
            }
        } else if path.file_name().and_then(|n| n.to_str()) == Some(filename) {
            return Some(path);
        }
    }

    None
}

fn collect_traces_recursive(
    dir: &Path,
    keep: &impl Fn(&ProvenanceTrace) -> bool,
    results: &mut Vec<ProvenanceTrace>,
) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    let entries = fs::read_dir(dir).map_err(|e| ComplianceError::persistence(dir, e))?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_traces_recursive(&path, keep, results)?;
        } else if path.extension().and_then(|e| e.to_str()) == Some("json") {
            let trace = read_trace(&path)?;
            if keep(&trace) {
                results.push(trace);
            }
        }
    }

    Ok(())
}
