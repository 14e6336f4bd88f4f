//! Builder for the unsigned content of a Decision Record.
//!
//! ```no_run
//! # use comply_audit::{DecisionDraft, DecisionRecordManager, DrSigningKey};
//! # use comply_audit::canonical::fingerprint;
//! # fn main() -> comply_core::Result<()> {
//! let manager = DecisionRecordManager::new("./audit/decisions", DrSigningKey::generate())?;
//! let draft = DecisionDraft::new(
//!     "support-agent",
//!     "ticket-8812",
//!     "Issue refund of 40 EUR",
//!     &fingerprint("Customer asks for a refund on order 1234"),
//! )
//! .with_policy_version("2026.10")
//! .with_tools(["lookup_order", "issue_refund"])
//! .with_alternatives(["Escalate to a human"])
//! .with_reasoning_markers(["order_within_return_window"]);
//!
//! let record = manager.create_dr(draft)?;
//! assert!(record.verify(&manager.public_key()));
//! # Ok(())
//! # }
//! ```

/// Everything a caller supplies for a Decision Record. The manager adds
/// `dr_id`, `timestamp` and `signature`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionDraft {
    pub actor: String,
    pub task_id: String,
    pub decision: String,
    pub prompt_hash: String,
    pub policy_version: Option<String>,
    pub model_fingerprint: Option<String>,
    pub tools_used: Vec<String>,
    pub alternatives_considered: Vec<String>,
    pub reasoning_markers: Vec<String>,
}

impl DecisionDraft {
    pub fn new(actor: &str, task_id: &str, decision: &str, prompt_hash: &str) -> Self {
        Self {
            actor: actor.to_string(),
            task_id: task_id.to_string(),
            decision: decision.to_string(),
            prompt_hash: prompt_hash.to_string(),
            ..Default::default()
        }
    }

    pub fn with_policy_version(mut self, version: &str) -> Self {
        self.policy_version = Some(version.to_string());
        self
    }

    pub fn with_model_fingerprint(mut self, fingerprint: &str) -> Self {
        self.model_fingerprint = Some(fingerprint.to_string());
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools_used.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn with_alternatives<I, S>(mut self, alternatives: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.alternatives_considered
            .extend(alternatives.into_iter().map(Into::into));
        self
    }

    pub fn with_reasoning_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reasoning_markers
            .extend(markers.into_iter().map(Into::into));
        self
    }
}
