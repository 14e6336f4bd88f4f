//! Wiring for the full middleware.
//!
//! [`ComplianceMiddleware::init`] builds every component from one
//! [`MiddlewareConfig`] and hands them a shared stats manager. There is no
//! global instance: callers own the bundle and pass references around.

use std::sync::Arc;

use comply_core::{MiddlewareConfig, Result};
use comply_policy::{PiiDetector, PiiMasker, PolicyEngine};
use comply_stats::{MiddlewareStatsManager, StatsHandle};

use crate::provenance::ProvenanceTracker;
use crate::signing::DrSigningKey;
use crate::store::DecisionRecordManager;
use crate::worm::WormLogger;

pub struct ComplianceMiddleware {
    pub policy: PolicyEngine,
    pub detector: PiiDetector,
    pub masker: PiiMasker,
    pub decisions: DecisionRecordManager,
    pub events: WormLogger,
    pub provenance: ProvenanceTracker,
    stats: Arc<MiddlewareStatsManager>,
}

impl ComplianceMiddleware {
    /// Build all components.
    ///
    /// The policy falls back to the restrictive default rather than
    /// failing. Audit storage does not: if the signing key, decisions,
    /// events or provenance directories can't be opened, this fails.
    pub fn init(config: &MiddlewareConfig) -> Result<Self> {
        let stats = Arc::new(MiddlewareStatsManager::open(&config.metrics_path)?);
        let handle = StatsHandle::new(Arc::clone(&stats), config.persist_stats);

        let policy = PolicyEngine::load(&config.policy_path).with_stats(handle.clone());
        let detector = PiiDetector::new().with_stats(handle.clone());
        let masker = PiiMasker::with_detector(detector.clone());

        let signing_key = DrSigningKey::load_or_generate(&config.signing_key_path)?;
        let decisions =
            DecisionRecordManager::new(&config.decisions_dir, signing_key)?.with_stats(handle.clone());
        let events = WormLogger::open(&config.events_dir)?.with_stats(handle.clone());
        let provenance = ProvenanceTracker::new(&config.provenance_dir)?
            .with_previews(config.provenance_preview_chars, masker.clone())
            .with_stats(handle);

        tracing::info!(
            policy_version = policy.policy_version(),
            policy_fallback = policy.is_fallback(),
            public_key = %decisions.public_key(),
            next_event = events.next_sequence(),
            "Compliance middleware initialised"
        );

        Ok(Self {
            policy,
            detector,
            masker,
            decisions,
            events,
            provenance,
            stats,
        })
    }

    pub fn stats(&self) -> &Arc<MiddlewareStatsManager> {
        &self.stats
    }

    /// Persist any deferred counters. Audit artifacts are already durable.
    pub fn shutdown(self) -> Result<()> {
        self.stats.flush()?;
        tracing::info!("Compliance middleware shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecisionDraft;
    use crate::worm::EventLevel;
    use comply_stats::Component;
    use serde_json::json;

    #[test]
    fn init_wires_components_to_shared_stats() {
        let dir = tempfile::tempdir().unwrap();
        let config = MiddlewareConfig::rooted_at(dir.path());
        let mw = ComplianceMiddleware::init(&config).unwrap();

        // No policy file under the root: restrictive fallback.
        assert!(mw.policy.is_fallback());
        assert!(!mw.policy.is_network_allowed());

        assert!(mw.detector.contains_pii("call 555-123-4567"));
        let dr = mw
            .decisions
            .create_dr(DecisionDraft::new("agent", "t-1", "answer", "h"))
            .unwrap();
        mw.events
            .log_event("agent", "decided", EventLevel::Info, None, Some("t-1"), json!({ "dr_id": dr.dr_id }))
            .unwrap();
        mw.provenance.track_generation("c-1", "in", "out").unwrap();

        let today = mw.stats().get_summary().today;
        assert_eq!(today.component(&Component::Policy), 1);
        assert_eq!(today.component(&Component::Pii), 1);
        assert_eq!(today.component(&Component::DecisionRecord), 1);
        assert_eq!(today.component(&Component::Worm), 1);
        assert_eq!(today.component(&Component::Provenance), 1);
        assert_eq!(today.total_operations, 5);

        mw.shutdown().unwrap();
        assert!(config.metrics_path.is_file());
        assert!(config.signing_key_path.is_file());
    }

    #[test]
    fn signing_key_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = MiddlewareConfig::rooted_at(dir.path());

        let first = ComplianceMiddleware::init(&config).unwrap();
        let dr = first
            .decisions
            .create_dr(DecisionDraft::new("agent", "t-1", "answer", "h"))
            .unwrap();
        first.shutdown().unwrap();

        let second = ComplianceMiddleware::init(&config).unwrap();
        assert!(second.decisions.verify_stored(&dr.dr_id).unwrap());
    }
}
