//! Stats manager: in-memory counters backed by an atomically replaced file.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use comply_core::persist;
use comply_core::{ComplianceError, Result};

use crate::{
    Component, ComponentStats, DailyStats, MetricsDocument, StatsSummary, DATE_FORMAT,
};

/// Per-day operation counters shared by every middleware component.
///
/// Increments happen under the document lock. Persistence snapshots the
/// document and writes it under a separate writer lock, so file writes
/// stay ordered without blocking concurrent increments.
#[derive(Debug)]
pub struct MiddlewareStatsManager {
    path: PathBuf,
    document: Mutex<MetricsDocument>,
    writer: Mutex<()>,
    read_only: bool,
}

impl MiddlewareStatsManager {
    /// Open the metrics document at `path`.
    ///
    /// A missing file starts an empty document. A file that fails to parse
    /// is quarantined and replaced by an empty document.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = load_document(&path)?;

        Ok(Self {
            path,
            document: Mutex::new(document),
            writer: Mutex::new(()),
            read_only: false,
        })
    }

    /// Open the metrics document for inspection. The file is never moved
    /// or written: a document that fails to parse is a `Corruption` error
    /// and [`flush`](Self::flush) is refused.
    pub fn open_read_only(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let document = match read_document(&path)? {
            Some(Ok(doc)) => doc,
            Some(Err(parse_err)) => {
                return Err(ComplianceError::Corruption {
                    path,
                    reason: parse_err.to_string(),
                    quarantined_to: None,
                });
            }
            None => MetricsDocument::empty(),
        };

        Ok(Self {
            path,
            document: Mutex::new(document),
            writer: Mutex::new(()),
            read_only: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Count one operation for `component` in today's bucket.
    ///
    /// With `persist` the whole document is written before returning;
    /// batched callers pass `false` and call [`flush`](Self::flush) later.
    pub fn record_operation(
        &self,
        component: impl Into<Component>,
        is_error: bool,
        persist: bool,
    ) -> Result<()> {
        self.record_operation_at(Utc::now(), component, is_error, persist)
    }

    /// Same as [`record_operation`](Self::record_operation) with an explicit clock.
    pub fn record_operation_at(
        &self,
        at: DateTime<Utc>,
        component: impl Into<Component>,
        is_error: bool,
        persist: bool,
    ) -> Result<()> {
        let component = component.into();
        {
            let mut doc = self.document.lock();
            let bucket = doc.history.entry(date_key(at)).or_default();
            bucket.total_operations = bucket.total_operations.saturating_add(1);
            if is_error {
                bucket.total_errors = bucket.total_errors.saturating_add(1);
            }
            let counter = bucket.components.entry(component.counter_key()).or_insert(0);
            *counter = counter.saturating_add(1);
            doc.last_updated = at;
        }

        if persist {
            self.flush()?;
        }
        Ok(())
    }

    /// Write the current document to disk atomically.
    pub fn flush(&self) -> Result<()> {
        if self.read_only {
            return Err(ComplianceError::Validation(format!(
                "metrics document {} was opened read-only",
                self.path.display()
            )));
        }
        let _writer = self.writer.lock();
        let snapshot = self.document.lock().clone();
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        persist::write_atomic(&self.path, &bytes)?;

        tracing::trace!(path = %self.path.display(), "Metrics document persisted");
        Ok(())
    }

    /// Copy of the whole in-memory document.
    pub fn snapshot(&self) -> MetricsDocument {
        self.document.lock().clone()
    }

    pub fn get_summary(&self) -> StatsSummary {
        self.summary_at(Utc::now())
    }

    pub fn summary_at(&self, at: DateTime<Utc>) -> StatsSummary {
        let doc = self.document.lock();
        let date = date_key(at);

        let (total_operations, total_errors) =
            doc.history.values().fold((0u64, 0u64), |(ops, errs), day| {
                (
                    ops.saturating_add(day.total_operations),
                    errs.saturating_add(day.total_errors),
                )
            });

        let error_rate = if total_operations == 0 {
            0.0
        } else {
            total_errors as f64 / total_operations as f64
        };

        StatsSummary {
            today: doc.history.get(&date).cloned().unwrap_or_default(),
            date,
            days_tracked: doc.history.len(),
            total_operations,
            total_errors,
            error_rate,
            last_updated: doc.last_updated,
        }
    }

    pub fn get_component_stats(&self, component: impl Into<Component>) -> ComponentStats {
        self.component_stats_at(Utc::now(), component)
    }

    pub fn component_stats_at(
        &self,
        at: DateTime<Utc>,
        component: impl Into<Component>,
    ) -> ComponentStats {
        let component = component.into();
        let key = component.counter_key();
        let doc = self.document.lock();

        let by_day: std::collections::BTreeMap<String, u64> = doc
            .history
            .iter()
            .filter_map(|(date, day)| day.components.get(&key).map(|n| (date.clone(), *n)))
            .collect();

        ComponentStats {
            component: component.to_string(),
            today: by_day.get(&date_key(at)).copied().unwrap_or(0),
            total: by_day.values().fold(0u64, |acc, n| acc.saturating_add(*n)),
            counter_key: key,
            by_day,
        }
    }

    /// Bucket for a specific date key, if any operations were recorded.
    pub fn day(&self, date: &str) -> Option<DailyStats> {
        self.document.lock().history.get(date).cloned()
    }
}

/// A component's handle on the shared stats manager.
///
/// Recording never fails the caller: counters are not audit-critical, so a
/// persistence failure is logged and the operation proceeds.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    manager: Arc<MiddlewareStatsManager>,
    persist: bool,
}

impl StatsHandle {
    pub fn new(manager: Arc<MiddlewareStatsManager>, persist: bool) -> Self {
        Self { manager, persist }
    }

    pub fn record(&self, component: Component, is_error: bool) {
        if let Err(e) = self
            .manager
            .record_operation(component.clone(), is_error, self.persist)
        {
            tracing::warn!(
                component = %component,
                error = %e,
                "Failed to persist middleware stats"
            );
        }
    }

    pub fn manager(&self) -> &Arc<MiddlewareStatsManager> {
        &self.manager
    }
}

fn date_key(at: DateTime<Utc>) -> String {
    at.format(DATE_FORMAT).to_string()
}

/// `None` if there is no document yet.
fn read_document(path: &Path) -> Result<Option<serde_json::Result<MetricsDocument>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ComplianceError::persistence(path, e)),
    }
}

fn load_document(path: &Path) -> Result<MetricsDocument> {
    match read_document(path)? {
        None => {
            tracing::debug!(path = %path.display(), "No metrics document, starting empty");
            Ok(MetricsDocument::empty())
        }
        Some(Ok(doc)) => Ok(doc),
        Some(Err(parse_err)) => {
            let quarantined_to = persist::quarantine(path)?;
            let corruption = ComplianceError::Corruption {
                path: path.to_path_buf(),
                reason: parse_err.to_string(),
                quarantined_to: Some(quarantined_to),
            };
            tracing::error!(
                details = ?corruption.details(),
                "Metrics document unreadable, starting a fresh one"
            );

            let fresh = MetricsDocument::empty();
            persist::write_atomic(path, &serde_json::to_vec_pretty(&fresh)?)?;
            Ok(fresh)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap()
    }

    #[test]
    fn pii_error_increments_exactly_its_counters() {
        let dir = tempfile::tempdir().unwrap();
        let stats = MiddlewareStatsManager::open(dir.path().join("stats.json")).unwrap();

        stats.record_operation_at(at(1), "policy", false, true).unwrap();
        let before = stats.day("2026-03-01").unwrap();

        stats.record_operation_at(at(1), "pii", true, true).unwrap();
        let after = stats.day("2026-03-01").unwrap();

        assert_eq!(after.component(&Component::Pii), before.component(&Component::Pii) + 1);
        assert_eq!(after.total_errors, before.total_errors + 1);
        assert_eq!(after.total_operations, before.total_operations + 1);
        assert_eq!(
            after.component(&Component::Policy),
            before.component(&Component::Policy)
        );
        assert_eq!(after.components.len(), 2);
    }

    #[test]
    fn buckets_are_created_per_day() {
        let dir = tempfile::tempdir().unwrap();
        let stats = MiddlewareStatsManager::open(dir.path().join("stats.json")).unwrap();

        stats.record_operation_at(at(1), "worm", false, false).unwrap();
        stats.record_operation_at(at(2), "worm", false, false).unwrap();
        stats.record_operation_at(at(2), "worm", true, false).unwrap();

        let summary = stats.summary_at(at(2));
        assert_eq!(summary.date, "2026-03-02");
        assert_eq!(summary.days_tracked, 2);
        assert_eq!(summary.today.total_operations, 2);
        assert_eq!(summary.total_operations, 3);
        assert_eq!(summary.total_errors, 1);

        let worm = stats.component_stats_at(at(2), Component::Worm);
        assert_eq!(worm.counter_key, "worm_events");
        assert_eq!(worm.today, 2);
        assert_eq!(worm.total, 3);
        assert_eq!(worm.by_day.len(), 2);
    }

    #[test]
    fn deferred_increments_persist_on_flush() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = MiddlewareStatsManager::open(&path).unwrap();

        stats.record_operation_at(at(5), "provenance", false, false).unwrap();
        assert!(!path.exists());

        stats.flush().unwrap();
        drop(stats);

        let reopened = MiddlewareStatsManager::open(&path).unwrap();
        assert_eq!(
            reopened.day("2026-03-05").unwrap().component(&Component::Provenance),
            1
        );
    }

    #[test]
    fn persisted_document_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = MiddlewareStatsManager::open(&path).unwrap();
        stats.record_operation_at(at(7), "pii", true, true).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["version"], "1.0");
        assert!(json["last_updated"].is_string());
        assert_eq!(json["history"]["2026-03-07"]["total_operations"], 1);
        assert_eq!(json["history"]["2026-03-07"]["total_errors"], 1);
        assert_eq!(json["history"]["2026-03-07"]["pii_scans"], 1);
    }

    #[test]
    fn read_only_open_never_touches_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, "{ broken").unwrap();

        let err = MiddlewareStatsManager::open_read_only(&path).unwrap_err();
        assert_eq!(err.kind(), comply_core::ErrorKind::Corruption);
        assert_eq!(fs::read_to_string(&path).unwrap(), "{ broken");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);

        let writer = MiddlewareStatsManager::open(dir.path().join("good.json")).unwrap();
        writer.record_operation_at(at(2), "worm", false, true).unwrap();

        let reader = MiddlewareStatsManager::open_read_only(dir.path().join("good.json")).unwrap();
        assert_eq!(reader.day("2026-03-02").unwrap().component(&Component::Worm), 1);
        assert!(reader.flush().is_err());
    }

    #[test]
    fn corrupt_document_is_quarantined_not_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        fs::write(&path, b"{\"history\": {truncated").unwrap();

        let stats = MiddlewareStatsManager::open(&path).unwrap();
        assert_eq!(stats.snapshot().history.len(), 0);

        let quarantined: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("stats.json.corrupt-")
            })
            .collect();
        assert_eq!(quarantined.len(), 1);
        assert_eq!(
            fs::read(quarantined[0].path()).unwrap(),
            b"{\"history\": {truncated"
        );

        // The fresh document is valid on disk.
        let reopened = MiddlewareStatsManager::open(&path).unwrap();
        assert_eq!(reopened.snapshot().version, "1.0");
    }

    #[test]
    fn stale_temp_file_from_interrupted_write_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = MiddlewareStatsManager::open(&path).unwrap();
        stats.record_operation_at(at(9), "pii", false, true).unwrap();
        drop(stats);

        // A crash between staging and rename leaves only a temp file behind.
        fs::write(dir.path().join(".stats.json.deadbeef.tmp"), b"{\"partial").unwrap();

        let reopened = MiddlewareStatsManager::open(&path).unwrap();
        assert_eq!(reopened.day("2026-03-09").unwrap().total_operations, 1);
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let stats = Arc::new(MiddlewareStatsManager::open(&path).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let stats = Arc::clone(&stats);
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        stats.record_operation_at(at(10), "worm", false, true).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let reopened = MiddlewareStatsManager::open(&path).unwrap();
        let day = reopened.day("2026-03-10").unwrap();
        assert_eq!(day.total_operations, 200);
        assert_eq!(day.component(&Component::Worm), 200);
    }
}
