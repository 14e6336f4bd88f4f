//! Write-once-read-many event log.
//!
//! Events are appended to a single JSON-lines file, `{events_dir}/worm.jsonl`.
//! Every entry carries a strictly increasing `sequence_no` starting at 1 and
//! is chained to its predecessor:
//!
//! ```text
//! entry_hash = BLAKE3(canonical JSON of the entry without entry_hash)
//! prev_hash  = entry_hash of the previous entry (64 zeros for the first)
//! ```
//!
//! Editing, dropping or reordering any line breaks the chain, which
//! [`WormLogger::verify_chain`] reports.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use comply_core::persist;
use comply_core::{ComplianceError, Result};
use comply_stats::{Component, StatsHandle};

/// File name of the log inside the events directory.
pub const WORM_FILE: &str = "worm.jsonl";

/// `prev_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Severity of a logged event. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventLevel {
    type Err = ComplianceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            "critical" => Ok(Self::Critical),
            other => Err(ComplianceError::Validation(format!(
                "unknown event level: {other}"
            ))),
        }
    }
}

/// One line of the event log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WormEntry {
    pub sequence_no: u64,
    pub actor: String,
    pub event: String,
    pub level: EventLevel,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub prev_hash: String,
    pub entry_hash: String,
}

/// Hash input. Field order is the serialization order and must not change.
#[derive(Serialize)]
struct HashedFields<'a> {
    actor: &'a str,
    conversation_id: Option<&'a str>,
    event: &'a str,
    level: EventLevel,
    metadata: &'a serde_json::Value,
    prev_hash: &'a str,
    sequence_no: u64,
    task_id: Option<&'a str>,
    timestamp: String,
}

impl WormEntry {
    /// BLAKE3 over every field except `entry_hash`.
    pub fn compute_hash(&self) -> Result<String> {
        let fields = HashedFields {
            actor: &self.actor,
            conversation_id: self.conversation_id.as_deref(),
            event: &self.event,
            level: self.level,
            metadata: &self.metadata,
            prev_hash: &self.prev_hash,
            sequence_no: self.sequence_no,
            task_id: self.task_id.as_deref(),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        };
        let bytes = serde_json::to_vec(&fields)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// Filter for [`WormLogger::entries`].
#[derive(Debug, Default)]
pub struct EventQuery {
    pub actor: Option<String>,
    pub conversation_id: Option<String>,
    pub task_id: Option<String>,
    /// Only entries at this level or above.
    pub min_level: Option<EventLevel>,
}

impl EventQuery {
    fn matches(&self, entry: &WormEntry) -> bool {
        if let Some(actor) = &self.actor {
            if &entry.actor != actor {
                return false;
            }
        }
        if let Some(conversation_id) = &self.conversation_id {
            if entry.conversation_id.as_ref() != Some(conversation_id) {
                return false;
            }
        }
        if let Some(task_id) = &self.task_id {
            if entry.task_id.as_ref() != Some(task_id) {
                return false;
            }
        }
        if let Some(min_level) = self.min_level {
            if entry.level < min_level {
                return false;
            }
        }
        true
    }
}

/// Result of walking the hash chain.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChainReport {
    /// Entries that verified before the first break (or all of them).
    pub entries_checked: u64,
    pub valid: bool,
    /// Sequence number at which the chain first breaks.
    pub broken_at: Option<u64>,
    pub reason: Option<String>,
    /// `entry_hash` of the last verified entry.
    pub head_hash: String,
}

struct ChainState {
    file: File,
    next_sequence: u64,
    head_hash: String,
    /// Set after a failed append. The file may hold a torn line, so no
    /// further writes are accepted until the log is reopened.
    closed: bool,
}

/// Append-only, hash-chained event log.
pub struct WormLogger {
    path: PathBuf,
    state: Mutex<ChainState>,
    stats: Option<StatsHandle>,
}

impl WormLogger {
    /// Open (or create) the log in `events_dir` and replay it to recover
    /// the next sequence number and chain head.
    ///
    /// A torn final line left by a crash is cut off. A log with an
    /// unparsable complete line is quarantined and a fresh chain started.
    pub fn open(events_dir: impl AsRef<Path>) -> Result<Self> {
        let events_dir = events_dir.as_ref();
        fs::create_dir_all(events_dir).map_err(|e| ComplianceError::persistence(events_dir, e))?;
        let path = events_dir.join(WORM_FILE);

        let (next_sequence, head_hash) = match fs::read(&path) {
            Ok(bytes) => {
                let parsed = parse_log(&bytes);
                if let Some((line, reason)) = parsed.bad_line {
                    let quarantined_to = persist::quarantine(&path)?;
                    let err = ComplianceError::Corruption {
                        path: path.clone(),
                        reason: format!("line {line}: {reason}"),
                        quarantined_to: Some(quarantined_to),
                    };
                    tracing::error!(details = ?err.details(), "Event log unreadable, starting a fresh chain");
                    (1, GENESIS_HASH.to_string())
                } else {
                    if parsed.complete_len < bytes.len() {
                        truncate_torn_tail(&path, parsed.complete_len as u64)?;
                    }
                    match parsed.entries.last() {
                        Some(last) => (last.sequence_no + 1, last.entry_hash.clone()),
                        None => (1, GENESIS_HASH.to_string()),
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (1, GENESIS_HASH.to_string()),
            Err(e) => return Err(ComplianceError::persistence(&path, e)),
        };

        let file = persist::open_append(&path)?;

        tracing::info!(
            path = %path.display(),
            next_sequence,
            "Event log opened"
        );

        Ok(Self {
            path,
            state: Mutex::new(ChainState {
                file,
                next_sequence,
                head_hash,
                closed: false,
            }),
            stats: None,
        })
    }

    pub fn with_stats(mut self, stats: StatsHandle) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number the next event will receive.
    pub fn next_sequence(&self) -> u64 {
        self.state.lock().next_sequence
    }

    /// `entry_hash` of the last appended entry.
    pub fn head_hash(&self) -> String {
        self.state.lock().head_hash.clone()
    }

    /// Append an event and return its sequence number.
    ///
    /// The entry is fsynced before this returns. Failures propagate.
    pub fn log_event(
        &self,
        actor: &str,
        event: &str,
        level: EventLevel,
        conversation_id: Option<&str>,
        task_id: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<u64> {
        let result = self.append(actor, event, level, conversation_id, task_id, metadata);
        if let Some(stats) = &self.stats {
            stats.record(Component::Worm, result.is_err());
        }
        result
    }

    fn append(
        &self,
        actor: &str,
        event: &str,
        level: EventLevel,
        conversation_id: Option<&str>,
        task_id: Option<&str>,
        metadata: serde_json::Value,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ComplianceError::persistence(
                &self.path,
                std::io::Error::other("event log closed after a failed write; reopen to continue"),
            ));
        }

        let mut entry = WormEntry {
            sequence_no: state.next_sequence,
            actor: actor.to_string(),
            event: event.to_string(),
            level,
            conversation_id: conversation_id.map(str::to_string),
            task_id: task_id.map(str::to_string),
            metadata,
            timestamp: Utc::now().trunc_subsecs(6),
            prev_hash: state.head_hash.clone(),
            entry_hash: String::new(),
        };
        entry.entry_hash = entry.compute_hash()?;

        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let file = &mut state.file;
        let written = file.write_all(&line).and_then(|()| file.sync_data());
        if let Err(e) = written {
            state.closed = true;
            tracing::error!(
                path = %self.path.display(),
                sequence_no = entry.sequence_no,
                error = %e,
                "Event append failed, log closed"
            );
            return Err(ComplianceError::persistence(&self.path, e));
        }

        state.next_sequence += 1;
        state.head_hash = entry.entry_hash;

        tracing::debug!(
            sequence_no = entry.sequence_no,
            actor = %entry.actor,
            event = %entry.event,
            level = %entry.level,
            "Event logged"
        );

        Ok(entry.sequence_no)
    }

    /// Read entries matching `query`, in sequence order.
    pub fn entries(&self, query: &EventQuery) -> Result<Vec<WormEntry>> {
        let parsed = self.read()?;
        if let Some((line, reason)) = parsed.bad_line {
            return Err(ComplianceError::Corruption {
                path: self.path.clone(),
                reason: format!("line {line}: {reason}"),
                quarantined_to: None,
            });
        }
        Ok(parsed
            .entries
            .into_iter()
            .filter(|e| query.matches(e))
            .collect())
    }

    /// Walk the whole log and check sequence contiguity and both hashes
    /// of every entry.
    pub fn verify_chain(&self) -> Result<ChainReport> {
        verify_entries(self.read()?)
    }

    fn read(&self) -> Result<ParsedLog> {
        read_log(&self.path)
    }
}

/// Verify the log in `events_dir` without opening it for writing. Nothing
/// on disk is touched, even if the log is damaged.
pub fn verify_log(events_dir: &Path) -> Result<ChainReport> {
    verify_entries(read_log(&events_dir.join(WORM_FILE))?)
}

fn read_log(path: &Path) -> Result<ParsedLog> {
    match fs::read(path) {
        Ok(bytes) => Ok(parse_log(&bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ParsedLog::default()),
        Err(e) => Err(ComplianceError::persistence(path, e)),
    }
}

fn verify_entries(parsed: ParsedLog) -> Result<ChainReport> {
    let mut expected_sequence = 1u64;
    let mut prev_hash = GENESIS_HASH.to_string();
    let mut checked = 0u64;

    let broken = |at: u64, reason: String, checked: u64, head: String| ChainReport {
        entries_checked: checked,
        valid: false,
        broken_at: Some(at),
        reason: Some(reason),
        head_hash: head,
    };

    for entry in &parsed.entries {
        if entry.sequence_no != expected_sequence {
            let reason = format!(
                "sequence gap: expected {expected_sequence}, found {}",
                entry.sequence_no
            );
            return Ok(broken(expected_sequence, reason, checked, prev_hash));
        }
        if entry.prev_hash != prev_hash {
            return Ok(broken(
                entry.sequence_no,
                "prev_hash does not match the preceding entry".to_string(),
                checked,
                prev_hash,
            ));
        }
        if entry.compute_hash()? != entry.entry_hash {
            return Ok(broken(
                entry.sequence_no,
                "entry_hash does not match entry content".to_string(),
                checked,
                prev_hash,
            ));
        }
        prev_hash = entry.entry_hash.clone();
        expected_sequence += 1;
        checked += 1;
    }

    if let Some((line, reason)) = parsed.bad_line {
        return Ok(broken(
            expected_sequence,
            format!("line {line} unparsable: {reason}"),
            checked,
            prev_hash,
        ));
    }

    Ok(ChainReport {
        entries_checked: checked,
        valid: true,
        broken_at: None,
        reason: None,
        head_hash: prev_hash,
    })
}

#[derive(Default)]
struct ParsedLog {
    entries: Vec<WormEntry>,
    /// First unparsable complete line (1-based) and the parse error.
    bad_line: Option<(usize, String)>,
    /// Byte length up to and including the last newline.
    complete_len: usize,
}

/// Parse complete lines up to the first bad one. Bytes after the last
/// newline are an in-flight or torn append and are ignored.
fn parse_log(bytes: &[u8]) -> ParsedLog {
    let complete_len = bytes
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |i| i + 1);

    let mut parsed = ParsedLog {
        complete_len,
        ..Default::default()
    };

    for (i, line) in bytes[..complete_len].split(|&b| b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<WormEntry>(line) {
            Ok(entry) => parsed.entries.push(entry),
            Err(e) => {
                parsed.bad_line = Some((i + 1, e.to_string()));
                break;
            }
        }
    }

    parsed
}

fn truncate_torn_tail(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| ComplianceError::persistence(path, e))?;
    file.set_len(len)
        .and_then(|()| file.sync_all())
        .map_err(|e| ComplianceError::persistence(path, e))?;
    tracing::warn!(path = %path.display(), len, "Cut torn final line from event log");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn log_n(logger: &WormLogger, n: usize) {
        for i in 0..n {
            logger
                .log_event(
                    "agent",
                    &format!("event-{i}"),
                    EventLevel::Info,
                    Some("conv-1"),
                    None,
                    json!({ "i": i }),
                )
                .unwrap();
        }
    }

    #[test]
    fn sequence_starts_at_one_and_chains_from_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let logger = WormLogger::open(dir.path()).unwrap();

        let seq = logger
            .log_event("agent", "started", EventLevel::Info, None, None, json!({}))
            .unwrap();
        assert_eq!(seq, 1);

        let entries = logger.entries(&EventQuery::default()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].prev_hash, GENESIS_HASH);
        assert_eq!(entries[0].entry_hash, logger.head_hash());
        assert_eq!(logger.next_sequence(), 2);
    }

    #[test]
    fn concurrent_appends_get_contiguous_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let logger = Arc::new(WormLogger::open(dir.path()).unwrap());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let logger = Arc::clone(&logger);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            logger
                                .log_event(
                                    &format!("worker-{t}"),
                                    "tick",
                                    EventLevel::Debug,
                                    None,
                                    None,
                                    json!({ "i": i }),
                                )
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seqs: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=200).collect::<Vec<u64>>());

        let report = logger.verify_chain().unwrap();
        assert!(report.valid, "{report:?}");
        assert_eq!(report.entries_checked, 200);
    }

    #[test]
    fn reopen_continues_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        {
            let logger = WormLogger::open(dir.path()).unwrap();
            log_n(&logger, 3);
        }

        let logger = WormLogger::open(dir.path()).unwrap();
        assert_eq!(logger.next_sequence(), 4);
        log_n(&logger, 2);

        let report = logger.verify_chain().unwrap();
        assert!(report.valid);
        assert_eq!(report.entries_checked, 5);
        assert_eq!(report.head_hash, logger.head_hash());
    }

    #[test]
    fn edited_entry_breaks_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let logger = WormLogger::open(dir.path()).unwrap();
        log_n(&logger, 4);

        let path = dir.path().join(WORM_FILE);
        let content = fs::read_to_string(&path).unwrap();
        fs::write(&path, content.replace("event-2", "event-X")).unwrap();

        let report = logger.verify_chain().unwrap();
        assert!(!report.valid);
        assert_eq!(report.broken_at, Some(3));
        assert_eq!(report.entries_checked, 2);
        assert_eq!(verify_log(dir.path()).unwrap(), report);
    }

    #[test]
    fn verify_log_leaves_damaged_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WORM_FILE);
        fs::write(&path, "garbage\n").unwrap();

        let report = verify_log(dir.path()).unwrap();
        assert!(!report.valid);
        assert_eq!(report.broken_at, Some(1));
        assert_eq!(fs::read_to_string(&path).unwrap(), "garbage\n");
    }

    #[test]
    fn dropped_entry_breaks_the_chain() {
        let dir = tempfile::tempdir().unwrap();
        let logger = WormLogger::open(dir.path()).unwrap();
        log_n(&logger, 3);

        let path = dir.path().join(WORM_FILE);
        let content = fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = content.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        fs::write(&path, format!("{}\n", kept.join("\n"))).unwrap();

        let report = logger.verify_chain().unwrap();
        assert!(!report.valid);
        assert_eq!(report.broken_at, Some(2));
        assert!(report.reason.unwrap().contains("sequence gap"));
    }

    #[test]
    fn corrupt_log_is_quarantined_on_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(WORM_FILE);
        fs::write(&path, "this is not json\n").unwrap();

        let logger = WormLogger::open(dir.path()).unwrap();
        assert_eq!(logger.next_sequence(), 1);

        let quarantined = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().starts_with("worm.jsonl.corrupt-"));
        assert!(quarantined);

        assert_eq!(
            logger
                .log_event("agent", "fresh", EventLevel::Info, None, None, json!(null))
                .unwrap(),
            1
        );
    }

    #[test]
    fn torn_tail_is_cut_on_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            let logger = WormLogger::open(dir.path()).unwrap();
            log_n(&logger, 2);
        }
        let path = dir.path().join(WORM_FILE);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"sequence_no":3,"actor":"ag"#).unwrap();
        drop(file);

        let logger = WormLogger::open(dir.path()).unwrap();
        assert_eq!(logger.next_sequence(), 3);
        log_n(&logger, 1);
        assert!(logger.verify_chain().unwrap().valid);
    }

    #[test]
    fn entries_filter_by_level_and_ids() {
        let dir = tempfile::tempdir().unwrap();
        let logger = WormLogger::open(dir.path()).unwrap();

        logger
            .log_event("a", "e1", EventLevel::Debug, Some("c1"), Some("t1"), json!({}))
            .unwrap();
        logger
            .log_event("a", "e2", EventLevel::Error, Some("c1"), Some("t2"), json!({}))
            .unwrap();
        logger
            .log_event("b", "e3", EventLevel::Critical, Some("c2"), None, json!({}))
            .unwrap();

        let severe = logger
            .entries(&EventQuery {
                min_level: Some(EventLevel::Error),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(severe.iter().map(|e| e.sequence_no).collect::<Vec<_>>(), vec![2, 3]);

        let conv = logger
            .entries(&EventQuery {
                conversation_id: Some("c1".to_string()),
                task_id: Some("t1".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(conv.len(), 1);
        assert_eq!(conv[0].event, "e1");

        let by_actor = logger
            .entries(&EventQuery {
                actor: Some("b".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_actor.len(), 1);
    }

    #[test]
    fn level_parsing() {
        assert_eq!("WARN".parse::<EventLevel>().unwrap(), EventLevel::Warning);
        assert_eq!("critical".parse::<EventLevel>().unwrap(), EventLevel::Critical);
        assert!("loud".parse::<EventLevel>().is_err());
        assert!(EventLevel::Debug < EventLevel::Critical);
    }
}
