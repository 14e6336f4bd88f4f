//! Canonical encodings and BLAKE3 fingerprints.
//!
//! The Decision Record signing input is pinned so that independent
//! implementations produce byte-identical messages:
//!
//! - compact JSON object, no insignificant whitespace, UTF-8
//! - keys in ascending byte order: `actor`, `alternatives_considered`,
//!   `decision`, `dr_id`, `model_fingerprint`, `policy_version`,
//!   `prompt_hash`, `reasoning_markers`, `supersedes`, `task_id`,
//!   `timestamp`, `tools_used`
//! - absent optionals are `null`; arrays keep insertion order
//! - strings use standard JSON escaping (`"`, `\`, control characters);
//!   non-ASCII is emitted as raw UTF-8
//! - `timestamp` is RFC 3339 UTC with exactly six fractional digits and `Z`
//! - `signature` is excluded

use chrono::SecondsFormat;
use serde::Serialize;

use crate::DecisionRecord;

/// Field order below is the serialization order and must stay sorted.
#[derive(Serialize)]
struct CanonicalDecisionRecord<'a> {
    actor: &'a str,
    alternatives_considered: &'a [String],
    decision: &'a str,
    dr_id: &'a str,
    model_fingerprint: Option<&'a str>,
    policy_version: Option<&'a str>,
    prompt_hash: &'a str,
    reasoning_markers: &'a [String],
    supersedes: Option<&'a str>,
    task_id: &'a str,
    timestamp: String,
    tools_used: &'a [String],
}

/// Canonical signing input for a Decision Record (all fields but `signature`).
pub fn canonical_bytes(dr: &DecisionRecord) -> comply_core::Result<Vec<u8>> {
    let canonical = CanonicalDecisionRecord {
        actor: &dr.actor,
        alternatives_considered: &dr.alternatives_considered,
        decision: &dr.decision,
        dr_id: &dr.dr_id,
        model_fingerprint: dr.model_fingerprint.as_deref(),
        policy_version: dr.policy_version.as_deref(),
        prompt_hash: &dr.prompt_hash,
        reasoning_markers: &dr.reasoning_markers,
        supersedes: dr.supersedes.as_deref(),
        task_id: &dr.task_id,
        timestamp: dr.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        tools_used: &dr.tools_used,
    };

    Ok(serde_json::to_vec(&canonical)?)
}

/// BLAKE3 fingerprint of raw content (lowercase hex).
pub fn fingerprint(content: &str) -> String {
    blake3::hash(content.as_bytes()).to_hex().to_string()
}

/// BLAKE3 fingerprint of a serializable value's compact JSON form.
pub fn fingerprint_json(value: &impl Serialize) -> comply_core::Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(blake3::hash(&bytes).to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn fixture() -> DecisionRecord {
        DecisionRecord {
            dr_id: "dr_20261015T093000123456Z_00000000deadbeef".to_string(),
            actor: "planner".to_string(),
            task_id: "task-42".to_string(),
            decision: "approve \"refund\"".to_string(),
            prompt_hash: "abc123".to_string(),
            policy_version: Some("2026.10".to_string()),
            model_fingerprint: None,
            tools_used: vec!["search".to_string(), "read_file".to_string()],
            alternatives_considered: vec!["deny".to_string()],
            reasoning_markers: vec![],
            supersedes: None,
            timestamp: Utc.with_ymd_and_hms(2026, 10, 15, 9, 30, 0).unwrap()
                + chrono::Duration::microseconds(123_456),
            signature: "ed25519:ignored".to_string(),
        }
    }

    #[test]
    fn canonical_encoding_is_pinned() {
        let bytes = canonical_bytes(&fixture()).unwrap();
        let expected = concat!(
            r#"{"actor":"planner","#,
            r#""alternatives_considered":["deny"],"#,
            r#""decision":"approve \"refund\"","#,
            r#""dr_id":"dr_20261015T093000123456Z_00000000deadbeef","#,
            r#""model_fingerprint":null,"#,
            r#""policy_version":"2026.10","#,
            r#""prompt_hash":"abc123","#,
            r#""reasoning_markers":[],"#,
            r#""supersedes":null,"#,
            r#""task_id":"task-42","#,
            r#""timestamp":"2026-10-15T09:30:00.123456Z","#,
            r#""tools_used":["search","read_file"]}"#,
        );
        assert_eq!(String::from_utf8(bytes).unwrap(), expected);
    }

    #[test]
    fn whole_second_timestamps_keep_six_digits() {
        let mut dr = fixture();
        dr.timestamp = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let text = String::from_utf8(canonical_bytes(&dr).unwrap()).unwrap();
        assert!(text.contains(r#""timestamp":"2026-01-02T03:04:05.000000Z""#));
    }

    #[test]
    fn signature_is_not_covered() {
        let mut dr = fixture();
        let before = canonical_bytes(&dr).unwrap();
        dr.signature = "ed25519:other".to_string();
        assert_eq!(canonical_bytes(&dr).unwrap(), before);
    }

    #[test]
    fn fingerprints_are_stable() {
        assert_eq!(fingerprint("hello"), fingerprint("hello"));
        assert_ne!(fingerprint("hello"), fingerprint("hello "));
        assert_eq!(fingerprint("").len(), 64);
    }
}
