//! comply-policy: Access policy and PII redaction for the compliance middleware.
//!
//! - [`PolicyEngine`] answers role, tool, filesystem, network and guardrail
//!   queries over a policy loaded once at startup.
//! - [`PiiDetector`] / [`PiiMasker`] find and redact structured identifiers
//!   before text is stored or logged.
//!
//! Both hold only immutable state after construction and can be shared
//! across threads without locking.

pub mod engine;
pub mod pii;
pub mod policy;

pub use engine::{GuardrailVerdict, PolicyEngine, PolicySource};
pub use pii::{PiiCategory, PiiDetector, PiiMasker, PiiScan, REDACTION_TOKEN};
pub use policy::Policy;
