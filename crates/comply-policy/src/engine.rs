//! Policy engine: read-only permission, tool, network and guardrail queries.
//!
//! The engine fails open on configuration: a missing or invalid document
//! yields the restrictive built-in policy instead of a startup error.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use ipnet::IpNet;

use comply_core::Result;
use comply_stats::{Component, StatsHandle};

use crate::policy::{
    Policy, DEFAULT_MAX_PROMPT_LENGTH, DEFAULT_MAX_RESPONSE_LENGTH, FALLBACK_POLICY_VERSION,
};

/// Where the active policy came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicySource {
    File(PathBuf),
    Fallback { reason: String },
    Inline,
}

/// Outcome of a guardrail check on a prompt or response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailVerdict {
    Allowed,
    TooLong { length: usize, max: usize },
    BlockedKeyword(String),
}

impl GuardrailVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone)]
enum DomainRule {
    Exact(String),
    /// Stored with its leading dot: `*.example.com` → `.example.com`.
    Subdomain(String),
    Network(IpNet),
}

#[derive(Debug)]
pub struct PolicyEngine {
    policy: Policy,
    source: PolicySource,
    roles: BTreeMap<String, BTreeSet<String>>,
    blocked_keywords: Vec<String>,
    domain_rules: Vec<DomainRule>,
    stats: Option<StatsHandle>,
}

impl PolicyEngine {
    /// Load the policy at `path`, falling back to
    /// [`Policy::restrictive_default`] if it is missing or invalid.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Policy::load(path).and_then(Self::from_policy) {
            Ok(mut engine) => {
                engine.source = PolicySource::File(path.to_path_buf());
                tracing::info!(
                    path = %path.display(),
                    version = engine.policy_version(),
                    roles = engine.roles.len(),
                    "Policy loaded"
                );
                engine
            }
            Err(e) => {
                tracing::error!(
                    details = ?e.details(),
                    "Policy unavailable, enforcing restrictive built-in policy"
                );
                let mut engine = Self::restrictive_default();
                engine.source = PolicySource::Fallback {
                    reason: e.to_string(),
                };
                engine
            }
        }
    }

    /// Build an engine from an in-memory policy after validating it.
    pub fn from_policy(policy: Policy) -> Result<Self> {
        policy.validate()?;

        let roles = policy.roles.clone().unwrap_or_default();

        let blocked_keywords = policy
            .guardrails
            .iter()
            .flat_map(|g| g.blocked_keywords.iter())
            .map(|k| k.to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();

        let domain_rules = policy
            .network
            .iter()
            .flat_map(|n| n.allowed_domains.iter())
            .map(|d| compile_domain_rule(d.as_str()))
            .collect();

        Ok(Self {
            policy,
            source: PolicySource::Inline,
            roles,
            blocked_keywords,
            domain_rules,
            stats: None,
        })
    }

    pub fn restrictive_default() -> Self {
        let mut engine = Self::from_policy(Policy::restrictive_default())
            .unwrap_or_else(|_| Self::deny_all());
        engine.source = PolicySource::Fallback {
            reason: "built-in default".to_string(),
        };
        engine
    }

    /// Count every query against the shared stats manager.
    pub fn with_stats(mut self, stats: StatsHandle) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn source(&self) -> &PolicySource {
        &self.source
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, PolicySource::Fallback { .. })
    }

    pub fn policy_version(&self) -> &str {
        self.policy
            .version
            .as_deref()
            .unwrap_or(FALLBACK_POLICY_VERSION)
    }

    // ── RBAC ─────────────────────────────────────────────────────

    /// Default-deny: false for unknown roles and ungranted permissions.
    /// Role names match exactly.
    pub fn has_permission(&self, role: &str, permission: &str) -> bool {
        self.record();
        self.roles
            .get(role)
            .is_some_and(|perms| perms.contains(permission))
    }

    // ── Tools ────────────────────────────────────────────────────

    pub fn is_tool_allowed(&self, tool: &str) -> bool {
        self.record();
        self.policy
            .tools
            .as_ref()
            .is_some_and(|t| t.allowlist.iter().any(|allowed| allowed == tool))
    }

    pub fn get_resource_limit(&self, kind: &str) -> Option<u64> {
        self.record();
        let tools = self.policy.tools.as_ref()?;
        tools.limits.get(kind).copied().or_else(|| {
            tools
                .limits
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(kind))
                .map(|(_, v)| *v)
        })
    }

    /// True if `path` equals a literal entry or starts with the prefix of
    /// an entry ending in `*`. Paths with a `..` component never match.
    pub fn is_path_allowed(&self, path: &str) -> bool {
        self.record();

        let path = path.replace('\\', "/");
        if path.split('/').any(|segment| segment == "..") {
            return false;
        }

        let Some(fs) = self.policy.tools.as_ref().and_then(|t| t.filesystem.as_ref()) else {
            return false;
        };

        fs.allowed_paths.iter().any(|pattern| {
            if pattern.ends_with('*') {
                path.starts_with(pattern.trim_end_matches('*'))
            } else {
                path == *pattern
            }
        })
    }

    // ── Network ──────────────────────────────────────────────────

    pub fn is_network_allowed(&self) -> bool {
        self.record();
        self.network_enabled()
    }

    /// Always false while outbound traffic is disabled.
    pub fn is_domain_allowed(&self, domain: &str) -> bool {
        self.record();
        if !self.network_enabled() {
            return false;
        }

        let host = domain.trim().trim_end_matches('.').to_lowercase();
        if host.is_empty() {
            return false;
        }
        let ip = host
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .ok();

        self.domain_rules.iter().any(|rule| match (rule, ip) {
            (DomainRule::Network(net), Some(addr)) => net.contains(&addr),
            (DomainRule::Network(_), None) => false,
            (DomainRule::Exact(exact), _) => host == *exact,
            (DomainRule::Subdomain(suffix), None) => {
                host.len() > suffix.len() && host.ends_with(suffix.as_str())
            }
            (DomainRule::Subdomain(_), Some(_)) => false,
        })
    }

    fn network_enabled(&self) -> bool {
        self.policy
            .network
            .as_ref()
            .is_some_and(|n| n.outbound_enabled)
    }

    // ── Guardrails ───────────────────────────────────────────────

    /// Case-insensitive substring match against the blocked keyword list.
    pub fn contains_blocked_keyword(&self, text: &str) -> bool {
        self.record();
        self.find_blocked_keyword(text).is_some()
    }

    pub fn is_prompt_valid(&self, prompt: &str) -> bool {
        self.record();
        prompt.chars().count() <= self.max_prompt_length()
    }

    pub fn is_response_valid(&self, response: &str) -> bool {
        self.record();
        response.chars().count() <= self.max_response_length()
    }

    /// Length and keyword check for an inbound prompt.
    pub fn check_prompt(&self, prompt: &str) -> GuardrailVerdict {
        self.record();
        self.check(prompt, self.max_prompt_length())
    }

    /// Length and keyword check for an outbound response.
    pub fn check_response(&self, response: &str) -> GuardrailVerdict {
        self.record();
        self.check(response, self.max_response_length())
    }

    pub fn max_prompt_length(&self) -> usize {
        self.policy
            .guardrails
            .as_ref()
            .and_then(|g| g.max_prompt_length)
            .unwrap_or(DEFAULT_MAX_PROMPT_LENGTH)
    }

    pub fn max_response_length(&self) -> usize {
        self.policy
            .guardrails
            .as_ref()
            .and_then(|g| g.max_response_length)
            .unwrap_or(DEFAULT_MAX_RESPONSE_LENGTH)
    }

    fn check(&self, text: &str, max: usize) -> GuardrailVerdict {
        let length = text.chars().count();
        if length > max {
            return GuardrailVerdict::TooLong { length, max };
        }
        match self.find_blocked_keyword(text) {
            Some(keyword) => GuardrailVerdict::BlockedKeyword(keyword.to_string()),
            None => GuardrailVerdict::Allowed,
        }
    }

    fn find_blocked_keyword(&self, text: &str) -> Option<&str> {
        if self.blocked_keywords.is_empty() {
            return None;
        }
        let lowered = text.to_lowercase();
        self.blocked_keywords
            .iter()
            .find(|k| lowered.contains(k.as_str()))
            .map(String::as_str)
    }

    fn record(&self) {
        if let Some(stats) = &self.stats {
            stats.record(Component::Policy, false);
        }
    }

    fn deny_all() -> Self {
        Self {
            policy: Policy::default(),
            source: PolicySource::Inline,
            roles: BTreeMap::new(),
            blocked_keywords: Vec::new(),
            domain_rules: Vec::new(),
            stats: None,
        }
    }
}

fn compile_domain_rule(entry: &str) -> DomainRule {
    let entry = entry.trim().trim_end_matches('.').to_lowercase();

    if let Ok(net) = entry.parse::<IpNet>() {
        return DomainRule::Network(net);
    }
    if let Ok(addr) = entry.parse::<IpAddr>() {
        return DomainRule::Network(IpNet::from(addr));
    }
    match entry.strip_prefix("*.") {
        Some(suffix) => DomainRule::Subdomain(format!(".{suffix}")),
        None => DomainRule::Exact(entry),
    }
}
