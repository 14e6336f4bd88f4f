//! The policy document.
//!
//! Sections are optional on purpose: a missing `network` section means
//! outbound traffic is off, a missing `roles` section grants nothing. The
//! engine handles each `None` explicitly rather than chaining defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use comply_core::{ComplianceError, Result};

/// Default prompt length limit when the guardrails section omits one.
pub const DEFAULT_MAX_PROMPT_LENGTH: usize = 4_000;
/// Default response length limit when the guardrails section omits one.
pub const DEFAULT_MAX_RESPONSE_LENGTH: usize = 8_000;

/// Version reported for the built-in fallback policy.
pub const FALLBACK_POLICY_VERSION: &str = "builtin-restrictive";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    #[serde(default)]
    pub version: Option<String>,

    /// Role name → granted permissions.
    #[serde(default)]
    pub roles: Option<BTreeMap<String, BTreeSet<String>>>,

    #[serde(default)]
    pub tools: Option<ToolPolicy>,

    #[serde(default)]
    pub network: Option<NetworkPolicy>,

    #[serde(default)]
    pub guardrails: Option<Guardrails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolPolicy {
    #[serde(default)]
    pub allowlist: Vec<String>,

    /// Resource kind → limit (e.g. `max_file_size_mb`, `max_execution_seconds`).
    #[serde(default)]
    pub limits: BTreeMap<String, u64>,

    #[serde(default)]
    pub filesystem: Option<FilesystemPolicy>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FilesystemPolicy {
    /// Literal paths, or prefixes ending in `*` (`working_set/*`).
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NetworkPolicy {
    #[serde(default)]
    pub outbound_enabled: bool,

    /// Exact hosts, `*.suffix` wildcards, or CIDR blocks.
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Guardrails {
    #[serde(default)]
    pub max_prompt_length: Option<usize>,

    #[serde(default)]
    pub max_response_length: Option<usize>,

    #[serde(default)]
    pub blocked_keywords: Vec<String>,
}

impl Policy {
    /// Read a policy document. The format follows the file extension
    /// (`.yaml`/`.yml`, `.toml`, `.json`).
    pub fn load(path: &Path) -> Result<Self> {
        let config_err = |message: String| ComplianceError::Configuration {
            message,
            source_path: Some(path.to_path_buf()),
        };

        if !path.is_file() {
            return Err(config_err("policy document not found".to_string()));
        }

        let policy: Policy = config::Config::builder()
            .add_source(config::File::from(path).required(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| config_err(e.to_string()))?;

        policy.validate().map_err(|e| match e {
            ComplianceError::Configuration { message, .. } => config_err(message),
            other => other,
        })?;

        Ok(policy)
    }

    /// Schema checks that the type system can't express.
    pub fn validate(&self) -> Result<()> {
        if let Some(roles) = &self.roles {
            for (role, permissions) in roles {
                if role.trim().is_empty() {
                    return Err(ComplianceError::configuration("role name is empty"));
                }
                // Document keys are case-folded on load, so only the folded
                // form can be matched exactly.
                if role.trim() != role || role.to_lowercase() != *role {
                    return Err(ComplianceError::configuration(format!(
                        "role name '{role}' must be lowercase without surrounding whitespace"
                    )));
                }
                if permissions.iter().any(|p| p.trim().is_empty()) {
                    return Err(ComplianceError::configuration(format!(
                        "role '{role}' grants an empty permission"
                    )));
                }
            }
        }

        if let Some(tools) = &self.tools {
            if tools.allowlist.iter().any(|t| t.trim().is_empty()) {
                return Err(ComplianceError::configuration("tool allowlist has an empty entry"));
            }
            if let Some(fs) = &tools.filesystem {
                for pattern in &fs.allowed_paths {
                    if pattern.trim().is_empty() {
                        return Err(ComplianceError::configuration("empty filesystem path pattern"));
                    }
                    if pattern.trim_end_matches('*').contains('*') {
                        return Err(ComplianceError::configuration(format!(
                            "path pattern '{pattern}' has a wildcard before its end"
                        )));
                    }
                }
            }
        }

        if let Some(network) = &self.network {
            if network.allowed_domains.iter().any(|d| d.trim().is_empty()) {
                return Err(ComplianceError::configuration("allowed_domains has an empty entry"));
            }
        }

        Ok(())
    }

    /// The fixed fallback used when no valid document can be loaded:
    /// outbound network off, a read-mostly tool set, conservative lengths.
    pub fn restrictive_default() -> Self {
        let mut roles = BTreeMap::new();
        roles.insert(
            "viewer".to_string(),
            BTreeSet::from(["read".to_string()]),
        );
        roles.insert(
            "agent".to_string(),
            BTreeSet::from(["read".to_string(), "search".to_string()]),
        );

        let mut limits = BTreeMap::new();
        limits.insert("max_file_size_mb".to_string(), 10);
        limits.insert("max_execution_seconds".to_string(), 30);
        limits.insert("max_tool_calls".to_string(), 10);

        Self {
            version: Some(FALLBACK_POLICY_VERSION.to_string()),
            roles: Some(roles),
            tools: Some(ToolPolicy {
                allowlist: vec![
                    "read_file".to_string(),
                    "list_directory".to_string(),
                    "search".to_string(),
                ],
                limits,
                filesystem: Some(FilesystemPolicy {
                    allowed_paths: vec!["working_set/*".to_string()],
                }),
            }),
            network: Some(NetworkPolicy {
                outbound_enabled: false,
                allowed_domains: Vec::new(),
            }),
            guardrails: Some(Guardrails {
                max_prompt_length: Some(DEFAULT_MAX_PROMPT_LENGTH),
                max_response_length: Some(DEFAULT_MAX_RESPONSE_LENGTH),
                blocked_keywords: Vec::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use comply_core::ErrorKind;

    #[test]
    fn loads_yaml_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(
            &path,
            r#"
version: "2026.10"
roles:
  analyst: [read, search]
tools:
  allowlist: [search]
  limits:
    max_file_size_mb: 5
network:
  outbound_enabled: true
  allowed_domains: [api.example.com]
"#,
        )
        .unwrap();

        let policy = Policy::load(&path).unwrap();
        assert_eq!(policy.version.as_deref(), Some("2026.10"));
        assert!(policy.roles.unwrap()["analyst"].contains("search"));
        assert_eq!(policy.tools.unwrap().limits["max_file_size_mb"], 5);
        assert!(policy.network.unwrap().outbound_enabled);
        assert!(policy.guardrails.is_none());
    }

    #[test]
    fn loads_json_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        std::fs::write(
            &path,
            r#"{"roles": {"admin": ["read", "write"]}, "guardrails": {"max_prompt_length": 12}}"#,
        )
        .unwrap();

        let policy = Policy::load(&path).unwrap();
        assert_eq!(policy.guardrails.unwrap().max_prompt_length, Some(12));
        assert!(policy.tools.is_none());
    }

    #[test]
    fn missing_document_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Policy::load(&dir.path().join("nope.yaml")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.details()["path"].ends_with("nope.yaml"));
    }

    #[test]
    fn rejects_inner_wildcards() {
        let policy = Policy {
            tools: Some(ToolPolicy {
                filesystem: Some(FilesystemPolicy {
                    allowed_paths: vec!["working_*/foo".to_string()],
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn restrictive_default_is_valid_and_offline() {
        let policy = Policy::restrictive_default();
        policy.validate().unwrap();
        assert!(!policy.network.unwrap().outbound_enabled);
    }
}
