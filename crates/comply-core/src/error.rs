use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Coarse classification of a [`ComplianceError`].
///
/// Callers match on the kind to decide between failing open (configuration),
/// surfacing a denial (validation), or failing closed (persistence).
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    Persistence,
    Corruption,
    NotFound,
    Signing,
    Serialization,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::Persistence => "persistence",
            Self::Corruption => "corruption",
            Self::NotFound => "not_found",
            Self::Signing => "signing",
            Self::Serialization => "serialization",
        };
        f.write_str(s)
    }
}

/// Top-level error type for the compliance middleware.
#[derive(Error, Debug)]
pub enum ComplianceError {
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        source_path: Option<PathBuf>,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Persistence error at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state at {}: {reason}", path.display())]
    Corruption {
        path: PathBuf,
        reason: String,
        quarantined_to: Option<PathBuf>,
    },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ComplianceError {
    /// Wrap an I/O failure with the path it happened on.
    pub fn persistence(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            source_path: None,
        }
    }

    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::Corruption { .. } => ErrorKind::Corruption,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Signing(_) => ErrorKind::Signing,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Structured detail mapping for logs and operator output.
    ///
    /// Always contains `kind` and `message`; variant-specific keys are added
    /// on top (`path`, `quarantined_to`, `entity`, `id`, `io_kind`).
    pub fn details(&self) -> BTreeMap<String, String> {
        let mut details = BTreeMap::new();
        details.insert("kind".to_string(), self.kind().to_string());
        details.insert("message".to_string(), self.to_string());

        match self {
            Self::Configuration { source_path, .. } => {
                if let Some(p) = source_path {
                    details.insert("path".to_string(), p.display().to_string());
                }
            }
            Self::Persistence { path, source } => {
                details.insert("path".to_string(), path.display().to_string());
                details.insert("io_kind".to_string(), format!("{:?}", source.kind()));
            }
            Self::Corruption {
                path,
                quarantined_to,
                ..
            } => {
                details.insert("path".to_string(), path.display().to_string());
                if let Some(q) = quarantined_to {
                    details.insert("quarantined_to".to_string(), q.display().to_string());
                }
            }
            Self::NotFound { entity, id } => {
                details.insert("entity".to_string(), (*entity).to_string());
                details.insert("id".to_string(), id.clone());
            }
            Self::Validation(_) | Self::Signing(_) | Self::Serialization(_) => {}
        }

        details
    }
}

pub type Result<T> = std::result::Result<T, ComplianceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn persistence_details_carry_path_and_io_kind() {
        let err = ComplianceError::persistence(
            "/var/audit/dr.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), ErrorKind::Persistence);

        let details = err.details();
        assert_eq!(details["kind"], "persistence");
        assert_eq!(details["path"], "/var/audit/dr.json");
        assert_eq!(details["io_kind"], "PermissionDenied");
    }

    #[test]
    fn not_found_details() {
        let err = ComplianceError::not_found("decision record", "dr_123");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "decision record not found: dr_123");
        assert_eq!(err.details()["id"], "dr_123");
    }

    #[test]
    fn serde_errors_convert() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: ComplianceError = parse.unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }
}
