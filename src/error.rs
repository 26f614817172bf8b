//! Error types for the migration engine

use thiserror::Error;

use crate::checksum::RecordSnapshot;
use crate::version::DataVersion;

/// Result type for migration operations
pub type Result<T> = std::result::Result<T, FixerError>;

/// Migration engine errors
#[derive(Error, Debug)]
pub enum FixerError {
    #[error("Invalid schema order: version {version} must be greater than {latest}")]
    InvalidSchemaOrder {
        version: DataVersion,
        latest: DataVersion,
    },

    #[error("Unknown schema handle #{0}")]
    UnknownSchema(usize),

    #[error("Unknown logical type '{name}' in schema version {version}")]
    UnknownLogicalType { name: String, version: DataVersion },

    #[error(
        "Structural mismatch in fixer '{fixer}' for type '{logical_type}' \
         (v{input_version} -> v{output_version}) at {path}: {reason}"
    )]
    StructuralMismatch {
        fixer: String,
        logical_type: String,
        input_version: DataVersion,
        output_version: DataVersion,
        path: String,
        reason: String,
    },

    #[error("Invalid registration for '{namespace}': {reason}")]
    InvalidRegistration { namespace: String, reason: String },

    #[error("Invalid version stamp in field '{field}': expected an integer, found {found}")]
    InvalidStamp { field: String, found: String },

    #[error("Registry is not locked; lock it before migrating records")]
    RegistryNotLocked,

    #[error(
        "Migration aborted in namespace '{namespace}' (record {}): {source}",
        .snapshot.checksum
    )]
    MigrationAborted {
        namespace: String,
        #[source]
        source: Box<FixerError>,
        snapshot: Box<RecordSnapshot>,
    },

    #[error("Invalid migration plan: {0}")]
    InvalidPlan(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl FixerError {
    /// Shorthand for an [`FixerError::InvalidRegistration`]
    pub fn registration(namespace: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRegistration {
            namespace: namespace.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error (or the error it wraps) is a structural mismatch
    pub fn is_structural_mismatch(&self) -> bool {
        match self {
            Self::StructuralMismatch { .. } => true,
            Self::MigrationAborted { source, .. } => source.is_structural_mismatch(),
            _ => false,
        }
    }

    /// The innermost error, looking through [`FixerError::MigrationAborted`]
    pub fn root_cause(&self) -> &FixerError {
        match self {
            Self::MigrationAborted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
