//! Error types for the module host

use crate::generation::GenerationId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for module host operations
pub type Result<T> = std::result::Result<T, HostError>;

/// Errors that can occur in the module host
#[derive(Debug, Error)]
pub enum HostError {
    /// Module could not be loaded into the active generation
    #[error(transparent)]
    Load(#[from] LoadError),

    /// Internal call could not be bound
    #[error(transparent)]
    Bind(#[from] BindError),

    /// Configuration could not be read
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// File watcher error
    #[error("Module watcher failed: {0}")]
    Watch(String),
}

/// Reasons a module load is rejected. Loads are all-or-nothing: when any of
/// these is returned the active generation is unchanged.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Module file does not exist
    #[error("Module '{path}' not found")]
    NotFound { path: PathBuf },

    /// The dynamic library could not be opened
    #[error("Failed to open module '{path}': {message}")]
    Open { path: PathBuf, message: String },

    /// Library does not export the module descriptor
    #[error("Module '{path}' does not export a module descriptor")]
    MissingDescriptor { path: PathBuf },

    /// Descriptor was built against another ABI
    #[error("ABI mismatch: module built for version {found}, host expects {expected}")]
    AbiMismatch { found: u32, expected: u32 },

    /// Descriptor contents are invalid
    #[error("Malformed module '{path}': {reason}")]
    Malformed { path: PathBuf, reason: String },

    /// Type is already declared by a module of the active generation
    #[error("Type '{type_name}' is already declared by module '{existing}'")]
    DuplicateType { type_name: String, existing: String },

    /// Generation is no longer accepting loads
    #[error("Generation {0} is retired")]
    GenerationRetired(GenerationId),

    /// Shadow copy of the module file failed
    #[error("Failed to shadow-copy module '{path}': {source}")]
    ShadowCopy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LoadError {
    /// Create an open error
    pub fn open(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        LoadError::Open {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a malformed module error
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        LoadError::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Reasons an internal call binding fails. A failed bind never writes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BindError {
    /// Name is not of the form `Type.Slot`
    #[error("Malformed slot name '{0}'")]
    MalformedName(String),

    /// No slot with this name in the active generation
    #[error("Slot '{0}' not found")]
    NotFound(String),

    /// Slot exists but cannot hold the supplied value
    #[error("Slot '{name}' is incompatible: {reason}")]
    Incompatible { name: String, reason: String },
}

impl BindError {
    /// Create an incompatible slot error
    pub fn incompatible(name: impl Into<String>, reason: impl Into<String>) -> Self {
        BindError::Incompatible {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config contents are not valid TOML for [`crate::HostConfig`]
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = LoadError::malformed("game.so", "null type name");
        assert_eq!(err.to_string(), "Malformed module 'game.so': null type name");

        let err: HostError = BindError::NotFound("Foo.Bar".into()).into();
        assert_eq!(err.to_string(), "Slot 'Foo.Bar' not found");
    }

    #[test]
    fn test_io_failures_carry_their_path() {
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: HostError = LoadError::ShadowCopy {
            path: "game.so".into(),
            source,
        }
        .into();
        assert!(matches!(err, HostError::Load(LoadError::ShadowCopy { .. })));
        assert_eq!(err.to_string(), "Failed to shadow-copy module 'game.so': denied");

        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: HostError = ConfigError::Read {
            path: "modhost.toml".into(),
            source,
        }
        .into();
        assert!(std::error::Error::source(&err).is_some());
        assert_eq!(err.to_string(), "Failed to read config 'modhost.toml': missing");
    }
}
