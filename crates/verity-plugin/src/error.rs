//! Error types for plugins and the registry

use crate::capability::PluginKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for plugin operations
pub type PluginResult<T> = Result<T, PluginError>;

/// Errors raised by plugin code
#[derive(Error, Debug)]
pub enum PluginError {
    /// Instance setup failed
    #[error("setup failed: {0}")]
    Setup(String),

    /// Artifact is not something this plugin understands
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Artifact content failed validation
    #[error("invalid: {0}")]
    Invalid(String),

    /// Algorithm computation failed
    #[error("{0}")]
    Compute(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors raised while discovering or resolving plugins
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Nothing registered under this key
    #[error("{kind} plugin not found: {id}")]
    NotFound { kind: PluginKind, id: String },

    /// No serializer could read the artifact
    #[error("unable to deserialize {path}: {reason}")]
    Deserialize { path: PathBuf, reason: String },

    /// No plugin of this kind accepted the artifact
    #[error("no {kind} plugin supports {path}")]
    Unsupported { kind: PluginKind, path: PathBuf },

    /// A plugin accepted the artifact but failed to build an instance
    #[error("{kind} plugin {id} failed to create an instance: {source}")]
    Create {
        kind: PluginKind,
        id: String,
        #[source]
        source: PluginError,
    },

    /// Manifest could not be read or is inconsistent
    #[error("invalid manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },

    /// Dynamic library could not be loaded
    #[error("unable to load plugin library {path}: {reason}")]
    Library { path: PathBuf, reason: String },

    /// Discovery root is missing or unreadable
    #[error("unable to discover plugins under {path}: {reason}")]
    Discovery { path: PathBuf, reason: String },

    /// The remote algorithm directory could not be queried
    #[error("algorithm directory error: {0}")]
    Directory(String),
}

impl RegistryError {
    /// Errors caused by the environment rather than the artifact or payload
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, RegistryError::Directory(_))
    }

    pub fn not_found(kind: PluginKind, id: impl Into<String>) -> Self {
        RegistryError::NotFound {
            kind,
            id: id.into(),
        }
    }
}
