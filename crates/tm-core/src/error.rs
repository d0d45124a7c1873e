//! Error types for tm-core

use thiserror::Error;

/// Core error type for Tidemark
#[derive(Error, Debug)]
pub enum CoreError {
    /// E001: Configuration file not found
    #[error("[E001] Config file not found: {path}")]
    ConfigNotFound { path: String },

    /// E002: Invalid configuration value
    #[error("[E002] Invalid config: {message}")]
    ConfigInvalid { message: String },

    /// E003: Migrations directory not found
    #[error("[E003] Migrations directory not found: {path}")]
    MigrationsDirNotFound { path: String },

    /// E004: Migration file name does not start with a usable version
    #[error("[E004] Invalid migration version in '{file}': {reason}")]
    InvalidVersion { file: String, reason: String },

    /// E005: Two migration files share a version
    #[error("[E005] Duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        version: u64,
        first: String,
        second: String,
    },

    /// E006: Bookkeeping table name is not a plain SQL identifier
    #[error("[E006] Invalid table name '{name}': {reason}")]
    InvalidTableName { name: String, reason: String },

    /// E007: Migration file is not valid UTF-8
    #[error("[E007] Migration file '{file}' is not valid UTF-8")]
    InvalidEncoding { file: String },

    /// E008: Bundled migration listed but not readable
    #[error("[E008] Embedded migration file not found: {file}")]
    EmbeddedFileNotFound { file: String },

    /// E009: IO error with file path context
    #[error("[E009] Failed to read '{path}': {source}")]
    IoWithPath {
        path: String,
        source: std::io::Error,
    },

    /// E010: YAML parse error
    #[error("[E010] Failed to parse config: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

/// Result type alias for CoreError
pub type CoreResult<T> = Result<T, CoreError>;
