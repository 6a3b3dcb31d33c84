//! Error types for the import pipeline.
//!
//! - [`CsvError`] - reading and decoding the input file
//! - [`MappingError`] - entity mapping tables and the dependency graph
//! - [`StoreError`] - bulk store reads and writes
//! - [`ImportError`] - top-level driver errors (fatal, pre-stream)
//!
//! Conversions are `From` based so `?` works across the boundaries.
//! Row-level problems are never errors at this level: they are absorbed
//! into the import summary counters.

use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// CSV Errors
// =============================================================================

/// Errors while opening or reading a CSV file.
#[derive(Debug, Error)]
pub enum CsvError {
    /// Input file does not exist.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Failed to read from the file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Bytes could not be decoded into text.
    #[error("Failed to decode input: {0}")]
    Encoding(String),

    /// Header line missing or unreadable.
    #[error("No headers found in CSV")]
    NoHeaders,

    /// A single data record could not be read.
    #[error("Line {line}: {message}")]
    Malformed { line: u64, message: String },
}

impl CsvError {
    /// Whether the error concerns one record only, leaving the stream usable.
    pub fn is_row_level(&self) -> bool {
        matches!(self, CsvError::Malformed { .. })
    }
}

// =============================================================================
// Mapping Errors
// =============================================================================

/// Errors in entity mapping tables.
#[derive(Debug, Error)]
pub enum MappingError {
    /// No mapping registered under this name.
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// A field points at a reference the mapping does not declare.
    #[error("Entity '{entity}' uses undeclared reference '{reference}'")]
    UndeclaredReference { entity: String, reference: String },

    /// The declared dependencies contain a cycle.
    #[error("Dependency cycle between entities: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// Structurally invalid mapping.
    #[error("Invalid mapping for '{entity}': {message}")]
    Invalid { entity: String, message: String },

    /// Mapping JSON could not be read.
    #[error("Mapping JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the bulk store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database driver error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A row violated a table constraint.
    #[error("Constraint violation on '{table}': {message}")]
    Constraint { table: String, message: String },

    /// Table is not known to the store.
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Records in one call disagree on their column layout.
    #[error("Column layout mismatch for '{0}'")]
    ColumnMismatch(String),
}

// =============================================================================
// Import Errors (top-level)
// =============================================================================

/// Fatal errors returned by the import driver.
///
/// Every variant aborts the run before any row is streamed.
#[derive(Debug, Error)]
pub enum ImportError {
    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),

    /// Mapping error.
    #[error("Mapping error: {0}")]
    Mapping(#[from] MappingError),

    /// Store error (reference load).
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// An upstream table is empty while the input carries references into it.
    #[error("Upstream table '{table}' is empty but '{column}' references it (import '{table}' first)")]
    MissingUpstream { table: String, column: String },

    /// Invalid run options.
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for CSV operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for mapping operations.
pub type MappingResult<T> = Result<T, MappingError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for import runs.
pub type ImportResult<T> = Result<T, ImportError>;
