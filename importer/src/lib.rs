//! # Platform Import - CSV bulk importers for the trading-challenge platform
//!
//! Loads CSV exports of the legacy platform (users, purchases, trading
//! accounts, equity snapshots, ...) into PostgreSQL, resolving foreign keys
//! against rows that are already imported.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   CSV File  │────▶│   Parser    │────▶│  Transform  │────▶│   Loader    │────▶ Store
//! │  (ISO/UTF8) │     │  (auto-enc) │     │ (+ refs)    │     │  (chunked)  │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use platform_import::{find_builtin, Importer, PgStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PgStore::connect("postgres://localhost/platform", 4).await?;
//!     let summary = Importer::new(&store, find_builtin("users")?)
//!         .import_file("new_users.csv")
//!         .await?;
//!     summary.print();
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`logs`] - Log broadcaster and helpers
//! - [`models`] - Field values, prepared records, row outcomes
//! - [`parser`] - Streaming CSV reading with encoding detection
//! - [`mapping`] - Declarative entity mappings and the dependency graph
//! - [`references`] - Reference sets for foreign-key checks
//! - [`transform`] - Value coercion, payload decoding, row transformation
//! - [`validation`] - Prepared record invariants
//! - [`store`] - Bulk store trait and backends
//! - [`loader`] - Chunked bulk loader with per-row fallback
//! - [`pipeline`] - Import driver and summaries

// Core modules
pub mod error;
pub mod logs;
pub mod models;

// Parsing
pub mod parser;

// Mapping
pub mod mapping;
pub mod references;

// Transformation
pub mod transform;

// Validation
pub mod validation;

// Storage
pub mod loader;
pub mod store;

// Driver
pub mod pipeline;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    CsvError,
    MappingError,
    StoreError,
    ImportError,
    CsvResult,
    MappingResult,
    StoreResult,
    ImportResult,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    FieldValue,
    PreparedRecord,
    RowOutcome,
    SkipReason,
};

// =============================================================================
// Re-exports - Mapping
// =============================================================================

pub use mapping::{
    builtin,
    builtin_names,
    find_builtin,
    import_order,
    DependencyGraph,
    EntityMapping,
    FieldKind,
    FieldSpec,
    ReferenceSpec,
};

// =============================================================================
// Re-exports - References & Transform
// =============================================================================

pub use references::{ReferenceResolver, ReferenceSet, ReferenceSets};
pub use transform::{decode_payload, transform_row, RowTransformer};
pub use validation::{is_valid_record, validate_record};

// =============================================================================
// Re-exports - Storage
// =============================================================================

pub use loader::{ChunkedLoader, LoadStats};
pub use store::{BulkStore, DryRunStore, MemoryStore, PgStore};

// =============================================================================
// Re-exports - Pipeline
// =============================================================================

pub use pipeline::{
    import_all,
    ImportOptions,
    ImportPhase,
    ImportSummary,
    Importer,
};
