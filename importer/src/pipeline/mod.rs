//! Import driver.
//!
//! Runs one entity import end to end: open the CSV, read the header, load
//! reference sets, stream rows through the transformer into the chunked
//! loader, drain the last batch and report.
//!
//! ```text
//! Idle -> ReadingHeader -> StreamingRows -> Draining -> Reporting -> Done
//!   \          \
//!    +----------+--> Failed
//! ```
//!
//! Once rows are streaming, nothing aborts the run: row problems end up in
//! the summary counters.
//!
//! # Example
//!
//! ```rust,ignore
//! use platform_import::mapping::find_builtin;
//! use platform_import::pipeline::{Importer, ImportOptions};
//! use platform_import::store::PgStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PgStore::connect(&std::env::var("DATABASE_URL")?, 4).await?;
//!     let mapping = find_builtin("platform_accounts")?;
//!     let summary = Importer::new(&store, mapping)
//!         .with_options(ImportOptions::default())
//!         .import_file("new_platform_accounts.csv")
//!         .await?;
//!     summary.print();
//!     Ok(())
//! }
//! ```

pub mod summary;

pub use summary::ImportSummary;

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Instant;

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ImportError, ImportResult};
use crate::loader::{ChunkedLoader, RowError, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_LOGGED_ERRORS};
use crate::logs::{log_error, log_error_indent, log_info, log_info_indent, log_success, log_warning};
use crate::mapping::{import_order, EntityMapping};
use crate::models::RowOutcome;
use crate::parser::{CsvOptions, CsvSource, Header, RawRow};
use crate::references::{ReferenceResolver, ReferenceSets};
use crate::store::BulkStore;
use crate::transform::RowTransformer;

// =============================================================================
// Options
// =============================================================================

/// Options for an import run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportOptions {
    /// Records per bulk insert
    pub chunk_size: usize,

    /// CSV field delimiter
    pub delimiter: char,

    /// Validate and transform, but write nothing
    pub dry_run: bool,

    /// Fail before streaming when an upstream table is empty
    pub strict_references: bool,

    /// Row errors shown in detail
    pub max_logged_errors: usize,

    /// Log progress every N rows (0 disables)
    pub progress_interval: u64,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            delimiter: ',',
            dry_run: false,
            strict_references: false,
            max_logged_errors: DEFAULT_MAX_LOGGED_ERRORS,
            progress_interval: 1000,
        }
    }
}

impl ImportOptions {
    fn validate(&self) -> ImportResult<CsvOptions> {
        if self.chunk_size == 0 {
            return Err(ImportError::InvalidOptions("chunk size must be at least 1".into()));
        }
        if !self.delimiter.is_ascii() {
            return Err(ImportError::InvalidOptions(format!(
                "delimiter '{}' is not a single-byte character",
                self.delimiter
            )));
        }
        Ok(CsvOptions { delimiter: self.delimiter as u8 })
    }
}

// =============================================================================
// Phases
// =============================================================================

/// Driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Idle,
    ReadingHeader,
    StreamingRows,
    Draining,
    Reporting,
    Done,
    Failed,
}

impl ImportPhase {
    /// Whether `self -> next` is a legal transition.
    pub fn can_advance_to(self, next: ImportPhase) -> bool {
        use ImportPhase::*;
        matches!(
            (self, next),
            (Idle, ReadingHeader)
                | (ReadingHeader, StreamingRows)
                | (StreamingRows, Draining)
                | (Draining, Reporting)
                | (Reporting, Done)
                | (Idle, Failed)
                | (ReadingHeader, Failed)
        )
    }
}

// =============================================================================
// Importer
// =============================================================================

/// Imports CSV data for one entity into a [`BulkStore`].
pub struct Importer<'a> {
    store: &'a dyn BulkStore,
    mapping: EntityMapping,
    options: ImportOptions,
    clock: Option<NaiveDateTime>,
    phase: ImportPhase,
}

impl<'a> Importer<'a> {
    pub fn new(store: &'a dyn BulkStore, mapping: EntityMapping) -> Self {
        Self {
            store,
            mapping,
            options: ImportOptions::default(),
            clock: None,
            phase: ImportPhase::Idle,
        }
    }

    pub fn with_options(mut self, options: ImportOptions) -> Self {
        self.options = options;
        self
    }

    /// Fix the time used for auto-stamped columns.
    pub fn with_clock(mut self, now: NaiveDateTime) -> Self {
        self.clock = Some(now);
        self
    }

    pub fn phase(&self) -> ImportPhase {
        self.phase
    }

    pub fn mapping(&self) -> &EntityMapping {
        &self.mapping
    }

    /// Import a CSV file.
    pub async fn import_file(&mut self, path: impl AsRef<Path>) -> ImportResult<ImportSummary> {
        let path = path.as_ref();
        let file = path.display().to_string();
        self.run(Some(file), |options| CsvSource::open(path, options)).await
    }

    /// Import CSV content held in memory.
    pub async fn import_bytes(&mut self, bytes: &[u8]) -> ImportResult<ImportSummary> {
        self.run(None, |options| CsvSource::from_bytes(bytes, options)).await
    }

    async fn run<F>(&mut self, file: Option<String>, open: F) -> ImportResult<ImportSummary>
    where
        F: Fn(CsvOptions) -> crate::error::CsvResult<CsvSource>,
    {
        let started = Instant::now();
        self.phase = ImportPhase::Idle;

        let csv_options = self.options.validate().map_err(|e| self.fail(e))?;
        self.mapping.validate().map_err(|e| self.fail(e.into()))?;

        // ReadingHeader
        self.advance(ImportPhase::ReadingHeader);
        log_info(format!("📦 Importing {} into '{}'", self.mapping.name, self.mapping.table));
        log_info("📖 Reading CSV file...");
        let mut source = open(csv_options).map_err(|e| self.fail(e.into()))?;
        log_success(format!(
            "{} columns, encoding {}",
            source.header().len(),
            source.encoding()
        ));

        let missing = self.mapping.missing_columns(source.header());
        if !missing.is_empty() {
            let required: Vec<&str> = self
                .mapping
                .fields
                .iter()
                .filter(|f| f.required && missing.iter().any(|m| m == f.source_column()))
                .map(|f| f.source_column())
                .collect();
            if required.is_empty() {
                log_info_indent(format!("Columns not in file (left empty): {}", missing.join(", ")), 1);
            } else {
                log_warning(format!(
                    "Required columns not in file, every row will be skipped: {}",
                    required.join(", ")
                ));
            }
        }

        let references = ReferenceResolver::load(self.store, &self.mapping)
            .await
            .map_err(|e| self.fail(e.into()))?;

        let empty = self.empty_upstreams(source.header(), &references);
        if self.options.strict_references && !empty.is_empty() {
            // Only refuse when the file really carries keys into an empty table
            let scan = open(csv_options).map_err(|e| self.fail(e.into()))?;
            if let Some((column, table)) = first_populated(scan, &empty) {
                return Err(self.fail(ImportError::MissingUpstream { table, column }));
            }
        } else {
            for (column, table) in &empty {
                log_warning(format!(
                    "Upstream table '{}' is empty: '{}' values will not resolve (import '{}' first)",
                    table, column, table
                ));
            }
        }

        // StreamingRows
        self.advance(ImportPhase::StreamingRows);
        log_info("🔄 Transforming and loading rows...");

        let now = self.clock.unwrap_or_else(|| Utc::now().naive_utc());
        let transformer = RowTransformer::with_clock(&self.mapping, &references, now);
        let mut loader = ChunkedLoader::new(self.store, &self.mapping.table)
            .with_chunk_size(self.options.chunk_size)
            .with_max_logged_errors(self.options.max_logged_errors);

        let mut summary = ImportSummary {
            entity: self.mapping.name.clone(),
            table: self.mapping.table.clone(),
            file,
            encoding: source.encoding().to_string(),
            dry_run: self.options.dry_run,
            ..Default::default()
        };
        let mut malformed: Vec<RowError> = Vec::new();
        let mut empty_hits = EmptyReferenceWarnings::new(&self.mapping, &references);

        while let Some(next) = source.next_row() {
            summary.total_rows += 1;

            match next {
                Ok(row) => {
                    empty_hits.observe(&row);
                    match transformer.transform(&row) {
                        RowOutcome::Accepted(record) => loader.submit(record).await,
                        RowOutcome::Skipped(reason) => {
                            summary.skipped += 1;
                            *summary.skip_reasons.entry(reason.to_string()).or_insert(0) += 1;
                        }
                        RowOutcome::Malformed(message) => {
                            summary.errors += 1;
                            self.report_malformed(&mut malformed, format!("line {}", row.line), message);
                        }
                    }
                }
                Err(e) if e.is_row_level() => {
                    summary.errors += 1;
                    self.report_malformed(&mut malformed, "csv".to_string(), e.to_string());
                }
                Err(e) => {
                    // The rest of the file is unreadable; stop here and keep what we have
                    summary.total_rows -= 1;
                    log_error(format!("Stopped reading: {}", e));
                    break;
                }
            }

            let interval = self.options.progress_interval;
            if interval > 0 && summary.total_rows % interval == 0 {
                log_info_indent(format!("Processed {} rows...", summary.total_rows), 1);
            }
        }

        // Draining
        self.advance(ImportPhase::Draining);
        let stats = loader.finish().await;
        summary.successful = stats.successful;
        summary.errors += stats.errors;
        summary.blank_lines = source.blank_lines();
        summary.row_errors = malformed;
        summary.row_errors.extend(stats.error_samples);

        // Reporting
        self.advance(ImportPhase::Reporting);
        summary.duration_ms = started.elapsed().as_millis() as u64;
        log_success(format!(
            "{}: {} rows, {} inserted, {} skipped, {} errors",
            self.mapping.name, summary.total_rows, summary.successful, summary.skipped, summary.errors
        ));

        self.advance(ImportPhase::Done);
        Ok(summary)
    }

    fn advance(&mut self, next: ImportPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.phase,
            next
        );
        self.phase = next;
    }

    fn fail(&mut self, err: ImportError) -> ImportError {
        self.advance(ImportPhase::Failed);
        log_error(format!("{}", err));
        err
    }

    fn report_malformed(&self, samples: &mut Vec<RowError>, label: String, message: String) {
        if samples.len() < self.options.max_logged_errors {
            log_error_indent(format!("Malformed row ({}): {}", label, message), 1);
            samples.push(RowError { label, message });
        }
    }

    /// `(source column, upstream table)` for every column present in the
    /// file whose reference set came back empty.
    fn empty_upstreams(&self, header: &Header, references: &ReferenceSets) -> Vec<(String, String)> {
        let mut reported = HashSet::new();
        let mut empty = Vec::new();
        for field in &self.mapping.fields {
            let Some(name) = field.reference_name() else {
                continue;
            };
            let Some(spec) = self.mapping.references.get(name) else {
                continue;
            };
            if !header.contains(field.source_column())
                || spec.table == self.mapping.table
                || !references.get(name).map_or(true, |s| s.is_empty())
            {
                continue;
            }
            if reported.insert(name) {
                empty.push((field.source_column().to_string(), spec.table.clone()));
            }
        }
        empty
    }
}

/// First `(column, table)` pair whose column holds a non-empty value.
fn first_populated(source: CsvSource, columns: &[(String, String)]) -> Option<(String, String)> {
    for row in source.flatten() {
        for (column, table) in columns {
            if row.get(column).is_some_and(|v| !v.trim().is_empty()) {
                return Some((column.clone(), table.clone()));
            }
        }
    }
    None
}

/// Warns once per reference the first time a non-empty value meets an
/// empty reference set during streaming.
struct EmptyReferenceWarnings<'m> {
    /// (source column, reference name, upstream table)
    watched: Vec<(&'m str, &'m str, &'m str)>,
    warned: HashSet<&'m str>,
}

impl<'m> EmptyReferenceWarnings<'m> {
    fn new(mapping: &'m EntityMapping, references: &ReferenceSets) -> Self {
        let watched = mapping
            .fields
            .iter()
            .filter_map(|f| {
                let name = f.reference_name()?;
                let spec = mapping.references.get(name)?;
                let empty = references.get(name).map_or(true, |s| s.is_empty());
                empty.then_some((f.source_column(), name, spec.table.as_str()))
            })
            .collect();
        Self { watched, warned: HashSet::new() }
    }

    fn observe(&mut self, row: &RawRow) {
        for &(column, name, table) in &self.watched {
            if self.warned.contains(name) {
                continue;
            }
            if row.get(column).is_some_and(|v| !v.trim().is_empty()) {
                self.warned.insert(name);
                log_warning(format!(
                    "Line {}: '{}' has a value but '{}' has no rows; it will not resolve",
                    row.line, column, table
                ));
            }
        }
    }
}

// =============================================================================
// Multi-entity runs
// =============================================================================

/// Import every mapping whose conventional file (`new_<entity>.csv`) exists
/// in `dir`, upstream entities first.
pub async fn import_all(
    store: &dyn BulkStore,
    dir: &Path,
    mappings: &[EntityMapping],
    options: &ImportOptions,
) -> ImportResult<Vec<ImportSummary>> {
    let order = import_order(mappings)?;
    let by_name: BTreeMap<&str, &EntityMapping> = mappings.iter().map(|m| (m.name.as_str(), m)).collect();

    log_info(format!("🗺️  Import order: {}", order.join(" -> ")));

    let mut summaries = Vec::new();
    for name in &order {
        let Some(mapping) = by_name.get(name.as_str()) else {
            continue;
        };
        let path = dir.join(mapping.default_file());
        if !path.is_file() {
            log_info_indent(format!("No {} found, skipping {}", mapping.default_file(), name), 1);
            continue;
        }
        let summary = Importer::new(store, (*mapping).clone())
            .with_options(options.clone())
            .import_file(&path)
            .await?;
        summaries.push(summary);
    }
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{builtin, find_builtin};
    use crate::models::FieldValue;
    use crate::store::{DryRunStore, MemoryStore};
    use chrono::NaiveDate;
    use std::io::Write;

    const GROUP: &str = "11111111-1111-4111-8111-111111111111";
    const UNKNOWN: &str = "99999999-9999-4999-8999-999999999999";

    fn store_with_group() -> MemoryStore {
        let store = MemoryStore::new();
        store.seed("platform_groups", &["uuid", "name"], vec![vec![
            FieldValue::Text(GROUP.into()),
            FieldValue::Text("Gold".into()),
        ]]);
        store
    }

    fn clock() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_three_row_scenario() {
        let store = store_with_group();
        let csv = format!(
            "uuid,name,platform_group_uuid\n,Alpha,{}\n,Beta,\n,Gamma,not-a-uuid\n",
            GROUP
        );

        let mut importer = Importer::new(&store, find_builtin("platform_accounts").unwrap());
        let summary = importer.import_bytes(csv.as_bytes()).await.unwrap();

        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.errors, 0);
        assert!(summary.is_consistent());
        assert_eq!(importer.phase(), ImportPhase::Done);
        assert_eq!(store.count("platform_accounts"), 1);
        assert_eq!(summary.skip_reasons.values().sum::<u64>(), 2);
    }

    #[tokio::test]
    async fn test_unknown_required_reference_is_skipped_not_error() {
        let store = store_with_group();
        let csv = format!(
            "platform_group_uuid,platform_login_id\n{},1001\n{},1002\n",
            GROUP, UNKNOWN
        );
        let summary = Importer::new(&store, find_builtin("platform_accounts").unwrap())
            .import_bytes(csv.as_bytes())
            .await
            .unwrap();

        assert_eq!(summary.successful, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 0);
        assert_eq!(
            store.column("platform_accounts", "platform_login_id"),
            vec![FieldValue::Text("1001".into())]
        );
    }

    #[tokio::test]
    async fn test_blank_lines_not_counted() {
        let store = MemoryStore::new();
        let csv = "name,description\nadmin,Admins\n\n , \nsupport,\n";
        let summary = Importer::new(&store, find_builtin("roles").unwrap())
            .import_bytes(csv.as_bytes())
            .await
            .unwrap();

        assert_eq!(summary.total_rows, 2);
        assert_eq!(summary.successful, 2);
        assert_eq!(summary.blank_lines, 1);
        assert!(summary.is_consistent());
    }

    #[tokio::test]
    async fn test_malformed_rows_counted_as_errors() {
        let store = MemoryStore::new();
        let csv = "name,description\nadmin,Admins,extra\nsupport,Help\nbad\0name,x\n";
        let summary = Importer::new(&store, find_builtin("roles").unwrap())
            .import_bytes(csv.as_bytes())
            .await
            .unwrap();

        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.successful, 1);
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.row_errors.len(), 2);
        assert!(summary.is_consistent());
    }

    #[tokio::test]
    async fn test_batch_failure_falls_back_per_row() {
        let store = MemoryStore::new().with_not_null("roles", "description");
        let mut csv = String::from("name,description\n");
        for i in 0..1000 {
            if i == 321 {
                csv.push_str(&format!("role-{},\n", i));
            } else {
                csv.push_str(&format!("role-{},desc\n", i));
            }
        }

        let summary = Importer::new(&store, find_builtin("roles").unwrap())
            .import_bytes(csv.as_bytes())
            .await
            .unwrap();

        assert_eq!(summary.total_rows, 1000);
        assert_eq!(summary.successful, 999);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.row_errors[0].label, "role-321");
        assert_eq!(store.count("roles"), 999);
    }

    #[tokio::test]
    async fn test_rerun_with_explicit_ids_rejects_duplicates() {
        let store = MemoryStore::new();
        let csv = format!("uuid,name\n{},admin\n,support\n", GROUP);
        let mapping = find_builtin("roles").unwrap();

        let first = Importer::new(&store, mapping.clone()).import_bytes(csv.as_bytes()).await.unwrap();
        assert_eq!(first.successful, 2);

        let second = Importer::new(&store, mapping).import_bytes(csv.as_bytes()).await.unwrap();
        // Explicit id collides, generated id does not
        assert_eq!(second.successful, 1);
        assert_eq!(second.errors, 1);
        assert_eq!(store.count("roles"), 3);
    }

    #[tokio::test]
    async fn test_missing_file_fails_before_streaming() {
        let store = MemoryStore::new();
        let mut importer = Importer::new(&store, find_builtin("roles").unwrap());
        let result = importer.import_file("/nonexistent/new_roles.csv").await;
        assert!(matches!(result, Err(ImportError::Csv(_))));
        assert_eq!(importer.phase(), ImportPhase::Failed);
    }

    #[tokio::test]
    async fn test_reference_load_failure_is_fatal() {
        let store = MemoryStore::new().without_table("platform_groups");
        let mut importer = Importer::new(&store, find_builtin("platform_accounts").unwrap());
        let result = importer.import_bytes(b"platform_group_uuid\nx\n").await;
        assert!(matches!(result, Err(ImportError::Store(_))));
        assert_eq!(importer.phase(), ImportPhase::Failed);
        assert_eq!(store.count("platform_accounts"), 0);
    }

    #[tokio::test]
    async fn test_strict_references_refuse_empty_upstream() {
        let store = MemoryStore::new();
        let options = ImportOptions { strict_references: true, ..Default::default() };
        let mut importer = Importer::new(&store, find_builtin("platform_accounts").unwrap()).with_options(options);
        let result = importer
            .import_bytes(format!("platform_group_uuid\n{}\n", GROUP).as_bytes())
            .await;
        match result {
            Err(ImportError::MissingUpstream { table, .. }) => assert_eq!(table, "platform_groups"),
            other => panic!("expected MissingUpstream, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_strict_references_ignore_empty_columns() {
        let store = MemoryStore::new();
        let options = ImportOptions { strict_references: true, ..Default::default() };
        let summary = Importer::new(&store, find_builtin("payout_requests").unwrap())
            .with_options(options)
            .import_bytes(b"user_uuid,amount\n,10\n")
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_empty_upstream_only_warns_by_default() {
        let store = MemoryStore::new();
        let summary = Importer::new(&store, find_builtin("platform_accounts").unwrap())
            .import_bytes(format!("platform_group_uuid\n{}\n", GROUP).as_bytes())
            .await
            .unwrap();
        assert_eq!(summary.skipped, 1);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let store = MemoryStore::new();
        let options = ImportOptions { chunk_size: 0, ..Default::default() };
        let result = Importer::new(&store, find_builtin("roles").unwrap())
            .with_options(options)
            .import_bytes(b"name\nadmin\n")
            .await;
        assert!(matches!(result, Err(ImportError::InvalidOptions(_))));
    }

    #[tokio::test]
    async fn test_dry_run_counts_without_writing() {
        let store = DryRunStore::new(MemoryStore::new());
        let options = ImportOptions { dry_run: true, ..Default::default() };
        let summary = Importer::new(&store, find_builtin("roles").unwrap())
            .with_options(options)
            .with_clock(clock())
            .import_bytes(b"name\nadmin\nsupport\n")
            .await
            .unwrap();
        assert_eq!(summary.successful, 2);
        assert!(summary.dry_run);
        assert_eq!(store.would_insert("roles"), 2);
        assert_eq!(store.into_inner().count("roles"), 0);
    }

    #[tokio::test]
    async fn test_semicolon_delimiter() {
        let store = MemoryStore::new();
        let options = ImportOptions { delimiter: ';', ..Default::default() };
        let summary = Importer::new(&store, find_builtin("roles").unwrap())
            .with_options(options)
            .import_bytes(b"name;description\nadmin;Admins, all of them\n")
            .await
            .unwrap();
        assert_eq!(summary.successful, 1);
        assert_eq!(
            store.column("roles", "description"),
            vec![FieldValue::Text("Admins, all of them".into())]
        );
    }

    #[tokio::test]
    async fn test_import_all_follows_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, content: &str| {
            let mut f = std::fs::File::create(dir.path().join(name)).unwrap();
            f.write_all(content.as_bytes()).unwrap();
        };
        write(
            "new_platform_accounts.csv",
            &format!("platform_group_uuid,platform_login_id\n{},7001\n", GROUP),
        );
        write("new_platform_groups.csv", &format!("uuid,name\n{},Gold\n", GROUP));

        let store = MemoryStore::new();
        let summaries = import_all(&store, dir.path(), &builtin(), &ImportOptions::default())
            .await
            .unwrap();

        let names: Vec<&str> = summaries.iter().map(|s| s.entity.as_str()).collect();
        assert_eq!(names, vec!["platform_groups", "platform_accounts"]);
        assert_eq!(summaries[1].successful, 1);
        assert_eq!(store.count("platform_accounts"), 1);
    }

    #[test]
    fn test_phase_transitions() {
        use ImportPhase::*;
        assert!(Idle.can_advance_to(ReadingHeader));
        assert!(ReadingHeader.can_advance_to(Failed));
        assert!(!StreamingRows.can_advance_to(Failed));
        assert!(!Draining.can_advance_to(Failed));
        assert!(!Idle.can_advance_to(StreamingRows));
        assert!(Reporting.can_advance_to(Done));
    }
}
