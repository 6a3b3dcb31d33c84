//! Import summary and its table rendering.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::loader::RowError;

/// Outcome counters of one import run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub entity: String,
    pub table: String,
    pub file: Option<String>,
    pub encoding: String,
    pub dry_run: bool,

    /// Non-blank data rows read
    pub total_rows: u64,
    pub successful: u64,
    pub skipped: u64,
    pub errors: u64,

    /// All-empty lines passed over (not part of `total_rows`)
    pub blank_lines: u64,

    /// Skip counts by reason
    pub skip_reasons: BTreeMap<String, u64>,

    /// First row-level errors (malformed rows and rejected inserts)
    pub row_errors: Vec<RowError>,

    pub duration_ms: u64,
}

impl ImportSummary {
    /// `total_rows = successful + skipped + errors`
    pub fn is_consistent(&self) -> bool {
        self.total_rows == self.successful + self.skipped + self.errors
    }

    /// Metric/count table as printed at the end of a run.
    pub fn render_table(&self) -> String {
        let rows = [
            ("Total Rows", self.total_rows),
            ("Successful", self.successful),
            ("Skipped", self.skipped),
            ("Errors", self.errors),
        ];
        let metric_width = rows.iter().map(|(m, _)| m.len()).max().unwrap_or(0).max("Metric".len());
        let count_width = rows
            .iter()
            .map(|(_, c)| c.to_string().len())
            .max()
            .unwrap_or(0)
            .max("Count".len());

        let border = format!("+-{}-+-{}-+", "-".repeat(metric_width), "-".repeat(count_width));
        let mut out = Vec::with_capacity(rows.len() + 4);
        out.push(border.clone());
        out.push(format!("| {:<mw$} | {:>cw$} |", "Metric", "Count", mw = metric_width, cw = count_width));
        out.push(border.clone());
        for (metric, count) in rows {
            out.push(format!("| {:<mw$} | {:>cw$} |", metric, count, mw = metric_width, cw = count_width));
        }
        out.push(border);
        out.join("\n")
    }

    pub fn print(&self) {
        println!();
        println!("📊 Import summary for {} ({})", self.entity, self.table);
        println!("{}", self.render_table());
        if !self.skip_reasons.is_empty() {
            println!("   Skipped rows by reason:");
            for (reason, count) in &self.skip_reasons {
                println!("   - {}: {}", reason, count);
            }
        }
        if self.dry_run {
            println!("   (dry run: nothing was written)");
        }
    }
}
