//! Builds one consolidated spreadsheet per destination group.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sanitize::{redact_path, sanitize_filename};
use crate::sheet::{self, Cell, Table, MAX_COLUMNS, MAX_ROWS};

/// Which rows of a contributing source end up in the group's output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    /// Every row of a source that matched the group at least once.
    #[default]
    WholeFile,
    /// Only the rows routed to the group.
    MatchedRows,
}

#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("No readable source for group '{group_id}': {reasons}")]
    EmptySource { group_id: String, reasons: String },

    #[error("Cannot merge sources for group '{group_id}': {reason}")]
    Merge { group_id: String, reason: String },

    #[error("Failed to write output for group '{group_id}': {reason}")]
    Write { group_id: String, reason: String },
}

/// A source spreadsheet and the data rows it routed to the group.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub rows: Vec<usize>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>, rows: Vec<usize>) -> Self {
        Self {
            path: path.into(),
            rows,
        }
    }
}

/// Writes aggregated spreadsheets into an output directory.
#[derive(Debug, Clone)]
pub struct Aggregator {
    output_dir: PathBuf,
    mode: AggregationMode,
}

impl Aggregator {
    pub fn new(output_dir: impl Into<PathBuf>, mode: AggregationMode) -> Self {
        Self {
            output_dir: output_dir.into(),
            mode,
        }
    }

    /// Merges `sources` into one new file for `group_id` and returns its path.
    ///
    /// Unreadable sources are skipped with a warning; the call fails only when
    /// none can be read. Columns are the union of all source headers in order
    /// of first appearance, with missing cells left blank. Source files are
    /// never modified or removed.
    pub fn aggregate(
        &self,
        group_id: &str,
        sources: &[SourceFile],
    ) -> Result<PathBuf, AggregateError> {
        let mut tables = Vec::with_capacity(sources.len());
        let mut failures = Vec::new();
        for source in sources {
            match sheet::read_table(&source.path) {
                Ok(table) => tables.push((table, source)),
                Err(e) => {
                    tracing::warn!(
                        group = group_id,
                        file = %redact_path(&source.path),
                        error = %e,
                        "Skipping unreadable source"
                    );
                    failures.push(e.to_string());
                }
            }
        }

        if tables.is_empty() {
            return Err(AggregateError::EmptySource {
                group_id: group_id.to_string(),
                reasons: if failures.is_empty() {
                    "no sources given".to_string()
                } else {
                    failures.join("; ")
                },
            });
        }

        let merged = self.merge(group_id, &tables)?;
        let output = self.output_path(group_id);

        std::fs::create_dir_all(&self.output_dir).map_err(|e| AggregateError::Write {
            group_id: group_id.to_string(),
            reason: format!("{}: {}", self.output_dir.display(), e),
        })?;
        sheet::write_table(&merged, &output).map_err(|e| AggregateError::Write {
            group_id: group_id.to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(
            group = group_id,
            sources = tables.len(),
            rows = merged.rows.len(),
            output = %redact_path(&output),
            "Aggregated group output"
        );
        Ok(output)
    }

    fn merge(&self, group_id: &str, tables: &[(Table, &SourceFile)]) -> Result<Table, AggregateError> {
        let merge_err = |reason: String| AggregateError::Merge {
            group_id: group_id.to_string(),
            reason,
        };

        let mut headers: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for (table, _) in tables {
            for header in &table.headers {
                if !index.contains_key(header) {
                    index.insert(header.clone(), headers.len());
                    headers.push(header.clone());
                }
            }
        }

        if headers.is_empty() {
            return Err(merge_err("sources have no columns".to_string()));
        }
        if headers.len() > MAX_COLUMNS {
            return Err(merge_err(format!(
                "{} distinct columns exceed the limit of {}",
                headers.len(),
                MAX_COLUMNS
            )));
        }

        let mut rows: Vec<Vec<Cell>> = Vec::new();
        for (table, source) in tables {
            let mapping: Vec<usize> = table.headers.iter().map(|h| index[h]).collect();
            let selected: Box<dyn Iterator<Item = usize>> = match self.mode {
                AggregationMode::WholeFile => Box::new(0..table.rows.len()),
                AggregationMode::MatchedRows => Box::new(
                    source
                        .rows
                        .iter()
                        .copied()
                        .filter(|&r| r < table.rows.len()),
                ),
            };
            for r in selected {
                let mut out = vec![Cell::Empty; headers.len()];
                for (col, target) in mapping.iter().enumerate() {
                    out[*target] = table.cell(r, col).clone();
                }
                rows.push(out);
            }
        }

        if rows.len() + 1 > MAX_ROWS {
            return Err(merge_err(format!(
                "{} rows exceed the limit of {}",
                rows.len(),
                MAX_ROWS - 1
            )));
        }

        Ok(Table::new(headers, rows))
    }

    /// `{group}_{YYYYmmdd_HHMMSS_micros}_{uuid8}.xlsx` inside the output directory.
    fn output_path(&self, group_id: &str) -> PathBuf {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S_%6f");
        let unique = uuid::Uuid::new_v4().simple().to_string();
        let name = format!(
            "{}_{}_{}.xlsx",
            sanitize_filename(group_id),
            timestamp,
            &unique[..8]
        );
        self.output_dir.join(name)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
