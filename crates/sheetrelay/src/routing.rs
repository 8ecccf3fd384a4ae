//! Row resolver: finds the region column of a table and maps each row to at
//! most one destination group.

use thiserror::Error;

use crate::normalize::{contains_word, normalize_region};
use crate::registry::GroupRegistry;
use crate::sheet::Table;

/// Header words that indicate a region column, already normalized.
pub const REGION_KEYWORDS: &[&str] = &[
    "SEHIR", "CITY", "IL", "LOCATION", "CITY_NAME", "ILLER", "PROVINCE", "SEHIRLER", "ILCE",
    "DISTRICT", "YER", "REGION", "BOLGE",
];

/// Data rows inspected per column when no header matches.
pub const SAMPLE_ROWS: usize = 20;

/// Minimum known-region cells within the sample for a column to qualify.
pub const MIN_REGION_HITS: usize = 3;

/// Shortest known region name matched inside a longer header word.
pub const MIN_EMBEDDED_REGION_CHARS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("no region column")]
    NoRegionColumn,
}

/// How the region column was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnMatch {
    Keyword,
    RegionInHeader,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionColumn {
    pub index: usize,
    pub matched_by: ColumnMatch,
}

/// Rows routed to one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRoute {
    pub group_id: String,
    /// Data row indices, ascending.
    pub rows: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoutingResult {
    /// Groups in registry order; only groups with at least one row appear.
    pub routes: Vec<GroupRoute>,
    pub unmatched_rows: usize,
    pub blank_rows: usize,
}

impl RoutingResult {
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn rows_for(&self, group_id: &str) -> Option<&[usize]> {
        self.routes
            .iter()
            .find(|r| r.group_id == group_id)
            .map(|r| r.rows.as_slice())
    }
}

/// Locates the column holding region values.
///
/// Tries, in order: a header containing a region keyword, a header containing a
/// known region name, then the first column whose first [`SAMPLE_ROWS`] data
/// cells hold at least [`MIN_REGION_HITS`] known region names.
///
/// Header checks look for whole words first and fall back to plain substring
/// containment, so inflected headers such as "Teslim İli" still match. Region
/// names shorter than [`MIN_EMBEDDED_REGION_CHARS`] only match as whole words.
pub fn find_region_column(
    table: &Table,
    registry: &GroupRegistry,
) -> Result<RegionColumn, RoutingError> {
    let headers: Vec<String> = table.headers.iter().map(|h| normalize_region(h)).collect();

    let keyword_in = |h: &str, whole: bool| {
        REGION_KEYWORDS
            .iter()
            .any(|kw| if whole { contains_word(h, kw) } else { h.contains(kw) })
    };
    if let Some(index) = first_header(&headers, |h| keyword_in(h, true))
        .or_else(|| first_header(&headers, |h| keyword_in(h, false)))
    {
        return Ok(RegionColumn {
            index,
            matched_by: ColumnMatch::Keyword,
        });
    }

    let region_in = |h: &str, whole: bool| {
        registry.known_regions().iter().any(|region| {
            if whole {
                contains_word(h, region)
            } else {
                region.chars().count() >= MIN_EMBEDDED_REGION_CHARS && h.contains(region.as_str())
            }
        })
    };
    if let Some(index) = first_header(&headers, |h| region_in(h, true))
        .or_else(|| first_header(&headers, |h| region_in(h, false)))
    {
        return Ok(RegionColumn {
            index,
            matched_by: ColumnMatch::RegionInHeader,
        });
    }

    let sample = table.rows.len().min(SAMPLE_ROWS);
    for col in 0..table.width() {
        let hits = (0..sample)
            .filter(|&row| {
                let value = normalize_region(&table.cell(row, col).to_string());
                !value.is_empty() && registry.is_known_region(&value)
            })
            .count();
        if hits >= MIN_REGION_HITS {
            return Ok(RegionColumn {
                index: col,
                matched_by: ColumnMatch::Content,
            });
        }
    }

    Err(RoutingError::NoRegionColumn)
}

fn first_header(headers: &[String], matches: impl Fn(&str) -> bool) -> Option<usize> {
    headers.iter().position(|h| !h.is_empty() && matches(h))
}

/// Maps every data row to at most one group by its region cell.
///
/// Blank cells are counted separately from cells that match no group. When a
/// region is listed by several groups, the first in registry order wins.
pub fn resolve(table: &Table, column: usize, registry: &GroupRegistry) -> RoutingResult {
    let mut per_group: Vec<Vec<usize>> = vec![Vec::new(); registry.groups().len()];
    let mut result = RoutingResult::default();

    for row in 0..table.rows.len() {
        let cell = table.cell(row, column);
        if cell.is_blank() {
            result.blank_rows += 1;
            continue;
        }
        let value = normalize_region(&cell.to_string());
        match registry.group_index_for(&value) {
            Some(idx) => per_group[idx].push(row),
            None => result.unmatched_rows += 1,
        }
    }

    result.routes = registry
        .groups()
        .iter()
        .zip(per_group)
        .filter(|(_, rows)| !rows.is_empty())
        .map(|(group, rows)| GroupRoute {
            group_id: group.id().to_string(),
            rows,
        })
        .collect();

    result
}
