//! Row mapping: one raw data row -> `MappedRow`
//!
//! Mapping never panics past this boundary and reports failures as
//! `MapError`, carrying the row's variable code and subchapter label when
//! they can be read. Per-year problems are skipped, not fatal, except a
//! year header that cannot be found in the header row at all.

use crate::header::{HeaderLayout, REQUIRED_COLUMNS};
use crate::model::{MappedRow, YearValue, UNKNOWN_CHAPTER};
use bigdecimal::{BigDecimal, Zero};
use std::str::FromStr;
use thiserror::Error;
use tracing::{trace, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{message} (variable: {}, subchapter: {})",
    .variable_code.as_deref().unwrap_or("?"),
    .subchapter.as_deref().unwrap_or("?")
)]
pub struct MapError {
    pub message: String,
    pub variable_code: Option<String>,
    pub subchapter: Option<String>,
}

impl MapError {
    fn new(message: String, row: &[String], layout: &HeaderLayout) -> Self {
        Self {
            message,
            variable_code: cell(row, layout, "CODE").map(str::to_string),
            subchapter: cell(row, layout, "SUB-CHAPTER").map(str::to_string),
        }
    }
}

/// Trimmed cell for a named column, if both the column and the cell exist
fn cell<'a>(row: &'a [String], layout: &HeaderLayout, name: &str) -> Option<&'a str> {
    layout
        .index_of(name)
        .and_then(|idx| row.get(idx))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

fn required<'a>(row: &'a [String], layout: &HeaderLayout, name: &str) -> &'a str {
    layout
        .index_of(name)
        .and_then(|idx| row.get(idx))
        .map(|s| s.trim())
        .unwrap_or_default()
}

/// Invariant-culture number: optional leading or trailing sign, `,` group
/// separators in the integer part, one `.` point. No exponent. Anything else
/// ("NA", blanks, `1e5`) is zero.
pub fn parse_amount(text: &str) -> BigDecimal {
    normalize_amount(text)
        .and_then(|plain| BigDecimal::from_str(&plain).ok())
        .unwrap_or_else(BigDecimal::zero)
}

fn normalize_amount(text: &str) -> Option<String> {
    let is_sign = |c: char| c == '-' || c == '+';
    let mut body = text.trim();
    let mut negative = false;
    if let Some(rest) = body.strip_prefix(is_sign) {
        negative = body.starts_with('-');
        body = rest;
    } else if let Some(rest) = body.strip_suffix(is_sign) {
        negative = body.ends_with('-');
        body = rest;
    }

    let mut int = String::new();
    let mut frac = String::new();
    let mut point = false;
    for c in body.chars() {
        match c {
            '0'..='9' if point => frac.push(c),
            '0'..='9' => int.push(c),
            ',' if !point && !int.is_empty() => {}
            '.' if !point => point = true,
            _ => return None,
        }
    }
    if int.is_empty() && frac.is_empty() {
        return None;
    }
    Some(format!(
        "{}{}.{}",
        if negative { "-" } else { "" },
        if int.is_empty() { "0" } else { int.as_str() },
        if frac.is_empty() { "0" } else { frac.as_str() },
    ))
}

/// Map one data row.
///
/// `header` is the file's raw header row; `layout` its resolved column map;
/// `chapter_name` the chapter resolved for this file (or row).
pub fn map_row(
    row: &[String],
    header: &[String],
    layout: &HeaderLayout,
    chapter_name: &str,
) -> Result<MappedRow, MapError> {
    for name in REQUIRED_COLUMNS {
        let present = layout
            .index_of(name)
            .map(|idx| idx < row.len())
            .unwrap_or(false);
        if !present {
            return Err(MapError::new(
                format!("Row is missing or has invalid {} index/data", name),
                row,
                layout,
            ));
        }
    }

    let chapter_name = match chapter_name.trim() {
        "" => UNKNOWN_CHAPTER.to_string(),
        name => name.to_string(),
    };
    let variable_code = required(row, layout, "CODE");
    let subchapter_name = required(row, layout, "SUB-CHAPTER");

    let mut values = Vec::with_capacity(layout.year_columns.len());
    for year_text in &layout.year_columns {
        let Some(position) = header.iter().position(|h| h.trim() == year_text) else {
            return Err(MapError::new(
                format!("Year column '{}' not found in header", year_text),
                row,
                layout,
            ));
        };

        let Some(raw) = row.get(position) else {
            warn!(
                variable = variable_code,
                subchapter = subchapter_name,
                year = %year_text,
                index = position,
                row_len = row.len(),
                "row too short for year column, skipping year"
            );
            continue;
        };

        let year: i32 = match year_text.parse() {
            Ok(y) => y,
            Err(_) => {
                warn!(
                    variable = variable_code,
                    subchapter = subchapter_name,
                    year = %year_text,
                    "year header is not an integer, skipping year"
                );
                continue;
            }
        };

        let amount = parse_amount(raw);
        trace!(variable = variable_code, year, raw = %raw, amount = %amount, "year value");
        values.push(YearValue { year, amount });
    }

    Ok(MappedRow {
        chapter_name,
        subchapter_name: subchapter_name.to_string(),
        variable_code: variable_code.to_string(),
        variable_name: required(row, layout, "TITLE").to_string(),
        unit_code: required(row, layout, "UNIT_CODE").to_string(),
        unit_description: required(row, layout, "UNIT_DESCRIPTION").to_string(),
        country_code: required(row, layout, "CNTRY").to_string(),
        country_name: required(row, layout, "COUNTRY").to_string(),
        values,
        trn: cell(row, layout, "TRN").map(str::to_string),
        agg: cell(row, layout, "AGG").map(str::to_string),
        reference: cell(row, layout, "REF").map(str::to_string),
    })
}

// =============================================================================
// TESTS
// =============================================================================
