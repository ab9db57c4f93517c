//! Header classification and validation
//!
//! Header names are matched case-insensitively: every non-year cell is
//! indexed under its trimmed, upper-cased text. Year detection is purely
//! numeric so casing does not apply there.

use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Dimension columns every extract must provide
pub const REQUIRED_COLUMNS: [&str; 10] = [
    "CODE",
    "SUB-CHAPTER",
    "TITLE",
    "UNIT_CODE",
    "UNIT_DESCRIPTION",
    "CNTRY",
    "COUNTRY",
    "TRN",
    "AGG",
    "REF",
];

/// Legacy extracts carry two "UNIT" cells instead of UNIT_CODE/UNIT_DESCRIPTION
const LEGACY_UNIT: &str = "UNIT";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),
    #[error("No year columns found in header")]
    NoYearColumns,
}

/// Column positions resolved from a valid header
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderLayout {
    /// Upper-cased column name -> first index
    pub column_index: HashMap<String, usize>,
    /// Year header texts, trimmed, in header order
    pub year_columns: Vec<String>,
}

impl HeaderLayout {
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.column_index.get(&name.to_ascii_uppercase()).copied()
    }
}

fn is_year(cell: &str) -> bool {
    cell.parse::<i32>().is_ok()
}

/// Classify header cells and check that the required set is present.
///
/// `file` is only used for log context.
pub fn resolve_header(header: &[String], file: &Path) -> Result<HeaderLayout, HeaderError> {
    let mut layout = HeaderLayout::default();
    let mut in_year_region = false;
    let mut unit_cells_seen = 0usize;

    for (idx, raw) in header.iter().enumerate() {
        let cell = raw.trim();
        if cell.is_empty() {
            warn!(file = %file.display(), index = idx, "blank column header, ignored");
            continue;
        }

        if is_year(cell) {
            if layout.year_columns.iter().any(|y| y == cell) {
                warn!(file = %file.display(), index = idx, year = cell, "duplicate year column");
            }
            in_year_region = true;
            layout.year_columns.push(cell.to_string());
            continue;
        }

        let name = cell.to_ascii_uppercase();

        if in_year_region {
            warn!(
                file = %file.display(),
                index = idx,
                column = cell,
                "non-numeric column after year columns started"
            );
            insert_first(&mut layout, name, idx, file);
            continue;
        }

        if name == LEGACY_UNIT {
            let key = match unit_cells_seen {
                0 => "UNIT_CODE",
                1 => "UNIT_DESCRIPTION",
                _ => {
                    warn!(file = %file.display(), index = idx, "extra UNIT column ignored");
                    continue;
                }
            };
            unit_cells_seen += 1;
            insert_first(&mut layout, key.to_string(), idx, file);
            continue;
        }

        insert_first(&mut layout, name, idx, file);
    }

    for required in REQUIRED_COLUMNS {
        if !layout.column_index.contains_key(required) {
            return Err(HeaderError::MissingColumn(required));
        }
    }

    if layout.year_columns.is_empty() {
        return Err(HeaderError::NoYearColumns);
    }

    Ok(layout)
}

fn insert_first(layout: &mut HeaderLayout, name: String, idx: usize, file: &Path) {
    if let Some(first) = layout.column_index.get(&name) {
        warn!(
            file = %file.display(),
            column = %name,
            index = idx,
            first_index = *first,
            "duplicate column header, keeping first occurrence"
        );
        return;
    }
    layout.column_index.insert(name, idx);
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn cols(s: &str) -> Vec<String> {
        s.split(',').map(|c| c.to_string()).collect()
    }

    fn file() -> &'static Path {
        Path::new("AMECO1.CSV")
    }

    const CURRENT: &str =
        "CODE,SUB-CHAPTER,TITLE,UNIT_CODE,UNIT_DESCRIPTION,CNTRY,COUNTRY,TRN,AGG,REF,2020,2021";

    #[test]
    fn test_current_shape_is_valid() {
        let layout = resolve_header(&cols(CURRENT), file()).unwrap();
        assert_eq!(layout.index_of("CODE"), Some(0));
        assert_eq!(layout.index_of("UNIT_DESCRIPTION"), Some(4));
        assert_eq!(layout.index_of("REF"), Some(9));
        assert_eq!(layout.year_columns, vec!["2020", "2021"]);
    }

    #[test]
    fn test_legacy_unit_pair_is_split() {
        let header = cols("CODE,SUB-CHAPTER,TITLE,UNIT,UNIT,CNTRY,COUNTRY,TRN,AGG,REF,1960");
        let layout = resolve_header(&header, file()).unwrap();
        assert_eq!(layout.index_of("UNIT_CODE"), Some(3));
        assert_eq!(layout.index_of("UNIT_DESCRIPTION"), Some(4));
        assert_eq!(layout.index_of("UNIT"), None);
    }

    #[test]
    fn test_missing_required_column_is_named() {
        let header = cols("CODE,SUB-CHAPTER,TITLE,UNIT_CODE,UNIT_DESCRIPTION,COUNTRY,TRN,AGG,REF,2020");
        let err = resolve_header(&header, file()).unwrap_err();
        assert_eq!(err, HeaderError::MissingColumn("CNTRY"));
        assert_eq!(err.to_string(), "Missing required column: CNTRY");
    }

    #[test]
    fn test_first_missing_column_in_required_order() {
        let header = cols("TITLE,2020");
        let err = resolve_header(&header, file()).unwrap_err();
        assert_eq!(err, HeaderError::MissingColumn("CODE"));
    }

    #[test]
    fn test_no_year_columns() {
        let header = cols("CODE,SUB-CHAPTER,TITLE,UNIT_CODE,UNIT_DESCRIPTION,CNTRY,COUNTRY,TRN,AGG,REF");
        let err = resolve_header(&header, file()).unwrap_err();
        assert_eq!(err, HeaderError::NoYearColumns);
    }

    #[test]
    fn test_blank_cells_skipped() {
        // AMECO extracts end every line with a trailing comma
        let header = cols(&format!("{},", CURRENT));
        let layout = resolve_header(&header, file()).unwrap();
        assert_eq!(layout.year_columns.len(), 2);
        assert_eq!(layout.column_index.len(), 10);
    }

    #[test]
    fn test_case_insensitive_names() {
        let header = cols("code,Sub-Chapter,title,unit_code,Unit_Description,cntry,country,trn,agg,ref,2020");
        let layout = resolve_header(&header, file()).unwrap();
        assert_eq!(layout.index_of("SUB-CHAPTER"), Some(1));
        assert_eq!(layout.index_of("sub-chapter"), Some(1));
    }

    #[test]
    fn test_whitespace_trimmed() {
        let header = cols(" CODE ,SUB-CHAPTER,TITLE,UNIT_CODE,UNIT_DESCRIPTION,CNTRY,COUNTRY,TRN,AGG,REF, 2020 ");
        let layout = resolve_header(&header, file()).unwrap();
        assert_eq!(layout.index_of("CODE"), Some(0));
        assert_eq!(layout.year_columns, vec!["2020"]);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let header = cols(&format!("{},CODE", CURRENT.replace(",2020,2021", ",TITLE,2020")));
        let layout = resolve_header(&header, file()).unwrap();
        assert_eq!(layout.index_of("TITLE"), Some(2));
        assert_eq!(layout.index_of("CODE"), Some(0));
    }

    #[test]
    fn test_trailing_named_column_recorded() {
        let header = cols(&format!("{},NOTES", CURRENT));
        let layout = resolve_header(&header, file()).unwrap();
        assert_eq!(layout.index_of("NOTES"), Some(12));
        assert_eq!(layout.year_columns, vec!["2020", "2021"]);
    }

    #[test]
    fn test_year_columns_keep_header_order() {
        let header = cols(&format!("{},2022,2023", CURRENT));
        let layout = resolve_header(&header, file()).unwrap();
        assert_eq!(layout.year_columns, vec!["2020", "2021", "2022", "2023"]);
    }
}
