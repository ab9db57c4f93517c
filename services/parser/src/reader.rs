//! Raw file ingestion
//!
//! Reads one extract (CSV or spreadsheet) into a header row plus data rows.
//! Cells stay raw strings ("NA" included); every data row is padded or
//! truncated to the header's width. Failures surface as `None`, never as an
//! error: an unreadable file is skipped by the pipeline, not fatal.

use anyhow::{Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use encoding_rs::{Encoding, WINDOWS_1252};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, error, warn};

/// Header plus data rows, each row tagged with the source line it came from
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Grid {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// 1-based line (CSV) or sheet row (spreadsheet) of each entry in `rows`
    pub lines: Vec<u64>,
}

/// Header plus data rows read from one file
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub lines: Vec<u64>,
    pub content_hash: String,
}

/// Spreadsheet extensions handled by calamine
const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods"];

fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            SPREADSHEET_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// Read a file into a `RawTable`.
///
/// Returns `None` when the file cannot be opened or decoded, has no header,
/// or has no data rows.
pub async fn read_table(path: &Path) -> Option<RawTable> {
    debug!(file = %path.display(), "reading file");

    let bytes = match fs::read(path).await {
        Ok(b) => b,
        Err(e) => {
            error!(file = %path.display(), error = %e, "I/O error reading file");
            return None;
        }
    };
    let content_hash = fingerprint(&bytes);

    let parsed = if is_spreadsheet(path) {
        let owned: PathBuf = path.to_path_buf();
        match tokio::task::spawn_blocking(move || parse_spreadsheet(&owned)).await {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("spreadsheet reader task failed: {}", e)),
        }
    } else {
        parse_csv(&decode(&bytes))
    };

    let grid = match parsed {
        Ok(Some(grid)) => grid,
        Ok(None) => {
            warn!(file = %path.display(), "no header row found");
            return None;
        }
        Err(e) => {
            error!(file = %path.display(), error = %format!("{:#}", e), "failed to parse file");
            return None;
        }
    };

    if grid.rows.is_empty() {
        warn!(file = %path.display(), "header found but no data rows");
        return None;
    }

    debug!(
        file = %path.display(),
        columns = grid.header.len(),
        rows = grid.rows.len(),
        "file read"
    );

    Some(RawTable {
        header: grid.header,
        rows: grid.rows,
        lines: grid.lines,
        content_hash,
    })
}

/// SHA-256 of the raw file bytes
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Decode file bytes: BOM first, then UTF-8, then Windows-1252
pub fn decode(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            text.into_owned()
        }
    }
}

/// Parse CSV text into (header, rows).
///
/// Quoted delimiters are honored. `Ok(None)` means no header line exists.
pub fn parse_csv(content: &str) -> Result<Option<Grid>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::None)
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    for (line_idx, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV parse error at record {}", line_idx + 1))?;
        let line = record.position().map(|p| p.line()).unwrap_or(line_idx as u64 + 1);
        records.push((line, record.iter().map(|f| f.to_string()).collect::<Vec<_>>()));
    }

    Ok(split_header(records))
}

/// Parse the first sheet of a workbook into (header, rows)
pub fn parse_spreadsheet(path: &Path) -> Result<Option<Grid>> {
    let mut workbook: calamine::Sheets<_> =
        open_workbook_auto(path).context("Failed to open spreadsheet")?;

    let sheet_names = workbook.sheet_names().to_vec();
    let sheet_name = match sheet_names.first() {
        Some(name) => name.clone(),
        None => anyhow::bail!("Spreadsheet has no sheets"),
    };
    if sheet_names.len() > 1 {
        debug!(
            file = %path.display(),
            sheet = %sheet_name,
            sheets = sheet_names.len(),
            "reading first sheet only"
        );
    }

    let range = workbook
        .worksheet_range(&sheet_name)
        .context("Failed to read sheet")?;

    // Sheet rows are 1-based; the used range may start below row 1
    let first_row = range.start().map(|(row, _)| row as u64).unwrap_or(0);
    let records = range
        .rows()
        .enumerate()
        .map(|(i, row)| (first_row + i as u64 + 1, row.iter().map(cell_text).collect::<Vec<_>>()))
        .collect::<Vec<_>>();

    Ok(split_header(records))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::String(s) => s.clone(),
        Data::Empty => String::new(),
        Data::Int(i) => i.to_string(),
        // Year headers come back as floats: 2020.0 -> "2020"
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        other => format!("{}", other),
    }
}

fn is_blank(record: &[String]) -> bool {
    record.iter().all(|f| f.trim().is_empty())
}

/// First non-blank record is the header; blank records are dropped;
/// every data row is fitted to the header width.
fn split_header(records: Vec<(u64, Vec<String>)>) -> Option<Grid> {
    let mut iter = records.into_iter().skip_while(|(_, r)| is_blank(r));
    let (_, header) = iter.next()?;
    let width = header.len();

    let mut grid = Grid {
        header,
        ..Grid::default()
    };
    for (line, record) in iter.filter(|(_, r)| !is_blank(r)) {
        grid.rows.push(fit_to_width(record, width));
        grid.lines.push(line);
    }
    Some(grid)
}

/// Right-pad with empty strings or truncate to `width`
pub fn fit_to_width(mut row: Vec<String>, width: usize) -> Vec<String> {
    row.resize(width, String::new());
    row
}

// =============================================================================
// TESTS
// =============================================================================
