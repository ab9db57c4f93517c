//! Batch orchestration
//!
//! Files are processed one at a time and rows one at a time, which keeps
//! get-or-create resolution free of races. Per file:
//!
//! exists -> read -> header valid -> row loop
//!
//! A missing file or an invalid header is fatal for the batch outcome but
//! never stops the remaining files. Row failures are counted and logged.

use crate::chapter::ChapterClassifier;
use crate::header::{resolve_header, HeaderLayout};
use crate::mapper::{map_row, MapError};
use crate::reader::read_table;
use crate::resolver::{EntityResolver, RowWrite};
use crate::store::AmecoStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, trace, warn};

/// Result of one data row
#[derive(Debug)]
pub enum RowOutcome {
    Saved(RowWrite),
    /// Mapping failed; row not persisted, not fatal
    Skipped(MapError),
    /// Resolution or commit failed; row rolled back
    Failed(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FileOutcome {
    Missing,
    NoData,
    InvalidHeader(String),
    Processed,
    Cancelled,
}

impl FileOutcome {
    pub fn is_fatal(&self) -> bool {
        matches!(self, FileOutcome::Missing | FileOutcome::InvalidHeader(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    pub file: PathBuf,
    pub chapter: Option<String>,
    pub outcome: FileOutcome,
    pub content_hash: Option<String>,
    pub rows_read: usize,
    pub rows_saved: usize,
    pub rows_skipped: usize,
    pub rows_failed: usize,
    pub values_inserted: usize,
    pub values_existing: usize,
    /// Source lines of rows that were skipped or failed, for targeted re-runs
    pub skipped_lines: Vec<u64>,
    pub failed_lines: Vec<u64>,
}

impl FileReport {
    fn new(file: &Path, outcome: FileOutcome) -> Self {
        Self {
            file: file.to_path_buf(),
            chapter: None,
            outcome,
            content_hash: None,
            rows_read: 0,
            rows_saved: 0,
            rows_skipped: 0,
            rows_failed: 0,
            values_inserted: 0,
            values_existing: 0,
            skipped_lines: Vec::new(),
            failed_lines: Vec::new(),
        }
    }

    fn record(&mut self, line: u64, outcome: &RowOutcome) {
        match outcome {
            RowOutcome::Saved(write) => {
                self.rows_saved += 1;
                self.values_inserted += write.values_inserted;
                self.values_existing += write.values_existing;
            }
            RowOutcome::Skipped(_) => {
                self.rows_skipped += 1;
                self.skipped_lines.push(line);
            }
            RowOutcome::Failed(_) => {
                self.rows_failed += 1;
                self.failed_lines.push(line);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub files: Vec<FileReport>,
}

impl BatchReport {
    /// At least one file read with a valid header, no fatal file outcome,
    /// and the batch ran to completion.
    pub fn success(&self) -> bool {
        let any_processed = self
            .files
            .iter()
            .any(|f| matches!(f.outcome, FileOutcome::Processed));
        let any_fatal = self.files.iter().any(|f| f.outcome.is_fatal());
        any_processed && !any_fatal && !self.cancelled
    }

    pub fn rows_saved(&self) -> usize {
        self.files.iter().map(|f| f.rows_saved).sum()
    }

    pub fn rows_skipped(&self) -> usize {
        self.files.iter().map(|f| f.rows_skipped).sum()
    }

    pub fn rows_failed(&self) -> usize {
        self.files.iter().map(|f| f.rows_failed).sum()
    }

    pub fn values_inserted(&self) -> usize {
        self.files.iter().map(|f| f.values_inserted).sum()
    }

    pub fn values_existing(&self) -> usize {
        self.files.iter().map(|f| f.values_existing).sum()
    }
}

pub struct Pipeline<S> {
    resolver: EntityResolver<S>,
    classifier: ChapterClassifier,
    cancel: Arc<AtomicBool>,
}

impl<S: AmecoStore> Pipeline<S> {
    pub fn new(store: S, classifier: ChapterClassifier) -> Self {
        Self {
            resolver: EntityResolver::new(store),
            classifier,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Share a cancellation flag, checked between rows and between files
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn store(&self) -> &S {
        self.resolver.store()
    }

    pub fn store_mut(&mut self) -> &mut S {
        self.resolver.store_mut()
    }

    pub fn into_store(self) -> S {
        self.resolver.into_store()
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Process every file in order. Never fails; the outcome is in the report.
    pub async fn run(&mut self, files: &[PathBuf]) -> BatchReport {
        let started_at = Utc::now();
        let mut reports = Vec::with_capacity(files.len());
        let mut cancelled = false;

        info!(files = files.len(), "batch started");

        for path in files {
            if self.cancelled() {
                warn!(file = %path.display(), "batch cancelled, remaining files not processed");
                cancelled = true;
                break;
            }
            let report = self.process_file(path).await;
            if report.outcome == FileOutcome::Cancelled {
                cancelled = true;
            }
            reports.push(report);
            if cancelled {
                break;
            }
        }

        let report = BatchReport {
            started_at,
            finished_at: Utc::now(),
            cancelled,
            files: reports,
        };
        info!(
            success = report.success(),
            rows_saved = report.rows_saved(),
            rows_skipped = report.rows_skipped(),
            rows_failed = report.rows_failed(),
            values_inserted = report.values_inserted(),
            values_existing = report.values_existing(),
            "batch finished"
        );
        report
    }

    pub async fn process_file(&mut self, path: &Path) -> FileReport {
        if !matches!(fs::try_exists(path).await, Ok(true)) {
            error!(file = %path.display(), "file not found");
            return FileReport::new(path, FileOutcome::Missing);
        }

        let file_chapter = self.classifier.chapter_for_file(path);
        info!(
            file = %path.display(),
            chapter = file_chapter.as_deref().unwrap_or("<per row>"),
            "processing file"
        );

        let Some(table) = read_table(path).await else {
            warn!(file = %path.display(), "no data read, skipping file");
            let mut report = FileReport::new(path, FileOutcome::NoData);
            report.chapter = file_chapter;
            return report;
        };

        let mut report = FileReport::new(path, FileOutcome::Processed);
        report.chapter = file_chapter.clone();
        report.content_hash = Some(table.content_hash.clone());

        let layout = match resolve_header(&table.header, path) {
            Ok(layout) => layout,
            Err(e) => {
                error!(file = %path.display(), error = %e, "invalid header, skipping file");
                report.outcome = FileOutcome::InvalidHeader(e.to_string());
                return report;
            }
        };
        let subchapter_idx = layout.index_of("SUB-CHAPTER");

        for (row, &line) in table.rows.iter().zip(&table.lines) {
            if self.cancelled() {
                warn!(file = %path.display(), line, "cancelled between rows");
                report.outcome = FileOutcome::Cancelled;
                break;
            }
            report.rows_read += 1;

            let chapter = match &file_chapter {
                Some(name) => name.clone(),
                None => {
                    let label = subchapter_idx
                        .and_then(|idx| row.get(idx))
                        .map(|s| s.trim())
                        .unwrap_or_default();
                    self.classifier.chapter_for_row(label)
                }
            };

            let outcome = self.process_row(path, line, row, &table.header, &layout, &chapter).await;
            report.record(line, &outcome);
        }

        info!(
            file = %path.display(),
            chapter = report.chapter.as_deref().unwrap_or("<per row>"),
            hash = report.content_hash.as_deref().unwrap_or_default(),
            rows = report.rows_read,
            saved = report.rows_saved,
            skipped = report.rows_skipped,
            failed = report.rows_failed,
            values_inserted = report.values_inserted,
            values_existing = report.values_existing,
            "file finished"
        );
        report
    }

    async fn process_row(
        &mut self,
        path: &Path,
        line: u64,
        row: &[String],
        header: &[String],
        layout: &HeaderLayout,
        chapter: &str,
    ) -> RowOutcome {
        let mapped = match map_row(row, header, layout, chapter) {
            Ok(mapped) => mapped,
            Err(e) => {
                warn!(
                    file = %path.display(),
                    line,
                    chapter,
                    variable = e.variable_code.as_deref().unwrap_or("?"),
                    subchapter = e.subchapter.as_deref().unwrap_or("?"),
                    error = %e.message,
                    "row mapping failed, skipping row"
                );
                return RowOutcome::Skipped(e);
            }
        };

        match self.resolver.resolve(&mapped).await {
            Ok(write) => {
                trace!(
                    file = %path.display(),
                    line,
                    variable = %mapped.variable_code,
                    subchapter = %mapped.subchapter_name,
                    "row saved"
                );
                RowOutcome::Saved(write)
            }
            Err(e) => {
                error!(
                    file = %path.display(),
                    line,
                    chapter,
                    variable = %mapped.variable_code,
                    subchapter = %mapped.subchapter_name,
                    error = %format!("{:#}", e),
                    "failed to persist row"
                );
                RowOutcome::Failed(e)
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chapter::{chapter_from_file_name, ChapterStrategy};
    use crate::model::{Chapter, Country, Subchapter, Value, Variable};
    use crate::store::{MemoryStore, TableCounts};
    use bigdecimal::BigDecimal;
    use std::collections::HashSet;
    use std::str::FromStr;
    use tempfile::TempDir;
    use uuid::Uuid;

    const HEADER: &str = "CODE,SUB-CHAPTER,TITLE,UNIT_CODE,UNIT_DESCRIPTION,CNTRY,COUNTRY,TRN,AGG,REF,2020,2021";
    const NPTD_DE: &str = "NPTD,01 Population,Total population,0,1000 persons,DE,Germany,1,0,0,1000,1010";

    fn write(dir: &TempDir, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    fn pipeline() -> Pipeline<MemoryStore> {
        Pipeline::new(MemoryStore::new(), ChapterClassifier::new(ChapterStrategy::FileName))
    }

    // -------------------------------------------------------------------------
    // END TO END
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_end_to_end_single_row() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "AMECO1.CSV", &[HEADER, NPTD_DE]);

        let mut p = pipeline();
        let report = p.run(&[file.clone()]).await;
        assert!(report.success());

        let store = p.store();
        assert_eq!(store.chapters().len(), 1);
        assert_eq!(store.chapters()[0].name, chapter_from_file_name(&file));
        assert_eq!(store.subchapters().len(), 1);
        assert_eq!(store.subchapters()[0].name, "01 Population");
        assert_eq!(store.variables().len(), 1);
        assert_eq!(store.variables()[0].code, "NPTD");
        assert_eq!(store.countries().len(), 1);
        assert_eq!(store.countries()[0].code, "DE");

        let mut values: Vec<(i32, BigDecimal)> = store
            .values()
            .iter()
            .map(|v| (v.year, v.amount.clone()))
            .collect();
        values.sort_by_key(|(y, _)| *y);
        assert_eq!(
            values,
            vec![
                (2020, BigDecimal::from_str("1000").unwrap()),
                (2021, BigDecimal::from_str("1010").unwrap()),
            ]
        );
        assert!(store.values().iter().all(|v| v.month.is_none() && !v.is_monthly));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let a = write(
            &dir,
            "AMECO1.CSV",
            &[HEADER, NPTD_DE, "NPTD,01 Population,Total population,0,1000 persons,FR,France,1,0,0,900,905"],
        );
        let b = write(
            &dir,
            "AMECO6.CSV",
            &[HEADER, "UTVG,06 Revenue,Total revenue,0,EUR,DE,Germany,1,0,0,1,2"],
        );
        let files = vec![a, b];

        let mut p = pipeline();
        assert!(p.run(&files).await.success());
        let first: TableCounts = p.store_mut().counts().await.unwrap();

        // Fresh resolver over the same store, as a new process would have
        let mut again = Pipeline::new(p.into_store(), ChapterClassifier::new(ChapterStrategy::FileName));
        let report = again.run(&files).await;
        assert!(report.success());
        assert_eq!(report.values_inserted(), 0);
        assert_eq!(report.values_existing(), 6);
        assert_eq!(again.store_mut().counts().await.unwrap(), first);

        let keys: HashSet<_> = again.store().values().iter().map(|v| v.natural_key()).collect();
        assert_eq!(keys.len(), again.store().values().len());
    }

    // -------------------------------------------------------------------------
    // FILE-LEVEL OUTCOMES
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_missing_required_column_persists_nothing() {
        let dir = TempDir::new().unwrap();
        let file = write(
            &dir,
            "AMECO1.CSV",
            &[
                "CODE,SUB-CHAPTER,TITLE,UNIT_CODE,UNIT_DESCRIPTION,CNTRY,COUNTRY,TRN,AGG,2020",
                "NPTD,01 Population,Total population,0,1000 persons,DE,Germany,1,0,1000",
            ],
        );

        let mut p = pipeline();
        let report = p.run(&[file]).await;
        assert!(!report.success());
        assert_eq!(
            report.files[0].outcome,
            FileOutcome::InvalidHeader("Missing required column: REF".to_string())
        );
        assert_eq!(p.store_mut().counts().await.unwrap(), TableCounts::default());
    }

    #[tokio::test]
    async fn test_missing_file_is_fatal_but_others_still_run() {
        let dir = TempDir::new().unwrap();
        let good = write(&dir, "AMECO1.CSV", &[HEADER, NPTD_DE]);
        let missing = dir.path().join("AMECO2.CSV");

        let mut p = pipeline();
        let report = p.run(&[missing, good]).await;
        assert!(!report.success());
        assert_eq!(report.files[0].outcome, FileOutcome::Missing);
        assert_eq!(report.files[1].outcome, FileOutcome::Processed);
        assert_eq!(p.store().values().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_file_alone_is_not_success() {
        let dir = TempDir::new().unwrap();
        let empty = write(&dir, "AMECO1.CSV", &[""]);

        let mut p = pipeline();
        let report = p.run(&[empty]).await;
        assert_eq!(report.files[0].outcome, FileOutcome::NoData);
        assert!(!report.success());
    }

    #[tokio::test]
    async fn test_empty_file_next_to_good_file_is_success() {
        let dir = TempDir::new().unwrap();
        let empty = write(&dir, "AMECO1.CSV", &[HEADER]);
        let good = write(&dir, "AMECO2.CSV", &[HEADER, NPTD_DE]);

        let mut p = pipeline();
        let report = p.run(&[empty, good]).await;
        assert_eq!(report.files[0].outcome, FileOutcome::NoData);
        assert!(report.success());
    }

    #[tokio::test]
    async fn test_empty_file_list_is_not_success() {
        let mut p = pipeline();
        assert!(!p.run(&[]).await.success());
    }

    // -------------------------------------------------------------------------
    // ROW-LEVEL OUTCOMES
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_short_row_is_padded_not_rejected() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "AMECO1.CSV", &[HEADER, "UVGD,01 Population,GDP", NPTD_DE]);

        let mut p = pipeline();
        let report = p.run(&[file]).await;
        assert!(report.success());
        assert_eq!(report.files[0].rows_read, 2);
        assert_eq!(report.files[0].rows_saved, 2);
        assert_eq!(report.files[0].rows_skipped, 0);
        assert_eq!(p.store().variables().len(), 2);
    }

    #[tokio::test]
    async fn test_na_amount_saved_as_zero() {
        let dir = TempDir::new().unwrap();
        let file = write(
            &dir,
            "AMECO1.CSV",
            &[HEADER, "NPTD,01 Population,Total population,0,1000 persons,DE,Germany,1,0,0,NA,1010"],
        );

        let mut p = pipeline();
        let report = p.run(&[file]).await;
        assert!(report.success());
        assert_eq!(report.files[0].rows_skipped, 0);
        let zero = p.store().values().iter().find(|v| v.year == 2020).unwrap();
        assert_eq!(zero.amount, BigDecimal::from(0));
    }

    #[tokio::test]
    async fn test_persistence_failure_skips_row_only() {
        let dir = TempDir::new().unwrap();
        let file = write(
            &dir,
            "AMECO1.CSV",
            &[HEADER, "BAD,01 Population,Broken,0,x,DE,Germany,1,0,0,1,2", NPTD_DE],
        );
        let mut store = MemoryStore::new();
        store.reject_variable("BAD");

        let mut p = Pipeline::new(store, ChapterClassifier::new(ChapterStrategy::FileName));
        let report = p.run(&[file]).await;
        assert!(report.success());
        assert_eq!(report.files[0].rows_failed, 1);
        assert_eq!(report.files[0].rows_saved, 1);
        assert_eq!(p.store().variables().len(), 1);
        assert_eq!(p.store().variables()[0].code, "NPTD");
    }

    #[tokio::test]
    async fn test_variable_name_kept_across_files() {
        let dir = TempDir::new().unwrap();
        let a = write(&dir, "AMECO1.CSV", &[HEADER, NPTD_DE]);
        let b = write(
            &dir,
            "AMECO2.CSV",
            &[HEADER, "NPTD,01 Population,Population (total),0,1000 persons,FR,France,1,0,0,1,2"],
        );

        let mut p = pipeline();
        assert!(p.run(&[a, b]).await.success());
        assert_eq!(p.store().variables().len(), 1);
        assert_eq!(p.store().variables()[0].name, "Total population");
    }

    // -------------------------------------------------------------------------
    // CHAPTER STRATEGY AND CANCELLATION
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_subchapter_strategy_resolves_per_row() {
        let dir = TempDir::new().unwrap();
        let file = write(
            &dir,
            "extract.csv",
            &[HEADER, NPTD_DE, "XYZ,99 Nothing,Other,0,x,DE,Germany,1,0,0,1,2"],
        );
        let table: std::collections::HashMap<String, String> =
            [("01 Population".to_string(), "Population".to_string())].into_iter().collect();
        let classifier =
            ChapterClassifier::new(ChapterStrategy::SubchapterLabel).with_lookup(Box::new(table));

        let mut p = Pipeline::new(MemoryStore::new(), classifier);
        let report = p.run(&[file]).await;
        assert!(report.success());
        assert_eq!(report.files[0].chapter, None);

        let mut names: Vec<&str> = p.store().chapters().iter().map(|c| c.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["Population", "Unknown Chapter"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_processes_nothing() {
        let dir = TempDir::new().unwrap();
        let file = write(&dir, "AMECO1.CSV", &[HEADER, NPTD_DE]);
        let flag = Arc::new(AtomicBool::new(true));

        let mut p = pipeline().with_cancel_flag(flag);
        let report = p.run(&[file]).await;
        assert!(report.cancelled);
        assert!(!report.success());
        assert!(report.files.is_empty());
        assert!(p.store().values().is_empty());
    }

    #[test]
    fn test_report_serializes_outcome_tag() {
        let report = FileReport::new(Path::new("AMECO1.CSV"), FileOutcome::InvalidHeader("x".into()));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["status"], "invalid_header");
        assert_eq!(json["outcome"]["detail"], "x");
    }

    #[tokio::test]
    async fn test_failed_row_reports_source_line() {
        let dir = TempDir::new().unwrap();
        let file = write(
            &dir,
            "AMECO1.CSV",
            &[HEADER, NPTD_DE, "", "BAD,01 Population,Broken,0,x,DE,Germany,1,0,0,1,2"],
        );
        let mut store = MemoryStore::new();
        store.reject_variable("BAD");

        let mut p = Pipeline::new(store, ChapterClassifier::new(ChapterStrategy::FileName));
        let report = p.run(&[file]).await;
        assert_eq!(report.files[0].rows_read, 2);
        assert_eq!(report.files[0].failed_lines, vec![4]);
        assert!(report.files[0].skipped_lines.is_empty());
    }

    /// Raises the cancellation flag once the first row has been committed
    struct CancelAfterCommit {
        inner: MemoryStore,
        flag: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl AmecoStore for CancelAfterCommit {
        async fn find_chapter(&mut self, name: &str) -> anyhow::Result<Option<Chapter>> {
            self.inner.find_chapter(name).await
        }
        async fn stage_chapter(&mut self, chapter: &Chapter) -> anyhow::Result<()> {
            self.inner.stage_chapter(chapter).await
        }
        async fn find_subchapter(
            &mut self,
            chapter_id: Uuid,
            name: &str,
        ) -> anyhow::Result<Option<Subchapter>> {
            self.inner.find_subchapter(chapter_id, name).await
        }
        async fn stage_subchapter(&mut self, subchapter: &Subchapter) -> anyhow::Result<()> {
            self.inner.stage_subchapter(subchapter).await
        }
        async fn find_variable(&mut self, code: &str) -> anyhow::Result<Option<Variable>> {
            self.inner.find_variable(code).await
        }
        async fn stage_variable(&mut self, variable: &Variable) -> anyhow::Result<()> {
            self.inner.stage_variable(variable).await
        }
        async fn find_country(&mut self, code: &str) -> anyhow::Result<Option<Country>> {
            self.inner.find_country(code).await
        }
        async fn stage_country(&mut self, country: &Country) -> anyhow::Result<()> {
            self.inner.stage_country(country).await
        }
        async fn stage_value(&mut self, value: &Value) -> anyhow::Result<bool> {
            self.inner.stage_value(value).await
        }
        async fn commit(&mut self) -> anyhow::Result<()> {
            self.inner.commit().await?;
            self.flag.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn rollback(&mut self) {
            self.inner.rollback().await
        }
        async fn counts(&mut self) -> anyhow::Result<TableCounts> {
            self.inner.counts().await
        }
    }

    #[tokio::test]
    async fn test_cancel_between_rows_keeps_committed_row() {
        let dir = TempDir::new().unwrap();
        let first = write(
            &dir,
            "AMECO1.CSV",
            &[
                HEADER,
                NPTD_DE,
                "NPTD,01 Population,Total population,0,1000 persons,FR,France,1,0,0,900,905",
                "NPTD,01 Population,Total population,0,1000 persons,IT,Italy,1,0,0,800,805",
            ],
        );
        let second = write(&dir, "AMECO2.CSV", &[HEADER, NPTD_DE]);

        let flag = Arc::new(AtomicBool::new(false));
        let store = CancelAfterCommit {
            inner: MemoryStore::new(),
            flag: flag.clone(),
        };
        let mut p = Pipeline::new(store, ChapterClassifier::new(ChapterStrategy::FileName))
            .with_cancel_flag(flag);
        let report = p.run(&[first, second]).await;

        assert!(report.cancelled);
        assert!(!report.success());
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files[0].outcome, FileOutcome::Cancelled);
        assert_eq!(report.files[0].rows_read, 1);
        assert_eq!(report.files[0].rows_saved, 1);

        let inner = &p.store().inner;
        assert_eq!(inner.commit_count(), 1);
        assert_eq!(inner.countries().len(), 1);
        assert_eq!(inner.values().len(), 2);
    }
}
