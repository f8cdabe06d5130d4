//! Source adapters for the FSA prosecution outcomes spreadsheet: row sources,
//! cell normalization and record building.

use std::io::Cursor;
use std::path::PathBuf;

use async_trait::async_trait;
use calamine::{open_workbook_auto_from_rs, Data, Range, Reader};
use chrono::NaiveDateTime;
use fsa_core::{CellValue, RawRow};
use fsa_storage::{FetchError, HttpFetcher};
use thiserror::Error;
use tracing::{debug, info};

pub mod builder;
pub mod normalize;

pub use builder::{RecordBuilder, UnhandledInputPolicy};
pub use normalize::NormalizeError;

pub const CRATE_NAME: &str = "fsa-adapters";

pub const PROSECUTION_OUTCOMES_URL: &str =
    "https://www.food.gov.uk/sites/default/files/prosecution-outcomes.xls";

/// 0-based index of the header row; read for logging only.
pub const HEADER_ROW: u32 = 5;
/// 0-based index of the first data row.
pub const FIRST_DATA_ROW: u32 = 6;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("reading workbook: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("workbook has no worksheets")]
    MissingWorksheet,
    #[error("data row {row}: {source}")]
    Normalize { row: usize, source: NormalizeError },
    #[error("reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Produces the raw data rows of one prosecution outcomes sheet.
#[async_trait]
pub trait RowSource: Send + Sync {
    /// URL the rows are attributed to; record links are built from it.
    fn source_url(&self) -> &str;

    async fn fetch_rows(&self) -> Result<Vec<RawRow>, AdapterError>;
}

/// Downloads the published workbook and reads its first sheet.
pub struct SpreadsheetSource {
    url: String,
    http: HttpFetcher,
}

impl SpreadsheetSource {
    pub fn new(url: impl Into<String>, http: HttpFetcher) -> Self {
        Self {
            url: url.into(),
            http,
        }
    }
}

#[async_trait]
impl RowSource for SpreadsheetSource {
    fn source_url(&self) -> &str {
        &self.url
    }

    async fn fetch_rows(&self) -> Result<Vec<RawRow>, AdapterError> {
        let response = self.http.fetch_bytes(&self.url).await?;
        info!(url = %response.final_url, bytes = response.body.len(), "downloaded workbook");
        rows_from_workbook(response.body)
    }
}

/// Reads a workbook from disk while attributing its rows to `source_url`.
pub struct LocalWorkbookSource {
    path: PathBuf,
    source_url: String,
}

impl LocalWorkbookSource {
    pub fn new(path: impl Into<PathBuf>, source_url: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            source_url: source_url.into(),
        }
    }
}

#[async_trait]
impl RowSource for LocalWorkbookSource {
    fn source_url(&self) -> &str {
        &self.source_url
    }

    async fn fetch_rows(&self) -> Result<Vec<RawRow>, AdapterError> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| AdapterError::Io {
                path: self.path.clone(),
                source,
            })?;
        rows_from_workbook(bytes)
    }
}

/// Rows already in memory; used for replays and tests.
#[derive(Debug, Clone)]
pub struct InMemoryRowSource {
    source_url: String,
    rows: Vec<RawRow>,
}

impl InMemoryRowSource {
    pub fn new(source_url: impl Into<String>, rows: Vec<RawRow>) -> Self {
        Self {
            source_url: source_url.into(),
            rows,
        }
    }
}

#[async_trait]
impl RowSource for InMemoryRowSource {
    fn source_url(&self) -> &str {
        &self.source_url
    }

    async fn fetch_rows(&self) -> Result<Vec<RawRow>, AdapterError> {
        Ok(self.rows.clone())
    }
}

pub fn rows_from_workbook(bytes: Vec<u8>) -> Result<Vec<RawRow>, AdapterError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or(AdapterError::MissingWorksheet)??;
    Ok(rows_from_range(&range))
}

/// Data rows from `FIRST_DATA_ROW` through the last used row, positioned from column 0.
pub fn rows_from_range(range: &Range<Data>) -> Vec<RawRow> {
    let Some((last_row, last_col)) = range.end() else {
        return Vec::new();
    };

    let read_row = |row: u32| -> RawRow {
        (0..=last_col)
            .map(|col| range.get_value((row, col)).map(cell_from_data).unwrap_or_default())
            .collect()
    };

    if last_row >= HEADER_ROW {
        let header = read_row(HEADER_ROW)
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        debug!(?header, "header row");
    }

    (FIRST_DATA_ROW..=last_row).map(read_row).collect()
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Float(f) => CellValue::Number(*f),
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Bool(b) => CellValue::Text(b.to_string()),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Number(dt.as_f64())),
        Data::DateTimeIso(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
            .map(CellValue::DateTime)
            .unwrap_or_else(|_| CellValue::Text(s.clone())),
        Data::DurationIso(s) => CellValue::Text(s.clone()),
    }
}
