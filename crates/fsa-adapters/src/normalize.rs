//! Per-field value cleanup for spreadsheet cells.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use fsa_core::{CellValue, Field};
use regex::Regex;
use thiserror::Error;

static NOT_APPLICABLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*N[\\/]A\s*$").unwrap());

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%Y/%m/%d",
    "%d %B %Y",
    "%d %b %Y",
    "%B %d %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizeError {
    #[error("unhandled {kind} value for {field}: {value:?}")]
    UnhandledInputKind {
        field: Field,
        kind: &'static str,
        value: String,
    },
    #[error("unparseable date for {field}: {value:?}")]
    UnparseableDate { field: Field, value: String },
}

/// Normalizes one cell according to the rules of `field`. Blank cells stay blank in
/// every field.
pub fn normalize(field: Field, value: CellValue) -> Result<CellValue, NormalizeError> {
    match field {
        Field::DateOfConviction => match value {
            CellValue::Empty => Ok(CellValue::Empty),
            CellValue::Text(text) if normalize_text(&text).is_empty() => Ok(CellValue::Empty),
            other => normalize_date(field, other).map(CellValue::Date),
        },
        Field::CostsAwarded => normalize_costs(field, value),
        _ => Ok(match value {
            CellValue::Text(text) => normalize_text(&text),
            other => other,
        }),
    }
}

/// `N/A` (either slash, any case) becomes empty; everything else is whitespace-collapsed.
pub fn normalize_text(text: &str) -> CellValue {
    if NOT_APPLICABLE.is_match(text) {
        CellValue::Empty
    } else {
        CellValue::Text(collapse_whitespace(text))
    }
}

/// Replaces every run of Unicode whitespace with one ASCII space and trims the ends.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn normalize_date(field: Field, value: CellValue) -> Result<NaiveDate, NormalizeError> {
    match value {
        CellValue::Date(date) => Ok(date),
        CellValue::DateTime(datetime) => Ok(datetime.date()),
        CellValue::Text(text) => {
            let cleaned = collapse_whitespace(&text);
            parse_date_text(&cleaned).ok_or(NormalizeError::UnparseableDate {
                field,
                value: text,
            })
        }
        other @ (CellValue::Number(_) | CellValue::Empty) => Err(unhandled(field, &other)),
    }
}

fn normalize_costs(field: Field, value: CellValue) -> Result<CellValue, NormalizeError> {
    match value {
        CellValue::Text(text) => Ok(normalize_text(&text)),
        number @ CellValue::Number(_) => Ok(number),
        CellValue::Empty => Ok(CellValue::Empty),
        other @ (CellValue::Date(_) | CellValue::DateTime(_)) => Err(unhandled(field, &other)),
    }
}

fn parse_date_text(text: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
                .map(|dt| dt.date())
        })
}

fn unhandled(field: Field, value: &CellValue) -> NormalizeError {
    NormalizeError::UnhandledInputKind {
        field,
        kind: value.kind(),
        value: format!("{value:?}"),
    }
}
