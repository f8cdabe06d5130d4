use std::collections::BTreeMap;
use std::str::FromStr;

use fsa_core::{CellValue, Field, ProsecutionRecord, RawRow};
use tracing::warn;

use crate::normalize::{normalize, NormalizeError};
use crate::AdapterError;

/// What to do with a cell whose kind the field cannot accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnhandledInputPolicy {
    /// Fail the row, and with it the run.
    #[default]
    Abort,
    /// Log the value and store the field as empty.
    SkipField,
}

impl FromStr for UnhandledInputPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" | "fail" => Ok(Self::Abort),
            "skip" | "skip-field" | "continue" => Ok(Self::SkipField),
            other => Err(format!("unknown unhandled-input policy `{other}` (expected abort|skip)")),
        }
    }
}

/// Turns positional spreadsheet rows into normalized, content-addressed records.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    source_url: String,
    policy: UnhandledInputPolicy,
}

impl RecordBuilder {
    pub fn new(source_url: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            policy: UnhandledInputPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: UnhandledInputPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(&self, row: &[CellValue]) -> Result<ProsecutionRecord, NormalizeError> {
        let mut fields = BTreeMap::new();
        for (position, value) in row.iter().enumerate() {
            let Some(field) = Field::from_column(position) else {
                continue;
            };
            let value = match normalize(field, value.clone()) {
                Ok(value) => value,
                Err(err) => match self.policy {
                    UnhandledInputPolicy::Abort => {
                        warn!(%err, "unhandled cell value");
                        return Err(err);
                    }
                    UnhandledInputPolicy::SkipField => {
                        warn!(%err, "unhandled cell value; storing field as empty");
                        CellValue::Empty
                    }
                },
            };
            fields.insert(field, value);
        }
        Ok(ProsecutionRecord::from_fields(fields, &self.source_url))
    }

    pub fn build_all(&self, rows: &[RawRow]) -> Result<Vec<ProsecutionRecord>, AdapterError> {
        rows.iter()
            .enumerate()
            .map(|(row, cells)| {
                self.build(cells)
                    .map_err(|source| AdapterError::Normalize { row, source })
            })
            .collect()
    }
}
