//! Core domain model for FSA prosecution notices: field mapping, cell values, records.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use md5::{Digest, Md5};
use serde::Serialize;

pub const CRATE_NAME: &str = "fsa-core";

/// Semantic column of the prosecution outcomes sheet.
///
/// Declaration order is the mapping order; `Ord` follows it, so a `BTreeMap<Field, _>`
/// iterates fields the way they appear in the spreadsheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    FoodBusinessOperator,
    TradingName,
    Defendant,
    Address,
    Postown,
    County,
    Postcode,
    OffenceCategory,
    OffenceProvision,
    ContraventionInEuRegulations,
    NatureOfOffence,
    DateOfConviction,
    ConvictionOrGuiltyPlea,
    CourtName,
    Region,
    Sentence,
    CostsAwarded,
    ProsecutionAuthority,
}

impl Field {
    pub const ALL: [Field; 18] = [
        Field::FoodBusinessOperator,
        Field::TradingName,
        Field::Defendant,
        Field::Address,
        Field::Postown,
        Field::County,
        Field::Postcode,
        Field::OffenceCategory,
        Field::OffenceProvision,
        Field::ContraventionInEuRegulations,
        Field::NatureOfOffence,
        Field::DateOfConviction,
        Field::ConvictionOrGuiltyPlea,
        Field::CourtName,
        Field::Region,
        Field::Sentence,
        Field::CostsAwarded,
        Field::ProsecutionAuthority,
    ];

    /// Maps a 0-based row position to its field. Position 0 and anything past the
    /// last mapped column have no field.
    pub fn from_column(position: usize) -> Option<Field> {
        position
            .checked_sub(1)
            .and_then(|idx| Self::ALL.get(idx))
            .copied()
    }

    pub fn column(self) -> usize {
        self as usize + 1
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Field::FoodBusinessOperator => "food_business_operator",
            Field::TradingName => "trading_name",
            Field::Defendant => "defendant",
            Field::Address => "address",
            Field::Postown => "postown",
            Field::County => "county",
            Field::Postcode => "postcode",
            Field::OffenceCategory => "offence_category",
            Field::OffenceProvision => "offence_provision",
            Field::ContraventionInEuRegulations => "contravention_in_eu_regulations",
            Field::NatureOfOffence => "nature_of_offence",
            Field::DateOfConviction => "date_of_conviction",
            Field::ConvictionOrGuiltyPlea => "conviction_or_guilty_plea",
            Field::CourtName => "court_name",
            Field::Region => "region",
            Field::Sentence => "sentence",
            Field::CostsAwarded => "costs_awarded",
            Field::ProsecutionAuthority => "prosecution_authority",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single spreadsheet cell, before or after normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::Text(_) => "text",
            CellValue::Number(_) => "number",
            CellValue::Date(_) => "date",
            CellValue::DateTime(_) => "datetime",
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.is_empty(),
            _ => false,
        }
    }
}

/// String form used for content hashing and composite addresses. Integral numbers keep
/// a trailing `.0` so spreadsheet floats hash the same way across runs.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Number(n) if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e16 => {
                write!(f, "{n:.1}")
            }
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            CellValue::DateTime(dt) => write!(f, "{}+00:00", dt.format("%Y-%m-%dT%H:%M:%S")),
        }
    }
}

/// One ordered spreadsheet row.
pub type RawRow = Vec<CellValue>;

/// Latitude/longitude pair as returned by a geocoder; either side may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct GeoPoint {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self {
            lat: Some(lat),
            lng: Some(lng),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lat.is_none() && self.lng.is_none()
    }
}

/// Which record attribute keys the persistent table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyColumn {
    Identifier,
    Link,
}

impl KeyColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyColumn::Identifier => "identifier",
            KeyColumn::Link => "link",
        }
    }
}

impl fmt::Display for KeyColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identifier" | "id" => Ok(KeyColumn::Identifier),
            "link" => Ok(KeyColumn::Link),
            other => Err(format!("unknown key column `{other}` (expected identifier|link)")),
        }
    }
}

/// Normalized prosecution notice, keyed by a content-derived identifier.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProsecutionRecord {
    pub identifier: String,
    pub link: String,
    #[serde(flatten)]
    pub fields: BTreeMap<Field, CellValue>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl ProsecutionRecord {
    /// Builds a record from normalized fields, deriving `identifier` and `link`.
    pub fn from_fields(fields: BTreeMap<Field, CellValue>, source_url: &str) -> Self {
        let identifier = content_hash(&identifier_input(&fields));
        let link = format!("{source_url}#{identifier}");
        Self {
            identifier,
            link,
            fields,
            lat: None,
            lng: None,
        }
    }

    pub fn get(&self, field: Field) -> Option<&CellValue> {
        self.fields.get(&field)
    }

    /// String form of a field, empty when the field is missing.
    pub fn field_text(&self, field: Field) -> String {
        self.get(field).map(ToString::to_string).unwrap_or_default()
    }

    pub fn key(&self, column: KeyColumn) -> &str {
        match column {
            KeyColumn::Identifier => &self.identifier,
            KeyColumn::Link => &self.link,
        }
    }

    pub fn set_location(&mut self, point: GeoPoint) {
        self.lat = point.lat;
        self.lng = point.lng;
    }
}

/// Space-joined string forms of every field value, in mapping order.
pub fn identifier_input(fields: &BTreeMap<Field, CellValue>) -> String {
    fields
        .values()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lower-case hex MD5 of `text`.
pub fn content_hash(text: &str) -> String {
    hex::encode(Md5::digest(text.as_bytes()))
}
