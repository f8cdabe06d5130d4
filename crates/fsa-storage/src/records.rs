use std::collections::HashSet;
use std::path::Path;

use async_trait::async_trait;
use fsa_core::{CellValue, Field, KeyColumn, ProsecutionRecord};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use thiserror::Error;
use tracing::{debug, info};

pub const DATA_TABLE: &str = "data";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("table `{0}` does not exist yet")]
    MissingTable(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Durable, key-addressed table of prosecution records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn key_column(&self) -> KeyColumn;

    /// Creates the table and the unique index on the key column if missing.
    async fn ensure_schema(&self) -> Result<(), StoreError>;

    /// All stored key values. A store that has never been written to yields an empty set.
    async fn existing_keys(&self) -> Result<HashSet<String>, StoreError>;

    /// Inserts or replaces `records` in one transaction; returns the number written.
    async fn upsert(&self, records: &[ProsecutionRecord]) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub identifier: String,
    pub link: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    pool: SqlitePool,
    key: KeyColumn,
}

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

impl SqliteRecordStore {
    pub async fn open(path: impl AsRef<Path>, key: KeyColumn) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool, key })
    }

    /// Rows in insertion order with their location columns.
    pub async fn stored_rows(&self) -> Result<Vec<StoredRow>, StoreError> {
        let sql = format!("SELECT identifier, link, lat, lng FROM {DATA_TABLE} ORDER BY rowid");
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(missing_table_or)?;
        rows.iter()
            .map(|row| -> Result<StoredRow, StoreError> {
                Ok(StoredRow {
                    identifier: row.try_get("identifier")?,
                    link: row.try_get("link")?,
                    lat: row.try_get("lat")?,
                    lng: row.try_get("lng")?,
                })
            })
            .collect()
    }

    async fn select_keys(&self) -> Result<Vec<String>, StoreError> {
        let sql = format!("SELECT {} FROM {DATA_TABLE}", self.key);
        sqlx::query_scalar::<_, String>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(missing_table_or)
    }

    fn upsert_sql(&self) -> String {
        let columns = record_columns();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let key = self.key.as_str();
        let updates = columns
            .iter()
            .filter(|c| **c != key)
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {DATA_TABLE} ({}) VALUES ({placeholders}) ON CONFLICT({key}) DO UPDATE SET {updates}",
            columns.join(", ")
        )
    }
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn key_column(&self) -> KeyColumn {
        self.key
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let field_columns = Field::ALL
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        let create = format!(
            "CREATE TABLE IF NOT EXISTS {DATA_TABLE} (identifier TEXT NOT NULL, link TEXT NOT NULL, {field_columns}, lat REAL, lng REAL)"
        );
        sqlx::query(&create).execute(&self.pool).await?;

        let index = format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {DATA_TABLE}_{key}_key ON {DATA_TABLE} ({key})",
            key = self.key
        );
        sqlx::query(&index).execute(&self.pool).await?;
        Ok(())
    }

    async fn existing_keys(&self) -> Result<HashSet<String>, StoreError> {
        match self.select_keys().await {
            Ok(keys) => Ok(keys.into_iter().collect()),
            Err(StoreError::MissingTable(table)) => {
                debug!(%table, "no stored records yet");
                Ok(HashSet::new())
            }
            Err(err) => Err(err),
        }
    }

    async fn upsert(&self, records: &[ProsecutionRecord]) -> Result<usize, StoreError> {
        self.ensure_schema().await?;
        let sql = self.upsert_sql();

        let mut tx = self.pool.begin().await?;
        for record in records {
            let mut query = sqlx::query(&sql)
                .bind(record.identifier.as_str())
                .bind(record.link.as_str());
            for field in Field::ALL {
                query = bind_cell(query, record.get(field));
            }
            query
                .bind(record.lat)
                .bind(record.lng)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(rows = records.len(), key = %self.key, "upserted records");
        Ok(records.len())
    }
}

fn record_columns() -> Vec<&'static str> {
    let mut columns = vec!["identifier", "link"];
    columns.extend(Field::ALL.iter().map(|f| f.as_str()));
    columns.extend(["lat", "lng"]);
    columns
}

fn bind_cell<'q>(query: SqliteQuery<'q>, value: Option<&'q CellValue>) -> SqliteQuery<'q> {
    match value {
        None | Some(CellValue::Empty) => query.bind(None::<String>),
        Some(CellValue::Text(s)) => query.bind(s.as_str()),
        Some(CellValue::Number(n)) => query.bind(*n),
        Some(CellValue::Date(d)) => query.bind(d.format("%Y-%m-%d").to_string()),
        Some(CellValue::DateTime(dt)) => query.bind(dt.format("%Y-%m-%d %H:%M:%S").to_string()),
    }
}

fn missing_table_or(err: sqlx::Error) -> StoreError {
    let missing = matches!(
        &err,
        sqlx::Error::Database(db) if db.message().contains("no such table")
    );
    if missing {
        StoreError::MissingTable(DATA_TABLE.to_string())
    } else {
        StoreError::Database(err)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use fsa_core::GeoPoint;
    use tempfile::tempdir;

    fn record(operator: &str) -> ProsecutionRecord {
        let mut fields = BTreeMap::new();
        fields.insert(Field::FoodBusinessOperator, CellValue::text(operator));
        fields.insert(Field::TradingName, CellValue::Empty);
        fields.insert(Field::CostsAwarded, CellValue::Number(1200.0));
        let mut record = ProsecutionRecord::from_fields(fields, "https://example.test/p.xls");
        record.set_location(GeoPoint::new(52.2, 0.12));
        record
    }

    #[tokio::test]
    async fn missing_table_reads_as_no_keys() {
        let dir = tempdir().expect("tempdir");
        let store = SqliteRecordStore::open(dir.path().join("db.sqlite"), KeyColumn::Link)
            .await
            .expect("open");

        assert!(store.existing_keys().await.expect("keys").is_empty());
        assert!(matches!(
            store.select_keys().await,
            Err(StoreError::MissingTable(_))
        ));
    }

    #[tokio::test]
    async fn upsert_creates_table_and_is_idempotent() {
        let dir = tempdir().expect("tempdir");
        let store = SqliteRecordStore::open(dir.path().join("db.sqlite"), KeyColumn::Identifier)
            .await
            .expect("open");
        let records = vec![record("Acme Ltd"), record("Bistro Co")];

        assert_eq!(store.upsert(&records).await.expect("first upsert"), 2);
        store.upsert(&records[..1]).await.expect("second upsert");

        let keys = store.existing_keys().await.expect("keys");
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&records[0].identifier));

        let rows = store.stored_rows().await.expect("rows");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].link, records[0].link);
        assert_eq!(rows[0].lat, Some(52.2));
        assert_eq!(rows[1].lng, Some(0.12));
    }

    #[tokio::test]
    async fn link_key_column_returns_links() {
        let dir = tempdir().expect("tempdir");
        let store = SqliteRecordStore::open(dir.path().join("db.sqlite"), KeyColumn::Link)
            .await
            .expect("open");
        let records = vec![record("Acme Ltd")];
        store.upsert(&records).await.expect("upsert");

        let keys = store.existing_keys().await.expect("keys");
        assert!(keys.contains(&records[0].link));
        assert!(!keys.contains(&records[0].identifier));
    }
}
