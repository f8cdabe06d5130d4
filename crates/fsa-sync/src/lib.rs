//! Ingest pipeline orchestration: fetch, build, dedup, geocode, persist.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fsa_adapters::{
    LocalWorkbookSource, RecordBuilder, RowSource, SpreadsheetSource, UnhandledInputPolicy,
};
use fsa_core::{KeyColumn, ProsecutionRecord};
use fsa_storage::{HttpClientConfig, HttpFetcher, RecordStore, SqliteRecordStore};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub mod config;
pub mod dedup;
pub mod geocode;

pub use config::IngestConfig;
pub use dedup::{retain_new, DedupGate};
pub use geocode::{
    composite_address, GeocodeError, GeocodeResolver, GeocodeStats, Geocoder, GoogleGeocoder,
};

pub const CRATE_NAME: &str = "fsa-sync";

#[derive(Debug, Clone, Serialize)]
pub struct IngestRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub key_column: KeyColumn,
    pub found: usize,
    pub new_records: usize,
    pub persisted: usize,
    pub geocode: GeocodeStats,
}

pub struct IngestPipeline {
    source: Box<dyn RowSource>,
    builder: RecordBuilder,
    geocoder: Box<dyn Geocoder>,
    store: Box<dyn RecordStore>,
}

impl IngestPipeline {
    pub fn new(
        source: Box<dyn RowSource>,
        geocoder: Box<dyn Geocoder>,
        store: Box<dyn RecordStore>,
        policy: UnhandledInputPolicy,
    ) -> Self {
        let builder = RecordBuilder::new(source.source_url()).with_policy(policy);
        Self {
            source,
            builder,
            geocoder,
            store,
        }
    }

    /// Wires the production components. `input` replaces the download with a local workbook.
    pub async fn from_config(config: &IngestConfig, input: Option<PathBuf>) -> Result<Self> {
        let http = http_fetcher(config)?;
        let source = row_source(config, input, &http);
        let geocoder = GoogleGeocoder::new(http, config.google_api_key.clone());
        let store = SqliteRecordStore::open(&config.database_path, config.key_column)
            .await
            .with_context(|| format!("opening {}", config.database_path.display()))?;

        Ok(Self::new(
            source,
            Box::new(geocoder),
            Box::new(store),
            config.unhandled_input,
        ))
    }

    /// Fetches the sheet and builds one record per data row.
    pub async fn build_records(&self) -> Result<Vec<ProsecutionRecord>> {
        fetch_and_build(self.source.as_ref(), &self.builder).await
    }

    pub async fn run_once(&self) -> Result<IngestRunSummary> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = info_span!("ingest_run", %run_id);
        self.run_stages(run_id, started_at).instrument(span).await
    }

    async fn run_stages(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<IngestRunSummary> {
        let records = self.build_records().await?;
        let found = records.len();
        info!("found {found} notices");

        let key_column = self.store.key_column();
        let mut gate = DedupGate::new(key_column);
        let mut new_records = gate
            .filter_new(self.store.as_ref(), records)
            .await
            .context("reading stored record keys")?;
        info!("there are {} new prosecutions", new_records.len());

        let mut resolver = GeocodeResolver::new(self.geocoder.as_ref());
        resolver
            .resolve_all(&mut new_records)
            .await
            .context("geocoding new prosecutions")?;

        let persisted = self
            .store
            .upsert(&new_records)
            .await
            .context("persisting new prosecutions")?;
        info!("done");

        Ok(IngestRunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            key_column,
            found,
            new_records: new_records.len(),
            persisted,
            geocode: resolver.stats(),
        })
    }
}

fn http_fetcher(config: &IngestConfig) -> Result<HttpFetcher> {
    HttpFetcher::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: Some(config.user_agent.clone()),
    })
}

fn row_source(config: &IngestConfig, input: Option<PathBuf>, http: &HttpFetcher) -> Box<dyn RowSource> {
    match input {
        Some(path) => Box::new(LocalWorkbookSource::new(path, config.source_url.clone())),
        None => Box::new(SpreadsheetSource::new(config.source_url.clone(), http.clone())),
    }
}

async fn fetch_and_build(source: &dyn RowSource, builder: &RecordBuilder) -> Result<Vec<ProsecutionRecord>> {
    let rows = source
        .fetch_rows()
        .await
        .with_context(|| format!("fetching {}", source.source_url()))?;
    let records = builder
        .build_all(&rows)
        .context("building prosecution records")?;
    Ok(records)
}

pub async fn run_ingest_once(config: &IngestConfig, input: Option<PathBuf>) -> Result<IngestRunSummary> {
    let pipeline = IngestPipeline::from_config(config, input).await?;
    pipeline.run_once().await
}

/// Fetches and builds records without opening the database or calling the geocoder.
pub async fn preview_records(
    config: &IngestConfig,
    input: Option<PathBuf>,
) -> Result<Vec<ProsecutionRecord>> {
    let http = http_fetcher(config)?;
    let source = row_source(config, input, &http);
    let builder = RecordBuilder::new(source.source_url()).with_policy(config.unhandled_input);
    fetch_and_build(source.as_ref(), &builder).await
}

/// Creates the record table and key index without fetching anything.
pub async fn migrate(config: &IngestConfig) -> Result<()> {
    let store = SqliteRecordStore::open(&config.database_path, config.key_column)
        .await
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    store.ensure_schema().await.context("creating record table")?;
    Ok(())
}

/// Scheduler running one ingest per `schedule_cron` tick. Every tick builds a fresh
/// pipeline, so caches never leak between runs. Not started.
pub async fn build_scheduler(config: IngestConfig, input: Option<PathBuf>) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.schedule_cron.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let config = config.clone();
        let input = input.clone();
        Box::pin(async move {
            match run_ingest_once(&config, input).await {
                Ok(summary) => info!(
                    run_id = %summary.run_id,
                    found = summary.found,
                    persisted = summary.persisted,
                    "scheduled ingest complete"
                ),
                Err(err) => error!(error = ?err, "scheduled ingest failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use async_trait::async_trait;
    use fsa_adapters::InMemoryRowSource;
    use fsa_core::{CellValue, GeoPoint};
    use fsa_storage::StoreError;

    use super::*;

    const URL: &str = "https://example.test/prosecution-outcomes.xls";

    struct FixedGeocoder;

    #[async_trait]
    impl Geocoder for FixedGeocoder {
        async fn geocode(&self, _query: &str) -> Result<GeoPoint, GeocodeError> {
            Ok(GeoPoint::new(51.0, 0.0))
        }
    }

    struct UnavailableStore;

    #[async_trait]
    impl RecordStore for UnavailableStore {
        fn key_column(&self) -> KeyColumn {
            KeyColumn::Identifier
        }

        async fn ensure_schema(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn existing_keys(&self) -> Result<HashSet<String>, StoreError> {
            Err(StoreError::MissingTable("data".into()))
        }

        async fn upsert(&self, _records: &[ProsecutionRecord]) -> Result<usize, StoreError> {
            panic!("upsert must not run after a failed key read");
        }
    }

    fn row(operator: &str, date: &str) -> Vec<CellValue> {
        let mut row = vec![CellValue::Empty; 19];
        row[1] = CellValue::text(operator);
        row[12] = CellValue::text(date);
        row[17] = CellValue::Number(100.0);
        row
    }

    #[tokio::test]
    async fn bad_conviction_date_aborts_before_persisting() {
        let mut bad = row("Acme", "2020-01-01");
        bad[12] = CellValue::Number(43000.0);
        let pipeline = IngestPipeline::new(
            Box::new(InMemoryRowSource::new(URL, vec![row("Ok Ltd", "2020-01-01"), bad])),
            Box::new(FixedGeocoder),
            Box::new(UnavailableStore),
            UnhandledInputPolicy::Abort,
        );
        let err = pipeline.run_once().await.unwrap_err();
        assert!(format!("{err:#}").contains("data row 1"));
    }

    #[tokio::test]
    async fn store_failures_abort_the_run() {
        let pipeline = IngestPipeline::new(
            Box::new(InMemoryRowSource::new(URL, vec![row("Ok Ltd", "2020-01-01")])),
            Box::new(FixedGeocoder),
            Box::new(UnavailableStore),
            UnhandledInputPolicy::Abort,
        );
        let err = pipeline.run_once().await.unwrap_err();
        assert!(format!("{err:#}").contains("reading stored record keys"));
    }
}
