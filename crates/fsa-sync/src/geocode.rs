//! Address geocoding with a per-run cache and postcode fallback.

use std::collections::HashMap;

use async_trait::async_trait;
use fsa_core::{Field, GeoPoint, ProsecutionRecord};
use fsa_storage::{FetchError, HttpFetcher};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

pub const GOOGLE_GEOCODE_ENDPOINT: &str = "https://maps.googleapis.com/maps/api/geocode/json";

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("decoding geocoder response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("geocoder returned {status} for {query:?}: {message}")]
    Provider {
        status: String,
        query: String,
        message: String,
    },
}

/// Free-text address lookup. A successful lookup may still carry no coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn geocode(&self, query: &str) -> Result<GeoPoint, GeocodeError>;
}

/// Google Geocoding API client.
pub struct GoogleGeocoder {
    http: HttpFetcher,
    api_key: Option<String>,
}

impl GoogleGeocoder {
    pub fn new(http: HttpFetcher, api_key: Option<String>) -> Self {
        Self { http, api_key }
    }
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn geocode(&self, query: &str) -> Result<GeoPoint, GeocodeError> {
        let mut params = vec![("address", query)];
        if let Some(key) = &self.api_key {
            params.push(("key", key.as_str()));
        }
        let response = self.http.fetch_with_query(GOOGLE_GEOCODE_ENDPOINT, &params).await?;
        parse_google_response(query, &response.body)
    }
}

#[derive(Debug, Deserialize)]
struct GoogleResponse {
    status: String,
    #[serde(default)]
    results: Vec<GoogleResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GoogleResult {
    geometry: GoogleGeometry,
}

#[derive(Debug, Deserialize)]
struct GoogleGeometry {
    location: GoogleLocation,
}

#[derive(Debug, Deserialize)]
struct GoogleLocation {
    lat: f64,
    lng: f64,
}

pub fn parse_google_response(query: &str, body: &[u8]) -> Result<GeoPoint, GeocodeError> {
    let response: GoogleResponse = serde_json::from_slice(body)?;
    match response.status.as_str() {
        "OK" => Ok(response
            .results
            .first()
            .map(|r| GeoPoint::new(r.geometry.location.lat, r.geometry.location.lng))
            .unwrap_or_default()),
        "ZERO_RESULTS" => Ok(GeoPoint::default()),
        _ => Err(GeocodeError::Provider {
            status: response.status,
            query: query.to_string(),
            message: response.error_message.unwrap_or_default(),
        }),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GeocodeStats {
    pub lookups: usize,
    pub cache_hits: usize,
    pub fallbacks: usize,
}

/// `address, county, postcode`; missing parts keep their slot.
pub fn composite_address(record: &ProsecutionRecord) -> String {
    [Field::Address, Field::County, Field::Postcode]
        .map(|field| record.field_text(field))
        .join(", ")
}

/// Resolves record locations, calling the geocoder at most once per composite address.
pub struct GeocodeResolver<'g> {
    geocoder: &'g dyn Geocoder,
    cache: HashMap<String, GeoPoint>,
    stats: GeocodeStats,
}

impl<'g> GeocodeResolver<'g> {
    pub fn new(geocoder: &'g dyn Geocoder) -> Self {
        Self {
            geocoder,
            cache: HashMap::new(),
            stats: GeocodeStats::default(),
        }
    }

    pub fn stats(&self) -> GeocodeStats {
        self.stats
    }

    pub async fn resolve(&mut self, record: &mut ProsecutionRecord) -> Result<GeoPoint, GeocodeError> {
        let address = composite_address(record);

        let point = if let Some(point) = self.cache.get(&address).copied() {
            info!(%address, "geocoding [cache hit]");
            self.stats.cache_hits += 1;
            point
        } else {
            info!(%address, "geocoding");
            self.stats.lookups += 1;
            let mut point = self.geocoder.geocode(&address).await?;

            let postcode = record.field_text(Field::Postcode);
            if point.is_empty() && !postcode.is_empty() {
                info!(%postcode, "no match for address, geocoding postcode");
                self.stats.fallbacks += 1;
                point = self.geocoder.geocode(&postcode).await?;
            }

            self.cache.insert(address, point);
            point
        };

        record.set_location(point);
        Ok(point)
    }

    pub async fn resolve_all(&mut self, records: &mut [ProsecutionRecord]) -> Result<(), GeocodeError> {
        for record in records.iter_mut() {
            self.resolve(record).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use fsa_core::CellValue;

    use super::*;

    /// Answers from a fixed table and records every query.
    struct TableGeocoder {
        answers: HashMap<String, GeoPoint>,
        calls: Mutex<Vec<String>>,
    }

    impl TableGeocoder {
        fn new(answers: &[(&str, GeoPoint)]) -> Self {
            Self {
                answers: answers
                    .iter()
                    .map(|(q, p)| (q.to_string(), *p))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Geocoder for TableGeocoder {
        async fn geocode(&self, query: &str) -> Result<GeoPoint, GeocodeError> {
            self.calls.lock().unwrap().push(query.to_string());
            Ok(self.answers.get(query).copied().unwrap_or_default())
        }
    }

    struct FailingGeocoder;

    #[async_trait]
    impl Geocoder for FailingGeocoder {
        async fn geocode(&self, query: &str) -> Result<GeoPoint, GeocodeError> {
            Err(GeocodeError::Provider {
                status: "OVER_QUERY_LIMIT".into(),
                query: query.into(),
                message: String::new(),
            })
        }
    }

    fn record(operator: &str, address: &str, county: Option<&str>, postcode: &str) -> ProsecutionRecord {
        let mut fields = BTreeMap::new();
        fields.insert(Field::FoodBusinessOperator, CellValue::text(operator));
        fields.insert(Field::Address, CellValue::text(address));
        fields.insert(
            Field::County,
            county.map(CellValue::text).unwrap_or(CellValue::Empty),
        );
        fields.insert(Field::Postcode, CellValue::text(postcode));
        ProsecutionRecord::from_fields(fields, "https://example.test/p.xls")
    }

    #[test]
    fn composite_address_keeps_empty_slots() {
        let r = record("Acme", "1 High St", None, "CT1 1AA");
        assert_eq!(composite_address(&r), "1 High St, , CT1 1AA");
    }

    #[tokio::test]
    async fn identical_addresses_hit_the_geocoder_once() {
        let geocoder = TableGeocoder::new(&[("1 High St, Kent, CT1 1AA", GeoPoint::new(51.28, 1.08))]);
        let mut resolver = GeocodeResolver::new(&geocoder);
        let mut records = vec![
            record("Acme", "1 High St", Some("Kent"), "CT1 1AA"),
            record("Other Trader", "1 High St", Some("Kent"), "CT1 1AA"),
        ];

        resolver.resolve_all(&mut records).await.unwrap();

        assert_eq!(geocoder.calls().len(), 1);
        assert_eq!(records[1].lat, Some(51.28));
        assert_eq!(records[1].lng, Some(1.08));
        assert_eq!(
            resolver.stats(),
            GeocodeStats {
                lookups: 1,
                cache_hits: 1,
                fallbacks: 0
            }
        );
    }

    #[tokio::test]
    async fn empty_result_falls_back_to_postcode_and_caches_it() {
        let geocoder = TableGeocoder::new(&[("ZZ9 9ZZ", GeoPoint::new(55.0, -3.0))]);
        let mut resolver = GeocodeResolver::new(&geocoder);
        let mut first = record("Acme", "Unit 4, Nowhere Estate", None, "ZZ9 9ZZ");
        let mut second = first.clone();
        let identifier = first.identifier.clone();

        resolver.resolve(&mut first).await.unwrap();
        resolver.resolve(&mut second).await.unwrap();

        assert_eq!(
            geocoder.calls(),
            vec!["Unit 4, Nowhere Estate, , ZZ9 9ZZ".to_string(), "ZZ9 9ZZ".to_string()]
        );
        assert_eq!(first.lat, Some(55.0));
        assert_eq!(second.lng, Some(-3.0));
        assert_eq!(first.identifier, identifier);
        assert_eq!(resolver.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn missing_postcode_skips_fallback() {
        let geocoder = TableGeocoder::new(&[]);
        let mut resolver = GeocodeResolver::new(&geocoder);
        let mut r = record("Acme", "Somewhere", None, "");

        let point = resolver.resolve(&mut r).await.unwrap();

        assert!(point.is_empty());
        assert_eq!(geocoder.calls().len(), 1);
        assert_eq!(r.lat, None);
    }

    #[tokio::test]
    async fn geocoder_errors_propagate() {
        let mut resolver = GeocodeResolver::new(&FailingGeocoder);
        let mut r = record("Acme", "1 High St", None, "CT1 1AA");
        assert!(matches!(
            resolver.resolve(&mut r).await,
            Err(GeocodeError::Provider { .. })
        ));
    }

    #[test]
    fn google_responses_map_to_points() {
        let ok = br#"{"status":"OK","results":[{"geometry":{"location":{"lat":51.5,"lng":-0.12}}}]}"#;
        assert_eq!(
            parse_google_response("q", ok).unwrap(),
            GeoPoint::new(51.5, -0.12)
        );

        let none = br#"{"status":"ZERO_RESULTS","results":[]}"#;
        assert!(parse_google_response("q", none).unwrap().is_empty());

        let denied = br#"{"status":"REQUEST_DENIED","error_message":"bad key","results":[]}"#;
        match parse_google_response("q", denied) {
            Err(GeocodeError::Provider { status, message, .. }) => {
                assert_eq!(status, "REQUEST_DENIED");
                assert_eq!(message, "bad key");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(matches!(
            parse_google_response("q", b"not json"),
            Err(GeocodeError::Decode(_))
        ));
    }
}
