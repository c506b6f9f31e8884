//! Location text to coordinate resolution.
//!
//! Callers depend only on [`Geocoder`]; the static keyword table and the
//! remote HTTP geocoder are interchangeable behind it.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::utils::geo::Coordinate;

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// `Ok(None)` means the text was understood as "no such place";
    /// `Err` means the backend itself could not answer.
    async fn resolve(&self, location: &str) -> AppResult<Option<Coordinate>>;
}

/// Case-insensitive substring lookup over a fixed table of landmarks.
pub struct StaticGeocoder {
    entries: Vec<(String, Coordinate)>,
}

impl StaticGeocoder {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, Coordinate)>,
        S: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(keyword, coordinate)| (keyword.into().to_lowercase(), coordinate))
                .collect(),
        }
    }

    /// Landmarks around the Palembang and Indralaya campuses.
    pub fn campus() -> Self {
        Self::new([
            ("kambang iwak", Coordinate::new(-2.9812, 104.7524)),
            ("palembang (unsri bukit besar)", Coordinate::new(-2.9909, 104.7393)),
            ("unsri bukit", Coordinate::new(-2.9909, 104.7393)),
            ("demang", Coordinate::new(-2.9678, 104.7411)),
            ("plaju", Coordinate::new(-3.0084, 104.7930)),
            ("indralaya", Coordinate::new(-3.2167, 104.6500)),
        ])
    }

    fn lookup(&self, location: &str) -> Option<Coordinate> {
        let needle = location.to_lowercase();
        self.entries
            .iter()
            .find(|(keyword, _)| needle.contains(keyword.as_str()))
            .map(|(_, coordinate)| *coordinate)
    }
}

#[async_trait]
impl Geocoder for StaticGeocoder {
    async fn resolve(&self, location: &str) -> AppResult<Option<Coordinate>> {
        Ok(self.lookup(location))
    }
}

#[derive(Debug, Deserialize)]
struct GeocodeHit {
    lat: String,
    lon: String,
}

/// Nominatim-style search endpoint: `GET {base}?q=<text>&format=json&limit=1`.
pub struct RemoteGeocoder {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteGeocoder {
    pub fn new(base_url: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .user_agent("shuttle-dispatch/0.1")
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build geocoder client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl Geocoder for RemoteGeocoder {
    async fn resolve(&self, location: &str) -> AppResult<Option<Coordinate>> {
        let response = self
            .client
            .get(&self.base_url)
            .query(&[("q", location), ("format", "json"), ("limit", "1")])
            .send()
            .await
            .map_err(|e| AppError::Unavailable(format!("Geocoder request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Unavailable(format!(
                "Geocoder responded with {}",
                response.status()
            )));
        }

        let hits: Vec<GeocodeHit> = response
            .json()
            .await
            .map_err(|e| AppError::Unavailable(format!("Geocoder returned bad payload: {}", e)))?;

        Ok(hits.first().and_then(|hit| {
            let lat = hit.lat.parse().ok()?;
            let lng = hit.lon.parse().ok()?;
            Some(Coordinate::new(lat, lng))
        }))
    }
}

/// Tries the primary backend, then the fallback when the primary has no
/// answer or is unreachable.
pub struct FallbackGeocoder<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> FallbackGeocoder<P, F> {
    pub fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl<P: Geocoder, F: Geocoder> Geocoder for FallbackGeocoder<P, F> {
    async fn resolve(&self, location: &str) -> AppResult<Option<Coordinate>> {
        match self.primary.resolve(location).await {
            Ok(Some(coordinate)) => Ok(Some(coordinate)),
            Ok(None) => self.fallback.resolve(location).await,
            Err(err) => {
                tracing::warn!(error = %err, location, "primary geocoder failed, using fallback");
                self.fallback.resolve(location).await
            }
        }
    }
}
