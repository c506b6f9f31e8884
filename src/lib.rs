pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod geocoder;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod notify;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

pub use config::Config;
pub use error::{AppError, AppResult};

use config::DispatchSettings;
use geocoder::{FallbackGeocoder, Geocoder, RemoteGeocoder, StaticGeocoder};
use notify::{HttpGateway, LogGateway, NotificationGateway};
use services::matching::{OldestTripFirst, PoolingPolicy};
use services::pricing::{PriceFunction, ZoneSurchargePricing};
use services::zones::{KeywordZones, ZoneClassifier};

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Config,
    pub geocoder: Arc<dyn Geocoder>,
    pub notifier: Arc<dyn NotificationGateway>,
    pub zones: Arc<dyn ZoneClassifier>,
    pub pricing: Arc<dyn PriceFunction>,
    pub pooling: Arc<dyn PoolingPolicy>,
}

impl AppState {
    /// State with the collaborators selected by `config`: the remote geocoder
    /// backed by the static campus table when `GEOCODER_URL` is set, and HTTP
    /// delivery when either gateway URL is set.
    pub fn new(db: DatabaseConnection, config: Config) -> AppResult<Self> {
        let geocoder: Arc<dyn Geocoder> = match &config.geocoder_url {
            Some(url) => Arc::new(FallbackGeocoder::new(
                RemoteGeocoder::new(url.clone())?,
                StaticGeocoder::campus(),
            )),
            None => Arc::new(StaticGeocoder::campus()),
        };

        let notifier: Arc<dyn NotificationGateway> =
            if config.chat_gateway_url.is_some() || config.push_gateway_url.is_some() {
                Arc::new(
                    HttpGateway::new(config.chat_gateway_url.clone(), config.push_gateway_url.clone())
                        .map_err(|e| AppError::Internal(e.to_string()))?,
                )
            } else {
                Arc::new(LogGateway)
            };

        Ok(Self {
            db,
            config,
            geocoder,
            notifier,
            zones: Arc::new(KeywordZones::campus()),
            pricing: Arc::new(ZoneSurchargePricing::default()),
            pooling: Arc::new(OldestTripFirst),
        })
    }

    pub fn with_geocoder(mut self, geocoder: impl Geocoder + 'static) -> Self {
        self.geocoder = Arc::new(geocoder);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationGateway>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_pooling(mut self, pooling: impl PoolingPolicy + 'static) -> Self {
        self.pooling = Arc::new(pooling);
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.config.dispatch
    }
}
