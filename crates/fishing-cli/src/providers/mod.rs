use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::config::RuntimeConfig;
use crate::crs::BoundingBox;
use crate::model::{ForecastBaseTime, GridCell};

pub mod ecobank;
pub mod kma;
#[cfg(test)]
pub(crate) mod test_support;

/// One of the six upstream forecast calls made per aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ForecastCall {
    UltraNow,
    UltraForecast,
    Short,
    MidLand,
    MidTemperature,
    MidSea,
}

impl ForecastCall {
    pub const ALL: [ForecastCall; 6] = [
        Self::UltraNow,
        Self::UltraForecast,
        Self::Short,
        Self::MidLand,
        Self::MidTemperature,
        Self::MidSea,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UltraNow => "ultra_now",
            Self::UltraForecast => "ultra_forecast",
            Self::Short => "short",
            Self::MidLand => "mid_land",
            Self::MidTemperature => "mid_temperature",
            Self::MidSea => "mid_sea",
        }
    }

    pub fn is_mid(self) -> bool {
        matches!(self, Self::MidLand | Self::MidTemperature | Self::MidSea)
    }
}

pub trait ForecastApi {
    fn fetch_ultra_now(
        &self,
        cell: GridCell,
        base: &ForecastBaseTime,
    ) -> Result<Value, ProviderError>;
    fn fetch_ultra_forecast(
        &self,
        cell: GridCell,
        base: &ForecastBaseTime,
    ) -> Result<Value, ProviderError>;
    fn fetch_short(&self, cell: GridCell, base: &ForecastBaseTime) -> Result<Value, ProviderError>;
    fn fetch_mid_land(
        &self,
        region: &str,
        base: &ForecastBaseTime,
    ) -> Result<Value, ProviderError>;
    fn fetch_mid_temperature(
        &self,
        region: &str,
        base: &ForecastBaseTime,
    ) -> Result<Value, ProviderError>;
    fn fetch_mid_sea(
        &self,
        region: &str,
        base: &ForecastBaseTime,
    ) -> Result<Value, ProviderError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureQuery {
    pub type_name: String,
    pub bbox: BoundingBox,
    pub max_features: u32,
}

pub trait FeatureApi {
    /// Returns the raw WFS document.
    fn fetch_fish_features(&self, query: &FeatureQuery) -> Result<String, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct HttpProviders {
    client: Client,
    kma_service_key: String,
    fish_api_key: String,
}

impl HttpProviders {
    pub fn new(config: &RuntimeConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|error| ProviderError::Transport(error.to_string()))?;

        Ok(Self {
            client,
            kma_service_key: config.kma_service_key.clone(),
            fish_api_key: config.fish_api_key.clone(),
        })
    }

    fn kma_key(&self) -> Result<&str, ProviderError> {
        require_key(&self.kma_service_key, "KMA_SERVICE_KEY")
    }
}

impl ForecastApi for HttpProviders {
    fn fetch_ultra_now(
        &self,
        cell: GridCell,
        base: &ForecastBaseTime,
    ) -> Result<Value, ProviderError> {
        kma::fetch_grid_forecast(
            &self.client,
            kma::ULTRA_NOW_OPERATION,
            self.kma_key()?,
            cell,
            base,
        )
    }

    fn fetch_ultra_forecast(
        &self,
        cell: GridCell,
        base: &ForecastBaseTime,
    ) -> Result<Value, ProviderError> {
        kma::fetch_grid_forecast(
            &self.client,
            kma::ULTRA_FORECAST_OPERATION,
            self.kma_key()?,
            cell,
            base,
        )
    }

    fn fetch_short(&self, cell: GridCell, base: &ForecastBaseTime) -> Result<Value, ProviderError> {
        kma::fetch_grid_forecast(
            &self.client,
            kma::SHORT_OPERATION,
            self.kma_key()?,
            cell,
            base,
        )
    }

    fn fetch_mid_land(
        &self,
        region: &str,
        base: &ForecastBaseTime,
    ) -> Result<Value, ProviderError> {
        kma::fetch_mid_forecast(
            &self.client,
            kma::MID_LAND_OPERATION,
            self.kma_key()?,
            region,
            base,
        )
    }

    fn fetch_mid_temperature(
        &self,
        region: &str,
        base: &ForecastBaseTime,
    ) -> Result<Value, ProviderError> {
        kma::fetch_mid_forecast(
            &self.client,
            kma::MID_TEMPERATURE_OPERATION,
            self.kma_key()?,
            region,
            base,
        )
    }

    fn fetch_mid_sea(
        &self,
        region: &str,
        base: &ForecastBaseTime,
    ) -> Result<Value, ProviderError> {
        kma::fetch_mid_forecast(
            &self.client,
            kma::MID_SEA_OPERATION,
            self.kma_key()?,
            region,
            base,
        )
    }
}

impl FeatureApi for HttpProviders {
    fn fetch_fish_features(&self, query: &FeatureQuery) -> Result<String, ProviderError> {
        let key = require_key(&self.fish_api_key, "FISH_API_KEY")?;
        ecobank::fetch_features(&self.client, key, query)
    }
}

fn require_key<'a>(key: &'a str, env_name: &str) -> Result<&'a str, ProviderError> {
    if key.trim().is_empty() {
        return Err(ProviderError::MissingCredentials(env_name.to_string()));
    }
    Ok(key)
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("upstream result code {code}: {message}")]
    Api { code: String, message: String },
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
    #[error("missing credentials: set {0}")]
    MissingCredentials(String),
}

impl ProviderError {
    pub fn retryable(&self) -> bool {
        match self {
            ProviderError::Transport(_) => true,
            ProviderError::Http { status, .. } => *status == 429 || (500..=599).contains(status),
            // 01-05: application, db, no data, http, timeout; 22: quota; 99: unknown.
            ProviderError::Api { code, .. } => {
                matches!(code.as_str(), "01" | "02" | "03" | "04" | "05" | "22" | "99")
            }
            ProviderError::InvalidResponse(_) => false,
            ProviderError::MissingCredentials(_) => false,
        }
    }

    pub fn with_provider(self, provider: &'static str) -> Self {
        match self {
            ProviderError::Transport(message) => {
                ProviderError::Transport(format!("{provider}: {message}"))
            }
            ProviderError::Http { status, message } => ProviderError::Http {
                status,
                message: format!("{provider}: {message}"),
            },
            ProviderError::Api { code, message } => ProviderError::Api {
                code,
                message: format!("{provider}: {message}"),
            },
            ProviderError::InvalidResponse(message) => {
                ProviderError::InvalidResponse(format!("{provider}: {message}"))
            }
            ProviderError::MissingCredentials(name) => ProviderError::MissingCredentials(name),
        }
    }
}
