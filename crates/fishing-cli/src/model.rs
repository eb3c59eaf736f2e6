use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lon: f64) -> Result<Self, ValidationError> {
        validate_coordinates(lat, lon)?;
        Ok(Self { lat, lon })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCell {
    pub nx: i32,
    pub ny: i32,
}

/// Publication window of one forecast tier, in KST civil time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastBaseTime {
    pub date: String,
    pub time: String,
}

impl ForecastBaseTime {
    pub fn new(date: impl Into<String>, time: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            time: time.into(),
        }
    }

    /// `tmFc` form expected by the mid-term endpoints.
    pub fn announced_at(&self) -> String {
        format!("{}{}", self.date, self.time)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionCodeSet {
    pub land: Option<String>,
    pub temp: Option<String>,
    pub sea: Option<String>,
}

impl RegionCodeSet {
    pub fn is_complete(&self) -> bool {
        self.land.is_some() && self.temp.is_some() && self.sea.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("-"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

pub type ForecastFields = BTreeMap<String, FieldValue>;

/// Forecast key (`YYYYMMDDHHMM` or `YYYYMMDD`) to named fields.
pub type ForecastRecord = BTreeMap<String, ForecastFields>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MidForecast {
    #[serde(default)]
    pub land: ForecastRecord,
    #[serde(default)]
    pub ta: ForecastRecord,
    #[serde(default)]
    pub sea: ForecastRecord,
}

impl MidForecast {
    pub fn is_empty(&self) -> bool {
        self.land.is_empty() && self.ta.is_empty() && self.sea.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatedForecast {
    #[serde(default)]
    pub ultra: ForecastRecord,
    #[serde(default)]
    pub short: ForecastRecord,
    #[serde(default)]
    pub mid: MidForecast,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FishFeature {
    pub species_id: Option<String>,
    pub species_name: Option<String>,
    pub observed_year: Option<String>,
    pub area_name: Option<String>,
    pub begin_date: Option<String>,
    pub end_date: Option<String>,
    pub geometry: Option<Point>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FishShare {
    pub species: String,
    pub percent: u32,
}

pub type FishDistribution = Vec<FishShare>;

#[derive(Debug, Clone, PartialEq)]
pub enum LocationQuery {
    SpotName(String),
    Coordinates {
        coordinate: Coordinate,
        address: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherRequest {
    pub location: LocationQuery,
    pub cached: bool,
}

impl WeatherRequest {
    pub fn new(
        name: Option<&str>,
        lat: Option<f64>,
        lon: Option<f64>,
        address: Option<&str>,
        cached: bool,
    ) -> Result<Self, ValidationError> {
        let location = location_query(name, lat, lon, address)?;
        if cached && !matches!(location, LocationQuery::SpotName(_)) {
            return Err(ValidationError::CachedRequiresName);
        }
        Ok(Self { location, cached })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FishRequest {
    pub location: LocationQuery,
    pub radius_km: Option<f64>,
}

impl FishRequest {
    pub fn new(
        name: Option<&str>,
        lat: Option<f64>,
        lon: Option<f64>,
        radius_km: Option<f64>,
    ) -> Result<Self, ValidationError> {
        let location = location_query(name, lat, lon, None)?;
        if let Some(radius) = radius_km {
            validate_radius(radius)?;
        }
        Ok(Self {
            location,
            radius_km,
        })
    }
}

fn location_query(
    name: Option<&str>,
    lat: Option<f64>,
    lon: Option<f64>,
    address: Option<&str>,
) -> Result<LocationQuery, ValidationError> {
    let has_name = name.is_some();
    let has_coords = lat.is_some() || lon.is_some();

    if has_name && has_coords {
        return Err(ValidationError::ConflictingLocationInput);
    }

    match (name, lat, lon) {
        (Some(raw_name), None, None) => Ok(LocationQuery::SpotName(normalize_name(raw_name)?)),
        (None, Some(lat), Some(lon)) => Ok(LocationQuery::Coordinates {
            coordinate: Coordinate::new(lat, lon)?,
            address: address
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
        }),
        (None, None, None) => Err(ValidationError::MissingLocationInput),
        _ => Err(ValidationError::PartialCoordinates),
    }
}

pub fn normalize_name(raw: &str) -> Result<String, ValidationError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(ValidationError::EmptyName);
    }
    Ok(value.to_string())
}

pub fn validate_coordinates(lat: f64, lon: f64) -> Result<(), ValidationError> {
    if !((-90.0)..=90.0).contains(&lat) {
        return Err(ValidationError::InvalidLatitude(lat));
    }
    if !((-180.0)..=180.0).contains(&lon) {
        return Err(ValidationError::InvalidLongitude(lon));
    }
    Ok(())
}

pub fn validate_radius(radius_km: f64) -> Result<(), ValidationError> {
    if !radius_km.is_finite() || radius_km <= 0.0 {
        return Err(ValidationError::InvalidRadius(radius_km));
    }
    Ok(())
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing location input: use --name or --lat/--lon")]
    MissingLocationInput,
    #[error("partial coordinates: provide both --lat and --lon")]
    PartialCoordinates,
    #[error("conflicting location input: use either --name or --lat/--lon")]
    ConflictingLocationInput,
    #[error("spot name must not be empty")]
    EmptyName,
    #[error("--cached requires --name")]
    CachedRequiresName,
    #[error("invalid latitude: {0}")]
    InvalidLatitude(f64),
    #[error("invalid longitude: {0}")]
    InvalidLongitude(f64),
    #[error("invalid radius: {0} (must be a positive number of kilometres)")]
    InvalidRadius(f64),
}
