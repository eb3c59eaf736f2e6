use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::aggregator::{self, TierSummary};
use crate::clock::TierBaseTimes;
use crate::config::RuntimeConfig;
use crate::crs::{BoundingBox, ProjectedPoint, to_central_belt};
use crate::error::AppError;
use crate::fish::{self, RemainderPolicy};
use crate::model::{
    AggregatedForecast, Coordinate, FishDistribution, FishFeature, FishRequest, GridCell,
    LocationQuery, RegionCodeSet, WeatherRequest,
};
use crate::providers::{FeatureApi, ForecastApi};
use crate::reference::ReferenceTables;
use crate::region::RegionCodeResolver;
use crate::store::{SpotFilter, SpotKind, SpotRecord, SpotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherSource {
    Live,
    Cached,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spot: Option<String>,
    pub coordinate: Coordinate,
    pub grid: GridCell,
    pub regions: RegionCodeSet,
    pub source: WeatherSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_times: Option<TierBaseTimes>,
    pub forecast: AggregatedForecast,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tiers: Vec<TierSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FishOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spot: Option<String>,
    pub coordinate: Coordinate,
    pub radius_km: f64,
    pub feature_count: usize,
    pub remainder_policy: RemainderPolicy,
    pub distribution: FishDistribution,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FishFeaturesOutput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spot: Option<String>,
    pub coordinate: Coordinate,
    pub radius_km: f64,
    pub bbox: BoundingBox,
    pub features: Vec<FishFeature>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridOutput {
    pub coordinate: Coordinate,
    pub grid: GridCell,
    pub central_belt: ProjectedPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegionOutput {
    pub addresses: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<GridCell>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid_area: Option<String>,
    pub codes: RegionCodeSet,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpotSummary {
    pub name: String,
    pub kind: SpotKind,
    pub lat: f64,
    pub lon: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub road_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lot_address: Option<String>,
    pub weather: &'static str,
    pub fish: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fish_species: Option<Vec<String>>,
}

/// Where a request points, after spot lookup.
struct ResolvedLocation<'s> {
    spot: Option<&'s SpotRecord>,
    coordinate: Coordinate,
    addresses: Vec<String>,
}

fn resolve_location<'s>(
    store: &'s SpotStore,
    location: &LocationQuery,
) -> Result<ResolvedLocation<'s>, AppError> {
    match location {
        LocationQuery::SpotName(name) => {
            let spot = store
                .find_by_name(name)
                .ok_or_else(|| AppError::spot_not_found(name))?;
            Ok(ResolvedLocation {
                spot: Some(spot),
                coordinate: spot.coordinate()?,
                addresses: owned_addresses(spot),
            })
        }
        LocationQuery::Coordinates {
            coordinate,
            address,
        } => {
            let spot = store.find_by_coordinates(*coordinate);
            let addresses = match (address, spot) {
                (Some(address), _) => vec![address.clone()],
                (None, Some(spot)) => owned_addresses(spot),
                (None, None) => Vec::new(),
            };
            Ok(ResolvedLocation {
                spot,
                coordinate: *coordinate,
                addresses,
            })
        }
    }
}

fn owned_addresses(spot: &SpotRecord) -> Vec<String> {
    spot.addresses().into_iter().map(str::to_string).collect()
}

/// Live lookups never fail on upstream outages; failed tiers come back
/// empty and are described in `tiers`.
pub fn resolve_weather<P, N>(
    store: &SpotStore,
    tables: &ReferenceTables,
    providers: &P,
    now_fn: N,
    request: &WeatherRequest,
) -> Result<WeatherOutput, AppError>
where
    P: ForecastApi + Sync,
    N: Fn() -> DateTime<Utc>,
{
    let location = resolve_location(store, &request.location)?;
    let grid = location.coordinate.grid_cell();
    let resolver = RegionCodeResolver::new(tables);
    let address_refs: Vec<&str> = location.addresses.iter().map(String::as_str).collect();
    let regions = resolver.resolve(&address_refs, grid);
    let spot_name = location.spot.map(|spot| spot.name.clone());

    if request.cached {
        let spot = location
            .spot
            .ok_or_else(|| AppError::user("--cached requires a stored spot"))?;
        let forecast = spot.weather.ready().ok_or_else(|| {
            AppError::user(format!(
                "no stored forecast for '{}' (status: {}); run `fishing-cli refresh`",
                spot.name,
                spot.weather.status()
            ))
            .with_code("user.forecast_not_cached")
        })?;

        return Ok(WeatherOutput {
            spot: spot_name,
            coordinate: location.coordinate,
            grid,
            regions,
            source: WeatherSource::Cached,
            base_times: None,
            forecast: forecast.clone(),
            tiers: Vec::new(),
        });
    }

    let report = aggregator::aggregate(providers, location.coordinate, &regions, now_fn());
    let tiers = aggregator::tier_summaries(&report);

    Ok(WeatherOutput {
        spot: spot_name,
        coordinate: location.coordinate,
        grid: report.cell,
        regions,
        source: WeatherSource::Live,
        base_times: Some(report.base_times),
        forecast: report.forecast,
        tiers,
    })
}

/// Upstream or parse failures yield an empty distribution plus a trace entry.
pub fn resolve_fish<P: FeatureApi>(
    config: &RuntimeConfig,
    store: &SpotStore,
    providers: &P,
    request: &FishRequest,
) -> Result<FishOutput, AppError> {
    let location = resolve_location(store, &request.location)?;
    let radius_km = request.radius_km.unwrap_or(config.fish.radius_km);
    let policy = config.fish.remainder_policy;

    let (features, trace) =
        match fish::query(providers, location.coordinate, radius_km, &config.fish) {
            Ok(features) => (features, Vec::new()),
            Err(error) => {
                warn!(error = %error, "fish query failed; returning empty distribution");
                (Vec::new(), vec![error.to_string()])
            }
        };

    Ok(FishOutput {
        spot: location.spot.map(|spot| spot.name.clone()),
        coordinate: location.coordinate,
        radius_km,
        feature_count: features.len(),
        remainder_policy: policy,
        distribution: fish::distribution(&features, policy),
        trace,
    })
}

/// Raw observations; here a parse failure is a hard error.
pub fn resolve_fish_features<P: FeatureApi>(
    config: &RuntimeConfig,
    store: &SpotStore,
    providers: &P,
    request: &FishRequest,
) -> Result<FishFeaturesOutput, AppError> {
    let location = resolve_location(store, &request.location)?;
    let radius_km = request.radius_km.unwrap_or(config.fish.radius_km);
    let bbox = fish::feature_query(location.coordinate, radius_km, &config.fish).bbox;

    let features = fish::query(providers, location.coordinate, radius_km, &config.fish)
        .map_err(|error| {
            AppError::runtime(format!("fish feature query failed: {error}"))
                .with_code("runtime.fish_features")
        })?;

    Ok(FishFeaturesOutput {
        spot: location.spot.map(|spot| spot.name.clone()),
        coordinate: location.coordinate,
        radius_km,
        bbox,
        features,
    })
}

pub fn grid_for(coordinate: Coordinate) -> GridOutput {
    GridOutput {
        coordinate,
        grid: coordinate.grid_cell(),
        central_belt: to_central_belt(coordinate),
    }
}

pub fn resolve_regions(
    tables: &ReferenceTables,
    address: Option<&str>,
    coordinate: Option<Coordinate>,
) -> Result<RegionOutput, AppError> {
    let addresses: Vec<String> = address
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .into_iter()
        .collect();
    if addresses.is_empty() && coordinate.is_none() {
        return Err(AppError::user(
            "missing region input: use --address and/or --lat/--lon",
        ));
    }

    let resolver = RegionCodeResolver::new(tables);
    let address_refs: Vec<&str> = addresses.iter().map(String::as_str).collect();

    let output = match coordinate.map(Coordinate::grid_cell) {
        Some(grid) => RegionOutput {
            codes: resolver.resolve(&address_refs, grid),
            grid: Some(grid),
            grid_area: resolver.area_for_cell(grid).map(str::to_string),
            addresses,
        },
        None => RegionOutput {
            codes: resolver.resolve_addresses(&address_refs),
            grid: None,
            grid_area: None,
            addresses,
        },
    };
    Ok(output)
}

pub fn list_spots(store: &SpotStore, filter: SpotFilter) -> Vec<SpotSummary> {
    store
        .filtered(filter)
        .into_iter()
        .map(|spot| SpotSummary {
            name: spot.name.clone(),
            kind: spot.kind,
            lat: spot.lat,
            lon: spot.lon,
            road_address: spot.road_address.clone(),
            lot_address: spot.lot_address.clone(),
            weather: spot.weather.status(),
            fish: spot.fish_species.status(),
            fish_species: spot.fish_species.ready().cloned(),
        })
        .collect()
}
