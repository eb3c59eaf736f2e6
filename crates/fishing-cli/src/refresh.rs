//! Offline batch job that refreshes the forecast and species list of every
//! stored spot. Runs sequentially with a fixed delay between attempts;
//! concurrent runs against one store file are unsafe.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregator::aggregate_with_retry;
use crate::config::{FishQuerySettings, RetryPolicy, RuntimeConfig};
use crate::fish::{self, FishQueryError};
use crate::model::{Coordinate, FishFeature};
use crate::providers::{FeatureApi, ForecastApi};
use crate::reference::ReferenceTables;
use crate::region::RegionCodeResolver;
use crate::store::{LookupState, SpotRecord, SpotStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshScope {
    All,
    /// Only spots with a failed lookup, and only the failed attributes.
    OnlyFailed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub total: usize,
    pub weather_ok: usize,
    pub weather_failed: usize,
    pub fish_ok: usize,
    pub fish_failed: usize,
}

pub fn refresh_spots<P, N, S>(
    store: &mut SpotStore,
    providers: &P,
    tables: &ReferenceTables,
    config: &RuntimeConfig,
    scope: RefreshScope,
    now_fn: N,
    mut sleep_fn: S,
) -> RefreshSummary
where
    P: ForecastApi + FeatureApi + Sync,
    N: Fn() -> DateTime<Utc>,
    S: FnMut(Duration),
{
    let resolver = RegionCodeResolver::new(tables);
    let mut summary = RefreshSummary::default();

    for spot in store.spots.iter_mut() {
        if scope == RefreshScope::OnlyFailed && !spot.has_failed_lookup() {
            continue;
        }
        summary.total += 1;

        let refresh_weather = scope == RefreshScope::All || spot.weather.is_failed();
        let refresh_fish = scope == RefreshScope::All || spot.fish_species.is_failed();

        let coordinate = match spot.coordinate() {
            Ok(coordinate) => coordinate,
            Err(error) => {
                warn!(spot = %spot.name, error = %error, "spot has invalid coordinates");
                if refresh_weather {
                    spot.weather = LookupState::Failed;
                    summary.weather_failed += 1;
                }
                if refresh_fish {
                    spot.fish_species = LookupState::Failed;
                    summary.fish_failed += 1;
                }
                continue;
            }
        };

        if refresh_weather {
            refresh_weather_for(
                spot,
                coordinate,
                providers,
                &resolver,
                config.retry_policy,
                &now_fn,
                &mut sleep_fn,
                &mut summary,
            );
        }

        if refresh_fish {
            match query_with_retry(
                providers,
                coordinate,
                &config.fish,
                config.retry_policy,
                &mut sleep_fn,
            ) {
                Ok(features) => {
                    spot.fish_species = LookupState::Ready(fish::species_names(&features));
                    summary.fish_ok += 1;
                }
                Err(error) => {
                    warn!(spot = %spot.name, error = %error, "species lookup failed");
                    spot.fish_species = LookupState::Failed;
                    summary.fish_failed += 1;
                }
            }
        }
    }

    info!(
        total = summary.total,
        weather_failed = summary.weather_failed,
        fish_failed = summary.fish_failed,
        "spot refresh finished"
    );
    summary
}

#[allow(clippy::too_many_arguments)]
fn refresh_weather_for<P, N, S>(
    spot: &mut SpotRecord,
    coordinate: Coordinate,
    providers: &P,
    resolver: &RegionCodeResolver<'_>,
    policy: RetryPolicy,
    now_fn: &N,
    sleep_fn: &mut S,
    summary: &mut RefreshSummary,
) where
    P: ForecastApi + Sync,
    N: Fn() -> DateTime<Utc>,
    S: FnMut(Duration),
{
    let regions = resolver.resolve(&spot.addresses(), coordinate.grid_cell());
    let outcome = aggregate_with_retry(providers, coordinate, &regions, policy, now_fn, sleep_fn);
    let attempts = outcome.attempts();

    if outcome.is_complete() {
        info!(spot = %spot.name, attempts, "forecast refreshed");
        spot.weather = LookupState::Ready(outcome.into_report().forecast);
        summary.weather_ok += 1;
    } else {
        warn!(spot = %spot.name, attempts, "forecast lookup failed");
        spot.weather = LookupState::Failed;
        summary.weather_failed += 1;
    }
}

fn query_with_retry<P, S>(
    providers: &P,
    coordinate: Coordinate,
    settings: &FishQuerySettings,
    policy: RetryPolicy,
    sleep_fn: &mut S,
) -> Result<Vec<FishFeature>, FishQueryError>
where
    P: FeatureApi,
    S: FnMut(Duration),
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        match fish::query(providers, coordinate, settings.radius_km, settings) {
            Ok(features) => return Ok(features),
            Err(error) if attempt < max_attempts && error.retryable() => {
                info!(attempt, max_attempts, error = %error, "species lookup failed; retrying");
                sleep_fn(policy.delay());
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
