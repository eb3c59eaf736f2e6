//! Fans the six forecast calls out, folds their per-call outcomes into one
//! [`AggregatedForecast`], and wraps whole aggregations in the batch retry
//! loop.

use std::thread;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::{TierBaseTimes, kst_today};
use crate::config::RetryPolicy;
use crate::model::{AggregatedForecast, Coordinate, ForecastRecord, GridCell, RegionCodeSet};
use crate::parser::{self, ParseError};
use crate::providers::{ForecastApi, ForecastCall, ProviderError};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TierFailure {
    #[error(transparent)]
    Upstream(#[from] ProviderError),
    #[error(transparent)]
    Malformed(#[from] ParseError),
    #[error("forecast worker panicked")]
    Panicked,
}

impl TierFailure {
    pub fn retryable(&self) -> bool {
        match self {
            Self::Upstream(error) => error.retryable(),
            Self::Malformed(_) | Self::Panicked => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TierOutcome {
    Fetched { entries: usize },
    /// Mid-term call with no region code for its tier.
    Skipped,
    Failed(TierFailure),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationReport {
    pub forecast: AggregatedForecast,
    pub cell: GridCell,
    pub base_times: TierBaseTimes,
    pub outcomes: Vec<(ForecastCall, TierOutcome)>,
}

impl AggregationReport {
    /// Ultra and short must carry data and no attempted mid-term call may
    /// have failed. Skipped mid tiers are permanently empty and never make a
    /// report incomplete.
    pub fn is_complete(&self) -> bool {
        let mid_failed = self
            .outcomes
            .iter()
            .any(|(call, outcome)| call.is_mid() && matches!(outcome, TierOutcome::Failed(_)));

        !self.forecast.ultra.is_empty() && !self.forecast.short.is_empty() && !mid_failed
    }

    pub fn failures(&self) -> impl Iterator<Item = (ForecastCall, &TierFailure)> {
        self.outcomes.iter().filter_map(|(call, outcome)| match outcome {
            TierOutcome::Failed(failure) => Some((*call, failure)),
            _ => None,
        })
    }

    /// `call: reason` per failed call, for error messages.
    pub fn trace(&self) -> Vec<String> {
        self.failures()
            .map(|(call, failure)| format!("{}: {failure}", call.as_str()))
            .collect()
    }

    fn worth_retrying(&self) -> bool {
        let mut failures = self.failures().peekable();
        failures.peek().is_none() || failures.any(|(_, failure)| failure.retryable())
    }
}

/// One aggregation attempt. Never fails as a whole: a call that errors
/// leaves its tier empty and is recorded in `outcomes`.
pub fn aggregate<P>(
    api: &P,
    coordinate: Coordinate,
    regions: &RegionCodeSet,
    now: DateTime<Utc>,
) -> AggregationReport
where
    P: ForecastApi + Sync,
{
    let cell = coordinate.grid_cell();
    let base_times = TierBaseTimes::at(now);
    let today = kst_today(now);

    let results: Vec<(ForecastCall, Result<Option<ForecastRecord>, TierFailure>)> =
        thread::scope(|scope| {
            let base_times = &base_times;
            let workers: Vec<_> = ForecastCall::ALL
                .into_iter()
                .map(|call| {
                    let worker = scope
                        .spawn(move || run_call(api, call, cell, regions, base_times, today));
                    (call, worker)
                })
                .collect();

            workers
                .into_iter()
                .map(|(call, worker)| {
                    let result = worker.join().unwrap_or(Err(TierFailure::Panicked));
                    (call, result)
                })
                .collect()
        });

    let mut forecast = AggregatedForecast::default();
    let mut outcomes = Vec::with_capacity(results.len());

    for (call, result) in results {
        let outcome = match result {
            Ok(Some(record)) => {
                let entries = record.len();
                parser::merge_into(tier_slot(&mut forecast, call), record);
                debug!(tier = call.as_str(), entries, "forecast tier fetched");
                TierOutcome::Fetched { entries }
            }
            Ok(None) => {
                debug!(tier = call.as_str(), "forecast tier skipped: no region code");
                TierOutcome::Skipped
            }
            Err(failure) => {
                warn!(tier = call.as_str(), error = %failure, "forecast tier failed; left empty");
                TierOutcome::Failed(failure)
            }
        };
        outcomes.push((call, outcome));
    }

    AggregationReport {
        forecast,
        cell,
        base_times,
        outcomes,
    }
}

fn run_call<P: ForecastApi>(
    api: &P,
    call: ForecastCall,
    cell: GridCell,
    regions: &RegionCodeSet,
    base_times: &TierBaseTimes,
    today: NaiveDate,
) -> Result<Option<ForecastRecord>, TierFailure> {
    let mid = &base_times.mid;
    let payload = match call {
        ForecastCall::UltraNow => api.fetch_ultra_now(cell, &base_times.ultra),
        ForecastCall::UltraForecast => api.fetch_ultra_forecast(cell, &base_times.ultra),
        ForecastCall::Short => api.fetch_short(cell, &base_times.short),
        ForecastCall::MidLand => match regions.land.as_deref() {
            Some(region) => api.fetch_mid_land(region, mid),
            None => return Ok(None),
        },
        ForecastCall::MidTemperature => match regions.temp.as_deref() {
            Some(region) => api.fetch_mid_temperature(region, mid),
            None => return Ok(None),
        },
        ForecastCall::MidSea => match regions.sea.as_deref() {
            Some(region) => api.fetch_mid_sea(region, mid),
            None => return Ok(None),
        },
    }?;

    Ok(Some(parser::parse(call, &payload, today)?))
}

fn tier_slot(forecast: &mut AggregatedForecast, call: ForecastCall) -> &mut ForecastRecord {
    match call {
        ForecastCall::UltraNow | ForecastCall::UltraForecast => &mut forecast.ultra,
        ForecastCall::Short => &mut forecast.short,
        ForecastCall::MidLand => &mut forecast.mid.land,
        ForecastCall::MidTemperature => &mut forecast.mid.ta,
        ForecastCall::MidSea => &mut forecast.mid.sea,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    Complete {
        report: AggregationReport,
        attempts: usize,
    },
    Exhausted {
        last: AggregationReport,
        attempts: usize,
    },
}

impl RetryOutcome {
    pub fn attempts(&self) -> usize {
        match self {
            Self::Complete { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }

    pub fn into_report(self) -> AggregationReport {
        match self {
            Self::Complete { report, .. } => report,
            Self::Exhausted { last, .. } => last,
        }
    }
}

/// Repeats whole aggregations with a fixed delay until one is complete.
/// Base times are recomputed from `now_fn` on every attempt. Stops early
/// when every failure of an attempt is permanent.
pub fn aggregate_with_retry<P, N, S>(
    api: &P,
    coordinate: Coordinate,
    regions: &RegionCodeSet,
    policy: RetryPolicy,
    now_fn: N,
    mut sleep_fn: S,
) -> RetryOutcome
where
    P: ForecastApi + Sync,
    N: Fn() -> DateTime<Utc>,
    S: FnMut(Duration),
{
    let max_attempts = policy.attempts();
    let mut attempt = 1;

    loop {
        let report = aggregate(api, coordinate, regions, now_fn());
        if report.is_complete() {
            debug!(attempt, "aggregation complete");
            return RetryOutcome::Complete {
                report,
                attempts: attempt,
            };
        }

        if attempt >= max_attempts || !report.worth_retrying() {
            warn!(
                attempt,
                max_attempts,
                trace = ?report.trace(),
                "aggregation still incomplete; giving up"
            );
            return RetryOutcome::Exhausted {
                last: report,
                attempts: attempt,
            };
        }

        info!(attempt, max_attempts, delay_ms = policy.delay_ms, "aggregation incomplete; retrying");
        sleep_fn(policy.delay());
        attempt += 1;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierSummary {
    pub call: ForecastCall,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entries: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn tier_summaries(report: &AggregationReport) -> Vec<TierSummary> {
    report
        .outcomes
        .iter()
        .map(|(call, outcome)| match outcome {
            TierOutcome::Fetched { entries } => TierSummary {
                call: *call,
                status: "fetched",
                entries: Some(*entries),
                error: None,
            },
            TierOutcome::Skipped => TierSummary {
                call: *call,
                status: "skipped",
                entries: None,
                error: None,
            },
            TierOutcome::Failed(failure) => TierSummary {
                call: *call,
                status: "failed",
                entries: None,
                error: Some(failure.to_string()),
            },
        })
        .collect()
}
