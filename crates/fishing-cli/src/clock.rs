//! Publication windows for the three KMA forecast tiers.
//!
//! Every rule takes the current instant explicitly and evaluates it in KST,
//! so callers inject `now` and tests pin it.

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Asia::Seoul;
use chrono_tz::Tz;
use serde::Serialize;

use crate::model::ForecastBaseTime;

const ULTRA_FRESHNESS_MINUTE: u32 = 40;
const SHORT_PUBLICATION_HOURS: [u32; 8] = [2, 5, 8, 11, 14, 17, 20, 23];
const MID_MORNING_HOUR: u32 = 6;
const MID_EVENING_HOUR: u32 = 18;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TierBaseTimes {
    pub ultra: ForecastBaseTime,
    pub short: ForecastBaseTime,
    pub mid: ForecastBaseTime,
}

impl TierBaseTimes {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            ultra: ultra_base_time(now),
            short: short_base_time(now),
            mid: mid_base_time(now),
        }
    }
}

pub fn kst(now: DateTime<Utc>) -> DateTime<Tz> {
    now.with_timezone(&Seoul)
}

pub fn kst_today(now: DateTime<Utc>) -> NaiveDate {
    kst(now).date_naive()
}

pub fn ultra_base_time(now: DateTime<Utc>) -> ForecastBaseTime {
    let local = kst(now);
    let published = if local.minute() >= ULTRA_FRESHNESS_MINUTE {
        local
    } else {
        local - Duration::hours(1)
    };
    base_time(published.date_naive(), published.hour())
}

pub fn short_base_time(now: DateTime<Utc>) -> ForecastBaseTime {
    let local = kst(now);
    let today = local.date_naive();

    match SHORT_PUBLICATION_HOURS
        .iter()
        .rev()
        .find(|hour| local.hour() >= **hour)
    {
        Some(hour) => base_time(today, *hour),
        None => base_time(previous_day(today), 23),
    }
}

pub fn mid_base_time(now: DateTime<Utc>) -> ForecastBaseTime {
    let local = kst(now);
    let today = local.date_naive();

    if local.hour() < MID_MORNING_HOUR {
        base_time(previous_day(today), MID_EVENING_HOUR)
    } else if local.hour() < MID_EVENING_HOUR {
        base_time(today, MID_MORNING_HOUR)
    } else {
        base_time(today, MID_EVENING_HOUR)
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

fn previous_day(date: NaiveDate) -> NaiveDate {
    date.pred_opt().unwrap_or(date)
}

fn base_time(date: NaiveDate, hour: u32) -> ForecastBaseTime {
    ForecastBaseTime::new(format_date(date), format!("{hour:02}00"))
}
