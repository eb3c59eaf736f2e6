//! Normalises KMA payloads into `{forecast_key: {field: value}}` records.
//!
//! Grid tiers deliver a flat list of category entries; mid tiers deliver one
//! object whose keys pack a category, a day offset and an optional qualifier
//! (`taMin4`, `rnSt5Am`, `wh4AAm`). Each shape has its own category table so
//! a code reused across tiers cannot shadow the other tier's meaning.

use chrono::{Duration, NaiveDate};
use serde_json::Value;
use thiserror::Error;

use crate::clock::format_date;
use crate::model::{FieldValue, ForecastRecord};
use crate::providers::ForecastCall;

pub struct CategoryTable {
    entries: &'static [(&'static str, &'static str)],
}

impl CategoryTable {
    pub fn field_name(&self, code: &str) -> Option<&'static str> {
        self.entries
            .iter()
            .find(|(candidate, _)| *candidate == code)
            .map(|(_, field)| *field)
    }
}

pub static GRID_CATEGORIES: CategoryTable = CategoryTable {
    entries: &[
        ("T1H", "temperature"),
        ("TMP", "temperature"),
        ("TMN", "temperature_min"),
        ("TMX", "temperature_max"),
        ("RN1", "precipitation"),
        ("PCP", "precipitation"),
        ("SNO", "snowfall"),
        ("REH", "humidity"),
        ("PTY", "precipitation_type"),
        ("POP", "precipitation_probability"),
        ("SKY", "sky"),
        ("WSD", "wind_speed"),
        ("VEC", "wind_bearing"),
        ("UUU", "wind_east_west"),
        ("VVV", "wind_north_south"),
        ("WAV", "wave_height"),
        ("LGT", "lightning"),
    ],
};

pub static MID_CATEGORIES: CategoryTable = CategoryTable {
    entries: &[
        ("TMN", "temperature_min"),
        ("TMX", "temperature_max"),
        ("SKY", "sky"),
        ("WF", "sky"),
        ("POP", "precipitation_probability"),
        ("WH", "wave_height"),
    ],
};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("payload has no response.body.items.item")]
    MissingItems,
    #[error("unexpected payload shape: {0}")]
    UnexpectedShape(String),
}

pub fn parse(
    call: ForecastCall,
    payload: &Value,
    today: NaiveDate,
) -> Result<ForecastRecord, ParseError> {
    if call.is_mid() {
        parse_day_offset(payload, today)
    } else {
        parse_itemised(payload)
    }
}

/// Ultra now-cast, ultra forecast and short tiers. Later entries overwrite
/// individual fields of the same key, never the whole key.
pub fn parse_itemised(payload: &Value) -> Result<ForecastRecord, ParseError> {
    let mut record = ForecastRecord::new();

    for entry in items(payload)? {
        let Some(code) = entry.get("category").and_then(Value::as_str) else {
            continue;
        };
        let Some(field) = GRID_CATEGORIES.field_name(code.trim()) else {
            continue;
        };
        let Some(key) = forecast_key(entry) else {
            continue;
        };

        let raw = entry
            .get("fcstValue")
            .filter(|value| !is_blank(value))
            .or_else(|| entry.get("obsrValue"));

        record
            .entry(key)
            .or_default()
            .insert(field.to_string(), coerce_value(raw));
    }

    Ok(record)
}

/// Mid land, temperature and sea tiers; keys are dated `today + offset`.
pub fn parse_day_offset(payload: &Value, today: NaiveDate) -> Result<ForecastRecord, ParseError> {
    let mut record = ForecastRecord::new();

    for entry in items(payload)? {
        let Some(fields) = entry.as_object() else {
            return Err(ParseError::UnexpectedShape(
                "mid-term item is not an object".to_string(),
            ));
        };

        for (raw_key, raw_value) in fields {
            let Some(key) = MidKey::split(raw_key) else {
                continue;
            };
            let Some(field) = MID_CATEGORIES.field_name(&key.canonical_code()) else {
                continue;
            };
            let Some(date) = today.checked_add_signed(Duration::days(key.offset)) else {
                continue;
            };

            let name = if key.suffix.is_empty() {
                field.to_string()
            } else {
                format!("{field}_{}", snake_case(key.suffix))
            };

            record
                .entry(format_date(date))
                .or_default()
                .insert(name, coerce_value(Some(raw_value)));
        }
    }

    Ok(record)
}

/// Field-level merge: fields from `source` overwrite same-named fields in
/// `target` under the same key.
pub fn merge_into(target: &mut ForecastRecord, source: ForecastRecord) {
    for (key, fields) in source {
        target.entry(key).or_default().extend(fields);
    }
}

/// `null`, `""` and `"-"` are missing; all-digit strings are integers;
/// anything else numeric is a float and the raw text survives otherwise.
pub fn coerce_value(raw: Option<&Value>) -> FieldValue {
    match raw {
        None | Some(Value::Null) => FieldValue::Null,
        Some(Value::String(text)) => coerce_text(text),
        Some(Value::Number(number)) => number
            .as_f64()
            .map(FieldValue::Float)
            .unwrap_or_else(|| FieldValue::Text(number.to_string())),
        Some(Value::Bool(flag)) => FieldValue::Float(if *flag { 1.0 } else { 0.0 }),
        Some(other) => FieldValue::Text(other.to_string()),
    }
}

fn coerce_text(text: &str) -> FieldValue {
    if text.is_empty() || text == "-" {
        return FieldValue::Null;
    }

    if text.bytes().all(|byte| byte.is_ascii_digit()) {
        if let Ok(value) = text.parse::<i64>() {
            return FieldValue::Int(value);
        }
    }

    text.trim()
        .parse::<f64>()
        .map(FieldValue::Float)
        .unwrap_or_else(|_| FieldValue::Text(text.to_string()))
}

fn items(payload: &Value) -> Result<Vec<&Value>, ParseError> {
    let items = payload
        .pointer("/response/body/items")
        .ok_or(ParseError::MissingItems)?;

    match items {
        // The gateway sends `"items": ""` for an empty page.
        Value::String(text) if text.trim().is_empty() => Ok(Vec::new()),
        Value::Object(map) => match map.get("item") {
            Some(Value::Array(entries)) => Ok(entries.iter().collect()),
            Some(entry @ Value::Object(_)) => Ok(vec![entry]),
            Some(Value::Null) | None => Err(ParseError::MissingItems),
            Some(_) => Err(ParseError::UnexpectedShape(
                "items.item is neither a list nor an object".to_string(),
            )),
        },
        _ => Err(ParseError::UnexpectedShape(
            "items is not an object".to_string(),
        )),
    }
}

/// `fcstDate+fcstTime`, or `baseDate+baseTime` for now-cast observations.
fn forecast_key(entry: &Value) -> Option<String> {
    let pair = |date_field: &str, time_field: &str| {
        let date = key_part(entry.get(date_field)?, 8)?;
        let time = key_part(entry.get(time_field)?, 4)?;
        Some(format!("{date}{time}"))
    };

    pair("fcstDate", "fcstTime").or_else(|| pair("baseDate", "baseTime"))
}

fn key_part(value: &Value, width: usize) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Number(number) => number.as_u64().map(|part| format!("{part:0width$}")),
        _ => None,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.is_empty(),
        _ => false,
    }
}

struct MidKey<'a> {
    prefix: &'a str,
    offset: i64,
    suffix: &'a str,
}

impl<'a> MidKey<'a> {
    fn split(key: &'a str) -> Option<Self> {
        let digits_start = key.find(|ch: char| ch.is_ascii_digit())?;
        let rest = &key[digits_start..];
        let digits_len = rest
            .find(|ch: char| !ch.is_ascii_digit())
            .unwrap_or(rest.len());

        let prefix = &key[..digits_start];
        if prefix.is_empty() {
            return None;
        }

        Some(Self {
            prefix,
            offset: rest[..digits_len].parse().ok()?,
            suffix: &rest[digits_len..],
        })
    }

    fn canonical_code(&self) -> String {
        match self.prefix {
            "taMin" => "TMN".to_string(),
            "taMax" => "TMX".to_string(),
            "sky" => "SKY".to_string(),
            "rnSt" => "POP".to_string(),
            other => other.to_ascii_uppercase(),
        }
    }
}

fn snake_case(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 2);
    for (index, ch) in raw.chars().enumerate() {
        if ch.is_ascii_uppercase() && index > 0 {
            out.push('_');
        }
        out.push(ch.to_ascii_lowercase());
    }
    out
}
