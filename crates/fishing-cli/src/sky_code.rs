use crate::model::{FieldValue, ForecastFields};

pub fn sky_summary(code: i64) -> &'static str {
    match code {
        1 => "맑음",
        3 => "구름많음",
        4 => "흐림",
        _ => "하늘상태 알 수 없음",
    }
}

pub fn precipitation_summary(code: i64) -> &'static str {
    match code {
        0 => "강수 없음",
        1 => "비",
        2 => "비/눈",
        3 => "눈",
        4 => "소나기",
        5 => "빗방울",
        6 => "빗방울눈날림",
        7 => "눈날림",
        _ => "강수형태 알 수 없음",
    }
}

/// One-line condition for a forecast slot: precipitation wins over sky when
/// anything is falling. Mid-tier text (`wf`) is passed through as-is.
pub fn condition(fields: &ForecastFields) -> Option<String> {
    let precipitation = fields.get("precipitation_type").and_then(integer_code);
    if let Some(code) = precipitation.filter(|code| *code != 0) {
        return Some(precipitation_summary(code).to_string());
    }

    match fields.get("sky") {
        Some(FieldValue::Text(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Some(value) => integer_code(value).map(|code| sky_summary(code).to_string()),
        None => precipitation.map(|code| precipitation_summary(code).to_string()),
    }
}

fn integer_code(value: &FieldValue) -> Option<i64> {
    match value {
        FieldValue::Int(code) => Some(*code),
        FieldValue::Float(code) if code.fract() == 0.0 => Some(*code as i64),
        _ => None,
    }
}
