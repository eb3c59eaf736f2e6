use reqwest::blocking::{Client, RequestBuilder};
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;
use serde_json::Value;

use crate::model::{ForecastBaseTime, GridCell};

use super::ProviderError;

const PROVIDER_NAME: &str = "kma";
const VILLAGE_ENDPOINT: &str = "http://apis.data.go.kr/1360000/VilageFcstInfoService_2.0";
const MID_ENDPOINT: &str = "http://apis.data.go.kr/1360000/MidFcstInfoService";
const SUCCESS_CODE: &str = "00";
const PAGE_SIZE: u32 = 1000;

pub const ULTRA_NOW_OPERATION: &str = "getUltraSrtNcst";
pub const ULTRA_FORECAST_OPERATION: &str = "getUltraSrtFcst";
pub const SHORT_OPERATION: &str = "getVilageFcst";
pub const MID_LAND_OPERATION: &str = "getMidLandFcst";
pub const MID_TEMPERATURE_OPERATION: &str = "getMidTa";
pub const MID_SEA_OPERATION: &str = "getMidSeaFcst";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GridQuery<'a> {
    service_key: &'a str,
    page_no: u32,
    num_of_rows: u32,
    data_type: &'a str,
    #[serde(rename = "base_date")]
    base_date: &'a str,
    #[serde(rename = "base_time")]
    base_time: &'a str,
    nx: i32,
    ny: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MidQuery<'a> {
    service_key: &'a str,
    page_no: u32,
    num_of_rows: u32,
    data_type: &'a str,
    reg_id: &'a str,
    tm_fc: String,
}

/// Grid-addressed tiers (ultra now-cast, ultra forecast, short).
pub fn fetch_grid_forecast(
    client: &Client,
    operation: &str,
    service_key: &str,
    cell: GridCell,
    base: &ForecastBaseTime,
) -> Result<Value, ProviderError> {
    fetch_grid_forecast_at(client, VILLAGE_ENDPOINT, operation, service_key, cell, base)
}

/// Region-addressed mid-term tiers.
pub fn fetch_mid_forecast(
    client: &Client,
    operation: &str,
    service_key: &str,
    region: &str,
    base: &ForecastBaseTime,
) -> Result<Value, ProviderError> {
    fetch_mid_forecast_at(client, MID_ENDPOINT, operation, service_key, region, base)
}

fn fetch_grid_forecast_at(
    client: &Client,
    endpoint: &str,
    operation: &str,
    service_key: &str,
    cell: GridCell,
    base: &ForecastBaseTime,
) -> Result<Value, ProviderError> {
    let query = GridQuery {
        service_key,
        page_no: 1,
        num_of_rows: PAGE_SIZE,
        data_type: "JSON",
        base_date: &base.date,
        base_time: &base.time,
        nx: cell.nx,
        ny: cell.ny,
    };

    let url = format!("{endpoint}/{operation}");
    let body = execute_request(client.get(url).query(&query))
        .map_err(|error| error.with_provider(PROVIDER_NAME))?;
    parse_envelope(&body).map_err(|error| error.with_provider(PROVIDER_NAME))
}

fn fetch_mid_forecast_at(
    client: &Client,
    endpoint: &str,
    operation: &str,
    service_key: &str,
    region: &str,
    base: &ForecastBaseTime,
) -> Result<Value, ProviderError> {
    let query = MidQuery {
        service_key,
        page_no: 1,
        num_of_rows: PAGE_SIZE,
        data_type: "JSON",
        reg_id: region,
        tm_fc: base.announced_at(),
    };

    let url = format!("{endpoint}/{operation}");
    let body = execute_request(client.get(url).query(&query))
        .map_err(|error| error.with_provider(PROVIDER_NAME))?;
    parse_envelope(&body).map_err(|error| error.with_provider(PROVIDER_NAME))
}

fn execute_request(request: RequestBuilder) -> Result<String, ProviderError> {
    let response = request
        .send()
        .map_err(|error| ProviderError::Transport(error.without_url().to_string()))?;
    let status = response.status();
    let body = response
        .text()
        .map_err(|error| ProviderError::Transport(error.without_url().to_string()))?;

    if status.is_success() {
        return Ok(body);
    }

    let message = gateway_error(&body)
        .map(|(_, message)| message)
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });

    Err(ProviderError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Decodes the JSON body and rejects envelopes whose result code signals an
/// upstream failure. The gateway answers key and quota problems with an XML
/// document even when JSON was requested, so those are mapped too.
fn parse_envelope(body: &str) -> Result<Value, ProviderError> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let (code, message) = gateway_error(trimmed).ok_or_else(|| {
            ProviderError::InvalidResponse("unexpected XML body".to_string())
        })?;
        return Err(ProviderError::Api { code, message });
    }

    let payload: Value = serde_json::from_str(trimmed)
        .map_err(|error| ProviderError::InvalidResponse(format!("forecast payload: {error}")))?;

    let header = payload.pointer("/response/header");
    let code = header
        .and_then(|header| header.get("resultCode"))
        .and_then(value_as_text)
        .ok_or_else(|| {
            ProviderError::InvalidResponse("forecast payload: missing resultCode".to_string())
        })?;

    if code != SUCCESS_CODE {
        let message = header
            .and_then(|header| header.get("resultMsg"))
            .and_then(value_as_text)
            .unwrap_or_else(|| "upstream error".to_string());
        return Err(ProviderError::Api { code, message });
    }

    Ok(payload)
}

fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(
            number
                .as_u64()
                .map(|code| format!("{code:02}"))
                .unwrap_or_else(|| number.to_string()),
        ),
        _ => None,
    }
}

const GATEWAY_TAGS: [&str; 5] = [
    "returnReasonCode",
    "resultCode",
    "returnAuthMsg",
    "errMsg",
    "resultMsg",
];

fn gateway_error(body: &str) -> Option<(String, String)> {
    let fields = gateway_fields(body);
    let field = |name: &str| {
        fields
            .iter()
            .find(|(tag, _)| tag == name)
            .map(|(_, text)| text.clone())
    };

    let code = field("returnReasonCode").or_else(|| field("resultCode"))?;
    let message = field("returnAuthMsg")
        .or_else(|| field("errMsg"))
        .or_else(|| field("resultMsg"))
        .unwrap_or_else(|| "upstream error".to_string());
    Some((code, message))
}

/// Non-empty text of the gateway header elements, matched by local name.
/// Reading stops at the first XML error, keeping what was read so far.
fn gateway_fields(body: &str) -> Vec<(String, String)> {
    let mut reader = Reader::from_str(body);
    reader.trim_text(true);

    let mut fields = Vec::new();
    let mut current: Option<String> = None;
    loop {
        let text = match reader.read_event() {
            Ok(Event::Start(element)) => {
                let local = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
                current = GATEWAY_TAGS.contains(&local.as_str()).then_some(local);
                continue;
            }
            Ok(Event::End(_)) => {
                current = None;
                continue;
            }
            Ok(Event::Text(text)) => match text.unescape() {
                Ok(text) => text.into_owned(),
                Err(_) => break,
            },
            Ok(Event::CData(data)) => String::from_utf8_lossy(&data.into_inner()).into_owned(),
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => continue,
        };

        if let Some(tag) = &current {
            let text = text.trim();
            if !text.is_empty() {
                fields.push((tag.clone(), text.to_string()));
            }
        }
    }
    fields
}
