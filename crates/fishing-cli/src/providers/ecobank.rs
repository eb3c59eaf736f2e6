use reqwest::blocking::Client;
use serde::Serialize;

use super::{FeatureQuery, ProviderError};

const PROVIDER_NAME: &str = "ecobank";
const FISH_POINT_ENDPOINT: &str =
    "https://www.nie-ecobank.kr/ecoapi/NteeInfoService/wfs/getFishesPointWFS";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WfsQuery<'a> {
    service_key: &'a str,
    type_name: &'a str,
    bbox: String,
    max_features: u32,
}

pub fn fetch_features(
    client: &Client,
    service_key: &str,
    query: &FeatureQuery,
) -> Result<String, ProviderError> {
    fetch_features_at(client, FISH_POINT_ENDPOINT, service_key, query)
}

fn fetch_features_at(
    client: &Client,
    endpoint: &str,
    service_key: &str,
    query: &FeatureQuery,
) -> Result<String, ProviderError> {
    let params = WfsQuery {
        service_key,
        type_name: &query.type_name,
        bbox: query.bbox.to_string(),
        max_features: query.max_features,
    };

    let response = client
        .get(endpoint)
        .query(&params)
        .send()
        .map_err(|error| transport(error).with_provider(PROVIDER_NAME))?;
    let status = response.status();
    let body = response
        .text()
        .map_err(|error| transport(error).with_provider(PROVIDER_NAME))?;

    if !status.is_success() {
        let message = status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
        return Err(ProviderError::Http {
            status: status.as_u16(),
            message,
        }
        .with_provider(PROVIDER_NAME));
    }

    if body.trim().is_empty() {
        return Err(
            ProviderError::InvalidResponse("empty feature document".to_string())
                .with_provider(PROVIDER_NAME),
        );
    }

    Ok(body)
}

fn transport(error: reqwest::Error) -> ProviderError {
    ProviderError::Transport(error.without_url().to_string())
}
