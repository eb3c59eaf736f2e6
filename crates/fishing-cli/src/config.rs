use std::collections::HashMap;
use std::path::PathBuf;

use crate::fish::RemainderPolicy;

pub const KMA_SERVICE_KEY_ENV: &str = "KMA_SERVICE_KEY";
pub const FISH_API_KEY_ENV: &str = "FISH_API_KEY";
pub const FISHING_DATA_DIR_ENV: &str = "FISHING_DATA_DIR";
pub const FISHING_SPOT_FILE_ENV: &str = "FISHING_SPOT_FILE";
pub const FISHING_REFERENCE_DIR_ENV: &str = "FISHING_REFERENCE_DIR";
pub const FISHING_HTTP_TIMEOUT_SECS_ENV: &str = "FISHING_HTTP_TIMEOUT_SECS";
pub const FISHING_RETRY_MAX_ATTEMPTS_ENV: &str = "FISHING_RETRY_MAX_ATTEMPTS";
pub const FISHING_RETRY_DELAY_MS_ENV: &str = "FISHING_RETRY_DELAY_MS";
pub const FISH_SEARCH_RADIUS_KM_ENV: &str = "FISH_SEARCH_RADIUS_KM";
pub const FISH_MAX_FEATURES_ENV: &str = "FISH_MAX_FEATURES";
pub const FISH_TYPE_NAME_ENV: &str = "FISH_TYPE_NAME";
pub const FISH_REMAINDER_POLICY_ENV: &str = "FISH_REMAINDER_POLICY";
const HOME_ENV: &str = "HOME";

pub const HTTP_TIMEOUT_SECS: u64 = 10;
pub const RETRY_MAX_ATTEMPTS: usize = 3;
pub const RETRY_DELAY_MS: u64 = 1_500;
pub const FISH_SEARCH_RADIUS_KM: f64 = 5.0;
pub const FISH_MAX_FEATURES: u32 = 10;
pub const FISH_TYPE_NAME: &str = "mv_map_ntee_fishes_point";
pub const SPOT_FILE_NAME: &str = "fishing_spot.json";

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    pub kma_service_key: String,
    pub fish_api_key: String,
    pub data_dir: PathBuf,
    pub spot_file: PathBuf,
    pub reference_dir: Option<PathBuf>,
    pub http_timeout_secs: u64,
    pub retry_policy: RetryPolicy,
    pub fish: FishQuerySettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FishQuerySettings {
    pub radius_km: f64,
    pub max_features: u32,
    pub type_name: String,
    pub remainder_policy: RemainderPolicy,
}

impl Default for FishQuerySettings {
    fn default() -> Self {
        Self {
            radius_km: FISH_SEARCH_RADIUS_KM,
            max_features: FISH_MAX_FEATURES,
            type_name: FISH_TYPE_NAME.to_string(),
            remainder_policy: RemainderPolicy::Drop,
        }
    }
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self::from_pairs(std::env::vars())
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        let home = map.get(HOME_ENV).map(String::as_str);

        let data_dir = non_empty(&map, FISHING_DATA_DIR_ENV)
            .map(|value| PathBuf::from(expand_home_path(value, home)))
            .unwrap_or_else(|| std::env::temp_dir().join("fishing-plus"));
        let spot_file = non_empty(&map, FISHING_SPOT_FILE_ENV)
            .map(|value| PathBuf::from(expand_home_path(value, home)))
            .unwrap_or_else(|| data_dir.join(SPOT_FILE_NAME));
        let reference_dir = non_empty(&map, FISHING_REFERENCE_DIR_ENV)
            .map(|value| PathBuf::from(expand_home_path(value, home)));

        Self {
            kma_service_key: non_empty(&map, KMA_SERVICE_KEY_ENV)
                .unwrap_or_default()
                .to_string(),
            fish_api_key: non_empty(&map, FISH_API_KEY_ENV)
                .unwrap_or_default()
                .to_string(),
            data_dir,
            spot_file,
            reference_dir,
            http_timeout_secs: parse_positive(&map, FISHING_HTTP_TIMEOUT_SECS_ENV)
                .unwrap_or(HTTP_TIMEOUT_SECS),
            retry_policy: RetryPolicy {
                max_attempts: parse_positive(&map, FISHING_RETRY_MAX_ATTEMPTS_ENV)
                    .unwrap_or(RETRY_MAX_ATTEMPTS),
                delay_ms: non_empty(&map, FISHING_RETRY_DELAY_MS_ENV)
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(RETRY_DELAY_MS),
            },
            fish: FishQuerySettings {
                radius_km: non_empty(&map, FISH_SEARCH_RADIUS_KM_ENV)
                    .and_then(|value| value.parse::<f64>().ok())
                    .filter(|value| value.is_finite() && *value > 0.0)
                    .unwrap_or(FISH_SEARCH_RADIUS_KM),
                max_features: parse_positive(&map, FISH_MAX_FEATURES_ENV)
                    .unwrap_or(FISH_MAX_FEATURES),
                type_name: non_empty(&map, FISH_TYPE_NAME_ENV)
                    .unwrap_or(FISH_TYPE_NAME)
                    .to_string(),
                remainder_policy: non_empty(&map, FISH_REMAINDER_POLICY_ENV)
                    .and_then(RemainderPolicy::parse)
                    .unwrap_or(RemainderPolicy::Drop),
            },
        }
    }
}

fn non_empty<'a>(env_map: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    env_map
        .get(key)
        .map(String::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_positive<T>(env_map: &HashMap<String, String>, key: &str) -> Option<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    non_empty(env_map, key)
        .and_then(|value| value.parse::<T>().ok())
        .filter(|value| *value > T::default())
}

fn expand_home_path(raw: &str, home: Option<&str>) -> String {
    let trimmed = raw.trim();
    let Some(home) = home.map(str::trim).filter(|value| !value.is_empty()) else {
        return trimmed.to_string();
    };

    let home = home.trim_end_matches('/');
    let mut expanded = trimmed.replace("$HOME", home);

    if expanded == "~" {
        expanded = home.to_string();
    } else if let Some(rest) = expanded.strip_prefix("~/") {
        expanded = format!("{home}/{rest}");
    }

    expanded
}

/// Whole-attempt retry used by the batch refresh job. The delay is fixed
/// between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RETRY_MAX_ATTEMPTS,
            delay_ms: RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(self) -> usize {
        self.max_attempts.max(1)
    }

    pub fn delay(self) -> std::time::Duration {
        std::time::Duration::from_millis(self.delay_ms)
    }
}
