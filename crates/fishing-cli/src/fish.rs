use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::FishQuerySettings;
use crate::crs::{BoundingBox, to_central_belt};
use crate::model::{Coordinate, FishDistribution, FishFeature, FishShare};
use crate::providers::{FeatureApi, FeatureQuery, ProviderError};
use crate::wfs::{FeatureParseError, parse_features};

pub const UNNAMED_SPECIES: &str = "이름 없음";
const FULL_SHARE: u32 = 100;

/// What happens to the points lost to `100 / N` integer division.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemainderPolicy {
    /// Leave them out; totals may end below 100.
    #[default]
    Drop,
    /// Add them to the last bucket so totals reach exactly 100.
    AssignToLast,
}

impl RemainderPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "drop" => Some(Self::Drop),
            "assign_to_last" | "last" => Some(Self::AssignToLast),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Drop => "drop",
            Self::AssignToLast => "assign_to_last",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FishQueryError {
    #[error(transparent)]
    Upstream(#[from] ProviderError),
    #[error(transparent)]
    Parse(#[from] FeatureParseError),
}

impl FishQueryError {
    /// Only a reported service exception is permanent among parse failures.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Upstream(error) => error.retryable(),
            Self::Parse(FeatureParseError::ServiceException(_)) => false,
            Self::Parse(_) => true,
        }
    }
}

pub fn feature_query(
    coordinate: Coordinate,
    radius_km: f64,
    settings: &FishQuerySettings,
) -> FeatureQuery {
    FeatureQuery {
        type_name: settings.type_name.clone(),
        bbox: BoundingBox::around(to_central_belt(coordinate), radius_km),
        max_features: settings.max_features,
    }
}

/// Observations within a square of side `2 * radius_km` around `coordinate`.
pub fn query<P: FeatureApi>(
    api: &P,
    coordinate: Coordinate,
    radius_km: f64,
    settings: &FishQuerySettings,
) -> Result<Vec<FishFeature>, FishQueryError> {
    let request = feature_query(coordinate, radius_km, settings);
    debug!(bbox = %request.bbox, type_name = %request.type_name, "querying fish features");

    let document = api.fetch_fish_features(&request)?;
    let features = parse_features(&document, &request.type_name)?;

    debug!(count = features.len(), "fish features parsed");
    Ok(features)
}

/// Equal-weight share per observation, grouped by species and ordered by
/// descending share. Ties keep first-seen order.
pub fn distribution(features: &[FishFeature], policy: RemainderPolicy) -> FishDistribution {
    if features.is_empty() {
        return Vec::new();
    }

    let unit = FULL_SHARE / u32::try_from(features.len()).unwrap_or(u32::MAX);
    let mut buckets: Vec<FishShare> = Vec::new();
    for feature in features {
        let species = species_label(feature);
        match buckets.iter_mut().find(|bucket| bucket.species == species) {
            Some(bucket) => bucket.percent += unit,
            None => buckets.push(FishShare {
                species: species.to_string(),
                percent: unit,
            }),
        }
    }
    buckets.sort_by(|left, right| right.percent.cmp(&left.percent));

    let mut shares = Vec::with_capacity(buckets.len());
    let mut total = 0u32;
    for mut bucket in buckets {
        bucket.percent = bucket.percent.min(FULL_SHARE - total);
        total += bucket.percent;
        shares.push(bucket);
        if total >= FULL_SHARE {
            break;
        }
    }

    if policy == RemainderPolicy::AssignToLast {
        if let Some(last) = shares.last_mut() {
            last.percent += FULL_SHARE - total;
        }
    }

    shares
}

/// Sorted, de-duplicated species names, as kept in the spot store.
pub fn species_names(features: &[FishFeature]) -> Vec<String> {
    let mut names: Vec<String> = features
        .iter()
        .filter_map(|feature| feature.species_name.as_deref())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    names.sort();
    names.dedup();
    names
}

fn species_label(feature: &FishFeature) -> &str {
    feature
        .species_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .unwrap_or(UNNAMED_SPECIES)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    fn feature(name: Option<&str>) -> FishFeature {
        FishFeature {
            species_name: name.map(str::to_string),
            ..FishFeature::default()
        }
    }

    fn seven_features() -> Vec<FishFeature> {
        vec![
            feature(Some("붕어")),
            feature(Some("잉어")),
            feature(Some("붕어")),
            feature(Some("피라미")),
            feature(Some("붕어")),
            feature(Some("잉어")),
            feature(Some("붕어")),
        ]
    }

    struct FakeFeatureApi {
        response: Result<String, ProviderError>,
        requests: RefCell<Vec<FeatureQuery>>,
    }

    impl FeatureApi for FakeFeatureApi {
        fn fetch_fish_features(&self, query: &FeatureQuery) -> Result<String, ProviderError> {
            self.requests.borrow_mut().push(query.clone());
            self.response.clone()
        }
    }

    #[test]
    fn fish_distribution_drops_integer_remainder_by_default() {
        let shares = distribution(&seven_features(), RemainderPolicy::Drop);

        assert_eq!(
            shares,
            vec![
                FishShare {
                    species: "붕어".to_string(),
                    percent: 56
                },
                FishShare {
                    species: "잉어".to_string(),
                    percent: 28
                },
                FishShare {
                    species: "피라미".to_string(),
                    percent: 14
                },
            ]
        );
        assert_eq!(shares.iter().map(|share| share.percent).sum::<u32>(), 98);
    }

    #[test]
    fn fish_distribution_assign_to_last_sums_to_exactly_one_hundred() {
        let shares = distribution(&seven_features(), RemainderPolicy::AssignToLast);

        assert_eq!(shares.iter().map(|share| share.percent).sum::<u32>(), 100);
        assert_eq!(shares.len(), 3);
        // Only the final bucket carries more than its unit allocation.
        assert_eq!(shares[0].percent, 4 * 14);
        assert_eq!(shares[1].percent, 2 * 14);
        assert_eq!(shares[2].percent, 14 + 2);
    }

    #[test]
    fn fish_distribution_groups_missing_names() {
        let shares = distribution(
            &[feature(None), feature(Some("  ")), feature(Some("메기")), feature(None)],
            RemainderPolicy::Drop,
        );

        assert_eq!(shares[0].species, UNNAMED_SPECIES);
        assert_eq!(shares[0].percent, 75);
        assert_eq!(shares[1].percent, 25);
    }

    #[test]
    fn fish_distribution_ties_keep_first_seen_order() {
        let shares = distribution(
            &[feature(Some("쏘가리")), feature(Some("꺽지"))],
            RemainderPolicy::Drop,
        );
        let names: Vec<_> = shares.iter().map(|share| share.species.as_str()).collect();
        assert_eq!(names, vec!["쏘가리", "꺽지"]);
    }

    #[test]
    fn fish_distribution_of_nothing_is_empty() {
        assert!(distribution(&[], RemainderPolicy::AssignToLast).is_empty());
    }

    #[test]
    fn fish_species_names_are_sorted_and_unique() {
        assert_eq!(
            species_names(&seven_features()),
            vec!["붕어".to_string(), "잉어".to_string(), "피라미".to_string()]
        );
    }

    #[test]
    fn fish_query_builds_bbox_around_projected_point() {
        let api = FakeFeatureApi {
            response: Ok(
                "<wfs:FeatureCollection><gml:featureMember><EcoBank:mv_map_ntee_fishes_point>\
                 <EcoBank:spcs_korean_nm>붕어</EcoBank:spcs_korean_nm>\
                 </EcoBank:mv_map_ntee_fishes_point></gml:featureMember></wfs:FeatureCollection>"
                    .to_string(),
            ),
            requests: RefCell::new(Vec::new()),
        };
        let coordinate = Coordinate {
            lat: 38.0,
            lon: 127.0,
        };

        let features =
            query(&api, coordinate, 5.0, &FishQuerySettings::default()).expect("features");

        assert_eq!(features.len(), 1);
        let requests = api.requests.borrow();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].type_name, "mv_map_ntee_fishes_point");
        assert_eq!(requests[0].max_features, 10);
        assert!((requests[0].bbox.min_x - 195_000.0).abs() < 0.01);
        assert!((requests[0].bbox.max_y - 605_000.0).abs() < 0.01);
    }

    #[test]
    fn fish_query_propagates_upstream_and_parse_failures() {
        let coordinate = Coordinate {
            lat: 37.5,
            lon: 127.0,
        };
        let upstream = FakeFeatureApi {
            response: Err(ProviderError::Transport("timeout".to_string())),
            requests: RefCell::new(Vec::new()),
        };
        assert!(matches!(
            query(&upstream, coordinate, 5.0, &FishQuerySettings::default()),
            Err(FishQueryError::Upstream(_))
        ));

        let malformed = FakeFeatureApi {
            response: Ok("<a><b></a>".to_string()),
            requests: RefCell::new(Vec::new()),
        };
        assert!(matches!(
            query(&malformed, coordinate, 5.0, &FishQuerySettings::default()),
            Err(FishQueryError::Parse(_))
        ));
    }

    #[test]
    fn fish_remainder_policy_parses_config_values() {
        assert_eq!(RemainderPolicy::parse("DROP"), Some(RemainderPolicy::Drop));
        assert_eq!(
            RemainderPolicy::parse("assign-to-last"),
            Some(RemainderPolicy::AssignToLast)
        );
        assert_eq!(RemainderPolicy::parse("spread"), None);
        assert_eq!(RemainderPolicy::AssignToLast.as_str(), "assign_to_last");
    }
}
