use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{AggregatedForecast, Coordinate, ValidationError};

/// Degrees within which a coordinate lookup matches a stored spot.
pub const COORDINATE_TOLERANCE: f64 = 0.0001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpotKind {
    #[serde(alias = "바다")]
    Sea,
    #[serde(other)]
    Ground,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotFilter {
    All,
    Sea,
    Ground,
}

impl SpotFilter {
    fn accepts(self, kind: SpotKind) -> bool {
        match self {
            Self::All => true,
            Self::Sea => kind == SpotKind::Sea,
            Self::Ground => kind == SpotKind::Ground,
        }
    }
}

/// Result of the last batch lookup for one spot attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum LookupState<T> {
    Pending,
    Ready(T),
    Failed,
}

impl<T> Default for LookupState<T> {
    fn default() -> Self {
        Self::Pending
    }
}

impl<T> LookupState<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Ready(_) => "ready",
            Self::Failed => "failed",
        }
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            Self::Pending | Self::Failed => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotRecord {
    pub name: String,
    pub kind: SpotKind,
    pub lat: f64,
    pub lon: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub road_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lot_address: Option<String>,
    #[serde(default)]
    pub weather: LookupState<AggregatedForecast>,
    #[serde(default)]
    pub fish_species: LookupState<Vec<String>>,
}

impl SpotRecord {
    pub fn coordinate(&self) -> Result<Coordinate, ValidationError> {
        Coordinate::new(self.lat, self.lon)
    }

    /// Road address first, then lot address; blanks omitted.
    pub fn addresses(&self) -> Vec<&str> {
        [self.road_address.as_deref(), self.lot_address.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .collect()
    }

    pub fn has_failed_lookup(&self) -> bool {
        self.weather.is_failed() || self.fish_species.is_failed()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpotStore {
    #[serde(default)]
    pub spots: Vec<SpotRecord>,
}

impl SpotStore {
    /// A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let payload = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&payload).map_err(|error| StoreError::Parse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })
    }

    /// Rewrites the whole file.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let payload = serde_json::to_vec_pretty(self).map_err(|error| StoreError::Parse {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
        write_atomic(path, &payload).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Exact name first, then the first case-insensitive substring match.
    pub fn find_by_name(&self, name: &str) -> Option<&SpotRecord> {
        let needle = name.trim();
        if needle.is_empty() {
            return None;
        }

        self.spots
            .iter()
            .find(|spot| spot.name == needle)
            .or_else(|| {
                let lowered = needle.to_lowercase();
                self.spots
                    .iter()
                    .find(|spot| spot.name.to_lowercase().contains(&lowered))
            })
    }

    pub fn find_by_coordinates(&self, coordinate: Coordinate) -> Option<&SpotRecord> {
        self.spots.iter().find(|spot| {
            (spot.lat - coordinate.lat).abs() <= COORDINATE_TOLERANCE
                && (spot.lon - coordinate.lon).abs() <= COORDINATE_TOLERANCE
        })
    }

    pub fn filtered(&self, filter: SpotFilter) -> Vec<&SpotRecord> {
        self.spots
            .iter()
            .filter(|spot| filter.accepts(spot.kind))
            .collect()
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("spot store I/O failed at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("spot store at {} is not valid JSON: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "spot store path must have a parent directory",
        )
    })?;
    fs::create_dir_all(parent)?;

    let tmp_path = path.with_extension(format!("{}.tmp", std::process::id()));
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn spot(name: &str, kind: SpotKind, lat: f64, lon: f64) -> SpotRecord {
        SpotRecord {
            name: name.to_string(),
            kind,
            lat,
            lon,
            road_address: None,
            lot_address: None,
            weather: LookupState::Pending,
            fish_species: LookupState::Pending,
        }
    }

    fn fixture_store() -> SpotStore {
        SpotStore {
            spots: vec![
                spot("을왕리 해수욕장", SpotKind::Sea, 37.4474, 126.3725),
                spot("Paldang Dam", SpotKind::Ground, 37.5206, 127.2797),
                spot("팔당댐 하류", SpotKind::Ground, 37.5186, 127.2811),
            ],
        }
    }

    #[test]
    fn store_load_returns_empty_for_missing_file() {
        let dir = tempfile::tempdir().expect("temp dir");

        let store = SpotStore::load(&dir.path().join("fishing_spot.json")).expect("load");
        assert!(store.spots.is_empty());
    }

    #[test]
    fn store_save_then_load_keeps_lookup_states() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("fishing_spot.json");

        let mut store = fixture_store();
        store.spots[0].fish_species = LookupState::Ready(vec!["감성돔".to_string()]);
        store.spots[1].weather = LookupState::Failed;
        store.save(&path).expect("save");

        let loaded = SpotStore::load(&path).expect("load");
        assert_eq!(loaded, store);
        let entries = fs::read_dir(dir.path().join("nested")).expect("read dir").count();
        assert_eq!(entries, 1, "temp file must be renamed away");
    }

    #[test]
    fn store_lookup_state_uses_status_tag() {
        let value = serde_json::to_value(LookupState::Ready(vec!["붕어".to_string()]))
            .expect("json");
        assert_eq!(value, json!({"status": "ready", "data": ["붕어"]}));
        assert_eq!(
            serde_json::to_value(LookupState::<Vec<String>>::Failed).expect("json"),
            json!({"status": "failed"})
        );
    }

    #[test]
    fn store_parses_legacy_kind_labels() {
        let record: SpotRecord = serde_json::from_value(json!({
            "name": "방파제",
            "kind": "바다",
            "lat": 35.1,
            "lon": 129.0
        }))
        .expect("record");
        assert_eq!(record.kind, SpotKind::Sea);
        assert_eq!(record.weather, LookupState::Pending);

        let inland: SpotRecord = serde_json::from_value(json!({
            "name": "저수지",
            "kind": "민물",
            "lat": 36.0,
            "lon": 127.0
        }))
        .expect("record");
        assert_eq!(inland.kind, SpotKind::Ground);
    }

    #[test]
    fn store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("fishing_spot.json");
        fs::write(&path, "{not json").expect("seed");

        let error = SpotStore::load(&path).expect_err("must fail");
        assert!(matches!(error, StoreError::Parse { .. }));
    }

    #[test]
    fn store_find_by_name_prefers_exact_match() {
        let store = fixture_store();

        assert_eq!(
            store.find_by_name("팔당댐 하류").map(|spot| spot.lat),
            Some(37.5186)
        );
        assert_eq!(
            store.find_by_name("paldang").map(|spot| spot.name.as_str()),
            Some("Paldang Dam")
        );
        assert_eq!(
            store.find_by_name("을왕리").map(|spot| spot.kind),
            Some(SpotKind::Sea)
        );
        assert!(store.find_by_name("한강").is_none());
        assert!(store.find_by_name("  ").is_none());
    }

    #[test]
    fn store_find_by_coordinates_uses_tolerance() {
        let store = fixture_store();

        let near = Coordinate {
            lat: 37.44745,
            lon: 126.37255,
        };
        assert_eq!(
            store.find_by_coordinates(near).map(|spot| spot.name.as_str()),
            Some("을왕리 해수욕장")
        );

        let far = Coordinate {
            lat: 37.4480,
            lon: 126.3725,
        };
        assert!(store.find_by_coordinates(far).is_none());
    }

    #[test]
    fn store_filters_by_kind() {
        let store = fixture_store();

        assert_eq!(store.filtered(SpotFilter::All).len(), 3);
        assert_eq!(store.filtered(SpotFilter::Sea).len(), 1);
        assert_eq!(store.filtered(SpotFilter::Ground).len(), 2);
    }

    #[test]
    fn store_addresses_skip_blanks_in_order() {
        let mut record = spot("x", SpotKind::Sea, 0.0, 0.0);
        record.road_address = Some("  ".to_string());
        record.lot_address = Some("부산광역시 기장군".to_string());

        assert_eq!(record.addresses(), vec!["부산광역시 기장군"]);
        assert!(!record.has_failed_lookup());
        record.fish_species = LookupState::Failed;
        assert!(record.has_failed_lookup());
    }
}
