//! Static region tables shipped with the binary.
//!
//! Tables are parsed once at startup and then shared by reference. A
//! directory holding files with the same names replaces the embedded copies
//! file by file.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::model::GridCell;

const LAND_FILE: &str = "mid_land_regions.toml";
const TEMP_FILE: &str = "mid_temp_regions.toml";
const SEA_FILE: &str = "mid_sea_regions.toml";
const GRID_AREA_FILE: &str = "grid_areas.toml";
const LAND_LINK_FILE: &str = "land_links.toml";

const EMBEDDED_LAND: &str = include_str!("../data/mid_land_regions.toml");
const EMBEDDED_TEMP: &str = include_str!("../data/mid_temp_regions.toml");
const EMBEDDED_SEA: &str = include_str!("../data/mid_sea_regions.toml");
const EMBEDDED_GRID_AREAS: &str = include_str!("../data/grid_areas.toml");
const EMBEDDED_LAND_LINKS: &str = include_str!("../data/land_links.toml");

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegionName {
    pub name: String,
    pub code: String,
}

/// Region names in their significant order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegionTable {
    #[serde(default)]
    pub regions: Vec<RegionName>,
}

impl RegionTable {
    /// First row, in table order, whose name appears in any of `addresses`.
    pub fn first_match(&self, addresses: &[&str]) -> Option<&RegionName> {
        let addresses: Vec<&str> = addresses
            .iter()
            .map(|text| text.trim())
            .filter(|text| !text.is_empty())
            .collect();
        self.regions.iter().find(|region| {
            addresses
                .iter()
                .any(|text| text.contains(region.name.as_str()))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GridArea {
    pub nx: i32,
    pub ny: i32,
    pub area: String,
}

impl GridArea {
    pub fn cell(&self) -> GridCell {
        GridCell {
            nx: self.nx,
            ny: self.ny,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GridAreaTable {
    #[serde(default)]
    pub cells: Vec<GridArea>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AreaPrefix {
    pub prefix: String,
    pub land: String,
}

/// A province whose land code depends on which side of the ridge the city
/// lies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoastalSplit {
    pub prefix: String,
    pub east_land: String,
    pub west_land: String,
    #[serde(default)]
    pub east_cities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LandLink {
    pub land: String,
    pub temp: String,
    pub sea: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct LandLinkTable {
    #[serde(default)]
    pub area_prefixes: Vec<AreaPrefix>,
    #[serde(default)]
    pub coastal_splits: Vec<CoastalSplit>,
    #[serde(default)]
    pub links: Vec<LandLink>,
}

impl LandLinkTable {
    pub fn link_for(&self, land: &str) -> Option<&LandLink> {
        self.links.iter().find(|link| link.land == land)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceTables {
    pub land: RegionTable,
    pub temp: RegionTable,
    pub sea: RegionTable,
    pub grid_areas: GridAreaTable,
    pub land_links: LandLinkTable,
}

impl ReferenceTables {
    pub fn embedded() -> Result<Self, ReferenceDataError> {
        Self::load(None)
    }

    pub fn load(override_dir: Option<&Path>) -> Result<Self, ReferenceDataError> {
        let tables = Self {
            land: parse_table(LAND_FILE, &source(override_dir, LAND_FILE, EMBEDDED_LAND)?)?,
            temp: parse_table(TEMP_FILE, &source(override_dir, TEMP_FILE, EMBEDDED_TEMP)?)?,
            sea: parse_table(SEA_FILE, &source(override_dir, SEA_FILE, EMBEDDED_SEA)?)?,
            grid_areas: parse_table(
                GRID_AREA_FILE,
                &source(override_dir, GRID_AREA_FILE, EMBEDDED_GRID_AREAS)?,
            )?,
            land_links: parse_table(
                LAND_LINK_FILE,
                &source(override_dir, LAND_LINK_FILE, EMBEDDED_LAND_LINKS)?,
            )?,
        };
        tables.validate()?;
        Ok(tables)
    }

    fn validate(&self) -> Result<(), ReferenceDataError> {
        for (file, table) in [
            (LAND_FILE, &self.land),
            (TEMP_FILE, &self.temp),
            (SEA_FILE, &self.sea),
        ] {
            if table.regions.is_empty() {
                return Err(ReferenceDataError::invalid(file, "no regions defined"));
            }
            if let Some(region) = table
                .regions
                .iter()
                .find(|region| region.name.trim().is_empty() || region.code.trim().is_empty())
            {
                return Err(ReferenceDataError::invalid(
                    file,
                    format!("blank name or code near {:?}", region.code),
                ));
            }
        }

        if self
            .grid_areas
            .cells
            .iter()
            .any(|cell| cell.area.trim().is_empty())
        {
            return Err(ReferenceDataError::invalid(
                GRID_AREA_FILE,
                "grid cell without area name",
            ));
        }

        let links = &self.land_links;
        if links
            .area_prefixes
            .iter()
            .any(|entry| entry.prefix.trim().is_empty() || entry.land.trim().is_empty())
        {
            return Err(ReferenceDataError::invalid(
                LAND_LINK_FILE,
                "blank area prefix or land code",
            ));
        }
        if links.coastal_splits.iter().any(|split| {
            split.prefix.trim().is_empty()
                || split.east_land.trim().is_empty()
                || split.west_land.trim().is_empty()
        }) {
            return Err(ReferenceDataError::invalid(
                LAND_LINK_FILE,
                "incomplete coastal split",
            ));
        }
        for (index, link) in links.links.iter().enumerate() {
            if links.links[..index]
                .iter()
                .any(|earlier| earlier.land == link.land)
            {
                return Err(ReferenceDataError::invalid(
                    LAND_LINK_FILE,
                    format!("duplicate link for land code {}", link.land),
                ));
            }
        }

        Ok(())
    }
}

fn source(
    override_dir: Option<&Path>,
    file: &'static str,
    embedded: &'static str,
) -> Result<String, ReferenceDataError> {
    let Some(dir) = override_dir else {
        return Ok(embedded.to_string());
    };

    let path = dir.join(file);
    if !path.exists() {
        return Ok(embedded.to_string());
    }

    fs::read_to_string(&path).map_err(|error| ReferenceDataError::Io {
        file,
        message: error.to_string(),
    })
}

fn parse_table<T>(file: &'static str, raw: &str) -> Result<T, ReferenceDataError>
where
    T: for<'de> Deserialize<'de>,
{
    toml::from_str(raw).map_err(|error| ReferenceDataError::Parse {
        file,
        message: error.to_string(),
    })
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReferenceDataError {
    #[error("cannot read reference file {file}: {message}")]
    Io { file: &'static str, message: String },
    #[error("cannot parse reference file {file}: {message}")]
    Parse { file: &'static str, message: String },
    #[error("invalid reference file {file}: {message}")]
    Invalid { file: &'static str, message: String },
}

impl ReferenceDataError {
    fn invalid(file: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            file,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_embedded_tables_load() {
        let tables = ReferenceTables::embedded().expect("tables");

        assert!(!tables.land.regions.is_empty());
        assert!(!tables.grid_areas.cells.is_empty());
        assert_eq!(tables.land_links.coastal_splits.len(), 1);
        assert_eq!(
            tables.land_links.link_for("11B00000").map(|link| link.temp.as_str()),
            Some("11B10101")
        );
    }

    #[test]
    fn reference_first_match_follows_table_order() {
        let tables = ReferenceTables::embedded().expect("tables");

        let region = tables.land.first_match(&["경기도 광주시 오포읍"]).expect("match");
        assert_eq!(region.name, "경기");
        assert_eq!(region.code, "11B00000");
    }

    #[test]
    fn reference_first_match_prefers_earlier_row_over_earlier_address() {
        let tables = ReferenceTables::embedded().expect("tables");

        // Road address names a later row (제주) than the lot address (서울).
        let region = tables
            .land
            .first_match(&["제주특별자치도 제주시", "서울특별시 중구"])
            .expect("match");
        assert_eq!(region.name, "서울");
        assert_eq!(region.code, "11B00000");
    }

    #[test]
    fn reference_first_match_returns_none_for_blank_or_unknown_text() {
        let tables = ReferenceTables::embedded().expect("tables");

        assert_eq!(tables.land.first_match(&["   "]), None);
        assert_eq!(tables.land.first_match(&["Tokyo, Japan"]), None);
    }

    #[test]
    fn reference_override_dir_replaces_single_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(LAND_FILE),
            "[[regions]]\nname = \"Testville\"\ncode = \"99X00000\"\n",
        )
        .expect("write");

        let tables = ReferenceTables::load(Some(dir.path())).expect("tables");
        assert_eq!(tables.land.regions.len(), 1);
        assert_eq!(
            tables.land.first_match(&["1 Testville Road"]).map(|r| r.code.as_str()),
            Some("99X00000")
        );
        assert_eq!(tables.temp, ReferenceTables::embedded().expect("tables").temp);
    }

    #[test]
    fn reference_rejects_unparseable_override() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(SEA_FILE), "[[regions]\nname=").expect("write");

        let error = ReferenceTables::load(Some(dir.path())).expect_err("must fail");
        assert!(matches!(error, ReferenceDataError::Parse { file, .. } if file == SEA_FILE));
    }

    #[test]
    fn reference_rejects_empty_region_table() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join(TEMP_FILE), "regions = []\n").expect("write");

        let error = ReferenceTables::load(Some(dir.path())).expect_err("must fail");
        assert_eq!(
            error,
            ReferenceDataError::Invalid {
                file: TEMP_FILE,
                message: "no regions defined".to_string()
            }
        );
    }

    #[test]
    fn reference_rejects_duplicate_land_links() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(
            dir.path().join(LAND_LINK_FILE),
            "[[links]]\nland = \"A\"\ntemp = \"B\"\nsea = \"C\"\n\n[[links]]\nland = \"A\"\ntemp = \"D\"\nsea = \"E\"\n",
        )
        .expect("write");

        let error = ReferenceTables::load(Some(dir.path())).expect_err("must fail");
        assert!(matches!(error, ReferenceDataError::Invalid { file, .. } if file == LAND_LINK_FILE));
    }
}
