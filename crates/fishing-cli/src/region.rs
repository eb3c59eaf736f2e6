use tracing::debug;

use crate::model::{GridCell, RegionCodeSet};
use crate::reference::{GridArea, ReferenceTables, RegionName};

/// Cells further than this (Chebyshev distance) from every listed grid area
/// stay unresolved.
const MAX_GRID_FALLBACK_DISTANCE: i32 = 3;

pub struct RegionCodeResolver<'a> {
    tables: &'a ReferenceTables,
}

impl<'a> RegionCodeResolver<'a> {
    pub fn new(tables: &'a ReferenceTables) -> Self {
        Self { tables }
    }

    /// Resolves codes from the spot's addresses first, then fills gaps from
    /// the area-prefix mapping of those addresses, then from the grid cell.
    pub fn resolve(&self, addresses: &[&str], cell: GridCell) -> RegionCodeSet {
        let mut codes = self.resolve_addresses(addresses);
        if codes.is_complete() {
            return codes;
        }

        if codes.land.is_none() {
            codes.land = addresses
                .iter()
                .map(|text| text.trim())
                .filter(|text| !text.is_empty())
                .find_map(|text| self.land_code_for_area(text))
                .or_else(|| self.land_code_for_cell(cell));
        }

        if let Some(link) = codes
            .land
            .as_deref()
            .and_then(|land| self.tables.land_links.link_for(land))
        {
            codes.temp.get_or_insert_with(|| link.temp.clone());
            codes.sea.get_or_insert_with(|| link.sea.clone());
        }

        debug!(?cell, ?codes, "region codes resolved with area fallback");
        codes
    }

    pub fn resolve_addresses(&self, addresses: &[&str]) -> RegionCodeSet {
        RegionCodeSet {
            land: code_of(self.tables.land.first_match(addresses)),
            temp: code_of(self.tables.temp.first_match(addresses)),
            sea: code_of(self.tables.sea.first_match(addresses)),
        }
    }

    pub fn resolve_grid(&self, cell: GridCell) -> RegionCodeSet {
        self.resolve(&[], cell)
    }

    pub fn area_for_cell(&self, cell: GridCell) -> Option<&'a str> {
        let cells = &self.tables.grid_areas.cells;
        if let Some(exact) = cells.iter().find(|area| area.cell() == cell) {
            return Some(exact.area.as_str());
        }

        cells
            .iter()
            .map(|area| (chebyshev(area, cell), area))
            .filter(|(distance, _)| *distance <= MAX_GRID_FALLBACK_DISTANCE)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, area)| area.area.as_str())
    }

    pub fn land_code_for_area(&self, area: &str) -> Option<String> {
        let links = &self.tables.land_links;

        if let Some(split) = links
            .coastal_splits
            .iter()
            .find(|split| area.starts_with(split.prefix.as_str()))
        {
            let east = split
                .east_cities
                .iter()
                .any(|city| area.split_whitespace().any(|part| part == city.as_str()));
            let land = if east {
                &split.east_land
            } else {
                &split.west_land
            };
            return Some(land.clone());
        }

        links
            .area_prefixes
            .iter()
            .find(|entry| area.starts_with(entry.prefix.as_str()))
            .map(|entry| entry.land.clone())
    }

    fn land_code_for_cell(&self, cell: GridCell) -> Option<String> {
        self.area_for_cell(cell)
            .and_then(|area| self.land_code_for_area(area))
    }
}

fn code_of(region: Option<&RegionName>) -> Option<String> {
    region.map(|region| region.code.clone())
}

fn chebyshev(area: &GridArea, cell: GridCell) -> i32 {
    (area.nx - cell.nx).abs().max((area.ny - cell.ny).abs())
}
