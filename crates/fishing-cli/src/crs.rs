//! Korea 2000 / Central Belt 2010 (EPSG:5186), the planar system the feature
//! service indexes observations in.
//!
//! Transverse Mercator on GRS80 using the series expansion from Snyder,
//! "Map Projections: A Working Manual" (USGS PP 1395), eqs. 8-9 and 8-10.

use std::fmt;

use serde::Serialize;

use crate::model::Coordinate;

const SEMI_MAJOR_M: f64 = 6_378_137.0;
const INVERSE_FLATTENING: f64 = 298.257_222_101;
const ORIGIN_LAT: f64 = 38.0;
const CENTRAL_MERIDIAN: f64 = 127.0;
const SCALE_FACTOR: f64 = 1.0;
const FALSE_EASTING_M: f64 = 200_000.0;
const FALSE_NORTHING_M: f64 = 600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProjectedPoint {
    pub x: f64,
    pub y: f64,
}

pub fn to_central_belt(coordinate: Coordinate) -> ProjectedPoint {
    let f = 1.0 / INVERSE_FLATTENING;
    let e2 = f * (2.0 - f);
    let ep2 = e2 / (1.0 - e2);

    let lat = coordinate.lat.to_radians();
    let dlon = (coordinate.lon - CENTRAL_MERIDIAN).to_radians();

    let sin_lat = lat.sin();
    let cos_lat = lat.cos();
    let tan_lat = lat.tan();

    let n = SEMI_MAJOR_M / (1.0 - e2 * sin_lat * sin_lat).sqrt();
    let t = tan_lat * tan_lat;
    let c = ep2 * cos_lat * cos_lat;
    let a = dlon * cos_lat;

    let m = meridian_arc(lat, e2);
    let m0 = meridian_arc(ORIGIN_LAT.to_radians(), e2);

    let x = SCALE_FACTOR
        * n
        * (a + (1.0 - t + c) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a.powi(5) / 120.0);
    let y = SCALE_FACTOR
        * (m - m0
            + n * tan_lat
                * (a * a / 2.0
                    + (5.0 - t + 9.0 * c + 4.0 * c * c) * a.powi(4) / 24.0
                    + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a.powi(6) / 720.0));

    ProjectedPoint {
        x: x + FALSE_EASTING_M,
        y: y + FALSE_NORTHING_M,
    }
}

fn meridian_arc(lat: f64, e2: f64) -> f64 {
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    SEMI_MAJOR_M
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * lat
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * lat).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * lat).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * lat).sin())
}

/// Axis-aligned box in projected metres. Renders as `minx,miny,maxx,maxy`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn around(center: ProjectedPoint, radius_km: f64) -> Self {
        let radius_m = radius_km * 1000.0;
        Self {
            min_x: center.x - radius_m,
            min_y: center.y - radius_m,
            max_x: center.x + radius_m,
            max_y: center.y + radius_m,
        }
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}
