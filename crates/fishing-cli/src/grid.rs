//! Lambert conformal conic projection onto the KMA 5 km forecast grid.

use std::f64::consts::PI;

use crate::model::{Coordinate, GridCell};

const EARTH_RADIUS_KM: f64 = 6371.00877;
const GRID_SPACING_KM: f64 = 5.0;
const STANDARD_LAT_1: f64 = 30.0;
const STANDARD_LAT_2: f64 = 60.0;
const ORIGIN_LON: f64 = 126.0;
const ORIGIN_LAT: f64 = 38.0;
const ORIGIN_X: f64 = 43.0;
const ORIGIN_Y: f64 = 136.0;

struct Cone {
    re: f64,
    sn: f64,
    sf: f64,
    ro: f64,
    olon: f64,
}

impl Cone {
    fn kma() -> Self {
        let re = EARTH_RADIUS_KM / GRID_SPACING_KM;
        let slat1 = STANDARD_LAT_1.to_radians();
        let slat2 = STANDARD_LAT_2.to_radians();
        let olat = ORIGIN_LAT.to_radians();

        let sn = (slat1.cos() / slat2.cos()).ln()
            / ((PI * 0.25 + slat2 * 0.5).tan() / (PI * 0.25 + slat1 * 0.5).tan()).ln();
        let sf = (PI * 0.25 + slat1 * 0.5).tan().powf(sn) * slat1.cos() / sn;
        let ro = re * sf / (PI * 0.25 + olat * 0.5).tan().powf(sn);

        Self {
            re,
            sn,
            sf,
            ro,
            olon: ORIGIN_LON.to_radians(),
        }
    }
}

/// Projects a WGS84 position onto the forecast grid. Positions outside the
/// Korean peninsula still produce a cell; callers decide whether it is useful.
pub fn project(lat: f64, lon: f64) -> GridCell {
    let cone = Cone::kma();

    let ra = cone.re * cone.sf / (PI * 0.25 + lat.to_radians() * 0.5).tan().powf(cone.sn);
    let mut theta = lon.to_radians() - cone.olon;
    if theta > PI {
        theta -= 2.0 * PI;
    }
    if theta < -PI {
        theta += 2.0 * PI;
    }
    theta *= cone.sn;

    let x = ra * theta.sin() + ORIGIN_X + 0.5;
    let y = cone.ro - ra * theta.cos() + ORIGIN_Y + 0.5;

    GridCell {
        nx: x as i32,
        ny: y as i32,
    }
}

impl Coordinate {
    pub fn grid_cell(self) -> GridCell {
        project(self.lat, self.lon)
    }
}
