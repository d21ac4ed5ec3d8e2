use geo_types::Point;

/// Mean Earth radius used for haversine distances, in metres.
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Minimum number of decimal places contributors are asked to record.
pub const MIN_DECIMAL_PLACES: usize = 6;

/// Inclusive latitude/longitude box every route point must fall inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
}

impl Bounds {
    /// Davao City service area.
    pub const DAVAO: Bounds = Bounds {
        lat_min: 6.9,
        lat_max: 7.2,
        lon_min: 125.4,
        lon_max: 125.7,
    };

    pub fn contains_lat(&self, lat: f64) -> bool {
        (self.lat_min..=self.lat_max).contains(&lat)
    }

    pub fn contains_lon(&self, lon: f64) -> bool {
        (self.lon_min..=self.lon_max).contains(&lon)
    }

    pub fn contains(&self, coord: Point) -> bool {
        self.contains_lat(coord.y()) && self.contains_lon(coord.x())
    }
}

/// Great-circle distance in metres.
pub fn haversine_distance(a: Point, b: Point) -> f64 {
    let phi1 = a.y().to_radians();
    let phi2 = b.y().to_radians();
    let delta_phi = (b.y() - a.y()).to_radians();
    let delta_lambda = (b.x() - a.x()).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Point at `fraction` (0..=1) of the way from `a` to `b`, linear in degrees.
pub fn interpolate(a: Point, b: Point, fraction: f64) -> Point {
    Point::new(
        a.x() + (b.x() - a.x()) * fraction,
        a.y() + (b.y() - a.y()) * fraction,
    )
}

/// Decimal places in the shortest representation of `value`.
pub fn decimal_places(value: f64) -> usize {
    let repr = value.to_string();
    match repr.split_once('.') {
        Some((_, fraction)) => fraction.len(),
        None => 0,
    }
}
