//! Waypoint normalization: regenerates the unnamed waypoints of a route so they sit at an
//! even spacing along the roads between stops. Stops are never touched.

use std::{
    fs,
    path::{Path, PathBuf},
};

use geo_types::Point;
use itertools::Itertools;
use tracing::{info, warn};

use crate::{
    geo::{haversine_distance, interpolate, Bounds},
    osrm::{match_route, RoadMatcher, DEFAULT_CHUNK_SIZE},
    route::{point::RoutePoint, Route, RouteError},
};

pub const DEFAULT_SPACING_M: f64 = 20.0;

pub fn is_valid_spacing(spacing_m: f64) -> bool {
    spacing_m.is_finite() && spacing_m > 0.0
}

#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    #[error("waypoint spacing must be a positive number of metres, got {0}")]
    InvalidSpacing(f64),

    #[error("route has fewer than 2 points, skipping")]
    TooFewPoints,

    #[error("route has fewer than 2 stops, skipping")]
    TooFewStops,

    #[error("stop count changed from {before} to {after}")]
    StopCountChanged { before: usize, after: usize },

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("failed to back up {}: {source}", path.display())]
    Backup {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Points every `spacing_m` metres along `geometry`, starting at its first point and
/// always ending at its last. A spacing that is not positive leaves the geometry as is.
pub fn interpolate_along(geometry: &[Point], spacing_m: f64) -> Vec<Point> {
    if geometry.len() < 2 || !is_valid_spacing(spacing_m) {
        return geometry.to_vec();
    }

    let mut waypoints = vec![geometry[0]];
    let mut accumulated = 0.0;

    for (&prev, &curr) in geometry.iter().tuple_windows() {
        let segment = haversine_distance(prev, curr);
        let mut remaining = segment;
        let mut segment_start = 0.0;

        while accumulated + remaining >= spacing_m {
            let to_next = spacing_m - accumulated;
            let fraction = segment_start + to_next / segment;
            if fraction > 1.0 {
                break;
            }

            waypoints.push(interpolate(prev, curr, fraction));
            remaining -= to_next;
            segment_start = fraction;
            accumulated = 0.0;
        }

        accumulated += remaining;
    }

    if let (Some(&last_emitted), Some(&last)) = (waypoints.last(), geometry.last()) {
        if last_emitted != last {
            waypoints.push(last);
        }
    }

    waypoints
}

/// Straight line between the two ends of a segment, used when road matching fails.
fn linear_fallback(start: Point, end: Point, spacing_m: f64) -> Vec<Point> {
    let distance = haversine_distance(start, end);
    if !is_valid_spacing(spacing_m) || distance <= spacing_m {
        return vec![start, end];
    }

    let count = ((distance / spacing_m) as usize + 1).max(2);
    (0..count)
        .map(|i| interpolate(start, end, i as f64 / (count - 1) as f64))
        .collect()
}

/// Evenly spaced points for one segment of a route, including both ends.
pub fn normalize_segment<M: RoadMatcher + ?Sized>(
    coords: &[Point],
    spacing_m: f64,
    matcher: &M,
) -> Vec<Point> {
    let (Some(&start), Some(&end)) = (coords.first(), coords.last()) else {
        return vec![];
    };
    if coords.len() < 2 {
        return coords.to_vec();
    }

    match match_route(matcher, coords, DEFAULT_CHUNK_SIZE) {
        Ok(geometry) => interpolate_along(&geometry, spacing_m),
        Err(e) => {
            warn!("  Road matching failed ({e}), falling back to a straight line");
            linear_fallback(start, end, spacing_m)
        }
    }
}

fn coords(points: &[RoutePoint]) -> Vec<Point> {
    points.iter().map(RoutePoint::coord).collect()
}

fn waypoints(coords: &[Point]) -> impl Iterator<Item = RoutePoint> + '_ {
    coords.iter().map(|&c| RoutePoint::waypoint(c))
}

/// Rebuilds every waypoint of `route` segment by segment between stops. Stops keep their
/// ids, names, coordinates and order; each new waypoint gets a fresh id.
pub fn normalize_route<M: RoadMatcher + ?Sized>(
    route: &Route,
    spacing_m: f64,
    matcher: &M,
    bounds: &Bounds,
) -> Result<Route, NormalizeError> {
    if !is_valid_spacing(spacing_m) {
        return Err(NormalizeError::InvalidSpacing(spacing_m));
    }

    let points = &route.points;
    if points.len() < 2 {
        return Err(NormalizeError::TooFewPoints);
    }

    let stop_indices = points.iter().positions(RoutePoint::is_stop).collect_vec();
    let (Some(&first_stop), Some(&last_stop)) = (stop_indices.first(), stop_indices.last())
    else {
        return Err(NormalizeError::TooFewStops);
    };
    if stop_indices.len() < 2 {
        return Err(NormalizeError::TooFewStops);
    }

    let mut new_points: Vec<RoutePoint> = vec![];

    // Lead-in before the first stop; the last generated point is the stop itself.
    if first_stop > 0 {
        let lead_in = normalize_segment(&coords(&points[..=first_stop]), spacing_m, matcher);
        if let Some((_, before_stop)) = lead_in.split_last() {
            new_points.extend(waypoints(before_stop));
        }
    }

    for (&from, &to) in stop_indices.iter().tuple_windows() {
        new_points.push(points[from].clone());

        let segment = normalize_segment(&coords(&points[from..=to]), spacing_m, matcher);
        if segment.len() > 2 {
            new_points.extend(waypoints(&segment[1..segment.len() - 1]));
        }
    }
    new_points.push(points[last_stop].clone());

    // Tail after the last stop; the first generated point is the stop itself.
    if last_stop < points.len() - 1 {
        let tail = normalize_segment(&coords(&points[last_stop..]), spacing_m, matcher);
        if let Some((_, after_stop)) = tail.split_first() {
            new_points.extend(waypoints(after_stop));
        }
    }

    for point in new_points.iter().filter(|p| !bounds.contains(p.coord())) {
        warn!(
            "  Point outside bounds: ({}, {})",
            point.latitude, point.longitude
        );
    }

    Ok(Route {
        points: new_points,
        ..route.clone()
    })
}

/// Largest distance between two adjacent waypoints, in metres.
pub fn max_waypoint_gap(points: &[RoutePoint]) -> f64 {
    points
        .iter()
        .tuple_windows()
        .filter(|(a, b)| a.is_waypoint() && b.is_waypoint())
        .map(|(a, b)| haversine_distance(a.coord(), b.coord()))
        .fold(0.0, f64::max)
}

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub spacing_m: f64,
    pub backup: bool,
    pub bounds: Bounds,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            spacing_m: DEFAULT_SPACING_M,
            backup: true,
            bounds: Bounds::DAVAO,
        }
    }
}

/// `R102-AM.json` -> `R102-AM.json.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Summary of a normalized file.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizeReport {
    pub points_before: usize,
    pub points_after: usize,
    pub stops: usize,
    pub max_gap_m: f64,
}

/// Normalizes a route file in place, keeping a `.json.bak` copy unless told not to.
/// Nothing is written if the stop count would change.
#[tracing::instrument(skip(matcher, options), err)]
pub fn process_file<M: RoadMatcher + ?Sized>(
    path: &Path,
    matcher: &M,
    options: &NormalizeOptions,
) -> Result<NormalizeReport, NormalizeError> {
    if !is_valid_spacing(options.spacing_m) {
        return Err(NormalizeError::InvalidSpacing(options.spacing_m));
    }

    info!(
        "Processing {}...",
        path.file_name().unwrap_or_default().to_string_lossy()
    );

    let route = Route::read(path)?;
    let normalized = normalize_route(&route, options.spacing_m, matcher, &options.bounds)?;

    let before = route.stop_count();
    let after = normalized.stop_count();
    if before != after {
        return Err(NormalizeError::StopCountChanged { before, after });
    }

    if options.backup {
        let backup = backup_path(path);
        fs::copy(path, &backup).map_err(|source| NormalizeError::Backup {
            path: backup,
            source,
        })?;
    }

    normalized.write(path)?;

    let report = NormalizeReport {
        points_before: route.points.len(),
        points_after: normalized.points.len(),
        stops: after,
        max_gap_m: max_waypoint_gap(&normalized.points),
    };

    info!(
        "  Points: {} -> {} ({} stops preserved)",
        report.points_before, report.points_after, report.stops
    );
    info!("  Max waypoint gap: {:.1}m", report.max_gap_m);

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        osrm::tests::{DownMatcher, EchoMatcher},
        route::{id::RecordId, point::PointKind, tests::sample_route},
    };

    fn route_with(points: Vec<RoutePoint>) -> Route {
        Route {
            points,
            ..sample_route()
        }
    }

    fn waypoint(lon: f64, lat: f64) -> RoutePoint {
        RoutePoint {
            id: RecordId::new("old"),
            ..RoutePoint::waypoint(Point::new(lon, lat))
        }
    }

    #[test]
    fn spacing_along_a_straight_line() {
        let a = Point::new(125.5, 7.0);
        let b = Point::new(125.5, 7.001); // ~111 m north
        let points = interpolate_along(&[a, b], 20.0);

        assert_eq!(points.first(), Some(&a));
        assert_eq!(points.last(), Some(&b));
        assert_eq!(points.len(), 7);
        for (p, q) in points.iter().tuple_windows() {
            assert!(haversine_distance(*p, *q) <= 20.0 + 1e-6);
        }
    }

    #[test]
    fn spacing_carries_across_vertices() {
        let geometry = [
            Point::new(125.5, 7.0),
            Point::new(125.5, 7.0001), // ~11 m
            Point::new(125.5001, 7.0001),
            Point::new(125.5001, 7.0005),
        ];
        let points = interpolate_along(&geometry, 20.0);
        let gaps = points
            .iter()
            .tuple_windows()
            .map(|(p, q)| haversine_distance(*p, *q))
            .collect_vec();

        assert!(gaps.iter().all(|&g| g <= 20.0 + 1e-6), "{gaps:?}");
        assert_eq!(points.last(), geometry.last());
    }

    #[test]
    fn short_geometry_is_returned_as_is() {
        let a = Point::new(125.5, 7.0);
        assert_eq!(interpolate_along(&[a], 20.0), vec![a]);
        assert!(interpolate_along(&[], 20.0).is_empty());
    }

    #[test]
    fn falls_back_to_a_straight_line() {
        let start = Point::new(125.5, 7.0);
        let end = Point::new(125.5, 7.001);

        let points = normalize_segment(&[start, end], 20.0, &DownMatcher);
        // floor(111.19 / 20) + 1
        assert_eq!(points.len(), 6);
        assert_eq!(points[0], start);
        assert_eq!(points[5], end);

        let close = Point::new(125.5, 7.0001);
        assert_eq!(
            normalize_segment(&[start, close], 20.0, &DownMatcher),
            vec![start, close]
        );
    }

    #[test]
    fn non_positive_spacing_does_not_subdivide() {
        let a = Point::new(125.5, 7.0);
        let b = Point::new(125.5, 7.001);
        for spacing in [0.0, -5.0, f64::NAN] {
            assert_eq!(interpolate_along(&[a, b], spacing), vec![a, b]);
            assert_eq!(normalize_segment(&[a, b], spacing, &DownMatcher), vec![a, b]);
        }
    }

    #[test]
    fn rejects_non_positive_spacing() {
        assert!(matches!(
            normalize_route(&sample_route(), 0.0, &DownMatcher, &Bounds::DAVAO),
            Err(NormalizeError::InvalidSpacing(s)) if s == 0.0
        ));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("R102-AM.json");
        sample_route().write(&path).unwrap();
        let before = fs::read_to_string(&path).unwrap();

        let options = NormalizeOptions {
            spacing_m: -1.0,
            ..Default::default()
        };
        assert!(matches!(
            process_file(&path, &DownMatcher, &options),
            Err(NormalizeError::InvalidSpacing(_))
        ));
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
        assert!(!backup_path(&path).exists());
    }

    #[test]
    fn keeps_stops_and_replaces_waypoints() {
        let route = route_with(vec![
            waypoint(125.5, 6.9995),
            RoutePoint::stop(RecordId::new("s1"), "First", 7.0, 125.5),
            waypoint(125.5, 7.0002),
            waypoint(125.5, 7.0004),
            RoutePoint::stop(RecordId::new("s2"), "Second", 7.001, 125.5),
            RoutePoint::stop(RecordId::new("s3"), "Third", 7.0012, 125.5),
            waypoint(125.5, 7.0015),
        ]);

        let normalized =
            normalize_route(&route, 20.0, &EchoMatcher::default(), &Bounds::DAVAO).unwrap();

        let stops = normalized.stops().cloned().collect_vec();
        assert_eq!(stops, route.stops().cloned().collect_vec());
        assert_eq!(normalized.points[0].kind(), PointKind::Waypoint);

        for point in normalized.points.iter().filter(|p| p.is_waypoint()) {
            assert_ne!(point.id.as_str(), "old");
            assert!(point.name.is_empty());
        }
        assert!(max_waypoint_gap(&normalized.points) <= 20.0 + 1e-6);
        assert_eq!(normalized.points.last().unwrap().kind(), PointKind::Waypoint);
        assert_eq!(normalized.id, route.id);
    }

    #[test]
    fn adjacent_stops_get_no_waypoints() {
        let route = route_with(vec![
            RoutePoint::stop(RecordId::new("s1"), "First", 7.0, 125.5),
            RoutePoint::stop(RecordId::new("s2"), "Second", 7.0001, 125.5),
        ]);

        let normalized =
            normalize_route(&route, 20.0, &EchoMatcher::default(), &Bounds::DAVAO).unwrap();
        assert_eq!(normalized.points, route.points);
    }

    #[test]
    fn stops_are_kept_verbatim() {
        let mut first = RoutePoint::stop(RecordId::new("s1"), "First", 7.0, 125.5);
        first.kind = None;
        first.extra.insert("landmark".to_owned(), "mall".into());
        let route = route_with(vec![
            first,
            RoutePoint::stop(RecordId::new("s2"), "Second", 7.001, 125.5),
        ]);

        let normalized =
            normalize_route(&route, 20.0, &EchoMatcher::default(), &Bounds::DAVAO).unwrap();
        assert_eq!(normalized.points[0], route.points[0]);
        assert_eq!(normalized.points.last(), route.points.last());
    }

    #[test]
    fn needs_two_stops() {
        let route = route_with(vec![
            RoutePoint::stop(RecordId::new("s1"), "Only", 7.0, 125.5),
            waypoint(125.5, 7.001),
        ]);
        assert!(matches!(
            normalize_route(&route, 20.0, &DownMatcher, &Bounds::DAVAO),
            Err(NormalizeError::TooFewStops)
        ));

        let route = route_with(vec![waypoint(125.5, 7.001)]);
        assert!(matches!(
            normalize_route(&route, 20.0, &DownMatcher, &Bounds::DAVAO),
            Err(NormalizeError::TooFewPoints)
        ));
    }

    #[test]
    fn gap_only_counts_waypoint_pairs() {
        let points = vec![
            RoutePoint::stop(RecordId::new("s1"), "A", 7.0, 125.5),
            waypoint(125.5, 7.01),
            waypoint(125.5, 7.0101),
            RoutePoint::stop(RecordId::new("s2"), "B", 7.1, 125.5),
        ];
        let gap = max_waypoint_gap(&points);
        assert!((gap - 11.12).abs() < 0.1, "{gap}");
        assert_eq!(max_waypoint_gap(&[]), 0.0);
    }

    #[test]
    fn backup_keeps_full_name() {
        assert_eq!(
            backup_path(Path::new("routes/R102-AM.json")),
            PathBuf::from("routes/R102-AM.json.bak")
        );
    }

    #[test]
    fn processes_a_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("R102-AM.json");
        let route = sample_route();
        route.write(&path).unwrap();

        let report =
            process_file(&path, &DownMatcher, &NormalizeOptions::default()).unwrap();

        assert_eq!(report.points_before, 3);
        assert_eq!(report.stops, 2);
        assert!(report.points_after > 3);
        // the straight-line fallback rounds the point count down
        assert!(report.max_gap_m < 21.0, "{}", report.max_gap_m);

        assert_eq!(Route::read(backup_path(&path)).unwrap(), route);
        let rewritten = Route::read(&path).unwrap();
        assert_eq!(rewritten.points.len(), report.points_after);
        assert_eq!(rewritten.color, route.color);
    }

    #[test]
    fn no_backup_when_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("R102-AM.json");
        sample_route().write(&path).unwrap();

        let options = NormalizeOptions {
            backup: false,
            ..Default::default()
        };
        process_file(&path, &DownMatcher, &options).unwrap();
        assert!(!backup_path(&path).exists());
    }
}
