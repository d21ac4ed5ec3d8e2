//! Checks a route file against the conventions contributors are asked to follow.

use std::{collections::HashSet, fmt, path::Path};

use crate::{
    geo::{decimal_places, Bounds, MIN_DECIMAL_PLACES},
    route::{id::RecordId, point::PointKind, Route},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub severity: Severity,
    /// `route`, `file` or `points[<index>]`
    pub location: String,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.location, self.message)
    }
}

#[derive(Default)]
struct Issues(Vec<Issue>);

impl Issues {
    fn push(&mut self, severity: Severity, location: impl Into<String>, message: String) {
        self.0.push(Issue {
            severity,
            location: location.into(),
            message,
        });
    }

    fn error(&mut self, location: impl Into<String>, message: String) {
        self.push(Severity::Error, location, message);
    }

    fn warning(&mut self, location: impl Into<String>, message: String) {
        self.push(Severity::Warning, location, message);
    }
}

/// `R102-AM` for route 102 in the AM period. A route number that already starts with
/// `R` is not prefixed again.
fn expected_stem(route: &Route) -> String {
    if route.route_number.starts_with('R') {
        format!("{}-{}", route.route_number, route.time_period)
    } else {
        format!("R{}-{}", route.route_number, route.time_period)
    }
}

fn check_id(issues: &mut Issues, location: &str, id: &RecordId) {
    match id.uuid() {
        None => issues.error(location, format!("id `{id}` is not a UUID")),
        Some(uuid) if uuid.get_version_num() != 7 => issues.warning(
            location,
            format!(
                "id `{id}` is a version {} UUID, new ids should be UUID7",
                uuid.get_version_num()
            ),
        ),
        Some(_) => {}
    }
}

fn check_coordinate(
    issues: &mut Issues,
    location: &str,
    axis: &str,
    value: f64,
    range: (f64, f64),
) {
    if !value.is_finite() {
        issues.error(location, format!("{axis} {value} is not a number"));
        return;
    }
    if !(range.0..=range.1).contains(&value) {
        issues.error(
            location,
            format!("{axis} {value} is outside bounds ({}-{})", range.0, range.1),
        );
    }
    let places = decimal_places(value);
    if places < MIN_DECIMAL_PLACES {
        issues.warning(
            location,
            format!(
                "{axis} {value} has {places} decimal places, expected at least {MIN_DECIMAL_PLACES}"
            ),
        );
    }
}

/// Every problem found in `route`. `file_name`, when known, is checked against the
/// `R<number>-<period>.json` naming convention.
pub fn validate_route(route: &Route, file_name: Option<&str>, bounds: &Bounds) -> Vec<Issue> {
    let mut issues = Issues::default();

    check_id(&mut issues, "route", &route.id);

    if let Some(name) = file_name {
        let stem = name.strip_suffix(".json").unwrap_or(name);
        let expected = expected_stem(route);
        if stem != expected {
            issues.warning(
                "file",
                format!("file name `{name}` should be `{expected}.json`"),
            );
        }
    }

    if route.points.len() < 2 {
        issues.error(
            "route",
            format!("route must have at least 2 points, found {}", route.points.len()),
        );
    }
    if route.stop_count() < 2 {
        issues.warning(
            "route",
            format!("route has {} stops, expected at least 2", route.stop_count()),
        );
    }

    let mut seen = HashSet::new();
    for (i, point) in route.points.iter().enumerate() {
        let location = format!("points[{i}]");

        check_id(&mut issues, &location, &point.id);
        if !seen.insert(&point.id) {
            issues.error(&location, format!("id `{}` is used more than once", point.id));
        }

        match point.kind() {
            PointKind::Stop if point.name.trim().is_empty() => {
                issues.error(&location, "stop has no name".to_owned());
            }
            PointKind::Waypoint if !point.name.is_empty() => issues.error(
                &location,
                format!("waypoint has name `{}`, waypoint names must be empty", point.name),
            ),
            _ => {}
        }

        check_coordinate(
            &mut issues,
            &location,
            "latitude",
            point.latitude,
            (bounds.lat_min, bounds.lat_max),
        );
        check_coordinate(
            &mut issues,
            &location,
            "longitude",
            point.longitude,
            (bounds.lon_min, bounds.lon_max),
        );
    }

    issues.0
}

/// Reads and validates one file. A file that does not parse is a single error.
pub fn validate_file(path: &Path, bounds: &Bounds) -> Vec<Issue> {
    match Route::read(path) {
        Ok(route) => {
            let file_name = path.file_name().and_then(|n| n.to_str());
            validate_route(&route, file_name, bounds)
        }
        Err(e) => vec![Issue {
            severity: Severity::Error,
            location: "file".to_owned(),
            message: e.to_string(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{point::RoutePoint, tests::sample_route};

    fn errors(issues: &[Issue]) -> Vec<&Issue> {
        issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .collect()
    }

    #[test]
    fn sample_is_clean() {
        let issues = validate_route(&sample_route(), Some("R102-AM.json"), &Bounds::DAVAO);
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn accepts_prefixed_route_number() {
        let mut route = sample_route();
        route.route_number = "R102".to_owned();
        let issues = validate_route(&route, Some("R102-AM.json"), &Bounds::DAVAO);
        assert!(issues.is_empty(), "{issues:?}");
    }

    #[test]
    fn flags_misnamed_file() {
        for name in ["R102-PM.json", "102-AM.json", "RR102-AM.json"] {
            let issues = validate_route(&sample_route(), Some(name), &Bounds::DAVAO);
            assert_eq!(issues.len(), 1, "{name}: {issues:?}");
            assert_eq!(issues[0].severity, Severity::Warning);
            assert_eq!(issues[0].location, "file");
            assert!(issues[0].message.contains("`R102-AM.json`"));
        }
    }

    #[test]
    fn flags_non_uuid_route_id() {
        let mut route = sample_route();
        route.id = RecordId::new("route-102");

        let issues = validate_route(&route, None, &Bounds::DAVAO);
        assert_eq!(errors(&issues).len(), 1, "{issues:?}");
        assert_eq!(issues[0].location, "route");
        assert!(issues[0].message.contains("`route-102` is not a UUID"));
    }

    #[test]
    fn flags_non_finite_coordinates() {
        let mut route = sample_route();
        route.points[0].latitude = f64::NAN;
        route.points[2].longitude = f64::INFINITY;

        let issues = validate_route(&route, None, &Bounds::DAVAO);
        assert_eq!(issues.len(), 2, "{issues:?}");
        assert!(issues.iter().all(|i| i.severity == Severity::Error));
        assert_eq!(issues[0].location, "points[0]");
        assert_eq!(issues[0].message, "latitude NaN is not a number");
        assert_eq!(issues[1].location, "points[2]");
        assert_eq!(issues[1].message, "longitude inf is not a number");
    }

    #[test]
    fn flags_point_problems() {
        let mut route = sample_route();
        route.points[0].name = " ".to_owned();
        route.points[1].name = "Corner".to_owned();
        route.points[2].id = route.points[0].id.clone();
        route.points.push(RoutePoint::stop(
            RecordId::new("not-a-uuid"),
            "Far away",
            14.599512,
            120.984222,
        ));

        let issues = validate_route(&route, None, &Bounds::DAVAO);
        let errors = errors(&issues);
        let text = |loc: &str| {
            errors
                .iter()
                .filter(|i| i.location == loc)
                .map(|i| i.message.as_str())
                .collect::<Vec<_>>()
        };

        assert_eq!(text("points[0]"), ["stop has no name"]);
        assert!(text("points[1]")[0].contains("waypoint has name `Corner`"));
        assert!(text("points[2]")[0].contains("used more than once"));

        let far = text("points[3]");
        assert_eq!(far.len(), 3);
        assert!(far[0].contains("not a UUID"));
        assert!(far[1].starts_with("latitude 14.599512 is outside bounds"));
        assert!(far[2].starts_with("longitude 120.984222 is outside bounds"));
    }

    #[test]
    fn warns_about_precision_and_old_ids() {
        let mut route = sample_route();
        route.points[0].latitude = 7.02;
        route.points[1].id = RecordId::new("6f1c2a8e-3b4d-4e5f-8a9b-0c1d2e3f4a5b");

        let issues = validate_route(&route, None, &Bounds::DAVAO);
        assert!(errors(&issues).is_empty(), "{issues:?}");
        assert_eq!(issues.len(), 2);
        assert!(issues[0].message.contains("2 decimal places"));
        assert!(issues[0].to_string().starts_with("warning: points[0]: latitude"));
        assert!(issues[1].message.contains("version 4 UUID"));
    }

    #[test]
    fn too_few_points() {
        let mut route = sample_route();
        route.points.truncate(1);
        let issues = validate_route(&route, None, &Bounds::DAVAO);
        assert_eq!(errors(&issues).len(), 1);
        assert!(issues.iter().any(|i| i.message.contains("1 stops")));
    }

    #[test]
    fn unreadable_file_is_one_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("R1-AM.json");
        std::fs::write(&path, "[]").unwrap();

        let issues = validate_file(&path, &Bounds::DAVAO);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
    }
}
