//! Conversion between route files and GeoJSON, for editing routes visually in geojson.io.

use geo_types::{LineString, Point};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue};
use serde_json::json;
use tracing::info;

use crate::{
    geo::Bounds,
    route::{
        id::RecordId,
        point::{PointKind, RoutePoint},
        Route,
    },
};

pub const STOP_COLOR: &str = "#ff0000";
pub const WAYPOINT_COLOR: &str = "#0000ff";
pub const DEFAULT_ROUTE_COLOR: &str = "#000000";

#[derive(thiserror::Error, Debug)]
pub enum ConvertError {
    #[error("invalid GeoJSON: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("missing route id in FeatureCollection properties")]
    MissingRouteId,

    #[error("missing `{0}` in FeatureCollection properties")]
    MissingProperty(&'static str),

    #[error("{axis} {value} for '{name}' is outside bounds ({min}-{max})")]
    OutOfBounds {
        axis: &'static str,
        value: f64,
        name: String,
        min: f64,
        max: f64,
    },

    #[error("point '{0}' does not have a [longitude, latitude] position")]
    InvalidPosition(String),

    #[error("point '{name}' has unknown kind `{kind}`")]
    InvalidKind { name: String, kind: String },

    #[error("route must have at least 2 points, found {0}")]
    TooFewPoints(usize),
}

fn marker_color(kind: PointKind) -> &'static str {
    match kind {
        PointKind::Stop => STOP_COLOR,
        PointKind::Waypoint => WAYPOINT_COLOR,
    }
}

fn properties(value: JsonValue) -> Option<JsonObject> {
    match value {
        JsonValue::Object(map) => Some(map),
        _ => None,
    }
}

fn feature(geometry: Geometry, props: JsonValue) -> Feature {
    Feature {
        bbox: None,
        geometry: Some(geometry),
        id: None,
        properties: properties(props),
        foreign_members: None,
    }
}

/// One Point feature per route point, then a LineString through all of them.
/// Route metadata travels as a `properties` member on the collection itself.
pub fn route_to_geojson(route: &Route) -> FeatureCollection {
    let color = route.color.as_deref().unwrap_or(DEFAULT_ROUTE_COLOR);

    let mut features: Vec<Feature> = route
        .points
        .iter()
        .map(|point| {
            feature(
                Geometry::new(geojson::Value::from(&point.coord())),
                json!({
                    "id": point.id,
                    "name": point.name,
                    "kind": point.kind(),
                    "marker-color": marker_color(point.kind()),
                }),
            )
        })
        .collect();

    let line: LineString = route.points.iter().map(RoutePoint::coord).collect();
    features.push(feature(
        Geometry::new(geojson::Value::from(&line)),
        json!({
            "stroke": color,
            "stroke-width": 3,
            "stroke-opacity": 0.8,
        }),
    ));

    let mut foreign_members = JsonObject::new();
    foreign_members.insert(
        "properties".to_owned(),
        json!({
            "id": route.id,
            "route_number": route.route_number,
            "name": route.name,
            "area": route.area,
            "time_period": route.time_period,
            "color": color,
        }),
    );

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: Some(foreign_members),
    }
}

pub fn route_to_geojson_string(route: &Route) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&route_to_geojson(route))
}

fn text(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn required(props: &JsonObject, key: &'static str) -> Result<String, ConvertError> {
    text(props.get(key)).ok_or(ConvertError::MissingProperty(key))
}

fn check_bounds(coord: Point, name: &str, bounds: &Bounds) -> Result<(), ConvertError> {
    if !bounds.contains_lat(coord.y()) {
        return Err(ConvertError::OutOfBounds {
            axis: "Latitude",
            value: coord.y(),
            name: name.to_owned(),
            min: bounds.lat_min,
            max: bounds.lat_max,
        });
    }
    if !bounds.contains_lon(coord.x()) {
        return Err(ConvertError::OutOfBounds {
            axis: "Longitude",
            value: coord.x(),
            name: name.to_owned(),
            min: bounds.lon_min,
            max: bounds.lon_max,
        });
    }
    Ok(())
}

fn point_from_feature(
    coord: Point,
    props: Option<&JsonObject>,
    bounds: &Bounds,
) -> Result<RoutePoint, ConvertError> {
    let prop = |key: &str| props.and_then(|p| p.get(key));

    let name = text(prop("name")).unwrap_or_default();
    let label = if name.is_empty() { "(unnamed)" } else { name.as_str() };
    check_bounds(coord, label, bounds)?;

    let kind = match text(prop("kind")) {
        Some(kind) => PointKind::parse(&kind).ok_or_else(|| ConvertError::InvalidKind {
            name: label.to_owned(),
            kind,
        })?,
        None => PointKind::Stop,
    };

    // Points added in geojson.io arrive without an id.
    let id = match text(prop("id"))
        .map(|id| RecordId::new(&id))
        .filter(|id| !id.is_empty())
    {
        Some(id) => id,
        None => {
            let id = RecordId::generate();
            info!(
                "Generated new ID {id} for point: {}",
                if name.is_empty() { "(waypoint)" } else { name.as_str() }
            );
            id
        }
    };

    Ok(RoutePoint {
        id,
        name,
        latitude: coord.y(),
        longitude: coord.x(),
        kind: Some(kind),
        extra: Default::default(),
    })
}

/// Rebuilds a route from an edited collection. LineString features are ignored;
/// only Point features become route points, in feature order.
pub fn geojson_to_route(
    collection: &FeatureCollection,
    bounds: &Bounds,
) -> Result<Route, ConvertError> {
    let empty = JsonObject::new();
    let props = collection
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("properties"))
        .and_then(JsonValue::as_object)
        .unwrap_or(&empty);

    let id = text(props.get("id"))
        .filter(|id| !id.trim().is_empty())
        .ok_or(ConvertError::MissingRouteId)?;

    let mut points = vec![];
    for feature in &collection.features {
        let Some(geometry) = &feature.geometry else {
            continue;
        };
        let geojson::Value::Point(position) = &geometry.value else {
            continue;
        };

        let props = feature.properties.as_ref();
        let coord = match position.as_slice() {
            [lon, lat, ..] => Point::new(*lon, *lat),
            _ => {
                let name = props
                    .and_then(|p| text(p.get("name")))
                    .unwrap_or_else(|| "(unnamed)".to_owned());
                return Err(ConvertError::InvalidPosition(name));
            }
        };

        points.push(point_from_feature(coord, props, bounds)?);
    }

    if points.len() < 2 {
        return Err(ConvertError::TooFewPoints(points.len()));
    }

    Ok(Route {
        id: RecordId::new(&id),
        route_number: required(props, "route_number")?,
        name: required(props, "name")?,
        area: required(props, "area")?,
        time_period: required(props, "time_period")?,
        color: Some(text(props.get("color")).unwrap_or_else(|| DEFAULT_ROUTE_COLOR.to_owned())),
        points,
        extra: Default::default(),
    })
}

pub fn geojson_str_to_route(s: &str, bounds: &Bounds) -> Result<Route, ConvertError> {
    let geojson: GeoJson = s.parse()?;
    let collection = FeatureCollection::try_from(geojson)?;
    geojson_to_route(&collection, bounds)
}
