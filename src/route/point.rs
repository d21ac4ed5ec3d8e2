use geo_types::Point;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::route::id::RecordId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    /// Files written before kinds existed only held stops.
    #[default]
    Stop,
    Waypoint,
}

impl PointKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stop" => Some(PointKind::Stop),
            "waypoint" => Some(PointKind::Waypoint),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePoint {
    pub id: RecordId,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Left out of older files; use [`RoutePoint::kind`] to read it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<PointKind>,
    /// Point fields this tool does not know about, carried through rewrites untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RoutePoint {
    /// New unnamed waypoint with a freshly generated id.
    pub fn waypoint(coord: Point) -> Self {
        Self {
            id: RecordId::generate(),
            name: String::new(),
            latitude: coord.y(),
            longitude: coord.x(),
            kind: Some(PointKind::Waypoint),
            extra: Map::new(),
        }
    }

    pub fn kind(&self) -> PointKind {
        self.kind.unwrap_or_default()
    }

    pub fn is_stop(&self) -> bool {
        self.kind() == PointKind::Stop
    }

    pub fn is_waypoint(&self) -> bool {
        self.kind() == PointKind::Waypoint
    }

    /// Position as x = longitude, y = latitude.
    pub fn coord(&self) -> Point {
        Point::new(self.longitude, self.latitude)
    }
}

#[cfg(test)]
impl RoutePoint {
    pub fn stop(id: RecordId, name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            id,
            name: name.to_owned(),
            latitude,
            longitude,
            kind: Some(PointKind::Stop),
            extra: Map::new(),
        }
    }
}
