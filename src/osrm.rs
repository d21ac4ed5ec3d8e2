//! Client for the OSRM `match` service, which snaps a trace of coordinates onto the road network.

use std::time::Duration;

use geo_types::Point;
use itertools::Itertools;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::geo::haversine_distance;

/// OSRM refuses match requests above 100 coordinates.
pub const DEFAULT_CHUNK_SIZE: usize = 80;
/// Coordinates shared by consecutive chunks so their geometries join up.
pub const CHUNK_OVERLAP: usize = 5;
/// Chunks at most this long are not split further after a failure.
const MIN_SPLIT_LEN: usize = 20;
/// Search radius around each input coordinate, in metres.
const MATCH_RADIUS_M: u32 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(thiserror::Error, Debug)]
pub enum OsrmError {
    #[error("error calling OSRM: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OSRM answered with status {0}")]
    Status(u16),

    #[error("error parsing OSRM response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("OSRM could not match the trace: {code} {}", .message.as_deref().unwrap_or_default())]
    NoMatch {
        code: String,
        message: Option<String>,
    },

    #[error("OSRM returned an unexpected geometry type")]
    UnexpectedGeometry,

    #[error("OSRM returned an empty geometry")]
    EmptyGeometry,

    #[error("need at least 2 coordinates to match, got {0}")]
    TooFewCoordinates(usize),
}

/// Snaps a short trace onto roads. Implemented by [`OsrmClient`]; tests supply their own.
pub trait RoadMatcher {
    /// Dense road geometry for `coords`, which must fit in a single request.
    fn match_chunk(&self, coords: &[Point]) -> Result<Vec<Point>, OsrmError>;
}

pub struct OsrmClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl OsrmClient {
    pub fn new(base_url: &str) -> Result<Self, OsrmError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            http,
        })
    }

    fn match_url(&self, coords: &[Point]) -> String {
        // OSRM wants lon,lat pairs
        let coord_str = coords
            .iter()
            .map(|c| format!("{},{}", c.x(), c.y()))
            .join(";");
        format!("{}/match/v1/driving/{coord_str}", self.base_url)
    }
}

impl RoadMatcher for OsrmClient {
    #[tracing::instrument(skip(self, coords), fields(points = coords.len()), err)]
    fn match_chunk(&self, coords: &[Point]) -> Result<Vec<Point>, OsrmError> {
        if coords.len() < 2 {
            return Err(OsrmError::TooFewCoordinates(coords.len()));
        }

        let radiuses = std::iter::repeat(MATCH_RADIUS_M.to_string())
            .take(coords.len())
            .join(";");

        let response = self
            .http
            .get(self.match_url(coords))
            .query(&[
                ("geometries", "geojson"),
                ("overview", "full"),
                ("radiuses", radiuses.as_str()),
            ])
            .send()?;

        let status = response.status();
        let body = response.text()?;

        match parse_match_response(&body) {
            Err(OsrmError::Parse(_)) if !status.is_success() => {
                Err(OsrmError::Status(status.as_u16()))
            }
            other => other,
        }
    }
}

#[derive(Deserialize)]
struct MatchResponse {
    code: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    matchings: Vec<Matching>,
}

#[derive(Deserialize)]
struct Matching {
    geometry: geojson::Geometry,
}

/// Joins the geometry of every matching into one trace, dropping repeated points
/// where matchings meet.
pub fn parse_match_response(body: &str) -> Result<Vec<Point>, OsrmError> {
    let response: MatchResponse = serde_json::from_str(body)?;

    if response.code != "Ok" || response.matchings.is_empty() {
        return Err(OsrmError::NoMatch {
            code: response.code,
            message: response.message,
        });
    }

    let mut coords: Vec<Point> = vec![];
    for matching in response.matchings {
        let geojson::Value::LineString(line) = matching.geometry.value else {
            return Err(OsrmError::UnexpectedGeometry);
        };

        for position in line {
            let [lon, lat, ..] = position.as_slice() else {
                return Err(OsrmError::UnexpectedGeometry);
            };
            let point = Point::new(*lon, *lat);
            if coords.last() != Some(&point) {
                coords.push(point);
            }
        }
    }

    if coords.is_empty() {
        return Err(OsrmError::EmptyGeometry);
    }

    Ok(coords)
}

/// Appends a chunk's geometry after the part that overlaps what is already there.
/// The overlap ends at the chunk point closest to the current end of the geometry,
/// searched for in the first half of the chunk.
fn append_chunk(geometry: &mut Vec<Point>, chunk: Vec<Point>) {
    let start = match geometry.last() {
        Some(&last) => chunk
            .iter()
            .take(chunk.len() / 2 + 1)
            .position_min_by(|a, b| {
                haversine_distance(last, **a).total_cmp(&haversine_distance(last, **b))
            })
            .map_or(0, |i| i + 1),
        None => 0,
    };
    geometry.extend(chunk.into_iter().skip(start));
}

/// Matches a trace of any length by splitting it into overlapping chunks.
/// A failed chunk longer than 20 points is retried in halves before giving up.
pub fn match_route<M: RoadMatcher + ?Sized>(
    matcher: &M,
    coords: &[Point],
    chunk_size: usize,
) -> Result<Vec<Point>, OsrmError> {
    if coords.len() < 2 {
        return Err(OsrmError::TooFewCoordinates(coords.len()));
    }

    let chunk_size = chunk_size.max(CHUNK_OVERLAP + 1);
    if coords.len() <= chunk_size {
        return matcher.match_chunk(coords);
    }

    let mut geometry: Vec<Point> = vec![];
    let mut i = 0;

    while i < coords.len() {
        let end = (i + chunk_size).min(coords.len());
        let chunk = &coords[i..end];

        let chunk_geometry = match matcher.match_chunk(chunk) {
            Ok(g) => g,
            Err(e) if chunk.len() > MIN_SPLIT_LEN => {
                warn!("Chunk {i}-{end} failed ({e}), trying smaller chunks");
                match_route(matcher, chunk, chunk.len() / 2)?
            }
            Err(e) => return Err(e),
        };

        append_chunk(&mut geometry, chunk_geometry);
        debug!("matched coordinates {i}-{end}, geometry now {} points", geometry.len());

        i = if end < coords.len() {
            end - CHUNK_OVERLAP
        } else {
            end
        };
    }

    if geometry.is_empty() {
        return Err(OsrmError::EmptyGeometry);
    }

    Ok(geometry)
}
