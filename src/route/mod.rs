pub mod id;
pub mod point;

use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::route::{id::RecordId, point::RoutePoint};

#[derive(thiserror::Error, Debug)]
pub enum RouteError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{} is not a valid route file: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("failed to serialize route: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One bus line for one time-of-day variant, as stored in `R<number>-<period>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub id: RecordId,
    pub route_number: String,
    pub name: String,
    pub area: String,
    pub time_period: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub points: Vec<RoutePoint>,
    /// Top-level fields this tool does not know about, carried through rewrites untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Route {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, RouteError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| RouteError::Io {
            path: path.to_owned(),
            source,
        })?;

        Self::from_json(&contents).map_err(|source| RouteError::Parse {
            path: path.to_owned(),
            source,
        })
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Pretty JSON with two-space indentation and a trailing newline.
    pub fn to_json(&self) -> Result<String, RouteError> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<(), RouteError> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|source| RouteError::Io {
            path: path.to_owned(),
            source,
        })
    }

    pub fn stops(&self) -> impl Iterator<Item = &RoutePoint> {
        self.points.iter().filter(|p| p.is_stop())
    }

    pub fn stop_count(&self) -> usize {
        self.stops().count()
    }

    pub fn title(&self) -> String {
        format!("Route {} - {}", self.route_number, self.name)
    }
}

/// All `R*.json` route files in `dir`, sorted by file name.
pub fn find_route_files<P: AsRef<Path>>(dir: P) -> Result<Vec<PathBuf>, RouteError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|source| RouteError::Io {
        path: dir.to_owned(),
        source,
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path.extension().is_some_and(|ext| ext == "json")
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .is_some_and(|name| name.starts_with('R'))
        })
        .collect();

    files.sort();
    Ok(files)
}
