//! Static HTML map viewer (Leaflet on OpenStreetMap tiles) for a single route.

use std::{
    io::Write,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::Context;

use crate::route::Route;

const TEMPLATE: &str = include_str!("template.html");

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

/// Complete HTML document showing the route line, numbered stops and waypoint dots.
pub fn route_to_html(route: &Route) -> serde_json::Result<String> {
    // No `<` may reach the script block, so names like "</script>" or "<!--" stay inert.
    let route_json = serde_json::to_string(route)?.replace('<', "\\u003c");

    // The title placeholder sits in <head>, ahead of anything the route data can contain.
    Ok(TEMPLATE
        .replace("{{route_json}}", &route_json)
        .replacen("{{title}}", &escape_html(&route.title()), 1))
}

/// Writes the viewer to `output`, or to a kept temporary file when no output is given.
pub fn write_html(route: &Route, output: Option<&Path>) -> anyhow::Result<PathBuf> {
    let html = route_to_html(route)?;

    match output {
        Some(path) => {
            std::fs::write(path, html)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            Ok(path.to_owned())
        }
        None => {
            let mut file = tempfile::Builder::new()
                .prefix("route-")
                .suffix(".html")
                .tempfile()
                .context("Failed to create temporary file")?;
            file.write_all(html.as_bytes())?;
            let (_, path) = file.keep().context("Failed to keep temporary file")?;
            Ok(path)
        }
    }
}

/// Hands the file to the platform's default browser.
pub fn open_in_browser(path: &Path) -> anyhow::Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut c = Command::new("cmd");
        c.args(["/C", "start", ""]);
        c
    } else {
        Command::new("xdg-open")
    };

    let status = command
        .arg(path)
        .status()
        .context("Failed to launch a browser")?;
    anyhow::ensure!(status.success(), "Browser launcher exited with {status}");
    Ok(())
}
