use std::{
    fs,
    path::{Path, PathBuf},
    process::ExitCode,
};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

use crate::{
    geo::Bounds,
    normalize::{is_valid_spacing, NormalizeOptions, DEFAULT_SPACING_M},
    osrm::{OsrmClient, RoadMatcher},
    route::{find_route_files, id::RecordId, Route},
    validate::Severity,
};

mod convert;
mod geo;
mod normalize;
mod osrm;
mod route;
mod validate;
mod viewer;

/// Tools for editing and checking bus route files
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a route file to GeoJSON for editing in geojson.io
    ToGeojson {
        /// Route JSON file
        route: PathBuf,
        /// Output file; GeoJSON goes to stdout when omitted
        output: Option<PathBuf>,
    },
    /// Convert an edited GeoJSON file back to a route file
    FromGeojson {
        /// GeoJSON FeatureCollection produced by `to-geojson`
        geojson: PathBuf,
        /// Output file; route JSON goes to stdout when omitted
        output: Option<PathBuf>,
    },
    /// Render a route as an interactive map and open it in the browser
    View {
        /// Route JSON file
        route: PathBuf,
        /// Write the HTML here instead of a temporary file
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Only write the HTML, don't open a browser
        #[arg(long)]
        no_open: bool,
    },
    /// Re-space waypoints evenly along the road network using OSRM
    Normalize(NormalizeArgs),
    /// Check route files against the contribution conventions
    Validate {
        /// Route files to check
        files: Vec<PathBuf>,
        /// Check every R*.json file in the routes directory
        #[arg(long)]
        all: bool,
        #[arg(long, env = "ROUTES_DIR", default_value = ".")]
        routes_dir: PathBuf,
        /// Fail on warnings too
        #[arg(long)]
        strict: bool,
    },
    /// Print new UUID7 identifiers for points or routes
    NewId {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: usize,
    },
}

#[derive(Args)]
struct NormalizeArgs {
    /// Single route file; relative paths are resolved against the routes directory
    route_file: Option<PathBuf>,
    /// Process every R*.json file in the routes directory
    #[arg(long)]
    all: bool,
    #[arg(long, env = "ROUTES_DIR", default_value = ".")]
    routes_dir: PathBuf,
    /// Target spacing between waypoints in metres
    #[arg(
        long,
        env = "WAYPOINT_SPACING",
        default_value_t = DEFAULT_SPACING_M,
        value_parser = parse_spacing
    )]
    spacing: f64,
    #[arg(long, env = "OSRM_URL", default_value = "http://localhost:5000")]
    osrm_url: String,
    /// Don't create .bak backup files
    #[arg(long)]
    no_backup: bool,
    /// Show what would be done without making changes
    #[arg(long)]
    dry_run: bool,
}

fn parse_spacing(s: &str) -> Result<f64, String> {
    let spacing: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if !is_valid_spacing(spacing) {
        return Err(format!("{spacing} is not a positive number of metres"));
    }
    Ok(spacing)
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    // stdout is reserved for converted output
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

fn write_or_print(output: Option<&Path>, contents: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => fs::write(path, contents)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            print!("{contents}");
            Ok(())
        }
    }
}

fn to_geojson(route_path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let route = Route::read(route_path)?;
    let mut geojson = convert::route_to_geojson_string(&route)?;
    geojson.push('\n');
    write_or_print(output, &geojson)?;

    if let Some(output) = output {
        info!("Wrote {}", output.display());
        eprintln!();
        eprintln!("Next steps:");
        eprintln!("  1. Open https://geojson.io");
        eprintln!("  2. Drag and drop {} onto the map", output.display());
        eprintln!("  3. Edit points visually (red=stops, blue=waypoints)");
        eprintln!("  4. Save -> GeoJSON to download edited file");
        eprintln!(
            "  5. Run: route-tools from-geojson <edited.geojson> {}",
            route_path.display()
        );
    }
    Ok(())
}

fn from_geojson(geojson_path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let text = fs::read_to_string(geojson_path)
        .with_context(|| format!("Failed to read {}", geojson_path.display()))?;
    let route = convert::geojson_str_to_route(&text, &Bounds::DAVAO)?;
    write_or_print(output, &route.to_json()?)?;

    if let Some(output) = output {
        info!("Wrote {} points to {}", route.points.len(), output.display());
        eprintln!();
        eprintln!("Next steps:");
        eprintln!("  1. Review changes: git diff {}", output.display());
        eprintln!("  2. Validate: route-tools validate {}", output.display());
        eprintln!("  3. Commit: git add {} && git commit", output.display());
    }
    Ok(())
}

fn view(route_path: &Path, output: Option<&Path>, no_open: bool) -> anyhow::Result<()> {
    let route = Route::read(route_path)?;
    let path = viewer::write_html(&route, output)?;
    info!("Wrote {}", path.display());

    if !no_open {
        info!("Opening Route {} in browser...", route.route_number);
        viewer::open_in_browser(&path)?;
    }
    Ok(())
}

fn route_files(
    single: Vec<PathBuf>,
    all: bool,
    routes_dir: &Path,
) -> anyhow::Result<Vec<PathBuf>> {
    if all {
        let files = find_route_files(routes_dir)?;
        if files.is_empty() {
            bail!("No route files found in {}", routes_dir.display());
        }
        return Ok(files);
    }
    if single.is_empty() {
        bail!("Either provide a route file or use --all");
    }
    Ok(single)
}

/// A relative path that does not exist from the working directory is taken to be
/// relative to the routes directory.
fn resolve_route_file(file: PathBuf, routes_dir: &Path) -> PathBuf {
    if file.is_absolute() || file.exists() {
        file
    } else {
        routes_dir.join(file)
    }
}

fn normalize_files(args: NormalizeArgs) -> anyhow::Result<bool> {
    let single = args
        .route_file
        .map(|f| resolve_route_file(f, &args.routes_dir))
        .into_iter()
        .collect();
    let files = route_files(single, args.all, &args.routes_dir)?;

    info!("OSRM server: {}", args.osrm_url);
    info!("Target spacing: {}m", args.spacing);
    info!("Files to process: {}", files.len());
    if args.dry_run {
        info!("DRY RUN - no changes will be made");
    }

    let client = OsrmClient::new(&args.osrm_url)?;
    let options = NormalizeOptions {
        spacing_m: args.spacing,
        backup: !args.no_backup,
        bounds: Bounds::DAVAO,
    };
    Ok(normalize_each(&files, &client, &options, args.dry_run))
}

fn normalize_each<M: RoadMatcher + ?Sized>(
    files: &[PathBuf],
    matcher: &M,
    options: &NormalizeOptions,
    dry_run: bool,
) -> bool {
    let mut succeeded = 0;
    for file in files {
        if !file.exists() {
            error!("File not found: {}", file.display());
            continue;
        }

        if dry_run {
            match Route::read(file) {
                Ok(route) => {
                    info!(
                        "{}: {} points",
                        file.file_name().unwrap_or_default().to_string_lossy(),
                        route.points.len()
                    );
                    succeeded += 1;
                }
                Err(e) => error!("{e}"),
            }
            continue;
        }

        match normalize::process_file(file, matcher, options) {
            Ok(_) => succeeded += 1,
            Err(e) => error!("  {e}"),
        }
    }

    info!("Processed {succeeded}/{} files successfully", files.len());
    succeeded == files.len()
}

fn validate_files(
    files: Vec<PathBuf>,
    all: bool,
    routes_dir: &Path,
    strict: bool,
) -> anyhow::Result<bool> {
    let files = route_files(files, all, routes_dir)?;

    let mut errors = 0;
    let mut warnings = 0;
    for file in &files {
        let issues = validate::validate_file(file, &Bounds::DAVAO);
        for issue in &issues {
            println!("{}: {issue}", file.display());
            match issue.severity {
                Severity::Error => errors += 1,
                Severity::Warning => warnings += 1,
            }
        }
    }

    info!(
        "Checked {} files: {errors} errors, {warnings} warnings",
        files.len()
    );
    Ok(errors == 0 && (!strict || warnings == 0))
}

fn run(cli: Cli) -> anyhow::Result<bool> {
    match cli.command {
        Command::ToGeojson { route, output } => to_geojson(&route, output.as_deref())?,
        Command::FromGeojson { geojson, output } => from_geojson(&geojson, output.as_deref())?,
        Command::View {
            route,
            output,
            no_open,
        } => view(&route, output.as_deref(), no_open)?,
        Command::Normalize(args) => return normalize_files(args),
        Command::Validate {
            files,
            all,
            routes_dir,
            strict,
        } => return validate_files(files, all, &routes_dir, strict),
        Command::NewId { count } => {
            for _ in 0..count {
                println!("{}", RecordId::generate());
            }
        }
    }
    Ok(true)
}

fn main() -> ExitCode {
    _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
