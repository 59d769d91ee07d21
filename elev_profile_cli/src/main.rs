use std::fs::{self, File};
use std::io::{self, Write};
use std::panic;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueHint};
use elev_profile::{
    apply_to_track, digitize, open_image, CalibrationTable, DigitizerParams, Profile,
    ProfileDocument, Track, TrimParams, DEFAULT_SCALE_TOLERANCE_KM, DEFAULT_TARGET_POINTS,
};
use plotters::prelude::*;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Route elevation profile digitizer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Digitize elevation chart images into calibrated profile JSON
    Digitize(DigitizeArgs),
    /// Write profile elevations onto a GPX or GeoJSON track
    Apply(ApplyArgs),
    /// Print elevation range, peak and per-kilometre elevations of profiles
    Summary(SummaryArgs),
}

#[derive(Parser, Debug)]
struct DigitizeArgs {
    /// Route numbers (comma or space separated) or `all`
    #[arg(required = true)]
    routes: Vec<String>,

    /// Directory holding `perfil{N}d.png` chart images
    #[arg(long, default_value = ".", value_hint = ValueHint::DirPath)]
    images_dir: PathBuf,

    /// Explicit chart image (single route only)
    #[arg(long, value_hint = ValueHint::FilePath)]
    image: Option<PathBuf>,

    /// Directory for `route{N}_profile.json` outputs
    #[arg(short, long, default_value = ".", value_hint = ValueHint::DirPath)]
    out_dir: PathBuf,

    /// Calibration JSON overriding the built-in route table
    #[arg(long, value_hint = ValueHint::FilePath)]
    calibration: Option<PathBuf>,

    /// Target point count after resampling
    #[arg(long, default_value_t = DEFAULT_TARGET_POINTS)]
    target_points: usize,

    /// Keep every trimmed column instead of resampling
    #[arg(long, action = ArgAction::SetTrue)]
    no_resample: bool,

    /// Samples that must settle around a trim boundary
    #[arg(long, default_value_t = 5)]
    trim_window: usize,

    /// Largest row jump (pixels, exclusive) inside a settled run
    #[arg(long, default_value_t = 50)]
    trim_tolerance: u32,

    /// Also write `route{N}_profile.csv`
    #[arg(long, action = ArgAction::SetTrue)]
    csv: bool,

    /// Also render `route{N}_profile.png`
    #[arg(long, action = ArgAction::SetTrue)]
    png: bool,

    /// Also render `route{N}_profile.svg`
    #[arg(long, action = ArgAction::SetTrue)]
    svg: bool,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct ApplyArgs {
    /// Profile JSON produced by `digitize`
    #[arg(long, value_hint = ValueHint::FilePath)]
    profile: PathBuf,

    /// GPX or GeoJSON track to update
    #[arg(value_hint = ValueHint::FilePath)]
    track: PathBuf,

    /// Output path (same format as the input track)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Overwrite the input track
    #[arg(long, action = ArgAction::SetTrue, conflicts_with = "output")]
    in_place: bool,

    /// Rescale the profile when its length differs from the track by more than this (km)
    #[arg(long, default_value_t = DEFAULT_SCALE_TOLERANCE_KM)]
    scale_tolerance: f64,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

#[derive(Parser, Debug)]
struct SummaryArgs {
    /// Profile JSON files
    #[arg(required = true, value_hint = ValueHint::FilePath)]
    profiles: Vec<PathBuf>,

    /// Verbose logging
    #[arg(long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = match &cli.command {
        Command::Digitize(args) => args.verbose,
        Command::Apply(args) => args.verbose,
        Command::Summary(args) => args.verbose,
    };
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Digitize(args) => handle_digitize(args),
        Command::Apply(args) => handle_apply(args),
        Command::Summary(args) => handle_summary(args),
    }
}

#[derive(Debug)]
struct RouteOutput {
    route: u32,
    json_path: PathBuf,
    points: usize,
}

fn handle_digitize(args: DigitizeArgs) -> Result<()> {
    let mut table = CalibrationTable::builtin();
    if let Some(path) = args.calibration.as_ref() {
        let overrides = CalibrationTable::from_json_file(path)
            .with_context(|| format!("failed to load calibration {}", path.display()))?;
        info!(
            "Loaded {} calibration records from {}",
            overrides.len(),
            path.display()
        );
        table.merge(overrides);
    }

    let routes = parse_route_list(&args.routes, &table)?;
    if routes.is_empty() {
        return Err(anyhow!("no routes selected"));
    }
    if args.image.is_some() && routes.len() != 1 {
        return Err(anyhow!("--image can only be used with a single route"));
    }

    let params = DigitizerParams {
        trim: TrimParams {
            window: args.trim_window,
            tolerance_px: args.trim_tolerance,
        },
        resample: !args.no_resample,
        target_points: args.target_points.max(1),
        ..DigitizerParams::default()
    };

    fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("failed to create {}", args.out_dir.display()))?;

    let t_all = Instant::now();
    let results: Vec<(u32, Result<RouteOutput>)> = routes
        .par_iter()
        .map(|&route| (route, process_route(route, &args, &table, &params)))
        .collect();

    let mut ok = 0usize;
    for (route, result) in &results {
        match result {
            Ok(out) => {
                ok += 1;
                debug!(
                    route = out.route,
                    points = out.points,
                    path = %out.json_path.display(),
                    "route done"
                );
            }
            Err(err) => error!("Route {} failed: {:#}", route, err),
        }
    }
    info!(
        "Digitized {}/{} routes in {:.1} ms",
        ok,
        results.len(),
        t_all.elapsed().as_secs_f64() * 1000.0
    );

    if ok == 0 {
        bail!("every requested route failed");
    }
    Ok(())
}

fn process_route(
    route: u32,
    args: &DigitizeArgs,
    table: &CalibrationTable,
    params: &DigitizerParams,
) -> Result<RouteOutput> {
    let calibration = table.get(route)?;
    let image_path = args
        .image
        .clone()
        .unwrap_or_else(|| args.images_dir.join(chart_file_name(route)));

    let img = open_image(&image_path)?;
    let digitized = digitize(&img, calibration, params)
        .with_context(|| format!("failed to digitize {}", image_path.display()))?;
    info!(
        "Route {} ({}): image {}x{}, columns {}..={} of {}, {:.2} km, {}-{} m",
        route,
        calibration.name,
        digitized.width,
        digitized.height,
        digitized.bounds.start,
        digitized.bounds.end,
        digitized.raw_samples,
        calibration.distance_km,
        calibration.min_elev,
        calibration.max_elev
    );

    let profile = digitized.output_profile(params);
    if profile.len() != digitized.profile.len() {
        debug!(
            "Route {} resampled {} -> {} points",
            route,
            digitized.profile.len(),
            profile.len()
        );
    }
    if let Some(summary) = profile.summary(calibration.distance_km) {
        info!(
            "Route {}: {} points, {:.1}-{:.1} m, peak {:.1} m at {:.2} km",
            route,
            summary.points,
            summary.min_elevation_m,
            summary.max_elevation_m,
            summary.peak.elevation_m,
            summary.peak.distance_km
        );
    }

    let stem = format!("route{}_profile", route);
    let json_path = args.out_dir.join(format!("{}.json", stem));
    let doc = ProfileDocument::new(calibration, profile);
    doc.save(&json_path)
        .with_context(|| format!("failed to write {}", json_path.display()))?;
    info!("Wrote profile: {}", json_path.display());

    if args.csv {
        let csv_path = args.out_dir.join(format!("{}.csv", stem));
        write_profile_csv(&doc.points, &csv_path)?;
        info!("Wrote profile CSV: {}", csv_path.display());
    }

    let charts = [
        (args.png, "png", ChartKind::Png),
        (args.svg, "svg", ChartKind::Svg),
    ];
    for (enabled, ext, kind) in charts {
        if !enabled {
            continue;
        }
        let path = args.out_dir.join(format!("{}.{}", stem, ext));
        if let Err(err) = render_chart_guard(&doc, &path, kind) {
            warn!("Skipping chart render ({}): {}", path.display(), err);
        } else {
            info!("Wrote chart: {}", path.display());
        }
    }

    Ok(RouteOutput {
        route,
        json_path,
        points: doc.points.len(),
    })
}

fn chart_file_name(route: u32) -> String {
    format!("perfil{}d.png", route)
}

fn parse_route_list(tokens: &[String], table: &CalibrationTable) -> Result<Vec<u32>> {
    let mut out = Vec::new();
    for token in tokens.iter().flat_map(|t| t.split(',')) {
        let trimmed = token.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.eq_ignore_ascii_case("all") {
            out.extend(table.routes());
            continue;
        }
        let route: u32 = trimmed
            .parse()
            .with_context(|| format!("invalid route number: {}", trimmed))?;
        if route == 0 {
            return Err(anyhow!("route numbers start at 1"));
        }
        out.push(route);
    }
    out.sort_unstable();
    out.dedup();
    Ok(out)
}

fn write_profile_csv(profile: &Profile, path: &Path) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    write_profile_rows(profile, &mut writer)
}

fn write_profile_rows<W: Write>(profile: &Profile, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record(["distance_km", "elevation_m"])?;
    for point in &profile.points {
        writer.write_record([
            format!("{:.3}", point.distance_km),
            format!("{:.1}", point.elevation_m),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn handle_apply(args: ApplyArgs) -> Result<()> {
    let output = match (&args.output, args.in_place) {
        (Some(path), _) => path.clone(),
        (None, true) => args.track.clone(),
        (None, false) => return Err(anyhow!("pass --output or --in-place")),
    };

    let doc = ProfileDocument::load(&args.profile)
        .with_context(|| format!("failed to read profile {}", args.profile.display()))?;
    let mut track = Track::read(&args.track)
        .with_context(|| format!("failed to read track {}", args.track.display()))?;

    let old_start = track.points.first().and_then(|p| p.elevation);
    let old_end = track.points.last().and_then(|p| p.elevation);

    let params = DigitizerParams {
        scale_tolerance_km: args.scale_tolerance,
        ..DigitizerParams::default()
    };
    let report = apply_to_track(&mut track, &doc.points, &params)
        .with_context(|| format!("failed to apply route {} profile", doc.route))?;
    if report.scaled {
        info!(
            "Scaled profile from {:.2} km to {:.2} km",
            report.profile_km, report.track_km
        );
    }
    info!(
        "Route {}: {} points over {:.2} km, {:.1}-{:.1} m",
        doc.route, report.points, report.track_km, report.min_elevation_m, report.max_elevation_m
    );
    info!(
        "Start: old={} new={}; end: old={} new={}",
        fmt_elevation(old_start),
        fmt_elevation(track.points.first().and_then(|p| p.elevation)),
        fmt_elevation(old_end),
        fmt_elevation(track.points.last().and_then(|p| p.elevation)),
    );

    track
        .write(&output)
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("Wrote track: {}", output.display());
    Ok(())
}

fn fmt_elevation(value: Option<f64>) -> String {
    value.map_or("n/a".into(), |v| format!("{:.1}", v))
}

fn handle_summary(args: SummaryArgs) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for path in &args.profiles {
        let doc = ProfileDocument::load(path)
            .with_context(|| format!("failed to read profile {}", path.display()))?;
        out.write_all(format_summary(&doc).as_bytes())?;
    }
    Ok(())
}

fn format_summary(doc: &ProfileDocument) -> String {
    let mut report = format!("ROUTE {}: {}\n", doc.route, doc.name);
    let Some(summary) = doc.points.summary(doc.distance_km) else {
        report.push_str("  no points\n\n");
        return report;
    };
    report.push_str(&format!("  points: {}\n", summary.points));
    report.push_str(&format!(
        "  elevation: {:.1}-{:.1} m\n",
        summary.min_elevation_m, summary.max_elevation_m
    ));
    report.push_str(&format!(
        "  peak: {:.2} km at {:.1} m\n",
        summary.peak.distance_km, summary.peak.elevation_m
    ));
    report.push_str("  key elevations:\n");
    for key in &summary.key_elevations {
        report.push_str(&format!(
            "    {:.1} km: {:.1} m\n",
            key.point.distance_km, key.point.elevation_m
        ));
    }
    report.push('\n');
    report
}

#[derive(Clone, Copy, Debug)]
enum ChartKind {
    Png,
    Svg,
}

fn render_chart_guard(doc: &ProfileDocument, path: &Path, kind: ChartKind) -> Result<(), String> {
    let render = || render_profile_chart(doc, path, kind).map_err(|e| format!("plotting error: {}", e));
    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_profile_chart(doc: &ProfileDocument, path: &Path, kind: ChartKind) -> Result<()> {
    if doc.points.is_empty() {
        return Ok(());
    }
    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, (1200, 400)).into_drawing_area();
            draw_profile(root, doc)
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, (1200, 400)).into_drawing_area();
            draw_profile(root, doc)
        }
    }
}

// No text is drawn, so rendering does not depend on system fonts.
fn draw_profile<DB>(root: DrawingArea<DB, plotters::coord::Shift>, doc: &ProfileDocument) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    root.fill(&WHITE)?;
    let x_max = doc
        .points
        .total_distance_km()
        .unwrap_or(doc.distance_km)
        .max(doc.distance_km)
        .max(1e-3);
    let y_min = doc.min_elev;
    let y_max = if doc.max_elev > doc.min_elev {
        doc.max_elev
    } else {
        doc.min_elev + 1.0
    };

    let mut chart = ChartBuilder::on(&root)
        .margin(20)
        .build_cartesian_2d(0.0..x_max, y_min..y_max)?;

    for km in (1..).map(|k| k as f64).take_while(|&k| k < x_max) {
        chart.draw_series(LineSeries::new(
            [(km, y_min), (km, y_max)],
            RGBColor(220, 220, 220),
        ))?;
    }

    let series: Vec<(f64, f64)> = doc
        .points
        .points
        .iter()
        .map(|p| (p.distance_km, p.elevation_m))
        .collect();
    chart.draw_series(AreaSeries::new(
        series.iter().copied(),
        y_min,
        RGBColor(139, 232, 125).mix(0.6),
    ))?;
    chart.draw_series(LineSeries::new(
        series.iter().copied(),
        ShapeStyle {
            color: RGBColor(50, 50, 50).to_rgba(),
            filled: false,
            stroke_width: 2,
        },
    ))?;

    root.present()?;
    Ok(())
}
