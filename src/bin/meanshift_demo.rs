use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::process;

use clap::Parser;
use kdeshift::{load_config, Backend, ClusterResult, MeanShift, MeanShiftConfig, Point2};

/// Cluster the 2-D points in a CSV file with mean shift.
#[derive(Parser, Debug)]
#[command(name = "meanshift_demo", version)]
struct Args {
    /// CSV file with one `x,y` pair per line (extra columns are ignored).
    input: PathBuf,

    /// JSON engine configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Kernel bandwidth; overrides the configuration.
    #[arg(long)]
    bandwidth: Option<f32>,

    /// Rasterize on the GPU.
    #[arg(long)]
    gpu: bool,

    /// The first line of the CSV is a header.
    #[arg(long)]
    header: bool,

    /// Write the full result (clusters + run statistics) as JSON.
    #[arg(long)]
    json_out: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path).map_err(|e| e.to_string())?,
        None => MeanShiftConfig::default(),
    };
    if args.gpu {
        config.context.backend = Backend::Gpu;
    }

    let points = read_points(&args.input, args.header)?;

    let mut engine = MeanShift::new(config).map_err(|e| e.to_string())?;
    if let Some(sigma) = args.bandwidth {
        engine.set_bandwidth(sigma).map_err(|e| e.to_string())?;
    }
    engine.set_points(&points).map_err(|e| e.to_string())?;
    engine.initialize().map_err(|e| e.to_string())?;
    let result = engine.cluster().map_err(|e| e.to_string())?;

    print_summary(&result, engine.bandwidth());

    if let Some(path) = &args.json_out {
        write_json(path, &result)?;
        println!("\nJSON report written to {}", path.display());
    }
    Ok(())
}

fn read_points(path: &Path, header: bool) -> Result<Vec<Point2>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(header)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;

    let mut points = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|e| format!("{}: {e}", path.display()))?;
        let field = |i: usize| -> Result<f32, String> {
            record
                .get(i)
                .ok_or_else(|| format!("{}: record {} has fewer than 2 columns", path.display(), line + 1))?
                .parse::<f32>()
                .map_err(|e| format!("{}: record {}: {e}", path.display(), line + 1))
        };
        points.push(Point2::from((field(0)?, field(1)?)));
    }
    Ok(points)
}

fn print_summary(result: &ClusterResult, sigma: f32) {
    let stats = &result.stats;
    println!("Mean-shift summary");
    println!("  points: {}", stats.points);
    println!("  sigma: {sigma}");
    println!("  backend: {:?}", stats.backend);
    println!("  grid: {}x{} (cell {:.4})", stats.grid_width, stats.grid_height, stats.cell_size);
    println!("  passes: {} ({} force-stopped)", stats.iterations, stats.force_stopped);
    println!("  merge tolerance: {:.4}", stats.merge_tolerance);
    println!("  clusters: {}", result.len());
    for (id, c) in result.clusters.iter().enumerate() {
        println!(
            "    #{id:<3} mode=({:.4}, {:.4}) size={}",
            c.mode.x,
            c.mode.y,
            c.len()
        );
    }
    println!("  timing: total {:.2} ms", stats.timing.total_ms);
    for s in &stats.timing.stages {
        println!("    {:<10} {:.2} ms", s.label, s.elapsed_ms);
    }
}

fn write_json(path: &Path, result: &ClusterResult) -> Result<(), String> {
    let file = File::create(path).map_err(|e| format!("Failed to create {}: {e}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), result)
        .map_err(|e| format!("Failed to write JSON to {}: {e}", path.display()))
}
