use std::{fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::{info, LevelFilter};
use marker_graph_pipeline::marker_graph::{
    run_pipeline, MarkerGraphConfig, MarkerGraphExport, MarkerGraphInput, MarkerGraphProblem,
};
use marker_graph_pipeline::session::PoseGraphSession;
use marker_graph_pipeline::{list_image_ids, DetectionTable, ObjectPoseTable, ObserverContext};
use serde::de::DeserializeOwned;

/// Marker pose-graph optimization over pre-computed detections.
#[derive(Debug, Parser)]
#[command(author, version, about = "Consistent object poses from fiducial-marker photographs")]
struct Args {
    /// JSON detections: {"<image>": [{"marker": n, "T_CM": 4x4}, ..]}.
    #[arg(long)]
    detections: PathBuf,

    /// JSON object poses: {"<image>": {"T_CO": 4x4 | null}}.
    #[arg(long = "object-poses")]
    object_poses: PathBuf,

    /// Image directory; its sorted file names define the images to process.
    /// Defaults to every image named in either JSON file.
    #[arg(long)]
    images: Option<PathBuf>,

    /// JSON MarkerGraphConfig. Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON ObserverContext (intrinsics, dictionary, marker size).
    #[arg(long)]
    context: Option<PathBuf>,

    /// Write the result here instead of stdout.
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "quiet")]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    fn log_level(&self) -> LevelFilter {
        match (self.quiet, self.verbose) {
            (true, _) => LevelFilter::Error,
            (false, 0) => LevelFilter::Info,
            (false, 1) => LevelFilter::Debug,
            (false, _) => LevelFilter::Trace,
        }
    }
}

fn load_json_file<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let data =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
}

fn load_input(args: &Args) -> Result<MarkerGraphInput> {
    let detections = DetectionTable::from_json_file(&args.detections)?;
    let object_poses = ObjectPoseTable::from_json_file(&args.object_poses)?;

    let mut input = match &args.images {
        Some(dir) => MarkerGraphInput::new(list_image_ids(dir)?, detections, object_poses),
        None => MarkerGraphInput::from_tables(detections, object_poses),
    };
    if let Some(path) = &args.context {
        input.context = load_json_file::<ObserverContext>(path)?;
    }
    Ok(input)
}

fn run_from_files(args: &Args) -> Result<MarkerGraphExport> {
    let input = load_input(args)?;
    let config = match &args.config {
        Some(path) => load_json_file::<MarkerGraphConfig>(path)?,
        None => MarkerGraphConfig::default(),
    };
    info!("processing {} images", input.images.len());

    let mut session = PoseGraphSession::<MarkerGraphProblem>::with_input(input)?;
    run_pipeline(&mut session, Some(config))?;
    session.export()
}

fn main() {
    if let Err(err) = try_main() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let args = Args::parse();
    env_logger::Builder::new()
        .filter_level(args.log_level())
        .parse_default_env()
        .init();

    let export = run_from_files(&args)?;
    let json = serde_json::to_string_pretty(&export)?;
    match &args.output {
        Some(path) => fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
