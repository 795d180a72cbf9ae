//! Closed-loop MPC tracking simulation.
//!
//! Drives the tracker around the configured sine track and plots the
//! reference, the driven path and the last predicted horizon.
//!
//! Usage:
//!   cargo run --release --bin mpc_simulation -- --params params/mpc.toml
//!   cargo run --release --bin mpc_simulation -- --cycles 300 --output img/mpc.svg --log-level debug

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use mpc_controller::config::ControllerParams;
use mpc_controller::simulation::{History, Simulation, Track};
use mpc_controller::utils::{colors, logger_init, LevelFilter, PathStyle, PointStyle, Visualizer};
use mpc_controller::MpcResult;

#[derive(Parser)]
#[command(about = "Closed-loop simulation of the MPC trajectory controller")]
struct Args {
    /// Parameter file
    #[arg(long, default_value = "params/mpc.toml")]
    params: PathBuf,

    /// Override the number of control cycles
    #[arg(long)]
    cycles: Option<usize>,

    /// Plot destination (.svg or .png)
    #[arg(long, default_value = "img/mpc_simulation.svg")]
    output: String,

    /// Minimum log level: error, warn, info, debug, trace
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = logger_init(args.log_level, args.log_file.as_deref()) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> MpcResult<()> {
    let mut params = ControllerParams::load(&args.params)?;
    if let Some(cycles) = args.cycles {
        params.simulation.cycles = cycles;
    }
    info!("Loaded parameters from {:?}", args.params);

    let tracker = params.build_tracker()?;
    let track = Track::sine(&params.simulation.track)?;
    let mut sim = Simulation::new(params.simulation.clone(), track.clone(), tracker)?;
    let history = sim.run()?;

    plot(&track, &history, &args.output)?;
    info!("Plot written to {}", args.output);
    Ok(())
}

fn plot(track: &Track, history: &History, output: &str) -> MpcResult<()> {
    if let Some(dir) = std::path::Path::new(output).parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }

    let fallbacks: Vec<_> = history
        .cycles
        .iter()
        .filter(|c| c.fallback)
        .map(|c| c.state.position())
        .collect();

    let mut vis = Visualizer::new();
    vis.set_title(&format!(
        "MPC tracking, RMS cross-track {:.3} m",
        history.rms_cross_track()
    ))
    .plot_path(&track.to_path(), &PathStyle::new(colors::TRACK, "Track").with_line_width(1.0));

    let driven = history.driven_path();
    if let Some(start) = driven.first() {
        vis.plot_start(*start);
    }
    vis.plot_points(&driven, &PointStyle::new(colors::DRIVEN, "Driven").with_symbol('.'))
        .plot_points(&fallbacks, &PointStyle::new(colors::FALLBACK, "Fallback").with_symbol('x'));
    if let Some(predicted) = history.last_prediction() {
        vis.plot_points(predicted, &PointStyle::new(colors::PREDICTED, "Last prediction").with_size(0.8));
    }

    vis.save(output, 1200, 600)
}
