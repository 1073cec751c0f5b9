//! phasemap CLI - rotate phase-space densities with precomputed transport maps.
//!
//! # Commands
//!
//! - `phasemap run` - Simulate a Gaussian bunch for the configured rotations
//! - `phasemap stencil` - Print the stencil of one destination cell
//! - `phasemap compare` - Compare the CPU and GPU backends on one step
//!
//! # Examples
//!
//! ```bash
//! # Two rotations on the GPU, keeping the density on the device
//! PHASEMAP__SIMULATION__ROTATIONS=2 phasemap run --backend wgpu --resident
//!
//! # Inspect the cubic stencil of cell (10, 20) for a 0.1 rad step
//! phasemap stencil --q 10 --p 20 --angle 0.1
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;
#[cfg(feature = "wgpu")]
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use phasemap::{
    BackendKind, CpuBackend, GridSize, PhaseSpace, Result, Simulation, TransportBackend,
    TransportConfig, TransportError, TransportMap,
};

/// Phase-space transport by precomputed interpolation stencils
#[derive(Parser)]
#[command(name = "phasemap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Configuration file (TOML); defaults plus PHASEMAP__* variables if omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate a Gaussian bunch for the configured number of rotations
    Run {
        /// Backend override (cpu, wgpu)
        #[arg(short, long)]
        backend: Option<String>,

        /// Keep the density on the GPU between output steps
        #[arg(long)]
        resident: bool,
    },

    /// Print the stencil of one destination cell
    Stencil {
        /// First-axis index of the destination cell
        #[arg(long)]
        q: u32,

        /// Second-axis index of the destination cell
        #[arg(long)]
        p: u32,

        /// Rotation angle in radians (default: one configured step)
        #[arg(short, long)]
        angle: Option<f64>,
    },

    /// Apply one step on CPU and GPU and report the largest difference
    Compare {
        /// Rotation angle in radians (default: one configured step)
        #[arg(short, long)]
        angle: Option<f64>,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    let result = load_config(cli.config.as_deref()).and_then(|config| match cli.command {
        Commands::Run { backend, resident } => run(config, backend.as_deref(), resident),
        Commands::Stencil { q, p, angle } => stencil(&config, q, p, angle),
        Commands::Compare { angle } => compare(&config, angle),
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<TransportConfig> {
    match path {
        Some(path) => TransportConfig::load(path),
        None => TransportConfig::from_env(),
    }
}

fn initial_bunch(grid: GridSize) -> PhaseSpace {
    // Elongated along p so the rotation shows in the extent.
    let sigma_q = grid.xsize() as f64 / 16.0;
    let sigma_p = grid.ysize() as f64 / 8.0;
    PhaseSpace::gaussian(grid, sigma_q, sigma_p)
}

fn report(step: u64, state: &PhaseSpace) {
    let (lo, hi) = state.extent();
    tracing::info!(
        "step {:>7}  integral {:.6}  min {:+.3e}  max {:.3e}",
        step,
        state.integral(),
        lo,
        hi
    );
}

fn run(mut config: TransportConfig, backend: Option<&str>, resident: bool) -> Result<()> {
    if let Some(name) = backend {
        config.backend = name.parse()?;
        config.validate()?;
    }
    check_resident(config.backend, resident)?;

    let map = config.transport_map()?.into_shared();
    let grid = map.grid();
    let steps = config.total_steps();
    let outstep = config.simulation.outstep;

    tracing::info!(
        "{}x{} grid, order {}, {} convention, {} steps on {}",
        grid.xsize(),
        grid.ysize(),
        map.order(),
        map.convention(),
        steps,
        config.backend
    );

    let initial = initial_bunch(grid);
    let start = std::time::Instant::now();

    let final_state = match config.backend {
        BackendKind::Cpu => {
            let backend =
                CpuBackend::new(map, config.interpolate_clamped).parallel(config.parallel);
            simulate(Box::new(backend), initial, steps, outstep)?
        }
        #[cfg(feature = "wgpu")]
        BackendKind::Wgpu => {
            let ctx = Arc::new(phasemap::WgpuContext::new_blocking()?);
            let backend = phasemap::WgpuBackend::new(ctx, map, config.interpolate_clamped)?;
            if resident {
                simulate_resident(backend, initial, steps, outstep)?
            } else {
                simulate(Box::new(backend), initial, steps, outstep)?
            }
        }
        #[cfg(not(feature = "wgpu"))]
        BackendKind::Wgpu => {
            return Err(TransportError::BackendUnavailable(
                "wgpu (not compiled in)".to_string(),
            ))
        }
    };

    let (lo, hi) = final_state.extent();
    println!(
        "{} {} steps in {:.2?}",
        "Done:".green().bold(),
        steps,
        start.elapsed()
    );
    println!(
        "  integral {:.6}, min {:+.3e}, max {:.3e}",
        final_state.integral(),
        lo,
        hi
    );
    Ok(())
}

/// Device residency only exists on the GPU backend.
fn check_resident(backend: BackendKind, resident: bool) -> Result<()> {
    if resident && backend != BackendKind::Wgpu {
        return Err(TransportError::config(format!(
            "--resident requires the wgpu backend, not {}",
            backend
        )));
    }
    Ok(())
}

fn simulate(
    backend: Box<dyn TransportBackend>,
    initial: PhaseSpace,
    steps: u64,
    outstep: u32,
) -> Result<PhaseSpace> {
    let mut sim = Simulation::new(backend, initial)?;
    sim.run(steps, outstep, report)?;
    Ok(sim.into_state())
}

#[cfg(feature = "wgpu")]
fn simulate_resident(
    mut backend: phasemap::WgpuBackend,
    initial: PhaseSpace,
    steps: u64,
    outstep: u32,
) -> Result<PhaseSpace> {
    let grid = initial.grid();
    backend.upload(initial.data())?;

    let mut done = 0u64;
    while done < steps {
        let chunk = (steps - done).min(outstep as u64);
        backend.step(chunk as u32)?;
        done += chunk;
        let state = PhaseSpace::from_vec(grid, backend.download()?)?;
        report(done, &state);
    }

    PhaseSpace::from_vec(grid, backend.download()?)
}

fn stencil(config: &TransportConfig, q: u32, p: u32, angle: Option<f64>) -> Result<()> {
    let grid = config.grid()?;
    let cell = grid
        .index(q as i64, p as i64)
        .ok_or(TransportError::CellOutOfRange { q, p })? as usize;
    let map = TransportMap::rotation(
        grid,
        config.order()?,
        config.convention,
        angle.unwrap_or_else(|| config.angle_per_step()),
    )?;

    println!(
        "{} cell ({}, {}) order {} angle {:.6} rad",
        "Stencil:".bright_cyan().bold(),
        q,
        p,
        map.order(),
        map.angle()
    );

    for (k, entry) in map.stencil(cell).iter().enumerate() {
        if entry.weight == 0.0 {
            println!("  {:>2}  {}", k, "-".dimmed());
            continue;
        }
        let (sq, sp) = grid.coords(entry.index as usize);
        println!(
            "  {:>2}  ({:>4}, {:>4})  {:+.9}",
            k, sq, sp, entry.weight
        );
    }
    println!("  sum {:.12}", map.weight_sum(cell));

    if let Some(taps) = map.clamp_taps().get(cell) {
        let taps: Vec<String> = taps
            .iter()
            .map(|&t| {
                if t == phasemap::NO_CLAMP {
                    "-".to_string()
                } else {
                    let (tq, tp) = grid.coords(t as usize);
                    format!("({}, {})", tq, tp)
                }
            })
            .collect();
        println!("  clamp {}", taps.join(" "));
    }

    Ok(())
}

#[cfg(feature = "wgpu")]
fn compare(config: &TransportConfig, angle: Option<f64>) -> Result<()> {
    let map = TransportMap::rotation(
        config.grid()?,
        config.order()?,
        config.convention,
        angle.unwrap_or_else(|| config.angle_per_step()),
    )?
    .into_shared();
    let source = initial_bunch(map.grid());

    let cpu = CpuBackend::new(map.clone(), config.interpolate_clamped).parallel(config.parallel);
    let ctx = Arc::new(phasemap::WgpuContext::new_blocking()?);
    let gpu = phasemap::WgpuBackend::new(ctx, map, config.interpolate_clamped)?;

    let mut expected = vec![0.0; source.data().len()];
    let mut actual = vec![0.0; source.data().len()];
    cpu.apply(source.data(), &mut expected)?;
    gpu.apply(source.data(), &mut actual)?;

    let scale = expected.iter().fold(0.0f32, |m, v| m.max(v.abs()));
    let max_diff = expected
        .iter()
        .zip(&actual)
        .fold(0.0f32, |m, (a, b)| m.max((a - b).abs()));
    let relative = if scale > 0.0 { max_diff / scale } else { max_diff };

    let verdict = if relative <= 1e-6 {
        "match".green().bold()
    } else {
        "differ".red().bold()
    };
    println!(
        "{} {} vs {}: max abs diff {:.3e}, relative {:.3e} ({})",
        "Compare:".bright_cyan().bold(),
        cpu.name(),
        gpu.name(),
        max_diff,
        relative,
        verdict
    );
    Ok(())
}

#[cfg(not(feature = "wgpu"))]
fn compare(_config: &TransportConfig, _angle: Option<f64>) -> Result<()> {
    Err(TransportError::BackendUnavailable(
        "wgpu (not compiled in)".to_string(),
    ))
}
