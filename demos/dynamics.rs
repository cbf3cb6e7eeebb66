//! Actions of a loop orbit in a flattened logarithmic halo.
//!
//! Integrates the orbit, solves for the actions, angles and frequencies
//! through a fitted toy Isochrone, integrates the toy orbit from the same
//! initial conditions for comparison, and cross-validates over time
//! windows. Orbit and action bundles are cached in `--cache-dir` and reused
//! on the next run unless `--overwrite` is given.
//!
//! Run with:
//!   cargo run --release --example dynamics -- --cache-dir cache
//!   cargo run --release --example dynamics -- --config pipeline.json -v

use std::path::PathBuf;

use clap::Parser;
use galorbit::actions::CrossValidation;
use galorbit::{
    fit_isochrone, ActionSolverConfig, IntegratorConfig, PipelineConfig, Pool, PotentialConfig,
    TimeOptions, UnitSystem,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dynamics")]
#[command(about = "Integrate an orbit and recover its actions, angles and frequencies")]
struct Args {
    /// Pipeline configuration (JSON); the built-in loop orbit when absent
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory for cached orbit and action bundles
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Recompute even when cached bundles exist
    #[arg(long)]
    overwrite: bool,

    /// Number of leapfrog steps of the built-in orbit
    #[arg(long, default_value = "500000")]
    nsteps: usize,

    /// Largest trial-vector norm of the built-in configuration
    #[arg(long, default_value = "6")]
    nmax: u32,

    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn builtin_config(nsteps: usize, n_max: u32) -> PipelineConfig {
    PipelineConfig {
        units: UnitSystem::galactic(),
        potential: PotentialConfig::Logarithmic {
            v_c: 0.15,
            r_h: 0.0,
            q1: 1.0,
            q2: 1.0,
            q3: 0.85,
            phi: 0.0,
        },
        integrator: IntegratorConfig::leapfrog(TimeOptions {
            dt: Some(1.0),
            nsteps: Some(nsteps),
            ..TimeOptions::default()
        }),
        initial_conditions: vec![[8.0, 0.0, 0.0, 0.075, 0.15, 0.05]],
        thin: 50,
        solver: ActionSolverConfig::new(n_max),
        nbins: 5,
        pool: Pool::Serial,
        cache_dir: None,
    }
}

fn print_row(label: &str, values: &[f64]) {
    let cells: Vec<String> = values.iter().map(|v| format!("{v:>12.6e}")).collect();
    println!("  {label:<10} {}", cells.join(" "));
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => builtin_config(args.nsteps, args.nmax),
    };
    if args.cache_dir.is_some() {
        config.cache_dir = args.cache_dir.clone();
    }

    let output = config.run(args.overwrite)?;
    let orbit = &output.orbit;
    let units = config.units;

    for i in 0..orbit.norbits() {
        let w = orbit.particle(i);
        let radii: Vec<f64> = w
            .outer_iter()
            .map(|row| (row[0] * row[0] + row[1] * row[1] + row[2] * row[2]).sqrt())
            .collect();
        let r_min = radii.iter().copied().fold(f64::INFINITY, f64::min);
        let r_max = radii.iter().copied().fold(0.0, f64::max);

        println!("Orbit {i}");
        println!("  samples {}, r in [{r_min:.3}, {r_max:.3}]", orbit.ntimes());

        match output.freqmap.solution(i) {
            Some(solution) => {
                let toy = &solution.toy;
                println!("  toy isochrone: GM = {:.5}, b = {:.4}", toy.gm(), toy.b());
                // the toy orbit from the same starting point, for comparison
                if let Some(Some(toy_orbit)) = output.toy_orbits.get(i) {
                    let (j_toy, _) =
                        toy.action_angle(toy_orbit.positions(0), toy_orbit.velocities(0))?;
                    print_row("J toy(0)", &j_toy.row(0).to_vec());
                }
                print_row("J", &solution.actions);
                print_row("θ(0)", &solution.angles);
                print_row("Ω", &solution.freqs);
                println!("  {} generating-function modes", solution.nvecs.len());
            }
            None => {
                if let Some((_, message)) = output.freqmap.failures.iter().find(|(k, _)| *k == i) {
                    println!("  solve failed: {message}");
                }
                match fit_isochrone(w, units) {
                    Ok(fit) => println!("  toy fit spread σ_H = {:.3e}", fit.energy_spread),
                    Err(err) => println!("  toy fit failed: {err}"),
                }
            }
        }

        if let Some(cv) = output.cross_validation.get(i) {
            let dev = CrossValidation::relative_deviation(cv.actions.view());
            println!("  cross-validation over {} windows, ΔJ/J:", cv.actions.nrows());
            for row in dev.outer_iter() {
                print_row("", &row.to_vec());
            }
            for (bin, message) in &cv.failures {
                println!("  window {bin} failed: {message}");
            }
        }
    }
    info!("done");
    Ok(())
}
