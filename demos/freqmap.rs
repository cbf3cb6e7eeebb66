//! Frequency map of a triaxial logarithmic halo.
//!
//! Starts particles at rest on an equipotential surface, integrates them
//! with leapfrog and solves each orbit for its fundamental frequencies in a
//! worker pool. Orbits the solver cannot handle (chaotic, resonant, or with
//! no angular momentum) show up as NaN rows. The map is cached and printed
//! as frequency ratios.
//!
//! Run with:
//!   cargo run --release --example freqmap -- -n 20 --threads 8

use std::f64::consts::TAU;
use std::path::PathBuf;

use clap::Parser;
use galorbit::{
    integrate_and_solve, ActionSolverConfig, Cache, FrequencyMap, LogarithmicPotential, Pool,
    TimeSpec, UnitSystem,
};
use ndarray::Array2;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "freqmap")]
#[command(about = "Frequency map of orbits started on an equipotential surface")]
struct Args {
    /// Grid points along each angular axis (n² orbits)
    #[arg(short, default_value = "10")]
    n: usize,

    /// Worker threads; 0 uses every core
    #[arg(long, default_value = "0")]
    threads: usize,

    /// Leapfrog step
    #[arg(long, default_value = "0.1")]
    dt: f64,

    /// Number of leapfrog steps
    #[arg(long, default_value = "20000")]
    nsteps: usize,

    /// Keep every `thin`-th sample for the solve
    #[arg(long, default_value = "4")]
    thin: usize,

    /// Largest trial-vector norm
    #[arg(long, default_value = "6")]
    nmax: u32,

    /// Directory for the cached map
    #[arg(long, default_value = "cache")]
    cache_dir: PathBuf,

    /// Recompute even when a cached map exists
    #[arg(long)]
    overwrite: bool,

    /// More log output (repeatable)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

const V_C: f64 = 1.0;
const R_H2: f64 = 0.1;
const Q: [f64; 3] = [1.0, 0.9, 0.7];

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

/// Particles at rest on the surface where the logarithm's argument is e
fn equipotential_grid(n: usize) -> Array2<f64> {
    let mut grid = Array2::zeros((n * n, 6));
    let step = |i: usize| if n > 1 { i as f64 / (n - 1) as f64 } else { 0.0 };
    for i in 0..n {
        let theta = (2.0 * step(i) - 1.0).acos();
        for j in 0..n {
            let phi = TAU * step(j);
            let (sp, cp) = phi.sin_cos();
            let (st, ct) = theta.sin_cos();
            let denom = (st * cp / Q[0]).powi(2) + (st * sp / Q[1]).powi(2) + (ct / Q[2]).powi(2);
            let r = ((std::f64::consts::E - R_H2) / denom).sqrt();
            let mut row = grid.row_mut(i * n + j);
            row[0] = r * cp * st;
            row[1] = r * sp * st;
            row[2] = r * ct;
        }
    }
    grid
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    let units = UnitSystem::galactic();
    let potential = LogarithmicPotential::new(V_C, R_H2.sqrt(), Q[0], Q[1], Q[2], 0.0, units)?;
    let grid = equipotential_grid(args.n);
    let spec = TimeSpec::steps(args.dt, args.nsteps);
    let config = ActionSolverConfig::new(args.nmax);
    let pool = Pool::Threads(args.threads);

    let name = format!("freqmap_n{}_nmax{}.bin", args.n, args.nmax);
    let cache = Cache::in_dir(&args.cache_dir, &name, args.overwrite);
    let map: FrequencyMap = cache.load_or_compute(|| {
        info!(orbits = grid.nrows(), "solving frequency map");
        integrate_and_solve(&potential, grid.view(), &spec, args.thin, &config, pool)
    })?;

    println!("# index  Ω_φ/Ω_r  Ω_θ/Ω_r");
    for (i, row) in map.freqs.outer_iter().enumerate() {
        println!("{i:6} {:9.5} {:9.5}", row[1] / row[0], row[2] / row[0]);
    }
    println!(
        "# {} of {} orbits solved, map cached at {}",
        map.len() - map.failures.len(),
        map.len(),
        cache.path().display()
    );
    Ok(())
}
