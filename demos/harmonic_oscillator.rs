//! Leapfrog and DOP853 on a 3-D harmonic oscillator.
//!
//! Integrates one particle for many periods with both schemes and reports
//! how well each conserves the oscillator actions J_i = E_i/ω_i.
//!
//! Run with:
//!   cargo run --example harmonic_oscillator

use galorbit::{
    Dop853, HarmonicOscillatorPotential, Integrator, Leapfrog, PotentialFlow, TimeSpec,
    Tolerances, UnitSystem,
};
use ndarray::arr2;

fn max_relative_drift(j: &ndarray::Array2<f64>) -> f64 {
    let j0 = j.row(0);
    j.outer_iter()
        .flat_map(|row| {
            row.iter()
                .zip(j0.iter())
                .map(|(a, b)| ((a - b) / b).abs())
                .collect::<Vec<_>>()
        })
        .fold(0.0, f64::max)
}

fn main() -> Result<(), galorbit::Error> {
    let omega = vec![1.0, 0.7, 1.3];
    let potential = HarmonicOscillatorPotential::new(omega.clone(), UnitSystem::dimensionless())?;
    let w0 = arr2(&[[1.0, 0.0, 0.5, 0.0, 0.8, 0.2]]);
    let spec = TimeSpec::steps(0.05, 20_000);

    let mut leapfrog = Leapfrog::new(PotentialFlow::new(&potential));
    let orbit = leapfrog.run(w0.view(), &spec)?;
    let (j_lf, _) = potential.action_angle(orbit.positions(0), orbit.velocities(0))?;

    let mut dop853 = Dop853::new(PotentialFlow::new(&potential), Tolerances::new(1e-12, 1e-12));
    let orbit_rk = dop853.run(w0.view(), &spec)?;
    let (j_rk, _) = potential.action_angle(orbit_rk.positions(0), orbit_rk.velocities(0))?;

    let t_end = orbit.t()[orbit.ntimes() - 1];
    println!("Harmonic Oscillator (ω = {omega:?})");
    println!("  Duration:    {t_end:.1} ({:.0} periods of ω_x)", t_end * omega[0] / std::f64::consts::TAU);
    println!("  Samples:     {}", orbit.ntimes());
    println!();
    println!("  J(0)         = {:?}", j_lf.row(0).to_vec());
    println!();
    println!("  Leapfrog max |ΔJ/J|: {:.2e}", max_relative_drift(&j_lf));
    println!("  DOP853   max |ΔJ/J|: {:.2e}", max_relative_drift(&j_rk));
    println!();
    println!("  DOP853 accepted steps: {}", dop853.stats.accepted_steps);
    println!("  DOP853 rejected steps: {}", dop853.stats.rejected_steps);
    println!("  DOP853 function evals: {}", dop853.stats.fn_evals);
    Ok(())
}
