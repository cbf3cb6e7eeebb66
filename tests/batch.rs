//! Batch solving: index alignment, NaN sentinels and pool independence.

use galorbit::{
    find_actions, find_actions_batch, find_actions_series, integrate_and_solve,
    ActionSolverConfig, Error, Integrator, Leapfrog, LogarithmicPotential, Pool, PotentialFlow,
    TimeSpec, UnitSystem,
};
use ndarray::arr2;

fn halo() -> LogarithmicPotential {
    LogarithmicPotential::new(0.15, 0.0, 1.0, 1.0, 0.85, 0.0, UnitSystem::galactic()).unwrap()
}

#[test]
fn degenerate_orbit_in_grid_becomes_nan() {
    let potential = halo();
    let w0 = arr2(&[
        [8.0, 0.0, 0.0, 0.075, 0.15, 0.05],
        [10.0, 0.0, 0.0, 0.05, 0.12, 0.08],
        // zero angular momentum
        [6.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [7.0, 1.0, 0.5, 0.03, 0.16, 0.02],
    ]);
    let config = ActionSolverConfig::new(3);
    let spec = TimeSpec::steps(1.0, 30_000);
    let map =
        integrate_and_solve(&potential, w0.view(), &spec, 15, &config, Pool::Threads(3)).unwrap();

    assert_eq!(map.len(), 4);
    assert_eq!(map.failures.len(), 1);
    assert_eq!(map.failures[0].0, 2);
    for i in [0, 1, 3] {
        assert!(map.succeeded(i), "orbit {} failed", i);
        // L_z = x v_y - y v_x
        let lz = w0[[i, 0]] * w0[[i, 4]] - w0[[i, 1]] * w0[[i, 3]];
        assert!((map.actions[[i, 1]] - lz).abs() < 1e-3 * lz.abs());
    }
    assert!(map.actions.row(2).iter().all(|v| v.is_nan()));
    assert!(map.angles.row(2).iter().all(|v| v.is_nan()));
    assert!(map.freqs.row(2).iter().all(|v| v.is_nan()));
}

#[test]
fn batch_matches_single_orbit_solves() {
    let potential = halo();
    let w0 = arr2(&[
        [8.0, 0.0, 0.0, 0.075, 0.15, 0.05],
        [10.0, 0.0, 0.0, 0.05, 0.12, 0.08],
    ]);
    let mut integrator = Leapfrog::new(PotentialFlow::new(&potential));
    let orbit = integrator
        .run(w0.view(), &TimeSpec::steps(1.0, 30_000))
        .unwrap()
        .thin(15);
    let config = ActionSolverConfig::new(3);

    let serial = find_actions_batch(&orbit, UnitSystem::galactic(), &config, Pool::Serial).unwrap();
    let threaded =
        find_actions_batch(&orbit, UnitSystem::galactic(), &config, Pool::Threads(2)).unwrap();
    assert_eq!(serial, threaded);

    for i in 0..2 {
        let single =
            find_actions(orbit.t(), orbit.particle(i), UnitSystem::galactic(), &config).unwrap();
        for k in 0..3 {
            assert_eq!(serial.actions[[i, k]], single.actions[k]);
            assert_eq!(serial.freqs[[i, k]], single.freqs[k]);
        }
    }
}

#[test]
fn invalid_solver_config_fails_whole_batch() {
    let potential = halo();
    let w0 = arr2(&[[8.0, 0.0, 0.0, 0.075, 0.15, 0.05]]);
    let config = ActionSolverConfig {
        lattice_step: [0, 1, 1],
        ..ActionSolverConfig::default()
    };
    let err = integrate_and_solve(
        &potential,
        w0.view(),
        &TimeSpec::steps(1.0, 100),
        1,
        &config,
        Pool::Serial,
    )
    .unwrap_err();
    assert!(matches!(err, Error::Configuration(_)));
}

#[test]
fn series_keep_their_own_time_arrays() {
    let potential = halo();
    let w0 = arr2(&[
        [8.0, 0.0, 0.0, 0.075, 0.15, 0.05],
        [10.0, 0.0, 0.0, 0.05, 0.12, 0.08],
    ]);
    let mut integrator = Leapfrog::new(PotentialFlow::new(&potential));
    let orbit = integrator
        .run(w0.view(), &TimeSpec::steps(1.0, 30_000))
        .unwrap()
        .thin(15);
    let config = ActionSolverConfig::new(3);

    // the second orbit is cut short; the third has mismatched lengths
    let short = orbit.window(0..1501);
    let series = vec![
        (orbit.t(), orbit.particle(0)),
        (short.t(), short.particle(1)),
        (orbit.t(), short.particle(1)),
    ];
    let map = find_actions_series(&series, UnitSystem::galactic(), &config, Pool::Threads(2))
        .unwrap();

    assert_eq!(map.len(), 3);
    let full = find_actions(orbit.t(), orbit.particle(0), UnitSystem::galactic(), &config).unwrap();
    assert_eq!(map.solution(0), Some(&full));
    let cut = find_actions(short.t(), short.particle(1), UnitSystem::galactic(), &config).unwrap();
    assert_eq!(map.solution(1), Some(&cut));
    assert_eq!(map.failures.len(), 1);
    assert_eq!(map.failures[0].0, 2);
    assert!(map.freqs.row(2).iter().all(|v| v.is_nan()));
}
