use criterion::{black_box, criterion_group, criterion_main, Criterion};
use galorbit::{
    find_actions, ActionSolverConfig, Dop853, Integrator, IsochronePotential, Leapfrog,
    LogarithmicPotential, PotentialFlow, TimeSpec, Tolerances, UnitSystem,
};
use ndarray::arr2;

fn halo() -> LogarithmicPotential {
    LogarithmicPotential::new(0.15, 0.0, 1.0, 1.0, 0.85, 0.0, UnitSystem::galactic()).unwrap()
}

fn bench_leapfrog_10k_steps(c: &mut Criterion) {
    let potential = halo();
    let w0 = arr2(&[[8.0, 0.0, 0.0, 0.075, 0.15, 0.05]]);
    let spec = TimeSpec::steps(1.0, 10_000);

    c.bench_function("leapfrog_10k_steps", |b| {
        b.iter(|| {
            let mut integrator = Leapfrog::new(PotentialFlow::new(&potential));
            integrator.run(black_box(w0.view()), &spec).unwrap()
        })
    });
}

fn bench_dop853_1gyr(c: &mut Criterion) {
    let potential = halo();
    let w0 = arr2(&[[8.0, 0.0, 0.0, 0.075, 0.15, 0.05]]);
    let spec = TimeSpec::span(10.0, 0.0, 1000.0);

    c.bench_function("dop853_1gyr", |b| {
        b.iter(|| {
            let mut solver =
                Dop853::new(PotentialFlow::new(&potential), Tolerances::new(1e-10, 1e-10));
            solver.run(black_box(w0.view()), &spec).unwrap()
        })
    });
}

fn bench_isochrone_action_angle(c: &mut Criterion) {
    let toy = IsochronePotential::from_gm(0.5, 3.7, UnitSystem::galactic()).unwrap();
    let x = [8.0, 0.5, 1.0];
    let v = [0.075, 0.15, 0.05];

    c.bench_function("isochrone_action_angle", |b| {
        b.iter(|| toy.action_angle_at(black_box(&x), black_box(&v)).unwrap())
    });
}

fn bench_find_actions(c: &mut Criterion) {
    let potential = halo();
    let w0 = arr2(&[[8.0, 0.0, 0.0, 0.075, 0.15, 0.05]]);
    let mut integrator = Leapfrog::new(PotentialFlow::new(&potential));
    let orbit = integrator
        .run(w0.view(), &TimeSpec::steps(1.0, 50_000))
        .unwrap()
        .thin(25);
    let config = ActionSolverConfig::new(4);

    let mut group = c.benchmark_group("solver");
    group.sample_size(10);
    group.bench_function("find_actions_nmax4", |b| {
        b.iter(|| {
            find_actions(
                orbit.t(),
                black_box(orbit.particle(0)),
                UnitSystem::galactic(),
                &config,
            )
            .unwrap()
        })
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_leapfrog_10k_steps,
    bench_dop853_1gyr,
    bench_isochrone_action_angle,
    bench_find_actions
);
criterion_main!(benches);
