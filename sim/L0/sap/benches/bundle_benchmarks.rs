//! Benchmarks for constraint bundle assembly and evaluation.
//!
//! Run with: cargo bench -p sim-sap
//!
//! Add `--features parallel` to include the rayon projection path.

#![allow(missing_docs, clippy::unwrap_used)]

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use nalgebra::{DMatrix, DVector};

use sim_sap::{
    BundleConfig, CliqueJacobian, ConstraintJacobian, FrictionConeConstraint,
    FrictionConeParameters, SapConstraintBundle, SapContactProblem, approximate_delassus_diagonal,
};

/// A pile of `num_bodies` free bodies (6 dofs each) resting on each other and
/// on the ground, with `contacts_per_pair` contact points per touching pair.
fn body_pile(num_bodies: usize, contacts_per_pair: usize) -> SapContactProblem {
    let dynamics = (0..num_bodies)
        .map(|i| DMatrix::identity(6, 6) * (1.0 + (i % 5) as f64))
        .collect::<Vec<_>>();
    let mut problem =
        SapContactProblem::new(1e-3, dynamics, DVector::zeros(6 * num_bodies)).unwrap();

    let contact_jacobian = |k: usize, sign: f64| {
        let mut j = DMatrix::zeros(3, 6);
        j.view_mut((0, 0), (3, 3)).fill_with_identity();
        j[(0, 4)] = 0.1 * (k as f64 + 1.0);
        j[(1, 3)] = -0.1 * (k as f64 + 1.0);
        j * sign
    };
    let params = FrictionConeParameters::new(0.5, 1e5, 0.01);

    for body in 0..num_bodies {
        for k in 0..contacts_per_pair {
            let jacobian = if body == 0 {
                ConstraintJacobian::single(CliqueJacobian::new(0, contact_jacobian(k, 1.0)))
            } else {
                ConstraintJacobian::pair(
                    CliqueJacobian::new(body, contact_jacobian(k, 1.0)),
                    CliqueJacobian::new(body - 1, contact_jacobian(k, -1.0)),
                )
                .unwrap()
            };
            let contact = FrictionConeConstraint::new(jacobian, -1e-4, params).unwrap();
            problem.add_constraint(Box::new(contact)).unwrap();
        }
    }
    problem
}

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("bundle_assembly");

    for num_bodies in [10, 100, 500] {
        let problem = body_pile(num_bodies, 4);
        let w = approximate_delassus_diagonal(&problem).unwrap();
        group.throughput(Throughput::Elements(problem.num_constraints() as u64));

        group.bench_with_input(BenchmarkId::new("delassus", num_bodies), &problem, |b, p| {
            b.iter(|| approximate_delassus_diagonal(black_box(p)).unwrap());
        });
        group.bench_with_input(BenchmarkId::new("build", num_bodies), &problem, |b, p| {
            b.iter(|| SapConstraintBundle::new(black_box(p), black_box(&w)).unwrap());
        });
    }

    group.finish();
}

fn bench_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("bundle_projection");

    for num_bodies in [10, 100, 500] {
        let problem = body_pile(num_bodies, 4);
        let w = approximate_delassus_diagonal(&problem).unwrap();
        let n = problem.num_constraint_equations();
        let y = DVector::from_fn(n, |i, _| ((i as f64) * 0.7).sin());
        group.throughput(Throughput::Elements(problem.num_constraints() as u64));

        for (label, config) in [
            ("sequential", BundleConfig::default()),
            ("parallel", BundleConfig::default().with_parallel_projection(1)),
        ] {
            let bundle = SapConstraintBundle::with_config(&problem, &w, config).unwrap();
            let mut gamma = DVector::zeros(n);
            let mut g = vec![DMatrix::zeros(0, 0); bundle.num_constraints()];

            group.bench_function(BenchmarkId::new(format!("project_{label}"), num_bodies), |b| {
                b.iter(|| bundle.project_impulses(black_box(&y), &mut gamma, None).unwrap());
            });
            group.bench_function(BenchmarkId::new(format!("hessian_{label}"), num_bodies), |b| {
                b.iter(|| {
                    bundle
                        .project_impulses_and_calc_constraints_hessian(black_box(&y), &mut gamma, &mut g)
                        .unwrap();
                });
            });
        }
    }

    group.finish();
}

fn bench_jacobian_products(c: &mut Criterion) {
    let problem = body_pile(200, 4);
    let w = approximate_delassus_diagonal(&problem).unwrap();
    let bundle = SapConstraintBundle::new(&problem, &w).unwrap();
    let v = DVector::from_fn(problem.num_velocities(), |i, _| ((i as f64) * 0.3).cos());
    let gamma = DVector::from_element(bundle.num_constraint_equations(), 0.5);

    c.bench_function("constraint_velocities_200", |b| {
        b.iter(|| bundle.calc_constraint_velocities(black_box(&v)).unwrap());
    });
    c.bench_function("generalized_impulses_200", |b| {
        b.iter(|| bundle.calc_generalized_impulses(black_box(&gamma)).unwrap());
    });
}

criterion_group!(benches, bench_assembly, bench_projection, bench_jacobian_products);
criterion_main!(benches);
