use geomint_core::{
    GeomintError, HamiltonianSystem, Integrator, Newton, StepMethod, StepRule, StormerVerlet,
    SymplecticEuler,
};
use proptest::prelude::*;

fn pendulum() -> HamiltonianSystem {
    HamiltonianSystem::scalar(|p, _q| p, |_p, q| q.sin()).unwrap()
}

fn pendulum_energy(p: &[f64], q: &[f64]) -> f64 {
    0.5 * p[0] * p[0] - q[0].cos()
}

fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    let step = (end - start) / (n - 1) as f64;
    (0..n).map(|i| start + step * i as f64).collect()
}

fn rules() -> Vec<Box<dyn StepRule>> {
    vec![
        Box::new(SymplecticEuler::<Newton>::default()),
        Box::new(StormerVerlet::<Newton>::default()),
    ]
}

#[test]
fn free_particle_symplectic_euler_step_is_closed_form() {
    let free = HamiltonianSystem::scalar(|p, _q| p, |_p, _q| 0.0).unwrap();
    let (p0, q0, h) = (-1.25, 3.5, 0.2);
    let traj = free.solve(&[p0], &[q0], &[0.0, h]).unwrap();
    assert_eq!(traj.p_row(1), &[p0]);
    assert_eq!(traj.q_row(1), &[q0 + h * p0]);
}

#[test]
fn stormer_verlet_returns_after_forward_and_backward_step() {
    let system = pendulum();
    let rule = StormerVerlet::<Newton>::default();
    for &(p0, q0) in &[(0.0, 2.0), (-1.7, 0.0), (1.1, -0.4)] {
        let (p1, q1) = rule.step(&system, &[p0], &[q0], 0.1).unwrap();
        let (p2, q2) = rule.step(&system, &p1, &q1, -0.1).unwrap();
        assert!((p2[0] - p0).abs() < 1e-9);
        assert!((q2[0] - q0).abs() < 1e-9);
    }
}

#[test]
fn symplectic_schemes_keep_pendulum_energy_bounded() {
    let system = pendulum();
    let t = linspace(0.0, 50.0, 501);

    let se = system
        .solve_with(&[0.0], &[2.0], &t, &SymplecticEuler::<Newton>::default())
        .unwrap();
    let sv = system
        .solve_with(&[0.0], &[2.0], &t, &StormerVerlet::<Newton>::default())
        .unwrap();
    let se_error = se.max_deviation(pendulum_energy);
    let sv_error = sv.max_deviation(pendulum_energy);

    // explicit Euler baseline on the same grid
    let (mut p, mut q) = (0.0_f64, 2.0_f64);
    let e0 = pendulum_energy(&[p], &[q]);
    let mut explicit_error = 0.0_f64;
    for w in t.windows(2) {
        let h = w[1] - w[0];
        (p, q) = (p - h * q.sin(), q + h * p);
        explicit_error = explicit_error.max((pendulum_energy(&[p], &[q]) - e0).abs());
    }

    assert!(se_error < 0.15, "symplectic Euler energy error {se_error}");
    assert!(sv_error < 0.02, "Störmer-Verlet energy error {sv_error}");
    assert!(sv_error < se_error);
    assert!(explicit_error > 0.5, "explicit Euler energy error {explicit_error}");
}

#[test]
fn energy_error_does_not_grow_secularly() {
    let system = pendulum();
    let t = linspace(0.0, 100.0, 1001);
    let traj = system
        .solve_with(&[0.5], &[0.0], &t, &StormerVerlet::<Newton>::default())
        .unwrap();
    let energy = traj.evaluate(pendulum_energy);
    let band = |values: &[f64]| {
        values
            .iter()
            .map(|e| (e - energy[0]).abs())
            .fold(0.0, f64::max)
    };
    let early = band(&energy[..500]);
    let late = band(&energy[500..]);
    assert!(late < 2.0 * early + 1e-12, "early {early}, late {late}");
}

#[test]
fn dimension_mismatch_is_invalid_configuration() {
    let system = HamiltonianSystem::new(
        |p, _q, out| out.copy_from_slice(p),
        |_p, q, out| out.copy_from_slice(q),
        2,
    )
    .unwrap();
    for rule in rules() {
        let err = system
            .solve_with(&[1.0], &[0.0, 0.0], &[0.0, 0.1, 0.2], rule.as_ref())
            .unwrap_err();
        assert!(
            matches!(err, GeomintError::InvalidConfiguration { .. }),
            "unexpected error: {err}"
        );
    }
}

#[test]
fn pendulum_scenario_with_stormer_verlet() {
    let t = linspace(0.0, 10.0, 64);
    let integrator = Integrator::from_method(StepMethod::StormerVerlet).unwrap();
    let traj = integrator.solve(&pendulum(), &[-1.7], &[0.0], &t).unwrap();

    assert_eq!(traj.len(), 64);
    assert_eq!(traj.p_component(0).len(), 64);
    assert_eq!(traj.q_component(0).len(), 64);
    assert_eq!(traj.p_row(0), &[-1.7]);
    assert_eq!(traj.q_row(0), &[0.0]);
    assert!(traj.p.iter().chain(&traj.q).all(|v| v.is_finite()));
    assert!(traj.max_deviation(pendulum_energy) < 0.05);
}

fn time_grid() -> impl Strategy<Value = Vec<f64>> {
    (-5.0..5.0_f64, prop::collection::vec(-0.2..0.2_f64, 0..40)).prop_map(|(t0, steps)| {
        let mut t = vec![t0];
        for h in steps {
            let last = *t.last().unwrap();
            t.push(last + h);
        }
        t
    })
}

proptest! {
    #[test]
    fn first_row_is_initial_condition_and_length_matches(
        p0 in -3.0..3.0_f64,
        q0 in -3.0..3.0_f64,
        t in time_grid(),
        stormer in any::<bool>(),
    ) {
        let method = if stormer { StepMethod::StormerVerlet } else { StepMethod::SymplecticEuler };
        let integrator = Integrator::from_method(method).unwrap();
        let traj = integrator.solve(&pendulum(), &[p0], &[q0], &t).unwrap();

        prop_assert_eq!(traj.len(), t.len());
        prop_assert_eq!(traj.p.len(), t.len());
        prop_assert_eq!(traj.q.len(), t.len());
        prop_assert_eq!(traj.p_row(0)[0].to_bits(), p0.to_bits());
        prop_assert_eq!(traj.q_row(0)[0].to_bits(), q0.to_bits());
    }
}
