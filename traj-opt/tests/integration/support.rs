//! Shared helpers: finite-difference reference routines and canonical
//! losses. These are test-only — the production path is analytic.

use nalgebra::{DMatrix, DVector};

use traj_opt::{LossFn, Problem, RolloutView};
use traj_types::Simulator;

/// Ridders extrapolation constants (Numerical Recipes `dfridr`).
pub const RIDDERS_CON: f64 = 1.4;
pub const RIDDERS_TABLE: usize = 10;
pub const RIDDERS_SAFE: f64 = 2.0;

/// Ridders' polynomial-extrapolated derivative of a vector-valued function
/// of one scalar: a Neville tableau over shrinking centered differences,
/// aborting when the error estimate starts growing.
pub fn ridders_derivative(
    mut f: impl FnMut(f64) -> DVector<f64>,
    x: f64,
    initial_h: f64,
) -> DVector<f64> {
    assert!(initial_h > 0.0, "Ridders needs a positive initial step");
    let con2 = RIDDERS_CON * RIDDERS_CON;
    let mut h = initial_h;
    let dim = f(x).len();
    let mut a = vec![vec![DVector::zeros(dim); RIDDERS_TABLE]; RIDDERS_TABLE];
    a[0][0] = (f(x + h) - f(x - h)) / (2.0 * h);
    let mut answer = a[0][0].clone();
    let mut err = f64::INFINITY;
    for i in 1..RIDDERS_TABLE {
        h /= RIDDERS_CON;
        a[0][i] = (f(x + h) - f(x - h)) / (2.0 * h);
        let mut fac = con2;
        for j in 1..=i {
            a[j][i] = (&a[j - 1][i] * fac - &a[j - 1][i - 1]) / (fac - 1.0);
            fac *= con2;
            let errt = (&a[j][i] - &a[j - 1][i])
                .norm()
                .max((&a[j][i] - &a[j - 1][i - 1]).norm());
            if errt <= err {
                err = errt;
                answer = a[j][i].clone();
            }
        }
        if (&a[i][i] - &a[i - 1][i - 1]).norm() >= RIDDERS_SAFE * err {
            break;
        }
    }
    answer
}

/// Ridders gradient of a problem's objective with respect to the flat
/// vector.
pub fn ridders_loss_gradient<S: Simulator, P: Problem<S>>(
    problem: &mut P,
    world: &mut S,
    x: &[f64],
    h: f64,
) -> DVector<f64> {
    let n = x.len();
    let mut grad = DVector::zeros(n);
    for i in 0..n {
        let column = ridders_derivative(
            |v| {
                let mut trial = x.to_vec();
                trial[i] = v;
                problem.unflatten(&trial);
                DVector::from_element(1, problem.compute_loss(world).expect("loss evaluation"))
            },
            x[i],
            h,
        );
        grad[i] = column[0];
    }
    problem.unflatten(x);
    grad
}

/// Ridders Jacobian of a problem's constraint vector with respect to the
/// flat vector.
pub fn ridders_constraints_jacobian<S: Simulator, P: Problem<S>>(
    problem: &mut P,
    world: &mut S,
    x: &[f64],
    h: f64,
) -> DMatrix<f64> {
    let n = x.len();
    let m = problem.constraint_dim();
    let mut jac = DMatrix::zeros(m, n);
    for i in 0..n {
        let column = ridders_derivative(
            |v| {
                let mut trial = x.to_vec();
                trial[i] = v;
                problem.unflatten(&trial);
                let mut c = vec![0.0; m];
                problem
                    .compute_constraints(world, &mut c)
                    .expect("constraint evaluation");
                DVector::from_column_slice(&c)
            },
            x[i],
            h,
        );
        jac.column_mut(i).copy_from(&column);
    }
    problem.unflatten(x);
    jac
}

/// Entrywise closeness with a readable failure message.
pub fn assert_matrix_close(actual: &DMatrix<f64>, expected: &DMatrix<f64>, tol: f64, label: &str) {
    assert_eq!(actual.nrows(), expected.nrows(), "{label}: row count");
    assert_eq!(actual.ncols(), expected.ncols(), "{label}: column count");
    let mut worst = 0.0_f64;
    let mut at = (0, 0);
    for r in 0..actual.nrows() {
        for c in 0..actual.ncols() {
            let diff = (actual[(r, c)] - expected[(r, c)]).abs();
            if diff > worst {
                worst = diff;
                at = (r, c);
            }
        }
    }
    assert!(
        worst <= tol,
        "{label}: max |Δ| = {worst:.3e} at {at:?} exceeds {tol:.3e}\n  actual {:.12e}\n  expected {:.12e}",
        actual[at],
        expected[at]
    );
}

/// Vector flavor of [`assert_matrix_close`].
pub fn assert_vector_close(actual: &DVector<f64>, expected: &DVector<f64>, tol: f64, label: &str) {
    assert_eq!(actual.len(), expected.len(), "{label}: length");
    for i in 0..actual.len() {
        let diff = (actual[i] - expected[i]).abs();
        assert!(
            diff <= tol,
            "{label}: |Δ| = {diff:.3e} at {i} exceeds {tol:.3e} (actual {:.12e}, expected {:.12e})",
            actual[i],
            expected[i]
        );
    }
}

/// `‖p_T‖² + ‖v_T‖² + w·Σ‖u_t‖²` over the representation mapping, with an
/// analytic gradient.
pub fn final_state_tracking_loss(force_weight: f64) -> LossFn {
    LossFn::new(move |r: &dyn RolloutView| {
        let rep = r.representation().to_owned();
        let last = r.steps() - 1;
        let mut value = r.poses(&rep).column(last).norm_squared()
            + r.vels(&rep).column(last).norm_squared();
        let forces = r.forces(&rep);
        for t in 0..r.steps() {
            value += force_weight * forces.column(t).norm_squared();
        }
        value
    })
    .with_gradient(move |r, g| {
        let rep = r.representation().to_owned();
        let last = r.steps() - 1;
        let mut value = r.poses(&rep).column(last).norm_squared()
            + r.vels(&rep).column(last).norm_squared();
        {
            let poses = r.poses(&rep).column(last).clone_owned();
            g.poses_mut(&rep).column_mut(last).copy_from(&(2.0 * &poses));
            let vels = r.vels(&rep).column(last).clone_owned();
            g.vels_mut(&rep).column_mut(last).copy_from(&(2.0 * &vels));
        }
        let forces = r.forces(&rep).clone_owned();
        for t in 0..r.steps() {
            value += force_weight * forces.column(t).norm_squared();
            let scaled = 2.0 * force_weight * forces.column(t).clone_owned();
            g.forces_mut(&rep).column_mut(t).copy_from(&scaled);
        }
        value
    })
}
