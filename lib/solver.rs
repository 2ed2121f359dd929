//! Iterative eigensolvers for hermitian operators given only through their
//! action on vectors.
//!
//! [`Lanczos`] keeps every Krylov vector and fully reorthogonalizes against
//! them; [`Davidson`] expands a search space with diagonal-preconditioned
//! residuals. Both report through [`SolveOutcome`] so that a caller can fall
//! back to dense diagonalization when an iteration does not converge.

use log::{ debug, trace };
use ndarray as nd;
use ndarray_linalg::{ EighInto, UPLO };
use num_complex::Complex64 as C64;
use num_traits::Zero;
use rand::{ Rng, SeedableRng, rngs::StdRng };
use crate::{
    config::{ SolverKind, SolverParams },
    error::DiagResult,
};

/// Search spaces of the Davidson iteration are collapsed beyond this size.
const MAX_SUBSPACE: usize = 64;

/* Operators ******************************************************************/

/// A hermitian operator that can be applied to vectors.
pub trait LinearOperator {
    /// Dimension of the operator.
    fn rows(&self) -> usize;

    /// Accumulate `out += H x`.
    fn matrix_vector_product(&self, out: &mut nd::Array1<C64>, x: &nd::Array1<C64>)
        -> DiagResult<()>;

    /// Dense matrix, built column by column from products by default.
    fn full_matrix(&self) -> DiagResult<nd::Array2<C64>> {
        let n = self.rows();
        let mut H: nd::Array2<C64> = nd::Array2::zeros((n, n));
        let mut e: nd::Array1<C64> = nd::Array1::zeros(n);
        for j in 0..n {
            e[j] = C64::from(1.0);
            let mut col: nd::Array1<C64> = nd::Array1::zeros(n);
            self.matrix_vector_product(&mut col, &e)?;
            H.column_mut(j).assign(&col);
            e[j] = C64::zero();
        }
        Ok(H)
    }

    /// Full eigendecomposition, eigenvalues in ascending order.
    fn full_diag(&self) -> DiagResult<(nd::Array1<f64>, nd::Array2<C64>)> {
        let (E, V) = self.full_matrix()?.eigh_into(UPLO::Lower)?;
        Ok((E, V))
    }

    /// Diagonal elements, if cheaply available.
    fn diagonal(&self) -> Option<nd::Array1<f64>> { None }
}

/// `Σ_i conj(a_i) b_i`.
pub fn inner(a: &nd::Array1<C64>, b: &nd::Array1<C64>) -> C64 {
    a.iter().zip(b.iter()).map(|(x, y)| x.conj() * y).sum()
}

/// Euclidean norm.
pub fn norm(v: &nd::Array1<C64>) -> f64 {
    v.iter().map(|x| x.norm_sqr()).sum::<f64>().sqrt()
}

/// The `excited`-th eigenpair of `op` by dense diagonalization.
pub fn exact_state(op: &dyn LinearOperator, excited: usize)
    -> DiagResult<(f64, nd::Array1<C64>)>
{
    let (E, V) = op.full_diag()?;
    let k = excited.min(E.len().saturating_sub(1));
    Ok((E[k], V.column(k).to_owned()))
}

fn random_start(n: usize, seed: u64) -> nd::Array1<C64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut v: nd::Array1<C64>
        = (0..n).map(|_| C64::from(rng.gen::<f64>() - 0.5)).collect();
    let nrm = norm(&v);
    v.mapv_inplace(|a| a / nrm);
    v
}

/// Normalized copy of `initial`, or a random vector if there is none or it
/// vanishes.
fn start_vector(n: usize, initial: Option<&nd::Array1<C64>>, seed: u64)
    -> nd::Array1<C64>
{
    match initial {
        Some(v) if v.len() == n && norm(v) > 0.0 => {
            let nrm = norm(v);
            v.mapv(|a| a / nrm)
        },
        _ => random_start(n, seed),
    }
}

/* Contract *******************************************************************/

/// Result of an iterative solve.
#[derive(Clone, Debug)]
pub enum SolveOutcome {
    Converged {
        energy: f64,
        vector: nd::Array1<C64>,
        steps: usize,
    },
    /// The iteration ended without meeting its convergence criterion; the
    /// caller may fall back to dense diagonalization.
    NotConverged {
        steps: usize,
        reason: String,
    },
    /// The request cannot be satisfied by any amount of iteration.
    FatalConfig(String),
}

/// Computes one eigenpair of a hermitian operator.
pub trait Eigensolver {
    /// Compute eigenpair number `excited` (0 = lowest), optionally starting
    /// from `initial`.
    fn compute_excited_state(
        &self,
        op: &dyn LinearOperator,
        initial: Option<&nd::Array1<C64>>,
        excited: usize,
    ) -> DiagResult<SolveOutcome>;
}

fn check_request(op: &dyn LinearOperator, excited: usize) -> Option<SolveOutcome> {
    let n = op.rows();
    if n == 0 {
        return Some(SolveOutcome::FatalConfig("operator has zero dimension".into()));
    }
    if excited >= n {
        return Some(SolveOutcome::FatalConfig(format!(
            "excited state {} requested from an operator of dimension {}", excited, n,
        )));
    }
    None
}

/* Lanczos ********************************************************************/

/// Lanczos iteration with full reorthogonalization.
#[derive(Clone, Debug, Default)]
pub struct Lanczos {
    pub params: SolverParams,
}

impl Lanczos {
    pub fn new(params: SolverParams) -> Self { Self { params } }

    fn tridiagonal(alpha: &[f64], beta: &[f64])
        -> DiagResult<(nd::Array1<f64>, nd::Array2<f64>)>
    {
        let m = alpha.len();
        let mut T: nd::Array2<f64> = nd::Array2::zeros((m, m));
        for i in 0..m {
            T[[i, i]] = alpha[i];
            if i > 0 {
                T[[i, i - 1]] = beta[i - 1];
                T[[i - 1, i]] = beta[i - 1];
            }
        }
        Ok(T.eigh_into(UPLO::Lower)?)
    }

    fn ritz_vector(q_vecs: &[nd::Array1<C64>], s: nd::ArrayView1<f64>)
        -> nd::Array1<C64>
    {
        let mut v: nd::Array1<C64> = nd::Array1::zeros(q_vecs[0].len());
        for (q, c) in q_vecs.iter().zip(s.iter()) {
            v.scaled_add(C64::from(*c), q);
        }
        let nrm = norm(&v);
        if nrm > 0.0 { v.mapv_inplace(|a| a / nrm); }
        v
    }
}

impl Eigensolver for Lanczos {
    fn compute_excited_state(
        &self,
        op: &dyn LinearOperator,
        initial: Option<&nd::Array1<C64>>,
        excited: usize,
    ) -> DiagResult<SolveOutcome>
    {
        if let Some(fatal) = check_request(op, excited) { return Ok(fatal); }
        let n = op.rows();
        let m = self.params.max_steps.min(n);
        let mut q_vecs: Vec<nd::Array1<C64>> = Vec::with_capacity(m);
        let mut alpha: Vec<f64> = Vec::with_capacity(m);
        let mut beta: Vec<f64> = Vec::with_capacity(m);
        let mut prev = f64::INFINITY;
        q_vecs.push(start_vector(n, initial, self.params.seed));

        for j in 0..m {
            let mut w: nd::Array1<C64> = nd::Array1::zeros(n);
            op.matrix_vector_product(&mut w, &q_vecs[j])?;
            let a = inner(&q_vecs[j], &w).re;
            alpha.push(a);
            w.scaled_add(C64::from(-a), &q_vecs[j]);
            if j > 0 { w.scaled_add(C64::from(-beta[j - 1]), &q_vecs[j - 1]); }
            for q in q_vecs.iter() {
                let ov = inner(q, &w);
                w.scaled_add(-ov, q);
            }
            let b = norm(&w);
            if !a.is_finite() || !b.is_finite() {
                return Ok(SolveOutcome::NotConverged {
                    steps: j + 1,
                    reason: "non-finite Lanczos coefficient".into(),
                });
            }

            let exhausted = b < self.params.breakdown;
            if alpha.len() > excited {
                let (theta, S) = Self::tridiagonal(&alpha, &beta)?;
                let e = theta[excited];
                trace!("lanczos step {}: ritz value {:.15e}, beta {:.3e}", j + 1, e, b);
                let resid = b * S[[alpha.len() - 1, excited]].abs();
                let settled
                    = j + 1 >= self.params.min_steps
                    && (e - prev).abs() < self.params.tolerance
                    && resid < self.params.tolerance.sqrt();
                if settled || exhausted {
                    debug!("lanczos converged in {} steps", j + 1);
                    let vector = Self::ritz_vector(&q_vecs, S.column(excited));
                    return Ok(SolveOutcome::Converged { energy: e, vector, steps: j + 1 });
                }
                prev = e;
            }
            if exhausted {
                return Ok(SolveOutcome::NotConverged {
                    steps: j + 1,
                    reason: "Krylov space exhausted below the requested state".into(),
                });
            }
            if j + 1 < m {
                beta.push(b);
                q_vecs.push(w.mapv(|x| x / b));
            }
        }
        Ok(SolveOutcome::NotConverged {
            steps: m,
            reason: format!("no convergence after {} steps", m),
        })
    }
}

/* Davidson *******************************************************************/

/// Davidson iteration with a diagonal preconditioner.
#[derive(Clone, Debug, Default)]
pub struct Davidson {
    pub params: SolverParams,
}

impl Davidson {
    pub fn new(params: SolverParams) -> Self { Self { params } }

    /// Orthonormalize `t` against `basis` (twice); `None` if nothing is left.
    fn orthonormalize(basis: &[nd::Array1<C64>], mut t: nd::Array1<C64>, tol: f64)
        -> Option<nd::Array1<C64>>
    {
        for _ in 0..2 {
            for v in basis.iter() {
                let ov = inner(v, &t);
                t.scaled_add(-ov, v);
            }
        }
        let nrm = norm(&t);
        (nrm > tol).then(|| t.mapv(|a| a / nrm))
    }
}

impl Eigensolver for Davidson {
    fn compute_excited_state(
        &self,
        op: &dyn LinearOperator,
        initial: Option<&nd::Array1<C64>>,
        excited: usize,
    ) -> DiagResult<SolveOutcome>
    {
        if let Some(fatal) = check_request(op, excited) { return Ok(fatal); }
        let n = op.rows();
        let diag = op.diagonal();
        let max_subspace = MAX_SUBSPACE.max(excited + 2).min(n);
        let mut basis: Vec<nd::Array1<C64>> = Vec::new();
        let mut hbasis: Vec<nd::Array1<C64>> = Vec::new();
        let mut t = start_vector(n, initial, self.params.seed);
        let mut prev = f64::INFINITY;

        for step in 0..self.params.max_steps {
            let Some(v) = Self::orthonormalize(&basis, t, self.params.breakdown)
                else {
                    return Ok(SolveOutcome::NotConverged {
                        steps: step,
                        reason: "correction vector lies in the search space".into(),
                    });
                };
            let mut hv: nd::Array1<C64> = nd::Array1::zeros(n);
            op.matrix_vector_product(&mut hv, &v)?;
            basis.push(v);
            hbasis.push(hv);

            let k = basis.len();
            let mut G: nd::Array2<C64> = nd::Array2::zeros((k, k));
            for i in 0..k {
                for j in 0..=i {
                    G[[i, j]] = inner(&basis[i], &hbasis[j]);
                    G[[j, i]] = G[[i, j]].conj();
                }
            }
            let (theta, S) = G.eigh_into(UPLO::Lower)?;
            if k <= excited {
                // not enough vectors for the requested state yet
                t = random_start(n, self.params.seed.wrapping_add(k as u64));
                continue;
            }
            let e = theta[excited];
            let mut u: nd::Array1<C64> = nd::Array1::zeros(n);
            let mut hu: nd::Array1<C64> = nd::Array1::zeros(n);
            for i in 0..k {
                u.scaled_add(S[[i, excited]], &basis[i]);
                hu.scaled_add(S[[i, excited]], &hbasis[i]);
            }
            let mut r = hu.clone();
            r.scaled_add(C64::from(-e), &u);
            let rnorm = norm(&r);
            if !e.is_finite() || !rnorm.is_finite() {
                return Ok(SolveOutcome::NotConverged {
                    steps: step + 1,
                    reason: "non-finite Davidson residual".into(),
                });
            }
            trace!("davidson step {}: ritz value {:.15e}, residual {:.3e}", step + 1, e, rnorm);
            let settled
                = step + 1 >= self.params.min_steps
                && (e - prev).abs() < self.params.tolerance
                && rnorm < self.params.tolerance.sqrt();
            if settled || rnorm < self.params.breakdown || k == n {
                debug!("davidson converged in {} steps", step + 1);
                let nrm = norm(&u);
                return Ok(SolveOutcome::Converged {
                    energy: e,
                    vector: u.mapv(|a| a / nrm),
                    steps: step + 1,
                });
            }
            prev = e;

            t = match &diag {
                Some(d) => r.iter().zip(d.iter())
                    .map(|(ri, di)| {
                        let den = e - di;
                        if den.abs() > self.params.preconditioner_floor { ri / den } else { *ri }
                    })
                    .collect(),
                None => r,
            };
            if k >= max_subspace {
                // collapse onto the lowest excited + 1 Ritz vectors
                let (b, hb): (Vec<_>, Vec<_>)
                    = (0..=excited)
                    .map(|c| {
                        let mut x: nd::Array1<C64> = nd::Array1::zeros(n);
                        let mut hx: nd::Array1<C64> = nd::Array1::zeros(n);
                        for i in 0..k {
                            x.scaled_add(S[[i, c]], &basis[i]);
                            hx.scaled_add(S[[i, c]], &hbasis[i]);
                        }
                        (x, hx)
                    })
                    .unzip();
                basis = b;
                hbasis = hb;
            }
        }
        Ok(SolveOutcome::NotConverged {
            steps: self.params.max_steps,
            reason: format!("no convergence after {} steps", self.params.max_steps),
        })
    }
}

/* Strategy *******************************************************************/

/// Eigensolver selected at configuration time.
#[derive(Clone, Debug)]
pub enum SolverStrategy {
    Lanczos(Lanczos),
    Davidson(Davidson),
}

impl SolverStrategy {
    pub fn new(kind: SolverKind, params: SolverParams) -> Self {
        match kind {
            SolverKind::Lanczos => Self::Lanczos(Lanczos::new(params)),
            SolverKind::Davidson => Self::Davidson(Davidson::new(params)),
        }
    }
}

impl Eigensolver for SolverStrategy {
    fn compute_excited_state(
        &self,
        op: &dyn LinearOperator,
        initial: Option<&nd::Array1<C64>>,
        excited: usize,
    ) -> DiagResult<SolveOutcome>
    {
        match self {
            Self::Lanczos(s) => s.compute_excited_state(op, initial, excited),
            Self::Davidson(s) => s.compute_excited_state(op, initial, excited),
        }
    }
}
