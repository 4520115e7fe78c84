//! Krylov kernels of the native backend.
//!
//! All three methods share the same stopping rule: the relative residual
//! `||b - A x|| / ||b||` must drop to `tolerance`. Before reporting
//! convergence the residual is recomputed from scratch, so a drifting
//! recurrence cannot claim a solution it does not have. The iteration count
//! never exceeds `max_iterations`.
//!
//! ```text
//! GMRES(m)   right preconditioned, modified Gram-Schmidt, Givens rotations
//! CG         preconditioned, SPD systems
//! BiCGSTAB   right preconditioned, general systems
//! ```

use tracing::{debug, trace, warn};

use super::par_csr::ParCsrMatrix;
use super::precond::Preconditioner;
use super::traits::{KrylovMethod, KrylovOutcome, KrylovParams, KrylovStatus};

#[inline]
fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// y += alpha * x
#[inline]
fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

fn outcome(status: KrylovStatus, iterations: usize, relative_residual: f64) -> KrylovOutcome {
    KrylovOutcome {
        status,
        iterations,
        relative_residual,
    }
}

/// Handles the zero right-hand side; returns `None` when there is work to do.
fn trivial_rhs(b: &[f64], x: &mut [f64]) -> Option<KrylovOutcome> {
    if norm(b) == 0.0 {
        x.fill(0.0);
        Some(outcome(KrylovStatus::Converged, 0, 0.0))
    } else {
        None
    }
}

/// Dispatch to the kernel for `method`.
pub fn solve(
    method: KrylovMethod,
    a: &ParCsrMatrix,
    pc: &dyn Preconditioner,
    b: &[f64],
    x: &mut [f64],
    params: &KrylovParams,
) -> KrylovOutcome {
    let result = match method {
        KrylovMethod::GMRES => gmres(a, pc, b, x, params),
        KrylovMethod::CG => cg(a, pc, b, x, params),
        KrylovMethod::BiCGSTAB => bicgstab(a, pc, b, x, params),
    };
    debug!(
        method = method.solver_name(),
        status = ?result.status,
        iterations = result.iterations,
        residual = result.relative_residual,
        "Krylov solve finished"
    );
    result
}

/// c, s such that [c s; -s c] * [a; b] = [r; 0]
fn givens(a: f64, b: f64) -> (f64, f64) {
    if b == 0.0 {
        (1.0, 0.0)
    } else {
        let r = a.hypot(b);
        (a / r, b / r)
    }
}

/// Restarted, right-preconditioned GMRES.
pub fn gmres(
    a: &ParCsrMatrix,
    pc: &dyn Preconditioner,
    b: &[f64],
    x: &mut [f64],
    params: &KrylovParams,
) -> KrylovOutcome {
    if let Some(done) = trivial_rhs(b, x) {
        return done;
    }

    let n = b.len();
    let b_norm = norm(b);
    let tol = params.tolerance * b_norm;
    // The Krylov basis never holds more than n vectors
    let restart = params.restart.min(n).max(1);
    let max_iter = params.max_iterations.max(1);

    let mut r = vec![0.0; n];
    let mut iterations = 0;

    loop {
        a.residual(b, x, &mut r);
        let beta = norm(&r);
        let rel = beta / b_norm;

        if !beta.is_finite() {
            warn!(iterations, "GMRES: non-finite residual");
            return outcome(KrylovStatus::Breakdown, iterations, rel);
        }
        if beta <= tol {
            return outcome(KrylovStatus::Converged, iterations, rel);
        }
        if iterations >= max_iter {
            return outcome(KrylovStatus::MaxIterations, iterations, rel);
        }

        // Krylov basis V, preconditioned basis Z, Hessenberg columns H
        let mut v: Vec<Vec<f64>> = vec![r.iter().map(|ri| ri / beta).collect()];
        let mut z: Vec<Vec<f64>> = Vec::with_capacity(restart);
        let mut h: Vec<Vec<f64>> = Vec::with_capacity(restart);
        let mut cs: Vec<f64> = Vec::with_capacity(restart);
        let mut sn: Vec<f64> = Vec::with_capacity(restart);
        let mut g: Vec<f64> = vec![beta];

        let mut k = 0;
        while k < restart && iterations < max_iter {
            iterations += 1;

            let mut zk = vec![0.0; n];
            pc.apply(a, &v[k], &mut zk);
            let mut w = vec![0.0; n];
            a.mul_vec(&zk, &mut w);
            z.push(zk);

            let mut col = Vec::with_capacity(k + 2);
            for vi in &v {
                let hik = dot(&w, vi);
                axpy(-hik, vi, &mut w);
                col.push(hik);
            }
            let h_next = norm(&w);
            col.push(h_next);

            for i in 0..k {
                let t = cs[i] * col[i] + sn[i] * col[i + 1];
                col[i + 1] = -sn[i] * col[i] + cs[i] * col[i + 1];
                col[i] = t;
            }
            let (c, s) = givens(col[k], col[k + 1]);
            col[k] = c * col[k] + s * col[k + 1];
            col[k + 1] = 0.0;
            cs.push(c);
            sn.push(s);

            let gk = g[k];
            g[k] = c * gk;
            g.push(-s * gk);
            h.push(col);
            k += 1;

            let estimate = g[k].abs();
            trace!(iteration = iterations, estimate = estimate / b_norm, "GMRES step");
            if estimate <= tol || h_next <= f64::EPSILON * beta {
                break;
            }
            v.push(w.iter().map(|wi| wi / h_next).collect());
        }

        // Back substitution on the rotated Hessenberg system H y = g
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut acc = g[i];
            for j in (i + 1)..k {
                acc -= h[j][i] * y[j];
            }
            let diag = h[i][i];
            if diag == 0.0 || !diag.is_finite() {
                warn!(iterations, "GMRES: singular Hessenberg system");
                a.residual(b, x, &mut r);
                return outcome(KrylovStatus::Breakdown, iterations, norm(&r) / b_norm);
            }
            y[i] = acc / diag;
        }
        for (yj, zj) in y.iter().zip(&z) {
            axpy(*yj, zj, x);
        }
    }
}

/// Preconditioned Conjugate Gradient.
pub fn cg(
    a: &ParCsrMatrix,
    pc: &dyn Preconditioner,
    b: &[f64],
    x: &mut [f64],
    params: &KrylovParams,
) -> KrylovOutcome {
    if let Some(done) = trivial_rhs(b, x) {
        return done;
    }

    let n = b.len();
    let b_norm = norm(b);
    let max_iter = params.max_iterations.max(1);

    let mut r = vec![0.0; n];
    a.residual(b, x, &mut r);
    let mut rel = norm(&r) / b_norm;
    if rel <= params.tolerance {
        return outcome(KrylovStatus::Converged, 0, rel);
    }

    let mut z = vec![0.0; n];
    pc.apply(a, &r, &mut z);
    let mut p = z.clone();
    let mut rz = dot(&r, &z);
    let mut q = vec![0.0; n];

    for k in 1..=max_iter {
        a.mul_vec(&p, &mut q);
        let pq = dot(&p, &q);
        if pq <= 0.0 || !pq.is_finite() {
            warn!(iteration = k, pq, "CG: non-positive curvature");
            return outcome(KrylovStatus::Breakdown, k - 1, rel);
        }

        let alpha = rz / pq;
        axpy(alpha, &p, x);
        axpy(-alpha, &q, &mut r);
        rel = norm(&r) / b_norm;
        trace!(iteration = k, residual = rel, "CG step");

        if rel <= params.tolerance {
            // Replace the recurrence residual by the true one
            a.residual(b, x, &mut r);
            rel = norm(&r) / b_norm;
            if rel <= params.tolerance {
                return outcome(KrylovStatus::Converged, k, rel);
            }
        }

        pc.apply(a, &r, &mut z);
        let rz_new = dot(&r, &z);
        if rz == 0.0 {
            return outcome(KrylovStatus::Breakdown, k, rel);
        }
        let beta = rz_new / rz;
        for (pi, zi) in p.iter_mut().zip(&z) {
            *pi = zi + beta * *pi;
        }
        rz = rz_new;
    }

    a.residual(b, x, &mut r);
    outcome(KrylovStatus::MaxIterations, max_iter, norm(&r) / b_norm)
}

/// Right-preconditioned BiCGSTAB.
pub fn bicgstab(
    a: &ParCsrMatrix,
    pc: &dyn Preconditioner,
    b: &[f64],
    x: &mut [f64],
    params: &KrylovParams,
) -> KrylovOutcome {
    if let Some(done) = trivial_rhs(b, x) {
        return done;
    }

    let n = b.len();
    let b_norm = norm(b);
    let max_iter = params.max_iterations.max(1);

    let mut r = vec![0.0; n];
    a.residual(b, x, &mut r);
    let mut rel = norm(&r) / b_norm;
    if rel <= params.tolerance {
        return outcome(KrylovStatus::Converged, 0, rel);
    }

    let r_hat = r.clone();
    let (mut rho, mut alpha, mut omega) = (1.0, 1.0, 1.0);
    let mut v = vec![0.0; n];
    let mut p = vec![0.0; n];
    let mut p_hat = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut s_hat = vec![0.0; n];
    let mut t = vec![0.0; n];

    for k in 1..=max_iter {
        let rho_new = dot(&r_hat, &r);
        if rho_new == 0.0 || !rho_new.is_finite() {
            warn!(iteration = k, "BiCGSTAB: rho breakdown");
            return outcome(KrylovStatus::Breakdown, k - 1, rel);
        }
        let beta = (rho_new / rho) * (alpha / omega);
        for i in 0..n {
            p[i] = r[i] + beta * (p[i] - omega * v[i]);
        }

        pc.apply(a, &p, &mut p_hat);
        a.mul_vec(&p_hat, &mut v);
        let rv = dot(&r_hat, &v);
        if rv == 0.0 || !rv.is_finite() {
            warn!(iteration = k, "BiCGSTAB: alpha breakdown");
            return outcome(KrylovStatus::Breakdown, k - 1, rel);
        }
        alpha = rho_new / rv;

        for i in 0..n {
            s[i] = r[i] - alpha * v[i];
        }
        if norm(&s) / b_norm <= params.tolerance {
            axpy(alpha, &p_hat, x);
            a.residual(b, x, &mut r);
            rel = norm(&r) / b_norm;
            if rel <= params.tolerance {
                return outcome(KrylovStatus::Converged, k, rel);
            }
            // Recurrence was too optimistic; restart the shadow residual
            return restart_bicgstab(a, pc, b, x, params, k);
        }

        pc.apply(a, &s, &mut s_hat);
        a.mul_vec(&s_hat, &mut t);
        let tt = dot(&t, &t);
        if tt == 0.0 || !tt.is_finite() {
            warn!(iteration = k, "BiCGSTAB: omega breakdown");
            axpy(alpha, &p_hat, x);
            a.residual(b, x, &mut r);
            return outcome(KrylovStatus::Breakdown, k, norm(&r) / b_norm);
        }
        omega = dot(&t, &s) / tt;

        axpy(alpha, &p_hat, x);
        axpy(omega, &s_hat, x);
        for i in 0..n {
            r[i] = s[i] - omega * t[i];
        }
        rel = norm(&r) / b_norm;
        trace!(iteration = k, residual = rel, "BiCGSTAB step");

        if rel <= params.tolerance {
            a.residual(b, x, &mut r);
            rel = norm(&r) / b_norm;
            if rel <= params.tolerance {
                return outcome(KrylovStatus::Converged, k, rel);
            }
        }
        if omega == 0.0 {
            return outcome(KrylovStatus::Breakdown, k, rel);
        }
        rho = rho_new;
    }

    a.residual(b, x, &mut r);
    outcome(KrylovStatus::MaxIterations, max_iter, norm(&r) / b_norm)
}

/// Continue BiCGSTAB from the current iterate with the remaining budget.
fn restart_bicgstab(
    a: &ParCsrMatrix,
    pc: &dyn Preconditioner,
    b: &[f64],
    x: &mut [f64],
    params: &KrylovParams,
    used: usize,
) -> KrylovOutcome {
    let remaining = params.max_iterations.saturating_sub(used);
    if remaining == 0 {
        let mut r = vec![0.0; b.len()];
        a.residual(b, x, &mut r);
        return outcome(KrylovStatus::MaxIterations, used, norm(&r) / norm(b));
    }
    let rest = KrylovParams {
        max_iterations: remaining,
        ..params.clone()
    };
    let next = bicgstab(a, pc, b, x, &rest);
    outcome(next.status, used + next.iterations, next.relative_residual)
}
