//! Penalised cubic smoothing spline.
//!
//! Minimises `sum (y_i - g(x_i))^2 + lambda * integral g''(t)^2 dt` over
//! natural cubic splines with knots at the samples (Reinsch form). The
//! resulting system is symmetric pentadiagonal and solved in O(n).

#[derive(Debug, Clone)]
pub struct SmoothingSpline {
    x: Vec<f64>,
    g: Vec<f64>,
    // second derivatives at the knots, zero at both ends
    gamma: Vec<f64>,
}

impl SmoothingSpline {
    /// `x` must be strictly increasing. Returns `None` for fewer than three
    /// knots or a non-increasing abscissa.
    pub fn fit(x: &[f64], y: &[f64], lambda: f64) -> Option<Self> {
        let n = x.len();
        if n < 3 || y.len() != n {
            return None;
        }

        let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
        if h.iter().any(|&v| v <= 0.0) {
            return None;
        }

        let m = n - 2;
        let lambda = lambda.max(0.0);

        // column j of Q (interior knot j + 1) has (a, b, c) on rows j, j+1, j+2
        let qa = |j: usize| 1.0 / h[j];
        let qb = |j: usize| -1.0 / h[j] - 1.0 / h[j + 1];
        let qc = |j: usize| 1.0 / h[j + 1];

        let mut diag = vec![0.0; m];
        let mut sup1 = vec![0.0; m];
        let mut sup2 = vec![0.0; m];
        let mut rhs = vec![0.0; m];

        for j in 0..m {
            diag[j] = (h[j] + h[j + 1]) / 3.0
                + lambda * (qa(j) * qa(j) + qb(j) * qb(j) + qc(j) * qc(j));

            if j + 1 < m {
                sup1[j] = h[j + 1] / 6.0 + lambda * (qb(j) * qa(j + 1) + qc(j) * qb(j + 1));
            }

            if j + 2 < m {
                sup2[j] = lambda * qc(j) * qa(j + 2);
            }

            rhs[j] = (y[j + 2] - y[j + 1]) / h[j + 1] - (y[j + 1] - y[j]) / h[j];
        }

        let interior = solve_pentadiagonal(&diag, &sup1, &sup2, &rhs)?;

        let mut gamma = vec![0.0; n];
        gamma[1..n - 1].copy_from_slice(&interior);

        let g = (0..n)
            .map(|i| {
                let mut q_gamma = 0.0;
                if i >= 1 {
                    q_gamma += gamma[i - 1] / h[i - 1] - gamma[i] / h[i - 1];
                }
                if i + 1 < n {
                    q_gamma += gamma[i + 1] / h[i] - gamma[i] / h[i];
                }

                y[i] - lambda * q_gamma
            })
            .collect();

        Some(Self {
            x: x.to_vec(),
            g,
            gamma,
        })
    }

    pub fn eval(&self, t: f64) -> f64 {
        let n = self.x.len();

        if t <= self.x[0] {
            let h = self.x[1] - self.x[0];
            let slope = (self.g[1] - self.g[0]) / h - h * self.gamma[1] / 6.0;
            return self.g[0] + slope * (t - self.x[0]);
        }

        if t >= self.x[n - 1] {
            let h = self.x[n - 1] - self.x[n - 2];
            let slope = (self.g[n - 1] - self.g[n - 2]) / h + h * self.gamma[n - 2] / 6.0;
            return self.g[n - 1] + slope * (t - self.x[n - 1]);
        }

        let i = self.x.partition_point(|&k| k <= t) - 1;
        let (xl, xr) = (self.x[i], self.x[i + 1]);
        let h = xr - xl;
        let (dl, dr) = (t - xl, xr - t);

        (dl * self.g[i + 1] + dr * self.g[i]) / h
            - dl * dr / 6.0
                * ((1.0 + dl / h) * self.gamma[i + 1] + (1.0 + dr / h) * self.gamma[i])
    }
}

/// LDLt solve of a symmetric positive definite pentadiagonal system given by
/// its diagonal and first two super-diagonals.
fn solve_pentadiagonal(diag: &[f64], sup1: &[f64], sup2: &[f64], rhs: &[f64]) -> Option<Vec<f64>> {
    let m = diag.len();
    let mut d = vec![0.0; m];
    let mut l1 = vec![0.0; m + 1];
    let mut l2 = vec![0.0; m + 2];

    for i in 0..m {
        let mut di = diag[i];
        if i >= 1 {
            di -= l1[i] * l1[i] * d[i - 1];
        }
        if i >= 2 {
            di -= l2[i] * l2[i] * d[i - 2];
        }

        if di.abs() < f64::EPSILON {
            return None;
        }
        d[i] = di;

        l2[i + 2] = sup2[i] / di;

        let mut e = sup1[i];
        if i >= 1 {
            e -= l2[i + 1] * l1[i] * d[i - 1];
        }
        l1[i + 1] = e / di;
    }

    let mut z = vec![0.0; m];
    for i in 0..m {
        let mut zi = rhs[i];
        if i >= 1 {
            zi -= l1[i] * z[i - 1];
        }
        if i >= 2 {
            zi -= l2[i] * z[i - 2];
        }
        z[i] = zi;
    }

    let mut out = vec![0.0; m];
    for i in (0..m).rev() {
        let mut xi = z[i] / d[i];
        if i + 1 < m {
            xi -= l1[i + 1] * out[i + 1];
        }
        if i + 2 < m {
            xi -= l2[i + 2] * out[i + 2];
        }
        out[i] = xi;
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reproduces_straight_line() {
        let x: Vec<f64> = vec![0.0, 1.0, 3.0, 4.0, 7.0, 8.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v + 1.0).collect();

        let spline = SmoothingSpline::fit(&x, &y, 0.1).unwrap();

        for t in [0.5, 2.0, 5.5, 7.9] {
            assert!((spline.eval(t) - (2.0 * t + 1.0)).abs() < 1e-9);
        }
    }

    #[test]
    fn zero_lambda_interpolates_knots() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let y = vec![0.0, 1.0, 4.0, 9.0, 16.0];

        let spline = SmoothingSpline::fit(&x, &y, 0.0).unwrap();

        for (xi, yi) in x.iter().zip(&y) {
            assert!((spline.eval(*xi) - yi).abs() < 1e-9);
        }

        let mid = spline.eval(2.5);
        assert!(mid > 4.0 && mid < 9.0);
    }

    #[test]
    fn large_lambda_tends_to_regression_line() {
        let x = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let y = vec![0.0, 2.0, 0.0, 2.0, 0.0];

        let spline = SmoothingSpline::fit(&x, &y, 1e9).unwrap();

        // least-squares line of the samples is y = 0.8
        assert!((spline.eval(2.0) - 0.8).abs() < 1e-3);
    }

    #[test]
    fn rejects_degenerate_input() {
        assert!(SmoothingSpline::fit(&[0.0, 1.0], &[0.0, 1.0], 0.1).is_none());
        assert!(SmoothingSpline::fit(&[0.0, 1.0, 1.0], &[0.0, 1.0, 2.0], 0.1).is_none());
    }
}
