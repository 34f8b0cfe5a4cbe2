use nalgebra as na;
use ndarray::Array1;

use crate::math::{polyfit, polyval};

/// Savitzky-Golay smoothing filter.
///
/// Interior samples use the convolution weights of a least-squares
/// polynomial of `order` over a centered `window`. The first and last half
/// windows are evaluated from a polynomial fitted to the edge window, so
/// polynomials up to `order` pass through untouched.
#[derive(Debug, Clone)]
pub struct SavitzkyGolay {
    window: usize,
    order: usize,
    weights: Vec<f64>,
}

impl SavitzkyGolay {
    /// `window` is rounded down to an odd length. `None` when the window is
    /// too short to hold a polynomial of the requested order.
    pub fn new(window: usize, order: usize) -> Option<Self> {
        let window = if window % 2 == 0 {
            window.saturating_sub(1)
        } else {
            window
        };

        if window <= order || window < 3 {
            return None;
        }

        let half = (window / 2) as f64;
        let x = na::DVector::from_fn(window, |i, _| i as f64 - half);

        let mut weights = Vec::with_capacity(window);
        for j in 0..window {
            let unit = na::DVector::from_fn(window, |i, _| if i == j { 1.0 } else { 0.0 });
            let coeffs = polyfit(&x, &unit, order)?;
            weights.push(coeffs[0]);
        }

        Some(Self {
            window,
            order,
            weights,
        })
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    pub fn apply(&self, series: &Array1<f64>) -> Array1<f64> {
        let n = series.len();
        if n < self.window {
            return series.clone();
        }

        let half = self.window / 2;
        let mut out = series.clone();

        for i in half..n - half {
            out[i] = self
                .weights
                .iter()
                .enumerate()
                .map(|(k, w)| w * series[i - half + k])
                .sum();
        }

        self.fit_edge(series, 0, 0..half, &mut out);
        self.fit_edge(series, n - self.window, n - half..n, &mut out);

        out
    }

    fn fit_edge(
        &self,
        series: &Array1<f64>,
        start: usize,
        targets: std::ops::Range<usize>,
        out: &mut Array1<f64>,
    ) {
        let x = na::DVector::from_fn(self.window, |i, _| i as f64);
        let y = na::DVector::from_fn(self.window, |i, _| series[start + i]);

        if let Some(coeffs) = polyfit(&x, &y, self.order) {
            for i in targets {
                out[i] = polyval(&coeffs, (i - start) as f64);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_cubic_untouched() {
        let series: Array1<f64> = (0..30)
            .map(|i| {
                let t = i as f64 * 0.1;
                3.0 + t - 0.5 * t * t + 0.2 * t * t * t
            })
            .collect();

        let filter = SavitzkyGolay::new(15, 3).unwrap();
        let out = filter.apply(&series);

        for (a, b) in out.iter().zip(series.iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn flattens_single_spike() {
        let mut series = Array1::from(vec![10.0; 21]);
        series[10] = 40.0;

        let out = SavitzkyGolay::new(15, 3).unwrap().apply(&series);

        assert!(out[10] < 30.0);
    }

    #[test]
    fn even_window_rounds_down() {
        assert_eq!(SavitzkyGolay::new(14, 3).unwrap().window(), 13);
        assert!(SavitzkyGolay::new(4, 3).is_none());
    }
}
