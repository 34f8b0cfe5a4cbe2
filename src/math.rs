use nalgebra as na;
use ndarray::Array1;
use num_traits::Float;

/// Piecewise-linear interpolation of `x` over the sorted knots `xp`.
/// Outside the knot range the nearest edge value is returned.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> Option<f64> {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return None;
    }

    if x <= xp[0] {
        return Some(fp[0]);
    }

    if x >= xp[n - 1] {
        return Some(fp[n - 1]);
    }

    let hi = xp[..n].partition_point(|&k| k <= x);
    let lo = hi - 1;
    let span = xp[hi] - xp[lo];

    if span <= 0.0 {
        return Some(fp[lo]);
    }

    let alpha = (x - xp[lo]) / span;

    Some(fp[lo] + alpha * (fp[hi] - fp[lo]))
}

/// Fills every gap by linear interpolation between known neighbours; leading
/// and trailing gaps take the nearest known value. `None` if nothing is known.
pub fn fill_gaps(series: &[Option<f64>]) -> Option<Array1<f64>> {
    let (xp, fp): (Vec<f64>, Vec<f64>) = series
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.map(|v| (i as f64, v)))
        .unzip();

    if xp.is_empty() {
        return None;
    }

    let filled = series
        .iter()
        .enumerate()
        .map(|(i, v)| match v {
            Some(v) => *v,
            None => interp(i as f64, &xp, &fp).unwrap_or(0.0),
        })
        .collect();

    Some(filled)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Mean and population standard deviation.
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }

    let arr = Array1::from(values.to_vec());
    let mean = arr.mean()?;
    let std = arr.std(0.0);

    Some((mean, std))
}

/// Percentile with linear interpolation between closest ranks, `q` in [0, 100].
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let xp: Vec<f64> = (0..sorted.len()).map(|i| i as f64).collect();

    interp(rank, &xp, &sorted)
}

/// Least-squares polynomial fit, coefficients ordered from the constant term.
pub fn polyfit<T: na::RealField + Float>(
    x: &na::DVector<T>,
    y: &na::DVector<T>,
    order: usize,
) -> Option<na::DVector<T>> {
    if x.len() != y.len() || x.len() <= order {
        return None;
    }

    let a = na::DMatrix::from_fn(x.len(), order + 1, |r, c| Float::powi(x[r], c as i32));

    let qr_result = a.qr();
    let qty = qr_result.q().transpose() * y;

    qr_result.r().solve_upper_triangular(&qty)
}

#[inline]
pub fn polyval<T: na::RealField + Float>(coeffs: &na::DVector<T>, x: T) -> T {
    coeffs
        .as_slice()
        .iter()
        .rev()
        .fold(T::zero(), |acc, &c| acc * x + c)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interp_clamps_at_edges() {
        let xp = [1.0, 3.0];
        let fp = [10.0, 30.0];

        assert_eq!(interp(0.0, &xp, &fp), Some(10.0));
        assert_eq!(interp(2.0, &xp, &fp), Some(20.0));
        assert_eq!(interp(5.0, &xp, &fp), Some(30.0));
    }

    #[test]
    fn fill_gaps_interpolates_and_extends() {
        let filled = fill_gaps(&[None, Some(2.0), None, Some(4.0), None]).unwrap();

        assert_eq!(filled.to_vec(), vec![2.0, 2.0, 3.0, 4.0, 4.0]);
        assert!(fill_gaps(&[None, None]).is_none());
    }

    #[test]
    fn median_of_even_count() {
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn polyfit_recovers_cubic() {
        let x = na::DVector::from_fn(9, |i, _| i as f64 - 4.0);
        let y = x.map(|v| 1.0 - 2.0 * v + 0.5 * v * v * v);

        let coeffs = polyfit(&x, &y, 3).unwrap();

        assert!((coeffs[0] - 1.0).abs() < 1e-9);
        assert!((coeffs[1] + 2.0).abs() < 1e-9);
        assert!(coeffs[2].abs() < 1e-9);
        assert!((polyval(&coeffs, 2.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn percentile_matches_linear_rank() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];

        assert_eq!(percentile(&values, 50.0), Some(3.0));
        assert!((percentile(&values, 95.0).unwrap() - 4.8).abs() < 1e-12);
    }
}
