use nalgebra as na;
use ndarray::Array1;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::bbox::{BBox, Ltrb};
use crate::config::SmootherConfig;
use crate::filter::SavitzkyGolay;
use crate::math::{fill_gaps, interp, mean_std, median, percentile};
use crate::spline::SmoothingSpline;

type Center = (f64, f64);

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct SmoothedBallPosition {
    pub center: na::Point2<f32>,
    pub bbox: BBox<Ltrb>,
    /// `true` when the frame held a detection that survived outlier
    /// rejection, `false` when the position was synthesized.
    pub observed: bool,
}

/// Frame-to-frame displacement of consecutive observed ball centers.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct VelocityStats {
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub p95: f64,
}

impl VelocityStats {
    fn of(centers: &[Option<Center>]) -> Option<Self> {
        let velocities: Vec<f64> = centers
            .windows(2)
            .filter_map(|w| match (w[0], w[1]) {
                (Some(a), Some(b)) => Some(distance(a, b)),
                _ => None,
            })
            .collect();

        let (mean, std) = mean_std(&velocities)?;

        Some(Self {
            mean,
            std,
            median: median(&velocities)?,
            p95: percentile(&velocities, 95.0)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct SmoothedTrajectory {
    pub positions: Vec<Option<SmoothedBallPosition>>,
    pub velocity: Option<VelocityStats>,
}

impl SmoothedTrajectory {
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, frame: usize) -> Option<&SmoothedBallPosition> {
        self.positions.get(frame)?.as_ref()
    }

    pub fn boxes(&self) -> Vec<Option<BBox<Ltrb>>> {
        self.positions.iter().map(|p| p.map(|p| p.bbox)).collect()
    }
}

#[inline]
fn distance(a: Center, b: Center) -> f64 {
    ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
}

/// Turns a sparse, noisy ball observation stream into one position per frame.
pub struct TrajectorySmoother {
    config: SmootherConfig,
}

impl TrajectorySmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self { config }
    }

    pub fn smooth(
        &self,
        positions: &[Option<BBox<Ltrb>>],
        hit_frames: &BTreeSet<usize>,
    ) -> SmoothedTrajectory {
        let n = positions.len();
        let raw: Vec<Option<Center>> = positions
            .iter()
            .map(|p| {
                p.map(|b| {
                    let c = b.center();
                    (c.x as f64, c.y as f64)
                })
            })
            .collect();

        let velocity = VelocityStats::of(&raw);
        if let Some(v) = &velocity {
            log::debug!(
                "ball velocity mean {:.2} std {:.2} median {:.2} p95 {:.2}",
                v.mean,
                v.std,
                v.median,
                v.p95
            );
        }

        let mut centers = self.reject_outliers(&raw, hit_frames);
        let valid: Vec<usize> = (0..n).filter(|&i| centers[i].is_some()).collect();

        if valid.len() >= 4 {
            self.fill_with_spline(&mut centers, &valid, hit_frames);
        } else {
            fill_linear(&mut centers, hit_frames);
        }

        let xs = fill_gaps(&centers.iter().map(|c| c.map(|c| c.0)).collect::<Vec<_>>());
        let ys = fill_gaps(&centers.iter().map(|c| c.map(|c| c.1)).collect::<Vec<_>>());

        let (mut xs, mut ys) = match (xs, ys) {
            (Some(xs), Some(ys)) => (xs, ys),
            _ => {
                return SmoothedTrajectory {
                    positions: vec![None; n],
                    velocity,
                }
            }
        };

        let window = self.config.savgol_window.min(n / 2 * 2 + 1);
        if let Some(filter) = SavitzkyGolay::new(window, self.config.savgol_order) {
            xs = filter.apply(&xs);
            ys = filter.apply(&ys);
        }

        self.clamp_velocity(&mut xs, &mut ys);

        let smoothed = (0..n)
            .map(|i| {
                let center = na::Point2::new(xs[i] as f32, ys[i] as f32);
                let (w, h) = self.box_size(positions, &valid, i);

                Some(SmoothedBallPosition {
                    center,
                    bbox: BBox::around(center, w, h),
                    observed: valid.binary_search(&i).is_ok(),
                })
            })
            .collect();

        SmoothedTrajectory {
            positions: smoothed,
            velocity,
        }
    }

    // Compares every center to its raw neighbourhood; hit frames are real
    // inflections and stay.
    fn reject_outliers(
        &self,
        raw: &[Option<Center>],
        hit_frames: &BTreeSet<usize>,
    ) -> Vec<Option<Center>> {
        let n = raw.len();
        let w = self.config.outlier_window.max(1);
        let mut filtered = raw.to_vec();

        for i in w..n.saturating_sub(w) {
            let current = match raw[i] {
                Some(c) if !hit_frames.contains(&i) => c,
                _ => continue,
            };

            let window: Vec<f64> = raw[i - w..=i + w]
                .iter()
                .filter_map(|p| p.map(|p| p.1))
                .collect();

            if window.len() < 3 {
                continue;
            }

            let deviation = median(&window).map_or(0.0, |m| (current.1 - m).abs());
            if deviation > self.config.max_vertical_deviation {
                log::trace!("frame {}: vertical outlier ({:.1} px)", i, deviation);
                filtered[i] = None;
                continue;
            }

            if let (Some(prev), Some(next)) = (raw[i - 1], raw[i + 1]) {
                let accel = (distance(current, next) - distance(prev, current)).abs();
                if accel > self.config.max_acceleration {
                    log::trace!("frame {}: acceleration outlier ({:.1})", i, accel);
                    filtered[i] = None;
                }
            }
        }

        let dropped = filtered
            .iter()
            .zip(raw)
            .filter(|(f, r)| f.is_none() && r.is_some())
            .count();
        if dropped > 0 {
            log::debug!("dropped {} ball outliers", dropped);
        }

        filtered
    }

    fn fill_with_spline(
        &self,
        centers: &mut [Option<Center>],
        valid: &[usize],
        hit_frames: &BTreeSet<usize>,
    ) {
        let knots: Vec<f64> = valid.iter().map(|&i| i as f64).collect();
        let ys: Vec<f64> = valid.iter().filter_map(|&i| centers[i].map(|c| c.1)).collect();

        let spline = match SmoothingSpline::fit(&knots, &ys, self.config.spline_smoothing) {
            Some(spline) => spline,
            None => return,
        };

        for idx in 0..centers.len() {
            if centers[idx].is_some() || hit_frames.contains(&idx) {
                continue;
            }

            let after = valid.partition_point(|&v| v < idx);
            if after == 0 || after == valid.len() {
                continue;
            }

            let (prev, next) = (valid[after - 1], valid[after]);
            if next - prev > self.config.max_gap {
                continue;
            }

            if let (Some(p), Some(q)) = (centers[prev], centers[next]) {
                let x = interp(idx as f64, &[prev as f64, next as f64], &[p.0, q.0]).unwrap_or(p.0);
                centers[idx] = Some((x, spline.eval(idx as f64)));
            }
        }
    }

    fn clamp_velocity(&self, xs: &mut Array1<f64>, ys: &mut Array1<f64>) {
        let n = xs.len();

        let too_fast: Vec<usize> = (1..n)
            .filter(|&i| {
                distance((xs[i - 1], ys[i - 1]), (xs[i], ys[i])) > self.config.max_velocity
            })
            .collect();

        for idx in too_fast {
            if idx + 1 < n {
                xs[idx] = (xs[idx - 1] + xs[idx + 1]) / 2.0;
                ys[idx] = (ys[idx - 1] + ys[idx + 1]) / 2.0;
            }
        }
    }

    // Dimensions of the last surviving observation at or before `idx`, the
    // first one after it otherwise.
    fn box_size(&self, raw: &[Option<BBox<Ltrb>>], valid: &[usize], idx: usize) -> (f32, f32) {
        let after = valid.partition_point(|&v| v <= idx);
        let source = if after > 0 {
            valid.get(after - 1)
        } else {
            valid.first()
        };

        match source.and_then(|&i| raw[i]) {
            Some(b) => (b.width(), b.height()),
            None => (self.config.default_box_size, self.config.default_box_size),
        }
    }
}

// Linear interpolation between the nearest known neighbours, however far.
fn fill_linear(centers: &mut [Option<Center>], hit_frames: &BTreeSet<usize>) {
    let known: Vec<usize> = (0..centers.len()).filter(|&i| centers[i].is_some()).collect();

    for idx in 0..centers.len() {
        if centers[idx].is_some() || hit_frames.contains(&idx) {
            continue;
        }

        let after = known.partition_point(|&k| k < idx);
        if after == 0 || after == known.len() {
            continue;
        }

        let (prev, next) = (known[after - 1], known[after]);
        if let (Some(p), Some(q)) = (centers[prev], centers[next]) {
            let alpha = (idx - prev) as f64 / (next - prev) as f64;
            centers[idx] = Some((p.0 + alpha * (q.0 - p.0), p.1 + alpha * (q.1 - p.1)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ball(x: f32, y: f32) -> Option<BBox<Ltrb>> {
        Some(BBox::ltrb(x - 4.0, y - 4.0, x + 4.0, y + 4.0))
    }

    fn linear(n: usize) -> Vec<Option<BBox<Ltrb>>> {
        (0..n)
            .map(|i| ball(100.0 + 2.0 * i as f32, 200.0 + 3.0 * i as f32))
            .collect()
    }

    fn smoother() -> TrajectorySmoother {
        TrajectorySmoother::new(SmootherConfig::default())
    }

    #[test]
    fn clean_linear_input_is_unchanged() {
        let input = linear(40);
        let out = smoother().smooth(&input, &BTreeSet::new());

        assert_eq!(out.len(), 40);
        for (i, p) in out.positions.iter().enumerate() {
            let p = p.unwrap();
            assert!((p.center.x - (100.0 + 2.0 * i as f32)).abs() < 0.05);
            assert!((p.center.y - (200.0 + 3.0 * i as f32)).abs() < 0.05);
            assert!((p.bbox.width() - 8.0).abs() < 1e-3);
            assert!(p.observed);
        }

        let v = out.velocity.unwrap();
        assert!((v.mean - 13f64.sqrt()).abs() < 1e-3);
        assert!(v.std < 1e-3);
    }

    #[test]
    fn single_missing_frame_lies_between_neighbours() {
        let mut input = linear(40);
        input[20] = None;

        let out = smoother().smooth(&input, &BTreeSet::new());
        let p = out.get(20).unwrap();

        assert!(!p.observed);
        assert!(p.center.x > 138.0 && p.center.x < 142.0);
        assert!(p.center.y > 257.0 && p.center.y < 263.0);
    }

    #[test]
    fn vertical_outlier_is_replaced() {
        let mut input = linear(40);
        input[20] = ball(140.0, 900.0);

        let out = smoother().smooth(&input, &BTreeSet::new());
        let p = out.get(20).unwrap();

        assert!(!p.observed);
        assert!((p.center.y - 260.0).abs() < 5.0);
    }

    #[test]
    fn hit_frame_is_never_an_outlier() {
        let mut input = linear(40);
        input[20] = ball(140.0, 900.0);
        let hits: BTreeSet<usize> = [20].into_iter().collect();

        let out = smoother().smooth(&input, &hits);

        assert!(out.get(20).unwrap().observed);
    }

    #[test]
    fn sudden_speed_change_drops_both_sides_of_the_jump() {
        // 2 px/frame, then a 62 px step between frames 19 and 20
        let input: Vec<_> = (0..40)
            .map(|i| {
                let base = if i < 20 { 100.0 } else { 160.0 };
                let x = base + 2.0 * i as f32;
                ball(x, 200.0)
            })
            .collect();

        let out = smoother().smooth(&input, &BTreeSet::new());

        assert!(!out.get(19).unwrap().observed);
        assert!(!out.get(20).unwrap().observed);
        assert!(out.get(18).unwrap().observed);
        assert!(out.get(21).unwrap().observed);
    }

    #[test]
    fn long_hole_is_bridged_linearly() {
        let mut input: Vec<_> = (0..60)
            .map(|i| {
                let d = i as f32 - 27.0;
                ball(100.0 + 2.0 * i as f32, 100.0 + 0.5 * d * d)
            })
            .collect();
        for slot in &mut input[20..35] {
            *slot = None;
        }

        let out = smoother().smooth(&input, &BTreeSet::new());
        let p = out.get(27).unwrap();

        // the curve bottoms out at 100 here, the chord between frames 19 and 35 stays at 132
        assert!(!p.observed);
        assert!((p.center.y - 132.0).abs() < 1.0, "y = {}", p.center.y);
        assert!((p.center.x - 154.0).abs() < 1.0);
        assert!(out.get(19).unwrap().observed);
        assert!(out.get(35).unwrap().observed);
    }

    #[test]
    fn few_points_fall_back_to_linear() {
        let mut input = vec![None; 30];
        input[2] = ball(10.0, 10.0);
        input[27] = ball(60.0, 110.0);

        let out = smoother().smooth(&input, &BTreeSet::new());

        assert_eq!(out.len(), 30);
        let mid = out.get(14).unwrap();
        assert!(mid.center.x > 10.0 && mid.center.x < 60.0);
        assert!(mid.center.y > 10.0 && mid.center.y < 110.0);
    }

    #[test]
    fn nothing_observed_gives_empty_positions() {
        let out = smoother().smooth(&[None; 12], &BTreeSet::new());

        assert_eq!(out.len(), 12);
        assert!(out.positions.iter().all(Option::is_none));
        assert!(out.velocity.is_none());
    }

    #[test]
    fn velocity_spike_is_pulled_back() {
        let mut input: Vec<_> = (0..9).map(|i| ball(100.0 + i as f32, 100.0)).collect();
        input[4] = ball(400.0, 100.0);

        let out = smoother().smooth(&input, &BTreeSet::new());
        let p = out.get(4).unwrap();

        assert!(p.center.x < 400.0);
    }
}
