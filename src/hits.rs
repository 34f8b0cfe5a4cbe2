use ndarray::Array1;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::bbox::{BBox, Ltrb};
use crate::cache::{HitCache, KeyValueStore};
use crate::config::HitConfig;
use crate::error::Error;
use crate::math::fill_gaps;
use crate::rolling_avg::rolling_mean;

/// Frames where the ball sustainably reverses its vertical motion, together
/// with the (gap-filled) ball box observed at each of them.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct HitRecord {
    pub frames: Vec<usize>,
    pub known_positions: BTreeMap<usize, BBox<Ltrb>>,
}

impl HitRecord {
    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[inline]
    pub fn contains(&self, frame: usize) -> bool {
        self.frames.binary_search(&frame).is_ok()
    }

    /// Whether the record can describe a video of `frame_count` frames:
    /// hit frames strictly increasing and all inside the video.
    pub fn fits(&self, frame_count: usize) -> bool {
        self.frames.windows(2).all(|w| w[0] < w[1])
            && self.frames.last().map_or(true, |&f| f < frame_count)
            && self
                .known_positions
                .keys()
                .next_back()
                .map_or(true, |&f| f < frame_count)
    }

    pub fn frame_set(&self) -> BTreeSet<usize> {
        self.frames.iter().copied().collect()
    }

    /// Puts the known box back on hit frames the detector missed.
    pub fn restore_known_positions(&self, observations: &mut [Option<BBox<Ltrb>>]) -> usize {
        let mut restored = 0;

        for (&frame, bbox) in &self.known_positions {
            if let Some(slot @ None) = observations.get_mut(frame) {
                *slot = Some(*bbox);
                restored += 1;
            }
        }

        restored
    }
}

/// Rejects ball boxes known to come from sensor artifacts.
pub trait ArtifactFilter {
    fn is_artifact(&self, bbox: &BBox<Ltrb>) -> bool;
}

impl<F: Fn(&BBox<Ltrb>) -> bool> ArtifactFilter for F {
    #[inline]
    fn is_artifact(&self, bbox: &BBox<Ltrb>) -> bool {
        self(bbox)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoArtifacts;

impl ArtifactFilter for NoArtifacts {
    #[inline]
    fn is_artifact(&self, _bbox: &BBox<Ltrb>) -> bool {
        false
    }
}

/// Matches boxes whose top-left corner sits on one of the given points.
#[derive(Debug, Clone, Default)]
pub struct KnownArtifacts {
    points: Vec<[f32; 2]>,
}

impl KnownArtifacts {
    pub fn new(points: Vec<[f32; 2]>) -> Self {
        Self { points }
    }
}

#[inline]
fn is_close(a: f32, b: f32) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

impl ArtifactFilter for KnownArtifacts {
    fn is_artifact(&self, bbox: &BBox<Ltrb>) -> bool {
        self.points
            .iter()
            .any(|p| is_close(bbox.left(), p[0]) && is_close(bbox.top(), p[1]))
    }
}

pub struct HitDetector<A: ArtifactFilter = KnownArtifacts> {
    config: HitConfig,
    artifacts: A,
}

impl HitDetector<KnownArtifacts> {
    pub fn new(config: HitConfig) -> Self {
        let artifacts = KnownArtifacts::new(config.artifact_points.clone());

        Self { config, artifacts }
    }
}

impl<A: ArtifactFilter> HitDetector<A> {
    pub fn with_filter(config: HitConfig, artifacts: A) -> Self {
        Self { config, artifacts }
    }

    /// Returns the cached record unless `recompute` is set or the cache has
    /// nothing usable, in which case the record is computed and stored.
    pub fn detect_cached<S: KeyValueStore>(
        &self,
        positions: &[Option<BBox<Ltrb>>],
        cache: &mut HitCache<S>,
        recompute: bool,
    ) -> Result<HitRecord, Error> {
        if !recompute {
            match cache.load() {
                Some(record) if record.fits(positions.len()) => {
                    log::debug!("reusing {} cached hit frames", record.len());
                    return Ok(record);
                }
                Some(_) => {
                    log::warn!(
                        "cached hit frames do not fit {} frames, recomputing",
                        positions.len()
                    );
                }
                None => {}
            }
        }

        let record = self.detect(positions);
        cache.save(&record)?;

        Ok(record)
    }

    pub fn detect(&self, positions: &[Option<BBox<Ltrb>>]) -> HitRecord {
        let columns: Option<Vec<Array1<f64>>> = (0..4)
            .map(|c| {
                let series: Vec<Option<f64>> = positions
                    .iter()
                    .map(|p| p.map(|b| b.as_slice()[c] as f64))
                    .collect();

                fill_gaps(&series)
            })
            .collect();

        let columns = match columns {
            Some(columns) => columns,
            None => return HitRecord::default(),
        };

        let mid_y = (&columns[1] + &columns[3]) / 2.0;
        let rolled = rolling_mean(&mid_y, self.config.rolling_window);

        let mut delta = Array1::zeros(rolled.len());
        for i in 1..rolled.len() {
            delta[i] = rolled[i] - rolled[i - 1];
        }

        let filled_box = |i: usize| {
            BBox::ltrb(
                columns[0][i] as f32,
                columns[1][i] as f32,
                columns[2][i] as f32,
                columns[3][i] as f32,
            )
        };

        let mut record = HitRecord::default();

        for i in self.reversals(&delta) {
            let bbox = filled_box(i);

            if self.artifacts.is_artifact(&bbox) {
                log::debug!("dropping hit at frame {}: sensor artifact", i);
                continue;
            }

            record.frames.push(i);
            record.known_positions.insert(i, bbox);
        }

        log::info!(
            "detected {} ball hits over {} frames",
            record.len(),
            positions.len()
        );

        record
    }

    // Frames where the vertical delta flips sign and the new direction holds
    // for most of the following look-ahead span.
    fn reversals(&self, delta: &Array1<f64>) -> Vec<usize> {
        let min_change = self.config.minimum_change_frames;
        let span = ((min_change as f64 * 1.2) as usize).max(1);
        let n = delta.len();

        let mut frames = Vec::new();

        for i in 1..n.saturating_sub(span) {
            let falling = delta[i] > 0.0 && delta[i + 1] < 0.0;
            let rising = delta[i] < 0.0 && delta[i + 1] > 0.0;

            if !(falling || rising) {
                continue;
            }

            let count = (i + 1..(i + span + 1).min(n))
                .filter(|&f| (falling && delta[f] < 0.0) || (rising && delta[f] > 0.0))
                .count();

            if count + 1 > min_change {
                frames.push(i);
            }
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;

    fn ball_at(y: f32) -> Option<BBox<Ltrb>> {
        Some(BBox::ltrb(500.0, y - 5.0, 510.0, y + 5.0))
    }

    fn reversal_series() -> Vec<Option<BBox<Ltrb>>> {
        (0..80)
            .map(|i| {
                let y = if i <= 30 {
                    100.0 + 10.0 * i as f32
                } else {
                    400.0 - 10.0 * (i - 30) as f32
                };
                ball_at(y)
            })
            .collect()
    }

    #[test]
    fn sustained_reversal_is_a_hit() {
        let record = HitDetector::new(HitConfig::default()).detect(&reversal_series());

        assert_eq!(record.len(), 1);
        let frame = record.frames[0];
        assert!((30..=34).contains(&frame), "hit at {}", frame);
        assert!(record.known_positions.contains_key(&frame));
    }

    #[test]
    fn single_frame_jitter_is_ignored() {
        let mut series: Vec<_> = (0..80).map(|_| ball_at(300.0)).collect();
        series[30] = ball_at(320.0);

        let detector = HitDetector::new(HitConfig::default());
        assert!(detector.detect(&series).is_empty());

        // direction flips every frame but never holds
        let alternating: Vec<_> = (0..80)
            .map(|i| ball_at(300.0 + 6.0 * (i % 2) as f32))
            .collect();
        assert!(detector.detect(&alternating).is_empty());
    }

    #[test]
    fn missing_positions_are_interpolated() {
        let mut series = reversal_series();
        for i in (5..70).step_by(3) {
            series[i] = None;
        }
        series[0] = None;

        let record = HitDetector::new(HitConfig::default()).detect(&series);

        assert_eq!(record.len(), 1);
    }

    #[test]
    fn artifact_filter_drops_hits() {
        let detector =
            HitDetector::with_filter(HitConfig::default(), |b: &BBox<Ltrb>| b.left() == 500.0);

        assert!(detector.detect(&reversal_series()).is_empty());
    }

    #[test]
    fn empty_input_has_no_hits() {
        let detector = HitDetector::new(HitConfig::default());

        assert!(detector.detect(&[]).is_empty());
        assert!(detector.detect(&[None, None]).is_empty());
    }

    #[test]
    fn cache_is_reused_unless_forced() {
        let detector = HitDetector::new(HitConfig::default());
        let mut cache = HitCache::new(MemoryStore::new(), "rally");

        let first = detector
            .detect_cached(&reversal_series(), &mut cache, false)
            .unwrap();
        assert_eq!(first.len(), 1);

        // stale input is ignored while the cache holds a record
        let flat: Vec<_> = (0..80).map(|_| ball_at(100.0)).collect();
        let cached = detector.detect_cached(&flat, &mut cache, false).unwrap();
        assert_eq!(cached, first);

        let forced = detector.detect_cached(&flat, &mut cache, true).unwrap();
        assert!(forced.is_empty());
        assert!(cache.load().unwrap().is_empty());
    }

    #[test]
    fn record_that_does_not_fit_is_recomputed() {
        let detector = HitDetector::new(HitConfig::default());
        let mut cache = HitCache::new(MemoryStore::new(), "rally");

        let mut long = HitRecord::default();
        long.frames = vec![5, 80];
        cache.save(&long).unwrap();
        let fresh = detector
            .detect_cached(&reversal_series(), &mut cache, false)
            .unwrap();
        assert_eq!(fresh.len(), 1);
        assert!(fresh.fits(80));

        let mut unsorted = HitRecord::default();
        unsorted.frames = vec![40, 10, 10];
        assert!(!unsorted.fits(80));
        cache.save(&unsorted).unwrap();
        let fresh = detector
            .detect_cached(&reversal_series(), &mut cache, false)
            .unwrap();
        assert_eq!(cache.load(), Some(fresh));
    }

    #[test]
    fn restore_fills_only_missing_hit_frames() {
        let mut record = HitRecord::default();
        record.frames = vec![1, 2];
        record.known_positions.insert(1, BBox::ltrb(0.0, 0.0, 1.0, 1.0));
        record.known_positions.insert(2, BBox::ltrb(5.0, 5.0, 6.0, 6.0));

        let mut obs = vec![None, None, ball_at(10.0)];
        let restored = record.restore_known_positions(&mut obs);

        assert_eq!(restored, 1);
        assert_eq!(obs[1], Some(BBox::ltrb(0.0, 0.0, 1.0, 1.0)));
        assert_eq!(obs[2], ball_at(10.0));
    }
}
