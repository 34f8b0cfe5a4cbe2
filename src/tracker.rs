use munkres::{solve_assignment, WeightMatrix};
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::config::{AssignmentStrategy, TrackerConfig};
use crate::track::Track;

const UNMATCHABLE_COST: f32 = 100_000.0;

/// Everything the identity tracker carries from one frame to the next.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrackerState {
    pub tracks: Vec<Track>,
    pub next_id: u32,
}

impl Default for TrackerState {
    fn default() -> Self {
        Self {
            tracks: Vec::with_capacity(8),
            next_id: 1,
        }
    }
}

impl TrackerState {
    fn spawn(&mut self, bbox: BBox<Ltrb>) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.push(Track::new(id, bbox));

        log::debug!("new track {}", id);

        id
    }

    // Counts completed frames without a match; a track past the ceiling is
    // gone before the next frame can claim it.
    fn age(&mut self, matched: &[u32], max_frames_missing: u32) {
        for t in &mut self.tracks {
            if !matched.contains(&t.id) {
                t.frames_missing += 1;
            }
        }

        self.tracks.retain(|t| {
            let alive = t.frames_missing <= max_frames_missing;
            if !alive {
                log::debug!("track {} lost after {} frames", t.id, t.frames_missing);
            }
            alive
        });
    }
}

/// Assigns persistent ids to per-frame player boxes by overlap continuity.
#[derive(Debug, Clone, Default)]
pub struct IdentityTracker {
    config: TrackerConfig,
    state: TrackerState,
}

impl IdentityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            state: TrackerState::default(),
        }
    }

    pub fn with_state(config: TrackerConfig, state: TrackerState) -> Self {
        Self { config, state }
    }

    #[inline]
    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    #[inline]
    pub fn into_state(self) -> TrackerState {
        self.state
    }

    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.state.tracks
    }

    pub fn reset(&mut self) {
        self.state = TrackerState::default();
    }

    /// Returns one id per input box, in input order.
    pub fn update(&mut self, boxes: &[BBox<Ltrb>]) -> Vec<u32> {
        let ids = match self.config.assignment {
            AssignmentStrategy::Greedy => self.assign_greedy(boxes),
            AssignmentStrategy::Global => self.assign_global(boxes),
        };

        self.state.age(&ids, self.config.max_frames_missing);

        ids
    }

    fn best_match(&self, bbox: &BBox<Ltrb>) -> Option<usize> {
        let mut best = None;
        let mut best_iou = 0.0;

        for (idx, t) in self.state.tracks.iter().enumerate() {
            let iou = bbox.iou(&t.last_box);
            if iou > best_iou && iou > self.config.iou_threshold {
                best_iou = iou;
                best = Some(idx);
            }
        }

        best
    }

    // Boxes may compete for the same track; a later box wins it.
    fn assign_greedy(&mut self, boxes: &[BBox<Ltrb>]) -> Vec<u32> {
        boxes
            .iter()
            .map(|bbox| match self.best_match(bbox) {
                Some(idx) => {
                    let t = &mut self.state.tracks[idx];
                    t.hit(*bbox);
                    t.id
                }
                None => self.state.spawn(*bbox),
            })
            .collect()
    }

    fn assign_global(&mut self, boxes: &[BBox<Ltrb>]) -> Vec<u32> {
        let n_tracks = self.state.tracks.len();
        let n = boxes.len().max(n_tracks);
        let mut ids: Vec<Option<u32>> = vec![None; boxes.len()];

        if n_tracks > 0 && !boxes.is_empty() {
            let ious: Vec<Vec<f32>> = self
                .state
                .tracks
                .iter()
                .map(|t| boxes.iter().map(|b| b.iou(&t.last_box)).collect())
                .collect();

            let mut mat = WeightMatrix::from_fn(n, |(r, c)| {
                if r < n_tracks && c < boxes.len() {
                    1.0 - ious[r][c]
                } else {
                    UNMATCHABLE_COST
                }
            });

            match solve_assignment(&mut mat) {
                Ok(positions) => {
                    for p in positions {
                        if p.row < n_tracks
                            && p.column < boxes.len()
                            && ious[p.row][p.column] > self.config.iou_threshold
                        {
                            let t = &mut self.state.tracks[p.row];
                            t.hit(boxes[p.column]);
                            ids[p.column] = Some(t.id);
                        }
                    }
                }
                Err(_) => {
                    log::warn!("assignment could not be solved, falling back to greedy");
                    return self.assign_greedy(boxes);
                }
            }
        }

        boxes
            .iter()
            .zip(ids)
            .map(|(bbox, id)| match id {
                Some(id) => id,
                None => self.state.spawn(*bbox),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player(x: f32) -> BBox<Ltrb> {
        BBox::ltrb(x, 100.0, x + 40.0, 200.0)
    }

    #[test]
    fn overlapping_box_keeps_id() {
        let mut tracker = IdentityTracker::new(TrackerConfig::default());

        let first = tracker.update(&[player(0.0)]);
        let second = tracker.update(&[player(5.0)]);

        assert_eq!(first, vec![1]);
        assert_eq!(second, vec![1]);
    }

    #[test]
    fn low_overlap_allocates_new_id() {
        let mut tracker = IdentityTracker::new(TrackerConfig::default());

        tracker.update(&[player(0.0)]);
        // iou = 10*100 / (4000 + 4000 - 1000) < 0.3
        let ids = tracker.update(&[player(30.0)]);

        assert_eq!(ids, vec![2]);
    }

    #[test]
    fn track_survives_ten_missing_frames() {
        let mut tracker = IdentityTracker::new(TrackerConfig::default());
        tracker.update(&[player(0.0)]);

        for _ in 0..10 {
            tracker.update(&[]);
        }

        assert_eq!(tracker.tracks().len(), 1);
        assert_eq!(tracker.tracks()[0].frames_missing, 10);
        assert_eq!(tracker.update(&[player(0.0)]), vec![1]);
    }

    #[test]
    fn track_dropped_after_eleven_missing_frames() {
        let mut tracker = IdentityTracker::new(TrackerConfig::default());
        tracker.update(&[player(0.0)]);

        for _ in 0..11 {
            tracker.update(&[]);
        }

        assert!(tracker.tracks().is_empty());
        // ids are never reused
        assert_eq!(tracker.update(&[player(0.0)]), vec![2]);
    }

    #[test]
    fn greedy_lets_later_box_steal_track() {
        let mut tracker = IdentityTracker::new(TrackerConfig::default());
        tracker.update(&[player(0.0)]);

        let ids = tracker.update(&[player(2.0), player(4.0)]);

        assert_eq!(ids, vec![1, 1]);
    }

    #[test]
    fn global_assignment_is_one_to_one() {
        let config = TrackerConfig {
            assignment: AssignmentStrategy::Global,
            ..Default::default()
        };
        let mut tracker = IdentityTracker::new(config);
        tracker.update(&[player(0.0), player(300.0)]);

        let ids = tracker.update(&[player(302.0), player(2.0), player(4.0)]);

        assert_eq!(ids[0], 2);
        assert_eq!(ids[1], 1);
        assert_eq!(ids[2], 3);
    }

    #[test]
    fn state_round_trips_through_tracker() {
        let mut tracker = IdentityTracker::new(TrackerConfig::default());
        tracker.update(&[player(0.0)]);

        let state = tracker.into_state();
        let mut tracker = IdentityTracker::with_state(TrackerConfig::default(), state);

        assert_eq!(tracker.update(&[player(1.0)]), vec![1]);
    }
}
