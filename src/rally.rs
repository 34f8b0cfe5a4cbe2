use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::bbox::{BBox, Ltrb};
use crate::cache::{HitCache, KeyValueStore};
use crate::config::Config;
use crate::court::{CourtKeypoints, CourtMapper, CourtPositions, MiniCourt, PlayerBoxes};
use crate::error::Error;
use crate::frame::Frame;
use crate::hits::{ArtifactFilter, HitDetector, HitRecord, KnownArtifacts};
use crate::kinematics::{Kinematics, KinematicsAggregator};
use crate::smoother::{SmoothedBallPosition, TrajectorySmoother, VelocityStats};
use crate::tracker::IdentityTracker;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct MatchSummary {
    pub total_hits: usize,
    pub hits_per_player: BTreeMap<u32, usize>,
    pub total_frames: usize,
    pub duration_secs: f32,
    pub fps: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RallyReport {
    pub hits: HitRecord,
    /// `true` on every hit frame.
    pub hit_frames: Vec<bool>,
    /// Player credited with each hit.
    pub strikers: BTreeMap<usize, u32>,
    pub players: Vec<PlayerBoxes>,
    pub ball: Vec<Option<SmoothedBallPosition>>,
    pub ball_velocity: Option<VelocityStats>,
    pub court: Vec<CourtPositions>,
    pub kinematics: Kinematics,
    pub summary: MatchSummary,
}

impl RallyReport {
    pub fn track_ids(&self) -> BTreeSet<u32> {
        self.players
            .iter()
            .flat_map(|boxes| boxes.keys().copied())
            .collect()
    }
}

/// Runs the whole per-video pipeline over an ordered frame sequence.
pub struct RallyAnalyzer<A: ArtifactFilter = KnownArtifacts> {
    config: Config,
    hits: HitDetector<A>,
}

impl RallyAnalyzer<KnownArtifacts> {
    pub fn new(config: Config) -> Result<Self, Error> {
        config.validate()?;
        let hits = HitDetector::new(config.hits.clone());

        Ok(Self { config, hits })
    }
}

impl<A: ArtifactFilter> RallyAnalyzer<A> {
    pub fn with_artifact_filter(config: Config, artifacts: A) -> Result<Self, Error> {
        config.validate()?;
        let hits = HitDetector::with_filter(config.hits.clone(), artifacts);

        Ok(Self { config, hits })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn analyze(&self, frames: &[Frame]) -> Result<RallyReport, Error> {
        check_sequence(frames)?;

        let observations: Vec<_> = frames.iter().map(Frame::ball_box).collect();
        let hits = self.hits.detect(&observations);

        Ok(self.run(frames, observations, hits))
    }

    /// Like [`analyze`](Self::analyze), but hit events come from `cache`
    /// unless it is empty or `recompute` is set.
    pub fn analyze_cached<S: KeyValueStore>(
        &self,
        frames: &[Frame],
        cache: &mut HitCache<S>,
        recompute: bool,
    ) -> Result<RallyReport, Error> {
        check_sequence(frames)?;

        let observations: Vec<_> = frames.iter().map(Frame::ball_box).collect();
        let hits = self.hits.detect_cached(&observations, cache, recompute)?;

        Ok(self.run(frames, observations, hits))
    }

    fn run(
        &self,
        frames: &[Frame],
        mut observations: Vec<Option<BBox<Ltrb>>>,
        hits: HitRecord,
    ) -> RallyReport {
        let n = frames.len();
        log::info!("analyzing rally of {} frames", n);

        let players = self.track_players(frames);

        let restored = hits.restore_known_positions(&mut observations);
        if restored > 0 {
            log::debug!("restored {} known ball positions", restored);
        }

        let smoothed = TrajectorySmoother::new(self.config.smoother.clone())
            .smooth(&observations, &hits.frame_set());

        let mut mapper = CourtMapper::new(self.config.court.clone());
        let mut keypoints: Option<CourtKeypoints> = None;
        let mut court = Vec::with_capacity(n);

        for (idx, frame) in frames.iter().enumerate() {
            if frame.keypoints.is_some() {
                keypoints = frame.keypoints;
            }

            let positions = match &keypoints {
                Some(kp) => {
                    let ball = smoothed.get(idx).map(|p| &p.bbox);
                    mapper.map_frame(idx, frame.dims, &players, ball, kp)
                }
                None => CourtPositions::default(),
            };

            court.push(positions);
        }

        let diagram = match mapper.court() {
            Some(c) => c.clone(),
            None => MiniCourt::new(frames[0].dims, &self.config.court),
        };

        let kinematics = KinematicsAggregator::new(self.config.kinematics.clone())
            .aggregate(&hits.frames, &court, &diagram);

        let strikers: BTreeMap<usize, u32> = hits
            .frames
            .iter()
            .filter_map(|&f| {
                let ball = smoothed.get(f).map(|p| p.center);
                striker_at(court.get(f)?, players.get(f)?, ball).map(|id| (f, id))
            })
            .collect();

        let mut hits_per_player = BTreeMap::new();
        for id in strikers.values() {
            *hits_per_player.entry(*id).or_insert(0) += 1;
        }

        let fps = self.config.kinematics.fps;
        let summary = MatchSummary {
            total_hits: hits.len(),
            hits_per_player,
            total_frames: n,
            duration_secs: if fps > 0.0 { n as f32 / fps } else { 0.0 },
            fps,
        };

        log::info!(
            "rally done: {} hits, {} players tracked",
            summary.total_hits,
            players.iter().flat_map(|p| p.keys()).collect::<BTreeSet<_>>().len()
        );

        RallyReport {
            hit_frames: (0..n).map(|f| hits.contains(f)).collect(),
            hits,
            strikers,
            players,
            ball: smoothed.positions,
            ball_velocity: smoothed.velocity,
            court,
            kinematics,
            summary,
        }
    }

    fn track_players(&self, frames: &[Frame]) -> Vec<PlayerBoxes> {
        let mut tracker = IdentityTracker::new(self.config.tracker.clone());

        frames
            .iter()
            .map(|frame| {
                let boxes = frame.player_boxes();
                let ids = tracker.update(&boxes);

                ids.into_iter().zip(boxes).collect::<PlayerBoxes>()
            })
            .collect()
    }
}

fn check_sequence(frames: &[Frame]) -> Result<(), Error> {
    if frames.is_empty() {
        return Err(Error::FrameSource("no frames to analyze".into()));
    }

    for (expected, frame) in frames.iter().enumerate() {
        if frame.index != expected {
            return Err(Error::FrameSource(format!(
                "frame {} found at position {}",
                frame.index, expected
            )));
        }
    }

    Ok(())
}

// Closest player on the court diagram, or in the frame when the diagram
// has nothing.
fn striker_at(
    court: &CourtPositions,
    players: &PlayerBoxes,
    ball: Option<na::Point2<f32>>,
) -> Option<u32> {
    let nearest = |target: na::Point2<f32>, points: Vec<(u32, na::Point2<f32>)>| {
        points
            .into_iter()
            .min_by(|a, b| {
                let da = na::distance(&a.1, &target);
                let db = na::distance(&b.1, &target);
                da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|(id, _)| id)
    };

    if let Some(ball) = court.ball {
        if !court.players.is_empty() {
            return nearest(ball, court.players.iter().map(|(&id, &p)| (id, p)).collect());
        }
    }

    let ball = ball?;
    nearest(ball, players.iter().map(|(&id, b)| (id, b.center())).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Detection, ObjectClass};

    fn frame(index: usize, detections: Vec<Detection>) -> Frame {
        Frame {
            index,
            dims: (1280, 720),
            detections,
            keypoints: None,
        }
    }

    #[test]
    fn empty_input_is_a_frame_source_error() {
        let analyzer = RallyAnalyzer::new(Config::default()).unwrap();

        assert!(matches!(analyzer.analyze(&[]), Err(Error::FrameSource(_))));
    }

    #[test]
    fn out_of_order_frames_are_rejected() {
        let analyzer = RallyAnalyzer::new(Config::default()).unwrap();
        let frames = vec![frame(0, vec![]), frame(2, vec![])];

        assert!(matches!(analyzer.analyze(&frames), Err(Error::FrameSource(_))));
    }

    #[test]
    fn invalid_config_is_refused() {
        let mut config = Config::default();
        config.kinematics.fps = -1.0;

        assert!(RallyAnalyzer::new(config).is_err());
    }

    #[test]
    fn striker_falls_back_to_frame_space() {
        let mut players = PlayerBoxes::new();
        players.insert(1, BBox::ltrb(0.0, 0.0, 10.0, 10.0));
        players.insert(2, BBox::ltrb(100.0, 100.0, 110.0, 110.0));

        let id = striker_at(
            &CourtPositions::default(),
            &players,
            Some(na::Point2::new(95.0, 95.0)),
        );

        assert_eq!(id, Some(2));
        assert_eq!(striker_at(&CourtPositions::default(), &players, None), None);
    }

    #[test]
    fn report_reads_back_from_json() {
        let analyzer = RallyAnalyzer::new(Config::default()).unwrap();
        let player = Detection::new(
            BBox::ltrb(100.0, 100.0, 140.0, 200.0),
            0.9,
            ObjectClass::Player,
            0,
        );
        let frames: Vec<_> = (0..5).map(|i| frame(i, vec![player])).collect();
        let report = analyzer.analyze(&frames).unwrap();

        let json = serde_json::to_string(&report).unwrap();
        let back: RallyReport = serde_json::from_str(&json).unwrap();

        assert_eq!(back.summary, report.summary);
        assert_eq!(back.hits, report.hits);
        assert_eq!(back.players, report.players);
        assert_eq!(back.kinematics, report.kinematics);
    }

    #[test]
    fn frames_without_ball_still_report() {
        let analyzer = RallyAnalyzer::new(Config::default()).unwrap();
        let player = Detection::new(
            BBox::ltrb(100.0, 100.0, 140.0, 200.0),
            0.9,
            ObjectClass::Player,
            0,
        );
        let frames: Vec<_> = (0..5).map(|i| frame(i, vec![player])).collect();

        let report = analyzer.analyze(&frames).unwrap();

        assert_eq!(report.ball.len(), 5);
        assert!(report.ball.iter().all(Option::is_none));
        assert_eq!(report.track_ids().len(), 1);
        assert_eq!(report.summary.total_hits, 0);
        assert!((report.summary.duration_secs - 5.0 / 30.0).abs() < 1e-6);
    }
}
