use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::KinematicsConfig;
use crate::court::{CourtPositions, MiniCourt};

const MPS_TO_KMH: f32 = 3.6;

/// Running speed totals of one player.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayerSpeedStat {
    pub shot_count: u32,
    pub total_shot_speed: f32,
    pub last_shot_speed: f32,
    pub total_player_speed: f32,
    pub last_player_speed: f32,
    pub speed_sample_count: u32,
}

impl PlayerSpeedStat {
    pub fn avg_shot_speed(&self) -> f32 {
        if self.shot_count == 0 {
            0.0
        } else {
            self.total_shot_speed / self.shot_count as f32
        }
    }

    pub fn avg_player_speed(&self) -> f32 {
        if self.speed_sample_count == 0 {
            0.0
        } else {
            self.total_player_speed / self.speed_sample_count as f32
        }
    }

    fn record_shot(&mut self, shot_speed: f32, own_speed: f32) {
        self.shot_count += 1;
        self.total_shot_speed += shot_speed;
        self.last_shot_speed = shot_speed;
        self.record_movement(own_speed);
    }

    fn record_movement(&mut self, speed: f32) {
        self.total_player_speed += speed;
        self.last_player_speed = speed;
        self.speed_sample_count += 1;
    }
}

/// Speeds measured between two consecutive hits, all in km/h.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ShotMeasurement {
    pub striker: u32,
    pub shot_speed: f32,
    pub striker_speed: f32,
    pub opponent: u32,
    pub opponent_speed: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ZeroElapsed,
    BallMissing,
    NoPlayers,
    OpponentMissing,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SkipReason::ZeroElapsed => "no time elapsed",
            SkipReason::BallMissing => "ball position missing",
            SkipReason::NoPlayers => "no players on court",
            SkipReason::OpponentMissing => "opponent position missing",
        };

        f.write_str(msg)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub enum IntervalOutcome {
    Measured(ShotMeasurement),
    Skipped(SkipReason),
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ShotInterval {
    pub start: usize,
    pub end: usize,
    pub outcome: IntervalOutcome,
}

/// Per-frame snapshot of every player's running statistics.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StatsTable {
    rows: Vec<BTreeMap<u32, PlayerSpeedStat>>,
}

impl StatsTable {
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn at(&self, frame: usize) -> Option<&BTreeMap<u32, PlayerSpeedStat>> {
        self.rows.get(frame)
    }

    pub fn player(&self, frame: usize, id: u32) -> Option<&PlayerSpeedStat> {
        self.rows.get(frame)?.get(&id)
    }

    pub fn last(&self) -> Option<&BTreeMap<u32, PlayerSpeedStat>> {
        self.rows.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BTreeMap<u32, PlayerSpeedStat>> {
        self.rows.iter()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Kinematics {
    pub intervals: Vec<ShotInterval>,
    pub table: StatsTable,
}

pub struct KinematicsAggregator {
    config: KinematicsConfig,
}

impl KinematicsAggregator {
    pub fn new(config: KinematicsConfig) -> Self {
        Self { config }
    }

    /// Speed in km/h of covering `pixels` of the court diagram in `seconds`.
    fn speed(&self, court: &MiniCourt, pixels: f32, seconds: f32) -> f32 {
        court.pixels_to_meters(pixels) / seconds * MPS_TO_KMH
    }

    pub fn measure(
        &self,
        start: usize,
        end: usize,
        positions: &[CourtPositions],
        court: &MiniCourt,
    ) -> IntervalOutcome {
        use IntervalOutcome::Skipped;

        let seconds = if self.config.fps > 0.0 {
            end.saturating_sub(start) as f32 / self.config.fps
        } else {
            0.0
        };

        if seconds <= 0.0 {
            return Skipped(SkipReason::ZeroElapsed);
        }

        let at = |frame: usize| positions.get(frame);
        let ball = |frame: usize| at(frame).and_then(|p| p.ball);

        let (ball_start, ball_end) = match (ball(start), ball(end)) {
            (Some(a), Some(b)) => (a, b),
            _ => return Skipped(SkipReason::BallMissing),
        };

        let players = match at(start) {
            Some(p) if !p.players.is_empty() => &p.players,
            _ => return Skipped(SkipReason::NoPlayers),
        };

        let by_distance = |a: &(&u32, &na::Point2<f32>), b: &(&u32, &na::Point2<f32>)| {
            let da = na::distance(a.1, &ball_start);
            let db = na::distance(b.1, &ball_start);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        };

        let striker = match players.iter().min_by(by_distance) {
            Some((&id, _)) => id,
            None => return Skipped(SkipReason::NoPlayers),
        };

        let opponent = match players.iter().filter(|(&id, _)| id != striker).max_by(by_distance) {
            Some((&id, _)) => id,
            None => return Skipped(SkipReason::OpponentMissing),
        };

        let moved = |id: u32| {
            let from = players.get(&id)?;
            let to = at(end)?.players.get(&id)?;
            Some(na::distance(from, to))
        };

        let opponent_speed = match moved(opponent) {
            Some(d) => self.speed(court, d, seconds),
            None => return Skipped(SkipReason::OpponentMissing),
        };

        let striker_speed = moved(striker).map_or(0.0, |d| self.speed(court, d, seconds));
        let shot_speed = self.speed(court, na::distance(&ball_start, &ball_end), seconds);

        IntervalOutcome::Measured(ShotMeasurement {
            striker,
            shot_speed,
            striker_speed,
            opponent,
            opponent_speed,
        })
    }

    /// Folds every consecutive pair of `hits` into running per-player totals
    /// and spreads them over `positions.len()` frames.
    pub fn aggregate(
        &self,
        hits: &[usize],
        positions: &[CourtPositions],
        court: &MiniCourt,
    ) -> Kinematics {
        let mut running: BTreeMap<u32, PlayerSpeedStat> = positions
            .iter()
            .flat_map(|p| p.players.keys().copied())
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .map(|id| (id, PlayerSpeedStat::default()))
            .collect();

        let mut snapshots: BTreeMap<usize, BTreeMap<u32, PlayerSpeedStat>> = BTreeMap::new();
        snapshots.insert(0, running.clone());

        let mut intervals = Vec::with_capacity(hits.len().saturating_sub(1));

        for pair in hits.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            let outcome = self.measure(start, end, positions, court);

            match &outcome {
                IntervalOutcome::Measured(m) => {
                    running
                        .entry(m.striker)
                        .or_default()
                        .record_shot(m.shot_speed, m.striker_speed);
                    running.entry(m.opponent).or_default().record_movement(m.opponent_speed);

                    snapshots.insert(start, running.clone());
                }
                IntervalOutcome::Skipped(reason) => {
                    log::debug!("skipping shot {}..{}: {}", start, end, reason);
                }
            }

            intervals.push(ShotInterval { start, end, outcome });
        }

        let mut rows = Vec::with_capacity(positions.len());
        let mut current = BTreeMap::new();
        for frame in 0..positions.len() {
            if let Some(snapshot) = snapshots.get(&frame) {
                current = snapshot.clone();
            }
            rows.push(current.clone());
        }

        Kinematics {
            intervals,
            table: StatsTable { rows },
        }
    }
}
