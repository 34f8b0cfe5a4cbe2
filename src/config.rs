use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::error::Error;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStrategy {
    /// Every box independently takes its best-overlapping track.
    #[default]
    Greedy,
    /// One-to-one assignment maximising total overlap over the frame.
    Global,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub iou_threshold: f32,
    pub max_frames_missing: u32,
    pub assignment: AssignmentStrategy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            max_frames_missing: 10,
            assignment: AssignmentStrategy::Greedy,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct HitConfig {
    pub minimum_change_frames: usize,
    pub rolling_window: usize,
    /// Known (x1, y1) box corners produced by sensor artifacts.
    pub artifact_points: Vec<[f32; 2]>,
}

impl Default for HitConfig {
    fn default() -> Self {
        Self {
            minimum_change_frames: 25,
            rolling_window: 5,
            artifact_points: Vec::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct SmootherConfig {
    pub outlier_window: usize,
    pub max_vertical_deviation: f64,
    pub max_acceleration: f64,
    pub max_gap: usize,
    pub max_velocity: f64,
    pub spline_smoothing: f64,
    pub savgol_window: usize,
    pub savgol_order: usize,
    pub default_box_size: f32,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            outlier_window: 5,
            max_vertical_deviation: 100.0,
            max_acceleration: 50.0,
            max_gap: 10,
            max_velocity: 80.0,
            spline_smoothing: 0.1,
            savgol_window: 15,
            savgol_order: 3,
            default_box_size: 10.0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CourtConfig {
    pub canvas_width: f32,
    pub canvas_height: f32,
    pub buffer: f32,
    pub padding: f32,
    pub perspective_divisor: f32,
    pub height_window_before: usize,
    pub height_window_after: usize,
    pub trail_length: usize,
    pub smoothing_window: usize,
    pub blend: f32,
    pub min_movement: f32,
    pub default_player_height: f32,
    pub player_heights: BTreeMap<u32, f32>,
}

impl CourtConfig {
    #[inline]
    pub fn player_height(&self, id: u32) -> f32 {
        self.player_heights
            .get(&id)
            .copied()
            .unwrap_or(self.default_player_height)
    }
}

impl Default for CourtConfig {
    fn default() -> Self {
        let mut player_heights = BTreeMap::new();
        player_heights.insert(1, 1.88);
        player_heights.insert(2, 1.91);

        Self {
            canvas_width: 250.0,
            canvas_height: 500.0,
            buffer: 50.0,
            padding: 20.0,
            perspective_divisor: 1000.0,
            height_window_before: 20,
            height_window_after: 50,
            trail_length: 10,
            smoothing_window: 10,
            blend: 0.7,
            min_movement: 1.0,
            default_player_height: 1.88,
            player_heights,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KinematicsConfig {
    pub fps: f32,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self { fps: 30.0 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: String,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
}

impl DetectorConfig {
    pub fn new(model_path: &str, confidence_threshold: f32) -> Self {
        Self {
            model_path: model_path.to_string(),
            confidence_threshold,
            nms_iou_threshold: 0.5,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self::new("", 0.5)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetectorsConfig {
    pub ball: DetectorConfig,
    pub player: DetectorConfig,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            ball: DetectorConfig::new("models/ball.onnx", 0.5),
            player: DetectorConfig::new("models/player.onnx", 0.6),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub tracker: TrackerConfig,
    pub hits: HitConfig,
    pub smoother: SmootherConfig,
    pub court: CourtConfig,
    pub kinematics: KinematicsConfig,
    pub detectors: DetectorsConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let contents = fs::read_to_string(path)?;

        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, Error> {
        let config: Config = serde_yaml::from_str(contents)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.kinematics.fps < 0.0 {
            return Err(Error::Config(format!(
                "fps must not be negative, got {}",
                self.kinematics.fps
            )));
        }

        if self.hits.rolling_window == 0 {
            return Err(Error::Config("hits.rolling_window must be positive".into()));
        }

        if self.smoother.savgol_order == 0 {
            return Err(Error::Config("smoother.savgol_order must be positive".into()));
        }

        if self.court.canvas_width <= 2.0 * self.court.padding {
            return Err(Error::Config(
                "court.canvas_width must exceed twice the padding".into(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "tracker:\n  assignment: global\nkinematics:\n  fps: 25.0\ncourt:\n  player_heights:\n    7: 1.75\n",
        )
        .unwrap();

        assert_eq!(config.tracker.assignment, AssignmentStrategy::Global);
        assert_eq!(config.tracker.max_frames_missing, 10);
        assert_eq!(config.kinematics.fps, 25.0);
        assert_eq!(config.court.player_height(7), 1.75);
        assert_eq!(config.court.player_height(3), 1.88);
        assert_eq!(config.hits.minimum_change_frames, 25);
    }

    #[test]
    fn rejects_negative_fps() {
        let res = Config::from_yaml("kinematics:\n  fps: -1.0\n");

        assert!(matches!(res, Err(Error::Config(_))));
    }
}
