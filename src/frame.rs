use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};
use crate::court::CourtKeypoints;
use crate::detection::Detection;
use crate::detector::best_ball;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Frame {
    pub index: usize,
    pub dims: (u32, u32),
    pub detections: Vec<Detection>,
    #[serde(default)]
    pub keypoints: Option<CourtKeypoints>,
}

impl Frame {
    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn player_boxes(&self) -> Vec<BBox<Ltrb>> {
        self.iter()
            .filter(|d| d.is_player())
            .map(|d| d.bbox)
            .collect()
    }

    /// Highest-confidence ball on this frame, if any.
    pub fn ball_box(&self) -> Option<BBox<Ltrb>> {
        best_ball(&self.detections).map(|d| d.bbox)
    }
}
