use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Player,
    Ball,
}

/// Detector output for one object on one frame
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BBox<Ltrb>,
    #[serde(rename = "p")]
    pub confidence: f32,
    #[serde(rename = "c")]
    pub class: ObjectClass,
    #[serde(rename = "f", default)]
    pub frame_index: usize,
}

impl Detection {
    #[inline]
    pub fn new(bbox: BBox<Ltrb>, confidence: f32, class: ObjectClass, frame_index: usize) -> Self {
        Self {
            bbox,
            confidence,
            class,
            frame_index,
        }
    }

    #[inline(always)]
    pub fn is_player(&self) -> bool {
        self.class == ObjectClass::Player
    }

    #[inline(always)]
    pub fn is_ball(&self) -> bool {
        self.class == ObjectClass::Ball
    }

    #[inline]
    pub fn iou(&self, other: &Detection) -> f32 {
        self.bbox.iou(&other.bbox)
    }
}
