use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Track {
    pub id: u32,
    pub last_box: BBox<Ltrb>,
    pub frames_missing: u32,
}

impl Track {
    pub fn new(id: u32, bbox: BBox<Ltrb>) -> Self {
        Self {
            id,
            last_box: bbox,
            frames_missing: 0,
        }
    }

    #[inline]
    pub fn hit(&mut self, bbox: BBox<Ltrb>) {
        self.last_box = bbox;
        self.frames_missing = 0;
    }
}
