use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::bbox::{BBox, Ltrb};
use crate::config::CourtConfig;
use crate::error::Error;

// Real-world court dimensions in meters.
pub const SINGLE_LINE_WIDTH: f32 = 8.23;
pub const DOUBLE_LINE_WIDTH: f32 = 10.97;
pub const HALF_COURT_LINE_HEIGHT: f32 = 11.88;
pub const SERVICE_LINE_WIDTH: f32 = 6.4;
pub const DOUBLE_ALLY_DIFFERENCE: f32 = 1.37;
pub const NO_MANS_LAND_HEIGHT: f32 = 5.48;

pub const NUM_KEYPOINTS: usize = 14;

const BASELINE_CORNERS: [usize; 4] = [0, 1, 2, 3];

/// 14 court landmarks as a flat `[x0, y0, x1, y1, ...]` array.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(transparent)]
pub struct CourtKeypoints {
    coords: [f32; NUM_KEYPOINTS * 2],
}

impl CourtKeypoints {
    pub fn new(coords: [f32; NUM_KEYPOINTS * 2]) -> Self {
        Self { coords }
    }

    pub fn from_slice(values: &[f32]) -> Result<Self, Error> {
        let mut coords = [0.0; NUM_KEYPOINTS * 2];

        if values.len() != coords.len() {
            return Err(Error::InvalidKeypoints { len: values.len() });
        }

        coords.copy_from_slice(values);

        Ok(Self { coords })
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.coords
    }

    #[inline]
    pub fn point(&self, index: usize) -> na::Point2<f32> {
        na::Point2::new(self.coords[index * 2], self.coords[index * 2 + 1])
    }

    /// Index of the candidate landmark nearest to `p`.
    pub fn closest(&self, p: &na::Point2<f32>, candidates: &[usize]) -> Option<usize> {
        candidates.iter().copied().min_by(|&a, &b| {
            let da = na::distance(p, &self.point(a));
            let db = na::distance(p, &self.point(b));
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
    }
}

impl Default for CourtKeypoints {
    fn default() -> Self {
        Self {
            coords: [0.0; NUM_KEYPOINTS * 2],
        }
    }
}

/// Fixed-size court diagram drawn in the top-right corner of a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MiniCourt {
    frame_dims: (u32, u32),
    court_start: na::Point2<f32>,
    court_end: na::Point2<f32>,
    court_width: f32,
    perspective_divisor: f32,
    keypoints: CourtKeypoints,
}

impl MiniCourt {
    pub fn new(frame_dims: (u32, u32), config: &CourtConfig) -> Self {
        let end_x = frame_dims.0 as f32 - config.buffer;
        let end_y = config.buffer + config.canvas_height;
        let start_x = end_x - config.canvas_width;
        let start_y = end_y - config.canvas_height;

        let court_start = na::Point2::new(start_x + config.padding, start_y + config.padding);
        let court_end = na::Point2::new(end_x - config.padding, end_y - config.padding);
        let court_width = court_end.x - court_start.x;

        let mut court = Self {
            frame_dims,
            court_start,
            court_end,
            court_width,
            perspective_divisor: config.perspective_divisor,
            keypoints: CourtKeypoints::default(),
        };

        court.keypoints = court.layout();
        court
    }

    fn layout(&self) -> CourtKeypoints {
        let m = |meters: f32| self.meters_to_pixels(meters);
        let (sx, sy) = (self.court_start.x, self.court_start.y);

        let mut p = [na::Point2::origin(); NUM_KEYPOINTS];
        p[0] = na::Point2::new(sx, sy);
        p[1] = na::Point2::new(self.court_end.x, sy);
        p[2] = na::Point2::new(sx, sy + m(HALF_COURT_LINE_HEIGHT * 2.0));
        p[3] = na::Point2::new(p[0].x + self.court_width, p[2].y);
        p[4] = na::Point2::new(p[0].x + m(DOUBLE_ALLY_DIFFERENCE), p[0].y);
        p[5] = na::Point2::new(p[2].x + m(DOUBLE_ALLY_DIFFERENCE), p[2].y);
        p[6] = na::Point2::new(p[1].x - m(DOUBLE_ALLY_DIFFERENCE), p[1].y);
        p[7] = na::Point2::new(p[3].x - m(DOUBLE_ALLY_DIFFERENCE), p[3].y);
        p[8] = na::Point2::new(p[4].x, p[4].y + m(NO_MANS_LAND_HEIGHT));
        p[9] = na::Point2::new(p[8].x + m(SINGLE_LINE_WIDTH), p[8].y);
        p[10] = na::Point2::new(p[5].x, p[5].y - m(NO_MANS_LAND_HEIGHT));
        p[11] = na::Point2::new(p[10].x + m(SINGLE_LINE_WIDTH), p[10].y);
        p[12] = na::Point2::new((p[8].x + p[9].x) / 2.0, p[8].y);
        p[13] = na::Point2::new((p[10].x + p[11].x) / 2.0, p[10].y);

        let mut coords = [0.0; NUM_KEYPOINTS * 2];
        for (i, point) in p.iter().enumerate() {
            coords[i * 2] = point.x;
            coords[i * 2 + 1] = point.y;
        }

        CourtKeypoints::new(coords)
    }

    #[inline]
    pub fn frame_dims(&self) -> (u32, u32) {
        self.frame_dims
    }

    #[inline]
    pub fn court_start(&self) -> na::Point2<f32> {
        self.court_start
    }

    #[inline]
    pub fn court_end(&self) -> na::Point2<f32> {
        self.court_end
    }

    #[inline]
    pub fn court_width(&self) -> f32 {
        self.court_width
    }

    #[inline]
    pub fn drawing_keypoints(&self) -> &CourtKeypoints {
        &self.keypoints
    }

    #[inline]
    pub fn meters_to_pixels(&self, meters: f32) -> f32 {
        meters * self.court_width / DOUBLE_LINE_WIDTH
    }

    #[inline]
    pub fn pixels_to_meters(&self, pixels: f32) -> f32 {
        if self.court_width.abs() <= f32::EPSILON {
            return 0.0;
        }

        pixels * DOUBLE_LINE_WIDTH / self.court_width
    }

    pub fn clamp(&self, p: na::Point2<f32>) -> na::Point2<f32> {
        na::Point2::new(
            p.x.max(self.court_start.x).min(self.court_end.x),
            p.y.max(self.court_start.y).min(self.court_end.y),
        )
    }

    /// Projects `object` into diagram space relative to the landmark
    /// `reference_index`, using a body of `height_m` meters that measures
    /// `height_px` pixels as the frame scale.
    pub fn project(
        &self,
        object: na::Point2<f32>,
        reference: na::Point2<f32>,
        reference_index: usize,
        height_px: f32,
        height_m: f32,
    ) -> na::Point2<f32> {
        let mut dx = (object.x - reference.x).abs();
        let dy = (object.y - reference.y).abs();

        // higher in the frame means further away
        if object.y < reference.y && self.perspective_divisor > 0.0 {
            dx *= 1.0 + (reference.y - object.y) / self.perspective_divisor;
        }

        let to_meters = |px: f32| {
            if height_px > f32::EPSILON {
                px * height_m / height_px
            } else {
                0.0
            }
        };

        let offset_x = self.meters_to_pixels(to_meters(dx));
        let offset_y = self.meters_to_pixels(to_meters(dy));

        let sign_x = if object.x > reference.x { 1.0 } else { -1.0 };
        let sign_y = if object.y > reference.y { 1.0 } else { -1.0 };

        let anchor = self.keypoints.point(reference_index);

        self.clamp(na::Point2::new(
            anchor.x + sign_x * offset_x,
            anchor.y + sign_y * offset_y,
        ))
    }
}

/// Short history of displayed ball positions, blended for a steadier marker.
#[derive(Debug, Clone)]
pub struct BallTrail {
    points: VecDeque<na::Point2<f32>>,
    length: usize,
    window: usize,
    blend: f32,
    min_movement: f32,
}

impl BallTrail {
    pub fn new(config: &CourtConfig) -> Self {
        Self {
            points: VecDeque::with_capacity(config.trail_length + 1),
            length: config.trail_length.max(1),
            window: config.smoothing_window.max(1),
            blend: config.blend,
            min_movement: config.min_movement,
        }
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> Vec<na::Point2<f32>> {
        self.points.iter().copied().collect()
    }

    /// Blends `raw` with the recency-weighted mean of the retained points and
    /// records the result unless it barely moved.
    pub fn push(&mut self, raw: na::Point2<f32>) -> na::Point2<f32> {
        let display = self.blended(raw);

        let moved = self
            .points
            .back()
            .map_or(true, |last| na::distance(last, &display) > self.min_movement);

        if moved {
            self.points.push_back(display);
        }

        while self.points.len() > self.length {
            self.points.pop_front();
        }

        display
    }

    fn blended(&self, raw: na::Point2<f32>) -> na::Point2<f32> {
        let take = self.points.len().min(self.window);
        if take == 0 {
            return raw;
        }

        let recent = self.points.iter().skip(self.points.len() - take);

        let mut sum = na::Vector2::zeros();
        let mut total = 0.0;
        for (i, p) in recent.enumerate() {
            let w = (i + 1) as f32 / take as f32;
            sum += p.coords * w;
            total += w;
        }

        let average = sum / total;

        na::Point2::from(raw.coords * self.blend + average * (1.0 - self.blend))
    }
}

/// Diagram positions of everything visible on one frame.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct CourtPositions {
    pub players: BTreeMap<u32, na::Point2<f32>>,
    pub ball: Option<na::Point2<f32>>,
    pub ball_display: Option<na::Point2<f32>>,
    pub trail: Vec<na::Point2<f32>>,
}

/// Player boxes of one frame keyed by track id.
pub type PlayerBoxes = BTreeMap<u32, BBox<Ltrb>>;

pub struct CourtMapper {
    config: CourtConfig,
    court: Option<MiniCourt>,
    trail: BallTrail,
}

impl CourtMapper {
    pub fn new(config: CourtConfig) -> Self {
        let trail = BallTrail::new(&config);

        Self {
            config,
            court: None,
            trail,
        }
    }

    #[inline]
    pub fn court(&self) -> Option<&MiniCourt> {
        self.court.as_ref()
    }

    /// Current diagram, rebuilt whenever the frame rectangle changes.
    pub fn court_for(&mut self, frame_dims: (u32, u32)) -> &MiniCourt {
        let stale = self
            .court
            .as_ref()
            .map_or(true, |c| c.frame_dims() != frame_dims);

        if stale {
            log::debug!("laying out mini court for {:?} frame", frame_dims);
            self.court = None;
        }

        let config = &self.config;
        self.court
            .get_or_insert_with(|| MiniCourt::new(frame_dims, config))
    }

    /// Tallest box of `id` over the frames around `frame`.
    pub fn pixel_height(&self, players: &[PlayerBoxes], frame: usize, id: u32) -> Option<f32> {
        let lo = frame.saturating_sub(self.config.height_window_before);
        let hi = (frame + self.config.height_window_after).min(players.len());

        players
            .get(lo..hi)?
            .iter()
            .filter_map(|boxes| boxes.get(&id).map(|b| b.height()))
            .fold(None, |best: Option<f32>, h| Some(best.map_or(h, |b| b.max(h))))
    }

    pub fn map_frame(
        &mut self,
        frame: usize,
        frame_dims: (u32, u32),
        players: &[PlayerBoxes],
        ball: Option<&BBox<Ltrb>>,
        keypoints: &CourtKeypoints,
    ) -> CourtPositions {
        let mut out = CourtPositions::default();
        let boxes = match players.get(frame) {
            Some(boxes) => boxes,
            None => return out,
        };

        let heights: BTreeMap<u32, f32> = boxes
            .keys()
            .filter_map(|&id| self.pixel_height(players, frame, id).map(|h| (id, h)))
            .collect();

        let court = self.court_for(frame_dims).clone();

        for (&id, bbox) in boxes {
            let foot = bbox.foot();
            let height_px = heights.get(&id).copied().unwrap_or_else(|| bbox.height());

            if let Some(index) = keypoints.closest(&foot, &BASELINE_CORNERS) {
                let position = court.project(
                    foot,
                    keypoints.point(index),
                    index,
                    height_px,
                    self.config.player_height(id),
                );

                out.players.insert(id, position);
            }
        }

        if let Some(ball) = ball {
            out.ball = self.map_ball(&court, ball, boxes, &heights, keypoints);
        }

        if let Some(raw) = out.ball {
            out.ball_display = Some(self.trail.push(raw));
        }
        out.trail = self.trail.points();

        out
    }

    fn map_ball(
        &self,
        court: &MiniCourt,
        ball: &BBox<Ltrb>,
        boxes: &PlayerBoxes,
        heights: &BTreeMap<u32, f32>,
        keypoints: &CourtKeypoints,
    ) -> Option<na::Point2<f32>> {
        let center = ball.center();

        // the ball has no size reference of its own; borrow the nearest player's
        let (&id, nearest) = boxes.iter().min_by(|a, b| {
            let da = na::distance(&center, &a.1.center());
            let db = na::distance(&center, &b.1.center());
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })?;

        let kp = keypoints.as_slice();
        let mid_y = (kp[1] + kp[5]) / 2.0;
        let mid_x = (kp[0] + kp[2]) / 2.0;

        let candidates: [usize; 2] = match (center.y < mid_y, center.x < mid_x) {
            (true, true) => [4, 8],
            (true, false) => [6, 9],
            (false, true) => [5, 10],
            (false, false) => [7, 11],
        };

        let index = keypoints.closest(&center, &candidates)?;
        let height_px = heights.get(&id).copied().unwrap_or_else(|| nearest.height());

        Some(court.project(
            center,
            keypoints.point(index),
            index,
            height_px,
            self.config.player_height(id),
        ))
    }
}
