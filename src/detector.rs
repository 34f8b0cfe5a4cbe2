use crate::config::DetectorConfig;
use crate::detection::{Detection, ObjectClass};
use crate::error::Error;
use crate::frame::Frame;

/// Source of detections of a single class, one frame at a time.
pub trait Detector {
    fn class(&self) -> ObjectClass;

    fn detect(&mut self, frame: usize) -> Result<Vec<Detection>, Error>;
}

/// Keeps detections of `class` at or above the configured confidence, then
/// suppresses overlapping duplicates.
pub fn gate(
    detections: &[Detection],
    class: ObjectClass,
    config: &DetectorConfig,
) -> Vec<Detection> {
    let mut dets: Vec<Detection> = detections
        .iter()
        .filter(|d| d.class == class && d.confidence >= config.confidence_threshold)
        .copied()
        .collect();

    if dets.len() < 2 {
        return dets;
    }

    let keep = non_maximum_supression(&mut dets, config.nms_iou_threshold);

    dets.into_iter()
        .enumerate()
        .filter_map(|(idx, d)| if keep.contains(&idx) { Some(d) } else { None })
        .collect()
}

fn non_maximum_supression(dets: &mut [Detection], iou_threshold: f32) -> Vec<usize> {
    dets.sort_unstable_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut retain: Vec<Option<usize>> = (0..dets.len()).map(Some).collect();
    for idx in 0..dets.len() - 1 {
        if retain[idx].is_none() {
            continue;
        }

        for r in retain[idx + 1..].iter_mut() {
            if let Some(other) = *r {
                if dets[idx].iou(&dets[other]) > iou_threshold {
                    *r = None;
                }
            }
        }
    }

    retain.into_iter().flatten().collect()
}

/// The most confident ball, the only one the rest of the pipeline sees.
pub fn best_ball(detections: &[Detection]) -> Option<Detection> {
    detections
        .iter()
        .filter(|d| d.is_ball())
        .copied()
        .fold(None, |best: Option<Detection>, d| match best {
            Some(b) if b.confidence >= d.confidence => Some(b),
            _ => Some(d),
        })
}

/// Plays back detections recorded by an external model run.
#[derive(Debug, Clone)]
pub struct ReplayDetector {
    class: ObjectClass,
    config: DetectorConfig,
    recorded: Vec<Vec<Detection>>,
}

impl ReplayDetector {
    pub fn new(class: ObjectClass, config: DetectorConfig, recorded: Vec<Vec<Detection>>) -> Self {
        Self {
            class,
            config,
            recorded,
        }
    }

    pub fn from_frames(class: ObjectClass, config: DetectorConfig, frames: &[Frame]) -> Self {
        let recorded = frames.iter().map(|f| f.detections.clone()).collect();

        Self::new(class, config, recorded)
    }

    #[inline]
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.recorded.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.recorded.is_empty()
    }
}

impl Detector for ReplayDetector {
    #[inline]
    fn class(&self) -> ObjectClass {
        self.class
    }

    fn detect(&mut self, frame: usize) -> Result<Vec<Detection>, Error> {
        let raw = self.recorded.get(frame).ok_or_else(|| {
            Error::FrameSource(format!(
                "frame {} out of range ({} recorded)",
                frame,
                self.recorded.len()
            ))
        })?;

        let mut dets = gate(raw, self.class, &self.config);
        for d in &mut dets {
            d.frame_index = frame;
        }

        Ok(dets)
    }
}

/// Runs every detector over `frames`, replacing their detections.
pub fn detect_frames(
    frames: &[Frame],
    detectors: &mut [&mut dyn Detector],
) -> Result<Vec<Frame>, Error> {
    frames
        .iter()
        .enumerate()
        .map(|(idx, frame)| {
            let mut detections = Vec::new();
            for detector in detectors.iter_mut() {
                detections.extend(detector.detect(idx)?);
            }

            Ok(Frame {
                detections,
                ..frame.clone()
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bbox::BBox;

    fn det(x: f32, p: f32, class: ObjectClass) -> Detection {
        Detection::new(BBox::ltrb(x, 0.0, x + 10.0, 10.0), p, class, 0)
    }

    #[test]
    fn gate_applies_threshold_and_class() {
        let config = DetectorConfig::new("ball.onnx", 0.5);
        let dets = [
            det(0.0, 0.4, ObjectClass::Ball),
            det(100.0, 0.9, ObjectClass::Ball),
            det(200.0, 0.9, ObjectClass::Player),
        ];

        let out = gate(&dets, ObjectClass::Ball, &config);

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].bbox.left(), 100.0);
    }

    #[test]
    fn overlapping_duplicates_are_suppressed() {
        let config = DetectorConfig::new("player.onnx", 0.25);
        let dets = [
            det(0.0, 0.6, ObjectClass::Player),
            det(1.0, 0.8, ObjectClass::Player),
            det(50.0, 0.7, ObjectClass::Player),
        ];

        let out = gate(&dets, ObjectClass::Player, &config);

        assert_eq!(out.len(), 2);
        assert_eq!(out[0].confidence, 0.8);
        assert_eq!(out[1].confidence, 0.7);
    }

    #[test]
    fn best_ball_prefers_confidence() {
        let dets = [
            det(0.0, 0.6, ObjectClass::Ball),
            det(30.0, 0.95, ObjectClass::Player),
            det(60.0, 0.7, ObjectClass::Ball),
        ];

        assert_eq!(best_ball(&dets).unwrap().bbox.left(), 60.0);
        assert!(best_ball(&[]).is_none());
    }

    #[test]
    fn replay_reports_missing_frames() {
        let mut detector = ReplayDetector::new(
            ObjectClass::Ball,
            DetectorConfig::new("ball.onnx", 0.5),
            vec![vec![det(0.0, 0.9, ObjectClass::Ball)]],
        );

        assert_eq!(detector.detect(0).unwrap().len(), 1);
        assert!(matches!(detector.detect(3), Err(Error::FrameSource(_))));
    }

    #[test]
    fn detect_frames_merges_both_classes() {
        let frames = vec![Frame {
            index: 0,
            dims: (1280, 720),
            detections: vec![
                det(0.0, 0.3, ObjectClass::Player),
                det(100.0, 0.9, ObjectClass::Player),
                det(300.0, 0.6, ObjectClass::Ball),
            ],
            keypoints: None,
        }];

        let mut players = ReplayDetector::from_frames(
            ObjectClass::Player,
            DetectorConfig::new("player.onnx", 0.6),
            &frames,
        );
        let mut ball = ReplayDetector::from_frames(
            ObjectClass::Ball,
            DetectorConfig::new("ball.onnx", 0.5),
            &frames,
        );

        let out = detect_frames(&frames, &mut [&mut players, &mut ball]).unwrap();

        assert_eq!(out[0].len(), 2);
        assert_eq!(out[0].player_boxes().len(), 1);
        assert!(out[0].ball_box().is_some());
    }
}
