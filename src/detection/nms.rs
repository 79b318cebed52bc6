//! Non-Maximum Suppression and Averaging.
//!
//! Single-Shot MultiBox Detectors (SSD) typically report the same object from several neighboring
//! anchors. Non-Maximum Suppression (NMS) filters these duplicates out, leaving only a single
//! detection with high confidence for each object.
//!
//! Two variants are available through [`SuppressionMode`]: classic suppression, which discards
//! every overlapping detection with lower confidence ([`SuppressionMode::Remove`]), and
//! Non-Maximum Averaging ([`SuppressionMode::Average`]), which replaces a cluster of overlapping
//! detections with their confidence-weighted average. Averaging is the default.

use crate::image::{Rect, Vec2};
use crate::num::TotalF32;

use super::{Detection, Keypoint};

/// A non-maximum suppression algorithm.
pub struct NonMaxSuppression {
    iou_thresh: f32,
    avg_buf: Vec<Detection>,
    out_buf: Vec<Detection>,
    mode: SuppressionMode,
}

impl NonMaxSuppression {
    /// The default intersection-over-union threshold used to determine if two detections overlap.
    pub const DEFAULT_IOU_THRESH: f32 = 0.3;

    /// Creates a new non-maximum suppressor.
    ///
    /// The returned suppression algorithm will use [`SuppressionMode::Average`] and a default IOU
    /// threshold.
    pub fn new() -> Self {
        Self {
            iou_thresh: Self::DEFAULT_IOU_THRESH,
            avg_buf: Vec::new(),
            out_buf: Vec::new(),
            mode: SuppressionMode::Average,
        }
    }

    /// Sets the intersection-over-union threshold to consider two detections as overlapping.
    ///
    /// By default, [`Self::DEFAULT_IOU_THRESH`] is used.
    pub fn set_iou_thresh(&mut self, iou_thresh: f32) {
        self.iou_thresh = iou_thresh;
    }

    /// Sets the suppression mode.
    pub fn set_mode(&mut self, mode: SuppressionMode) {
        self.mode = mode;
    }

    /// Performs non-maximum suppression on `detections`.
    ///
    /// `detections` is drained in the process. The surviving detections are yielded in order of
    /// descending confidence.
    pub fn process(
        &mut self,
        detections: &mut Vec<Detection>,
    ) -> impl Iterator<Item = Detection> + '_ {
        self.out_buf.clear();

        // Sort by ascending confidence, process highest confidence first by starting at the back.
        detections.sort_unstable_by_key(|det| TotalF32(det.confidence));

        while let Some(seed) = detections.pop() {
            let seed_rect = seed.bounding_rect();
            let iou_thresh = self.iou_thresh;
            let overlaps = |other: &Detection| seed_rect.iou(&other.bounding_rect()) >= iou_thresh;

            match self.mode {
                SuppressionMode::Remove => {
                    detections.retain(|other| !overlaps(other));
                    self.out_buf.push(seed);
                }
                SuppressionMode::Average => {
                    self.avg_buf.clear();
                    let mut i = 0;
                    while i < detections.len() {
                        if overlaps(&detections[i]) {
                            // `remove` keeps the remaining detections sorted.
                            self.avg_buf.push(detections.remove(i));
                        } else {
                            i += 1;
                        }
                    }

                    let averaged = average(seed, &self.avg_buf);
                    self.out_buf.push(averaged);
                }
            }
        }

        self.avg_buf.clear();
        self.out_buf.drain(..)
    }
}

impl Default for NonMaxSuppression {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes the confidence-weighted average of `seed` and the detections overlapping it.
///
/// The result keeps the seed's confidence. Detections with a different number of keypoints than
/// the seed do not contribute to the averaged keypoints.
fn average(seed: Detection, others: &[Detection]) -> Detection {
    let mut center = Vec2::zeros();
    let mut size = Vec2::zeros();
    let mut angle = 0.0;
    let mut divisor = 0.0;
    let mut keypoints = vec![Vec2::zeros(); seed.keypoints.len()];
    let mut kp_divisor = 0.0;

    for det in std::iter::once(&seed).chain(others) {
        let factor = det.confidence;
        divisor += factor;
        center += det.rect.center() * factor;
        size += det.rect.size() * factor;
        angle += det.angle * factor;

        if det.keypoints.len() == keypoints.len() {
            kp_divisor += factor;
            for (acc, kp) in keypoints.iter_mut().zip(&det.keypoints) {
                *acc += kp.position() * factor;
            }
        }
    }

    if divisor <= 0.0 {
        // All-zero confidences carry no weight, keep the seed as is.
        return seed;
    }

    center /= divisor;
    size /= divisor;
    let mut averaged = Detection::with_keypoints(
        seed.confidence,
        Rect::from_center(center.x, center.y, size.x, size.y),
        keypoints
            .into_iter()
            .map(|p| p / kp_divisor)
            .map(|p| Keypoint::new(p.x, p.y))
            .collect(),
    );
    averaged.set_angle(angle / divisor);
    averaged
}

/// Describes how [`NonMaxSuppression`] should deal with overlapping detections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SuppressionMode {
    /// Remove overlapping detections, only retain the detection with highest confidence score.
    Remove,

    /// Compute a confidence-weighted average of overlapping detections.
    Average,
}
