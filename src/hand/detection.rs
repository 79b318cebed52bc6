//! Palm detection.
//!
//! Hands are located by first detecting palms, since they are rigid and roughly square. Each palm
//! detection carries 7 keypoints, two of which (wrist and middle finger knuckle) determine the
//! rotation of the hand region handed to the landmark network.

use nalgebra::{Point2, Rotation2, Vector2};

use crate::detection::ssd::{Anchor, Anchors, LayerInfo};
use crate::detection::{self, Detection, Network};
use crate::image::{Rect, Resolution, RotatedRect};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};
use crate::num::sigmoid;

/// A keypoint of a palm [`Detection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keypoint {
    Wrist = 0,
    IndexFingerMcp = 1,
    MiddleFingerMcp = 2,
    RingFingerMcp = 3,
    PinkyMcp = 4,
    ThumbCmc = 5,
    ThumbMcp = 6,
}

/// Number of keypoints per palm detection.
pub const NUM_KEYPOINTS: usize = 7;

/// Output layers of the palm detection network: 2016 anchors in total.
const LAYERS: &[LayerInfo] = &[LayerInfo::new(2, 24, 24), LayerInfo::new(6, 12, 12)];

/// Number of values the network emits per anchor: box center and size, followed by the keypoints.
const BOX_PARAMS: usize = 4 + NUM_KEYPOINTS * 2;

/// Factor by which a palm region is enlarged to cover the whole hand.
const PALM_TO_HAND_SCALE: f32 = 2.6;

/// The palm detection network (192x192 input, NCHW, RGB in `0.0..=1.0`).
pub struct PalmNetwork {
    cnn: Cnn,
    anchors: Anchors,
}

impl PalmNetwork {
    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(0.0..=1.0))?,
            anchors: Anchors::calculate(LAYERS),
        })
    }
}

impl Network for PalmNetwork {
    fn cnn(&self) -> &Cnn {
        &self.cnn
    }

    fn extract(
        &self,
        outputs: &Outputs,
        threshold: f32,
        detections: &mut Vec<Detection>,
    ) -> anyhow::Result<()> {
        let num_anchors = self.anchors.anchor_count();
        let boxes = outputs
            .get(0)?
            .expect_shape("palm boxes", &[1, num_anchors, BOX_PARAMS])?;
        let confidences = outputs
            .get(1)?
            .expect_shape("palm scores", &[1, num_anchors, 1])?;

        let input_res = self.cnn.input_resolution();
        for (index, &raw) in confidences.as_slice().iter().enumerate() {
            let conf = sigmoid(raw);
            if conf < threshold {
                continue;
            }

            let box_params = &boxes.as_slice()[index * BOX_PARAMS..][..BOX_PARAMS];
            detections.push(extract_detection(
                &self.anchors[index],
                input_res,
                box_params,
                conf,
            ));
        }

        Ok(())
    }
}

fn extract_detection(
    anchor: &Anchor,
    input_res: Resolution,
    box_params: &[f32],
    confidence: f32,
) -> Detection {
    let input_w = input_res.width() as f32;
    let input_h = input_res.height() as f32;

    let xc = box_params[0] + anchor.x_center() * input_w;
    let yc = box_params[1] + anchor.y_center() * input_h;
    let w = box_params[2];
    let h = box_params[3];
    let keypoints = box_params[4..]
        .chunks_exact(2)
        .map(|xy| {
            detection::Keypoint::new(
                xy[0] + anchor.x_center() * input_w,
                xy[1] + anchor.y_center() * input_h,
            )
        })
        .collect();

    let mut det = Detection::with_keypoints(confidence, Rect::from_center(xc, yc, w, h), keypoints);
    det.set_angle(palm_angle(&det));
    det
}

/// Computes the clockwise rotation of a palm, 0 meaning the fingers point upwards.
fn palm_angle(det: &Detection) -> f32 {
    let kp = det.keypoints();
    let (Some(finger), Some(wrist)) = (
        kp.get(Keypoint::MiddleFingerMcp as usize),
        kp.get(Keypoint::Wrist as usize),
    ) else {
        return 0.0;
    };

    let rel = Point2::new(wrist.x(), wrist.y()) - Point2::new(finger.x(), finger.y());
    Rotation2::rotation_between(&Vector2::y(), &rel).angle()
}

/// Computes the region of the image that the landmark network should look at for a detected palm.
///
/// The palm's box is rotated upright, moved towards the fingers, made square and enlarged so that
/// the whole hand fits inside.
pub fn hand_region(palm: &Detection) -> RotatedRect {
    RotatedRect::new(palm.bounding_rect(), palm.angle())
        .shift_rel(0.0, -0.5)
        .square_long_side()
        .map(|rect| rect.scale(PALM_TO_HAND_SCALE))
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use approx::assert_abs_diff_eq;

    use super::*;

    fn params(xc: f32, yc: f32, size: f32, wrist: (f32, f32), finger: (f32, f32)) -> Vec<f32> {
        let mut p = vec![xc, yc, size, size];
        p.resize(BOX_PARAMS, 0.0);
        p[4] = wrist.0;
        p[5] = wrist.1;
        p[8] = finger.0;
        p[9] = finger.1;
        p
    }

    #[test]
    fn layout() {
        assert_eq!(Anchors::calculate(LAYERS).anchor_count(), 2016);
        assert_eq!(BOX_PARAMS, 18);
    }

    #[test]
    fn decodes_relative_to_anchor() {
        let anchors = Anchors::calculate(LAYERS);
        let res = Resolution::new(192, 192);
        // Anchor 0 is centered at (4, 4) in input pixels.
        let det = extract_detection(
            &anchors[0],
            res,
            &params(1.0, 2.0, 20.0, (0.0, 10.0), (0.0, -10.0)),
            0.9,
        );

        assert_eq!(det.confidence(), 0.9);
        assert_abs_diff_eq!(det.bounding_rect().center().x, 5.0);
        assert_abs_diff_eq!(det.bounding_rect().center().y, 6.0);
        assert_abs_diff_eq!(det.bounding_rect().width(), 20.0);
        assert_eq!(det.keypoints().len(), NUM_KEYPOINTS);
        assert_abs_diff_eq!(det.keypoints()[Keypoint::Wrist as usize].y(), 14.0);
        // Upright hand: wrist below the knuckles.
        assert_abs_diff_eq!(det.angle(), 0.0);
    }

    #[test]
    fn sideways_palm() {
        let anchors = Anchors::calculate(LAYERS);
        let res = Resolution::new(192, 192);
        // Fingers pointing right, wrist on the left.
        let det = extract_detection(
            &anchors[0],
            res,
            &params(0.0, 0.0, 20.0, (-10.0, 0.0), (10.0, 0.0)),
            0.9,
        );
        assert_abs_diff_eq!(det.angle(), FRAC_PI_2, epsilon = 1e-5);

        // The hand region extends towards the fingers.
        let region = hand_region(&det);
        assert!(region.center().x > det.bounding_rect().center().x + 5.0);
        assert_abs_diff_eq!(region.rect().width(), 20.0 * PALM_TO_HAND_SCALE, epsilon = 1e-4);
        assert_abs_diff_eq!(region.rect().height(), region.rect().width());
    }
}
