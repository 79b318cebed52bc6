//! Hand landmark prediction.

use nalgebra::{Point2, Rotation2, Vector2, Vector3};

use crate::image::{CanonicalImage, Rect, RotatedRect, Vec2};
use crate::landmark::{Hand, Handedness, Landmark};
use crate::nn::{Cnn, CnnInputShape, ColorMapper, NeuralNetwork, Outputs};

/// Number of landmarks the network estimates per hand.
pub const NUM_LANDMARKS: usize = 21;

/// Names for the hand pose landmarks, in the order the network emits them.
///
/// # Terminology
///
/// - **CMC**: [Carpometacarpal joint], the lowest joint of the thumb, located near the wrist.
/// - **MCP**: [Metacarpophalangeal joint], the lower joint forming the knuckles near the palm of
///   the hand.
/// - **PIP**: Proximal Interphalangeal joint, the joint between the MCP and DIP.
/// - **DIP**: Distal Interphalangeal joint, the highest joint of a finger.
/// - **Tip**: This landmark is just placed on the tip of the finger, above the DIP.
///
/// [Carpometacarpal joint]: https://en.wikipedia.org/wiki/Carpometacarpal_joint
/// [Metacarpophalangeal joint]: https://en.wikipedia.org/wiki/Metacarpophalangeal_joint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LandmarkIdx {
    Wrist,
    ThumbCmc,
    ThumbMcp,
    ThumbIp,
    ThumbTip,
    IndexFingerMcp,
    IndexFingerPip,
    IndexFingerDip,
    IndexFingerTip,
    MiddleFingerMcp,
    MiddleFingerPip,
    MiddleFingerDip,
    MiddleFingerTip,
    RingFingerMcp,
    RingFingerPip,
    RingFingerDip,
    RingFingerTip,
    PinkyMcp,
    PinkyPip,
    PinkyDip,
    PinkyTip,
}

/// Landmarks used to derive the tracking region for the next frame.
const PALM_LANDMARKS: &[LandmarkIdx] = {
    use LandmarkIdx::*;
    &[
        Wrist,
        ThumbCmc,
        ThumbMcp,
        IndexFingerMcp,
        IndexFingerPip,
        MiddleFingerMcp,
        MiddleFingerPip,
        RingFingerMcp,
        RingFingerPip,
        PinkyMcp,
        PinkyPip,
    ]
};

/// Factor by which the palm landmarks' bounds are enlarged to cover the hand in the next frame.
const TRACKING_SCALE: f32 = 2.0;

/// The hand landmark network (224x224 input, NCHW, RGB in `0.0..=1.0`).
///
/// Outputs, in order: 21 screen landmarks `[1, 63]`, hand presence `[1, 1]`, handedness `[1, 1]`
/// and 21 world landmarks `[1, 63]` (unused).
pub struct LandmarkNetwork {
    cnn: Cnn,
}

impl LandmarkNetwork {
    pub fn new(nn: NeuralNetwork) -> anyhow::Result<Self> {
        Ok(Self {
            cnn: Cnn::new(nn, CnnInputShape::NCHW, ColorMapper::linear(0.0..=1.0))?,
        })
    }

    /// Estimates hand landmarks in `region` of `image`.
    pub fn estimate(
        &self,
        image: &CanonicalImage,
        region: RotatedRect,
    ) -> anyhow::Result<LandmarkResult> {
        let outputs = self.cnn.estimate_region(image, region)?;
        log::trace!("landmark inference result: {:?}", outputs);

        let res = self.cnn.input_resolution();
        let scale = Vec2::new(
            region.rect().width() / res.width() as f32,
            region.rect().height() / res.height() as f32,
        );
        extract(&outputs, region, scale)
    }
}

/// Landmarks estimated for a single hand, in image pixel coordinates.
#[derive(Debug, Clone)]
pub struct LandmarkResult {
    positions: Vec<Vector3<f32>>,
    presence: f32,
    raw_handedness: f32,
}

impl LandmarkResult {
    /// Creates a result from [`NUM_LANDMARKS`] positions in image pixel coordinates, a presence
    /// score and the raw handedness score (above 0.5 means right hand).
    pub(crate) fn new(positions: Vec<Vector3<f32>>, presence: f32, raw_handedness: f32) -> Self {
        debug_assert_eq!(positions.len(), NUM_LANDMARKS);
        Self {
            positions,
            presence,
            raw_handedness,
        }
    }

    /// Returns a landmark's position in the input image's coordinate system.
    ///
    /// Z is relative depth with the wrist at roughly 0, in the same (pixel) scale as X.
    pub fn landmark_position(&self, idx: LandmarkIdx) -> Vector3<f32> {
        self.positions[idx as usize]
    }

    pub fn positions(&self) -> &[Vector3<f32>] {
        &self.positions
    }

    /// Returns the confidence that a hand is actually present in the examined region.
    pub fn presence(&self) -> f32 {
        self.presence
    }

    /// Returns the estimated handedness of the hand in the image.
    ///
    /// This assumes that the camera image is passed in as-is (not mirrored).
    pub fn handedness(&self) -> Handedness {
        if self.raw_handedness > 0.5 {
            Handedness::Right
        } else {
            Handedness::Left
        }
    }

    /// Computes the clockwise rotation of the hand compared to an upright position.
    ///
    /// A rotation of 0 means that fingers are pointed upwards.
    pub fn rotation_radians(&self) -> f32 {
        let p = self.landmark_position(LandmarkIdx::MiddleFingerMcp);
        let finger = Point2::new(p.x, p.y);
        let p = self.landmark_position(LandmarkIdx::Wrist);
        let wrist = Point2::new(p.x, p.y);

        let rel = wrist - finger;
        Rotation2::rotation_between(&Vector2::y(), &rel).angle()
    }

    /// Computes the region to examine for this hand in the next video frame.
    pub fn tracking_region(&self) -> RotatedRect {
        let points = PALM_LANDMARKS.iter().map(|&idx| {
            let p = self.landmark_position(idx);
            Vec2::new(p.x, p.y)
        });
        let radians = self.rotation_radians();
        let region = RotatedRect::bounding(radians, points)
            .unwrap_or_else(|| {
                RotatedRect::new(Rect::from_center(0.0, 0.0, 0.0, 0.0), radians)
            });

        region
            .shift_rel(0.0, -0.1)
            .square_long_side()
            .map(|rect| rect.scale(TRACKING_SCALE))
    }

    /// Converts the estimate into a [`Hand`] with coordinates normalized to `image`'s size.
    pub fn to_hand(&self, image: &CanonicalImage) -> Hand {
        let (w, h) = (image.width() as f32, image.height() as f32);
        let landmarks = self
            .positions
            .iter()
            .map(|p| Landmark::new(p.x / w, p.y / h, p.z / w))
            .collect();
        Hand::new(landmarks, self.handedness(), self.presence)
    }
}

fn extract(
    outputs: &Outputs,
    region: RotatedRect,
    scale: Vec2,
) -> anyhow::Result<LandmarkResult> {
    let screen_landmarks = outputs
        .get(0)?
        .expect_shape("screen landmarks", &[1, NUM_LANDMARKS * 3])?;
    let presence = outputs.get(1)?.expect_shape("hand presence", &[1, 1])?;
    let handedness = outputs.get(2)?.expect_shape("handedness", &[1, 1])?;

    let positions = screen_landmarks
        .as_slice()
        .chunks_exact(3)
        .map(|xyz| {
            // Network output is in input pixels; scale to the region, then rotate out of it.
            let local = Vec2::new(xyz[0] * scale.x, xyz[1] * scale.y);
            let p = region.transform_out(local);
            Vector3::new(p.x, p.y, xyz[2] * scale.x)
        })
        .collect();

    Ok(LandmarkResult::new(
        positions,
        presence.scalar()?,
        handedness.scalar()?,
    ))
}
