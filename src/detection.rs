//! Common functionality for object detection.
//!
//! The functionality defined in this module (and submodules) is meant to be reusable across
//! different single-shot detectors. The palm detector in [`crate::hand::detection`] is built on it.

pub mod nms;
pub mod ssd;

use anyhow::anyhow;

use crate::image::{CanonicalImage, Rect, Resolution, RotatedRect, Vec2};
use crate::nn::{Cnn, Outputs};
use crate::timer::Timer;

use self::nms::NonMaxSuppression;

/// Trait implemented by neural networks that detect objects in an input image.
pub trait Network: Send + 'static {
    /// Returns the [`Cnn`] to use for detection.
    fn cnn(&self) -> &Cnn;

    /// Extracts all detections with confidence above `threshold` from the network's output.
    ///
    /// Keypoint and detection positions are expected to be in the coordinate system of the
    /// network's input. Outputs of an unexpected shape are reported as an error.
    fn extract(
        &self,
        outputs: &Outputs,
        threshold: f32,
        detections: &mut Vec<Detection>,
    ) -> anyhow::Result<()>;
}

/// A generic object detector.
///
/// This type wraps a [`Network`], letterboxes input images to the network's aspect ratio, and
/// de-duplicates the raw detections with [`NonMaxSuppression`].
pub struct Detector {
    network: Box<dyn Network>,
    detections: Vec<Detection>,
    t_infer: Timer,
    t_extract: Timer,
    t_nms: Timer,
    thresh: f32,
    nms: NonMaxSuppression,
}

impl Detector {
    pub const DEFAULT_THRESHOLD: f32 = 0.5;

    pub fn new<N: Network>(network: N) -> Self {
        Self {
            network: Box::new(network),
            detections: Vec::new(),
            t_infer: Timer::new("infer"),
            t_extract: Timer::new("extract"),
            t_nms: Timer::new("nms"),
            thresh: Self::DEFAULT_THRESHOLD,
            nms: NonMaxSuppression::new(),
        }
    }

    pub fn input_resolution(&self) -> Resolution {
        self.network.cnn().input_resolution()
    }

    /// Sets the minimum confidence a detection needs to be reported.
    #[inline]
    pub fn set_threshold(&mut self, thresh: f32) {
        self.thresh = thresh;
    }

    /// Runs the detector on `image`.
    ///
    /// The returned detections are in `image`'s pixel coordinates, ordered by descending
    /// confidence.
    pub fn detect(&mut self, image: &CanonicalImage) -> anyhow::Result<&[Detection]> {
        self.detections.clear();

        let cnn = self.network.cnn();
        let input_res = cnn.input_resolution();
        let aspect = input_res
            .aspect_ratio()
            .ok_or_else(|| anyhow!("network input resolution {} is empty", input_res))?;

        // If the input image's aspect ratio doesn't match the CNN's input, sample an oversized
        // region that does. The parts outside of the image read as black bars.
        let rect = image.rect().grow_to_fit_aspect(aspect);
        let outputs = self
            .t_infer
            .time(|| cnn.estimate_region(image, RotatedRect::from(rect)))?;
        log::trace!("inference result: {:?}", outputs);

        let network = &self.network;
        let thresh = self.thresh;
        let detections = &mut self.detections;
        self.t_extract
            .time(|| network.extract(&outputs, thresh, detections))?;

        let nms = &mut self.nms;
        self.t_nms.time(|| {
            let kept = nms.process(detections).collect::<Vec<_>>();
            *detections = kept;
        });

        for det in &mut self.detections {
            map_to_image(det, rect, input_res);
        }

        Ok(&self.detections)
    }

    pub fn timers(&self) -> impl Iterator<Item = &Timer> + '_ {
        [&self.t_infer, &self.t_extract, &self.t_nms].into_iter()
    }
}

/// Maps `det` from the network's input coordinate system back into the image.
///
/// `rect` is the (letterboxed) image region that was sampled into the network input. Its top-left
/// corner lies outside the image when black bars were added, and the offset removes them again.
fn map_to_image(det: &mut Detection, rect: Rect, input_res: Resolution) {
    let scale = rect.width() / input_res.width() as f32;
    let offset = rect.top_left();
    det.rect = Rect::from_center(
        det.rect.center().x * scale + offset.x,
        det.rect.center().y * scale + offset.y,
        det.rect.width() * scale,
        det.rect.height() * scale,
    );
    for kp in &mut det.keypoints {
        kp.x = kp.x * scale + offset.x;
        kp.y = kp.y * scale + offset.y;
    }
}

/// A detected object.
///
/// A [`Detection`] consists of a [`Rect`] enclosing the detected object, a confidence value, an
/// optional rotation angle of the object, and a possibly empty set of located keypoints.
///
/// Per convention, the confidence value lies between 0.0 and 1.0, which can be achieved by passing
/// the raw network output through [`crate::num::sigmoid`]. The confidence value is used as the
/// weight when performing non-maximum suppression with [`nms::SuppressionMode::Average`], so it has
/// to have the expected range when making use of that.
#[derive(Debug, Clone)]
pub struct Detection {
    confidence: f32,
    angle: f32,
    rect: Rect,
    keypoints: Vec<Keypoint>,
}

impl Detection {
    pub fn new(confidence: f32, rect: Rect) -> Self {
        Self {
            confidence,
            angle: 0.0,
            rect,
            keypoints: Vec::new(),
        }
    }

    pub fn with_keypoints(confidence: f32, rect: Rect, keypoints: Vec<Keypoint>) -> Self {
        Self {
            confidence,
            angle: 0.0,
            rect,
            keypoints,
        }
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    /// Returns the angle of the detected object, in radians, clockwise.
    ///
    /// Not every network computes an object angle. If it is not supported, an angle of 0.0 will
    /// be returned.
    pub fn angle(&self) -> f32 {
        self.angle
    }

    /// Sets the angle of the detected object, in radians, clockwise.
    pub fn set_angle(&mut self, angle: f32) {
        self.angle = angle;
    }

    /// Returns the axis-aligned bounding rectangle containing the detected object.
    pub fn bounding_rect(&self) -> Rect {
        self.rect
    }

    pub fn set_bounding_rect(&mut self, rect: Rect) {
        self.rect = rect;
    }

    pub fn keypoints(&self) -> &[Keypoint] {
        &self.keypoints
    }
}

/// A 2D keypoint produced as part of a [`Detection`].
///
/// Keypoints are often, but not always, inside the detection bounding box and indicate the
/// approximate location of some object landmark. The meaning of a keypoint depends on the specific
/// detector and on its index in the keypoint list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    x: f32,
    y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn y(&self) -> f32 {
        self.y
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}
