//! The two-stage hand landmark pipeline.

use crate::detection::{Detection, Detector};
use crate::image::{CanonicalImage, Rect, RotatedRect};
use crate::landmark::DetectionResult;
use crate::model::{HandModel, ModelConfig, RunningMode};
use crate::num::TotalF32;
use crate::timer::Timer;

use super::detection::{hand_region, PalmNetwork};
use super::landmark::{LandmarkNetwork, LandmarkResult};

/// Intersection-over-union at which two hand regions are considered to cover the same hand.
const TRACKING_IOU_THRESH: f32 = 0.3;

/// First stage of the pipeline: finds palms in the whole image.
pub trait PalmStage: Send {
    /// Returns the detected palms in image coordinates, most confident first.
    fn detect_palms(&mut self, image: &CanonicalImage) -> anyhow::Result<&[Detection]>;

    /// Returns the stage's timers, for periodic logging.
    fn timers(&self) -> Vec<&Timer> {
        Vec::new()
    }
}

impl PalmStage for Detector {
    fn detect_palms(&mut self, image: &CanonicalImage) -> anyhow::Result<&[Detection]> {
        self.detect(image)
    }

    fn timers(&self) -> Vec<&Timer> {
        Detector::timers(self).collect()
    }
}

/// Second stage of the pipeline: estimates the landmarks of one hand in a region of the image.
pub trait LandmarkStage: Send {
    fn estimate(
        &self,
        image: &CanonicalImage,
        region: RotatedRect,
    ) -> anyhow::Result<LandmarkResult>;
}

impl LandmarkStage for LandmarkNetwork {
    fn estimate(
        &self,
        image: &CanonicalImage,
        region: RotatedRect,
    ) -> anyhow::Result<LandmarkResult> {
        LandmarkNetwork::estimate(self, image, region)
    }
}

/// Finds hands by detecting palms and then estimating landmarks in the region around each palm.
///
/// In [`RunningMode::Stream`], the landmarks of each hand are used to predict where the hand will
/// be in the next frame, and palm detection only runs while fewer than `max_hands` hands are
/// tracked.
pub struct HandLandmarker {
    palms: Box<dyn PalmStage>,
    landmarks: Box<dyn LandmarkStage>,
    config: ModelConfig,
    tracked: Vec<RotatedRect>,
    t_landmarks: Timer,
    frames: usize,
}

impl HandLandmarker {
    pub fn new(palm: PalmNetwork, landmarks: LandmarkNetwork, config: &ModelConfig) -> Self {
        let mut detector = Detector::new(palm);
        detector.set_threshold(config.min_detection_confidence());
        Self::with_stages(detector, landmarks, config)
    }

    /// Creates a landmarker from arbitrary stage implementations.
    ///
    /// `palms` is expected to apply `config.min_detection_confidence()` itself.
    pub fn with_stages<P, L>(palms: P, landmarks: L, config: &ModelConfig) -> Self
    where
        P: PalmStage + 'static,
        L: LandmarkStage + 'static,
    {
        Self {
            palms: Box::new(palms),
            landmarks: Box::new(landmarks),
            config: config.clone(),
            tracked: Vec::new(),
            t_landmarks: Timer::new("landmarks"),
            frames: 0,
        }
    }

    pub fn detect(&mut self, image: &CanonicalImage) -> anyhow::Result<DetectionResult> {
        let stream = self.config.running_mode() == RunningMode::Stream;
        let max_hands = self.config.max_hands();

        // Tracked regions are consumed here. If anything below fails, tracking restarts from
        // scratch with the next frame.
        let mut regions = if stream {
            std::mem::take(&mut self.tracked)
        } else {
            Vec::new()
        };
        if regions.len() < max_hands {
            let palms = self.palms.detect_palms(image)?;
            log::trace!("{} palms, {} tracked hands", palms.len(), regions.len());
            add_palm_regions(&mut regions, palms, max_hands);
        }

        let mut estimates = Vec::with_capacity(regions.len());
        for region in regions {
            let landmarks = &self.landmarks;
            let estimate = self
                .t_landmarks
                .time(|| landmarks.estimate(image, region))?;
            let presence = estimate.presence();
            if presence < self.config.min_presence_confidence() {
                log::trace!("dropping hand with presence {presence}");
                continue;
            }
            estimates.push(estimate);
        }
        remove_duplicate_hands(&mut estimates);

        let mut hands = Vec::with_capacity(estimates.len());
        let mut tracked = Vec::new();
        for estimate in &estimates {
            if stream && estimate.presence() >= self.config.min_tracking_confidence() {
                tracked.push(estimate.tracking_region());
            }
            hands.push(estimate.to_hand(image));
        }
        self.tracked = tracked;

        self.frames += 1;
        if self.frames % 100 == 0 {
            self.log_timers();
        }

        Ok(DetectionResult::new(hands))
    }

    fn log_timers(&self) {
        let timers = self
            .palms
            .timers()
            .into_iter()
            .chain([&self.t_landmarks])
            .map(|timer| timer.to_string())
            .collect::<Vec<_>>();
        log::debug!("{} frames: {}", self.frames, timers.join(", "));
    }
}

impl HandModel for HandLandmarker {
    fn detect(&mut self, image: &CanonicalImage) -> anyhow::Result<DetectionResult> {
        HandLandmarker::detect(self, image)
    }

    fn close(&mut self) {
        self.log_timers();
        self.tracked.clear();
    }
}

/// Appends the hand regions of `palms` (most confident first) to `regions`, skipping palms that
/// overlap an existing region, until `max_hands` regions are present.
fn add_palm_regions(regions: &mut Vec<RotatedRect>, palms: &[Detection], max_hands: usize) {
    for palm in palms {
        if regions.len() >= max_hands {
            break;
        }

        let region = hand_region(palm);
        let bounds = region.axis_aligned_bounds();
        let overlaps = regions
            .iter()
            .any(|r| r.axis_aligned_bounds().iou(&bounds) >= TRACKING_IOU_THRESH);
        if !overlaps {
            regions.push(region);
        }
    }
}

/// Removes estimates that landed on the same hand as a more confident one.
///
/// Separate regions can converge onto one hand (for example after two hands cross). Without this,
/// both would keep being tracked and reported. The order of the remaining estimates is kept.
fn remove_duplicate_hands(estimates: &mut Vec<LandmarkResult>) {
    let bounds = estimates
        .iter()
        .map(|e| e.tracking_region().axis_aligned_bounds())
        .collect::<Vec<Rect>>();

    let mut by_presence = (0..estimates.len()).collect::<Vec<_>>();
    by_presence.sort_by_key(|&i| std::cmp::Reverse(TotalF32(estimates[i].presence())));

    let mut keep = vec![false; estimates.len()];
    for (pos, &i) in by_presence.iter().enumerate() {
        let distinct = by_presence[..pos]
            .iter()
            .all(|&j| !keep[j] || bounds[j].iou(&bounds[i]) < TRACKING_IOU_THRESH);
        keep[i] = distinct;
    }

    let mut keep = keep.into_iter();
    estimates.retain(|_| keep.next().unwrap_or(false));
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use nalgebra::Vector3;

    use crate::detection::Keypoint;
    use crate::hand::landmark::{LandmarkIdx, NUM_LANDMARKS};
    use crate::image::Vec2;

    use super::*;

    fn palm(confidence: f32, x: f32, y: f32) -> Detection {
        // Upright palm, wrist below the middle finger knuckle.
        let mut keypoints = vec![Keypoint::new(x, y); 7];
        keypoints[0] = Keypoint::new(x, y + 10.0);
        keypoints[2] = Keypoint::new(x, y - 10.0);
        Detection::with_keypoints(confidence, Rect::from_center(x, y, 20.0, 20.0), keypoints)
    }

    /// An upright hand centered on `c`.
    fn hand_at(c: Vec2, presence: f32) -> LandmarkResult {
        let mut positions = vec![Vector3::new(c.x, c.y, 0.0); NUM_LANDMARKS];
        let mut place = |idx: LandmarkIdx, dx: f32, dy: f32| {
            positions[idx as usize] = Vector3::new(c.x + dx, c.y + dy, 0.0);
        };
        place(LandmarkIdx::Wrist, 0.0, 20.0);
        place(LandmarkIdx::MiddleFingerMcp, 0.0, -20.0);
        place(LandmarkIdx::IndexFingerMcp, -15.0, -15.0);
        place(LandmarkIdx::PinkyMcp, 15.0, -15.0);
        LandmarkResult::new(positions, presence, 0.9)
    }

    struct FakePalms {
        palms: Vec<Detection>,
        calls: Arc<AtomicUsize>,
    }

    impl PalmStage for FakePalms {
        fn detect_palms(&mut self, _: &CanonicalImage) -> anyhow::Result<&[Detection]> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(&self.palms)
        }
    }

    /// Finds a hand in the middle of every region it is given, or always at `fixed_at` if set.
    struct FakeLandmarks {
        presence: fn(Vec2) -> f32,
        fixed_at: Option<Vec2>,
        seen: Arc<Mutex<Vec<RotatedRect>>>,
    }

    impl LandmarkStage for FakeLandmarks {
        fn estimate(
            &self,
            _: &CanonicalImage,
            region: RotatedRect,
        ) -> anyhow::Result<LandmarkResult> {
            self.seen.lock().unwrap().push(region);
            let center = self.fixed_at.unwrap_or(region.center());
            Ok(hand_at(center, (self.presence)(region.center())))
        }
    }

    struct Harness {
        landmarker: HandLandmarker,
        palm_calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<RotatedRect>>>,
    }

    impl Harness {
        fn new(palms: Vec<Detection>, landmarks: FakeLandmarks, config: &ModelConfig) -> Self {
            let palm_calls = Arc::new(AtomicUsize::new(0));
            let seen = landmarks.seen.clone();
            let palms = FakePalms {
                palms,
                calls: palm_calls.clone(),
            };
            Self {
                landmarker: HandLandmarker::with_stages(palms, landmarks, config),
                palm_calls,
                seen,
            }
        }

        fn detect(&mut self) -> DetectionResult {
            self.landmarker
                .detect(&CanonicalImage::new(640, 480))
                .unwrap()
        }

        fn palm_calls(&self) -> usize {
            self.palm_calls.load(Ordering::SeqCst)
        }

        fn regions_seen(&self) -> Vec<RotatedRect> {
            self.seen.lock().unwrap().clone()
        }
    }

    fn landmarks(presence: fn(Vec2) -> f32) -> FakeLandmarks {
        FakeLandmarks {
            presence,
            fixed_at: None,
            seen: Default::default(),
        }
    }

    fn stream() -> ModelConfig {
        ModelConfig::default().with_running_mode(RunningMode::Stream)
    }

    #[test]
    fn caps_at_max_hands() {
        let palms = [palm(0.9, 50.0, 50.0), palm(0.8, 200.0, 50.0), palm(0.7, 350.0, 50.0)];
        let mut regions = Vec::new();
        add_palm_regions(&mut regions, &palms, 2);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0], hand_region(&palms[0]));
        assert_eq!(regions[1], hand_region(&palms[1]));

        let mut h = Harness::new(palms.to_vec(), landmarks(|_| 0.9), &ModelConfig::default());
        assert_eq!(h.detect().len(), 2);
        assert_eq!(h.regions_seen().len(), 2);
    }

    #[test]
    fn skips_tracked_hands() {
        let tracked = hand_region(&palm(0.9, 50.0, 50.0));
        let palms = [palm(0.95, 52.0, 48.0), palm(0.6, 300.0, 50.0)];

        let mut regions = vec![tracked];
        add_palm_regions(&mut regions, &palms, 2);
        assert_eq!(regions.len(), 2);
        assert_eq!(regions[0], tracked);
        assert_eq!(regions[1], hand_region(&palms[1]));
    }

    #[test]
    fn full_when_tracking_enough() {
        let mut regions = vec![hand_region(&palm(0.9, 50.0, 50.0))];
        add_palm_regions(&mut regions, &[palm(0.9, 300.0, 50.0)], 1);
        assert_eq!(regions.len(), 1);
    }

    #[test]
    fn drops_absent_hands() {
        let palms = vec![palm(0.9, 100.0, 200.0), palm(0.8, 400.0, 200.0)];
        // Only the left region actually contains a hand.
        let lm = landmarks(|c| if c.x < 250.0 { 0.9 } else { 0.2 });
        let mut h = Harness::new(palms, lm, &ModelConfig::default());

        let result = h.detect();
        assert_eq!(h.regions_seen().len(), 2);
        assert_eq!(result.len(), 1);
        assert_eq!(result.hands()[0].score(), 0.9);
        assert!(result.hands()[0].landmarks()[0].x < 250.0 / 640.0);
    }

    #[test]
    fn single_image_keeps_no_state() {
        let palms = vec![palm(0.9, 100.0, 200.0)];
        let mut h = Harness::new(palms.clone(), landmarks(|_| 0.9), &ModelConfig::default());

        assert_eq!(h.detect().len(), 1);
        assert_eq!(h.detect().len(), 1);
        assert_eq!(h.palm_calls(), 2);
        let expected = hand_region(&palms[0]);
        assert_eq!(h.regions_seen(), [expected, expected]);
    }

    #[test]
    fn stream_tracks_between_frames() {
        let config = stream().with_max_hands(1);
        let mut h = Harness::new(vec![palm(0.9, 100.0, 200.0)], landmarks(|_| 0.9), &config);

        assert_eq!(h.detect().len(), 1);
        assert_eq!(h.palm_calls(), 1);

        // The second frame reuses the region predicted from the first frame's landmarks.
        assert_eq!(h.detect().len(), 1);
        assert_eq!(h.palm_calls(), 1);
        let seen = h.regions_seen();
        assert_eq!(seen.len(), 2);
        assert_ne!(seen[1], seen[0]);
    }

    #[test]
    fn tracking_needs_confidence() {
        // Present enough to be reported, not confident enough to be tracked.
        let config = stream()
            .with_max_hands(1)
            .with_min_tracking_confidence(0.8);
        let mut h = Harness::new(vec![palm(0.9, 100.0, 200.0)], landmarks(|_| 0.6), &config);

        assert_eq!(h.detect().len(), 1);
        assert_eq!(h.detect().len(), 1);
        assert_eq!(h.palm_calls(), 2);
    }

    #[test]
    fn stream_detects_palms_until_full() {
        let config = stream().with_max_hands(2);
        let mut h = Harness::new(vec![palm(0.9, 100.0, 200.0)], landmarks(|_| 0.9), &config);

        // One tracked hand is fewer than `max_hands`, so palm detection keeps running, and the
        // palm overlapping the tracked hand is not added a second time.
        assert_eq!(h.detect().len(), 1);
        assert_eq!(h.detect().len(), 1);
        assert_eq!(h.palm_calls(), 2);
        assert_eq!(h.regions_seen().len(), 2);
    }

    #[test]
    fn converged_regions_report_one_hand() {
        let config = stream().with_max_hands(2);
        let palms = vec![palm(0.9, 100.0, 200.0), palm(0.9, 400.0, 200.0)];
        // Both regions find the same hand, the right region with more confidence.
        let lm = FakeLandmarks {
            fixed_at: Some(Vec2::new(300.0, 300.0)),
            ..landmarks(|c| if c.x < 250.0 { 0.7 } else { 0.9 })
        };
        let mut h = Harness::new(palms, lm, &config);

        let result = h.detect();
        assert_eq!(result.len(), 1);
        assert_eq!(result.hands()[0].score(), 0.9);

        // Only one hand is tracked, so the next frame looks for palms again.
        assert_eq!(h.detect().len(), 1);
        assert_eq!(h.palm_calls(), 2);
    }

    #[test]
    fn duplicate_removal_keeps_order() {
        let a = hand_at(Vec2::new(100.0, 100.0), 0.6);
        let b = hand_at(Vec2::new(400.0, 100.0), 0.7);
        let a_dup = hand_at(Vec2::new(102.0, 101.0), 0.8);

        let mut estimates = vec![a, b, a_dup];
        remove_duplicate_hands(&mut estimates);
        let presence = estimates.iter().map(|e| e.presence()).collect::<Vec<_>>();
        assert_eq!(presence, [0.7, 0.8]);

        let mut empty = Vec::new();
        remove_duplicate_hands(&mut empty);
        assert!(empty.is_empty());
    }
}
