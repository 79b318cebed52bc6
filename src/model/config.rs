use std::fmt;

use super::LoadError;

/// How the model is fed with images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunningMode {
    /// Every image is independent. No state is carried between detection calls.
    #[default]
    SingleImage,
    /// Images are consecutive frames of a video stream. Hand regions found in one frame are
    /// tracked into the next one, skipping palm detection while enough hands are tracked.
    Stream,
}

impl fmt::Display for RunningMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunningMode::SingleImage => "single image",
            RunningMode::Stream => "stream",
        })
    }
}

/// Detection options applied when a model is loaded.
///
/// ```
/// # use handpipe::model::{ModelConfig, RunningMode};
/// let config = ModelConfig::default()
///     .with_max_hands(1)
///     .with_running_mode(RunningMode::Stream);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    max_hands: usize,
    min_detection_confidence: f32,
    min_presence_confidence: f32,
    min_tracking_confidence: f32,
    running_mode: RunningMode,
}

impl ModelConfig {
    pub const DEFAULT_MAX_HANDS: usize = 2;
    pub const DEFAULT_CONFIDENCE: f32 = 0.5;

    /// Sets the maximum number of hands reported per image.
    pub fn with_max_hands(mut self, max_hands: usize) -> Self {
        self.max_hands = max_hands;
        self
    }

    /// Sets the palm detection score below which detections are discarded.
    pub fn with_min_detection_confidence(mut self, confidence: f32) -> Self {
        self.min_detection_confidence = confidence;
        self
    }

    /// Sets the landmark presence score below which hands are discarded.
    pub fn with_min_presence_confidence(mut self, confidence: f32) -> Self {
        self.min_presence_confidence = confidence;
        self
    }

    /// Sets the presence score a tracked hand needs to keep being tracked in
    /// [`RunningMode::Stream`].
    pub fn with_min_tracking_confidence(mut self, confidence: f32) -> Self {
        self.min_tracking_confidence = confidence;
        self
    }

    pub fn with_running_mode(mut self, mode: RunningMode) -> Self {
        self.running_mode = mode;
        self
    }

    #[inline]
    pub fn max_hands(&self) -> usize {
        self.max_hands
    }

    #[inline]
    pub fn min_detection_confidence(&self) -> f32 {
        self.min_detection_confidence
    }

    #[inline]
    pub fn min_presence_confidence(&self) -> f32 {
        self.min_presence_confidence
    }

    #[inline]
    pub fn min_tracking_confidence(&self) -> f32 {
        self.min_tracking_confidence
    }

    #[inline]
    pub fn running_mode(&self) -> RunningMode {
        self.running_mode
    }

    /// Checks that `max_hands` is non-zero and every confidence lies in `0.0..=1.0`.
    pub fn validate(&self) -> Result<(), LoadError> {
        if self.max_hands == 0 {
            return Err(LoadError::InvalidConfig("maxHands must be at least 1".into()));
        }

        for (name, value) in [
            ("minDetectionConfidence", self.min_detection_confidence),
            ("minPresenceConfidence", self.min_presence_confidence),
            ("minTrackingConfidence", self.min_tracking_confidence),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(LoadError::InvalidConfig(format!(
                    "{name} must be in range 0.0 to 1.0, got {value}"
                )));
            }
        }

        Ok(())
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_hands: Self::DEFAULT_MAX_HANDS,
            min_detection_confidence: Self::DEFAULT_CONFIDENCE,
            min_presence_confidence: Self::DEFAULT_CONFIDENCE,
            min_tracking_confidence: Self::DEFAULT_CONFIDENCE,
            running_mode: RunningMode::default(),
        }
    }
}
