use std::path::Path;

use anyhow::Context;

use crate::hand::detection::PalmNetwork;
use crate::hand::landmark::LandmarkNetwork;
use crate::hand::HandLandmarker;
use crate::nn::NeuralNetwork;

use super::{HandModel, ModelBackend, ModelBundle, ModelConfig};

/// Loads [`ModelBundle`]s and runs them on the CPU with `tract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct OnnxBackend;

impl ModelBackend for OnnxBackend {
    fn open(&self, path: &Path, config: &ModelConfig) -> anyhow::Result<Box<dyn HandModel>> {
        let bundle = ModelBundle::open(path)?;
        let palm = NeuralNetwork::from_onnx(bundle.palm_detection())
            .and_then(PalmNetwork::new)
            .context("failed to load palm detection network")?;
        let landmarks = NeuralNetwork::from_onnx(bundle.hand_landmark())
            .and_then(LandmarkNetwork::new)
            .context("failed to load hand landmark network")?;

        Ok(Box::new(HandLandmarker::new(palm, landmarks, config)))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::model::{HAND_LANDMARK_FILE, PALM_DETECTION_FILE};

    #[test]
    fn rejects_invalid_networks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(PALM_DETECTION_FILE), b"not onnx").unwrap();
        fs::write(dir.path().join(HAND_LANDMARK_FILE), b"not onnx").unwrap();

        let err = OnnxBackend
            .open(dir.path(), &ModelConfig::default())
            .err()
            .unwrap();
        assert!(
            err.to_string().contains("palm detection"),
            "unexpected error: {err:#}"
        );
    }
}
