//! On-disk model bundles.
//!
//! A bundle holds the two networks of the hand landmarker. It is either a directory or an
//! (uncompressed) tar archive with these members:
//!
//! * `palm_detection.onnx`
//! * `hand_landmark.onnx`
//!
//! Archive members are matched by file name, so they may be nested inside a top-level directory.
//!
//! The default asset paths keep the conventional `hand_landmarker.task` name, but the file must
//! still be a tar archive of ONNX networks. MediaPipe's own `.task` asset is a ZIP of TFLite models
//! and is rejected with a tar header error.

use std::{
    fs::{self, File},
    io::Read,
    path::Path,
};

use anyhow::{bail, Context};
use tar::Archive;

pub const PALM_DETECTION_FILE: &str = "palm_detection.onnx";
pub const HAND_LANDMARK_FILE: &str = "hand_landmark.onnx";

/// The raw ONNX data of both networks of a hand landmark model.
pub struct ModelBundle {
    palm_detection: Vec<u8>,
    hand_landmark: Vec<u8>,
}

impl ModelBundle {
    /// Reads a bundle from a directory or tar archive.
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Self::open_impl(path.as_ref())
    }

    fn open_impl(path: &Path) -> anyhow::Result<Self> {
        let meta = fs::metadata(path).with_context(|| format!("cannot access {}", path.display()))?;
        if meta.is_dir() {
            Self::from_dir(path)
        } else {
            Self::from_archive(path)
        }
    }

    fn from_dir(dir: &Path) -> anyhow::Result<Self> {
        let read = |name: &str| {
            let file = dir.join(name);
            if !file.is_file() {
                bail!("model bundle {} is missing `{}`", dir.display(), name);
            }
            fs::read(&file).with_context(|| format!("failed to read {}", file.display()))
        };

        Ok(Self {
            palm_detection: read(PALM_DETECTION_FILE)?,
            hand_landmark: read(HAND_LANDMARK_FILE)?,
        })
    }

    fn from_archive(path: &Path) -> anyhow::Result<Self> {
        let file =
            File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mut archive = Archive::new(file);

        let mut palm_detection = None;
        let mut hand_landmark = None;
        let entries = archive
            .entries()
            .with_context(|| format!("{} is not a model bundle archive", path.display()))?;
        for entry in entries {
            let mut entry =
                entry.with_context(|| format!("corrupt model bundle {}", path.display()))?;
            let entry_path = entry.path()?.into_owned();
            let slot = match entry_path.file_name().and_then(|name| name.to_str()) {
                Some(PALM_DETECTION_FILE) => &mut palm_detection,
                Some(HAND_LANDMARK_FILE) => &mut hand_landmark,
                _ => {
                    log::trace!("skipping bundle member {}", entry_path.display());
                    continue;
                }
            };

            let mut data = Vec::with_capacity(entry.size().try_into().unwrap_or(0));
            entry.read_to_end(&mut data).with_context(|| {
                format!("failed to read {} from {}", entry_path.display(), path.display())
            })?;
            *slot = Some(data);
        }

        let require = |data: Option<Vec<u8>>, name: &str| match data {
            Some(data) => Ok(data),
            None => bail!("model bundle {} is missing `{}`", path.display(), name),
        };
        Ok(Self {
            palm_detection: require(palm_detection, PALM_DETECTION_FILE)?,
            hand_landmark: require(hand_landmark, HAND_LANDMARK_FILE)?,
        })
    }

    /// Returns the ONNX data of the palm detection network.
    pub fn palm_detection(&self) -> &[u8] {
        &self.palm_detection
    }

    /// Returns the ONNX data of the hand landmark network.
    pub fn hand_landmark(&self) -> &[u8] {
        &self.hand_landmark
    }
}
