//! Model resolution and loading.
//!
//! A model is located by trying an ordered list of [`ModelSource`]s. The first candidate that
//! exists and can be opened by the [`ModelBackend`] wins; failures of earlier candidates are logged
//! and collected, but only fail the load once every candidate has been tried.

mod bundle;
mod config;
mod onnx;

use std::{
    env, fmt,
    path::{Path, PathBuf},
};

use thiserror::Error;

use crate::image::CanonicalImage;
use crate::landmark::DetectionResult;

pub use bundle::*;
pub use config::*;
pub use onnx::OnnxBackend;

/// Environment variable naming a model bundle that is tried before all other candidates.
pub const MODEL_PATH_VAR: &str = "HANDPIPE_MODEL_PATH";

/// Environment variable overriding the directory [`default_candidates`] are resolved against.
pub const ASSET_ROOT_VAR: &str = "HANDPIPE_ASSET_ROOT";

/// Conventional asset locations of the model bundle, relative to the asset root, in lookup order.
///
/// Despite the `.task` extension, these are read as [`ModelBundle`] tar archives, not as
/// MediaPipe task files.
pub const DEFAULT_ASSET_PATHS: &[&str] = &[
    "flutter_assets/assets/hand_landmarker.task",
    "assets/hand_landmarker.task",
    "hand_landmarker.task",
];

/// A location a model may be loaded from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelSource {
    /// A plain filesystem path.
    Path(PathBuf),
    /// A path relative to an asset root directory.
    Asset { root: PathBuf, path: PathBuf },
}

impl ModelSource {
    pub fn asset(root: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self::Asset {
            root: root.into(),
            path: path.into(),
        }
    }

    /// Returns the filesystem path this source refers to.
    pub fn resolve(&self) -> PathBuf {
        match self {
            ModelSource::Path(path) => path.clone(),
            ModelSource::Asset { root, path } => root.join(path),
        }
    }
}

impl fmt::Display for ModelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelSource::Path(path) => write!(f, "{}", path.display()),
            ModelSource::Asset { root, path } => {
                write!(f, "asset {} (in {})", path.display(), root.display())
            }
        }
    }
}

impl From<PathBuf> for ModelSource {
    fn from(path: PathBuf) -> Self {
        Self::Path(path)
    }
}

impl From<&Path> for ModelSource {
    fn from(path: &Path) -> Self {
        Self::Path(path.to_path_buf())
    }
}

impl From<&str> for ModelSource {
    fn from(path: &str) -> Self {
        Self::Path(path.into())
    }
}

/// Returns the conventional asset candidates under `asset_root`, in lookup order.
pub fn default_candidates(asset_root: &Path) -> Vec<ModelSource> {
    DEFAULT_ASSET_PATHS
        .iter()
        .map(|path| ModelSource::asset(asset_root, path))
        .collect()
}

/// Returns the candidate list configured by the environment.
///
/// This is the model named by `HANDPIPE_MODEL_PATH` (if set), followed by the
/// [`default_candidates`] under `HANDPIPE_ASSET_ROOT` (or the working directory).
pub fn env_candidates() -> Vec<ModelSource> {
    let mut candidates = Vec::new();
    if let Some(path) = env::var_os(MODEL_PATH_VAR) {
        candidates.push(ModelSource::Path(path.into()));
    }
    let root = env::var_os(ASSET_ROOT_VAR).map_or_else(|| PathBuf::from("."), PathBuf::from);
    candidates.extend(default_candidates(&root));
    candidates
}

/// A loaded inference engine that finds hands in images.
pub trait HandModel: Send {
    /// Runs detection on `image`, blocking until the result is available.
    fn detect(&mut self, image: &CanonicalImage) -> anyhow::Result<DetectionResult>;

    /// Releases resources held by the model. Called exactly once, when its handle is closed.
    fn close(&mut self) {}
}

/// Opens model files into [`HandModel`]s.
pub trait ModelBackend {
    /// Opens the model at `path`, configured with `config`.
    fn open(&self, path: &Path, config: &ModelConfig) -> anyhow::Result<Box<dyn HandModel>>;
}

/// A loaded model, together with where it came from and how it was configured.
pub struct ModelHandle {
    model: Box<dyn HandModel>,
    path: PathBuf,
    config: ModelConfig,
}

impl ModelHandle {
    pub fn new(model: Box<dyn HandModel>, path: PathBuf, config: ModelConfig) -> Self {
        Self {
            model,
            path,
            config,
        }
    }

    /// Returns the path the model was loaded from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn detect(&mut self, image: &CanonicalImage) -> anyhow::Result<DetectionResult> {
        self.model.detect(image)
    }

    /// Releases the model.
    pub fn close(mut self) {
        log::debug!("closing model {}", self.path.display());
        self.model.close();
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("path", &self.path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Why a single candidate could not be loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFailure {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for PathFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid model configuration: {0}")]
    InvalidConfig(String),
    #[error("all model paths failed{}", describe_last(.last))]
    AllPathsFailed {
        /// The failure of the last candidate, or `None` if there were no candidates.
        last: Option<PathFailure>,
        /// The failures of every candidate, in the order they were tried.
        failures: Vec<PathFailure>,
    },
}

fn describe_last(last: &Option<PathFailure>) -> String {
    match last {
        Some(failure) => format!(" (last error: {failure})"),
        None => " (no candidates given)".into(),
    }
}

/// Loads the first loadable model among `candidates`.
///
/// Candidates that do not exist are skipped without involving `backend`. An empty candidate list
/// or an invalid `config` fail without touching the backend at all. An empty list is reported as
/// [`LoadError::AllPathsFailed`] even when `config` is invalid as well.
pub fn load(
    candidates: &[ModelSource],
    config: &ModelConfig,
    backend: &dyn ModelBackend,
) -> Result<ModelHandle, LoadError> {
    if candidates.is_empty() {
        log::error!("could not load a model, no candidate paths given");
        return Err(LoadError::AllPathsFailed {
            last: None,
            failures: Vec::new(),
        });
    }
    config.validate()?;

    let mut failures = Vec::new();
    for candidate in candidates {
        let path = candidate.resolve();
        let result = if path.exists() {
            backend.open(&path, config)
        } else {
            Err(anyhow::anyhow!("no such file or directory"))
        };

        match result {
            Ok(model) => {
                log::debug!("loaded model from {} ({} mode)", candidate, config.running_mode());
                return Ok(ModelHandle::new(model, path, config.clone()));
            }
            Err(e) => {
                log::warn!("failed to load model from {}: {:#}", candidate, e);
                failures.push(PathFailure {
                    path,
                    message: format!("{e:#}"),
                });
            }
        }
    }

    log::error!(
        "could not load a model, tried {} candidate paths",
        failures.len()
    );
    Err(LoadError::AllPathsFailed {
        last: failures.last().cloned(),
        failures,
    })
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    struct NoHands;

    impl HandModel for NoHands {
        fn detect(&mut self, _: &CanonicalImage) -> anyhow::Result<DetectionResult> {
            Ok(DetectionResult::default())
        }
    }

    /// Accepts files containing `ok`, records every path it is asked to open.
    #[derive(Default)]
    struct FakeBackend {
        opened: RefCell<Vec<PathBuf>>,
    }

    impl ModelBackend for FakeBackend {
        fn open(&self, path: &Path, _: &ModelConfig) -> anyhow::Result<Box<dyn HandModel>> {
            self.opened.borrow_mut().push(path.to_path_buf());
            if std::fs::read(path)? == b"ok" {
                Ok(Box::new(NoHands))
            } else {
                anyhow::bail!("not a model")
            }
        }
    }

    #[test]
    fn empty_candidates() {
        let backend = FakeBackend::default();
        let err = load(&[], &ModelConfig::default(), &backend).unwrap_err();
        match err {
            LoadError::AllPathsFailed { last, failures } => {
                assert!(last.is_none());
                assert!(failures.is_empty());
            }
            e => panic!("unexpected error: {e}"),
        }
        assert!(backend.opened.borrow().is_empty());

        // An empty list takes precedence over an invalid config.
        let invalid = ModelConfig::default().with_max_hands(0);
        let err = load(&[], &invalid, &backend).unwrap_err();
        assert!(matches!(err, LoadError::AllPathsFailed { last: None, .. }), "{err}");
        assert!(backend.opened.borrow().is_empty());
    }

    #[test]
    fn falls_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.task");
        let good = dir.path().join("good.task");
        let later = dir.path().join("later.task");
        std::fs::write(&bad, b"garbage").unwrap();
        std::fs::write(&good, b"ok").unwrap();
        std::fs::write(&later, b"ok").unwrap();

        let backend = FakeBackend::default();
        let candidates = [
            ModelSource::from(dir.path().join("missing.task")),
            ModelSource::from(bad.clone()),
            ModelSource::asset(dir.path(), "good.task"),
            ModelSource::from(later),
        ];
        let handle = load(&candidates, &ModelConfig::default(), &backend).unwrap();
        assert_eq!(handle.path(), good);

        // The missing file never reaches the backend, the later candidate is never tried.
        assert_eq!(*backend.opened.borrow(), vec![bad, good]);
    }

    #[test]
    fn reports_every_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.task");
        std::fs::write(&bad, b"garbage").unwrap();

        let backend = FakeBackend::default();
        let candidates = [
            ModelSource::from(dir.path().join("missing.task")),
            ModelSource::from(bad.clone()),
        ];
        let err = load(&candidates, &ModelConfig::default(), &backend).unwrap_err();
        assert!(err.to_string().starts_with("all model paths failed"), "{err}");
        match err {
            LoadError::AllPathsFailed { last, failures } => {
                assert_eq!(failures.len(), 2);
                let last = last.unwrap();
                assert_eq!(last.path, bad);
                assert_eq!(last.message, "not a model");
            }
            e => panic!("unexpected error: {e}"),
        }
    }

    #[test]
    fn invalid_config_skips_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.task");
        std::fs::write(&good, b"ok").unwrap();

        let backend = FakeBackend::default();
        let config = ModelConfig::default().with_max_hands(0);
        let err = load(&[ModelSource::from(good)], &config, &backend).unwrap_err();
        assert!(matches!(err, LoadError::InvalidConfig(_)));
        assert!(backend.opened.borrow().is_empty());
    }

    #[test]
    fn default_asset_order() {
        let candidates = default_candidates(Path::new("/data/app"));
        let paths = candidates.iter().map(|c| c.resolve()).collect::<Vec<_>>();
        assert_eq!(
            paths,
            [
                PathBuf::from("/data/app/flutter_assets/assets/hand_landmarker.task"),
                PathBuf::from("/data/app/assets/hand_landmarker.task"),
                PathBuf::from("/data/app/hand_landmarker.task"),
            ]
        );
    }
}
