//! The inference session.
//!
//! A [`Session`] owns at most one loaded [`ModelHandle`]. Detection calls lock the session for
//! their whole duration, so concurrent callers are serialized and never observe a handle that is
//! being replaced or closed. Callers run in the order they acquire the lock, which is not
//! necessarily the order in which they called.

use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

use crate::image::CanonicalImage;
use crate::landmark::DetectionResult;
use crate::model::{self, LoadError, ModelBackend, ModelConfig, ModelHandle, ModelSource};

#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("no model has been loaded")]
    NotInitialized,
    #[error("inference failed: {0}")]
    Inference(String),
}

#[derive(Debug, Default)]
enum SessionState {
    #[default]
    Uninitialized,
    Loaded(ModelHandle),
}

/// Holds the loaded model and runs detection on it.
#[derive(Debug, Default)]
pub struct Session {
    state: Mutex<SessionState>,
}

impl Session {
    /// Creates a session without a model. [`Session::detect`] fails until a model is loaded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a session that owns an already loaded model.
    pub fn with_handle(handle: ModelHandle) -> Self {
        Self {
            state: Mutex::new(SessionState::Loaded(handle)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // A panic while the lock was held (caught further up) leaves the state itself intact.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Loads the first loadable candidate and installs it.
    ///
    /// On failure, the session keeps whatever it held before.
    pub fn load(
        &self,
        candidates: &[ModelSource],
        config: &ModelConfig,
        backend: &dyn ModelBackend,
    ) -> Result<(), LoadError> {
        let handle = model::load(candidates, config, backend)?;
        self.install(handle);
        Ok(())
    }

    /// Installs `handle`, closing the previously installed model (if any).
    pub fn install(&self, handle: ModelHandle) {
        let previous = std::mem::replace(&mut *self.lock(), SessionState::Loaded(handle));
        if let SessionState::Loaded(old) = previous {
            log::debug!("replacing model {}", old.path().display());
            old.close();
        }
    }

    /// Returns whether a model is currently loaded.
    pub fn is_loaded(&self) -> bool {
        matches!(*self.lock(), SessionState::Loaded(_))
    }

    /// Runs the loaded model on `image`, blocking the calling thread until it is done.
    ///
    /// Hands are returned in the order the model produced them.
    pub fn detect(&self, image: &CanonicalImage) -> Result<DetectionResult, DetectionError> {
        let mut state = self.lock();
        let SessionState::Loaded(handle) = &mut *state else {
            return Err(DetectionError::NotInitialized);
        };

        handle
            .detect(image)
            .map_err(|e| DetectionError::Inference(format!("{e:#}")))
    }

    /// Releases the loaded model. Closing a session without a model does nothing.
    pub fn close(&self) {
        let previous = std::mem::take(&mut *self.lock());
        if let SessionState::Loaded(handle) = previous {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::landmark::{Hand, Handedness, Landmark};
    use crate::model::HandModel;

    use super::*;

    struct OneHand {
        closed: Arc<AtomicUsize>,
    }

    impl HandModel for OneHand {
        fn detect(&mut self, image: &CanonicalImage) -> anyhow::Result<DetectionResult> {
            if image.width() == 1 {
                anyhow::bail!("image too small");
            }
            let lm = Landmark::new(0.5, 0.5, 0.0);
            Ok(DetectionResult::new(vec![Hand::new(vec![lm; 21], Handedness::Left, 1.0)]))
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn handle(closed: &Arc<AtomicUsize>) -> ModelHandle {
        ModelHandle::new(
            Box::new(OneHand {
                closed: closed.clone(),
            }),
            PathBuf::from("test.task"),
            ModelConfig::default(),
        )
    }

    #[test]
    fn uninitialized() {
        let session = Session::new();
        assert!(!session.is_loaded());
        for (w, h) in [(1, 1), (10, 10), (0, 0)] {
            assert!(matches!(
                session.detect(&CanonicalImage::new(w, h)),
                Err(DetectionError::NotInitialized)
            ));
        }
    }

    #[test]
    fn detect_and_close() {
        let closed = Arc::new(AtomicUsize::new(0));
        let session = Session::with_handle(handle(&closed));
        assert!(session.is_loaded());

        let result = session.detect(&CanonicalImage::new(4, 4)).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.hands()[0].landmarks().len(), 21);

        match session.detect(&CanonicalImage::new(1, 1)) {
            Err(DetectionError::Inference(msg)) => assert_eq!(msg, "image too small"),
            other => panic!("unexpected result: {other:?}"),
        }

        session.close();
        session.close();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            session.detect(&CanonicalImage::new(4, 4)),
            Err(DetectionError::NotInitialized)
        ));
    }

    #[test]
    fn install_closes_previous() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let session = Session::with_handle(handle(&first));

        session.install(handle(&second));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert!(session.is_loaded());
    }

    #[test]
    fn failed_load_keeps_model() {
        struct Unreachable;
        impl ModelBackend for Unreachable {
            fn open(
                &self,
                _: &std::path::Path,
                _: &ModelConfig,
            ) -> anyhow::Result<Box<dyn HandModel>> {
                unreachable!("no candidates exist")
            }
        }

        let closed = Arc::new(AtomicUsize::new(0));
        let session = Session::with_handle(handle(&closed));
        let err = session
            .load(&[], &ModelConfig::default(), &Unreachable)
            .unwrap_err();
        assert!(matches!(err, LoadError::AllPathsFailed { .. }));
        assert!(session.is_loaded());
        assert_eq!(closed.load(Ordering::SeqCst), 0);
    }
}
