//! On-device hand landmark detection.
//!
//! `handpipe` takes raw camera frames, converts them to a canonical RGBA image, runs a two-stage
//! hand landmark model (palm detection followed by landmark regression) on them, and returns the
//! detected hands as normalized 3D landmarks.
//!
//! The pipeline is split into four layers:
//!
//! * [`frame`]: converts planar YUV 4:2:0 and (possibly padded) RGBA/BGRA buffers to an
//!   [`image::CanonicalImage`].
//! * [`model`]: resolves a model bundle from an ordered list of candidate locations.
//! * [`session`]: owns the loaded model and serializes detection calls.
//! * [`bridge`]: the request/response surface exposed to the host application.
//!
//! # Coordinates
//!
//! Landmarks returned to callers use normalized image coordinates: X points to the right, Y points
//! *down*, and both are in range 0.0 to 1.0 for points inside the image. Z is the depth relative to
//! the wrist, scaled like X (smaller values are closer to the camera).
//!
//! # Environment Variables
//!
//! * `HANDPIPE_MODEL_PATH`: a model bundle path that is tried before any other candidate.
//! * `HANDPIPE_ASSET_ROOT`: the directory the default asset candidates are resolved against. If
//!   unset, the current working directory is used.

pub mod bridge;
pub mod detection;
pub mod frame;
pub mod hand;
pub mod image;
pub mod landmark;
pub mod model;
pub mod nn;
pub mod num;
pub mod session;
pub mod timer;

use log::LevelFilter;

/// macro-use only, not part of public API.
#[doc(hidden)]
pub fn init_logger(calling_crate: &'static str) {
    let log_level = if cfg!(debug_assertions) {
        LevelFilter::Trace
    } else {
        LevelFilter::Debug
    };
    env_logger::Builder::new()
        .filter(Some(calling_crate), log_level)
        .filter(Some(env!("CARGO_CRATE_NAME")), log_level)
        .filter(Some("tract_onnx"), LevelFilter::Warn)
        .filter(Some("tract_core"), LevelFilter::Warn)
        .parse_default_env()
        .try_init()
        .ok();
}

/// Initializes logging to *stderr*.
///
/// If `cfg!(debug_assertions)` is enabled, the calling crate and `handpipe` will log at *trace*
/// level. Otherwise, they will log at *debug* level. `RUST_LOG` can override either.
///
/// If a global logger is already registered, this macro will do nothing.
#[macro_export]
macro_rules! init_logger {
    () => {
        $crate::init_logger(env!("CARGO_CRATE_NAME"))
    };
}
