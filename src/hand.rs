//! Detection and landmark estimation of human hands.

pub mod detection;
pub mod landmark;
mod landmarker;

pub use landmarker::{HandLandmarker, LandmarkStage, PalmStage};
