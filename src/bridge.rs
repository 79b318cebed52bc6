//! The request/response surface exposed to the host application.
//!
//! The host sends a [`FrameRequest`] describing a camera frame. The [`Endpoint`] converts the
//! frame, runs the [`Session`] on it and answers with the detected hands, or with one of three
//! error codes (see [`Error::code`]).
//!
//! [`Endpoint::handle_json`] speaks the same protocol as JSON:
//!
//! ```text
//! -> {"planes": [{"bytes": [...], "bytesPerRow": 16}], "width": 4, "height": 4, "format": "rgba"}
//! <- {"ok": [[{"x": 0.5, "y": 0.5, "z": 0.0}, ...], ...]}
//! <- {"error": {"code": "INVALID_ARGUMENTS", "message": "..."}}
//! ```

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::{self, Frame, PixelFormat, Plane};
use crate::landmark::DetectionResult;
use crate::session::{DetectionError, Session};

/// One plane of a [`FrameRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaneData {
    pub bytes: Vec<u8>,
    pub bytes_per_row: i64,
    /// Distance between horizontally adjacent samples. Defaults to 1 when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes_per_pixel: Option<i64>,
}

/// A camera frame sent by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRequest {
    pub planes: Vec<PlaneData>,
    pub width: i64,
    pub height: i64,
    /// `yuv420`, `rgba` or `bgra` (case-insensitive). Packed BGRA when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Errors reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The request was malformed.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// No model is loaded.
    #[error("model not initialized: {0}")]
    InitError(String),
    /// Conversion or inference failed.
    #[error("detection failed: {0}")]
    DetectionFailed(String),
}

impl Error {
    /// Returns the error code reported to the host.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidArguments(_) => "INVALID_ARGUMENTS",
            Error::InitError(_) => "INIT_ERROR",
            Error::DetectionFailed(_) => "DETECTION_ERROR",
        }
    }

    /// Returns the message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            Error::InvalidArguments(msg) | Error::InitError(msg) | Error::DetectionFailed(msg) => {
                msg
            }
        }
    }
}

impl From<DetectionError> for Error {
    fn from(e: DetectionError) -> Self {
        match e {
            DetectionError::NotInitialized => Error::InitError(e.to_string()),
            DetectionError::Inference(msg) => Error::DetectionFailed(msg),
        }
    }
}

/// A response in wire form.
#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Response {
    Ok(DetectionResult),
    Error(ErrorBody),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl From<Result<DetectionResult, Error>> for Response {
    fn from(result: Result<DetectionResult, Error>) -> Self {
        match result {
            Ok(hands) => Response::Ok(hands),
            Err(e) => Response::Error(ErrorBody {
                code: e.code(),
                message: e.message().to_string(),
            }),
        }
    }
}

/// Handles detection requests against a shared [`Session`].
#[derive(Debug, Clone)]
pub struct Endpoint {
    session: Arc<Session>,
}

impl Endpoint {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Converts the frame in `request` and runs detection on it.
    ///
    /// Panics raised by the pipeline do not propagate to the caller; they are reported as
    /// [`Error::DetectionFailed`].
    pub fn handle_detect_request(&self, request: &FrameRequest) -> Result<DetectionResult, Error> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process(request))) {
            Ok(result) => result,
            Err(payload) => {
                let msg = panic_message(&*payload);
                log::error!("detection panicked: {msg}");
                Err(Error::DetectionFailed(format!("internal error: {msg}")))
            }
        }
    }

    /// Parses a JSON [`FrameRequest`] and returns the JSON [`Response`].
    pub fn handle_json(&self, request: &str) -> String {
        let result = serde_json::from_str::<FrameRequest>(request)
            .map_err(|e| Error::InvalidArguments(format!("malformed request: {e}")))
            .and_then(|request| self.handle_detect_request(&request));

        serde_json::to_string(&Response::from(result)).unwrap_or_else(|e| {
            log::error!("failed to serialize response: {e}");
            r#"{"error":{"code":"DETECTION_ERROR","message":"failed to serialize response"}}"#
                .to_string()
        })
    }

    fn process(&self, request: &FrameRequest) -> Result<DetectionResult, Error> {
        let frame_data = validate(request)?;
        let planes = request
            .planes
            .iter()
            .zip(&frame_data.strides)
            .map(|(plane, &(row, pixel))| Plane::new(&plane.bytes, row).with_pixel_stride(pixel))
            .collect();
        let frame = Frame::new(
            frame_data.width,
            frame_data.height,
            frame_data.format,
            planes,
        );

        let image = frame::convert(&frame).map_err(|e| Error::DetectionFailed(e.to_string()))?;
        log::trace!("converted {} frame to {:?}", frame_data.format, image);

        Ok(self.session.detect(&image)?)
    }
}

struct ValidatedFrame {
    width: u32,
    height: u32,
    format: PixelFormat,
    /// `(row_stride, pixel_stride)` per plane.
    strides: Vec<(usize, usize)>,
}

fn validate(request: &FrameRequest) -> Result<ValidatedFrame, Error> {
    if request.planes.is_empty() || request.width <= 0 || request.height <= 0 {
        return Err(Error::InvalidArguments(format!(
            "need at least one plane and a positive size, got {} planes of {}x{}",
            request.planes.len(),
            request.width,
            request.height
        )));
    }

    let dimension = |value: i64, what: &str| {
        u32::try_from(value)
            .map_err(|_| Error::InvalidArguments(format!("{what} {value} is too large")))
    };
    let width = dimension(request.width, "width")?;
    let height = dimension(request.height, "height")?;

    let format = match &request.format {
        Some(name) => name
            .parse::<PixelFormat>()
            .map_err(|e| Error::InvalidArguments(e.to_string()))?,
        None => PixelFormat::Bgra,
    };

    let stride = |value: i64, what: &str, index: usize| {
        usize::try_from(value)
            .map_err(|_| Error::InvalidArguments(format!("plane {index} has negative {what}")))
    };
    let strides = request
        .planes
        .iter()
        .enumerate()
        .map(|(i, plane)| {
            let row = stride(plane.bytes_per_row, "bytesPerRow", i)?;
            let pixel = stride(plane.bytes_per_pixel.unwrap_or(1), "bytesPerPixel", i)?;
            Ok((row, pixel))
        })
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(ValidatedFrame {
        width,
        height,
        format,
        strides,
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        *s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(Error::InvalidArguments(String::new()).code(), "INVALID_ARGUMENTS");
        assert_eq!(Error::InitError(String::new()).code(), "INIT_ERROR");
        assert_eq!(Error::DetectionFailed(String::new()).code(), "DETECTION_ERROR");

        assert_eq!(
            Error::from(DetectionError::NotInitialized).code(),
            "INIT_ERROR"
        );
        assert_eq!(
            Error::from(DetectionError::Inference("boom".into())),
            Error::DetectionFailed("boom".into())
        );
    }

    #[test]
    fn validation() {
        let request = FrameRequest {
            planes: vec![],
            width: 0,
            height: 4,
            format: None,
        };
        assert!(matches!(validate(&request), Err(Error::InvalidArguments(_))));

        let plane = PlaneData {
            bytes: vec![0; 64],
            bytes_per_row: 16,
            bytes_per_pixel: None,
        };
        let mut request = FrameRequest {
            planes: vec![plane],
            width: 4,
            height: 4,
            format: None,
        };
        let frame = validate(&request).ok().unwrap();
        assert_eq!(frame.format, PixelFormat::Bgra);
        assert_eq!(frame.strides, [(16, 1)]);

        request.format = Some("NV21".into());
        assert!(matches!(validate(&request), Err(Error::InvalidArguments(_))));

        request.format = Some("RGBA".into());
        request.planes[0].bytes_per_row = -16;
        assert!(matches!(validate(&request), Err(Error::InvalidArguments(_))));

        request.planes[0].bytes_per_row = 16;
        request.height = i64::from(u32::MAX) + 1;
        assert!(matches!(validate(&request), Err(Error::InvalidArguments(_))));
    }

    #[test]
    fn panic_payloads() {
        assert_eq!(panic_message(&"static"), "static");
        assert_eq!(panic_message(&String::from("owned")), "owned");
        assert_eq!(panic_message(&42), "unknown panic");
    }
}
