use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use handpipe::bridge::{Endpoint, FrameRequest, PlaneData, Response};
use handpipe::image::CanonicalImage;
use handpipe::model::{self, ModelConfig, ModelSource, OnnxBackend, RunningMode};
use handpipe::session::Session;
use handpipe::timer::Timer;

#[derive(Parser)]
#[command(name = "handpipe")]
#[command(about = "Detect hand landmarks in images and print them as JSON")]
struct Cli {
    /// Image files to process, in order
    #[arg(value_name = "IMAGE", required = true)]
    images: Vec<PathBuf>,

    /// Model bundle to try before the default locations (can be repeated)
    #[arg(long = "model", value_name = "PATH")]
    models: Vec<PathBuf>,

    /// Directory the default model locations are resolved against
    #[arg(long, value_name = "DIR")]
    asset_root: Option<PathBuf>,

    /// Treat the images as consecutive video frames and track hands between them
    #[arg(long)]
    stream: bool,

    #[arg(long, default_value_t = ModelConfig::DEFAULT_MAX_HANDS)]
    max_hands: usize,

    #[arg(long, default_value_t = ModelConfig::DEFAULT_CONFIDENCE)]
    min_detection_confidence: f32,

    #[arg(long, default_value_t = ModelConfig::DEFAULT_CONFIDENCE)]
    min_presence_confidence: f32,

    #[arg(long, default_value_t = ModelConfig::DEFAULT_CONFIDENCE)]
    min_tracking_confidence: f32,
}

impl Cli {
    fn config(&self) -> ModelConfig {
        ModelConfig::default()
            .with_max_hands(self.max_hands)
            .with_min_detection_confidence(self.min_detection_confidence)
            .with_min_presence_confidence(self.min_presence_confidence)
            .with_min_tracking_confidence(self.min_tracking_confidence)
            .with_running_mode(if self.stream {
                RunningMode::Stream
            } else {
                RunningMode::SingleImage
            })
    }

    fn candidates(&self) -> Vec<ModelSource> {
        let mut candidates = self
            .models
            .iter()
            .map(|path| ModelSource::from(path.as_path()))
            .collect::<Vec<_>>();
        match &self.asset_root {
            Some(root) => candidates.extend(model::default_candidates(root)),
            None => candidates.extend(model::env_candidates()),
        }
        candidates
    }
}

fn main() -> anyhow::Result<()> {
    handpipe::init_logger!();

    let args = Cli::parse();

    let session = Arc::new(Session::new());
    if let Err(e) = session.load(&args.candidates(), &args.config(), &OnnxBackend) {
        // Keep going: every request will report the missing model, like the host would see it.
        log::error!("{e}");
    }
    let endpoint = Endpoint::new(session.clone());

    let mut t_request = Timer::new("request");
    for path in &args.images {
        let image = CanonicalImage::load(path)?;
        let request = FrameRequest {
            width: image.width().into(),
            height: image.height().into(),
            format: Some("rgba".into()),
            planes: vec![PlaneData {
                bytes_per_row: image.stride().try_into()?,
                bytes_per_pixel: None,
                bytes: image.into_raw(),
            }],
        };

        let result = t_request.time(|| endpoint.handle_detect_request(&request));
        println!("{}", serde_json::to_string(&Response::from(result))?);
    }
    log::debug!("{t_request}");

    session.close();
    Ok(())
}
