mod process_image;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::error::ErrorKind;
use inference_common::frame_times::InferenceTimes;
use inference_common::output::{Envelope, MISSING_IMAGE_PATH};
use ort_common::yolo::{DetectParams, YoloDetector};
use tracing_subscriber::prelude::*;

/// Runs a yolo onnx model on one image, saves an annotated copy next to it and
/// prints the detections as a single json line.
#[derive(Debug, Parser)]
#[command(version)]
pub struct Args {
    /// Path to input image (.jpeg/.png).
    #[arg(allow_hyphen_values = true)]
    image_path: PathBuf,
    /// Yolov8 onnx model file to use.
    #[arg(long, short, default_value = "model.onnx")]
    model: PathBuf,
    /// Whether to attempt to use `cuda` hw acceleration.
    /// This may silently fail and fallback to cpu acceleration presently.
    #[arg(long, action, default_value = "false")]
    cuda: bool,
    /// Minimum class score for a detection to be reported.
    #[arg(long, default_value_t = 0.25, value_parser = parse_unit_interval)]
    conf: f32,
    /// Overlap above which a weaker box of the same class is suppressed.
    #[arg(long, default_value_t = 0.45, value_parser = parse_unit_interval)]
    iou: f32,
    /// Square input size the model was exported with.
    #[arg(long, default_value_t = 640, value_parser = clap::value_parser!(u32).range(32..=4096))]
    imgsz: u32,
    /// Class names file, one per line. Overrides names stored in the model.
    #[arg(long)]
    labels: Option<PathBuf>,
    /// TrueType font for box labels. Defaults to a common system font.
    #[arg(long)]
    font: Option<PathBuf>,
}

fn parse_unit_interval(s: &str) -> Result<f32, String> {
    let value: f32 = s.parse().map_err(|e| format!("{e}"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is not in [0, 1]"))
    }
}

fn main() -> ExitCode {
    // Initialize logging. Stdout carries the json result only.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,predict_ort=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let envelope = match Args::try_parse() {
        Ok(args) => run(&args).unwrap_or_else(|e| {
            log::error!("Prediction failed: {e:?}");
            Envelope::error(format!("{e:#}"))
        }),
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                if let Err(err) = e.print() {
                    log::warn!("Failed to print {:?} output: {err}", e.kind());
                }
                return ExitCode::SUCCESS;
            }
            ErrorKind::MissingRequiredArgument | ErrorKind::UnknownArgument => {
                log::debug!("{e}");
                Envelope::error(MISSING_IMAGE_PATH)
            }
            _ => Envelope::error(e.to_string().trim_end()),
        },
    };

    match envelope.to_json() {
        Ok(json) => println!("{json}"),
        Err(e) => {
            log::error!("Failed to serialize result: {e}");
            println!(r#"{{"status":"error","message":"failed to serialize result"}}"#);
            return ExitCode::FAILURE;
        }
    }
    ExitCode::from(envelope.exit_code())
}

/// Loads the model and runs it on the image named in `args`.
fn run(args: &Args) -> anyhow::Result<Envelope> {
    let _span = tracing::info_span!("predict", image = ?args.image_path).entered();

    let mut frame_times = InferenceTimes::default();
    let start = std::time::Instant::now();
    let mut detector = YoloDetector::load(&args.model, args.cuda, args.labels.as_deref())?;
    let model_load = start.elapsed();

    let params = DetectParams {
        input_size: args.imgsz,
        conf_threshold: args.conf,
        iou_threshold: args.iou,
        ..Default::default()
    };

    let envelope = process_image::process_image(
        &args.image_path,
        &mut detector,
        &params,
        args.font.as_deref(),
        &mut frame_times,
    )?;
    frame_times.model_load = model_load;

    // NB! For a single image, ort times will be misleading,
    // as the first time it's used, it does all kinds of lazy init.
    log::debug!("{frame_times:?}, total {:?}", frame_times.total());
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_image_path_starting_with_hyphen() {
        let args = Args::try_parse_from(["predict_ort", "-cat.jpg"]).unwrap();
        assert_eq!(args.image_path, PathBuf::from("-cat.jpg"));
        assert_eq!(args.model, PathBuf::from("model.onnx"));
    }

    #[test]
    fn flags_still_parse_after_image_path() {
        let args = Args::try_parse_from(["predict_ort", "-cat.jpg", "--conf", "0.5"]).unwrap();
        assert_eq!(args.image_path, PathBuf::from("-cat.jpg"));
        assert_eq!(args.conf, 0.5);
    }

    #[test]
    fn help_is_not_taken_as_image_path() {
        let err = Args::try_parse_from(["predict_ort", "--help"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DisplayHelp);
    }

    #[test]
    fn missing_and_extra_paths_are_argument_count_errors() {
        let err = Args::try_parse_from(["predict_ort"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);

        let err = Args::try_parse_from(["predict_ort", "a.jpg", "b.jpg"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownArgument);
    }

    #[test]
    fn rejects_threshold_outside_unit_interval() {
        let err = Args::try_parse_from(["predict_ort", "cat.jpg", "--iou", "1.5"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }
}
