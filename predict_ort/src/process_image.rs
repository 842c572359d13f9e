use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use image::DynamicImage;
use inference_common::bbox::Bbox;
use inference_common::class_names::ClassNames;
use inference_common::frame_times::InferenceTimes;
use inference_common::output::{result_image_path, Envelope, Prediction};
use inference_common::render;
use ort_common::yolo::{DetectParams, YoloDetector};

/// Performs inference on a single image file.
pub fn process_image(
    path: &Path,
    detector: &mut YoloDetector,
    params: &DetectParams,
    font_path: Option<&Path>,
    frame_times: &mut InferenceTimes,
) -> anyhow::Result<Envelope> {
    let og_image = read_image(path, frame_times)?;
    let bboxes = detector.detect(&og_image, params, frame_times)?;
    save_result(
        path,
        &og_image,
        &bboxes,
        detector.class_names(),
        font_path,
        frame_times,
    )
}

fn read_image(path: &Path, frame_times: &mut InferenceTimes) -> anyhow::Result<DynamicImage> {
    let start = Instant::now();
    let image = image::open(path).with_context(|| format!("failed to open image {path:?}"))?;
    frame_times.image_read = start.elapsed();
    Ok(image)
}

/// Draws `bboxes` onto `og_image`, writes it next to `path` and builds the
/// success envelope.
///
/// The annotated image is written before the envelope is built, so a success
/// result always names an existing file.
fn save_result(
    path: &Path,
    og_image: &DynamicImage,
    bboxes: &[Bbox],
    names: &ClassNames,
    font_path: Option<&Path>,
    frame_times: &mut InferenceTimes,
) -> anyhow::Result<Envelope> {
    log::info!("{} detections in {path:?}", bboxes.len());
    for bbox in bboxes {
        log::debug!(
            "{} {:.2} [{:.1}, {:.1}, {:.1}, {:.1}]",
            names.name(bbox.class_idx),
            bbox.confidence,
            bbox.xmin,
            bbox.ymin,
            bbox.xmax,
            bbox.ymax
        );
    }

    // Draw overlays.
    let start = Instant::now();
    let font = render::load_font(font_path)?;
    let annotated = render::annotate(og_image, bboxes, names, font.as_ref());
    frame_times.render = start.elapsed();

    // Save output image next to the input.
    let start = Instant::now();
    let output_path = result_image_path(path);
    annotated
        .save(&output_path)
        .with_context(|| format!("failed to write annotated image {output_path:?}"))?;
    frame_times.image_write = start.elapsed();
    log::info!("Annotated image saved to {output_path:?}");

    let predictions = bboxes
        .iter()
        .map(|bbox| Prediction::from_bbox(bbox, names))
        .collect();
    Ok(Envelope::success(predictions, &output_path))
}
