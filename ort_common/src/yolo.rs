//! Yolov8-style detection on top of an ort session: letterbox preprocessing,
//! output decoding and non-maximum suppression.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, bail};
use fast_image_resize as fr;
use image::DynamicImage;
use inference_common::bbox::Bbox;
use inference_common::class_names::ClassNames;
use inference_common::frame_times::InferenceTimes;
use inference_common::nms::{MAX_DETECTIONS, non_max_suppression};
use ndarray::{Array4, CowArray};
use ort::session::Session;
use ort::value::TensorRef;

use crate::session;

/// Grey used for letterbox padding.
const PAD_VALUE: u8 = 114;

/// Thresholds and input geometry for a detection run.
#[derive(Debug, Clone, Copy)]
pub struct DetectParams {
    /// Square side the model expects, in pixels.
    pub input_size: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            input_size: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: MAX_DETECTIONS,
        }
    }
}

/// How an image was fitted into the model input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    /// Maps a box from model input space back to original image pixels.
    pub fn to_original(&self, bbox: Bbox) -> Bbox {
        Bbox {
            xmin: (bbox.xmin - self.pad_x) / self.scale,
            ymin: (bbox.ymin - self.pad_y) / self.scale,
            xmax: (bbox.xmax - self.pad_x) / self.scale,
            ymax: (bbox.ymax - self.pad_y) / self.scale,
            ..bbox
        }
    }
}

/// Resizes `image` to fit a `size x size` square keeping its aspect ratio,
/// pads the rest with grey, and returns the NCHW tensor normalised to [0, 1].
pub fn letterbox(image: &DynamicImage, size: u32) -> anyhow::Result<(Array4<f32>, Letterbox)> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();
    if width == 0 || height == 0 {
        bail!("cannot run inference on an empty {width}x{height} image");
    }

    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let new_w = ((width as f32 * scale).round() as u32).clamp(1, size);
    let new_h = ((height as f32 * scale).round() as u32).clamp(1, size);
    let pad_x = (size - new_w) / 2;
    let pad_y = (size - new_h) / 2;

    let src = fr::images::ImageRef::new(width, height, rgb.as_raw(), fr::PixelType::U8x3)
        .context("failed to create resize source")?;
    let mut dst = fr::images::Image::new(new_w, new_h, fr::PixelType::U8x3);
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    fr::Resizer::new()
        .resize(&src, &mut dst, Some(&options))
        .context("letterbox resize failed")?;
    let raw = dst.buffer();

    let size = size as usize;
    let mut input = Array4::<f32>::from_elem((1, 3, size, size), PAD_VALUE as f32 / 255.0);
    for y in 0..new_h as usize {
        for x in 0..new_w as usize {
            let idx = (y * new_w as usize + x) * 3;
            for c in 0..3 {
                input[[0, c, y + pad_y as usize, x + pad_x as usize]] = raw[idx + c] as f32 / 255.0;
            }
        }
    }

    Ok((
        input,
        Letterbox {
            scale,
            pad_x: pad_x as f32,
            pad_y: pad_y as f32,
        },
    ))
}

/// Turns raw yolo output into candidate boxes in original image pixels.
///
/// The output is `[1, 4 + classes, proposals]` as exported by Ultralytics, or
/// the transposed `[1, proposals, 4 + classes]`. Each proposal keeps its best
/// class if that score reaches `conf_threshold`.
pub fn decode(
    output: &[f32],
    shape: &[usize],
    letterbox: &Letterbox,
    orig_width: u32,
    orig_height: u32,
    conf_threshold: f32,
) -> anyhow::Result<Vec<Bbox>> {
    let (rows, cols) = match shape {
        [1, rows, cols] | [rows, cols] => (*rows, *cols),
        _ => bail!("unexpected yolo output shape {shape:?}"),
    };
    // Proposals far outnumber classes, so the smaller axis holds the channels.
    let transposed = rows > cols && cols > 4;
    let (channels, proposals) = if transposed { (cols, rows) } else { (rows, cols) };
    if channels <= 4 {
        bail!("yolo output shape {shape:?} has no class scores");
    }
    if output.len() != channels * proposals {
        bail!(
            "yolo output holds {} values, shape {shape:?} needs {}",
            output.len(),
            channels * proposals
        );
    }

    let at = |channel: usize, proposal: usize| {
        if transposed {
            output[proposal * channels + channel]
        } else {
            output[channel * proposals + proposal]
        }
    };

    let num_classes = channels - 4;
    let mut candidates = Vec::new();
    for i in 0..proposals {
        let (class_idx, score) = (0..num_classes)
            .map(|c| (c, at(4 + c, i)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if score < conf_threshold {
            continue;
        }

        let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
        if ![cx, cy, w, h, score].iter().all(|v| v.is_finite()) {
            log::debug!("Skipping non-finite proposal {i}");
            continue;
        }
        // Sizes are taken as magnitudes so corners always come out ordered.
        let bbox = Bbox::from_cxcywh(cx, cy, w.abs(), h.abs(), score, class_idx);
        candidates.push(
            letterbox
                .to_original(bbox)
                .clip(orig_width as f32, orig_height as f32),
        );
    }

    Ok(candidates)
}

/// A loaded yolo model together with the class names it reports.
pub struct YoloDetector {
    session: Session,
    names: ClassNames,
}

impl YoloDetector {
    /// Loads the model. Class names come from `labels` if given, then the
    /// model metadata, then the coco table.
    pub fn load(model_path: &Path, cuda: bool, labels: Option<&Path>) -> anyhow::Result<Self> {
        let session = session::build_session(model_path, cuda)?;

        let names = match labels {
            Some(path) => ClassNames::from_file(path)?,
            None => match session::class_names_from_session(&session) {
                Ok(Some(names)) => names,
                Ok(None) => {
                    log::info!("Model carries no class names, using coco names");
                    ClassNames::coco()
                }
                Err(e) => {
                    log::warn!("Ignoring unreadable model class names: {e:#}");
                    ClassNames::coco()
                }
            },
        };
        log::debug!("Model has {} class names", names.len());

        Ok(Self { session, names })
    }

    pub fn class_names(&self) -> &ClassNames {
        &self.names
    }

    /// Runs the full detect pipeline on one image and returns the kept boxes,
    /// best first.
    pub fn detect(
        &mut self,
        image: &DynamicImage,
        params: &DetectParams,
        times: &mut InferenceTimes,
    ) -> anyhow::Result<Vec<Bbox>> {
        let start = Instant::now();
        let (input, letterbox) = letterbox(image, params.input_size)?;
        times.preprocess = start.elapsed();

        let start = Instant::now();
        let input_dyn = CowArray::from(input).into_dyn();
        let inputs = ort::inputs![TensorRef::from_array_view(&input_dyn)?];
        let outputs = self.session.run(inputs).context("yolo inference failed")?;
        times.forward = start.elapsed();

        let start = Instant::now();
        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("failed to extract yolo output tensor")?;
        let dims: Vec<usize> = shape.iter().map(|&d| d as usize).collect();
        let candidates = decode(
            data,
            &dims,
            &letterbox,
            image.width(),
            image.height(),
            params.conf_threshold,
        )?;
        let kept = non_max_suppression(candidates, params.iou_threshold, params.max_detections);
        times.postprocess = start.elapsed();

        log::debug!("Kept {} detections after nms", kept.len());
        Ok(kept)
    }
}

#[cfg(test)]
mod tests {
    use image::{Rgb, RgbImage};

    use super::*;

    const IDENTITY: Letterbox = Letterbox {
        scale: 1.0,
        pad_x: 0.0,
        pad_y: 0.0,
    };

    /// Lays out proposals as `[1, 4 + classes, proposals]`.
    fn channel_major(proposals: &[[f32; 6]]) -> (Vec<f32>, Vec<usize>) {
        let n = proposals.len();
        let mut data = vec![0.0; 6 * n];
        for (i, p) in proposals.iter().enumerate() {
            for (c, v) in p.iter().enumerate() {
                data[c * n + i] = *v;
            }
        }
        (data, vec![1, 6, n])
    }

    #[test]
    fn letterbox_wide_image_pads_top_and_bottom() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([255, 0, 0])));
        let (input, lb) = letterbox(&image, 64).unwrap();

        assert_eq!(input.shape(), &[1, 3, 64, 64]);
        assert_eq!(lb.scale, 0.32);
        assert_eq!(lb.pad_x, 0.0);
        assert_eq!(lb.pad_y, 16.0);

        let pad = PAD_VALUE as f32 / 255.0;
        assert_eq!(input[[0, 0, 0, 32]], pad);
        assert_eq!(input[[0, 0, 63, 32]], pad);
        assert!(input[[0, 0, 32, 32]] > 0.99);
        assert!(input[[0, 1, 32, 32]] < 0.01);
    }

    #[test]
    fn letterbox_to_original_undoes_padding_and_scale() {
        let lb = Letterbox {
            scale: 0.5,
            pad_x: 0.0,
            pad_y: 80.0,
        };
        let bbox = lb.to_original(Bbox::new(10.0, 90.0, 30.0, 100.0, 0.8, 1));
        assert_eq!(bbox.as_xyxy(), [20.0, 20.0, 60.0, 40.0]);
    }

    #[test]
    fn decode_picks_best_class_and_filters_by_confidence() {
        let (data, shape) = channel_major(&[
            [50.0, 50.0, 20.0, 10.0, 0.1, 0.9],
            [10.0, 10.0, 4.0, 4.0, 0.2, 0.1],
        ]);
        let boxes = decode(&data, &shape, &IDENTITY, 100, 100, 0.25).unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_idx, 1);
        assert_eq!(boxes[0].confidence, 0.9);
        assert_eq!(boxes[0].as_xyxy(), [40.0, 45.0, 60.0, 55.0]);
    }

    #[test]
    fn decode_accepts_transposed_output() {
        let proposals = [
            [50.0, 50.0, 20.0, 10.0, 0.9, 0.1],
            [10.0, 10.0, 4.0, 4.0, 0.1, 0.1],
            [20.0, 20.0, 4.0, 4.0, 0.1, 0.1],
            [30.0, 30.0, 4.0, 4.0, 0.1, 0.1],
            [40.0, 40.0, 4.0, 4.0, 0.1, 0.1],
            [60.0, 60.0, 4.0, 4.0, 0.1, 0.1],
            [70.0, 70.0, 4.0, 4.0, 0.1, 0.1],
        ];
        let data: Vec<f32> = proposals.iter().flatten().copied().collect();
        let boxes = decode(&data, &[1, 7, 6], &IDENTITY, 100, 100, 0.25).unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_idx, 0);
        assert_eq!(boxes[0].as_xyxy(), [40.0, 45.0, 60.0, 55.0]);
    }

    #[test]
    fn decode_clips_to_image() {
        let (data, shape) = channel_major(&[[5.0, 95.0, 20.0, 20.0, 0.7, 0.0]]);
        let boxes = decode(&data, &shape, &IDENTITY, 100, 100, 0.25).unwrap();

        let b = boxes[0];
        assert_eq!(b.as_xyxy(), [0.0, 85.0, 15.0, 100.0]);
        assert!(b.xmin <= b.xmax && b.ymin <= b.ymax);
    }

    #[test]
    fn decode_skips_non_finite_proposals() {
        let (data, shape) = channel_major(&[
            [f32::NAN, 50.0, 20.0, 10.0, 0.9, 0.0],
            [50.0, 50.0, f32::INFINITY, 10.0, 0.9, 0.0],
            [50.0, 50.0, 20.0, 10.0, f32::INFINITY, 0.0],
            [30.0, 30.0, 10.0, 10.0, 0.8, 0.0],
        ]);
        let boxes = decode(&data, &shape, &IDENTITY, 100, 100, 0.25).unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].as_xyxy(), [25.0, 25.0, 35.0, 35.0]);
        assert!(boxes[0].as_xyxy().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn decode_orders_corners_for_negative_sizes() {
        let (data, shape) = channel_major(&[[50.0, 50.0, -20.0, -10.0, 0.9, 0.0]]);
        let boxes = decode(&data, &shape, &IDENTITY, 100, 100, 0.25).unwrap();

        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        assert_eq!(b.as_xyxy(), [40.0, 45.0, 60.0, 55.0]);
        assert!(b.xmin <= b.xmax && b.ymin <= b.ymax);
    }

    #[test]
    fn decode_rejects_bad_shapes() {
        assert!(decode(&[0.0; 8], &[1, 2, 2, 2], &IDENTITY, 10, 10, 0.25).is_err());
        assert!(decode(&[0.0; 8], &[1, 4, 2], &IDENTITY, 10, 10, 0.25).is_err());
        assert!(decode(&[0.0; 5], &[1, 6, 2], &IDENTITY, 10, 10, 0.25).is_err());
    }

    #[test]
    fn decode_with_no_proposals() {
        let boxes = decode(&[], &[1, 84, 0], &IDENTITY, 10, 10, 0.25).unwrap();
        assert!(boxes.is_empty());
    }
}
