//! Draws detections onto a copy of the input image.

use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::Context;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::bbox::Bbox;
use crate::class_names::ClassNames;

/// Per-class colours, cycled by class index.
const PALETTE: [[u8; 3]; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

const LABEL_TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Fonts tried, in order, when no font path is given.
const SYSTEM_FONTS: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub fn class_color(class_idx: usize) -> Rgb<u8> {
    Rgb(PALETTE[class_idx % PALETTE.len()])
}

/// Box outline thickness for an image of the given size.
pub fn line_width(width: u32, height: u32) -> u32 {
    let lw = ((width + height) as f32 / 2.0 * 0.003).round() as u32;
    lw.max(2)
}

fn font_scale(width: u32, height: u32) -> f32 {
    ((width + height) as f32 / 2.0 * 0.035).round().max(12.0)
}

/// Loads the label font.
///
/// An explicit `path` must load. Without one, the first readable system font is
/// used; `Ok(None)` means labels are skipped and only boxes are drawn.
pub fn load_font(path: Option<&Path>) -> anyhow::Result<Option<FontVec>> {
    if let Some(path) = path {
        let font = read_font(path).with_context(|| format!("failed to load font {path:?}"))?;
        return Ok(Some(font));
    }

    for candidate in SYSTEM_FONTS.iter().map(PathBuf::from) {
        if !candidate.exists() {
            continue;
        }
        match read_font(&candidate) {
            Ok(font) => {
                log::debug!("Using label font {candidate:?}");
                return Ok(Some(font));
            }
            Err(e) => log::debug!("Skipping font {candidate:?}: {e:#}"),
        }
    }

    log::warn!("No label font found, annotated image will have boxes only");
    Ok(None)
}

fn read_font(path: &Path) -> anyhow::Result<FontVec> {
    let bytes = std::fs::read(path)?;
    Ok(FontVec::try_from_vec(bytes)?)
}

/// Returns an RGB copy of `image` with every box and, if `font` is set, its
/// `<class> <confidence>` label drawn on.
pub fn annotate(
    image: &DynamicImage,
    bboxes: &[Bbox],
    names: &ClassNames,
    font: Option<&FontVec>,
) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();
    let lw = line_width(width, height);
    let scale = PxScale::from(font_scale(width, height));

    for bbox in bboxes {
        let color = class_color(bbox.class_idx);
        draw_box(&mut canvas, bbox, lw, color);

        if let Some(font) = font {
            let label = format!("{} {:.2}", names.name(bbox.class_idx), bbox.confidence);
            draw_label(&mut canvas, bbox, &label, scale, font, color);
        }
    }

    canvas
}

fn draw_box(canvas: &mut RgbImage, bbox: &Bbox, lw: u32, color: Rgb<u8>) {
    let x0 = bbox.xmin.round() as i32;
    let y0 = bbox.ymin.round() as i32;
    let w = bbox.width().round() as i32;
    let h = bbox.height().round() as i32;

    // Thickness grows inwards so the outline stays inside the box.
    for i in 0..lw as i32 {
        let (iw, ih) = (w - 2 * i, h - 2 * i);
        if iw <= 0 || ih <= 0 {
            break;
        }
        let rect = Rect::at(x0 + i, y0 + i).of_size(iw as u32, ih as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

fn draw_label(
    canvas: &mut RgbImage,
    bbox: &Bbox,
    label: &str,
    scale: PxScale,
    font: &FontVec,
    color: Rgb<u8>,
) {
    let (tw, th) = text_size(scale, font, label);
    if tw == 0 || th == 0 {
        return;
    }
    let pad = (th / 4).max(1);
    let label_w = tw + 2 * pad;
    let label_h = th + 2 * pad;

    let x = bbox.xmin.round() as i32;
    let above = bbox.ymin.round() as i32 - label_h as i32;
    // Goes inside the box when there is no room above it.
    let y = if above >= 0 { above } else { bbox.ymin.round() as i32 };

    draw_filled_rect_mut(canvas, Rect::at(x, y).of_size(label_w, label_h), color);
    draw_text_mut(
        canvas,
        LABEL_TEXT_COLOR,
        x + pad as i32,
        y + pad as i32,
        scale,
        font,
        label,
    );
}
