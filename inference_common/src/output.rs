//! The JSON contract with the calling host process, and where the annotated
//! image goes.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::bbox::Bbox;
use crate::class_names::ClassNames;

/// Message reported when the image path argument is missing.
pub const MISSING_IMAGE_PATH: &str = "Image path not provided";

/// One detection as reported to the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    #[serde(rename = "class")]
    pub class_name: String,
    pub confidence: f32,
    /// `[xmin, ymin, xmax, ymax]` in pixels of the input image.
    pub bounding_box: [f32; 4],
}

impl Prediction {
    pub fn from_bbox(bbox: &Bbox, names: &ClassNames) -> Self {
        Self {
            class_name: names.name(bbox.class_idx),
            confidence: bbox.confidence,
            bounding_box: bbox.as_xyxy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Envelope {
    Success {
        predictions: Vec<Prediction>,
        output_image: String,
    },
    Error {
        message: String,
    },
}

impl Envelope {
    pub fn success(predictions: Vec<Prediction>, output_image: &Path) -> Self {
        Self::Success {
            predictions,
            output_image: output_image.to_string_lossy().into_owned(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Process exit code matching this outcome.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Success { .. } => 0,
            Self::Error { .. } => 1,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// `<dir>/<stem>_result<.ext>` next to `input`.
pub fn result_image_path(input: &Path) -> PathBuf {
    let mut file_name = OsString::from(input.file_stem().unwrap_or_default());
    file_name.push("_result");
    if let Some(ext) = input.extension() {
        file_name.push(".");
        file_name.push(ext);
    }
    input.with_file_name(file_name)
}
