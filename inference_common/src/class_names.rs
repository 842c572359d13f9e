//! Class-name tables for detection models.
//!
//! Names come, in order of preference, from a user supplied labels file, the
//! `names` entry that Ultralytics writes into exported ONNX metadata, or the
//! COCO table that stock yolov8 weights are trained on.

use std::path::Path;

use anyhow::{bail, Context};

pub const COCO_NAMES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNames {
    names: Vec<String>,
}

impl ClassNames {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    pub fn coco() -> Self {
        Self::new(COCO_NAMES.iter().map(|s| s.to_string()).collect())
    }

    /// Reads one class name per line, skipping blank lines.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels file {path:?}"))?;
        let names: Vec<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect();
        if names.is_empty() {
            bail!("labels file {path:?} contains no class names");
        }
        Ok(Self::new(names))
    }

    /// Parses the python dict literal stored under the `names` metadata key,
    /// e.g. `{0: 'person', 1: "men's shoe"}`.
    ///
    /// Ids missing from the dict are filled in with the `Class <id>` fallback.
    pub fn from_metadata(raw: &str) -> anyhow::Result<Self> {
        let body = raw
            .trim()
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .with_context(|| format!("class names metadata is not a dict: {raw:?}"))?;

        let mut entries: Vec<(usize, String)> = Vec::new();
        let mut rest = body.trim_start();
        while !rest.is_empty() {
            let (key, after_key) = rest
                .split_once(':')
                .with_context(|| format!("missing ':' in class names metadata near {rest:?}"))?;
            let idx: usize = key
                .trim()
                .parse()
                .with_context(|| format!("invalid class id {:?}", key.trim()))?;
            let (name, after_name) = parse_quoted(after_key.trim_start())?;
            entries.push((idx, name));

            rest = after_name.trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        }

        let Some(max_idx) = entries.iter().map(|(idx, _)| *idx).max() else {
            bail!("class names metadata is empty");
        };
        let mut names: Vec<String> = (0..=max_idx).map(fallback_name).collect();
        for (idx, name) in entries {
            names[idx] = name;
        }
        Ok(Self::new(names))
    }

    /// Name for `idx`, or `Class <idx>` when the table has no entry.
    pub fn name(&self, idx: usize) -> String {
        self.names
            .get(idx)
            .cloned()
            .unwrap_or_else(|| fallback_name(idx))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for ClassNames {
    fn default() -> Self {
        Self::coco()
    }
}

fn fallback_name(idx: usize) -> String {
    format!("Class {idx}")
}

/// Splits a leading python string literal (single or double quoted) off `s`.
fn parse_quoted(s: &str) -> anyhow::Result<(String, &str)> {
    let mut chars = s.char_indices();
    let quote = match chars.next() {
        Some((_, q @ ('\'' | '"'))) => q,
        _ => bail!("expected quoted class name near {s:?}"),
    };

    let mut out = String::new();
    let mut escaped = false;
    for (i, c) in chars {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else if c == quote {
            return Ok((out, &s[i + c.len_utf8()..]));
        } else {
            out.push(c);
        }
    }
    bail!("unterminated class name near {s:?}")
}
