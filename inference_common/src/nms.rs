use crate::bbox::Bbox;

/// Upper bound on detections kept per image.
pub const MAX_DETECTIONS: usize = 300;

/// Greedy, class-aware non-maximum suppression.
///
/// Candidates are visited in descending confidence order; a candidate is
/// dropped when it overlaps an already kept box of the same class by more than
/// `iou_threshold`. The result is sorted by descending confidence and holds at
/// most `max_detections` boxes.
pub fn non_max_suppression(
    mut candidates: Vec<Bbox>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<Bbox> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Bbox> = Vec::new();
    for candidate in candidates {
        if kept.len() >= max_detections {
            break;
        }
        let suppressed = kept.iter().any(|k| {
            k.class_idx == candidate.class_idx && k.iou(&candidate) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept
}
