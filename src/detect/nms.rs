//! Greedy non-maximum suppression.

use super::result::Detection;

/// Added to the IoU denominator so degenerate boxes never divide by zero.
pub const IOU_EPSILON: f32 = 1e-10;

/// Intersection over union of two `[l, t, r, b]` boxes.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = w * h;
    let area_a = (a[2] - a[0]) * (a[3] - a[1]);
    let area_b = (b[2] - b[0]) * (b[3] - b[1]);
    inter / (area_a + area_b - inter + IOU_EPSILON)
}

/// Indices sorted by score descending; equal scores keep input order.
///
/// NaN scores rank below every number.
pub fn score_order(detections: &[Detection]) -> Vec<usize> {
    let rank = |i: usize| {
        let score = detections[i].score;
        if score.is_nan() {
            f32::NEG_INFINITY
        } else {
            score
        }
    };
    let mut order: Vec<usize> = (0..detections.len()).collect();
    order.sort_by(|&i, &j| rank(j).total_cmp(&rank(i)).then(i.cmp(&j)));
    order
}

/// Indices of the boxes that survive, highest score first.
///
/// A box is dropped when its IoU with an already kept box exceeds `threshold`.
pub fn nms(detections: &[Detection], threshold: f32) -> Vec<usize> {
    let mut keep: Vec<usize> = Vec::new();
    let mut suppressed = vec![false; detections.len()];
    for i in score_order(detections) {
        if suppressed[i] {
            continue;
        }
        keep.push(i);
        for (j, flag) in suppressed.iter_mut().enumerate() {
            if !*flag && j != i && iou(&detections[i].bbox, &detections[j].bbox) > threshold {
                *flag = true;
            }
        }
    }
    keep
}

/// Apply `nms` and return the surviving detections in kept order.
pub fn suppress(detections: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    let keep = nms(&detections, threshold);
    let mut slots: Vec<Option<Detection>> = detections.into_iter().map(Some).collect();
    keep.into_iter().filter_map(|i| slots[i].take()).collect()
}
