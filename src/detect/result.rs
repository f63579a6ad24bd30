/// One detected face in source-image coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Box as `[left, top, right, bottom]`.
    pub bbox: [f32; 4],
    pub score: f32,
    /// Landmarks as `(x, y)` pairs; empty when the model has no keypoint head.
    pub keypoints: Vec<[f32; 2]>,
}

impl Detection {
    pub fn new(bbox: [f32; 4], score: f32) -> Self {
        Self {
            bbox,
            score,
            keypoints: Vec::new(),
        }
    }

    /// Box as `[left, top, width, height]`.
    pub fn ltwh(&self) -> [f32; 4] {
        let [l, t, r, b] = self.bbox;
        [l, t, r - l, b - t]
    }

    pub fn area(&self) -> f32 {
        let [l, t, r, b] = self.bbox;
        (r - l) * (b - t)
    }

    pub(crate) fn scaled(mut self, factor: f32) -> Self {
        for v in self.bbox.iter_mut() {
            *v /= factor;
        }
        for kp in self.keypoints.iter_mut() {
            kp[0] /= factor;
            kp[1] /= factor;
        }
        self
    }
}
