/// Axis-aligned detection box in pixel coordinates of the original image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bbox {
    pub xmin: f32,
    pub ymin: f32,
    pub xmax: f32,
    pub ymax: f32,
    pub confidence: f32,
    pub class_idx: usize,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32, confidence: f32, class_idx: usize) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
            confidence,
            class_idx,
        }
    }

    /// Builds a box from yolo's center/size encoding.
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32, confidence: f32, class_idx: usize) -> Self {
        Self::new(
            cx - w / 2.0,
            cy - h / 2.0,
            cx + w / 2.0,
            cy + h / 2.0,
            confidence,
            class_idx,
        )
    }

    pub fn width(&self) -> f32 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f32 {
        self.ymax - self.ymin
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &Bbox) -> f32 {
        let ix1 = self.xmin.max(other.xmin);
        let iy1 = self.ymin.max(other.ymin);
        let ix2 = self.xmax.min(other.xmax);
        let iy2 = self.ymax.min(other.ymax);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            return 0.0;
        }
        inter / union
    }

    /// Clamps the box to `[0, width] x [0, height]`.
    ///
    /// Both ends are clamped with the same monotone function, so `xmin <= xmax`
    /// and `ymin <= ymax` hold afterwards whenever they held before.
    pub fn clip(self, width: f32, height: f32) -> Self {
        Self {
            xmin: self.xmin.clamp(0.0, width),
            ymin: self.ymin.clamp(0.0, height),
            xmax: self.xmax.clamp(0.0, width),
            ymax: self.ymax.clamp(0.0, height),
            ..self
        }
    }

    pub fn as_xyxy(&self) -> [f32; 4] {
        [self.xmin, self.ymin, self.xmax, self.ymax]
    }
}
