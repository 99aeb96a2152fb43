#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::bbox::{iou, BoundingBox, ImageSize};
use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::frame::VideoFrame;

/// Box centre/size values that precede the class scores in each prediction column.
const CXYWH_OFFSET: usize = 4;

pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// YOLOv8 detector running an exported ONNX model through tract.
///
/// Frames are stretched to the square model input; boxes are scaled back to the
/// source resolution. Loading the model is the only disk access.
pub struct YoloBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    labels: Vec<String>,
    confidence_threshold: f32,
    nms_iou: f32,
}

impl YoloBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        if input_size == 0 {
            return Err(anyhow!("model input size must be greater than zero"));
        }
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            labels: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
            confidence_threshold: 0.25,
            nms_iou: 0.45,
        })
    }

    /// Override the default confidence threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    /// Override the IoU above which overlapping boxes are suppressed.
    pub fn with_nms_iou(mut self, nms_iou: f32) -> Self {
        self.nms_iou = nms_iou;
        self
    }

    /// Replace the COCO labels with one class name per line from `path`.
    pub fn with_labels_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read labels file {}", path.display()))?;
        let labels: Vec<String> = raw
            .lines()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
            .collect();
        if labels.is_empty() {
            return Err(anyhow!("labels file {} is empty", path.display()));
        }
        self.labels = labels;
        Ok(self)
    }

    fn build_input(&self, frame: &VideoFrame) -> Tensor {
        let side = self.input_size as usize;
        let src_w = frame.width.max(1) as usize;
        let src_h = frame.height.max(1) as usize;
        let pixels = frame.pixels();
        tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, channel, y, x)| {
            // Nearest-neighbour stretch from the source frame.
            let sx = (x * src_w / side).min(src_w - 1);
            let sy = (y * src_h / side).min(src_h - 1);
            let idx = (sy * src_w + sx) * 3 + channel;
            pixels.get(idx).copied().unwrap_or(0) as f32 / 255.0
        })
        .into_tensor()
    }

    fn decode(&self, outputs: TVec<TValue>, size: ImageSize) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a [1, 4 + classes, anchors] output")?;

        let rows = preds.shape()[1];
        let anchors = preds.shape()[2];
        if rows <= CXYWH_OFFSET {
            return Err(anyhow!("model output has no class scores ({} rows)", rows));
        }

        let scale_x = size.width as f32 / self.input_size as f32;
        let scale_y = size.height as f32 / self.input_size as f32;

        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for class in 0..rows - CXYWH_OFFSET {
                let score = preds[[0, CXYWH_OFFSET + class, anchor]];
                if score > best.1 {
                    best = (class, score);
                }
            }
            let (class_id, confidence) = best;
            if confidence < self.confidence_threshold {
                continue;
            }

            let cx = preds[[0, 0, anchor]] * scale_x;
            let cy = preds[[0, 1, anchor]] * scale_y;
            let w = preds[[0, 2, anchor]] * scale_x;
            let h = preds[[0, 3, anchor]] * scale_y;
            let bbox = BoundingBox::new(
                (cx - w / 2.0).round() as i32,
                (cy - h / 2.0).round() as i32,
                (cx + w / 2.0).round() as i32,
                (cy + h / 2.0).round() as i32,
            )
            .clamped(size);

            let class_name = self
                .labels
                .get(class_id)
                .map(|name| name.to_lowercase())
                .unwrap_or_else(|| class_id.to_string());
            candidates.push(Detection::new(
                bbox,
                confidence.clamp(0.0, 1.0),
                class_id as u32,
                class_name,
            ));
        }

        Ok(non_max_suppression(candidates, self.nms_iou))
    }
}

impl DetectorBackend for YoloBackend {
    fn name(&self) -> &'static str {
        "yolo"
    }

    fn detect(&mut self, frame: &VideoFrame) -> Result<Vec<Detection>> {
        let input = self.build_input(frame);
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.decode(outputs, frame.size())
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size;
        let blank = VideoFrame::new(vec![0u8; (side as usize).pow(2) * 3], side, side)?;
        self.detect(&blank).map(|_| ())
    }
}

/// Class-agnostic greedy NMS: highest confidence first, drop anything that
/// overlaps a kept box by more than `iou_threshold`.
pub(crate) fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if kept
            .iter()
            .all(|k| iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            kept.push(candidate);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_highest_confidence_of_overlapping_boxes() {
        let dets = vec![
            Detection::new(BoundingBox::new(0, 0, 10, 10), 0.6, 0, "person"),
            Detection::new(BoundingBox::new(1, 1, 11, 11), 0.9, 0, "person"),
            Detection::new(BoundingBox::new(50, 50, 60, 60), 0.4, 2, "car"),
        ];
        let kept = non_max_suppression(dets, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_name, "car");
    }
}
