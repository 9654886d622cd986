// src/detection/onnx.rs
//
// ONNX Runtime backend.
//
// A COCO YOLO detector finds people and prohibited objects in the frame.
// Each person box is cropped to its head region and passed through a
// 468-point face-mesh model; the landmarks are mapped back to normalized
// frame coordinates.

use super::model::FaceModel;
use super::types::{BoundingBox, DetectedObject, FaceLandmarks, LandmarkPoint, RawDetection};
use crate::types::{DetectorConfig, Frame};
use anyhow::{bail, Context, Result};
use ort::{
    execution_providers::CUDAExecutionProvider,
    session::{builder::GraphOptimizationLevel, Session},
};
use tracing::{debug, info};

const YOLO_INPUT_SIZE: usize = 640;
const YOLO_CLASSES: usize = 80;
const YOLO_PREDICTIONS: usize = 8400;
const NMS_IOU_THRESHOLD: f32 = 0.45;

const MESH_INPUT_SIZE: usize = 192;
const MESH_POINTS: usize = 468;
const MESH_MIN_PRESENCE: f32 = 0.5;

const PERSON_CLASS: usize = 0;
// COCO ids of the objects a candidate must not have at the desk
const OBJECT_CLASSES: [(usize, &str); 3] = [(63, "laptop"), (67, "cell phone"), (73, "book")];

#[derive(Debug, Clone)]
struct Detection {
    bbox: [f32; 4], // [x1, y1, x2, y2] in frame pixels
    confidence: f32,
    class_id: usize,
}

pub struct OnnxFaceModel {
    detector: Session,
    face_mesh: Session,
    min_person_confidence: f32,
    min_object_confidence: f32,
}

impl OnnxFaceModel {
    pub fn load(config: &DetectorConfig) -> Result<Self> {
        let mesh_path = match config.face_mesh_model_path.as_deref() {
            Some(path) => path,
            None => bail!("onnx backend needs detector.face_mesh_model_path"),
        };

        info!("Loading object detector: {}", config.object_model_path);
        let detector = build_session(&config.object_model_path, config.num_threads)
            .with_context(|| format!("Failed to load {}", config.object_model_path))?;

        info!("Loading face mesh: {}", mesh_path);
        let face_mesh = build_session(mesh_path, config.num_threads)
            .with_context(|| format!("Failed to load {}", mesh_path))?;

        info!("✓ ONNX face model initialized");
        Ok(Self {
            detector,
            face_mesh,
            min_person_confidence: config.min_person_confidence,
            min_object_confidence: config.min_object_confidence,
        })
    }

    fn run_detector(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, scale, pad_x, pad_y) = letterbox(&frame.data, frame.width, frame.height);

        let shape = [1, 3, YOLO_INPUT_SIZE, YOLO_INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;
        let outputs = self.detector.run(ort::inputs!["images" => input_value])?;
        let (_, data) = outputs[0].try_extract_tensor::<f32>()?;

        let threshold = self.min_person_confidence.min(self.min_object_confidence);
        let detections = decode_predictions(data, scale, pad_x, pad_y, threshold)?;
        Ok(nms(detections, NMS_IOU_THRESHOLD))
    }

    fn run_face_mesh(&mut self, frame: &Frame, person: &[f32; 4]) -> Result<Option<FaceLandmarks>> {
        let crop = match head_crop(person, frame.width, frame.height) {
            Some(crop) => crop,
            None => return Ok(None),
        };

        let patch = extract_patch(frame, &crop);
        let resized = resize_bilinear(&patch, crop.size, crop.size, MESH_INPUT_SIZE, MESH_INPUT_SIZE);
        let input = to_chw(&resized, MESH_INPUT_SIZE);

        let shape = [1, 3, MESH_INPUT_SIZE, MESH_INPUT_SIZE];
        let input_value =
            ort::value::Value::from_array((shape.as_slice(), input.into_boxed_slice()))?;
        let outputs = self.face_mesh.run(ort::inputs![input_value])?;

        if outputs.len() > 1 {
            let (_, score) = outputs[1].try_extract_tensor::<f32>()?;
            if let Some(&logit) = score.first() {
                let presence = 1.0 / (1.0 + (-logit).exp());
                if presence < MESH_MIN_PRESENCE {
                    debug!("Face mesh presence {:.2} too low", presence);
                    return Ok(None);
                }
            }
        }

        let (_, landmarks) = outputs[0].try_extract_tensor::<f32>()?;
        if landmarks.len() < MESH_POINTS * 3 {
            bail!("face mesh returned {} values", landmarks.len());
        }

        let scale = crop.size as f32 / MESH_INPUT_SIZE as f32;
        let points = landmarks
            .chunks_exact(3)
            .take(MESH_POINTS)
            .map(|p| LandmarkPoint {
                x: (crop.x as f32 + p[0] * scale) / frame.width as f32,
                y: (crop.y as f32 + p[1] * scale) / frame.height as f32,
            })
            .collect();

        Ok(Some(FaceLandmarks { points }))
    }
}

impl FaceModel for OnnxFaceModel {
    fn name(&self) -> &str {
        "onnx"
    }

    fn detect(&mut self, frame: &Frame, _timestamp_ms: f64) -> Result<RawDetection> {
        let detections = self.run_detector(frame)?;

        let mut raw = RawDetection::default();
        for det in &detections {
            if det.class_id == PERSON_CLASS {
                if det.confidence < self.min_person_confidence {
                    continue;
                }
                if let Some(face) = self.run_face_mesh(frame, &det.bbox)? {
                    raw.faces.push(face);
                }
            } else if let Some(label) = object_label(det.class_id) {
                raw.objects.push(DetectedObject {
                    label: label.to_string(),
                    confidence: det.confidence,
                    bounding_box: BoundingBox {
                        origin_x: det.bbox[0],
                        origin_y: det.bbox[1],
                        width: det.bbox[2] - det.bbox[0],
                        height: det.bbox[3] - det.bbox[1],
                    },
                });
            }
        }

        debug!(
            "Detected {} faces, {} objects",
            raw.faces.len(),
            raw.objects.len()
        );
        Ok(raw)
    }
}

fn build_session(path: &str, threads: usize) -> Result<Session> {
    let session = Session::builder()?
        .with_execution_providers([CUDAExecutionProvider::default().build()])?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(threads.max(1))?
        .commit_from_file(path)?;
    Ok(session)
}

fn object_label(class_id: usize) -> Option<&'static str> {
    OBJECT_CLASSES
        .iter()
        .find(|(id, _)| *id == class_id)
        .map(|(_, label)| *label)
}

// ============================================================================
// PRE / POST PROCESSING
// ============================================================================

/// Letterbox into a 640x640 gray canvas, returns CHW input and the transform
fn letterbox(src: &[u8], src_w: usize, src_h: usize) -> (Vec<f32>, f32, f32, f32) {
    let target = YOLO_INPUT_SIZE;
    let scale = (target as f32 / src_w as f32).min(target as f32 / src_h as f32);
    let scaled_w = ((src_w as f32 * scale) as usize).clamp(1, target);
    let scaled_h = ((src_h as f32 * scale) as usize).clamp(1, target);
    let pad_x = (target - scaled_w) as f32 / 2.0;
    let pad_y = (target - scaled_h) as f32 / 2.0;

    let resized = resize_bilinear(src, src_w, src_h, scaled_w, scaled_h);
    let mut canvas = vec![114u8; target * target * 3];
    for y in 0..scaled_h {
        let dst_y = y + pad_y as usize;
        let src_row = &resized[y * scaled_w * 3..(y + 1) * scaled_w * 3];
        let dst_start = (dst_y * target + pad_x as usize) * 3;
        canvas[dst_start..dst_start + scaled_w * 3].copy_from_slice(src_row);
    }

    (to_chw(&canvas, target), scale, pad_x, pad_y)
}

/// Square HWC u8 image to normalized CHW f32
fn to_chw(hwc: &[u8], size: usize) -> Vec<f32> {
    let plane = size * size;
    let mut out = vec![0.0f32; 3 * plane];
    for (i, px) in hwc.chunks_exact(3).take(plane).enumerate() {
        for c in 0..3 {
            out[c * plane + i] = px[c] as f32 / 255.0;
        }
    }
    out
}

fn decode_predictions(
    output: &[f32],
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    conf_thresh: f32,
) -> Result<Vec<Detection>> {
    let n = YOLO_PREDICTIONS;
    if output.len() < n * (4 + YOLO_CLASSES) {
        bail!("unexpected detector output size {}", output.len());
    }

    let mut detections = Vec::new();
    for i in 0..n {
        let mut max_conf = 0.0f32;
        let mut best_class = 0;
        for c in 0..YOLO_CLASSES {
            let conf = output[n * (4 + c) + i];
            if conf > max_conf {
                max_conf = conf;
                best_class = c;
            }
        }

        if max_conf < conf_thresh
            || (best_class != PERSON_CLASS && object_label(best_class).is_none())
        {
            continue;
        }

        let cx = output[i];
        let cy = output[n + i];
        let w = output[n * 2 + i];
        let h = output[n * 3 + i];

        detections.push(Detection {
            bbox: [
                (cx - w / 2.0 - pad_x) / scale,
                (cy - h / 2.0 - pad_y) / scale,
                (cx + w / 2.0 - pad_x) / scale,
                (cy + h / 2.0 - pad_y) / scale,
            ],
            confidence: max_conf,
            class_id: best_class,
        });
    }
    Ok(detections)
}

/// Per-class non-maximum suppression
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<Detection> = Vec::new();
    for det in detections {
        let overlaps = keep
            .iter()
            .any(|k| k.class_id == det.class_id && calculate_iou(&k.bbox, &det.bbox) >= iou_threshold);
        if !overlaps {
            keep.push(det);
        }
    }
    keep
}

fn calculate_iou(box1: &[f32; 4], box2: &[f32; 4]) -> f32 {
    let x1 = box1[0].max(box2[0]);
    let y1 = box1[1].max(box2[1]);
    let x2 = box1[2].min(box2[2]);
    let y2 = box1[3].min(box2[3]);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let area1 = (box1[2] - box1[0]) * (box1[3] - box1[1]);
    let area2 = (box2[2] - box2[0]) * (box2[3] - box2[1]);
    let union = area1 + area2 - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Crop {
    x: usize,
    y: usize,
    size: usize,
}

/// Square crop over the head: the top of the person box, centered
/// horizontally, sized from the narrower box side
fn head_crop(person: &[f32; 4], frame_w: usize, frame_h: usize) -> Option<Crop> {
    let x1 = person[0].max(0.0);
    let y1 = person[1].max(0.0);
    let x2 = person[2].min(frame_w as f32);
    let y2 = person[3].min(frame_h as f32);
    let (w, h) = (x2 - x1, y2 - y1);
    if w <= 1.0 || h <= 1.0 {
        return None;
    }

    let size = (w.min(h) * 0.7).max(8.0).min(frame_w.min(frame_h) as f32) as usize;
    let cx = (x1 + x2) / 2.0;
    let x = (cx - size as f32 / 2.0)
        .max(0.0)
        .min((frame_w - size) as f32) as usize;
    let y = (y1 as usize).min(frame_h - size);
    Some(Crop { x, y, size })
}

fn extract_patch(frame: &Frame, crop: &Crop) -> Vec<u8> {
    let mut patch = Vec::with_capacity(crop.size * crop.size * 3);
    for row in crop.y..crop.y + crop.size {
        let start = (row * frame.width + crop.x) * 3;
        patch.extend_from_slice(&frame.data[start..start + crop.size * 3]);
    }
    patch
}

fn resize_bilinear(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let mut dst = vec![0u8; dst_h * dst_w * 3];
    let x_ratio = src_w as f32 / dst_w as f32;
    let y_ratio = src_h as f32 / dst_h as f32;

    for dy in 0..dst_h {
        for dx in 0..dst_w {
            let sx = dx as f32 * x_ratio;
            let sy = dy as f32 * y_ratio;
            let sx0 = (sx.floor() as usize).min(src_w - 1);
            let sy0 = (sy.floor() as usize).min(src_h - 1);
            let sx1 = (sx0 + 1).min(src_w - 1);
            let sy1 = (sy0 + 1).min(src_h - 1);
            let fx = sx - sx0 as f32;
            let fy = sy - sy0 as f32;

            for c in 0..3 {
                let p00 = src[(sy0 * src_w + sx0) * 3 + c] as f32;
                let p10 = src[(sy0 * src_w + sx1) * 3 + c] as f32;
                let p01 = src[(sy1 * src_w + sx0) * 3 + c] as f32;
                let p11 = src[(sy1 * src_w + sx1) * 3 + c] as f32;

                let val = p00 * (1.0 - fx) * (1.0 - fy)
                    + p10 * fx * (1.0 - fy)
                    + p01 * (1.0 - fx) * fy
                    + p11 * fx * fy;

                dst[(dy * dst_w + dx) * 3 + c] = val.round() as u8;
            }
        }
    }
    dst
}
