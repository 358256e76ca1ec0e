//! Detection-run invocation over rasterized pages.
//!
//! The model is a YOLO-family ONNX network executed through `tract-onnx`.
//! It is loaded once, lazily and idempotently, and the runnable plan is
//! shared behind an `Arc` across requests; running inference before the
//! model is loaded fails with [`PlanscanError::ModelNotLoaded`].
//!
//! One invocation of [`Detector::run`] produces one timestamped run folder:
//!
//! ```text
//! outputs/run/run_20240311_142530/
//!  ├─ page_1.jpg           annotated copy (hollow boxes, no text labels)
//!  ├─ page_2.jpg
//!  └─ labels/
//!      ├─ page_1.txt       one line per detection: class cx cy w h conf
//!      └─ page_2.txt       (absent when a page has zero detections)
//! ```
//!
//! Pages are processed strictly in page order, one at a time. Inference is
//! CPU-bound and runs under `spawn_blocking` like the rasterizer.

use crate::config::ServiceConfig;
use crate::error::PlanscanError;
use crate::pipeline::render::list_pages;
use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tract_onnx::prelude::*;

type OnnxPlan = TypedSimplePlan<TypedModel>;

/// One surviving detection, in original-image pixel space.
///
/// `bbox` is center-based `[cx, cy, w, h]`, the model's native box layout.
#[derive(Debug, Clone)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: [f32; 4],
}

/// Lazily loaded detection model plus the fixed run parameters.
pub struct Detector {
    model_path: PathBuf,
    input_size: u32,
    confidence: f32,
    iou: f32,
    plan: RwLock<Option<Arc<OnnxPlan>>>,
}

impl Detector {
    /// Create an unloaded detector from service configuration.
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            model_path: config.model_path.clone(),
            input_size: config.input_size,
            confidence: config.confidence,
            iou: config.iou,
            plan: RwLock::new(None),
        }
    }

    /// Load the model if it is not loaded yet.
    ///
    /// Returns `Ok(true)` when this call performed the load, `Ok(false)`
    /// when the model was already resident. Missing or unparsable weights
    /// fail with [`PlanscanError::ModelLoad`].
    pub async fn load(&self) -> Result<bool, PlanscanError> {
        let mut slot = self.plan.write().await;
        if slot.is_some() {
            tracing::debug!("model already loaded");
            return Ok(false);
        }

        let path = self.model_path.clone();
        let size = self.input_size as usize;
        let plan = tokio::task::spawn_blocking(move || load_plan(&path, size))
            .await
            .map_err(|e| PlanscanError::Internal(format!("model load task panicked: {e}")))??;

        tracing::info!(path = %self.model_path.display(), "detection model loaded");
        *slot = Some(Arc::new(plan));
        Ok(true)
    }

    /// Whether the model is currently resident.
    pub async fn is_loaded(&self) -> bool {
        self.plan.read().await.is_some()
    }

    /// Run detection over every page image in `pages_dir`, in page order.
    ///
    /// Creates and returns a fresh timestamped run folder under `runs_dir`.
    /// Prior run folders are left untouched.
    pub async fn run(&self, pages_dir: &Path, runs_dir: &Path) -> Result<PathBuf, PlanscanError> {
        let plan = self
            .plan
            .read()
            .await
            .clone()
            .ok_or(PlanscanError::ModelNotLoaded)?;

        let pages = list_pages(pages_dir)?;
        if pages.is_empty() {
            return Err(PlanscanError::NoPages);
        }

        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let run_dir = runs_dir.join(format!("run_{stamp}"));
        let labels_dir = run_dir.join("labels");
        tokio::fs::create_dir_all(&labels_dir)
            .await
            .map_err(|e| PlanscanError::io(&labels_dir, e))?;

        tracing::info!(pages = pages.len(), run = %run_dir.display(), "running inference");

        for (page_num, page_path) in pages {
            let plan = Arc::clone(&plan);
            let page_path = page_path.clone();
            let annotated = run_dir.join(format!("page_{page_num}.jpg"));
            let label_file = labels_dir.join(format!("page_{page_num}.txt"));
            let (size, conf, iou) = (self.input_size, self.confidence, self.iou);

            let found = tokio::task::spawn_blocking(move || {
                detect_page(&plan, &page_path, &annotated, &label_file, size, conf, iou)
            })
            .await
            .map_err(|e| PlanscanError::Internal(format!("inference task panicked: {e}")))??;

            tracing::debug!(page = page_num, detections = found, "page done");
        }

        Ok(run_dir)
    }
}

/// Blocking model load: parse ONNX, pin the input shape, optimize.
fn load_plan(path: &Path, size: usize) -> Result<OnnxPlan, PlanscanError> {
    let map_err = |e: TractError| PlanscanError::ModelLoad {
        path: path.to_path_buf(),
        detail: e.to_string(),
    };

    if !path.exists() {
        return Err(PlanscanError::ModelLoad {
            path: path.to_path_buf(),
            detail: "weights file not found".to_string(),
        });
    }

    tract_onnx::onnx()
        .model_for_path(path)
        .map_err(map_err)?
        .with_input_fact(0, f32::fact([1, 3, size, size]).into())
        .map_err(map_err)?
        .into_optimized()
        .map_err(map_err)?
        .into_runnable()
        .map_err(map_err)
}

/// Blocking per-page inference: preprocess, run, decode, suppress, save.
///
/// Returns the number of surviving detections.
fn detect_page(
    plan: &OnnxPlan,
    page_path: &Path,
    annotated_path: &Path,
    label_path: &Path,
    input_size: u32,
    conf_threshold: f32,
    iou_threshold: f32,
) -> Result<usize, PlanscanError> {
    let img = image::open(page_path).map_err(|e| {
        PlanscanError::Inference(format!("cannot read page '{}': {e}", page_path.display()))
    })?;

    let (tensor_data, lb) = letterbox(&img, input_size);
    let s = input_size as usize;
    let input = Tensor::from_shape(&[1, 3, s, s], &tensor_data)
        .map_err(|e| PlanscanError::Inference(format!("input tensor: {e}")))?;

    let outputs = plan
        .run(tvec!(input.into()))
        .map_err(|e| PlanscanError::Inference(e.to_string()))?;
    let view = outputs[0]
        .to_array_view::<f32>()
        .map_err(|e| PlanscanError::Inference(e.to_string()))?;

    // YOLO head: [1, 4 + num_classes, num_anchors].
    let shape = view.shape().to_vec();
    let (rows, anchors) = match shape.as_slice() {
        [1, rows, anchors] if *rows > 4 => (*rows, *anchors),
        other => {
            return Err(PlanscanError::Inference(format!(
                "unexpected output shape {other:?}"
            )))
        }
    };
    let flat: Vec<f32> = view.iter().copied().collect();

    let mut raw = decode(&flat, rows - 4, anchors, conf_threshold);
    let kept = nms(&mut raw, iou_threshold);

    // Map surviving boxes from letterboxed input space back to page pixels.
    let detections: Vec<Detection> = kept
        .into_iter()
        .map(|mut d| {
            d.bbox = lb.to_original(d.bbox);
            d
        })
        .collect();

    save_annotated(&img, &detections, annotated_path)?;
    // Zero detections: no label file at all, matching the aggregator's
    // expectation that label files may be absent.
    if !detections.is_empty() {
        save_labels(&detections, img.width(), img.height(), label_path)?;
    }

    Ok(detections.len())
}

// ── YOLO decoding ─────────────────────────────────────────────────────────

/// Decode a flat `[1, 4+C, N]` prediction buffer into raw detections in
/// input space, keeping boxes whose best class score clears `conf`.
fn decode(output: &[f32], num_classes: usize, anchors: usize, conf: f32) -> Vec<Detection> {
    let mut detections = Vec::new();

    for i in 0..anchors {
        let cx = output[i];
        let cy = output[anchors + i];
        let w = output[2 * anchors + i];
        let h = output[3 * anchors + i];

        let mut best_conf = 0.0f32;
        let mut best_class = 0usize;
        for c in 0..num_classes {
            let score = output[(4 + c) * anchors + i];
            if score > best_conf {
                best_conf = score;
                best_class = c;
            }
        }

        if best_conf > conf {
            detections.push(Detection {
                class_id: best_class,
                confidence: best_conf,
                bbox: [cx, cy, w, h],
            });
        }
    }

    detections
}

/// Class-agnostic non-maximum suppression on center-based boxes.
fn nms(detections: &mut Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return Vec::new();
    }

    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        keep.push(detections[i].clone());
        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    keep
}

/// Intersection over union of two `[cx, cy, w, h]` boxes.
fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let (ax1, ay1, ax2, ay2) = corners(a);
    let (bx1, by1, bx2, by2) = corners(b);

    let x1 = ax1.max(bx1);
    let y1 = ay1.max(by1);
    let x2 = ax2.min(bx2);
    let y2 = ay2.min(by2);

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a[2] * a[3] + b[2] * b[3] - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

fn corners(b: &[f32; 4]) -> (f32, f32, f32, f32) {
    let [cx, cy, w, h] = *b;
    (cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
}

// ── Preprocessing ─────────────────────────────────────────────────────────

/// Mapping from letterboxed input space back to original image space.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn to_original(self, bbox: [f32; 4]) -> [f32; 4] {
        [
            (bbox[0] - self.pad_x) / self.scale,
            (bbox[1] - self.pad_y) / self.scale,
            bbox[2] / self.scale,
            bbox[3] / self.scale,
        ]
    }
}

/// Compute the letterbox mapping for fitting `(width, height)` into a
/// `size`×`size` square while preserving aspect ratio.
fn letterbox_mapping(width: u32, height: u32, size: u32) -> Letterbox {
    let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
    let scaled_w = width as f32 * scale;
    let scaled_h = height as f32 * scale;
    Letterbox {
        scale,
        pad_x: (size as f32 - scaled_w) / 2.0,
        pad_y: (size as f32 - scaled_h) / 2.0,
    }
}

/// Resize-with-padding into a normalized CHW float buffer.
///
/// Padding uses the conventional YOLO gray (114/255).
fn letterbox(img: &DynamicImage, size: u32) -> (Vec<f32>, Letterbox) {
    let lb = letterbox_mapping(img.width(), img.height(), size);
    let scaled_w = ((img.width() as f32) * lb.scale).round().max(1.0) as u32;
    let scaled_h = ((img.height() as f32) * lb.scale).round().max(1.0) as u32;

    let resized = img
        .resize_exact(scaled_w, scaled_h, image::imageops::FilterType::Triangle)
        .to_rgb8();

    let s = size as usize;
    let mut data = vec![114.0 / 255.0; 3 * s * s];
    let x0 = lb.pad_x.round() as usize;
    let y0 = lb.pad_y.round() as usize;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = (x0 + x as usize, y0 + y as usize);
        if tx < s && ty < s {
            for c in 0..3 {
                data[c * s * s + ty * s + tx] = pixel[c] as f32 / 255.0;
            }
        }
    }

    (data, lb)
}

// ── Artifact output ───────────────────────────────────────────────────────

/// Save an annotated copy of the page: hollow red boxes, no text labels.
fn save_annotated(
    img: &DynamicImage,
    detections: &[Detection],
    path: &Path,
) -> Result<(), PlanscanError> {
    let mut canvas = img.to_rgb8();
    let (iw, ih) = (canvas.width() as f32, canvas.height() as f32);

    for d in detections {
        let (x1, y1, x2, y2) = corners(&d.bbox);
        let x1 = x1.clamp(0.0, iw - 1.0);
        let y1 = y1.clamp(0.0, ih - 1.0);
        let w = (x2.clamp(0.0, iw) - x1).max(1.0) as u32;
        let h = (y2.clamp(0.0, ih) - y1).max(1.0) as u32;

        // Nested rects give a 2 px stroke without pulling in text rendering.
        for inset in 0..2i32 {
            let rw = w.saturating_sub(2 * inset as u32);
            let rh = h.saturating_sub(2 * inset as u32);
            if rw == 0 || rh == 0 {
                break;
            }
            let rect = Rect::at(x1 as i32 + inset, y1 as i32 + inset).of_size(rw, rh);
            draw_hollow_rect_mut(&mut canvas, rect, Rgb([255u8, 0, 0]));
        }
    }

    canvas.save(path).map_err(|e| {
        PlanscanError::Inference(format!("cannot save annotated '{}': {e}", path.display()))
    })
}

/// Write the YOLO-format label file: `class cx cy w h conf`, normalized.
fn save_labels(
    detections: &[Detection],
    width: u32,
    height: u32,
    path: &Path,
) -> Result<(), PlanscanError> {
    let (w, h) = (width as f32, height as f32);
    let mut lines = String::new();
    for d in detections {
        lines.push_str(&format!(
            "{} {:.6} {:.6} {:.6} {:.6} {:.6}\n",
            d.class_id,
            d.bbox[0] / w,
            d.bbox[1] / h,
            d.bbox[2] / w,
            d.bbox[3] / h,
            d.confidence,
        ));
    }
    std::fs::write(path, lines).map_err(|e| PlanscanError::io(path, e))
}
