mod nms;
pub mod camera;
pub mod process;
pub mod scripted;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use camera::{CameraConfig, CameraFrames, FrameSource, StaticFrame};
pub use process::{PerceptionConfig, ProcessPerception};
pub use scripted::{ScriptConfig, ScriptedPerception};

/// Latest camera image, JPEG encoded, at the working resolution.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub jpeg: Arc<Vec<u8>>,
}

impl Frame {
    /// A frame with no image payload; only its geometry matters.
    pub fn blank(width: u32, height: u32) -> Self {
        Self { seq: 0, width, height, jpeg: Arc::new(Vec::new()) }
    }

    pub fn center_x(&self) -> i32 {
        (self.width / 2) as i32
    }
}

/// Pad detection in pixel coordinates of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PadBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub conf: f32,
    pub class_id: i32,
}

impl PadBox {
    /// Row layout used by detector output: [x1, y1, x2, y2, conf, class].
    pub fn from_row(row: [f32; 6]) -> Self {
        Self { x1: row[0], y1: row[1], x2: row[2], y2: row[3], conf: row[4], class_id: row[5] as i32 }
    }

    /// Box of width `w` centred horizontally on `cx`.
    pub fn centered_at(cx: f32, w: f32) -> Self {
        Self { x1: cx - w / 2.0, y1: 300.0, x2: cx + w / 2.0, y2: 420.0, conf: 0.9, class_id: 0 }
    }

    pub fn center_x(&self) -> i32 {
        ((self.x1 + self.x2) / 2.0) as i32
    }
}

/// Binary path mask over the frame's pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct PathMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl PathMask {
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        let mut bits = Vec::with_capacity((width * height) as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self { width, height, bits }
    }

    pub fn from_luma(img: &image::GrayImage, threshold: u8) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            bits: img.pixels().map(|p| p.0[0] > threshold).collect(),
        }
    }

    /// Vertical band of set pixels centred on `cx`.
    pub fn stripe(width: u32, height: u32, cx: u32, half_width: u32) -> Self {
        let lo = cx.saturating_sub(half_width);
        let hi = cx + half_width;
        Self::from_fn(width, height, |x, _| x >= lo && x <= hi)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn center_x(&self) -> i32 {
        (self.width / 2) as i32
    }

    pub fn area(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// x of the first-order moment centroid, truncated; None for an empty mask.
    pub fn centroid_x(&self) -> Option<i32> {
        let w = self.width as usize;
        let (mut m00, mut m10) = (0u64, 0u64);
        for (i, set) in self.bits.iter().enumerate() {
            if *set {
                m00 += 1;
                m10 += (i % w) as u64;
            }
        }
        if m00 == 0 {
            return None;
        }
        Some((m10 / m00) as i32)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PerceptionError {
    #[error("failed to start `{program}`: {source}")]
    Spawn { program: String, source: std::io::Error },

    #[error("query timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("`{program}` exited with {status}: {stderr}")]
    ExitStatus { program: String, status: String, stderr: String },

    #[error("undecodable output: {0}")]
    Decode(String),

    #[error("scripted failure")]
    Scripted,
}

/// Opaque perception oracle queried by the mission.
#[async_trait]
pub trait Perception: Send {
    /// Pad boxes, best first. Empty when nothing was found.
    async fn detect_pads(&mut self, frame: &Frame) -> Result<Vec<PadBox>, PerceptionError>;

    async fn segment_path(&mut self, frame: &Frame) -> Result<Option<PathMask>, PerceptionError>;
}

/// Confidence gate, best-first ordering and non-maximum suppression over raw detector rows.
pub fn select_pads(rows: &[[f32; 6]], conf_th: f32, iou_th: f32, max_det: usize) -> Vec<PadBox> {
    let mut dets: Vec<PadBox> = rows
        .iter()
        .map(|r| PadBox::from_row(*r))
        .filter(|d| d.conf >= conf_th)
        .collect();
    dets.sort_by(|a, b| b.conf.partial_cmp(&a.conf).unwrap_or(std::cmp::Ordering::Equal));

    let mut kept: Vec<PadBox> = Vec::new();
    'outer: for d in dets {
        for k in &kept {
            if nms::iou(&d, k) >= iou_th {
                continue 'outer;
            }
        }
        kept.push(d);
        if kept.len() >= max_det {
            break;
        }
    }
    kept
}
