use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::{select_pads, Frame, PadBox, PathMask, Perception, PerceptionError};

#[derive(Debug, Clone, Deserialize)]
pub struct PerceptionConfig {
    /// Reads one JPEG on stdin, prints a JSON array of `[x1, y1, x2, y2, conf, class]` rows.
    pub detector_cmd: Vec<String>,
    /// Reads one JPEG on stdin, prints a PNG mask (empty output = nothing found).
    pub segmenter_cmd: Vec<String>,
    #[serde(default = "default_conf")]
    pub conf_threshold: f32,
    #[serde(default = "default_iou")]
    pub iou_threshold: f32,
    #[serde(default = "default_max_det")]
    pub max_det: usize,
    /// Mask pixels brighter than this count as path.
    #[serde(default = "default_mask_threshold")]
    pub mask_threshold: u8,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

fn default_conf() -> f32 {
    0.4
}
fn default_iou() -> f32 {
    0.45
}
fn default_max_det() -> usize {
    10
}
fn default_mask_threshold() -> u8 {
    127
}
fn default_query_timeout_ms() -> u64 {
    600
}

impl PerceptionConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }
}

/// Perception backed by external model runners, one process per query.
pub struct ProcessPerception {
    cfg: PerceptionConfig,
}

impl ProcessPerception {
    pub fn new(cfg: PerceptionConfig) -> Result<Self, PerceptionError> {
        for (name, argv) in [("detector_cmd", &cfg.detector_cmd), ("segmenter_cmd", &cfg.segmenter_cmd)] {
            if argv.is_empty() {
                return Err(PerceptionError::Spawn {
                    program: name.into(),
                    source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty command"),
                });
            }
        }
        Ok(Self { cfg })
    }

    async fn run(&self, argv: &[String], input: &[u8]) -> Result<Vec<u8>, PerceptionError> {
        let program = argv.first().cloned().unwrap_or_default();
        let mut child = Command::new(&program)
            .args(argv.get(1..).unwrap_or(&[]))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| PerceptionError::Spawn { program: program.clone(), source })?;

        let mut stdin = child.stdin.take();
        let payload = input.to_vec();
        let writer = tokio::spawn(async move {
            if let Some(stdin) = stdin.as_mut() {
                let _ = stdin.write_all(&payload).await;
                let _ = stdin.shutdown().await;
            }
        });

        let wait = self.cfg.query_timeout();
        let out = tokio::time::timeout(wait, child.wait_with_output())
            .await
            .map_err(|_| PerceptionError::Timeout(wait))?
            .map_err(|source| PerceptionError::Spawn { program: program.clone(), source })?;
        writer.abort();

        if !out.status.success() {
            return Err(PerceptionError::ExitStatus {
                program,
                status: out.status.to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        debug!("perception: {} returned {} bytes", program, out.stdout.len());
        Ok(out.stdout)
    }
}

pub(crate) fn decode_rows(raw: &[u8]) -> Result<Vec<[f32; 6]>, PerceptionError> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Vec::new());
    }
    serde_json::from_slice(raw).map_err(|e| PerceptionError::Decode(format!("detector rows: {}", e)))
}

pub(crate) fn decode_mask(raw: &[u8], threshold: u8) -> Result<Option<PathMask>, PerceptionError> {
    if raw.is_empty() {
        return Ok(None);
    }
    let img = image::load_from_memory(raw).map_err(|e| PerceptionError::Decode(format!("mask image: {}", e)))?;
    Ok(Some(PathMask::from_luma(&img.to_luma8(), threshold)))
}

#[async_trait]
impl Perception for ProcessPerception {
    async fn detect_pads(&mut self, frame: &Frame) -> Result<Vec<PadBox>, PerceptionError> {
        let raw = self.run(&self.cfg.detector_cmd, &frame.jpeg).await?;
        let rows = decode_rows(&raw)?;
        Ok(select_pads(&rows, self.cfg.conf_threshold, self.cfg.iou_threshold, self.cfg.max_det))
    }

    async fn segment_path(&mut self, frame: &Frame) -> Result<Option<PathMask>, PerceptionError> {
        let raw = self.run(&self.cfg.segmenter_cmd, &frame.jpeg).await?;
        decode_mask(&raw, self.cfg.mask_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn cfg(detector: &[&str], segmenter: &[&str]) -> PerceptionConfig {
        PerceptionConfig {
            detector_cmd: detector.iter().map(|s| s.to_string()).collect(),
            segmenter_cmd: segmenter.iter().map(|s| s.to_string()).collect(),
            conf_threshold: default_conf(),
            iou_threshold: default_iou(),
            max_det: default_max_det(),
            mask_threshold: default_mask_threshold(),
            query_timeout_ms: 2000,
        }
    }

    #[test]
    fn test_decode_rows() {
        assert!(decode_rows(b"  \n").unwrap().is_empty());
        let rows = decode_rows(b"[[1,2,3,4,0.5,0]]").unwrap();
        assert_eq!(rows, vec![[1.0, 2.0, 3.0, 4.0, 0.5, 0.0]]);
        assert!(matches!(decode_rows(b"{nope"), Err(PerceptionError::Decode(_))));
    }

    #[test]
    fn test_decode_png_mask() {
        let img = image::GrayImage::from_fn(8, 2, |x, _| image::Luma([if x >= 6 { 255 } else { 0 }]));
        let mut png = Vec::new();
        image::DynamicImage::ImageLuma8(img)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let mask = decode_mask(&png, 127).unwrap().unwrap();
        assert_eq!(mask.width(), 8);
        assert_eq!(mask.centroid_x(), Some(6));
        assert!(decode_mask(&[], 127).unwrap().is_none());
    }

    #[test]
    fn test_rejects_empty_commands() {
        assert!(ProcessPerception::new(cfg(&[], &["cat"])).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_detector_process_roundtrip() {
        let mut p = ProcessPerception::new(cfg(
            &["sh", "-c", "cat >/dev/null; echo '[[400,300,500,400,0.9,0],[0,0,10,10,0.1,0]]'"],
            &["sh", "-c", "cat >/dev/null"],
        ))
        .unwrap();
        let frame = Frame::blank(960, 720);
        let pads = p.detect_pads(&frame).await.unwrap();
        assert_eq!(pads.len(), 1);
        assert_eq!(pads[0].center_x(), 450);
        assert!(p.segment_path(&frame).await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_process_reports_status() {
        let mut p = ProcessPerception::new(cfg(&["sh", "-c", "echo boom >&2; exit 3"], &["false"])).unwrap();
        let err = p.detect_pads(&Frame::blank(960, 720)).await.unwrap_err();
        assert!(matches!(err, PerceptionError::ExitStatus { .. }));
    }
}
