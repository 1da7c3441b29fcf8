use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::Frame;

/// Latest-frame-wins source; never blocks.
pub trait FrameSource: Send + Sync {
    fn latest(&self) -> Option<Frame>;
}

/// Always hands out the same frame. Used by the simulator and tests.
#[derive(Debug, Clone)]
pub struct StaticFrame(pub Option<Frame>);

impl StaticFrame {
    pub fn blank(width: u32, height: u32) -> Self {
        Self(Some(Frame::blank(width, height)))
    }

    pub fn empty() -> Self {
        Self(None)
    }
}

impl FrameSource for StaticFrame {
    fn latest(&self) -> Option<Frame> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CameraConfig {
    /// "tello-udp" | "v4l2-mjpeg"
    #[serde(default = "default_mode")]
    pub mode: String,
    /// udp://0.0.0.0:11111 (tello-udp) or /dev/video0 (v4l2)
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
}

fn default_mode() -> String {
    "tello-udp".into()
}
fn default_source() -> String {
    "udp://0.0.0.0:11111".into()
}
fn default_width() -> u32 {
    960
}
fn default_height() -> u32 {
    720
}
fn default_fps() -> u32 {
    15
}
fn default_ffmpeg() -> String {
    "ffmpeg".into()
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            source: default_source(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            ffmpeg: default_ffmpeg(),
        }
    }
}

impl CameraConfig {
    fn ffmpeg_args(&self) -> Result<Vec<String>> {
        let mut args: Vec<String> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        match self.mode.as_str() {
            "tello-udp" => {
                args.extend(["-fflags".into(), "nobuffer".into(), "-i".into(), self.source.clone()]);
            }
            "v4l2-mjpeg" => {
                args.extend([
                    "-f".into(),
                    "video4linux2".into(),
                    "-input_format".into(),
                    "mjpeg".into(),
                    "-i".into(),
                    self.source.clone(),
                ]);
            }
            other => anyhow::bail!("unknown camera.mode: {}", other),
        }
        args.extend([
            "-vf".into(),
            format!("scale={}:{},fps={}", self.width, self.height, self.fps.max(1)),
            "-f".into(),
            "image2pipe".into(),
            "-vcodec".into(),
            "mjpeg".into(),
            "-".into(),
        ]);
        Ok(args)
    }
}

/// Splits a concatenated MJPEG byte stream into whole JPEG images (SOI .. EOI).
#[derive(Debug, Default)]
pub struct JpegSplitter {
    buf: Vec<u8>,
}

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_PENDING: usize = 8 * 1024 * 1024;

impl JpegSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        loop {
            let Some(start) = find(&self.buf, &SOI, 0) else {
                // keep a trailing 0xFF in case the marker straddles chunks
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                self.buf.drain(..self.buf.len() - keep);
                break;
            };
            let Some(end) = find(&self.buf, &EOI, start + 2) else {
                self.buf.drain(..start);
                if self.buf.len() > MAX_PENDING {
                    warn!("camera: dropping {} bytes without end marker", self.buf.len());
                    self.buf.clear();
                }
                break;
            };
            out.push(self.buf[start..end + 2].to_vec());
            self.buf.drain(..end + 2);
        }
        out
    }
}

fn find(hay: &[u8], needle: &[u8; 2], from: usize) -> Option<usize> {
    hay.get(from..)?.windows(2).position(|w| w == needle).map(|p| p + from)
}

/// Continuous capture through ffmpeg. Only the newest frame is kept; a slow
/// consumer simply skips frames.
pub struct CameraFrames {
    rx: watch::Receiver<Option<Frame>>,
    task: JoinHandle<()>,
}

impl CameraFrames {
    pub fn spawn(cfg: CameraConfig) -> Result<Self> {
        let args = cfg.ffmpeg_args()?;
        let mut child: Child = Command::new(&cfg.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawn {}", cfg.ffmpeg))?;
        let mut stdout = child.stdout.take().context("ffmpeg stdout")?;
        info!("camera: {} {} -> {}x{}", cfg.mode, cfg.source, cfg.width, cfg.height);

        let (tx, rx) = watch::channel(None);
        let (width, height) = (cfg.width, cfg.height);
        let task = tokio::spawn(async move {
            let _child = child;
            let mut splitter = JpegSplitter::default();
            let mut chunk = vec![0u8; 64 * 1024];
            let mut seq = 0u64;
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) => {
                        warn!("camera: ffmpeg closed its output");
                        break;
                    }
                    Ok(n) => {
                        for jpeg in splitter.push(&chunk[..n]) {
                            seq += 1;
                            let frame = Frame { seq, width, height, jpeg: Arc::new(jpeg) };
                            if tx.send(Some(frame)).is_err() {
                                debug!("camera: no receivers left");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("camera: read failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self { rx, task })
    }
}

impl FrameSource for CameraFrames {
    fn latest(&self) -> Option<Frame> {
        self.rx.borrow().clone()
    }
}

impl Drop for CameraFrames {
    fn drop(&mut self) {
        self.task.abort();
    }
}
