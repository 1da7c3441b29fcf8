use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{Frame, PadBox, PathMask, Perception, PerceptionError};

/// Script for the simulator, read from `[vehicle.sim.perception]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptConfig {
    /// Pad centre x per query; negative = no pad in view.
    #[serde(default)]
    pub pad_centers: Vec<f32>,
    /// Path centroid x per query; negative = no mask.
    #[serde(default)]
    pub path_centers: Vec<i32>,
    /// Answer once the script is exhausted (default: nothing found).
    pub idle_path_center: Option<u32>,
}

#[derive(Debug, Default)]
struct Script {
    pads: VecDeque<Vec<PadBox>>,
    masks: VecDeque<Option<PathMask>>,
    idle_mask: Option<PathMask>,
    fail_pads: u32,
    fail_masks: u32,
    pad_queries: u32,
    mask_queries: u32,
}

/// Perception that replays queued answers. Clones share the queues.
#[derive(Debug, Clone, Default)]
pub struct ScriptedPerception {
    inner: Arc<Mutex<Script>>,
}

const SIM_WIDTH: u32 = 960;
const SIM_HEIGHT: u32 = 720;
const PAD_WIDTH: f32 = 120.0;
const STRIPE_HALF_WIDTH: u32 = 30;

impl ScriptedPerception {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &ScriptConfig) -> Self {
        let p = Self::new();
        for &cx in &cfg.pad_centers {
            if cx < 0.0 {
                p.push_pads(Vec::new());
            } else {
                p.push_pad_at(cx);
            }
        }
        for &cx in &cfg.path_centers {
            match u32::try_from(cx) {
                Ok(cx) => p.push_path_at(cx),
                Err(_) => p.push_mask(None),
            }
        }
        p.lock().idle_mask = cfg
            .idle_path_center
            .map(|cx| PathMask::stripe(SIM_WIDTH, SIM_HEIGHT, cx, STRIPE_HALF_WIDTH));
        p
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push_pads(&self, pads: Vec<PadBox>) {
        self.lock().pads.push_back(pads);
    }

    pub fn push_pad_at(&self, cx: f32) {
        self.push_pads(vec![PadBox::centered_at(cx, PAD_WIDTH)]);
    }

    pub fn push_mask(&self, mask: Option<PathMask>) {
        self.lock().masks.push_back(mask);
    }

    pub fn push_path_at(&self, cx: u32) {
        self.push_mask(Some(PathMask::stripe(SIM_WIDTH, SIM_HEIGHT, cx, STRIPE_HALF_WIDTH)));
    }

    pub fn fail_next_pads(&self, times: u32) {
        self.lock().fail_pads += times;
    }

    pub fn fail_next_masks(&self, times: u32) {
        self.lock().fail_masks += times;
    }

    /// (pad queries, mask queries) answered so far.
    pub fn queries(&self) -> (u32, u32) {
        let s = self.lock();
        (s.pad_queries, s.mask_queries)
    }
}

#[async_trait]
impl Perception for ScriptedPerception {
    async fn detect_pads(&mut self, _frame: &Frame) -> Result<Vec<PadBox>, PerceptionError> {
        let mut s = self.lock();
        s.pad_queries += 1;
        if s.fail_pads > 0 {
            s.fail_pads -= 1;
            return Err(PerceptionError::Scripted);
        }
        Ok(s.pads.pop_front().unwrap_or_default())
    }

    async fn segment_path(&mut self, _frame: &Frame) -> Result<Option<PathMask>, PerceptionError> {
        let mut s = self.lock();
        s.mask_queries += 1;
        if s.fail_masks > 0 {
            s.fail_masks -= 1;
            return Err(PerceptionError::Scripted);
        }
        match s.masks.pop_front() {
            Some(m) => Ok(m),
            None => Ok(s.idle_mask.clone()),
        }
    }
}
