use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// One accepted character and the active elapsed time at which it landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFrame {
    #[serde(rename = "char")]
    pub ch: char,
    pub time: u64,
}

impl ReplayFrame {
    pub fn new(ch: char, time: u64) -> Self {
        Self { ch, time }
    }
}

/// Append-only log of accepted characters for the current session.
#[derive(Debug, Default, Clone)]
pub struct ReplayRecorder {
    frames: Vec<ReplayFrame>,
}

impl ReplayRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame. Time is clamped to the previous frame so the log
    /// stays non-decreasing.
    pub fn record(&mut self, ch: char, time: u64) {
        let floor = self.frames.last().map_or(0, |f| f.time);
        self.frames.push(ReplayFrame::new(ch, time.max(floor)));
    }

    pub fn frames(&self) -> &[ReplayFrame] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn into_frames(self) -> Vec<ReplayFrame> {
        self.frames
    }
}

/// Plays back a recorded log as a ghost cursor.
///
/// The cursor only moves forward, so each `advance` costs O(1) amortized no
/// matter how often it is called.
#[derive(Debug, Clone)]
pub struct ReplayPlayer {
    log: Vec<ReplayFrame>,
    cursor: usize,
    origin_ms: u64,
}

impl ReplayPlayer {
    pub fn new(mut log: Vec<ReplayFrame>) -> Self {
        if !is_monotonic(&log) {
            warn!(frames = log.len(), "ghost log out of order, sorting");
            log.sort_by_key(|f| f.time);
        }
        Self {
            log,
            cursor: 0,
            origin_ms: 0,
        }
    }

    /// Resets the cursor to the start and restarts the ghost clock at
    /// `origin_ms` of session active time.
    pub fn restart(&mut self, origin_ms: u64) {
        self.cursor = 0;
        self.origin_ms = origin_ms;
    }

    /// Moves the cursor past every frame due at `active_ms`. Returns the new
    /// cursor.
    pub fn advance(&mut self, active_ms: u64) -> usize {
        let elapsed = active_ms.saturating_sub(self.origin_ms);
        while self.cursor < self.log.len() && self.log[self.cursor].time <= elapsed {
            self.cursor += 1;
        }
        self.cursor
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.log.len()
    }

    pub fn log(&self) -> &[ReplayFrame] {
        &self.log
    }
}

pub fn is_monotonic(log: &[ReplayFrame]) -> bool {
    log.windows(2).all(|w| w[0].time <= w[1].time)
}

pub fn load_log(path: &Path) -> Result<Vec<ReplayFrame>> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn save_log(path: &Path, log: &[ReplayFrame]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_vec_pretty(log)?)?;
    Ok(())
}
