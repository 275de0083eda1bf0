use std::collections::BTreeMap;

use strum_macros::Display;

use crate::metrics::LocalTally;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SessionStatus {
    Idle,
    Running,
    Paused,
    Completed,
    /// Terminated early by a mission failure.
    Aborted,
}

/// The single authoritative typing session.
///
/// Only the keystroke processor mutates `input`, `total_keystrokes` and
/// `errors_by_target_char`; the controller owns the lifecycle fields.
#[derive(Debug, Clone)]
pub struct Session {
    pub target: Vec<char>,
    pub generation: u64,
    pub started_at_ms: u64,
    pub total_paused_ms: u64,
    pub pause_started_at_ms: Option<u64>,
    /// Set when the session completes or aborts; freezes active time.
    pub finished_at_ms: Option<u64>,
    pub input: Vec<char>,
    pub total_keystrokes: u64,
    pub errors_by_target_char: BTreeMap<char, u32>,
    pub status: SessionStatus,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            target: Vec::new(),
            generation: 0,
            started_at_ms: 0,
            total_paused_ms: 0,
            pause_started_at_ms: None,
            finished_at_ms: None,
            input: Vec::new(),
            total_keystrokes: 0,
            errors_by_target_char: BTreeMap::new(),
            status: SessionStatus::Idle,
        }
    }
}

impl Session {
    pub fn new(text: &str, generation: u64, now: u64) -> Self {
        Self {
            target: text.chars().collect(),
            generation,
            started_at_ms: now,
            status: SessionStatus::Running,
            ..Self::default()
        }
    }

    pub fn target_text(&self) -> String {
        self.target.iter().collect()
    }

    pub fn input_text(&self) -> String {
        self.input.iter().collect()
    }

    /// Wall-clock time since start minus every paused interval, including
    /// the one still open. Does not advance while paused or once finished.
    pub fn active_elapsed_ms(&self, now: u64) -> u64 {
        let now = self.finished_at_ms.map_or(now, |end| now.min(end));
        let open_pause = self
            .pause_started_at_ms
            .map_or(0, |p| now.saturating_sub(p));
        now.saturating_sub(self.started_at_ms)
            .saturating_sub(self.total_paused_ms)
            .saturating_sub(open_pause)
    }

    pub fn expected_char(&self, idx: usize) -> Option<char> {
        self.target.get(idx).copied()
    }

    pub fn total_errors(&self) -> u64 {
        self.errors_by_target_char.values().map(|&n| n as u64).sum()
    }

    pub fn is_complete(&self) -> bool {
        !self.target.is_empty() && self.input == self.target
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, SessionStatus::Running | SessionStatus::Paused)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, SessionStatus::Completed | SessionStatus::Aborted)
    }

    pub fn progress_percent(&self) -> f64 {
        if self.target.is_empty() {
            return 0.0;
        }
        (self.input.len() as f64 / self.target.len() as f64 * 100.0).min(100.0)
    }

    pub fn tally(&self, now: u64) -> LocalTally {
        LocalTally {
            keystrokes: self.total_keystrokes,
            errors: self.total_errors(),
            active_ms: self.active_elapsed_ms(now),
        }
    }
}
