use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::util::{clamp_percent, wpm};

/// Performance figures as judged by the authoritative scorer.
///
/// Values coming out of a scorer are untrusted for numeric well-formedness;
/// anything exposed to observers goes through [`MetricsSnapshot::sanitized`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub raw_wpm: f64,
    pub adjusted_wpm: f64,
    pub accuracy: f64,
    pub consistency: f64,
    pub is_bot: bool,
    pub cheat_flags: BTreeSet<String>,
}

impl Default for MetricsSnapshot {
    fn default() -> Self {
        Self {
            raw_wpm: 0.0,
            adjusted_wpm: 0.0,
            accuracy: 100.0,
            consistency: 100.0,
            is_bot: false,
            cheat_flags: BTreeSet::new(),
        }
    }
}

impl MetricsSnapshot {
    /// Non-finite or negative rates become 0; non-finite percentages become
    /// 100 and finite ones are clamped to `[0, 100]`.
    pub fn sanitized(self) -> Self {
        Self {
            raw_wpm: sanitize_rate(self.raw_wpm),
            adjusted_wpm: sanitize_rate(self.adjusted_wpm),
            accuracy: sanitize_percent(self.accuracy),
            consistency: sanitize_percent(self.consistency),
            is_bot: self.is_bot,
            cheat_flags: self.cheat_flags,
        }
    }

    pub fn flags_label(&self) -> String {
        self.cheat_flags.iter().map(String::as_str).collect::<Vec<_>>().join("|")
    }

    pub fn is_well_formed(&self) -> bool {
        self.raw_wpm.is_finite()
            && self.raw_wpm >= 0.0
            && self.adjusted_wpm.is_finite()
            && self.adjusted_wpm >= 0.0
            && (0.0..=100.0).contains(&self.accuracy)
            && (0.0..=100.0).contains(&self.consistency)
    }
}

fn sanitize_rate(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}

fn sanitize_percent(value: f64) -> f64 {
    if value.is_finite() {
        clamp_percent(value)
    } else {
        100.0
    }
}

/// Local keystroke accounting used as the fallback cross-check against the
/// authoritative scorer.
///
/// Backspace never touches `keystrokes`; `errors` counts every mistyped
/// character even when it is later erased.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTally {
    pub keystrokes: u64,
    pub errors: u64,
    pub active_ms: u64,
}

impl LocalTally {
    pub fn raw_wpm(&self) -> f64 {
        wpm(self.keystrokes as f64, self.active_ms)
    }

    pub fn net_wpm(&self) -> f64 {
        wpm(self.keystrokes.saturating_sub(self.errors) as f64, self.active_ms)
    }

    pub fn accuracy(&self) -> f64 {
        if self.keystrokes == 0 {
            return 100.0;
        }
        let correct = self.keystrokes.saturating_sub(self.errors) as f64;
        clamp_percent(correct / self.keystrokes as f64 * 100.0)
    }

    /// Snapshot built purely from local accounting, for when no
    /// authoritative reply is available.
    pub fn to_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            raw_wpm: self.raw_wpm(),
            adjusted_wpm: self.net_wpm(),
            accuracy: self.accuracy(),
            ..MetricsSnapshot::default()
        }
        .sanitized()
    }
}
