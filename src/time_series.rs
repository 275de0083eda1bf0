use serde::{Deserialize, Serialize};

/// One point of the performance graph, sampled while a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    /// Active elapsed seconds.
    pub t: f64,
    pub wpm: f64,
    pub raw_wpm: f64,
}

impl TimeSeriesPoint {
    pub fn new(t: f64, wpm: f64, raw_wpm: f64) -> Self {
        Self { t, wpm, raw_wpm }
    }
}

impl From<TimeSeriesPoint> for (f64, f64) {
    fn from(p: TimeSeriesPoint) -> Self {
        (p.t, p.wpm)
    }
}

/// Chart-ready `(t, wpm)` pairs.
pub fn wpm_coords(samples: &[TimeSeriesPoint]) -> Vec<(f64, f64)> {
    samples.iter().copied().map(Into::into).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coords_drop_raw_wpm() {
        let samples = [
            TimeSeriesPoint::new(1.0, 30.0, 34.0),
            TimeSeriesPoint::new(2.0, 42.0, 44.0),
        ];
        assert_eq!(wpm_coords(&samples), vec![(1.0, 30.0), (2.0, 42.0)]);
    }
}
