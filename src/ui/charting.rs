/// X (seconds) and Y (WPM) bounds for the results chart
pub fn compute_chart_params(coords: &[(f64, f64)]) -> (f64, f64) {
    let highest_wpm = coords.iter().map(|&(_, wpm)| wpm).fold(0.0, f64::max);
    let overall_duration = coords.last().map_or(1.0, |&(t, _)| t).max(1.0);

    (overall_duration, highest_wpm.round())
}

/// Format a simple numeric label consistently
pub fn format_label(val: f64) -> String {
    if (val - val.round()).abs() < f64::EPSILON {
        format!("{}", val.round())
    } else {
        format!("{val:.2}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chart_params_without_samples() {
        assert_eq!(compute_chart_params(&[]), (1.0, 0.0));
    }

    #[test]
    fn chart_params_follow_samples() {
        let coords = [(1.0, 30.2), (2.0, 48.6), (3.5, 41.0)];
        assert_eq!(compute_chart_params(&coords), (3.5, 49.0));
    }

    #[test]
    fn labels() {
        assert_eq!(format_label(1.0), "1");
        assert_eq!(format_label(1.2345), "1.23");
    }
}
