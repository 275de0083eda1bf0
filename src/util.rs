pub fn mean(data: &[f64]) -> Option<f64> {
    match data.len() {
        0 => None,
        count => Some(data.iter().sum::<f64>() / count as f64),
    }
}

pub fn std_dev(data: &[f64]) -> Option<f64> {
    let data_mean = mean(data)?;
    let variance = data
        .iter()
        .map(|value| {
            let diff = data_mean - *value;
            diff * diff
        })
        .sum::<f64>()
        / data.len() as f64;

    Some(variance.sqrt())
}

/// Words per minute for `chars` characters over `active_ms` milliseconds,
/// using the standard five-characters-per-word convention.
pub fn wpm(chars: f64, active_ms: u64) -> f64 {
    if active_ms == 0 {
        return 0.0;
    }
    let minutes = active_ms as f64 / 60_000.0;
    (chars / 5.0) / minutes
}

pub fn clamp_percent(value: f64) -> f64 {
    value.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[10., 20., 30., 15., 22.]), Some(19.4));
        assert_eq!(mean(&[42.0]), Some(42.0));
        assert_eq!(mean(&[]), None);
    }

    #[test]
    fn test_std_dev() {
        assert_eq!(std_dev(&[15., 7., 55.]), Some(20.997354330698162));
        assert_eq!(std_dev(&[5.0, 5.0, 5.0]), Some(0.0));
        assert_eq!(std_dev(&[]), None);
    }

    #[test]
    fn test_wpm_one_minute() {
        // 300 chars in one minute is 60 words
        assert_eq!(wpm(300.0, 60_000), 60.0);
    }

    #[test]
    fn test_wpm_zero_duration() {
        assert_eq!(wpm(10.0, 0), 0.0);
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(120.0), 100.0);
        assert_eq!(clamp_percent(-3.0), 0.0);
        assert_eq!(clamp_percent(55.5), 55.5);
    }
}
