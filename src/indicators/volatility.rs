use crate::models::Candle;

/// Sample standard deviation divided by the mean
///
/// `None` for fewer than two values or a zero mean.
pub fn coefficient_of_variation(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return None;
    }

    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt() / mean)
}

/// Wash-traded tokens show suspiciously flat hourly volume
///
/// Looks at the last `lookback` hourly candles, drops the newest (still
/// forming) one, and requires the coefficient of variation of the rest to
/// reach `min_cv`.
pub fn volume_looks_organic(hourly: &[Candle], lookback: usize, min_cv: f64) -> bool {
    let start = hourly.len().saturating_sub(lookback);
    let recent = &hourly[start..];
    let Some((_, settled)) = recent.split_last() else {
        return false;
    };

    let volumes: Vec<f64> = settled.iter().map(|c| c.volume).collect();
    let cv = coefficient_of_variation(&volumes).unwrap_or(0.0);
    tracing::debug!("Volume coefficient of variation: {:.6}", cv);
    cv >= min_cv
}
