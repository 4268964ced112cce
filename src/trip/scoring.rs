use crate::sensing::SpeedHistory;

pub const PERFECT_SCORE: u8 = 100;

/// Population variance (mean of squared deviations). Zero for fewer than two values.
pub fn population_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }

    let count = values.len() as f64;
    let mean = values.iter().sum::<f64>() / count;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count
}

/// Safety score from speed consistency: 100, minus 10 above a variance of
/// 10, minus 20 above 20. Never below zero.
pub fn safety_score(variance: f64) -> u8 {
    let penalty: u8 = if variance > 20.0 {
        20
    } else if variance > 10.0 {
        10
    } else {
        0
    };

    PERFECT_SCORE.saturating_sub(penalty)
}

pub fn score_history(history: &SpeedHistory) -> u8 {
    let samples = history.to_vec();
    safety_score(population_variance(&samples))
}
