//! Pure EWMA / z-score math (§4.6), kept free of the coordination store so
//! it can be tested and reasoned about in isolation.

/// `EWMA_new = alpha * new_value + (1 - alpha) * EWMA_old`, except the very
/// first observation (`current_ewma == 0`) is taken as-is rather than
/// smoothed against an undefined baseline.
pub fn update_ewma(current_ewma: f64, new_value: f64, alpha: f64) -> f64 {
    if current_ewma == 0.0 {
        new_value
    } else {
        alpha * new_value + (1.0 - alpha) * current_ewma
    }
}

/// `Variance_new = (1 - alpha) * (Variance_old + alpha * (new - EWMA_old)^2)`
pub fn update_variance(current_variance: f64, current_ewma: f64, new_value: f64, alpha: f64) -> f64 {
    let diff = new_value - current_ewma;
    (1.0 - alpha) * (current_variance + alpha * diff * diff)
}

/// `z = (value - mean) / std_dev`, `0.0` when `std_dev` is zero.
pub fn z_score(value: f64, mean: f64, std_dev: f64) -> f64 {
    if std_dev == 0.0 {
        0.0
    } else {
        (value - mean) / std_dev
    }
}

pub fn is_anomaly(z: f64, threshold: f64) -> bool {
    z.abs() > threshold
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AbuseMetrics {
    pub ewma_rate: f64,
    pub ewma_rate_variance: f64,
    pub last_rate_update: f64,
    pub ewma_error_rate: f64,
    pub total_requests: u64,
    pub total_errors: u64,
    pub window_start: f64,
    pub window_requests: u64,
    pub window_errors: u64,
}

impl Default for AbuseMetrics {
    fn default() -> Self {
        Self {
            ewma_rate: 0.0,
            ewma_rate_variance: 0.0,
            last_rate_update: 0.0,
            ewma_error_rate: 0.0,
            total_requests: 0,
            total_errors: 0,
            window_start: 0.0,
            window_requests: 0,
            window_errors: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_is_taken_as_is() {
        assert_eq!(update_ewma(0.0, 42.0, 0.3), 42.0);
    }

    #[test]
    fn three_updates_of_the_same_value_converge_within_one_percent() {
        let mut ewma = 100.0;
        for _ in 0..3 {
            ewma = update_ewma(ewma, 100.0, 0.3);
        }
        assert!((ewma - 100.0).abs() < 1.0);
    }

    #[test]
    fn five_sigma_deviation_yields_z_of_five() {
        let z = z_score(125.0, 100.0, 5.0);
        assert!((z - 5.0).abs() < 1e-9);
    }

    #[test]
    fn zero_std_dev_never_flags_an_anomaly() {
        assert_eq!(z_score(1000.0, 1.0, 0.0), 0.0);
        assert!(!is_anomaly(z_score(1000.0, 1.0, 0.0), 3.0));
    }
}
