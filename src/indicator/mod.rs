//! Technical-indicator math over raw value series
//!
//! Pure functions from a price slice to a derived series. The strategy
//! context wires these to cached history and handles each indicator's warm-up
//! padding; nothing here touches the cache or the clock.

/// Simple moving average. Returns one value per full window, so the output
/// is `values.len() - window + 1` long.
pub fn sma(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(values.len() - window + 1);
    let mut sum: f64 = values[..window].iter().sum();
    out.push(sum / window as f64);
    for i in window..values.len() {
        sum += values[i] - values[i - window];
        out.push(sum / window as f64);
    }
    out
}

/// Exponential moving average seeded at the first value, same length as the
/// input. Callers discard the warm-up head by requesting padded history.
pub fn ema(values: &[f64], window: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let alpha = 2.0 / (window as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev = values[0];
    out.push(prev);
    for v in &values[1..] {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// MACD histogram: (fast EMA - slow EMA) minus its own signal EMA.
pub fn macd_diff(values: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<f64> {
    let fast_ema = ema(values, fast);
    let slow_ema = ema(values, slow);
    let line: Vec<f64> = fast_ema
        .iter()
        .zip(slow_ema.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal_line = ema(&line, signal);
    line.iter()
        .zip(signal_line.iter())
        .map(|(l, s)| l - s)
        .collect()
}

/// Number of standard deviations the price sits from its moving average: 0
/// at the middle band, +/-1 at the outer bands. Output is one value per full
/// window.
pub fn bollinger(values: &[f64], window: usize, ndev: f64) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return Vec::new();
    }
    let mid = sma(values, window);
    let mut out = Vec::with_capacity(mid.len());
    for (i, m) in mid.iter().enumerate() {
        let slice = &values[i..i + window];
        let var = slice.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / window as f64;
        let dev = ndev * var.sqrt();
        let price = values[i + window - 1];
        if dev == 0.0 {
            out.push(0.0);
        } else {
            out.push((price - m) / dev);
        }
    }
    out
}

/// Relative strength index over average gain/loss, transformed from [0, 100]
/// to [-1, 1]. Above 0.2 reads overbought, below -0.2 oversold. Output is
/// `values.len() - window` long.
pub fn rsi(values: &[f64], window: usize) -> Vec<f64> {
    if values.len() <= window {
        return Vec::new();
    }
    let mut gains = 0.0;
    let mut losses = 0.0;
    for w in values[..=window].windows(2) {
        let change = w[1] - w[0];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let mut avg_gain = gains / window as f64;
    let mut avg_loss = losses / window as f64;
    let scale = |g: f64, l: f64| {
        let r = if l == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + g / l)
        };
        (r - 50.0) / 50.0
    };
    let mut out = Vec::with_capacity(values.len() - window);
    out.push(scale(avg_gain, avg_loss));
    for w in values[window..].windows(2) {
        let change = w[1] - w[0];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        //Wilder smoothing
        avg_gain = (avg_gain * (window as f64 - 1.0) + gain) / window as f64;
        avg_loss = (avg_loss * (window as f64 - 1.0) + loss) / window as f64;
        out.push(scale(avg_gain, avg_loss));
    }
    out
}

/// Stochastic %K: where the close sits between the window low and high,
/// transformed from [0, 100] to [-1, 1]. Output is one value per full window.
pub fn stoch(high: &[f64], low: &[f64], close: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || close.len() < window {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(close.len() - window + 1);
    for i in 0..=close.len() - window {
        let window_high = high[i..i + window].iter().cloned().fold(f64::MIN, f64::max);
        let window_low = low[i..i + window].iter().cloned().fold(f64::MAX, f64::min);
        let k = if window_high == window_low {
            50.0
        } else {
            100.0 * (close[i + window - 1] - window_low) / (window_high - window_low)
        };
        out.push((k - 50.0) / 50.0);
    }
    out
}

/// Sample-over-sample fractional change, `values.len() - 1` long.
pub fn fraction_change(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

#[cfg(test)]
mod tests {
    use super::{bollinger, ema, fraction_change, macd_diff, rsi, sma, stoch};

    #[test]
    fn test_that_sma_averages_full_windows_only() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&values, 3), vec![2.0, 3.0, 4.0]);
        assert!(sma(&values, 6).is_empty());
    }

    #[test]
    fn test_that_ema_converges_toward_constant_input() {
        let values = vec![10.0; 50];
        let out = ema(&values, 12);
        assert_eq!(out.len(), 50);
        assert!((out[49] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_that_macd_is_flat_on_constant_series() {
        let values = vec![100.0; 60];
        let out = macd_diff(&values, 12, 26, 9);
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn test_that_macd_turns_positive_in_uptrend() {
        let values: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let out = macd_diff(&values, 12, 26, 9);
        assert!(*out.last().unwrap() > 0.0);
    }

    #[test]
    fn test_that_bollinger_is_bounded_at_the_bands() {
        //Price at the rolling mean reads 0
        let flat = vec![50.0; 30];
        let out = bollinger(&flat, 20, 2.0);
        assert!(out.iter().all(|v| *v == 0.0));

        //A spike pushes the reading positive
        let mut spiked = vec![50.0; 29];
        spiked.push(60.0);
        let out = bollinger(&spiked, 20, 2.0);
        assert!(*out.last().unwrap() > 1.0);
    }

    #[test]
    fn test_that_rsi_saturates_on_monotonic_series() {
        let rising: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let out = rsi(&rising, 14);
        //All gains, no losses: fully overbought
        assert!((out.last().unwrap() - 1.0).abs() < 1e-9);

        let falling: Vec<f64> = (0..40).map(|i| 100.0 - i as f64).collect();
        let out = rsi(&falling, 14);
        assert!((out.last().unwrap() + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_that_stoch_reads_position_within_window_range() {
        let high = vec![110.0; 14];
        let low = vec![90.0; 14];
        let mut close = vec![100.0; 13];
        close.push(110.0);
        let out = stoch(&high, &low, &close, 14);
        //Close at the window high maps to +1
        assert!((out.last().unwrap() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_that_fraction_change_drops_the_first_sample() {
        let values = vec![100.0, 110.0, 99.0];
        let out = fraction_change(&values);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.1).abs() < 1e-9);
        assert!((out[1] + 0.1).abs() < 1e-9);
    }
}
