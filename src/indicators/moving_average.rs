/// Simple moving average of the last `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Exponential moving average of the whole series
///
/// Seeded with the mean of the first `period` values, then blended forward with
/// multiplier `2 / (period + 1)`.
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);

    let seed = calculate_sma(&prices[..period], period)?;

    let ema = prices[period..]
        .iter()
        .fold(seed, |ema, price| (price - ema) * multiplier + ema);

    Some(ema)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        assert_eq!(calculate_sma(&prices, 5), Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        assert!(calculate_sma(&prices, 5).is_none());
    }

    #[test]
    fn test_ema_seed_only() {
        // Exactly `period` values: EMA is the seed average
        let prices = vec![1.0, 2.0, 3.0];
        assert_eq!(calculate_ema(&prices, 3), Some(2.0));
    }

    #[test]
    fn test_ema_recursive_step() {
        // seed = 2.0, multiplier = 0.5: (6 - 2) * 0.5 + 2 = 4
        let prices = vec![1.0, 2.0, 3.0, 6.0];
        assert_eq!(calculate_ema(&prices, 3), Some(4.0));
    }

    #[test]
    fn test_ema_deterministic() {
        let prices: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        assert_eq!(calculate_ema(&prices, 9), calculate_ema(&prices, 9));
        assert!(calculate_ema(&prices[..8], 9).is_none());
    }
}
