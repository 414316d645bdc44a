/// Average True Range (ATR) indicator
///
/// True Range is the greatest of:
/// - Current High - Current Low
/// - Abs(Current High - Previous Close)
/// - Abs(Current Low - Previous Close)
///
/// The ATR here is the plain mean of the most recent `period` true ranges.

use crate::models::Candle;

/// True range of every candle after the first
pub fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|pair| {
            let high = pair[1].high;
            let low = pair[1].low;
            let prev_close = pair[0].close;

            (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs())
        })
        .collect()
}

/// Calculate ATR for the given candles
///
/// Returns None unless at least `period + 1` candles are available
pub fn calculate_atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }

    let ranges = true_ranges(candles);
    let recent = &ranges[ranges.len() - period..];
    Some(recent.iter().sum::<f64>() / period as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn create_test_candles(prices: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                symbol: "TESTUSDT".to_string(),
                open_time: Utc::now() + Duration::minutes(5 * i as i64),
                open,
                high,
                low,
                close,
                volume: 1000.0,
            })
            .collect()
    }

    #[test]
    fn test_calculate_atr_flat_range() {
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0); 15]);
        assert_eq!(calculate_atr(&candles, 14), Some(2.0));
    }

    #[test]
    fn test_true_range_uses_previous_close_gap() {
        let candles = create_test_candles(&[
            (100.0, 101.0, 99.0, 100.0),
            // gap up: |high - prev_close| = 10 beats high - low = 2
            (109.0, 110.0, 108.0, 109.0),
        ]);
        assert_eq!(true_ranges(&candles), vec![10.0]);
    }

    #[test]
    fn test_atr_only_counts_recent_ranges() {
        let mut prices = vec![(100.0, 120.0, 80.0, 100.0); 10];
        prices.extend(vec![(100.0, 101.0, 99.0, 100.0); 15]);

        let candles = create_test_candles(&prices);
        assert_eq!(calculate_atr(&candles, 14), Some(2.0));
    }

    #[test]
    fn test_insufficient_data() {
        let candles = create_test_candles(&[(100.0, 101.0, 99.0, 100.0); 14]);
        assert!(calculate_atr(&candles, 14).is_none());
    }
}
