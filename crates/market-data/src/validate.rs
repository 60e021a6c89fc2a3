use engine_core::{Bar, EngineError};

/// Largest credible single-day move without a corporate action.
const MAX_DAILY_MOVE: f64 = 0.50;

/// Sanity-check a daily bar series before it enters the pipeline.
///
/// A violation drops the symbol from this run (logged by the caller),
/// it never fails the stage.
pub fn validate_bars(symbol: &str, bars: &[Bar]) -> Result<(), EngineError> {
    for bar in bars {
        if bar.high < bar.low {
            return Err(EngineError::Validation(format!(
                "{}: bar {} has high {} < low {}",
                symbol, bar.date, bar.high, bar.low
            )));
        }
        if bar.open <= 0.0 || bar.close <= 0.0 || bar.volume < 0.0 {
            return Err(EngineError::Validation(format!(
                "{}: bar {} has non-positive price or negative volume",
                symbol, bar.date
            )));
        }
    }

    for pair in bars.windows(2) {
        let prev_close = pair[0].close;
        if prev_close <= 0.0 {
            continue;
        }
        let move_pct = (pair[1].close / prev_close - 1.0).abs();
        if move_pct > MAX_DAILY_MOVE {
            return Err(EngineError::Validation(format!(
                "{}: {:.1}% move on {} looks like an unadjusted corporate action",
                symbol,
                move_pct * 100.0,
                pair[1].date
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(d: u32, open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2026, 7, d).unwrap(),
            open,
            high,
            low,
            close,
            volume: 1000.0,
        }
    }

    #[test]
    fn test_valid_series_passes() {
        let bars = vec![bar(20, 100.0, 102.0, 99.0, 101.0), bar(21, 101.0, 103.0, 100.0, 102.0)];
        assert!(validate_bars("TEST", &bars).is_ok());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let bars = vec![bar(20, 100.0, 99.0, 102.0, 101.0)];
        assert!(matches!(
            validate_bars("TEST", &bars),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_implausible_move_rejected() {
        let bars = vec![bar(20, 100.0, 102.0, 99.0, 100.0), bar(21, 40.0, 42.0, 39.0, 40.0)];
        assert!(matches!(
            validate_bars("TEST", &bars),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_boundary_move_passes() {
        // Exactly 50% is the cap, not beyond it.
        let bars = vec![bar(20, 100.0, 102.0, 99.0, 100.0), bar(21, 150.0, 151.0, 149.0, 150.0)];
        assert!(validate_bars("TEST", &bars).is_ok());
    }
}
