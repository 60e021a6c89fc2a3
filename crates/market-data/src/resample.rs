use chrono::{Datelike, Weekday};
use engine_core::{week_start, Bar, WeeklyBar};

/// Resample daily bars into ISO weekly bars (Monday–Friday).
///
/// open = first open, high = max high, low = min low, close = last close,
/// volume = sum. Bars must be sorted ascending by date. A partial final
/// week (no Friday bar yet) is dropped.
pub fn weekly_bars(daily: &[Bar]) -> Vec<WeeklyBar> {
    let mut weeks: Vec<WeeklyBar> = Vec::new();
    let mut last_bar_weekday: Option<Weekday> = None;

    for bar in daily {
        let week = week_start(bar.date);
        match weeks.last_mut() {
            Some(current) if current.week == week => {
                current.high = current.high.max(bar.high);
                current.low = current.low.min(bar.low);
                current.close = bar.close;
                current.volume += bar.volume;
            }
            _ => {
                weeks.push(WeeklyBar {
                    week,
                    open: bar.open,
                    high: bar.high,
                    low: bar.low,
                    close: bar.close,
                    volume: bar.volume,
                });
            }
        }
        last_bar_weekday = Some(bar.date.weekday());
    }

    // The final week is partial unless its last session was a Friday.
    if let Some(weekday) = last_bar_weekday {
        if weekday != Weekday::Fri {
            weeks.pop();
        }
    }

    weeks
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(y: i32, m: u32, d: u32, open: f64, high: f64, low: f64, close: f64, vol: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            open,
            high,
            low,
            close,
            volume: vol,
        }
    }

    #[test]
    fn test_weekly_aggregation() {
        // Mon 2026-07-20 .. Fri 2026-07-24
        let daily = vec![
            bar(2026, 7, 20, 100.0, 104.0, 99.0, 103.0, 1000.0),
            bar(2026, 7, 21, 103.0, 106.0, 102.0, 105.0, 1100.0),
            bar(2026, 7, 22, 105.0, 105.5, 101.0, 102.0, 900.0),
            bar(2026, 7, 23, 102.0, 108.0, 102.0, 107.0, 1200.0),
            bar(2026, 7, 24, 107.0, 109.0, 106.0, 108.0, 1300.0),
        ];
        let weeks = weekly_bars(&daily);
        assert_eq!(weeks.len(), 1);
        let w = &weeks[0];
        assert_eq!(w.week, NaiveDate::from_ymd_opt(2026, 7, 20).unwrap());
        assert_eq!(w.open, 100.0);
        assert_eq!(w.high, 109.0);
        assert_eq!(w.low, 99.0);
        assert_eq!(w.close, 108.0);
        assert_eq!(w.volume, 5500.0);
    }

    #[test]
    fn test_partial_final_week_dropped() {
        let daily = vec![
            // Complete week.
            bar(2026, 7, 20, 100.0, 104.0, 99.0, 103.0, 1000.0),
            bar(2026, 7, 24, 103.0, 106.0, 102.0, 105.0, 1100.0),
            // Partial next week: Monday and Tuesday only.
            bar(2026, 7, 27, 105.0, 107.0, 104.0, 106.0, 900.0),
            bar(2026, 7, 28, 106.0, 108.0, 105.0, 107.0, 950.0),
        ];
        let weeks = weekly_bars(&daily);
        assert_eq!(weeks.len(), 1);
        assert_eq!(weeks[0].week, NaiveDate::from_ymd_opt(2026, 7, 20).unwrap());
    }

    #[test]
    fn test_holiday_shortened_week_kept_when_friday_present() {
        // Tue-Fri (Monday holiday) still counts as a complete week.
        let daily = vec![
            bar(2026, 7, 21, 100.0, 101.0, 99.0, 100.5, 500.0),
            bar(2026, 7, 24, 100.5, 102.0, 100.0, 101.5, 600.0),
        ];
        let weeks = weekly_bars(&daily);
        assert_eq!(weeks.len(), 1);
    }
}
