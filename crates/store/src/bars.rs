use anyhow::Result;
use chrono::NaiveDate;
use engine_core::{Bar, WeeklyBar};
use sqlx::Row;

use crate::db::Store;
use crate::stocks::parse_date;

impl Store {
    /// Upsert a symbol's daily bars (idempotent by (symbol, date)).
    pub async fn upsert_daily_bars(&self, symbol: &str, bars: &[Bar]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO daily_bars (symbol, date, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, date) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                "#,
            )
            .bind(symbol)
            .bind(bar.date.to_string())
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Daily bars for a symbol, oldest first, trailing `limit` sessions.
    pub async fn load_daily_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>> {
        let rows = sqlx::query(
            r#"
            SELECT date, open, high, low, close, volume
            FROM daily_bars WHERE symbol = ?
            ORDER BY date DESC LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        let mut bars: Vec<Bar> = rows
            .iter()
            .map(|row| {
                let date: String = row.try_get("date")?;
                Ok(Bar {
                    date: parse_date(&date)?,
                    open: row.try_get("open")?,
                    high: row.try_get("high")?,
                    low: row.try_get("low")?,
                    close: row.try_get("close")?,
                    volume: row.try_get("volume")?,
                })
            })
            .collect::<Result<_>>()?;
        bars.reverse();
        Ok(bars)
    }

    pub async fn upsert_weekly_bars(&self, symbol: &str, bars: &[WeeklyBar]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for bar in bars {
            sqlx::query(
                r#"
                INSERT INTO weekly_bars (symbol, week, open, high, low, close, volume)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol, week) DO UPDATE SET
                    open = excluded.open,
                    high = excluded.high,
                    low = excluded.low,
                    close = excluded.close,
                    volume = excluded.volume
                "#,
            )
            .bind(symbol)
            .bind(bar.week.to_string())
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Weekly bars for a symbol up to and including `week`, oldest first.
    pub async fn load_weekly_bars(
        &self,
        symbol: &str,
        up_to: NaiveDate,
        limit: usize,
    ) -> Result<Vec<WeeklyBar>> {
        let rows = sqlx::query(
            r#"
            SELECT week, open, high, low, close, volume
            FROM weekly_bars WHERE symbol = ? AND week <= ?
            ORDER BY week DESC LIMIT ?
            "#,
        )
        .bind(symbol)
        .bind(up_to.to_string())
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        let mut bars: Vec<WeeklyBar> = rows
            .iter()
            .map(|row| {
                let week: String = row.try_get("week")?;
                Ok(WeeklyBar {
                    week: parse_date(&week)?,
                    open: row.try_get("open")?,
                    high: row.try_get("high")?,
                    low: row.try_get("low")?,
                    close: row.try_get("close")?,
                    volume: row.try_get("volume")?,
                })
            })
            .collect::<Result<_>>()?;
        bars.reverse();
        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(d: u32, close: f64) -> Bar {
        Bar {
            date: NaiveDate::from_ymd_opt(2026, 2, d).unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 1000.0,
        }
    }

    #[tokio::test]
    async fn test_daily_bar_round_trip_and_idempotence() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let bars = vec![bar(2, 100.0), bar(3, 101.0), bar(4, 102.0)];

        store.upsert_daily_bars("TEST", &bars).await.unwrap();
        store.upsert_daily_bars("TEST", &bars).await.unwrap();

        let loaded = store.load_daily_bars("TEST", 10).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].close, 100.0);
        assert_eq!(loaded[2].close, 102.0);
    }

    #[tokio::test]
    async fn test_daily_bar_limit_takes_most_recent() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let bars: Vec<Bar> = (1..=20).map(|d| bar(d, 100.0 + d as f64)).collect();
        store.upsert_daily_bars("TEST", &bars).await.unwrap();

        let loaded = store.load_daily_bars("TEST", 5).await.unwrap();
        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded[0].close, 116.0);
        assert_eq!(loaded[4].close, 120.0);
    }

    #[tokio::test]
    async fn test_weekly_bars_windowed_by_week() {
        let store = Store::new("sqlite::memory:").await.unwrap();
        let weeks: Vec<WeeklyBar> = (0..5)
            .map(|i| WeeklyBar {
                week: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()
                    + chrono::Duration::weeks(i),
                open: 100.0,
                high: 105.0,
                low: 95.0,
                close: 101.0 + i as f64,
                volume: 1.0e6,
            })
            .collect();
        store.upsert_weekly_bars("TEST", &weeks).await.unwrap();

        let up_to = NaiveDate::from_ymd_opt(2026, 1, 19).unwrap();
        let loaded = store.load_weekly_bars("TEST", up_to, 10).await.unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.last().unwrap().week, up_to);
    }
}
