use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use engine_core::{Stock, Tier};
use sqlx::Row;
use std::str::FromStr;

use crate::db::Store;

impl Store {
    /// Upsert the universe for a run. Symbols absent from this run are
    /// deactivated first, so re-running with the same input is a no-op.
    pub async fn replace_universe(&self, stocks: &[Stock]) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        sqlx::query("UPDATE stocks SET active = 0")
            .execute(&mut *tx)
            .await?;

        for stock in stocks {
            sqlx::query(
                r#"
                INSERT INTO stocks (
                    symbol, name, isin, sector, lot_size, is_mtf,
                    in_nifty_50, in_nifty_100, in_nifty_200, in_nifty_500,
                    quality_score, tier, active, calculated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol) DO UPDATE SET
                    name = excluded.name,
                    isin = excluded.isin,
                    sector = excluded.sector,
                    lot_size = excluded.lot_size,
                    is_mtf = excluded.is_mtf,
                    in_nifty_50 = excluded.in_nifty_50,
                    in_nifty_100 = excluded.in_nifty_100,
                    in_nifty_200 = excluded.in_nifty_200,
                    in_nifty_500 = excluded.in_nifty_500,
                    quality_score = excluded.quality_score,
                    tier = excluded.tier,
                    active = excluded.active,
                    calculated_at = excluded.calculated_at
                "#,
            )
            .bind(&stock.symbol)
            .bind(&stock.name)
            .bind(&stock.isin)
            .bind(&stock.sector)
            .bind(stock.lot_size)
            .bind(stock.is_mtf)
            .bind(stock.in_nifty_50)
            .bind(stock.in_nifty_100)
            .bind(stock.in_nifty_200)
            .bind(stock.in_nifty_500)
            .bind(stock.quality_score)
            .bind(stock.tier.as_str())
            .bind(stock.active)
            .bind(stock.calculated_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Active stocks at or above the quality floor, best first.
    pub async fn active_stocks_above(&self, min_quality: i64) -> Result<Vec<Stock>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, name, isin, sector, lot_size, is_mtf,
                   in_nifty_50, in_nifty_100, in_nifty_200, in_nifty_500,
                   quality_score, tier, active, calculated_at
            FROM stocks
            WHERE active = 1 AND quality_score >= ?
            ORDER BY quality_score DESC, symbol
            "#,
        )
        .bind(min_quality)
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(row_to_stock).collect()
    }

    pub async fn get_stock(&self, symbol: &str) -> Result<Option<Stock>> {
        let row = sqlx::query(
            r#"
            SELECT symbol, name, isin, sector, lot_size, is_mtf,
                   in_nifty_50, in_nifty_100, in_nifty_200, in_nifty_500,
                   quality_score, tier, active, calculated_at
            FROM stocks WHERE symbol = ?
            "#,
        )
        .bind(symbol)
        .fetch_optional(self.pool())
        .await?;

        row.as_ref().map(row_to_stock).transpose()
    }
}

fn row_to_stock(row: &sqlx::sqlite::SqliteRow) -> Result<Stock> {
    let tier_str: String = row.try_get("tier")?;
    let calculated_at: String = row.try_get("calculated_at")?;
    Ok(Stock {
        symbol: row.try_get("symbol")?,
        name: row.try_get("name")?,
        isin: row.try_get("isin")?,
        sector: row.try_get("sector")?,
        lot_size: row.try_get("lot_size")?,
        is_mtf: row.try_get("is_mtf")?,
        in_nifty_50: row.try_get("in_nifty_50")?,
        in_nifty_100: row.try_get("in_nifty_100")?,
        in_nifty_200: row.try_get("in_nifty_200")?,
        in_nifty_500: row.try_get("in_nifty_500")?,
        quality_score: row.try_get("quality_score")?,
        tier: Tier::from_str(&tier_str).map_err(anyhow::Error::msg)?,
        active: row.try_get("active")?,
        calculated_at: DateTime::parse_from_rfc3339(&calculated_at)?.with_timezone(&Utc),
    })
}

/// Parse a stored ISO date key.
pub(crate) fn parse_date(s: &str) -> Result<NaiveDate> {
    Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?)
}
