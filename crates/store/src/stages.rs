use anyhow::Result;
use chrono::NaiveDate;
use engine_core::{
    ConsistencyScore, LiquidityScore, MomentumScore, PositionSizing, StageRecord, TradeSetup,
};
use serde::de::DeserializeOwned;
use sqlx::Row;

use crate::db::Store;

/// The five per-symbol stage collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Momentum,
    Consistency,
    Liquidity,
    Setup,
    Sizing,
}

impl Stage {
    fn table(&self) -> &'static str {
        match self {
            Stage::Momentum => "momentum_scores",
            Stage::Consistency => "consistency_scores",
            Stage::Liquidity => "liquidity_scores",
            Stage::Setup => "trade_setups",
            Stage::Sizing => "position_sizes",
        }
    }
}

impl Store {
    /// Single upsert entry point for every stage variant. The record's
    /// own (symbol, week) header is the key; the full record lands in the
    /// payload column next to the indexed scalars.
    pub async fn upsert_stage_record(&self, record: &StageRecord) -> Result<()> {
        let (stage, qualifies, score, calculated_at, payload) = match record {
            StageRecord::Momentum(r) => (
                Stage::Momentum,
                r.qualifies,
                r.score,
                r.calculated_at,
                serde_json::to_string(r)?,
            ),
            StageRecord::Consistency(r) => (
                Stage::Consistency,
                r.qualifies,
                r.final_score,
                r.calculated_at,
                serde_json::to_string(r)?,
            ),
            StageRecord::Liquidity(r) => (
                Stage::Liquidity,
                r.qualifies,
                r.score,
                r.calculated_at,
                serde_json::to_string(r)?,
            ),
            StageRecord::Setup(r) => (
                Stage::Setup,
                true,
                r.quality_composite,
                r.calculated_at,
                serde_json::to_string(r)?,
            ),
            StageRecord::Sizing(r) => (
                Stage::Sizing,
                r.qualifies,
                r.position_pct,
                r.calculated_at,
                serde_json::to_string(r)?,
            ),
        };

        let sql = format!(
            r#"
            INSERT INTO {} (symbol, week, qualifies, score, rank, payload, calculated_at)
            VALUES (?, ?, ?, ?, NULL, ?, ?)
            ON CONFLICT(symbol, week) DO UPDATE SET
                qualifies = excluded.qualifies,
                score = excluded.score,
                rank = NULL,
                payload = excluded.payload,
                calculated_at = excluded.calculated_at
            "#,
            stage.table()
        );

        sqlx::query(&sql)
            .bind(record.symbol())
            .bind(record.week().to_string())
            .bind(qualifies)
            .bind(score)
            .bind(&payload)
            .bind(calculated_at.to_rfc3339())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Assign 1-based ranks by score over a week's qualifying rows. Run
    /// once at the end of a stage; the ordering is part of its output.
    pub async fn assign_stage_ranks(&self, stage: Stage, week: NaiveDate) -> Result<()> {
        let sql = format!(
            r#"
            UPDATE {table} SET rank = ranked.new_rank
            FROM (
                SELECT symbol, ROW_NUMBER() OVER (ORDER BY score DESC, symbol) AS new_rank
                FROM {table} WHERE week = ? AND qualifies = 1
            ) AS ranked
            WHERE {table}.symbol = ranked.symbol AND {table}.week = ?
            "#,
            table = stage.table()
        );

        sqlx::query(&sql)
            .bind(week.to_string())
            .bind(week.to_string())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn load_stage<T: DeserializeOwned>(
        &self,
        stage: Stage,
        week: NaiveDate,
        qualified_only: bool,
    ) -> Result<Vec<T>> {
        let sql = format!(
            r#"
            SELECT payload FROM {} WHERE week = ? {}
            ORDER BY rank IS NULL, rank, symbol
            "#,
            stage.table(),
            if qualified_only { "AND qualifies = 1" } else { "" }
        );

        let rows = sqlx::query(&sql)
            .bind(week.to_string())
            .fetch_all(self.pool())
            .await?;

        rows.iter()
            .map(|row| {
                let payload: String = row.try_get("payload")?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }

    pub async fn load_momentum(
        &self,
        week: NaiveDate,
        qualified_only: bool,
    ) -> Result<Vec<MomentumScore>> {
        self.load_stage(Stage::Momentum, week, qualified_only).await
    }

    pub async fn load_consistency(
        &self,
        week: NaiveDate,
        qualified_only: bool,
    ) -> Result<Vec<ConsistencyScore>> {
        self.load_stage(Stage::Consistency, week, qualified_only).await
    }

    pub async fn load_liquidity(
        &self,
        week: NaiveDate,
        qualified_only: bool,
    ) -> Result<Vec<LiquidityScore>> {
        self.load_stage(Stage::Liquidity, week, qualified_only).await
    }

    pub async fn load_setups(&self, week: NaiveDate) -> Result<Vec<TradeSetup>> {
        self.load_stage(Stage::Setup, week, true).await
    }

    pub async fn load_sizings(
        &self,
        week: NaiveDate,
        qualified_only: bool,
    ) -> Result<Vec<PositionSizing>> {
        self.load_stage(Stage::Sizing, week, qualified_only).await
    }

    /// Qualifying-row count for a stage week (monotone-filter checks and
    /// the recommendation's stage counts).
    pub async fn stage_qualified_count(&self, stage: Stage, week: NaiveDate) -> Result<usize> {
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE week = ? AND qualifies = 1",
            stage.table()
        );
        let row = sqlx::query(&sql)
            .bind(week.to_string())
            .fetch_one(self.pool())
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as usize)
    }

    /// Raw payloads for one stage week, keyed for byte-level idempotence
    /// comparisons in tests.
    pub async fn stage_payloads(
        &self,
        stage: Stage,
        week: NaiveDate,
    ) -> Result<Vec<(String, String)>> {
        let sql = format!(
            "SELECT symbol, payload FROM {} WHERE week = ? ORDER BY symbol",
            stage.table()
        );
        let rows = sqlx::query(&sql)
            .bind(week.to_string())
            .fetch_all(self.pool())
            .await?;
        rows.iter()
            .map(|row| Ok((row.try_get("symbol")?, row.try_get("payload")?)))
            .collect()
    }
}
