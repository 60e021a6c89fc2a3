use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use engine_core::{
    AllocationStatus, PortfolioAllocation, Recommendation, RecommendationStatus, RegimeSnapshot,
    SystemStats, TradeOutcome,
};
use execution::TrackedPosition;
use sqlx::Row;

use crate::db::Store;

impl Store {
    pub async fn upsert_regime(&self, regime: &RegimeSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO regimes (week, state, confidence, composite, multiplier, payload, calculated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(week) DO UPDATE SET
                state = excluded.state,
                confidence = excluded.confidence,
                composite = excluded.composite,
                multiplier = excluded.multiplier,
                payload = excluded.payload,
                calculated_at = excluded.calculated_at
            "#,
        )
        .bind(regime.week.to_string())
        .bind(regime.state.as_str())
        .bind(regime.confidence)
        .bind(regime.composite)
        .bind(regime.multiplier)
        .bind(serde_json::to_string(regime)?)
        .bind(regime.calculated_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn load_regime(&self, week: NaiveDate) -> Result<Option<RegimeSnapshot>> {
        let row = sqlx::query("SELECT payload FROM regimes WHERE week = ?")
            .bind(week.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| {
            let payload: String = r.try_get("payload")?;
            Ok(serde_json::from_str(&payload)?)
        })
        .transpose()
    }

    pub async fn upsert_allocation(&self, allocation: &PortfolioAllocation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO allocations (week, status, payload, calculated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(week) DO UPDATE SET
                status = excluded.status,
                payload = excluded.payload,
                calculated_at = excluded.calculated_at
            "#,
        )
        .bind(allocation.week.to_string())
        .bind(allocation.status.as_str())
        .bind(serde_json::to_string(allocation)?)
        .bind(allocation.calculated_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn load_allocation(&self, week: NaiveDate) -> Result<Option<PortfolioAllocation>> {
        let row = sqlx::query("SELECT payload FROM allocations WHERE week = ?")
            .bind(week.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| {
            let payload: String = r.try_get("payload")?;
            Ok(serde_json::from_str(&payload)?)
        })
        .transpose()
    }

    /// The most recent approved allocation, for the execution engine.
    pub async fn latest_approved_allocation(&self) -> Result<Option<PortfolioAllocation>> {
        let row = sqlx::query(
            "SELECT payload FROM allocations WHERE status = 'approved' ORDER BY week DESC LIMIT 1",
        )
        .fetch_optional(self.pool())
        .await?;
        row.map(|r| {
            let payload: String = r.try_get("payload")?;
            Ok(serde_json::from_str(&payload)?)
        })
        .transpose()
    }

    pub async fn set_allocation_status(
        &self,
        week: NaiveDate,
        status: AllocationStatus,
    ) -> Result<()> {
        // Keep the scalar column and payload in agreement.
        if let Some(mut allocation) = self.load_allocation(week).await? {
            allocation.status = status;
            self.upsert_allocation(&allocation).await?;
        }
        Ok(())
    }

    pub async fn upsert_recommendation(&self, rec: &Recommendation) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO recommendations (week, status, payload, calculated_at, expires_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(week) DO UPDATE SET
                status = excluded.status,
                payload = excluded.payload,
                calculated_at = excluded.calculated_at,
                expires_at = excluded.expires_at
            "#,
        )
        .bind(rec.week.to_string())
        .bind(rec.status.as_str())
        .bind(serde_json::to_string(rec)?)
        .bind(rec.calculated_at.to_rfc3339())
        .bind(rec.expires_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn load_recommendation(&self, week: NaiveDate) -> Result<Option<Recommendation>> {
        let row = sqlx::query("SELECT payload FROM recommendations WHERE week = ?")
            .bind(week.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.map(|r| {
            let payload: String = r.try_get("payload")?;
            Ok(serde_json::from_str(&payload)?)
        })
        .transpose()
    }

    pub async fn set_recommendation_status(
        &self,
        week: NaiveDate,
        status: RecommendationStatus,
    ) -> Result<()> {
        if let Some(mut rec) = self.load_recommendation(week).await? {
            rec.status = status;
            self.upsert_recommendation(&rec).await?;
        }
        Ok(())
    }

    /// Flip non-terminal recommendations past their expiry to expired.
    /// Returns how many were expired.
    pub async fn expire_stale_recommendations(&self, now: DateTime<Utc>) -> Result<usize> {
        let rows = sqlx::query(
            r#"
            SELECT week, payload FROM recommendations
            WHERE status IN ('draft', 'approved') AND expires_at <= ?
            "#,
        )
        .bind(now.to_rfc3339())
        .fetch_all(self.pool())
        .await?;

        let mut expired = 0usize;
        for row in rows {
            let payload: String = row.try_get("payload")?;
            let mut rec: Recommendation = serde_json::from_str(&payload)?;
            rec.status = RecommendationStatus::Expired;
            self.upsert_recommendation(&rec).await?;
            expired += 1;
        }
        if expired > 0 {
            tracing::info!("Expired {} stale recommendations", expired);
        }
        Ok(expired)
    }

    pub async fn upsert_tracked_positions(&self, positions: &[TrackedPosition]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for p in positions {
            sqlx::query(
                r#"
                INSERT INTO tracked_positions (symbol, week, status, payload)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(symbol, week) DO UPDATE SET
                    status = excluded.status,
                    payload = excluded.payload
                "#,
            )
            .bind(&p.symbol)
            .bind(p.week.to_string())
            .bind(p.status.as_str())
            .bind(serde_json::to_string(p)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load_tracked_positions(&self, week: NaiveDate) -> Result<Vec<TrackedPosition>> {
        let rows = sqlx::query(
            "SELECT payload FROM tracked_positions WHERE week = ? ORDER BY symbol",
        )
        .bind(week.to_string())
        .fetch_all(self.pool())
        .await?;
        rows.iter()
            .map(|r| {
                let payload: String = r.try_get("payload")?;
                Ok(serde_json::from_str(&payload)?)
            })
            .collect()
    }

    pub async fn upsert_outcome(&self, outcome: &TradeOutcome) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_outcomes (symbol, week, r_multiple, win, closed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(symbol, week) DO UPDATE SET
                r_multiple = excluded.r_multiple,
                win = excluded.win,
                closed_at = excluded.closed_at
            "#,
        )
        .bind(&outcome.symbol)
        .bind(outcome.week.to_string())
        .bind(outcome.r_multiple)
        .bind(outcome.win)
        .bind(outcome.closed_at.to_rfc3339())
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Closed outcomes since `cutoff_week`, oldest first.
    pub async fn outcomes_since(&self, cutoff_week: NaiveDate) -> Result<Vec<TradeOutcome>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, week, r_multiple, win, closed_at
            FROM trade_outcomes WHERE week >= ?
            ORDER BY week, symbol
            "#,
        )
        .bind(cutoff_week.to_string())
        .fetch_all(self.pool())
        .await?;

        rows.iter()
            .map(|row| {
                let week: String = row.try_get("week")?;
                let closed_at: String = row.try_get("closed_at")?;
                Ok(TradeOutcome {
                    symbol: row.try_get("symbol")?,
                    week: crate::stocks::parse_date(&week)?,
                    r_multiple: row.try_get("r_multiple")?,
                    win: row.try_get("win")?,
                    closed_at: DateTime::parse_from_rfc3339(&closed_at)?.with_timezone(&Utc),
                })
            })
            .collect()
    }

    /// Rolling-stats snapshot from the trailing 52 weeks of outcomes.
    pub async fn system_stats_snapshot(&self, as_of_week: NaiveDate) -> Result<SystemStats> {
        let cutoff = as_of_week - chrono::Duration::weeks(52);
        let outcomes = self.outcomes_since(cutoff).await?;
        Ok(execution::rolling_stats(&outcomes))
    }
}
