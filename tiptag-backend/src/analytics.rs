// Dashboard aggregates, recomputed from the ledger on every read

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::database::{Database, DbPool};
use crate::error::LedgerError;
use crate::models::{from_millis, FundingGoal, Money, TipStatus};

const DEFAULT_WINDOW_DAYS: i64 = 30;
const MAX_BUCKETS: i64 = 2000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Hourly,
    #[default]
    Daily,
}

impl Bucket {
    fn width_ms(self) -> i64 {
        match self {
            Bucket::Hourly => 3_600_000,
            Bucket::Daily => 86_400_000,
        }
    }
}

/// Query window; defaults to the last 30 days in daily buckets
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bucket: Bucket,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub bucket_start: DateTime<Utc>,
    pub revenue: Money,
    pub tips: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LifetimeTotals {
    pub total_tips_received: Money,
    pub total_tip_count: i64,
    pub total_withdrawn: Money,
    pub available_balance: Money,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorAggregates {
    pub creator_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub bucket: Bucket,
    pub total_revenue: Money,
    pub total_tips: i64,
    pub average_tip: f64,
    pub profile_views: i64,
    pub conversion_rate: f64,
    pub time_series: Vec<SeriesPoint>,
    pub lifetime: LifetimeTotals,
    pub active_goal: Option<FundingGoal>,
}

/// Revenue, counts and a zero-filled series of completed tips in `[from, to)`
pub async fn creator_aggregates(
    pool: &DbPool,
    creator_id: &str,
    range: &TimeRange,
) -> Result<CreatorAggregates, LedgerError> {
    // Open-ended windows include everything committed up to this millisecond.
    let to = range
        .to
        .unwrap_or_else(|| Utc::now() + Duration::milliseconds(1));
    let from = match range.from {
        Some(from) => from,
        None => to
            .checked_sub_signed(Duration::days(DEFAULT_WINDOW_DAYS))
            .ok_or_else(|| {
                LedgerError::InvalidRequest("time range end is out of range".to_string())
            })?,
    };
    if to <= from {
        return Err(LedgerError::InvalidRequest(
            "time range end must be after its start".to_string(),
        ));
    }

    let width = range.bucket.width_ms();
    let from_ms = from.timestamp_millis();
    let to_ms = to.timestamp_millis();
    let first_bucket = from_ms.div_euclid(width) * width;
    let bucket_count = (to_ms - first_bucket + width - 1) / width;
    if bucket_count > MAX_BUCKETS {
        return Err(LedgerError::InvalidRequest(format!(
            "time range spans {} buckets, at most {} allowed",
            bucket_count, MAX_BUCKETS
        )));
    }

    let creator = Database::creator_by_id(pool, creator_id).await?;

    let (total_revenue, total_tips): (Money, i64) = sqlx::query_as(
        r#"
        SELECT COALESCE(SUM(amount), 0), COUNT(*)
        FROM tips
        WHERE creator_id = ? AND status = ? AND completed_at_ms >= ? AND completed_at_ms < ?
        "#,
    )
    .bind(creator_id)
    .bind(TipStatus::Completed)
    .bind(from_ms)
    .bind(to_ms)
    .fetch_one(pool)
    .await?;

    let profile_views: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM profile_views WHERE creator_id = ? AND viewed_at_ms >= ? AND viewed_at_ms < ?",
    )
    .bind(creator_id)
    .bind(from_ms)
    .bind(to_ms)
    .fetch_one(pool)
    .await?;

    let rows: Vec<(i64, Money, i64)> = sqlx::query_as(
        r#"
        SELECT (completed_at_ms / ?) * ? AS bucket_start, SUM(amount), COUNT(*)
        FROM tips
        WHERE creator_id = ? AND status = ? AND completed_at_ms >= ? AND completed_at_ms < ?
        GROUP BY bucket_start
        "#,
    )
    .bind(width)
    .bind(width)
    .bind(creator_id)
    .bind(TipStatus::Completed)
    .bind(from_ms)
    .bind(to_ms)
    .fetch_all(pool)
    .await?;

    let by_bucket: HashMap<i64, (Money, i64)> = rows
        .into_iter()
        .map(|(start, revenue, tips)| (start, (revenue, tips)))
        .collect();
    let time_series = (0..bucket_count)
        .map(|i| {
            let start = first_bucket + i * width;
            let (revenue, tips) = by_bucket.get(&start).copied().unwrap_or((0, 0));
            SeriesPoint {
                bucket_start: from_millis(start),
                revenue,
                tips,
            }
        })
        .collect();

    let active_goal = sqlx::query_as::<_, FundingGoal>(
        "SELECT * FROM funding_goals WHERE creator_id = ? AND active = 1",
    )
    .bind(creator_id)
    .fetch_optional(pool)
    .await?;

    Ok(CreatorAggregates {
        creator_id: creator.id.clone(),
        from,
        to,
        bucket: range.bucket,
        total_revenue,
        total_tips,
        average_tip: ratio(total_revenue, total_tips),
        profile_views,
        conversion_rate: ratio(total_tips, profile_views),
        time_series,
        lifetime: LifetimeTotals {
            total_tips_received: creator.total_tips_received,
            total_tip_count: creator.total_tip_count,
            total_withdrawn: creator.total_withdrawn,
            available_balance: creator.available_balance(),
        },
        active_goal,
    })
}

fn ratio(numerator: i64, denominator: i64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
