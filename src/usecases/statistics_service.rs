//! Operation statistics: per-day figures, weekly/monthly roll-ups and the dashboard.

use crate::domain::{DomainError, OperationStatistics};
use crate::ports::StatisticsStore;
use crate::schemas::operation::{
    DashboardStatisticsResponse, OperationStatisticsResponse, StatType, StatisticsQuery,
    TrendPoint,
};
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use std::sync::Arc;
use tracing::debug;

const TREND_DAYS: u64 = 7;
const TOP_REFERRERS: i64 = 5;

/// `[start, end)` covering one UTC day.
fn day_window(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>), DomainError> {
    let next = date
        .checked_add_days(Days::new(1))
        .ok_or_else(|| DomainError::Validation(format!("date {} out of range", date)))?;
    let start = date
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .ok_or_else(|| DomainError::Validation(format!("date {} out of range", date)))?;
    let end = next
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc())
        .ok_or_else(|| DomainError::Validation(format!("date {} out of range", date)))?;
    Ok((start, end))
}

/// First day of the bucket that `date` falls into.
pub fn bucket_start(date: NaiveDate, stat_type: StatType) -> NaiveDate {
    match stat_type {
        StatType::Daily => date,
        StatType::Weekly => date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64),
        StatType::Monthly => date.with_day(1).unwrap_or(date),
    }
}

pub struct StatisticsService {
    stats: Arc<dyn StatisticsStore>,
}

impl StatisticsService {
    pub fn new(stats: Arc<dyn StatisticsStore>) -> Self {
        Self { stats }
    }

    pub async fn daily_statistics(&self, date: NaiveDate) -> Result<OperationStatistics, DomainError> {
        let (start, end) = day_window(date)?;
        let mut figures = self.stats.window_figures(start, end).await?;
        figures.stat_date = Some(date);
        figures.stat_type = StatType::Daily.as_str().to_string();
        Ok(figures)
    }

    pub async fn get_operation_statistics(
        &self,
        query: &StatisticsQuery,
    ) -> Result<Vec<OperationStatisticsResponse>, DomainError> {
        self.get_operation_statistics_with_progress(query, |_| {}).await
    }

    /// Same as `get_operation_statistics`; `on_day` is called after each day is read.
    pub async fn get_operation_statistics_with_progress(
        &self,
        query: &StatisticsQuery,
        mut on_day: impl FnMut(NaiveDate) + Send,
    ) -> Result<Vec<OperationStatisticsResponse>, DomainError> {
        query.validate()?;
        let mut buckets: Vec<OperationStatisticsResponse> = Vec::new();
        for date in query.start_date.iter_days().take_while(|d| *d <= query.end_date) {
            let day = self.daily_statistics(date).await?;
            on_day(date);
            let key = bucket_start(date, query.stat_type);
            match buckets.last_mut().filter(|b| b.stat_date == key) {
                Some(bucket) => bucket.figures.accumulate(&day),
                None => {
                    let mut figures = day;
                    figures.stat_date = Some(key);
                    figures.stat_type = query.stat_type.as_str().to_string();
                    buckets.push(OperationStatisticsResponse {
                        stat_date: key,
                        stat_type: query.stat_type,
                        figures,
                    });
                }
            }
        }
        debug!(
            start = %query.start_date,
            end = %query.end_date,
            kind = %query.stat_type,
            buckets = buckets.len(),
            "statistics aggregated"
        );
        Ok(buckets)
    }

    pub async fn get_dashboard(&self) -> Result<DashboardStatisticsResponse, DomainError> {
        let now = Utc::now();
        let today_date = now.date_naive();
        let today = self.daily_statistics(today_date).await?;

        let first = today_date
            .checked_sub_days(Days::new(TREND_DAYS - 1))
            .unwrap_or(today_date);
        let mut trend = Vec::with_capacity(TREND_DAYS as usize);
        for date in first.iter_days().take_while(|d| *d <= today_date) {
            let day = if date == today_date {
                today.clone()
            } else {
                self.daily_statistics(date).await?
            };
            trend.push(TrendPoint {
                date,
                new_users: day.new_users,
                revenue: day.recharge_amount + day.membership_amount,
            });
        }

        Ok(DashboardStatisticsResponse {
            today,
            total_users: self.stats.count_users().await?,
            total_members: self.stats.count_active_members(now).await?,
            total_revenue: self.stats.total_paid_recharge().await?,
            trend,
            top_referrers: self.stats.top_referrers(TOP_REFERRERS).await?,
        })
    }
}
