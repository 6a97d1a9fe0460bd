//! Activity, coupon, referral and statistics payloads.

use super::{PageRequest, require_max_len, require_non_empty, require_non_negative, require_positive};
use crate::domain::{
    Activity, ActivityParticipation, ActivityStatus, ActivityType, Cents, Coupon, CouponStatus,
    CouponType, DiscountType, DomainError, OperationStatistics, ReferralRecord, ReferralStatus,
    ReferralTrigger, UserCoupon,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Longest range a statistics query may cover.
pub const MAX_STAT_RANGE_DAYS: i64 = 366;

/// `discount_value` of a percent coupon is in hundredths of a percent; 10000 is 100%.
pub const FULL_PERCENT: Cents = 10_000;

// ============ Activities ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityCreate {
    pub title: String,
    pub activity_type: ActivityType,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub rules: Option<serde_json::Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub target_users: Option<serde_json::Value>,
    #[serde(default)]
    pub max_participants: Option<i64>,
    #[serde(default)]
    pub budget: Option<Cents>,
}

fn validate_title(title: &str) -> Result<(), DomainError> {
    require_non_empty("title", title)?;
    require_max_len("title", title, 200)
}

fn validate_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), DomainError> {
    if end <= start {
        return Err(DomainError::Validation(
            "end_time must be later than start_time".into(),
        ));
    }
    Ok(())
}

impl ActivityCreate {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_title(&self.title)?;
        validate_window(self.start_time, self.end_time)?;
        if let Some(max) = self.max_participants {
            require_positive("max_participants", max)?;
        }
        if let Some(budget) = self.budget {
            require_non_negative("budget", budget)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityUpdate {
    pub title: Option<String>,
    pub status: Option<ActivityStatus>,
    pub description: Option<String>,
    pub rules: Option<serde_json::Value>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub target_users: Option<serde_json::Value>,
    pub max_participants: Option<i64>,
    pub budget: Option<Cents>,
}

impl ActivityUpdate {
    /// Field-level checks only; status transitions and the merged window are checked
    /// against the stored activity by `apply`.
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(max) = self.max_participants {
            require_positive("max_participants", max)?;
        }
        if let Some(budget) = self.budget {
            require_non_negative("budget", budget)?;
        }
        Ok(())
    }

    pub fn apply(self, activity: &mut Activity) -> Result<(), DomainError> {
        if let Some(next) = self.status {
            if !activity.status.can_transition_to(next) {
                return Err(DomainError::InvalidState(format!(
                    "activity cannot move from {} to {}",
                    activity.status, next
                )));
            }
            activity.status = next;
        }
        let start = self.start_time.unwrap_or(activity.start_time);
        let end = self.end_time.unwrap_or(activity.end_time);
        validate_window(start, end)?;
        activity.start_time = start;
        activity.end_time = end;
        if let Some(v) = self.title {
            activity.title = v;
        }
        if let Some(v) = self.description {
            activity.description = Some(v);
        }
        if let Some(v) = self.rules {
            activity.rules = Some(v);
        }
        if let Some(v) = self.target_users {
            activity.target_users = Some(v);
        }
        if let Some(v) = self.max_participants {
            activity.max_participants = Some(v);
        }
        if let Some(v) = self.budget {
            activity.budget = Some(v);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityResponse {
    pub id: i64,
    pub title: String,
    pub activity_type: ActivityType,
    pub status: ActivityStatus,
    pub description: Option<String>,
    pub rules: Option<serde_json::Value>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub target_users: Option<serde_json::Value>,
    pub max_participants: Option<i64>,
    pub current_participants: i64,
    pub budget: Option<Cents>,
    pub cost: Cents,
    pub created_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Activity> for ActivityResponse {
    fn from(a: &Activity) -> Self {
        Self {
            id: a.id,
            title: a.title.clone(),
            activity_type: a.activity_type,
            status: a.status,
            description: a.description.clone(),
            rules: a.rules.clone(),
            start_time: a.start_time,
            end_time: a.end_time,
            target_users: a.target_users.clone(),
            max_participants: a.max_participants,
            current_participants: a.current_participants,
            budget: a.budget,
            cost: a.cost,
            created_by: a.created_by,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityParticipate {
    pub activity_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityParticipationResponse {
    pub id: i64,
    pub activity_id: i64,
    pub user_id: i64,
    pub reward_type: Option<String>,
    pub reward_amount: Option<i64>,
    pub reward_data: Option<serde_json::Value>,
    pub participated_at: DateTime<Utc>,
}

impl From<&ActivityParticipation> for ActivityParticipationResponse {
    fn from(p: &ActivityParticipation) -> Self {
        Self {
            id: p.id,
            activity_id: p.activity_id,
            user_id: p.user_id,
            reward_type: p.reward_type.clone(),
            reward_amount: p.reward_amount,
            reward_data: p.reward_data.clone(),
            participated_at: p.participated_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActivityQuery {
    #[serde(default)]
    pub status: Option<ActivityStatus>,
    #[serde(default)]
    pub activity_type: Option<ActivityType>,
    #[serde(flatten)]
    pub page: PageRequest,
}

// ============ Coupons ============

fn validate_coupon_code(code: &str) -> Result<(), DomainError> {
    let len = code.chars().count();
    if !(3..=50).contains(&len) {
        return Err(DomainError::Validation(
            "code must be between 3 and 50 characters".into(),
        ));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(DomainError::Validation(
            "code may only contain letters, digits, '_' and '-'".into(),
        ));
    }
    Ok(())
}

fn validate_discount(discount_type: DiscountType, value: Cents) -> Result<(), DomainError> {
    match discount_type {
        DiscountType::Percent if value <= 0 || value > FULL_PERCENT => Err(
            DomainError::Validation("percent discount must be in (0, 100]".into()),
        ),
        DiscountType::Fixed if value <= 0 => Err(DomainError::Validation(
            "fixed discount must be greater than 0".into(),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponCreate {
    pub code: String,
    pub name: String,
    pub coupon_type: CouponType,
    pub discount_type: DiscountType,
    /// Cents for `fixed`, hundredths of a percent for `percent`.
    pub discount_value: Cents,
    #[serde(default)]
    pub min_amount: Option<Cents>,
    #[serde(default)]
    pub max_discount: Option<Cents>,
    #[serde(default)]
    pub total_quantity: Option<i64>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub activity_id: Option<i64>,
}

impl CouponCreate {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_coupon_code(&self.code)?;
        require_non_empty("name", &self.name)?;
        require_max_len("name", &self.name, 100)?;
        validate_discount(self.discount_type, self.discount_value)?;
        if let Some(min) = self.min_amount {
            require_non_negative("min_amount", min)?;
        }
        if let Some(max) = self.max_discount {
            require_positive("max_discount", max)?;
        }
        if let Some(qty) = self.total_quantity {
            require_positive("total_quantity", qty)?;
        }
        if self.valid_until <= self.valid_from {
            return Err(DomainError::Validation(
                "valid_until must be later than valid_from".into(),
            ));
        }
        if let Some(d) = &self.description {
            require_max_len("description", d, 255)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CouponUpdate {
    pub name: Option<String>,
    pub discount_value: Option<Cents>,
    pub min_amount: Option<Cents>,
    pub max_discount: Option<Cents>,
    pub total_quantity: Option<i64>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

impl CouponUpdate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
            require_max_len("name", name, 100)?;
        }
        if let Some(qty) = self.total_quantity {
            require_positive("total_quantity", qty)?;
        }
        if let Some(d) = &self.description {
            require_max_len("description", d, 255)?;
        }
        Ok(())
    }

    /// Merges into `coupon`, re-checking the discount and window against the result.
    pub fn apply(self, coupon: &mut Coupon) -> Result<(), DomainError> {
        let value = self.discount_value.unwrap_or(coupon.discount_value);
        validate_discount(coupon.discount_type, value)?;
        let from = self.valid_from.unwrap_or(coupon.valid_from);
        let until = self.valid_until.unwrap_or(coupon.valid_until);
        if until <= from {
            return Err(DomainError::Validation(
                "valid_until must be later than valid_from".into(),
            ));
        }
        coupon.discount_value = value;
        coupon.valid_from = from;
        coupon.valid_until = until;
        if let Some(v) = self.name {
            coupon.name = v;
        }
        if let Some(v) = self.min_amount {
            coupon.min_amount = Some(v);
        }
        if let Some(v) = self.max_discount {
            coupon.max_discount = Some(v);
        }
        if let Some(v) = self.total_quantity {
            coupon.total_quantity = Some(v);
        }
        if let Some(v) = self.description {
            coupon.description = Some(v);
        }
        if let Some(v) = self.is_active {
            coupon.is_active = v;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponResponse {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub coupon_type: CouponType,
    pub discount_type: DiscountType,
    pub discount_value: Cents,
    pub min_amount: Option<Cents>,
    pub max_discount: Option<Cents>,
    pub total_quantity: Option<i64>,
    pub used_quantity: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub description: Option<String>,
    pub activity_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Coupon> for CouponResponse {
    fn from(c: &Coupon) -> Self {
        Self {
            id: c.id,
            code: c.code.clone(),
            name: c.name.clone(),
            coupon_type: c.coupon_type,
            discount_type: c.discount_type,
            discount_value: c.discount_value,
            min_amount: c.min_amount,
            max_discount: c.max_discount,
            total_quantity: c.total_quantity,
            used_quantity: c.used_quantity,
            valid_from: c.valid_from,
            valid_until: c.valid_until,
            description: c.description.clone(),
            activity_id: c.activity_id,
            is_active: c.is_active,
            created_at: c.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CouponQuery {
    #[serde(default)]
    pub coupon_type: Option<CouponType>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub page: PageRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponReceive {
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponUse {
    pub code: String,
    pub order_id: i64,
    /// `recharge` or `membership`.
    pub order_type: String,
    pub amount: Cents,
}

impl CouponUse {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_non_empty("code", &self.code)?;
        if self.order_type != "recharge" && self.order_type != "membership" {
            return Err(DomainError::Validation(
                "order_type must be recharge or membership".into(),
            ));
        }
        require_positive("amount", self.amount)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCouponResponse {
    pub id: i64,
    pub user_id: i64,
    pub coupon_id: i64,
    pub status: CouponStatus,
    pub used_at: Option<DateTime<Utc>>,
    pub order_id: Option<i64>,
    pub received_at: DateTime<Utc>,
    pub coupon: CouponResponse,
}

impl UserCouponResponse {
    pub fn new(held: &UserCoupon, coupon: &Coupon) -> Self {
        Self {
            id: held.id,
            user_id: held.user_id,
            coupon_id: held.coupon_id,
            status: held.status,
            used_at: held.used_at,
            order_id: held.order_id,
            received_at: held.received_at,
            coupon: coupon.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponCalculateRequest {
    pub code: String,
    pub amount: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponCalculateResponse {
    pub original_amount: Cents,
    pub discount_amount: Cents,
    pub final_amount: Cents,
    pub coupon_id: i64,
    pub coupon_code: String,
    pub coupon_name: String,
}

// ============ Referrals ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralCodeResponse {
    pub referral_code: String,
    pub referral_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralRecordResponse {
    pub id: i64,
    pub referrer_id: i64,
    pub referee_id: i64,
    pub referral_code: Option<String>,
    pub reward_type: Option<String>,
    pub reward_amount: Option<Cents>,
    pub reward_credits: Option<i64>,
    pub status: ReferralStatus,
    pub trigger_event: Option<ReferralTrigger>,
    pub trigger_amount: Option<Cents>,
    pub settled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&ReferralRecord> for ReferralRecordResponse {
    fn from(r: &ReferralRecord) -> Self {
        Self {
            id: r.id,
            referrer_id: r.referrer_id,
            referee_id: r.referee_id,
            referral_code: r.referral_code.clone(),
            reward_type: r.reward_type.clone(),
            reward_amount: r.reward_amount,
            reward_credits: r.reward_credits,
            status: r.status,
            trigger_event: r.trigger_event,
            trigger_amount: r.trigger_amount,
            settled_at: r.settled_at,
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferralStatisticsResponse {
    pub total_referrals: i64,
    pub settled_referrals: i64,
    pub pending_referrals: i64,
    pub total_reward_credits: i64,
}

// ============ Statistics ============

str_enum! {
    pub enum StatType {
        Daily => "daily",
        Weekly => "weekly",
        Monthly => "monthly",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticsQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub stat_type: StatType,
}

impl StatisticsQuery {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.end_date < self.start_date {
            return Err(DomainError::Validation(
                "end_date must not be before start_date".into(),
            ));
        }
        let span = (self.end_date - self.start_date).num_days() + 1;
        if span > MAX_STAT_RANGE_DAYS {
            return Err(DomainError::Validation(format!(
                "range may cover at most {} days",
                MAX_STAT_RANGE_DAYS
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatisticsResponse {
    pub stat_date: NaiveDate,
    pub stat_type: StatType,
    pub figures: OperationStatistics,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub new_users: i64,
    pub revenue: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopReferrer {
    pub user_id: i64,
    pub username: String,
    pub settled_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardStatisticsResponse {
    pub today: OperationStatistics,
    pub total_users: i64,
    pub total_members: i64,
    pub total_revenue: Cents,
    pub trend: Vec<TrendPoint>,
    pub top_referrers: Vec<TopReferrer>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon_create() -> CouponCreate {
        let now = Utc::now();
        CouponCreate {
            code: "NEW-USER_10".into(),
            name: "Welcome".into(),
            coupon_type: CouponType::RechargeDiscount,
            discount_type: DiscountType::Percent,
            discount_value: 1000,
            min_amount: None,
            max_discount: None,
            total_quantity: Some(100),
            valid_from: now,
            valid_until: now + Duration::days(30),
            description: None,
            activity_id: None,
        }
    }

    #[test]
    fn test_coupon_create_rules() {
        assert!(coupon_create().validate().is_ok());
        assert!(CouponCreate { code: "AB".into(), ..coupon_create() }.validate().is_err());
        assert!(CouponCreate { code: "SPA CE".into(), ..coupon_create() }.validate().is_err());
        assert!(CouponCreate { discount_value: 10_001, ..coupon_create() }.validate().is_err());
        assert!(CouponCreate { discount_value: 10_000, ..coupon_create() }.validate().is_ok());
        assert!(
            CouponCreate {
                discount_type: DiscountType::Fixed,
                discount_value: 0,
                ..coupon_create()
            }
            .validate()
            .is_err()
        );
        let c = coupon_create();
        assert!(CouponCreate { valid_until: c.valid_from, ..c }.validate().is_err());
    }

    #[test]
    fn test_activity_window_and_title() {
        let now = Utc::now();
        let req = ActivityCreate {
            title: "Spring gift".into(),
            activity_type: ActivityType::CreditGift,
            description: None,
            rules: None,
            start_time: now,
            end_time: now + Duration::days(7),
            target_users: None,
            max_participants: Some(10),
            budget: Some(0),
        };
        assert!(req.validate().is_ok());
        assert!(ActivityCreate { end_time: now, ..req.clone() }.validate().is_err());
        assert!(ActivityCreate { title: "t".repeat(201), ..req.clone() }.validate().is_err());
        assert!(ActivityCreate { max_participants: Some(0), ..req }.validate().is_err());
    }

    #[test]
    fn test_activity_update_rejects_bad_transition() {
        let now = Utc::now();
        let mut activity = Activity {
            id: 1,
            title: "x".into(),
            activity_type: ActivityType::Coupon,
            status: ActivityStatus::Ended,
            description: None,
            rules: None,
            start_time: now,
            end_time: now + Duration::days(1),
            target_users: None,
            max_participants: None,
            current_participants: 0,
            budget: None,
            cost: 0,
            created_by: None,
            created_at: now,
            updated_at: now,
        };
        let update = ActivityUpdate {
            status: Some(ActivityStatus::Active),
            ..Default::default()
        };
        assert!(matches!(update.apply(&mut activity), Err(DomainError::InvalidState(_))));

        let shrink = ActivityUpdate {
            end_time: Some(now - Duration::hours(1)),
            ..Default::default()
        };
        assert!(matches!(shrink.apply(&mut activity), Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_coupon_use_order_type() {
        let mut req = CouponUse {
            code: "X1Y".into(),
            order_id: 1,
            order_type: "membership".into(),
            amount: 100,
        };
        assert!(req.validate().is_ok());
        req.order_type = "creation".into();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_statistics_query_range() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let q = StatisticsQuery {
            start_date: d("2024-01-01"),
            end_date: d("2024-12-31"),
            stat_type: StatType::Monthly,
        };
        assert!(q.validate().is_ok());
        let too_long = StatisticsQuery { end_date: d("2025-01-01"), ..q.clone() };
        assert!(too_long.validate().is_err());
        let reversed = StatisticsQuery {
            start_date: d("2024-02-01"),
            end_date: d("2024-01-01"),
            stat_type: StatType::Daily,
        };
        assert!(reversed.validate().is_err());
        assert!(serde_json::from_str::<StatType>("\"hourly\"").is_err());
    }

    #[test]
    fn test_activity_query_flattens_paging() {
        let q: ActivityQuery = serde_json::from_str(r#"{"status":"active","limit":5}"#).unwrap();
        assert_eq!(q.status, Some(ActivityStatus::Active));
        assert_eq!(q.page, PageRequest::new(0, 5));
    }
}
