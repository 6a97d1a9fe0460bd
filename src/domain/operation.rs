//! Growth operations: activities, coupons, referrals and daily statistics.

use crate::domain::money::{Cents, percent_of};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

str_enum! {
    pub enum ActivityType {
        CreditGift => "credit_gift",
        RechargeBonus => "recharge_bonus",
        Coupon => "coupon",
        Referral => "referral",
    }
}

str_enum! {
    pub enum ActivityStatus {
        Draft => "draft",
        Active => "active",
        Paused => "paused",
        Ended => "ended",
    }
}

impl ActivityStatus {
    /// draft -> active, active <-> paused, anything -> ended. Same-state updates are no-ops.
    pub fn can_transition_to(self, next: ActivityStatus) -> bool {
        use ActivityStatus::*;
        matches!(
            (self, next),
            (Draft, Active) | (Active, Paused) | (Paused, Active) | (_, Ended)
        ) || self == next
    }
}

str_enum! {
    pub enum CouponType {
        RechargeDiscount => "recharge_discount",
        RechargeBonus => "recharge_bonus",
        MembershipDiscount => "membership_discount",
    }
}

impl CouponType {
    /// Order kind (`recharge` / `membership`) this coupon applies to.
    pub fn order_type(self) -> &'static str {
        match self {
            CouponType::RechargeDiscount | CouponType::RechargeBonus => "recharge",
            CouponType::MembershipDiscount => "membership",
        }
    }
}

str_enum! {
    pub enum DiscountType {
        Percent => "percent",
        Fixed => "fixed",
    }
}

str_enum! {
    pub enum CouponStatus {
        Unused => "unused",
        Used => "used",
        Expired => "expired",
    }
}

str_enum! {
    pub enum ReferralStatus {
        Pending => "pending",
        Settled => "settled",
        Cancelled => "cancelled",
    }
}

str_enum! {
    /// Event on the referee's side that releases the referrer's reward.
    pub enum ReferralTrigger {
        Register => "register",
        FirstRecharge => "first_recharge",
        Membership => "membership",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
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

impl Activity {
    pub fn is_running(&self, now: DateTime<Utc>) -> bool {
        self.status == ActivityStatus::Active && self.start_time <= now && now <= self.end_time
    }

    pub fn is_full(&self) -> bool {
        self.max_participants
            .is_some_and(|max| self.current_participants >= max)
    }

    /// Credits granted by a `credit_gift` activity (`rules.credits`).
    pub fn rule_credits(&self) -> i64 {
        self.rules
            .as_ref()
            .and_then(|r| r.get("credits"))
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(0)
    }

    /// Coupon handed out by a `coupon` activity (`rules.coupon_code`).
    pub fn rule_coupon_code(&self) -> Option<&str> {
        self.rules
            .as_ref()
            .and_then(|r| r.get("coupon_code"))
            .and_then(serde_json::Value::as_str)
    }
}

/// What a participation hands out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reward {
    None,
    Credits(i64),
    Coupon { coupon_id: i64, code: String },
}

impl Reward {
    pub fn reward_type(&self) -> Option<&'static str> {
        match self {
            Reward::None => None,
            Reward::Credits(_) => Some("credits"),
            Reward::Coupon { .. } => Some("coupon"),
        }
    }

    /// Cost booked against the activity budget. One credit is valued at one cent.
    pub fn cost(&self) -> Cents {
        match self {
            Reward::Credits(n) => *n,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityParticipation {
    pub id: i64,
    pub activity_id: i64,
    pub user_id: i64,
    pub reward_type: Option<String>,
    pub reward_amount: Option<i64>,
    pub reward_data: Option<serde_json::Value>,
    pub participated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub coupon_type: CouponType,
    pub discount_type: DiscountType,
    /// Cents for `fixed`; hundredths of a percent for `percent` (1500 = 15%).
    pub discount_value: Cents,
    pub min_amount: Option<Cents>,
    pub max_discount: Option<Cents>,
    /// Issuance cap; `None` means unlimited.
    pub total_quantity: Option<i64>,
    pub used_quantity: i64,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub description: Option<String>,
    pub activity_id: Option<i64>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.valid_from <= now && now <= self.valid_until
    }

    /// Discount for an order of `amount` cents. Caller checks `min_amount` first.
    pub fn discount_for(&self, amount: Cents) -> Cents {
        let raw = match self.discount_type {
            DiscountType::Percent => percent_of(amount, self.discount_value),
            DiscountType::Fixed => self.discount_value,
        };
        let capped = match self.max_discount {
            Some(max) => raw.min(max),
            None => raw,
        };
        capped.clamp(0, amount)
    }

    /// Whole credits added by a `recharge_bonus` coupon (integer part of the value).
    pub fn bonus_credits(&self) -> i64 {
        self.discount_value / 100
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCoupon {
    pub id: i64,
    pub user_id: i64,
    pub coupon_id: i64,
    pub status: CouponStatus,
    pub used_at: Option<DateTime<Utc>>,
    pub order_id: Option<i64>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralRecord {
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
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Aggregated figures for one bucket (day, ISO week or month).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationStatistics {
    pub stat_date: Option<NaiveDate>,
    pub stat_type: String,
    pub new_users: i64,
    pub active_users: i64,
    pub paying_users: i64,
    pub recharge_amount: Cents,
    pub recharge_count: i64,
    pub membership_amount: Cents,
    pub membership_count: i64,
    pub credits_consumed: i64,
    pub credits_recharged: i64,
    pub credits_rewarded: i64,
    pub referral_count: i64,
    pub referral_reward: i64,
    pub activity_participants: i64,
    pub activity_cost: Cents,
}

impl OperationStatistics {
    /// Adds another bucket's counters. `active_users` and `paying_users` are summed,
    /// so for multi-day buckets they count user-days.
    pub fn accumulate(&mut self, other: &OperationStatistics) {
        self.new_users += other.new_users;
        self.active_users += other.active_users;
        self.paying_users += other.paying_users;
        self.recharge_amount += other.recharge_amount;
        self.recharge_count += other.recharge_count;
        self.membership_amount += other.membership_amount;
        self.membership_count += other.membership_count;
        self.credits_consumed += other.credits_consumed;
        self.credits_recharged += other.credits_recharged;
        self.credits_rewarded += other.credits_rewarded;
        self.referral_count += other.referral_count;
        self.referral_reward += other.referral_reward;
        self.activity_participants += other.activity_participants;
        self.activity_cost += other.activity_cost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn coupon(discount_type: DiscountType, value: Cents, max: Option<Cents>) -> Coupon {
        let now = Utc::now();
        Coupon {
            id: 1,
            code: "SPRING".into(),
            name: "Spring".into(),
            coupon_type: CouponType::RechargeDiscount,
            discount_type,
            discount_value: value,
            min_amount: None,
            max_discount: max,
            total_quantity: None,
            used_quantity: 0,
            valid_from: now - Duration::days(1),
            valid_until: now + Duration::days(1),
            description: None,
            activity_id: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_percent_discount_capped_by_max() {
        let c = coupon(DiscountType::Percent, 2000, Some(500));
        // 20% of 100.00 is 20.00, capped at 5.00
        assert_eq!(c.discount_for(10_000), 500);
        // 20% of 10.00 is 2.00, under the cap
        assert_eq!(c.discount_for(1_000), 200);
    }

    #[test]
    fn test_fixed_discount_never_exceeds_amount() {
        let c = coupon(DiscountType::Fixed, 3000, None);
        assert_eq!(c.discount_for(10_000), 3000);
        assert_eq!(c.discount_for(1_000), 1_000);
    }

    #[test]
    fn test_coupon_validity_window() {
        let mut c = coupon(DiscountType::Fixed, 100, None);
        let now = Utc::now();
        assert!(c.is_valid_at(now));
        assert!(!c.is_valid_at(now + Duration::days(2)));
        c.is_active = false;
        assert!(!c.is_valid_at(now));
    }

    #[test]
    fn test_activity_status_transitions() {
        use ActivityStatus::*;
        assert!(Draft.can_transition_to(Active));
        assert!(Active.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Active));
        assert!(Draft.can_transition_to(Ended));
        assert!(!Ended.can_transition_to(Active));
        assert!(!Draft.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Paused));
    }

    #[test]
    fn test_reward_cost_and_type() {
        assert_eq!(Reward::Credits(250).cost(), 250);
        assert_eq!(Reward::Credits(250).reward_type(), Some("credits"));
        assert_eq!(Reward::None.reward_type(), None);
        let c = Reward::Coupon {
            coupon_id: 3,
            code: "X".into(),
        };
        assert_eq!(c.cost(), 0);
    }

    #[test]
    fn test_statistics_accumulate() {
        let mut a = OperationStatistics {
            new_users: 2,
            recharge_amount: 1000,
            ..Default::default()
        };
        let b = OperationStatistics {
            new_users: 3,
            recharge_amount: 550,
            credits_consumed: 40,
            ..Default::default()
        };
        a.accumulate(&b);
        assert_eq!(a.new_users, 5);
        assert_eq!(a.recharge_amount, 1550);
        assert_eq!(a.credits_consumed, 40);
    }
}
