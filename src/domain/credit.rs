//! Credit ledger and membership entities.
//!
//! Balances are integer credits; money fields are cents.

use crate::domain::money::Cents;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

str_enum! {
    /// Kind of ledger movement.
    pub enum TransactionType {
        Recharge => "recharge",
        Consume => "consume",
        Refund => "refund",
        Reward => "reward",
        Expire => "expire",
    }
}

str_enum! {
    pub enum MembershipType {
        Monthly => "monthly",
        Quarterly => "quarterly",
        Yearly => "yearly",
    }
}

str_enum! {
    pub enum PaymentStatus {
        Pending => "pending",
        Paid => "paid",
        Failed => "failed",
        Refunded => "refunded",
        Cancelled => "cancelled",
    }
}

str_enum! {
    pub enum UserRole {
        User => "user",
        Admin => "admin",
    }
}

/// The part of a user record that the ledger, membership and referral flows touch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub id: i64,
    pub username: String,
    pub role: UserRole,
    pub credits: i64,
    /// Stored flag; may be stale until the next balance read clears it.
    pub is_member: bool,
    pub member_expired_at: Option<DateTime<Utc>>,
    pub referral_code: Option<String>,
    pub referred_by: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// Membership is active only while the expiry lies in the future.
    pub fn is_active_member(&self, now: DateTime<Utc>) -> bool {
        self.is_member && self.member_expired_at.is_some_and(|at| at > now)
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// One immutable ledger row. `amount` is signed: positive adds, negative removes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: i64,
    pub user_id: i64,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub balance_before: i64,
    pub balance_after: i64,
    pub description: Option<String>,
    pub related_id: Option<i64>,
    pub related_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A requested balance movement, applied atomically by the ledger store.
#[derive(Debug, Clone)]
pub struct CreditChange {
    pub user_id: i64,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub description: String,
    pub related_id: Option<i64>,
    pub related_type: Option<String>,
    /// For debits: shrink the amount to the available balance instead of failing.
    pub clamp_to_balance: bool,
}

impl CreditChange {
    pub fn credit(user_id: i64, transaction_type: TransactionType, amount: i64, description: impl Into<String>) -> Self {
        Self {
            user_id,
            transaction_type,
            amount,
            description: description.into(),
            related_id: None,
            related_type: None,
            clamp_to_balance: false,
        }
    }

    pub fn debit(user_id: i64, transaction_type: TransactionType, amount: i64, description: impl Into<String>) -> Self {
        Self::credit(user_id, transaction_type, -amount, description)
    }

    pub fn related(mut self, related_id: Option<i64>, related_type: Option<&str>) -> Self {
        self.related_id = related_id;
        self.related_type = related_type.map(str::to_string);
        self
    }

    pub fn clamped(mut self) -> Self {
        self.clamp_to_balance = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechargeOrder {
    pub id: i64,
    pub order_no: String,
    pub user_id: i64,
    pub amount: Cents,
    pub credits: i64,
    pub bonus_credits: i64,
    pub payment_method: Option<String>,
    pub payment_status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    pub coupon_code: Option<String>,
    pub discount_amount: Cents,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RechargeOrder {
    pub fn total_credits(&self) -> i64 {
        self.credits + self.bonus_credits
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipOrder {
    pub id: i64,
    pub order_no: String,
    pub user_id: i64,
    pub membership_type: MembershipType,
    pub amount: Cents,
    pub original_amount: Option<Cents>,
    pub discount_amount: Cents,
    /// Snapshot of the price's duration at order time.
    pub duration_days: i64,
    pub payment_method: Option<String>,
    pub payment_status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub transaction_id: Option<String>,
    pub coupon_code: Option<String>,
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Credit top-up package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditPrice {
    pub id: i64,
    pub name: String,
    pub amount: Cents,
    pub credits: i64,
    pub bonus_credits: i64,
    pub is_active: bool,
    pub sort_order: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Membership package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipPrice {
    pub id: i64,
    pub name: String,
    pub membership_type: MembershipType,
    pub amount: Cents,
    pub original_amount: Option<Cents>,
    pub duration_days: i64,
    pub is_active: bool,
    pub sort_order: i64,
    pub description: Option<String>,
    pub features: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Order number: prefix, UTC timestamp to the second, 8 upper-case hex chars.
pub fn generate_order_no(prefix: char, now: DateTime<Utc>) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("{}{}{}", prefix, now.format("%Y%m%d%H%M%S"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn user(is_member: bool, expiry: Option<DateTime<Utc>>) -> UserAccount {
        UserAccount {
            id: 1,
            username: "alice".into(),
            role: UserRole::User,
            credits: 0,
            is_member,
            member_expired_at: expiry,
            referral_code: None,
            referred_by: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_active_member_requires_future_expiry() {
        let now = Utc::now();
        assert!(user(true, Some(now + Duration::days(1))).is_active_member(now));
        assert!(!user(true, Some(now - Duration::seconds(1))).is_active_member(now));
        assert!(!user(true, Some(now)).is_active_member(now));
        assert!(!user(false, Some(now + Duration::days(1))).is_active_member(now));
        assert!(!user(true, None).is_active_member(now));
    }

    #[test]
    fn test_order_no_format() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 8, 5, 1).unwrap();
        let no = generate_order_no('R', now);
        assert_eq!(no.len(), 1 + 14 + 8);
        assert!(no.starts_with("R20240309080501"));
        assert!(no[15..].chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }

    #[test]
    fn test_enum_round_trip_strings() {
        assert_eq!("quarterly".parse::<MembershipType>().unwrap(), MembershipType::Quarterly);
        assert_eq!(TransactionType::Expire.as_str(), "expire");
        assert!("weekly".parse::<MembershipType>().is_err());
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
    }

    #[test]
    fn test_credit_change_builders() {
        let c = CreditChange::debit(7, TransactionType::Consume, 30, "image")
            .related(Some(9), Some("creation"));
        assert_eq!(c.amount, -30);
        assert_eq!(c.related_type.as_deref(), Some("creation"));
        assert!(!c.clamp_to_balance);
        assert!(c.clamped().clamp_to_balance);
    }
}
