//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters. Every method that touches more than one row is atomic.

use crate::domain::{
    Activity, ActivityParticipation, ActivityStatus, ActivityType, Cents, Coupon, CouponStatus,
    CouponType, CreditChange, CreditPrice, CreditTransaction, DomainError, MembershipOrder,
    MembershipPrice, MembershipType, OAuthAccount, OAuthCredentials, OAuthUsageLog,
    OperationStatistics, PaymentStatus, PlatformConfig, PlatformRequirements, RechargeOrder,
    ReferralRecord, ReferralTrigger, Reward, TransactionType, UserAccount, UserCoupon, UserRole,
};
use crate::schemas::PageRequest;
use crate::schemas::credit::{CreditPriceCreate, MembershipPriceCreate};
use crate::schemas::oauth::{OAuthUsageLogCreate, PlatformConfigCreate, PlatformUsage};
use crate::schemas::operation::{CouponCreate, ReferralStatisticsResponse, TopReferrer};
use chrono::{DateTime, Utc};

/// Users as seen by the ledger, membership and referral flows.
#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `Conflict` when the username is taken.
    async fn create_user(
        &self,
        username: &str,
        role: UserRole,
        referred_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<UserAccount, DomainError>;

    async fn get_user(&self, user_id: i64) -> Result<Option<UserAccount>, DomainError>;

    async fn find_user_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<UserAccount>, DomainError>;

    /// Sets the code if the user has none. Returns false when another user already owns it.
    async fn assign_referral_code(&self, user_id: i64, code: &str) -> Result<bool, DomainError>;

    /// Clears the membership flag and expiry, unless the stored expiry is later than `now`.
    /// Returns false when nothing was cleared.
    async fn clear_membership(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, DomainError>;
}

/// Append-only credit ledger.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    /// Applies `change` to the user's balance and appends the ledger row in one transaction.
    /// Debits that exceed the balance fail with `InsufficientCredits` unless clamped.
    async fn apply_credit_change(
        &self,
        change: &CreditChange,
        now: DateTime<Utc>,
    ) -> Result<CreditTransaction, DomainError>;

    /// Newest first, with the unpaged total.
    async fn list_transactions(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<CreditTransaction>, i64), DomainError>;

    /// The whole ledger of one user, oldest first.
    async fn ledger(&self, user_id: i64) -> Result<Vec<CreditTransaction>, DomainError>;

    /// Sum of absolute amounts per transaction type.
    async fn credit_totals(&self, user_id: i64) -> Result<Vec<(TransactionType, i64)>, DomainError>;
}

/// Paid membership purchases of one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipPurchases {
    pub count: i64,
    pub amount: Cents,
    pub last_paid_at: Option<DateTime<Utc>>,
    pub last_type: Option<MembershipType>,
}

#[async_trait::async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a pending order. `reserved_coupon` (a user coupon id) is marked used against it.
    async fn insert_recharge_order(
        &self,
        order: &RechargeOrder,
        reserved_coupon: Option<i64>,
    ) -> Result<RechargeOrder, DomainError>;

    async fn insert_membership_order(
        &self,
        order: &MembershipOrder,
        reserved_coupon: Option<i64>,
    ) -> Result<MembershipOrder, DomainError>;

    async fn find_recharge_order(&self, order_no: &str)
    -> Result<Option<RechargeOrder>, DomainError>;

    async fn find_membership_order(
        &self,
        order_no: &str,
    ) -> Result<Option<MembershipOrder>, DomainError>;

    async fn list_recharge_orders(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<RechargeOrder>, i64), DomainError>;

    async fn list_membership_orders(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<MembershipOrder>, i64), DomainError>;

    /// Marks a pending order paid and credits the user in one transaction.
    /// Returns `None` when the order was already paid.
    async fn pay_recharge_order(
        &self,
        order_no: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(RechargeOrder, CreditTransaction)>, DomainError>;

    /// Marks a pending order paid and extends the user's membership in one transaction.
    /// Returns `None` when the order was already paid.
    async fn pay_membership_order(
        &self,
        order_no: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MembershipOrder>, DomainError>;

    /// Moves a pending order (either kind, by prefix) to `status` and releases its coupon.
    /// Returns false when the order is not pending.
    async fn close_order(
        &self,
        order_no: &str,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, DomainError>;

    /// Sum and count of paid recharge orders.
    async fn paid_recharge_totals(&self, user_id: i64) -> Result<(Cents, i64), DomainError>;

    async fn membership_purchases(&self, user_id: i64) -> Result<MembershipPurchases, DomainError>;
}

#[async_trait::async_trait]
pub trait PriceStore: Send + Sync {
    /// Ordered by sort_order, then id.
    async fn list_credit_prices(&self, active_only: bool) -> Result<Vec<CreditPrice>, DomainError>;

    async fn get_credit_price(&self, id: i64) -> Result<Option<CreditPrice>, DomainError>;

    async fn insert_credit_price(
        &self,
        req: &CreditPriceCreate,
        now: DateTime<Utc>,
    ) -> Result<CreditPrice, DomainError>;

    async fn save_credit_price(&self, price: &CreditPrice) -> Result<(), DomainError>;

    async fn list_membership_prices(
        &self,
        active_only: bool,
    ) -> Result<Vec<MembershipPrice>, DomainError>;

    async fn get_membership_price(&self, id: i64) -> Result<Option<MembershipPrice>, DomainError>;

    async fn insert_membership_price(
        &self,
        req: &MembershipPriceCreate,
        now: DateTime<Utc>,
    ) -> Result<MembershipPrice, DomainError>;

    async fn save_membership_price(&self, price: &MembershipPrice) -> Result<(), DomainError>;
}

#[async_trait::async_trait]
pub trait ActivityStore: Send + Sync {
    async fn insert_activity(&self, activity: &Activity) -> Result<Activity, DomainError>;

    async fn get_activity(&self, id: i64) -> Result<Option<Activity>, DomainError>;

    /// Persists editable fields; participant count and cost are left alone.
    async fn save_activity(&self, activity: &Activity) -> Result<(), DomainError>;

    async fn list_activities(
        &self,
        status: Option<ActivityStatus>,
        activity_type: Option<ActivityType>,
        page: PageRequest,
    ) -> Result<(Vec<Activity>, i64), DomainError>;

    /// Deletes an activity that nobody joined. Returns false when it does not exist.
    async fn delete_activity(&self, id: i64) -> Result<bool, DomainError>;

    /// Records the participation, bumps the counters and hands out `reward` atomically.
    /// Capacity, budget and duplicate checks are re-run inside the transaction.
    async fn record_participation(
        &self,
        activity_id: i64,
        user_id: i64,
        reward: &Reward,
        now: DateTime<Utc>,
    ) -> Result<ActivityParticipation, DomainError>;

    async fn list_participations(
        &self,
        activity_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<ActivityParticipation>, i64), DomainError>;
}

#[async_trait::async_trait]
pub trait CouponStore: Send + Sync {
    /// Fails with `Conflict` on a duplicate code.
    async fn insert_coupon(&self, req: &CouponCreate, now: DateTime<Utc>)
    -> Result<Coupon, DomainError>;

    async fn get_coupon(&self, id: i64) -> Result<Option<Coupon>, DomainError>;

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, DomainError>;

    async fn save_coupon(&self, coupon: &Coupon) -> Result<(), DomainError>;

    async fn list_coupons(
        &self,
        coupon_type: Option<CouponType>,
        is_active: Option<bool>,
        page: PageRequest,
    ) -> Result<(Vec<Coupon>, i64), DomainError>;

    /// Issues the coupon to the user. `Conflict` when already held or exhausted.
    async fn grant_coupon(
        &self,
        user_id: i64,
        coupon_id: i64,
        now: DateTime<Utc>,
    ) -> Result<UserCoupon, DomainError>;

    async fn find_user_coupon(
        &self,
        user_id: i64,
        coupon_id: i64,
    ) -> Result<Option<UserCoupon>, DomainError>;

    async fn list_user_coupons(
        &self,
        user_id: i64,
        status: Option<CouponStatus>,
        page: PageRequest,
    ) -> Result<(Vec<(UserCoupon, Coupon)>, i64), DomainError>;

    /// Flips the user's unused coupons past their window to `expired`. Returns how many.
    async fn expire_user_coupons(&self, user_id: i64, now: DateTime<Utc>)
    -> Result<u64, DomainError>;

    /// Marks an unused coupon used and bumps the coupon's used count.
    /// `Conflict` when it is no longer unused.
    async fn redeem_user_coupon(
        &self,
        user_coupon_id: i64,
        order_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError>;
}

#[async_trait::async_trait]
pub trait ReferralStore: Send + Sync {
    async fn insert_referral(
        &self,
        referrer_id: i64,
        referee_id: i64,
        referral_code: &str,
        trigger: ReferralTrigger,
        reward_credits: i64,
        now: DateTime<Utc>,
    ) -> Result<ReferralRecord, DomainError>;

    async fn get_referral(&self, id: i64) -> Result<Option<ReferralRecord>, DomainError>;

    async fn find_pending_referral(
        &self,
        referee_id: i64,
        trigger: ReferralTrigger,
    ) -> Result<Option<ReferralRecord>, DomainError>;

    /// Settles a pending record and credits the referrer in one transaction.
    /// Returns `None` when the record is no longer pending.
    async fn settle_referral(
        &self,
        record_id: i64,
        trigger_amount: Option<Cents>,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferralRecord>, DomainError>;

    /// Returns false when the record is not pending.
    async fn cancel_referral(&self, record_id: i64, now: DateTime<Utc>) -> Result<bool, DomainError>;

    async fn list_referrals(
        &self,
        referrer_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<ReferralRecord>, i64), DomainError>;

    async fn referral_totals(
        &self,
        referrer_id: i64,
    ) -> Result<ReferralStatisticsResponse, DomainError>;
}

/// Read-only aggregates across all tables.
#[async_trait::async_trait]
pub trait StatisticsStore: Send + Sync {
    /// Figures for the half-open window `[start, end)`.
    async fn window_figures(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<OperationStatistics, DomainError>;

    async fn count_users(&self) -> Result<i64, DomainError>;

    async fn count_active_members(&self, now: DateTime<Utc>) -> Result<i64, DomainError>;

    async fn total_paid_recharge(&self) -> Result<Cents, DomainError>;

    /// Referrers with the most settled referrals.
    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, DomainError>;
}

#[async_trait::async_trait]
pub trait OAuthStore: Send + Sync {
    /// Fails with `Conflict` on a duplicate platform id.
    async fn insert_platform(
        &self,
        req: &PlatformConfigCreate,
        now: DateTime<Utc>,
    ) -> Result<PlatformConfig, DomainError>;

    async fn get_platform(&self, platform_id: &str) -> Result<Option<PlatformConfig>, DomainError>;

    async fn save_platform(&self, platform: &PlatformConfig) -> Result<(), DomainError>;

    /// Ordered by priority, then id.
    async fn list_platforms(&self, enabled_only: bool) -> Result<Vec<PlatformConfig>, DomainError>;

    async fn insert_account(&self, account: &OAuthAccount) -> Result<OAuthAccount, DomainError>;

    async fn get_account(&self, id: i64) -> Result<Option<OAuthAccount>, DomainError>;

    async fn find_account(
        &self,
        user_id: i64,
        platform: &str,
    ) -> Result<Option<OAuthAccount>, DomainError>;

    async fn save_account(&self, account: &OAuthAccount) -> Result<(), DomainError>;

    async fn delete_account(&self, id: i64) -> Result<bool, DomainError>;

    /// Newest first.
    async fn list_accounts(
        &self,
        user_id: i64,
        platform: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<Vec<OAuthAccount>, DomainError>;

    async fn mark_account_expired(&self, id: i64, now: DateTime<Utc>) -> Result<(), DomainError>;

    /// Adds the tokens to the account's quota, expires it at the limit and writes the log row.
    async fn record_usage(
        &self,
        req: &OAuthUsageLogCreate,
        now: DateTime<Utc>,
    ) -> Result<OAuthUsageLog, DomainError>;

    /// Newest first.
    async fn list_usage_logs(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<OAuthUsageLog>, DomainError>;

    async fn usage_by_platform(
        &self,
        user_id: i64,
    ) -> Result<Vec<(String, PlatformUsage)>, DomainError>;
}

/// Symmetric encryption for stored credentials.
pub trait CredentialCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, DomainError>;

    fn decrypt(&self, token: &str) -> Result<String, DomainError>;

    fn encrypt_credentials(&self, credentials: &OAuthCredentials) -> Result<String, DomainError> {
        let json = serde_json::to_string(credentials)
            .map_err(|e| DomainError::Crypto(format!("serialize credentials: {}", e)))?;
        self.encrypt(&json)
    }

    fn decrypt_credentials(&self, token: &str) -> Result<OAuthCredentials, DomainError> {
        let json = self.decrypt(token)?;
        serde_json::from_str(&json)
            .map_err(|e| DomainError::Crypto(format!("parse credentials: {}", e)))
    }
}

/// Live check of credentials against the platform.
#[async_trait::async_trait]
pub trait CredentialProbe: Send + Sync {
    /// True when the platform still accepts the session.
    async fn probe(
        &self,
        requirements: &PlatformRequirements,
        credentials: &OAuthCredentials,
    ) -> Result<bool, DomainError>;
}
