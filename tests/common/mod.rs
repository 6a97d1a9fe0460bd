#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use creditops::adapters::crypto::FernetCipher;
use creditops::adapters::persistence::SqliteRepo;
use creditops::adapters::probe::StaticProbe;
use creditops::domain::{
    CouponType, CreditPrice, DiscountType, MembershipPrice, MembershipType, ReferralTrigger,
    UserAccount,
};
use creditops::schemas::credit::{
    CreditPriceCreate, MembershipPriceCreate, PaymentCallbackRequest,
};
use creditops::schemas::operation::CouponCreate;
use creditops::usecases::{ReferralPolicy, Services};
use std::sync::Arc;
use tempfile::TempDir;

pub struct Harness {
    pub dir: TempDir,
    pub repo: Arc<SqliteRepo>,
    pub services: Services,
}

pub async fn harness() -> Harness {
    harness_with(ReferralTrigger::FirstRecharge, true).await
}

pub async fn harness_with(trigger: ReferralTrigger, sessions_valid: bool) -> Harness {
    let dir = TempDir::new().unwrap();
    let repo = Arc::new(SqliteRepo::connect(dir.path()).await.unwrap());
    let policy = ReferralPolicy {
        base_url: "https://example.test/register".into(),
        reward_credits: 100,
        trigger,
    };
    let services = Services::wire(
        Arc::clone(&repo),
        Arc::new(FernetCipher::generate().unwrap()),
        Arc::new(StaticProbe::new(sessions_valid)),
        policy,
    );
    Harness {
        dir,
        repo,
        services,
    }
}

impl Harness {
    pub async fn user(&self, name: &str) -> UserAccount {
        self.services.referrals.register_user(name, None).await.unwrap()
    }

    /// Active credit package priced at `amount` cents.
    pub async fn credit_package(&self, amount: i64, credits: i64, bonus: i64) -> CreditPrice {
        self.services
            .prices
            .create_credit_price(&CreditPriceCreate {
                name: format!("{} credits", credits),
                amount,
                credits,
                bonus_credits: bonus,
                description: None,
                sort_order: 0,
            })
            .await
            .unwrap()
    }

    pub async fn membership_plan(&self, amount: i64, days: i64) -> MembershipPrice {
        self.services
            .prices
            .create_membership_price(&MembershipPriceCreate {
                name: format!("{} days", days),
                membership_type: MembershipType::Monthly,
                amount,
                original_amount: Some(amount + 1000),
                duration_days: days,
                description: None,
                features: None,
                sort_order: 0,
            })
            .await
            .unwrap()
    }

    /// Writes a membership expiry straight to the database, bypassing orders.
    pub async fn set_membership_expiry(&self, user_id: i64, at: DateTime<Utc>) {
        let db = libsql::Builder::new_local(self.repo.db_path())
            .build()
            .await
            .unwrap();
        let conn = db.connect().unwrap();
        conn.execute(
            "UPDATE users SET is_member = 1, member_expired_at = ?1 WHERE id = ?2",
            libsql::params![at.timestamp(), user_id],
        )
        .await
        .unwrap();
    }

    /// Coupon valid from an hour ago for a week.
    pub fn coupon_req(
        &self,
        code: &str,
        coupon_type: CouponType,
        discount_type: DiscountType,
        value: i64,
    ) -> CouponCreate {
        let now = Utc::now();
        CouponCreate {
            code: code.into(),
            name: code.into(),
            coupon_type,
            discount_type,
            discount_value: value,
            min_amount: None,
            max_discount: None,
            total_quantity: None,
            valid_from: now - Duration::hours(1),
            valid_until: now + Duration::days(7),
            description: None,
            activity_id: None,
        }
    }
}

pub fn callback(order_no: &str, amount: i64, status: &str) -> PaymentCallbackRequest {
    PaymentCallbackRequest {
        order_no: order_no.into(),
        transaction_id: format!("TX-{}", order_no),
        payment_method: "alipay".into(),
        amount,
        status: status.into(),
    }
}
