//! Application use cases. Orchestrate domain logic via ports.

pub mod activity_service;
pub mod coupon_service;
pub mod credit_service;
pub mod oauth_service;
pub mod order_service;
pub mod price_service;
pub mod referral_service;
pub mod statistics_service;

pub use activity_service::ActivityService;
pub use coupon_service::{CouponQuote, CouponService};
pub use credit_service::CreditService;
pub use oauth_service::OAuthService;
pub use order_service::{MembershipService, RechargeService};
pub use price_service::PriceService;
pub use referral_service::{ReferralPolicy, ReferralService};
pub use statistics_service::StatisticsService;

use crate::ports::{
    ActivityStore, CouponStore, CredentialCipher, CredentialProbe, LedgerStore, OAuthStore,
    OrderStore, PriceStore, ReferralStore, StatisticsStore, UserStore,
};
use std::sync::Arc;

/// Every use case, wired against one store implementing all persistence ports.
#[derive(Clone)]
pub struct Services {
    pub credit: Arc<CreditService>,
    pub recharge: Arc<RechargeService>,
    pub membership: Arc<MembershipService>,
    pub prices: Arc<PriceService>,
    pub activities: Arc<ActivityService>,
    pub coupons: Arc<CouponService>,
    pub referrals: Arc<ReferralService>,
    pub statistics: Arc<StatisticsService>,
    pub oauth: Arc<OAuthService>,
}

impl Services {
    pub fn wire<S>(
        store: Arc<S>,
        cipher: Arc<dyn CredentialCipher>,
        probe: Arc<dyn CredentialProbe>,
        policy: ReferralPolicy,
    ) -> Self
    where
        S: UserStore
            + LedgerStore
            + OrderStore
            + PriceStore
            + ActivityStore
            + CouponStore
            + ReferralStore
            + StatisticsStore
            + OAuthStore
            + 'static,
    {
        let users: Arc<dyn UserStore> = store.clone();
        let ledger: Arc<dyn LedgerStore> = store.clone();
        let orders: Arc<dyn OrderStore> = store.clone();
        let prices: Arc<dyn PriceStore> = store.clone();
        let activities: Arc<dyn ActivityStore> = store.clone();
        let coupon_store: Arc<dyn CouponStore> = store.clone();
        let referral_store: Arc<dyn ReferralStore> = store.clone();
        let stats: Arc<dyn StatisticsStore> = store.clone();
        let oauth_store: Arc<dyn OAuthStore> = store;

        let coupons = Arc::new(CouponService::new(Arc::clone(&coupon_store)));
        let referrals = Arc::new(ReferralService::new(
            Arc::clone(&users),
            referral_store,
            policy,
        ));
        Self {
            credit: Arc::new(CreditService::new(
                Arc::clone(&users),
                ledger,
                Arc::clone(&orders),
            )),
            recharge: Arc::new(RechargeService::new(
                Arc::clone(&users),
                Arc::clone(&orders),
                Arc::clone(&prices),
                Arc::clone(&coupons),
                Arc::clone(&referrals),
            )),
            membership: Arc::new(MembershipService::new(
                Arc::clone(&users),
                orders,
                Arc::clone(&prices),
                Arc::clone(&coupons),
                Arc::clone(&referrals),
            )),
            prices: Arc::new(PriceService::new(prices)),
            activities: Arc::new(ActivityService::new(activities, coupon_store, users)),
            coupons,
            referrals,
            statistics: Arc::new(StatisticsService::new(stats)),
            oauth: Arc::new(OAuthService::new(oauth_store, cipher, probe)),
        }
    }
}
