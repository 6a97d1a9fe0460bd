//! Recharge and membership orders: creation, payment callbacks and history.
//!
//! Both order kinds share the same life cycle. An order is created `pending`, a
//! coupon (if any) is reserved with it, and the payment callback either pays it
//! (crediting or extending membership in the same transaction) or closes it and
//! releases the coupon. Callbacks are idempotent on already paid orders.

use crate::domain::{
    Cents, CouponType, DomainError, MembershipOrder, PaymentStatus, RechargeOrder, ReferralTrigger,
    UserAccount, generate_order_no,
};
use crate::ports::{OrderStore, PriceStore, UserStore};
use crate::schemas::credit::{
    MembershipOrderCreate, MembershipOrderResponse, MembershipStatisticsResponse,
    PaymentCallbackRequest, PaymentStatusResponse, RechargeOrderCreate, RechargeOrderResponse,
};
use crate::schemas::{Page, PageRequest};
use crate::usecases::coupon_service::{CouponQuote, CouponService};
use crate::usecases::referral_service::ReferralService;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

const SECS_PER_DAY: i64 = 86_400;

/// What a callback asks for once the order is known to exist and is not yet paid.
enum CallbackAction {
    Pay,
    Close(PaymentStatus),
}

fn callback_action(status: PaymentStatus) -> Result<CallbackAction, DomainError> {
    match status {
        PaymentStatus::Paid => Ok(CallbackAction::Pay),
        PaymentStatus::Failed | PaymentStatus::Cancelled => Ok(CallbackAction::Close(status)),
        other => Err(DomainError::Validation(format!(
            "callback status {} is not accepted",
            other
        ))),
    }
}

fn check_amount(order_no: &str, expected: Cents, paid: Cents) -> Result<(), DomainError> {
    if expected != paid {
        return Err(DomainError::Validation(format!(
            "order {} expects {} but callback reported {}",
            order_no, expected, paid
        )));
    }
    Ok(())
}

async fn load_user(users: &dyn UserStore, user_id: i64) -> Result<UserAccount, DomainError> {
    users
        .get_user(user_id)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("user {}", user_id)))
}

async fn quote_coupon(
    coupons: &CouponService,
    user_id: i64,
    code: Option<&str>,
    order_type: &str,
    amount: Cents,
    now: DateTime<Utc>,
) -> Result<Option<CouponQuote>, DomainError> {
    match code.map(str::trim).filter(|c| !c.is_empty()) {
        Some(code) => coupons
            .quote(user_id, code, Some(order_type), amount, now)
            .await
            .map(Some),
        None => Ok(None),
    }
}

pub struct RechargeService {
    users: Arc<dyn UserStore>,
    orders: Arc<dyn OrderStore>,
    prices: Arc<dyn PriceStore>,
    coupons: Arc<CouponService>,
    referrals: Arc<ReferralService>,
}

impl RechargeService {
    pub fn new(
        users: Arc<dyn UserStore>,
        orders: Arc<dyn OrderStore>,
        prices: Arc<dyn PriceStore>,
        coupons: Arc<CouponService>,
        referrals: Arc<ReferralService>,
    ) -> Self {
        Self {
            users,
            orders,
            prices,
            coupons,
            referrals,
        }
    }

    /// Creates a pending order from an active credit package, applying the coupon if given.
    pub async fn create_recharge_order(
        &self,
        user_id: i64,
        req: &RechargeOrderCreate,
    ) -> Result<RechargeOrder, DomainError> {
        req.validate()?;
        load_user(self.users.as_ref(), user_id).await?;
        let price = self
            .prices
            .get_credit_price(req.price_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| DomainError::NotFound(format!("credit price {}", req.price_id)))?;

        let now = Utc::now();
        let quote = quote_coupon(
            &self.coupons,
            user_id,
            req.coupon_code.as_deref(),
            "recharge",
            price.amount,
            now,
        )
        .await?;

        let mut order = RechargeOrder {
            id: 0,
            order_no: generate_order_no('R', now),
            user_id,
            amount: price.amount,
            credits: price.credits,
            bonus_credits: price.bonus_credits,
            payment_method: Some(req.payment_method.clone()),
            payment_status: PaymentStatus::Pending,
            paid_at: None,
            transaction_id: None,
            coupon_code: None,
            discount_amount: 0,
            remark: None,
            created_at: now,
            updated_at: now,
        };
        if let Some(q) = &quote {
            order.coupon_code = Some(q.coupon.code.clone());
            if q.coupon.coupon_type == CouponType::RechargeBonus {
                order.bonus_credits += q.coupon.bonus_credits();
            } else {
                order.amount = q.calculation.final_amount;
                order.discount_amount = q.calculation.discount_amount;
            }
        }

        let order = self
            .orders
            .insert_recharge_order(&order, quote.as_ref().map(|q| q.held.id))
            .await?;
        info!(
            user_id,
            order_no = %order.order_no,
            amount = order.amount,
            credits = order.total_credits(),
            coupon = order.coupon_code.as_deref().unwrap_or("-"),
            "recharge order created"
        );
        Ok(order)
    }

    /// Applies a payment callback. Returns true when the order is (now or already) paid.
    pub async fn process_recharge_callback(
        &self,
        req: &PaymentCallbackRequest,
    ) -> Result<bool, DomainError> {
        let status = req.validate()?;
        let order = self
            .orders
            .find_recharge_order(&req.order_no)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("order {}", req.order_no)))?;
        if order.payment_status == PaymentStatus::Paid {
            info!(order_no = %order.order_no, "duplicate callback for paid order");
            return Ok(true);
        }
        match callback_action(status)? {
            CallbackAction::Close(status) => {
                self.orders.close_order(&order.order_no, status, Utc::now()).await?;
                Ok(false)
            }
            CallbackAction::Pay => {
                check_amount(&order.order_no, order.amount, req.amount)?;
                let paid = self
                    .orders
                    .pay_recharge_order(&order.order_no, &req.transaction_id, Utc::now())
                    .await?;
                if let Some((order, _)) = paid {
                    self.referrals
                        .settle_after_payment(order.user_id, ReferralTrigger::FirstRecharge, order.amount)
                        .await;
                }
                Ok(true)
            }
        }
    }

    pub async fn get_recharge_orders(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<RechargeOrderResponse>, DomainError> {
        page.validate()?;
        let (items, total) = self.orders.list_recharge_orders(user_id, page).await?;
        Ok(Page::new(items.iter().map(Into::into).collect(), total, page))
    }

    /// Cancels one of the user's own pending orders of either kind.
    pub async fn cancel_order(&self, user_id: i64, order_no: &str) -> Result<(), DomainError> {
        let owner = match order_no.chars().next() {
            Some('R') => self
                .orders
                .find_recharge_order(order_no)
                .await?
                .map(|o| (o.user_id, o.payment_status)),
            Some('M') => self
                .orders
                .find_membership_order(order_no)
                .await?
                .map(|o| (o.user_id, o.payment_status)),
            _ => None,
        };
        let (owner_id, status) = owner
            .filter(|(owner_id, _)| *owner_id == user_id)
            .ok_or_else(|| DomainError::NotFound(format!("order {}", order_no)))?;
        if !self
            .orders
            .close_order(order_no, PaymentStatus::Cancelled, Utc::now())
            .await?
        {
            return Err(DomainError::InvalidState(format!(
                "order {} is {}",
                order_no, status
            )));
        }
        info!(user_id = owner_id, order_no, "order cancelled by user");
        Ok(())
    }

    /// Status of an order of either kind, looked up by number.
    pub async fn get_payment_status(
        &self,
        order_no: &str,
    ) -> Result<PaymentStatusResponse, DomainError> {
        let found = match order_no.chars().next() {
            Some('R') => self
                .orders
                .find_recharge_order(order_no)
                .await?
                .map(|o| (o.payment_status, o.paid_at)),
            Some('M') => self
                .orders
                .find_membership_order(order_no)
                .await?
                .map(|o| (o.payment_status, o.paid_at)),
            _ => None,
        };
        let (payment_status, paid_at) =
            found.ok_or_else(|| DomainError::NotFound(format!("order {}", order_no)))?;
        Ok(PaymentStatusResponse {
            order_no: order_no.to_string(),
            payment_status,
            paid_at,
        })
    }
}

pub struct MembershipService {
    users: Arc<dyn UserStore>,
    orders: Arc<dyn OrderStore>,
    prices: Arc<dyn PriceStore>,
    coupons: Arc<CouponService>,
    referrals: Arc<ReferralService>,
}

impl MembershipService {
    pub fn new(
        users: Arc<dyn UserStore>,
        orders: Arc<dyn OrderStore>,
        prices: Arc<dyn PriceStore>,
        coupons: Arc<CouponService>,
        referrals: Arc<ReferralService>,
    ) -> Self {
        Self {
            users,
            orders,
            prices,
            coupons,
            referrals,
        }
    }

    pub async fn create_membership_order(
        &self,
        user_id: i64,
        req: &MembershipOrderCreate,
    ) -> Result<MembershipOrder, DomainError> {
        req.validate()?;
        load_user(self.users.as_ref(), user_id).await?;
        let price = self
            .prices
            .get_membership_price(req.price_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| DomainError::NotFound(format!("membership price {}", req.price_id)))?;

        let now = Utc::now();
        let quote = quote_coupon(
            &self.coupons,
            user_id,
            req.coupon_code.as_deref(),
            "membership",
            price.amount,
            now,
        )
        .await?;

        let original = price.original_amount.unwrap_or(price.amount);
        let coupon_discount = quote.as_ref().map_or(0, |q| q.calculation.discount_amount);
        let amount = price.amount - coupon_discount;
        let order = MembershipOrder {
            id: 0,
            order_no: generate_order_no('M', now),
            user_id,
            membership_type: price.membership_type,
            amount,
            original_amount: Some(original),
            discount_amount: (original - amount).max(0),
            duration_days: price.duration_days,
            payment_method: Some(req.payment_method.clone()),
            payment_status: PaymentStatus::Pending,
            paid_at: None,
            expired_at: None,
            transaction_id: None,
            coupon_code: quote.as_ref().map(|q| q.coupon.code.clone()),
            remark: None,
            created_at: now,
            updated_at: now,
        };
        let order = self
            .orders
            .insert_membership_order(&order, quote.as_ref().map(|q| q.held.id))
            .await?;
        info!(
            user_id,
            order_no = %order.order_no,
            kind = %order.membership_type,
            amount = order.amount,
            days = order.duration_days,
            "membership order created"
        );
        Ok(order)
    }

    /// Applies a payment callback. Returns true when the order is (now or already) paid.
    pub async fn process_membership_callback(
        &self,
        req: &PaymentCallbackRequest,
    ) -> Result<bool, DomainError> {
        let status = req.validate()?;
        let order = self
            .orders
            .find_membership_order(&req.order_no)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("order {}", req.order_no)))?;
        if order.payment_status == PaymentStatus::Paid {
            info!(order_no = %order.order_no, "duplicate callback for paid order");
            return Ok(true);
        }
        match callback_action(status)? {
            CallbackAction::Close(status) => {
                self.orders.close_order(&order.order_no, status, Utc::now()).await?;
                Ok(false)
            }
            CallbackAction::Pay => {
                check_amount(&order.order_no, order.amount, req.amount)?;
                let paid = self
                    .orders
                    .pay_membership_order(&order.order_no, &req.transaction_id, Utc::now())
                    .await?;
                if let Some(order) = paid {
                    self.referrals
                        .settle_after_payment(order.user_id, ReferralTrigger::Membership, order.amount)
                        .await;
                }
                Ok(true)
            }
        }
    }

    pub async fn get_membership_orders(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<MembershipOrderResponse>, DomainError> {
        page.validate()?;
        let (items, total) = self.orders.list_membership_orders(user_id, page).await?;
        Ok(Page::new(items.iter().map(Into::into).collect(), total, page))
    }

    pub async fn get_membership_statistics(
        &self,
        user_id: i64,
    ) -> Result<MembershipStatisticsResponse, DomainError> {
        let user = load_user(self.users.as_ref(), user_id).await?;
        let now = Utc::now();
        let active = user.is_active_member(now);
        if user.is_member && !active {
            if let Err(e) = self.users.clear_membership(user_id, now).await {
                warn!(user_id, error = %e, "could not clear lapsed membership");
            }
        }
        let purchases = self.orders.membership_purchases(user_id).await?;
        let expiry = user.member_expired_at.filter(|_| active);
        Ok(MembershipStatisticsResponse {
            is_member: active,
            member_expired_at: expiry,
            total_orders: purchases.count,
            total_amount: purchases.amount,
            days_remaining: expiry.map(|at| days_remaining(at, now)),
            last_purchase_at: purchases.last_paid_at,
            last_membership_type: purchases.last_type,
        })
    }
}

/// Whole days left until `expiry`, rounding a partial day up.
fn days_remaining(expiry: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let secs = (expiry - now).num_seconds();
    if secs <= 0 {
        0
    } else {
        (secs + SECS_PER_DAY - 1) / SECS_PER_DAY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_days_remaining_rounds_up() {
        let now = Utc::now();
        assert_eq!(days_remaining(now + Duration::days(30), now), 30);
        assert_eq!(days_remaining(now + Duration::hours(1), now), 1);
        assert_eq!(days_remaining(now + Duration::days(2) + Duration::seconds(1), now), 3);
        assert_eq!(days_remaining(now - Duration::days(1), now), 0);
    }

    #[test]
    fn test_callback_actions() {
        assert!(matches!(callback_action(PaymentStatus::Paid), Ok(CallbackAction::Pay)));
        assert!(matches!(
            callback_action(PaymentStatus::Failed),
            Ok(CallbackAction::Close(PaymentStatus::Failed))
        ));
        assert!(callback_action(PaymentStatus::Refunded).is_err());
        assert!(callback_action(PaymentStatus::Pending).is_err());
    }

    #[test]
    fn test_amount_mismatch_is_validation() {
        assert!(check_amount("R1", 100, 100).is_ok());
        assert!(matches!(check_amount("R1", 100, 99), Err(DomainError::Validation(_))));
    }
}
