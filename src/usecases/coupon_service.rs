//! Coupon use case: catalogue administration, issuing to users, discount quotes and redemption.

use crate::domain::{
    Cents, Coupon, CouponStatus, CouponType, DomainError, UserCoupon, format_cents,
};
use crate::ports::CouponStore;
use crate::schemas::operation::{
    CouponCalculateRequest, CouponCalculateResponse, CouponCreate, CouponQuery, CouponResponse,
    CouponUpdate, CouponUse, UserCouponResponse,
};
use crate::schemas::{Page, PageRequest, require_non_empty, require_positive};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// A coupon the user may apply right now, plus what it takes off `amount`.
#[derive(Debug, Clone)]
pub struct CouponQuote {
    pub held: UserCoupon,
    pub coupon: Coupon,
    pub calculation: CouponCalculateResponse,
}

pub struct CouponService {
    coupons: Arc<dyn CouponStore>,
}

impl CouponService {
    pub fn new(coupons: Arc<dyn CouponStore>) -> Self {
        Self { coupons }
    }

    pub async fn create_coupon(&self, req: &CouponCreate) -> Result<Coupon, DomainError> {
        req.validate()?;
        let coupon = self.coupons.insert_coupon(req, Utc::now()).await?;
        info!(coupon_id = coupon.id, code = %coupon.code, kind = %coupon.coupon_type, "coupon created");
        Ok(coupon)
    }

    pub async fn update_coupon(&self, id: i64, req: CouponUpdate) -> Result<Coupon, DomainError> {
        req.validate()?;
        let mut coupon = self.get_coupon(id).await?;
        req.apply(&mut coupon)?;
        coupon.updated_at = Utc::now();
        self.coupons.save_coupon(&coupon).await?;
        Ok(coupon)
    }

    pub async fn get_coupon(&self, id: i64) -> Result<Coupon, DomainError> {
        self.coupons
            .get_coupon(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("coupon {}", id)))
    }

    pub async fn get_coupon_by_code(&self, code: &str) -> Result<Coupon, DomainError> {
        self.coupons
            .find_coupon_by_code(code.trim())
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("coupon {}", code)))
    }

    pub async fn list_coupons(&self, query: &CouponQuery) -> Result<Page<CouponResponse>, DomainError> {
        query.page.validate()?;
        let (items, total) = self
            .coupons
            .list_coupons(query.coupon_type, query.is_active, query.page)
            .await?;
        Ok(Page::new(items.iter().map(Into::into).collect(), total, query.page))
    }

    /// Soft delete: the coupon stops being receivable and usable.
    pub async fn delete_coupon(&self, id: i64) -> Result<(), DomainError> {
        let mut coupon = self.get_coupon(id).await?;
        coupon.is_active = false;
        coupon.updated_at = Utc::now();
        self.coupons.save_coupon(&coupon).await?;
        info!(coupon_id = id, "coupon deactivated");
        Ok(())
    }

    pub async fn receive_coupon(&self, user_id: i64, code: &str) -> Result<UserCoupon, DomainError> {
        require_non_empty("code", code)?;
        let coupon = self.get_coupon_by_code(code).await?;
        let now = Utc::now();
        if !coupon.is_valid_at(now) {
            return Err(DomainError::InvalidState(format!(
                "coupon {} is not available",
                coupon.code
            )));
        }
        if self.coupons.find_user_coupon(user_id, coupon.id).await?.is_some() {
            return Err(DomainError::Conflict(format!(
                "coupon {} already received",
                coupon.code
            )));
        }
        let held = self.coupons.grant_coupon(user_id, coupon.id, now).await?;
        info!(user_id, code = %coupon.code, "coupon received");
        Ok(held)
    }

    /// Lapsed unused coupons are flipped to `expired` before listing.
    pub async fn list_user_coupons(
        &self,
        user_id: i64,
        status: Option<CouponStatus>,
        page: PageRequest,
    ) -> Result<Page<UserCouponResponse>, DomainError> {
        page.validate()?;
        let expired = self.coupons.expire_user_coupons(user_id, Utc::now()).await?;
        if expired > 0 {
            info!(user_id, expired, "user coupons expired");
        }
        let (items, total) = self.coupons.list_user_coupons(user_id, status, page).await?;
        Ok(Page::new(
            items
                .iter()
                .map(|(held, coupon)| UserCouponResponse::new(held, coupon))
                .collect(),
            total,
            page,
        ))
    }

    pub async fn calculate_discount(
        &self,
        user_id: i64,
        req: &CouponCalculateRequest,
    ) -> Result<CouponCalculateResponse, DomainError> {
        require_positive("amount", req.amount)?;
        let quote = self.quote(user_id, &req.code, None, req.amount, Utc::now()).await?;
        Ok(quote.calculation)
    }

    /// Marks the coupon used against an order and returns the applied discount.
    pub async fn use_coupon(
        &self,
        user_id: i64,
        req: &CouponUse,
    ) -> Result<CouponCalculateResponse, DomainError> {
        req.validate()?;
        let now = Utc::now();
        let quote = self
            .quote(user_id, &req.code, Some(&req.order_type), req.amount, now)
            .await?;
        self.coupons
            .redeem_user_coupon(quote.held.id, Some(req.order_id), now)
            .await?;
        info!(
            user_id,
            code = %quote.coupon.code,
            order_id = req.order_id,
            discount = quote.calculation.discount_amount,
            "coupon used"
        );
        Ok(quote.calculation)
    }

    /// Checks that `user_id` can apply `code` to an order of `amount` now.
    /// `order_type` (`recharge` / `membership`) is matched when given.
    pub async fn quote(
        &self,
        user_id: i64,
        code: &str,
        order_type: Option<&str>,
        amount: Cents,
        now: DateTime<Utc>,
    ) -> Result<CouponQuote, DomainError> {
        let coupon = self.get_coupon_by_code(code).await?;
        let held = self
            .coupons
            .find_user_coupon(user_id, coupon.id)
            .await?
            .ok_or_else(|| {
                DomainError::NotFound(format!("user {} does not hold coupon {}", user_id, coupon.code))
            })?;
        if held.status != CouponStatus::Unused {
            return Err(DomainError::InvalidState(format!(
                "coupon {} is {}",
                coupon.code, held.status
            )));
        }
        if !coupon.is_valid_at(now) {
            return Err(DomainError::InvalidState(format!(
                "coupon {} is not valid now",
                coupon.code
            )));
        }
        if let Some(kind) = order_type.filter(|k| *k != coupon.coupon_type.order_type()) {
            return Err(DomainError::Validation(format!(
                "coupon {} does not apply to {} orders",
                coupon.code, kind
            )));
        }
        if let Some(min) = coupon.min_amount.filter(|min| amount < *min) {
            return Err(DomainError::Validation(format!(
                "order amount must be at least {} to use coupon {}",
                format_cents(min),
                coupon.code
            )));
        }
        let discount = match coupon.coupon_type {
            // adds credits instead of taking money off
            CouponType::RechargeBonus => 0,
            _ => coupon.discount_for(amount),
        };
        let calculation = CouponCalculateResponse {
            original_amount: amount,
            discount_amount: discount,
            final_amount: amount - discount,
            coupon_id: coupon.id,
            coupon_code: coupon.code.clone(),
            coupon_name: coupon.name.clone(),
        };
        Ok(CouponQuote {
            held,
            coupon,
            calculation,
        })
    }
}
