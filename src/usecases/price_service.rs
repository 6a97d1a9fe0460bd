//! Price catalogue administration for credit packages and membership plans.

use crate::domain::{CreditPrice, DomainError, MembershipPrice};
use crate::ports::PriceStore;
use crate::schemas::credit::{
    CreditPriceCreate, CreditPriceResponse, CreditPriceUpdate, MembershipPriceCreate,
    MembershipPriceResponse, MembershipPriceUpdate,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

pub struct PriceService {
    prices: Arc<dyn PriceStore>,
}

impl PriceService {
    pub fn new(prices: Arc<dyn PriceStore>) -> Self {
        Self { prices }
    }

    /// Active packages, in display order.
    pub async fn list_credit_prices(&self) -> Result<Vec<CreditPriceResponse>, DomainError> {
        let prices = self.prices.list_credit_prices(true).await?;
        Ok(prices.iter().map(Into::into).collect())
    }

    /// Every package, including deactivated ones.
    pub async fn list_all_credit_prices(&self) -> Result<Vec<CreditPrice>, DomainError> {
        self.prices.list_credit_prices(false).await
    }

    pub async fn create_credit_price(
        &self,
        req: &CreditPriceCreate,
    ) -> Result<CreditPrice, DomainError> {
        req.validate()?;
        let price = self.prices.insert_credit_price(req, Utc::now()).await?;
        info!(price_id = price.id, name = %price.name, amount = price.amount, "credit price created");
        Ok(price)
    }

    pub async fn update_credit_price(
        &self,
        id: i64,
        req: CreditPriceUpdate,
    ) -> Result<CreditPrice, DomainError> {
        req.validate()?;
        let mut price = self.credit_price(id).await?;
        req.apply(&mut price);
        price.updated_at = Utc::now();
        self.prices.save_credit_price(&price).await?;
        Ok(price)
    }

    /// Deactivates the package. Existing orders keep their copied figures.
    pub async fn delete_credit_price(&self, id: i64) -> Result<(), DomainError> {
        let mut price = self.credit_price(id).await?;
        price.is_active = false;
        price.updated_at = Utc::now();
        self.prices.save_credit_price(&price).await?;
        info!(price_id = id, "credit price deactivated");
        Ok(())
    }

    async fn credit_price(&self, id: i64) -> Result<CreditPrice, DomainError> {
        self.prices
            .get_credit_price(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("credit price {}", id)))
    }

    pub async fn list_membership_prices(&self) -> Result<Vec<MembershipPriceResponse>, DomainError> {
        let prices = self.prices.list_membership_prices(true).await?;
        Ok(prices.iter().map(Into::into).collect())
    }

    pub async fn list_all_membership_prices(&self) -> Result<Vec<MembershipPrice>, DomainError> {
        self.prices.list_membership_prices(false).await
    }

    pub async fn create_membership_price(
        &self,
        req: &MembershipPriceCreate,
    ) -> Result<MembershipPrice, DomainError> {
        req.validate()?;
        let price = self.prices.insert_membership_price(req, Utc::now()).await?;
        info!(
            price_id = price.id,
            kind = %price.membership_type,
            days = price.duration_days,
            "membership price created"
        );
        Ok(price)
    }

    pub async fn update_membership_price(
        &self,
        id: i64,
        req: MembershipPriceUpdate,
    ) -> Result<MembershipPrice, DomainError> {
        req.validate()?;
        let mut price = self.membership_price(id).await?;
        req.apply(&mut price);
        price.updated_at = Utc::now();
        self.prices.save_membership_price(&price).await?;
        Ok(price)
    }

    pub async fn delete_membership_price(&self, id: i64) -> Result<(), DomainError> {
        let mut price = self.membership_price(id).await?;
        price.is_active = false;
        price.updated_at = Utc::now();
        self.prices.save_membership_price(&price).await?;
        info!(price_id = id, "membership price deactivated");
        Ok(())
    }

    async fn membership_price(&self, id: i64) -> Result<MembershipPrice, DomainError> {
        self.prices
            .get_membership_price(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("membership price {}", id)))
    }
}
