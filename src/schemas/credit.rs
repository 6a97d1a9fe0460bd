//! Credit and membership payloads. Money is carried as integer cents.

use super::{require_max_len, require_non_empty, require_non_negative, require_positive};
use crate::domain::{
    Cents, CreditPrice, CreditTransaction, DomainError, MembershipOrder, MembershipPrice,
    MembershipType, PaymentStatus, RechargeOrder, TransactionType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Payment channels accepted for orders.
pub const PAYMENT_METHODS: &[&str] = &["alipay", "wechat"];

fn validate_payment_method(method: &str) -> Result<(), DomainError> {
    if PAYMENT_METHODS.contains(&method) {
        Ok(())
    } else {
        Err(DomainError::Validation(format!(
            "payment_method must be one of: {}",
            PAYMENT_METHODS.join(", ")
        )))
    }
}

// ============ Ledger ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransactionCreate {
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub description: Option<String>,
}

impl CreditTransactionCreate {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_positive("amount", self.amount)?;
        if let Some(d) = &self.description {
            require_max_len("description", d, 255)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditTransactionResponse {
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

impl From<&CreditTransaction> for CreditTransactionResponse {
    fn from(t: &CreditTransaction) -> Self {
        Self {
            id: t.id,
            user_id: t.user_id,
            transaction_type: t.transaction_type,
            amount: t.amount,
            balance_before: t.balance_before,
            balance_after: t.balance_after,
            description: t.description.clone(),
            related_id: t.related_id,
            related_type: t.related_type.clone(),
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditBalanceResponse {
    pub credits: i64,
    pub is_member: bool,
    pub member_expired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeCreditsRequest {
    pub amount: i64,
    pub description: String,
    #[serde(default)]
    pub related_id: Option<i64>,
    #[serde(default)]
    pub related_type: Option<String>,
}

impl ConsumeCreditsRequest {
    pub fn new(amount: i64, description: impl Into<String>) -> Self {
        Self {
            amount,
            description: description.into(),
            related_id: None,
            related_type: None,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        require_positive("amount", self.amount)?;
        require_non_empty("description", &self.description)?;
        require_max_len("description", &self.description, 255)
    }
}

// ============ Recharge orders ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechargeOrderCreate {
    pub price_id: i64,
    pub payment_method: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

impl RechargeOrderCreate {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_positive("price_id", self.price_id)?;
        validate_payment_method(&self.payment_method)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RechargeOrderResponse {
    pub id: i64,
    pub order_no: String,
    pub amount: Cents,
    pub credits: i64,
    pub bonus_credits: i64,
    pub discount_amount: Cents,
    pub coupon_code: Option<String>,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&RechargeOrder> for RechargeOrderResponse {
    fn from(o: &RechargeOrder) -> Self {
        Self {
            id: o.id,
            order_no: o.order_no.clone(),
            amount: o.amount,
            credits: o.credits,
            bonus_credits: o.bonus_credits,
            discount_amount: o.discount_amount,
            coupon_code: o.coupon_code.clone(),
            payment_status: o.payment_status,
            payment_method: o.payment_method.clone(),
            created_at: o.created_at,
            paid_at: o.paid_at,
        }
    }
}

// ============ Membership orders ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipOrderCreate {
    pub price_id: i64,
    pub payment_method: String,
    #[serde(default)]
    pub coupon_code: Option<String>,
}

impl MembershipOrderCreate {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_positive("price_id", self.price_id)?;
        validate_payment_method(&self.payment_method)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipOrderResponse {
    pub id: i64,
    pub order_no: String,
    pub membership_type: MembershipType,
    pub amount: Cents,
    pub original_amount: Option<Cents>,
    pub discount_amount: Cents,
    pub duration_days: i64,
    pub payment_status: PaymentStatus,
    pub payment_method: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
}

impl From<&MembershipOrder> for MembershipOrderResponse {
    fn from(o: &MembershipOrder) -> Self {
        Self {
            id: o.id,
            order_no: o.order_no.clone(),
            membership_type: o.membership_type,
            amount: o.amount,
            original_amount: o.original_amount,
            discount_amount: o.discount_amount,
            duration_days: o.duration_days,
            payment_status: o.payment_status,
            payment_method: o.payment_method.clone(),
            created_at: o.created_at,
            paid_at: o.paid_at,
            expired_at: o.expired_at,
        }
    }
}

// ============ Price configuration ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditPriceResponse {
    pub id: i64,
    pub name: String,
    pub amount: Cents,
    pub credits: i64,
    pub bonus_credits: i64,
    pub description: Option<String>,
    pub sort_order: i64,
    pub is_active: bool,
}

impl From<&CreditPrice> for CreditPriceResponse {
    fn from(p: &CreditPrice) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            amount: p.amount,
            credits: p.credits,
            bonus_credits: p.bonus_credits,
            description: p.description.clone(),
            sort_order: p.sort_order,
            is_active: p.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipPriceResponse {
    pub id: i64,
    pub name: String,
    pub membership_type: MembershipType,
    pub amount: Cents,
    pub original_amount: Option<Cents>,
    pub duration_days: i64,
    pub description: Option<String>,
    pub features: Option<String>,
    pub sort_order: i64,
    pub is_active: bool,
}

impl From<&MembershipPrice> for MembershipPriceResponse {
    fn from(p: &MembershipPrice) -> Self {
        Self {
            id: p.id,
            name: p.name.clone(),
            membership_type: p.membership_type,
            amount: p.amount,
            original_amount: p.original_amount,
            duration_days: p.duration_days,
            description: p.description.clone(),
            features: p.features.clone(),
            sort_order: p.sort_order,
            is_active: p.is_active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditPriceCreate {
    pub name: String,
    pub amount: Cents,
    pub credits: i64,
    #[serde(default)]
    pub bonus_credits: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
}

impl CreditPriceCreate {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_non_empty("name", &self.name)?;
        require_max_len("name", &self.name, 100)?;
        require_positive("amount", self.amount)?;
        require_positive("credits", self.credits)?;
        require_non_negative("bonus_credits", self.bonus_credits)?;
        if let Some(d) = &self.description {
            require_max_len("description", d, 255)?;
        }
        Ok(())
    }
}

/// Partial update; `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreditPriceUpdate {
    pub name: Option<String>,
    pub amount: Option<Cents>,
    pub credits: Option<i64>,
    pub bonus_credits: Option<i64>,
    pub description: Option<String>,
    pub sort_order: Option<i64>,
    pub is_active: Option<bool>,
}

impl CreditPriceUpdate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
            require_max_len("name", name, 100)?;
        }
        if let Some(amount) = self.amount {
            require_positive("amount", amount)?;
        }
        if let Some(credits) = self.credits {
            require_positive("credits", credits)?;
        }
        if let Some(bonus) = self.bonus_credits {
            require_non_negative("bonus_credits", bonus)?;
        }
        if let Some(d) = &self.description {
            require_max_len("description", d, 255)?;
        }
        Ok(())
    }

    pub fn apply(self, price: &mut CreditPrice) {
        if let Some(v) = self.name {
            price.name = v;
        }
        if let Some(v) = self.amount {
            price.amount = v;
        }
        if let Some(v) = self.credits {
            price.credits = v;
        }
        if let Some(v) = self.bonus_credits {
            price.bonus_credits = v;
        }
        if let Some(v) = self.description {
            price.description = Some(v);
        }
        if let Some(v) = self.sort_order {
            price.sort_order = v;
        }
        if let Some(v) = self.is_active {
            price.is_active = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipPriceCreate {
    pub name: String,
    /// Deserialises only from `monthly`, `quarterly` or `yearly`.
    pub membership_type: MembershipType,
    pub amount: Cents,
    #[serde(default)]
    pub original_amount: Option<Cents>,
    pub duration_days: i64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub features: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
}

impl MembershipPriceCreate {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_non_empty("name", &self.name)?;
        require_max_len("name", &self.name, 100)?;
        require_positive("amount", self.amount)?;
        if let Some(original) = self.original_amount {
            require_positive("original_amount", original)?;
        }
        require_positive("duration_days", self.duration_days)?;
        if let Some(d) = &self.description {
            require_max_len("description", d, 255)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MembershipPriceUpdate {
    pub name: Option<String>,
    pub membership_type: Option<MembershipType>,
    pub amount: Option<Cents>,
    pub original_amount: Option<Cents>,
    pub duration_days: Option<i64>,
    pub description: Option<String>,
    pub features: Option<String>,
    pub sort_order: Option<i64>,
    pub is_active: Option<bool>,
}

impl MembershipPriceUpdate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.name {
            require_non_empty("name", name)?;
            require_max_len("name", name, 100)?;
        }
        if let Some(amount) = self.amount {
            require_positive("amount", amount)?;
        }
        if let Some(original) = self.original_amount {
            require_positive("original_amount", original)?;
        }
        if let Some(days) = self.duration_days {
            require_positive("duration_days", days)?;
        }
        if let Some(d) = &self.description {
            require_max_len("description", d, 255)?;
        }
        Ok(())
    }

    pub fn apply(self, price: &mut MembershipPrice) {
        if let Some(v) = self.name {
            price.name = v;
        }
        if let Some(v) = self.membership_type {
            price.membership_type = v;
        }
        if let Some(v) = self.amount {
            price.amount = v;
        }
        if let Some(v) = self.original_amount {
            price.original_amount = Some(v);
        }
        if let Some(v) = self.duration_days {
            price.duration_days = v;
        }
        if let Some(v) = self.description {
            price.description = Some(v);
        }
        if let Some(v) = self.features {
            price.features = Some(v);
        }
        if let Some(v) = self.sort_order {
            price.sort_order = v;
        }
        if let Some(v) = self.is_active {
            price.is_active = v;
        }
    }
}

// ============ Payment ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallbackRequest {
    pub order_no: String,
    pub transaction_id: String,
    pub payment_method: String,
    pub amount: Cents,
    pub status: String,
}

impl PaymentCallbackRequest {
    pub fn validate(&self) -> Result<PaymentStatus, DomainError> {
        require_non_empty("order_no", &self.order_no)?;
        require_non_empty("transaction_id", &self.transaction_id)?;
        require_non_negative("amount", self.amount)?;
        self.status.parse()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStatusResponse {
    pub order_no: String,
    pub payment_status: PaymentStatus,
    pub paid_at: Option<DateTime<Utc>>,
}

// ============ Statistics ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditStatisticsResponse {
    pub total_recharge: i64,
    pub total_consume: i64,
    pub total_reward: i64,
    pub total_refund: i64,
    pub total_expire: i64,
    pub current_balance: i64,
    pub recharge_amount: Cents,
    pub recharge_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipStatisticsResponse {
    pub is_member: bool,
    pub member_expired_at: Option<DateTime<Utc>>,
    pub total_orders: i64,
    pub total_amount: Cents,
    pub days_remaining: Option<i64>,
    pub last_purchase_at: Option<DateTime<Utc>>,
    pub last_membership_type: Option<MembershipType>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credit_price_create_validation() {
        let ok = CreditPriceCreate {
            name: "Starter".into(),
            amount: 1000,
            credits: 100,
            bonus_credits: 0,
            description: None,
            sort_order: 0,
        };
        assert!(ok.validate().is_ok());

        let zero_amount = CreditPriceCreate { amount: 0, ..ok.clone() };
        assert!(zero_amount.validate().is_err());

        let negative_bonus = CreditPriceCreate { bonus_credits: -1, ..ok.clone() };
        assert!(negative_bonus.validate().is_err());

        let long_name = CreditPriceCreate { name: "x".repeat(101), ..ok };
        assert!(long_name.validate().is_err());
    }

    #[test]
    fn test_membership_type_rejected_at_parse() {
        let json = r#"{"name":"Weekly","membership_type":"weekly","amount":100,"duration_days":7}"#;
        assert!(serde_json::from_str::<MembershipPriceCreate>(json).is_err());

        let json = r#"{"name":"Monthly","membership_type":"monthly","amount":2990,"duration_days":30}"#;
        let req: MembershipPriceCreate = serde_json::from_str(json).unwrap();
        assert!(req.validate().is_ok());
        assert_eq!(req.sort_order, 0);
    }

    #[test]
    fn test_order_payment_method() {
        let mut req = RechargeOrderCreate {
            price_id: 1,
            payment_method: "wechat".into(),
            coupon_code: None,
        };
        assert!(req.validate().is_ok());
        req.payment_method = "paypal".into();
        assert!(matches!(req.validate(), Err(DomainError::Validation(_))));
    }

    #[test]
    fn test_consume_request_validation() {
        assert!(ConsumeCreditsRequest::new(10, "image").validate().is_ok());
        assert!(ConsumeCreditsRequest::new(0, "image").validate().is_err());
        assert!(ConsumeCreditsRequest::new(5, "  ").validate().is_err());
    }

    #[test]
    fn test_callback_status_parse() {
        let cb = PaymentCallbackRequest {
            order_no: "R1".into(),
            transaction_id: "T1".into(),
            payment_method: "alipay".into(),
            amount: 100,
            status: "paid".into(),
        };
        assert_eq!(cb.validate().unwrap(), PaymentStatus::Paid);
        let bad = PaymentCallbackRequest { status: "done".into(), ..cb };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_price_update_apply() {
        let now = Utc::now();
        let mut price = CreditPrice {
            id: 1,
            name: "Old".into(),
            amount: 100,
            credits: 10,
            bonus_credits: 0,
            is_active: true,
            sort_order: 0,
            description: None,
            created_at: now,
            updated_at: now,
        };
        CreditPriceUpdate {
            name: Some("New".into()),
            bonus_credits: Some(5),
            ..Default::default()
        }
        .apply(&mut price);
        assert_eq!(price.name, "New");
        assert_eq!(price.bonus_credits, 5);
        assert_eq!(price.amount, 100);
    }
}
