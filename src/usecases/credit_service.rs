//! Credit ledger use case: balances, spending, grants and per-user statistics.

use crate::domain::{CreditChange, CreditTransaction, DomainError, TransactionType, UserAccount};
use crate::ports::{LedgerStore, OrderStore, UserStore};
use crate::schemas::credit::{
    ConsumeCreditsRequest, CreditBalanceResponse, CreditStatisticsResponse,
    CreditTransactionCreate, CreditTransactionResponse,
};
use crate::schemas::{Page, PageRequest};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct CreditService {
    users: Arc<dyn UserStore>,
    ledger: Arc<dyn LedgerStore>,
    orders: Arc<dyn OrderStore>,
}

impl CreditService {
    pub fn new(
        users: Arc<dyn UserStore>,
        ledger: Arc<dyn LedgerStore>,
        orders: Arc<dyn OrderStore>,
    ) -> Self {
        Self {
            users,
            ledger,
            orders,
        }
    }

    async fn user(&self, user_id: i64) -> Result<UserAccount, DomainError> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("user {}", user_id)))
    }

    /// Balance and membership. A lapsed membership flag is cleared on the way.
    pub async fn get_user_balance(&self, user_id: i64) -> Result<CreditBalanceResponse, DomainError> {
        let user = self.user(user_id).await?;
        let now = Utc::now();
        let active = user.is_active_member(now);
        if user.is_member && !active {
            if self.users.clear_membership(user_id, now).await? {
                info!(user_id, "membership lapsed, flag cleared");
            }
        }
        Ok(CreditBalanceResponse {
            credits: user.credits,
            is_member: active,
            member_expired_at: if active { user.member_expired_at } else { None },
        })
    }

    /// Spends credits. Active members are not charged and get `Ok(None)`.
    pub async fn consume_credits(
        &self,
        user_id: i64,
        req: &ConsumeCreditsRequest,
    ) -> Result<Option<CreditTransaction>, DomainError> {
        req.validate()?;
        let user = self.user(user_id).await?;
        let now = Utc::now();
        if user.is_active_member(now) {
            debug!(user_id, amount = req.amount, "member consumption is free");
            return Ok(None);
        }
        let change = CreditChange::debit(
            user_id,
            TransactionType::Consume,
            req.amount,
            req.description.clone(),
        )
        .related(req.related_id, req.related_type.as_deref());
        match self.ledger.apply_credit_change(&change, now).await {
            Ok(row) => {
                info!(user_id, amount = req.amount, balance = row.balance_after, "credits consumed");
                Ok(Some(row))
            }
            Err(e) => {
                if let DomainError::InsufficientCredits { balance, required } = &e {
                    warn!(user_id, balance, required, "consumption rejected");
                }
                Err(e)
            }
        }
    }

    /// Grants credits. Only the positive movement kinds are accepted here.
    pub async fn add_credits(
        &self,
        user_id: i64,
        req: &CreditTransactionCreate,
        related_id: Option<i64>,
        related_type: Option<&str>,
    ) -> Result<CreditTransaction, DomainError> {
        req.validate()?;
        if matches!(
            req.transaction_type,
            TransactionType::Consume | TransactionType::Expire
        ) {
            return Err(DomainError::Validation(format!(
                "{} is a debit, not a grant",
                req.transaction_type
            )));
        }
        let description = req
            .description
            .clone()
            .unwrap_or_else(|| format!("{} credits", req.transaction_type));
        let change = CreditChange::credit(user_id, req.transaction_type, req.amount, description)
            .related(related_id, related_type);
        let row = self.ledger.apply_credit_change(&change, Utc::now()).await?;
        info!(
            user_id,
            kind = %req.transaction_type,
            amount = req.amount,
            balance = row.balance_after,
            "credits added"
        );
        Ok(row)
    }

    pub async fn refund_credits(
        &self,
        user_id: i64,
        amount: i64,
        description: &str,
        related_id: Option<i64>,
        related_type: Option<&str>,
    ) -> Result<CreditTransaction, DomainError> {
        let req = CreditTransactionCreate {
            transaction_type: TransactionType::Refund,
            amount,
            description: Some(description.to_string()),
        };
        self.add_credits(user_id, &req, related_id, related_type).await
    }

    /// Removes up to `amount` credits; never pushes the balance below zero.
    pub async fn expire_credits(
        &self,
        user_id: i64,
        amount: i64,
        description: &str,
    ) -> Result<CreditTransaction, DomainError> {
        if amount <= 0 {
            return Err(DomainError::Validation("amount must be greater than 0".into()));
        }
        let change =
            CreditChange::debit(user_id, TransactionType::Expire, amount, description).clamped();
        let row = self.ledger.apply_credit_change(&change, Utc::now()).await?;
        info!(user_id, expired = -row.amount, "credits expired");
        Ok(row)
    }

    pub async fn get_transactions(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<Page<CreditTransactionResponse>, DomainError> {
        page.validate()?;
        let (rows, total) = self.ledger.list_transactions(user_id, page).await?;
        Ok(Page::new(rows.iter().map(Into::into).collect(), total, page))
    }

    pub async fn get_credit_statistics(
        &self,
        user_id: i64,
    ) -> Result<CreditStatisticsResponse, DomainError> {
        let user = self.user(user_id).await?;
        let totals = self.ledger.credit_totals(user_id).await?;
        let sum = |kind: TransactionType| {
            totals
                .iter()
                .filter(|(t, _)| *t == kind)
                .map(|(_, n)| *n)
                .sum::<i64>()
        };
        let (recharge_amount, recharge_count) = self.orders.paid_recharge_totals(user_id).await?;
        Ok(CreditStatisticsResponse {
            total_recharge: sum(TransactionType::Recharge),
            total_consume: sum(TransactionType::Consume),
            total_reward: sum(TransactionType::Reward),
            total_refund: sum(TransactionType::Refund),
            total_expire: sum(TransactionType::Expire),
            current_balance: user.credits,
            recharge_amount,
            recharge_count,
        })
    }

    /// Every ledger row of the user, oldest first.
    pub async fn full_ledger(&self, user_id: i64) -> Result<Vec<CreditTransaction>, DomainError> {
        self.user(user_id).await?;
        self.ledger.ledger(user_id).await
    }

    /// Walks the user's ledger and checks that the rows chain up to the stored balance.
    pub async fn verify_ledger(&self, user_id: i64) -> Result<bool, DomainError> {
        let user = self.user(user_id).await?;
        let rows = self.ledger.ledger(user_id).await?;
        let consistent = ledger_chains(&rows, user.credits);
        if !consistent {
            warn!(user_id, rows = rows.len(), "ledger does not chain to the stored balance");
        }
        Ok(consistent)
    }
}

/// Each row adds up, starts where the previous one ended, and the last ends at `balance`.
fn ledger_chains(rows: &[CreditTransaction], balance: i64) -> bool {
    let mut expected_before = 0;
    for row in rows {
        if row.balance_before != expected_before
            || row.balance_after != row.balance_before + row.amount
            || row.balance_after < 0
        {
            return false;
        }
        expected_before = row.balance_after;
    }
    expected_before == balance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(before: i64, amount: i64) -> CreditTransaction {
        CreditTransaction {
            id: 0,
            user_id: 1,
            transaction_type: TransactionType::Recharge,
            amount,
            balance_before: before,
            balance_after: before + amount,
            description: None,
            related_id: None,
            related_type: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_ledger_chains() {
        let rows = vec![row(0, 100), row(100, -30), row(70, 5)];
        assert!(ledger_chains(&rows, 75));
        assert!(!ledger_chains(&rows, 70));
        assert!(ledger_chains(&[], 0));
    }

    #[test]
    fn test_ledger_gap_detected() {
        let rows = vec![row(0, 100), row(90, -30)];
        assert!(!ledger_chains(&rows, 60));
    }
}
