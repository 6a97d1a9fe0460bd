//! Referral use case: codes, sign-up linking and reward settlement.

use crate::domain::{DomainError, ReferralRecord, ReferralStatus, ReferralTrigger, UserAccount, UserRole};
use crate::ports::{ReferralStore, UserStore};
use crate::schemas::operation::{
    ReferralCodeResponse, ReferralRecordResponse, ReferralStatisticsResponse,
};
use crate::schemas::{Page, PageRequest, require_max_len, require_non_empty};
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use tracing::{info, warn};

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CODE_LEN: usize = 8;
const CODE_ATTEMPTS: usize = 10;

/// Reward terms applied to new referrals.
#[derive(Debug, Clone)]
pub struct ReferralPolicy {
    pub base_url: String,
    pub reward_credits: i64,
    pub trigger: ReferralTrigger,
}

pub struct ReferralService {
    users: Arc<dyn UserStore>,
    referrals: Arc<dyn ReferralStore>,
    policy: ReferralPolicy,
}

fn random_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

impl ReferralService {
    pub fn new(
        users: Arc<dyn UserStore>,
        referrals: Arc<dyn ReferralStore>,
        policy: ReferralPolicy,
    ) -> Self {
        Self {
            users,
            referrals,
            policy,
        }
    }

    fn link(&self, code: &str) -> ReferralCodeResponse {
        ReferralCodeResponse {
            referral_code: code.to_string(),
            referral_url: format!("{}?ref={}", self.policy.base_url, code),
        }
    }

    async fn user(&self, user_id: i64) -> Result<UserAccount, DomainError> {
        self.users
            .get_user(user_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("user {}", user_id)))
    }

    /// Returns the user's code, minting one on first call.
    pub async fn generate_referral_code(
        &self,
        user_id: i64,
    ) -> Result<ReferralCodeResponse, DomainError> {
        let user = self.user(user_id).await?;
        if let Some(code) = &user.referral_code {
            return Ok(self.link(code));
        }
        for attempt in 1..=CODE_ATTEMPTS {
            let code = random_code();
            if self.users.assign_referral_code(user_id, &code).await? {
                info!(user_id, attempt, "referral code assigned");
                return Ok(self.link(&code));
            }
            // Either the code collided or a concurrent call already set one.
            if let Some(existing) = self.user(user_id).await?.referral_code {
                return Ok(self.link(&existing));
            }
        }
        Err(DomainError::Conflict(format!(
            "could not find a free referral code after {} attempts",
            CODE_ATTEMPTS
        )))
    }

    pub async fn get_referral_code(&self, user_id: i64) -> Result<ReferralCodeResponse, DomainError> {
        let user = self.user(user_id).await?;
        user.referral_code
            .as_deref()
            .map(|code| self.link(code))
            .ok_or_else(|| DomainError::NotFound(format!("user {} has no referral code", user_id)))
    }

    /// Creates a user, linking the referrer when a code is given.
    pub async fn register_user(
        &self,
        username: &str,
        referral_code: Option<&str>,
    ) -> Result<UserAccount, DomainError> {
        let username = username.trim();
        require_non_empty("username", username)?;
        require_max_len("username", username, 50)?;

        let referrer = match referral_code.map(str::trim).filter(|c| !c.is_empty()) {
            Some(code) => Some(
                self.users
                    .find_user_by_referral_code(code)
                    .await?
                    .ok_or_else(|| DomainError::Validation(format!("unknown referral code {}", code)))?,
            ),
            None => None,
        };
        let now = Utc::now();
        let user = self
            .users
            .create_user(username, UserRole::User, referrer.as_ref().map(|r| r.id), now)
            .await?;
        info!(user_id = user.id, referred = referrer.is_some(), "user registered");

        if let Some(referrer) = referrer {
            let code = referrer.referral_code.clone().unwrap_or_default();
            let record = self
                .referrals
                .insert_referral(
                    referrer.id,
                    user.id,
                    &code,
                    self.policy.trigger,
                    self.policy.reward_credits,
                    now,
                )
                .await?;
            if self.policy.trigger == ReferralTrigger::Register {
                self.referrals.settle_referral(record.id, None, now).await?;
            }
        }
        Ok(user)
    }

    /// Settles the referee's pending referral for `trigger`. No-op when none is pending.
    pub async fn settle_referral(
        &self,
        referee_id: i64,
        trigger: ReferralTrigger,
        trigger_amount: Option<i64>,
    ) -> Result<Option<ReferralRecord>, DomainError> {
        let Some(pending) = self
            .referrals
            .find_pending_referral(referee_id, trigger)
            .await?
        else {
            return Ok(None);
        };
        self.referrals
            .settle_referral(pending.id, trigger_amount, Utc::now())
            .await
    }

    /// Settlement after a payment. The payment is already committed, so failures are logged only.
    pub async fn settle_after_payment(
        &self,
        referee_id: i64,
        trigger: ReferralTrigger,
        amount: i64,
    ) {
        if let Err(e) = self.settle_referral(referee_id, trigger, Some(amount)).await {
            warn!(referee_id, trigger = %trigger, error = %e, "referral settlement failed");
        }
    }

    pub async fn get_referral_records(
        &self,
        referrer_id: i64,
        page: PageRequest,
    ) -> Result<Page<ReferralRecordResponse>, DomainError> {
        page.validate()?;
        let (items, total) = self.referrals.list_referrals(referrer_id, page).await?;
        Ok(Page::new(items.iter().map(Into::into).collect(), total, page))
    }

    pub async fn get_referral_statistics(
        &self,
        referrer_id: i64,
    ) -> Result<ReferralStatisticsResponse, DomainError> {
        self.referrals.referral_totals(referrer_id).await
    }

    pub async fn cancel_referral(&self, record_id: i64) -> Result<(), DomainError> {
        let record = self
            .referrals
            .get_referral(record_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("referral {}", record_id)))?;
        if record.status != ReferralStatus::Pending
            || !self.referrals.cancel_referral(record_id, Utc::now()).await?
        {
            return Err(DomainError::InvalidState(format!(
                "referral {} is {}",
                record_id, record.status
            )));
        }
        info!(record_id, "referral cancelled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_code_shape() {
        for _ in 0..50 {
            let code = random_code();
            assert_eq!(code.len(), CODE_LEN);
            assert!(code.bytes().all(|b| CODE_CHARSET.contains(&b)));
        }
    }
}
