//! Campaign administration and participation.

use crate::domain::{
    Activity, ActivityParticipation, ActivityStatus, ActivityType, DomainError, Reward,
};
use crate::ports::{ActivityStore, CouponStore, UserStore};
use crate::schemas::operation::{
    ActivityCreate, ActivityParticipationResponse, ActivityQuery, ActivityResponse,
    ActivityUpdate,
};
use crate::schemas::{Page, PageRequest};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

pub struct ActivityService {
    activities: Arc<dyn ActivityStore>,
    coupons: Arc<dyn CouponStore>,
    users: Arc<dyn UserStore>,
}

impl ActivityService {
    pub fn new(
        activities: Arc<dyn ActivityStore>,
        coupons: Arc<dyn CouponStore>,
        users: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            activities,
            coupons,
            users,
        }
    }

    /// New activities start as drafts.
    pub async fn create_activity(
        &self,
        req: &ActivityCreate,
        creator_id: Option<i64>,
    ) -> Result<Activity, DomainError> {
        req.validate()?;
        let now = Utc::now();
        let draft = Activity {
            id: 0,
            title: req.title.trim().to_string(),
            activity_type: req.activity_type,
            status: ActivityStatus::Draft,
            description: req.description.clone(),
            rules: req.rules.clone(),
            start_time: req.start_time,
            end_time: req.end_time,
            target_users: req.target_users.clone(),
            max_participants: req.max_participants,
            current_participants: 0,
            budget: req.budget,
            cost: 0,
            created_by: creator_id,
            created_at: now,
            updated_at: now,
        };
        let activity = self.activities.insert_activity(&draft).await?;
        info!(activity_id = activity.id, kind = %activity.activity_type, "activity created");
        Ok(activity)
    }

    pub async fn update_activity(
        &self,
        id: i64,
        req: ActivityUpdate,
    ) -> Result<Activity, DomainError> {
        req.validate()?;
        let mut activity = self.get_activity(id).await?;
        let before = activity.status;
        req.apply(&mut activity)?;
        activity.updated_at = Utc::now();
        self.activities.save_activity(&activity).await?;
        if before != activity.status {
            info!(activity_id = id, from = %before, to = %activity.status, "activity status changed");
        }
        Ok(activity)
    }

    pub async fn get_activity(&self, id: i64) -> Result<Activity, DomainError> {
        self.activities
            .get_activity(id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("activity {}", id)))
    }

    pub async fn list_activities(
        &self,
        query: &ActivityQuery,
    ) -> Result<Page<ActivityResponse>, DomainError> {
        query.page.validate()?;
        let (items, total) = self
            .activities
            .list_activities(query.status, query.activity_type, query.page)
            .await?;
        Ok(Page::new(items.iter().map(Into::into).collect(), total, query.page))
    }

    /// Only activities nobody has joined can be deleted.
    pub async fn delete_activity(&self, id: i64) -> Result<(), DomainError> {
        if !self.activities.delete_activity(id).await? {
            return Err(DomainError::NotFound(format!("activity {}", id)));
        }
        info!(activity_id = id, "activity deleted");
        Ok(())
    }

    pub async fn participate(
        &self,
        activity_id: i64,
        user_id: i64,
    ) -> Result<ActivityParticipation, DomainError> {
        let activity = self.get_activity(activity_id).await?;
        self.users
            .get_user(user_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("user {}", user_id)))?;
        let now = Utc::now();
        if !activity.is_running(now) {
            return Err(DomainError::InvalidState(format!(
                "activity {} is not running",
                activity_id
            )));
        }
        let reward = self.reward_for(&activity, now).await?;
        debug!(activity_id, user_id, reward = ?reward, "recording participation");
        let participation = self
            .activities
            .record_participation(activity_id, user_id, &reward, now)
            .await?;
        info!(
            activity_id,
            user_id,
            reward = reward.reward_type().unwrap_or("none"),
            "user joined activity"
        );
        Ok(participation)
    }

    async fn reward_for(&self, activity: &Activity, now: DateTime<Utc>) -> Result<Reward, DomainError> {
        match activity.activity_type {
            ActivityType::CreditGift => match activity.rule_credits() {
                n if n > 0 => Ok(Reward::Credits(n)),
                _ => Ok(Reward::None),
            },
            ActivityType::Coupon => {
                let Some(code) = activity.rule_coupon_code() else {
                    return Err(DomainError::Validation(format!(
                        "activity {} has no coupon_code rule",
                        activity.id
                    )));
                };
                let coupon = self
                    .coupons
                    .find_coupon_by_code(code)
                    .await?
                    .ok_or_else(|| DomainError::NotFound(format!("coupon {}", code)))?;
                if !coupon.is_valid_at(now) {
                    return Err(DomainError::InvalidState(format!(
                        "coupon {} is not available",
                        coupon.code
                    )));
                }
                Ok(Reward::Coupon {
                    coupon_id: coupon.id,
                    code: coupon.code,
                })
            }
            ActivityType::RechargeBonus | ActivityType::Referral => Ok(Reward::None),
        }
    }

    pub async fn get_participations(
        &self,
        activity_id: i64,
        page: PageRequest,
    ) -> Result<Page<ActivityParticipationResponse>, DomainError> {
        page.validate()?;
        self.get_activity(activity_id).await?;
        let (items, total) = self.activities.list_participations(activity_id, page).await?;
        Ok(Page::new(items.iter().map(Into::into).collect(), total, page))
    }
}
