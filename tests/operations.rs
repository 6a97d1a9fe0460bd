mod common;

use chrono::{Datelike, Duration, Utc, Weekday};
use common::{callback, harness, harness_with};
use creditops::domain::{
    ActivityStatus, ActivityType, CouponType, DiscountType, DomainError, ReferralStatus,
    ReferralTrigger,
};
use creditops::schemas::PageRequest;
use creditops::schemas::credit::RechargeOrderCreate;
use creditops::schemas::operation::{ActivityCreate, ActivityUpdate, StatType, StatisticsQuery};
use serde_json::json;

fn activity_req(kind: ActivityType, rules: serde_json::Value) -> ActivityCreate {
    let now = Utc::now();
    ActivityCreate {
        title: "Launch week".into(),
        activity_type: kind,
        description: None,
        rules: Some(rules),
        start_time: now - Duration::hours(1),
        end_time: now + Duration::days(7),
        target_users: None,
        max_participants: None,
        budget: None,
    }
}

fn activate() -> ActivityUpdate {
    ActivityUpdate {
        status: Some(ActivityStatus::Active),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_referral_settles_on_first_recharge_only() {
    let h = harness().await;
    let referrer = h.user("ref").await;
    let link = h
        .services
        .referrals
        .generate_referral_code(referrer.id)
        .await
        .unwrap();
    assert_eq!(link.referral_code.len(), 8);
    assert!(link.referral_url.ends_with(&format!("?ref={}", link.referral_code)));
    // generating again keeps the code
    let again = h
        .services
        .referrals
        .generate_referral_code(referrer.id)
        .await
        .unwrap();
    assert_eq!(again.referral_code, link.referral_code);

    let referee = h
        .services
        .referrals
        .register_user("newbie", Some(&link.referral_code))
        .await
        .unwrap();
    assert_eq!(referee.referred_by, Some(referrer.id));
    let stats = h
        .services
        .referrals
        .get_referral_statistics(referrer.id)
        .await
        .unwrap();
    assert_eq!((stats.total_referrals, stats.pending_referrals), (1, 1));

    let price = h.credit_package(1_000, 100, 0).await;
    let req = RechargeOrderCreate {
        price_id: price.id,
        payment_method: "alipay".into(),
        coupon_code: None,
    };
    for _ in 0..2 {
        let order = h
            .services
            .recharge
            .create_recharge_order(referee.id, &req)
            .await
            .unwrap();
        h.services
            .recharge
            .process_recharge_callback(&callback(&order.order_no, 1_000, "paid"))
            .await
            .unwrap();
    }

    let balance = h.services.credit.get_user_balance(referrer.id).await.unwrap();
    assert_eq!(balance.credits, 100);
    let records = h
        .services
        .referrals
        .get_referral_records(referrer.id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(records.total, 1);
    assert_eq!(records.items[0].status, ReferralStatus::Settled);
    assert_eq!(records.items[0].trigger_amount, Some(1_000));
}

#[tokio::test]
async fn test_register_trigger_settles_immediately() {
    let h = harness_with(ReferralTrigger::Register, true).await;
    let referrer = h.user("ref").await;
    let code = h
        .services
        .referrals
        .generate_referral_code(referrer.id)
        .await
        .unwrap()
        .referral_code;
    h.services
        .referrals
        .register_user("friend", Some(&code))
        .await
        .unwrap();
    let balance = h.services.credit.get_user_balance(referrer.id).await.unwrap();
    assert_eq!(balance.credits, 100);
}

#[tokio::test]
async fn test_registration_rejects_bad_input() {
    let h = harness().await;
    let err = h
        .services
        .referrals
        .register_user("someone", Some("NOPE0000"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let err = h.services.referrals.register_user("   ", None).await.unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    h.user("taken").await;
    let err = h.services.referrals.register_user("taken", None).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
}

#[tokio::test]
async fn test_reusing_the_referrer_name_records_no_referral() {
    let h = harness().await;
    let referrer = h.user("ref").await;
    let code = h
        .services
        .referrals
        .generate_referral_code(referrer.id)
        .await
        .unwrap()
        .referral_code;
    let err = h
        .services
        .referrals
        .register_user("ref", Some(&code))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
    let records = h
        .services
        .referrals
        .get_referral_records(referrer.id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(records.total, 0);
}

#[tokio::test]
async fn test_cancel_referral_only_while_pending() {
    let h = harness().await;
    let referrer = h.user("ref").await;
    let code = h
        .services
        .referrals
        .generate_referral_code(referrer.id)
        .await
        .unwrap()
        .referral_code;
    h.services
        .referrals
        .register_user("friend", Some(&code))
        .await
        .unwrap();
    let records = h
        .services
        .referrals
        .get_referral_records(referrer.id, PageRequest::default())
        .await
        .unwrap();
    let id = records.items[0].id;

    h.services.referrals.cancel_referral(id).await.unwrap();
    let err = h.services.referrals.cancel_referral(id).await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));
}

#[tokio::test]
async fn test_credit_gift_respects_budget_and_duplicates() {
    let h = harness().await;
    let mut req = activity_req(ActivityType::CreditGift, json!({ "credits": 50 }));
    req.budget = Some(100);
    let activity = h
        .services
        .activities
        .create_activity(&req, None)
        .await
        .unwrap();
    assert_eq!(activity.status, ActivityStatus::Draft);

    let a = h.user("a").await;
    let err = h
        .services
        .activities
        .participate(activity.id, a.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));

    h.services
        .activities
        .update_activity(activity.id, activate())
        .await
        .unwrap();

    let joined = h.services.activities.participate(activity.id, a.id).await.unwrap();
    assert_eq!(joined.reward_type.as_deref(), Some("credits"));
    assert_eq!(joined.reward_amount, Some(50));
    assert_eq!(h.services.credit.get_user_balance(a.id).await.unwrap().credits, 50);

    let err = h
        .services
        .activities
        .participate(activity.id, a.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));

    let b = h.user("b").await;
    h.services.activities.participate(activity.id, b.id).await.unwrap();
    let c = h.user("c").await;
    let err = h
        .services
        .activities
        .participate(activity.id, c.id)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));

    let stored = h.services.activities.get_activity(activity.id).await.unwrap();
    assert_eq!((stored.current_participants, stored.cost), (2, 100));
    let participants = h
        .services
        .activities
        .get_participations(activity.id, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(participants.total, 2);

    let err = h.services.activities.delete_activity(activity.id).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
}

#[tokio::test]
async fn test_coupon_activity_issues_coupon() {
    let h = harness().await;
    h.services
        .coupons
        .create_coupon(&h.coupon_req(
            "WELCOME",
            CouponType::RechargeDiscount,
            DiscountType::Fixed,
            200,
        ))
        .await
        .unwrap();
    let activity = h
        .services
        .activities
        .create_activity(
            &activity_req(ActivityType::Coupon, json!({ "coupon_code": "WELCOME" })),
            None,
        )
        .await
        .unwrap();
    h.services
        .activities
        .update_activity(activity.id, activate())
        .await
        .unwrap();

    let user = h.user("coupon_fan").await;
    let joined = h.services.activities.participate(activity.id, user.id).await.unwrap();
    assert_eq!(joined.reward_type.as_deref(), Some("coupon"));
    let held = h
        .services
        .coupons
        .list_user_coupons(user.id, None, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(held.total, 1);
    assert_eq!(held.items[0].coupon.code, "WELCOME");
}

#[tokio::test]
async fn test_ended_activity_cannot_reopen() {
    let h = harness().await;
    let activity = h
        .services
        .activities
        .create_activity(&activity_req(ActivityType::CreditGift, json!({ "credits": 5 })), None)
        .await
        .unwrap();
    let end = ActivityUpdate {
        status: Some(ActivityStatus::Ended),
        ..Default::default()
    };
    h.services.activities.update_activity(activity.id, end).await.unwrap();
    let err = h
        .services
        .activities
        .update_activity(activity.id, activate())
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));

    h.services.activities.delete_activity(activity.id).await.unwrap();
    let err = h.services.activities.get_activity(activity.id).await.unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));
}

#[tokio::test]
async fn test_statistics_buckets_and_dashboard() {
    let h = harness().await;
    let a = h.user("stat_a").await;
    h.user("stat_b").await;
    let price = h.credit_package(1_000, 100, 0).await;
    let order = h
        .services
        .recharge
        .create_recharge_order(
            a.id,
            &RechargeOrderCreate {
                price_id: price.id,
                payment_method: "wechat".into(),
                coupon_code: None,
            },
        )
        .await
        .unwrap();
    h.services
        .recharge
        .process_recharge_callback(&callback(&order.order_no, 1_000, "paid"))
        .await
        .unwrap();

    let today = Utc::now().date_naive();
    let day = h.services.statistics.daily_statistics(today).await.unwrap();
    assert_eq!(day.new_users, 2);
    assert_eq!((day.recharge_amount, day.recharge_count), (1_000, 1));
    assert_eq!(day.credits_recharged, 100);
    assert_eq!(day.stat_date, Some(today));

    let weekly = h
        .services
        .statistics
        .get_operation_statistics(&StatisticsQuery {
            start_date: today - Duration::days(20),
            end_date: today,
            stat_type: StatType::Weekly,
        })
        .await
        .unwrap();
    assert!(weekly.len() >= 3);
    assert!(weekly.iter().all(|b| b.stat_date.weekday() == Weekday::Mon));
    assert_eq!(weekly.iter().map(|b| b.figures.new_users).sum::<i64>(), 2);

    let monthly = h
        .services
        .statistics
        .get_operation_statistics(&StatisticsQuery {
            start_date: today - Duration::days(40),
            end_date: today,
            stat_type: StatType::Monthly,
        })
        .await
        .unwrap();
    assert!(monthly.iter().all(|b| b.stat_date.day() == 1));
    assert_eq!(monthly.iter().map(|b| b.figures.recharge_amount).sum::<i64>(), 1_000);

    let err = h
        .services
        .statistics
        .get_operation_statistics(&StatisticsQuery {
            start_date: today,
            end_date: today - Duration::days(1),
            stat_type: StatType::Daily,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let dashboard = h.services.statistics.get_dashboard().await.unwrap();
    assert_eq!(dashboard.total_users, 2);
    assert_eq!(dashboard.total_revenue, 1_000);
    assert_eq!(dashboard.trend.len(), 7);
    assert_eq!(dashboard.trend.last().map(|p| p.revenue), Some(1_000));
}
