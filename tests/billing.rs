mod common;

use common::{callback, harness};
use creditops::domain::{
    CouponStatus, CouponType, DiscountType, DomainError, PaymentStatus, TransactionType,
};
use creditops::schemas::PageRequest;
use chrono::{Duration, Utc};
use creditops::ports::UserStore;
use creditops::schemas::credit::{
    ConsumeCreditsRequest, CreditTransactionCreate, MembershipOrderCreate, RechargeOrderCreate,
};
use std::sync::Arc;

fn recharge(price_id: i64, coupon: Option<&str>) -> RechargeOrderCreate {
    RechargeOrderCreate {
        price_id,
        payment_method: "alipay".into(),
        coupon_code: coupon.map(String::from),
    }
}

#[tokio::test]
async fn test_ledger_chains_through_mixed_movements() {
    let h = harness().await;
    let credit = &h.services.credit;
    let user = h.user("alice").await;

    let grant = CreditTransactionCreate {
        transaction_type: TransactionType::Reward,
        amount: 500,
        description: None,
    };
    credit.add_credits(user.id, &grant, None, None).await.unwrap();
    let spent = credit
        .consume_credits(user.id, &ConsumeCreditsRequest::new(120, "image generation"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!((spent.amount, spent.balance_after), (-120, 380));

    // expiring more than the balance clamps at zero
    let expired = credit.expire_credits(user.id, 1_000, "yearly sweep").await.unwrap();
    assert_eq!(expired.amount, -380);
    assert_eq!(expired.balance_after, 0);

    assert!(credit.verify_ledger(user.id).await.unwrap());
    assert_eq!(credit.full_ledger(user.id).await.unwrap().len(), 3);

    let stats = credit.get_credit_statistics(user.id).await.unwrap();
    assert_eq!(stats.total_reward, 500);
    assert_eq!(stats.total_consume, 120);
    assert_eq!(stats.total_expire, 380);
    assert_eq!(stats.current_balance, 0);
}

#[tokio::test]
async fn test_consume_more_than_balance_is_rejected() {
    let h = harness().await;
    let user = h.user("bob").await;
    let err = h
        .services
        .credit
        .consume_credits(user.id, &ConsumeCreditsRequest::new(1, "chat"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DomainError::InsufficientCredits { balance: 0, required: 1 }
    ));
    assert!(h.services.credit.full_ledger(user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_debit_kinds_cannot_be_granted() {
    let h = harness().await;
    let user = h.user("carol").await;
    let req = CreditTransactionCreate {
        transaction_type: TransactionType::Consume,
        amount: 10,
        description: None,
    };
    let err = h
        .services
        .credit
        .add_credits(user.id, &req, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_consumption_never_overdraws() {
    let h = harness().await;
    let user = h.user("dave").await;
    let credit = Arc::clone(&h.services.credit);
    let grant = CreditTransactionCreate {
        transaction_type: TransactionType::Recharge,
        amount: 100,
        description: None,
    };
    credit.add_credits(user.id, &grant, None, None).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..10 {
        let credit = Arc::clone(&credit);
        let user_id = user.id;
        tasks.push(tokio::spawn(async move {
            credit
                .consume_credits(user_id, &ConsumeCreditsRequest::new(30, format!("job {}", i)))
                .await
        }));
    }
    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => ok += 1,
            Err(DomainError::InsufficientCredits { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(ok, 3);
    assert_eq!(credit.get_user_balance(user.id).await.unwrap().credits, 10);
    assert!(credit.verify_ledger(user.id).await.unwrap());
}

#[tokio::test]
async fn test_recharge_callback_is_idempotent() {
    let h = harness().await;
    let user = h.user("erin").await;
    let price = h.credit_package(1_000, 100, 10).await;
    let order = h
        .services
        .recharge
        .create_recharge_order(user.id, &recharge(price.id, None))
        .await
        .unwrap();
    assert!(order.order_no.starts_with('R'));
    assert_eq!(order.payment_status, PaymentStatus::Pending);

    let err = h
        .services
        .recharge
        .process_recharge_callback(&callback(&order.order_no, 999, "paid"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let paid = callback(&order.order_no, 1_000, "paid");
    assert!(h.services.recharge.process_recharge_callback(&paid).await.unwrap());
    assert!(h.services.recharge.process_recharge_callback(&paid).await.unwrap());

    let balance = h.services.credit.get_user_balance(user.id).await.unwrap();
    assert_eq!(balance.credits, 110);
    assert_eq!(h.services.credit.full_ledger(user.id).await.unwrap().len(), 1);

    let status = h
        .services
        .recharge
        .get_payment_status(&order.order_no)
        .await
        .unwrap();
    assert_eq!(status.payment_status, PaymentStatus::Paid);
    assert!(status.paid_at.is_some());
}

#[tokio::test]
async fn test_failed_order_cannot_be_paid_later() {
    let h = harness().await;
    let user = h.user("frank").await;
    let price = h.credit_package(500, 50, 0).await;
    let order = h
        .services
        .recharge
        .create_recharge_order(user.id, &recharge(price.id, None))
        .await
        .unwrap();

    let closed = h
        .services
        .recharge
        .process_recharge_callback(&callback(&order.order_no, 0, "failed"))
        .await
        .unwrap();
    assert!(!closed);

    let err = h
        .services
        .recharge
        .process_recharge_callback(&callback(&order.order_no, 500, "paid"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));
    assert_eq!(h.services.credit.get_user_balance(user.id).await.unwrap().credits, 0);
}

#[tokio::test]
async fn test_inactive_package_cannot_be_ordered() {
    let h = harness().await;
    let user = h.user("gina").await;
    let price = h.credit_package(500, 50, 0).await;
    h.services.prices.delete_credit_price(price.id).await.unwrap();
    assert!(h.services.prices.list_credit_prices().await.unwrap().is_empty());
    let err = h
        .services
        .recharge
        .create_recharge_order(user.id, &recharge(price.id, None))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));
}

#[tokio::test]
async fn test_cancel_order_checks_owner_and_state() {
    let h = harness().await;
    let owner = h.user("hana").await;
    let other = h.user("ivan").await;
    let price = h.credit_package(500, 50, 0).await;
    let order = h
        .services
        .recharge
        .create_recharge_order(owner.id, &recharge(price.id, None))
        .await
        .unwrap();

    let err = h
        .services
        .recharge
        .cancel_order(other.id, &order.order_no)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));

    h.services.recharge.cancel_order(owner.id, &order.order_no).await.unwrap();
    let err = h
        .services
        .recharge
        .cancel_order(owner.id, &order.order_no)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));
}

#[tokio::test]
async fn test_membership_purchases_stack_and_make_consumption_free() {
    let h = harness().await;
    let user = h.user("jane").await;
    let plan = h.membership_plan(3_000, 30).await;
    let req = MembershipOrderCreate {
        price_id: plan.id,
        payment_method: "wechat".into(),
        coupon_code: None,
    };

    for _ in 0..2 {
        let order = h
            .services
            .membership
            .create_membership_order(user.id, &req)
            .await
            .unwrap();
        assert!(order.order_no.starts_with('M'));
        assert_eq!(order.duration_days, 30);
        assert_eq!(order.discount_amount, 1_000);
        let paid = callback(&order.order_no, 3_000, "paid");
        assert!(h.services.membership.process_membership_callback(&paid).await.unwrap());
    }

    let stats = h
        .services
        .membership
        .get_membership_statistics(user.id)
        .await
        .unwrap();
    assert!(stats.is_member);
    assert_eq!(stats.total_orders, 2);
    assert_eq!(stats.total_amount, 6_000);
    assert_eq!(stats.days_remaining, Some(60));

    let charged = h
        .services
        .credit
        .consume_credits(user.id, &ConsumeCreditsRequest::new(50, "chat"))
        .await
        .unwrap();
    assert!(charged.is_none());
}

#[tokio::test]
async fn test_lapsed_membership_is_cleared_and_charged_again() {
    let h = harness().await;
    let user = h.user("lapsed").await;
    let grant = CreditTransactionCreate {
        transaction_type: TransactionType::Reward,
        amount: 100,
        description: None,
    };
    h.services.credit.add_credits(user.id, &grant, None, None).await.unwrap();
    h.set_membership_expiry(user.id, Utc::now() - Duration::days(1)).await;

    let balance = h.services.credit.get_user_balance(user.id).await.unwrap();
    assert!(!balance.is_member);
    assert_eq!(balance.member_expired_at, None);
    let stored = h.repo.get_user(user.id).await.unwrap().unwrap();
    assert!(!stored.is_member);
    assert_eq!(stored.member_expired_at, None);

    let spent = h
        .services
        .credit
        .consume_credits(user.id, &ConsumeCreditsRequest::new(30, "chat"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(spent.balance_after, 70);
}

#[tokio::test]
async fn test_stale_lapse_check_does_not_wipe_a_paid_membership() {
    let h = harness().await;
    let user = h.user("renewer").await;
    // the read that judged the membership lapsed happened before the renewal
    let seen_at = Utc::now();
    h.set_membership_expiry(user.id, seen_at - Duration::days(1)).await;

    let plan = h.membership_plan(3_000, 30).await;
    let order = h
        .services
        .membership
        .create_membership_order(
            user.id,
            &MembershipOrderCreate {
                price_id: plan.id,
                payment_method: "wechat".into(),
                coupon_code: None,
            },
        )
        .await
        .unwrap();
    h.services
        .membership
        .process_membership_callback(&callback(&order.order_no, 3_000, "paid"))
        .await
        .unwrap();

    assert!(!h.repo.clear_membership(user.id, seen_at).await.unwrap());
    let balance = h.services.credit.get_user_balance(user.id).await.unwrap();
    assert!(balance.is_member);
    assert!(balance.member_expired_at.is_some_and(|at| at > seen_at + Duration::days(29)));
}

#[tokio::test]
async fn test_discount_coupon_is_reserved_and_released_on_cancel() {
    let h = harness().await;
    let user = h.user("kate").await;
    let price = h.credit_package(1_000, 100, 0).await;
    // 20% off
    let coupon = h
        .services
        .coupons
        .create_coupon(&h.coupon_req(
            "SPRING20",
            CouponType::RechargeDiscount,
            DiscountType::Percent,
            2_000,
        ))
        .await
        .unwrap();
    h.services.coupons.receive_coupon(user.id, "SPRING20").await.unwrap();

    let order = h
        .services
        .recharge
        .create_recharge_order(user.id, &recharge(price.id, Some("SPRING20")))
        .await
        .unwrap();
    assert_eq!(order.amount, 800);
    assert_eq!(order.discount_amount, 200);
    assert_eq!(order.coupon_code.as_deref(), Some("SPRING20"));

    let held = h
        .services
        .coupons
        .list_user_coupons(user.id, None, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(held.items[0].status, CouponStatus::Used);
    assert_eq!(h.services.coupons.get_coupon(coupon.id).await.unwrap().used_quantity, 1);

    // a used coupon cannot back a second order
    let err = h
        .services
        .recharge
        .create_recharge_order(user.id, &recharge(price.id, Some("SPRING20")))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));

    h.services.recharge.cancel_order(user.id, &order.order_no).await.unwrap();
    let held = h
        .services
        .coupons
        .list_user_coupons(user.id, Some(CouponStatus::Unused), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(held.total, 1);
    assert_eq!(h.services.coupons.get_coupon(coupon.id).await.unwrap().used_quantity, 0);

    let err = h
        .services
        .coupons
        .receive_coupon(user.id, "SPRING20")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
}

#[tokio::test]
async fn test_bonus_coupon_adds_credits_not_discount() {
    let h = harness().await;
    let user = h.user("liam").await;
    let price = h.credit_package(1_000, 100, 10).await;
    // 50 bonus credits
    h.services
        .coupons
        .create_coupon(&h.coupon_req(
            "BONUS50",
            CouponType::RechargeBonus,
            DiscountType::Fixed,
            5_000,
        ))
        .await
        .unwrap();
    h.services.coupons.receive_coupon(user.id, "BONUS50").await.unwrap();

    let order = h
        .services
        .recharge
        .create_recharge_order(user.id, &recharge(price.id, Some("BONUS50")))
        .await
        .unwrap();
    assert_eq!(order.amount, 1_000);
    assert_eq!(order.bonus_credits, 60);

    let paid = callback(&order.order_no, 1_000, "paid");
    assert!(h.services.recharge.process_recharge_callback(&paid).await.unwrap());
    assert_eq!(h.services.credit.get_user_balance(user.id).await.unwrap().credits, 160);
}

#[tokio::test]
async fn test_membership_coupon_rejected_on_recharge() {
    let h = harness().await;
    let user = h.user("mia").await;
    let price = h.credit_package(1_000, 100, 0).await;
    h.services
        .coupons
        .create_coupon(&h.coupon_req(
            "VIP10",
            CouponType::MembershipDiscount,
            DiscountType::Fixed,
            1_000,
        ))
        .await
        .unwrap();
    h.services.coupons.receive_coupon(user.id, "VIP10").await.unwrap();
    let err = h
        .services
        .recharge
        .create_recharge_order(user.id, &recharge(price.id, Some("VIP10")))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
}

#[tokio::test]
async fn test_coupon_issuance_is_capped() {
    let h = harness().await;
    let a = h.user("nina").await;
    let b = h.user("omar").await;
    let mut req = h.coupon_req("ONLYONE", CouponType::RechargeDiscount, DiscountType::Fixed, 100);
    req.total_quantity = Some(1);
    h.services.coupons.create_coupon(&req).await.unwrap();
    h.services.coupons.receive_coupon(a.id, "ONLYONE").await.unwrap();
    let err = h
        .services
        .coupons
        .receive_coupon(b.id, "ONLYONE")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
}
