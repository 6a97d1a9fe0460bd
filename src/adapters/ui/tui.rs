//! Implements InputPort. Inquire-based operator console.
//!
//! Each menu maps onto one use case call. Business errors are printed and the menu
//! continues; Esc backs out of a prompt.

use crate::adapters::export::export_transactions_csv;
use crate::adapters::ui::progress;
use crate::domain::{
    ActivityStatus, ActivityType, CouponType, DiscountType, DomainError, MembershipType,
    OAuthCredentials, PaymentStatus, TransactionType, UsageStatus, format_cents, parse_cents,
};
use crate::ports::InputPort;
use crate::schemas::PageRequest;
use crate::schemas::credit::{
    ConsumeCreditsRequest, CreditPriceCreate, CreditTransactionCreate, MembershipOrderCreate,
    MembershipPriceCreate, PAYMENT_METHODS, PaymentCallbackRequest, RechargeOrderCreate,
};
use crate::schemas::oauth::{OAuthAuthorizeRequest, OAuthUsageLogCreate};
use crate::schemas::operation::{
    ActivityCreate, ActivityQuery, ActivityUpdate, CouponCalculateRequest, CouponCreate,
    CouponQuery, StatType, StatisticsQuery,
};
use crate::usecases::Services;
use async_trait::async_trait;
use chrono::{Duration, NaiveDate, Utc};
use inquire::{Confirm, CustomType, InquireError, Select, Text};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::warn;

const MENU_USERS: &str = "Users & credits";
const MENU_ORDERS: &str = "Orders & payments";
const MENU_PRICES: &str = "Price packages";
const MENU_ACTIVITIES: &str = "Activities";
const MENU_COUPONS: &str = "Coupons";
const MENU_REFERRALS: &str = "Referrals";
const MENU_STATS: &str = "Statistics";
const MENU_OAUTH: &str = "OAuth accounts";
const MENU_EXIT: &str = "Exit";
const BACK: &str = "Back";

/// `None` when the operator pressed Esc.
fn answer<T>(result: Result<T, InquireError>) -> Result<Option<T>, DomainError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(InquireError::OperationCanceled) => Ok(None),
        Err(e) => Err(DomainError::Ui(e.to_string())),
    }
}

fn choose(title: &str, options: &[&'static str]) -> Result<Option<&'static str>, DomainError> {
    answer(Select::new(title, options.to_vec()).prompt())
}

fn text(prompt: &str) -> Result<Option<String>, DomainError> {
    answer(Text::new(prompt).prompt()).map(|v| v.map(|s| s.trim().to_string()))
}

fn optional_text(prompt: &str) -> Result<Option<String>, DomainError> {
    Ok(text(prompt)?.filter(|s| !s.is_empty()))
}

fn number(prompt: &str) -> Result<Option<i64>, DomainError> {
    answer(CustomType::<i64>::new(prompt).prompt())
}

fn money(prompt: &str) -> Result<Option<i64>, DomainError> {
    match text(prompt)? {
        Some(s) => parse_cents(&s).map(Some),
        None => Ok(None),
    }
}

fn date(prompt: &str, default: NaiveDate) -> Result<Option<NaiveDate>, DomainError> {
    answer(
        CustomType::<NaiveDate>::new(prompt)
            .with_default(default)
            .with_help_message("YYYY-MM-DD")
            .prompt(),
    )
}

fn pick<T: Copy + std::fmt::Display>(prompt: &str, all: &[T]) -> Result<Option<T>, DomainError> {
    let labels: Vec<String> = all.iter().map(ToString::to_string).collect();
    let chosen = answer(Select::new(prompt, labels.clone()).prompt())?;
    Ok(chosen.and_then(|c| labels.iter().position(|l| *l == c).map(|i| all[i])))
}

/// Parses `a=1; b=2` (as copied from browser dev tools) into a cookie map.
pub fn parse_cookie_header(header: &str) -> BTreeMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Leaves the current menu when a prompt is cancelled.
macro_rules! or_back {
    ($e:expr) => {
        match $e? {
            Some(v) => v,
            None => return Ok(()),
        }
    };
}

/// TUI adapter over the wired use cases.
pub struct TuiInputPort {
    services: Services,
    admin_user_id: i64,
    export_dir: PathBuf,
    page_size: i64,
}

impl TuiInputPort {
    pub fn new(services: Services, admin_user_id: i64, export_dir: PathBuf, page_size: i64) -> Self {
        Self {
            services,
            admin_user_id,
            export_dir,
            page_size,
        }
    }

    fn page(&self) -> PageRequest {
        PageRequest::new(0, self.page_size)
    }

    async fn users_menu(&self) -> Result<(), DomainError> {
        let options = [
            "Register user",
            "Show balance",
            "Consume credits",
            "Grant credits",
            "Expire credits",
            "Transactions",
            "Credit statistics",
            "Verify ledger",
            "Export ledger to CSV",
            BACK,
        ];
        let choice = or_back!(choose("Users & credits", &options));
        let svc = &self.services;
        match choice {
            "Register user" => {
                let name = or_back!(text("Username:"));
                let code = optional_text("Referral code (optional):")?;
                let user = svc.referrals.register_user(&name, code.as_deref()).await?;
                println!("Created user #{} {}", user.id, user.username);
            }
            "Show balance" => {
                let user_id = or_back!(number("User id:"));
                let b = svc.credit.get_user_balance(user_id).await?;
                match b.member_expired_at {
                    Some(at) => println!("{} credits, member until {}", b.credits, at),
                    None => println!("{} credits, not a member", b.credits),
                }
            }
            "Consume credits" => {
                let user_id = or_back!(number("User id:"));
                let amount = or_back!(number("Amount:"));
                let description = or_back!(text("Description:"));
                let req = ConsumeCreditsRequest::new(amount, description);
                match svc.credit.consume_credits(user_id, &req).await? {
                    Some(row) => println!("Charged {}, balance {}", -row.amount, row.balance_after),
                    None => println!("Member: nothing charged"),
                }
            }
            "Grant credits" => {
                let user_id = or_back!(number("User id:"));
                let kind = or_back!(pick(
                    "Kind:",
                    &[TransactionType::Reward, TransactionType::Refund, TransactionType::Recharge]
                ));
                let amount = or_back!(number("Amount:"));
                let description = optional_text("Description (optional):")?;
                let req = CreditTransactionCreate {
                    transaction_type: kind,
                    amount,
                    description,
                };
                let row = svc.credit.add_credits(user_id, &req, None, Some("manual")).await?;
                println!("Balance now {}", row.balance_after);
            }
            "Expire credits" => {
                let user_id = or_back!(number("User id:"));
                let amount = or_back!(number("Amount:"));
                let row = svc.credit.expire_credits(user_id, amount, "Expired by operator").await?;
                println!("Expired {}, balance {}", -row.amount, row.balance_after);
            }
            "Transactions" => {
                let user_id = or_back!(number("User id:"));
                let page = svc.credit.get_transactions(user_id, self.page()).await?;
                println!("{} transactions (showing {})", page.total, page.items.len());
                for t in &page.items {
                    println!(
                        "  #{:<6} {} {:<8} {:>8} -> {:<8} {}",
                        t.id,
                        t.created_at.format("%Y-%m-%d %H:%M"),
                        t.transaction_type,
                        t.amount,
                        t.balance_after,
                        t.description.as_deref().unwrap_or("")
                    );
                }
            }
            "Credit statistics" => {
                let user_id = or_back!(number("User id:"));
                let s = svc.credit.get_credit_statistics(user_id).await?;
                println!(
                    "recharged {} · consumed {} · rewarded {} · refunded {} · expired {}",
                    s.total_recharge, s.total_consume, s.total_reward, s.total_refund, s.total_expire
                );
                println!(
                    "balance {} · paid {} over {} orders",
                    s.current_balance,
                    format_cents(s.recharge_amount),
                    s.recharge_count
                );
            }
            "Verify ledger" => {
                let user_id = or_back!(number("User id:"));
                if svc.credit.verify_ledger(user_id).await? {
                    println!("Ledger is consistent");
                } else {
                    println!("Ledger does NOT chain to the stored balance");
                }
            }
            "Export ledger to CSV" => {
                let user_id = or_back!(number("User id:"));
                let rows = svc.credit.full_ledger(user_id).await?;
                let path = self
                    .export_dir
                    .join(format!("ledger_{}_{}.csv", user_id, Utc::now().format("%Y%m%d%H%M%S")));
                let n = export_transactions_csv(&rows, &path)?;
                println!("Wrote {} rows to {}", n, path.display());
            }
            _ => {}
        }
        Ok(())
    }

    async fn orders_menu(&self) -> Result<(), DomainError> {
        let options = [
            "Recharge",
            "Buy membership",
            "Confirm payment",
            "Fail payment",
            "Cancel order",
            "Payment status",
            "Order history",
            "Membership statistics",
            BACK,
        ];
        let choice = or_back!(choose("Orders & payments", &options));
        let svc = &self.services;
        match choice {
            "Recharge" => {
                let prices = svc.prices.list_credit_prices().await?;
                if prices.is_empty() {
                    println!("No active credit packages");
                    return Ok(());
                }
                let labels: Vec<String> = prices
                    .iter()
                    .map(|p| {
                        format!(
                            "#{} {} · {} · {}+{} credits",
                            p.id,
                            p.name,
                            format_cents(p.amount),
                            p.credits,
                            p.bonus_credits
                        )
                    })
                    .collect();
                let label = or_back!(answer(Select::new("Package:", labels.clone()).prompt()));
                let Some(price) = labels.iter().position(|l| *l == label).map(|i| &prices[i]) else {
                    return Ok(());
                };
                let user_id = or_back!(number("User id:"));
                let method = or_back!(answer(Select::new("Payment method:", PAYMENT_METHODS.to_vec()).prompt()));
                let coupon_code = optional_text("Coupon code (optional):")?;
                let order = svc
                    .recharge
                    .create_recharge_order(
                        user_id,
                        &RechargeOrderCreate {
                            price_id: price.id,
                            payment_method: method.to_string(),
                            coupon_code,
                        },
                    )
                    .await?;
                println!(
                    "Order {} · pay {} · {} credits",
                    order.order_no,
                    format_cents(order.amount),
                    order.total_credits()
                );
            }
            "Buy membership" => {
                let prices = svc.prices.list_membership_prices().await?;
                if prices.is_empty() {
                    println!("No active membership plans");
                    return Ok(());
                }
                let labels: Vec<String> = prices
                    .iter()
                    .map(|p| {
                        format!(
                            "#{} {} · {} · {} days",
                            p.id,
                            p.name,
                            format_cents(p.amount),
                            p.duration_days
                        )
                    })
                    .collect();
                let label = or_back!(answer(Select::new("Plan:", labels.clone()).prompt()));
                let Some(price) = labels.iter().position(|l| *l == label).map(|i| &prices[i]) else {
                    return Ok(());
                };
                let user_id = or_back!(number("User id:"));
                let method = or_back!(answer(Select::new("Payment method:", PAYMENT_METHODS.to_vec()).prompt()));
                let coupon_code = optional_text("Coupon code (optional):")?;
                let order = svc
                    .membership
                    .create_membership_order(
                        user_id,
                        &MembershipOrderCreate {
                            price_id: price.id,
                            payment_method: method.to_string(),
                            coupon_code,
                        },
                    )
                    .await?;
                println!("Order {} · pay {}", order.order_no, format_cents(order.amount));
            }
            "Confirm payment" | "Fail payment" => {
                let order_no = or_back!(text("Order number:"));
                let status = svc.recharge.get_payment_status(&order_no).await?;
                let amount = if choice == "Confirm payment" {
                    or_back!(money("Paid amount:"))
                } else {
                    0
                };
                let callback = PaymentCallbackRequest {
                    order_no: order_no.clone(),
                    transaction_id: format!("CONSOLE-{}", Utc::now().timestamp()),
                    payment_method: "console".into(),
                    amount,
                    status: if choice == "Confirm payment" {
                        PaymentStatus::Paid.to_string()
                    } else {
                        PaymentStatus::Failed.to_string()
                    },
                };
                let paid = if order_no.starts_with('M') {
                    svc.membership.process_membership_callback(&callback).await?
                } else {
                    svc.recharge.process_recharge_callback(&callback).await?
                };
                println!(
                    "Order {} was {}, now {}",
                    order_no,
                    status.payment_status,
                    if paid { "paid" } else { "closed" }
                );
            }
            "Cancel order" => {
                let user_id = or_back!(number("User id:"));
                let order_no = or_back!(text("Order number:"));
                svc.recharge.cancel_order(user_id, &order_no).await?;
                println!("Cancelled {}", order_no);
            }
            "Payment status" => {
                let order_no = or_back!(text("Order number:"));
                let s = svc.recharge.get_payment_status(&order_no).await?;
                println!("{}: {}", s.order_no, s.payment_status);
            }
            "Order history" => {
                let user_id = or_back!(number("User id:"));
                let recharges = svc.recharge.get_recharge_orders(user_id, self.page()).await?;
                println!("Recharge orders ({}):", recharges.total);
                for o in &recharges.items {
                    println!(
                        "  {} {} {:<9} {} credits",
                        o.order_no,
                        format_cents(o.amount),
                        o.payment_status,
                        o.credits + o.bonus_credits
                    );
                }
                let memberships = svc.membership.get_membership_orders(user_id, self.page()).await?;
                println!("Membership orders ({}):", memberships.total);
                for o in &memberships.items {
                    println!(
                        "  {} {} {:<9} {} {} days",
                        o.order_no,
                        format_cents(o.amount),
                        o.payment_status,
                        o.membership_type,
                        o.duration_days
                    );
                }
            }
            "Membership statistics" => {
                let user_id = or_back!(number("User id:"));
                let s = svc.membership.get_membership_statistics(user_id).await?;
                println!(
                    "member: {} · days left: {} · orders: {} · spent {}",
                    s.is_member,
                    s.days_remaining.map_or("-".to_string(), |d| d.to_string()),
                    s.total_orders,
                    format_cents(s.total_amount)
                );
            }
            _ => {}
        }
        Ok(())
    }

    async fn prices_menu(&self) -> Result<(), DomainError> {
        let options = [
            "List packages",
            "Add credit package",
            "Add membership plan",
            "Deactivate credit package",
            "Deactivate membership plan",
            BACK,
        ];
        let choice = or_back!(choose("Price packages", &options));
        let svc = &self.services;
        match choice {
            "List packages" => {
                for p in svc.prices.list_all_credit_prices().await? {
                    println!(
                        "  credit #{} {} {} {}+{} {}",
                        p.id,
                        p.name,
                        format_cents(p.amount),
                        p.credits,
                        p.bonus_credits,
                        if p.is_active { "" } else { "(inactive)" }
                    );
                }
                for p in svc.prices.list_all_membership_prices().await? {
                    println!(
                        "  membership #{} {} {} {} {} days {}",
                        p.id,
                        p.name,
                        p.membership_type,
                        format_cents(p.amount),
                        p.duration_days,
                        if p.is_active { "" } else { "(inactive)" }
                    );
                }
            }
            "Add credit package" => {
                let req = CreditPriceCreate {
                    name: or_back!(text("Name:")),
                    amount: or_back!(money("Price:")),
                    credits: or_back!(number("Credits:")),
                    bonus_credits: or_back!(number("Bonus credits:")),
                    description: optional_text("Description (optional):")?,
                    sort_order: 0,
                };
                let p = svc.prices.create_credit_price(&req).await?;
                println!("Created credit package #{}", p.id);
            }
            "Add membership plan" => {
                let req = MembershipPriceCreate {
                    name: or_back!(text("Name:")),
                    membership_type: or_back!(pick("Type:", MembershipType::ALL)),
                    amount: or_back!(money("Price:")),
                    original_amount: match optional_text("List price (optional):")? {
                        Some(s) => Some(parse_cents(&s)?),
                        None => None,
                    },
                    duration_days: or_back!(number("Duration (days):")),
                    description: optional_text("Description (optional):")?,
                    features: None,
                    sort_order: 0,
                };
                let p = svc.prices.create_membership_price(&req).await?;
                println!("Created membership plan #{}", p.id);
            }
            "Deactivate credit package" => {
                let id = or_back!(number("Package id:"));
                svc.prices.delete_credit_price(id).await?;
                println!("Deactivated");
            }
            "Deactivate membership plan" => {
                let id = or_back!(number("Plan id:"));
                svc.prices.delete_membership_price(id).await?;
                println!("Deactivated");
            }
            _ => {}
        }
        Ok(())
    }

    async fn activities_menu(&self) -> Result<(), DomainError> {
        let options = [
            "List activities",
            "Create activity",
            "Change status",
            "Join activity",
            "Participants",
            "Delete activity",
            BACK,
        ];
        let choice = or_back!(choose("Activities", &options));
        let svc = &self.services;
        match choice {
            "List activities" => {
                let query = ActivityQuery {
                    page: self.page(),
                    ..Default::default()
                };
                let page = svc.activities.list_activities(&query).await?;
                for a in &page.items {
                    println!(
                        "  #{} {} [{} / {}] {}/{} joined · cost {}",
                        a.id,
                        a.title,
                        a.activity_type,
                        a.status,
                        a.current_participants,
                        a.max_participants.map_or("∞".to_string(), |m| m.to_string()),
                        a.cost
                    );
                }
            }
            "Create activity" => {
                let title = or_back!(text("Title:"));
                let kind = or_back!(pick("Type:", ActivityType::ALL));
                let rules = match kind {
                    ActivityType::CreditGift => {
                        let credits = or_back!(number("Credits per participant:"));
                        Some(serde_json::json!({ "credits": credits }))
                    }
                    ActivityType::Coupon => {
                        let code = or_back!(text("Coupon code:"));
                        Some(serde_json::json!({ "coupon_code": code }))
                    }
                    _ => None,
                };
                let days = or_back!(number("Runs for how many days:"));
                let now = Utc::now();
                let req = ActivityCreate {
                    title,
                    activity_type: kind,
                    description: None,
                    rules,
                    start_time: now,
                    end_time: now + Duration::days(days),
                    target_users: None,
                    max_participants: number("Max participants (0 = unlimited):")?.filter(|n| *n > 0),
                    budget: number("Budget in credits (0 = none):")?.filter(|n| *n > 0),
                };
                let a = svc
                    .activities
                    .create_activity(&req, Some(self.admin_user_id))
                    .await?;
                println!("Created activity #{} (draft)", a.id);
            }
            "Change status" => {
                let id = or_back!(number("Activity id:"));
                let status = or_back!(pick("New status:", ActivityStatus::ALL));
                let update = ActivityUpdate {
                    status: Some(status),
                    ..Default::default()
                };
                let a = svc.activities.update_activity(id, update).await?;
                println!("Activity #{} is {}", a.id, a.status);
            }
            "Join activity" => {
                let id = or_back!(number("Activity id:"));
                let user_id = or_back!(number("User id:"));
                let p = svc.activities.participate(id, user_id).await?;
                println!(
                    "Joined · reward {} {}",
                    p.reward_type.as_deref().unwrap_or("none"),
                    p.reward_amount.map_or(String::new(), |a| a.to_string())
                );
            }
            "Participants" => {
                let id = or_back!(number("Activity id:"));
                let page = svc.activities.get_participations(id, self.page()).await?;
                println!("{} participants", page.total);
                for p in &page.items {
                    println!("  user #{} at {}", p.user_id, p.participated_at);
                }
            }
            "Delete activity" => {
                let id = or_back!(number("Activity id:"));
                if or_back!(answer(Confirm::new("Delete?").with_default(false).prompt())) {
                    svc.activities.delete_activity(id).await?;
                    println!("Deleted");
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn coupons_menu(&self) -> Result<(), DomainError> {
        let options = [
            "List coupons",
            "Create coupon",
            "Issue to user",
            "User's coupons",
            "Quote discount",
            "Deactivate coupon",
            BACK,
        ];
        let choice = or_back!(choose("Coupons", &options));
        let svc = &self.services;
        match choice {
            "List coupons" => {
                let query = CouponQuery {
                    page: self.page(),
                    ..Default::default()
                };
                let page = svc.coupons.list_coupons(&query).await?;
                for c in &page.items {
                    println!(
                        "  {} {} [{}] {} {} used {}/{}",
                        c.code,
                        c.name,
                        c.coupon_type,
                        c.discount_type,
                        c.discount_value,
                        c.used_quantity,
                        c.total_quantity.map_or("∞".to_string(), |q| q.to_string())
                    );
                }
            }
            "Create coupon" => {
                let code = or_back!(text("Code:"));
                let name = or_back!(text("Name:"));
                let coupon_type = or_back!(pick("Type:", CouponType::ALL));
                let discount_type = or_back!(pick("Discount:", DiscountType::ALL));
                let discount_value = match discount_type {
                    // percent entered like 15 or 12.5, stored in hundredths
                    DiscountType::Percent => or_back!(money("Percent off:")),
                    DiscountType::Fixed => or_back!(money("Amount off (or bonus credits):")),
                };
                let days = or_back!(number("Valid for how many days:"));
                let now = Utc::now();
                let req = CouponCreate {
                    code,
                    name,
                    coupon_type,
                    discount_type,
                    discount_value,
                    min_amount: match optional_text("Minimum order (optional):")? {
                        Some(s) => Some(parse_cents(&s)?),
                        None => None,
                    },
                    max_discount: None,
                    total_quantity: number("Quantity (0 = unlimited):")?.filter(|n| *n > 0),
                    valid_from: now,
                    valid_until: now + Duration::days(days),
                    description: None,
                    activity_id: None,
                };
                let c = svc.coupons.create_coupon(&req).await?;
                println!("Created coupon {}", c.code);
            }
            "Issue to user" => {
                let user_id = or_back!(number("User id:"));
                let code = or_back!(text("Code:"));
                svc.coupons.receive_coupon(user_id, &code).await?;
                println!("Issued {} to user #{}", code, user_id);
            }
            "User's coupons" => {
                let user_id = or_back!(number("User id:"));
                let page = svc.coupons.list_user_coupons(user_id, None, self.page()).await?;
                for c in &page.items {
                    println!("  {} {} [{}]", c.coupon.code, c.coupon.name, c.status);
                }
            }
            "Quote discount" => {
                let user_id = or_back!(number("User id:"));
                let code = or_back!(text("Code:"));
                let amount = or_back!(money("Order amount:"));
                let q = svc
                    .coupons
                    .calculate_discount(
                        user_id,
                        &CouponCalculateRequest { code, amount },
                    )
                    .await?;
                println!(
                    "{} - {} = {}",
                    format_cents(q.original_amount),
                    format_cents(q.discount_amount),
                    format_cents(q.final_amount)
                );
            }
            "Deactivate coupon" => {
                let code = or_back!(text("Code:"));
                let c = svc.coupons.get_coupon_by_code(&code).await?;
                svc.coupons.delete_coupon(c.id).await?;
                println!("Deactivated {}", c.code);
            }
            _ => {}
        }
        Ok(())
    }

    async fn referrals_menu(&self) -> Result<(), DomainError> {
        let options = ["Referral link", "Referral records", "Cancel referral", BACK];
        let choice = or_back!(choose("Referrals", &options));
        let svc = &self.services;
        match choice {
            "Referral link" => {
                let user_id = or_back!(number("User id:"));
                let link = svc.referrals.generate_referral_code(user_id).await?;
                println!("{}  {}", link.referral_code, link.referral_url);
            }
            "Referral records" => {
                let user_id = or_back!(number("Referrer id:"));
                let stats = svc.referrals.get_referral_statistics(user_id).await?;
                println!(
                    "{} referred · {} settled · {} pending · {} credits earned",
                    stats.total_referrals,
                    stats.settled_referrals,
                    stats.pending_referrals,
                    stats.total_reward_credits
                );
                let page = svc.referrals.get_referral_records(user_id, self.page()).await?;
                for r in &page.items {
                    println!("  #{} referee #{} [{}]", r.id, r.referee_id, r.status);
                }
            }
            "Cancel referral" => {
                let id = or_back!(number("Record id:"));
                svc.referrals.cancel_referral(id).await?;
                println!("Cancelled");
            }
            _ => {}
        }
        Ok(())
    }

    async fn statistics_menu(&self) -> Result<(), DomainError> {
        let options = ["Dashboard", "Report", BACK];
        let choice = or_back!(choose("Statistics", &options));
        let svc = &self.services;
        match choice {
            "Dashboard" => {
                let d = svc.statistics.get_dashboard().await?;
                println!(
                    "users {} · members {} · revenue {}",
                    d.total_users,
                    d.total_members,
                    format_cents(d.total_revenue)
                );
                println!(
                    "today: {} new · {} active · {} paid",
                    d.today.new_users,
                    d.today.active_users,
                    format_cents(d.today.recharge_amount + d.today.membership_amount)
                );
                for p in &d.trend {
                    println!("  {} {:>4} new {:>10}", p.date, p.new_users, format_cents(p.revenue));
                }
                for r in &d.top_referrers {
                    println!("  top referrer {} ({})", r.username, r.settled_count);
                }
            }
            "Report" => {
                let today = Utc::now().date_naive();
                let start = or_back!(date("From:", today - Duration::days(29)));
                let end = or_back!(date("To:", today));
                let stat_type = or_back!(pick("Bucket:", StatType::ALL));
                let query = StatisticsQuery {
                    start_date: start,
                    end_date: end,
                    stat_type,
                };
                query.validate()?;
                let days = ((end - start).num_days() + 1).max(0) as u64;
                let pb = progress::bar(days, "days");
                let rows = svc
                    .statistics
                    .get_operation_statistics_with_progress(&query, |_| pb.inc(1))
                    .await;
                pb.finish_and_clear();
                for r in rows? {
                    let f = &r.figures;
                    println!(
                        "  {} new {:>4} · active {:>4} · recharge {:>10} · membership {:>10} · consumed {:>6}",
                        r.stat_date,
                        f.new_users,
                        f.active_users,
                        format_cents(f.recharge_amount),
                        format_cents(f.membership_amount),
                        f.credits_consumed
                    );
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn oauth_menu(&self) -> Result<(), DomainError> {
        let options = [
            "Platforms",
            "Add / refresh account",
            "Accounts of user",
            "Check account",
            "Record usage",
            "Usage statistics",
            "Delete account",
            BACK,
        ];
        let choice = or_back!(choose("OAuth accounts", &options));
        let svc = &self.services;
        match choice {
            "Platforms" => {
                for p in svc.oauth.list_platforms(false).await? {
                    println!(
                        "  {:>3} {:<8} {} {}",
                        p.priority,
                        p.platform_id,
                        p.platform_name,
                        if p.is_enabled { "" } else { "(disabled)" }
                    );
                }
            }
            "Add / refresh account" => {
                let user_id = or_back!(number("User id:"));
                let platforms = svc.oauth.list_platforms(true).await?;
                let ids: Vec<String> = platforms.iter().map(|p| p.platform_id.clone()).collect();
                let platform = or_back!(answer(Select::new("Platform:", ids).prompt()));
                let cookies = parse_cookie_header(&or_back!(text("Cookie header:")));
                let credentials = OAuthCredentials {
                    cookies,
                    ..Default::default()
                };
                let req = OAuthAuthorizeRequest {
                    platform,
                    account_name: optional_text("Account name (optional):")?,
                };
                let res = svc.oauth.authorize(user_id, &req, credentials).await?;
                println!("{}", res.message);
            }
            "Accounts of user" => {
                let user_id = or_back!(number("User id:"));
                for a in svc.oauth.list_accounts(user_id, None, None).await? {
                    println!(
                        "  #{} {} {} used {}/{} {}",
                        a.id,
                        a.platform,
                        a.account_name.as_deref().unwrap_or(""),
                        a.quota_used,
                        a.quota_limit.map_or("∞".to_string(), |l| l.to_string()),
                        if a.is_available() { "available" } else { "unavailable" }
                    );
                }
            }
            "Check account" => {
                let id = or_back!(number("Account id:"));
                let valid = svc.oauth.check_account_validity(id).await?;
                println!("{}", if valid { "Session is valid" } else { "Session expired" });
            }
            "Record usage" => {
                let user_id = or_back!(number("User id:"));
                let account = match svc.oauth.select_account(user_id, None).await? {
                    Some(a) => a,
                    None => {
                        println!("No available account");
                        return Ok(());
                    }
                };
                let tokens = or_back!(number("Tokens used:"));
                let log = svc
                    .oauth
                    .log_usage(&OAuthUsageLogCreate {
                        user_id,
                        account_id: account.id,
                        model: None,
                        request_type: Some("console".into()),
                        prompt_tokens: None,
                        completion_tokens: None,
                        total_tokens: Some(tokens),
                        status: UsageStatus::Success,
                        error_message: None,
                        response_time_ms: None,
                    })
                    .await?;
                println!("Logged #{} on {}", log.id, log.platform);
            }
            "Usage statistics" => {
                let user_id = or_back!(number("User id:"));
                let s = svc.oauth.get_usage_stats(user_id).await?;
                println!(
                    "{} requests ({} ok, {} failed) · {} tokens",
                    s.total_requests, s.success_requests, s.failed_requests, s.total_tokens
                );
                for (platform, u) in &s.platform_stats {
                    println!("  {:<8} {:>5} req {:>10} tokens", platform, u.requests, u.tokens);
                }
            }
            "Delete account" => {
                let user_id = or_back!(number("User id:"));
                let id = or_back!(number("Account id:"));
                let deleted = svc.oauth.delete_account(id, user_id).await?;
                println!("{}", if deleted { "Deleted" } else { "No such account" });
            }
            _ => {}
        }
        Ok(())
    }
}

#[async_trait]
impl InputPort for TuiInputPort {
    async fn run(&self) -> Result<(), DomainError> {
        let menu = [
            MENU_USERS,
            MENU_ORDERS,
            MENU_PRICES,
            MENU_ACTIVITIES,
            MENU_COUPONS,
            MENU_REFERRALS,
            MENU_STATS,
            MENU_OAUTH,
            MENU_EXIT,
        ];
        loop {
            let Some(choice) = choose("Main menu", &menu)? else {
                return Ok(());
            };
            let result = match choice {
                MENU_USERS => self.users_menu().await,
                MENU_ORDERS => self.orders_menu().await,
                MENU_PRICES => self.prices_menu().await,
                MENU_ACTIVITIES => self.activities_menu().await,
                MENU_COUPONS => self.coupons_menu().await,
                MENU_REFERRALS => self.referrals_menu().await,
                MENU_STATS => self.statistics_menu().await,
                MENU_OAUTH => self.oauth_menu().await,
                _ => return Ok(()),
            };
            match result {
                Ok(()) => {}
                Err(DomainError::Ui(msg)) => return Err(DomainError::Ui(msg)),
                Err(e) if e.is_business() => println!("✗ {}", e),
                Err(e) => {
                    warn!(error = %e, "console action failed");
                    println!("✗ {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cookie_header() {
        let cookies = parse_cookie_header("sessionKey=abc; __cf_bm=x=y ; ;bad; _cfuvid=1");
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies["sessionKey"], "abc");
        assert_eq!(cookies["__cf_bm"], "x=y");
        assert_eq!(cookies["_cfuvid"], "1");
    }

    #[test]
    fn test_parse_cookie_header_empty() {
        assert!(parse_cookie_header("").is_empty());
    }
}
