//! Orders and price packages.

use super::operation_store::redeem_in;
use super::sqlite_repo::{
    RowExt, SqliteRepo, apply_change_in, db_err, finish, flag, load_user, query_all, query_i64,
    query_one, ts, unique_or_db,
};
use crate::domain::{
    CreditChange, CreditPrice, CreditTransaction, DomainError, MembershipOrder, MembershipPrice,
    PaymentStatus, RechargeOrder, TransactionType,
};
use crate::ports::{MembershipPurchases, OrderStore, PriceStore};
use crate::schemas::PageRequest;
use crate::schemas::credit::{CreditPriceCreate, MembershipPriceCreate};
use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, Row, params};
use tracing::info;

const RECHARGE_COLUMNS: &str = "id, order_no, user_id, amount, credits, bonus_credits, \
    payment_method, payment_status, paid_at, transaction_id, coupon_code, discount_amount, \
    remark, created_at, updated_at";

const MEMBERSHIP_COLUMNS: &str = "id, order_no, user_id, membership_type, amount, \
    original_amount, discount_amount, duration_days, payment_method, payment_status, paid_at, \
    expired_at, transaction_id, coupon_code, remark, created_at, updated_at";

const CREDIT_PRICE_COLUMNS: &str = "id, name, amount, credits, bonus_credits, is_active, \
    sort_order, description, created_at, updated_at";

const MEMBERSHIP_PRICE_COLUMNS: &str = "id, name, membership_type, amount, original_amount, \
    duration_days, is_active, sort_order, description, features, created_at, updated_at";

fn recharge_from_row(row: &Row) -> Result<RechargeOrder, DomainError> {
    Ok(RechargeOrder {
        id: row.i64_at(0)?,
        order_no: row.text_at(1)?,
        user_id: row.i64_at(2)?,
        amount: row.i64_at(3)?,
        credits: row.i64_at(4)?,
        bonus_credits: row.i64_at(5)?,
        payment_method: row.opt_text(6)?,
        payment_status: row.enum_at(7)?,
        paid_at: row.opt_time(8)?,
        transaction_id: row.opt_text(9)?,
        coupon_code: row.opt_text(10)?,
        discount_amount: row.i64_at(11)?,
        remark: row.opt_text(12)?,
        created_at: row.time_at(13)?,
        updated_at: row.time_at(14)?,
    })
}

fn membership_from_row(row: &Row) -> Result<MembershipOrder, DomainError> {
    Ok(MembershipOrder {
        id: row.i64_at(0)?,
        order_no: row.text_at(1)?,
        user_id: row.i64_at(2)?,
        membership_type: row.enum_at(3)?,
        amount: row.i64_at(4)?,
        original_amount: row.opt_i64(5)?,
        discount_amount: row.i64_at(6)?,
        duration_days: row.i64_at(7)?,
        payment_method: row.opt_text(8)?,
        payment_status: row.enum_at(9)?,
        paid_at: row.opt_time(10)?,
        expired_at: row.opt_time(11)?,
        transaction_id: row.opt_text(12)?,
        coupon_code: row.opt_text(13)?,
        remark: row.opt_text(14)?,
        created_at: row.time_at(15)?,
        updated_at: row.time_at(16)?,
    })
}

fn credit_price_from_row(row: &Row) -> Result<CreditPrice, DomainError> {
    Ok(CreditPrice {
        id: row.i64_at(0)?,
        name: row.text_at(1)?,
        amount: row.i64_at(2)?,
        credits: row.i64_at(3)?,
        bonus_credits: row.i64_at(4)?,
        is_active: row.bool_at(5)?,
        sort_order: row.i64_at(6)?,
        description: row.opt_text(7)?,
        created_at: row.time_at(8)?,
        updated_at: row.time_at(9)?,
    })
}

fn membership_price_from_row(row: &Row) -> Result<MembershipPrice, DomainError> {
    Ok(MembershipPrice {
        id: row.i64_at(0)?,
        name: row.text_at(1)?,
        membership_type: row.enum_at(2)?,
        amount: row.i64_at(3)?,
        original_amount: row.opt_i64(4)?,
        duration_days: row.i64_at(5)?,
        is_active: row.bool_at(6)?,
        sort_order: row.i64_at(7)?,
        description: row.opt_text(8)?,
        features: row.opt_text(9)?,
        created_at: row.time_at(10)?,
        updated_at: row.time_at(11)?,
    })
}

async fn load_recharge(conn: &Connection, order_no: &str) -> Result<RechargeOrder, DomainError> {
    query_one(
        conn,
        &format!("SELECT {} FROM recharge_orders WHERE order_no = ?1", RECHARGE_COLUMNS),
        params![order_no],
        recharge_from_row,
    )
    .await?
    .ok_or_else(|| DomainError::NotFound(format!("order {}", order_no)))
}

async fn load_membership(
    conn: &Connection,
    order_no: &str,
) -> Result<MembershipOrder, DomainError> {
    query_one(
        conn,
        &format!("SELECT {} FROM membership_orders WHERE order_no = ?1", MEMBERSHIP_COLUMNS),
        params![order_no],
        membership_from_row,
    )
    .await?
    .ok_or_else(|| DomainError::NotFound(format!("order {}", order_no)))
}

/// `Ok(true)` for pending, `Ok(false)` for already paid, `InvalidState` otherwise.
fn payable(order_no: &str, status: PaymentStatus) -> Result<bool, DomainError> {
    match status {
        PaymentStatus::Pending => Ok(true),
        PaymentStatus::Paid => Ok(false),
        other => Err(DomainError::InvalidState(format!(
            "order {} is {}",
            order_no, other
        ))),
    }
}

/// Table and coupon types for an order number, decided by its prefix.
fn order_kind(order_no: &str) -> Result<(&'static str, &'static str), DomainError> {
    match order_no.chars().next() {
        Some('R') => Ok((
            "recharge_orders",
            "'recharge_discount', 'recharge_bonus'",
        )),
        Some('M') => Ok(("membership_orders", "'membership_discount'")),
        _ => Err(DomainError::NotFound(format!("order {}", order_no))),
    }
}

#[async_trait::async_trait]
impl OrderStore for SqliteRepo {
    async fn insert_recharge_order(
        &self,
        order: &RechargeOrder,
        reserved_coupon: Option<i64>,
    ) -> Result<RechargeOrder, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            tx.execute(
                r#"
                INSERT INTO recharge_orders
                    (order_no, user_id, amount, credits, bonus_credits, payment_method,
                     payment_status, coupon_code, discount_amount, remark, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                "#,
                params![
                    order.order_no.as_str(),
                    order.user_id,
                    order.amount,
                    order.credits,
                    order.bonus_credits,
                    order.payment_method.clone(),
                    order.payment_status.as_str(),
                    order.coupon_code.clone(),
                    order.discount_amount,
                    order.remark.clone(),
                    ts(order.created_at)
                ],
            )
            .await
            .map_err(unique_or_db("order number already exists"))?;
            let id = tx.last_insert_rowid();
            if let Some(user_coupon_id) = reserved_coupon {
                redeem_in(&tx, user_coupon_id, Some(id), order.created_at).await?;
            }
            load_recharge(&tx, &order.order_no).await
        }
        .await;
        finish(tx, result).await
    }

    async fn insert_membership_order(
        &self,
        order: &MembershipOrder,
        reserved_coupon: Option<i64>,
    ) -> Result<MembershipOrder, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            tx.execute(
                r#"
                INSERT INTO membership_orders
                    (order_no, user_id, membership_type, amount, original_amount, discount_amount,
                     duration_days, payment_method, payment_status, coupon_code, remark,
                     created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                "#,
                params![
                    order.order_no.as_str(),
                    order.user_id,
                    order.membership_type.as_str(),
                    order.amount,
                    order.original_amount,
                    order.discount_amount,
                    order.duration_days,
                    order.payment_method.clone(),
                    order.payment_status.as_str(),
                    order.coupon_code.clone(),
                    order.remark.clone(),
                    ts(order.created_at)
                ],
            )
            .await
            .map_err(unique_or_db("order number already exists"))?;
            let id = tx.last_insert_rowid();
            if let Some(user_coupon_id) = reserved_coupon {
                redeem_in(&tx, user_coupon_id, Some(id), order.created_at).await?;
            }
            load_membership(&tx, &order.order_no).await
        }
        .await;
        finish(tx, result).await
    }

    async fn find_recharge_order(
        &self,
        order_no: &str,
    ) -> Result<Option<RechargeOrder>, DomainError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM recharge_orders WHERE order_no = ?1", RECHARGE_COLUMNS),
            params![order_no],
            recharge_from_row,
        )
        .await
    }

    async fn find_membership_order(
        &self,
        order_no: &str,
    ) -> Result<Option<MembershipOrder>, DomainError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM membership_orders WHERE order_no = ?1", MEMBERSHIP_COLUMNS),
            params![order_no],
            membership_from_row,
        )
        .await
    }

    async fn list_recharge_orders(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<RechargeOrder>, i64), DomainError> {
        let conn = self.conn()?;
        let total = query_i64(
            &conn,
            "SELECT COUNT(*) FROM recharge_orders WHERE user_id = ?1",
            params![user_id],
        )
        .await?;
        let items = query_all(
            &conn,
            &format!(
                "SELECT {} FROM recharge_orders WHERE user_id = ?1 \
                 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
                RECHARGE_COLUMNS
            ),
            params![user_id, page.limit, page.skip],
            recharge_from_row,
        )
        .await?;
        Ok((items, total))
    }

    async fn list_membership_orders(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<MembershipOrder>, i64), DomainError> {
        let conn = self.conn()?;
        let total = query_i64(
            &conn,
            "SELECT COUNT(*) FROM membership_orders WHERE user_id = ?1",
            params![user_id],
        )
        .await?;
        let items = query_all(
            &conn,
            &format!(
                "SELECT {} FROM membership_orders WHERE user_id = ?1 \
                 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
                MEMBERSHIP_COLUMNS
            ),
            params![user_id, page.limit, page.skip],
            membership_from_row,
        )
        .await?;
        Ok((items, total))
    }

    async fn pay_recharge_order(
        &self,
        order_no: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<(RechargeOrder, CreditTransaction)>, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            let order = load_recharge(&tx, order_no).await?;
            if !payable(order_no, order.payment_status)? {
                return Ok(None);
            }
            tx.execute(
                "UPDATE recharge_orders SET payment_status = 'paid', paid_at = ?1, \
                 transaction_id = ?2, updated_at = ?1 WHERE id = ?3 AND payment_status = 'pending'",
                params![ts(now), transaction_id, order.id],
            )
            .await
            .map_err(db_err)?;
            let change = CreditChange::credit(
                order.user_id,
                TransactionType::Recharge,
                order.total_credits(),
                format!("Recharge order {}", order.order_no),
            )
            .related(Some(order.id), Some("recharge_order"));
            let row = apply_change_in(&tx, &change, now).await?;
            let order = load_recharge(&tx, order_no).await?;
            Ok(Some((order, row)))
        }
        .await;
        let result = finish(tx, result).await?;
        if let Some((order, _)) = &result {
            info!(
                order_no,
                user_id = order.user_id,
                credits = order.total_credits(),
                "recharge order paid"
            );
        }
        Ok(result)
    }

    async fn pay_membership_order(
        &self,
        order_no: &str,
        transaction_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<MembershipOrder>, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            let order = load_membership(&tx, order_no).await?;
            if !payable(order_no, order.payment_status)? {
                return Ok(None);
            }
            let user = load_user(&tx, order.user_id).await?;
            let base = match user.member_expired_at {
                Some(expiry) if user.is_active_member(now) => expiry.max(now),
                _ => now,
            };
            let new_expiry = base + Duration::days(order.duration_days);
            tx.execute(
                "UPDATE users SET is_member = 1, member_expired_at = ?1 WHERE id = ?2",
                params![ts(new_expiry), user.id],
            )
            .await
            .map_err(db_err)?;
            tx.execute(
                "UPDATE membership_orders SET payment_status = 'paid', paid_at = ?1, \
                 expired_at = ?2, transaction_id = ?3, updated_at = ?1 \
                 WHERE id = ?4 AND payment_status = 'pending'",
                params![ts(now), ts(new_expiry), transaction_id, order.id],
            )
            .await
            .map_err(db_err)?;
            load_membership(&tx, order_no).await.map(Some)
        }
        .await;
        let result = finish(tx, result).await?;
        if let Some(order) = &result {
            info!(
                order_no,
                user_id = order.user_id,
                expires = ?order.expired_at,
                "membership order paid"
            );
        }
        Ok(result)
    }

    async fn close_order(
        &self,
        order_no: &str,
        status: PaymentStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        let (table, coupon_types) = order_kind(order_no)?;
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            let Some((order_id, user_id)) = query_one(
                &tx,
                &format!("SELECT id, user_id FROM {} WHERE order_no = ?1", table),
                params![order_no],
                |row| Ok((row.i64_at(0)?, row.i64_at(1)?)),
            )
            .await?
            else {
                return Err(DomainError::NotFound(format!("order {}", order_no)));
            };
            let changed = tx
                .execute(
                    &format!(
                        "UPDATE {} SET payment_status = ?1, updated_at = ?2 \
                         WHERE id = ?3 AND payment_status = 'pending'",
                        table
                    ),
                    params![status.as_str(), ts(now), order_id],
                )
                .await
                .map_err(db_err)?;
            if changed == 0 {
                return Ok(false);
            }
            let reserved = query_all(
                &tx,
                &format!(
                    "SELECT uc.id, uc.coupon_id FROM user_coupons uc \
                     JOIN coupons c ON c.id = uc.coupon_id \
                     WHERE uc.order_id = ?1 AND uc.user_id = ?2 AND uc.status = 'used' \
                     AND c.coupon_type IN ({})",
                    coupon_types
                ),
                params![order_id, user_id],
                |row| Ok((row.i64_at(0)?, row.i64_at(1)?)),
            )
            .await?;
            for (user_coupon_id, coupon_id) in reserved {
                tx.execute(
                    "UPDATE user_coupons SET status = 'unused', used_at = NULL, order_id = NULL \
                     WHERE id = ?1",
                    params![user_coupon_id],
                )
                .await
                .map_err(db_err)?;
                tx.execute(
                    "UPDATE coupons SET used_quantity = MAX(used_quantity - 1, 0), updated_at = ?1 \
                     WHERE id = ?2",
                    params![ts(now), coupon_id],
                )
                .await
                .map_err(db_err)?;
            }
            Ok(true)
        }
        .await;
        let closed = finish(tx, result).await?;
        if closed {
            info!(order_no, status = %status, "order closed");
        }
        Ok(closed)
    }

    async fn paid_recharge_totals(&self, user_id: i64) -> Result<(i64, i64), DomainError> {
        let conn = self.conn()?;
        let totals = query_one(
            &conn,
            "SELECT COALESCE(SUM(amount), 0), COUNT(*) FROM recharge_orders \
             WHERE user_id = ?1 AND payment_status = 'paid'",
            params![user_id],
            |row| Ok((row.i64_at(0)?, row.i64_at(1)?)),
        )
        .await?;
        Ok(totals.unwrap_or((0, 0)))
    }

    async fn membership_purchases(
        &self,
        user_id: i64,
    ) -> Result<MembershipPurchases, DomainError> {
        let conn = self.conn()?;
        let (count, amount) = query_one(
            &conn,
            "SELECT COUNT(*), COALESCE(SUM(amount), 0) FROM membership_orders \
             WHERE user_id = ?1 AND payment_status = 'paid'",
            params![user_id],
            |row| Ok((row.i64_at(0)?, row.i64_at(1)?)),
        )
        .await?
        .unwrap_or((0, 0));
        let last = query_one(
            &conn,
            "SELECT paid_at, membership_type FROM membership_orders \
             WHERE user_id = ?1 AND payment_status = 'paid' \
             ORDER BY paid_at DESC, id DESC LIMIT 1",
            params![user_id],
            |row| Ok((row.opt_time(0)?, row.enum_at(1)?)),
        )
        .await?;
        Ok(MembershipPurchases {
            count,
            amount,
            last_paid_at: last.as_ref().and_then(|(at, _)| *at),
            last_type: last.map(|(_, kind)| kind),
        })
    }
}

#[async_trait::async_trait]
impl PriceStore for SqliteRepo {
    async fn list_credit_prices(&self, active_only: bool) -> Result<Vec<CreditPrice>, DomainError> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM credit_prices WHERE (?1 = 0 OR is_active = 1) \
                 ORDER BY sort_order ASC, id ASC",
                CREDIT_PRICE_COLUMNS
            ),
            params![flag(active_only)],
            credit_price_from_row,
        )
        .await
    }

    async fn get_credit_price(&self, id: i64) -> Result<Option<CreditPrice>, DomainError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM credit_prices WHERE id = ?1", CREDIT_PRICE_COLUMNS),
            params![id],
            credit_price_from_row,
        )
        .await
    }

    async fn insert_credit_price(
        &self,
        req: &CreditPriceCreate,
        now: DateTime<Utc>,
    ) -> Result<CreditPrice, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            tx.execute(
                r#"
                INSERT INTO credit_prices
                    (name, amount, credits, bonus_credits, sort_order, description,
                     created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
                "#,
                params![
                    req.name.as_str(),
                    req.amount,
                    req.credits,
                    req.bonus_credits,
                    req.sort_order,
                    req.description.clone(),
                    ts(now)
                ],
            )
            .await
            .map_err(db_err)?;
            query_one(
                &tx,
                &format!("SELECT {} FROM credit_prices WHERE id = ?1", CREDIT_PRICE_COLUMNS),
                params![tx.last_insert_rowid()],
                credit_price_from_row,
            )
            .await?
            .ok_or_else(|| DomainError::Repo("inserted price vanished".into()))
        }
        .await;
        finish(tx, result).await
    }

    async fn save_credit_price(&self, price: &CreditPrice) -> Result<(), DomainError> {
        self.write(
            "UPDATE credit_prices SET name = ?1, amount = ?2, credits = ?3, bonus_credits = ?4, \
             is_active = ?5, sort_order = ?6, description = ?7, updated_at = ?8 WHERE id = ?9",
            params![
                price.name.as_str(),
                price.amount,
                price.credits,
                price.bonus_credits,
                flag(price.is_active),
                price.sort_order,
                price.description.clone(),
                ts(price.updated_at),
                price.id
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_membership_prices(
        &self,
        active_only: bool,
    ) -> Result<Vec<MembershipPrice>, DomainError> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM membership_prices WHERE (?1 = 0 OR is_active = 1) \
                 ORDER BY sort_order ASC, id ASC",
                MEMBERSHIP_PRICE_COLUMNS
            ),
            params![flag(active_only)],
            membership_price_from_row,
        )
        .await
    }

    async fn get_membership_price(&self, id: i64) -> Result<Option<MembershipPrice>, DomainError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            &format!(
                "SELECT {} FROM membership_prices WHERE id = ?1",
                MEMBERSHIP_PRICE_COLUMNS
            ),
            params![id],
            membership_price_from_row,
        )
        .await
    }

    async fn insert_membership_price(
        &self,
        req: &MembershipPriceCreate,
        now: DateTime<Utc>,
    ) -> Result<MembershipPrice, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            tx.execute(
                r#"
                INSERT INTO membership_prices
                    (name, membership_type, amount, original_amount, duration_days, sort_order,
                     description, features, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                "#,
                params![
                    req.name.as_str(),
                    req.membership_type.as_str(),
                    req.amount,
                    req.original_amount,
                    req.duration_days,
                    req.sort_order,
                    req.description.clone(),
                    req.features.clone(),
                    ts(now)
                ],
            )
            .await
            .map_err(db_err)?;
            query_one(
                &tx,
                &format!(
                    "SELECT {} FROM membership_prices WHERE id = ?1",
                    MEMBERSHIP_PRICE_COLUMNS
                ),
                params![tx.last_insert_rowid()],
                membership_price_from_row,
            )
            .await?
            .ok_or_else(|| DomainError::Repo("inserted price vanished".into()))
        }
        .await;
        finish(tx, result).await
    }

    async fn save_membership_price(&self, price: &MembershipPrice) -> Result<(), DomainError> {
        self.write(
            "UPDATE membership_prices SET name = ?1, membership_type = ?2, amount = ?3, \
             original_amount = ?4, duration_days = ?5, is_active = ?6, sort_order = ?7, \
             description = ?8, features = ?9, updated_at = ?10 WHERE id = ?11",
            params![
                price.name.as_str(),
                price.membership_type.as_str(),
                price.amount,
                price.original_amount,
                price.duration_days,
                flag(price.is_active),
                price.sort_order,
                price.description.clone(),
                price.features.clone(),
                ts(price.updated_at),
                price.id
            ],
        )
        .await?;
        Ok(())
    }
}

