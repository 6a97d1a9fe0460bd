//! Activities, coupons, referrals and the statistics aggregates.

use super::sqlite_repo::{
    RowExt, SqliteRepo, apply_change_in, db_err, finish, flag, json_text, opt_value,
    query_all, query_i64, query_one, ts, unique_or_db,
};
use crate::domain::{
    Activity, ActivityParticipation, ActivityStatus, ActivityType, Coupon, CouponStatus,
    CouponType, CreditChange, DomainError, OperationStatistics, ReferralRecord, ReferralTrigger,
    Reward, TransactionType, UserCoupon,
};
use crate::ports::{ActivityStore, CouponStore, ReferralStore, StatisticsStore};
use crate::schemas::PageRequest;
use crate::schemas::operation::{CouponCreate, ReferralStatisticsResponse, TopReferrer};
use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Connection, Row, Value, params};
use serde_json::json;
use tracing::info;

// ============ Row mapping ============

const ACTIVITY_COLUMNS: &str = "id, title, activity_type, status, description, rules, \
    start_time, end_time, target_users, max_participants, current_participants, budget, cost, \
    created_by, created_at, updated_at";

const PARTICIPATION_COLUMNS: &str =
    "id, activity_id, user_id, reward_type, reward_amount, reward_data, participated_at";

const COUPON_COLUMNS: &str = "id, code, name, coupon_type, discount_type, discount_value, \
    min_amount, max_discount, total_quantity, used_quantity, valid_from, valid_until, \
    description, activity_id, is_active, created_at, updated_at";

const USER_COUPON_COLUMNS: &str = "id, user_id, coupon_id, status, used_at, order_id, received_at";

const REFERRAL_COLUMNS: &str = "id, referrer_id, referee_id, referral_code, reward_type, \
    reward_amount, reward_credits, status, trigger_event, trigger_amount, settled_at, remark, \
    created_at, updated_at";

fn activity_from_row(row: &Row) -> Result<Activity, DomainError> {
    Ok(Activity {
        id: row.i64_at(0)?,
        title: row.text_at(1)?,
        activity_type: row.enum_at(2)?,
        status: row.enum_at(3)?,
        description: row.opt_text(4)?,
        rules: row.opt_json(5)?,
        start_time: row.time_at(6)?,
        end_time: row.time_at(7)?,
        target_users: row.opt_json(8)?,
        max_participants: row.opt_i64(9)?,
        current_participants: row.i64_at(10)?,
        budget: row.opt_i64(11)?,
        cost: row.i64_at(12)?,
        created_by: row.opt_i64(13)?,
        created_at: row.time_at(14)?,
        updated_at: row.time_at(15)?,
    })
}

fn participation_from_row(row: &Row) -> Result<ActivityParticipation, DomainError> {
    Ok(ActivityParticipation {
        id: row.i64_at(0)?,
        activity_id: row.i64_at(1)?,
        user_id: row.i64_at(2)?,
        reward_type: row.opt_text(3)?,
        reward_amount: row.opt_i64(4)?,
        reward_data: row.opt_json(5)?,
        participated_at: row.time_at(6)?,
    })
}

/// Coupon columns starting at `base`.
fn coupon_at(row: &Row, base: i32) -> Result<Coupon, DomainError> {
    Ok(Coupon {
        id: row.i64_at(base)?,
        code: row.text_at(base + 1)?,
        name: row.text_at(base + 2)?,
        coupon_type: row.enum_at(base + 3)?,
        discount_type: row.enum_at(base + 4)?,
        discount_value: row.i64_at(base + 5)?,
        min_amount: row.opt_i64(base + 6)?,
        max_discount: row.opt_i64(base + 7)?,
        total_quantity: row.opt_i64(base + 8)?,
        used_quantity: row.i64_at(base + 9)?,
        valid_from: row.time_at(base + 10)?,
        valid_until: row.time_at(base + 11)?,
        description: row.opt_text(base + 12)?,
        activity_id: row.opt_i64(base + 13)?,
        is_active: row.bool_at(base + 14)?,
        created_at: row.time_at(base + 15)?,
        updated_at: row.time_at(base + 16)?,
    })
}

fn coupon_from_row(row: &Row) -> Result<Coupon, DomainError> {
    coupon_at(row, 0)
}

fn user_coupon_from_row(row: &Row) -> Result<UserCoupon, DomainError> {
    Ok(UserCoupon {
        id: row.i64_at(0)?,
        user_id: row.i64_at(1)?,
        coupon_id: row.i64_at(2)?,
        status: row.enum_at(3)?,
        used_at: row.opt_time(4)?,
        order_id: row.opt_i64(5)?,
        received_at: row.time_at(6)?,
    })
}

/// User coupon columns followed by the coupon's columns.
fn held_coupon_from_row(row: &Row) -> Result<(UserCoupon, Coupon), DomainError> {
    Ok((user_coupon_from_row(row)?, coupon_at(row, 7)?))
}

fn referral_from_row(row: &Row) -> Result<ReferralRecord, DomainError> {
    Ok(ReferralRecord {
        id: row.i64_at(0)?,
        referrer_id: row.i64_at(1)?,
        referee_id: row.i64_at(2)?,
        referral_code: row.opt_text(3)?,
        reward_type: row.opt_text(4)?,
        reward_amount: row.opt_i64(5)?,
        reward_credits: row.opt_i64(6)?,
        status: row.enum_at(7)?,
        trigger_event: row.opt_enum(8)?,
        trigger_amount: row.opt_i64(9)?,
        settled_at: row.opt_time(10)?,
        remark: row.opt_text(11)?,
        created_at: row.time_at(12)?,
        updated_at: row.time_at(13)?,
    })
}

async fn load_activity(conn: &Connection, id: i64) -> Result<Option<Activity>, DomainError> {
    query_one(
        conn,
        &format!("SELECT {} FROM activities WHERE id = ?1", ACTIVITY_COLUMNS),
        params![id],
        activity_from_row,
    )
    .await
}

async fn load_coupon(conn: &Connection, id: i64) -> Result<Option<Coupon>, DomainError> {
    query_one(
        conn,
        &format!("SELECT {} FROM coupons WHERE id = ?1", COUPON_COLUMNS),
        params![id],
        coupon_from_row,
    )
    .await
}

async fn load_referral(conn: &Connection, id: i64) -> Result<Option<ReferralRecord>, DomainError> {
    query_one(
        conn,
        &format!("SELECT {} FROM referral_records WHERE id = ?1", REFERRAL_COLUMNS),
        params![id],
        referral_from_row,
    )
    .await
}

/// `WHERE` clause plus positional values for optional equality filters.
fn filters(conditions: Vec<(&str, Option<Value>)>) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();
    for (column, value) in conditions {
        if let Some(value) = value {
            values.push(value);
            clauses.push(format!("{} = ?{}", column, values.len()));
        }
    }
    let clause = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };
    (clause, values)
}

/// Runs a filtered count plus a filtered, paged select.
async fn paged<T>(
    conn: &Connection,
    table: &str,
    columns: &str,
    conditions: Vec<(&str, Option<Value>)>,
    page: PageRequest,
    map: fn(&Row) -> Result<T, DomainError>,
) -> Result<(Vec<T>, i64), DomainError> {
    let (clause, values) = filters(conditions);
    let total = query_i64(
        conn,
        &format!("SELECT COUNT(*) FROM {} {}", table, clause),
        Params::Positional(values.clone()),
    )
    .await?;
    let n = values.len();
    let mut paged_values = values;
    paged_values.push(Value::Integer(page.limit));
    paged_values.push(Value::Integer(page.skip));
    let items = query_all(
        conn,
        &format!(
            "SELECT {} FROM {} {} ORDER BY id DESC LIMIT ?{} OFFSET ?{}",
            columns,
            table,
            clause,
            n + 1,
            n + 2
        ),
        Params::Positional(paged_values),
        map,
    )
    .await?;
    Ok((items, total))
}

// ============ Shared coupon steps (run inside a caller's transaction) ============

/// Issues a coupon to a user, enforcing one per user and the issuance cap.
pub(super) async fn grant_in(
    conn: &Connection,
    user_id: i64,
    coupon_id: i64,
    now: DateTime<Utc>,
) -> Result<UserCoupon, DomainError> {
    let coupon = load_coupon(conn, coupon_id)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("coupon {}", coupon_id)))?;
    if let Some(total) = coupon.total_quantity {
        let issued = query_i64(
            conn,
            "SELECT COUNT(*) FROM user_coupons WHERE coupon_id = ?1",
            params![coupon_id],
        )
        .await?;
        if issued >= total {
            return Err(DomainError::Conflict(format!(
                "coupon {} has been fully claimed",
                coupon.code
            )));
        }
    }
    conn.execute(
        "INSERT INTO user_coupons (user_id, coupon_id, status, received_at) \
         VALUES (?1, ?2, 'unused', ?3)",
        params![user_id, coupon_id, ts(now)],
    )
    .await
    .map_err(unique_or_db("coupon already received"))?;
    query_one(
        conn,
        &format!("SELECT {} FROM user_coupons WHERE id = ?1", USER_COUPON_COLUMNS),
        params![conn.last_insert_rowid()],
        user_coupon_from_row,
    )
    .await?
    .ok_or_else(|| DomainError::Repo("inserted user coupon vanished".into()))
}

/// Flips an unused user coupon to used and counts it against the coupon.
pub(super) async fn redeem_in(
    conn: &Connection,
    user_coupon_id: i64,
    order_id: Option<i64>,
    now: DateTime<Utc>,
) -> Result<(), DomainError> {
    let changed = conn
        .execute(
            "UPDATE user_coupons SET status = 'used', used_at = ?1, order_id = ?2 \
             WHERE id = ?3 AND status = 'unused'",
            params![ts(now), order_id, user_coupon_id],
        )
        .await
        .map_err(db_err)?;
    if changed != 1 {
        return Err(DomainError::Conflict("coupon is no longer available".into()));
    }
    conn.execute(
        "UPDATE coupons SET used_quantity = used_quantity + 1, updated_at = ?1 \
         WHERE id = (SELECT coupon_id FROM user_coupons WHERE id = ?2)",
        params![ts(now), user_coupon_id],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

// ============ Activities ============

#[async_trait::async_trait]
impl ActivityStore for SqliteRepo {
    async fn insert_activity(&self, activity: &Activity) -> Result<Activity, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            tx.execute(
                r#"
                INSERT INTO activities
                    (title, activity_type, status, description, rules, start_time, end_time,
                     target_users, max_participants, current_participants, budget, cost,
                     created_by, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0, ?10, 0, ?11, ?12, ?12)
                "#,
                params![
                    activity.title.as_str(),
                    activity.activity_type.as_str(),
                    activity.status.as_str(),
                    activity.description.clone(),
                    json_text(&activity.rules),
                    ts(activity.start_time),
                    ts(activity.end_time),
                    json_text(&activity.target_users),
                    activity.max_participants,
                    activity.budget,
                    activity.created_by,
                    ts(activity.created_at)
                ],
            )
            .await
            .map_err(db_err)?;
            load_activity(&tx, tx.last_insert_rowid())
                .await?
                .ok_or_else(|| DomainError::Repo("inserted activity vanished".into()))
        }
        .await;
        finish(tx, result).await
    }

    async fn get_activity(&self, id: i64) -> Result<Option<Activity>, DomainError> {
        let conn = self.conn()?;
        load_activity(&conn, id).await
    }

    async fn save_activity(&self, activity: &Activity) -> Result<(), DomainError> {
        self.write(
            "UPDATE activities SET title = ?1, status = ?2, description = ?3, rules = ?4, \
             start_time = ?5, end_time = ?6, target_users = ?7, max_participants = ?8, \
             budget = ?9, updated_at = ?10 WHERE id = ?11",
            params![
                activity.title.as_str(),
                activity.status.as_str(),
                activity.description.clone(),
                json_text(&activity.rules),
                ts(activity.start_time),
                ts(activity.end_time),
                json_text(&activity.target_users),
                activity.max_participants,
                activity.budget,
                ts(activity.updated_at),
                activity.id
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_activities(
        &self,
        status: Option<ActivityStatus>,
        activity_type: Option<ActivityType>,
        page: PageRequest,
    ) -> Result<(Vec<Activity>, i64), DomainError> {
        let conn = self.conn()?;
        paged(
            &conn,
            "activities",
            ACTIVITY_COLUMNS,
            vec![
                ("status", status.map(|s| Value::Text(s.as_str().into()))),
                (
                    "activity_type",
                    activity_type.map(|t| Value::Text(t.as_str().into())),
                ),
            ],
            page,
            activity_from_row,
        )
        .await
    }

    async fn delete_activity(&self, id: i64) -> Result<bool, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            let joined = query_i64(
                &tx,
                "SELECT COUNT(*) FROM activity_participations WHERE activity_id = ?1",
                params![id],
            )
            .await?;
            if joined > 0 {
                return Err(DomainError::Conflict(format!(
                    "activity {} already has {} participants",
                    id, joined
                )));
            }
            let deleted = tx
                .execute("DELETE FROM activities WHERE id = ?1", params![id])
                .await
                .map_err(db_err)?;
            Ok(deleted == 1)
        }
        .await;
        finish(tx, result).await
    }

    async fn record_participation(
        &self,
        activity_id: i64,
        user_id: i64,
        reward: &Reward,
        now: DateTime<Utc>,
    ) -> Result<ActivityParticipation, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            let activity = load_activity(&tx, activity_id)
                .await?
                .ok_or_else(|| DomainError::NotFound(format!("activity {}", activity_id)))?;
            if !activity.is_running(now) {
                return Err(DomainError::InvalidState(format!(
                    "activity {} is not running",
                    activity_id
                )));
            }
            let joined = query_i64(
                &tx,
                "SELECT COUNT(*) FROM activity_participations WHERE activity_id = ?1 AND user_id = ?2",
                params![activity_id, user_id],
            )
            .await?;
            if joined > 0 {
                return Err(DomainError::Conflict("already participated".into()));
            }
            if activity.is_full() {
                return Err(DomainError::Conflict(format!(
                    "activity {} is full",
                    activity_id
                )));
            }
            let cost = reward.cost();
            if activity.budget.is_some_and(|budget| activity.cost + cost > budget) {
                return Err(DomainError::Conflict(format!(
                    "activity {} budget exhausted",
                    activity_id
                )));
            }
            tx.execute(
                "UPDATE activities SET current_participants = current_participants + 1, \
                 cost = cost + ?1, updated_at = ?2 WHERE id = ?3",
                params![cost, ts(now), activity_id],
            )
            .await
            .map_err(db_err)?;

            let (reward_amount, reward_data) = match reward {
                Reward::None => (None, None),
                Reward::Credits(credits) => {
                    let change = CreditChange::credit(
                        user_id,
                        TransactionType::Reward,
                        *credits,
                        format!("Activity reward: {}", activity.title),
                    )
                    .related(Some(activity_id), Some("activity"));
                    apply_change_in(&tx, &change, now).await?;
                    (Some(*credits), Some(json!({ "credits": credits })))
                }
                Reward::Coupon { coupon_id, code } => {
                    let held = grant_in(&tx, user_id, *coupon_id, now).await?;
                    (
                        None,
                        Some(json!({
                            "coupon_id": coupon_id,
                            "coupon_code": code,
                            "user_coupon_id": held.id,
                        })),
                    )
                }
            };
            tx.execute(
                "INSERT INTO activity_participations \
                 (activity_id, user_id, reward_type, reward_amount, reward_data, participated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    activity_id,
                    user_id,
                    reward.reward_type(),
                    reward_amount,
                    json_text(&reward_data),
                    ts(now)
                ],
            )
            .await
            .map_err(unique_or_db("already participated"))?;
            query_one(
                &tx,
                &format!(
                    "SELECT {} FROM activity_participations WHERE id = ?1",
                    PARTICIPATION_COLUMNS
                ),
                params![tx.last_insert_rowid()],
                participation_from_row,
            )
            .await?
            .ok_or_else(|| DomainError::Repo("inserted participation vanished".into()))
        }
        .await;
        let participation = finish(tx, result).await?;
        info!(
            activity_id,
            user_id,
            reward = participation.reward_type.as_deref().unwrap_or("none"),
            "activity participation recorded"
        );
        Ok(participation)
    }

    async fn list_participations(
        &self,
        activity_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<ActivityParticipation>, i64), DomainError> {
        let conn = self.conn()?;
        paged(
            &conn,
            "activity_participations",
            PARTICIPATION_COLUMNS,
            vec![("activity_id", Some(Value::Integer(activity_id)))],
            page,
            participation_from_row,
        )
        .await
    }
}

// ============ Coupons ============

#[async_trait::async_trait]
impl CouponStore for SqliteRepo {
    async fn insert_coupon(
        &self,
        req: &CouponCreate,
        now: DateTime<Utc>,
    ) -> Result<Coupon, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            tx.execute(
                r#"
                INSERT INTO coupons
                    (code, name, coupon_type, discount_type, discount_value, min_amount,
                     max_discount, total_quantity, used_quantity, valid_from, valid_until,
                     description, activity_id, is_active, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11, ?12, 1, ?13, ?13)
                "#,
                params![
                    req.code.as_str(),
                    req.name.as_str(),
                    req.coupon_type.as_str(),
                    req.discount_type.as_str(),
                    req.discount_value,
                    req.min_amount,
                    req.max_discount,
                    req.total_quantity,
                    ts(req.valid_from),
                    ts(req.valid_until),
                    req.description.clone(),
                    req.activity_id,
                    ts(now)
                ],
            )
            .await
            .map_err(unique_or_db("coupon code already exists"))?;
            load_coupon(&tx, tx.last_insert_rowid())
                .await?
                .ok_or_else(|| DomainError::Repo("inserted coupon vanished".into()))
        }
        .await;
        finish(tx, result).await
    }

    async fn get_coupon(&self, id: i64) -> Result<Option<Coupon>, DomainError> {
        let conn = self.conn()?;
        load_coupon(&conn, id).await
    }

    async fn find_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, DomainError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM coupons WHERE code = ?1", COUPON_COLUMNS),
            params![code],
            coupon_from_row,
        )
        .await
    }

    async fn save_coupon(&self, coupon: &Coupon) -> Result<(), DomainError> {
        self.write(
            "UPDATE coupons SET name = ?1, discount_value = ?2, min_amount = ?3, \
             max_discount = ?4, total_quantity = ?5, valid_from = ?6, valid_until = ?7, \
             description = ?8, is_active = ?9, updated_at = ?10 WHERE id = ?11",
            params![
                coupon.name.as_str(),
                coupon.discount_value,
                coupon.min_amount,
                coupon.max_discount,
                coupon.total_quantity,
                ts(coupon.valid_from),
                ts(coupon.valid_until),
                coupon.description.clone(),
                flag(coupon.is_active),
                ts(coupon.updated_at),
                coupon.id
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_coupons(
        &self,
        coupon_type: Option<CouponType>,
        is_active: Option<bool>,
        page: PageRequest,
    ) -> Result<(Vec<Coupon>, i64), DomainError> {
        let conn = self.conn()?;
        paged(
            &conn,
            "coupons",
            COUPON_COLUMNS,
            vec![
                (
                    "coupon_type",
                    coupon_type.map(|t| Value::Text(t.as_str().into())),
                ),
                ("is_active", is_active.map(|b| Value::Integer(flag(b)))),
            ],
            page,
            coupon_from_row,
        )
        .await
    }

    async fn grant_coupon(
        &self,
        user_id: i64,
        coupon_id: i64,
        now: DateTime<Utc>,
    ) -> Result<UserCoupon, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = grant_in(&tx, user_id, coupon_id, now).await;
        finish(tx, result).await
    }

    async fn find_user_coupon(
        &self,
        user_id: i64,
        coupon_id: i64,
    ) -> Result<Option<UserCoupon>, DomainError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            &format!(
                "SELECT {} FROM user_coupons WHERE user_id = ?1 AND coupon_id = ?2",
                USER_COUPON_COLUMNS
            ),
            params![user_id, coupon_id],
            user_coupon_from_row,
        )
        .await
    }

    async fn list_user_coupons(
        &self,
        user_id: i64,
        status: Option<CouponStatus>,
        page: PageRequest,
    ) -> Result<(Vec<(UserCoupon, Coupon)>, i64), DomainError> {
        let conn = self.conn()?;
        let status = opt_value(status.map(|s| s.as_str().to_string()));
        let total = query_i64(
            &conn,
            "SELECT COUNT(*) FROM user_coupons WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)",
            Params::Positional(vec![Value::Integer(user_id), status.clone()]),
        )
        .await?;
        let held_columns = USER_COUPON_COLUMNS
            .split(", ")
            .map(|c| format!("uc.{}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let coupon_columns = COUPON_COLUMNS
            .split(", ")
            .map(|c| format!("c.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        let items = query_all(
            &conn,
            &format!(
                "SELECT {}, {} FROM user_coupons uc JOIN coupons c ON c.id = uc.coupon_id \
                 WHERE uc.user_id = ?1 AND (?2 IS NULL OR uc.status = ?2) \
                 ORDER BY uc.id DESC LIMIT ?3 OFFSET ?4",
                held_columns, coupon_columns
            ),
            Params::Positional(vec![
                Value::Integer(user_id),
                status,
                Value::Integer(page.limit),
                Value::Integer(page.skip),
            ]),
            held_coupon_from_row,
        )
        .await?;
        Ok((items, total))
    }

    async fn expire_user_coupons(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<u64, DomainError> {
        self.write(
            "UPDATE user_coupons SET status = 'expired' WHERE user_id = ?1 AND status = 'unused' \
             AND coupon_id IN (SELECT id FROM coupons WHERE valid_until < ?2)",
            params![user_id, ts(now)],
        )
        .await
    }

    async fn redeem_user_coupon(
        &self,
        user_coupon_id: i64,
        order_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = redeem_in(&tx, user_coupon_id, order_id, now).await;
        finish(tx, result).await
    }
}

// ============ Referrals ============

#[async_trait::async_trait]
impl ReferralStore for SqliteRepo {
    async fn insert_referral(
        &self,
        referrer_id: i64,
        referee_id: i64,
        referral_code: &str,
        trigger: ReferralTrigger,
        reward_credits: i64,
        now: DateTime<Utc>,
    ) -> Result<ReferralRecord, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            tx.execute(
                r#"
                INSERT INTO referral_records
                    (referrer_id, referee_id, referral_code, reward_type, reward_credits, status,
                     trigger_event, created_at, updated_at)
                VALUES (?1, ?2, ?3, 'credits', ?4, 'pending', ?5, ?6, ?6)
                "#,
                params![
                    referrer_id,
                    referee_id,
                    referral_code,
                    reward_credits,
                    trigger.as_str(),
                    ts(now)
                ],
            )
            .await
            .map_err(db_err)?;
            load_referral(&tx, tx.last_insert_rowid())
                .await?
                .ok_or_else(|| DomainError::Repo("inserted referral vanished".into()))
        }
        .await;
        finish(tx, result).await
    }

    async fn get_referral(&self, id: i64) -> Result<Option<ReferralRecord>, DomainError> {
        let conn = self.conn()?;
        load_referral(&conn, id).await
    }

    async fn find_pending_referral(
        &self,
        referee_id: i64,
        trigger: ReferralTrigger,
    ) -> Result<Option<ReferralRecord>, DomainError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            &format!(
                "SELECT {} FROM referral_records WHERE referee_id = ?1 AND status = 'pending' \
                 AND trigger_event = ?2 ORDER BY id ASC LIMIT 1",
                REFERRAL_COLUMNS
            ),
            params![referee_id, trigger.as_str()],
            referral_from_row,
        )
        .await
    }

    async fn settle_referral(
        &self,
        record_id: i64,
        trigger_amount: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Option<ReferralRecord>, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            let changed = tx
                .execute(
                    "UPDATE referral_records SET status = 'settled', settled_at = ?1, \
                     trigger_amount = ?2, updated_at = ?1 WHERE id = ?3 AND status = 'pending'",
                    params![ts(now), trigger_amount, record_id],
                )
                .await
                .map_err(db_err)?;
            if changed == 0 {
                return Ok(None);
            }
            let record = load_referral(&tx, record_id)
                .await?
                .ok_or_else(|| DomainError::NotFound(format!("referral {}", record_id)))?;
            let credits = record.reward_credits.unwrap_or(0);
            if credits > 0 {
                let change = CreditChange::credit(
                    record.referrer_id,
                    TransactionType::Reward,
                    credits,
                    format!("Referral reward for user {}", record.referee_id),
                )
                .related(Some(record.id), Some("referral"));
                apply_change_in(&tx, &change, now).await?;
            }
            Ok(Some(record))
        }
        .await;
        let settled = finish(tx, result).await?;
        if let Some(record) = &settled {
            info!(
                record_id,
                referrer_id = record.referrer_id,
                credits = record.reward_credits.unwrap_or(0),
                "referral settled"
            );
        }
        Ok(settled)
    }

    async fn cancel_referral(&self, record_id: i64, now: DateTime<Utc>) -> Result<bool, DomainError> {
        let changed = self
            .write(
                "UPDATE referral_records SET status = 'cancelled', updated_at = ?1 \
                 WHERE id = ?2 AND status = 'pending'",
                params![ts(now), record_id],
            )
            .await?;
        Ok(changed == 1)
    }

    async fn list_referrals(
        &self,
        referrer_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<ReferralRecord>, i64), DomainError> {
        let conn = self.conn()?;
        paged(
            &conn,
            "referral_records",
            REFERRAL_COLUMNS,
            vec![("referrer_id", Some(Value::Integer(referrer_id)))],
            page,
            referral_from_row,
        )
        .await
    }

    async fn referral_totals(
        &self,
        referrer_id: i64,
    ) -> Result<ReferralStatisticsResponse, DomainError> {
        let conn = self.conn()?;
        let totals = query_one(
            &conn,
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(CASE WHEN status = 'settled' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0),
                   COALESCE(SUM(CASE WHEN status = 'settled' THEN reward_credits ELSE 0 END), 0)
            FROM referral_records WHERE referrer_id = ?1
            "#,
            params![referrer_id],
            |row| {
                Ok(ReferralStatisticsResponse {
                    total_referrals: row.i64_at(0)?,
                    settled_referrals: row.i64_at(1)?,
                    pending_referrals: row.i64_at(2)?,
                    total_reward_credits: row.i64_at(3)?,
                })
            },
        )
        .await?;
        Ok(totals.unwrap_or_default())
    }
}

// ============ Statistics ============

#[async_trait::async_trait]
impl StatisticsStore for SqliteRepo {
    async fn window_figures(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<OperationStatistics, DomainError> {
        let conn = self.conn()?;
        let (s, e) = (ts(start), ts(end));
        let scalar = |sql: &'static str| {
            let conn = &conn;
            async move { query_i64(conn, sql, params![s, e]).await }
        };

        let new_users =
            scalar("SELECT COUNT(*) FROM users WHERE created_at >= ?1 AND created_at < ?2").await?;
        let active_users = scalar(
            "SELECT COUNT(DISTINCT user_id) FROM credit_transactions \
             WHERE created_at >= ?1 AND created_at < ?2",
        )
        .await?;
        let paying_users = scalar(
            "SELECT COUNT(DISTINCT user_id) FROM ( \
               SELECT user_id FROM recharge_orders WHERE payment_status = 'paid' \
                 AND paid_at >= ?1 AND paid_at < ?2 \
               UNION \
               SELECT user_id FROM membership_orders WHERE payment_status = 'paid' \
                 AND paid_at >= ?1 AND paid_at < ?2)",
        )
        .await?;
        let recharge_amount = scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM recharge_orders \
             WHERE payment_status = 'paid' AND paid_at >= ?1 AND paid_at < ?2",
        )
        .await?;
        let recharge_count = scalar(
            "SELECT COUNT(*) FROM recharge_orders \
             WHERE payment_status = 'paid' AND paid_at >= ?1 AND paid_at < ?2",
        )
        .await?;
        let membership_amount = scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM membership_orders \
             WHERE payment_status = 'paid' AND paid_at >= ?1 AND paid_at < ?2",
        )
        .await?;
        let membership_count = scalar(
            "SELECT COUNT(*) FROM membership_orders \
             WHERE payment_status = 'paid' AND paid_at >= ?1 AND paid_at < ?2",
        )
        .await?;
        let credits_consumed = scalar(
            "SELECT COALESCE(SUM(-amount), 0) FROM credit_transactions \
             WHERE transaction_type = 'consume' AND created_at >= ?1 AND created_at < ?2",
        )
        .await?;
        let credits_recharged = scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM credit_transactions \
             WHERE transaction_type = 'recharge' AND created_at >= ?1 AND created_at < ?2",
        )
        .await?;
        let credits_rewarded = scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM credit_transactions \
             WHERE transaction_type = 'reward' AND created_at >= ?1 AND created_at < ?2",
        )
        .await?;
        let referral_count = scalar(
            "SELECT COUNT(*) FROM referral_records WHERE created_at >= ?1 AND created_at < ?2",
        )
        .await?;
        let referral_reward = scalar(
            "SELECT COALESCE(SUM(reward_credits), 0) FROM referral_records \
             WHERE status = 'settled' AND settled_at >= ?1 AND settled_at < ?2",
        )
        .await?;
        let activity_participants = scalar(
            "SELECT COUNT(*) FROM activity_participations \
             WHERE participated_at >= ?1 AND participated_at < ?2",
        )
        .await?;
        let activity_cost = scalar(
            "SELECT COALESCE(SUM(reward_amount), 0) FROM activity_participations \
             WHERE reward_type = 'credits' AND participated_at >= ?1 AND participated_at < ?2",
        )
        .await?;

        Ok(OperationStatistics {
            stat_date: None,
            stat_type: String::new(),
            new_users,
            active_users,
            paying_users,
            recharge_amount,
            recharge_count,
            membership_amount,
            membership_count,
            credits_consumed,
            credits_recharged,
            credits_rewarded,
            referral_count,
            referral_reward,
            activity_participants,
            activity_cost,
        })
    }

    async fn count_users(&self) -> Result<i64, DomainError> {
        let conn = self.conn()?;
        query_i64(&conn, "SELECT COUNT(*) FROM users", ()).await
    }

    async fn count_active_members(&self, now: DateTime<Utc>) -> Result<i64, DomainError> {
        let conn = self.conn()?;
        query_i64(
            &conn,
            "SELECT COUNT(*) FROM users WHERE is_member = 1 AND member_expired_at > ?1",
            params![ts(now)],
        )
        .await
    }

    async fn total_paid_recharge(&self) -> Result<i64, DomainError> {
        let conn = self.conn()?;
        query_i64(
            &conn,
            "SELECT COALESCE(SUM(amount), 0) FROM recharge_orders WHERE payment_status = 'paid'",
            (),
        )
        .await
    }

    async fn top_referrers(&self, limit: i64) -> Result<Vec<TopReferrer>, DomainError> {
        let conn = self.conn()?;
        query_all(
            &conn,
            "SELECT r.referrer_id, u.username, COUNT(*) AS settled \
             FROM referral_records r JOIN users u ON u.id = r.referrer_id \
             WHERE r.status = 'settled' \
             GROUP BY r.referrer_id, u.username \
             ORDER BY settled DESC, r.referrer_id ASC LIMIT ?1",
            params![limit],
            |row| {
                Ok(TopReferrer {
                    user_id: row.i64_at(0)?,
                    username: row.text_at(1)?,
                    settled_count: row.i64_at(2)?,
                })
            },
        )
        .await
    }
}

