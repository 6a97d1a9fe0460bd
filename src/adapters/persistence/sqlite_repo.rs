//! SQLite-backed repository via libsql. Implements every store port.
//!
//! One database file (data/creditops.db). Timestamps are unix seconds, money is cents,
//! JSON blocks are TEXT. Writes go through one IMMEDIATE transaction each, serialised
//! in-process by `write_lock`; readers use their own connections (WAL).
//!
//! The per-concern impls live next door: `order_store`, `operation_store`, `oauth_store`.

use crate::domain::{
    CreditChange, CreditTransaction, DomainError, TransactionType, UserAccount, UserRole,
};
use crate::ports::{LedgerStore, UserStore};
use crate::schemas::PageRequest;
use chrono::{DateTime, Utc};
use libsql::params::IntoParams;
use libsql::{Connection, Database, Row, Transaction, TransactionBehavior, Value, params};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

const SCHEMA: &[&str] = &[
    r#"
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL DEFAULT 'user',
    credits INTEGER NOT NULL DEFAULT 0,
    is_member INTEGER NOT NULL DEFAULT 0,
    member_expired_at INTEGER,
    referral_code TEXT UNIQUE,
    referred_by INTEGER,
    created_at INTEGER NOT NULL
)"#,
    r#"
CREATE TABLE IF NOT EXISTS credit_transactions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    transaction_type TEXT NOT NULL,
    amount INTEGER NOT NULL,
    balance_before INTEGER NOT NULL,
    balance_after INTEGER NOT NULL,
    description TEXT,
    related_id INTEGER,
    related_type TEXT,
    created_at INTEGER NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_credit_tx_user ON credit_transactions (user_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_credit_tx_created ON credit_transactions (created_at)",
    r#"
CREATE TABLE IF NOT EXISTS recharge_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_no TEXT NOT NULL UNIQUE,
    user_id INTEGER NOT NULL,
    amount INTEGER NOT NULL,
    credits INTEGER NOT NULL,
    bonus_credits INTEGER NOT NULL DEFAULT 0,
    payment_method TEXT,
    payment_status TEXT NOT NULL DEFAULT 'pending',
    paid_at INTEGER,
    transaction_id TEXT,
    coupon_code TEXT,
    discount_amount INTEGER NOT NULL DEFAULT 0,
    remark TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_recharge_user ON recharge_orders (user_id, id)",
    r#"
CREATE TABLE IF NOT EXISTS membership_orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    order_no TEXT NOT NULL UNIQUE,
    user_id INTEGER NOT NULL,
    membership_type TEXT NOT NULL,
    amount INTEGER NOT NULL,
    original_amount INTEGER,
    discount_amount INTEGER NOT NULL DEFAULT 0,
    duration_days INTEGER NOT NULL,
    payment_method TEXT,
    payment_status TEXT NOT NULL DEFAULT 'pending',
    paid_at INTEGER,
    expired_at INTEGER,
    transaction_id TEXT,
    coupon_code TEXT,
    remark TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_membership_user ON membership_orders (user_id, id)",
    r#"
CREATE TABLE IF NOT EXISTS credit_prices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    amount INTEGER NOT NULL,
    credits INTEGER NOT NULL,
    bonus_credits INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    sort_order INTEGER NOT NULL DEFAULT 0,
    description TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#,
    r#"
CREATE TABLE IF NOT EXISTS membership_prices (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    membership_type TEXT NOT NULL,
    amount INTEGER NOT NULL,
    original_amount INTEGER,
    duration_days INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    sort_order INTEGER NOT NULL DEFAULT 0,
    description TEXT,
    features TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#,
    r#"
CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    activity_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    description TEXT,
    rules TEXT,
    start_time INTEGER NOT NULL,
    end_time INTEGER NOT NULL,
    target_users TEXT,
    max_participants INTEGER,
    current_participants INTEGER NOT NULL DEFAULT 0,
    budget INTEGER,
    cost INTEGER NOT NULL DEFAULT 0,
    created_by INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#,
    r#"
CREATE TABLE IF NOT EXISTS activity_participations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    activity_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    reward_type TEXT,
    reward_amount INTEGER,
    reward_data TEXT,
    participated_at INTEGER NOT NULL,
    UNIQUE (activity_id, user_id)
)"#,
    r#"
CREATE TABLE IF NOT EXISTS coupons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    code TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    coupon_type TEXT NOT NULL,
    discount_type TEXT NOT NULL,
    discount_value INTEGER NOT NULL,
    min_amount INTEGER,
    max_discount INTEGER,
    total_quantity INTEGER,
    used_quantity INTEGER NOT NULL DEFAULT 0,
    valid_from INTEGER NOT NULL,
    valid_until INTEGER NOT NULL,
    description TEXT,
    activity_id INTEGER,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#,
    r#"
CREATE TABLE IF NOT EXISTS user_coupons (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    coupon_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'unused',
    used_at INTEGER,
    order_id INTEGER,
    received_at INTEGER NOT NULL,
    UNIQUE (user_id, coupon_id)
)"#,
    r#"
CREATE TABLE IF NOT EXISTS referral_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    referrer_id INTEGER NOT NULL,
    referee_id INTEGER NOT NULL,
    referral_code TEXT,
    reward_type TEXT,
    reward_amount INTEGER,
    reward_credits INTEGER,
    status TEXT NOT NULL DEFAULT 'pending',
    trigger_event TEXT,
    trigger_amount INTEGER,
    settled_at INTEGER,
    remark TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_referral_referrer ON referral_records (referrer_id, id)",
    "CREATE INDEX IF NOT EXISTS idx_referral_referee ON referral_records (referee_id, status)",
    r#"
CREATE TABLE IF NOT EXISTS platform_configs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    platform_id TEXT NOT NULL UNIQUE,
    platform_name TEXT NOT NULL,
    platform_icon TEXT,
    priority INTEGER NOT NULL DEFAULT 99,
    is_enabled INTEGER NOT NULL DEFAULT 1,
    oauth_config TEXT,
    litellm_config TEXT,
    quota_config TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
)"#,
    r#"
CREATE TABLE IF NOT EXISTS oauth_accounts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    platform TEXT NOT NULL,
    account_name TEXT,
    credentials TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_expired INTEGER NOT NULL DEFAULT 0,
    quota_used INTEGER NOT NULL DEFAULT 0,
    quota_limit INTEGER,
    last_used_at INTEGER,
    expired_at INTEGER,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (user_id, platform)
)"#,
    r#"
CREATE TABLE IF NOT EXISTS oauth_usage_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    account_id INTEGER NOT NULL,
    platform TEXT NOT NULL,
    model TEXT,
    request_type TEXT,
    prompt_tokens INTEGER,
    completion_tokens INTEGER,
    total_tokens INTEGER,
    status TEXT NOT NULL,
    error_message TEXT,
    response_time_ms INTEGER,
    created_at INTEGER NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_usage_account ON oauth_usage_logs (account_id, id)",
];

/// SQLite repository. One database file (creditops.db) in the given base directory.
pub struct SqliteRepo {
    db: Database,
    db_path: PathBuf,
    write_lock: Mutex<()>,
}

impl SqliteRepo {
    /// Connect to (or create) the SQLite database and ensure the schema exists.
    /// Call this once at startup; the returned repo is safe to share via Arc.
    pub async fn connect(base_dir: impl AsRef<Path>) -> Result<Self, DomainError> {
        let base = base_dir.as_ref();
        std::fs::create_dir_all(base).map_err(|e| DomainError::Repo(e.to_string()))?;
        let db_path = base.join("creditops.db");
        let path_str = db_path.to_string_lossy();
        let db = libsql::Builder::new_local(path_str.as_ref())
            .build()
            .await
            .map_err(db_err)?;
        let conn = db.connect().map_err(db_err)?;

        // PRAGMA returns a row; execute fails when rows come back, so drain a query.
        for pragma in ["PRAGMA journal_mode=WAL", "PRAGMA synchronous=NORMAL"] {
            let mut rows = conn
                .query(pragma, ())
                .await
                .map_err(|e| DomainError::Repo(format!("{} failed: {}", pragma, e)))?;
            while rows.next().await.map_err(db_err)?.is_some() {}
        }

        for stmt in SCHEMA {
            conn.execute(stmt, ()).await.map_err(db_err)?;
        }

        info!(
            path = %db_path.display(),
            tables = 14,
            "SQLite connected with WAL mode"
        );

        Ok(Self {
            db,
            db_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub(super) fn conn(&self) -> Result<Connection, DomainError> {
        self.db.connect().map_err(db_err)
    }

    /// Opens an IMMEDIATE transaction while holding the in-process write lock.
    /// Keep the guard alive until `finish` returns.
    pub(super) async fn write_tx(&self) -> Result<(MutexGuard<'_, ()>, Transaction), DomainError> {
        let guard = self.write_lock.lock().await;
        let conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .await
            .map_err(db_err)?;
        Ok((guard, tx))
    }

    /// Single statement write outside an explicit transaction. Returns rows changed.
    pub(super) async fn write(
        &self,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<u64, DomainError> {
        let _guard = self.write_lock.lock().await;
        let conn = self.conn()?;
        conn.execute(sql, params).await.map_err(db_err)
    }
}

/// Commits on `Ok`, rolls back on `Err`.
pub(super) async fn finish<T>(
    tx: Transaction,
    result: Result<T, DomainError>,
) -> Result<T, DomainError> {
    match result {
        Ok(value) => {
            tx.commit().await.map_err(db_err)?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                warn!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}

pub(super) fn db_err(e: libsql::Error) -> DomainError {
    DomainError::Repo(e.to_string())
}

/// Maps a unique-constraint failure to `Conflict(what)`, anything else to `Repo`.
pub(super) fn unique_or_db(what: &str) -> impl Fn(libsql::Error) -> DomainError + '_ {
    move |e| {
        if e.to_string().contains("UNIQUE constraint failed") {
            DomainError::Conflict(what.to_string())
        } else {
            db_err(e)
        }
    }
}

pub(super) fn ts(t: DateTime<Utc>) -> i64 {
    t.timestamp()
}

pub(super) fn opt_ts(t: Option<DateTime<Utc>>) -> Option<i64> {
    t.map(|t| t.timestamp())
}

pub(super) fn flag(b: bool) -> i64 {
    i64::from(b)
}

pub(super) fn json_text(v: &Option<serde_json::Value>) -> Option<String> {
    v.as_ref().map(|v| v.to_string())
}

/// Nullable parameter for dynamic parameter lists.
pub(super) fn opt_value<T: Into<Value>>(v: Option<T>) -> Value {
    v.map(Into::into).unwrap_or(Value::Null)
}

pub(super) async fn query_all<T>(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
    map: fn(&Row) -> Result<T, DomainError>,
) -> Result<Vec<T>, DomainError> {
    let mut rows = conn.query(sql, params).await.map_err(db_err)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(db_err)? {
        out.push(map(&row)?);
    }
    Ok(out)
}

pub(super) async fn query_one<T>(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
    map: fn(&Row) -> Result<T, DomainError>,
) -> Result<Option<T>, DomainError> {
    let mut rows = conn.query(sql, params).await.map_err(db_err)?;
    match rows.next().await.map_err(db_err)? {
        Some(row) => Ok(Some(map(&row)?)),
        None => Ok(None),
    }
}

/// First column of the first row as an integer. `NULL` or no row is 0.
pub(super) async fn query_i64(
    conn: &Connection,
    sql: &str,
    params: impl IntoParams,
) -> Result<i64, DomainError> {
    let mut rows = conn.query(sql, params).await.map_err(db_err)?;
    match rows.next().await.map_err(db_err)? {
        Some(row) => Ok(row.opt_i64(0)?.unwrap_or(0)),
        None => Ok(0),
    }
}

/// Typed column access on top of `Row::get_value`.
pub(super) trait RowExt {
    fn value(&self, idx: i32) -> Result<Value, DomainError>;

    fn opt_i64(&self, idx: i32) -> Result<Option<i64>, DomainError> {
        match self.value(idx)? {
            Value::Null => Ok(None),
            Value::Integer(n) => Ok(Some(n)),
            Value::Real(f) => Ok(Some(f as i64)),
            Value::Text(s) => s
                .parse()
                .map(Some)
                .map_err(|_| DomainError::Repo(format!("column {}: not an integer: {}", idx, s))),
            Value::Blob(_) => Err(DomainError::Repo(format!("column {}: unexpected blob", idx))),
        }
    }

    fn i64_at(&self, idx: i32) -> Result<i64, DomainError> {
        self.opt_i64(idx)?
            .ok_or_else(|| DomainError::Repo(format!("column {}: unexpected NULL", idx)))
    }

    fn bool_at(&self, idx: i32) -> Result<bool, DomainError> {
        Ok(self.opt_i64(idx)?.unwrap_or(0) != 0)
    }

    fn opt_text(&self, idx: i32) -> Result<Option<String>, DomainError> {
        match self.value(idx)? {
            Value::Null => Ok(None),
            Value::Text(s) => Ok(Some(s)),
            Value::Integer(n) => Ok(Some(n.to_string())),
            Value::Real(f) => Ok(Some(f.to_string())),
            Value::Blob(b) => Ok(Some(String::from_utf8_lossy(&b).into_owned())),
        }
    }

    fn text_at(&self, idx: i32) -> Result<String, DomainError> {
        self.opt_text(idx)?
            .ok_or_else(|| DomainError::Repo(format!("column {}: unexpected NULL", idx)))
    }

    fn opt_time(&self, idx: i32) -> Result<Option<DateTime<Utc>>, DomainError> {
        match self.opt_i64(idx)? {
            None => Ok(None),
            Some(secs) => DateTime::from_timestamp(secs, 0)
                .map(Some)
                .ok_or_else(|| DomainError::Repo(format!("column {}: bad timestamp {}", idx, secs))),
        }
    }

    fn time_at(&self, idx: i32) -> Result<DateTime<Utc>, DomainError> {
        self.opt_time(idx)?
            .ok_or_else(|| DomainError::Repo(format!("column {}: unexpected NULL", idx)))
    }

    /// JSON TEXT column. Unparseable content reads as `None` with a warning.
    fn opt_json(&self, idx: i32) -> Result<Option<serde_json::Value>, DomainError> {
        Ok(self.opt_text(idx)?.and_then(|s| match serde_json::from_str(&s) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(column = idx, error = %e, "ignoring malformed JSON column");
                None
            }
        }))
    }

    fn enum_at<T: FromStr<Err = DomainError>>(&self, idx: i32) -> Result<T, DomainError> {
        self.text_at(idx)?
            .parse()
            .map_err(|e: DomainError| DomainError::Repo(e.to_string()))
    }

    fn opt_enum<T: FromStr<Err = DomainError>>(&self, idx: i32) -> Result<Option<T>, DomainError> {
        match self.opt_text(idx)? {
            None => Ok(None),
            Some(s) => s
                .parse()
                .map(Some)
                .map_err(|e: DomainError| DomainError::Repo(e.to_string())),
        }
    }
}

impl RowExt for Row {
    fn value(&self, idx: i32) -> Result<Value, DomainError> {
        self.get_value(idx).map_err(db_err)
    }
}

// ============ Users ============

const USER_COLUMNS: &str = "id, username, role, credits, is_member, member_expired_at, \
                            referral_code, referred_by, created_at";

fn user_from_row(row: &Row) -> Result<UserAccount, DomainError> {
    Ok(UserAccount {
        id: row.i64_at(0)?,
        username: row.text_at(1)?,
        role: row.enum_at(2)?,
        credits: row.i64_at(3)?,
        is_member: row.bool_at(4)?,
        member_expired_at: row.opt_time(5)?,
        referral_code: row.opt_text(6)?,
        referred_by: row.opt_i64(7)?,
        created_at: row.time_at(8)?,
    })
}

pub(super) async fn load_user(conn: &Connection, user_id: i64) -> Result<UserAccount, DomainError> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![user_id],
        user_from_row,
    )
    .await?
    .ok_or_else(|| DomainError::NotFound(format!("user {}", user_id)))
}

#[async_trait::async_trait]
impl UserStore for SqliteRepo {
    async fn create_user(
        &self,
        username: &str,
        role: UserRole,
        referred_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<UserAccount, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            tx.execute(
                "INSERT INTO users (username, role, referred_by, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![username, role.as_str(), referred_by, ts(now)],
            )
            .await
            .map_err(unique_or_db("username already taken"))?;
            load_user(&tx, tx.last_insert_rowid()).await
        }
        .await;
        finish(tx, result).await
    }

    async fn get_user(&self, user_id: i64) -> Result<Option<UserAccount>, DomainError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![user_id],
            user_from_row,
        )
        .await
    }

    async fn find_user_by_referral_code(
        &self,
        code: &str,
    ) -> Result<Option<UserAccount>, DomainError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            &format!("SELECT {} FROM users WHERE referral_code = ?1", USER_COLUMNS),
            params![code],
            user_from_row,
        )
        .await
    }

    async fn assign_referral_code(&self, user_id: i64, code: &str) -> Result<bool, DomainError> {
        let changed = self
            .write(
                "UPDATE users SET referral_code = ?1 WHERE id = ?2 AND referral_code IS NULL",
                params![code, user_id],
            )
            .await;
        match changed {
            Ok(n) => Ok(n == 1),
            Err(DomainError::Repo(msg)) if msg.contains("UNIQUE constraint failed") => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn clear_membership(
        &self,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, DomainError> {
        // a renewal committed after the caller's read moves the expiry past `now`
        let changed = self
            .write(
                "UPDATE users SET is_member = 0, member_expired_at = NULL \
                 WHERE id = ?1 AND is_member = 1 \
                 AND (member_expired_at IS NULL OR member_expired_at <= ?2)",
                params![user_id, ts(now)],
            )
            .await?;
        Ok(changed == 1)
    }
}

// ============ Ledger ============

const TX_COLUMNS: &str = "id, user_id, transaction_type, amount, balance_before, balance_after, \
                          description, related_id, related_type, created_at";

fn transaction_from_row(row: &Row) -> Result<CreditTransaction, DomainError> {
    Ok(CreditTransaction {
        id: row.i64_at(0)?,
        user_id: row.i64_at(1)?,
        transaction_type: row.enum_at(2)?,
        amount: row.i64_at(3)?,
        balance_before: row.i64_at(4)?,
        balance_after: row.i64_at(5)?,
        description: row.opt_text(6)?,
        related_id: row.opt_i64(7)?,
        related_type: row.opt_text(8)?,
        created_at: row.time_at(9)?,
    })
}

/// Moves the balance and appends the ledger row on `conn`, which must already be
/// inside a write transaction.
pub(super) async fn apply_change_in(
    conn: &Connection,
    change: &CreditChange,
    now: DateTime<Utc>,
) -> Result<CreditTransaction, DomainError> {
    let balance = query_one(
        conn,
        "SELECT credits FROM users WHERE id = ?1",
        params![change.user_id],
        |row| row.i64_at(0),
    )
    .await?
    .ok_or_else(|| DomainError::NotFound(format!("user {}", change.user_id)))?;

    let mut amount = change.amount;
    if amount < 0 && change.clamp_to_balance {
        amount = amount.max(-balance);
        if amount == 0 {
            return Err(DomainError::InvalidState("balance is already empty".into()));
        }
    }
    if balance + amount < 0 {
        return Err(DomainError::InsufficientCredits {
            balance,
            required: -amount,
        });
    }

    let updated = conn
        .execute(
            "UPDATE users SET credits = credits + ?1 WHERE id = ?2 AND credits + ?1 >= 0",
            params![amount, change.user_id],
        )
        .await
        .map_err(db_err)?;
    if updated != 1 {
        return Err(DomainError::InsufficientCredits {
            balance,
            required: -amount,
        });
    }

    conn.execute(
        r#"
        INSERT INTO credit_transactions
            (user_id, transaction_type, amount, balance_before, balance_after,
             description, related_id, related_type, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            change.user_id,
            change.transaction_type.as_str(),
            amount,
            balance,
            balance + amount,
            change.description.as_str(),
            change.related_id,
            change.related_type.clone(),
            ts(now)
        ],
    )
    .await
    .map_err(db_err)?;

    debug!(
        user_id = change.user_id,
        kind = %change.transaction_type,
        amount,
        balance_after = balance + amount,
        "ledger row appended"
    );

    Ok(CreditTransaction {
        id: conn.last_insert_rowid(),
        user_id: change.user_id,
        transaction_type: change.transaction_type,
        amount,
        balance_before: balance,
        balance_after: balance + amount,
        description: Some(change.description.clone()),
        related_id: change.related_id,
        related_type: change.related_type.clone(),
        created_at: DateTime::from_timestamp(ts(now), 0).unwrap_or(now),
    })
}

#[async_trait::async_trait]
impl LedgerStore for SqliteRepo {
    async fn apply_credit_change(
        &self,
        change: &CreditChange,
        now: DateTime<Utc>,
    ) -> Result<CreditTransaction, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = apply_change_in(&tx, change, now).await;
        finish(tx, result).await
    }

    async fn list_transactions(
        &self,
        user_id: i64,
        page: PageRequest,
    ) -> Result<(Vec<CreditTransaction>, i64), DomainError> {
        let conn = self.conn()?;
        let total = query_i64(
            &conn,
            "SELECT COUNT(*) FROM credit_transactions WHERE user_id = ?1",
            params![user_id],
        )
        .await?;
        let items = query_all(
            &conn,
            &format!(
                "SELECT {} FROM credit_transactions WHERE user_id = ?1 \
                 ORDER BY id DESC LIMIT ?2 OFFSET ?3",
                TX_COLUMNS
            ),
            params![user_id, page.limit, page.skip],
            transaction_from_row,
        )
        .await?;
        Ok((items, total))
    }

    async fn ledger(&self, user_id: i64) -> Result<Vec<CreditTransaction>, DomainError> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM credit_transactions WHERE user_id = ?1 ORDER BY id ASC",
                TX_COLUMNS
            ),
            params![user_id],
            transaction_from_row,
        )
        .await
    }

    async fn credit_totals(
        &self,
        user_id: i64,
    ) -> Result<Vec<(TransactionType, i64)>, DomainError> {
        let conn = self.conn()?;
        query_all(
            &conn,
            "SELECT transaction_type, COALESCE(SUM(ABS(amount)), 0) FROM credit_transactions \
             WHERE user_id = ?1 GROUP BY transaction_type",
            params![user_id],
            |row| Ok((row.enum_at(0)?, row.i64_at(1)?)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn repo() -> (TempDir, SqliteRepo) {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepo::connect(dir.path()).await.unwrap();
        (dir, repo)
    }

    #[tokio::test]
    async fn test_connect_creates_db_file() {
        let (dir, repo) = repo().await;
        assert!(dir.path().join("creditops.db").exists());
        assert_eq!(repo.db_path(), dir.path().join("creditops.db"));
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let (_dir, repo) = repo().await;
        let now = Utc::now();
        repo.create_user("alice", UserRole::User, None, now).await.unwrap();
        let err = repo
            .create_user("alice", UserRole::User, None, now)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_credit_change_moves_balance_and_logs() {
        let (_dir, repo) = repo().await;
        let now = Utc::now();
        let user = repo.create_user("bob", UserRole::User, None, now).await.unwrap();

        let row = repo
            .apply_credit_change(
                &CreditChange::credit(user.id, TransactionType::Recharge, 100, "top up"),
                now,
            )
            .await
            .unwrap();
        assert_eq!((row.balance_before, row.balance_after), (0, 100));

        let err = repo
            .apply_credit_change(
                &CreditChange::debit(user.id, TransactionType::Consume, 150, "too much"),
                now,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DomainError::InsufficientCredits { balance: 100, required: 150 }
        ));

        let clamped = repo
            .apply_credit_change(
                &CreditChange::debit(user.id, TransactionType::Expire, 150, "expire").clamped(),
                now,
            )
            .await
            .unwrap();
        assert_eq!(clamped.amount, -100);

        let stored = repo.get_user(user.id).await.unwrap().unwrap();
        assert_eq!(stored.credits, 0);
        assert_eq!(repo.ledger(user.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_referral_code_assignment_is_unique() {
        let (_dir, repo) = repo().await;
        let now = Utc::now();
        let a = repo.create_user("a", UserRole::User, None, now).await.unwrap();
        let b = repo.create_user("b", UserRole::User, None, now).await.unwrap();
        assert!(repo.assign_referral_code(a.id, "ABCD1234").await.unwrap());
        assert!(!repo.assign_referral_code(b.id, "ABCD1234").await.unwrap());
        let found = repo.find_user_by_referral_code("ABCD1234").await.unwrap().unwrap();
        assert_eq!(found.id, a.id);
    }

    #[tokio::test]
    async fn test_clear_membership_keeps_a_renewed_expiry() {
        let (_dir, repo) = repo().await;
        let now = Utc::now();
        let user = repo.create_user("member", UserRole::User, None, now).await.unwrap();
        let set_expiry = |at: DateTime<Utc>| {
            repo.write(
                "UPDATE users SET is_member = 1, member_expired_at = ?1 WHERE id = ?2",
                params![ts(at), user.id],
            )
        };

        // renewed to 30 days out after the caller saw a lapsed membership
        set_expiry(now + chrono::Duration::days(30)).await.unwrap();
        assert!(!repo.clear_membership(user.id, now).await.unwrap());
        let kept = repo.get_user(user.id).await.unwrap().unwrap();
        assert!(kept.is_active_member(now));

        set_expiry(now - chrono::Duration::days(1)).await.unwrap();
        assert!(repo.clear_membership(user.id, now).await.unwrap());
        let cleared = repo.get_user(user.id).await.unwrap().unwrap();
        assert!(!cleared.is_member);
        assert_eq!(cleared.member_expired_at, None);
        assert!(!repo.clear_membership(user.id, now).await.unwrap());
    }
}
