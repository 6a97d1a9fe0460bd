//! Platform configs, OAuth accounts and their usage logs.

use super::sqlite_repo::{
    RowExt, SqliteRepo, db_err, finish, flag, json_text, opt_ts, opt_value, query_all, query_one,
    ts, unique_or_db,
};
use crate::domain::{DomainError, OAuthAccount, OAuthUsageLog, PlatformConfig, UsageStatus};
use crate::ports::OAuthStore;
use crate::schemas::oauth::{OAuthUsageLogCreate, PlatformConfigCreate, PlatformUsage};
use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Connection, Row, Value, params};
use tracing::{info, warn};

const PLATFORM_COLUMNS: &str = "id, platform_id, platform_name, platform_icon, priority, \
    is_enabled, oauth_config, litellm_config, quota_config, created_at, updated_at";

const ACCOUNT_COLUMNS: &str = "id, user_id, platform, account_name, credentials, is_active, \
    is_expired, quota_used, quota_limit, last_used_at, expired_at, created_at, updated_at";

const USAGE_COLUMNS: &str = "id, user_id, account_id, platform, model, request_type, \
    prompt_tokens, completion_tokens, total_tokens, status, error_message, response_time_ms, \
    created_at";

fn platform_from_row(row: &Row) -> Result<PlatformConfig, DomainError> {
    Ok(PlatformConfig {
        id: row.i64_at(0)?,
        platform_id: row.text_at(1)?,
        platform_name: row.text_at(2)?,
        platform_icon: row.opt_text(3)?,
        priority: row.i64_at(4)?,
        is_enabled: row.bool_at(5)?,
        oauth_config: row.opt_json(6)?,
        litellm_config: row.opt_json(7)?,
        quota_config: row.opt_json(8)?,
        created_at: row.time_at(9)?,
        updated_at: row.time_at(10)?,
    })
}

fn account_from_row(row: &Row) -> Result<OAuthAccount, DomainError> {
    Ok(OAuthAccount {
        id: row.i64_at(0)?,
        user_id: row.i64_at(1)?,
        platform: row.text_at(2)?,
        account_name: row.opt_text(3)?,
        credentials: row.text_at(4)?,
        is_active: row.bool_at(5)?,
        is_expired: row.bool_at(6)?,
        quota_used: row.i64_at(7)?,
        quota_limit: row.opt_i64(8)?,
        last_used_at: row.opt_time(9)?,
        expired_at: row.opt_time(10)?,
        created_at: row.time_at(11)?,
        updated_at: row.time_at(12)?,
    })
}

fn usage_from_row(row: &Row) -> Result<OAuthUsageLog, DomainError> {
    Ok(OAuthUsageLog {
        id: row.i64_at(0)?,
        user_id: row.i64_at(1)?,
        account_id: row.i64_at(2)?,
        platform: row.text_at(3)?,
        model: row.opt_text(4)?,
        request_type: row.opt_text(5)?,
        prompt_tokens: row.opt_i64(6)?,
        completion_tokens: row.opt_i64(7)?,
        total_tokens: row.opt_i64(8)?,
        status: row.enum_at(9)?,
        error_message: row.opt_text(10)?,
        response_time_ms: row.opt_i64(11)?,
        created_at: row.time_at(12)?,
    })
}

async fn load_platform(
    conn: &Connection,
    platform_id: &str,
) -> Result<Option<PlatformConfig>, DomainError> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM platform_configs WHERE platform_id = ?1",
            PLATFORM_COLUMNS
        ),
        params![platform_id],
        platform_from_row,
    )
    .await
}

async fn load_account(conn: &Connection, id: i64) -> Result<Option<OAuthAccount>, DomainError> {
    query_one(
        conn,
        &format!("SELECT {} FROM oauth_accounts WHERE id = ?1", ACCOUNT_COLUMNS),
        params![id],
        account_from_row,
    )
    .await
}

#[async_trait::async_trait]
impl OAuthStore for SqliteRepo {
    async fn insert_platform(
        &self,
        req: &PlatformConfigCreate,
        now: DateTime<Utc>,
    ) -> Result<PlatformConfig, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            tx.execute(
                r#"
                INSERT INTO platform_configs
                    (platform_id, platform_name, platform_icon, priority, is_enabled,
                     oauth_config, litellm_config, quota_config, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
                "#,
                params![
                    req.platform_id.as_str(),
                    req.platform_name.as_str(),
                    req.platform_icon.clone(),
                    req.priority,
                    flag(req.is_enabled),
                    json_text(&req.oauth_config),
                    json_text(&req.litellm_config),
                    json_text(&req.quota_config),
                    ts(now)
                ],
            )
            .await
            .map_err(unique_or_db("platform already exists"))?;
            load_platform(&tx, &req.platform_id)
                .await?
                .ok_or_else(|| DomainError::Repo("inserted platform vanished".into()))
        }
        .await;
        finish(tx, result).await
    }

    async fn get_platform(&self, platform_id: &str) -> Result<Option<PlatformConfig>, DomainError> {
        let conn = self.conn()?;
        load_platform(&conn, platform_id).await
    }

    async fn save_platform(&self, platform: &PlatformConfig) -> Result<(), DomainError> {
        self.write(
            "UPDATE platform_configs SET platform_name = ?1, platform_icon = ?2, priority = ?3, \
             is_enabled = ?4, oauth_config = ?5, litellm_config = ?6, quota_config = ?7, \
             updated_at = ?8 WHERE id = ?9",
            params![
                platform.platform_name.as_str(),
                platform.platform_icon.clone(),
                platform.priority,
                flag(platform.is_enabled),
                json_text(&platform.oauth_config),
                json_text(&platform.litellm_config),
                json_text(&platform.quota_config),
                ts(platform.updated_at),
                platform.id
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_platforms(&self, enabled_only: bool) -> Result<Vec<PlatformConfig>, DomainError> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM platform_configs WHERE (?1 = 0 OR is_enabled = 1) \
                 ORDER BY priority ASC, id ASC",
                PLATFORM_COLUMNS
            ),
            params![flag(enabled_only)],
            platform_from_row,
        )
        .await
    }

    async fn insert_account(&self, account: &OAuthAccount) -> Result<OAuthAccount, DomainError> {
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            tx.execute(
                r#"
                INSERT INTO oauth_accounts
                    (user_id, platform, account_name, credentials, is_active, is_expired,
                     quota_used, quota_limit, last_used_at, expired_at, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    account.user_id,
                    account.platform.as_str(),
                    account.account_name.clone(),
                    account.credentials.as_str(),
                    flag(account.is_active),
                    flag(account.is_expired),
                    account.quota_used,
                    account.quota_limit,
                    opt_ts(account.last_used_at),
                    opt_ts(account.expired_at),
                    ts(account.created_at),
                    ts(account.updated_at)
                ],
            )
            .await
            .map_err(unique_or_db("account for this platform already exists"))?;
            load_account(&tx, tx.last_insert_rowid())
                .await?
                .ok_or_else(|| DomainError::Repo("inserted account vanished".into()))
        }
        .await;
        finish(tx, result).await
    }

    async fn get_account(&self, id: i64) -> Result<Option<OAuthAccount>, DomainError> {
        let conn = self.conn()?;
        load_account(&conn, id).await
    }

    async fn find_account(
        &self,
        user_id: i64,
        platform: &str,
    ) -> Result<Option<OAuthAccount>, DomainError> {
        let conn = self.conn()?;
        query_one(
            &conn,
            &format!(
                "SELECT {} FROM oauth_accounts WHERE user_id = ?1 AND platform = ?2",
                ACCOUNT_COLUMNS
            ),
            params![user_id, platform],
            account_from_row,
        )
        .await
    }

    async fn save_account(&self, account: &OAuthAccount) -> Result<(), DomainError> {
        self.write(
            "UPDATE oauth_accounts SET account_name = ?1, credentials = ?2, is_active = ?3, \
             is_expired = ?4, quota_used = ?5, quota_limit = ?6, last_used_at = ?7, \
             expired_at = ?8, updated_at = ?9 WHERE id = ?10",
            params![
                account.account_name.clone(),
                account.credentials.as_str(),
                flag(account.is_active),
                flag(account.is_expired),
                account.quota_used,
                account.quota_limit,
                opt_ts(account.last_used_at),
                opt_ts(account.expired_at),
                ts(account.updated_at),
                account.id
            ],
        )
        .await?;
        Ok(())
    }

    async fn delete_account(&self, id: i64) -> Result<bool, DomainError> {
        let deleted = self
            .write("DELETE FROM oauth_accounts WHERE id = ?1", params![id])
            .await?;
        Ok(deleted == 1)
    }

    async fn list_accounts(
        &self,
        user_id: i64,
        platform: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<Vec<OAuthAccount>, DomainError> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM oauth_accounts WHERE user_id = ?1 \
                 AND (?2 IS NULL OR platform = ?2) AND (?3 IS NULL OR is_active = ?3) \
                 ORDER BY id DESC",
                ACCOUNT_COLUMNS
            ),
            Params::Positional(vec![
                Value::Integer(user_id),
                opt_value(platform.map(str::to_string)),
                opt_value(is_active.map(flag)),
            ]),
            account_from_row,
        )
        .await
    }

    async fn mark_account_expired(&self, id: i64, now: DateTime<Utc>) -> Result<(), DomainError> {
        let changed = self
            .write(
                "UPDATE oauth_accounts SET is_expired = 1, expired_at = ?1, updated_at = ?1 \
                 WHERE id = ?2",
                params![ts(now), id],
            )
            .await?;
        if changed == 0 {
            return Err(DomainError::NotFound(format!("oauth account {}", id)));
        }
        warn!(account_id = id, "oauth account marked expired");
        Ok(())
    }

    async fn record_usage(
        &self,
        req: &OAuthUsageLogCreate,
        now: DateTime<Utc>,
    ) -> Result<OAuthUsageLog, DomainError> {
        let tokens = req.effective_total_tokens();
        let (_guard, tx) = self.write_tx().await?;
        let result = async {
            let account = load_account(&tx, req.account_id)
                .await?
                .ok_or_else(|| DomainError::NotFound(format!("oauth account {}", req.account_id)))?;
            let quota_used = account.quota_used + tokens;
            let exhausted = account.quota_limit.is_some_and(|limit| quota_used >= limit);
            tx.execute(
                "UPDATE oauth_accounts SET quota_used = ?1, last_used_at = ?2, updated_at = ?2, \
                 is_expired = CASE WHEN ?3 = 1 THEN 1 ELSE is_expired END, \
                 expired_at = CASE WHEN ?3 = 1 THEN ?2 ELSE expired_at END \
                 WHERE id = ?4",
                params![quota_used, ts(now), flag(exhausted), account.id],
            )
            .await
            .map_err(db_err)?;
            tx.execute(
                r#"
                INSERT INTO oauth_usage_logs
                    (user_id, account_id, platform, model, request_type, prompt_tokens,
                     completion_tokens, total_tokens, status, error_message, response_time_ms,
                     created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                "#,
                params![
                    req.user_id,
                    account.id,
                    account.platform.as_str(),
                    req.model.clone(),
                    req.request_type.clone(),
                    req.prompt_tokens,
                    req.completion_tokens,
                    tokens,
                    req.status.as_str(),
                    req.error_message.clone(),
                    req.response_time_ms,
                    ts(now)
                ],
            )
            .await
            .map_err(db_err)?;
            let log = query_one(
                &tx,
                &format!("SELECT {} FROM oauth_usage_logs WHERE id = ?1", USAGE_COLUMNS),
                params![tx.last_insert_rowid()],
                usage_from_row,
            )
            .await?
            .ok_or_else(|| DomainError::Repo("inserted usage log vanished".into()))?;
            Ok((log, exhausted))
        }
        .await;
        let (log, exhausted) = finish(tx, result).await?;
        if exhausted {
            info!(account_id = log.account_id, "oauth account quota exhausted");
        }
        Ok(log)
    }

    async fn list_usage_logs(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<OAuthUsageLog>, DomainError> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!(
                "SELECT {} FROM oauth_usage_logs WHERE account_id = ?1 ORDER BY id DESC LIMIT ?2",
                USAGE_COLUMNS
            ),
            params![account_id, limit],
            usage_from_row,
        )
        .await
    }

    async fn usage_by_platform(
        &self,
        user_id: i64,
    ) -> Result<Vec<(String, PlatformUsage)>, DomainError> {
        let conn = self.conn()?;
        query_all(
            &conn,
            &format!(
                "SELECT platform, COUNT(*), \
                 COALESCE(SUM(CASE WHEN status = '{ok}' THEN 1 ELSE 0 END), 0), \
                 COALESCE(SUM(CASE WHEN status != '{ok}' THEN 1 ELSE 0 END), 0), \
                 COALESCE(SUM(total_tokens), 0) \
                 FROM oauth_usage_logs WHERE user_id = ?1 GROUP BY platform ORDER BY platform",
                ok = UsageStatus::Success.as_str()
            ),
            params![user_id],
            |row| {
                Ok((
                    row.text_at(0)?,
                    PlatformUsage {
                        requests: row.i64_at(1)?,
                        success: row.i64_at(2)?,
                        failed: row.i64_at(3)?,
                        tokens: row.i64_at(4)?,
                    },
                ))
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::UserRole;
    use crate::ports::UserStore;
    use tempfile::TempDir;

    async fn repo() -> (TempDir, SqliteRepo) {
        let dir = TempDir::new().unwrap();
        let repo = SqliteRepo::connect(dir.path()).await.unwrap();
        (dir, repo)
    }

    fn account(user_id: i64, limit: Option<i64>, now: DateTime<Utc>) -> OAuthAccount {
        OAuthAccount {
            id: 0,
            user_id,
            platform: "qwen".into(),
            account_name: None,
            credentials: "cipher".into(),
            is_active: true,
            is_expired: false,
            quota_used: 0,
            quota_limit: limit,
            last_used_at: None,
            expired_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn usage(user_id: i64, account_id: i64, tokens: i64, status: UsageStatus) -> OAuthUsageLogCreate {
        OAuthUsageLogCreate {
            user_id,
            account_id,
            model: Some("qwen-max".into()),
            request_type: Some("chat".into()),
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: Some(tokens),
            status,
            error_message: None,
            response_time_ms: Some(120),
        }
    }

    #[tokio::test]
    async fn test_platform_listing_order_and_filter() {
        let (_dir, repo) = repo().await;
        let now = Utc::now();
        let mut b = PlatformConfigCreate::new("beta", "Beta");
        b.priority = 5;
        let mut a = PlatformConfigCreate::new("alpha", "Alpha");
        a.priority = 1;
        a.is_enabled = false;
        repo.insert_platform(&b, now).await.unwrap();
        repo.insert_platform(&a, now).await.unwrap();

        let all = repo.list_platforms(false).await.unwrap();
        let ids: Vec<_> = all.iter().map(|p| p.platform_id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "beta"]);
        assert_eq!(repo.list_platforms(true).await.unwrap().len(), 1);

        let err = repo.insert_platform(&b, now).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_usage_exhausts_quota() {
        let (_dir, repo) = repo().await;
        let now = Utc::now();
        let user = repo.create_user("u", UserRole::User, None, now).await.unwrap();
        let acc = repo.insert_account(&account(user.id, Some(100), now)).await.unwrap();

        repo.record_usage(&usage(user.id, acc.id, 60, UsageStatus::Success), now)
            .await
            .unwrap();
        let mid = repo.get_account(acc.id).await.unwrap().unwrap();
        assert_eq!(mid.quota_used, 60);
        assert!(!mid.is_expired);

        repo.record_usage(&usage(user.id, acc.id, 40, UsageStatus::Failed), now)
            .await
            .unwrap();
        let done = repo.get_account(acc.id).await.unwrap().unwrap();
        assert_eq!(done.quota_used, 100);
        assert!(done.is_expired);
        assert!(done.expired_at.is_some());

        let logs = repo.list_usage_logs(acc.id, 10).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, UsageStatus::Failed);

        let per_platform = repo.usage_by_platform(user.id).await.unwrap();
        assert_eq!(
            per_platform,
            vec![(
                "qwen".to_string(),
                PlatformUsage {
                    requests: 2,
                    success: 1,
                    failed: 1,
                    tokens: 100
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_one_account_per_platform() {
        let (_dir, repo) = repo().await;
        let now = Utc::now();
        let user = repo.create_user("u", UserRole::User, None, now).await.unwrap();
        repo.insert_account(&account(user.id, None, now)).await.unwrap();
        let err = repo.insert_account(&account(user.id, None, now)).await.unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        let listed = repo.list_accounts(user.id, Some("qwen"), Some(true)).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(repo.list_accounts(user.id, Some("claude"), None).await.unwrap().is_empty());
    }
}
