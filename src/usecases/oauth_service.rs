//! Third-party AI platform accounts: platform registry, encrypted credentials,
//! account selection, quota accounting and validity checks.

use crate::domain::{DomainError, OAuthAccount, OAuthCredentials, PlatformConfig, PlatformRequirements};
use crate::ports::{CredentialCipher, CredentialProbe, OAuthStore};
use crate::schemas::oauth::{
    AIGenerateWithOAuth, OAuthAccountCreate, OAuthAccountStatus, OAuthAccountUpdate,
    OAuthAuthorizeRequest, OAuthAuthorizeResponse, OAuthUsageLogCreate, OAuthUsageLogResponse,
    OAuthUsageStats, PlatformConfigCreate, PlatformConfigUpdate,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

/// Built-in platform: id, display name, entry page, check URL, cookie domain,
/// required cookies, token quota.
struct BuiltinPlatform {
    id: &'static str,
    name: &'static str,
    auth_url: &'static str,
    check_url: &'static str,
    cookie_domain: Option<&'static str>,
    cookies: &'static [&'static str],
    quota: i64,
}

const BUILTIN_PLATFORMS: &[BuiltinPlatform] = &[
    BuiltinPlatform {
        id: "qwen",
        name: "通义千问",
        auth_url: "https://tongyi.aliyun.com/qianwen/",
        check_url: "https://tongyi.aliyun.com/qianwen/",
        cookie_domain: Some(".aliyun.com"),
        cookies: &["login_aliyunid_ticket", "login_aliyunid_pk", "t"],
        quota: 1_000_000,
    },
    BuiltinPlatform {
        id: "openai",
        name: "ChatGPT",
        auth_url: "https://chatgpt.com/",
        check_url: "https://chatgpt.com/api/auth/session",
        cookie_domain: None,
        cookies: &["__Secure-next-auth.session-token", "_cfuvid"],
        quota: 500_000,
    },
    BuiltinPlatform {
        id: "claude",
        name: "Claude",
        auth_url: "https://claude.ai/",
        check_url: "https://claude.ai/api/organizations",
        cookie_domain: Some(".claude.ai"),
        cookies: &["sessionKey", "__cf_bm", "_cfuvid"],
        quota: 500_000,
    },
    BuiltinPlatform {
        id: "baidu",
        name: "文心一言",
        auth_url: "https://yiyan.baidu.com/",
        check_url: "https://yiyan.baidu.com/eb/user/info",
        cookie_domain: None,
        cookies: &["BAIDUID", "BDUSS", "BDUSS_BFESS", "STOKEN", "PTOKEN"],
        quota: 1_000_000,
    },
    BuiltinPlatform {
        id: "zhipu",
        name: "智谱清言",
        auth_url: "https://chatglm.cn/",
        check_url: "https://chatglm.cn/chatglm/backend-api/v1/user/info",
        cookie_domain: None,
        cookies: &["chatglm_token", "chatglm_refresh_token", "chatglm_user_id"],
        quota: 1_000_000,
    },
    BuiltinPlatform {
        id: "spark",
        name: "讯飞星火",
        auth_url: "https://xinghuo.xfyun.cn/",
        check_url: "https://xinghuo.xfyun.cn/iflygpt/u/user/info",
        cookie_domain: Some(".xfyun.cn"),
        cookies: &["ssoSessionId", "refreshToken", "accessToken"],
        quota: 1_000_000,
    },
    BuiltinPlatform {
        id: "gemini",
        name: "Gemini",
        auth_url: "https://gemini.google.com/",
        check_url: "https://gemini.google.com/",
        cookie_domain: Some(".google.com"),
        cookies: &[
            "SID",
            "HSID",
            "SSID",
            "APISID",
            "SAPISID",
            "__Secure-1PSID",
            "__Secure-3PSID",
        ],
        quota: 1_000_000,
    },
    BuiltinPlatform {
        id: "doubao",
        name: "豆包",
        auth_url: "https://www.doubao.com/",
        check_url: "https://www.doubao.com/",
        cookie_domain: None,
        cookies: &["sessionid", "sessionid_ss", "s_v_web_id", "tt_webid"],
        quota: 1_000_000,
    },
];

impl BuiltinPlatform {
    fn to_create(&self, priority: i64) -> PlatformConfigCreate {
        let mut oauth = json!({
            "auth_url": self.auth_url,
            "check_url": self.check_url,
            "cookie_names": self.cookies,
        });
        if let Some(domain) = self.cookie_domain {
            oauth["cookie_domain"] = json!(domain);
        }
        PlatformConfigCreate {
            platform_id: self.id.to_string(),
            platform_name: self.name.to_string(),
            platform_icon: None,
            priority,
            is_enabled: true,
            oauth_config: Some(oauth),
            litellm_config: Some(json!({ "provider": self.id })),
            quota_config: Some(json!({ "limit": self.quota })),
        }
    }
}

pub struct OAuthService {
    store: Arc<dyn OAuthStore>,
    cipher: Arc<dyn CredentialCipher>,
    probe: Arc<dyn CredentialProbe>,
}

impl OAuthService {
    pub fn new(
        store: Arc<dyn OAuthStore>,
        cipher: Arc<dyn CredentialCipher>,
        probe: Arc<dyn CredentialProbe>,
    ) -> Self {
        Self {
            store,
            cipher,
            probe,
        }
    }

    // ============ Platforms ============

    pub async fn create_platform(
        &self,
        req: &PlatformConfigCreate,
    ) -> Result<PlatformConfig, DomainError> {
        req.validate()?;
        let platform = self.store.insert_platform(req, Utc::now()).await?;
        info!(platform = %platform.platform_id, priority = platform.priority, "platform registered");
        Ok(platform)
    }

    pub async fn get_platform(&self, platform_id: &str) -> Result<PlatformConfig, DomainError> {
        self.store
            .get_platform(platform_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("platform {}", platform_id)))
    }

    pub async fn update_platform(
        &self,
        platform_id: &str,
        req: PlatformConfigUpdate,
    ) -> Result<PlatformConfig, DomainError> {
        req.validate()?;
        let mut platform = self.get_platform(platform_id).await?;
        req.apply(&mut platform);
        platform.updated_at = Utc::now();
        self.store.save_platform(&platform).await?;
        Ok(platform)
    }

    pub async fn list_platforms(&self, enabled_only: bool) -> Result<Vec<PlatformConfig>, DomainError> {
        self.store.list_platforms(enabled_only).await
    }

    /// Registers the built-in platforms that are not present yet. Returns how many were added.
    pub async fn seed_default_platforms(&self) -> Result<usize, DomainError> {
        let mut added = 0;
        for (i, builtin) in BUILTIN_PLATFORMS.iter().enumerate() {
            if self.store.get_platform(builtin.id).await?.is_some() {
                continue;
            }
            match self
                .store
                .insert_platform(&builtin.to_create(i as i64 + 1), Utc::now())
                .await
            {
                Ok(_) => added += 1,
                // inserted concurrently
                Err(DomainError::Conflict(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if added > 0 {
            info!(added, "built-in platforms seeded");
        }
        Ok(added)
    }

    async fn requirements(&self, platform_id: &str) -> Result<PlatformRequirements, DomainError> {
        let platform = self.get_platform(platform_id).await?;
        if !platform.is_enabled {
            return Err(DomainError::InvalidState(format!(
                "platform {} is disabled",
                platform_id
            )));
        }
        Ok(PlatformRequirements::from_config(&platform))
    }

    // ============ Accounts ============

    /// Stores credentials for the user's account on the platform, creating it if needed.
    pub async fn upsert_account_with_credentials(
        &self,
        user_id: i64,
        req: &OAuthAccountCreate,
    ) -> Result<OAuthAccount, DomainError> {
        req.validate()?;
        let requirements = self.requirements(&req.platform).await?;
        let missing = requirements.missing_cookies(&req.credentials);
        if !missing.is_empty() {
            return Err(DomainError::Validation(format!(
                "missing required cookies: {}",
                missing.join(", ")
            )));
        }
        let ciphertext = self.cipher.encrypt_credentials(&req.credentials)?;
        let now = Utc::now();

        if let Some(mut account) = self.store.find_account(user_id, &req.platform).await? {
            account.credentials = ciphertext;
            if let Some(name) = &req.account_name {
                account.account_name = Some(name.clone());
            }
            account.is_active = true;
            account.is_expired = false;
            account.expired_at = None;
            account.updated_at = now;
            self.store.save_account(&account).await?;
            info!(account_id = account.id, user_id, platform = %req.platform, "credentials refreshed");
            return Ok(account);
        }

        let draft = OAuthAccount {
            id: 0,
            user_id,
            platform: req.platform.clone(),
            account_name: Some(
                req.account_name
                    .clone()
                    .unwrap_or_else(|| format!("{}_account", req.platform)),
            ),
            credentials: ciphertext,
            is_active: true,
            is_expired: false,
            quota_used: 0,
            quota_limit: requirements.quota_limit,
            last_used_at: None,
            expired_at: None,
            created_at: now,
            updated_at: now,
        };
        let account = self.store.insert_account(&draft).await?;
        info!(account_id = account.id, user_id, platform = %account.platform, "account created");
        Ok(account)
    }

    /// Stores the credentials, then checks them live. A rejected session is reported,
    /// not raised.
    pub async fn authorize(
        &self,
        user_id: i64,
        req: &OAuthAuthorizeRequest,
        credentials: OAuthCredentials,
    ) -> Result<OAuthAuthorizeResponse, DomainError> {
        let create = OAuthAccountCreate {
            platform: req.platform.clone(),
            account_name: req.account_name.clone(),
            credentials,
        };
        let account = match self.upsert_account_with_credentials(user_id, &create).await {
            Ok(account) => account,
            Err(e) if e.is_business() => return Ok(OAuthAuthorizeResponse::failed(e.to_string())),
            Err(e) => return Err(e),
        };
        if !self.check_account_validity(account.id).await? {
            return Ok(OAuthAuthorizeResponse::failed(format!(
                "{} rejected the session, log in again",
                account.platform
            )));
        }
        let account = self.get_account(account.id, Some(user_id)).await?;
        Ok(OAuthAuthorizeResponse::authorized(&account))
    }

    pub async fn list_accounts(
        &self,
        user_id: i64,
        platform: Option<&str>,
        is_active: Option<bool>,
    ) -> Result<Vec<OAuthAccount>, DomainError> {
        self.store.list_accounts(user_id, platform, is_active).await
    }

    /// Looks up an account; with `user_id`, someone else's account reads as missing.
    pub async fn get_account(
        &self,
        id: i64,
        user_id: Option<i64>,
    ) -> Result<OAuthAccount, DomainError> {
        self.store
            .get_account(id)
            .await?
            .filter(|a| user_id.is_none_or(|u| a.user_id == u))
            .ok_or_else(|| DomainError::NotFound(format!("oauth account {}", id)))
    }

    pub async fn get_account_credentials(&self, id: i64) -> Result<OAuthCredentials, DomainError> {
        let account = self.get_account(id, None).await?;
        if !account.is_active {
            return Err(DomainError::InvalidState(format!("account {} is inactive", id)));
        }
        if account.is_expired {
            return Err(DomainError::InvalidState(format!("account {} has expired", id)));
        }
        self.cipher.decrypt_credentials(&account.credentials)
    }

    pub async fn update_account(
        &self,
        id: i64,
        user_id: i64,
        req: &OAuthAccountUpdate,
    ) -> Result<OAuthAccount, DomainError> {
        req.validate()?;
        let mut account = self.get_account(id, Some(user_id)).await?;
        if let Some(name) = &req.account_name {
            account.account_name = Some(name.clone());
        }
        if let Some(active) = req.is_active {
            account.is_active = active;
        }
        account.updated_at = Utc::now();
        self.store.save_account(&account).await?;
        Ok(account)
    }

    /// False when the account does not exist or belongs to someone else.
    pub async fn delete_account(&self, id: i64, user_id: i64) -> Result<bool, DomainError> {
        match self.get_account(id, Some(user_id)).await {
            Ok(_) => {}
            Err(DomainError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        }
        let deleted = self.store.delete_account(id).await?;
        if deleted {
            info!(account_id = id, user_id, "account deleted");
        }
        Ok(deleted)
    }

    /// First available account, following platform priority.
    pub async fn select_account(
        &self,
        user_id: i64,
        platform: Option<&str>,
    ) -> Result<Option<OAuthAccount>, DomainError> {
        let accounts = self.store.list_accounts(user_id, platform, Some(true)).await?;
        let priorities: Vec<(String, i64)> = self
            .store
            .list_platforms(false)
            .await?
            .into_iter()
            .map(|p| (p.platform_id, p.priority))
            .collect();
        let priority_of = |platform: &str| {
            priorities
                .iter()
                .find(|(id, _)| id == platform)
                .map_or(i64::MAX, |(_, p)| *p)
        };
        let mut available: Vec<OAuthAccount> =
            accounts.into_iter().filter(OAuthAccount::is_available).collect();
        // stable: keeps newest-first order within a platform
        available.sort_by_key(|a| priority_of(&a.platform));
        Ok(available.into_iter().next())
    }

    /// Picks the account a generation request would run on. No model is called.
    pub async fn resolve_generation_account(
        &self,
        user_id: i64,
        req: &AIGenerateWithOAuth,
    ) -> Result<Option<OAuthAccount>, DomainError> {
        req.validate()?;
        if !req.use_oauth {
            return Ok(None);
        }
        match req.oauth_account_id {
            Some(id) => {
                let account = self.get_account(id, Some(user_id)).await?;
                if !account.is_available() {
                    return Err(DomainError::InvalidState(format!(
                        "account {} is not available",
                        id
                    )));
                }
                Ok(Some(account))
            }
            None => {
                let account = self
                    .select_account(user_id, req.oauth_platform.as_deref())
                    .await?;
                if account.is_none() {
                    return Err(DomainError::NotFound("no available oauth account".into()));
                }
                Ok(account)
            }
        }
    }

    // ============ Usage ============

    pub async fn log_usage(
        &self,
        req: &OAuthUsageLogCreate,
    ) -> Result<OAuthUsageLogResponse, DomainError> {
        req.validate()?;
        let log = self.store.record_usage(req, Utc::now()).await?;
        Ok((&log).into())
    }

    pub async fn get_usage_logs(
        &self,
        account_id: i64,
        limit: i64,
    ) -> Result<Vec<OAuthUsageLogResponse>, DomainError> {
        if limit <= 0 {
            return Err(DomainError::Validation("limit must be greater than 0".into()));
        }
        let logs = self.store.list_usage_logs(account_id, limit).await?;
        Ok(logs.iter().map(Into::into).collect())
    }

    pub async fn get_usage_stats(&self, user_id: i64) -> Result<OAuthUsageStats, DomainError> {
        let mut stats = OAuthUsageStats::default();
        for (platform, usage) in self.store.usage_by_platform(user_id).await? {
            stats.total_requests += usage.requests;
            stats.success_requests += usage.success;
            stats.failed_requests += usage.failed;
            stats.total_tokens += usage.tokens;
            stats.platform_stats.insert(platform, usage);
        }
        Ok(stats)
    }

    pub async fn get_account_status(
        &self,
        id: i64,
        user_id: i64,
    ) -> Result<OAuthAccountStatus, DomainError> {
        let account = self.get_account(id, Some(user_id)).await?;
        Ok(OAuthAccountStatus::of(&account, Utc::now()))
    }

    /// Checks the stored session. Unreadable, empty or rejected credentials expire the account.
    pub async fn check_account_validity(&self, id: i64) -> Result<bool, DomainError> {
        let account = self.get_account(id, None).await?;
        let credentials = match self.cipher.decrypt_credentials(&account.credentials) {
            Ok(c) if !c.cookies.is_empty() => c,
            Ok(_) => {
                warn!(account_id = id, "stored credentials carry no cookies");
                self.store.mark_account_expired(id, Utc::now()).await?;
                return Ok(false);
            }
            Err(e) => {
                warn!(account_id = id, error = %e, "stored credentials unreadable");
                self.store.mark_account_expired(id, Utc::now()).await?;
                return Ok(false);
            }
        };
        let requirements = match self.store.get_platform(&account.platform).await? {
            Some(platform) => PlatformRequirements::from_config(&platform),
            None => PlatformRequirements::default(),
        };
        let valid = self.probe.probe(&requirements, &credentials).await?;
        if !valid {
            self.store.mark_account_expired(id, Utc::now()).await?;
        }
        info!(account_id = id, platform = %account.platform, valid, "account checked");
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_platforms_unique_and_parseable() {
        let mut ids: Vec<&str> = BUILTIN_PLATFORMS.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), BUILTIN_PLATFORMS.len());
        for (i, p) in BUILTIN_PLATFORMS.iter().enumerate() {
            let req = p.to_create(i as i64 + 1);
            assert!(req.validate().is_ok(), "{}", p.id);
        }
    }

    #[test]
    fn test_builtin_requirements() {
        let qwen = BUILTIN_PLATFORMS[0].to_create(1);
        let now = Utc::now();
        let cfg = PlatformConfig {
            id: 1,
            platform_id: qwen.platform_id,
            platform_name: qwen.platform_name,
            platform_icon: None,
            priority: 1,
            is_enabled: true,
            oauth_config: qwen.oauth_config,
            litellm_config: qwen.litellm_config,
            quota_config: qwen.quota_config,
            created_at: now,
            updated_at: now,
        };
        let req = PlatformRequirements::from_config(&cfg);
        assert_eq!(req.cookie_names.len(), 3);
        assert_eq!(req.check_url.as_deref(), Some("https://tongyi.aliyun.com/qianwen/"));
        assert_eq!(req.cookie_domain.as_deref(), Some(".aliyun.com"));
        assert_eq!(req.quota_limit, Some(1_000_000));
    }
}
