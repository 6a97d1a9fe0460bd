//! OAuth platform, account and usage payloads.

use super::{require_max_len, require_non_empty};
use crate::domain::{
    DomainError, OAuthAccount, OAuthCredentials, OAuthUsageLog, PlatformConfig, UsageStatus,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn default_priority() -> i64 {
    99
}

fn default_true() -> bool {
    true
}

fn validate_platform_id(id: &str) -> Result<(), DomainError> {
    require_non_empty("platform_id", id)?;
    require_max_len("platform_id", id, 50)?;
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(DomainError::Validation(
            "platform_id may only contain a-z, 0-9, '_' and '-'".into(),
        ));
    }
    Ok(())
}

// ============ Platform configuration ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfigCreate {
    pub platform_id: String,
    pub platform_name: String,
    #[serde(default)]
    pub platform_icon: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub is_enabled: bool,
    #[serde(default)]
    pub oauth_config: Option<serde_json::Value>,
    #[serde(default)]
    pub litellm_config: Option<serde_json::Value>,
    #[serde(default)]
    pub quota_config: Option<serde_json::Value>,
}

impl PlatformConfigCreate {
    pub fn new(platform_id: impl Into<String>, platform_name: impl Into<String>) -> Self {
        Self {
            platform_id: platform_id.into(),
            platform_name: platform_name.into(),
            platform_icon: None,
            priority: default_priority(),
            is_enabled: true,
            oauth_config: None,
            litellm_config: None,
            quota_config: None,
        }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        validate_platform_id(&self.platform_id)?;
        require_non_empty("platform_name", &self.platform_name)?;
        require_max_len("platform_name", &self.platform_name, 100)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfigUpdate {
    pub platform_name: Option<String>,
    pub platform_icon: Option<String>,
    pub priority: Option<i64>,
    pub is_enabled: Option<bool>,
    pub oauth_config: Option<serde_json::Value>,
    pub litellm_config: Option<serde_json::Value>,
    pub quota_config: Option<serde_json::Value>,
}

impl PlatformConfigUpdate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.platform_name {
            require_non_empty("platform_name", name)?;
            require_max_len("platform_name", name, 100)?;
        }
        Ok(())
    }

    pub fn apply(self, cfg: &mut PlatformConfig) {
        if let Some(v) = self.platform_name {
            cfg.platform_name = v;
        }
        if let Some(v) = self.platform_icon {
            cfg.platform_icon = Some(v);
        }
        if let Some(v) = self.priority {
            cfg.priority = v;
        }
        if let Some(v) = self.is_enabled {
            cfg.is_enabled = v;
        }
        if let Some(v) = self.oauth_config {
            cfg.oauth_config = Some(v);
        }
        if let Some(v) = self.litellm_config {
            cfg.litellm_config = Some(v);
        }
        if let Some(v) = self.quota_config {
            cfg.quota_config = Some(v);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfigResponse {
    pub id: i64,
    pub platform_id: String,
    pub platform_name: String,
    pub platform_icon: Option<String>,
    pub priority: i64,
    pub is_enabled: bool,
    pub oauth_config: Option<serde_json::Value>,
    pub litellm_config: Option<serde_json::Value>,
    pub quota_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&PlatformConfig> for PlatformConfigResponse {
    fn from(p: &PlatformConfig) -> Self {
        Self {
            id: p.id,
            platform_id: p.platform_id.clone(),
            platform_name: p.platform_name.clone(),
            platform_icon: p.platform_icon.clone(),
            priority: p.priority,
            is_enabled: p.is_enabled,
            oauth_config: p.oauth_config.clone(),
            litellm_config: p.litellm_config.clone(),
            quota_config: p.quota_config.clone(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}

// ============ Accounts ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAccountCreate {
    pub platform: String,
    #[serde(default)]
    pub account_name: Option<String>,
    pub credentials: OAuthCredentials,
}

impl OAuthAccountCreate {
    pub fn validate(&self) -> Result<(), DomainError> {
        validate_platform_id(&self.platform)?;
        if let Some(name) = &self.account_name {
            require_max_len("account_name", name, 100)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthAccountUpdate {
    pub account_name: Option<String>,
    pub is_active: Option<bool>,
}

impl OAuthAccountUpdate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if let Some(name) = &self.account_name {
            require_max_len("account_name", name, 100)?;
        }
        Ok(())
    }
}

/// Account view without credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAccountResponse {
    pub id: i64,
    pub user_id: i64,
    pub platform: String,
    pub account_name: Option<String>,
    pub is_active: bool,
    pub is_expired: bool,
    pub quota_used: i64,
    pub quota_limit: Option<i64>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&OAuthAccount> for OAuthAccountResponse {
    fn from(a: &OAuthAccount) -> Self {
        Self {
            id: a.id,
            user_id: a.user_id,
            platform: a.platform.clone(),
            account_name: a.account_name.clone(),
            is_active: a.is_active,
            is_expired: a.is_expired,
            quota_used: a.quota_used,
            quota_limit: a.quota_limit,
            last_used_at: a.last_used_at,
            expired_at: a.expired_at,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

// ============ Authorization ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAuthorizeRequest {
    pub platform: String,
    #[serde(default)]
    pub account_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAuthorizeResponse {
    pub success: bool,
    pub message: String,
    pub account_id: Option<i64>,
    pub account: Option<OAuthAccountResponse>,
}

impl OAuthAuthorizeResponse {
    pub fn authorized(account: &OAuthAccount) -> Self {
        Self {
            success: true,
            message: format!("{} account authorized", account.platform),
            account_id: Some(account.id),
            account: Some(account.into()),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            account_id: None,
            account: None,
        }
    }
}

// ============ Usage ============

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthUsageLogCreate {
    pub user_id: i64,
    pub account_id: i64,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub request_type: Option<String>,
    #[serde(default)]
    pub prompt_tokens: Option<i64>,
    #[serde(default)]
    pub completion_tokens: Option<i64>,
    #[serde(default)]
    pub total_tokens: Option<i64>,
    pub status: UsageStatus,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub response_time_ms: Option<i64>,
}

impl OAuthUsageLogCreate {
    /// Reported total, or prompt + completion when the total is missing.
    pub fn effective_total_tokens(&self) -> i64 {
        self.total_tokens.unwrap_or_else(|| {
            self.prompt_tokens.unwrap_or(0) + self.completion_tokens.unwrap_or(0)
        })
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        for (field, value) in [
            ("prompt_tokens", self.prompt_tokens),
            ("completion_tokens", self.completion_tokens),
            ("total_tokens", self.total_tokens),
            ("response_time_ms", self.response_time_ms),
        ] {
            if value.is_some_and(|v| v < 0) {
                return Err(DomainError::Validation(format!("{} must be >= 0", field)));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthUsageLogResponse {
    pub id: i64,
    pub user_id: i64,
    pub account_id: i64,
    pub platform: String,
    pub model: Option<String>,
    pub request_type: Option<String>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub status: UsageStatus,
    pub error_message: Option<String>,
    pub response_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl From<&OAuthUsageLog> for OAuthUsageLogResponse {
    fn from(l: &OAuthUsageLog) -> Self {
        Self {
            id: l.id,
            user_id: l.user_id,
            account_id: l.account_id,
            platform: l.platform.clone(),
            model: l.model.clone(),
            request_type: l.request_type.clone(),
            prompt_tokens: l.prompt_tokens,
            completion_tokens: l.completion_tokens,
            total_tokens: l.total_tokens,
            status: l.status,
            error_message: l.error_message.clone(),
            response_time_ms: l.response_time_ms,
            created_at: l.created_at,
        }
    }
}

/// Per-platform usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformUsage {
    pub requests: i64,
    pub success: i64,
    pub failed: i64,
    pub tokens: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthUsageStats {
    pub total_requests: i64,
    pub success_requests: i64,
    pub failed_requests: i64,
    pub total_tokens: i64,
    pub platform_stats: BTreeMap<String, PlatformUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAccountStatus {
    pub account_id: i64,
    pub platform: String,
    pub is_active: bool,
    pub is_expired: bool,
    pub is_available: bool,
    pub quota_used: i64,
    pub quota_limit: Option<i64>,
    pub quota_remaining: Option<i64>,
    pub last_check_at: DateTime<Utc>,
}

impl OAuthAccountStatus {
    pub fn of(account: &OAuthAccount, now: DateTime<Utc>) -> Self {
        Self {
            account_id: account.id,
            platform: account.platform.clone(),
            is_active: account.is_active,
            is_expired: account.is_expired,
            is_available: account.is_available(),
            quota_used: account.quota_used,
            quota_limit: account.quota_limit,
            quota_remaining: account.quota_remaining(),
            last_check_at: now,
        }
    }
}

// ============ AI generation through an OAuth account ============

fn default_temperature() -> Option<f64> {
    Some(0.7)
}

fn default_max_tokens() -> Option<i64> {
    Some(2000)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIGenerateWithOAuth {
    pub content: String,
    #[serde(default)]
    pub use_oauth: bool,
    #[serde(default)]
    pub oauth_account_id: Option<i64>,
    /// Platform to auto-select an account from when no id is given.
    #[serde(default)]
    pub oauth_platform: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: Option<f64>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<i64>,
}

impl AIGenerateWithOAuth {
    pub fn validate(&self) -> Result<(), DomainError> {
        require_non_empty("content", &self.content)?;
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(DomainError::Validation(
                    "temperature must be between 0 and 2".into(),
                ));
            }
        }
        if let Some(max) = self.max_tokens {
            if max <= 0 {
                return Err(DomainError::Validation("max_tokens must be greater than 0".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_create_defaults() {
        let req: PlatformConfigCreate =
            serde_json::from_str(r#"{"platform_id":"qwen","platform_name":"Qwen"}"#).unwrap();
        assert_eq!(req.priority, 99);
        assert!(req.is_enabled);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_platform_id_charset() {
        assert!(PlatformConfigCreate::new("chat-qwen_2", "x").validate().is_ok());
        assert!(PlatformConfigCreate::new("Qwen", "x").validate().is_err());
        assert!(PlatformConfigCreate::new("qw en", "x").validate().is_err());
        assert!(PlatformConfigCreate::new("", "x").validate().is_err());
    }

    #[test]
    fn test_generate_defaults_and_bounds() {
        let req: AIGenerateWithOAuth = serde_json::from_str(r#"{"content":"hi"}"#).unwrap();
        assert!(!req.use_oauth);
        assert_eq!(req.temperature, Some(0.7));
        assert_eq!(req.max_tokens, Some(2000));
        assert!(req.validate().is_ok());

        let hot = AIGenerateWithOAuth { temperature: Some(2.5), ..req.clone() };
        assert!(hot.validate().is_err());
        let none = AIGenerateWithOAuth { max_tokens: Some(0), ..req };
        assert!(none.validate().is_err());
    }

    #[test]
    fn test_usage_effective_tokens() {
        let mut log = OAuthUsageLogCreate {
            user_id: 1,
            account_id: 1,
            model: None,
            request_type: None,
            prompt_tokens: Some(12),
            completion_tokens: Some(30),
            total_tokens: None,
            status: UsageStatus::Success,
            error_message: None,
            response_time_ms: None,
        };
        assert_eq!(log.effective_total_tokens(), 42);
        log.total_tokens = Some(50);
        assert_eq!(log.effective_total_tokens(), 50);
        log.prompt_tokens = Some(-1);
        assert!(log.validate().is_err());
    }
}
