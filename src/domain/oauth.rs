//! Third-party AI platform accounts. Credentials are kept encrypted; only the cipher sees plaintext.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

str_enum! {
    pub enum UsageStatus {
        Success => "success",
        Failed => "failed",
        Expired => "expired",
    }
}

/// Registered platform and its JSON configuration blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    pub id: i64,
    pub platform_id: String,
    pub platform_name: String,
    pub platform_icon: Option<String>,
    /// Lower sorts first.
    pub priority: i64,
    pub is_enabled: bool,
    pub oauth_config: Option<serde_json::Value>,
    pub litellm_config: Option<serde_json::Value>,
    pub quota_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What a platform demands from stored credentials, read out of its config blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformRequirements {
    pub cookie_names: Vec<String>,
    pub check_url: Option<String>,
    pub cookie_domain: Option<String>,
    pub quota_limit: Option<i64>,
}

impl PlatformRequirements {
    pub fn from_config(config: &PlatformConfig) -> Self {
        let oauth = config.oauth_config.as_ref();
        let str_field = |key: &str| {
            oauth
                .and_then(|o| o.get(key))
                .and_then(serde_json::Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        let cookie_names = oauth
            .and_then(|o| o.get("cookie_names"))
            .and_then(serde_json::Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let quota = config.quota_config.as_ref();
        let quota_limit = quota
            .and_then(|q| q.get("limit").or_else(|| q.get("daily_limit")))
            .and_then(serde_json::Value::as_i64);
        Self {
            cookie_names,
            check_url: str_field("check_url").or_else(|| str_field("auth_url")),
            cookie_domain: str_field("cookie_domain"),
            quota_limit,
        }
    }

    /// Names of required cookies absent from `credentials`. Empty cookies always fail.
    pub fn missing_cookies(&self, credentials: &OAuthCredentials) -> Vec<String> {
        if credentials.cookies.is_empty() {
            return vec!["<any cookie>".to_string()];
        }
        self.cookie_names
            .iter()
            .filter(|name| !credentials.cookies.contains_key(*name))
            .cloned()
            .collect()
    }
}

/// Plaintext credential bundle captured from a logged-in browser session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthCredentials {
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,
    #[serde(default)]
    pub tokens: BTreeMap<String, String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl OAuthCredentials {
    /// `Cookie` header value: `a=1; b=2`.
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthAccount {
    pub id: i64,
    pub user_id: i64,
    pub platform: String,
    pub account_name: Option<String>,
    /// Ciphertext. Never serialised into responses.
    #[serde(skip_serializing)]
    pub credentials: String,
    pub is_active: bool,
    pub is_expired: bool,
    pub quota_used: i64,
    pub quota_limit: Option<i64>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthAccount {
    pub fn quota_remaining(&self) -> Option<i64> {
        self.quota_limit.map(|limit| (limit - self.quota_used).max(0))
    }

    pub fn is_available(&self) -> bool {
        self.is_active && !self.is_expired && self.quota_remaining().is_none_or(|r| r > 0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthUsageLog {
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

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn platform(oauth: serde_json::Value, quota: serde_json::Value) -> PlatformConfig {
        PlatformConfig {
            id: 1,
            platform_id: "qwen".into(),
            platform_name: "Qwen".into(),
            platform_icon: None,
            priority: 1,
            is_enabled: true,
            oauth_config: Some(oauth),
            litellm_config: None,
            quota_config: Some(quota),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_requirements_from_config() {
        let cfg = platform(
            json!({"auth_url": "https://tongyi.aliyun.com/qianwen/", "cookie_names": ["t", "login_aliyunid_ticket"]}),
            json!({"daily_limit": 1000000}),
        );
        let req = PlatformRequirements::from_config(&cfg);
        assert_eq!(req.cookie_names, vec!["t", "login_aliyunid_ticket"]);
        assert_eq!(req.check_url.as_deref(), Some("https://tongyi.aliyun.com/qianwen/"));
        assert_eq!(req.quota_limit, Some(1_000_000));
    }

    #[test]
    fn test_missing_cookies() {
        let req = PlatformRequirements {
            cookie_names: vec!["a".into(), "b".into()],
            ..Default::default()
        };
        let mut creds = OAuthCredentials::default();
        assert_eq!(req.missing_cookies(&creds).len(), 1);
        creds.cookies.insert("a".into(), "1".into());
        assert_eq!(req.missing_cookies(&creds), vec!["b".to_string()]);
        creds.cookies.insert("b".into(), "2".into());
        assert!(req.missing_cookies(&creds).is_empty());
        assert_eq!(creds.cookie_header(), "a=1; b=2");
    }

    #[test]
    fn test_account_availability() {
        let now = Utc::now();
        let mut acc = OAuthAccount {
            id: 1,
            user_id: 1,
            platform: "qwen".into(),
            account_name: None,
            credentials: "x".into(),
            is_active: true,
            is_expired: false,
            quota_used: 90,
            quota_limit: Some(100),
            last_used_at: None,
            expired_at: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(acc.quota_remaining(), Some(10));
        assert!(acc.is_available());
        acc.quota_used = 120;
        assert_eq!(acc.quota_remaining(), Some(0));
        assert!(!acc.is_available());
        acc.quota_limit = None;
        assert!(acc.is_available());
        acc.is_expired = true;
        assert!(!acc.is_available());
    }

    #[test]
    fn test_account_serialization_hides_credentials() {
        let now = Utc::now();
        let acc = OAuthAccount {
            id: 1,
            user_id: 1,
            platform: "qwen".into(),
            account_name: Some("main".into()),
            credentials: "gAAAAAsecret".into(),
            is_active: true,
            is_expired: false,
            quota_used: 0,
            quota_limit: None,
            last_used_at: None,
            expired_at: None,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&acc).unwrap();
        assert!(!json.contains("gAAAAAsecret"));
    }
}
