//! Application configuration. Data directory, encryption key, referral and probe knobs.

use crate::domain::{DomainError, ReferralTrigger};
use serde::Deserialize;
use std::collections::HashMap;

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_REFERRAL_BASE_URL: &str = "https://example.com/register";
pub const DEFAULT_REFERRAL_REWARD_CREDITS: i64 = 100;

#[derive(Debug, Deserialize, Default)]
pub struct AppConfig {
    /// Directory holding creditops.db. Read from CREDITOPS_DATA_DIR.
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Fernet key (urlsafe base64, 32 bytes). Read from OAUTH_ENCRYPTION_KEY or
    /// CREDITOPS_OAUTH_ENCRYPTION_KEY.
    #[serde(default)]
    pub oauth_encryption_key: Option<String>,

    /// Registration page the referral link points at. Read from REFERRAL_BASE_URL.
    #[serde(default)]
    pub referral_base_url: Option<String>,

    #[serde(default)]
    pub referral_reward_credits: Option<i64>,

    /// register | first_recharge | membership
    #[serde(default)]
    pub referral_trigger: Option<String>,

    /// Timeout for the HTTP credential probe (default 15).
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,

    /// User the console acts as (default 1).
    #[serde(default)]
    pub admin_user_id: Option<i64>,

    #[serde(default)]
    pub page_size: Option<i64>,
}

impl AppConfig {
    /// Reads the process environment (after `.env`). A malformed value is an error.
    pub fn load() -> Result<Self, DomainError> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, DomainError> {
        let file = vars.get("CREDITOPS_CONFIG").cloned();
        // unprefixed keys shared with the web backend
        let key = vars.get("OAUTH_ENCRYPTION_KEY").cloned();
        let base_url = vars.get("REFERRAL_BASE_URL").cloned();

        let mut c = config::Config::builder()
            .add_source(config::Environment::with_prefix("CREDITOPS").source(Some(vars)));
        if let Some(path) = file {
            c = c.add_source(config::File::with_name(&path));
        }
        let mut cfg: Self = c
            .build()
            .and_then(|built| built.try_deserialize())
            .map_err(|e| DomainError::Config(e.to_string()))?;
        if key.is_some() {
            cfg.oauth_encryption_key = key;
        }
        if base_url.is_some() {
            cfg.referral_base_url = base_url;
        }
        Ok(cfg)
    }

    pub fn data_dir_or_default(&self) -> String {
        self.data_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
    }

    pub fn oauth_encryption_key(&self) -> Option<&str> {
        self.oauth_encryption_key.as_deref()
    }

    pub fn referral_base_url_or_default(&self) -> String {
        self.referral_base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_REFERRAL_BASE_URL.to_string())
    }

    pub fn referral_reward_credits_or_default(&self) -> i64 {
        self.referral_reward_credits
            .filter(|n| *n >= 0)
            .unwrap_or(DEFAULT_REFERRAL_REWARD_CREDITS)
    }

    /// Fails on an unknown trigger name instead of silently falling back.
    pub fn referral_trigger_or_default(&self) -> Result<ReferralTrigger, DomainError> {
        match self.referral_trigger.as_deref() {
            None | Some("") => Ok(ReferralTrigger::FirstRecharge),
            Some(s) => s
                .parse()
                .map_err(|e: DomainError| DomainError::Config(e.to_string())),
        }
    }

    pub fn probe_timeout_secs_or_default(&self) -> u64 {
        self.probe_timeout_secs.filter(|s| *s > 0).unwrap_or(15)
    }

    pub fn admin_user_id_or_default(&self) -> i64 {
        self.admin_user_id.unwrap_or(1)
    }

    pub fn page_size_or_default(&self) -> i64 {
        self.page_size
            .filter(|n| (1..=crate::schemas::MAX_PAGE_SIZE).contains(n))
            .unwrap_or(20)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.data_dir_or_default(), "./data");
        assert_eq!(cfg.referral_reward_credits_or_default(), 100);
        assert_eq!(
            cfg.referral_trigger_or_default().unwrap(),
            ReferralTrigger::FirstRecharge
        );
        assert_eq!(cfg.probe_timeout_secs_or_default(), 15);
        assert_eq!(cfg.page_size_or_default(), 20);
        assert!(cfg.oauth_encryption_key().is_none());
    }

    #[test]
    fn test_out_of_range_values_fall_back() {
        let cfg = AppConfig {
            referral_reward_credits: Some(-5),
            probe_timeout_secs: Some(0),
            page_size: Some(500),
            ..Default::default()
        };
        assert_eq!(cfg.referral_reward_credits_or_default(), 100);
        assert_eq!(cfg.probe_timeout_secs_or_default(), 15);
        assert_eq!(cfg.page_size_or_default(), 20);
    }

    #[test]
    fn test_unknown_trigger_is_config_error() {
        let cfg = AppConfig {
            referral_trigger: Some("birthday".into()),
            ..Default::default()
        };
        assert!(matches!(
            cfg.referral_trigger_or_default(),
            Err(DomainError::Config(_))
        ));
        let cfg = AppConfig {
            referral_trigger: Some("register".into()),
            ..Default::default()
        };
        assert_eq!(
            cfg.referral_trigger_or_default().unwrap(),
            ReferralTrigger::Register
        );
    }

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_from_vars_reads_prefixed_and_shared_keys() {
        let cfg = AppConfig::from_vars(vars(&[
            ("CREDITOPS_PROBE_TIMEOUT_SECS", "30"),
            ("CREDITOPS_REFERRAL_TRIGGER", "membership"),
            ("OAUTH_ENCRYPTION_KEY", "shared-key"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();
        assert_eq!(cfg.probe_timeout_secs_or_default(), 30);
        assert_eq!(
            cfg.referral_trigger_or_default().unwrap(),
            ReferralTrigger::Membership
        );
        assert_eq!(cfg.oauth_encryption_key(), Some("shared-key"));
    }

    #[test]
    fn test_malformed_value_fails_instead_of_dropping_the_key() {
        let err = AppConfig::from_vars(vars(&[
            ("CREDITOPS_PROBE_TIMEOUT_SECS", "soon"),
            ("OAUTH_ENCRYPTION_KEY", "shared-key"),
        ]))
        .unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }
}
