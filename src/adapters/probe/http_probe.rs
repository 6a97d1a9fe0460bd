//! Checks stored session cookies against the platform's web page.
//!
//! A session is considered alive when the check URL answers 2xx and the redirect chain
//! did not land on a login page.

use crate::domain::{DomainError, OAuthCredentials, PlatformRequirements};
use crate::ports::CredentialProbe;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue, USER_AGENT};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Path fragments that mean the platform bounced us to a sign-in page.
const LOGIN_MARKERS: &[&str] = &["login", "signin", "passport"];

pub struct HttpCredentialProbe {
    client: reqwest::Client,
}

impl HttpCredentialProbe {
    pub fn new(timeout: Duration) -> Result<Self, DomainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DomainError::Probe(format!("build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn headers(credentials: &OAuthCredentials) -> Result<HeaderMap, DomainError> {
        let mut headers = HeaderMap::new();
        let agent = credentials.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(agent)
                .map_err(|_| DomainError::Validation("user agent is not a valid header".into()))?,
        );
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&credentials.cookie_header())
                .map_err(|_| DomainError::Validation("cookies are not a valid header".into()))?,
        );
        Ok(headers)
    }
}

/// True when the final URL looks like a login page.
pub fn is_login_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    LOGIN_MARKERS.iter().any(|m| lower.contains(m))
}

#[async_trait::async_trait]
impl CredentialProbe for HttpCredentialProbe {
    async fn probe(
        &self,
        requirements: &PlatformRequirements,
        credentials: &OAuthCredentials,
    ) -> Result<bool, DomainError> {
        let Some(url) = requirements.check_url.as_deref() else {
            debug!("no check_url configured, accepting credentials on format alone");
            return Ok(true);
        };
        let response = self
            .client
            .get(url)
            .headers(Self::headers(credentials)?)
            .send()
            .await
            .map_err(|e| DomainError::Probe(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        let landed = response.url().to_string();
        let valid = status.is_success() && !is_login_url(&landed);
        info!(
            url,
            status = status.as_u16(),
            cookies = credentials.cookies.len(),
            valid,
            "credential probe finished"
        );
        Ok(valid)
    }
}

/// Probe with a fixed verdict. For offline runs and tests.
pub struct StaticProbe {
    verdict: bool,
}

impl StaticProbe {
    pub fn new(verdict: bool) -> Self {
        Self { verdict }
    }

    pub fn valid() -> Self {
        Self::new(true)
    }

    pub fn invalid() -> Self {
        Self::new(false)
    }
}

#[async_trait::async_trait]
impl CredentialProbe for StaticProbe {
    async fn probe(
        &self,
        _requirements: &PlatformRequirements,
        _credentials: &OAuthCredentials,
    ) -> Result<bool, DomainError> {
        Ok(self.verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_redirect_detection() {
        assert!(is_login_url("https://passport.baidu.com/v2/?login"));
        assert!(is_login_url("https://claude.ai/SignIn?next=/chats"));
        assert!(!is_login_url("https://tongyi.aliyun.com/qianwen/"));
    }

    #[test]
    fn test_headers_carry_cookies_and_agent() {
        let mut creds = OAuthCredentials::default();
        creds.cookies.insert("a".into(), "1".into());
        creds.cookies.insert("b".into(), "2".into());
        let headers = HttpCredentialProbe::headers(&creds).unwrap();
        assert_eq!(headers.get(COOKIE).unwrap(), "a=1; b=2");
        assert_eq!(headers.get(USER_AGENT).unwrap(), DEFAULT_USER_AGENT);

        creds.user_agent = Some("bad\nagent".into());
        assert!(HttpCredentialProbe::headers(&creds).is_err());
    }

    #[tokio::test]
    async fn test_missing_check_url_accepts() {
        let probe = HttpCredentialProbe::new(Duration::from_secs(1)).unwrap();
        let ok = probe
            .probe(&PlatformRequirements::default(), &OAuthCredentials::default())
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_static_probe() {
        let req = PlatformRequirements::default();
        let creds = OAuthCredentials::default();
        assert!(StaticProbe::valid().probe(&req, &creds).await.unwrap());
        assert!(!StaticProbe::invalid().probe(&req, &creds).await.unwrap());
    }
}
