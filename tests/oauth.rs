mod common;

use common::{harness, harness_with};
use creditops::domain::{DomainError, OAuthCredentials, ReferralTrigger, UsageStatus};
use creditops::schemas::oauth::{
    AIGenerateWithOAuth, OAuthAccountCreate, OAuthAuthorizeRequest, OAuthUsageLogCreate,
};
use std::collections::BTreeMap;

fn qwen_cookies() -> OAuthCredentials {
    let cookies: BTreeMap<String, String> = [
        ("login_aliyunid_ticket", "secret-ticket"),
        ("login_aliyunid_pk", "1234"),
        ("t", "abc"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    OAuthCredentials {
        cookies,
        ..Default::default()
    }
}

fn authorize_req(platform: &str) -> OAuthAuthorizeRequest {
    OAuthAuthorizeRequest {
        platform: platform.into(),
        account_name: None,
    }
}

fn usage(user_id: i64, account_id: i64, tokens: i64) -> OAuthUsageLogCreate {
    OAuthUsageLogCreate {
        user_id,
        account_id,
        model: Some("qwen-max".into()),
        request_type: Some("chat".into()),
        prompt_tokens: None,
        completion_tokens: None,
        total_tokens: Some(tokens),
        status: UsageStatus::Success,
        error_message: None,
        response_time_ms: Some(120),
    }
}

#[tokio::test]
async fn test_seeding_platforms_is_idempotent() {
    let h = harness().await;
    let added = h.services.oauth.seed_default_platforms().await.unwrap();
    assert!(added > 0);
    assert_eq!(h.services.oauth.seed_default_platforms().await.unwrap(), 0);
    let platforms = h.services.oauth.list_platforms(true).await.unwrap();
    assert_eq!(platforms.len(), added);
    assert!(platforms.iter().any(|p| p.platform_id == "qwen"));
}

#[tokio::test]
async fn test_authorize_stores_encrypted_credentials_once_per_platform() {
    let h = harness().await;
    h.services.oauth.seed_default_platforms().await.unwrap();
    let user = h.user("writer").await;

    let res = h
        .services
        .oauth
        .authorize(user.id, &authorize_req("qwen"), qwen_cookies())
        .await
        .unwrap();
    assert!(res.success, "{}", res.message);
    let account_id = res.account_id.unwrap();

    let account = h
        .services
        .oauth
        .get_account(account_id, Some(user.id))
        .await
        .unwrap();
    assert_eq!(account.account_name.as_deref(), Some("qwen_account"));
    assert!(!account.credentials.contains("secret-ticket"));
    assert_eq!(
        h.services.oauth.get_account_credentials(account_id).await.unwrap(),
        qwen_cookies()
    );

    // a second authorization refreshes the same account
    let again = h
        .services
        .oauth
        .authorize(user.id, &authorize_req("qwen"), qwen_cookies())
        .await
        .unwrap();
    assert_eq!(again.account_id, Some(account_id));
    assert_eq!(
        h.services.oauth.list_accounts(user.id, None, None).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_missing_cookies_are_reported() {
    let h = harness().await;
    h.services.oauth.seed_default_platforms().await.unwrap();
    let user = h.user("writer").await;
    let mut creds = qwen_cookies();
    creds.cookies.remove("t");

    let err = h
        .services
        .oauth
        .upsert_account_with_credentials(
            user.id,
            &OAuthAccountCreate {
                platform: "qwen".into(),
                account_name: None,
                credentials: creds.clone(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    let res = h
        .services
        .oauth
        .authorize(user.id, &authorize_req("qwen"), creds)
        .await
        .unwrap();
    assert!(!res.success);
    assert!(res.message.contains("missing required cookies"));
}

#[tokio::test]
async fn test_unknown_platform_is_not_found() {
    let h = harness().await;
    let user = h.user("writer").await;
    let err = h
        .services
        .oauth
        .upsert_account_with_credentials(
            user.id,
            &OAuthAccountCreate {
                platform: "nowhere".into(),
                account_name: None,
                credentials: qwen_cookies(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));
}

#[tokio::test]
async fn test_rejected_session_expires_account() {
    let h = harness_with(ReferralTrigger::FirstRecharge, false).await;
    h.services.oauth.seed_default_platforms().await.unwrap();
    let user = h.user("writer").await;
    let res = h
        .services
        .oauth
        .authorize(user.id, &authorize_req("qwen"), qwen_cookies())
        .await
        .unwrap();
    assert!(!res.success);

    let accounts = h.services.oauth.list_accounts(user.id, None, None).await.unwrap();
    assert_eq!(accounts.len(), 1);
    assert!(accounts[0].is_expired);
    assert!(h.services.oauth.select_account(user.id, None).await.unwrap().is_none());

    let err = h
        .services
        .oauth
        .get_account_credentials(accounts[0].id)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidState(_)));
}

#[tokio::test]
async fn test_usage_consumes_quota_until_exhausted() {
    let h = harness().await;
    h.services.oauth.seed_default_platforms().await.unwrap();
    let user = h.user("heavy").await;
    let res = h
        .services
        .oauth
        .authorize(user.id, &authorize_req("qwen"), qwen_cookies())
        .await
        .unwrap();
    let account_id = res.account_id.unwrap();
    let limit = h
        .services
        .oauth
        .get_account(account_id, None)
        .await
        .unwrap()
        .quota_limit
        .unwrap();

    h.services
        .oauth
        .log_usage(&usage(user.id, account_id, 1_000))
        .await
        .unwrap();
    let status = h
        .services
        .oauth
        .get_account_status(account_id, user.id)
        .await
        .unwrap();
    assert!(status.is_available);
    assert_eq!(status.quota_remaining, Some(limit - 1_000));

    let generate = AIGenerateWithOAuth {
        content: "hello".into(),
        use_oauth: true,
        oauth_account_id: None,
        oauth_platform: Some("qwen".into()),
        model: None,
        temperature: None,
        max_tokens: None,
    };
    let picked = h
        .services
        .oauth
        .resolve_generation_account(user.id, &generate)
        .await
        .unwrap();
    assert_eq!(picked.map(|a| a.id), Some(account_id));

    h.services
        .oauth
        .log_usage(&usage(user.id, account_id, limit))
        .await
        .unwrap();
    assert!(h.services.oauth.select_account(user.id, None).await.unwrap().is_none());
    let err = h
        .services
        .oauth
        .resolve_generation_account(user.id, &generate)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));

    let stats = h.services.oauth.get_usage_stats(user.id).await.unwrap();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.total_tokens, limit + 1_000);
    assert_eq!(stats.platform_stats["qwen"].requests, 2);
    assert_eq!(
        h.services.oauth.get_usage_logs(account_id, 10).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn test_accounts_are_scoped_to_owner() {
    let h = harness().await;
    h.services.oauth.seed_default_platforms().await.unwrap();
    let owner = h.user("owner").await;
    let other = h.user("other").await;
    let res = h
        .services
        .oauth
        .authorize(owner.id, &authorize_req("qwen"), qwen_cookies())
        .await
        .unwrap();
    let account_id = res.account_id.unwrap();

    let err = h
        .services
        .oauth
        .get_account(account_id, Some(other.id))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::NotFound(_)));
    assert!(!h.services.oauth.delete_account(account_id, other.id).await.unwrap());
    assert!(h.services.oauth.delete_account(account_id, owner.id).await.unwrap());
    assert!(h.services.oauth.list_accounts(owner.id, None, None).await.unwrap().is_empty());
}
