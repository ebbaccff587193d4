// Integration tests for the full authorize → exchange → refresh lifecycle

use broker_auth::config::{EncryptionKey, RetryConfig, ServiceConfig};
use broker_auth::crypto::TokenCipher;
use broker_auth::error::AuthError;
use broker_auth::oauth::OAuthService;
use broker_auth::provider::{ProviderConfig, ProviderRegistry};
use broker_auth::session::Session;
use broker_auth::store::{SqliteTokenStore, TokenStore};
use std::sync::Arc;

const TEST_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// Capture subsystem logs when RUST_LOG is set; safe to call per test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "broker_auth=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn test_provider(token_url: &str, rotation: bool) -> ProviderConfig {
    ProviderConfig {
        name: "brokerx".to_string(),
        authorization_url: "https://brokerx.example/oauth/authorize".to_string(),
        token_url: token_url.to_string(),
        client_id: "cid".to_string(),
        client_secret: "secret".to_string(),
        redirect_uri: "https://app.example/oauth/callback".to_string(),
        scopes: vec!["trading".to_string(), "account".to_string()],
        token_expiry_ms: 86_400_000,
        supports_refresh_token_rotation: rotation,
    }
}

struct TestHarness {
    service: OAuthService,
    store: Arc<SqliteTokenStore>,
    cipher: TokenCipher,
}

fn make_harness(token_url: &str, rotation: bool) -> TestHarness {
    init_tracing();

    let key = EncryptionKey::from_hex(TEST_KEY).unwrap();

    let mut registry = ProviderRegistry::new();
    registry.register(test_provider(token_url, rotation));

    let store = Arc::new(SqliteTokenStore::open(":memory:").unwrap());

    let config = ServiceConfig {
        retry: RetryConfig {
            max_retries: 3,
            backoff_base_ms: 1,
        },
        ..ServiceConfig::default()
    };

    let service = OAuthService::new(
        Arc::new(registry),
        Arc::clone(&store) as Arc<dyn TokenStore>,
        &key,
        config,
    )
    .unwrap();

    TestHarness {
        service,
        store,
        cipher: TokenCipher::new(&key),
    }
}

/// Extracts the `state` query parameter from an authorization URL.
fn state_from_url(url: &str) -> String {
    url.split("state=")
        .nth(1)
        .expect("no state parameter")
        .split('&')
        .next()
        .unwrap()
        .to_string()
}

#[tokio::test]
async fn test_full_lifecycle() {
    let mut server = mockito::Server::new_async().await;
    let harness = make_harness(&format!("{}/token", server.url()), false);
    let mut session = Session::new();

    // 1. Authorization URL issues the pending state
    let url = harness
        .service
        .authorization_url("brokerx", "user1", &mut session)
        .unwrap();
    assert!(session.pending_oauth_state.is_some());
    let state = state_from_url(&url);

    // 2. Exchange the callback code
    let exchange_mock = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "grant_type".into(),
            "authorization_code".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            r#"{"access_token":"AT","refresh_token":"RT","expires_in":604800,"scope":"trading account","token_type":"Bearer"}"#,
        )
        .create_async()
        .await;

    let record = harness
        .service
        .exchange("brokerx", "code123", &state, &mut session)
        .await
        .unwrap();

    assert!(session.pending_oauth_state.is_none());
    assert!(record.is_valid);
    assert_eq!(record.scopes, vec!["trading", "account"]);
    exchange_mock.assert_async().await;

    // 3. Persist, as the redirect handler would
    harness.store.save("brokerx", "user1", &record).await.unwrap();

    // 4. Refresh replaces the access token, keeps the refresh token
    let refresh_mock = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "grant_type".into(),
            "refresh_token".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"AT2","expires_in":604800}"#)
        .create_async()
        .await;

    let refreshed = harness.service.refresh("brokerx", "user1").await.unwrap();

    assert!(refreshed.is_valid);
    assert_eq!(harness.cipher.decrypt(&refreshed.access_token).unwrap(), "AT2");
    assert_eq!(harness.cipher.decrypt(&refreshed.refresh_token).unwrap(), "RT");
    refresh_mock.assert_async().await;

    // 5. The refreshed record was persisted
    let stored = harness.store.load("brokerx", "user1").await.unwrap().unwrap();
    assert_eq!(stored, refreshed);
}

#[tokio::test]
async fn test_invalidated_record_requires_new_exchange() {
    let mut server = mockito::Server::new_async().await;
    let harness = make_harness(&format!("{}/token", server.url()), false);
    let mut session = Session::new();

    let url = harness
        .service
        .authorization_url("brokerx", "user1", &mut session)
        .unwrap();
    let state = state_from_url(&url);

    let _exchange_ok = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "grant_type".into(),
            "authorization_code".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"AT","refresh_token":"RT","expires_in":3600}"#)
        .expect(2) // initial exchange + re-authorization
        .create_async()
        .await;

    let record = harness
        .service
        .exchange("brokerx", "code123", &state, &mut session)
        .await
        .unwrap();
    harness.store.save("brokerx", "user1", &record).await.unwrap();

    // Broker revokes the grant: refresh fails permanently
    let revoked = server
        .mock("POST", "/token")
        .match_body(mockito::Matcher::UrlEncoded(
            "grant_type".into(),
            "refresh_token".into(),
        ))
        .with_status(400)
        .with_header("content-type", "application/json")
        .with_body(r#"{"error":"invalid_grant"}"#)
        .expect(1)
        .create_async()
        .await;

    let result = harness.service.refresh("brokerx", "user1").await;
    assert!(matches!(result, Err(AuthError::PermanentAuth { .. })));
    revoked.assert_async().await;

    let stored = harness.store.load("brokerx", "user1").await.unwrap().unwrap();
    assert!(!stored.is_valid);

    // Only a fresh authorization flow restores validity
    let url = harness
        .service
        .authorization_url("brokerx", "user1", &mut session)
        .unwrap();
    let state = state_from_url(&url);

    let record = harness
        .service
        .exchange("brokerx", "code456", &state, &mut session)
        .await
        .unwrap();
    harness.store.save("brokerx", "user1", &record).await.unwrap();

    let stored = harness.store.load("brokerx", "user1").await.unwrap().unwrap();
    assert!(stored.is_valid);
}

#[tokio::test]
async fn test_concurrent_authorization_attempts_last_writer_wins() {
    let mut server = mockito::Server::new_async().await;
    let harness = make_harness(&format!("{}/token", server.url()), false);
    let mut session = Session::new();

    let first_url = harness
        .service
        .authorization_url("brokerx", "user1", &mut session)
        .unwrap();
    let first_state = state_from_url(&first_url);

    // A second attempt overwrites the pending slot
    harness
        .service
        .authorization_url("brokerx", "user1", &mut session)
        .unwrap();

    let result = harness
        .service
        .exchange("brokerx", "code123", &first_state, &mut session)
        .await;

    assert!(matches!(result, Err(AuthError::SessionState { .. })));
    // The newer pending attempt is still intact
    assert!(session.pending_oauth_state.is_some());
}
