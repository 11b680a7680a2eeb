//! Sign-in link flow and client login/logout tests

mod common;

use chat_session::core::client::ChatClient;
use chat_session::core::traits::IdentityProvider;
use chat_session::error::{Error, ValidationError};
use chat_session::infrastructure::identity::{LinkIdentityProvider, is_valid_email};
use chat_session::config::ClientConfig;
use common::{seed_profile, setup_store, setup_store_with, test_config};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn provider() -> LinkIdentityProvider {
    LinkIdentityProvider::new(Duration::from_secs(300))
}

async fn sign_in(identity: &LinkIdentityProvider, email: &str) {
    identity.request_link(email).await.unwrap();
    let link = identity.take_sent_link(email).unwrap();
    identity.redeem(&link.token).unwrap();
}

#[tokio::test]
async fn test_link_is_single_use() {
    let identity = provider();
    assert!(identity.current_session().is_none());

    identity.request_link(" Alice@Example.com ").await.unwrap();
    let link = identity.take_sent_link("alice@example.com").unwrap();
    assert_eq!(link.email, "alice@example.com");

    let signed_in = assert_ok!(identity.redeem(&link.token));
    assert_eq!(signed_in.email, "alice@example.com");
    assert_eq!(identity.current_session(), Some(signed_in));

    let reused = identity.redeem(&link.token);
    assert!(matches!(reused, Err(Error::Identity(_))));
}

#[tokio::test]
async fn test_invalid_email_is_rejected() {
    let identity = provider();

    for email in ["", "alice", "alice@", "@example.com", "alice@example", "a b@example.com"] {
        let result = identity.request_link(email).await;
        assert!(
            matches!(result, Err(Error::Validation(ValidationError::InvalidEmail(_)))),
            "{email:?} should be rejected"
        );
    }
    assert!(identity.take_sent_link("alice").is_none());
    assert!(is_valid_email("alice@example.com"));
}

#[tokio::test]
async fn test_expired_link_is_rejected() {
    let identity = LinkIdentityProvider::new(Duration::ZERO);
    identity.request_link("alice@example.com").await.unwrap();
    let link = identity.take_sent_link("alice@example.com").unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    let result = identity.redeem(&link.token);
    assert!(matches!(result, Err(Error::Identity(_))));
    assert!(identity.current_session().is_none());
}

#[tokio::test]
async fn test_expired_links_are_dropped() {
    let identity = LinkIdentityProvider::new(Duration::from_millis(20));
    identity.request_link("alice@example.com").await.unwrap();
    identity.request_link("bob@example.com").await.unwrap();
    let alice = identity.take_sent_link("alice@example.com").unwrap();
    assert_eq!(identity.pending_links(), 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    identity.request_link("carol@example.com").await.unwrap();

    assert_eq!(identity.pending_links(), 1);
    assert!(identity.take_sent_link("bob@example.com").is_none());
    assert!(matches!(identity.redeem(&alice.token), Err(Error::Identity(_))));

    let carol = identity.take_sent_link("carol@example.com").unwrap();
    assert_ok!(identity.redeem(&carol.token));
    assert_eq!(identity.pending_links(), 0);
}

#[tokio::test]
async fn test_same_email_keeps_user_id() {
    let identity = provider();

    sign_in(&identity, "alice@example.com").await;
    let first = identity.current_session().unwrap();
    identity.sign_out().await.unwrap();
    sign_in(&identity, "ALICE@example.com").await;
    let second = identity.current_session().unwrap();

    assert_eq!(first.user_id, second.user_id);
}

#[tokio::test]
async fn test_session_changes_are_observable() {
    let identity = provider();
    let mut changes = identity.on_session_change();

    sign_in(&identity, "alice@example.com").await;
    assert_ok!(changes.changed().await);
    assert_eq!(
        changes.borrow_and_update().as_ref().map(|i| i.email.clone()),
        Some("alice@example.com".to_owned())
    );

    identity.sign_out().await.unwrap();
    assert_ok!(changes.changed().await);
    assert!(changes.borrow_and_update().is_none());

    // Signing out twice is fine
    assert_ok!(identity.sign_out().await);
}

#[tokio::test]
async fn test_login_requires_session() {
    let fixture = setup_store().await;
    let identity: Arc<dyn IdentityProvider> = Arc::new(provider());

    let result = ChatClient::login(identity, fixture.store.clone(), fixture.config.clone()).await;
    assert!(matches!(result, Err(Error::Identity(_))));
}

#[tokio::test]
async fn test_login_bootstraps_profile() {
    let fixture = setup_store().await;
    let identity = Arc::new(provider());
    sign_in(&identity, "j.doe@example.com").await;

    let client = ChatClient::login(identity.clone(), fixture.store.clone(), fixture.config.clone())
        .await
        .unwrap();
    let profile = client.profile().clone();
    assert_eq!(profile.username, "j_doe");
    assert_eq!(profile.status, "Online");
    assert!(profile.is_online);
    assert!(client.presence().is_running());

    client.logout().await.unwrap();
    assert!(identity.current_session().is_none());
    let stored = fixture.store.find_profile(profile.id).await.unwrap().unwrap();
    assert!(!stored.is_online);

    // Second login finds the existing profile
    sign_in(&identity, "j.doe@example.com").await;
    let client = ChatClient::login(identity.clone(), fixture.store.clone(), fixture.config.clone())
        .await
        .unwrap();
    assert_eq!(client.profile().id, profile.id);
    assert!(client.profile().is_online);
    client.logout().await.unwrap();
}

#[tokio::test]
async fn test_logout_during_heartbeats_stays_offline() {
    let fixture = setup_store_with(ClientConfig {
        heartbeat_interval: Duration::from_millis(1),
        ..test_config()
    })
    .await;
    let identity = Arc::new(provider());
    sign_in(&identity, "alice@example.com").await;

    let client = ChatClient::login(identity.clone(), fixture.store.clone(), fixture.config.clone())
        .await
        .unwrap();
    let user_id = client.profile().id;
    tokio::time::sleep(Duration::from_millis(20)).await;

    client.logout().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stored = fixture.store.find_profile(user_id).await.unwrap().unwrap();
    assert!(!stored.is_online);
}

#[tokio::test]
async fn test_login_avoids_taken_username() {
    let fixture = setup_store().await;
    seed_profile(&fixture, "alice", "alice@elsewhere.org").await;

    let identity = Arc::new(provider());
    sign_in(&identity, "alice@example.com").await;
    let client = ChatClient::login(identity, fixture.store.clone(), fixture.config.clone())
        .await
        .unwrap();

    let username = &client.profile().username;
    assert_ne!(username, "alice");
    assert!(username.starts_with("alice_"));
    client.logout().await.unwrap();
}

#[tokio::test]
async fn test_profile_editor() {
    let fixture = setup_store().await;
    seed_profile(&fixture, "taken", "taken@example.com").await;

    let identity = Arc::new(provider());
    sign_in(&identity, "alice@example.com").await;
    let client = ChatClient::login(identity, fixture.store.clone(), fixture.config.clone())
        .await
        .unwrap();
    let editor = client.profile_editor();

    let err = assert_err!(editor.check_username("taken").await);
    assert!(matches!(
        err,
        Error::Validation(ValidationError::UsernameTaken(_))
    ));
    let err = assert_err!(editor.check_username("no way").await);
    assert!(matches!(
        err,
        Error::Validation(ValidationError::UsernameCharacters)
    ));
    // Keeping your own name is fine
    assert_ok!(editor.check_username("alice").await);

    let saved = editor.save("alice_w", "  ").await.unwrap();
    assert_eq!(saved.username, "alice_w");
    assert_eq!(saved.status, "Online");
    assert!(saved.updated_at.is_some());

    let saved = editor.save("alice_w", "busy").await.unwrap();
    assert_eq!(saved.status, "busy");
    assert_eq!(editor.current().await.unwrap().unwrap().status, "busy");

    client.logout().await.unwrap();
}
