use std::sync::Arc;
use std::time::Duration;

use credorium::ceremony::{CeremonyEngine, CeremonyError, MemorySessionStore, SessionToken};
use credorium::config::RpConfig;
use credorium::softtoken::SoftToken;
use credorium::store::{CredentialStore, MemoryCredentialStore};

const RP_ID: &str = "localhost";
const ORIGIN: &str = "http://localhost:8000";

fn engine() -> (CeremonyEngine, Arc<MemoryCredentialStore>) {
    engine_with(RpConfig::new(RP_ID, ORIGIN))
}

fn engine_with(config: RpConfig) -> (CeremonyEngine, Arc<MemoryCredentialStore>) {
    let store = Arc::new(MemoryCredentialStore::new());
    let sessions = Arc::new(MemorySessionStore::new());
    (
        CeremonyEngine::new(config, store.clone(), sessions),
        store,
    )
}

fn token() -> SoftToken {
    SoftToken::new(RP_ID, ORIGIN)
}

#[test]
fn test_registration_round_trip() {
    let (engine, store) = engine();
    let mut tok = token();

    let (options, session) = engine.begin_registration("alice", "Alice").unwrap();
    assert_eq!(options.rp.id, RP_ID);
    assert_eq!(options.user.name, "alice");
    assert!(options.exclude_credentials.is_empty());

    let response = tok.register(&options);
    let credential = engine
        .finish_registration("alice", &session, &response)
        .unwrap();

    // The credential is immediately retrievable from the store...
    let stored = store
        .find_credential(&credential.credential_id)
        .unwrap()
        .expect("credential must be persisted");
    assert_eq!(stored.sign_count, 0);
    assert_eq!(stored.transports, vec!["internal".to_string()]);

    // ...and excluded from the next registration for the same user.
    let (options, _) = engine.begin_registration("alice", "Alice").unwrap();
    assert!(options
        .exclude_credentials
        .iter()
        .any(|d| d.id == credential.credential_id));
}

#[test]
fn test_finish_without_begin_is_session_not_found() {
    let (engine, _) = engine();
    let mut tok = token();

    // Create the user so the failure is about the session, not the user.
    let (options, session) = engine.begin_registration("alice", "Alice").unwrap();
    let response = tok.register(&options);
    engine.finish_registration("alice", &session, &response).unwrap();

    let err = engine
        .finish_registration("alice", &SessionToken::generate(), &response)
        .unwrap_err();
    assert!(matches!(err, CeremonyError::SessionNotFound));
}

#[test]
fn test_finish_for_unknown_user() {
    let (engine, _) = engine();
    let err = engine
        .finish_registration("nobody", &SessionToken::generate(), &serde_json::json!({}))
        .unwrap_err();
    assert!(matches!(err, CeremonyError::UnknownUser));
}

#[test]
fn test_tampered_challenge_is_challenge_mismatch() {
    let (engine, _) = engine();
    let mut tok = token();

    let (mut options, session) = engine.begin_registration("alice", "Alice").unwrap();
    // Flip one character of the challenge the client will echo back.
    let mut chars: Vec<char> = options.challenge.chars().collect();
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    options.challenge = chars.into_iter().collect();

    let response = tok.register(&options);
    let err = engine
        .finish_registration("alice", &session, &response)
        .unwrap_err();
    assert!(matches!(err, CeremonyError::ChallengeMismatch));
}

#[test]
fn test_failed_finish_consumes_session() {
    let (engine, _) = engine();
    let mut tok = token();

    let (options, session) = engine.begin_registration("alice", "Alice").unwrap();
    let mut bad = options.clone();
    bad.challenge = options.challenge.chars().rev().collect();
    let response = tok.register(&bad);
    engine
        .finish_registration("alice", &session, &response)
        .unwrap_err();

    // Even a now-correct response must start over with a fresh begin.
    let good = tok.register(&options);
    let err = engine
        .finish_registration("alice", &session, &good)
        .unwrap_err();
    assert!(matches!(err, CeremonyError::SessionNotFound));
}

#[test]
fn test_second_begin_invalidates_first_session() {
    let (engine, _) = engine();
    let mut tok = token();

    let (options1, session1) = engine.begin_registration("alice", "Alice").unwrap();
    let (options2, session2) = engine.begin_registration("alice", "Alice").unwrap();

    let response1 = tok.register(&options1);
    let err = engine
        .finish_registration("alice", &session1, &response1)
        .unwrap_err();
    assert!(matches!(err, CeremonyError::SessionNotFound));

    let response2 = tok.register(&options2);
    engine
        .finish_registration("alice", &session2, &response2)
        .unwrap();
}

#[test]
fn test_another_users_token_is_rejected() {
    let (engine, _) = engine();
    let mut tok = token();

    let (_, alice_session) = engine.begin_registration("alice", "Alice").unwrap();
    let (bob_options, _) = engine.begin_registration("bob", "Bob").unwrap();

    let response = tok.register(&bob_options);
    let err = engine
        .finish_registration("bob", &alice_session, &response)
        .unwrap_err();
    assert!(matches!(err, CeremonyError::SessionNotFound));
}

#[test]
fn test_expired_session_is_session_not_found() {
    let mut config = RpConfig::new(RP_ID, ORIGIN);
    config.session_ttl = Duration::ZERO;
    let (engine, _) = engine_with(config);
    let mut tok = token();

    let (options, session) = engine.begin_registration("alice", "Alice").unwrap();
    let response = tok.register(&options);
    let err = engine
        .finish_registration("alice", &session, &response)
        .unwrap_err();
    assert!(matches!(err, CeremonyError::SessionNotFound));
}

#[test]
fn test_duplicate_credential_id_rejected_across_users() {
    let (engine, _) = engine();

    let mut tok = token();
    tok.fixed_credential_id = Some([0x42; 32]);
    let (options, session) = engine.begin_registration("alice", "Alice").unwrap();
    let response = tok.register(&options);
    engine.finish_registration("alice", &session, &response).unwrap();

    // A different user presenting the same credential id must be refused.
    let mut tok2 = token();
    tok2.fixed_credential_id = Some([0x42; 32]);
    let (options, session) = engine.begin_registration("bob", "Bob").unwrap();
    let response = tok2.register(&options);
    let err = engine
        .finish_registration("bob", &session, &response)
        .unwrap_err();
    assert!(matches!(err, CeremonyError::DuplicateCredential));
}

#[test]
fn test_wrong_origin_is_origin_mismatch() {
    let (engine, _) = engine();
    let mut tok = SoftToken::new(RP_ID, "https://evil.example");

    let (options, session) = engine.begin_registration("alice", "Alice").unwrap();
    let response = tok.register(&options);
    let err = engine
        .finish_registration("alice", &session, &response)
        .unwrap_err();
    assert!(matches!(err, CeremonyError::OriginMismatch));
}

#[test]
fn test_malformed_response_is_validation_error() {
    let (engine, _) = engine();
    let (_, session) = engine.begin_registration("alice", "Alice").unwrap();
    let err = engine
        .finish_registration("alice", &session, &serde_json::json!({"id": 7}))
        .unwrap_err();
    assert!(matches!(err, CeremonyError::Validation(_)));
}

#[test]
fn test_empty_username_rejected() {
    let (engine, _) = engine();
    let err = engine.begin_registration("", "").unwrap_err();
    assert!(matches!(err, CeremonyError::Validation(_)));
}
