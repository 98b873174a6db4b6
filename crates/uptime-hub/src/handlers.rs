//! Signup and result handling
//!
//! A connection moves `connected -> admitted` through a signed signup. After
//! that the hub dispatches work to it and accepts signed `validate` replies.
//!
//! Protocol and authentication failures are dropped the same way: logged,
//! nothing sent back, connection left open.

use crate::auth::{reply_message, signup_message, verify_signature};
use crate::callbacks::PendingRequest;
use crate::client_info::{is_routable, lookup_location, resolve_origin};
use crate::error::{HubError, Result};
use crate::models::{
    IncomingMessage, NewWebsiteTick, OutgoingMessage, SignupIncoming, SignupOutgoing,
    ValidateIncoming, WebsiteStatus, WebsiteTick,
};
use crate::scheduler::run_for_validator;
use crate::state::AppState;
use crate::store::UNKNOWN_LOCATION;
use crate::websocket::ConnectionHandle;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Parse one text frame and route it. Never fails: every error is logged
/// and the frame dropped.
pub async fn handle_frame(
    state: &Arc<AppState>,
    conn: &ConnectionHandle,
    request_origin: Option<&str>,
    text: &str,
) {
    let msg = match parse_frame(text) {
        Ok(m) => m,
        Err(e) => {
            log_dropped(conn, "frame", &e);
            return;
        }
    };

    match msg {
        IncomingMessage::Signup(signup) => {
            if let Err(e) = handle_signup(state, conn, request_origin, signup).await {
                log_dropped(conn, "signup", &e);
            }
        }
        IncomingMessage::Validate(result) => {
            info!(
                "Received validation response for callback {}",
                result.callback_id
            );
            if let Err(e) = handle_validate(state, result).await {
                log_dropped(conn, "validate", &e);
            }
        }
    }
}

pub fn parse_frame(text: &str) -> Result<IncomingMessage> {
    Ok(serde_json::from_str(text)?)
}

fn log_dropped(conn: &ConnectionHandle, kind: &str, e: &HubError) {
    match e {
        HubError::Store(_) => error!("Dropped {} from {}: {}", kind, conn.id(), e),
        HubError::ConnectionClosed => debug!("Dropped {} from {}: {}", kind, conn.id(), e),
        _ => warn!("Dropped {} from {}: {}", kind, conn.id(), e),
    }
}

/// Authenticate a validator and admit it on `conn`.
///
/// Returns the resolved validator id.
pub async fn handle_signup(
    state: &Arc<AppState>,
    conn: &ConnectionHandle,
    request_origin: Option<&str>,
    signup: SignupIncoming,
) -> Result<String> {
    let message = signup_message(&signup.callback_id, &signup.public_key);
    if !verify_signature(&message, &signup.public_key, &signup.signed_message) {
        return Err(HubError::InvalidSignature);
    }

    let origin = resolve_origin(&signup.ip, request_origin);
    let resolved = state
        .store
        .find_or_create_validator(&signup.public_key, &origin)
        .await?;
    let validator = resolved.validator;

    if resolved.created {
        info!(
            "Created validator {} for key {}",
            validator.id, signup.public_key
        );
    } else if origin != "unknown" && validator.ip != origin {
        if let Err(e) = state
            .store
            .update_validator_metadata(&validator.id, Some(&origin), None)
            .await
        {
            warn!("Failed to refresh origin of {}: {}", validator.id, e);
        }
    }

    // The socket may have closed while the store call was in flight
    if conn.is_closed() {
        return Err(HubError::ConnectionClosed);
    }

    conn.send(OutgoingMessage::Signup(SignupOutgoing {
        validator_id: validator.id.clone(),
        callback_id: signup.callback_id.clone(),
    }))?;

    state
        .registry
        .admit(&validator.id, &validator.public_key, conn.clone());
    info!(
        "Validator {} admitted on {} ({} online)",
        validator.id,
        conn.id(),
        state.registry.len()
    );

    let stale = validator.location == UNKNOWN_LOCATION || validator.ip != origin;
    if stale && is_routable(&origin) {
        spawn_location_refresh(state.clone(), validator.id.clone(), origin);
    }

    run_for_validator(state, &validator.id).await;

    Ok(validator.id)
}

fn spawn_location_refresh(state: Arc<AppState>, validator_id: String, origin: String) {
    let Some(endpoint) = state.config.geo_endpoint.clone() else {
        return;
    };
    tokio::spawn(async move {
        let Some(location) = lookup_location(&state.http_client, &endpoint, &origin).await else {
            return;
        };
        match state
            .store
            .update_validator_metadata(&validator_id, None, Some(&location))
            .await
        {
            Ok(()) => debug!("Validator {} located in {}", validator_id, location),
            Err(e) => warn!("Failed to store location of {}: {}", validator_id, e),
        }
    });
}

/// Correlate, authenticate and persist a `validate` reply
pub async fn handle_validate(state: &AppState, result: ValidateIncoming) -> Result<WebsiteTick> {
    let pending = state
        .callbacks
        .resolve(&result.callback_id)
        .ok_or_else(|| HubError::UnknownCallback(result.callback_id.clone()))?;

    if result.validator_id != pending.validator_id {
        return Err(HubError::IdentityMismatch(format!(
            "callback {} was dispatched to {}, reply claims {}",
            result.callback_id, pending.validator_id, result.validator_id
        )));
    }
    if let Some(website_id) = &result.website_id {
        if *website_id != pending.website_id {
            return Err(HubError::IdentityMismatch(format!(
                "callback {} was for website {}, reply names {}",
                result.callback_id, pending.website_id, website_id
            )));
        }
    }

    // Checked against the key captured at dispatch, never one from the frame
    let message = reply_message(&result.callback_id);
    if !verify_signature(&message, &pending.public_key, &result.signed_message) {
        warn!(
            "Message verification failed for validator {} and callback {}",
            pending.validator_id, result.callback_id
        );
        return Err(HubError::InvalidSignature);
    }

    process_result(state, &pending, result.status, result.latency).await
}

/// Commit a verified result: one tick plus the payout credit, atomically
pub async fn process_result(
    state: &AppState,
    pending: &PendingRequest,
    status: WebsiteStatus,
    latency: f64,
) -> Result<WebsiteTick> {
    let tick = NewWebsiteTick {
        website_id: pending.website_id.clone(),
        validator_id: pending.validator_id.clone(),
        status,
        latency,
        created_at: Utc::now(),
    };

    let stored = state
        .store
        .record_tick(&tick, state.config.reward_per_check)
        .await?;
    info!(
        "Recorded tick {} ({} {}ms) for {}, credited {}",
        stored.id, stored.status, stored.latency, stored.validator_id, state.config.reward_per_check
    );
    Ok(stored)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::encode_signature;
    use crate::config::HubConfig;
    use crate::models::{ValidateOutgoing, Website};
    use crate::store::{HubStore, MemoryStore};
    use crate::websocket::Outbox;
    use ed25519_dalek::{Signer, SigningKey};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct TestValidator {
        sk: SigningKey,
        public_key: String,
    }

    impl TestValidator {
        fn new(seed: u8) -> Self {
            let sk = SigningKey::from_bytes(&[seed; 32]);
            let public_key = bs58::encode(sk.verifying_key().to_bytes()).into_string();
            Self { sk, public_key }
        }

        fn sign(&self, msg: &str) -> String {
            encode_signature(&self.sk.sign(msg.as_bytes()).to_bytes())
        }

        fn signup(&self, callback_id: &str) -> SignupIncoming {
            SignupIncoming {
                callback_id: callback_id.to_string(),
                ip: "browser".to_string(),
                public_key: self.public_key.clone(),
                signed_message: self.sign(&signup_message(callback_id, &self.public_key)),
            }
        }

        fn reply(&self, validator_id: &str, dispatch: &ValidateOutgoing) -> ValidateIncoming {
            ValidateIncoming {
                callback_id: dispatch.callback_id.clone(),
                status: WebsiteStatus::Good,
                latency: 42.0,
                validator_id: validator_id.to_string(),
                website_id: Some(dispatch.website_id.clone()),
                signed_message: self.sign(&reply_message(&dispatch.callback_id)),
            }
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<AppState>) {
        let store = Arc::new(MemoryStore::new());
        let state = Arc::new(AppState::new(store.clone(), HubConfig::default()));
        (store, state)
    }

    fn next_frame(rx: &mut Outbox) -> OutgoingMessage {
        rx.try_recv().expect("expected a queued frame")
    }

    fn next_dispatch(rx: &mut Outbox) -> ValidateOutgoing {
        match next_frame(rx) {
            OutgoingMessage::Validate(v) => v,
            other => panic!("expected validate frame, got {:?}", other),
        }
    }

    async fn signed_up(
        state: &Arc<AppState>,
        v: &TestValidator,
    ) -> (String, ConnectionHandle, Outbox) {
        let (conn, mut rx) = ConnectionHandle::new();
        let id = handle_signup(state, &conn, None, v.signup("cb-signup"))
            .await
            .unwrap();
        assert!(matches!(next_frame(&mut rx), OutgoingMessage::Signup(_)));
        (id, conn, rx)
    }

    #[tokio::test]
    async fn test_signup_creates_validator_and_acks() {
        let (store, state) = setup();
        let v = TestValidator::new(1);
        let (conn, mut rx) = ConnectionHandle::new();

        let id = handle_signup(&state, &conn, None, v.signup("C1")).await.unwrap();

        assert_eq!(
            next_frame(&mut rx),
            OutgoingMessage::Signup(SignupOutgoing {
                validator_id: id.clone(),
                callback_id: "C1".to_string(),
            })
        );
        let validators = store.validators();
        assert_eq!(validators.len(), 1);
        assert_eq!(validators[0].id, id);
        assert_eq!(validators[0].public_key, v.public_key);
        assert_eq!(validators[0].pending_payouts, 0);
        assert_eq!(validators[0].location, UNKNOWN_LOCATION);
        assert_eq!(state.stats().online_validators, 1);
    }

    #[tokio::test]
    async fn test_second_signup_same_key_reuses_identity() {
        let (store, state) = setup();
        let v = TestValidator::new(1);

        let (c1, _r1) = ConnectionHandle::new();
        let first = handle_signup(&state, &c1, None, v.signup("C1")).await.unwrap();
        state.registry.remove(&c1.id());

        let (c2, mut r2) = ConnectionHandle::new();
        let second = handle_signup(&state, &c2, None, v.signup("C2")).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.validators().len(), 1);
        assert_eq!(
            next_frame(&mut r2),
            OutgoingMessage::Signup(SignupOutgoing {
                validator_id: first,
                callback_id: "C2".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_signup_with_bad_signature_is_ignored() {
        let (store, state) = setup();
        let v = TestValidator::new(1);
        let mut signup = v.signup("C1");
        // Signed for a different callback id
        signup.callback_id = "C9".to_string();

        let (conn, mut rx) = ConnectionHandle::new();
        let err = handle_signup(&state, &conn, None, signup).await.unwrap_err();

        assert!(matches!(err, HubError::InvalidSignature));
        assert!(rx.try_recv().is_err());
        assert!(store.validators().is_empty());
        assert_eq!(state.stats().online_validators, 0);
    }

    #[tokio::test]
    async fn test_signup_signed_by_other_key_is_ignored() {
        let (store, state) = setup();
        let v = TestValidator::new(1);
        let impostor = TestValidator::new(2);
        let mut signup = v.signup("C1");
        signup.signed_message = impostor.sign(&signup_message("C1", &v.public_key));

        let (conn, _rx) = ConnectionHandle::new();
        assert!(handle_signup(&state, &conn, None, signup).await.is_err());
        assert!(store.validators().is_empty());
    }

    #[tokio::test]
    async fn test_signup_on_closed_connection_not_admitted() {
        let (_store, state) = setup();
        let v = TestValidator::new(1);
        let (conn, rx) = ConnectionHandle::new();
        drop(rx);

        let err = handle_signup(&state, &conn, None, v.signup("C1")).await.unwrap_err();
        assert!(matches!(err, HubError::ConnectionClosed));
        assert_eq!(state.registry.len(), 0);
    }

    #[tokio::test]
    async fn test_signup_records_request_origin() {
        let (store, state) = setup();
        let v = TestValidator::new(1);
        let (conn, _rx) = ConnectionHandle::new();

        handle_signup(&state, &conn, Some("203.0.113.7"), v.signup("C1"))
            .await
            .unwrap();
        assert_eq!(store.validators()[0].ip, "203.0.113.7");

        // Reconnect from elsewhere refreshes the cached origin
        let (conn2, _rx2) = ConnectionHandle::new();
        handle_signup(&state, &conn2, Some("198.51.100.4"), v.signup("C2"))
            .await
            .unwrap();
        assert_eq!(store.validators()[0].ip, "198.51.100.4");
    }

    #[tokio::test]
    async fn test_signup_triggers_immediate_dispatch() {
        let (store, state) = setup();
        let w = store.add_website("http://example.com");
        let v = TestValidator::new(1);

        let (_id, _conn, mut rx) = signed_up(&state, &v).await;

        let dispatch = next_dispatch(&mut rx);
        assert_eq!(dispatch.url, "http://example.com");
        assert_eq!(dispatch.website_id, w.id);
        assert_eq!(state.callbacks.len(), 1);
    }

    #[tokio::test]
    async fn test_verified_result_records_tick_and_payout() {
        let (store, state) = setup();
        store.add_website("http://example.com");
        let v = TestValidator::new(1);
        let (id, _conn, mut rx) = signed_up(&state, &v).await;
        let dispatch = next_dispatch(&mut rx);

        let tick = handle_validate(&state, v.reply(&id, &dispatch)).await.unwrap();

        assert_eq!(tick.latency, 42.0);
        assert_eq!(tick.status, WebsiteStatus::Good);
        let ticks = store.ticks();
        assert_eq!(ticks.len(), 1);
        assert_eq!(ticks[0].validator_id, id);
        assert_eq!(ticks[0].website_id, dispatch.website_id);
        assert_eq!(
            store.get_validator(&id).await.unwrap().unwrap().pending_payouts,
            state.config.reward_per_check
        );
    }

    #[tokio::test]
    async fn test_bad_signature_result_changes_nothing() {
        let (store, state) = setup();
        store.add_website("http://example.com");
        let v = TestValidator::new(1);
        let (id, _conn, mut rx) = signed_up(&state, &v).await;
        let dispatch = next_dispatch(&mut rx);

        let mut reply = v.reply(&id, &dispatch);
        reply.signed_message = v.sign("Replying to someone-else");

        assert!(matches!(
            handle_validate(&state, reply).await,
            Err(HubError::InvalidSignature)
        ));
        assert!(store.ticks().is_empty());
        assert_eq!(
            store.get_validator(&id).await.unwrap().unwrap().pending_payouts,
            0
        );
    }

    #[tokio::test]
    async fn test_result_signed_by_other_validator_rejected() {
        let (store, state) = setup();
        store.add_website("http://example.com");
        let v = TestValidator::new(1);
        let other = TestValidator::new(2);
        let (id, _conn, mut rx) = signed_up(&state, &v).await;
        let dispatch = next_dispatch(&mut rx);

        let reply = other.reply(&id, &dispatch);
        assert!(handle_validate(&state, reply).await.is_err());
        assert!(store.ticks().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_result_processed_once() {
        let (store, state) = setup();
        store.add_website("http://example.com");
        let v = TestValidator::new(1);
        let (id, _conn, mut rx) = signed_up(&state, &v).await;
        let dispatch = next_dispatch(&mut rx);
        let reply = v.reply(&id, &dispatch);

        assert!(handle_validate(&state, reply.clone()).await.is_ok());
        assert!(matches!(
            handle_validate(&state, reply).await,
            Err(HubError::UnknownCallback(_))
        ));
        assert_eq!(store.ticks().len(), 1);
        assert_eq!(
            store.get_validator(&id).await.unwrap().unwrap().pending_payouts,
            state.config.reward_per_check
        );
    }

    #[tokio::test]
    async fn test_unknown_callback_is_dropped() {
        let (store, state) = setup();
        let v = TestValidator::new(1);
        let reply = v.reply(
            "v1",
            &ValidateOutgoing {
                url: "http://example.com".to_string(),
                callback_id: "never-issued".to_string(),
                website_id: "w".to_string(),
            },
        );

        assert!(matches!(
            handle_validate(&state, reply).await,
            Err(HubError::UnknownCallback(_))
        ));
        assert!(store.ticks().is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_validator_id_rejected() {
        let (store, state) = setup();
        store.add_website("http://example.com");
        let v = TestValidator::new(1);
        let (_id, _conn, mut rx) = signed_up(&state, &v).await;
        let dispatch = next_dispatch(&mut rx);

        let reply = v.reply("someone-else", &dispatch);
        assert!(matches!(
            handle_validate(&state, reply).await,
            Err(HubError::IdentityMismatch(_))
        ));
        assert!(store.ticks().is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_website_id_rejected() {
        let (store, state) = setup();
        store.add_website("http://example.com");
        let v = TestValidator::new(1);
        let (id, _conn, mut rx) = signed_up(&state, &v).await;
        let dispatch = next_dispatch(&mut rx);

        let mut reply = v.reply(&id, &dispatch);
        reply.website_id = Some("another-site".to_string());
        assert!(handle_validate(&state, reply).await.is_err());
        assert!(store.ticks().is_empty());
    }

    #[tokio::test]
    async fn test_result_after_disconnect_still_verified_with_dispatch_key() {
        let (store, state) = setup();
        store.add_website("http://example.com");
        let v = TestValidator::new(1);
        let (id, conn, mut rx) = signed_up(&state, &v).await;
        let dispatch = next_dispatch(&mut rx);

        state.registry.remove(&conn.id());
        assert!(handle_validate(&state, v.reply(&id, &dispatch)).await.is_ok());
        assert_eq!(store.ticks().len(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_loses_result_without_partial_write() {
        let (store, state) = setup();
        store.add_website("http://example.com");
        let v = TestValidator::new(1);
        let (id, _conn, mut rx) = signed_up(&state, &v).await;
        let dispatch = next_dispatch(&mut rx);

        store.set_fail_writes(true);
        assert!(matches!(
            handle_validate(&state, v.reply(&id, &dispatch)).await,
            Err(HubError::Store(_))
        ));
        store.set_fail_writes(false);

        assert!(store.ticks().is_empty());
        assert_eq!(
            store.get_validator(&id).await.unwrap().unwrap().pending_payouts,
            0
        );
        // The callback was consumed, no retry of this dispatch
        assert!(state.callbacks.is_empty());
    }

    #[tokio::test]
    async fn test_process_result_without_connection() {
        let (store, state) = setup();
        let v = store
            .find_or_create_validator("pk", "ip")
            .await
            .unwrap()
            .validator;
        let w: Website = store.add_website("http://example.com");
        let pending = PendingRequest {
            validator_id: v.id.clone(),
            public_key: v.public_key.clone(),
            website_id: w.id.clone(),
            issued_at: Instant::now(),
        };

        let tick = process_result(&state, &pending, WebsiteStatus::Bad, 1500.0)
            .await
            .unwrap();
        assert_eq!(tick.status, WebsiteStatus::Bad);
        assert_eq!(tick.website_id, w.id);
        assert_eq!(
            store.get_validator(&v.id).await.unwrap().unwrap().pending_payouts,
            100
        );
    }

    #[tokio::test]
    async fn test_handle_frame_survives_garbage() {
        let (store, state) = setup();
        let (conn, mut rx) = ConnectionHandle::new();

        handle_frame(&state, &conn, None, "not json").await;
        handle_frame(&state, &conn, None, r#"{"type":"unknown","data":{}}"#).await;
        handle_frame(
            &state,
            &conn,
            None,
            r#"{"type":"validate","data":{"callbackId":"x","status":"Good","latency":1,"validatorId":"v","signedMessage":"[]"}}"#,
        )
        .await;

        assert!(rx.try_recv().is_err());
        assert!(store.ticks().is_empty());
    }

    #[tokio::test]
    async fn test_handle_frame_routes_signup() {
        let (store, state) = setup();
        let v = TestValidator::new(4);
        let (conn, mut rx) = ConnectionHandle::new();
        let frame = serde_json::to_string(&IncomingMessage::Signup(v.signup("C1"))).unwrap();

        handle_frame(&state, &conn, None, &frame).await;

        assert!(matches!(next_frame(&mut rx), OutgoingMessage::Signup(_)));
        assert_eq!(store.validators().len(), 1);
    }

    #[test]
    fn test_parse_frame_reports_malformed_input() {
        assert!(matches!(parse_frame("not json"), Err(HubError::MalformedFrame(_))));
        assert!(matches!(
            parse_frame(r#"{"type":"unknown","data":{}}"#),
            Err(HubError::MalformedFrame(_))
        ));
    }

    /// Geolocation stand-in that counts every request it receives
    async fn geo_service() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = axum::Router::new().fallback(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                axum::Json(serde_json::json!({"city": "Lisbon", "country": "PT"}))
            }
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), hits)
    }

    fn geo_state(endpoint: String) -> (Arc<MemoryStore>, Arc<AppState>) {
        let store = Arc::new(MemoryStore::new());
        let config = HubConfig {
            geo_endpoint: Some(endpoint),
            ..Default::default()
        };
        (store.clone(), Arc::new(AppState::new(store, config)))
    }

    #[tokio::test]
    async fn test_signup_from_unknown_or_loopback_origin_is_not_geolocated() {
        let (endpoint, hits) = geo_service().await;
        let (store, state) = geo_state(endpoint);

        let (c1, _r1) = ConnectionHandle::new();
        handle_signup(&state, &c1, None, TestValidator::new(1).signup("C1"))
            .await
            .unwrap();

        let mut loopback = TestValidator::new(2).signup("C2");
        loopback.ip = "::1".to_string();
        let (c2, _r2) = ConnectionHandle::new();
        handle_signup(&state, &c2, None, loopback).await.unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(store
            .validators()
            .iter()
            .all(|v| v.location == UNKNOWN_LOCATION));
    }

    #[tokio::test]
    async fn test_signup_from_public_origin_is_geolocated() {
        let (endpoint, hits) = geo_service().await;
        let (store, state) = geo_state(endpoint);

        let mut signup = TestValidator::new(3).signup("C1");
        signup.ip = "203.0.113.9".to_string();
        let (conn, _rx) = ConnectionHandle::new();
        let id = handle_signup(&state, &conn, None, signup).await.unwrap();

        for _ in 0..100 {
            if store.get_validator(&id).await.unwrap().unwrap().location != UNKNOWN_LOCATION {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let validator = store.get_validator(&id).await.unwrap().unwrap();
        assert_eq!(validator.location, "Lisbon, PT");
        assert_eq!(validator.ip, "203.0.113.9");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
