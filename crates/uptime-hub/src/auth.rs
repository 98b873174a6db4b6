//! Validator signature verification
//!
//! Validators sign with ed25519 wallet keys. On the wire the public key is
//! base58 and the detached signature is a JSON array of its 64 bytes, e.g.
//! `"[12,250,...]"`.
//!
//! The signed strings are fixed templates. Signer and verifier must produce
//! identical bytes, so every call site goes through [`signup_message`] and
//! [`reply_message`].

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use tracing::debug;

/// Message a validator signs when it signs up
pub fn signup_message(callback_id: &str, public_key: &str) -> String {
    format!("Signed message for {}, {}", callback_id, public_key)
}

/// Message a validator signs when it replies to a dispatch
pub fn reply_message(callback_id: &str) -> String {
    format!("Replying to {}", callback_id)
}

/// Verify a detached ed25519 signature over `message`.
///
/// Malformed keys or signatures are a verification failure, never a panic.
pub fn verify(message: &[u8], public_key: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}

/// Verify a signature using the wire encodings (base58 key, JSON byte array).
pub fn verify_signature(message: &str, public_key: &str, signature: &str) -> bool {
    let Some(key) = decode_public_key(public_key) else {
        debug!("Rejecting signature: undecodable public key");
        return false;
    };
    let Some(sig) = decode_signature(signature) else {
        debug!("Rejecting signature: undecodable signature bytes");
        return false;
    };
    verify(message.as_bytes(), &key, &sig)
}

/// Decode a base58 public key
pub fn decode_public_key(public_key: &str) -> Option<Vec<u8>> {
    bs58::decode(public_key).into_vec().ok()
}

/// Decode a signature serialized as a JSON byte array
pub fn decode_signature(signature: &str) -> Option<Vec<u8>> {
    serde_json::from_str::<Vec<u8>>(signature).ok()
}

/// Encode signature bytes the way validators send them
pub fn encode_signature(signature: &[u8]) -> String {
    serde_json::to_string(signature).unwrap_or_else(|_| "[]".to_string())
}
