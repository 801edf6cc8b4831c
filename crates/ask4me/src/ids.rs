// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Identifier and token primitives: generation, validation, hashing.
//!
//! All randomness is drawn from `rand::rng()`, the thread-local CSPRNG
//! seeded from the OS. Request/event ids are lowercased unpadded base32
//! so they are safe in URL path segments without escaping; token
//! plaintexts are left in the encoder's native case since they only
//! ever travel in a query string, which is percent-encoded anyway.

use data_encoding::BASE32_NOPAD;
use rand::Rng;
use sha2::{Digest, Sha256};

const REQUEST_ID_PREFIX: &str = "req_";
const EVENT_ID_PREFIX: &str = "evt_";

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::rng().fill(&mut buf);
    buf
}

/// Mint a fresh `req_`-prefixed request id: 16 random bytes, base32, lowercased, unpadded.
pub fn generate_request_id() -> String {
    let bytes = random_bytes::<16>();
    format!("{REQUEST_ID_PREFIX}{}", BASE32_NOPAD.encode(&bytes).to_lowercase())
}

/// Mint a fresh `evt_`-prefixed event id: 16 random bytes, base32, lowercased, unpadded.
pub fn generate_event_id() -> String {
    let bytes = random_bytes::<16>();
    format!("{EVENT_ID_PREFIX}{}", BASE32_NOPAD.encode(&bytes).to_lowercase())
}

/// Mint a fresh bearer token plaintext: 32 random bytes, base32, unpadded.
///
/// Mixed case is permitted by the spec; we leave the encoder's default
/// (uppercase) case untouched since the value is never parsed back by a
/// case-sensitive predicate, only hashed and byte-compared.
pub fn generate_token_plaintext() -> String {
    let bytes = random_bytes::<32>();
    BASE32_NOPAD.encode(&bytes)
}

/// Hex-encoded SHA-256 of a token plaintext, for at-rest storage.
pub fn hash_token(plaintext: &str) -> String {
    let digest = Sha256::digest(plaintext.as_bytes());
    hex::encode(digest)
}

/// Validate a caller-chosen or generated request id against spec's predicate:
/// `req_` prefix, only lowercase letters/digits/underscore, length 5-128.
pub fn is_valid_request_id(id: &str) -> bool {
    if !(5..=128).contains(&id.len()) {
        return false;
    }
    if !id.starts_with(REQUEST_ID_PREFIX) {
        return false;
    }
    id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
}
