// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encrypted push notifications for spaces.
//!
//! Spaces announce themselves to a push server under a derived signing
//! key, payloads travel end-to-end encrypted under a derived symmetric key
//! and the server never learns either the content or the space identity
//! behind the key. The engine in [`service`] keeps token registration and
//! space announcements in sync with the tech space and delivers queued
//! notifications with bounded retries.
pub mod client;
pub mod keys;
pub mod service;
pub mod topics;

pub use client::{
    CryptoError, EncryptedMessage, Platform, PushApi, decrypt_payload, encrypt_payload,
    seal_message,
};
pub use keys::{
    EncryptionKey, SpaceKeys, derive_encryption_key, derive_signing_key, derive_space_keys,
    encryption_key_id,
};
pub use service::{PushConfig, PushEngine, PushError};
pub use topics::{SignedTopic, make_topics};
