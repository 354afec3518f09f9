// SPDX-License-Identifier: MIT OR Apache-2.0

//! Push server client contract and payload sealing.
//!
//! Payloads are encrypted with XChaCha20Poly1305 under the per-space
//! encryption key, the random 24-byte nonce prepended to the ciphertext.
//! The ciphertext is then signed with the account key so the server can
//! attribute it without reading it.
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{Key, KeyInit, XChaCha20Poly1305, XNonce};
use hearth_core::identity::{PrivateKey, Signature};
use rand::RngCore;
use thiserror::Error;

use crate::keys::{EncryptionKey, SpaceKeys};
use crate::topics::SignedTopic;

const NONCE_LEN: usize = 24;

/// Device platform a push token belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Platform {
    Ios,
    Android,
}

/// Sealed notification payload as sent to the push server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedMessage {
    /// Identifies the encryption key so recipients pick the right one
    /// after a rotation.
    pub key_id: String,
    pub ciphertext: Vec<u8>,
    pub signature: Signature,
}

/// The push server API. Implemented by the transport client, stubbed in
/// tests.
pub trait PushApi: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn set_token(
        &self,
        platform: Platform,
        token: &str,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn create_space(
        &self,
        space_key: &[u8],
        account_signature: &Signature,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;

    fn notify(
        &self,
        topics: Vec<SignedTopic>,
        message: EncryptedMessage,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("could not encrypt push payload: {0}")]
    Encrypt(chacha20poly1305::Error),

    #[error("could not decrypt push payload: {0}")]
    Decrypt(chacha20poly1305::Error),

    #[error("push payload is too short to carry a nonce")]
    TooShort,
}

pub fn encrypt_payload(key: &EncryptionKey, payload: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), payload)
        .map_err(CryptoError::Encrypt)?;

    let mut sealed = nonce.to_vec();
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

pub fn decrypt_payload(key: &EncryptionKey, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN {
        return Err(CryptoError::TooShort);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);

    let cipher = XChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(CryptoError::Decrypt)
}

/// Seals a payload for one space and signs it with the account key.
pub fn seal_message(
    keys: &SpaceKeys,
    account_key: &PrivateKey,
    payload: &[u8],
) -> Result<EncryptedMessage, CryptoError> {
    let ciphertext = encrypt_payload(&keys.encryption_key, payload)?;
    let signature = account_key.sign(&ciphertext);
    Ok(EncryptedMessage {
        key_id: keys.encryption_key_id.clone(),
        ciphertext,
        signature,
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use hearth_core::acl::{MetadataKey, ReadKey};
    use hearth_core::identity::PrivateKey;
    use hearth_spaces::PushKeyMaterial;

    use crate::keys::{derive_encryption_key, derive_space_keys};

    use super::{CryptoError, decrypt_payload, encrypt_payload, seal_message};

    fn key() -> crate::keys::EncryptionKey {
        derive_encryption_key(&ReadKey::new(vec![9; 32]))
    }

    #[test]
    fn payloads_round_trip() {
        let key = key();
        let sealed = encrypt_payload(&key, b"new message in general").unwrap();
        // Nonce plus ciphertext plus tag.
        assert!(sealed.len() > 24 + 16);
        assert_eq!(
            decrypt_payload(&key, &sealed).unwrap(),
            b"new message in general"
        );
    }

    #[test]
    fn tampered_payloads_fail() {
        let key = key();
        let mut sealed = encrypt_payload(&key, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert_matches!(decrypt_payload(&key, &sealed), Err(CryptoError::Decrypt(_)));
        assert_matches!(decrypt_payload(&key, &[1, 2, 3]), Err(CryptoError::TooShort));
    }

    #[test]
    fn sealed_messages_carry_the_key_id_and_signature() {
        let account_key = PrivateKey::new();
        let keys = derive_space_keys(&PushKeyMaterial {
            first_metadata_key: MetadataKey::new(vec![7; 32]),
            read_key: ReadKey::new(vec![9; 32]),
            read_key_id: "rk-1".to_string(),
        });

        let message = seal_message(&keys, &account_key, b"payload").unwrap();
        assert_eq!(message.key_id, keys.encryption_key_id);
        assert!(
            account_key
                .public_key()
                .verify(&message.ciphertext, &message.signature)
        );
        assert_eq!(
            decrypt_payload(&keys.encryption_key, &message.ciphertext).unwrap(),
            b"payload"
        );
    }
}
