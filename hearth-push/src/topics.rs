// SPDX-License-Identifier: MIT OR Apache-2.0

//! Signed push topics.
//!
//! The push server only accepts subscriptions and notifications for topics
//! signed by the space signing key, so holding the key material of a space
//! is what authorizes publishing under its name.
use hearth_core::identity::{PrivateKey, Signature};

/// One topic of one space, signed by the space signing key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTopic {
    /// Public half of the space signing key, raw bytes.
    pub space_key: Vec<u8>,
    pub topic: String,
    pub signature: Signature,
}

pub fn make_topics(signing_key: &PrivateKey, topics: &[String]) -> Vec<SignedTopic> {
    let space_key = signing_key.public_key().to_bytes().to_vec();
    topics
        .iter()
        .map(|topic| SignedTopic {
            space_key: space_key.clone(),
            topic: topic.clone(),
            signature: signing_key.sign(topic.as_bytes()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use hearth_core::identity::{PrivateKey, PublicKey};

    use super::make_topics;

    #[test]
    fn topics_verify_under_the_space_key() {
        let signing_key = PrivateKey::new();
        let topics = make_topics(&signing_key, &["chats".to_string(), "invites".to_string()]);
        assert_eq!(topics.len(), 2);

        for topic in &topics {
            let space_key = PublicKey::from_bytes(&topic.space_key).unwrap();
            assert!(space_key.verify(topic.topic.as_bytes(), &topic.signature));
        }

        // A signature does not transfer to another topic string.
        assert!(
            !signing_key
                .public_key()
                .verify(b"other", &topics[0].signature)
        );
    }
}
