// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helper methods to encode and decode CBOR bytes.
//!
//! CBOR is the persistence and wire format for all space data: tree changes,
//! access-control records, account metadata and push payloads.
use std::io::Read;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Encodes any serializable value into CBOR bytes.
pub fn encode_cbor<T>(value: &T) -> Result<Vec<u8>, EncodeError>
where
    T: Serialize,
{
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

/// Decodes CBOR bytes into a value.
pub fn decode_cbor<T>(bytes: impl Read) -> Result<T, DecodeError>
where
    T: for<'a> Deserialize<'a>,
{
    let value = ciborium::de::from_reader(bytes)?;
    Ok(value)
}

/// Errors which can occur when encoding values into CBOR.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid cbor value: {0}")]
    Value(String),
}

impl From<ciborium::ser::Error<std::io::Error>> for EncodeError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        match err {
            ciborium::ser::Error::Io(err) => Self::Io(err),
            ciborium::ser::Error::Value(msg) => Self::Value(msg),
        }
    }
}

/// Errors which can occur when decoding CBOR bytes.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid cbor syntax at position {0}")]
    Syntax(usize),

    #[error("invalid cbor semantics: {1}")]
    Semantic(Option<usize>, String),

    #[error("cbor recursion limit exceeded")]
    RecursionLimitExceeded,
}

impl From<ciborium::de::Error<std::io::Error>> for DecodeError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        match err {
            ciborium::de::Error::Io(err) => Self::Io(err),
            ciborium::de::Error::Syntax(position) => Self::Syntax(position),
            ciborium::de::Error::Semantic(position, msg) => Self::Semantic(position, msg),
            ciborium::de::Error::RecursionLimitExceeded => Self::RecursionLimitExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};

    use super::{decode_cbor, encode_cbor};

    #[derive(Serialize, Deserialize, Debug, PartialEq)]
    struct Sandwich {
        filling: String,
        slices: u8,
    }

    #[test]
    fn encode_decode() {
        let value = Sandwich {
            filling: "halloumi".into(),
            slices: 2,
        };
        let bytes = encode_cbor(&value).unwrap();
        let decoded: Sandwich = decode_cbor(&bytes[..]).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn decoding_wrong_shape_fails() {
        let bytes = encode_cbor(&vec![1u8, 2, 3]).unwrap();
        let result: Result<Sandwich, _> = decode_cbor(&bytes[..]);
        assert!(result.is_err());
    }
}
