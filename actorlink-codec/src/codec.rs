//! The self-describing wire codec (sec4.3): one `Codec` trait, two
//! implementations, and a small `Encoding` tag the caller carries
//! out-of-band so the codec never has to guess which format it received.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Which wire format an envelope was encoded with.
#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    /// Compact binary format; the default for RPC traffic over a
    /// size-bounded link.
    Postcard = 1,
    /// Human-readable format for diagnostics and compliance tooling.
    Json = 2,
}

impl TryFrom<u16> for Encoding {
    type Error = UnknownEncoding;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Encoding::Postcard),
            2 => Ok(Encoding::Json),
            _ => Err(UnknownEncoding(v)),
        }
    }
}

impl From<Encoding> for u16 {
    fn from(encoding: Encoding) -> u16 {
        encoding as u16
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Postcard => write!(f, "postcard"),
            Encoding::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownEncoding(pub u16);

impl fmt::Display for UnknownEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown encoding: {}", self.0)
    }
}

impl std::error::Error for UnknownEncoding {}

/// One wire format's encode/decode pair.
pub trait Codec {
    const ENCODING: Encoding;

    type EncodeError: std::error::Error;
    type DecodeError: std::error::Error;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, Self::EncodeError>;
    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Self::DecodeError>;
}

/// Compact binary encoding used for all in-band RPC traffic by default.
pub struct PostcardCodec;

impl Codec for PostcardCodec {
    const ENCODING: Encoding = Encoding::Postcard;
    type EncodeError = postcard::Error;
    type DecodeError = postcard::Error;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, Self::EncodeError> {
        postcard::to_allocvec(val)
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Self::DecodeError> {
        postcard::from_bytes(buf)
    }
}

/// Human-readable encoding for diagnostics and demo/compliance tooling.
pub struct JsonCodec;

impl Codec for JsonCodec {
    const ENCODING: Encoding = Encoding::Json;
    type EncodeError = serde_json::Error;
    type DecodeError = serde_json::Error;

    fn encode<T: Serialize>(val: &T) -> Result<Vec<u8>, Self::EncodeError> {
        serde_json::to_vec(val)
    }

    fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<T, Self::DecodeError> {
        serde_json::from_slice(buf)
    }
}

/// Encode with whichever codec `encoding` names. Returns the encoded bytes
/// boxed behind a common error type since `PostcardCodec`/`JsonCodec` don't
/// share an `EncodeError`.
pub fn encode_with<T: Serialize>(encoding: Encoding, val: &T) -> Result<Vec<u8>, String> {
    match encoding {
        Encoding::Postcard => PostcardCodec::encode(val).map_err(|e| e.to_string()),
        Encoding::Json => JsonCodec::encode(val).map_err(|e| e.to_string()),
    }
}

/// Decode with whichever codec `encoding` names.
pub fn decode_with<T: DeserializeOwned>(encoding: Encoding, buf: &[u8]) -> Result<T, String> {
    match encoding {
        Encoding::Postcard => PostcardCodec::decode(buf).map_err(|e| e.to_string()),
        Encoding::Json => JsonCodec::decode(buf).map_err(|e| e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
    struct TestMessage {
        id: u32,
        name: String,
    }

    #[test]
    fn encoding_try_from_u16() {
        assert_eq!(Encoding::try_from(1).unwrap(), Encoding::Postcard);
        assert_eq!(Encoding::try_from(2).unwrap(), Encoding::Json);
        assert_eq!(Encoding::try_from(99), Err(UnknownEncoding(99)));
    }

    #[test]
    fn encoding_roundtrip_through_u16() {
        for encoding in [Encoding::Postcard, Encoding::Json] {
            let val = u16::from(encoding);
            assert_eq!(Encoding::try_from(val).unwrap(), encoding);
        }
    }

    #[test]
    fn postcard_roundtrip() {
        let msg = TestMessage { id: 7, name: "thermostat".into() };
        let bytes = PostcardCodec::encode(&msg).unwrap();
        let decoded: TestMessage = PostcardCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn json_roundtrip() {
        let msg = TestMessage { id: 7, name: "thermostat".into() };
        let bytes = JsonCodec::encode(&msg).unwrap();
        let decoded: TestMessage = JsonCodec::decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn encode_with_dispatches_on_encoding_tag() {
        let msg = TestMessage { id: 1, name: "x".into() };
        let postcard_bytes = encode_with(Encoding::Postcard, &msg).unwrap();
        let json_bytes = encode_with(Encoding::Json, &msg).unwrap();
        assert_ne!(postcard_bytes, json_bytes);
        let decoded: TestMessage = decode_with(Encoding::Postcard, &postcard_bytes).unwrap();
        assert_eq!(decoded, msg);
        let decoded: TestMessage = decode_with(Encoding::Json, &json_bytes).unwrap();
        assert_eq!(decoded, msg);
    }
}
