//! Invocation/response envelopes (C3) and the runtime-face error taxonomy
//! (the wire-crossing half of C8).

pub mod codec;
pub mod envelope;

pub use codec::{decode_with, encode_with, Codec, Encoding, JsonCodec, PostcardCodec, UnknownEncoding};
pub use envelope::{CallResult, InvocationEnvelope, ResponseEnvelope, RuntimeError, PROTOCOL_VERSION};
