//! Wire types shared between the Relay runtime and its clients.

mod envelope;
mod error;
mod message;

pub use envelope::{
    decode_envelope, encode_envelope, verify_sequence_hints, Envelope, EnvelopeBody, SubmitPayload,
};
pub use error::ProtocolError;
pub use message::{Message, Part, Role};
