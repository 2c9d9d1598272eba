//! HTTP/1.x wire codec: head parsing and serialization plus body framing.

mod decoder;
mod encoder;
mod parse;

pub use decoder::{BodyDecoder, DecoderState};
pub use encoder::{BodyEncoder, EncoderState};
pub use parse::{
    outgoing_entity, parse_request_head, parse_response_head, request_entity, response_entity,
    write_request_head, write_response_head, MAX_HEADERS,
};
