//! pipehub wire protocol.
//!
//! Every message exchanged between a pipeline and the relay is a frame:
//!
//! ```text
//! [length: u64, big endian][payload: `length` bytes of UTF-8 JSON]
//! ```
//!
//! The format is symmetric, both directions use the same framing.
//!
//! # Layers
//!
//! - [`FrameHeader`] / [`Frame`]: pure in-memory encode/decode (Sans-IO)
//! - [`read_frame`] / [`write_frame`]: async helpers over `tokio::io` streams
//! - [`Envelope`] / [`MessageKind`]: the minimal JSON structure the relay
//!   routes on (`"type"` and `"uuid"`)

#![forbid(unsafe_code)]

mod errors;
mod frame;
mod io;
mod message;

pub use errors::{ProtocolError, Result};
pub use frame::{Frame, FrameHeader, decode_text};
pub use io::{ReadOutcome, read_frame, write_frame};
pub use message::{Envelope, MessageError, MessageKind, route_target};
