//! The wire codec shared by client and server.
//!
//! Every message is one frame: `[version:1][kind:1][length:4]` followed by
//! `length` payload bytes, big-endian throughout. [`frame`] handles the
//! header, [`wire`] the payload shapes, [`connection`] buffered frame I/O
//! over a TCP stream, and [`command`] the message types themselves.
pub mod command;
pub mod connection;
pub mod frame;
pub mod wire;

pub use command::{Command, Message, Op, Payload, Predicate, Reply, Response};
pub use connection::Connection;
pub use frame::{MAX_FRAME, PROTOCOL_VERSION};
