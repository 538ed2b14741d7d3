//! Roster Store is a client/server application for managing a shared
//! collection of person records over a custom binary protocol.
//!
//! The server holds the authoritative in-memory collection and synchronizes
//! every successful mutation to durable storage before acknowledging it
//! (write-through). Clients talk to it over a versioned, length-prefixed
//! binary TCP protocol.
//!
//! ## Core Components
//! - [`data`]: The record model (`Person` and nested sub-objects) and its
//!   validation rules.
//! - [`proto`]: The wire codec shared by client and server.
//! - [`engine`]: The collection store and the persistence gateway.
//! - [`server`]: The TCP daemon's connection router.
//! - [`sdk`]: Client libraries for both embedded and remote (TCP) modes.

pub mod data;
pub mod engine;
pub mod proto;
pub mod sdk;
pub mod server;

use async_trait::async_trait;
use thiserror::Error;

use crate::data::{Person, PersonDraft};
use crate::proto::command::{CollectionInfo, Op, Predicate};

/// Errors returned by the Roster Store.
#[derive(Error, Debug)]
pub enum Error {
    /// A candidate record violates a validation constraint. `field` is a
    /// dotted path into the record (e.g. `coordinates.y`).
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },
    /// No record with the given id exists in the collection.
    #[error("no person with id {0}")]
    NotFound(u64),
    /// Malformed or oversized wire data. Fatal for the connection it
    /// arrived on.
    #[error("protocol error: {0}")]
    Codec(String),
    /// The peer speaks a different protocol version. Fatal for the
    /// connection.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),
    /// Durable storage was unreachable or the write failed. The triggering
    /// mutation has been rolled back in memory.
    #[error("persistence error: {0}")]
    Persistence(String),
    /// An I/O error occurred during persistence or network communication.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// Error during snapshot serialization or deserialization.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Error {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn codec(msg: impl Into<String>) -> Error {
        Error::Codec(msg.into())
    }
}

/// A specialized Result type for Roster Store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The operation surface shared by the embedded store and the remote
/// client. One method per command variant; the CLI and tests are written
/// against `Arc<dyn RosterOps>` and do not care which side of the wire
/// they run on.
#[async_trait]
pub trait RosterOps: Send + Sync {
    /// Validates the draft, assigns the next id and today's date, inserts
    /// it, and returns the stored record.
    async fn add(&self, draft: PersonDraft) -> Result<Person>;
    /// Replaces the record at `id` with a validated draft, preserving the
    /// id and the original creation date.
    async fn update(&self, id: u64, draft: PersonDraft) -> Result<Person>;
    /// Removes the record with the given id.
    async fn remove_by_id(&self, id: u64) -> Result<()>;
    /// Empties the collection unconditionally.
    async fn clear(&self) -> Result<()>;
    /// Returns a snapshot of all records, id ascending.
    async fn list(&self) -> Result<Vec<Person>>;
    /// Removes every record matching the predicate; returns the count
    /// removed (zero is a successful outcome).
    async fn remove_matching(&self, predicate: Predicate) -> Result<u64>;
    /// Returns backing type, init date, and element count.
    async fn info(&self) -> Result<CollectionInfo>;
    /// Sum of the `height` field over all records (absent heights count
    /// as zero).
    async fn sum_of_height(&self) -> Result<u64>;
    /// Records whose name contains the given substring, id ascending.
    async fn filter_contains_name(&self, needle: &str) -> Result<Vec<Person>>;
    /// Executes a bundled sequence of operations as one atomic unit: the
    /// first failure short-circuits and rolls the whole batch back.
    /// Returns the number of operations applied.
    async fn run_script(&self, ops: Vec<Op>) -> Result<u64>;
}
