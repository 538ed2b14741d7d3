use chrono::NaiveDate;

use crate::data::{Country, Person, PersonDraft};
use crate::Error;

/// A decoded wire message, either direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Command(Command),
    Response(Response),
}

/// A client-issued request. The `token` correlates the response on a
/// shared connection; the server echoes it back unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub token: u64,
    pub op: Op,
}

/// The closed set of operations a client can request. Adding a variant is
/// a compile-time-checked exhaustiveness gap in the dispatcher and codec.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Add(PersonDraft),
    Update { id: u64, draft: PersonDraft },
    RemoveById(u64),
    Clear,
    List,
    RemoveMatching(Predicate),
    Info,
    SumOfHeight,
    FilterContainsName(String),
    /// A bundled sequence executed atomically under a single store lock.
    RunScript(Vec<Op>),
}

/// A typed field-comparison descriptor for [`Op::RemoveMatching`].
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    NameContains(String),
    HeightBelow(i32),
    NationalityIs(Country),
}

impl Predicate {
    pub fn matches(&self, person: &Person) -> bool {
        match self {
            Predicate::NameContains(needle) => person.name.contains(needle.as_str()),
            Predicate::HeightBelow(limit) => person.height.is_some_and(|h| h < *limit),
            Predicate::NationalityIs(country) => person.nationality == *country,
        }
    }
}

/// The server's correlated reply to exactly one [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub token: u64,
    pub body: Reply,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ok(Payload),
    Err(Fault),
}

/// The optional payload of a successful reply.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    None,
    Record(Person),
    Records(Vec<Person>),
    Count(u64),
    Info(CollectionInfo),
}

/// Summary returned by [`Op::Info`].
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub backing: String,
    pub init_date: NaiveDate,
    pub len: u64,
}

/// The error taxonomy as it crosses the wire. Mirrors the recoverable
/// and connection-fatal halves of [`Error`] exactly, so a failure decoded
/// on the client is the same typed error the server produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    Validation { field: String, reason: String },
    NotFound { id: u64 },
    Persistence { detail: String },
    BadMessage { detail: String },
    UnsupportedVersion { version: u8 },
}

impl From<&Error> for Fault {
    fn from(err: &Error) -> Fault {
        match err {
            Error::Validation { field, reason } => Fault::Validation {
                field: field.clone(),
                reason: reason.clone(),
            },
            Error::NotFound(id) => Fault::NotFound { id: *id },
            Error::Persistence(detail) => Fault::Persistence {
                detail: detail.clone(),
            },
            Error::Codec(detail) => Fault::BadMessage {
                detail: detail.clone(),
            },
            Error::UnsupportedVersion(version) => Fault::UnsupportedVersion { version: *version },
            Error::Io(e) => Fault::Persistence {
                detail: e.to_string(),
            },
            Error::Serialization(e) => Fault::Persistence {
                detail: e.to_string(),
            },
        }
    }
}

impl From<Fault> for Error {
    fn from(fault: Fault) -> Error {
        match fault {
            Fault::Validation { field, reason } => Error::Validation { field, reason },
            Fault::NotFound { id } => Error::NotFound(id),
            Fault::Persistence { detail } => Error::Persistence(detail),
            Fault::BadMessage { detail } => Error::Codec(detail),
            Fault::UnsupportedVersion { version } => Error::UnsupportedVersion(version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Coordinates, EyeColor};

    fn person(name: &str, height: Option<i32>, nationality: Country) -> Person {
        Person {
            id: 1,
            name: name.to_string(),
            coordinates: Coordinates { x: 0.0, y: 0.0 },
            created_on: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            height,
            passport_id: None,
            eye_color: EyeColor::Black,
            nationality,
            location: None,
        }
    }

    #[test]
    fn predicate_name_contains() {
        let pred = Predicate::NameContains("li".to_string());
        assert!(pred.matches(&person("alice", None, Country::China)));
        assert!(!pred.matches(&person("bob", None, Country::China)));
    }

    #[test]
    fn predicate_height_below_ignores_absent() {
        let pred = Predicate::HeightBelow(170);
        assert!(pred.matches(&person("a", Some(160), Country::Japan)));
        assert!(!pred.matches(&person("b", Some(170), Country::Japan)));
        assert!(!pred.matches(&person("c", None, Country::Japan)));
    }

    #[test]
    fn fault_round_trips_through_error() {
        let err = Error::validation("coordinates.y", "must be greater than -816");
        let fault = Fault::from(&err);
        match Error::from(fault) {
            Error::Validation { field, reason } => {
                assert_eq!(field, "coordinates.y");
                assert_eq!(reason, "must be greater than -816");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
