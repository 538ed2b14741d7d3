//! The record model: [`Person`] and its nested sub-objects, plus the
//! validation rules a candidate must satisfy before it is admitted into
//! the collection.
pub mod person;

pub use person::{Coordinates, Country, EyeColor, Location, Person, PersonDraft};
