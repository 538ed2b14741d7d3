use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Maximum length for `name`, `passport_id` and `location.name`.
const MAX_TEXT_LEN: usize = 50;
/// Minimum length for `passport_id` when present.
const MIN_PASSPORT_LEN: usize = 8;
/// Exclusive lower bound for `coordinates.y`.
const MIN_COORD_Y: f32 = -816.0;

/// A managed record in the collection.
///
/// `id` and `created_on` are server-assigned: `id` is unique, monotonic
/// and never reused; `created_on` is fixed at insertion and survives
/// updates. A `Person` only enters the collection through the store,
/// which validates the [`PersonDraft`] first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: u64,
    pub name: String,
    pub coordinates: Coordinates,
    pub created_on: NaiveDate,
    pub height: Option<i32>,
    pub passport_id: Option<String>,
    pub eye_color: EyeColor,
    pub nationality: Country,
    pub location: Option<Location>,
}

/// A client-supplied candidate record: everything the user controls,
/// nothing the server assigns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonDraft {
    pub name: String,
    pub coordinates: Coordinates,
    pub height: Option<i32>,
    pub passport_id: Option<String>,
    pub eye_color: EyeColor,
    pub nationality: Country,
    pub location: Option<Location>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: f32,
    /// Must be greater than -816.
    pub y: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub y: f32,
    pub z: i64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EyeColor {
    Black,
    Orange,
    Brown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Country {
    UnitedKingdom,
    Germany,
    China,
    Thailand,
    Japan,
}

impl PersonDraft {
    /// Checks every validation constraint. Pure; reports the first
    /// violation with a dotted path to the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::validation("name", "must not be empty"));
        }
        if self.name.chars().count() > MAX_TEXT_LEN {
            return Err(Error::validation("name", "must be at most 50 characters"));
        }
        self.coordinates.validate("coordinates")?;
        if let Some(height) = self.height {
            if height <= 0 {
                return Err(Error::validation("height", "must be greater than 0"));
            }
        }
        if let Some(passport) = &self.passport_id {
            let len = passport.chars().count();
            if !(MIN_PASSPORT_LEN..=MAX_TEXT_LEN).contains(&len) {
                return Err(Error::validation(
                    "passport_id",
                    "must be 8 to 50 characters",
                ));
            }
        }
        if let Some(location) = &self.location {
            location.validate("location")?;
        }
        Ok(())
    }

    /// Promotes a validated draft into a stored record. Only the store
    /// calls this, after `validate` and under its id allocation.
    pub(crate) fn into_person(self, id: u64, created_on: NaiveDate) -> Person {
        Person {
            id,
            name: self.name,
            coordinates: self.coordinates,
            created_on,
            height: self.height,
            passport_id: self.passport_id,
            eye_color: self.eye_color,
            nationality: self.nationality,
            location: self.location,
        }
    }
}

impl Person {
    /// The draft equivalent of this record, used when re-submitting it
    /// through an update.
    pub fn draft(&self) -> PersonDraft {
        PersonDraft {
            name: self.name.clone(),
            coordinates: self.coordinates,
            height: self.height,
            passport_id: self.passport_id.clone(),
            eye_color: self.eye_color,
            nationality: self.nationality,
            location: self.location.clone(),
        }
    }
}

impl Coordinates {
    fn validate(&self, path: &str) -> Result<()> {
        if !self.x.is_finite() {
            return Err(Error::validation(format!("{path}.x"), "must be finite"));
        }
        if !(self.y.is_finite() && self.y > MIN_COORD_Y) {
            return Err(Error::validation(
                format!("{path}.y"),
                "must be greater than -816",
            ));
        }
        Ok(())
    }
}

impl Location {
    fn validate(&self, path: &str) -> Result<()> {
        if !self.x.is_finite() {
            return Err(Error::validation(format!("{path}.x"), "must be finite"));
        }
        if !self.y.is_finite() {
            return Err(Error::validation(format!("{path}.y"), "must be finite"));
        }
        if let Some(name) = &self.name {
            let len = name.chars().count();
            if len == 0 || len > MAX_TEXT_LEN {
                return Err(Error::validation(
                    format!("{path}.name"),
                    "must be 1 to 50 characters",
                ));
            }
        }
        Ok(())
    }
}

impl EyeColor {
    pub const ALL: [EyeColor; 3] = [EyeColor::Black, EyeColor::Orange, EyeColor::Brown];
}

impl Country {
    pub const ALL: [Country; 5] = [
        Country::UnitedKingdom,
        Country::Germany,
        Country::China,
        Country::Thailand,
        Country::Japan,
    ];
}

impl fmt::Display for EyeColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EyeColor::Black => "black",
            EyeColor::Orange => "orange",
            EyeColor::Brown => "brown",
        };
        write!(f, "{s}")
    }
}

impl FromStr for EyeColor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "black" => Ok(EyeColor::Black),
            "orange" => Ok(EyeColor::Orange),
            "brown" => Ok(EyeColor::Brown),
            _ => Err(Error::validation(
                "eye_color",
                "expected one of: black, orange, brown",
            )),
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Country::UnitedKingdom => "united-kingdom",
            Country::Germany => "germany",
            Country::China => "china",
            Country::Thailand => "thailand",
            Country::Japan => "japan",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Country {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "united-kingdom" | "united_kingdom" | "uk" => Ok(Country::UnitedKingdom),
            "germany" => Ok(Country::Germany),
            "china" => Ok(Country::China),
            "thailand" => Ok(Country::Thailand),
            "japan" => Ok(Country::Japan),
            _ => Err(Error::validation(
                "nationality",
                "expected one of: united-kingdom, germany, china, thailand, japan",
            )),
        }
    }
}
