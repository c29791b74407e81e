//! Vehicle Identification Number and its substructure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder reported when no ECU answered a VIN query.
pub const VIN_UNKNOWN: &str = "00000000000000000";

pub const VIN_LEN: usize = 17;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VinError {
    #[error("VIN must be {VIN_LEN} characters, got {0}")]
    Length(usize),

    #[error("invalid VIN character {0:?}")]
    Character(char),
}

/// A 17-character VIN (ISO 3779).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Vin(String);

impl Vin {
    pub fn parse(s: &str) -> Result<Self, VinError> {
        let s = s.trim();
        if s.len() != VIN_LEN {
            return Err(VinError::Length(s.len()));
        }
        if let Some(c) = s.chars().find(|c| !is_vin_char(*c)) {
            return Err(VinError::Character(c));
        }
        Ok(Self(s.to_string()))
    }

    pub fn unknown() -> Self {
        Self(VIN_UNKNOWN.to_string())
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == VIN_UNKNOWN
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// World manufacturer identifier, characters 1–3.
    pub fn wmi(&self) -> &str {
        &self.0[0..3]
    }

    /// Vehicle descriptor section, characters 4–9.
    pub fn vds(&self) -> &str {
        &self.0[3..9]
    }

    /// Model-line / chassis code, characters 7–8.
    pub fn chassis_code(&self) -> &str {
        &self.0[6..8]
    }

    /// Model-year code, character 10.
    pub fn model_year_code(&self) -> char {
        self.0.as_bytes()[9] as char
    }
}

fn is_vin_char(c: char) -> bool {
    (c.is_ascii_uppercase() || c.is_ascii_digit()) && !matches!(c, 'I' | 'O' | 'Q')
}

impl TryFrom<String> for Vin {
    type Error = VinError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Vin::parse(&value)
    }
}

impl From<Vin> for String {
    fn from(vin: Vin) -> Self {
        vin.0
    }
}

impl std::fmt::Display for Vin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
