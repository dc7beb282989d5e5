//! Structured batch identifiers: date keys, batch codes, sequence scanning.

use core::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, de};

use crate::error::{DomainError, DomainResult};

/// Six-digit date component of a [`BatchCode`].
///
/// Two encodings are in use on the packing floor:
/// - [`DateKey::from_date`]: `YYMMDD` of a single date (production lots).
/// - [`DateKey::spanning`]: day of the WIP date followed by month and day of
///   the packing date (documents that span intake and packing).
///
/// Both collapse to six ASCII digits; codes carry only the digits, so the two
/// forms are distinguished by context, not by shape.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DateKey(String);

impl DateKey {
    /// Accepts exactly six ASCII digits (surrounding whitespace ignored).
    pub fn new(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.len() == 6 && s.bytes().all(|b| b.is_ascii_digit()) {
            Some(Self(s.to_owned()))
        } else {
            None
        }
    }

    /// `YYMMDD` of a single date.
    pub fn from_date(date: NaiveDate) -> Self {
        Self(format!(
            "{:02}{:02}{:02}",
            date.year().rem_euclid(100),
            date.month(),
            date.day()
        ))
    }

    /// Dual-date form: `DD` of the WIP date, then `MMDD` of the packing date.
    pub fn spanning(wip_date: NaiveDate, packed_date: NaiveDate) -> Self {
        Self(format!(
            "{:02}{:02}{:02}",
            wip_date.day(),
            packed_date.month(),
            packed_date.day()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DateKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DateKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or_else(|| DomainError::invalid_id(format!("DateKey: {s:?}")))
    }
}

impl Serialize for DateKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for DateKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).ok_or_else(|| de::Error::custom(format!("invalid date key: {raw:?}")))
    }
}

/// Structured batch identifier: `PREFIX-DATE6-SEQ`.
///
/// Renders with the sequence zero-padded to three digits (`BT6-150615-001`).
/// Sequences beyond 999 render with four or more digits; no roll-over is
/// attempted.
///
/// Ordering is by prefix, then date key, then sequence, so sorted codes group
/// naturally by product line and day.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BatchCode {
    prefix: String,
    date_key: DateKey,
    sequence: u32,
}

impl BatchCode {
    /// Build a code from its parts.
    ///
    /// The prefix must be non-empty and must not contain `-` (it would not
    /// survive a round trip through [`BatchCode::parse`]).
    pub fn new(prefix: impl Into<String>, date_key: DateKey, sequence: u32) -> DomainResult<Self> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(DomainError::validation("batch code prefix cannot be empty"));
        }
        if prefix.contains('-') {
            return Err(DomainError::validation(
                "batch code prefix cannot contain '-'",
            ));
        }
        Ok(Self {
            prefix,
            date_key,
            sequence,
        })
    }

    /// Parse an identifier string into a structured code.
    ///
    /// Returns `None` for anything that is not exactly three dash-separated
    /// segments with a non-empty prefix, a six-digit date and a numeric
    /// sequence. Malformed input is a skip condition for scanning code, never
    /// an error.
    pub fn parse(s: &str) -> Option<Self> {
        let mut parts = s.trim().split('-');
        let (prefix, date, seq) = (parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some() || prefix.is_empty() {
            return None;
        }
        let date_key = DateKey::new(date)?;
        let sequence = seq.parse::<u32>().ok()?;
        Some(Self {
            prefix: prefix.to_owned(),
            date_key,
            sequence,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn date_key(&self) -> &DateKey {
        &self.date_key
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl core::fmt::Display for BatchCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}-{}-{:03}", self.prefix, self.date_key, self.sequence)
    }
}

impl FromStr for BatchCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| DomainError::invalid_id(format!("BatchCode: {s:?}")))
    }
}

impl Serialize for BatchCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for BatchCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).ok_or_else(|| de::Error::custom(format!("invalid batch code: {raw:?}")))
    }
}

/// Next free sequence number for `prefix` under `date_key`.
///
/// Scans existing identifier strings and returns one past the highest
/// sequence among codes with the same prefix and date key. Malformed
/// identifiers and codes under other prefixes or date keys are skipped.
/// Starts at 1 when nothing matches; saturates at `u32::MAX` rather than
/// rolling over.
pub fn next_sequence<I>(existing: I, prefix: &str, date_key: &DateKey) -> u32
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    existing
        .into_iter()
        .filter_map(|raw| BatchCode::parse(raw.as_ref()))
        .filter(|code| code.prefix == prefix && code.date_key == *date_key)
        .map(|code| code.sequence)
        .max()
        .map_or(1, |highest| highest.saturating_add(1))
}
