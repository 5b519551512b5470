//! Camelot key wheel.
//!
//! Keys are held as `(number 1-12, mode A|B)`. Input notation is accepted in
//! three dialects found in analysis caches: Camelot (`8A`), Open Key (`1m`,
//! `1d`) and standard names (`Am`, `F#`, `Bb minor`).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Minor (`A`) or major (`B`) side of the wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Mode {
    A,
    B,
}

impl Mode {
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

/// A position on the Camelot wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CamelotKey {
    number: u8,
    mode: Mode,
}

/// Discrete relationship between two keys, best first.
///
/// Ordering of the variants is the key-class rank used for tie-breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyRelation {
    /// Same number, same letter
    Identical,
    /// Same number, other letter
    Relative,
    /// One step around the wheel, same letter
    Adjacent,
    /// Two steps around the wheel, same letter
    EnergyJump,
    Distant,
}

impl KeyRelation {
    /// Lower is better; used as the second tie-break after bpm delta.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Identical => 0,
            Self::Relative => 1,
            Self::Adjacent => 2,
            Self::EnergyJump => 3,
            Self::Distant => 4,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Identical => "identical",
            Self::Relative => "relative",
            Self::Adjacent => "adjacent",
            Self::EnergyJump => "energy-jump",
            Self::Distant => "distant",
        }
    }
}

impl fmt::Display for KeyRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl CamelotKey {
    /// Returns `None` unless `number` is in 1..=12.
    #[must_use]
    pub const fn new(number: u8, mode: Mode) -> Option<Self> {
        if number >= 1 && number <= 12 {
            Some(Self { number, mode })
        } else {
            None
        }
    }

    #[must_use]
    pub const fn number(self) -> u8 {
        self.number
    }

    #[must_use]
    pub const fn mode(self) -> Mode {
        self.mode
    }

    /// Shortest distance around the wheel between the two numbers (0..=6).
    #[must_use]
    pub const fn wheel_distance(self, other: Self) -> u8 {
        let clockwise = (other.number + 12 - self.number) % 12;
        if clockwise > 6 {
            12 - clockwise
        } else {
            clockwise
        }
    }

    /// Classify `self -> other`. Symmetric: only the energy term of a
    /// compatibility score is directional.
    #[must_use]
    pub const fn relation_to(self, other: Self) -> KeyRelation {
        let steps = self.wheel_distance(other);
        let same_mode = matches!(
            (self.mode, other.mode),
            (Mode::A, Mode::A) | (Mode::B, Mode::B)
        );
        match (steps, same_mode) {
            (0, true) => KeyRelation::Identical,
            (0, false) => KeyRelation::Relative,
            (1, true) => KeyRelation::Adjacent,
            (2, true) => KeyRelation::EnergyJump,
            _ => KeyRelation::Distant,
        }
    }

    /// Parse any supported notation.
    #[must_use]
    pub fn parse_any(raw: &str) -> Option<Self> {
        parse_camelot(raw)
            .or_else(|| parse_open_key(raw))
            .or_else(|| parse_standard(raw))
    }
}

impl fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self.mode {
            Mode::A => 'A',
            Mode::B => 'B',
        };
        write!(f, "{}{}", self.number, letter)
    }
}

/// Error returned when no notation matches
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unrecognised key notation `{0}`")]
pub struct KeyParseError(pub String);

impl FromStr for CamelotKey {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_any(s).ok_or_else(|| KeyParseError(s.to_string()))
    }
}

impl Serialize for CamelotKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CamelotKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

fn parse_camelot(raw: &str) -> Option<CamelotKey> {
    let trimmed = raw.trim().to_ascii_uppercase();
    if trimmed.len() < 2 {
        return None;
    }
    let (number, letter) = trimmed.split_at(trimmed.len() - 1);
    let mode = match letter {
        "A" => Mode::A,
        "B" => Mode::B,
        _ => return None,
    };
    CamelotKey::new(number.parse().ok()?, mode)
}

/// Open Key puts C major at `1d`; Camelot puts it at `8B`.
fn parse_open_key(raw: &str) -> Option<CamelotKey> {
    let trimmed = raw.trim().to_ascii_lowercase();
    if trimmed.len() < 2 {
        return None;
    }
    let (number, letter) = trimmed.split_at(trimmed.len() - 1);
    let mode = match letter {
        "m" => Mode::A,
        "d" => Mode::B,
        _ => return None,
    };
    let open: u8 = number.parse().ok()?;
    if !(1..=12).contains(&open) {
        return None;
    }
    CamelotKey::new((open + 6) % 12 + 1, mode)
}

fn parse_standard(raw: &str) -> Option<CamelotKey> {
    let normalized = raw.trim().replace('\u{266F}', "#").replace('\u{266D}', "b");
    let lower = normalized.to_ascii_lowercase();
    let (root, minor) = ["minor", "min", "m"]
        .iter()
        .find_map(|suffix| {
            lower
                .strip_suffix(suffix)
                .filter(|rest| !rest.is_empty())
                .map(|rest| (rest.trim().to_string(), true))
        })
        .or_else(|| {
            ["major", "maj"].iter().find_map(|suffix| {
                lower
                    .strip_suffix(suffix)
                    .filter(|rest| !rest.is_empty())
                    .map(|rest| (rest.trim().to_string(), false))
            })
        })
        .unwrap_or_else(|| (lower.clone(), false));

    // Pitch class with C = 0
    let pitch = match root.as_str() {
        "c" | "b#" => 0,
        "c#" | "db" => 1,
        "d" => 2,
        "d#" | "eb" => 3,
        "e" | "fb" => 4,
        "f" | "e#" => 5,
        "f#" | "gb" => 6,
        "g" => 7,
        "g#" | "ab" => 8,
        "a" => 9,
        "a#" | "bb" => 10,
        "b" | "cb" => 11,
        _ => return None,
    };

    // Each fifth up is one step clockwise. C major = 8B, A minor = 8A.
    let (anchor, mode) = if minor { (9, Mode::A) } else { (0, Mode::B) };
    let fifths = ((pitch + 12 - anchor) * 7) % 12;
    CamelotKey::new(((7 + fifths) % 12 + 1) as u8, mode)
}
