//! Error taxonomy for set curation.
//!
//! Per-item failures are their own types so callers can degrade them to a
//! skip or an omission at the item boundary. Only [`PoolExhaustedError`] is
//! fatal to a sequencing pass. [`Error`] gathers everything, plus the I/O
//! side of the ingestion and export collaborators.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Mandatory fields of a track profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Id,
    Bpm,
    Key,
    Duration,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Id => "id",
            Self::Bpm => "bpm",
            Self::Key => "key",
            Self::Duration => "duration",
        };
        f.write_str(name)
    }
}

/// An analysis record lacks (or carries an unusable value for) a mandatory field.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("track `{track_id}`: missing mandatory feature `{field}`{}", .detail.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
pub struct MissingFeatureError {
    pub track_id: String,
    pub field: Feature,
    pub detail: Option<String>,
}

impl MissingFeatureError {
    #[must_use]
    pub fn new(track_id: impl Into<String>, field: Feature) -> Self {
        Self { track_id: track_id.into(), field, detail: None }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// The scorer cannot evaluate a pair because one side is malformed.
///
/// `offending` names the track whose profile failed validation so the
/// sequencer can exclude exactly that track.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("cannot score `{from}` -> `{to}`: {cause}")]
pub struct IncompatiblePairError {
    pub from: String,
    pub to: String,
    pub offending: String,
    pub cause: MissingFeatureError,
}

/// Why a pool entry was left out of a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    MissingFeature(MissingFeatureError),
    IncompatiblePair(IncompatiblePairError),
    /// Another pool entry already uses this id; the first one is kept
    DuplicateId { kept_title: String, dropped_title: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFeature(err) => write!(f, "{err}"),
            Self::IncompatiblePair(err) => write!(f, "{err}"),
            Self::DuplicateId { kept_title, dropped_title } => {
                write!(f, "duplicate id, kept `{kept_title}` and dropped `{dropped_title}`")
            }
        }
    }
}

/// Non-fatal: a track excluded from the final plan, with its reason.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequencingSkip {
    pub track_id: String,
    pub reason: SkipReason,
}

impl From<MissingFeatureError> for SequencingSkip {
    fn from(err: MissingFeatureError) -> Self {
        Self { track_id: err.track_id.clone(), reason: SkipReason::MissingFeature(err) }
    }
}

impl fmt::Display for SequencingSkip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "skipped `{}`: {}", self.track_id, self.reason)
    }
}

/// Sequencing found no viable track at all.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("pool exhausted: requested {requested} tracks from a pool of {pool_size}, none viable ({} skipped)", .skipped.len())]
pub struct PoolExhaustedError {
    pub requested: usize,
    pub pool_size: usize,
    pub skipped: Vec<SequencingSkip>,
}

/// A cue would break ordering or duration bounds; the slot is dropped.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("hotcue {slot} at {time:.3}s dropped: {reason}")]
pub struct HotcueBoundsError {
    pub slot: char,
    pub time: f64,
    pub reason: String,
}

/// Advisory only: structure data that conflicts with itself or the track.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhraseAmbiguity {
    pub track_id: String,
    pub detail: String,
}

impl fmt::Display for PhraseAmbiguity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "phrase ambiguity in `{}`: {}", self.track_id, self.detail)
    }
}

/// Everything the library can fail with
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    MissingFeature(#[from] MissingFeatureError),

    #[error(transparent)]
    IncompatiblePair(#[from] IncompatiblePairError),

    #[error(transparent)]
    PoolExhausted(#[from] PoolExhaustedError),

    /// Caller-supplied parameters out of range (bpm <= 0, unknown track id, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
