//! Canonical track profile and the phrase/cue vocabulary shared by every stage.

use crate::camelot::CamelotKey;
use crate::error::{Feature, MissingFeatureError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Structural section of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhraseKind {
    Intro,
    Verse,
    Buildup,
    Chorus,
    Drop,
    Breakdown,
    Bridge,
    Outro,
}

impl PhraseKind {
    /// Accepts the names used by the analysers and DJ libraries we ingest from.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        let kind = match label.trim().to_ascii_lowercase().as_str() {
            "intro" | "start" => Self::Intro,
            "verse" => Self::Verse,
            "up" | "buildup" | "build-up" | "build_up" | "build" | "rise" => Self::Buildup,
            "chorus" | "hook" => Self::Chorus,
            "drop" | "peak" => Self::Drop,
            "down" | "breakdown" | "break" => Self::Breakdown,
            "bridge" => Self::Bridge,
            "outro" | "fade" | "fadeout" | "end" => Self::Outro,
            _ => return None,
        };
        Some(kind)
    }
}

/// Phrase kind -> ascending boundary times in seconds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhraseMap(BTreeMap<PhraseKind, Vec<f64>>);

impl PhraseMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a boundary keeping each list sorted and free of duplicates.
    pub fn insert(&mut self, kind: PhraseKind, time: f64) {
        let times = self.0.entry(kind).or_default();
        if let Err(pos) = times.binary_search_by(|t| t.total_cmp(&time)) {
            times.insert(pos, time);
        }
    }

    #[must_use]
    pub fn get(&self, kind: PhraseKind) -> &[f64] {
        self.0.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    /// Every boundary regardless of kind, ascending and deduplicated.
    #[must_use]
    pub fn all_boundaries(&self) -> Vec<f64> {
        let mut all: Vec<f64> = self.0.values().flatten().copied().collect();
        all.sort_by(f64::total_cmp);
        all.dedup();
        all
    }

    /// First boundary of any of `kinds` inside `(after, before)`.
    #[must_use]
    pub fn first_of(&self, kinds: &[PhraseKind], after: f64, before: f64) -> Option<f64> {
        kinds
            .iter()
            .flat_map(|kind| self.get(*kind))
            .copied()
            .filter(|&t| t > after && t < before)
            .min_by(f64::total_cmp)
    }

    /// Last boundary of any of `kinds` inside `(after, before)`.
    #[must_use]
    pub fn last_of(&self, kinds: &[PhraseKind], after: f64, before: f64) -> Option<f64> {
        kinds
            .iter()
            .flat_map(|kind| self.get(*kind))
            .copied()
            .filter(|&t| t > after && t < before)
            .max_by(f64::total_cmp)
    }

    pub fn iter(&self) -> impl Iterator<Item = (PhraseKind, &[f64])> {
        self.0.iter().map(|(kind, times)| (*kind, times.as_slice()))
    }
}

impl FromIterator<(PhraseKind, f64)> for PhraseMap {
    fn from_iter<I: IntoIterator<Item = (PhraseKind, f64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (kind, time) in iter {
            map.insert(kind, time);
        }
        map
    }
}

/// Hotcue slots of the 8-pad model, in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CueSlot {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

impl CueSlot {
    pub const ALL: [Self; 8] = [Self::A, Self::B, Self::C, Self::D, Self::E, Self::F, Self::G, Self::H];

    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
            Self::E => 'E',
            Self::F => 'F',
            Self::G => 'G',
            Self::H => 'H',
        }
    }

    #[must_use]
    pub fn from_letter(letter: char) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|slot| slot.letter() == letter.to_ascii_uppercase())
    }
}

impl fmt::Display for CueSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Canonical, validated track description. Built once by the ingestion
/// adapter and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackProfile {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub bpm: f64,
    pub key: CamelotKey,
    /// 0-100; `None` scores as neutral
    pub energy: Option<f64>,
    /// Seconds
    pub duration: f64,
    pub onset_density: Option<f64>,
    pub vocal_ratio: Option<f64>,
    pub busy_score: Option<f64>,
    #[serde(default)]
    pub spectral_bands: Vec<f64>,
    pub swing: Option<f64>,
    pub tonal_balance_mid: Option<f64>,
    pub timbre_complexity: Option<f64>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    pub phrases: Option<PhraseMap>,
    pub path: Option<String>,
    pub mix_in_estimate: Option<f64>,
    pub mix_out_estimate: Option<f64>,
    #[serde(default)]
    pub manual_cues: BTreeMap<CueSlot, f64>,
    pub exit_bars: Option<u32>,
    /// Time of the first beat; the grid is `grid_offset + n * 60 / bpm`
    #[serde(default)]
    pub grid_offset: f64,
}

impl TrackProfile {
    /// Minimal profile with every optional descriptor absent.
    #[must_use]
    pub fn new(id: impl Into<String>, bpm: f64, key: CamelotKey, duration: f64) -> Self {
        let id = id.into();
        Self {
            title: id.clone(),
            id,
            artist: String::new(),
            bpm,
            key,
            energy: None,
            duration,
            onset_density: None,
            vocal_ratio: None,
            busy_score: None,
            spectral_bands: Vec::new(),
            swing: None,
            tonal_balance_mid: None,
            timbre_complexity: None,
            tags: BTreeSet::new(),
            phrases: None,
            path: None,
            mix_in_estimate: None,
            mix_out_estimate: None,
            manual_cues: BTreeMap::new(),
            exit_bars: None,
            grid_offset: 0.0,
        }
    }

    #[must_use]
    pub fn with_artist(mut self, artist: impl Into<String>) -> Self {
        self.artist = artist.into();
        self
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub fn with_energy(mut self, energy: f64) -> Self {
        self.energy = Some(energy);
        self
    }

    #[must_use]
    pub fn with_phrases(mut self, phrases: PhraseMap) -> Self {
        self.phrases = Some(phrases);
        self
    }

    /// Seconds per beat
    #[must_use]
    pub fn beat_seconds(&self) -> f64 {
        60.0 / self.bpm
    }

    /// Re-check the mandatory invariants. Profiles normally come from the
    /// ingestion adapter, but nothing stops a caller from building one by hand.
    ///
    /// # Errors
    ///
    /// Returns the first mandatory field that is empty, non-finite or not positive.
    pub fn validate(&self) -> Result<(), MissingFeatureError> {
        if self.id.trim().is_empty() {
            return Err(MissingFeatureError::new(self.id.clone(), Feature::Id));
        }
        if !(self.bpm.is_finite() && self.bpm > 0.0) {
            return Err(MissingFeatureError::new(self.id.clone(), Feature::Bpm)
                .with_detail(format!("bpm {} is not a positive number", self.bpm)));
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(MissingFeatureError::new(self.id.clone(), Feature::Duration)
                .with_detail(format!("duration {} is not a positive number", self.duration)));
        }
        Ok(())
    }

    /// Artist comparison key for the no-repeat constraint
    #[must_use]
    pub fn artist_key(&self) -> Option<String> {
        let normalized = self.artist.trim().to_lowercase();
        (!normalized.is_empty()).then_some(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(s: &str) -> CamelotKey {
        s.parse().unwrap()
    }

    #[test]
    fn test_phrase_map_sorted_and_deduplicated() {
        let map: PhraseMap = [
            (PhraseKind::Chorus, 60.0),
            (PhraseKind::Chorus, 30.0),
            (PhraseKind::Chorus, 60.0),
            (PhraseKind::Intro, 0.0),
        ]
        .into_iter()
        .collect();

        assert_eq!(map.get(PhraseKind::Chorus), &[30.0, 60.0]);
        assert_eq!(map.all_boundaries(), vec![0.0, 30.0, 60.0]);
        assert!(map.get(PhraseKind::Outro).is_empty());
    }

    #[test]
    fn test_phrase_window_queries() {
        let map: PhraseMap = [
            (PhraseKind::Breakdown, 100.0),
            (PhraseKind::Breakdown, 200.0),
            (PhraseKind::Outro, 250.0),
        ]
        .into_iter()
        .collect();

        assert_eq!(map.first_of(&[PhraseKind::Breakdown, PhraseKind::Outro], 150.0, 300.0), Some(200.0));
        assert_eq!(map.last_of(&[PhraseKind::Breakdown], 0.0, 300.0), Some(200.0));
        assert_eq!(map.first_of(&[PhraseKind::Drop], 0.0, 300.0), None);
    }

    #[test]
    fn test_phrase_labels() {
        assert_eq!(PhraseKind::from_label("Up"), Some(PhraseKind::Buildup));
        assert_eq!(PhraseKind::from_label("down"), Some(PhraseKind::Breakdown));
        assert_eq!(PhraseKind::from_label("FADE"), Some(PhraseKind::Outro));
        assert_eq!(PhraseKind::from_label("solo"), None);
    }

    #[test]
    fn test_validate_catches_bad_mandatory_fields() {
        let good = TrackProfile::new("t", 128.0, key("8A"), 300.0);
        assert!(good.validate().is_ok());

        let bad_bpm = TrackProfile { bpm: f64::NAN, ..good.clone() };
        assert_eq!(bad_bpm.validate().unwrap_err().field, Feature::Bpm);

        let bad_duration = TrackProfile { duration: 0.0, ..good.clone() };
        assert_eq!(bad_duration.validate().unwrap_err().field, Feature::Duration);

        let no_id = TrackProfile { id: " ".into(), ..good };
        assert_eq!(no_id.validate().unwrap_err().field, Feature::Id);
    }

    #[test]
    fn test_cue_slot_letters() {
        assert_eq!(CueSlot::from_letter('c'), Some(CueSlot::C));
        assert_eq!(CueSlot::from_letter('Z'), None);
        assert!(CueSlot::A < CueSlot::H);
    }

    #[test]
    fn test_artist_key_normalizes() {
        let profile = TrackProfile::new("t", 120.0, key("1A"), 200.0).with_artist("  Floating Points ");
        assert_eq!(profile.artist_key().as_deref(), Some("floating points"));
        let anonymous = TrackProfile::new("u", 120.0, key("1A"), 200.0);
        assert_eq!(anonymous.artist_key(), None);
    }
}
