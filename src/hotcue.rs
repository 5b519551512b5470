//! Phrase-aware hotcue generation.
//!
//! Slots follow the mix, in time order:
//!
//! | Slot | Role          | From structure                              | Fallback                     |
//! |------|---------------|---------------------------------------------|------------------------------|
//! | A    | mix in        | first intro boundary                        | first beat                   |
//! | B    | energy in     | first build/verse/chorus/drop after A       | quarter of the track         |
//! | C    | mix out       | first outro late in the track, else breakdown | three quarters of the track |
//! | D    | mix out end   | boundary near C + exit bars                 | C + exit bars                |
//!
//! Slots E-H only come from manual overrides. Every time is snapped to the
//! beat grid, rounded to the millisecond and clamped into `[0, duration)`.
//! A cue that would break the strict slot ordering is dropped and reported,
//! never reordered.

use crate::batch::BatchControl;
use crate::error::{Error, HotcueBoundsError, MissingFeatureError, Result};
use crate::profile::{CueSlot, PhraseKind, PhraseMap, TrackProfile};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Where a cue time came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CueSource {
    Manual,
    StructureDerived,
    HeuristicFallback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotcue {
    /// Seconds from the start of the track
    pub start: f64,
    pub label: String,
    pub source: CueSource,
}

/// Slot -> cue, strictly increasing in slot order, all below the duration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HotcueSet(BTreeMap<CueSlot, Hotcue>);

impl HotcueSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, slot: CueSlot) -> Option<&Hotcue> {
        self.0.get(&slot)
    }

    #[must_use]
    pub fn start(&self, slot: CueSlot) -> Option<f64> {
        self.0.get(&slot).map(|cue| cue.start)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CueSlot, &Hotcue)> {
        self.0.iter().map(|(slot, cue)| (*slot, cue))
    }

    /// Insert keeping every invariant of the set.
    ///
    /// # Errors
    ///
    /// Returns [`HotcueBoundsError`] if the time is outside `[0, duration)`,
    /// the slot is taken, or the time does not sit strictly between its
    /// neighbouring slots.
    pub fn insert_checked(&mut self, slot: CueSlot, cue: Hotcue, duration: f64) -> std::result::Result<(), HotcueBoundsError> {
        let reject = |reason: String| HotcueBoundsError { slot: slot.letter(), time: cue.start, reason };

        if !cue.start.is_finite() || cue.start < 0.0 || cue.start >= duration {
            return Err(reject(format!("outside [0, {duration:.3})")));
        }
        if self.0.contains_key(&slot) {
            return Err(reject("slot already assigned".to_string()));
        }
        for (other_slot, other) in &self.0 {
            let out_of_order = (*other_slot < slot && other.start >= cue.start)
                || (*other_slot > slot && other.start <= cue.start);
            if out_of_order {
                return Err(reject(format!("conflicts with {other_slot} at {:.3}s", other.start)));
            }
        }
        self.0.insert(slot, cue);
        Ok(())
    }

    /// Deterministic JSON rendering, used for write-back and comparisons.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Slotless marker, kept separately from hotcues as DJ libraries do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryCue {
    pub start: f64,
    pub label: String,
}

/// Tunables of the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HotcueConfig {
    /// B without structure, as a fraction of the duration
    pub intro_exit_ratio: f64,
    /// C without structure, as a fraction of the duration
    pub outro_start_ratio: f64,
    /// B from structure must land before this fraction
    pub intro_exit_max_ratio: f64,
    /// An outro boundary only counts for C after this fraction
    pub outro_min_ratio: f64,
    /// A breakdown only counts for C after this fraction
    pub breakdown_min_ratio: f64,
    /// Length of the C-D mix-out window
    pub exit_bars: u32,
    /// Phrase length used when structure exists but a slot has no boundary
    pub phrase_bars: u32,
    pub memory_cues: bool,
    /// Minimum A-B span for the long-mix marker
    pub long_mix_bars: u32,
    /// Maximum vocal ratio for the long-mix marker
    pub long_mix_max_vocal: f64,
    /// Emergency loop sits this many bars before D
    pub emergency_loop_bars: u32,
}

impl Default for HotcueConfig {
    fn default() -> Self {
        Self {
            intro_exit_ratio: 0.25,
            outro_start_ratio: 0.75,
            intro_exit_max_ratio: 0.45,
            outro_min_ratio: 0.35,
            breakdown_min_ratio: 0.6,
            exit_bars: 8,
            phrase_bars: 16,
            memory_cues: true,
            long_mix_bars: 16,
            long_mix_max_vocal: 0.2,
            emergency_loop_bars: 4,
        }
    }
}

/// Generated cues plus everything that did not make it
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HotcueOutcome {
    pub cues: HotcueSet,
    pub memory_cues: Vec<MemoryCue>,
    pub dropped: Vec<HotcueBoundsError>,
}

#[derive(Debug, Clone, Copy)]
struct BeatGrid {
    offset: f64,
    beat: f64,
    duration: f64,
}

impl BeatGrid {
    fn new(bpm: f64, duration: f64, offset: f64) -> Self {
        let beat = 60.0 / bpm;
        // Only the phase of the offset matters
        let offset = offset.rem_euclid(beat);
        Self { offset, beat, duration }
    }

    fn bars(&self, bars: u32) -> f64 {
        f64::from(bars) * 4.0 * self.beat
    }

    fn snap(&self, t: f64) -> f64 {
        self.offset + ((t - self.offset) / self.beat).round() * self.beat
    }

    fn last_beat(&self) -> f64 {
        let steps = ((self.duration - self.offset) / self.beat).ceil() - 1.0;
        self.offset + steps.max(0.0) * self.beat
    }

    /// Snap, clamp into `[0, duration)` and round; `None` if nothing fits.
    fn place(&self, t: f64) -> Option<f64> {
        if !t.is_finite() {
            return None;
        }
        let snapped = self.snap(t);
        let clamped = if snapped < 0.0 {
            self.offset
        } else if snapped >= self.duration {
            self.last_beat()
        } else {
            snapped
        };
        let rounded = round_ms(clamped);
        (rounded >= 0.0 && rounded < self.duration).then_some(rounded)
    }

    /// Manual times are kept as entered apart from clamping.
    fn clamp_manual(&self, t: f64) -> Option<f64> {
        if !t.is_finite() {
            return None;
        }
        let clamped = if t < 0.0 {
            0.0
        } else if t >= self.duration {
            self.last_beat()
        } else {
            t
        };
        let rounded = round_ms(clamped);
        (rounded < self.duration).then_some(rounded)
    }
}

fn round_ms(t: f64) -> f64 {
    (t * 1000.0).round() / 1000.0
}

const fn role_label(slot: CueSlot) -> &'static str {
    match slot {
        CueSlot::A => "Mix in",
        CueSlot::B => "Energy in",
        CueSlot::C => "Mix out",
        CueSlot::D => "Mix out end",
        CueSlot::E => "Cue E",
        CueSlot::F => "Cue F",
        CueSlot::G => "Cue G",
        CueSlot::H => "Cue H",
    }
}

struct Candidate {
    slot: CueSlot,
    time: f64,
    source: CueSource,
}

/// Generate cues for a track given its tempo, length and optional structure
/// and manual overrides. The beat grid starts at zero.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if `bpm` or `duration` is not a positive
/// finite number.
///
/// # Examples
///
/// ```
/// use setwright::hotcue::{generate, HotcueConfig};
/// use setwright::profile::CueSlot;
///
/// let outcome = generate(128.0, 300.0, None, None, &HotcueConfig::default()).unwrap();
/// let a = outcome.cues.start(CueSlot::A).unwrap();
/// let b = outcome.cues.start(CueSlot::B).unwrap();
/// assert!(a < b && b < 300.0);
/// ```
pub fn generate(
    bpm: f64,
    duration: f64,
    phrases: Option<&PhraseMap>,
    overrides: Option<&BTreeMap<CueSlot, f64>>,
    config: &HotcueConfig,
) -> Result<HotcueOutcome> {
    if !(bpm.is_finite() && bpm > 0.0) {
        return Err(Error::InvalidInput(format!("bpm must be positive, got {bpm}")));
    }
    if !(duration.is_finite() && duration > 0.0) {
        return Err(Error::InvalidInput(format!("duration must be positive, got {duration}")));
    }
    let grid = BeatGrid::new(bpm, duration, 0.0);
    Ok(build(&grid, phrases, overrides, None, config))
}

/// Generate cues for a profile, using its grid offset, phrase map, manual
/// cues and vocal ratio.
///
/// # Errors
///
/// Returns [`MissingFeatureError`] if the profile fails validation.
pub fn generate_for(profile: &TrackProfile, config: &HotcueConfig) -> std::result::Result<HotcueOutcome, MissingFeatureError> {
    profile.validate()?;
    let grid = BeatGrid::new(profile.bpm, profile.duration, profile.grid_offset);
    let overrides = (!profile.manual_cues.is_empty()).then_some(&profile.manual_cues);
    let outcome = build(&grid, profile.phrases.as_ref(), overrides, profile.vocal_ratio, config);
    for dropped in &outcome.dropped {
        warn!("{}: {dropped}", profile.id);
    }
    Ok(outcome)
}

fn build(
    grid: &BeatGrid,
    phrases: Option<&PhraseMap>,
    overrides: Option<&BTreeMap<CueSlot, f64>>,
    vocal_ratio: Option<f64>,
    config: &HotcueConfig,
) -> HotcueOutcome {
    let phrases = phrases.filter(|map| !map.is_empty());
    let mut outcome = HotcueOutcome::default();
    let mut candidates: Vec<Candidate> = Vec::new();

    let manual: BTreeMap<CueSlot, f64> = overrides
        .into_iter()
        .flatten()
        .filter_map(|(slot, t)| match grid.clamp_manual(*t) {
            Some(time) => Some((*slot, time)),
            None => {
                outcome.dropped.push(HotcueBoundsError {
                    slot: slot.letter(),
                    time: *t,
                    reason: "manual time is not a usable number".to_string(),
                });
                None
            }
        })
        .collect();
    for (slot, time) in &manual {
        candidates.push(Candidate { slot: *slot, time: *time, source: CueSource::Manual });
    }

    let generated = derive_slots(grid, phrases, &manual, config);
    for candidate in generated {
        if !manual.contains_key(&candidate.slot) {
            candidates.push(candidate);
        }
    }

    // Manual first so a generated slot never displaces a manual one
    for candidate in candidates {
        let cue = Hotcue {
            start: candidate.time,
            label: role_label(candidate.slot).to_string(),
            source: candidate.source,
        };
        if let Err(err) = outcome.cues.insert_checked(candidate.slot, cue, grid.duration) {
            debug!("Dropping cue: {err}");
            outcome.dropped.push(err);
        }
    }

    if config.memory_cues {
        outcome.memory_cues = memory_cues(grid, phrases, &outcome.cues, vocal_ratio, config);
    }
    outcome
}

fn derive_slots(
    grid: &BeatGrid,
    phrases: Option<&PhraseMap>,
    manual: &BTreeMap<CueSlot, f64>,
    config: &HotcueConfig,
) -> Vec<Candidate> {
    let duration = grid.duration;
    let mut out = Vec::with_capacity(4);
    let push = |out: &mut Vec<Candidate>, slot: CueSlot, raw: f64, source: CueSource| -> Option<f64> {
        let time = grid.place(raw)?;
        out.push(Candidate { slot, time, source });
        Some(time)
    };

    let Some(phrases) = phrases else {
        let a = push(&mut out, CueSlot::A, 0.0, CueSource::HeuristicFallback);
        push(&mut out, CueSlot::B, duration * config.intro_exit_ratio, CueSource::HeuristicFallback);
        let c_raw = manual.get(&CueSlot::C).copied().unwrap_or(duration * config.outro_start_ratio);
        push(&mut out, CueSlot::C, c_raw, CueSource::HeuristicFallback);
        let c = manual.get(&CueSlot::C).copied().or_else(|| grid.place(c_raw));
        if let Some(c) = c {
            push(&mut out, CueSlot::D, c + grid.bars(config.exit_bars), CueSource::HeuristicFallback);
        }
        debug!("No phrase structure; heuristic cues from A at {a:?}");
        return out;
    };

    let structural = |t: Option<f64>, fallback: f64| match t {
        Some(t) => (t, CueSource::StructureDerived),
        None => (fallback, CueSource::HeuristicFallback),
    };

    let intro = phrases
        .get(PhraseKind::Intro)
        .first()
        .copied()
        .or_else(|| phrases.all_boundaries().first().copied());
    let (a_raw, a_source) = structural(intro, 0.0);
    push(&mut out, CueSlot::A, a_raw, a_source);
    let a = manual.get(&CueSlot::A).copied().or_else(|| grid.place(a_raw)).unwrap_or(0.0);

    let entry_kinds = [
        PhraseKind::Verse,
        PhraseKind::Buildup,
        PhraseKind::Chorus,
        PhraseKind::Drop,
        PhraseKind::Breakdown,
        PhraseKind::Bridge,
    ];
    let energy = phrases.first_of(&entry_kinds, a, duration * config.intro_exit_max_ratio);
    let (b_raw, b_source) = structural(energy, a + grid.bars(config.phrase_bars));
    push(&mut out, CueSlot::B, b_raw, b_source);

    let outro = phrases
        .first_of(&[PhraseKind::Outro], duration * config.outro_min_ratio, duration)
        .or_else(|| phrases.last_of(&[PhraseKind::Breakdown], duration * config.breakdown_min_ratio, duration));
    let (c_raw, c_source) = structural(outro, duration - grid.bars(config.phrase_bars));
    push(&mut out, CueSlot::C, c_raw, c_source);
    let Some(c) = manual.get(&CueSlot::C).copied().or_else(|| grid.place(c_raw)) else {
        return out;
    };

    let target = c + grid.bars(config.exit_bars);
    let window = (c + grid.bars(config.exit_bars) / 2.0, c + grid.bars(config.exit_bars) * 2.0);
    let nearest = phrases
        .all_boundaries()
        .into_iter()
        .filter(|t| *t > window.0 && *t < window.1)
        .min_by(|x, y| (x - target).abs().total_cmp(&(y - target).abs()));
    let (d_raw, d_source) = structural(nearest, target);
    push(&mut out, CueSlot::D, d_raw, d_source);

    out
}

fn memory_cues(
    grid: &BeatGrid,
    phrases: Option<&PhraseMap>,
    cues: &HotcueSet,
    vocal_ratio: Option<f64>,
    config: &HotcueConfig,
) -> Vec<MemoryCue> {
    let mut out = Vec::new();
    let mut add = |t: f64, label: String| {
        if let Some(start) = grid.place(t) {
            out.push(MemoryCue { start, label });
        }
    };

    if let (Some(a), Some(b), Some(vocals)) = (cues.start(CueSlot::A), cues.start(CueSlot::B), vocal_ratio) {
        let span_bars = (b - a) / grid.bars(1);
        if span_bars >= f64::from(config.long_mix_bars) && vocals <= config.long_mix_max_vocal {
            add(a, format!("Long mix OK ({} bars)", span_bars.floor()));
        }
    }

    if let (Some(phrases), Some(b), Some(c)) = (phrases, cues.start(CueSlot::B), cues.start(CueSlot::C)) {
        if let Some(peak) = phrases.first_of(&[PhraseKind::Drop, PhraseKind::Chorus], b, c) {
            add(peak, "Peak".to_string());
        }
    }

    if let (Some(c), Some(d)) = (cues.start(CueSlot::C), cues.start(CueSlot::D)) {
        let loop_start = d - grid.bars(config.emergency_loop_bars);
        if loop_start > c {
            add(loop_start, "Emergency loop".to_string());
        }
    }

    out.sort_by(|x, y| x.start.total_cmp(&y.start));
    out
}

/// Cues for a whole pool
#[derive(Debug, Clone, Default)]
pub struct BatchHotcues {
    pub cues: BTreeMap<String, HotcueOutcome>,
    pub failures: Vec<MissingFeatureError>,
    pub cancelled: bool,
}

/// Generate cues for every profile in parallel. Tracks are independent;
/// on cancellation the finished tracks are kept.
#[must_use]
pub fn generate_batch(profiles: &[TrackProfile], config: &HotcueConfig, control: &BatchControl) -> BatchHotcues {
    control.begin(profiles.len());
    let results: Vec<Option<(String, std::result::Result<HotcueOutcome, MissingFeatureError>)>> = profiles
        .par_iter()
        .map(|profile| {
            if control.is_cancelled() {
                return None;
            }
            let outcome = generate_for(profile, config);
            control.tick();
            Some((profile.id.clone(), outcome))
        })
        .collect();

    let mut batch = BatchHotcues::default();
    for result in results {
        match result {
            Some((id, Ok(outcome))) => {
                batch.cues.insert(id, outcome);
            }
            Some((_, Err(err))) => batch.failures.push(err),
            None => batch.cancelled = true,
        }
    }
    info!("Generated hotcues for {} tracks ({} failed)", batch.cues.len(), batch.failures.len());
    batch
}
