//! Transition advice for a pair of consecutive tracks.
//!
//! Three independent rules, any subset of which may fire:
//!
//! - **timing**: how long before A's exit point B should start, from A's exit
//!   span converted to seconds with A's tempo
//! - **anchor fallback**: B has no manual entry cue but an external mix-in
//!   estimate, so the entry is anchored to the estimate
//! - **phrase warning**: B's manual entry cue sits more than the tolerance
//!   away from its nearest phrase boundary
//!
//! Missing data suppresses a rule. Advice never fails.

use crate::hotcue::{CueSource, HotcueSet};
use crate::profile::{CueSlot, TrackProfile};
use crate::sequencer::{PlanEntry, SetPlan};
use log::debug;
use serde::{Deserialize, Serialize};

/// Exit span of the outgoing track
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitSpec {
    /// Takes precedence over the span length
    pub exit_bars: Option<u32>,
    pub span: Option<(CueSlot, CueSlot)>,
}

impl Default for ExitSpec {
    fn default() -> Self {
        Self { exit_bars: None, span: Some((CueSlot::C, CueSlot::D)) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvisorConfig {
    /// Slot holding the incoming track's entry cue
    pub entry_slot: CueSlot,
    pub phrase_tolerance_beats: f64,
    /// Overrides every track's own exit bars when set
    pub exit_bars: Option<u32>,
    pub exit_span: (CueSlot, CueSlot),
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            entry_slot: CueSlot::A,
            phrase_tolerance_beats: 0.5,
            exit_bars: None,
            exit_span: (CueSlot::C, CueSlot::D),
        }
    }
}

impl AdvisorConfig {
    /// Exit spec for an outgoing track under this configuration
    #[must_use]
    pub fn exit_spec_for(&self, track: &TrackProfile) -> ExitSpec {
        ExitSpec { exit_bars: self.exit_bars.or(track.exit_bars), span: Some(self.exit_span) }
    }
}

/// One piece of advice with the numbers behind it
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "category", rename_all = "kebab-case")]
pub enum Advice {
    Timing {
        bars: f64,
        window_seconds: f64,
        exit_point: f64,
        /// Where in A's timeline B should start
        start_at: f64,
    },
    AnchorFallback {
        anchored_at: f64,
        source: String,
    },
    PhraseWarning {
        manual_cue: f64,
        nearest_boundary: f64,
        deviation_beats: f64,
    },
}

impl Advice {
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self {
            Self::Timing { .. } => "timing",
            Self::AnchorFallback { .. } => "anchor-fallback",
            Self::PhraseWarning { .. } => "phrase-warning",
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Timing { bars, window_seconds, exit_point, start_at } => format!(
                "Start the next track at {start_at:.2}s, {window_seconds:.2}s ({bars:.0} bars) before the exit at {exit_point:.2}s"
            ),
            Self::AnchorFallback { anchored_at, source } => {
                format!("No manual entry cue; anchored entry to {anchored_at:.2}s from the {source}")
            }
            Self::PhraseWarning { manual_cue, nearest_boundary, deviation_beats } => format!(
                "Manual entry cue at {manual_cue:.2}s is {deviation_beats:.1} beats off the phrase boundary at {nearest_boundary:.2}s"
            ),
        }
    }
}

/// Advice for every transition of a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransitionAdvice {
    pub from: String,
    pub to: String,
    pub advice: Vec<Advice>,
}

/// Advice for the transition `a -> b`.
#[must_use]
pub fn advise(
    a: &TrackProfile,
    hotcues_a: &HotcueSet,
    exit: &ExitSpec,
    b: &TrackProfile,
    hotcues_b: &HotcueSet,
    config: &AdvisorConfig,
) -> Vec<Advice> {
    let mut advice = Vec::new();

    if let Some(timing) = timing(a, hotcues_a, exit) {
        advice.push(timing);
    }

    let manual_entry = hotcues_b
        .get(config.entry_slot)
        .filter(|cue| cue.source == CueSource::Manual)
        .map(|cue| cue.start)
        .or_else(|| b.manual_cues.get(&config.entry_slot).copied())
        .filter(|t| t.is_finite());

    match (manual_entry, b.mix_in_estimate) {
        (None, Some(estimate)) if estimate.is_finite() => advice.push(Advice::AnchorFallback {
            anchored_at: estimate,
            source: "mix-in estimate".to_string(),
        }),
        _ => {}
    }

    if let Some(cue) = manual_entry {
        if let Some(warning) = phrase_warning(b, cue, config.phrase_tolerance_beats) {
            advice.push(warning);
        }
    }

    debug!("{} -> {}: {} advice entries", a.id, b.id, advice.len());
    advice
}

fn timing(a: &TrackProfile, hotcues: &HotcueSet, exit: &ExitSpec) -> Option<Advice> {
    if !(a.bpm.is_finite() && a.bpm > 0.0) {
        return None;
    }
    let bar = 4.0 * 60.0 / a.bpm;
    let (start, end) = exit
        .span
        .map_or((None, None), |(from, to)| (hotcues.start(from), hotcues.start(to)));

    let bars = match (exit.exit_bars, start, end) {
        (Some(bars), _, _) => f64::from(bars),
        (None, Some(s), Some(e)) if e > s => (e - s) / bar,
        _ => return None,
    };
    let window_seconds = bars * bar;
    let exit_point = end.or_else(|| start.map(|s| s + window_seconds))?;

    Some(Advice::Timing { bars, window_seconds, exit_point, start_at: (exit_point - window_seconds).max(0.0) })
}

fn phrase_warning(b: &TrackProfile, cue: f64, tolerance_beats: f64) -> Option<Advice> {
    if !(b.bpm.is_finite() && b.bpm > 0.0) {
        return None;
    }
    let boundaries = b.phrases.as_ref()?.all_boundaries();
    // Ascending order, so the first of two equidistant boundaries wins
    let nearest = boundaries
        .into_iter()
        .reduce(|best, t| if (t - cue).abs() < (best - cue).abs() { t } else { best })?;
    let deviation_beats = (cue - nearest).abs() / b.beat_seconds();

    (deviation_beats > tolerance_beats).then_some(Advice::PhraseWarning {
        manual_cue: cue,
        nearest_boundary: nearest,
        deviation_beats,
    })
}

/// Advice between two plan entries, using their generated hotcues.
#[must_use]
pub fn advise_entries(a: &PlanEntry, b: &PlanEntry, config: &AdvisorConfig) -> Vec<Advice> {
    let exit = config.exit_spec_for(&a.profile);
    advise(&a.profile, &a.hotcues, &exit, &b.profile, &b.hotcues, config)
}

/// Advice for each consecutive pair of a plan, in order.
#[must_use]
pub fn advise_plan(plan: &SetPlan, config: &AdvisorConfig) -> Vec<TransitionAdvice> {
    plan.entries
        .windows(2)
        .map(|pair| TransitionAdvice {
            from: pair[0].profile.id.clone(),
            to: pair[1].profile.id.clone(),
            advice: advise_entries(&pair[0], &pair[1], config),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotcue::Hotcue;
    use crate::profile::{PhraseKind, PhraseMap};

    fn track(id: &str) -> TrackProfile {
        TrackProfile::new(id, 128.0, "8A".parse().unwrap(), 300.0)
    }

    fn cues(entries: &[(CueSlot, f64, CueSource)]) -> HotcueSet {
        let mut set = HotcueSet::new();
        for (slot, start, source) in entries {
            set.insert_checked(*slot, Hotcue { start: *start, label: String::new(), source: *source }, 300.0)
                .unwrap();
        }
        set
    }

    #[test]
    fn test_timing_and_anchor_fallback() {
        let a = track("a");
        let hotcues_a = cues(&[
            (CueSlot::C, 100.0, CueSource::StructureDerived),
            (CueSlot::D, 130.0, CueSource::HeuristicFallback),
        ]);
        let b = TrackProfile { mix_in_estimate: Some(5.0), ..track("b") };
        let exit = ExitSpec { exit_bars: Some(16), ..ExitSpec::default() };

        let advice = advise(&a, &hotcues_a, &exit, &b, &HotcueSet::new(), &AdvisorConfig::default());

        assert_eq!(advice.len(), 2, "{advice:?}");
        match &advice[0] {
            Advice::Timing { bars, window_seconds, exit_point, start_at } => {
                assert_eq!(*bars, 16.0);
                assert!((window_seconds - 30.0).abs() < 1e-9);
                assert_eq!(*exit_point, 130.0);
                assert!((start_at - 100.0).abs() < 1e-9);
            }
            other => panic!("Expected timing, got {other:?}"),
        }
        assert_eq!(advice[1], Advice::AnchorFallback { anchored_at: 5.0, source: "mix-in estimate".into() });
    }

    #[test]
    fn test_phrase_warning_cites_nearest_boundary() {
        let phrases: PhraseMap =
            [(PhraseKind::Intro, 0.0), (PhraseKind::Verse, 15.0), (PhraseKind::Chorus, 30.0)].into_iter().collect();
        let mut b = track("b").with_phrases(phrases);
        b.manual_cues.insert(CueSlot::A, 7.5);
        let hotcues_b = cues(&[(CueSlot::A, 7.5, CueSource::Manual)]);

        let advice = advise(&track("a"), &HotcueSet::new(), &ExitSpec::default(), &b, &hotcues_b, &AdvisorConfig::default());

        assert_eq!(advice.len(), 1, "{advice:?}");
        match &advice[0] {
            Advice::PhraseWarning { manual_cue, nearest_boundary, deviation_beats } => {
                assert_eq!(*manual_cue, 7.5);
                assert_eq!(*nearest_boundary, 0.0, "Ties go to the earlier boundary");
                assert!((deviation_beats - 16.0).abs() < 1e-9);
            }
            other => panic!("Expected phrase warning, got {other:?}"),
        }
    }

    #[test]
    fn test_aligned_manual_cue_is_quiet() {
        let phrases: PhraseMap = [(PhraseKind::Intro, 0.0), (PhraseKind::Verse, 15.0)].into_iter().collect();
        let mut b = track("b").with_phrases(phrases);
        // 0.4 beats late at 128 BPM
        b.manual_cues.insert(CueSlot::A, 15.1875);

        let advice = advise(&track("a"), &HotcueSet::new(), &ExitSpec::default(), &b, &HotcueSet::new(), &AdvisorConfig::default());
        assert!(advice.is_empty(), "{advice:?}");
    }

    #[test]
    fn test_missing_data_gives_empty_advice() {
        let broken = TrackProfile { bpm: f64::NAN, ..track("a") };
        let advice = advise(&broken, &HotcueSet::new(), &ExitSpec::default(), &track("b"), &HotcueSet::new(), &AdvisorConfig::default());
        assert!(advice.is_empty());
    }

    #[test]
    fn test_span_length_used_without_exit_bars() {
        let hotcues_a = cues(&[
            (CueSlot::C, 100.0, CueSource::StructureDerived),
            (CueSlot::D, 115.0, CueSource::StructureDerived),
        ]);
        let advice = advise(&track("a"), &hotcues_a, &ExitSpec::default(), &track("b"), &HotcueSet::new(), &AdvisorConfig::default());

        assert_eq!(advice.len(), 1);
        assert_eq!(advice[0].category(), "timing");
        assert!(advice[0].message().contains("8 bars"), "{}", advice[0].message());
    }

    #[test]
    fn test_manual_entry_suppresses_anchor_fallback() {
        let mut b = TrackProfile { mix_in_estimate: Some(5.0), ..track("b") };
        b.manual_cues.insert(CueSlot::A, 0.0);
        let advice = advise(&track("a"), &HotcueSet::new(), &ExitSpec::default(), &b, &HotcueSet::new(), &AdvisorConfig::default());
        assert!(advice.iter().all(|a| a.category() != "anchor-fallback"));
    }
}
