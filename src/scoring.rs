//! Harmonic compatibility scoring between two track profiles.
//!
//! A score is the weighted sum of three terms plus a capped bonus:
//!
//! ```text
//! total = w_key * key_class(A, B)
//!       + w_tempo * tempo(A, B)
//!       + w_energy * energy(A -> B, flow)
//!       + min(cap, sonic_affinity(A, B))
//! ```
//!
//! Every contribution is reported in the breakdown, so the presence of the
//! sonic-affinity bonus is always visible. Scoring is pure: identical inputs
//! give identical scores and nothing is cached behind the caller's back.

use crate::camelot::KeyRelation;
use crate::error::{Error, IncompatiblePairError, Result};
use crate::profile::TrackProfile;
use log::trace;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Direction requested for the energy term
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnergyFlow {
    /// Only the size of the change matters
    #[default]
    Symmetric,
    /// Rises are rewarded over equal-sized falls
    Rising,
    /// Falls are rewarded over equal-sized rises
    Falling,
}

/// Whether the tempo term compared the raw tempos or a 2:1 ratio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TempoRelation {
    Direct,
    HalfDouble,
}

/// Named dimension of a score breakdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Key,
    Tempo,
    Energy,
    SonicAffinity,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Key => "key",
            Self::Tempo => "tempo",
            Self::Energy => "energy",
            Self::SonicAffinity => "sonic_affinity",
        };
        f.write_str(name)
    }
}

/// Per-dimension weights
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub key: f64,
    pub tempo: f64,
    pub energy: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self { key: 40.0, tempo: 30.0, energy: 30.0 }
    }
}

/// Fraction of the key weight each relationship earns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyClassValues {
    pub identical: f64,
    pub relative: f64,
    pub adjacent: f64,
    pub energy_jump: f64,
    pub distant: f64,
}

impl Default for KeyClassValues {
    fn default() -> Self {
        Self { identical: 1.0, relative: 0.9, adjacent: 0.9, energy_jump: 0.8, distant: 0.0 }
    }
}

impl KeyClassValues {
    #[must_use]
    pub const fn value(&self, relation: KeyRelation) -> f64 {
        match relation {
            KeyRelation::Identical => self.identical,
            KeyRelation::Relative => self.relative,
            KeyRelation::Adjacent => self.adjacent,
            KeyRelation::EnergyJump => self.energy_jump,
            KeyRelation::Distant => self.distant,
        }
    }
}

/// Tempo term shape
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TempoConfig {
    /// BPM delta at which the tempo term halves
    pub half_life_bpm: f64,
    /// How far `2 * slower` may sit from `faster` and still count as half/double time
    pub ratio_tolerance_bpm: f64,
    /// Multiplier applied to half/double matches
    pub half_double_factor: f64,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self { half_life_bpm: 8.0, ratio_tolerance_bpm: 0.5, half_double_factor: 0.95 }
    }
}

/// Energy term shape, energies on a 0-100 scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyConfig {
    /// Absolute difference at which the symmetric term reaches zero
    pub span: f64,
    /// Penalty multiplier for changes in the requested direction
    pub with_flow_factor: f64,
    /// Penalty multiplier for changes against the requested direction
    pub against_flow_factor: f64,
    /// Term value when either side has no energy reading
    pub neutral: f64,
}

impl Default for EnergyConfig {
    fn default() -> Self {
        Self { span: 40.0, with_flow_factor: 0.5, against_flow_factor: 1.5, neutral: 0.5 }
    }
}

/// One descriptor rule of the sonic-affinity bonus
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DescriptorRule {
    pub threshold: f64,
    pub points: f64,
}

const fn rule(threshold: f64, points: f64) -> DescriptorRule {
    DescriptorRule { threshold, points }
}

/// Sonic-affinity bonus rules. Thresholds are maximum absolute differences
/// except `tags` (minimum Jaccard overlap) and `onset_density` (maximum
/// relative difference).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SonicConfig {
    pub cap: f64,
    pub timbre_complexity: DescriptorRule,
    pub spectral_bands: DescriptorRule,
    pub vocal_ratio: DescriptorRule,
    pub tags: DescriptorRule,
    pub swing: DescriptorRule,
    pub busy_score: DescriptorRule,
    pub tonal_balance_mid: DescriptorRule,
    pub onset_density: DescriptorRule,
}

impl Default for SonicConfig {
    fn default() -> Self {
        Self {
            cap: 10.0,
            timbre_complexity: rule(0.15, 3.0),
            spectral_bands: rule(0.1, 3.0),
            vocal_ratio: rule(0.15, 2.0),
            tags: rule(0.34, 2.0),
            swing: rule(0.15, 2.0),
            busy_score: rule(0.15, 1.0),
            tonal_balance_mid: rule(0.1, 1.0),
            onset_density: rule(0.15, 1.0),
        }
    }
}

/// Everything the scorer needs besides the two profiles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringContext {
    pub weights: WeightConfig,
    pub key_classes: KeyClassValues,
    pub tempo: TempoConfig,
    pub energy: EnergyConfig,
    pub sonic: SonicConfig,
    /// Flow used by [`score`]; the sequencer overrides it per position
    pub energy_flow: EnergyFlow,
}

impl ScoringContext {
    #[must_use]
    pub fn with_flow(&self, flow: EnergyFlow) -> Self {
        Self { energy_flow: flow, ..self.clone() }
    }

    /// Reject weights that would break the key-class ordering or produce
    /// non-finite totals.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] describing the first offending value.
    pub fn validate(&self) -> Result<()> {
        let numbers = [
            ("weights.key", self.weights.key),
            ("weights.tempo", self.weights.tempo),
            ("weights.energy", self.weights.energy),
            ("tempo.half_life_bpm", self.tempo.half_life_bpm),
            ("energy.span", self.energy.span),
            ("sonic.cap", self.sonic.cap),
        ];
        if let Some((name, value)) = numbers.iter().find(|(_, v)| !v.is_finite() || *v < 0.0) {
            return Err(Error::Config(format!("{name} must be a non-negative number, got {value}")));
        }
        if self.tempo.half_life_bpm == 0.0 || self.energy.span == 0.0 {
            return Err(Error::Config("tempo.half_life_bpm and energy.span must be positive".into()));
        }
        let k = &self.key_classes;
        let middle = [k.relative, k.adjacent, k.energy_jump];
        if middle.iter().any(|v| *v >= k.identical || *v <= k.distant) {
            return Err(Error::Config(
                "key classes must satisfy identical > relative, adjacent, energy_jump > distant".into(),
            ));
        }
        Ok(())
    }
}

/// Result of scoring `from -> to`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityScore {
    pub from: String,
    pub to: String,
    pub total: f64,
    pub breakdown: BTreeMap<Dimension, f64>,
    pub relationship: KeyRelation,
    pub tempo_relation: TempoRelation,
    /// BPM delta after half/double normalisation
    pub bpm_delta: f64,
    pub flow: EnergyFlow,
    /// Descriptors that earned sonic-affinity points
    pub sonic_matches: Vec<String>,
}

impl CompatibilityScore {
    #[must_use]
    pub fn contribution(&self, dimension: Dimension) -> f64 {
        self.breakdown.get(&dimension).copied().unwrap_or(0.0)
    }
}

/// Score `from -> to` with the context's energy flow.
///
/// # Errors
///
/// Returns [`IncompatiblePairError`] if either profile fails validation.
///
/// # Examples
///
/// ```
/// use setwright::profile::TrackProfile;
/// use setwright::scoring::{score, ScoringContext};
///
/// let a = TrackProfile::new("a", 128.0, "8A".parse().unwrap(), 300.0);
/// let b = TrackProfile::new("b", 128.0, "8B".parse().unwrap(), 300.0);
/// let result = score(&a, &b, &ScoringContext::default()).unwrap();
/// assert_eq!(result.relationship.label(), "relative");
/// ```
pub fn score(
    from: &TrackProfile,
    to: &TrackProfile,
    context: &ScoringContext,
) -> std::result::Result<CompatibilityScore, IncompatiblePairError> {
    score_with_flow(from, to, context.energy_flow, context)
}

/// Score `from -> to` with an explicit energy flow.
///
/// # Errors
///
/// Returns [`IncompatiblePairError`] if either profile fails validation.
pub fn score_with_flow(
    from: &TrackProfile,
    to: &TrackProfile,
    flow: EnergyFlow,
    context: &ScoringContext,
) -> std::result::Result<CompatibilityScore, IncompatiblePairError> {
    for side in [from, to] {
        side.validate().map_err(|cause| IncompatiblePairError {
            from: from.id.clone(),
            to: to.id.clone(),
            offending: side.id.clone(),
            cause,
        })?;
    }

    let relationship = from.key.relation_to(to.key);
    let key = context.weights.key * context.key_classes.value(relationship);
    let (tempo_value, tempo_relation, bpm_delta) = tempo_term(from.bpm, to.bpm, &context.tempo);
    let tempo = context.weights.tempo * tempo_value;
    let energy = context.weights.energy * energy_term(from.energy, to.energy, flow, &context.energy);
    let (bonus, sonic_matches) = sonic_affinity(from, to, &context.sonic);

    let breakdown = BTreeMap::from([
        (Dimension::Key, key),
        (Dimension::Tempo, tempo),
        (Dimension::Energy, energy),
        (Dimension::SonicAffinity, bonus),
    ]);
    let total = key + tempo + energy + bonus;

    trace!(
        "{} -> {}: {total:.2} (key {relationship} {key:.1}, tempo {tempo:.1}, energy {energy:.1}, sonic {bonus:.1})",
        from.id,
        to.id
    );

    Ok(CompatibilityScore {
        from: from.id.clone(),
        to: to.id.clone(),
        total,
        breakdown,
        relationship,
        tempo_relation,
        bpm_delta,
        flow,
        sonic_matches,
    })
}

/// Re-derive a score under a different energy flow. Only the energy term
/// is directional, so the other terms are reused unchanged.
#[must_use]
pub fn apply_flow(
    base: &CompatibilityScore,
    from: &TrackProfile,
    to: &TrackProfile,
    flow: EnergyFlow,
    context: &ScoringContext,
) -> CompatibilityScore {
    if base.flow == flow {
        return base.clone();
    }
    let energy = context.weights.energy * energy_term(from.energy, to.energy, flow, &context.energy);
    let mut rescored = base.clone();
    rescored.total = base.total - base.contribution(Dimension::Energy) + energy;
    rescored.breakdown.insert(Dimension::Energy, energy);
    rescored.flow = flow;
    rescored
}

/// Tempo term in `[0, 1]`, the relation used and the effective delta.
#[must_use]
pub fn tempo_term(a: f64, b: f64, config: &TempoConfig) -> (f64, TempoRelation, f64) {
    let decay = |delta: f64| 0.5_f64.powf(delta / config.half_life_bpm);
    let direct = (a - b).abs();
    let (slower, faster) = if a < b { (a, b) } else { (b, a) };
    let residual = (slower * 2.0 - faster).abs();

    if residual <= config.ratio_tolerance_bpm && residual < direct {
        (config.half_double_factor * decay(residual), TempoRelation::HalfDouble, residual)
    } else {
        (decay(direct), TempoRelation::Direct, direct)
    }
}

/// Energy term in `[0, 1]`.
#[must_use]
pub fn energy_term(from: Option<f64>, to: Option<f64>, flow: EnergyFlow, config: &EnergyConfig) -> f64 {
    let (Some(from), Some(to)) = (from, to) else {
        return config.neutral;
    };
    let delta = to - from;
    let factor = match flow {
        EnergyFlow::Symmetric => 1.0,
        EnergyFlow::Rising if delta >= 0.0 => config.with_flow_factor,
        EnergyFlow::Falling if delta <= 0.0 => config.with_flow_factor,
        EnergyFlow::Rising | EnergyFlow::Falling => config.against_flow_factor,
    };
    (1.0 - delta.abs() * factor / config.span).clamp(0.0, 1.0)
}

/// Capped bonus plus the names of the descriptors that earned it.
#[must_use]
pub fn sonic_affinity(a: &TrackProfile, b: &TrackProfile, config: &SonicConfig) -> (f64, Vec<String>) {
    let close = |x: Option<f64>, y: Option<f64>, rule: &DescriptorRule| match (x, y) {
        (Some(x), Some(y)) => (x - y).abs() <= rule.threshold,
        _ => false,
    };

    let checks = [
        ("timbre_complexity", close(a.timbre_complexity, b.timbre_complexity, &config.timbre_complexity), config.timbre_complexity),
        ("spectral_bands", spectral_close(&a.spectral_bands, &b.spectral_bands, config.spectral_bands.threshold), config.spectral_bands),
        ("vocal_ratio", close(a.vocal_ratio, b.vocal_ratio, &config.vocal_ratio), config.vocal_ratio),
        ("tags", tag_overlap(a, b) >= config.tags.threshold, config.tags),
        ("swing", close(a.swing, b.swing, &config.swing), config.swing),
        ("busy_score", close(a.busy_score, b.busy_score, &config.busy_score), config.busy_score),
        ("tonal_balance_mid", close(a.tonal_balance_mid, b.tonal_balance_mid, &config.tonal_balance_mid), config.tonal_balance_mid),
        ("onset_density", onset_close(a.onset_density, b.onset_density, config.onset_density.threshold), config.onset_density),
    ];

    let mut matches = Vec::new();
    let mut points = 0.0;
    for (name, hit, rule) in checks {
        if hit {
            points += rule.points;
            matches.push(name.to_string());
        }
    }
    (points.min(config.cap), matches)
}

fn spectral_close(a: &[f64], b: &[f64], threshold: f64) -> bool {
    if a.is_empty() || a.len() != b.len() {
        return false;
    }
    #[allow(clippy::cast_precision_loss)]
    let mean = a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum::<f64>() / a.len() as f64;
    mean <= threshold
}

#[allow(clippy::cast_precision_loss)]
fn tag_overlap(a: &TrackProfile, b: &TrackProfile) -> f64 {
    let union = a.tags.union(&b.tags).count();
    if union == 0 {
        return 0.0;
    }
    a.tags.intersection(&b.tags).count() as f64 / union as f64
}

fn onset_close(a: Option<f64>, b: Option<f64>, threshold: f64) -> bool {
    match (a, b) {
        (Some(a), Some(b)) if a > 0.0 && b > 0.0 => (a - b).abs() / a.max(b) <= threshold,
        _ => false,
    }
}

/// Candidate ordering, best first: higher total, then smaller BPM delta,
/// then better key class, then target id.
#[must_use]
pub fn rank_cmp(a: &CompatibilityScore, b: &CompatibilityScore) -> Ordering {
    b.total
        .partial_cmp(&a.total)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.bpm_delta.partial_cmp(&b.bpm_delta).unwrap_or(Ordering::Equal))
        .then_with(|| a.relationship.rank().cmp(&b.relationship.rank()))
        .then_with(|| a.to.cmp(&b.to))
}

/// Score `from` against every candidate and return the successes ranked
/// with [`rank_cmp`]. Failing pairs are dropped.
#[must_use]
pub fn rank_candidates(from: &TrackProfile, candidates: &[TrackProfile], context: &ScoringContext) -> Vec<CompatibilityScore> {
    let mut ranked: Vec<CompatibilityScore> = candidates
        .iter()
        .filter(|candidate| candidate.id != from.id)
        .filter_map(|candidate| score(from, candidate, context).ok())
        .collect();
    ranked.sort_by(rank_cmp);
    ranked
}

/// Anything that can score a directed pair under a given energy flow.
pub trait PairScorer: Sync {
    /// # Errors
    ///
    /// Returns [`IncompatiblePairError`] when the pair cannot be evaluated.
    fn score_pair(
        &self,
        from: &TrackProfile,
        to: &TrackProfile,
        flow: EnergyFlow,
    ) -> std::result::Result<CompatibilityScore, IncompatiblePairError>;
}

impl PairScorer for ScoringContext {
    fn score_pair(
        &self,
        from: &TrackProfile,
        to: &TrackProfile,
        flow: EnergyFlow,
    ) -> std::result::Result<CompatibilityScore, IncompatiblePairError> {
        score_with_flow(from, to, flow, self)
    }
}

/// Distribution of transition scores, for judging a plan at a glance.
pub mod statistics {
    use crate::sequencer::SetPlan;
    use serde::Serialize;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    pub struct ScoreStatistics {
        pub mean: f64,
        pub variance: f64,
        pub std_deviation: f64,
        pub min: f64,
        pub max: f64,
        pub count: usize,
    }

    /// `None` for an empty slice.
    #[must_use]
    pub fn analyze_totals(totals: &[f64]) -> Option<ScoreStatistics> {
        if totals.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = totals.len() as f64;
        let mean = totals.iter().sum::<f64>() / n;
        let variance = totals.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;

        Some(ScoreStatistics {
            mean,
            variance,
            std_deviation: variance.sqrt(),
            min: totals.iter().copied().fold(f64::INFINITY, f64::min),
            max: totals.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            count: totals.len(),
        })
    }

    /// Statistics over the incoming transition of every plan entry after the first.
    #[must_use]
    pub fn analyze_transitions(plan: &SetPlan) -> Option<ScoreStatistics> {
        let totals: Vec<f64> = plan
            .entries
            .iter()
            .filter_map(|entry| entry.incoming.as_ref().map(|score| score.total))
            .collect();
        analyze_totals(&totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camelot::CamelotKey;

    fn key(s: &str) -> CamelotKey {
        s.parse().unwrap()
    }

    fn track(id: &str, bpm: f64, k: &str, energy: f64) -> TrackProfile {
        TrackProfile::new(id, bpm, key(k), 300.0).with_energy(energy)
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let context = ScoringContext::default();
        let a = track("a", 124.0, "4A", 60.0);
        let b = track("b", 126.0, "5A", 70.0);

        let first = score(&a, &b, &context).unwrap();
        let second = score(&a, &b, &context).unwrap();
        assert_eq!(first, second, "Scoring must be deterministic");
    }

    #[test]
    fn test_relative_never_below_energy_jump() {
        let context = ScoringContext::default();
        let base = track("a", 128.0, "9A", 60.0);
        let relative = score(&base, &track("b", 128.0, "9B", 60.0), &context).unwrap();
        let jump = score(&base, &track("c", 128.0, "11A", 60.0), &context).unwrap();

        assert_eq!(relative.relationship, KeyRelation::Relative);
        assert_eq!(jump.relationship, KeyRelation::EnergyJump);
        assert!(relative.total >= jump.total);
        assert!(relative.contribution(Dimension::Key) >= jump.contribution(Dimension::Key));
    }

    #[test]
    fn test_half_double_tempo_beats_unrelated_delta() {
        let config = TempoConfig::default();
        let (ratio_value, ratio_relation, ratio_delta) = tempo_term(128.0, 64.0, &config);
        let (unrelated_value, unrelated_relation, _) = tempo_term(128.0, 64.5, &config);

        assert_eq!(ratio_relation, TempoRelation::HalfDouble);
        assert_eq!(ratio_delta, 0.0);
        assert_eq!(unrelated_relation, TempoRelation::Direct);
        assert!(ratio_value > 0.9, "Half/double should be near the zero-delta value, got {ratio_value}");
        assert!(ratio_value > unrelated_value * 10.0, "Half/double must be materially higher");
    }

    #[test]
    fn test_identical_key_beats_distant_key() {
        let context = ScoringContext::default();
        let a = track("a", 128.0, "1A", 60.0);
        let same = score(&a, &track("b", 128.0, "1A", 60.0), &context).unwrap();
        let far = score(&a, &track("c", 128.0, "7A", 60.0), &context).unwrap();

        assert_eq!(same.relationship, KeyRelation::Identical);
        assert_eq!(same.contribution(Dimension::Key), context.weights.key);
        assert_eq!(far.relationship, KeyRelation::Distant);
        assert_eq!(far.contribution(Dimension::Key), context.weights.key * context.key_classes.distant);
        assert!(same.total > far.total);
    }

    #[test]
    fn test_energy_flow_is_directional() {
        let config = EnergyConfig::default();
        let rise = energy_term(Some(50.0), Some(70.0), EnergyFlow::Rising, &config);
        let fall = energy_term(Some(70.0), Some(50.0), EnergyFlow::Rising, &config);
        let symmetric_up = energy_term(Some(50.0), Some(70.0), EnergyFlow::Symmetric, &config);
        let symmetric_down = energy_term(Some(70.0), Some(50.0), EnergyFlow::Symmetric, &config);

        assert!(rise > fall, "Rising flow should reward the rise");
        assert_eq!(symmetric_up, symmetric_down);
        assert!(energy_term(Some(70.0), Some(50.0), EnergyFlow::Falling, &config) > symmetric_down);
    }

    #[test]
    fn test_missing_energy_is_neutral() {
        let config = EnergyConfig::default();
        assert_eq!(energy_term(None, Some(80.0), EnergyFlow::Rising, &config), config.neutral);
    }

    #[test]
    fn test_degenerate_pair_scores_at_floor_without_error() {
        let context = ScoringContext::default();
        let result = score(&track("a", 174.0, "1A", 0.0), &track("b", 70.0, "7B", 100.0), &context).unwrap();
        assert_eq!(result.contribution(Dimension::Key), 0.0);
        assert_eq!(result.contribution(Dimension::Energy), 0.0);
        assert!(result.total >= 0.0 && result.total < 5.0, "got {}", result.total);
    }

    #[test]
    fn test_sonic_bonus_capped_and_reported() {
        let context = ScoringContext::default();
        let mut a = track("a", 124.0, "8A", 60.0);
        a.timbre_complexity = Some(0.5);
        a.spectral_bands = vec![0.4, 0.35, 0.25];
        a.vocal_ratio = Some(0.1);
        a.swing = Some(0.2);
        a.busy_score = Some(0.6);
        a.tags = ["deep".to_string(), "dub".to_string()].into();
        let b = TrackProfile { id: "b".into(), ..a.clone() };

        let with_bonus = score(&a, &b, &context).unwrap();
        assert_eq!(with_bonus.contribution(Dimension::SonicAffinity), context.sonic.cap);
        assert!(with_bonus.sonic_matches.contains(&"tags".to_string()));

        let plain_a = track("a", 124.0, "8A", 60.0);
        let plain_b = track("b", 124.0, "8A", 60.0);
        let without = score(&plain_a, &plain_b, &context).unwrap();
        assert_eq!(without.contribution(Dimension::SonicAffinity), 0.0);
        assert!(without.breakdown.contains_key(&Dimension::SonicAffinity), "Bonus entry is always reported");
        assert_eq!(with_bonus.total - without.total, context.sonic.cap);
    }

    #[test]
    fn test_invalid_profile_names_offender() {
        let context = ScoringContext::default();
        let good = track("good", 124.0, "8A", 60.0);
        let bad = TrackProfile { bpm: 0.0, ..track("bad", 124.0, "8A", 60.0) };

        let err = score(&good, &bad, &context).unwrap_err();
        assert_eq!(err.offending, "bad");
        assert_eq!(err.from, "good");
    }

    #[test]
    fn test_rank_cmp_tie_breaks() {
        let context = ScoringContext::default();
        let from = track("from", 124.0, "8A", 60.0);
        let candidates = vec![
            track("far-tempo", 127.0, "8A", 60.0),
            track("near-tempo", 125.0, "8A", 60.0),
            track("same", 124.0, "8A", 60.0),
        ];
        let ranked = rank_candidates(&from, &candidates, &context);
        let ids: Vec<_> = ranked.iter().map(|s| s.to.as_str()).collect();
        assert_eq!(ids, vec!["same", "near-tempo", "far-tempo"]);

        // Equal totals: smaller delta wins, then better key class
        let mut x = ranked[0].clone();
        let mut y = ranked[0].clone();
        x.total = 50.0;
        y.total = 50.0;
        x.bpm_delta = 1.0;
        y.bpm_delta = 2.0;
        assert_eq!(rank_cmp(&x, &y), Ordering::Less);
        y.bpm_delta = 1.0;
        y.relationship = KeyRelation::Distant;
        assert_eq!(rank_cmp(&x, &y), Ordering::Less);
    }

    #[test]
    fn test_apply_flow_matches_direct_scoring() {
        let context = ScoringContext::default();
        let a = track("a", 124.0, "8A", 40.0);
        let b = track("b", 124.0, "9A", 70.0);

        let base = score_with_flow(&a, &b, EnergyFlow::Symmetric, &context).unwrap();
        let direct = score_with_flow(&a, &b, EnergyFlow::Rising, &context).unwrap();
        let reflowed = apply_flow(&base, &a, &b, EnergyFlow::Rising, &context);

        assert!((reflowed.total - direct.total).abs() < 1e-9);
        assert_eq!(reflowed.flow, EnergyFlow::Rising);
    }

    #[test]
    fn test_context_validation() {
        assert!(ScoringContext::default().validate().is_ok());

        let mut broken = ScoringContext::default();
        broken.key_classes.relative = 1.2;
        assert!(broken.validate().is_err());

        let mut negative = ScoringContext::default();
        negative.weights.tempo = -1.0;
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_statistics_on_totals() {
        let stats = statistics::analyze_totals(&[60.0, 80.0, 100.0]).unwrap();
        assert_eq!(stats.mean, 80.0);
        assert_eq!(stats.min, 60.0);
        assert_eq!(stats.max, 100.0);
        assert_eq!(stats.count, 3);
        assert!(statistics::analyze_totals(&[]).is_none());
    }
}
