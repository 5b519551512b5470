//! Set sequencing: nearest-neighbour chain construction over a pool.
//!
//! Starting from a seed, the chain is extended one track at a time with the
//! remaining track that scores best against the current tail. Soft
//! constraints narrow the candidates first; a constraint that would leave
//! nothing is relaxed for that step only, and the relaxation is recorded.
//!
//! Failures are per track. A profile that fails validation, or a pair the
//! scorer cannot evaluate, becomes a [`SequencingSkip`] and the pass goes on.
//! Only a pool with nothing viable in it is an error.

use crate::batch::BatchControl;
use crate::camelot::KeyRelation;
use crate::error::{Error, PoolExhaustedError, Result, SequencingSkip, SkipReason};
use crate::hotcue::{self, HotcueConfig, HotcueSet};
use crate::ingest::{self, FeatureSource};
use crate::profile::{CueSlot, TrackProfile};
use crate::scoring::{rank_cmp, CompatibilityScore, EnergyFlow, PairScorer};
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Shape of the energy curve across the set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnergyArc {
    /// Warm-up, build, peak, sustain, cool-down
    #[default]
    Classic,
    Ascending,
    Flat,
    PeakOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Trend {
    Rising,
    Plateau,
    Falling,
}

impl Trend {
    /// Energy flow handed to the scorer for a step in this trend
    #[must_use]
    pub const fn flow(self) -> EnergyFlow {
        match self {
            Self::Rising => EnergyFlow::Rising,
            Self::Plateau => EnergyFlow::Symmetric,
            Self::Falling => EnergyFlow::Falling,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseName {
    Warmup,
    Build,
    Peak,
    Sustain,
    Cooldown,
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Warmup => "warm-up",
            Self::Build => "build",
            Self::Peak => "peak",
            Self::Sustain => "sustain",
            Self::Cooldown => "cool-down",
        };
        f.write_str(name)
    }
}

/// Where a position sits on the arc
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyPhase {
    pub name: PhaseName,
    /// Target energy band, inclusive
    pub band: (f64, f64),
    pub trend: Trend,
}

impl EnergyPhase {
    const fn new(name: PhaseName, low: f64, high: f64, trend: Trend) -> Self {
        Self { name, band: (low, high), trend }
    }

    #[must_use]
    pub fn centre(&self) -> f64 {
        (self.band.0 + self.band.1) / 2.0
    }
}

impl EnergyArc {
    /// Phase at `progress` in `(0, 1]`.
    #[must_use]
    pub fn phase_at(self, progress: f64) -> EnergyPhase {
        use PhaseName::{Build, Cooldown, Peak, Sustain, Warmup};
        use Trend::{Falling, Plateau, Rising};

        match self {
            Self::Classic => match progress {
                p if p <= 0.2 => EnergyPhase::new(Warmup, 30.0, 55.0, Rising),
                p if p <= 0.4 => EnergyPhase::new(Build, 50.0, 70.0, Rising),
                p if p <= 0.75 => EnergyPhase::new(Peak, 65.0, 85.0, Plateau),
                p if p <= 0.9 => EnergyPhase::new(Sustain, 70.0, 90.0, Plateau),
                _ => EnergyPhase::new(Cooldown, 45.0, 70.0, Falling),
            },
            Self::Ascending => match progress {
                p if p <= 0.33 => EnergyPhase::new(Warmup, 30.0, 55.0, Rising),
                p if p <= 0.66 => EnergyPhase::new(Build, 50.0, 75.0, Rising),
                _ => EnergyPhase::new(Peak, 70.0, 95.0, Rising),
            },
            Self::Flat => EnergyPhase::new(Sustain, 40.0, 80.0, Plateau),
            Self::PeakOnly => EnergyPhase::new(Peak, 70.0, 100.0, Plateau),
        }
    }

    /// Phase of the 0-based `position` in a set of `target` tracks.
    #[must_use]
    pub fn phase_for(self, position: usize, target: usize) -> EnergyPhase {
        #[allow(clippy::cast_precision_loss)]
        let progress = (position + 1) as f64 / target.max(1) as f64;
        self.phase_at(progress)
    }
}

/// Soft constraints, in the order they are applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Constraint {
    /// Tempo step between neighbours, always applied
    BpmStep,
    KeyContinuity,
    NoRepeatedArtist,
    EnergyTrend,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BpmStep => "maximum BPM step",
            Self::KeyContinuity => "strict key continuity",
            Self::NoRepeatedArtist => "no repeated artist",
            Self::EnergyTrend => "energy trend",
        };
        f.write_str(name)
    }
}

/// A constraint dropped for one step because it left no candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Relaxation {
    pub position: usize,
    pub constraint: Constraint,
}

/// How to build the set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceMode {
    pub strict_key_continuity: bool,
    /// Worst key relation accepted under strict continuity
    pub strict_min_relation: KeyRelation,
    pub strict_max_bpm_delta: f64,
    /// Largest tempo step between neighbours in any mode. Half/double-time
    /// pairs are measured on their effective delta.
    pub max_bpm_step: f64,
    /// Wider step tried before the limit is dropped for a position
    pub bpm_step_fallback: f64,
    pub avoid_repeated_artist: bool,
    pub energy_arc: EnergyArc,
    /// Energy change still counted as a plateau
    pub plateau_tolerance: f64,
    /// Number of seeds tried in parallel
    pub seed_candidates: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forced_seed: Option<String>,
}

impl Default for SequenceMode {
    fn default() -> Self {
        Self {
            strict_key_continuity: false,
            strict_min_relation: KeyRelation::EnergyJump,
            strict_max_bpm_delta: 8.0,
            max_bpm_step: 12.0,
            bpm_step_fallback: 15.0,
            avoid_repeated_artist: true,
            energy_arc: EnergyArc::Classic,
            plateau_tolerance: 10.0,
            seed_candidates: 3,
            forced_seed: None,
        }
    }
}

/// One track of the plan with its mix points
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanEntry {
    pub profile: TrackProfile,
    pub position: usize,
    pub phase: EnergyPhase,
    /// Seconds into the track where it is brought in
    pub mix_in: f64,
    /// Seconds into the track where the next one starts taking over
    pub mix_out: f64,
    pub hotcues: HotcueSet,
    /// Score of the transition from the previous entry
    pub incoming: Option<CompatibilityScore>,
}

/// Result of sequencing
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SetPlan {
    pub entries: Vec<PlanEntry>,
    pub skipped: Vec<SequencingSkip>,
    pub relaxations: Vec<Relaxation>,
    /// Viable tracks that did not make it into the plan
    pub unused: Vec<String>,
    pub requested: usize,
    pub cancelled: bool,
}

impl SetPlan {
    /// Tracks missing from the requested length
    #[must_use]
    pub fn shortfall(&self) -> usize {
        self.requested.saturating_sub(self.entries.len())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.profile.id.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// How a large pool is cut into consecutive sets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetSplit {
    pub per_set: usize,
    pub min_per_set: usize,
    pub max_per_set: usize,
}

impl Default for SetSplit {
    fn default() -> Self {
        Self { per_set: 40, min_per_set: 35, max_per_set: 45 }
    }
}

impl SetSplit {
    /// Sets of about `per_set` tracks, allowed to vary by an eighth either way.
    #[must_use]
    pub fn around(per_set: usize) -> Self {
        let per_set = per_set.max(1);
        let slack = per_set / 8;
        Self { per_set, min_per_set: (per_set - slack).max(1), max_per_set: per_set + slack }
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] unless `1 <= min_per_set <= per_set <= max_per_set`.
    pub fn validate(&self) -> Result<()> {
        if self.min_per_set == 0 || self.min_per_set > self.per_set || self.per_set > self.max_per_set {
            return Err(Error::Config(format!(
                "set split needs 1 <= min_per_set <= per_set <= max_per_set, got {} / {} / {}",
                self.min_per_set, self.per_set, self.max_per_set
            )));
        }
        Ok(())
    }

    /// Set lengths for a pool of `available` tracks: about `per_set` each,
    /// lengths differing by at most one. `max_per_set` always holds; sets
    /// fall below `min_per_set` only when the maximum leaves no other way.
    #[must_use]
    pub fn sizes(&self, available: usize) -> Vec<usize> {
        if available == 0 {
            return Vec::new();
        }
        let mut count = ((available + self.per_set / 2) / self.per_set).max(1);
        while available.div_ceil(count) > self.max_per_set {
            count += 1;
        }
        while count > 1 && available / count < self.min_per_set && available.div_ceil(count - 1) <= self.max_per_set {
            count -= 1;
        }
        let base = available / count;
        let extra = available % count;
        (0..count).map(|i| base + usize::from(i < extra)).collect()
    }
}

/// Consecutive sets cut from one pool
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MultiSetPlan {
    pub sets: Vec<SetPlan>,
    /// Skips across all sets, each track once
    pub skipped: Vec<SequencingSkip>,
    /// Viable tracks no set took
    pub unused: Vec<String>,
    pub cancelled: bool,
}

impl MultiSetPlan {
    /// Tracks placed across all sets
    #[must_use]
    pub fn len(&self) -> usize {
        self.sets.iter().map(SetPlan::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(SetPlan::is_empty)
    }
}

/// Mean incoming transition total; a lone track counts as zero.
fn mean_transition(steps: &[Step]) -> f64 {
    let totals: Vec<f64> = steps.iter().filter_map(|s| s.incoming.as_ref().map(|c| c.total)).collect();
    if totals.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let n = totals.len() as f64;
    totals.iter().sum::<f64>() / n
}

#[derive(Debug, Clone)]
struct Step {
    index: usize,
    phase: EnergyPhase,
    incoming: Option<CompatibilityScore>,
}

#[derive(Debug, Clone, Default)]
struct Run {
    seed: String,
    steps: Vec<Step>,
    skipped: Vec<SequencingSkip>,
    relaxations: Vec<Relaxation>,
    cancelled: bool,
}

/// Builds set plans with a given scorer
pub struct Sequencer<'a> {
    scorer: &'a dyn PairScorer,
    hotcues: HotcueConfig,
}

impl<'a> Sequencer<'a> {
    #[must_use]
    pub fn new(scorer: &'a dyn PairScorer) -> Self {
        Self { scorer, hotcues: HotcueConfig::default() }
    }

    /// Hotcue settings used to fill in missing mix points
    #[must_use]
    pub fn with_hotcue_config(mut self, config: HotcueConfig) -> Self {
        self.hotcues = config;
        self
    }

    /// Sequence `pool` into at most `target` tracks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolExhausted`] if no track in the pool is viable
    /// and [`Error::InvalidInput`] if a forced seed is not a viable pool member.
    pub fn sequence(&self, pool: &[TrackProfile], target: usize, mode: &SequenceMode) -> Result<SetPlan> {
        self.sequence_with_control(pool, target, mode, &BatchControl::new())
    }

    /// As [`Sequencer::sequence`], checking `control` before every
    /// extension step. A cancelled run returns what it has.
    ///
    /// # Errors
    ///
    /// See [`Sequencer::sequence`].
    pub fn sequence_with_control(
        &self,
        pool: &[TrackProfile],
        target: usize,
        mode: &SequenceMode,
        control: &BatchControl,
    ) -> Result<SetPlan> {
        if target == 0 {
            return Ok(SetPlan::default());
        }

        let (viable, mut skipped) = screen_pool(pool);
        if viable.is_empty() {
            return Err(PoolExhaustedError { requested: target, pool_size: pool.len(), skipped }.into());
        }

        let seeds = pick_seeds(&viable, target, mode)?;
        debug!("Trying {} seed(s): {:?}", seeds.len(), seeds.iter().map(|&i| &viable[i].id).collect::<Vec<_>>());
        control.begin(seeds.len() * target);

        let runs: Vec<Run> = seeds
            .par_iter()
            .map(|&seed| self.run(&viable, seed, target, mode, control))
            .collect();

        let Some(best) = runs.into_iter().min_by(compare_runs) else {
            return Err(PoolExhaustedError { requested: target, pool_size: pool.len(), skipped }.into());
        };
        info!(
            "Sequenced {} of {} tracks from seed `{}` ({} relaxations)",
            best.steps.len(),
            target,
            best.seed,
            best.relaxations.len()
        );

        skipped.extend(best.skipped);
        let mut plan = self.assemble(&viable, best.steps, target);
        plan.relaxations = best.relaxations;
        plan.cancelled = best.cancelled;

        // A duplicate id shares its id with a viable track, which may still be unused
        let excluded: HashSet<&str> = skipped
            .iter()
            .filter(|s| !matches!(s.reason, SkipReason::DuplicateId { .. }))
            .map(|s| s.track_id.as_str())
            .collect();
        let placed: HashSet<&str> = plan.entries.iter().map(|e| e.profile.id.as_str()).collect();
        plan.unused = viable
            .iter()
            .map(|p| p.id.as_str())
            .filter(|id| !placed.contains(id) && !excluded.contains(id))
            .map(str::to_string)
            .collect();
        plan.skipped = skipped;
        Ok(plan)
    }

    /// Ingest every record of `source`, then sequence the result. Records
    /// that fail ingestion are reported as skips.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read, or as
    /// [`Sequencer::sequence`].
    pub fn sequence_records(
        &self,
        source: &dyn FeatureSource,
        target: usize,
        mode: &SequenceMode,
        control: &BatchControl,
    ) -> Result<SetPlan> {
        let report = ingest::ingest_all(source, control)?;
        let mut failed: Vec<SequencingSkip> = report.failures.into_iter().map(SequencingSkip::from).collect();

        match self.sequence_with_control(&report.profiles, target, mode, control) {
            Ok(mut plan) => {
                failed.append(&mut plan.skipped);
                plan.skipped = failed;
                plan.cancelled |= report.cancelled;
                Ok(plan)
            }
            Err(Error::PoolExhausted(mut err)) => {
                err.pool_size += failed.len();
                failed.append(&mut err.skipped);
                err.skipped = failed;
                Err(err.into())
            }
            Err(err) => Err(err),
        }
    }

    /// Cut the whole pool into consecutive sets sized by `split`. Each set
    /// after the first starts from the remaining track that best follows
    /// the previous set's last track; a forced seed only applies to the
    /// first set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for an invalid split, otherwise as
    /// [`Sequencer::sequence`] for the first set.
    pub fn sequence_sets(
        &self,
        pool: &[TrackProfile],
        split: &SetSplit,
        mode: &SequenceMode,
        control: &BatchControl,
    ) -> Result<MultiSetPlan> {
        split.validate()?;
        let (viable, mut skipped) = screen_pool(pool);
        if viable.is_empty() {
            return Err(PoolExhaustedError { requested: split.per_set, pool_size: pool.len(), skipped }.into());
        }

        let sizes = split.sizes(viable.len());
        info!("Cutting {} tracks into {} set(s): {sizes:?}", viable.len(), sizes.len());
        let mut remaining: Vec<TrackProfile> = viable.into_iter().cloned().collect();
        let mut result = MultiSetPlan::default();

        for (number, &size) in sizes.iter().enumerate() {
            if remaining.is_empty() || control.is_cancelled() {
                result.cancelled |= control.is_cancelled();
                break;
            }
            let mut set_mode = mode.clone();
            if number > 0 {
                let previous = result.sets.last().and_then(|plan| plan.entries.last());
                set_mode.forced_seed = previous.and_then(|entry| self.best_follower(&entry.profile, &remaining));
            }

            let mut plan = self.sequence_with_control(&remaining, size, &set_mode, control)?;
            let taken: HashSet<&str> = plan
                .entries
                .iter()
                .map(|e| e.profile.id.as_str())
                .chain(plan.skipped.iter().map(|s| s.track_id.as_str()))
                .collect();
            remaining.retain(|p| !taken.contains(p.id.as_str()));
            debug!("Set {} placed {} tracks, {} left", number + 1, plan.len(), remaining.len());

            skipped.append(&mut plan.skipped);
            plan.unused.clear();
            result.cancelled |= plan.cancelled;
            result.sets.push(plan);
        }

        result.unused = remaining.into_iter().map(|p| p.id).collect();
        result.skipped = skipped;
        Ok(result)
    }

    /// Id of the candidate that ranks best after `tail`, if any can be scored.
    fn best_follower(&self, tail: &TrackProfile, candidates: &[TrackProfile]) -> Option<String> {
        candidates
            .iter()
            .filter_map(|candidate| self.scorer.score_pair(tail, candidate, EnergyFlow::Symmetric).ok())
            .min_by(rank_cmp)
            .map(|score| score.to)
    }

    fn run(&self, pool: &[&TrackProfile], seed: usize, target: usize, mode: &SequenceMode, control: &BatchControl) -> Run {
        let mut run = Run { seed: pool[seed].id.clone(), ..Run::default() };
        let mut used = vec![false; pool.len()];
        used[seed] = true;
        run.steps.push(Step { index: seed, phase: mode.energy_arc.phase_for(0, target), incoming: None });
        control.tick();

        while run.steps.len() < target {
            if control.is_cancelled() {
                run.cancelled = true;
                break;
            }
            let position = run.steps.len();
            let phase = mode.energy_arc.phase_for(position, target);
            let current = pool[run.steps[position - 1].index];

            let mut candidates: Vec<(usize, CompatibilityScore)> = Vec::new();
            let mut tail_failed = false;
            for (index, candidate) in pool.iter().enumerate() {
                if used[index] {
                    continue;
                }
                match self.scorer.score_pair(current, candidate, phase.trend.flow()) {
                    Ok(score) => candidates.push((index, score)),
                    Err(err) if err.offending == current.id => {
                        warn!("Tail `{}` cannot be scored: {err}", current.id);
                        tail_failed = true;
                        break;
                    }
                    Err(err) => {
                        debug!("Excluding `{}`: {err}", candidate.id);
                        used[index] = true;
                        run.skipped.push(SequencingSkip {
                            track_id: candidate.id.clone(),
                            reason: SkipReason::IncompatiblePair(err),
                        });
                    }
                }
            }
            if tail_failed || candidates.is_empty() {
                break;
            }

            let narrowed = apply_constraints(candidates, current, pool, &phase, mode, position, &mut run.relaxations);
            let Some((index, score)) = narrowed.into_iter().min_by(|a, b| rank_cmp(&a.1, &b.1)) else {
                break;
            };
            used[index] = true;
            run.steps.push(Step { index, phase, incoming: Some(score) });
            control.tick();
        }
        run
    }

    fn assemble(&self, pool: &[&TrackProfile], steps: Vec<Step>, target: usize) -> SetPlan {
        let entries = steps
            .into_iter()
            .enumerate()
            .map(|(position, step)| {
                let profile = pool[step.index].clone();
                let hotcues = hotcue::generate_for(&profile, &self.hotcues)
                    .map(|outcome| outcome.cues)
                    .unwrap_or_default();
                let (mix_in, mix_out) = mix_points(&profile, &hotcues);
                PlanEntry { profile, position, phase: step.phase, mix_in, mix_out, hotcues, incoming: step.incoming }
            })
            .collect();
        SetPlan { entries, requested: target, ..SetPlan::default() }
    }
}

/// Convenience wrapper: sequence with default hotcue settings.
///
/// # Errors
///
/// See [`Sequencer::sequence`].
pub fn sequence(pool: &[TrackProfile], target: usize, mode: &SequenceMode, scorer: &dyn PairScorer) -> Result<SetPlan> {
    Sequencer::new(scorer).sequence(pool, target, mode)
}

/// Split a pool into viable profiles and skips. Invalid profiles and
/// repeated ids are skipped; the first entry for an id wins.
fn screen_pool(pool: &[TrackProfile]) -> (Vec<&TrackProfile>, Vec<SequencingSkip>) {
    let mut skipped = Vec::new();
    let mut seen: HashMap<&str, &TrackProfile> = HashMap::new();
    let mut viable: Vec<&TrackProfile> = Vec::new();
    for profile in pool {
        if let Err(err) = profile.validate() {
            warn!("Skipping `{}`: {err}", profile.id);
            skipped.push(SequencingSkip::from(err));
        } else if let Some(kept) = seen.get(profile.id.as_str()) {
            warn!("Duplicate track id `{}` in pool; keeping the first", profile.id);
            skipped.push(SequencingSkip {
                track_id: profile.id.clone(),
                reason: SkipReason::DuplicateId { kept_title: kept.title.clone(), dropped_title: profile.title.clone() },
            });
        } else {
            seen.insert(profile.id.as_str(), profile);
            viable.push(profile);
        }
    }
    (viable, skipped)
}

/// More tracks first, then the better mean transition, then seed id.
fn compare_runs(a: &Run, b: &Run) -> Ordering {
    b.steps
        .len()
        .cmp(&a.steps.len())
        .then_with(|| mean_transition(&b.steps).total_cmp(&mean_transition(&a.steps)))
        .then_with(|| a.seed.cmp(&b.seed))
}

fn pick_seeds(pool: &[&TrackProfile], target: usize, mode: &SequenceMode) -> Result<Vec<usize>> {
    if let Some(forced) = &mode.forced_seed {
        return pool
            .iter()
            .position(|p| &p.id == forced)
            .map(|index| vec![index])
            .ok_or_else(|| Error::InvalidInput(format!("seed `{forced}` is not a viable track in the pool")));
    }

    let centre = mode.energy_arc.phase_for(0, target).centre();
    let distance = |p: &TrackProfile| p.energy.map_or(f64::INFINITY, |e| (e - centre).abs());
    let mut order: Vec<usize> = (0..pool.len()).collect();
    order.sort_by(|&a, &b| {
        distance(pool[a])
            .total_cmp(&distance(pool[b]))
            .then_with(|| pool[a].id.cmp(&pool[b].id))
    });
    order.truncate(mode.seed_candidates.max(1));
    Ok(order)
}

fn apply_constraints(
    candidates: Vec<(usize, CompatibilityScore)>,
    current: &TrackProfile,
    pool: &[&TrackProfile],
    phase: &EnergyPhase,
    mode: &SequenceMode,
    position: usize,
    relaxations: &mut Vec<Relaxation>,
) -> Vec<(usize, CompatibilityScore)> {
    let mut remaining = candidates;
    let within = |limit: f64, from: &[(usize, CompatibilityScore)]| -> Vec<(usize, CompatibilityScore)> {
        from.iter().filter(|(_, score)| score.bpm_delta <= limit).cloned().collect()
    };
    let mut stepped = within(mode.max_bpm_step, &remaining);
    if stepped.is_empty() {
        debug!("Relaxing {} at position {position}", Constraint::BpmStep);
        relaxations.push(Relaxation { position, constraint: Constraint::BpmStep });
        stepped = within(mode.max_bpm_step.max(mode.bpm_step_fallback), &remaining);
    }
    if !stepped.is_empty() {
        remaining = stepped;
    }

    let mut active = Vec::with_capacity(3);
    if mode.strict_key_continuity {
        active.push(Constraint::KeyContinuity);
    }
    if mode.avoid_repeated_artist {
        active.push(Constraint::NoRepeatedArtist);
    }
    active.push(Constraint::EnergyTrend);

    let current_artist = current.artist_key();
    let allows = |constraint: Constraint, index: usize, score: &CompatibilityScore| -> bool {
        let candidate = pool[index];
        match constraint {
            Constraint::BpmStep => score.bpm_delta <= mode.max_bpm_step,
            Constraint::KeyContinuity => {
                score.relationship <= mode.strict_min_relation && score.bpm_delta <= mode.strict_max_bpm_delta
            }
            Constraint::NoRepeatedArtist => match (&current_artist, candidate.artist_key()) {
                (Some(a), Some(b)) => *a != b,
                _ => true,
            },
            Constraint::EnergyTrend => match (current.energy, candidate.energy) {
                (Some(from), Some(to)) => match phase.trend {
                    Trend::Rising => to >= from,
                    Trend::Falling => to <= from,
                    Trend::Plateau => (to - from).abs() <= mode.plateau_tolerance,
                },
                _ => true,
            },
        }
    };

    for constraint in active {
        let kept: Vec<(usize, CompatibilityScore)> =
            remaining.iter().filter(|(index, score)| allows(constraint, *index, score)).cloned().collect();
        if kept.is_empty() {
            debug!("Relaxing {constraint} at position {position}");
            relaxations.push(Relaxation { position, constraint });
        } else {
            remaining = kept;
        }
    }
    remaining
}

/// Mix-in and mix-out seconds for an entry, manual cues first.
fn mix_points(profile: &TrackProfile, hotcues: &HotcueSet) -> (f64, f64) {
    let mix_in = profile
        .manual_cues
        .get(&CueSlot::A)
        .copied()
        .or(profile.mix_in_estimate)
        .or_else(|| hotcues.start(CueSlot::A))
        .unwrap_or(0.0);
    let mix_out = profile
        .manual_cues
        .get(&CueSlot::C)
        .copied()
        .or(profile.mix_out_estimate)
        .or_else(|| hotcues.start(CueSlot::C))
        .unwrap_or_else(|| profile.duration - 16.0 * 4.0 * profile.beat_seconds());
    (mix_in, mix_out.max(mix_in))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IncompatiblePairError;
    use crate::scoring::ScoringContext;

    fn track(id: &str, bpm: f64, key: &str, energy: f64) -> TrackProfile {
        TrackProfile::new(id, bpm, key.parse().unwrap(), 300.0).with_energy(energy)
    }

    fn pool() -> Vec<TrackProfile> {
        vec![
            track("a", 122.0, "8A", 40.0),
            track("b", 123.0, "9A", 50.0),
            track("c", 124.0, "9B", 60.0),
            track("d", 125.0, "10A", 70.0),
            track("e", 126.0, "10B", 75.0),
            track("f", 126.0, "11A", 80.0),
            track("g", 124.0, "11B", 65.0),
            track("h", 123.0, "12A", 50.0),
        ]
    }

    fn assert_no_duplicates(plan: &SetPlan) {
        let ids: HashSet<&str> = plan.ids().collect();
        assert_eq!(ids.len(), plan.len(), "Plan has duplicate tracks");
    }

    #[test]
    fn test_full_permutation_without_duplicates() {
        let pool = pool();
        let plan = sequence(&pool, pool.len(), &SequenceMode::default(), &ScoringContext::default()).unwrap();

        assert_eq!(plan.len(), pool.len());
        assert_no_duplicates(&plan);
        assert!(plan.skipped.is_empty());
        assert!(plan.unused.is_empty());
        assert!(plan.entries[0].incoming.is_none());
        assert!(plan.entries[1..].iter().all(|e| e.incoming.is_some()));
    }

    #[test]
    fn test_subset_when_target_is_smaller() {
        let pool = pool();
        let plan = sequence(&pool, 3, &SequenceMode::default(), &ScoringContext::default()).unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan.unused.len(), pool.len() - 3);
        assert_eq!(plan.shortfall(), 0);
    }

    #[test]
    fn test_malformed_entry_is_skipped() {
        let mut pool = pool();
        pool.push(TrackProfile { bpm: f64::NAN, ..track("broken", 120.0, "8A", 50.0) });

        let plan = sequence(&pool, pool.len(), &SequenceMode::default(), &ScoringContext::default()).unwrap();
        assert_eq!(plan.len(), pool.len() - 1);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].track_id, "broken");
        assert_eq!(plan.shortfall(), 1);
    }

    #[test]
    fn test_pool_exhausted_only_when_nothing_viable() {
        let broken = vec![TrackProfile { duration: 0.0, ..track("x", 120.0, "8A", 50.0) }];
        let err = sequence(&broken, 4, &SequenceMode::default(), &ScoringContext::default()).unwrap_err();

        match err {
            Error::PoolExhausted(err) => {
                assert_eq!(err.requested, 4);
                assert_eq!(err.skipped.len(), 1);
            }
            other => panic!("Expected PoolExhausted, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_target_is_empty_plan() {
        let plan = sequence(&pool(), 0, &SequenceMode::default(), &ScoringContext::default()).unwrap();
        assert!(plan.is_empty());
        assert!(sequence(&[], 0, &SequenceMode::default(), &ScoringContext::default()).is_ok());
    }

    #[test]
    fn test_repeated_artist_avoided_when_possible() {
        let pool = vec![
            track("a1", 124.0, "8A", 50.0).with_artist("Same"),
            track("a2", 124.0, "8A", 50.0).with_artist("Same"),
            track("b1", 124.0, "9A", 52.0).with_artist("Other"),
        ];
        let mode = SequenceMode { forced_seed: Some("a1".into()), energy_arc: EnergyArc::Flat, ..SequenceMode::default() };
        let plan = sequence(&pool, 2, &mode, &ScoringContext::default()).unwrap();

        let ids: Vec<&str> = plan.ids().collect();
        assert_eq!(ids, vec!["a1", "b1"], "Identical key loses to a different artist");
        assert!(plan.relaxations.is_empty());
    }

    #[test]
    fn test_relaxation_is_recorded() {
        let pool = vec![
            track("a1", 124.0, "8A", 50.0).with_artist("Same"),
            track("a2", 124.0, "8A", 50.0).with_artist("same "),
        ];
        let mode = SequenceMode { forced_seed: Some("a1".into()), energy_arc: EnergyArc::Flat, ..SequenceMode::default() };
        let plan = sequence(&pool, 2, &mode, &ScoringContext::default()).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.relaxations, vec![Relaxation { position: 1, constraint: Constraint::NoRepeatedArtist }]);
    }

    #[test]
    fn test_strict_key_prefers_compatible_keys() {
        let pool = vec![
            track("seed", 124.0, "8A", 50.0),
            // Scores higher, but 10 BPM away
            track("far", 134.0, "8A", 50.0),
            track("near", 124.0, "9A", 30.0),
        ];
        let mode = SequenceMode {
            strict_key_continuity: true,
            forced_seed: Some("seed".into()),
            energy_arc: EnergyArc::Flat,
            ..SequenceMode::default()
        };
        let plan = sequence(&pool, 2, &mode, &ScoringContext::default()).unwrap();
        assert_eq!(plan.entries[1].profile.id, "near");
        assert!(plan.relaxations.iter().any(|r| r.constraint == Constraint::EnergyTrend));

        let loose = SequenceMode { strict_key_continuity: false, ..mode };
        let plan = sequence(&pool, 2, &loose, &ScoringContext::default()).unwrap();
        assert_eq!(plan.entries[1].profile.id, "far");
    }

    #[test]
    fn test_unknown_forced_seed_is_invalid_input() {
        let mode = SequenceMode { forced_seed: Some("nope".into()), ..SequenceMode::default() };
        let err = sequence(&pool(), 3, &mode, &ScoringContext::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    struct RefusesTrack(&'static str);

    impl PairScorer for RefusesTrack {
        fn score_pair(
            &self,
            from: &TrackProfile,
            to: &TrackProfile,
            flow: EnergyFlow,
        ) -> std::result::Result<CompatibilityScore, IncompatiblePairError> {
            if to.id == self.0 {
                return Err(IncompatiblePairError {
                    from: from.id.clone(),
                    to: to.id.clone(),
                    offending: to.id.clone(),
                    cause: crate::error::MissingFeatureError::new(to.id.clone(), crate::error::Feature::Key),
                });
            }
            ScoringContext::default().score_pair(from, to, flow)
        }
    }

    #[test]
    fn test_pair_failure_skips_only_the_offending_track() {
        let pool = pool();
        let mode = SequenceMode { forced_seed: Some("a".into()), ..SequenceMode::default() };
        let plan = Sequencer::new(&RefusesTrack("d")).sequence(&pool, pool.len(), &mode).unwrap();

        assert_eq!(plan.len(), pool.len() - 1);
        assert!(plan.ids().all(|id| id != "d"));
        assert_eq!(plan.skipped.len(), 1);
        assert!(matches!(plan.skipped[0].reason, SkipReason::IncompatiblePair(_)));
    }

    #[test]
    fn test_mix_points_prefer_manual_then_estimates() {
        let mut profile = track("m", 128.0, "8A", 50.0);
        profile.mix_in_estimate = Some(12.0);
        profile.manual_cues.insert(CueSlot::C, 250.0);
        let hotcues = hotcue::generate_for(&profile, &HotcueConfig::default()).unwrap().cues;

        assert_eq!(mix_points(&profile, &hotcues), (12.0, 250.0));

        let bare = track("n", 128.0, "8A", 50.0);
        let hotcues = hotcue::generate_for(&bare, &HotcueConfig::default()).unwrap().cues;
        let (mix_in, mix_out) = mix_points(&bare, &hotcues);
        assert_eq!(Some(mix_in), hotcues.start(CueSlot::A));
        assert_eq!(Some(mix_out), hotcues.start(CueSlot::C));
    }

    #[test]
    fn test_classic_arc_phases() {
        let arc = EnergyArc::Classic;
        assert_eq!(arc.phase_for(0, 10).name, PhaseName::Warmup);
        assert_eq!(arc.phase_for(5, 10).name, PhaseName::Peak);
        assert_eq!(arc.phase_for(9, 10).name, PhaseName::Cooldown);
        assert_eq!(arc.phase_for(9, 10).trend.flow(), EnergyFlow::Falling);
    }

    #[test]
    fn test_cancelled_run_keeps_partial_plan() {
        let control = BatchControl::new();
        control.cancel();
        let plan = Sequencer::new(&ScoringContext::default())
            .sequence_with_control(&pool(), 5, &SequenceMode::default(), &control)
            .unwrap();

        assert!(plan.cancelled);
        assert_eq!(plan.len(), 1, "Only the seed is placed");
    }

    #[test]
    fn test_duplicate_id_is_reported() {
        let pool = vec![
            track("a", 124.0, "8A", 50.0).with_title("First"),
            track("b", 124.0, "9A", 52.0),
            track("a", 110.0, "3B", 70.0).with_title("Different track"),
        ];
        let plan = sequence(&pool, 3, &SequenceMode::default(), &ScoringContext::default()).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].track_id, "a");
        match &plan.skipped[0].reason {
            SkipReason::DuplicateId { kept_title, dropped_title } => {
                assert_eq!(kept_title, "First");
                assert_eq!(dropped_title, "Different track");
            }
            other => panic!("Unexpected reason: {other:?}"),
        }
        assert!(plan.skipped[0].to_string().contains("Different track"));
    }

    #[test]
    fn test_duplicate_of_unplaced_track_still_listed_unused() {
        let pool = vec![
            track("a", 124.0, "8A", 40.0),
            track("b", 124.0, "8A", 41.0),
            track("b", 124.0, "8A", 41.0),
        ];
        let mode = SequenceMode { forced_seed: Some("a".into()), ..SequenceMode::default() };
        let plan = sequence(&pool, 1, &mode, &ScoringContext::default()).unwrap();

        assert_eq!(plan.unused, vec!["b".to_string()]);
        assert_eq!(plan.skipped.len(), 1);
    }

    #[test]
    fn test_bpm_step_limits_neighbours_in_every_mode() {
        let pool = vec![
            track("seed", 120.0, "8A", 50.0),
            // Same key, but 15 BPM away
            track("jump", 135.0, "8A", 50.0),
            track("near", 124.0, "3B", 50.0),
        ];
        let mode = SequenceMode { forced_seed: Some("seed".into()), energy_arc: EnergyArc::Flat, ..SequenceMode::default() };
        let plan = sequence(&pool, 2, &mode, &ScoringContext::default()).unwrap();
        assert_eq!(plan.entries[1].profile.id, "near");
        assert!(plan.relaxations.is_empty());

        let wide = SequenceMode { max_bpm_step: 20.0, ..mode };
        let plan = sequence(&pool, 2, &wide, &ScoringContext::default()).unwrap();
        assert_eq!(plan.entries[1].profile.id, "jump");
    }

    #[test]
    fn test_bpm_step_relaxed_through_fallback_then_dropped() {
        let mode = SequenceMode { forced_seed: Some("seed".into()), energy_arc: EnergyArc::Flat, ..SequenceMode::default() };
        let step = Relaxation { position: 1, constraint: Constraint::BpmStep };

        // 14 BPM away: outside the limit, inside the fallback
        let pool = vec![track("seed", 120.0, "8A", 50.0), track("fallback", 134.0, "8A", 50.0), track("far", 150.0, "8A", 50.0)];
        let plan = sequence(&pool, 2, &mode, &ScoringContext::default()).unwrap();
        assert_eq!(plan.entries[1].profile.id, "fallback");
        assert_eq!(plan.relaxations, vec![step.clone()]);

        let pool = vec![track("seed", 120.0, "8A", 50.0), track("far", 150.0, "8A", 50.0)];
        let plan = sequence(&pool, 2, &mode, &ScoringContext::default()).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan.relaxations, vec![step]);
    }

    #[test]
    fn test_set_split_sizes() {
        let split = SetSplit { per_set: 4, min_per_set: 3, max_per_set: 5 };
        assert_eq!(split.sizes(10), vec![4, 3, 3]);
        assert_eq!(split.sizes(5), vec![5]);
        assert_eq!(split.sizes(2), vec![2]);
        assert!(split.sizes(0).is_empty());

        let default = SetSplit::default();
        assert_eq!(default.sizes(120), vec![40, 40, 40]);
        assert_eq!(default.sizes(50), vec![25, 25], "The maximum wins over the minimum");
        assert_eq!(SetSplit::around(40), default);
        assert!(SetSplit { per_set: 4, min_per_set: 5, max_per_set: 6 }.validate().is_err());
    }

    #[test]
    fn test_sequence_sets_places_each_track_once() {
        let mut pool: Vec<TrackProfile> = (0..10)
            .map(|i| track(&format!("t{i}"), 120.0 + f64::from(i), &format!("{}A", i % 12 + 1), 40.0 + 4.0 * f64::from(i)))
            .collect();
        pool.push(TrackProfile { duration: 0.0, ..track("broken", 120.0, "8A", 50.0) });

        let split = SetSplit { per_set: 4, min_per_set: 3, max_per_set: 5 };
        let sets = Sequencer::new(&ScoringContext::default())
            .sequence_sets(&pool, &split, &SequenceMode::default(), &BatchControl::new())
            .unwrap();

        assert_eq!(sets.sets.iter().map(SetPlan::len).collect::<Vec<_>>(), vec![4, 3, 3]);
        let ids: HashSet<&str> = sets.sets.iter().flat_map(SetPlan::ids).collect();
        assert_eq!(ids.len(), 10);
        assert_eq!(sets.len(), 10);
        assert!(sets.unused.is_empty());
        assert_eq!(sets.skipped.len(), 1);
        assert_eq!(sets.skipped[0].track_id, "broken");
    }

    #[test]
    fn test_next_set_starts_from_best_follower() {
        let pool = pool();
        let split = SetSplit { per_set: 4, min_per_set: 4, max_per_set: 4 };
        let ctx = ScoringContext::default();
        let sequencer = Sequencer::new(&ctx);
        let sets = sequencer.sequence_sets(&pool, &split, &SequenceMode::default(), &BatchControl::new()).unwrap();

        let first_ids: HashSet<&str> = sets.sets[0].ids().collect();
        let rest: Vec<TrackProfile> = pool.iter().filter(|p| !first_ids.contains(p.id.as_str())).cloned().collect();
        let tail = &sets.sets[0].entries[3].profile;
        assert_eq!(Some(sets.sets[1].entries[0].profile.id.clone()), sequencer.best_follower(tail, &rest));
    }

    #[test]
    fn test_sequencing_is_deterministic() {
        let pool = pool();
        let first = sequence(&pool, 6, &SequenceMode::default(), &ScoringContext::default()).unwrap();
        let second = sequence(&pool, 6, &SequenceMode::default(), &ScoringContext::default()).unwrap();
        assert_eq!(first.ids().collect::<Vec<_>>(), second.ids().collect::<Vec<_>>());
    }
}
