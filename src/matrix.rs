//! Precomputed pairwise compatibility for a pool.
//!
//! Built once in parallel, then read-only. Entries are stored under the
//! symmetric energy flow; any other flow is re-applied at lookup time since
//! only the energy term depends on direction. Failed pairs are stored too,
//! so a lookup reports the same error live scoring would.

use crate::batch::BatchControl;
use crate::error::IncompatiblePairError;
use crate::profile::TrackProfile;
use crate::scoring::{self, rank_cmp, CompatibilityScore, EnergyFlow, PairScorer, ScoringContext};
use log::{debug, info};
use rayon::prelude::*;
use std::collections::HashMap;

type PairResult = Result<CompatibilityScore, IncompatiblePairError>;

/// Directed pair scores for every ordered pair of a pool
#[derive(Debug, Clone)]
pub struct CompatibilityMatrix {
    context: ScoringContext,
    entries: HashMap<(String, String), PairResult>,
    expected: usize,
}

impl CompatibilityMatrix {
    /// Score all ordered pairs of `profiles`. On cancellation the pairs
    /// finished so far are kept and the rest are scored live on lookup.
    #[must_use]
    pub fn build(profiles: &[TrackProfile], context: &ScoringContext, control: &BatchControl) -> Self {
        let pairs: Vec<(usize, usize)> = (0..profiles.len())
            .flat_map(|i| (0..profiles.len()).filter(move |&j| j != i).map(move |j| (i, j)))
            .collect();
        control.begin(pairs.len());

        let entries: HashMap<(String, String), PairResult> = pairs
            .par_iter()
            .filter_map(|&(i, j)| {
                if control.is_cancelled() {
                    return None;
                }
                let (from, to) = (&profiles[i], &profiles[j]);
                let result = scoring::score_with_flow(from, to, EnergyFlow::Symmetric, context);
                control.tick();
                Some(((from.id.clone(), to.id.clone()), result))
            })
            .collect();

        info!("Compatibility matrix: {} of {} pairs scored", entries.len(), pairs.len());
        Self { context: context.clone(), entries, expected: pairs.len() }
    }

    /// Number of stored pairs
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// False when the build was cancelled part way.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.entries.len() == self.expected
    }

    /// Stored result for `from -> to` under the symmetric flow.
    #[must_use]
    pub fn get(&self, from: &str, to: &str) -> Option<&PairResult> {
        self.entries.get(&(from.to_string(), to.to_string()))
    }

    /// The `limit` best partners of `id`, ranked with [`rank_cmp`].
    #[must_use]
    pub fn best_matches(&self, id: &str, limit: usize) -> Vec<CompatibilityScore> {
        let mut matches: Vec<CompatibilityScore> = self
            .entries
            .iter()
            .filter(|((from, _), _)| from == id)
            .filter_map(|(_, result)| result.as_ref().ok().cloned())
            .collect();
        matches.sort_by(rank_cmp);
        matches.truncate(limit);
        matches
    }

    /// Every pair that could not be scored, ordered by pair.
    #[must_use]
    pub fn failures(&self) -> Vec<&IncompatiblePairError> {
        let mut failures: Vec<&IncompatiblePairError> =
            self.entries.values().filter_map(|result| result.as_ref().err()).collect();
        failures.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        failures
    }
}

impl PairScorer for CompatibilityMatrix {
    fn score_pair(&self, from: &TrackProfile, to: &TrackProfile, flow: EnergyFlow) -> PairResult {
        match self.get(&from.id, &to.id) {
            Some(Ok(base)) => Ok(scoring::apply_flow(base, from, to, flow, &self.context)),
            Some(Err(err)) => Err(err.clone()),
            None => {
                debug!("Matrix miss for {} -> {}, scoring live", from.id, to.id);
                scoring::score_with_flow(from, to, flow, &self.context)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> Vec<TrackProfile> {
        ["8A", "9A", "8B", "3B"]
            .iter()
            .enumerate()
            .map(|(i, k)| {
                TrackProfile::new(format!("t{i}"), 120.0 + i as f64, k.parse().unwrap(), 300.0)
                    .with_energy(40.0 + 10.0 * i as f64)
            })
            .collect()
    }

    #[test]
    fn test_build_scores_every_ordered_pair() {
        let profiles = pool();
        let matrix = CompatibilityMatrix::build(&profiles, &ScoringContext::default(), &BatchControl::new());
        assert_eq!(matrix.len(), 12);
        assert!(matrix.is_complete());
        assert!(matrix.get("t0", "t0").is_none());
    }

    #[test]
    fn test_lookup_matches_live_scoring_for_any_flow() {
        let profiles = pool();
        let context = ScoringContext::default();
        let matrix = CompatibilityMatrix::build(&profiles, &context, &BatchControl::new());

        for flow in [EnergyFlow::Symmetric, EnergyFlow::Rising, EnergyFlow::Falling] {
            let looked_up = matrix.score_pair(&profiles[0], &profiles[2], flow).unwrap();
            let live = context.score_pair(&profiles[0], &profiles[2], flow).unwrap();
            assert!((looked_up.total - live.total).abs() < 1e-9, "Mismatch under {flow:?}");
        }
    }

    #[test]
    fn test_failures_are_stored() {
        let mut profiles = pool();
        profiles[3].duration = -1.0;
        let matrix = CompatibilityMatrix::build(&profiles, &ScoringContext::default(), &BatchControl::new());

        assert_eq!(matrix.failures().len(), 6, "Every pair touching t3 fails");
        assert!(matrix.score_pair(&profiles[0], &profiles[3], EnergyFlow::Symmetric).is_err());
    }

    #[test]
    fn test_best_matches_ranked() {
        let profiles = pool();
        let matrix = CompatibilityMatrix::build(&profiles, &ScoringContext::default(), &BatchControl::new());
        let best = matrix.best_matches("t0", 2);

        assert_eq!(best.len(), 2);
        assert!(best[0].total >= best[1].total);
        assert!(best.iter().all(|s| s.from == "t0"));
    }

    #[test]
    fn test_cancelled_build_falls_back_to_live_scoring() {
        let profiles = pool();
        let control = BatchControl::new();
        control.cancel();
        let matrix = CompatibilityMatrix::build(&profiles, &ScoringContext::default(), &control);

        assert!(!matrix.is_complete());
        assert!(matrix.score_pair(&profiles[0], &profiles[1], EnergyFlow::Rising).is_ok());
    }
}
