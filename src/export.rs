//! Plan export: a JSON document and an extended M3U playlist.

use crate::advisor::TransitionAdvice;
use crate::camelot::KeyRelation;
use crate::error::Result;
use crate::scoring::statistics::{analyze_transitions, ScoreStatistics};
use crate::error::SequencingSkip;
use crate::sequencer::{MultiSetPlan, PhaseName, Relaxation, SetPlan};
use log::info;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportTrack {
    pub position: usize,
    pub id: String,
    pub title: String,
    pub artist: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub bpm: f64,
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub energy: Option<f64>,
    pub phase: PhaseName,
    pub mix_in: f64,
    pub mix_out: f64,
    /// Score of the transition into this track
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transition_total: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<KeyRelation>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportSkip {
    pub track_id: String,
    pub reason: String,
}

/// Serializable view of a [`SetPlan`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanExport {
    pub requested: usize,
    pub tracks: Vec<ExportTrack>,
    pub skipped: Vec<ExportSkip>,
    pub relaxations: Vec<Relaxation>,
    pub unused: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<ScoreStatistics>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advice: Vec<TransitionAdvice>,
}

fn export_skips(skipped: &[SequencingSkip]) -> Vec<ExportSkip> {
    skipped
        .iter()
        .map(|skip| ExportSkip { track_id: skip.track_id.clone(), reason: skip.reason.to_string() })
        .collect()
}

impl PlanExport {
    #[must_use]
    pub fn from_plan(plan: &SetPlan) -> Self {
        let tracks = plan
            .entries
            .iter()
            .map(|entry| {
                let p = &entry.profile;
                ExportTrack {
                    position: entry.position + 1,
                    id: p.id.clone(),
                    title: p.title.clone(),
                    artist: p.artist.clone(),
                    path: p.path.clone(),
                    bpm: p.bpm,
                    key: p.key.to_string(),
                    energy: p.energy,
                    phase: entry.phase.name,
                    mix_in: entry.mix_in,
                    mix_out: entry.mix_out,
                    transition_total: entry.incoming.as_ref().map(|s| s.total),
                    relationship: entry.incoming.as_ref().map(|s| s.relationship),
                }
            })
            .collect();

        Self {
            requested: plan.requested,
            tracks,
            skipped: export_skips(&plan.skipped),
            relaxations: plan.relaxations.clone(),
            unused: plan.unused.clone(),
            statistics: analyze_transitions(plan),
            advice: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_advice(mut self, advice: Vec<TransitionAdvice>) -> Self {
        self.advice = advice;
        self
    }

    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        info!("Wrote plan JSON to {}", path.display());
        Ok(())
    }
}

fn write_entries(out: &mut String, plan: &SetPlan) {
    for entry in &plan.entries {
        let p = &entry.profile;
        let artist = if p.artist.is_empty() { "Unknown" } else { p.artist.as_str() };
        #[allow(clippy::cast_possible_truncation)]
        let seconds = p.duration.round() as i64;
        // Writing to a String cannot fail
        let _ = writeln!(out, "#EXTINF:{seconds},{artist} - {}", p.title);
        let _ = writeln!(
            out,
            "#SETWRIGHT:key={},bpm={:.2},mix_in={:.3},mix_out={:.3}",
            p.key, p.bpm, entry.mix_in, entry.mix_out
        );
        let _ = writeln!(out, "{}", p.path.as_deref().unwrap_or(&p.id));
    }
}

fn write_skips(out: &mut String, skipped: &[SequencingSkip]) {
    for skip in skipped {
        let _ = writeln!(out, "# skipped {}: {}", skip.track_id, skip.reason);
    }
}

/// Extended M3U for a plan. Each track carries its mix points on a
/// `#SETWRIGHT:` line; skipped tracks are listed as comments at the end.
#[must_use]
pub fn to_m3u(plan: &SetPlan) -> String {
    let mut out = String::from("#EXTM3U\n");
    write_entries(&mut out, plan);
    write_skips(&mut out, &plan.skipped);
    out
}

/// One playlist for consecutive sets. Each set opens with an `#EXTGRP`
/// group line and a divider comment.
#[must_use]
pub fn to_m3u_sets(sets: &MultiSetPlan) -> String {
    let total = sets.sets.len();
    let mut out = String::from("#EXTM3U\n");
    let _ = writeln!(out, "#PLAYLIST:setwright - {total} sets");
    for (index, plan) in sets.sets.iter().enumerate() {
        let number = index + 1;
        let _ = writeln!(out, "# ========== Set {number}/{total} ({} tracks) ==========", plan.len());
        let _ = writeln!(out, "#EXTGRP:Set {number}");
        write_entries(&mut out, plan);
    }
    for id in &sets.unused {
        let _ = writeln!(out, "# unused {id}");
    }
    write_skips(&mut out, &sets.skipped);
    out
}

/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_m3u(plan: &SetPlan, path: &Path) -> Result<()> {
    fs::write(path, to_m3u(plan))?;
    info!("Wrote playlist to {}", path.display());
    Ok(())
}

/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_m3u_sets(sets: &MultiSetPlan, path: &Path) -> Result<()> {
    fs::write(path, to_m3u_sets(sets))?;
    info!("Wrote {} sets to {}", sets.sets.len(), path.display());
    Ok(())
}

/// Serializable view of a [`MultiSetPlan`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetsExport {
    pub sets: Vec<PlanExport>,
    pub skipped: Vec<ExportSkip>,
    pub unused: Vec<String>,
}

impl SetsExport {
    /// Per-set advice, when given, is attached set by set.
    #[must_use]
    pub fn from_sets(sets: &MultiSetPlan, mut advice: Vec<Vec<TransitionAdvice>>) -> Self {
        advice.resize_with(sets.sets.len(), Vec::new);
        Self {
            sets: sets
                .sets
                .iter()
                .zip(advice)
                .map(|(plan, advice)| PlanExport::from_plan(plan).with_advice(advice))
                .collect(),
            skipped: export_skips(&sets.skipped),
            unused: sets.unused.clone(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Wrote {} sets as JSON to {}", self.sets.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::TrackProfile;
    use crate::scoring::ScoringContext;
    use crate::batch::BatchControl;
    use crate::sequencer::{sequence, SequenceMode, Sequencer, SetSplit};

    fn plan() -> SetPlan {
        let mut pool: Vec<TrackProfile> = ["8A", "9A", "9B"]
            .iter()
            .enumerate()
            .map(|(i, k)| {
                TrackProfile::new(format!("t{i}"), 124.0, k.parse().unwrap(), 240.0)
                    .with_artist(format!("Artist {i}"))
                    .with_energy(50.0 + 5.0 * i as f64)
            })
            .collect();
        pool[0].path = Some("/music/t0.flac".into());
        pool.push(TrackProfile { bpm: 0.0, ..TrackProfile::new("bad", 124.0, "8A".parse().unwrap(), 240.0) });
        sequence(&pool, 3, &SequenceMode::default(), &ScoringContext::default()).unwrap()
    }

    #[test]
    fn test_json_export_lists_tracks_and_skips() {
        let plan = plan();
        let export = PlanExport::from_plan(&plan);

        assert_eq!(export.tracks.len(), 3);
        assert_eq!(export.tracks[0].position, 1);
        assert!(export.tracks[0].transition_total.is_none());
        assert!(export.tracks[1].transition_total.is_some());
        assert_eq!(export.skipped.len(), 1);
        assert_eq!(export.statistics.as_ref().map(|s| s.count), Some(2));

        let json: serde_json::Value = serde_json::from_str(&export.to_json().unwrap()).unwrap();
        assert_eq!(json["skipped"][0]["track_id"], "bad");
        assert!(json.get("advice").is_none());
    }

    #[test]
    fn test_m3u_has_mix_annotations() {
        let plan = plan();
        let m3u = to_m3u(&plan);
        let lines: Vec<&str> = m3u.lines().collect();

        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines.iter().filter(|l| l.starts_with("#EXTINF:240,")).count(), 3);
        assert_eq!(lines.iter().filter(|l| l.starts_with("#SETWRIGHT:")).count(), 3);
        assert!(lines.iter().any(|l| l.contains("mix_in=") && l.contains("mix_out=")));
        assert!(lines.last().unwrap().starts_with("# skipped bad"));
    }

    #[test]
    fn test_multi_set_m3u_has_set_dividers() {
        let pool: Vec<TrackProfile> = (0..6)
            .map(|i| TrackProfile::new(format!("t{i}"), 120.0 + f64::from(i), "8A".parse().unwrap(), 240.0))
            .collect();
        let split = SetSplit { per_set: 3, min_per_set: 3, max_per_set: 3 };
        let sets = Sequencer::new(&ScoringContext::default())
            .sequence_sets(&pool, &split, &SequenceMode::default(), &BatchControl::new())
            .unwrap();

        let m3u = to_m3u_sets(&sets);
        let lines: Vec<&str> = m3u.lines().collect();
        assert_eq!(lines[0], "#EXTM3U");
        assert_eq!(lines[1], "#PLAYLIST:setwright - 2 sets");
        assert_eq!(lines[2], "# ========== Set 1/2 (3 tracks) ==========");
        assert_eq!(lines[3], "#EXTGRP:Set 1");
        assert!(lines.contains(&"# ========== Set 2/2 (3 tracks) =========="));
        assert_eq!(lines.iter().filter(|l| l.starts_with("#SETWRIGHT:")).count(), 6);

        let export = SetsExport::from_sets(&sets, Vec::new());
        assert_eq!(export.sets.len(), 2);
        assert_eq!(export.sets[1].tracks.len(), 3);
    }

    #[test]
    fn test_write_files() {
        let dir = tempfile::tempdir().unwrap();
        let plan = plan();

        write_m3u(&plan, &dir.path().join("set.m3u")).unwrap();
        PlanExport::from_plan(&plan).write_json(&dir.path().join("set.json")).unwrap();
        assert!(dir.path().join("set.m3u").exists());
        assert!(dir.path().join("set.json").exists());
    }
}
