//! # Setwright
//!
//! Command-line front end for the set curation core: imports analyser
//! output, builds sets, generates hotcues and explains transitions.
//!
//! ## Usage
//!
//! ```bash
//! # Cache analyser output
//! setwright import analysis.json
//!
//! # Build a 20-track set and export it
//! setwright sequence -n 20 --json set.json --m3u set.m3u
//!
//! # Cut the whole pool into sets of about 40 tracks
//! setwright sequence --per-set 40 --m3u night.m3u
//!
//! # Inspect one transition
//! setwright score track-a track-b
//! setwright advise track-a track-b
//! ```

mod cli;
mod completion;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info, warn};
use setwright::advisor::{self, AdvisorConfig};
use setwright::batch::BatchControl;
use setwright::config::{self, AppConfig};
use setwright::error::SequencingSkip;
use setwright::export::{self, PlanExport, SetsExport};
use setwright::hotcue;
use setwright::ingest::{self, FeatureSource, IngestReport, JsonFeatureCache};
use setwright::matrix::CompatibilityMatrix;
use setwright::profile::TrackProfile;
use setwright::scoring::{self, statistics, Dimension, PairScorer};
use setwright::sequencer::{MultiSetPlan, SequenceMode, SetPlan, SetSplit, Sequencer};
use setwright::store::AnalysisStore;
use std::path::Path;

fn open_store(db: Option<&Path>) -> Result<AnalysisStore> {
    let path = match db {
        Some(path) => path.to_path_buf(),
        None => config::get_db_path()?,
    };
    AnalysisStore::open(&path).with_context(|| format!("Failed to open analysis cache at {}", path.display()))
}

/// JSON file when given, otherwise the analysis cache
fn open_source(input: Option<&Path>, db: Option<&Path>) -> Result<Box<dyn FeatureSource>> {
    match input {
        Some(path) => {
            let cache = JsonFeatureCache::from_path(path)
                .with_context(|| format!("Failed to read features from {}", path.display()))?;
            Ok(Box::new(cache))
        }
        None => Ok(Box::new(open_store(db)?)),
    }
}

fn progress() -> BatchControl {
    BatchControl::new().with_progress(|done, total| debug!("{done}/{total}"))
}

fn load_pool(source: &dyn FeatureSource) -> Result<IngestReport> {
    let report = ingest::ingest_all(source, &progress())?;
    for failure in &report.failures {
        warn!("{failure}");
    }
    for notice in &report.notices {
        info!("{notice}");
    }
    info!("{} usable tracks, {} rejected", report.profiles.len(), report.failures.len());
    Ok(report)
}

fn find<'a>(profiles: &'a [TrackProfile], id: &str) -> Result<&'a TrackProfile> {
    profiles
        .iter()
        .find(|p| p.id == id)
        .ok_or_else(|| anyhow::anyhow!("Track `{id}` not found or not usable (RUST_LOG=warn shows rejected records)"))
}

fn print_plan(plan: &SetPlan) {
    for entry in &plan.entries {
        let p = &entry.profile;
        let energy = p.energy.map_or_else(|| "  -".to_string(), |e| format!("{e:>3.0}"));
        let transition = entry
            .incoming
            .as_ref()
            .map_or_else(String::new, |s| format!("  {:.1} ({})", s.total, s.relationship));
        println!(
            "{:>3}. {:>3} {:>6.1} E{energy} {:<9}  {} - {}  [in {:.1}s, out {:.1}s]{transition}",
            entry.position + 1,
            p.key.to_string(),
            p.bpm,
            entry.phase.name.to_string(),
            if p.artist.is_empty() { "Unknown" } else { p.artist.as_str() },
            p.title,
            entry.mix_in,
            entry.mix_out,
        );
    }

    if plan.shortfall() > 0 {
        println!("\nRequested {} tracks, placed {}.", plan.requested, plan.entries.len());
    }
    if let Some(stats) = statistics::analyze_transitions(plan) {
        println!(
            "\nTransitions: mean {:.1}, min {:.1}, max {:.1}, std dev {:.1}",
            stats.mean, stats.min, stats.max, stats.std_deviation
        );
    }
    for relaxation in &plan.relaxations {
        println!("Relaxed {} at position {}", relaxation.constraint, relaxation.position + 1);
    }
    if !plan.skipped.is_empty() {
        println!("\nSkipped {}:", plan.skipped.len());
        for skip in &plan.skipped {
            println!("  {skip}");
        }
    }
}

fn print_advice(advice: &[advisor::TransitionAdvice]) {
    for transition in advice {
        println!("\n{} -> {}", transition.from, transition.to);
        for item in &transition.advice {
            println!("  [{}] {}", item.category(), item.message());
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_sets(
    config: &AppConfig,
    source: &dyn FeatureSource,
    split: &SetSplit,
    mode: &SequenceMode,
    use_matrix: bool,
    show_advice: bool,
    json: Option<&Path>,
    m3u: Option<&Path>,
) -> Result<()> {
    let control = progress();
    let report = load_pool(source)?;
    let matrix;
    let scorer: &dyn PairScorer = if use_matrix {
        matrix = CompatibilityMatrix::build(&report.profiles, &config.scoring, &control);
        &matrix
    } else {
        &config.scoring
    };

    let mut sets: MultiSetPlan = Sequencer::new(scorer)
        .with_hotcue_config(config.hotcue.clone())
        .sequence_sets(&report.profiles, split, mode, &control)?;
    let mut skipped: Vec<SequencingSkip> = report.failures.into_iter().map(SequencingSkip::from).collect();
    skipped.append(&mut sets.skipped);
    sets.skipped = skipped;

    let total = sets.sets.len();
    let mut advice = Vec::with_capacity(total);
    for (index, plan) in sets.sets.iter().enumerate() {
        println!("\n== Set {}/{total} ({} tracks) ==", index + 1, plan.len());
        print_plan(plan);
        let set_advice = advisor::advise_plan(plan, &config.advisor);
        if show_advice {
            print_advice(&set_advice);
        }
        advice.push(set_advice);
    }
    if !sets.unused.is_empty() {
        println!("\nUnused {}: {}", sets.unused.len(), sets.unused.join(", "));
    }
    if !sets.skipped.is_empty() {
        println!("\nSkipped {}:", sets.skipped.len());
        for skip in &sets.skipped {
            println!("  {skip}");
        }
    }

    if let Some(path) = m3u {
        export::write_m3u_sets(&sets, path)?;
    }
    if let Some(path) = json {
        SetsExport::from_sets(&sets, advice).write_json(path)?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_sequence(
    config: &AppConfig,
    source: &dyn FeatureSource,
    count: usize,
    strict_key: bool,
    arc: Option<cli::ArcArg>,
    seed: Option<String>,
    split: Option<SetSplit>,
    use_matrix: bool,
    show_advice: bool,
    json: Option<&Path>,
    m3u: Option<&Path>,
) -> Result<()> {
    let mut mode = config.sequencer.clone();
    mode.strict_key_continuity |= strict_key;
    if let Some(arc) = arc {
        mode.energy_arc = arc.into();
    }
    if seed.is_some() {
        mode.forced_seed = seed;
    }
    if let Some(split) = split {
        return run_sets(config, source, &split, &mode, use_matrix, show_advice, json, m3u);
    }

    let control = progress();
    let plan = if use_matrix {
        let report = load_pool(source)?;
        let matrix = CompatibilityMatrix::build(&report.profiles, &config.scoring, &control);
        let mut plan = Sequencer::new(&matrix)
            .with_hotcue_config(config.hotcue.clone())
            .sequence_with_control(&report.profiles, count, &mode, &control)?;
        let mut skipped: Vec<SequencingSkip> = report.failures.into_iter().map(SequencingSkip::from).collect();
        skipped.append(&mut plan.skipped);
        plan.skipped = skipped;
        plan
    } else {
        Sequencer::new(&config.scoring)
            .with_hotcue_config(config.hotcue.clone())
            .sequence_records(source, count, &mode, &control)?
    };

    print_plan(&plan);

    let advice = advisor::advise_plan(&plan, &config.advisor);
    if show_advice {
        print_advice(&advice);
    }
    if let Some(path) = json {
        PlanExport::from_plan(&plan).with_advice(advice).write_json(path)?;
    }
    if let Some(path) = m3u {
        export::write_m3u(&plan, path)?;
    }
    Ok(())
}

fn run_hotcues(config: &AppConfig, source: &dyn FeatureSource, track: &str, as_json: bool) -> Result<()> {
    let report = load_pool(source)?;
    let profile = find(&report.profiles, track)?;
    let outcome = hotcue::generate_for(profile, &config.hotcue)?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }
    println!("{} ({:.1} BPM, {:.1}s)", profile.title, profile.bpm, profile.duration);
    for (slot, cue) in outcome.cues.iter() {
        println!("  {slot}  {:>8.3}s  {:<12} {:?}", cue.start, cue.label, cue.source);
    }
    for memory in &outcome.memory_cues {
        println!("  -  {:>8.3}s  {}", memory.start, memory.label);
    }
    for dropped in &outcome.dropped {
        println!("  dropped: {dropped}");
    }
    Ok(())
}

fn run_score(config: &AppConfig, source: &dyn FeatureSource, from: &str, to: &str, flow: cli::FlowArg) -> Result<()> {
    let report = load_pool(source)?;
    let (a, b) = (find(&report.profiles, from)?, find(&report.profiles, to)?);
    let result = scoring::score_with_flow(a, b, flow.into(), &config.scoring)?;

    println!("{} -> {}: {:.2}", result.from, result.to, result.total);
    println!("  key      {:>6.2}  ({})", result.contribution(Dimension::Key), result.relationship);
    println!(
        "  tempo    {:>6.2}  ({:?}, {:.2} BPM apart)",
        result.contribution(Dimension::Tempo),
        result.tempo_relation,
        result.bpm_delta
    );
    println!("  energy   {:>6.2}  ({:?})", result.contribution(Dimension::Energy), result.flow);
    println!("  sonic    {:>6.2}  {}", result.contribution(Dimension::SonicAffinity), result.sonic_matches.join(", "));
    Ok(())
}

fn run_matches(config: &AppConfig, source: &dyn FeatureSource, track: &str, limit: usize) -> Result<()> {
    let report = load_pool(source)?;
    find(&report.profiles, track)?;
    let matrix = CompatibilityMatrix::build(&report.profiles, &config.scoring, &progress());

    for (rank, score) in matrix.best_matches(track, limit).iter().enumerate() {
        println!("{:>3}. {:<32} {:>6.2}  {:<11} {:.1} BPM apart", rank + 1, score.to, score.total, score.relationship.label(), score.bpm_delta);
    }
    Ok(())
}

fn run_advise(
    config: &AdvisorConfig,
    hotcue_config: &hotcue::HotcueConfig,
    source: &dyn FeatureSource,
    from: &str,
    to: &str,
    exit_bars: Option<u32>,
) -> Result<()> {
    let report = load_pool(source)?;
    let (a, b) = (find(&report.profiles, from)?, find(&report.profiles, to)?);
    let cues_a = hotcue::generate_for(a, hotcue_config)?.cues;
    let cues_b = hotcue::generate_for(b, hotcue_config)?.cues;

    let mut exit = config.exit_spec_for(a);
    if exit_bars.is_some() {
        exit.exit_bars = exit_bars;
    }
    let advice = advisor::advise(a, &cues_a, &exit, b, &cues_b, config);
    if advice.is_empty() {
        println!("No advice for {from} -> {to}");
    }
    for item in &advice {
        println!("[{}] {}", item.category(), item.message());
    }
    Ok(())
}

/// Main entry point for setwright.
///
/// Logging is controlled with `RUST_LOG`, e.g. `RUST_LOG=setwright=debug`.
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();
    let db = args.db.as_deref();

    // These must work without a readable config
    match &args.command {
        cli::Command::Completion { shell } => {
            completion::print_completions(*shell, &mut cli::Args::command());
            return Ok(());
        }
        cli::Command::CompleteTracks => {
            if let Ok(store) = open_store(db) {
                let _ = completion::print_track_ids(&store);
            }
            return Ok(());
        }
        _ => {}
    }

    let (config, config_path) = AppConfig::load(args.config.as_deref())?;
    if let Some(path) = &config_path {
        debug!("Using config {}", path.display());
    }

    match args.command {
        cli::Command::Import { input } => {
            info!("Importing analysis records from: {}", input.display());
            let cache = JsonFeatureCache::from_path(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let records = cache.load_all()?;
            let check = ingest::ingest_records(&records, &BatchControl::new());
            for failure in &check.failures {
                warn!("Imported but not usable: {failure}");
            }
            let mut store = open_store(db)?;
            let stored = store.put_all(&records)?;
            println!("Imported {stored} records ({} usable)", check.profiles.len());
        }
        cli::Command::Sequence { input, count, strict_key, arc, seed, sets, per_set, matrix, advice, json, m3u } => {
            let source = open_source(input.as_deref(), db)?;
            let split = match per_set {
                Some(n) => Some(SetSplit::around(n)),
                None => sets.then_some(config.split),
            };
            run_sequence(
                &config,
                source.as_ref(),
                count,
                strict_key,
                arc,
                seed,
                split,
                matrix,
                advice,
                json.as_deref(),
                m3u.as_deref(),
            )?;
        }
        cli::Command::Hotcues { track, input, json } => {
            let source = open_source(input.as_deref(), db)?;
            run_hotcues(&config, source.as_ref(), &track, json)?;
        }
        cli::Command::Score { from, to, input, flow } => {
            let source = open_source(input.as_deref(), db)?;
            run_score(&config, source.as_ref(), &from, &to, flow)?;
        }
        cli::Command::Matches { track, input, limit } => {
            let source = open_source(input.as_deref(), db)?;
            run_matches(&config, source.as_ref(), &track, limit)?;
        }
        cli::Command::Advise { from, to, input, exit_bars } => {
            let source = open_source(input.as_deref(), db)?;
            run_advise(&config.advisor, &config.hotcue, source.as_ref(), &from, &to, exit_bars)?;
        }
        cli::Command::Config => {
            print!("{}", config.to_toml_string()?);
        }
        cli::Command::Completion { .. } | cli::Command::CompleteTracks => {}
    }

    Ok(())
}
