//! Harmonic DJ set curation: compatibility scoring, set sequencing,
//! phrase-aware hotcues and transition advice.
//!
//! Core modules:
//! - [`ingest`] - Normalises analyser output into [`profile::TrackProfile`]s
//! - [`scoring`] - Pairwise compatibility (key, tempo, energy, sonic bonus)
//! - [`hotcue`] - Beat-snapped hotcues A-H from phrase structure
//! - [`sequencer`] - Nearest-neighbour set construction along an energy arc
//! - [`advisor`] - Timing, anchoring and phrase advice per transition
//!
//! ### Supporting Modules
//!
//! - [`camelot`] - Camelot wheel keys and relations
//! - [`profile`] - Track profiles, phrase maps and cue slots
//! - [`matrix`] - Precomputed pairwise scores for a pool
//! - [`store`] - SQLite analysis cache
//! - [`export`] - JSON and extended M3U output
//! - [`config`] - TOML configuration and data paths
//! - [`batch`] - Progress and cancellation for parallel passes
//! - [`error`] - Error taxonomy
//!
//! ## Quick Start Example
//!
//! ```
//! use setwright::advisor::{advise_plan, AdvisorConfig};
//! use setwright::profile::TrackProfile;
//! use setwright::scoring::ScoringContext;
//! use setwright::sequencer::{sequence, SequenceMode};
//!
//! let pool: Vec<TrackProfile> = [("a", 122.0, "8A", 45.0), ("b", 124.0, "9A", 55.0), ("c", 125.0, "9B", 65.0)]
//!     .into_iter()
//!     .map(|(id, bpm, key, energy)| TrackProfile::new(id, bpm, key.parse().unwrap(), 320.0).with_energy(energy))
//!     .collect();
//!
//! let plan = sequence(&pool, 3, &SequenceMode::default(), &ScoringContext::default())?;
//! assert_eq!(plan.len(), 3);
//!
//! for transition in advise_plan(&plan, &AdvisorConfig::default()) {
//!     for advice in &transition.advice {
//!         println!("{} -> {}: {}", transition.from, transition.to, advice.message());
//!     }
//! }
//! # Ok::<(), setwright::error::Error>(())
//! ```
//!
//! ## Scoring
//!
//! A transition score is `w_key * key + w_tempo * tempo + w_energy * energy`
//! plus a capped sonic-affinity bonus, reported per dimension. Keys are
//! compared on the Camelot wheel (identical, relative, adjacent, energy
//! jump, distant); tempos by a half-life on the BPM difference, with 2:1
//! ratios recognised; energy by the size of the change, optionally biased
//! towards a rise or a fall.
//!
//! ## Failure Model
//!
//! Per-item failures never abort a batch. A record that cannot be ingested,
//! a pair that cannot be scored or a cue that would break ordering is
//! reported with its reason and the pass goes on. Only a pool with no
//! viable track fails sequencing.

pub mod advisor;
pub mod batch;
pub mod camelot;
pub mod config;
pub mod error;
pub mod export;
pub mod hotcue;
pub mod ingest;
pub mod matrix;
pub mod profile;
pub mod scoring;
pub mod sequencer;
pub mod store;
