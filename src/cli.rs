//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `setwright` binary.
//!
//! ## Commands
//!
//! - `import`: Load analyser JSON into the analysis cache
//! - `sequence`: Build a set (or consecutive sets) from the pool and print or export it
//! - `hotcues`: Generate hotcues for one track
//! - `score`: Score one transition
//! - `matches`: Best partners for a track
//! - `advise`: Transition advice for one pair
//!
//! Features come from `--input <file.json>` when given, otherwise from the
//! analysis cache.
//!
//! ## Examples
//!
//! ```bash
//! setwright import analysis.json
//! setwright sequence -n 20 --arc classic --m3u tonight.m3u
//! setwright score track-a track-b --flow rising
//! ```

use clap::{Parser, Subcommand, ValueEnum};
use setwright::scoring::EnergyFlow;
use setwright::sequencer::EnergyArc;
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Energy arc shapes
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum ArcArg {
    /// Warm-up, build, peak, sustain, cool-down
    Classic,
    /// Keep rising to the end
    Ascending,
    /// Hold the energy level
    Flat,
    /// Peak-time energy throughout
    PeakOnly,
}

impl From<ArcArg> for EnergyArc {
    fn from(arg: ArcArg) -> Self {
        match arg {
            ArcArg::Classic => Self::Classic,
            ArcArg::Ascending => Self::Ascending,
            ArcArg::Flat => Self::Flat,
            ArcArg::PeakOnly => Self::PeakOnly,
        }
    }
}

/// Direction for the energy term
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum FlowArg {
    Symmetric,
    Rising,
    Falling,
}

impl From<FlowArg> for EnergyFlow {
    fn from(arg: FlowArg) -> Self {
        match arg {
            FlowArg::Symmetric => Self::Symmetric,
            FlowArg::Rising => Self::Rising,
            FlowArg::Falling => Self::Falling,
        }
    }
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "setwright")]
#[command(about = "Setwright: harmonic DJ set sequencing, hotcues and transition advice")]
#[command(version)]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(long, global = true, env = "SETWRIGHT_CONFIG", value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Analysis cache database [default: platform data directory]
    #[arg(long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import analysis records into the cache
    ///
    /// Accepts either a JSON list of records or an object keyed by track id.
    /// Existing records with the same id are replaced.
    Import {
        /// JSON file produced by the analyser
        #[arg(value_hint = clap::ValueHint::FilePath)]
        input: PathBuf,
    },

    /// Build a set from the pool
    ///
    /// Chains tracks by harmonic compatibility along an energy arc. Tracks
    /// that cannot be used are listed with the reason.
    Sequence {
        /// Read features from this JSON file instead of the cache
        #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
        input: Option<PathBuf>,

        /// Number of tracks in the set
        #[arg(short = 'n', long, default_value = "12")]
        count: usize,

        /// Only accept compatible keys and close tempos where possible
        #[arg(long)]
        strict_key: bool,

        /// Energy arc [default: from config]
        #[arg(long, value_enum)]
        arc: Option<ArcArg>,

        /// Start from this track id
        #[arg(long)]
        seed: Option<String>,

        /// Cut the whole pool into consecutive sets ([split] in the config)
        #[arg(long)]
        sets: bool,

        /// Cut into sets of about this many tracks (implies --sets)
        #[arg(long, value_name = "N")]
        per_set: Option<usize>,

        /// Score all pairs up front (faster for large pools)
        #[arg(long)]
        matrix: bool,

        /// Print transition advice after the set
        #[arg(long)]
        advice: bool,

        /// Write the plan as JSON
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        json: Option<PathBuf>,

        /// Write the plan as an extended M3U playlist
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        m3u: Option<PathBuf>,
    },

    /// Generate hotcues for a track
    ///
    /// Slots A-D follow the mix (mix in, energy in, mix out, mix out end);
    /// manual cues always win.
    Hotcues {
        /// Track id
        track: String,

        #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
        input: Option<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Score the transition from one track to another
    Score {
        /// Outgoing track id
        from: String,

        /// Incoming track id
        to: String,

        #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
        input: Option<PathBuf>,

        /// Energy direction to reward
        #[arg(long, value_enum, default_value = "symmetric")]
        flow: FlowArg,
    },

    /// List the best partners for a track
    Matches {
        /// Track id
        track: String,

        #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
        input: Option<PathBuf>,

        /// Number of matches to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },

    /// Transition advice for one pair
    Advise {
        /// Outgoing track id
        from: String,

        /// Incoming track id
        to: String,

        #[arg(short, long, value_hint = clap::ValueHint::FilePath)]
        input: Option<PathBuf>,

        /// Exit length in bars, overriding the track and config
        #[arg(long)]
        exit_bars: Option<u32>,
    },

    /// Print the effective configuration as TOML
    Config,

    /// Generate shell completions
    ///
    /// Usage: setwright completion bash > ~/.local/share/bash-completion/completions/setwright
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List cached track ids for completion (hidden command)
    #[command(hide = true)]
    CompleteTracks,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_per_set_flag_parses() {
        let args = Args::try_parse_from(["setwright", "sequence", "--per-set", "30"]).unwrap();
        match args.command {
            Command::Sequence { per_set, sets, .. } => {
                assert_eq!(per_set, Some(30));
                assert!(!sets);
            }
            other => panic!("Unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_sequence_flags_parse() {
        let args = Args::try_parse_from(["setwright", "sequence", "-n", "5", "--arc", "peak-only", "--strict-key"]).unwrap();
        match args.command {
            Command::Sequence { count, arc, strict_key, .. } => {
                assert_eq!(count, 5);
                assert_eq!(arc, Some(ArcArg::PeakOnly));
                assert!(strict_key);
            }
            other => panic!("Unexpected command: {other:?}"),
        }
    }
}
