//! # Shell Completion Module
//!
//! Completion scripts come from clap; track ids for dynamic completion
//! come from the analysis cache through the hidden `complete-tracks`
//! command.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! setwright completion bash > ~/.local/share/bash-completion/completions/setwright
//!
//! # Generate zsh completions
//! setwright completion zsh > ~/.config/zsh/completions/_setwright
//! ```

use crate::cli::Shell;
use anyhow::Result;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use setwright::ingest::FeatureSource;
use std::io::{self, Write};

/// Generate shell completions for the given shell
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
}

/// Write the completion script for `shell` to stdout
pub fn print_completions(shell: Shell, cmd: &mut Command) {
    let shell = match shell {
        Shell::Bash => CompletionShell::Bash,
        Shell::Zsh => CompletionShell::Zsh,
        Shell::Fish => CompletionShell::Fish,
        Shell::PowerShell => CompletionShell::PowerShell,
        Shell::Elvish => CompletionShell::Elvish,
    };
    generate_completions(shell, cmd);
}

/// Print every cached track id, one per line.
///
/// Errors are swallowed by the caller's shell, so an unreadable cache
/// simply yields no candidates.
///
/// # Errors
///
/// Returns an error if the source cannot be read or stdout is closed.
pub fn print_track_ids(source: &dyn FeatureSource) -> Result<()> {
    let mut ids: Vec<String> = source
        .load_all()?
        .into_iter()
        .filter_map(|record| record.id.or(record.path))
        .collect();
    ids.sort();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    for id in ids {
        writeln!(out, "{id}")?;
    }
    Ok(())
}
