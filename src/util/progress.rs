//! Progress indicators for long-running sync operations.
//!
//! Bars and spinners are shown only when stderr is an interactive
//! terminal, so piped and scheduled runs stay clean.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{IsTerminal, stderr};
use std::time::Duration;

/// Whether progress indicators should be rendered at all.
#[must_use]
pub fn should_show_progress() -> bool {
    stderr().is_terminal()
}

/// Determinate progress bar for a known operation count.
///
/// # Panics
///
/// Panics if the progress bar template string is invalid.
#[must_use]
pub fn create_progress_bar(total: u64, message: &str, show: bool) -> ProgressBar {
    let pb = ProgressBar::new(total);

    if show {
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .expect("valid template")
                .progress_chars("=>-"),
        );
        pb.set_message(message.to_string());
    } else {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    pb
}

/// Spinner for indeterminate operations (tracker calls, scans).
///
/// # Panics
///
/// Panics if the spinner template string is invalid.
#[must_use]
pub fn create_spinner(message: &str, show: bool) -> ProgressBar {
    let pb = ProgressBar::new_spinner();

    if show {
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .expect("valid template"),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
    } else {
        pb.set_draw_target(ProgressDrawTarget::hidden());
    }

    pb
}

/// Multi-progress container for the portfolio executor's parallel
/// project runs.
#[must_use]
pub fn create_multi_progress(show: bool) -> MultiProgress {
    let multi = MultiProgress::new();
    if !show {
        multi.set_draw_target(ProgressDrawTarget::hidden());
    }
    multi
}
