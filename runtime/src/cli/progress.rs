//! Spinners for long-running commands.

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const TICKS: &str = "\u{25b8}\u{25b9}\u{25b8}\u{25b9}\u{25b8}";

/// Spinner counting traced facilities. Hidden in quiet and json modes.
pub fn facility_progress(total: usize, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} [{pos}/{len}] {elapsed_precise} {msg}") {
        bar.set_style(style.tick_chars(TICKS));
    }
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Spinner for a single operation.
pub fn create_spinner(message: &str, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} {msg}") {
        bar.set_style(style.tick_chars(TICKS));
    }
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
