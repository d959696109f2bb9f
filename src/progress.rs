// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Progress events sent by the worker and their terminal rendering

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::PathBuf;

use crate::retry::RetryNotice;

/// Events emitted by the worker while a run is in flight
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Run accepted `inputs` files needing about `calls` model calls
    RunStarted { inputs: usize, calls: usize },
    /// Started work on an input
    InputStarted { index: usize, total: usize, name: String },
    /// A model call is about to be made
    CallStarted { current: usize, total: usize, detail: String },
    /// Calls skipped without being made
    CallsAdvanced { current: usize, total: usize },
    /// A transient error, another attempt follows
    CallRetrying(RetryNotice),
    /// Output written
    InputFinished { name: String, output: PathBuf },
    /// Output already present, input not processed
    InputSkipped { name: String, output: PathBuf },
    /// Input failed
    InputFailed { name: String, error: String },
    /// Cancellation observed, worker is stopping
    Cancelled,
}

/// Draws [`ProgressEvent`]s as a progress bar with a detail line
pub struct ProgressRenderer {
    bar: ProgressBar,
}

impl ProgressRenderer {
    /// Create a renderer; hidden when `quiet`
    pub fn new(quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden())
        } else {
            ProgressBar::new(0)
        };

        let style = ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-");
        bar.set_style(style);
        bar.set_prefix("Ready");

        Self { bar }
    }

    /// Apply one event
    pub fn handle(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { calls, .. } => {
                self.bar.set_length(*calls as u64);
                self.bar.set_position(0);
                self.bar.set_prefix("Processing");
            }
            ProgressEvent::InputStarted { index, total, name } => {
                self.bar.set_prefix(format!("Processing {}/{}", index, total));
                self.bar.set_message(name.clone());
            }
            ProgressEvent::CallStarted { current, detail, .. } => {
                self.bar.set_position(current.saturating_sub(1) as u64);
                self.bar.set_message(detail.clone());
            }
            ProgressEvent::CallsAdvanced { current, .. } => {
                self.bar.set_position(*current as u64);
            }
            ProgressEvent::CallRetrying(notice) => {
                self.bar.set_message(format!(
                    "retrying in {:?} (attempt {}/{})",
                    notice.delay,
                    notice.attempt + 1,
                    notice.max_attempts
                ));
            }
            ProgressEvent::InputFinished { name, output } => {
                self.bar.println(format!(
                    "  ✓ Completed: {} -> {}",
                    name,
                    output.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
                ));
            }
            ProgressEvent::InputSkipped { name, .. } => {
                self.bar.println(format!("  - Skipped (output exists): {}", name));
            }
            ProgressEvent::InputFailed { name, error } => {
                self.bar.println(format!("  ✗ Error: {} - {}", name, error));
            }
            ProgressEvent::Cancelled => {
                self.bar.set_message("cancelling...");
            }
        }
    }

    /// Remove the bar once the run is over
    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}
