//! Progress indicators with CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// A task spinner with CI fallback
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    /// Start the spinner with a message
    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("... {}", message);
        }
    }

    /// Stop with success message
    pub fn stop(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.stop(message);
        } else if self.interactive {
            println!("{} {}", style("✓").green(), message);
        } else {
            println!("[OK] {}", message);
        }
    }

    /// Stop with error message
    pub fn stop_error(&mut self, message: &str) {
        if let Some(spinner) = self.spinner.take() {
            spinner.error(message);
        } else if self.interactive {
            println!("{} {}", style("✗").red(), message);
        } else {
            println!("[FAIL] {}", message);
        }
    }
}

/// Progress bar for replaying change events
///
/// Draws an indicatif bar in interactive mode and stays silent otherwise,
/// so piped output only carries the command's report.
pub struct ReplayProgress {
    bar: Option<ProgressBar>,
}

impl ReplayProgress {
    /// `visible` lets callers suppress the bar for machine-readable output
    pub fn new(ctx: &UiContext, total: usize, visible: bool) -> Self {
        let bar = (visible && ctx.use_fancy_output()).then(|| {
            let bar = ProgressBar::new(total as u64);
            let template = ProgressStyle::default_bar()
                .template("  {spinner:.green} Replaying  {bar:20.green/dim} {pos}/{len} {msg:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("━╸─");
            bar.set_style(template);
            bar
        });
        Self { bar }
    }

    /// Advance by one event on `topic`
    pub fn on_event(&self, topic: &str) {
        if let Some(ref bar) = self.bar {
            bar.set_message(topic.to_string());
            bar.inc(1);
        }
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}
