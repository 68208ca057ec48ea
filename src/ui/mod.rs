//! Terminal output for the handlekeep CLI
//!
//! Uses `cliclack` for styled step output in interactive terminals, with
//! automatic fallback to plain lines in CI and when output is piped.
//!
//! # Example
//!
//! ```rust,ignore
//! use handlekeep::ui::{self, TaskSpinner, UiContext};
//!
//! let ctx = UiContext::detect();
//! let mut spinner = TaskSpinner::new(&ctx);
//! spinner.start("Scanning...");
//! spinner.stop("Scanned");
//! ui::key_value(&ctx, "status", "fresh");
//! ```

mod context;
mod output;
mod progress;
mod theme;

pub use context::UiContext;
pub use output::{key_value, section, step_ok_detail, step_warn, step_warn_hint};
pub use progress::{ReplayProgress, TaskSpinner};
pub use theme::{init_theme, HandlekeepTheme};
