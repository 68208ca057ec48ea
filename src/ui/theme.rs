//! Custom theme for cliclack output

use cliclack::ThemeState;
use console::Style;

/// Handlekeep theme: green bars, red on errors
#[derive(Debug, Clone, Default)]
pub struct HandlekeepTheme;

impl cliclack::Theme for HandlekeepTheme {
    fn bar_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().green(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().green().dim(),
        }
    }

    fn state_symbol_color(&self, state: &ThemeState) -> Style {
        match state {
            ThemeState::Active => Style::new().green(),
            ThemeState::Error(_) => Style::new().red(),
            ThemeState::Cancel => Style::new().dim(),
            ThemeState::Submit => Style::new().cyan(),
        }
    }
}

/// Initialize the global theme
pub fn init_theme() {
    cliclack::set_theme(HandlekeepTheme);
}
