//! Terminal output helpers.
//!
//! Colour handling follows the NO_COLOR standard (https://no-color.org/) and the
//! CLICOLOR conventions:
//! - `NO_COLOR` set to anything disables colour
//! - `CLICOLOR_FORCE` set to anything but `0` forces colour, even when piped
//! - `CLICOLOR=0` disables colour
//!
//! Otherwise colour is used only when stdout is a terminal.

use colored::{ColoredString, Colorize, control};

/// Configure colour output for the whole process. Call early in `main`.
pub fn init_colors() {
    let is_tty = std::io::IsTerminal::is_terminal(&std::io::stdout());
    control::set_override(colors_enabled(|key| std::env::var(key).ok(), is_tty));
}

/// Whether to colour output, given an environment lookup and the TTY state of stdout.
pub fn colors_enabled<F>(lookup: F, is_tty: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    if lookup("NO_COLOR").is_some() {
        return false;
    }
    if lookup("CLICOLOR_FORCE").is_some_and(|v| v != "0") {
        return true;
    }
    if lookup("CLICOLOR").is_some_and(|v| v == "0") {
        return false;
    }
    is_tty
}

pub fn ok_mark() -> ColoredString {
    "✓".green()
}

pub fn fail_mark() -> ColoredString {
    "✗".red()
}

pub fn warn_mark() -> ColoredString {
    "⚠".yellow()
}

/// `==> title`, the section header used by every command.
pub fn heading(title: &str) -> ColoredString {
    format!("==> {}", title).bold().green()
}
