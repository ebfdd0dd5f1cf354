//! Colored terminal output

use std::fmt::Display;

use owo_colors::{OwoColorize, colors::css};
use supports_color::Stream;

/// Whether stdout should receive ANSI colors.
pub fn color_enabled() -> bool {
    supports_color::on(Stream::Stdout).is_some()
}

fn paint<T>(text: &T, style: impl FnOnce(&str) -> String) -> String
where
    T: Display + ?Sized,
{
    let text = text.to_string();
    if color_enabled() { style(&text) } else { text }
}

/// Extension trait for colorizing output
pub trait Colorize: Display {
    /// Green
    fn success(&self) -> String {
        paint(self, |s| s.fg::<css::Green>().to_string())
    }

    /// Amber
    fn warning(&self) -> String {
        paint(self, |s| s.fg::<css::Orange>().to_string())
    }

    /// Red
    fn failure(&self) -> String {
        paint(self, |s| s.fg::<css::Red>().to_string())
    }

    /// Dimmed
    fn dim(&self) -> String {
        paint(self, |s| s.dimmed().to_string())
    }
}

impl<T: Display + ?Sized> Colorize for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_text() {
        for styled in ["tree".success(), "tree".warning(), "tree".failure(), "tree".dim()] {
            assert!(styled.contains("tree"));
        }
    }
}
