//! Terminal colors for the companion.

use companion_core::profile::Colors;
use crossterm::style::{Attribute, Color};

/// Foreground color and intensity for one kind of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStyle {
    pub color: Color,
    pub attributes: &'static [Attribute],
}

impl TextStyle {
    pub const fn new(color: Color, attributes: &'static [Attribute]) -> Self {
        Self { color, attributes }
    }
}

/// Styles for a character's spoken text and narration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterTheme {
    pub speech: TextStyle,
    pub narration: TextStyle,
    pub name_label: TextStyle,
}

impl Default for CharacterTheme {
    fn default() -> Self {
        Self {
            speech: TextStyle::new(Color::Grey, &[Attribute::NormalIntensity]),
            narration: TextStyle::new(Color::DarkGrey, &[Attribute::Bold, Attribute::Italic]),
            name_label: TextStyle::new(Color::Magenta, &[Attribute::Bold]),
        }
    }
}

impl CharacterTheme {
    /// Theme from a profile's `colors` block. Unknown names keep the defaults.
    pub fn from_colors(colors: &Colors) -> Self {
        let mut theme = Self::default();
        if let Some(color) = colors.text.as_deref().and_then(parse_color) {
            theme.speech.color = color;
        }
        if let Some(attributes) = colors.label.as_deref().and_then(parse_intensity) {
            theme.speech.attributes = attributes;
        }
        theme
    }
}

/// Parse a color name as written in profiles (`"magenta"`, `"LIGHTCYAN_EX"`).
pub fn parse_color(name: &str) -> Option<Color> {
    let color = match name.trim().to_ascii_uppercase().as_str() {
        "BLACK" => Color::Black,
        "RED" => Color::DarkRed,
        "GREEN" => Color::DarkGreen,
        "YELLOW" => Color::DarkYellow,
        "BLUE" => Color::DarkBlue,
        "MAGENTA" => Color::DarkMagenta,
        "CYAN" => Color::DarkCyan,
        "WHITE" => Color::Grey,
        "LIGHTBLACK_EX" | "GRAY" | "GREY" => Color::DarkGrey,
        "LIGHTRED_EX" => Color::Red,
        "LIGHTGREEN_EX" => Color::Green,
        "LIGHTYELLOW_EX" => Color::Yellow,
        "LIGHTBLUE_EX" => Color::Blue,
        "LIGHTMAGENTA_EX" => Color::Magenta,
        "LIGHTCYAN_EX" => Color::Cyan,
        "LIGHTWHITE_EX" => Color::White,
        _ => return None,
    };
    Some(color)
}

fn parse_intensity(name: &str) -> Option<&'static [Attribute]> {
    match name.trim().to_ascii_uppercase().as_str() {
        "BRIGHT" => Some(&[Attribute::Bold]),
        "DIM" => Some(&[Attribute::Dim]),
        "NORMAL" => Some(&[Attribute::NormalIntensity]),
        _ => None,
    }
}
