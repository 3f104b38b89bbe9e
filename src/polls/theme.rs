//! Poll Themes
//!
//! Closed set of visual themes a poll can carry, each mapped to a palette.
//! Unknown theme keys fall back to [`PollTheme::Default`].

use serde::{Deserialize, Serialize};
use std::fmt;

/// Visual theme tag attached to a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PollTheme {
    #[default]
    Default,
    SteelBlue,
    DarkRed,
    SeaGreen,
    Amber,
    Rose,
}

impl PollTheme {
    /// Every theme, in display order
    pub const ALL: [PollTheme; 6] = [
        PollTheme::Default,
        PollTheme::SteelBlue,
        PollTheme::DarkRed,
        PollTheme::SeaGreen,
        PollTheme::Amber,
        PollTheme::Rose,
    ];

    /// Wire key
    pub fn as_str(&self) -> &'static str {
        match self {
            PollTheme::Default => "default",
            PollTheme::SteelBlue => "steelblue",
            PollTheme::DarkRed => "darkred",
            PollTheme::SeaGreen => "seagreen",
            PollTheme::Amber => "amber",
            PollTheme::Rose => "rose",
        }
    }

    /// Human-readable label
    pub fn label(&self) -> &'static str {
        match self {
            PollTheme::Default => "Default",
            PollTheme::SteelBlue => "SteelBlue",
            PollTheme::DarkRed => "DarkRed",
            PollTheme::SeaGreen => "SeaGreen",
            PollTheme::Amber => "Amber",
            PollTheme::Rose => "Rose",
        }
    }

    /// Primary color for the theme
    pub fn primary(&self) -> Rgb {
        match self {
            PollTheme::Default => Rgb(0x30, 0x30, 0x30),
            PollTheme::SteelBlue => Rgb(0x3b, 0x61, 0x82),
            PollTheme::DarkRed => Rgb(0xa0, 0x39, 0x39),
            PollTheme::SeaGreen => Rgb(0x2e, 0x8b, 0x57),
            PollTheme::Amber => Rgb(0xb2, 0x6a, 0x00),
            PollTheme::Rose => Rgb(0xc2, 0x18, 0x5b),
        }
    }

    /// Resolve a theme key. Matching ignores case; unknown keys map to the default.
    pub fn from_key(key: &str) -> Self {
        let key = key.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(key))
            .unwrap_or_default()
    }

    /// Full palette derived from the primary color
    pub fn palette(&self) -> Palette {
        Palette::from_main(self.primary())
    }
}

impl From<String> for PollTheme {
    fn from(key: String) -> Self {
        PollTheme::from_key(&key)
    }
}

impl From<PollTheme> for String {
    fn from(theme: PollTheme) -> Self {
        theme.as_str().to_string()
    }
}

impl fmt::Display for PollTheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// 8-bit RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const WHITE: Rgb = Rgb(0xff, 0xff, 0xff);
    pub const BLACK: Rgb = Rgb(0x00, 0x00, 0x00);

    /// Parse `#rrggbb` or `#rrggbbaa` (alpha is ignored)
    pub fn parse_hex(hex: &str) -> Option<Rgb> {
        let digits = hex.strip_prefix('#').unwrap_or(hex);
        if digits.len() != 6 && digits.len() != 8 {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(digits.get(i..i + 2)?, 16).ok();
        Some(Rgb(channel(0)?, channel(2)?, channel(4)?))
    }

    /// Mix towards white by `amount` (0.0..=1.0)
    pub fn lighten(self, amount: f64) -> Rgb {
        let mix = |c: u8| (c as f64 + (255.0 - c as f64) * amount).round() as u8;
        Rgb(mix(self.0), mix(self.1), mix(self.2))
    }

    /// Mix towards black by `amount` (0.0..=1.0)
    pub fn darken(self, amount: f64) -> Rgb {
        let mix = |c: u8| (c as f64 * (1.0 - amount)).round() as u8;
        Rgb(mix(self.0), mix(self.1), mix(self.2))
    }

    /// WCAG relative luminance
    pub fn luminance(self) -> f64 {
        let linear = |c: u8| {
            let c = c as f64 / 255.0;
            if c <= 0.03928 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        };
        0.2126 * linear(self.0) + 0.7152 * linear(self.1) + 0.0722 * linear(self.2)
    }

    /// WCAG contrast ratio between two colors
    pub fn contrast_ratio(self, other: Rgb) -> f64 {
        let (a, b) = (self.luminance(), other.luminance());
        let (hi, lo) = if a > b { (a, b) } else { (b, a) };
        (hi + 0.05) / (lo + 0.05)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

/// Shades derived from a theme's primary color
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub main: Rgb,
    pub light: Rgb,
    pub dark: Rgb,
    /// Text color that stays readable on `main`
    pub contrast_text: Rgb,
}

/// Offset used to derive the light and dark shades
const TONAL_OFFSET: f64 = 0.2;
/// Minimum contrast ratio before switching to dark text
const CONTRAST_THRESHOLD: f64 = 3.0;

impl Palette {
    pub fn from_main(main: Rgb) -> Self {
        let contrast_text = if main.contrast_ratio(Rgb::WHITE) >= CONTRAST_THRESHOLD {
            Rgb::WHITE
        } else {
            Rgb::BLACK
        };
        Self {
            main,
            light: main.lighten(TONAL_OFFSET),
            dark: main.darken(TONAL_OFFSET * 1.5),
            contrast_text,
        }
    }
}
