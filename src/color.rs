//! Color codec for LED assignments.
//!
//! Scripts hand us colors as `#RRGGBB` strings (what the block editor's color
//! picker produces) or occasionally as `R,G,B` triplets. Everything is
//! normalised to a lowercase `#rrggbb` [`HexColor`] before it reaches the
//! scenario store, so run-length grouping can compare colors by value.
//! The controller wants the decimal triplet form, see [`hex_to_triplet`].

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColorError {
    #[error("malformed color '{0}': expected #RRGGBB or R,G,B")]
    Malformed(String),
    #[error("color component {0} is out of range 0..=255")]
    OutOfRange(u32),
}

fn hex_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^#([0-9a-fA-F]{2})([0-9a-fA-F]{2})([0-9a-fA-F]{2})$").unwrap())
}

fn triplet_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\s*(\d{1,3})\s*,\s*(\d{1,3})\s*,\s*(\d{1,3})\s*$").unwrap())
}

/// A validated, lowercase `#rrggbb` color.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HexColor(String);

impl HexColor {
    /// Parse `#RRGGBB` (any case) or an `R,G,B` triplet.
    pub fn parse(text: &str) -> Result<Self, ColorError> {
        let text = text.trim();
        if let Some(caps) = hex_pattern().captures(text) {
            return Ok(Self(format!("#{}{}{}", &caps[1], &caps[2], &caps[3]).to_ascii_lowercase()));
        }

        if let Some(caps) = triplet_pattern().captures(text) {
            let mut rgb = [0u8; 3];
            for (slot, idx) in rgb.iter_mut().zip(1..=3) {
                let value: u32 = caps[idx]
                    .parse()
                    .map_err(|_| ColorError::Malformed(text.to_string()))?;
                *slot = u8::try_from(value).map_err(|_| ColorError::OutOfRange(value))?;
            }
            return Ok(Self::from_rgb(rgb[0], rgb[1], rgb[2]));
        }

        Err(ColorError::Malformed(text.to_string()))
    }

    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self(format!("#{:02x}{:02x}{:02x}", r, g, b))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Red, green and blue components.
    pub fn rgb(&self) -> (u8, u8, u8) {
        // The constructor guarantees six hex digits after '#'.
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&self.0[range], 16).unwrap_or(0);
        (channel(1..3), channel(3..5), channel(5..7))
    }

    /// Decimal `R,G,B` form used on the wire.
    pub fn triplet(&self) -> String {
        let (r, g, b) = self.rgb();
        format!("{},{},{}", r, g, b)
    }
}

impl fmt::Display for HexColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for HexColor {
    type Error = ColorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HexColor> for String {
    fn from(color: HexColor) -> Self {
        color.0
    }
}

/// Convert a `#RRGGBB` string into its `"R,G,B"` decimal triplet.
///
/// Unlike a naive slice-and-parse this rejects short or non-hex input
/// instead of producing garbage.
pub fn hex_to_triplet(hex: &str) -> Result<String, ColorError> {
    let caps = hex_pattern()
        .captures(hex.trim())
        .ok_or_else(|| ColorError::Malformed(hex.to_string()))?;
    let channel = |idx: usize| u8::from_str_radix(&caps[idx], 16).map_err(|_| ColorError::Malformed(hex.to_string()));
    Ok(format!("{},{},{}", channel(1)?, channel(2)?, channel(3)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_to_triplet() {
        assert_eq!(hex_to_triplet("#ff8000").unwrap(), "255,128,0");
        assert_eq!(hex_to_triplet("#000000").unwrap(), "0,0,0");
        assert_eq!(hex_to_triplet("#FFFFFF").unwrap(), "255,255,255");
    }

    #[test]
    fn test_hex_to_triplet_rejects_short_input() {
        assert!(hex_to_triplet("#ff80").is_err());
        assert!(hex_to_triplet("").is_err());
        assert!(hex_to_triplet("#gg0000").is_err());
    }

    #[test]
    fn test_parse_normalises_case() {
        let upper = HexColor::parse("#FF00aa").unwrap();
        let lower = HexColor::parse("#ff00AA").unwrap();
        assert_eq!(upper, lower);
        assert_eq!(upper.as_str(), "#ff00aa");
    }

    #[test]
    fn test_parse_triplet() {
        let color = HexColor::parse("255, 128,0").unwrap();
        assert_eq!(color.as_str(), "#ff8000");
        assert_eq!(color.triplet(), "255,128,0");
    }

    #[test]
    fn test_parse_triplet_out_of_range() {
        assert_eq!(HexColor::parse("256,0,0"), Err(ColorError::OutOfRange(256)));
    }

    #[test]
    fn test_parse_rejects_names() {
        assert!(HexColor::parse("red").is_err());
        assert!(HexColor::parse("#f00").is_err());
    }

    #[test]
    fn test_serde_round_trip_validates() {
        let color: HexColor = serde_json::from_str("\"#00FF00\"").unwrap();
        assert_eq!(color.as_str(), "#00ff00");
        assert!(serde_json::from_str::<HexColor>("\"nope\"").is_err());
    }
}
