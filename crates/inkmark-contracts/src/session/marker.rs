use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Saturated colors reserved for overlay annotation. They are never meant to
/// survive into a final image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerColor {
    Red,
    Green,
    Blue,
    Yellow,
    Cyan,
    Magenta,
}

impl MarkerColor {
    pub const ALL: [MarkerColor; 6] = [
        MarkerColor::Red,
        MarkerColor::Green,
        MarkerColor::Blue,
        MarkerColor::Yellow,
        MarkerColor::Cyan,
        MarkerColor::Magenta,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MarkerColor::Red => "Red",
            MarkerColor::Green => "Green",
            MarkerColor::Blue => "Blue",
            MarkerColor::Yellow => "Yellow",
            MarkerColor::Cyan => "Cyan",
            MarkerColor::Magenta => "Magenta",
        }
    }

    pub fn uppercase(self) -> String {
        self.label().to_ascii_uppercase()
    }

    pub fn rgb(self) -> [u8; 3] {
        match self {
            MarkerColor::Red => [0xFF, 0x00, 0x00],
            MarkerColor::Green => [0x00, 0xFF, 0x00],
            MarkerColor::Blue => [0x00, 0x00, 0xFF],
            MarkerColor::Yellow => [0xFF, 0xFF, 0x00],
            MarkerColor::Cyan => [0x00, 0xFF, 0xFF],
            MarkerColor::Magenta => [0xFF, 0x00, 0xFF],
        }
    }

    pub fn hex(self) -> String {
        let [r, g, b] = self.rgb();
        format!("#{r:02X}{g:02X}{b:02X}")
    }
}

impl fmt::Display for MarkerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MarkerColor {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        MarkerColor::ALL
            .into_iter()
            .find(|color| color.label().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| {
                format!(
                    "unknown marker color '{}' (expected one of: {})",
                    raw.trim(),
                    MarkerColor::ALL
                        .iter()
                        .map(|color| color.label().to_ascii_lowercase())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

/// One region instruction sent with an edit request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskInstruction {
    pub color: MarkerColor,
    pub instruction: String,
}

impl MaskInstruction {
    pub fn new(color: MarkerColor, instruction: impl Into<String>) -> Self {
        Self {
            color,
            instruction: instruction.into(),
        }
    }

    /// `[CYAN ANNOTATION]: make the sky stormy`
    pub fn prompt_line(&self) -> String {
        format!(
            "[{} ANNOTATION]: {}",
            self.color.uppercase(),
            self.instruction.trim()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_names_case_insensitively() {
        assert_eq!("cyan".parse::<MarkerColor>(), Ok(MarkerColor::Cyan));
        assert_eq!(" MAGENTA ".parse::<MarkerColor>(), Ok(MarkerColor::Magenta));
        let err = "purple".parse::<MarkerColor>().unwrap_err();
        assert!(err.contains("unknown marker color 'purple'"));
        assert!(err.contains("red, green, blue, yellow, cyan, magenta"));
    }

    #[test]
    fn palette_is_fully_saturated() {
        assert_eq!(MarkerColor::Yellow.hex(), "#FFFF00");
        for color in MarkerColor::ALL {
            assert!(color.rgb().iter().all(|channel| *channel == 0 || *channel == 0xFF));
        }
    }

    #[test]
    fn prompt_line_uses_uppercase_label() {
        let line = MaskInstruction::new(MarkerColor::Cyan, " make the sky stormy ").prompt_line();
        assert_eq!(line, "[CYAN ANNOTATION]: make the sky stormy");
    }

    #[test]
    fn serializes_as_lowercase_name() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&MarkerColor::Red)?, "\"red\"");
        Ok(())
    }
}
