use palette::{Hsl, IntoColor, Srgb};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    #[default]
    Spectrum,
    Calm,
    Warm,
    /// Green to red by bar height, like a level meter
    Meter,
    Monochrome,
}

impl FromStr for ColorScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spectrum" => Ok(Self::Spectrum),
            "calm" => Ok(Self::Calm),
            "warm" => Ok(Self::Warm),
            "meter" => Ok(Self::Meter),
            "mono" | "monochrome" => Ok(Self::Monochrome),
            _ => Err(format!("Unknown color scheme: {}", s)),
        }
    }
}

impl ColorScheme {
    /// Color for a bar at `position` (0.0 low bins to 1.0 high bins), at
    /// `height` (0.0 bottom to 1.0 top of the surface).
    pub fn get_color(&self, position: f32, height: f32) -> (u8, u8, u8) {
        let position = position.clamp(0.0, 1.0);
        let height = height.clamp(0.0, 1.0);
        let (h, s, l) = match self {
            ColorScheme::Spectrum => (270.0 - position * 270.0, 0.9, 0.4 + height * 0.3),
            ColorScheme::Calm => (200.0 - position * 40.0, 0.7, 0.35 + height * 0.3),
            ColorScheme::Warm => (position * 50.0, 0.9, 0.35 + height * 0.35),
            // 120 (green) at the bottom, 0 (red) near the top
            ColorScheme::Meter => (120.0 - height * 120.0, 0.85, 0.45),
            ColorScheme::Monochrome => (0.0, 0.0, 0.3 + height * 0.6),
        };

        let rgb: Srgb = Hsl::new(h, s, l).into_color();
        (
            (rgb.red.clamp(0.0, 1.0) * 255.0) as u8,
            (rgb.green.clamp(0.0, 1.0) * 255.0) as u8,
            (rgb.blue.clamp(0.0, 1.0) * 255.0) as u8,
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            ColorScheme::Spectrum => "spectrum",
            ColorScheme::Calm => "calm",
            ColorScheme::Warm => "warm",
            ColorScheme::Meter => "meter",
            ColorScheme::Monochrome => "monochrome",
        }
    }

    pub fn all() -> &'static [ColorScheme] {
        &[
            ColorScheme::Spectrum,
            ColorScheme::Calm,
            ColorScheme::Warm,
            ColorScheme::Meter,
            ColorScheme::Monochrome,
        ]
    }

    pub fn next(&self) -> Self {
        let all = Self::all();
        let current = all.iter().position(|c| c == self).unwrap_or(0);
        all[(current + 1) % all.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_name_agree() {
        for scheme in ColorScheme::all() {
            assert_eq!(scheme.name().parse::<ColorScheme>().unwrap(), *scheme);
        }
        assert_eq!("MONO".parse::<ColorScheme>().unwrap(), ColorScheme::Monochrome);
        assert!("plaid".parse::<ColorScheme>().is_err());
    }

    #[test]
    fn test_next_cycles() {
        let mut scheme = ColorScheme::Spectrum;
        for _ in 0..ColorScheme::all().len() {
            scheme = scheme.next();
        }
        assert_eq!(scheme, ColorScheme::Spectrum);
    }

    #[test]
    fn test_meter_goes_green_to_red() {
        let (r0, g0, _) = ColorScheme::Meter.get_color(0.5, 0.0);
        let (r1, g1, _) = ColorScheme::Meter.get_color(0.5, 1.0);
        assert!(g0 > r0);
        assert!(r1 > g1);
    }
}
