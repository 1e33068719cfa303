// src/style.rs - cosmetic style record read by the render pipeline
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Linear RGB color with an opacity, components in [0,1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tint {
    pub color: [f32; 3],
    pub opacity: f32,
}

impl Tint {
    pub const fn new(r: f32, g: f32, b: f32, opacity: f32) -> Self {
        Self {
            color: [r, g, b],
            opacity,
        }
    }

    pub const fn off() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    pub fn is_enabled(&self) -> bool {
        self.opacity > 0.0
    }

    fn clamped(self) -> Self {
        Self {
            color: self.color.map(|c| c.clamp(0.0, 1.0)),
            opacity: self.opacity.clamp(0.0, 1.0),
        }
    }

    /// `[r, g, b, opacity]` for uniform upload.
    pub fn to_array(&self) -> [f32; 4] {
        [self.color[0], self.color[1], self.color[2], self.opacity]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoundationStyle {
    pub tint: [f32; 3],
    /// How far skin chroma moves toward the tint.
    pub coverage: f32,
    /// Blend toward the blurred reference in smooth skin areas.
    pub smoothing: f32,
    /// Lift applied to locally darker patches.
    pub concealer: f32,
}

impl Default for FoundationStyle {
    fn default() -> Self {
        Self {
            tint: [0.87, 0.70, 0.60],
            coverage: 0.25,
            smoothing: 0.35,
            concealer: 0.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SculptStyle {
    pub contour_strength: f32,
    pub highlight_strength: f32,
    /// Shade override; `None` adapts to the measured skin tone.
    pub contour_shade: Option<[f32; 3]>,
    pub highlight_shade: Option<[f32; 3]>,
}

impl Default for SculptStyle {
    fn default() -> Self {
        Self {
            contour_strength: 0.45,
            highlight_strength: 0.35,
            contour_shade: None,
            highlight_shade: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SparkleStyle {
    pub density: f32,
    pub intensity: f32,
    /// Cell size in output pixels.
    pub cell_px: f32,
}

impl Default for SparkleStyle {
    fn default() -> Self {
        Self {
            density: 0.0,
            intensity: 0.0,
            cell_px: 3.0,
        }
    }
}

/// One cosmetic look. Immutable once handed to the engine; replace the whole
/// value to change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StyleParameters {
    pub name: String,
    pub lips: Tint,
    /// Gloss highlight on the lower lip.
    pub lip_gloss: f32,
    /// Inner (near the nose) shade; the outer corner uses `eyeshadow_outer`.
    pub eyeshadow: Tint,
    pub eyeshadow_outer: [f32; 3],
    pub blush: Tint,
    pub liner: Tint,
    pub sparkle: SparkleStyle,
    pub foundation: FoundationStyle,
    pub sculpt: SculptStyle,
}

impl Default for StyleParameters {
    fn default() -> Self {
        Self {
            name: "natural".to_string(),
            lips: Tint::new(0.72, 0.22, 0.30, 0.68),
            lip_gloss: 0.25,
            eyeshadow: Tint::new(0.62, 0.45, 0.40, 0.40),
            eyeshadow_outer: [0.40, 0.27, 0.25],
            blush: Tint::new(0.90, 0.45, 0.45, 0.30),
            liner: Tint::new(0.08, 0.06, 0.06, 0.75),
            sparkle: SparkleStyle::default(),
            foundation: FoundationStyle::default(),
            sculpt: SculptStyle::default(),
        }
    }
}

impl StyleParameters {
    /// Every effect disabled; the output is the camera image.
    pub fn bare() -> Self {
        Self {
            name: "bare".to_string(),
            lips: Tint::off(),
            lip_gloss: 0.0,
            eyeshadow: Tint::off(),
            eyeshadow_outer: [0.0; 3],
            blush: Tint::off(),
            liner: Tint::off(),
            sparkle: SparkleStyle::default(),
            foundation: FoundationStyle {
                coverage: 0.0,
                smoothing: 0.0,
                concealer: 0.0,
                ..FoundationStyle::default()
            },
            sculpt: SculptStyle {
                contour_strength: 0.0,
                highlight_strength: 0.0,
                ..SculptStyle::default()
            },
        }
    }

    pub fn evening() -> Self {
        Self {
            name: "evening".to_string(),
            lips: Tint::new(0.55, 0.05, 0.12, 0.85),
            lip_gloss: 0.4,
            eyeshadow: Tint::new(0.45, 0.30, 0.42, 0.60),
            eyeshadow_outer: [0.18, 0.10, 0.20],
            liner: Tint::new(0.02, 0.02, 0.02, 0.95),
            sparkle: SparkleStyle {
                density: 0.04,
                intensity: 0.6,
                cell_px: 3.0,
            },
            sculpt: SculptStyle {
                contour_strength: 0.65,
                highlight_strength: 0.5,
                ..SculptStyle::default()
            },
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let style: Self = serde_json::from_str(text)
            .map_err(|e| PipelineError::config(format!("style: {e}")))?;
        Ok(style.clamped())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| PipelineError::config(format!("style: {e}")))
    }

    /// Every weight and color clamped into [0,1].
    pub fn clamped(&self) -> Self {
        let unit = |v: f32| v.clamp(0.0, 1.0);
        let rgb = |c: [f32; 3]| c.map(unit);
        Self {
            name: self.name.clone(),
            lips: self.lips.clamped(),
            lip_gloss: unit(self.lip_gloss),
            eyeshadow: self.eyeshadow.clamped(),
            eyeshadow_outer: rgb(self.eyeshadow_outer),
            blush: self.blush.clamped(),
            liner: self.liner.clamped(),
            sparkle: SparkleStyle {
                density: unit(self.sparkle.density),
                intensity: unit(self.sparkle.intensity),
                cell_px: self.sparkle.cell_px.clamp(1.0, 64.0),
            },
            foundation: FoundationStyle {
                tint: rgb(self.foundation.tint),
                coverage: unit(self.foundation.coverage),
                smoothing: unit(self.foundation.smoothing),
                concealer: unit(self.foundation.concealer),
            },
            sculpt: SculptStyle {
                contour_strength: unit(self.sculpt.contour_strength),
                highlight_strength: unit(self.sculpt.highlight_strength),
                contour_shade: self.sculpt.contour_shade.map(rgb),
                highlight_shade: self.sculpt.highlight_shade.map(rgb),
            },
        }
    }

    pub fn sparkle_enabled(&self) -> bool {
        self.sparkle.density > 0.0 && self.sparkle.intensity > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_lipstick_matches_the_reference_look() {
        let style = StyleParameters::default();
        assert_eq!(style.lips.opacity, 0.68);
        assert!(!style.sparkle_enabled());
        assert!(StyleParameters::evening().sparkle_enabled());
    }

    #[test]
    fn json_overrides_are_partial_and_clamped() {
        let style = StyleParameters::from_json(
            r#"{ "name": "bold", "lips": { "color": [1.4, 0.1, 0.2], "opacity": 2.0 } }"#,
        )
        .unwrap();
        assert_eq!(style.name, "bold");
        assert_eq!(style.lips.color[0], 1.0);
        assert_eq!(style.lips.opacity, 1.0);
        assert_eq!(style.blush, StyleParameters::default().blush);
    }

    #[test]
    fn json_round_trip_keeps_shade_overrides() {
        let mut style = StyleParameters::evening();
        style.sculpt.contour_shade = Some([0.3, 0.2, 0.15]);
        let back = StyleParameters::from_json(&style.to_json().unwrap()).unwrap();
        assert_eq!(back, style);
    }

    #[test]
    fn malformed_style_is_a_config_error() {
        assert!(matches!(
            StyleParameters::from_json("[1, 2"),
            Err(PipelineError::Config(_))
        ));
    }

    #[test]
    fn bare_disables_everything() {
        let bare = StyleParameters::bare();
        assert!(!bare.lips.is_enabled());
        assert!(!bare.blush.is_enabled());
        assert_eq!(bare.sculpt.contour_strength, 0.0);
    }
}
