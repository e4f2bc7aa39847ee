use std::fmt;

use serde::{Deserialize, Serialize};

pub const CUSTOM_STYLE: &str = "custom";
pub const CUSTOM_BACKGROUND: &str = "custom";

pub const DEFAULT_STYLE: &str = "corporate";
pub const DEFAULT_QUANTITY: u32 = 1;
pub const DEFAULT_LIGHTING: &str = "natural";
pub const DEFAULT_SHARPNESS: &str = "medium";
pub const DEFAULT_EXPRESSION: &str = "neutral";
pub const DEFAULT_HEAD_POSITION: &str = "straight";
pub const DEFAULT_EYE_FOCUS: &str = "camera";

/// The individually gateable settings. `quantity` and `style` are gated by
/// their own policy fields, not by this list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdvancedSetting {
    Lighting,
    Background,
    Sharpness,
    Expression,
    HeadPosition,
    EyeFocus,
}

impl AdvancedSetting {
    pub const ALL: [AdvancedSetting; 6] = [
        AdvancedSetting::Lighting,
        AdvancedSetting::Background,
        AdvancedSetting::Sharpness,
        AdvancedSetting::Expression,
        AdvancedSetting::HeadPosition,
        AdvancedSetting::EyeFocus,
    ];

    /// Accepts `headPosition`, `head_position`, `head-position` in any case.
    pub fn parse(name: &str) -> Option<Self> {
        let compact: String = name
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match compact.as_str() {
            "lighting" => Some(AdvancedSetting::Lighting),
            "background" => Some(AdvancedSetting::Background),
            "sharpness" => Some(AdvancedSetting::Sharpness),
            "expression" => Some(AdvancedSetting::Expression),
            "headposition" => Some(AdvancedSetting::HeadPosition),
            "eyefocus" => Some(AdvancedSetting::EyeFocus),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdvancedSetting::Lighting => "lighting",
            AdvancedSetting::Background => "background",
            AdvancedSetting::Sharpness => "sharpness",
            AdvancedSetting::Expression => "expression",
            AdvancedSetting::HeadPosition => "headPosition",
            AdvancedSetting::EyeFocus => "eyeFocus",
        }
    }
}

impl fmt::Display for AdvancedSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Lighting {
    Intensity(u32),
    Label(String),
}

impl Default for Lighting {
    fn default() -> Self {
        Lighting::Label(DEFAULT_LIGHTING.to_string())
    }
}

/// Built per request from caller input; only the serialized form is ever
/// persisted, next to the generated images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeadshotGenerationSettings {
    pub style: String,
    pub custom_style_prompt: Option<String>,
    pub quantity: u32,
    pub lighting: Lighting,
    /// `None` lets the model pick a background.
    pub background: Option<String>,
    pub custom_color: Option<String>,
    pub sharpness: String,
    pub expression: String,
    pub head_position: String,
    pub eye_focus: String,
}

impl Default for HeadshotGenerationSettings {
    fn default() -> Self {
        Self {
            style: DEFAULT_STYLE.to_string(),
            custom_style_prompt: None,
            quantity: DEFAULT_QUANTITY,
            lighting: Lighting::default(),
            background: None,
            custom_color: None,
            sharpness: DEFAULT_SHARPNESS.to_string(),
            expression: DEFAULT_EXPRESSION.to_string(),
            head_position: DEFAULT_HEAD_POSITION.to_string(),
            eye_focus: DEFAULT_EYE_FOCUS.to_string(),
        }
    }
}

fn same_label(value: &str, default: &str) -> bool {
    value.trim().eq_ignore_ascii_case(default)
}

fn blank_or_default(value: &str, default: &str) -> bool {
    value.trim().is_empty() || same_label(value, default)
}

impl HeadshotGenerationSettings {
    pub fn is_custom_style(&self) -> bool {
        same_label(&self.style, CUSTOM_STYLE)
    }

    /// Whether `setting` still carries its default value. Blank labels count
    /// as the default.
    pub fn is_default(&self, setting: AdvancedSetting) -> bool {
        match setting {
            AdvancedSetting::Lighting => match &self.lighting {
                Lighting::Label(label) => blank_or_default(label, DEFAULT_LIGHTING),
                Lighting::Intensity(_) => false,
            },
            AdvancedSetting::Background => self
                .background
                .as_deref()
                .map(|value| value.trim().is_empty())
                .unwrap_or(true),
            AdvancedSetting::Sharpness => blank_or_default(&self.sharpness, DEFAULT_SHARPNESS),
            AdvancedSetting::Expression => blank_or_default(&self.expression, DEFAULT_EXPRESSION),
            AdvancedSetting::HeadPosition => {
                blank_or_default(&self.head_position, DEFAULT_HEAD_POSITION)
            }
            AdvancedSetting::EyeFocus => blank_or_default(&self.eye_focus, DEFAULT_EYE_FOCUS),
        }
    }

    pub fn reset(&mut self, setting: AdvancedSetting) {
        match setting {
            AdvancedSetting::Lighting => self.lighting = Lighting::default(),
            AdvancedSetting::Background => {
                self.background = None;
                self.custom_color = None;
            }
            AdvancedSetting::Sharpness => self.sharpness = DEFAULT_SHARPNESS.to_string(),
            AdvancedSetting::Expression => self.expression = DEFAULT_EXPRESSION.to_string(),
            AdvancedSetting::HeadPosition => {
                self.head_position = DEFAULT_HEAD_POSITION.to_string()
            }
            AdvancedSetting::EyeFocus => self.eye_focus = DEFAULT_EYE_FOCUS.to_string(),
        }
    }
}
