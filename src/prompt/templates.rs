use std::collections::HashMap;

use anyhow::{bail, Result};

use crate::config::{source_string, ConfigSource};

pub const QUANTITY_RETURN_TOKEN: &str = "{quantity_return}";

const DEFAULT_BASE_TEMPLATE: &str =
    "Create {quantity_text} {style} headshot photo{plural} of the person in this image.";

const DEFAULT_FACE_PRESERVATION: &str = "Preserve the person's exact facial features, skin tone, \
     and identity from the original photo; do not alter facial identity in any way.";

const DEFAULT_ADDITIONAL_INSTRUCTIONS: &str = "Return exactly {quantity_return} separate \
     image(s), one headshot per image, with no collage, borders, or text overlays.";

/// Predefined styles with their built-in phrasing. Each can be replaced by
/// `GEMINI_STYLE_<STYLE>`.
pub const PREDEFINED_STYLES: &[(&str, &str)] = &[
    (
        "corporate",
        "professional corporate style with a tailored business suit and a clean office backdrop",
    ),
    (
        "casual",
        "relaxed casual style with smart everyday clothing and soft natural surroundings",
    ),
    (
        "business",
        "polished business style with formal attire suitable for a company website",
    ),
    (
        "creative",
        "modern creative-professional style with expressive wardrobe and an artistic studio setting",
    ),
    (
        "tech",
        "contemporary tech-industry style with smart casual clothing and a bright modern workspace",
    ),
    (
        "cinematic",
        "cinematic style with film-grade color grading and shallow depth of field",
    ),
    (
        "artistic",
        "fine-art portrait style with painterly light and refined composition",
    ),
    (
        "vintage",
        "vintage style with warm film tones and classic portrait composition",
    ),
    (
        "outdoor",
        "outdoor environmental style with natural daylight and a softly blurred landscape",
    ),
    (
        "studio",
        "classic studio style with a seamless backdrop and controlled three-point lighting",
    ),
];

const CUSTOM_STYLE_FALLBACK: &str = "professional, custom-styled";

#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplates {
    pub base_template: String,
    pub face_preservation: String,
    pub additional_instructions: String,
    style_phrases: HashMap<String, String>,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            base_template: DEFAULT_BASE_TEMPLATE.to_string(),
            face_preservation: DEFAULT_FACE_PRESERVATION.to_string(),
            additional_instructions: DEFAULT_ADDITIONAL_INSTRUCTIONS.to_string(),
            style_phrases: PREDEFINED_STYLES
                .iter()
                .map(|(style, phrase)| (style.to_string(), phrase.to_string()))
                .collect(),
        }
    }
}

fn style_env_name(style: &str) -> String {
    format!("GEMINI_STYLE_{}", style.to_ascii_uppercase())
}

impl PromptTemplates {
    /// Builds the template set once at startup. Broken templates fail here
    /// rather than on the first request.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self> {
        let defaults = PromptTemplates::default();

        let base_template =
            source_string(source, "PROMPT_BASE_TEMPLATE", &defaults.base_template);
        if !base_template.contains("{style}") {
            bail!("PROMPT_BASE_TEMPLATE must contain the {{style}} placeholder");
        }

        let face_preservation = source_string(
            source,
            "PROMPT_FACE_PRESERVATION",
            &defaults.face_preservation,
        );
        if face_preservation.trim().is_empty() {
            bail!("PROMPT_FACE_PRESERVATION must not be empty");
        }

        let additional_instructions = source_string(
            source,
            "PROMPT_ADDITIONAL_INSTRUCTIONS",
            &defaults.additional_instructions,
        );
        if !additional_instructions.contains(QUANTITY_RETURN_TOKEN) {
            bail!("PROMPT_ADDITIONAL_INSTRUCTIONS must contain the {QUANTITY_RETURN_TOKEN} placeholder");
        }

        let mut style_phrases = defaults.style_phrases;
        for (style, _) in PREDEFINED_STYLES {
            let name = style_env_name(style);
            if let Some(value) = source.get(&name) {
                if value.trim().is_empty() {
                    bail!("{name} is set but empty");
                }
                style_phrases.insert(style.to_string(), value.trim().to_string());
            }
        }

        Ok(Self {
            base_template,
            face_preservation,
            additional_instructions,
            style_phrases,
        })
    }

    pub fn style_phrase(&self, style: &str) -> Option<&str> {
        self.style_phrases
            .get(&style.trim().to_lowercase())
            .map(String::as_str)
    }

    pub fn custom_style_fallback(&self) -> &'static str {
        CUSTOM_STYLE_FALLBACK
    }

    /// Styles without a configured phrase; they are sent to the model by name.
    pub fn unknown_styles<'a>(&self, styles: impl IntoIterator<Item = &'a String>) -> Vec<String> {
        styles
            .into_iter()
            .filter(|style| self.style_phrase(style).is_none())
            .cloned()
            .collect()
    }
}
