use once_cell::sync::Lazy;
use regex::Regex;

use crate::prompt::settings::{
    AdvancedSetting, HeadshotGenerationSettings, Lighting, CUSTOM_BACKGROUND,
};
use crate::prompt::templates::{PromptTemplates, QUANTITY_RETURN_TOKEN};

static WHITESPACE_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));

fn humanize(label: &str) -> String {
    label.trim().replace(['_', '-'], " ")
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

/// Custom styles use the caller's text; predefined ones their configured
/// phrase, or the bare identifier when none is configured.
pub fn resolve_style_text(
    settings: &HeadshotGenerationSettings,
    templates: &PromptTemplates,
) -> String {
    if settings.is_custom_style() {
        return non_blank(settings.custom_style_prompt.as_deref())
            .unwrap_or(templates.custom_style_fallback())
            .to_string();
    }
    templates
        .style_phrase(&settings.style)
        .map(str::to_string)
        .unwrap_or_else(|| settings.style.trim().to_string())
}

fn background_clause(settings: &HeadshotGenerationSettings) -> Option<String> {
    let background = non_blank(settings.background.as_deref())?;
    if background.eq_ignore_ascii_case(CUSTOM_BACKGROUND) {
        // "custom" without a colour means nothing was picked.
        let color = non_blank(settings.custom_color.as_deref())?;
        return Some(format!("Use a {color} background"));
    }
    Some(format!("Use a {} background", humanize(background)))
}

fn setting_clause(settings: &HeadshotGenerationSettings, setting: AdvancedSetting) -> Option<String> {
    if settings.is_default(setting) {
        return None;
    }
    match setting {
        AdvancedSetting::Background => background_clause(settings),
        AdvancedSetting::Lighting => match &settings.lighting {
            Lighting::Label(label) => Some(format!("Use {} lighting", humanize(label))),
            Lighting::Intensity(level) => {
                Some(format!("Set the lighting intensity to {level}%"))
            }
        },
        AdvancedSetting::Sharpness => Some(format!(
            "Render the photo with {} sharpness",
            humanize(&settings.sharpness)
        )),
        AdvancedSetting::Expression => Some(format!(
            "Give the person a {} expression",
            humanize(&settings.expression)
        )),
        AdvancedSetting::HeadPosition => Some(format!(
            "Set the head position to {}",
            humanize(&settings.head_position)
        )),
        AdvancedSetting::EyeFocus => Some(format!(
            "Set the eye focus to {}",
            humanize(&settings.eye_focus)
        )),
    }
}

fn as_sentence(clause: &str) -> Option<String> {
    let trimmed = clause.trim().trim_end_matches('.').trim_end();
    if trimmed.is_empty() {
        None
    } else {
        Some(format!("{trimmed}."))
    }
}

/// Composes the instruction text. Order is fixed: base sentence, face
/// preservation, changed advanced settings, closing instruction.
pub fn assemble_prompt(settings: &HeadshotGenerationSettings, templates: &PromptTemplates) -> String {
    let quantity = settings.quantity.max(1);
    let plural = if quantity == 1 { "" } else { "s" };
    let quantity_text = if quantity > 1 {
        format!("{quantity} different")
    } else {
        "a".to_string()
    };
    let style_text = resolve_style_text(settings, templates);

    let base = templates
        .base_template
        .replace("{quantity_text}", &quantity_text)
        .replace("{style}", &style_text)
        .replace("{plural}", plural);

    let mut clauses = vec![base, templates.face_preservation.clone()];
    clauses.extend(
        AdvancedSetting::ALL
            .iter()
            .filter_map(|setting| setting_clause(settings, *setting)),
    );
    clauses.push(
        templates
            .additional_instructions
            .replace(QUANTITY_RETURN_TOKEN, &quantity.to_string()),
    );

    let joined = clauses
        .iter()
        .filter_map(|clause| as_sentence(clause))
        .collect::<Vec<_>>()
        .join(" ");
    WHITESPACE_RUN.replace_all(&joined, " ").trim().to_string()
}
