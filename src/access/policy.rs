use std::collections::BTreeSet;

use serde::{Serialize, Serializer};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::access::tier::SubscriptionTier;
use crate::config::{source_bool, source_csv_lowercase, source_u32, ConfigSource};
use crate::prompt::AdvancedSetting;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationLimit {
    Limited(u32),
    Unlimited,
}

impl GenerationLimit {
    pub fn allows(&self, used: u32) -> bool {
        match self {
            GenerationLimit::Limited(limit) => used < *limit,
            GenerationLimit::Unlimited => true,
        }
    }

    /// `None` when unlimited.
    pub fn remaining(&self, used: u32) -> Option<u32> {
        match self {
            GenerationLimit::Limited(limit) => Some(limit.saturating_sub(used)),
            GenerationLimit::Unlimited => None,
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self, GenerationLimit::Unlimited)
    }
}

impl Serialize for GenerationLimit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GenerationLimit::Limited(limit) => serializer.serialize_u32(*limit),
            GenerationLimit::Unlimited => serializer.serialize_str("unlimited"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvancedSettingsAccess {
    Full,
    Disabled,
    Limited(BTreeSet<AdvancedSetting>),
}

impl AdvancedSettingsAccess {
    pub fn allows(&self, setting: AdvancedSetting) -> bool {
        match self {
            AdvancedSettingsAccess::Full => true,
            AdvancedSettingsAccess::Disabled => false,
            AdvancedSettingsAccess::Limited(allowed) => allowed.contains(&setting),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryAccess {
    Full,
    Disabled,
    Limited(u32),
}

impl HistoryAccess {
    pub fn allows_saving(&self, saved_so_far: u32) -> bool {
        match self {
            HistoryAccess::Full => true,
            HistoryAccess::Disabled => false,
            HistoryAccess::Limited(limit) => saved_so_far < *limit,
        }
    }
}

/// Everything a tier may do. Derived on every call, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureAccessPolicy {
    pub tier: SubscriptionTier,
    pub generation_limit: GenerationLimit,
    pub allowed_styles: Vec<String>,
    pub has_custom_style_access: bool,
    pub max_quantity: u32,
    pub advanced_settings: AdvancedSettingsAccess,
    pub save_to_history: HistoryAccess,
    pub show_ai_prompt: bool,
}

impl FeatureAccessPolicy {
    /// Case-insensitive on both sides.
    pub fn is_style_allowed(&self, style: &str) -> bool {
        let requested = style.trim().to_lowercase();
        self.allowed_styles
            .iter()
            .any(|allowed| allowed.to_lowercase() == requested)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyView<'a> {
    tier: SubscriptionTier,
    generation_limit: GenerationLimit,
    allowed_styles: &'a [String],
    has_custom_style_access: bool,
    max_quantity: u32,
    has_advanced_settings: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_advanced_settings: Option<Vec<&'static str>>,
    can_save_to_history: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    save_to_history_limit: Option<u32>,
    show_ai_prompt: bool,
}

impl Serialize for FeatureAccessPolicy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (has_advanced_settings, allowed_advanced_settings) = match &self.advanced_settings {
            AdvancedSettingsAccess::Full => (json!(true), None),
            AdvancedSettingsAccess::Disabled => (json!(false), None),
            AdvancedSettingsAccess::Limited(allowed) => (
                json!("limited"),
                Some(allowed.iter().map(|setting| setting.as_str()).collect()),
            ),
        };
        let (can_save_to_history, save_to_history_limit) = match self.save_to_history {
            HistoryAccess::Full => (json!(true), None),
            HistoryAccess::Disabled => (json!(false), None),
            HistoryAccess::Limited(limit) => (json!("limited"), Some(limit)),
        };
        PolicyView {
            tier: self.tier,
            generation_limit: self.generation_limit,
            allowed_styles: &self.allowed_styles,
            has_custom_style_access: self.has_custom_style_access,
            max_quantity: self.max_quantity,
            has_advanced_settings,
            allowed_advanced_settings,
            can_save_to_history,
            save_to_history_limit,
            show_ai_prompt: self.show_ai_prompt,
        }
        .serialize(serializer)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Toggle {
    On,
    Off,
    Limited,
}

struct TierDefaults {
    generation_limit: u32,
    allowed_styles: &'static [&'static str],
    custom_style: bool,
    max_quantity: u32,
    advanced_settings: Toggle,
    save_to_history: Toggle,
    save_to_history_limit: u32,
    show_ai_prompt: bool,
}

const GUEST_STYLES: &[&str] = &["corporate", "casual", "business"];
const FREE_STYLES: &[&str] = &["corporate", "casual", "business", "creative", "tech"];
const PREMIUM_STYLES: &[&str] = &[
    "corporate",
    "casual",
    "business",
    "creative",
    "tech",
    "cinematic",
    "artistic",
    "vintage",
];
const PROFESSIONAL_STYLES: &[&str] = &[
    "corporate",
    "casual",
    "business",
    "creative",
    "tech",
    "cinematic",
    "artistic",
    "vintage",
    "outdoor",
    "studio",
];

fn tier_defaults(tier: SubscriptionTier) -> TierDefaults {
    match tier {
        SubscriptionTier::Guest => TierDefaults {
            generation_limit: 3,
            allowed_styles: GUEST_STYLES,
            custom_style: false,
            max_quantity: 2,
            advanced_settings: Toggle::Off,
            save_to_history: Toggle::Off,
            save_to_history_limit: 0,
            show_ai_prompt: false,
        },
        SubscriptionTier::Free => TierDefaults {
            generation_limit: 10,
            allowed_styles: FREE_STYLES,
            custom_style: false,
            max_quantity: 4,
            advanced_settings: Toggle::Limited,
            save_to_history: Toggle::Limited,
            save_to_history_limit: 10,
            show_ai_prompt: false,
        },
        SubscriptionTier::Premium => TierDefaults {
            generation_limit: 100,
            allowed_styles: PREMIUM_STYLES,
            custom_style: true,
            max_quantity: 8,
            advanced_settings: Toggle::On,
            save_to_history: Toggle::On,
            save_to_history_limit: 50,
            show_ai_prompt: true,
        },
        SubscriptionTier::Professional => TierDefaults {
            // Never applied: professional is always unlimited.
            generation_limit: 0,
            allowed_styles: PROFESSIONAL_STYLES,
            custom_style: true,
            max_quantity: 10,
            advanced_settings: Toggle::On,
            save_to_history: Toggle::On,
            save_to_history_limit: 100,
            show_ai_prompt: true,
        },
    }
}

fn source_toggle(source: &dyn ConfigSource, name: &str, default: Toggle) -> Toggle {
    match source.get(name) {
        None => default,
        Some(value) if value.trim().eq_ignore_ascii_case("limited") => Toggle::Limited,
        Some(value) if value.trim().eq_ignore_ascii_case("true") => Toggle::On,
        Some(_) => Toggle::Off,
    }
}

fn allowed_advanced_settings(source: &dyn ConfigSource, name: &str) -> BTreeSet<AdvancedSetting> {
    let mut allowed = BTreeSet::new();
    for entry in source_csv_lowercase(source, name).unwrap_or_default() {
        match AdvancedSetting::parse(&entry) {
            Some(setting) => {
                allowed.insert(setting);
            }
            None => warn!("Ignoring unknown advanced setting '{}' in {}", entry, name),
        }
    }
    allowed
}

/// Resolves the policy for `tier`, reading every override fresh from
/// `source`. Unparsable overrides fall back to the tier default.
pub fn resolve_feature_access(
    tier: SubscriptionTier,
    source: &dyn ConfigSource,
) -> FeatureAccessPolicy {
    let defaults = tier_defaults(tier);
    let prefix = tier.env_prefix();
    let key = |suffix: &str| format!("{prefix}_{suffix}");

    let generation_limit = match tier {
        SubscriptionTier::Professional => GenerationLimit::Unlimited,
        _ => GenerationLimit::Limited(source_u32(
            source,
            &key("TIER_LIMIT"),
            defaults.generation_limit,
        )),
    };

    let allowed_styles = source_csv_lowercase(source, &key("ALLOWED_STYLES"))
        .filter(|styles| !styles.is_empty())
        .unwrap_or_else(|| {
            defaults
                .allowed_styles
                .iter()
                .map(|style| style.to_string())
                .collect()
        });

    let advanced_settings =
        match source_toggle(source, &key("ADVANCED_SETTINGS"), defaults.advanced_settings) {
            Toggle::On => AdvancedSettingsAccess::Full,
            Toggle::Off => AdvancedSettingsAccess::Disabled,
            Toggle::Limited => AdvancedSettingsAccess::Limited(allowed_advanced_settings(
                source,
                &key("ADVANCED_SETTINGS_ALLOWED"),
            )),
        };

    let save_to_history =
        match source_toggle(source, &key("SAVE_TO_HISTORY"), defaults.save_to_history) {
            Toggle::On => HistoryAccess::Full,
            Toggle::Off => HistoryAccess::Disabled,
            Toggle::Limited => HistoryAccess::Limited(source_u32(
                source,
                &key("SAVE_TO_HISTORY_LIMIT"),
                defaults.save_to_history_limit,
            )),
        };

    let policy = FeatureAccessPolicy {
        tier,
        generation_limit,
        allowed_styles,
        has_custom_style_access: source_bool(source, &key("CUSTOM_STYLE"), defaults.custom_style),
        max_quantity: source_u32(source, &key("MAX_QUANTITY"), defaults.max_quantity),
        advanced_settings,
        save_to_history,
        show_ai_prompt: source_bool(source, &key("SHOW_AI_PROMPT"), defaults.show_ai_prompt),
    };
    debug!(tier = %tier, policy = ?policy, "Resolved feature access");
    policy
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn only_professional_is_unlimited_even_with_overrides() {
        let overrides = source(&[
            ("GUEST_TIER_LIMIT", "5"),
            ("FREE_TIER_LIMIT", "50"),
            ("PREMIUM_TIER_LIMIT", "500"),
            ("PROFESSIONAL_TIER_LIMIT", "1"),
        ]);
        for tier in SubscriptionTier::ALL {
            for config in [source(&[]), overrides.clone()] {
                let policy = resolve_feature_access(tier, &config);
                assert_eq!(
                    policy.generation_limit.is_unlimited(),
                    tier == SubscriptionTier::Professional,
                    "tier {tier}"
                );
            }
        }
    }

    #[test]
    fn free_tier_defaults() {
        let policy = resolve_feature_access(SubscriptionTier::Free, &source(&[]));
        assert_eq!(policy.generation_limit, GenerationLimit::Limited(10));
        assert_eq!(
            policy.allowed_styles,
            vec!["corporate", "casual", "business", "creative", "tech"]
        );
        assert!(!policy.has_custom_style_access);
        assert_eq!(policy.save_to_history, HistoryAccess::Limited(10));
        assert!(!policy.show_ai_prompt);
    }

    #[test]
    fn allowed_styles_have_no_duplicates_or_blanks() {
        let config = source(&[("PREMIUM_ALLOWED_STYLES", "Tech,,tech , Studio,  ,studio")]);
        let policy = resolve_feature_access(SubscriptionTier::Premium, &config);
        assert_eq!(policy.allowed_styles, vec!["tech", "studio"]);

        for tier in SubscriptionTier::ALL {
            let policy = resolve_feature_access(tier, &source(&[]));
            let mut seen = std::collections::HashSet::new();
            for style in &policy.allowed_styles {
                assert!(!style.is_empty());
                assert!(seen.insert(style.clone()), "duplicate {style} for {tier}");
            }
        }
    }

    #[test]
    fn resolution_is_deterministic() {
        let config = source(&[
            ("FREE_ADVANCED_SETTINGS", "limited"),
            ("FREE_ADVANCED_SETTINGS_ALLOWED", "lighting,background"),
        ]);
        for tier in SubscriptionTier::ALL {
            assert_eq!(
                resolve_feature_access(tier, &config),
                resolve_feature_access(tier, &config)
            );
        }
    }

    #[test]
    fn style_membership_ignores_case() {
        let policy = resolve_feature_access(SubscriptionTier::Free, &source(&[]));
        assert_eq!(
            policy.is_style_allowed("Corporate"),
            policy.is_style_allowed("corporate")
        );
        assert!(policy.is_style_allowed("TECH"));
        assert!(!policy.is_style_allowed("cinematic"));
    }

    #[test]
    fn garbage_booleans_are_false_and_bad_integers_fall_back() {
        let config = source(&[
            ("PREMIUM_CUSTOM_STYLE", "yes please"),
            ("PREMIUM_MAX_QUANTITY", "eight"),
            ("PREMIUM_SHOW_AI_PROMPT", "TRUE"),
        ]);
        let policy = resolve_feature_access(SubscriptionTier::Premium, &config);
        assert!(!policy.has_custom_style_access);
        assert_eq!(policy.max_quantity, 8);
        assert!(policy.show_ai_prompt);
    }

    #[test]
    fn limited_advanced_settings_without_list_fail_closed() {
        let policy = resolve_feature_access(SubscriptionTier::Free, &source(&[]));
        assert_eq!(
            policy.advanced_settings,
            AdvancedSettingsAccess::Limited(BTreeSet::new())
        );
        for setting in AdvancedSetting::ALL {
            assert!(!policy.advanced_settings.allows(setting));
        }

        let empty = source(&[("FREE_ADVANCED_SETTINGS_ALLOWED", " , ")]);
        let policy = resolve_feature_access(SubscriptionTier::Free, &empty);
        for setting in AdvancedSetting::ALL {
            assert!(!policy.advanced_settings.allows(setting));
        }
    }

    #[test]
    fn limited_advanced_settings_honor_the_list() {
        let config = source(&[
            ("GUEST_ADVANCED_SETTINGS", "Limited"),
            ("GUEST_ADVANCED_SETTINGS_ALLOWED", "lighting, eye_focus, hair"),
        ]);
        let policy = resolve_feature_access(SubscriptionTier::Guest, &config);
        assert!(policy.advanced_settings.allows(AdvancedSetting::Lighting));
        assert!(policy.advanced_settings.allows(AdvancedSetting::EyeFocus));
        assert!(!policy.advanced_settings.allows(AdvancedSetting::Background));
    }

    #[test]
    fn policy_serializes_tri_states() {
        let config = source(&[("FREE_ADVANCED_SETTINGS_ALLOWED", "background")]);
        let free = serde_json::to_value(resolve_feature_access(SubscriptionTier::Free, &config))
            .expect("serializes");
        assert_eq!(free["hasAdvancedSettings"], json!("limited"));
        assert_eq!(free["allowedAdvancedSettings"], json!(["background"]));
        assert_eq!(free["canSaveToHistory"], json!("limited"));
        assert_eq!(free["saveToHistoryLimit"], json!(10));

        let pro = serde_json::to_value(resolve_feature_access(
            SubscriptionTier::Professional,
            &source(&[]),
        ))
        .expect("serializes");
        assert_eq!(pro["generationLimit"], json!("unlimited"));
        assert_eq!(pro["hasAdvancedSettings"], json!(true));
        assert!(pro.get("allowedAdvancedSettings").is_none());
        assert!(pro.get("saveToHistoryLimit").is_none());
    }
}
