use tracing::debug;

use crate::access::policy::{FeatureAccessPolicy, GenerationLimit};
use crate::access::tier::SubscriptionTier;
use crate::prompt::{AdvancedSetting, HeadshotGenerationSettings, Lighting};

const MAX_LIGHTING_INTENSITY: u32 = 100;

fn upgrade_hint(tier: &SubscriptionTier) -> &'static str {
    if tier.can_upgrade() {
        " Upgrade your plan to unlock more."
    } else {
        ""
    }
}

/// Why a generation request was refused for the caller's tier.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationRejection {
    #[error("quantity must be at least 1")]
    InvalidQuantity,
    #[error("quantity {requested} exceeds the {tier} plan maximum of {max} images per request.{}", upgrade_hint(.tier))]
    QuantityExceeded {
        requested: u32,
        max: u32,
        tier: SubscriptionTier,
    },
    #[error("style '{style}' is not available on the {tier} plan (allowed: {}).{}", .allowed.join(", "), upgrade_hint(.tier))]
    StyleNotAllowed {
        style: String,
        allowed: Vec<String>,
        tier: SubscriptionTier,
    },
    #[error("custom styles are not available on the {tier} plan.{}", upgrade_hint(.tier))]
    CustomStyleNotAllowed { tier: SubscriptionTier },
    #[error("the {tier} plan allows {limit} generations and {used} have been used.{}", upgrade_hint(.tier))]
    GenerationLimitReached {
        used: u32,
        limit: u32,
        tier: SubscriptionTier,
    },
    #[error("{field}: {reason}")]
    InvalidSetting {
        field: &'static str,
        reason: String,
    },
}

impl GenerationRejection {
    /// The request field the rejection is about.
    pub fn field(&self) -> &'static str {
        match self {
            GenerationRejection::InvalidQuantity | GenerationRejection::QuantityExceeded { .. } => {
                "quantity"
            }
            GenerationRejection::StyleNotAllowed { .. } => "style",
            GenerationRejection::CustomStyleNotAllowed { .. } => "customStylePrompt",
            GenerationRejection::GenerationLimitReached { .. } => "generationLimit",
            GenerationRejection::InvalidSetting { field, .. } => *field,
        }
    }
}

/// Checks a request against the caller's policy. Style, quantity and quota
/// violations are rejected; advanced settings the tier may not edit are
/// reset to their defaults.
pub fn validate_generation(
    policy: &FeatureAccessPolicy,
    used_generations: u32,
    mut settings: HeadshotGenerationSettings,
) -> Result<HeadshotGenerationSettings, GenerationRejection> {
    let tier = policy.tier;

    if settings.quantity == 0 {
        return Err(GenerationRejection::InvalidQuantity);
    }
    if settings.quantity > policy.max_quantity {
        return Err(GenerationRejection::QuantityExceeded {
            requested: settings.quantity,
            max: policy.max_quantity,
            tier,
        });
    }

    if settings.is_custom_style() {
        if !policy.has_custom_style_access {
            return Err(GenerationRejection::CustomStyleNotAllowed { tier });
        }
    } else if !policy.is_style_allowed(&settings.style) {
        return Err(GenerationRejection::StyleNotAllowed {
            style: settings.style.clone(),
            allowed: policy.allowed_styles.clone(),
            tier,
        });
    }

    if let GenerationLimit::Limited(limit) = policy.generation_limit {
        if !policy.generation_limit.allows(used_generations) {
            return Err(GenerationRejection::GenerationLimitReached {
                used: used_generations,
                limit,
                tier,
            });
        }
    }

    if let Lighting::Intensity(level) = settings.lighting {
        if level > MAX_LIGHTING_INTENSITY {
            return Err(GenerationRejection::InvalidSetting {
                field: "lighting",
                reason: format!("intensity must be between 0 and {MAX_LIGHTING_INTENSITY}"),
            });
        }
    }

    for setting in AdvancedSetting::ALL {
        if !policy.advanced_settings.allows(setting) && !settings.is_default(setting) {
            debug!(tier = %tier, setting = %setting, "Resetting advanced setting not available to tier");
            settings.reset(setting);
        }
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::access::policy::resolve_feature_access;

    fn policy(tier: SubscriptionTier, pairs: &[(&str, &str)]) -> FeatureAccessPolicy {
        let source: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        resolve_feature_access(tier, &source)
    }

    fn request(style: &str, quantity: u32) -> HeadshotGenerationSettings {
        HeadshotGenerationSettings {
            style: style.to_string(),
            quantity,
            ..Default::default()
        }
    }

    fn customized() -> HeadshotGenerationSettings {
        HeadshotGenerationSettings {
            lighting: Lighting::Label("dramatic".to_string()),
            background: Some("blue".to_string()),
            sharpness: "high".to_string(),
            expression: "confident smile".to_string(),
            head_position: "tilted left".to_string(),
            eye_focus: "away".to_string(),
            ..request("corporate", 1)
        }
    }

    #[test]
    fn free_tier_allows_tech_by_default() {
        let free = policy(SubscriptionTier::Free, &[]);
        assert!(validate_generation(&free, 0, request("tech", 1)).is_ok());
        assert!(validate_generation(&free, 0, request("Tech", 1)).is_ok());
    }

    #[test]
    fn free_tier_rejects_cinematic() {
        let free = policy(SubscriptionTier::Free, &[]);
        let err = validate_generation(&free, 0, request("cinematic", 1)).unwrap_err();
        assert_eq!(err.field(), "style");
        let message = err.to_string();
        assert!(message.contains("free plan"));
        assert!(message.contains("Upgrade"));
    }

    #[test]
    fn guest_quantity_above_two_is_rejected() {
        let guest = policy(SubscriptionTier::Guest, &[]);
        let err = validate_generation(&guest, 0, request("corporate", 5)).unwrap_err();
        assert_eq!(
            err,
            GenerationRejection::QuantityExceeded {
                requested: 5,
                max: 2,
                tier: SubscriptionTier::Guest
            }
        );
        assert!(validate_generation(&guest, 0, request("corporate", 2)).is_ok());
    }

    #[test]
    fn zero_quantity_is_invalid() {
        let premium = policy(SubscriptionTier::Premium, &[]);
        assert_eq!(
            validate_generation(&premium, 0, request("corporate", 0)),
            Err(GenerationRejection::InvalidQuantity)
        );
    }

    #[test]
    fn custom_style_requires_access() {
        let free = policy(SubscriptionTier::Free, &[]);
        assert_eq!(
            validate_generation(&free, 0, request("custom", 1)),
            Err(GenerationRejection::CustomStyleNotAllowed {
                tier: SubscriptionTier::Free
            })
        );
        let premium = policy(SubscriptionTier::Premium, &[]);
        assert!(validate_generation(&premium, 0, request("custom", 1)).is_ok());
    }

    #[test]
    fn exhausted_quota_is_rejected() {
        let guest = policy(SubscriptionTier::Guest, &[]);
        assert!(validate_generation(&guest, 2, request("corporate", 1)).is_ok());
        let err = validate_generation(&guest, 3, request("corporate", 1)).unwrap_err();
        assert!(matches!(
            err,
            GenerationRejection::GenerationLimitReached { used: 3, limit: 3, .. }
        ));

        let pro = policy(SubscriptionTier::Professional, &[]);
        assert!(validate_generation(&pro, 1_000_000, request("studio", 1)).is_ok());
    }

    #[test]
    fn professional_keeps_every_advanced_setting() {
        let pro = policy(SubscriptionTier::Professional, &[]);
        let validated = validate_generation(&pro, 0, customized()).expect("allowed");
        assert_eq!(validated, customized());
    }

    #[test]
    fn disabled_advanced_settings_are_reset() {
        let guest = policy(SubscriptionTier::Guest, &[]);
        let validated = validate_generation(&guest, 0, customized()).expect("allowed");
        for setting in AdvancedSetting::ALL {
            assert!(validated.is_default(setting), "{setting} should be reset");
        }
    }

    #[test]
    fn limited_advanced_settings_keep_only_the_allowed_subset() {
        let free = policy(
            SubscriptionTier::Free,
            &[("FREE_ADVANCED_SETTINGS_ALLOWED", "lighting,background")],
        );
        let validated = validate_generation(&free, 0, customized()).expect("allowed");
        assert_eq!(validated.lighting, Lighting::Label("dramatic".to_string()));
        assert_eq!(validated.background.as_deref(), Some("blue"));
        assert!(validated.is_default(AdvancedSetting::Sharpness));
        assert!(validated.is_default(AdvancedSetting::Expression));
        assert!(validated.is_default(AdvancedSetting::HeadPosition));
        assert!(validated.is_default(AdvancedSetting::EyeFocus));
    }

    #[test]
    fn lighting_intensity_must_be_a_percentage() {
        let pro = policy(SubscriptionTier::Professional, &[]);
        let request = HeadshotGenerationSettings {
            lighting: Lighting::Intensity(150),
            ..request("corporate", 1)
        };
        let err = validate_generation(&pro, 0, request).unwrap_err();
        assert_eq!(err.field(), "lighting");
    }
}
