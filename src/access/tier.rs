use std::fmt;

use serde::{Deserialize, Serialize};

/// Subscription levels. Each tier owns an independent default table; a
/// higher tier is not derived from the one below it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Guest,
    Free,
    Premium,
    Professional,
}

impl SubscriptionTier {
    pub const ALL: [SubscriptionTier; 4] = [
        SubscriptionTier::Guest,
        SubscriptionTier::Free,
        SubscriptionTier::Premium,
        SubscriptionTier::Professional,
    ];

    /// Lenient parse: anything unrecognized, including an empty value, is a guest.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|value| value.trim().to_ascii_lowercase()).as_deref() {
            Some("free") => SubscriptionTier::Free,
            Some("premium") => SubscriptionTier::Premium,
            Some("professional") => SubscriptionTier::Professional,
            _ => SubscriptionTier::Guest,
        }
    }

    /// Strict parse for operator input, where a typo must not silently
    /// downgrade somebody to guest.
    pub fn parse_strict(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "guest" => Some(SubscriptionTier::Guest),
            "free" => Some(SubscriptionTier::Free),
            "premium" => Some(SubscriptionTier::Premium),
            "professional" => Some(SubscriptionTier::Professional),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Guest => "guest",
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
            SubscriptionTier::Professional => "professional",
        }
    }

    /// Prefix of the configuration variables for this tier, e.g. `FREE`.
    pub fn env_prefix(&self) -> &'static str {
        match self {
            SubscriptionTier::Guest => "GUEST",
            SubscriptionTier::Free => "FREE",
            SubscriptionTier::Premium => "PREMIUM",
            SubscriptionTier::Professional => "PROFESSIONAL",
        }
    }

    pub fn can_upgrade(&self) -> bool {
        !matches!(self, SubscriptionTier::Professional)
    }
}

impl fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
