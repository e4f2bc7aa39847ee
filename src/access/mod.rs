pub mod policy;
pub mod tier;
pub mod validate;

pub use policy::{
    resolve_feature_access, AdvancedSettingsAccess, FeatureAccessPolicy, GenerationLimit,
    HistoryAccess,
};
pub use tier::SubscriptionTier;
pub use validate::{validate_generation, GenerationRejection};
