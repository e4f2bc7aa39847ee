use axum::http::HeaderMap;
use tracing::{debug, warn};

use crate::access::{resolve_feature_access, FeatureAccessPolicy, GenerationLimit, SubscriptionTier};
use crate::db::models::ProfileRow;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const GUEST_ID_HEADER: &str = "x-guest-id";
const MAX_CALLER_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub id: String,
    /// Tier given to the profile the first time this caller is seen.
    pub default_tier: SubscriptionTier,
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= MAX_CALLER_ID_LEN)
}

/// Signed-in callers win over guests when both headers are present.
pub fn identify_caller(headers: &HeaderMap) -> ApiResult<Caller> {
    if let Some(user_id) = header_value(headers, USER_ID_HEADER) {
        return Ok(Caller {
            id: user_id.to_string(),
            default_tier: SubscriptionTier::Free,
        });
    }
    if let Some(guest_id) = header_value(headers, GUEST_ID_HEADER) {
        return Ok(Caller {
            id: format!("guest:{guest_id}"),
            default_tier: SubscriptionTier::Guest,
        });
    }
    debug!("Request without caller identity");
    Err(ApiError::MissingIdentity)
}

pub fn check_rate_limit(state: &AppState, caller: &Caller) -> ApiResult<()> {
    if state.is_rate_limited(&caller.id) {
        warn!("Rate limited caller {}", caller.id);
        return Err(ApiError::RateLimited(state.rate_limit.as_secs()));
    }
    Ok(())
}

pub fn limit_as_i64(limit: GenerationLimit) -> Option<i64> {
    match limit {
        GenerationLimit::Limited(limit) => Some(i64::from(limit)),
        GenerationLimit::Unlimited => None,
    }
}

/// Loads (or creates) the caller's profile and resolves the policy for its
/// stored tier.
pub async fn load_caller_access(
    state: &AppState,
    caller: &Caller,
) -> ApiResult<(ProfileRow, FeatureAccessPolicy)> {
    let starting_limit =
        resolve_feature_access(caller.default_tier, state.config_source.as_ref()).generation_limit;
    let profile = state
        .db
        .get_or_create_profile(&caller.id, caller.default_tier, limit_as_i64(starting_limit))
        .await?;
    let tier = SubscriptionTier::parse(Some(&profile.tier));
    let policy = resolve_feature_access(tier, state.config_source.as_ref());
    Ok((profile, policy))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;
    use crate::handlers::test_support::test_state;

    #[test]
    fn user_header_identifies_free_callers() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static(" user-42 "));
        headers.insert(GUEST_ID_HEADER, HeaderValue::from_static("device"));
        let caller = identify_caller(&headers).expect("identified");
        assert_eq!(caller.id, "user-42");
        assert_eq!(caller.default_tier, SubscriptionTier::Free);
    }

    #[test]
    fn guest_header_is_namespaced() {
        let mut headers = HeaderMap::new();
        headers.insert(GUEST_ID_HEADER, HeaderValue::from_static("device-1"));
        let caller = identify_caller(&headers).expect("identified");
        assert_eq!(caller.id, "guest:device-1");
        assert_eq!(caller.default_tier, SubscriptionTier::Guest);
    }

    #[test]
    fn anonymous_requests_are_refused() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("   "));
        assert!(matches!(
            identify_caller(&headers),
            Err(ApiError::MissingIdentity)
        ));
    }

    #[tokio::test]
    async fn rate_limit_blocks_quick_repeats() {
        let state = test_state(&[], 60).await;
        let caller = Caller {
            id: "user-1".to_string(),
            default_tier: SubscriptionTier::Free,
        };
        assert!(check_rate_limit(&state, &caller).is_ok());
        assert!(matches!(
            check_rate_limit(&state, &caller),
            Err(ApiError::RateLimited(60))
        ));

        let other = Caller {
            id: "user-2".to_string(),
            default_tier: SubscriptionTier::Free,
        };
        assert!(check_rate_limit(&state, &other).is_ok());
    }

    #[tokio::test]
    async fn zero_window_disables_rate_limiting() {
        let state = test_state(&[], 0).await;
        let caller = Caller {
            id: "user-1".to_string(),
            default_tier: SubscriptionTier::Free,
        };
        assert!(check_rate_limit(&state, &caller).is_ok());
        assert!(check_rate_limit(&state, &caller).is_ok());
    }

    #[tokio::test]
    async fn new_profiles_start_with_tier_credits() {
        let state = test_state(&[("GUEST_TIER_LIMIT", "5")], 0).await;
        let caller = Caller {
            id: "guest:abc".to_string(),
            default_tier: SubscriptionTier::Guest,
        };
        let (profile, policy) = load_caller_access(&state, &caller).await.expect("loaded");
        assert_eq!(profile.tier, "guest");
        assert_eq!(profile.credits_remaining, Some(5));
        assert_eq!(policy.generation_limit, GenerationLimit::Limited(5));
    }
}
