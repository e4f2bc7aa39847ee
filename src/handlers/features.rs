use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::access::{FeatureAccessPolicy, GenerationLimit, SubscriptionTier};
use crate::db::models::ProfileRow;
use crate::error::ApiResult;
use crate::handlers::access::{identify_caller, load_caller_access, Caller};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageView {
    pub used: u32,
    pub limit: GenerationLimit,
    /// `None` when unlimited.
    pub remaining: Option<u32>,
}

impl UsageView {
    pub fn from_profile(profile: &ProfileRow, policy: &FeatureAccessPolicy) -> Self {
        let used = profile.used_generations_u32();
        UsageView {
            used,
            limit: policy.generation_limit,
            remaining: policy.generation_limit.remaining(used),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturesResponse {
    pub user_id: String,
    pub tier: SubscriptionTier,
    pub policy: FeatureAccessPolicy,
    pub usage: UsageView,
}

pub async fn describe_features(state: &AppState, caller: &Caller) -> ApiResult<FeaturesResponse> {
    let (profile, policy) = load_caller_access(state, caller).await?;
    Ok(FeaturesResponse {
        user_id: profile.user_id.clone(),
        tier: policy.tier,
        usage: UsageView::from_profile(&profile, &policy),
        policy,
    })
}

pub async fn features(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<FeaturesResponse>> {
    let caller = identify_caller(&headers)?;
    Ok(Json(describe_features(&state, &caller).await?))
}
