use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::access::{
    validate_generation, FeatureAccessPolicy, GenerationLimit, GenerationRejection,
};
use crate::db::models::GenerationInsert;
use crate::error::{ApiError, ApiResult};
use crate::handlers::access::{
    check_rate_limit, identify_caller, limit_as_i64, load_caller_access, Caller,
};
use crate::handlers::features::UsageView;
use crate::llm::headshot::{generate_headshot, GeneratedImage, HeadshotGenerationError, HeadshotResult};
use crate::llm::media::InlineImage;
use crate::prompt::HeadshotGenerationSettings;
use crate::state::AppState;
use crate::storage::ImageStore;
use crate::utils::timing::{complete_request_timer, start_request_timer, RequestTimer};

pub const GENERATE_ROUTE: &str = "/api/generate";

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Data URI or bare base64 photo.
    pub image: String,
    #[serde(default)]
    pub settings: HeadshotGenerationSettings,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageView {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub images: Vec<ImageView>,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub saved: bool,
    pub usage: UsageView,
}

/// Uploads every image; any failure leaves the generation unsaved.
async fn store_images(
    store: &ImageStore,
    user_id: &str,
    images: &[GeneratedImage],
) -> anyhow::Result<Vec<String>> {
    let mut urls = Vec::with_capacity(images.len());
    for image in images {
        let bytes = image.decode()?;
        let path = ImageStore::object_path(user_id, &bytes);
        urls.push(store.upload(&path, &bytes).await?);
    }
    Ok(urls)
}

async fn write_history(
    state: &AppState,
    caller: &Caller,
    policy: &FeatureAccessPolicy,
    settings: &HeadshotGenerationSettings,
    result: &HeadshotResult,
) -> anyhow::Result<Option<Vec<String>>> {
    let saved_so_far = state.db.count_generations(&caller.id).await?;
    let saved_so_far = u32::try_from(saved_so_far.max(0)).unwrap_or(u32::MAX);
    if !policy.save_to_history.allows_saving(saved_so_far) {
        info!(
            "Not saving generation for {} (tier={}, saved={})",
            caller.id, policy.tier, saved_so_far
        );
        return Ok(None);
    }

    let urls = store_images(&state.store, &caller.id, &result.images).await?;
    let record = GenerationInsert {
        user_id: caller.id.clone(),
        style: settings.style.clone(),
        quantity: i64::from(settings.quantity),
        settings_json: serde_json::to_string(settings)?,
        prompt: result.prompt.clone(),
        image_urls: urls.clone(),
        created_at: Utc::now(),
    };
    state.db.insert_generation(&record).await?;
    Ok(Some(urls))
}

/// History is best effort: the images are already paid for, so a failure
/// here only leaves the generation unsaved.
async fn save_to_history(
    state: &AppState,
    caller: &Caller,
    policy: &FeatureAccessPolicy,
    settings: &HeadshotGenerationSettings,
    result: &HeadshotResult,
) -> Option<Vec<String>> {
    match write_history(state, caller, policy, settings, result).await {
        Ok(urls) => urls,
        Err(err) => {
            warn!("Failed to save generation for {}: {:#}", caller.id, err);
            None
        }
    }
}

async fn refund_reservation(state: &AppState, caller: &Caller, policy: &FeatureAccessPolicy) {
    if let Err(err) = state
        .db
        .refund_generation(&caller.id, limit_as_i64(policy.generation_limit))
        .await
    {
        warn!("Failed to refund generation for {}: {:#}", caller.id, err);
    }
}

async fn run_generation(
    state: &AppState,
    caller: &Caller,
    request: GenerateRequest,
    timer: &mut RequestTimer,
) -> ApiResult<GenerateResponse> {
    check_rate_limit(state, caller)?;

    let photo = InlineImage::from_data_uri(&request.image)?;
    let (profile, policy) = load_caller_access(state, caller).await?;
    timer.set_tier(policy.tier.as_str());
    timer.set_request(&request.settings.style, request.settings.quantity);

    let log_rejection = |rejection: GenerationRejection| {
        warn!(
            tier = %policy.tier,
            style = %request.settings.style,
            quantity = request.settings.quantity,
            field = rejection.field(),
            "Generation rejected: {}",
            rejection
        );
        rejection
    };

    let used = profile.used_generations_u32();
    let settings =
        validate_generation(&policy, used, request.settings.clone()).map_err(log_rejection)?;

    // The read above can be stale when requests overlap; the reservation is
    // the authoritative quota check.
    let reserved = state
        .db
        .reserve_generation(&caller.id, limit_as_i64(policy.generation_limit))
        .await?;
    let profile = match (reserved, policy.generation_limit) {
        (Some(profile), _) => profile,
        (None, GenerationLimit::Limited(limit)) => {
            return Err(log_rejection(GenerationRejection::GenerationLimitReached {
                used: limit,
                limit,
                tier: policy.tier,
            })
            .into());
        }
        (None, GenerationLimit::Unlimited) => {
            return Err(anyhow::anyhow!("Unlimited reservation refused for {}", caller.id).into());
        }
    };

    let result =
        match generate_headshot(state.model.as_ref(), &state.templates, &photo, &settings).await {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    tier = %policy.tier,
                    style = %settings.style,
                    quantity = settings.quantity,
                    "Headshot generation failed: {}",
                    err
                );
                refund_reservation(state, caller, &policy).await;
                return Err(err.into());
            }
        };

    if result.images.is_empty() {
        refund_reservation(state, caller, &policy).await;
        let reason = match &result.block_reason {
            Some(reason) => format!("the model returned no images (blocked: {reason})"),
            None => "the model returned no images".to_string(),
        };
        return Err(HeadshotGenerationError::Upstream(reason).into());
    }

    let saved_urls = save_to_history(state, caller, &policy, &settings, &result).await;

    info!(
        "Generated {} headshot(s) for {} (tier={}, style={}, saved={})",
        result.images.len(),
        caller.id,
        policy.tier,
        settings.style,
        saved_urls.is_some()
    );

    let urls = saved_urls.clone().unwrap_or_default();
    let images = result
        .images
        .into_iter()
        .enumerate()
        .map(|(index, image)| ImageView {
            url: urls.get(index).cloned(),
            mime_type: image.mime_type,
            data: image.data,
        })
        .collect();

    Ok(GenerateResponse {
        images,
        text: result.text,
        prompt: policy.show_ai_prompt.then_some(result.prompt),
        saved: saved_urls.is_some(),
        usage: UsageView::from_profile(&profile, &policy),
    })
}

/// Full request flow after the caller is known, with timing.
pub async fn process_generation(
    state: &AppState,
    caller: &Caller,
    request: GenerateRequest,
) -> ApiResult<GenerateResponse> {
    let mut timer = start_request_timer(GENERATE_ROUTE, &caller.id);
    let outcome = run_generation(state, caller, request, &mut timer).await;
    match &outcome {
        Ok(response) => complete_request_timer(
            &mut timer,
            "success",
            Some(format!("images={}", response.images.len())),
        ),
        Err(ApiError::Rejected(rejection)) => {
            complete_request_timer(&mut timer, "rejected", Some(rejection.field().to_string()))
        }
        Err(err) => complete_request_timer(&mut timer, "error", Some(err.to_string())),
    }
    outcome
}

pub async fn generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<GenerateRequest>,
) -> ApiResult<Json<GenerateResponse>> {
    let caller = identify_caller(&headers)?;
    Ok(Json(process_generation(&state, &caller, request).await?))
}
