use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::db::models::GenerationRow;
use crate::error::ApiResult;
use crate::handlers::access::{identify_caller, Caller};
use crate::state::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 20;
const MAX_HISTORY_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub style: String,
    pub quantity: i64,
    pub settings: Value,
    pub prompt: String,
    pub image_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl From<GenerationRow> for HistoryEntry {
    fn from(row: GenerationRow) -> Self {
        let settings = serde_json::from_str(&row.settings_json).unwrap_or_else(|err| {
            warn!("Stored settings for generation {} are unreadable: {}", row.id, err);
            Value::Null
        });
        let image_urls = serde_json::from_str(&row.image_urls_json).unwrap_or_else(|err| {
            warn!("Stored image URLs for generation {} are unreadable: {}", row.id, err);
            Vec::new()
        });
        HistoryEntry {
            id: row.id,
            style: row.style,
            quantity: row.quantity,
            settings,
            prompt: row.prompt,
            image_urls,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub generations: Vec<HistoryEntry>,
}

pub async fn list_history(
    state: &AppState,
    caller: &Caller,
    limit: Option<i64>,
) -> ApiResult<HistoryResponse> {
    let limit = limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let rows = state.db.list_generations(&caller.id, limit).await?;
    Ok(HistoryResponse {
        generations: rows.into_iter().map(HistoryEntry::from).collect(),
    })
}

pub async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<HistoryResponse>> {
    let caller = identify_caller(&headers)?;
    Ok(Json(list_history(&state, &caller, query.limit).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::SubscriptionTier;
    use crate::db::models::GenerationInsert;
    use crate::handlers::test_support::test_state;

    #[tokio::test]
    async fn history_is_scoped_to_the_caller() {
        let state = test_state(&[], 0).await;
        for user in ["user-a", "user-b"] {
            state
                .db
                .get_or_create_profile(user, SubscriptionTier::Premium, Some(100))
                .await
                .expect("profile");
            state
                .db
                .insert_generation(&GenerationInsert {
                    user_id: user.to_string(),
                    style: "tech".to_string(),
                    quantity: 1,
                    settings_json: r#"{"style":"tech"}"#.to_string(),
                    prompt: "prompt".to_string(),
                    image_urls: vec![format!("http://localhost/{user}.png")],
                    created_at: Utc::now(),
                })
                .await
                .expect("insert");
        }

        let caller = Caller {
            id: "user-a".to_string(),
            default_tier: SubscriptionTier::Free,
        };
        let response = list_history(&state, &caller, Some(0)).await.expect("history");
        assert_eq!(response.generations.len(), 1);
        let entry = &response.generations[0];
        assert_eq!(entry.image_urls, vec!["http://localhost/user-a.png".to_string()]);
        assert_eq!(entry.settings["style"], "tech");
    }
}
