use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProfileRow {
    pub user_id: String,
    pub tier: String,
    pub used_generations: i64,
    /// `None` for unlimited tiers.
    pub credits_remaining: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProfileRow {
    pub fn used_generations_u32(&self) -> u32 {
        u32::try_from(self.used_generations.max(0)).unwrap_or(u32::MAX)
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GenerationRow {
    pub id: i64,
    pub user_id: String,
    pub style: String,
    pub quantity: i64,
    pub settings_json: String,
    pub prompt: String,
    pub image_urls_json: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GenerationInsert {
    pub user_id: String,
    pub style: String,
    pub quantity: i64,
    pub settings_json: String,
    pub prompt: String,
    pub image_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}
