use anyhow::{anyhow, Result};
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::info;

use crate::access::SubscriptionTier;
use crate::db::models::{GenerationInsert, GenerationRow, ProfileRow};

const PROFILE_COLUMNS: &str =
    "user_id, tier, used_generations, credits_remaining, created_at, updated_at";
const GENERATION_COLUMNS: &str =
    "id, user_id, style, quantity, settings_json, prompt, image_urls_json, created_at";

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn init(database_url: &str) -> Result<Self> {
        // Every connection to an in-memory database is a fresh database.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS profiles (\
                user_id TEXT PRIMARY KEY,\
                tier TEXT NOT NULL,\
                used_generations INTEGER NOT NULL DEFAULT 0,\
                credits_remaining INTEGER,\
                created_at TEXT NOT NULL,\
                updated_at TEXT NOT NULL\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS generations (\
                id INTEGER PRIMARY KEY AUTOINCREMENT,\
                user_id TEXT NOT NULL,\
                style TEXT NOT NULL,\
                quantity INTEGER NOT NULL,\
                settings_json TEXT NOT NULL,\
                prompt TEXT NOT NULL,\
                image_urls_json TEXT NOT NULL,\
                created_at TEXT NOT NULL,\
                FOREIGN KEY(user_id) REFERENCES profiles(user_id)\
            );",
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_generations_user_created ON generations(user_id, created_at);",
        )
        .execute(&pool)
        .await?;

        info!("Database tables created successfully");

        Ok(Database { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get_profile(&self, user_id: &str) -> Result<Option<ProfileRow>> {
        let query = format!("SELECT {PROFILE_COLUMNS} FROM profiles WHERE user_id = ?");
        let row = sqlx::query_as::<_, ProfileRow>(&query)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Returns the caller's profile, creating it at `default_tier` with
    /// `initial_credits` on first sight.
    pub async fn get_or_create_profile(
        &self,
        user_id: &str,
        default_tier: SubscriptionTier,
        initial_credits: Option<i64>,
    ) -> Result<ProfileRow> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO profiles (user_id, tier, used_generations, credits_remaining, created_at, updated_at) \
             VALUES (?, ?, 0, ?, ?, ?) \
             ON CONFLICT(user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(default_tier.as_str())
        .bind(initial_credits)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_profile(user_id)
            .await?
            .ok_or_else(|| anyhow!("Profile {user_id} missing after insert"))
    }

    /// Moves a user to `tier`, creating the profile if needed. `limit` is the
    /// new tier's generation limit (`None` when unlimited) and is used to
    /// recompute the remaining credits.
    pub async fn set_tier(
        &self,
        user_id: &str,
        tier: SubscriptionTier,
        limit: Option<i64>,
    ) -> Result<ProfileRow> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO profiles (user_id, tier, used_generations, credits_remaining, created_at, updated_at) \
             VALUES (?, ?, 0, ?, ?, ?) \
             ON CONFLICT(user_id) DO UPDATE SET \
             tier = excluded.tier, \
             credits_remaining = CASE WHEN ? IS NULL THEN NULL ELSE MAX(? - profiles.used_generations, 0) END, \
             updated_at = excluded.updated_at",
        )
        .bind(user_id)
        .bind(tier.as_str())
        .bind(limit)
        .bind(now)
        .bind(now)
        .bind(limit)
        .bind(limit)
        .execute(&self.pool)
        .await?;

        self.get_profile(user_id)
            .await?
            .ok_or_else(|| anyhow!("Profile {user_id} missing after tier update"))
    }

    /// Takes one generation from the user's quota in a single statement, so
    /// overlapping requests cannot both spend the last credit. `limit` is the
    /// tier's generation limit (`None` when unlimited). Returns `None` when
    /// the quota is already used up or the profile does not exist.
    pub async fn reserve_generation(
        &self,
        user_id: &str,
        limit: Option<i64>,
    ) -> Result<Option<ProfileRow>> {
        let query = format!(
            "UPDATE profiles SET \
             used_generations = used_generations + 1, \
             credits_remaining = CASE WHEN ? IS NULL THEN NULL ELSE MAX(? - (used_generations + 1), 0) END, \
             updated_at = ? \
             WHERE user_id = ? AND (? IS NULL OR used_generations < ?) \
             RETURNING {PROFILE_COLUMNS}"
        );
        let reserved = sqlx::query_as::<_, ProfileRow>(&query)
            .bind(limit)
            .bind(limit)
            .bind(Utc::now())
            .bind(user_id)
            .bind(limit)
            .bind(limit)
            .fetch_optional(&self.pool)
            .await?;
        Ok(reserved)
    }

    /// Gives back a reservation whose generation produced nothing.
    pub async fn refund_generation(&self, user_id: &str, limit: Option<i64>) -> Result<ProfileRow> {
        sqlx::query(
            "UPDATE profiles SET \
             used_generations = MAX(used_generations - 1, 0), \
             credits_remaining = CASE WHEN ? IS NULL THEN NULL ELSE MAX(? - MAX(used_generations - 1, 0), 0) END, \
             updated_at = ? \
             WHERE user_id = ?",
        )
        .bind(limit)
        .bind(limit)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.get_profile(user_id)
            .await?
            .ok_or_else(|| anyhow!("Profile {user_id} missing after refund"))
    }

    pub async fn insert_generation(&self, insert: &GenerationInsert) -> Result<i64> {
        let image_urls_json = serde_json::to_string(&insert.image_urls)?;
        let result = sqlx::query(
            "INSERT INTO generations (user_id, style, quantity, settings_json, prompt, image_urls_json, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&insert.user_id)
        .bind(&insert.style)
        .bind(insert.quantity)
        .bind(&insert.settings_json)
        .bind(&insert.prompt)
        .bind(image_urls_json)
        .bind(insert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn count_generations(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM generations WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Newest first.
    pub async fn list_generations(&self, user_id: &str, limit: i64) -> Result<Vec<GenerationRow>> {
        let query = format!(
            "SELECT {GENERATION_COLUMNS} FROM generations WHERE user_id = ? \
             ORDER BY created_at DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, GenerationRow>(&query)
            .bind(user_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    #[cfg(test)]
    pub(crate) async fn drop_history_table(&self) {
        sqlx::query("DROP TABLE generations")
            .execute(&self.pool)
            .await
            .expect("drop generations");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn database() -> Database {
        Database::init("sqlite::memory:")
            .await
            .expect("in-memory database")
    }

    fn generation(user_id: &str, style: &str) -> GenerationInsert {
        GenerationInsert {
            user_id: user_id.to_string(),
            style: style.to_string(),
            quantity: 2,
            settings_json: "{}".to_string(),
            prompt: "Create 2 different headshots".to_string(),
            image_urls: vec!["http://localhost/a.png".to_string()],
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn profiles_are_created_once() {
        let db = database().await;
        let first = db
            .get_or_create_profile("user-1", SubscriptionTier::Free, Some(10))
            .await
            .expect("created");
        assert_eq!(first.tier, "free");
        assert_eq!(first.used_generations, 0);
        assert_eq!(first.credits_remaining, Some(10));

        let again = db
            .get_or_create_profile("user-1", SubscriptionTier::Guest, Some(3))
            .await
            .expect("loaded");
        assert_eq!(again.tier, "free");
        assert_eq!(again.credits_remaining, Some(10));
    }

    #[tokio::test]
    async fn reservations_stop_at_the_limit() {
        let db = database().await;
        db.get_or_create_profile("user-2", SubscriptionTier::Free, Some(2))
            .await
            .expect("created");

        let first = db
            .reserve_generation("user-2", Some(2))
            .await
            .expect("reserved")
            .expect("within quota");
        assert_eq!(first.used_generations, 1);
        assert_eq!(first.credits_remaining, Some(1));

        db.reserve_generation("user-2", Some(2))
            .await
            .expect("reserved")
            .expect("within quota");
        let exhausted = db.reserve_generation("user-2", Some(2)).await.expect("query");
        assert!(exhausted.is_none());
        let profile = db.get_profile("user-2").await.expect("query").expect("profile");
        assert_eq!(profile.used_generations, 2);
        assert_eq!(profile.credits_remaining, Some(0));

        let unlimited = db
            .reserve_generation("user-2", None)
            .await
            .expect("reserved")
            .expect("unlimited");
        assert_eq!(unlimited.used_generations, 3);
        assert_eq!(unlimited.credits_remaining, None);

        assert!(db
            .reserve_generation("nobody", Some(1))
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn refunds_return_the_reserved_credit() {
        let db = database().await;
        db.get_or_create_profile("user-r", SubscriptionTier::Guest, Some(3))
            .await
            .expect("created");
        db.reserve_generation("user-r", Some(3))
            .await
            .expect("reserved")
            .expect("within quota");

        let refunded = db.refund_generation("user-r", Some(3)).await.expect("refunded");
        assert_eq!(refunded.used_generations, 0);
        assert_eq!(refunded.credits_remaining, Some(3));

        let floor = db.refund_generation("user-r", Some(3)).await.expect("refunded");
        assert_eq!(floor.used_generations, 0);
    }

    #[tokio::test]
    async fn tier_changes_recompute_credits() {
        let db = database().await;
        db.get_or_create_profile("user-3", SubscriptionTier::Free, Some(10))
            .await
            .expect("created");
        for _ in 0..4 {
            db.reserve_generation("user-3", Some(10))
                .await
                .expect("reserved")
                .expect("within quota");
        }

        let premium = db
            .set_tier("user-3", SubscriptionTier::Premium, Some(100))
            .await
            .expect("upgraded");
        assert_eq!(premium.tier, "premium");
        assert_eq!(premium.used_generations, 4);
        assert_eq!(premium.credits_remaining, Some(96));

        let pro = db
            .set_tier("user-3", SubscriptionTier::Professional, None)
            .await
            .expect("upgraded");
        assert_eq!(pro.credits_remaining, None);

        let fresh = db
            .set_tier("user-4", SubscriptionTier::Premium, Some(100))
            .await
            .expect("created");
        assert_eq!(fresh.credits_remaining, Some(100));
    }

    #[tokio::test]
    async fn generations_are_listed_newest_first() {
        let db = database().await;
        db.get_or_create_profile("user-5", SubscriptionTier::Premium, Some(100))
            .await
            .expect("created");
        db.insert_generation(&generation("user-5", "corporate"))
            .await
            .expect("inserted");
        db.insert_generation(&generation("user-5", "tech"))
            .await
            .expect("inserted");

        assert_eq!(db.count_generations("user-5").await.expect("count"), 2);
        assert_eq!(db.count_generations("user-6").await.expect("count"), 0);

        let rows = db.list_generations("user-5", 10).await.expect("listed");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].style, "tech");
        let urls: Vec<String> = serde_json::from_str(&rows[0].image_urls_json).expect("json");
        assert_eq!(urls, vec!["http://localhost/a.png".to_string()]);

        let limited = db.list_generations("user-5", 1).await.expect("listed");
        assert_eq!(limited.len(), 1);
    }
}
