use crate::config::DatabaseConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};

/// Stored image metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct ImageRecord {
    /// Store-assigned image ID
    pub id: i64,
    /// Display title
    pub name: String,
    /// Free-form category
    #[serde(rename = "type")]
    #[sqlx(rename = "type")]
    pub kind: Option<String>,
    /// Device/model tag
    pub model: Option<String>,
    /// Color tag
    pub color: Option<String>,
    /// Public URL of the image object
    pub image_url: String,
    /// When the record was created
    pub created_at: DateTime<Utc>,
}

/// A record about to be inserted
#[derive(Debug, Clone, PartialEq)]
pub struct NewImage {
    pub name: String,
    pub kind: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
    pub image_url: String,
}

/// Partial metadata update. `None` fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ImageUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl ImageUpdate {
    /// Whether the update touches no field
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.kind.is_none() && self.model.is_none() && self.color.is_none()
    }
}

/// Persistence of image records
#[async_trait]
pub trait ImageRepository: Send + Sync {
    /// All records, most recent first
    async fn list(&self) -> Result<Vec<ImageRecord>>;

    /// A single record by ID
    async fn get(&self, id: i64) -> Result<Option<ImageRecord>>;

    /// Insert a record and return it with its store-assigned fields
    async fn insert(&self, image: &NewImage) -> Result<ImageRecord>;

    /// Apply a partial update. Returns `None` when no record has this ID.
    async fn update(&self, id: i64, update: &ImageUpdate) -> Result<Option<ImageRecord>>;

    /// Delete a record. Returns whether a row was removed.
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Check connectivity
    async fn ping(&self) -> Result<()>;
}

/// Metadata store for image records in PostgreSQL
pub struct MetadataStore {
    pool: PgPool,
}

impl MetadataStore {
    /// Create a new metadata store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

    /// Close every pooled connection
    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL connection pool closed");
    }
}

#[async_trait]
impl ImageRepository for MetadataStore {
    #[instrument(skip(self))]
    async fn list(&self) -> Result<Vec<ImageRecord>> {
        let images = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, name, "type", model, color, image_url, created_at
            FROM images
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to query images")?;

        Ok(images)
    }

    async fn get(&self, id: i64) -> Result<Option<ImageRecord>> {
        let image = sqlx::query_as::<_, ImageRecord>(
            r#"
            SELECT id, name, "type", model, color, image_url, created_at
            FROM images
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query image")?;

        Ok(image)
    }

    #[instrument(skip(self, image), fields(name = %image.name))]
    async fn insert(&self, image: &NewImage) -> Result<ImageRecord> {
        let record = sqlx::query_as::<_, ImageRecord>(
            r#"
            INSERT INTO images (name, "type", model, color, image_url, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            RETURNING id, name, "type", model, color, image_url, created_at
            "#,
        )
        .bind(&image.name)
        .bind(&image.kind)
        .bind(&image.model)
        .bind(&image.color)
        .bind(&image.image_url)
        .fetch_one(&self.pool)
        .await
        .context("Failed to insert image metadata")?;

        debug!(id = record.id, image_url = %record.image_url, "Image indexed");

        Ok(record)
    }

    #[instrument(skip(self, update))]
    async fn update(&self, id: i64, update: &ImageUpdate) -> Result<Option<ImageRecord>> {
        let record = sqlx::query_as::<_, ImageRecord>(
            r#"
            UPDATE images
            SET name = COALESCE($1, name),
                "type" = COALESCE($2, "type"),
                model = COALESCE($3, model),
                color = COALESCE($4, color)
            WHERE id = $5
            RETURNING id, name, "type", model, color, image_url, created_at
            "#,
        )
        .bind(&update.name)
        .bind(&update.kind)
        .bind(&update.model)
        .bind(&update.color)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to update image metadata")?;

        Ok(record)
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM images WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to delete image metadata")?;

        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .context("Database ping failed")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_record_serializes_type_field() {
        let record = ImageRecord {
            id: 7,
            name: "Sunset".to_string(),
            kind: Some("landscape".to_string()),
            model: None,
            color: Some("orange".to_string()),
            image_url: "https://photos.s3.eu-west-1.amazonaws.com/sunset.jpg".to_string(),
            created_at: Utc::now(),
        };

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "landscape");
        assert!(json.get("kind").is_none());
        assert!(json["model"].is_null());
        assert_eq!(json["id"], 7);
    }

    #[test]
    fn test_image_update_deserializes_partial() {
        let update: ImageUpdate = serde_json::from_str(r#"{"type": "portrait"}"#).unwrap();
        assert_eq!(update.kind.as_deref(), Some("portrait"));
        assert!(update.name.is_none());
        assert!(!update.is_empty());

        let update: ImageUpdate = serde_json::from_str("{}").unwrap();
        assert!(update.is_empty());
    }
}
