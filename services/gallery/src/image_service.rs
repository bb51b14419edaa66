//! Image record lifecycle.
//!
//! Every operation is a single request against one or both stores:
//!
//! - create: object store write happens-before the metadata insert, so a
//!   record never points at an object that was not written. A failed insert
//!   leaves the object orphaned.
//! - delete: the object delete is best effort. The record is gone once its
//!   row is gone, whatever the object store said.
//!
//! Concurrent updates of one record are last-write-wins.

use crate::error::{GalleryError, Result};
use crate::metadata_store::{ImageRecord, ImageRepository, ImageUpdate, NewImage};
use crate::object_key::{derive_object_key, object_key_from_url, rewrite_region, split_object_key};
use crate::object_store::ObjectStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Column limits, mirrored from the `images` table
const MAX_NAME_LEN: usize = 255;
const MAX_TAG_LEN: usize = 100;
const MAX_COLOR_LEN: usize = 50;

/// An uploaded image with its metadata
#[derive(Debug, Clone, Default)]
pub struct ImageUpload {
    /// Original filename as sent by the client
    pub filename: String,
    /// MIME type of the payload
    pub content_type: String,
    /// Image bytes
    pub data: Vec<u8>,
    pub name: String,
    pub kind: Option<String>,
    pub model: Option<String>,
    pub color: Option<String>,
}

/// An object found in the bucket, described from its key alone
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketObject {
    pub key: String,
    pub url: String,
    pub title: String,
    /// Upload time embedded in the key
    pub timestamp: Option<DateTime<Utc>>,
    pub extension: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub size_bytes: Option<i64>,
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Mediates between the metadata store and the object store
#[derive(Clone)]
pub struct ImageService {
    objects: Arc<dyn ObjectStore>,
    images: Arc<dyn ImageRepository>,
    bucket: String,
    serving_region: Option<String>,
    clock: Clock,
}

impl ImageService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        images: Arc<dyn ImageRepository>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            objects,
            images,
            bucket: bucket.into(),
            serving_region: None,
            clock: Arc::new(Utc::now),
        }
    }

    /// Rewrite image URLs to `region` on read paths
    pub fn with_serving_region(mut self, region: Option<String>) -> Self {
        self.serving_region = region;
        self
    }

    /// Replace the clock used to stamp object keys
    pub fn with_clock(mut self, clock: impl Fn() -> DateTime<Utc> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// All records, most recent first
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<ImageRecord>> {
        let images = self
            .images
            .list()
            .await
            .map_err(GalleryError::MetadataStore)?;

        Ok(images.into_iter().map(|image| self.for_serving(image)).collect())
    }

    /// A single record
    #[instrument(skip(self))]
    pub async fn get(&self, id: i64) -> Result<ImageRecord> {
        self.images
            .get(id)
            .await
            .map_err(GalleryError::MetadataStore)?
            .map(|image| self.for_serving(image))
            .ok_or(GalleryError::NotFound)
    }

    /// Store the payload, then index it
    #[instrument(skip(self, upload), fields(filename = %upload.filename, size_bytes = upload.data.len()))]
    pub async fn create(&self, upload: ImageUpload) -> Result<ImageRecord> {
        let name = upload.name.trim();
        if name.is_empty() {
            return Err(GalleryError::validation("Image name is required"));
        }
        if upload.data.is_empty() {
            return Err(GalleryError::validation("No file uploaded"));
        }

        let new_image = NewImage {
            name: check_len("name", name.to_string(), MAX_NAME_LEN)?,
            kind: non_blank(upload.kind).map(|v| check_len("type", v, MAX_TAG_LEN)).transpose()?,
            model: non_blank(upload.model).map(|v| check_len("model", v, MAX_TAG_LEN)).transpose()?,
            color: non_blank(upload.color).map(|v| check_len("color", v, MAX_COLOR_LEN)).transpose()?,
            image_url: String::new(),
        };

        let key = derive_object_key(&upload.filename, &upload.content_type, (self.clock)());

        let image_url = self
            .objects
            .put(&key, upload.data, &upload.content_type)
            .await
            .map_err(GalleryError::ObjectStore)?;

        let record = self
            .images
            .insert(&NewImage { image_url, ..new_image })
            .await
            .map_err(|e| {
                error!(key = %key, error = %e, "Metadata insert failed, object left orphaned");
                metrics::counter!("gallery.objects.orphaned").increment(1);
                GalleryError::MetadataStore(e)
            })?;

        info!(id = record.id, key = %key, "Image created");
        metrics::counter!("gallery.images.created").increment(1);

        Ok(record)
    }

    /// Overwrite the fields present in `update`, keep the rest
    #[instrument(skip(self, update))]
    pub async fn update(&self, id: i64, update: ImageUpdate) -> Result<ImageRecord> {
        let update = ImageUpdate {
            name: non_blank(update.name).map(|v| check_len("name", v, MAX_NAME_LEN)).transpose()?,
            kind: non_blank(update.kind).map(|v| check_len("type", v, MAX_TAG_LEN)).transpose()?,
            model: non_blank(update.model).map(|v| check_len("model", v, MAX_TAG_LEN)).transpose()?,
            color: non_blank(update.color).map(|v| check_len("color", v, MAX_COLOR_LEN)).transpose()?,
        };

        if update.is_empty() {
            return self.get(id).await;
        }

        let record = self
            .images
            .update(id, &update)
            .await
            .map_err(GalleryError::MetadataStore)?
            .ok_or(GalleryError::NotFound)?;

        info!(id = record.id, "Image updated");
        metrics::counter!("gallery.images.updated").increment(1);

        Ok(self.for_serving(record))
    }

    /// Remove the object (best effort) and the record
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<()> {
        let record = self
            .images
            .get(id)
            .await
            .map_err(GalleryError::MetadataStore)?
            .ok_or(GalleryError::NotFound)?;

        let key = object_key_from_url(&record.image_url, &self.bucket)
            .ok_or_else(|| GalleryError::validation("Invalid image URL format"))?;

        if let Err(e) = self.objects.delete(&key).await {
            warn!(id, key = %key, error = %e, "Object delete failed, removing record anyway");
            metrics::counter!("gallery.objects.delete_failed").increment(1);
        }

        let deleted = self
            .images
            .delete(id)
            .await
            .map_err(GalleryError::MetadataStore)?;

        if !deleted {
            return Err(GalleryError::NotFound);
        }

        info!(id, key = %key, "Image deleted");
        metrics::counter!("gallery.images.deleted").increment(1);

        Ok(())
    }

    /// Objects in the bucket, described from their keys
    #[instrument(skip(self))]
    pub async fn browse(&self) -> Result<Vec<BucketObject>> {
        let objects = self
            .objects
            .list()
            .await
            .map_err(GalleryError::ObjectStore)?;

        Ok(objects
            .into_iter()
            .map(|object| {
                let parts = split_object_key(&object.key);
                BucketObject {
                    url: self.serving_url(object.url),
                    key: object.key,
                    title: parts.title,
                    timestamp: parts.timestamp,
                    extension: parts.extension,
                    last_modified: object.last_modified,
                    size_bytes: object.size_bytes,
                }
            })
            .collect())
    }

    /// Whether the metadata store answers
    pub async fn ping(&self) -> Result<()> {
        self.images.ping().await.map_err(GalleryError::MetadataStore)
    }

    fn for_serving(&self, mut image: ImageRecord) -> ImageRecord {
        image.image_url = self.serving_url(image.image_url);
        image
    }

    fn serving_url(&self, url: String) -> String {
        match self.serving_region {
            Some(ref region) => rewrite_region(&url, region),
            None => url,
        }
    }
}

/// Blank strings count as absent
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_len(field: &str, value: String, max: usize) -> Result<String> {
    if value.chars().count() > max {
        return Err(GalleryError::validation(format!(
            "Field '{field}' must be at most {max} characters"
        )));
    }
    Ok(value)
}
