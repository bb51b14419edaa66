//! In-memory stores for tests.

use crate::metadata_store::{ImageRecord, ImageRepository, ImageUpdate, NewImage};
use crate::object_key::encode_key;
use crate::object_store::{ObjectStore, StoredObject};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// `FakeObjectStore` keeps objects in memory and builds virtual-hosted URLs
/// the way S3 does.
#[derive(Clone)]
pub struct FakeObjectStore {
    bucket: String,
    region: String,
    objects: Arc<Mutex<BTreeMap<String, (Vec<u8>, String)>>>,
    fail: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl FakeObjectStore {
    pub fn new(bucket: &str, region: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            region: region.to_string(),
            objects: Arc::new(Mutex::new(BTreeMap::new())),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every call fail until reset
    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn get(&self, key: &str) -> Option<(Vec<u8>, String)> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    fn url(&self, key: &str) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket,
            self.region,
            encode_key(key)
        )
    }

    fn check(&self) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            bail!("object store unavailable");
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        self.check()?;
        self.objects
            .lock()
            .await
            .insert(key.to_string(), (body, content_type.to_string()));
        Ok(self.url(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.check()?;
        self.objects.lock().await.remove(key);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<StoredObject>> {
        self.check()?;
        let objects = self.objects.lock().await;
        Ok(objects
            .iter()
            .map(|(key, (body, _))| StoredObject {
                key: key.clone(),
                url: self.url(key),
                last_modified: None,
                size_bytes: Some(body.len() as i64),
            })
            .collect())
    }
}

/// `FakeImageRepository` assigns sequential IDs and strictly increasing
/// `created_at` values, one second apart.
#[derive(Clone)]
pub struct FakeImageRepository {
    rows: Arc<Mutex<Vec<ImageRecord>>>,
    next_id: Arc<AtomicI64>,
    epoch: DateTime<Utc>,
    fail_reads: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
}

#[allow(dead_code)]
impl FakeImageRepository {
    pub fn new() -> Self {
        Self {
            rows: Arc::new(Mutex::new(Vec::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            epoch: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            fail_reads: Arc::new(AtomicBool::new(false)),
            fail_writes: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(())
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("duplicate key value violates unique constraint");
        }
        Ok(())
    }
}

#[async_trait]
impl ImageRepository for FakeImageRepository {
    async fn list(&self) -> Result<Vec<ImageRecord>> {
        self.check_read()?;
        let mut rows = self.rows.lock().await.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn get(&self, id: i64) -> Result<Option<ImageRecord>> {
        self.check_read()?;
        Ok(self.rows.lock().await.iter().find(|r| r.id == id).cloned())
    }

    async fn insert(&self, image: &NewImage) -> Result<ImageRecord> {
        self.check_write()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let record = ImageRecord {
            id,
            name: image.name.clone(),
            kind: image.kind.clone(),
            model: image.model.clone(),
            color: image.color.clone(),
            image_url: image.image_url.clone(),
            created_at: self.epoch + Duration::seconds(id),
        };
        self.rows.lock().await.push(record.clone());
        Ok(record)
    }

    async fn update(&self, id: i64, update: &ImageUpdate) -> Result<Option<ImageRecord>> {
        self.check_write()?;
        let mut rows = self.rows.lock().await;
        let Some(row) = rows.iter_mut().find(|r| r.id == id) else {
            return Ok(None);
        };

        if let Some(ref name) = update.name {
            row.name = name.clone();
        }
        if let Some(ref kind) = update.kind {
            row.kind = Some(kind.clone());
        }
        if let Some(ref model) = update.model {
            row.model = Some(model.clone());
        }
        if let Some(ref color) = update.color {
            row.color = Some(color.clone());
        }

        Ok(Some(row.clone()))
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        self.check_write()?;
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|r| r.id != id);
        Ok(rows.len() < before)
    }

    async fn ping(&self) -> Result<()> {
        self.check_read()
    }
}
