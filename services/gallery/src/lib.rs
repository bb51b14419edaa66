//! Gallery Service
//!
//! HTTP API for an image gallery. Image payloads live in an S3 bucket under
//! timestamped keys; their descriptive metadata (name, type, model, color)
//! and public URL are indexed in PostgreSQL.
//!
//! ## Features
//!
//! - **Image Uploads**: Multipart uploads stored under collision-resistant
//!   keys, multipart S3 uploads for large payloads
//! - **Metadata Index**: PostgreSQL-backed records, listed most recent first,
//!   with partial updates
//! - **Best-effort Deletes**: A record is removed even when its object could
//!   not be deleted
//! - **Bucket Browsing**: Bucket listing with titles and upload times
//!   recovered from object keys
//!
//! ## Architecture
//!
//! ```text
//!  HTTP clients
//!       │
//!       ▼
//! ┌──────────────┐
//! │ Gallery API  │  /images, /images/:id, /objects
//! └──────────────┘
//!       │
//!       ▼
//! ┌──────────────┐
//! │ Image        │
//! │ Service      │
//! └──────────────┘
//!       │                         │
//!       ▼                         ▼
//! ┌──────────────┐          ┌──────────────┐
//! │ Object       │          │ Metadata     │
//! │ Store (S3)   │          │ Store        │
//! └──────────────┘          └──────────────┘
//!       │                         │
//!       ▼                         ▼
//!   S3 Bucket                 PostgreSQL
//!  {name}-{ISO time}.{ext}     images
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod image_service;
pub mod metadata_store;
pub mod object_key;
pub mod object_store;

#[cfg(test)]
mod fake;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::GalleryError;
pub use image_service::{BucketObject, ImageService, ImageUpload};
pub use metadata_store::{ImageRecord, ImageRepository, ImageUpdate, MetadataStore, NewImage};
pub use object_store::{ObjectStore, S3ObjectStore, StoredObject};
