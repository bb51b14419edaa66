use thiserror::Error;

/// Errors returned by the image service
#[derive(Error, Debug)]
pub enum GalleryError {
    /// Request rejected before touching any store
    #[error("{0}")]
    Validation(String),

    #[error("Image not found")]
    NotFound,

    #[error("Object store failure: {0:#}")]
    ObjectStore(anyhow::Error),

    #[error("Metadata store failure: {0:#}")]
    MetadataStore(anyhow::Error),
}

impl GalleryError {
    pub fn validation(message: impl Into<String>) -> Self {
        GalleryError::Validation(message.into())
    }
}

pub type Result<T, E = GalleryError> = std::result::Result<T, E>;
